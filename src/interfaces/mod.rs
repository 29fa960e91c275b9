pub mod csv;
pub mod event_log;
