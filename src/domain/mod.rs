pub mod allocator;
pub mod codec;
pub mod event;
pub mod payment;
pub mod ports;
pub mod transfer;
