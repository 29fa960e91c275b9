//! Application layer orchestrating the payment lifecycle.
//!
//! `state_machine` and `merge` validate operations and compute their effect
//! without side effects. `LedgerService` applies those effects to the stores,
//! and `gateway` puts authorization and pausing in front of it.

pub mod gateway;
pub mod ledger;
pub mod merge;
pub mod state_machine;
