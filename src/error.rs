use crate::domain::payment::{AccountId, PaymentId, PaymentStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Failure reported by the token movement collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("insufficient balance on {account}: requested {requested}, available {available}")]
    InsufficientBalance {
        account: AccountId,
        requested: u64,
        available: u64,
    },
    #[error("balance overflow on {0}")]
    BalanceOverflow(AccountId),
    #[error("token backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("payment {id} is {actual}, operation requires {expected}")]
    StatusMismatch {
        id: PaymentId,
        actual: PaymentStatus,
        expected: &'static str,
    },
    #[error("payment {id}: amount {requested} exceeds the unconfirmed balance {available}")]
    AmountExceedsUnconfirmed {
        id: PaymentId,
        requested: u64,
        available: u64,
    },
    #[error("amount overflow")]
    AmountOverflow,
    #[error("invalid amounts: {0}")]
    InvalidAmounts(String),
    #[error("cashback rate {rate} exceeds the maximum of {max} permil")]
    CashbackRateTooHigh { rate: u16, max: u16 },
    #[error("payment {id} reached the revocation limit of {limit}")]
    RevocationLimitReached { id: PaymentId, limit: u8 },
    #[error("merge rejected: {0}")]
    MergeRejected(String),
    #[error("token transfer failed: {0}")]
    Transfer(#[from] TransferError),
    #[error("caller {caller} is not allowed to {operation}")]
    Unauthorized {
        caller: AccountId,
        operation: &'static str,
    },
    #[error("ledger is paused")]
    Paused,
    #[error("event codec error: {0}")]
    Codec(String),
    #[error("invalid operation record: {0}")]
    InvalidRecord(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    Internal(Box<dyn std::error::Error + Send + Sync>),
}

impl LedgerError {
    pub(crate) fn status_mismatch(
        id: PaymentId,
        actual: PaymentStatus,
        expected: &'static str,
    ) -> Self {
        Self::StatusMismatch {
            id,
            actual,
            expected,
        }
    }
}
