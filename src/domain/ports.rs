use super::event::PaymentEvent;
use super::payment::{AccountId, Payment, PaymentId};
use super::transfer::Transfer;
use crate::error::Result;
use async_trait::async_trait;
use log::{debug, error};

/// A single record mutation inside a [`Changeset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite {
    Put(PaymentId, Payment),
    Delete(PaymentId),
}

/// Everything one ledger operation persists. Stores apply it atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub writes: Vec<RecordWrite>,
    pub events: Vec<PaymentEvent>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.events.is_empty()
    }
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>>;
    async fn get_all(&self) -> Result<Vec<(PaymentId, Payment)>>;
    /// Applies every write and appends every event, or nothing at all.
    async fn commit(&self, changeset: Changeset) -> Result<()>;
    /// Events in append order, optionally restricted to one payment.
    async fn events(&self, id: Option<&PaymentId>) -> Result<Vec<PaymentEvent>>;

    async fn put(&self, id: PaymentId, payment: Payment) -> Result<()> {
        self.commit(Changeset {
            writes: vec![RecordWrite::Put(id, payment)],
            events: Vec::new(),
        })
        .await
    }

    async fn delete(&self, id: &PaymentId) -> Result<()> {
        self.commit(Changeset {
            writes: vec![RecordWrite::Delete(*id)],
            events: Vec::new(),
        })
        .await
    }
}

/// Token movement collaborator. Any failure aborts the enclosing operation.
#[async_trait]
pub trait TokenLedger: Send + Sync {
    async fn balance_of(&self, account: &AccountId) -> Result<u64>;
    async fn balances(&self) -> Result<Vec<(AccountId, u64)>>;
    /// Creates tokens out of thin air; used to fund accounts.
    async fn mint(&self, to: &AccountId, amount: u64) -> Result<()>;
    async fn transfer(&self, transfer: &Transfer) -> Result<()>;

    /// Applies every transfer or none of them.
    ///
    /// The default applies them one by one and, on failure, reverses the ones
    /// already done in the opposite order.
    async fn transfer_all(&self, transfers: &[Transfer]) -> Result<()> {
        for (done, transfer) in transfers.iter().enumerate() {
            if let Err(e) = self.transfer(transfer).await {
                for applied in transfers[..done].iter().rev() {
                    debug!("compensating transfer {:?}", applied);
                    if let Err(undo) = self.transfer(&applied.reversed()).await {
                        error!("failed to compensate transfer {:?}: {}", applied, undo);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }
}

/// A store that keeps records, events and balances side by side.
///
/// Token movements and the changeset land in one atomic write, so a crash
/// can never separate them.
#[async_trait]
pub trait SettlementStore: PaymentStore + TokenLedger {
    /// Applies every transfer and the whole changeset, or nothing at all.
    async fn commit_with_transfers(
        &self,
        changeset: Changeset,
        transfers: &[Transfer],
    ) -> Result<()>;
}

pub type PaymentStoreBox = Box<dyn PaymentStore>;
pub type TokenLedgerBox = Box<dyn TokenLedger>;
pub type SettlementStoreBox = Box<dyn SettlementStore>;
pub type PaymentStoreFactory = Box<dyn Fn() -> PaymentStoreBox + Send + Sync>;
