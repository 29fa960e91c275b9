use crate::domain::event::PaymentEvent;
use crate::domain::payment::{AccountId, Payment, PaymentId};
use crate::domain::ports::{Changeset, PaymentStore, RecordWrite, TokenLedger};
use crate::domain::transfer::{BalanceSheet, Transfer, touched_accounts};
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct PaymentTables {
    records: HashMap<PaymentId, Payment>,
    events: Vec<PaymentEvent>,
}

/// A thread-safe in-memory store for payment records and their event log.
///
/// Records and events share one lock so a commit is observed all at once.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    tables: Arc<RwLock<PaymentTables>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        let tables = self.tables.read().await;
        Ok(tables.records.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<(PaymentId, Payment)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .iter()
            .map(|(id, payment)| (*id, payment.clone()))
            .collect())
    }

    async fn commit(&self, changeset: Changeset) -> Result<()> {
        if changeset.is_empty() {
            return Ok(());
        }
        for write in &changeset.writes {
            if let RecordWrite::Put(_, payment) = write {
                payment.check_invariants()?;
            }
        }

        let mut tables = self.tables.write().await;
        for write in changeset.writes {
            match write {
                RecordWrite::Put(id, payment) => {
                    tables.records.insert(id, payment);
                }
                RecordWrite::Delete(id) => {
                    tables.records.remove(&id);
                }
            }
        }
        tables.events.extend(changeset.events);
        Ok(())
    }

    async fn events(&self, id: Option<&PaymentId>) -> Result<Vec<PaymentEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|event| id.is_none_or(|id| event.payment_id == *id))
            .cloned()
            .collect())
    }
}

/// Token balances kept in memory.
#[derive(Default, Clone)]
pub struct InMemoryTokenLedger {
    balances: Arc<RwLock<HashMap<AccountId, u64>>>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenLedger for InMemoryTokenLedger {
    async fn balance_of(&self, account: &AccountId) -> Result<u64> {
        let balances = self.balances.read().await;
        Ok(balances.get(account).copied().unwrap_or(0))
    }

    async fn balances(&self) -> Result<Vec<(AccountId, u64)>> {
        let balances = self.balances.read().await;
        Ok(balances
            .iter()
            .map(|(account, balance)| (account.clone(), *balance))
            .collect())
    }

    async fn mint(&self, to: &AccountId, amount: u64) -> Result<()> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(to.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::BalanceOverflow(to.clone()))?;
        Ok(())
    }

    async fn transfer(&self, transfer: &Transfer) -> Result<()> {
        self.transfer_all(std::slice::from_ref(transfer)).await
    }

    /// Validates the whole batch on a scratch sheet before touching balances.
    async fn transfer_all(&self, transfers: &[Transfer]) -> Result<()> {
        let mut balances = self.balances.write().await;
        let mut sheet = BalanceSheet::new();
        for account in touched_accounts(transfers) {
            let balance = balances.get(&account).copied().unwrap_or(0);
            sheet.seed(account, balance);
        }
        sheet.apply_all(transfers)?;
        balances.extend(sheet.into_balances());
        Ok(())
    }
}
