use crate::domain::codec;
use crate::domain::event::PaymentEvent;
use crate::domain::payment::{AccountId, Payment, PaymentId};
use crate::domain::ports::{Changeset, PaymentStore, RecordWrite, SettlementStore, TokenLedger};
use crate::domain::transfer::{BalanceSheet, Transfer, touched_accounts};
use crate::error::{LedgerError, Result, TransferError};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Column Family for payment records, keyed by the 32 byte identifier.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family for the packed event log, keyed by a big-endian sequence number.
pub const CF_EVENTS: &str = "events";
/// Column Family for token balances, keyed by account name.
pub const CF_BALANCES: &str = "balances";

/// A persistent store implementation using RocksDB.
///
/// Serves as both the payment store and the token ledger, using separate
/// Column Families. Every commit is written as a single `WriteBatch`, so a
/// crash never leaves a record without its events.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    next_seq: Arc<AtomicU64>,
    balance_lock: Arc<Mutex<()>>,
}

fn internal(message: impl Into<String>) -> LedgerError {
    LedgerError::Internal(Box::new(std::io::Error::other(message.into())))
}

fn decode_u64(bytes: &[u8], what: &str) -> Result<u64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| internal(format!("{what} must be 8 bytes, found {}", bytes.len())))?;
    Ok(u64::from_be_bytes(raw))
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist and resumes the event
    /// sequence after the last stored event.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PAYMENTS, CF_EVENTS, CF_BALANCES]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        let store = Self {
            db: Arc::new(db),
            next_seq: Arc::new(AtomicU64::new(0)),
            balance_lock: Arc::new(Mutex::new(())),
        };
        let next = store.last_event_seq()?.map_or(0, |seq| seq + 1);
        store.next_seq.store(next, Ordering::SeqCst);
        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| internal(format!("{name} column family not found")))
    }

    fn last_event_seq(&self) -> Result<Option<u64>> {
        let cf = self.cf(CF_EVENTS)?;
        match self.db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(decode_u64(&key, "event key")?))
            }
            None => Ok(None),
        }
    }

    fn read_balance(&self, account: &AccountId) -> Result<u64> {
        let cf = self.cf(CF_BALANCES)?;
        match self.db.get_pinned_cf(cf, account.as_str().as_bytes())? {
            Some(bytes) => decode_u64(&bytes, "balance"),
            None => Ok(0),
        }
    }

    fn write_balances(&self, balances: impl Iterator<Item = (AccountId, u64)>) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_balances(&mut batch, balances)?;
        self.db.write(batch)?;
        Ok(())
    }

    fn stage_balances(
        &self,
        batch: &mut WriteBatch,
        balances: impl Iterator<Item = (AccountId, u64)>,
    ) -> Result<()> {
        let cf = self.cf(CF_BALANCES)?;
        for (account, balance) in balances {
            batch.put_cf(cf, account.as_str().as_bytes(), balance.to_be_bytes());
        }
        Ok(())
    }

    /// Checks every record and stages the records and events into `batch`.
    fn stage_changeset(&self, batch: &mut WriteBatch, changeset: &Changeset) -> Result<()> {
        let payments = self.cf(CF_PAYMENTS)?;
        let events = self.cf(CF_EVENTS)?;

        for write in &changeset.writes {
            match write {
                RecordWrite::Put(id, payment) => {
                    payment.check_invariants()?;
                    let value = serde_json::to_vec(payment)
                        .map_err(|e| internal(format!("Serialization error: {}", e)))?;
                    batch.put_cf(payments, id.as_bytes(), value);
                }
                RecordWrite::Delete(id) => batch.delete_cf(payments, id.as_bytes()),
            }
        }

        let encoded = changeset
            .events
            .iter()
            .map(codec::encode)
            .collect::<Result<Vec<_>>>()?;
        let first = self
            .next_seq
            .fetch_add(encoded.len() as u64, Ordering::SeqCst);
        for (seq, bytes) in (first..).zip(encoded) {
            batch.put_cf(events, seq.to_be_bytes(), bytes);
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn get(&self, id: &PaymentId) -> Result<Option<Payment>> {
        let cf = self.cf(CF_PAYMENTS)?;
        match self.db.get_pinned_cf(cf, id.as_bytes())? {
            Some(bytes) => {
                let payment = serde_json::from_slice(&bytes)
                    .map_err(|e| internal(format!("Deserialization error: {}", e)))?;
                Ok(Some(payment))
            }
            None => Ok(None),
        }
    }

    async fn get_all(&self) -> Result<Vec<(PaymentId, Payment)>> {
        let cf = self.cf(CF_PAYMENTS)?;
        let mut payments = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let raw: [u8; PaymentId::LEN] = key
                .as_ref()
                .try_into()
                .map_err(|_| internal("payment key must be 32 bytes"))?;
            let payment: Payment = serde_json::from_slice(&value)
                .map_err(|e| internal(format!("Failed to deserialize payment: {}", e)))?;
            payments.push((PaymentId::new(raw), payment));
        }
        Ok(payments)
    }

    async fn commit(&self, changeset: Changeset) -> Result<()> {
        if changeset.is_empty() {
            return Ok(());
        }
        let mut batch = WriteBatch::default();
        self.stage_changeset(&mut batch, &changeset)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn events(&self, id: Option<&PaymentId>) -> Result<Vec<PaymentEvent>> {
        let cf = self.cf(CF_EVENTS)?;
        let mut events = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            let event = codec::decode(&value)?;
            if id.is_none_or(|id| event.payment_id == *id) {
                events.push(event);
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl TokenLedger for RocksDBStore {
    async fn balance_of(&self, account: &AccountId) -> Result<u64> {
        self.read_balance(account)
    }

    async fn balances(&self) -> Result<Vec<(AccountId, u64)>> {
        let cf = self.cf(CF_BALANCES)?;
        let mut balances = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let account = std::str::from_utf8(&key)
                .map_err(|e| internal(format!("account key is not UTF-8: {}", e)))?;
            balances.push((AccountId::new(account), decode_u64(&value, "balance")?));
        }
        Ok(balances)
    }

    async fn mint(&self, to: &AccountId, amount: u64) -> Result<()> {
        let _guard = self.balance_lock.lock().await;
        let balance = self
            .read_balance(to)?
            .checked_add(amount)
            .ok_or_else(|| TransferError::BalanceOverflow(to.clone()))?;
        self.write_balances(std::iter::once((to.clone(), balance)))
    }

    async fn transfer(&self, transfer: &Transfer) -> Result<()> {
        self.transfer_all(std::slice::from_ref(transfer)).await
    }

    async fn transfer_all(&self, transfers: &[Transfer]) -> Result<()> {
        let _guard = self.balance_lock.lock().await;
        let mut sheet = BalanceSheet::new();
        for account in touched_accounts(transfers) {
            let balance = self.read_balance(&account)?;
            sheet.seed(account, balance);
        }
        sheet.apply_all(transfers)?;
        self.write_balances(sheet.into_balances())
    }
}

#[async_trait]
impl SettlementStore for RocksDBStore {
    async fn commit_with_transfers(
        &self,
        changeset: Changeset,
        transfers: &[Transfer],
    ) -> Result<()> {
        let _guard = self.balance_lock.lock().await;
        let mut sheet = BalanceSheet::new();
        for account in touched_accounts(transfers) {
            let balance = self.read_balance(&account)?;
            sheet.seed(account, balance);
        }
        sheet.apply_all(transfers)?;

        let mut batch = WriteBatch::default();
        self.stage_changeset(&mut batch, &changeset)?;
        self.stage_balances(&mut batch, sheet.into_balances())?;
        self.db.write(batch)?;
        Ok(())
    }
}
