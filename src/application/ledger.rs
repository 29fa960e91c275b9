use crate::application::merge::MergeCoordinator;
use crate::application::state_machine::{MakeRequest, PaymentStateMachine, Transition};
use crate::config::LedgerConfig;
use crate::domain::event::PaymentEvent;
use crate::domain::payment::{AccountId, Payment, PaymentId, PaymentLookup, PaymentStatus};
use crate::domain::ports::{
    Changeset, PaymentStoreBox, SettlementStore, SettlementStoreBox, TokenLedgerBox,
};
use crate::domain::transfer::Transfer;
use crate::error::{LedgerError, Result};
use log::{debug, error, info};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Drives payment lifecycle operations against the stores.
///
/// Operations run one at a time: each one loads its records, validates the
/// transition, moves tokens and persists the result before the next starts.
/// A failing operation leaves records and balances untouched.
pub struct LedgerService {
    config: LedgerConfig,
    payment_store: PaymentStoreBox,
    token_ledger: TokenLedgerBox,
    settlement: Option<SettlementStoreBox>,
    op_lock: Mutex<()>,
}

impl LedgerService {
    /// Creates a new `LedgerService`.
    ///
    /// # Arguments
    ///
    /// * `config` - Settlement accounts and limits.
    /// * `payment_store` - The store for payment records and events.
    /// * `token_ledger` - The token movement backend.
    pub fn new(
        config: LedgerConfig,
        payment_store: PaymentStoreBox,
        token_ledger: TokenLedgerBox,
    ) -> Self {
        Self {
            config,
            payment_store,
            token_ledger,
            settlement: None,
            op_lock: Mutex::new(()),
        }
    }

    /// Creates a `LedgerService` whose records and balances live in one store.
    ///
    /// Every operation then persists its token movements and its changeset
    /// in a single atomic commit.
    pub fn with_settlement_store<S>(config: LedgerConfig, store: S) -> Self
    where
        S: SettlementStore + Clone + 'static,
    {
        Self {
            config,
            payment_store: Box::new(store.clone()),
            token_ledger: Box::new(store.clone()),
            settlement: Some(Box::new(store)),
            op_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    fn machine(&self) -> PaymentStateMachine<'_> {
        PaymentStateMachine::new(&self.config)
    }

    pub async fn make(&self, id: PaymentId, request: MakeRequest) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.payment_store.get(&id).await?;
        let transition = self.machine().make(id, current.as_ref(), request)?;
        self.settle(vec![transition]).await
    }

    pub async fn update(
        &self,
        id: PaymentId,
        payer_amount: u64,
        sponsor_amount: u64,
    ) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.load(&id).await?;
        let transition = self
            .machine()
            .update(id, &current, payer_amount, sponsor_amount)?;
        self.settle(vec![transition]).await
    }

    pub async fn confirm(&self, id: PaymentId, amount: u64) -> Result<Vec<PaymentEvent>> {
        self.confirm_batch(&[(id, amount)]).await
    }

    /// Confirms several payments as one all-or-nothing operation.
    ///
    /// A payment may appear more than once; later entries see the effect of
    /// earlier ones.
    pub async fn confirm_batch(&self, items: &[(PaymentId, u64)]) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let mut overlay: HashMap<PaymentId, Payment> = HashMap::new();
        let mut transitions = Vec::with_capacity(items.len());
        for (id, amount) in items {
            let current = match overlay.get(id) {
                Some(payment) => payment.clone(),
                None => self.load(id).await?,
            };
            let transition = self.machine().confirm(*id, &current, *amount)?;
            if let Some(after) = transition.payment() {
                overlay.insert(*id, after.clone());
            }
            transitions.push(transition);
        }
        self.settle(transitions).await
    }

    pub async fn refund(&self, id: PaymentId, amount: u64) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.load(&id).await?;
        let transition = self.machine().refund(id, &current, amount)?;
        self.settle(vec![transition]).await
    }

    pub async fn revoke(&self, id: PaymentId) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.load(&id).await?;
        let transition = self.machine().revoke(id, &current)?;
        self.settle(vec![transition]).await
    }

    pub async fn reverse(&self, id: PaymentId) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.load(&id).await?;
        let transition = self.machine().reverse(id, &current)?;
        self.settle(vec![transition]).await
    }

    pub async fn update_lazy_and_confirm(
        &self,
        id: PaymentId,
        payer_amount: u64,
        sponsor_amount: u64,
        confirmation_amount: u64,
    ) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.load(&id).await?;
        let transition = self.machine().update_lazy_and_confirm(
            id,
            &current,
            payer_amount,
            sponsor_amount,
            confirmation_amount,
        )?;
        self.settle(vec![transition]).await
    }

    pub async fn merge_payments(
        &self,
        target_id: PaymentId,
        source_ids: &[PaymentId],
    ) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let target = self.load(&target_id).await?;
        let mut sources = Vec::with_capacity(source_ids.len());
        for id in source_ids {
            sources.push((*id, self.load(id).await?));
        }
        let transitions = MergeCoordinator::plan(target_id, &target, &sources)?;
        self.settle(transitions).await
    }

    /// Deletes a revoked payment so it no longer counts revocations.
    pub async fn reset(&self, id: PaymentId) -> Result<Vec<PaymentEvent>> {
        let _guard = self.op_lock.lock().await;
        let current = self.load(&id).await?;
        let transition = self.machine().reset(id, &current)?;
        self.settle(vec![transition]).await
    }

    /// Adds freshly minted tokens to an account.
    ///
    /// This is a collaborator-side mint used to seed balances. It sits outside
    /// the authorized operation surface: no caller is checked and the pause
    /// flag does not apply.
    pub async fn fund(&self, account: &AccountId, amount: u64) -> Result<()> {
        let _guard = self.op_lock.lock().await;
        self.token_ledger.mint(account, amount).await
    }

    pub async fn get_payment(&self, id: &PaymentId) -> Result<PaymentLookup> {
        Ok(match self.payment_store.get(id).await? {
            None => PaymentLookup::Absent,
            Some(payment) => match payment.merged_into {
                Some(target) if payment.status == PaymentStatus::Merged => {
                    PaymentLookup::MergedInto(target)
                }
                _ => PaymentLookup::Found(payment),
            },
        })
    }

    /// Follows merge redirects to the record that currently holds the funds.
    pub async fn resolve_payment(&self, id: &PaymentId) -> Result<Option<(PaymentId, Payment)>> {
        let mut current = *id;
        let mut visited = vec![current];
        loop {
            match self.get_payment(&current).await? {
                PaymentLookup::Absent => return Ok(None),
                PaymentLookup::Found(payment) => return Ok(Some((current, payment))),
                PaymentLookup::MergedInto(target) => {
                    if visited.contains(&target) {
                        return Err(LedgerError::Internal(
                            format!("merge cycle through payment {target}").into(),
                        ));
                    }
                    visited.push(target);
                    current = target;
                }
            }
        }
    }

    pub async fn payments(&self) -> Result<Vec<(PaymentId, Payment)>> {
        let mut payments = self.payment_store.get_all().await?;
        payments.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(payments)
    }

    pub async fn events(&self, id: Option<&PaymentId>) -> Result<Vec<PaymentEvent>> {
        self.payment_store.events(id).await
    }

    pub async fn balance_of(&self, account: &AccountId) -> Result<u64> {
        self.token_ledger.balance_of(account).await
    }

    pub async fn balances(&self) -> Result<Vec<(AccountId, u64)>> {
        let mut balances = self.token_ledger.balances().await?;
        balances.sort();
        Ok(balances)
    }

    /// Sum of the escrow attributable to every active payment.
    pub async fn escrow_liability(&self) -> Result<u64> {
        let payments = self.payment_store.get_all().await?;
        Ok(payments.iter().map(|(_, p)| p.escrowed_amount()).sum())
    }

    async fn load(&self, id: &PaymentId) -> Result<Payment> {
        self.payment_store.get(id).await?.ok_or_else(|| {
            LedgerError::status_mismatch(*id, PaymentStatus::Nonexistent, "active")
        })
    }

    /// Moves tokens, then persists records and events in one commit.
    ///
    /// A shared settlement store takes both in a single atomic write. Otherwise,
    /// when the commit fails the transfers are reversed before the error is
    /// returned.
    async fn settle(&self, transitions: Vec<Transition>) -> Result<Vec<PaymentEvent>> {
        let mut transfers: Vec<Transfer> = Vec::new();
        let mut changeset = Changeset::default();
        for transition in transitions {
            changeset.writes.push(transition.write());
            transfers.extend(transition.transfers);
            changeset.events.extend(transition.events);
        }
        if changeset.events.is_empty() && transfers.is_empty() {
            return Ok(Vec::new());
        }

        for transfer in &transfers {
            debug!(
                "transfer {} from {} to {}",
                transfer.amount, transfer.from, transfer.to
            );
        }
        let events = changeset.events.clone();
        if let Some(store) = &self.settlement {
            store.commit_with_transfers(changeset, &transfers).await?;
            self.log_events(&events);
            return Ok(events);
        }

        self.token_ledger.transfer_all(&transfers).await?;
        if let Err(e) = self.payment_store.commit(changeset).await {
            error!("commit failed, reversing {} transfers: {}", transfers.len(), e);
            let undo: Vec<Transfer> = transfers.iter().rev().map(Transfer::reversed).collect();
            if let Err(undo_error) = self.token_ledger.transfer_all(&undo).await {
                error!("failed to reverse transfers: {}", undo_error);
            }
            return Err(e);
        }
        self.log_events(&events);
        Ok(events)
    }

    fn log_events(&self, events: &[PaymentEvent]) {
        for event in events {
            info!(
                "{:?} payment={} subsidized={} confirmed={}",
                event.kind,
                event.payment_id,
                event.is_subsidized(),
                event.after.confirmed_amount
            );
        }
    }
}
