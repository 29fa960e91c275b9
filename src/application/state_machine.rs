use crate::config::LedgerConfig;
use crate::domain::allocator::{checked_sum, split_confirmation, split_refund, split_unwind};
use crate::domain::event::{EventKind, PaymentEvent};
use crate::domain::payment::{AccountId, Payment, PaymentId, PaymentStatus};
use crate::domain::ports::RecordWrite;
use crate::domain::transfer::Transfer;
use crate::error::{LedgerError, Result};
use log::debug;

/// Parameters of a new payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MakeRequest {
    pub payer: AccountId,
    pub sponsor: Option<AccountId>,
    pub payer_amount: u64,
    pub sponsor_amount: u64,
    pub cashback_rate: u16,
}

/// Outcome of one validated state transition, not yet applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: PaymentId,
    /// New record, `None` when the record is deleted.
    pub after: Option<Payment>,
    pub transfers: Vec<Transfer>,
    pub events: Vec<PaymentEvent>,
}

impl Transition {
    fn new(id: PaymentId, after: Payment) -> Self {
        Self {
            id,
            after: Some(after),
            transfers: Vec::new(),
            events: Vec::new(),
        }
    }

    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: u64) {
        if amount > 0 {
            self.transfers.push(Transfer::new(from, to, amount));
        }
    }

    /// Appends a follow-up transition on the same payment.
    pub fn then(mut self, next: Transition) -> Self {
        self.after = next.after;
        self.transfers.extend(next.transfers);
        self.events.extend(next.events);
        self
    }

    pub fn write(&self) -> RecordWrite {
        match &self.after {
            Some(payment) => RecordWrite::Put(self.id, payment.clone()),
            None => RecordWrite::Delete(self.id),
        }
    }

    /// Record after the transition; only reset leaves nothing behind.
    pub fn payment(&self) -> Option<&Payment> {
        self.after.as_ref()
    }
}

/// Validates lifecycle operations against a record and computes their effect.
///
/// Pure: nothing is read from or written to storage here, and no tokens move.
pub struct PaymentStateMachine<'a> {
    config: &'a LedgerConfig,
}

impl<'a> PaymentStateMachine<'a> {
    pub fn new(config: &'a LedgerConfig) -> Self {
        Self { config }
    }

    fn escrow(&self) -> &AccountId {
        &self.config.escrow_account
    }

    fn cash_out(&self) -> &AccountId {
        &self.config.cash_out_account
    }

    pub fn make(
        &self,
        id: PaymentId,
        current: Option<&Payment>,
        request: MakeRequest,
    ) -> Result<Transition> {
        let revocation_count = match current {
            None => 0,
            Some(existing) if existing.status == PaymentStatus::Revoked => {
                if existing.revocation_count >= self.config.revocation_limit {
                    return Err(LedgerError::RevocationLimitReached {
                        id,
                        limit: self.config.revocation_limit,
                    });
                }
                existing.revocation_count
            }
            Some(existing) => {
                return Err(LedgerError::status_mismatch(
                    id,
                    existing.status,
                    "nonexistent or revoked",
                ));
            }
        };

        if request.cashback_rate > self.config.max_cashback_rate {
            return Err(LedgerError::CashbackRateTooHigh {
                rate: request.cashback_rate,
                max: self.config.max_cashback_rate,
            });
        }
        if checked_sum(request.payer_amount, request.sponsor_amount)? == 0 {
            return Err(LedgerError::InvalidAmounts(
                "payment sum must be positive".to_string(),
            ));
        }
        let parties = std::iter::once(&request.payer).chain(request.sponsor.as_ref());
        for party in parties {
            if self.config.is_settlement_account(party) {
                return Err(LedgerError::InvalidRecord(format!(
                    "settlement account {party} cannot take part in a payment"
                )));
            }
        }

        let mut payment = Payment::active(
            request.payer,
            request.sponsor,
            request.payer_amount,
            request.sponsor_amount,
            request.cashback_rate,
        );
        payment.revocation_count = revocation_count;
        payment.check_invariants()?;

        let mut transition = Transition::new(id, payment.clone());
        transition.transfer(&payment.payer, self.escrow(), payment.payer_amount);
        if let Some(sponsor) = &payment.sponsor {
            transition.transfer(sponsor, self.escrow(), payment.sponsor_amount);
        }
        transition.events.push(PaymentEvent::between(
            EventKind::PaymentMade,
            id,
            None,
            &payment,
        ));
        Ok(transition)
    }

    pub fn update(
        &self,
        id: PaymentId,
        current: &Payment,
        payer_amount: u64,
        sponsor_amount: u64,
    ) -> Result<Transition> {
        self.apply_update(id, current, payer_amount, sponsor_amount)
            .map(|(transition, _)| transition)
    }

    /// Builds the update transition and hands back the updated record.
    fn apply_update(
        &self,
        id: PaymentId,
        current: &Payment,
        payer_amount: u64,
        sponsor_amount: u64,
    ) -> Result<(Transition, Payment)> {
        current.require_status(id, PaymentStatus::Active, "active")?;
        if current.sponsor.is_none() && sponsor_amount > 0 {
            return Err(LedgerError::InvalidAmounts(format!(
                "payment {id} has no sponsor to cover {sponsor_amount}"
            )));
        }
        let new_sum = checked_sum(payer_amount, sponsor_amount)?;
        if new_sum == 0 {
            return Err(LedgerError::InvalidAmounts(
                "payment sum must be positive".to_string(),
            ));
        }

        let mut after = current.clone();
        after.payer_amount = payer_amount;
        after.sponsor_amount = sponsor_amount;
        if sponsor_amount == 0 {
            after.sponsor = None;
        }
        // confirmed funds above the new total are swept back from cash-out
        let excess = current.confirmed_amount.saturating_sub(new_sum);
        after.confirmed_amount = current.confirmed_amount - excess;
        after.check_invariants()?;

        let mut transition = Transition::new(id, after.clone());
        transition.transfer(self.cash_out(), self.escrow(), excess);
        transition.transfer(
            &current.payer,
            self.escrow(),
            payer_amount.saturating_sub(current.payer_amount),
        );
        if let Some(sponsor) = &current.sponsor {
            transition.transfer(
                sponsor,
                self.escrow(),
                sponsor_amount.saturating_sub(current.sponsor_amount),
            );
        }
        transition.transfer(
            self.escrow(),
            &current.payer,
            current.payer_amount.saturating_sub(payer_amount),
        );
        if let Some(sponsor) = &current.sponsor {
            transition.transfer(
                self.escrow(),
                sponsor,
                current.sponsor_amount.saturating_sub(sponsor_amount),
            );
        }

        transition.events.push(PaymentEvent::between(
            EventKind::PaymentUpdated,
            id,
            Some(current),
            &after,
        ));
        if excess > 0 {
            transition.events.push(PaymentEvent::between(
                EventKind::PaymentConfirmedAmountChanged,
                id,
                Some(current),
                &after,
            ));
        }
        Ok((transition, after))
    }

    /// Sweeps `amount` from escrow to the cash-out account. Zero is a no-op.
    pub fn confirm(&self, id: PaymentId, current: &Payment, amount: u64) -> Result<Transition> {
        current.require_status(id, PaymentStatus::Active, "active")?;
        let unconfirmed = current.unconfirmed_amount();
        if amount > unconfirmed {
            return Err(LedgerError::AmountExceedsUnconfirmed {
                id,
                requested: amount,
                available: unconfirmed,
            });
        }
        if amount == 0 {
            return Ok(Transition::new(id, current.clone()));
        }

        let split = split_confirmation(current.sponsor_amount, current.sum_amount(), amount);
        debug!(
            "payment {id}: confirming {amount} (payer {}, sponsor {})",
            split.payer, split.sponsor
        );

        let mut after = current.clone();
        after.confirmed_amount += amount;

        let mut transition = Transition::new(id, after.clone());
        transition.transfer(self.escrow(), self.cash_out(), amount);
        transition.events.push(PaymentEvent::between(
            EventKind::PaymentConfirmedAmountChanged,
            id,
            Some(current),
            &after,
        ));
        Ok(transition)
    }

    pub fn refund(&self, id: PaymentId, current: &Payment, amount: u64) -> Result<Transition> {
        current.require_status(id, PaymentStatus::Active, "active")?;
        if amount == 0 {
            return Err(LedgerError::InvalidAmounts(
                "refund amount must be positive".to_string(),
            ));
        }
        let unconfirmed = current.unconfirmed_amount();
        if amount > unconfirmed {
            return Err(LedgerError::AmountExceedsUnconfirmed {
                id,
                requested: amount,
                available: unconfirmed,
            });
        }

        let split = split_refund(current.sponsor_amount, current.sum_amount(), amount);
        let mut after = current.clone();
        after.payer_amount = current
            .payer_amount
            .checked_sub(split.payer)
            .ok_or(LedgerError::AmountOverflow)?;
        after.sponsor_amount = current
            .sponsor_amount
            .checked_sub(split.sponsor)
            .ok_or(LedgerError::AmountOverflow)?;
        after.refunded_amount = current
            .refunded_amount
            .checked_add(amount)
            .ok_or(LedgerError::AmountOverflow)?;
        if after.sponsor_amount == 0 {
            after.sponsor = None;
        }
        after.check_invariants()?;

        let mut transition = Transition::new(id, after.clone());
        transition.transfer(self.escrow(), &current.payer, split.payer);
        if let Some(sponsor) = &current.sponsor {
            transition.transfer(self.escrow(), sponsor, split.sponsor);
        }
        transition.events.push(PaymentEvent::between(
            EventKind::PaymentRefunded,
            id,
            Some(current),
            &after,
        ));
        Ok(transition)
    }

    /// Full unwind; the identifier can be made again afterwards.
    pub fn revoke(&self, id: PaymentId, current: &Payment) -> Result<Transition> {
        self.unwind(id, current, PaymentStatus::Revoked, EventKind::PaymentRevoked)
    }

    /// Full unwind; the identifier is retired for good.
    pub fn reverse(&self, id: PaymentId, current: &Payment) -> Result<Transition> {
        self.unwind(id, current, PaymentStatus::Reversed, EventKind::PaymentReversed)
    }

    fn unwind(
        &self,
        id: PaymentId,
        current: &Payment,
        status: PaymentStatus,
        kind: EventKind,
    ) -> Result<Transition> {
        current.require_status(id, PaymentStatus::Active, "active")?;
        let unwind = split_unwind(
            current.payer_amount,
            current.sponsor_amount,
            current.confirmed_amount,
        );

        let mut after = current.clone();
        after.status = status;
        after.sponsor = None;
        after.payer_amount = 0;
        after.sponsor_amount = 0;
        after.confirmed_amount = 0;
        after.refunded_amount = 0;
        if status == PaymentStatus::Revoked {
            after.revocation_count = current.revocation_count.saturating_add(1);
        }

        let mut transition = Transition::new(id, after.clone());
        transition.transfer(self.cash_out(), &current.payer, unwind.from_cash_out.payer);
        transition.transfer(self.escrow(), &current.payer, unwind.from_escrow.payer);
        if let Some(sponsor) = &current.sponsor {
            transition.transfer(self.cash_out(), sponsor, unwind.from_cash_out.sponsor);
            transition.transfer(self.escrow(), sponsor, unwind.from_escrow.sponsor);
        }
        transition
            .events
            .push(PaymentEvent::between(kind, id, Some(current), &after));
        Ok(transition)
    }

    /// Update (skipped when the amounts already match) followed by confirm.
    pub fn update_lazy_and_confirm(
        &self,
        id: PaymentId,
        current: &Payment,
        payer_amount: u64,
        sponsor_amount: u64,
        confirmation_amount: u64,
    ) -> Result<Transition> {
        current.require_status(id, PaymentStatus::Active, "active")?;
        if current.payer_amount == payer_amount && current.sponsor_amount == sponsor_amount {
            return self.confirm(id, current, confirmation_amount);
        }
        let (updated, payment) = self.apply_update(id, current, payer_amount, sponsor_amount)?;
        let confirmed = self.confirm(id, &payment, confirmation_amount)?;
        Ok(updated.then(confirmed))
    }

    /// Forgets a revoked payment, clearing its revocation counter.
    pub fn reset(&self, id: PaymentId, current: &Payment) -> Result<Transition> {
        current.require_status(id, PaymentStatus::Revoked, "revoked")?;
        let event = PaymentEvent::between(EventKind::PaymentReset, id, Some(current), current);
        Ok(Transition {
            id,
            after: None,
            transfers: Vec::new(),
            events: vec![event],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(label: &str) -> PaymentId {
        label.parse().unwrap()
    }

    fn request(payer_amount: u64, sponsor_amount: u64) -> MakeRequest {
        MakeRequest {
            payer: "alice".into(),
            sponsor: (sponsor_amount > 0).then(|| "bank".into()),
            payer_amount,
            sponsor_amount,
            cashback_rate: 0,
        }
    }

    fn made(config: &LedgerConfig, payer_amount: u64, sponsor_amount: u64) -> Payment {
        PaymentStateMachine::new(config)
            .make(id("P1"), None, request(payer_amount, sponsor_amount))
            .unwrap()
            .after
            .unwrap()
    }

    fn escrow_delta(config: &LedgerConfig, transfers: &[Transfer]) -> i128 {
        transfers
            .iter()
            .map(|t| {
                let amount = t.amount as i128;
                match (t.to == config.escrow_account, t.from == config.escrow_account) {
                    (true, false) => amount,
                    (false, true) => -amount,
                    _ => 0,
                }
            })
            .sum()
    }

    #[test]
    fn test_make_pulls_both_parties_into_escrow() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let transition = sm.make(id("P1"), None, request(30, 70)).unwrap();

        assert_eq!(transition.transfers.len(), 2);
        assert_eq!(escrow_delta(&config, &transition.transfers), 100);
        assert_eq!(transition.events[0].kind, EventKind::PaymentMade);
        assert!(transition.events[0].is_subsidized());
    }

    #[test]
    fn test_make_rejects_zero_sum_and_orphan_sponsor_amount() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        assert!(matches!(
            sm.make(id("P1"), None, request(0, 0)),
            Err(LedgerError::InvalidAmounts(_))
        ));

        let mut orphan = request(10, 0);
        orphan.sponsor_amount = 5;
        assert!(matches!(
            sm.make(id("P1"), None, orphan),
            Err(LedgerError::InvalidAmounts(_))
        ));
    }

    #[test]
    fn test_make_rejects_existing_and_terminal_records() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let mut existing = made(&config, 10, 0);
        assert!(matches!(
            sm.make(id("P1"), Some(&existing), request(10, 0)),
            Err(LedgerError::StatusMismatch { .. })
        ));
        existing.status = PaymentStatus::Reversed;
        assert!(matches!(
            sm.make(id("P1"), Some(&existing), request(10, 0)),
            Err(LedgerError::StatusMismatch {
                actual: PaymentStatus::Reversed,
                ..
            })
        ));
    }

    #[test]
    fn test_make_honours_cashback_bound_and_revocation_limit() {
        let config = LedgerConfig {
            revocation_limit: 1,
            ..LedgerConfig::default()
        };
        let sm = PaymentStateMachine::new(&config);
        let mut rich = request(10, 0);
        rich.cashback_rate = 251;
        assert!(matches!(
            sm.make(id("P1"), None, rich),
            Err(LedgerError::CashbackRateTooHigh { rate: 251, max: 250 })
        ));

        let payment = made(&config, 10, 0);
        let revoked = sm.revoke(id("P1"), &payment).unwrap().after.unwrap();
        assert_eq!(revoked.revocation_count, 1);
        assert!(matches!(
            sm.make(id("P1"), Some(&revoked), request(10, 0)),
            Err(LedgerError::RevocationLimitReached { limit: 1, .. })
        ));
    }

    #[test]
    fn test_update_caps_confirmed_amount_and_sweeps_back() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let mut payment = made(&config, 100, 0);
        payment.confirmed_amount = 80;

        let transition = sm.update(id("P1"), &payment, 50, 0).unwrap();
        let after = transition.payment().unwrap();
        assert_eq!(after.confirmed_amount, 50);
        assert_eq!(after.unconfirmed_amount(), 0);
        assert_eq!(
            transition.transfers[0],
            Transfer::new(&config.cash_out_account, &config.escrow_account, 30)
        );
        // escrow held 20, gets 30 back from cash-out, pays 50 to the payer
        assert_eq!(escrow_delta(&config, &transition.transfers), -20);
        let kinds: Vec<_> = transition.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PaymentUpdated,
                EventKind::PaymentConfirmedAmountChanged
            ]
        );
    }

    #[test]
    fn test_update_signed_deltas_per_party() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 30, 70);

        let transition = sm.update(id("P1"), &payment, 40, 50).unwrap();
        assert_eq!(
            transition.transfers,
            vec![
                Transfer::new(&"alice".into(), &config.escrow_account, 10),
                Transfer::new(&config.escrow_account, &"bank".into(), 20),
            ]
        );
        assert_eq!(escrow_delta(&config, &transition.transfers), -10);
    }

    #[test]
    fn test_update_rejects_sponsor_amount_without_sponsor() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 30, 0);
        assert!(matches!(
            sm.update(id("P1"), &payment, 30, 10),
            Err(LedgerError::InvalidAmounts(_))
        ));
    }

    #[test]
    fn test_confirm_bounds() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 100, 0);

        assert!(matches!(
            sm.confirm(id("P1"), &payment, 101),
            Err(LedgerError::AmountExceedsUnconfirmed {
                requested: 101,
                available: 100,
                ..
            })
        ));
        let noop = sm.confirm(id("P1"), &payment, 0).unwrap();
        assert!(noop.transfers.is_empty() && noop.events.is_empty());

        let transition = sm.confirm(id("P1"), &payment, 40).unwrap();
        assert_eq!(transition.payment().unwrap().confirmed_amount, 40);
        assert_eq!(escrow_delta(&config, &transition.transfers), -40);
    }

    #[test]
    fn test_refund_splits_between_parties() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 30, 70);

        let transition = sm.refund(id("P1"), &payment, 50).unwrap();
        let after = transition.payment().unwrap();
        assert_eq!(after.payer_amount, 15);
        assert_eq!(after.sponsor_amount, 35);
        assert_eq!(after.refunded_amount, 50);
        assert_eq!(
            transition.transfers,
            vec![
                Transfer::new(&config.escrow_account, &"alice".into(), 15),
                Transfer::new(&config.escrow_account, &"bank".into(), 35),
            ]
        );
    }

    #[test]
    fn test_refund_cannot_touch_confirmed_funds() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let mut payment = made(&config, 100, 0);
        payment.confirmed_amount = 40;
        assert!(matches!(
            sm.refund(id("P1"), &payment, 61),
            Err(LedgerError::AmountExceedsUnconfirmed { available: 60, .. })
        ));
        assert!(matches!(
            sm.refund(id("P1"), &payment, 0),
            Err(LedgerError::InvalidAmounts(_))
        ));
    }

    #[test]
    fn test_full_refund_drops_sponsor() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 30, 70);
        let after = sm.refund(id("P1"), &payment, 100).unwrap().after.unwrap();
        assert_eq!(after.sum_amount(), 0);
        assert!(after.sponsor.is_none());
    }

    #[test]
    fn test_revoke_and_reverse_unwind_everything() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let mut payment = made(&config, 30, 70);
        payment.confirmed_amount = 40;

        for (transition, status) in [
            (sm.revoke(id("P1"), &payment).unwrap(), PaymentStatus::Revoked),
            (sm.reverse(id("P1"), &payment).unwrap(), PaymentStatus::Reversed),
        ] {
            let after = transition.payment().unwrap();
            assert_eq!(after.status, status);
            assert_eq!(after.sum_amount(), 0);
            assert_eq!(after.sponsor, None);
            assert!(after.check_invariants().is_ok());
            assert_eq!(escrow_delta(&config, &transition.transfers), -60);
            let from_cash_out: u64 = transition
                .transfers
                .iter()
                .filter(|t| t.from == config.cash_out_account)
                .map(|t| t.amount)
                .sum();
            assert_eq!(from_cash_out, 40);
            let to_sponsor: u64 = transition
                .transfers
                .iter()
                .filter(|t| t.to == AccountId::from("bank"))
                .map(|t| t.amount)
                .sum();
            assert_eq!(to_sponsor, 70);
        }
    }

    #[test]
    fn test_update_lazy_skips_identical_amounts() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 100, 0);

        let lazy = sm
            .update_lazy_and_confirm(id("P1"), &payment, 100, 0, 30)
            .unwrap();
        let kinds: Vec<_> = lazy.events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::PaymentConfirmedAmountChanged]);

        let eager = sm
            .update_lazy_and_confirm(id("P1"), &payment, 120, 0, 120)
            .unwrap();
        let kinds: Vec<_> = eager.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PaymentUpdated,
                EventKind::PaymentConfirmedAmountChanged
            ]
        );
        assert_eq!(eager.payment().unwrap().confirmed_amount, 120);
        assert_eq!(escrow_delta(&config, &eager.transfers), -100);
    }

    #[test]
    fn test_reset_requires_revoked() {
        let config = LedgerConfig::default();
        let sm = PaymentStateMachine::new(&config);
        let payment = made(&config, 100, 0);
        assert!(sm.reset(id("P1"), &payment).is_err());

        let revoked = sm.revoke(id("P1"), &payment).unwrap().after.unwrap();
        let reset = sm.reset(id("P1"), &revoked).unwrap();
        assert_eq!(reset.write(), RecordWrite::Delete(id("P1")));
    }
}
