use crate::domain::payment::{AccountId, Payment, PaymentId};
use serde::{Deserialize, Serialize};

/// Version written by [`crate::domain::codec::encode`].
pub const CURRENT_EVENT_VERSION: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PaymentMade,
    PaymentUpdated,
    PaymentConfirmedAmountChanged,
    PaymentRefunded,
    PaymentRevoked,
    PaymentReversed,
    PaymentMerged,
    PaymentReset,
}

impl EventKind {
    pub fn code(self) -> u8 {
        match self {
            Self::PaymentMade => 1,
            Self::PaymentUpdated => 2,
            Self::PaymentConfirmedAmountChanged => 3,
            Self::PaymentRefunded => 4,
            Self::PaymentRevoked => 5,
            Self::PaymentReversed => 6,
            Self::PaymentMerged => 7,
            Self::PaymentReset => 8,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::PaymentMade),
            2 => Some(Self::PaymentUpdated),
            3 => Some(Self::PaymentConfirmedAmountChanged),
            4 => Some(Self::PaymentRefunded),
            5 => Some(Self::PaymentRevoked),
            6 => Some(Self::PaymentReversed),
            7 => Some(Self::PaymentMerged),
            8 => Some(Self::PaymentReset),
            _ => None,
        }
    }
}

/// Stored amounts of a payment at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AmountSnapshot {
    pub payer_amount: u64,
    pub sponsor_amount: u64,
    pub confirmed_amount: u64,
}

/// Append-only record describing the state delta of one payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub version: u8,
    pub kind: EventKind,
    pub payment_id: PaymentId,
    pub payer: AccountId,
    pub sponsor: Option<AccountId>,
    pub before: AmountSnapshot,
    pub after: AmountSnapshot,
    /// Cumulative refunded amount after the operation.
    pub refunded_amount: u64,
    pub merge_target: Option<PaymentId>,
}

impl PaymentEvent {
    /// Event for a transition between two states of the same payment.
    ///
    /// The sponsor is taken from either side so an event that clears the
    /// sponsor still reports the payment as subsidized.
    pub fn between(
        kind: EventKind,
        payment_id: PaymentId,
        before: Option<&Payment>,
        after: &Payment,
    ) -> Self {
        let sponsor = before
            .and_then(|p| p.sponsor.clone())
            .or_else(|| after.sponsor.clone());
        Self {
            version: CURRENT_EVENT_VERSION,
            kind,
            payment_id,
            payer: after.payer.clone(),
            sponsor,
            before: before.map(Payment::snapshot).unwrap_or_default(),
            after: after.snapshot(),
            refunded_amount: after.refunded_amount,
            merge_target: None,
        }
    }

    pub fn with_merge_target(mut self, target: PaymentId) -> Self {
        self.merge_target = Some(target);
        self
    }

    pub fn is_subsidized(&self) -> bool {
        self.sponsor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_distinct() {
        let kinds = [
            EventKind::PaymentMade,
            EventKind::PaymentUpdated,
            EventKind::PaymentConfirmedAmountChanged,
            EventKind::PaymentRefunded,
            EventKind::PaymentRevoked,
            EventKind::PaymentReversed,
            EventKind::PaymentMerged,
            EventKind::PaymentReset,
        ];
        for kind in kinds {
            assert_eq!(EventKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(EventKind::from_code(0), None);
    }

    #[test]
    fn test_between_keeps_cleared_sponsor() {
        let id: PaymentId = "P1".parse().unwrap();
        let before = Payment::active("alice".into(), Some("bank".into()), 30, 70, 0);
        let mut after = before.clone();
        after.payer_amount = 0;
        after.sponsor_amount = 0;
        after.sponsor = None;

        let event = PaymentEvent::between(EventKind::PaymentRefunded, id, Some(&before), &after);
        assert!(event.is_subsidized());
        assert_eq!(event.before.sponsor_amount, 70);
        assert_eq!(event.after.sponsor_amount, 0);
        assert_eq!(event.version, CURRENT_EVENT_VERSION);
    }
}
