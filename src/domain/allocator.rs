//! Payer/sponsor split arithmetic.
//!
//! Every function here is pure and total over its documented domain. The
//! sponsor's share is rounded down and capped at its principal, so the payer
//! always absorbs the rounding remainder.

use crate::error::{LedgerError, Result};

/// An amount divided between payer and sponsor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Split {
    pub payer: u64,
    pub sponsor: u64,
}

impl Split {
    pub fn total(&self) -> u64 {
        self.payer + self.sponsor
    }
}

/// Divides `refund_amount` proportionally to the sponsor's share of `sum_amount`.
///
/// `sponsor_refund = min(floor(refund * sponsor / sum), sponsor)` and the payer
/// takes the rest. Without a sponsor (`sponsor_amount == 0`) the payer takes all.
/// Callers must ensure `refund_amount <= sum_amount`; the payer's principal is
/// implied as `sum_amount - sponsor_amount`.
pub fn split_refund(sponsor_amount: u64, sum_amount: u64, refund_amount: u64) -> Split {
    if sponsor_amount == 0 || sum_amount == 0 {
        return Split {
            payer: refund_amount,
            sponsor: 0,
        };
    }
    // u128 keeps refund * sponsor exact for any pair of u64 inputs
    let share = (refund_amount as u128 * sponsor_amount as u128) / sum_amount as u128;
    let sponsor = (share as u64).min(sponsor_amount).min(refund_amount);
    Split {
        payer: refund_amount - sponsor,
        sponsor,
    }
}

/// Same proportional rule applied to a confirmation delta.
pub fn split_confirmation(sponsor_amount: u64, sum_amount: u64, confirmation_amount: u64) -> Split {
    split_refund(sponsor_amount, sum_amount, confirmation_amount)
}

/// Attributes the whole of a payment's principal between its confirmed and
/// unconfirmed portions, per party. Used to unwind a payment completely.
pub fn split_unwind(payer_amount: u64, sponsor_amount: u64, confirmed_amount: u64) -> Unwind {
    let sum = payer_amount.saturating_add(sponsor_amount);
    let confirmed = split_confirmation(sponsor_amount, sum, confirmed_amount.min(sum));
    Unwind {
        from_cash_out: confirmed,
        from_escrow: Split {
            payer: payer_amount - confirmed.payer,
            sponsor: sponsor_amount - confirmed.sponsor,
        },
    }
}

/// Where each party's principal comes back from during revoke/reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Unwind {
    pub from_cash_out: Split,
    pub from_escrow: Split,
}

pub fn checked_sum(payer_amount: u64, sponsor_amount: u64) -> Result<u64> {
    payer_amount
        .checked_add(sponsor_amount)
        .ok_or(LedgerError::AmountOverflow)
}
