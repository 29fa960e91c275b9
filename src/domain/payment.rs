use crate::domain::event::AmountSnapshot;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte payment identifier assigned by the processing backend.
///
/// Parsed either from a `0x`-prefixed 64 digit hex string or from a short
/// ASCII label (up to 32 bytes, zero padded on the right). Labels display as
/// themselves, everything else displays as hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaymentId([u8; 32]);

impl PaymentId {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    fn label(&self) -> Option<&str> {
        let end = self.0.iter().position(|b| *b == 0).unwrap_or(Self::LEN);
        let (text, padding) = self.0.split_at(end);
        if text.is_empty()
            || padding.iter().any(|b| *b != 0)
            || !text.iter().all(|b| b.is_ascii_graphic())
        {
            return None;
        }
        let label = std::str::from_utf8(text).ok()?;
        (!label.starts_with("0x")).then_some(label)
    }
}

impl FromStr for PaymentId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(digits) = s.strip_prefix("0x") {
            let mut bytes = [0u8; 32];
            hex::decode_to_slice(digits, &mut bytes)
                .map_err(|e| LedgerError::InvalidRecord(format!("payment id {s}: {e}")))?;
            return Ok(Self(bytes));
        }
        if s.is_empty() || s.len() > Self::LEN || !s.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(LedgerError::InvalidRecord(format!(
                "payment id {s:?} must be 1..=32 printable ASCII characters or 0x-prefixed hex"
            )));
        }
        let mut bytes = [0u8; 32];
        bytes[..s.len()].copy_from_slice(s.as_bytes());
        Ok(Self(bytes))
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "0x{}", hex::encode(self.0)),
        }
    }
}

impl Serialize for PaymentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PaymentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Token account identifier (payer, sponsor, escrow, cash-out).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Nonexistent,
    Active,
    Merged,
    Revoked,
    Reversed,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nonexistent => "nonexistent",
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Revoked => "revoked",
            Self::Reversed => "reversed",
        };
        f.write_str(name)
    }
}

/// A card payment whose funds sit in escrow until confirmed, refunded or unwound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub status: PaymentStatus,
    /// Party who primarily owes the funds.
    pub payer: AccountId,
    /// Party covering the subsidized portion, if any.
    pub sponsor: Option<AccountId>,
    /// Payer principal: excludes cashback and refunds, includes fees.
    pub payer_amount: u64,
    /// Sponsor principal, zero when unsubsidized.
    pub sponsor_amount: u64,
    /// Cumulative amount swept to the cash-out account.
    pub confirmed_amount: u64,
    /// Cumulative amount refunded to payer and sponsor.
    pub refunded_amount: u64,
    /// Cashback rate in permil, informational only.
    pub cashback_rate: u16,
    pub revocation_count: u8,
    /// Absorbing payment once merged.
    pub merged_into: Option<PaymentId>,
}

impl Payment {
    /// Builds a fresh Active record. Use [`Payment::check_invariants`] to validate it.
    pub fn active(
        payer: AccountId,
        sponsor: Option<AccountId>,
        payer_amount: u64,
        sponsor_amount: u64,
        cashback_rate: u16,
    ) -> Self {
        Self {
            status: PaymentStatus::Active,
            payer,
            sponsor,
            payer_amount,
            sponsor_amount,
            confirmed_amount: 0,
            refunded_amount: 0,
            cashback_rate,
            revocation_count: 0,
            merged_into: None,
        }
    }

    pub fn is_subsidized(&self) -> bool {
        self.sponsor.is_some()
    }

    pub fn sum_amount(&self) -> u64 {
        self.payer_amount.saturating_add(self.sponsor_amount)
    }

    pub fn unconfirmed_amount(&self) -> u64 {
        self.sum_amount().saturating_sub(self.confirmed_amount)
    }

    /// Tokens held in escrow on behalf of this payment.
    pub fn escrowed_amount(&self) -> u64 {
        match self.status {
            PaymentStatus::Active => self.unconfirmed_amount(),
            _ => 0,
        }
    }

    pub fn snapshot(&self) -> AmountSnapshot {
        AmountSnapshot {
            payer_amount: self.payer_amount,
            sponsor_amount: self.sponsor_amount,
            confirmed_amount: self.confirmed_amount,
        }
    }

    pub fn require_status(
        &self,
        id: PaymentId,
        expected: PaymentStatus,
        label: &'static str,
    ) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(LedgerError::status_mismatch(id, self.status, label))
        }
    }

    /// Structural checks every stored record must pass.
    pub fn check_invariants(&self) -> Result<()> {
        let sum = self
            .payer_amount
            .checked_add(self.sponsor_amount)
            .ok_or(LedgerError::AmountOverflow)?;
        if self.confirmed_amount > sum {
            return Err(LedgerError::InvalidAmounts(format!(
                "confirmed amount {} exceeds the payment sum {sum}",
                self.confirmed_amount
            )));
        }
        if self.sponsor.is_none() && self.sponsor_amount != 0 {
            return Err(LedgerError::InvalidAmounts(
                "sponsor amount without a sponsor".to_string(),
            ));
        }
        if self.sponsor.is_some() && self.sponsor_amount == 0 {
            return Err(LedgerError::InvalidAmounts(
                "sponsor without a sponsor amount".to_string(),
            ));
        }
        if self.sponsor.as_ref() == Some(&self.payer) {
            return Err(LedgerError::InvalidAmounts(
                "payer and sponsor must differ".to_string(),
            ));
        }
        if (self.status == PaymentStatus::Merged) != self.merged_into.is_some() {
            return Err(LedgerError::InvalidAmounts(
                "merge target must be set exactly for merged payments".to_string(),
            ));
        }
        if self.status == PaymentStatus::Nonexistent {
            return Err(LedgerError::InvalidAmounts(
                "nonexistent payments are never stored".to_string(),
            ));
        }
        Ok(())
    }
}

/// Result of a payment query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLookup {
    Absent,
    Found(Payment),
    /// The payment was folded into another one; queries continue there.
    MergedInto(PaymentId),
}
