//! Packed binary encoding of [`PaymentEvent`].
//!
//! Wire shape: one version byte, then the fields listed in that version's
//! layout, in order. Amounts are 8 byte big-endian, identifiers 32 bytes and
//! account ids a length byte followed by UTF-8. Optional fields are present
//! only when the matching flag bit is set, so the flag byte always comes
//! before them.

use crate::domain::event::{AmountSnapshot, CURRENT_EVENT_VERSION, EventKind, PaymentEvent};
use crate::domain::payment::{AccountId, PaymentId};
use crate::error::{LedgerError, Result};

pub const FLAG_SUBSIDIZED: u8 = 0b0000_0001;
pub const FLAG_MERGE_TARGET: u8 = 0b0000_0010;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Flags,
    Kind,
    PaymentId,
    Payer,
    Sponsor,
    PayerBefore,
    PayerAfter,
    SponsorBefore,
    SponsorAfter,
    ConfirmedBefore,
    ConfirmedAfter,
    RefundedAmount,
    MergeTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Always,
    /// Present only when the given flag bit is set.
    When(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub field: Field,
    pub presence: Presence,
}

const fn always(field: Field) -> FieldSpec {
    FieldSpec {
        field,
        presence: Presence::Always,
    }
}

const fn when(flag: u8, field: Field) -> FieldSpec {
    FieldSpec {
        field,
        presence: Presence::When(flag),
    }
}

const LAYOUT_V1: &[FieldSpec] = &[
    always(Field::Flags),
    always(Field::Kind),
    always(Field::PaymentId),
    always(Field::Payer),
    when(FLAG_SUBSIDIZED, Field::Sponsor),
    always(Field::PayerBefore),
    always(Field::PayerAfter),
    when(FLAG_SUBSIDIZED, Field::SponsorBefore),
    when(FLAG_SUBSIDIZED, Field::SponsorAfter),
    always(Field::ConfirmedBefore),
    always(Field::ConfirmedAfter),
];

// v2 appends the refund counter and the merge pointer
const LAYOUT_V2: &[FieldSpec] = &[
    always(Field::Flags),
    always(Field::Kind),
    always(Field::PaymentId),
    always(Field::Payer),
    when(FLAG_SUBSIDIZED, Field::Sponsor),
    always(Field::PayerBefore),
    always(Field::PayerAfter),
    when(FLAG_SUBSIDIZED, Field::SponsorBefore),
    when(FLAG_SUBSIDIZED, Field::SponsorAfter),
    always(Field::ConfirmedBefore),
    always(Field::ConfirmedAfter),
    always(Field::RefundedAmount),
    when(FLAG_MERGE_TARGET, Field::MergeTarget),
];

/// Field layout table, indexed by version.
pub fn layout(version: u8) -> Option<&'static [FieldSpec]> {
    match version {
        1 => Some(LAYOUT_V1),
        2 => Some(LAYOUT_V2),
        _ => None,
    }
}

fn flags_of(event: &PaymentEvent) -> u8 {
    let mut flags = 0;
    if event.is_subsidized() {
        flags |= FLAG_SUBSIDIZED;
    }
    if event.merge_target.is_some() {
        flags |= FLAG_MERGE_TARGET;
    }
    flags
}

/// Flag bits that gate at least one field of the layout.
fn defined_flags(layout: &[FieldSpec]) -> u8 {
    layout.iter().fold(0, |bits, spec| match spec.presence {
        Presence::Always => bits,
        Presence::When(bit) => bits | bit,
    })
}

fn is_present(presence: Presence, flags: u8) -> bool {
    match presence {
        Presence::Always => true,
        Presence::When(bit) => flags & bit != 0,
    }
}

/// Encodes with the current version.
pub fn encode(event: &PaymentEvent) -> Result<Vec<u8>> {
    encode_as(event, CURRENT_EVENT_VERSION)
}

/// Encodes with an explicit layout version.
///
/// Fails when the event carries data the older layout cannot represent.
pub fn encode_as(event: &PaymentEvent, version: u8) -> Result<Vec<u8>> {
    let layout = layout(version)
        .ok_or_else(|| LedgerError::Codec(format!("unknown event version {version}")))?;
    let flags = flags_of(event);
    let known = layout.iter().any(|spec| spec.field == Field::MergeTarget);
    if event.merge_target.is_some() && !known {
        return Err(LedgerError::Codec(format!(
            "event version {version} cannot carry a merge target"
        )));
    }

    let mut out = Vec::with_capacity(128);
    out.push(version);
    for spec in layout {
        if !is_present(spec.presence, flags) {
            continue;
        }
        match spec.field {
            Field::Flags => out.push(flags),
            Field::Kind => out.push(event.kind.code()),
            Field::PaymentId => out.extend_from_slice(event.payment_id.as_bytes()),
            Field::Payer => put_account(&mut out, &event.payer)?,
            Field::Sponsor => {
                if let Some(sponsor) = &event.sponsor {
                    put_account(&mut out, sponsor)?;
                }
            }
            Field::PayerBefore => put_u64(&mut out, event.before.payer_amount),
            Field::PayerAfter => put_u64(&mut out, event.after.payer_amount),
            Field::SponsorBefore => put_u64(&mut out, event.before.sponsor_amount),
            Field::SponsorAfter => put_u64(&mut out, event.after.sponsor_amount),
            Field::ConfirmedBefore => put_u64(&mut out, event.before.confirmed_amount),
            Field::ConfirmedAfter => put_u64(&mut out, event.after.confirmed_amount),
            Field::RefundedAmount => put_u64(&mut out, event.refunded_amount),
            Field::MergeTarget => {
                if let Some(target) = &event.merge_target {
                    out.extend_from_slice(target.as_bytes());
                }
            }
        }
    }
    Ok(out)
}

pub fn decode(bytes: &[u8]) -> Result<PaymentEvent> {
    let mut reader = Reader { bytes, pos: 0 };
    let version = reader.u8()?;
    let layout = layout(version)
        .ok_or_else(|| LedgerError::Codec(format!("unknown event version {version}")))?;

    let mut flags = 0u8;
    let mut kind = None;
    let mut payment_id = None;
    let mut payer = None;
    let mut sponsor = None;
    let mut before = AmountSnapshot::default();
    let mut after = AmountSnapshot::default();
    let mut refunded_amount = 0;
    let mut merge_target = None;

    for spec in layout {
        if !is_present(spec.presence, flags) {
            continue;
        }
        match spec.field {
            Field::Flags => {
                flags = reader.u8()?;
                let unknown = flags & !defined_flags(layout);
                if unknown != 0 {
                    return Err(LedgerError::Codec(format!(
                        "flag bits {unknown:#010b} are not defined for version {version}"
                    )));
                }
            }
            Field::Kind => {
                let code = reader.u8()?;
                kind = Some(
                    EventKind::from_code(code)
                        .ok_or_else(|| LedgerError::Codec(format!("unknown event kind {code}")))?,
                );
            }
            Field::PaymentId => payment_id = Some(reader.payment_id()?),
            Field::Payer => payer = Some(reader.account()?),
            Field::Sponsor => sponsor = Some(reader.account()?),
            Field::PayerBefore => before.payer_amount = reader.u64()?,
            Field::PayerAfter => after.payer_amount = reader.u64()?,
            Field::SponsorBefore => before.sponsor_amount = reader.u64()?,
            Field::SponsorAfter => after.sponsor_amount = reader.u64()?,
            Field::ConfirmedBefore => before.confirmed_amount = reader.u64()?,
            Field::ConfirmedAfter => after.confirmed_amount = reader.u64()?,
            Field::RefundedAmount => refunded_amount = reader.u64()?,
            Field::MergeTarget => merge_target = Some(reader.payment_id()?),
        }
    }
    if reader.pos != bytes.len() {
        return Err(LedgerError::Codec(format!(
            "{} trailing bytes after event",
            bytes.len() - reader.pos
        )));
    }

    let missing = |name: &str| LedgerError::Codec(format!("event is missing {name}"));
    Ok(PaymentEvent {
        version,
        kind: kind.ok_or_else(|| missing("kind"))?,
        payment_id: payment_id.ok_or_else(|| missing("payment id"))?,
        payer: payer.ok_or_else(|| missing("payer"))?,
        sponsor,
        before,
        after,
        refunded_amount,
        merge_target,
    })
}

fn put_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_account(out: &mut Vec<u8>, account: &AccountId) -> Result<()> {
    let raw = account.as_str().as_bytes();
    let len = u8::try_from(raw.len())
        .map_err(|_| LedgerError::Codec(format!("account id {account} is too long")))?;
    out.push(len);
    out.extend_from_slice(raw);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos + len;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| LedgerError::Codec("truncated event".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u64(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    fn payment_id(&mut self) -> Result<PaymentId> {
        let mut raw = [0u8; 32];
        raw.copy_from_slice(self.take(PaymentId::LEN)?);
        Ok(PaymentId::new(raw))
    }

    fn account(&mut self) -> Result<AccountId> {
        let len = self.u8()? as usize;
        let raw = self.take(len)?;
        let text = std::str::from_utf8(raw)
            .map_err(|e| LedgerError::Codec(format!("account id is not UTF-8: {e}")))?;
        Ok(AccountId::new(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::Payment;

    fn refund_event() -> PaymentEvent {
        let id: PaymentId = "P1".parse().unwrap();
        let before = Payment::active("alice".into(), Some("bank".into()), 30, 70, 0);
        let mut after = before.clone();
        after.payer_amount = 15;
        after.sponsor_amount = 35;
        after.refunded_amount = 50;
        PaymentEvent::between(EventKind::PaymentRefunded, id, Some(&before), &after)
    }

    #[test]
    fn test_current_version_round_trip() {
        let event = refund_event();
        let bytes = encode(&event).unwrap();
        assert_eq!(bytes[0], CURRENT_EVENT_VERSION);
        assert_eq!(bytes[1], FLAG_SUBSIDIZED);
        assert_eq!(decode(&bytes).unwrap(), event);
    }

    #[test]
    fn test_unsubsidized_event_omits_sponsor_fields() {
        let id: PaymentId = "P2".parse().unwrap();
        let after = Payment::active("alice".into(), None, 100, 0, 0);
        let event = PaymentEvent::between(EventKind::PaymentMade, id, None, &after);

        let bytes = encode(&event).unwrap();
        // version, flags, kind, id, payer(1 + 5), 4 amounts, refunded
        assert_eq!(bytes.len(), 1 + 1 + 1 + 32 + 6 + 4 * 8 + 8);
        let decoded = decode(&bytes).unwrap();
        assert!(!decoded.is_subsidized());
        assert_eq!(decoded.after.payer_amount, 100);
    }

    #[test]
    fn test_v1_decodes_with_defaults() {
        let mut event = refund_event();
        let bytes = encode_as(&event, 1).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.refunded_amount, 0);
        assert_eq!(decoded.before, event.before);
        assert_eq!(decoded.after, event.after);

        event.merge_target = Some("P9".parse().unwrap());
        assert!(matches!(encode_as(&event, 1), Err(LedgerError::Codec(_))));
    }

    #[test]
    fn test_merge_target_flag() {
        let event = refund_event().with_merge_target("P9".parse().unwrap());
        let bytes = encode(&event).unwrap();
        assert_eq!(bytes[1], FLAG_SUBSIDIZED | FLAG_MERGE_TARGET);
        assert_eq!(decode(&bytes).unwrap().merge_target, event.merge_target);
    }

    #[test]
    fn test_rejects_malformed_input() {
        let bytes = encode(&refund_event()).unwrap();
        assert!(decode(&bytes[..bytes.len() - 1]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(decode(&trailing).is_err());

        let mut unknown = bytes;
        unknown[0] = 99;
        assert!(decode(&unknown).is_err());
    }

    #[test]
    fn test_rejects_undefined_flag_bits() {
        let mut v1 = encode_as(&refund_event(), 1).unwrap();
        v1[1] |= FLAG_MERGE_TARGET;
        assert!(matches!(decode(&v1), Err(LedgerError::Codec(_))));

        let mut v2 = encode(&refund_event()).unwrap();
        v2[1] |= 0b1000_0000;
        assert!(matches!(decode(&v2), Err(LedgerError::Codec(_))));
    }
}
