use crate::application::state_machine::Transition;
use crate::domain::event::{AmountSnapshot, EventKind, PaymentEvent};
use crate::domain::payment::{AccountId, Payment, PaymentId, PaymentStatus};
use crate::error::{LedgerError, Result};
use std::collections::HashSet;

/// Folds source payments into a target payment.
///
/// Pure bookkeeping: escrowed tokens are reassigned to the target, none move.
/// All participants must be active and share a payer. Sponsored participants
/// must share one sponsor; unsponsored ones may join freely.
pub struct MergeCoordinator;

impl MergeCoordinator {
    pub fn plan(
        target_id: PaymentId,
        target: &Payment,
        sources: &[(PaymentId, Payment)],
    ) -> Result<Vec<Transition>> {
        if sources.is_empty() {
            return Err(LedgerError::MergeRejected(
                "at least one source payment is required".to_string(),
            ));
        }
        target.require_status(target_id, PaymentStatus::Active, "active")?;

        let mut seen = HashSet::from([target_id]);
        for (id, source) in sources {
            if !seen.insert(*id) {
                return Err(LedgerError::MergeRejected(format!(
                    "payment {id} appears more than once"
                )));
            }
            source.require_status(*id, PaymentStatus::Active, "active")?;
            if source.payer != target.payer {
                return Err(LedgerError::MergeRejected(format!(
                    "payment {id} belongs to payer {}, target belongs to {}",
                    source.payer, target.payer
                )));
            }
        }
        let sponsor = common_sponsor(target, sources)?;

        let mut merged = target.clone();
        for (_, source) in sources {
            merged.payer_amount = add(merged.payer_amount, source.payer_amount)?;
            merged.sponsor_amount = add(merged.sponsor_amount, source.sponsor_amount)?;
            merged.confirmed_amount = add(merged.confirmed_amount, source.confirmed_amount)?;
            merged.refunded_amount = add(merged.refunded_amount, source.refunded_amount)?;
        }
        merged.sponsor = sponsor.filter(|_| merged.sponsor_amount > 0);
        merged.check_invariants()?;

        let mut transitions = Vec::with_capacity(sources.len() + 1);
        for (id, source) in sources {
            let mut retired = source.clone();
            retired.status = PaymentStatus::Merged;
            retired.merged_into = Some(target_id);

            let mut event =
                PaymentEvent::between(EventKind::PaymentMerged, *id, Some(source), &retired)
                    .with_merge_target(target_id);
            // nothing stays attributable to the source
            event.after = AmountSnapshot::default();

            transitions.push(Transition {
                id: *id,
                after: Some(retired),
                transfers: Vec::new(),
                events: vec![event],
            });
        }

        let mut events = Vec::new();
        if merged.confirmed_amount != target.confirmed_amount {
            events.push(PaymentEvent::between(
                EventKind::PaymentConfirmedAmountChanged,
                target_id,
                Some(target),
                &merged,
            ));
        }
        transitions.push(Transition {
            id: target_id,
            after: Some(merged),
            transfers: Vec::new(),
            events,
        });
        Ok(transitions)
    }
}

fn common_sponsor(
    target: &Payment,
    sources: &[(PaymentId, Payment)],
) -> Result<Option<AccountId>> {
    let mut sponsor: Option<&AccountId> = target.sponsor.as_ref();
    for (id, source) in sources {
        match (sponsor, source.sponsor.as_ref()) {
            (Some(known), Some(other)) if known != other => {
                return Err(LedgerError::MergeRejected(format!(
                    "payment {id} is sponsored by {other}, expected {known}"
                )));
            }
            (None, Some(other)) => sponsor = Some(other),
            _ => {}
        }
    }
    Ok(sponsor.cloned())
}

fn add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b).ok_or(LedgerError::AmountOverflow)
}
