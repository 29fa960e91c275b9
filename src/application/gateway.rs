use crate::application::ledger::LedgerService;
use crate::application::state_machine::MakeRequest;
use crate::domain::event::PaymentEvent;
use crate::domain::payment::{AccountId, PaymentId};
use crate::error::{LedgerError, Result};
use async_trait::async_trait;
use log::warn;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// A mutating ledger operation as submitted by a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Make {
        id: PaymentId,
        request: MakeRequest,
    },
    Update {
        id: PaymentId,
        payer_amount: u64,
        sponsor_amount: u64,
    },
    Confirm {
        id: PaymentId,
        amount: u64,
    },
    ConfirmBatch {
        items: Vec<(PaymentId, u64)>,
    },
    Refund {
        id: PaymentId,
        amount: u64,
    },
    Revoke {
        id: PaymentId,
    },
    Reverse {
        id: PaymentId,
    },
    UpdateLazyAndConfirm {
        id: PaymentId,
        payer_amount: u64,
        sponsor_amount: u64,
        confirmation_amount: u64,
    },
    Merge {
        target: PaymentId,
        sources: Vec<PaymentId>,
    },
    Reset {
        id: PaymentId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Make { .. } => "make",
            Self::Update { .. } => "update",
            Self::Confirm { .. } => "confirm",
            Self::ConfirmBatch { .. } => "confirm_batch",
            Self::Refund { .. } => "refund",
            Self::Revoke { .. } => "revoke",
            Self::Reverse { .. } => "reverse",
            Self::UpdateLazyAndConfirm { .. } => "update_lazy_and_confirm",
            Self::Merge { .. } => "merge",
            Self::Reset { .. } => "reset",
        }
    }
}

/// Entry point for mutating operations.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn execute(&self, caller: &AccountId, operation: Operation) -> Result<Vec<PaymentEvent>>;
}

#[async_trait]
impl Gateway for LedgerService {
    async fn execute(&self, _caller: &AccountId, operation: Operation) -> Result<Vec<PaymentEvent>> {
        match operation {
            Operation::Make { id, request } => self.make(id, request).await,
            Operation::Update {
                id,
                payer_amount,
                sponsor_amount,
            } => self.update(id, payer_amount, sponsor_amount).await,
            Operation::Confirm { id, amount } => self.confirm(id, amount).await,
            Operation::ConfirmBatch { items } => self.confirm_batch(&items).await,
            Operation::Refund { id, amount } => self.refund(id, amount).await,
            Operation::Revoke { id } => self.revoke(id).await,
            Operation::Reverse { id } => self.reverse(id).await,
            Operation::UpdateLazyAndConfirm {
                id,
                payer_amount,
                sponsor_amount,
                confirmation_amount,
            } => {
                self.update_lazy_and_confirm(id, payer_amount, sponsor_amount, confirmation_amount)
                    .await
            }
            Operation::Merge { target, sources } => self.merge_payments(target, &sources).await,
            Operation::Reset { id } => self.reset(id).await,
        }
    }
}

/// Decides whether a caller may run an operation.
pub trait Authorizer: Send + Sync {
    fn is_allowed(&self, caller: &AccountId, operation: &Operation) -> bool;
}

/// Grants every operation to a fixed set of processors.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    processors: HashSet<AccountId>,
}

impl AllowList {
    pub fn new(processors: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            processors: processors.into_iter().collect(),
        }
    }
}

impl Authorizer for AllowList {
    fn is_allowed(&self, caller: &AccountId, _operation: &Operation) -> bool {
        self.processors.contains(caller)
    }
}

/// Wraps a gateway with caller authorization and an emergency pause switch.
///
/// Both checks run before the wrapped gateway reads any state.
pub struct GuardedGateway<G, A = AllowList> {
    inner: G,
    authorizer: A,
    paused: AtomicBool,
}

impl<G: Gateway, A: Authorizer> GuardedGateway<G, A> {
    pub fn new(inner: G, authorizer: A) -> Self {
        Self {
            inner,
            authorizer,
            paused: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<G: Gateway, A: Authorizer> Gateway for GuardedGateway<G, A> {
    async fn execute(&self, caller: &AccountId, operation: Operation) -> Result<Vec<PaymentEvent>> {
        if !self.authorizer.is_allowed(caller, &operation) {
            warn!("rejected {} from unauthorized caller {}", operation.name(), caller);
            return Err(LedgerError::Unauthorized {
                caller: caller.clone(),
                operation: operation.name(),
            });
        }
        if self.is_paused() {
            return Err(LedgerError::Paused);
        }
        self.inner.execute(caller, operation).await
    }
}
