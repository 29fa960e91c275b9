use crate::domain::payment::AccountId;

pub const DEFAULT_ESCROW_ACCOUNT: &str = "escrow";
pub const DEFAULT_CASH_OUT_ACCOUNT: &str = "cash_out";
pub const DEFAULT_PROCESSOR: &str = "processor";
pub const DEFAULT_REVOCATION_LIMIT: u8 = u8::MAX;
/// 25%, expressed in permil.
pub const DEFAULT_MAX_CASHBACK_RATE: u16 = 250;

/// Runtime settings of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Account holding the tokens of every active payment.
    pub escrow_account: AccountId,
    /// Account receiving confirmed funds.
    pub cash_out_account: AccountId,
    /// Number of revocations after which an identifier can no longer be remade.
    pub revocation_limit: u8,
    pub max_cashback_rate: u16,
    /// Callers allowed to drive mutating operations.
    pub processors: Vec<AccountId>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            escrow_account: AccountId::new(DEFAULT_ESCROW_ACCOUNT),
            cash_out_account: AccountId::new(DEFAULT_CASH_OUT_ACCOUNT),
            revocation_limit: DEFAULT_REVOCATION_LIMIT,
            max_cashback_rate: DEFAULT_MAX_CASHBACK_RATE,
            processors: vec![AccountId::new(DEFAULT_PROCESSOR)],
        }
    }
}

impl LedgerConfig {
    pub fn is_settlement_account(&self, account: &AccountId) -> bool {
        *account == self.escrow_account || *account == self.cash_out_account
    }
}
