use crate::domain::payment::AccountId;
use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single token movement between two accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: u64,
}

impl Transfer {
    pub fn new(from: &AccountId, to: &AccountId, amount: u64) -> Self {
        Self {
            from: from.clone(),
            to: to.clone(),
            amount,
        }
    }

    /// The movement that undoes this one.
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            amount: self.amount,
        }
    }
}

/// Scratch copy of the balances touched by a batch of transfers.
///
/// Token ledgers load the affected accounts, apply the whole batch here and
/// only write back when every transfer succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceSheet {
    balances: BTreeMap<AccountId, u64>,
}

impl BalanceSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&mut self, account: AccountId, balance: u64) {
        self.balances.insert(account, balance);
    }

    pub fn balance(&self, account: &AccountId) -> u64 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn credit(&mut self, account: &AccountId, amount: u64) -> Result<(), TransferError> {
        let balance = self.balances.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::BalanceOverflow(account.clone()))?;
        Ok(())
    }

    pub fn apply(&mut self, transfer: &Transfer) -> Result<(), TransferError> {
        let available = self.balance(&transfer.from);
        if available < transfer.amount {
            return Err(TransferError::InsufficientBalance {
                account: transfer.from.clone(),
                requested: transfer.amount,
                available,
            });
        }
        self.balances
            .insert(transfer.from.clone(), available - transfer.amount);
        self.credit(&transfer.to, transfer.amount)
    }

    pub fn apply_all(&mut self, transfers: &[Transfer]) -> Result<(), TransferError> {
        transfers.iter().try_for_each(|transfer| self.apply(transfer))
    }

    pub fn into_balances(self) -> impl Iterator<Item = (AccountId, u64)> {
        self.balances.into_iter()
    }
}

/// Accounts a batch reads or writes, without duplicates.
pub fn touched_accounts(transfers: &[Transfer]) -> Vec<AccountId> {
    let mut accounts: Vec<AccountId> = transfers
        .iter()
        .flat_map(|t| [t.from.clone(), t.to.clone()])
        .collect();
    accounts.sort();
    accounts.dedup();
    accounts
}
