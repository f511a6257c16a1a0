//! Balance reconstruction from the transaction log.

use std::collections::BTreeMap;

use cafeledger_common::{AccountId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::transaction::Transaction;

/// An account whose stored balance disagrees with its log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDiscrepancy {
    /// Account affected.
    pub account_id: AccountId,
    /// Balance held by the account store.
    pub stored: i64,
    /// Sum of signed effects in the log.
    pub reconstructed: i64,
}

/// Outcome of reconciling accounts against the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Accounts checked.
    pub accounts_checked: usize,
    /// Log rows checked.
    pub transactions_checked: usize,
    /// Accounts whose balance does not match the log.
    pub discrepancies: Vec<BalanceDiscrepancy>,
    /// Accounts with a negative stored balance.
    pub negative_balances: Vec<AccountId>,
    /// Log rows naming an account that does not exist.
    pub orphaned_transactions: Vec<TransactionId>,
}

impl AuditReport {
    /// Check that nothing was found.
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
            && self.negative_balances.is_empty()
            && self.orphaned_transactions.is_empty()
    }
}

/// Recompute every balance from `transactions` and compare with `accounts`.
///
/// Only meaningful on a quiescent ledger: rows committed between reading the
/// accounts and reading the log show up as discrepancies.
pub fn reconcile(accounts: &[Account], transactions: &[Transaction]) -> AuditReport {
    let mut reconstructed: BTreeMap<AccountId, i64> =
        accounts.iter().map(|a| (a.id, 0)).collect();
    let mut orphaned_transactions = Vec::new();

    for transaction in transactions {
        let sides = [transaction.sender_id, transaction.receiver_id];
        if sides.iter().any(|id| !reconstructed.contains_key(id)) {
            orphaned_transactions.push(transaction.id);
            continue;
        }

        if transaction.sender_id == transaction.receiver_id {
            if let Some(sum) = reconstructed.get_mut(&transaction.sender_id) {
                *sum += transaction.effect_on(transaction.sender_id);
            }
        } else {
            for id in sides {
                if let Some(sum) = reconstructed.get_mut(&id) {
                    *sum += transaction.effect_on(id);
                }
            }
        }
    }

    let discrepancies = accounts
        .iter()
        .filter_map(|account| {
            let expected = reconstructed.get(&account.id).copied().unwrap_or(0);
            (expected != account.balance).then(|| BalanceDiscrepancy {
                account_id: account.id,
                stored: account.balance,
                reconstructed: expected,
            })
        })
        .collect();

    let negative_balances = accounts
        .iter()
        .filter(|account| account.balance < 0)
        .map(|account| account.id)
        .collect();

    AuditReport {
        accounts_checked: accounts.len(),
        transactions_checked: transactions.len(),
        discrepancies,
        negative_balances,
        orphaned_transactions,
    }
}
