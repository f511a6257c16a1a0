//! Balance-affecting operations accepted by the engine.

use cafeledger_common::{AccountId, LedgerError, Result};
use serde::{Deserialize, Serialize};

use crate::transaction::TransactionType;

/// One balance-affecting request, validated and executed by
/// [`LedgerEngine::execute`](crate::LedgerEngine::execute).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operation {
    /// Credit `account_id`.
    Deposit { account_id: AccountId, amount: i64 },
    /// Debit `account_id`.
    Withdraw { account_id: AccountId, amount: i64 },
    /// Debit `sender_id` and credit `receiver_id`.
    Transfer {
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: i64,
    },
}

impl Operation {
    /// Transaction type recorded for this operation.
    pub fn transaction_type(&self) -> TransactionType {
        match self {
            Operation::Deposit { .. } => TransactionType::Deposit,
            Operation::Withdraw { .. } => TransactionType::Withdraw,
            Operation::Transfer { .. } => TransactionType::Transfer,
        }
    }

    /// Amount requested.
    pub fn amount(&self) -> i64 {
        match *self {
            Operation::Deposit { amount, .. }
            | Operation::Withdraw { amount, .. }
            | Operation::Transfer { amount, .. } => amount,
        }
    }

    /// Account recorded as sender.
    pub fn sender(&self) -> AccountId {
        match *self {
            Operation::Deposit { account_id, .. } | Operation::Withdraw { account_id, .. } => {
                account_id
            }
            Operation::Transfer { sender_id, .. } => sender_id,
        }
    }

    /// Account recorded as receiver.
    pub fn receiver(&self) -> AccountId {
        match *self {
            Operation::Deposit { account_id, .. } | Operation::Withdraw { account_id, .. } => {
                account_id
            }
            Operation::Transfer { receiver_id, .. } => receiver_id,
        }
    }

    /// Account debited by this operation, if any.
    pub fn debited(&self) -> Option<AccountId> {
        match *self {
            Operation::Deposit { .. } => None,
            Operation::Withdraw { account_id, .. } => Some(account_id),
            Operation::Transfer { sender_id, .. } => Some(sender_id),
        }
    }

    /// Account credited by this operation, if any.
    pub fn credited(&self) -> Option<AccountId> {
        match *self {
            Operation::Deposit { account_id, .. } => Some(account_id),
            Operation::Withdraw { .. } => None,
            Operation::Transfer { receiver_id, .. } => Some(receiver_id),
        }
    }

    /// Distinct accounts touched, in ascending id order.
    ///
    /// Row locks are taken in this order so that opposing transfers cannot
    /// deadlock each other.
    pub fn lock_order(&self) -> Vec<AccountId> {
        let mut accounts = vec![self.sender(), self.receiver()];
        accounts.sort_unstable();
        accounts.dedup();
        accounts
    }

    /// Checks that need no stored state.
    pub fn validate(&self) -> Result<()> {
        let amount = self.amount();
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount { amount });
        }

        if let Operation::Transfer {
            sender_id,
            receiver_id,
            ..
        } = *self
        {
            if sender_id == receiver_id {
                return Err(LedgerError::SameAccountTransfer(sender_id));
            }
        }

        Ok(())
    }
}
