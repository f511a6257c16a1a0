//! Transaction log entry types.

use std::fmt;
use std::str::FromStr;

use cafeledger_common::{AccountId, LedgerError, Result, Timestamp, TransactionId};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Kind of money movement recorded by a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Zero value. Never persisted.
    #[default]
    Invalid,
    /// Credit to a single account.
    Deposit,
    /// Debit from a single account.
    Withdraw,
    /// Debit from a sender, credit to a different receiver.
    Transfer,
}

impl TransactionType {
    /// Column value used by persistent stores.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Invalid => "invalid",
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "transfer" => Ok(TransactionType::Transfer),
            other => Err(LedgerError::internal(format!(
                "unknown transaction type in log: {other:?}"
            ))),
        }
    }
}

/// A single immutable entry in the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID.
    pub id: TransactionId,
    /// Debited account (the account itself for deposits and withdrawals).
    pub sender_id: AccountId,
    /// Credited account (the account itself for deposits and withdrawals).
    pub receiver_id: AccountId,
    /// Amount moved, always positive.
    pub amount: i64,
    /// Kind of movement.
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    /// Server-assigned creation time.
    pub created_at: Timestamp,
}

impl Transaction {
    /// Build a transaction stamped with the current time.
    pub fn new(
        id: TransactionId,
        transaction_type: TransactionType,
        sender_id: AccountId,
        receiver_id: AccountId,
        amount: i64,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            amount,
            transaction_type,
            created_at: Utc::now(),
        }
    }

    /// Signed effect of this transaction on `account`'s balance.
    pub fn effect_on(&self, account: AccountId) -> i64 {
        match self.transaction_type {
            TransactionType::Deposit if self.receiver_id == account => self.amount,
            TransactionType::Withdraw if self.sender_id == account => -self.amount,
            TransactionType::Transfer if self.sender_id == account => -self.amount,
            TransactionType::Transfer if self.receiver_id == account => self.amount,
            _ => 0,
        }
    }

    /// Check if `account` is on either side of this transaction.
    pub fn touches(&self, account: AccountId) -> bool {
        self.sender_id == account || self.receiver_id == account
    }

    /// Reject entries that must never reach the log.
    pub fn ensure_persistable(&self) -> Result<()> {
        if self.transaction_type == TransactionType::Invalid {
            return Err(LedgerError::internal(format!(
                "refusing to append transaction {} with invalid type",
                self.id
            )));
        }

        if self.amount <= 0 {
            return Err(LedgerError::internal(format!(
                "refusing to append transaction {} with non-positive amount {}",
                self.id, self.amount
            )));
        }

        let same_account = self.sender_id == self.receiver_id;
        let shape_ok = match self.transaction_type {
            TransactionType::Transfer => !same_account,
            _ => same_account,
        };
        if !shape_ok {
            return Err(LedgerError::internal(format!(
                "refusing to append {} transaction {} with sender {} and receiver {}",
                self.transaction_type, self.id, self.sender_id, self.receiver_id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: i64) -> AccountId {
        AccountId::new(id)
    }

    #[test]
    fn test_signed_effects() {
        let a = account(1);
        let b = account(2);

        let deposit = Transaction::new(TransactionId::new(), TransactionType::Deposit, a, a, 50);
        assert_eq!(deposit.effect_on(a), 50);
        assert_eq!(deposit.effect_on(b), 0);

        let withdraw = Transaction::new(TransactionId::new(), TransactionType::Withdraw, a, a, 20);
        assert_eq!(withdraw.effect_on(a), -20);

        let transfer = Transaction::new(TransactionId::new(), TransactionType::Transfer, a, b, 30);
        assert_eq!(transfer.effect_on(a), -30);
        assert_eq!(transfer.effect_on(b), 30);
        assert_eq!(transfer.effect_on(account(3)), 0);
    }

    #[test]
    fn test_invalid_type_is_not_persistable() {
        let a = account(1);
        let mut entry = Transaction::new(TransactionId::new(), TransactionType::Deposit, a, a, 10);
        assert!(entry.ensure_persistable().is_ok());

        entry.transaction_type = TransactionType::default();
        assert!(entry.ensure_persistable().is_err());
    }

    #[test]
    fn test_shape_checks() {
        let a = account(1);
        let b = account(2);

        let self_transfer = Transaction::new(TransactionId::new(), TransactionType::Transfer, a, a, 10);
        assert!(self_transfer.ensure_persistable().is_err());

        let split_deposit = Transaction::new(TransactionId::new(), TransactionType::Deposit, a, b, 10);
        assert!(split_deposit.ensure_persistable().is_err());

        let zero = Transaction::new(TransactionId::new(), TransactionType::Withdraw, a, a, 0);
        assert!(zero.ensure_persistable().is_err());
    }

    #[test]
    fn test_type_round_trips_through_column_value() {
        for kind in [
            TransactionType::Deposit,
            TransactionType::Withdraw,
            TransactionType::Transfer,
        ] {
            assert_eq!(kind.as_str().parse::<TransactionType>().unwrap(), kind);
        }
        assert!("invalid".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_serializes_type_field() {
        let a = account(1);
        let entry = Transaction::new(TransactionId::new(), TransactionType::Deposit, a, a, 50);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "deposit");
        assert_eq!(json["sender_id"], 1);
    }
}
