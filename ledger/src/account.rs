//! Account definitions for ledger.

use cafeledger_common::{AccountId, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A balance-holding ledger account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Balance in the smallest currency unit. Never negative once committed.
    pub balance: i64,
    /// When the account was opened.
    pub created_at: Timestamp,
    /// When the balance last changed.
    pub updated_at: Timestamp,
}

impl Account {
    /// Open a new account with a zero balance.
    pub fn open(id: AccountId) -> Self {
        let now = Utc::now();

        Self {
            id,
            balance: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
