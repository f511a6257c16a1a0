//! Error types for ledger operations.

use crate::AccountId;
use thiserror::Error;

/// Closed set of failures a ledger operation can end with.
///
/// Every variant except [`LedgerError::InternalError`] is a business-rule
/// failure detected before or during the atomic unit. Whatever the variant,
/// the unit has been rolled back by the time the caller sees it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Amount is zero, negative, or would overflow a balance.
    #[error("Invalid amount: {amount}")]
    InvalidAmount { amount: i64 },

    /// Sender cannot cover the debit.
    #[error("Insufficient balance in account {account_id}: required {required}, available {available}")]
    InsufficientBalance {
        account_id: AccountId,
        required: i64,
        available: i64,
    },

    /// Sender or receiver does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transfer names the same account on both sides.
    #[error("Transfer sender and receiver are the same account: {0}")]
    SameAccountTransfer(AccountId),

    /// Account opening for an id that is already taken.
    #[error("Account already exists: {0}")]
    AccountAlreadyExists(AccountId),

    /// Storage failure, commit failure or elapsed deadline.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LedgerError {
    /// Check if this error is retryable.
    ///
    /// Only infrastructure failures qualify; nothing partial persisted, so
    /// the whole operation may be resubmitted.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::InternalError(_))
    }

    /// Check if this error is a business-rule rejection rather than a fault.
    pub fn is_business_rule(&self) -> bool {
        !self.is_retryable()
    }

    /// Get stable error code for responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LedgerError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::SameAccountTransfer(_) => "SAME_ACCOUNT_TRANSFER",
            LedgerError::AccountAlreadyExists(_) => "ACCOUNT_ALREADY_EXISTS",
            LedgerError::InternalError(_) => "INTERNAL_ERROR",
        }
    }

    /// Shorthand for an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        LedgerError::InternalError(message.into())
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_internal_errors_are_retryable() {
        assert!(LedgerError::internal("connection reset").is_retryable());
        assert!(!LedgerError::InvalidAmount { amount: -5 }.is_retryable());
        assert!(!LedgerError::AccountNotFound(AccountId::new(1)).is_retryable());
        assert!(!LedgerError::InsufficientBalance {
            account_id: AccountId::new(1),
            required: 999,
            available: 20,
        }
        .is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            LedgerError::InvalidAmount { amount: 0 }.error_code(),
            "INVALID_AMOUNT"
        );
        assert_eq!(
            LedgerError::SameAccountTransfer(AccountId::new(3)).error_code(),
            "SAME_ACCOUNT_TRANSFER"
        );
        assert!(LedgerError::AccountAlreadyExists(AccountId::new(3)).is_business_rule());
    }

    #[test]
    fn test_display() {
        let err = LedgerError::InsufficientBalance {
            account_id: AccountId::new(9),
            required: 999,
            available: 20,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient balance in account 9: required 999, available 20"
        );
    }
}
