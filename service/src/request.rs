//! Inbound request and outbound response shapes.
//!
//! The request layer performs shape checks only: which fields are present
//! and whether account identifiers parse. Amount sign, balance sufficiency
//! and account existence are decided by the engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cafeledger_common::{AccountId, LedgerError, ParseAccountIdError};
use cafeledger_ledger::{Account, Operation, Transaction};

/// Account identifier as it arrives on the wire: an integer or a numeric
/// string. Both forms normalise to the same [`AccountId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawAccountId {
    Number(i64),
    Text(String),
}

impl RawAccountId {
    /// Normalise to an [`AccountId`].
    pub fn resolve(&self) -> Result<AccountId, RequestError> {
        match self {
            RawAccountId::Number(id) => Ok(AccountId::new(*id)),
            RawAccountId::Text(text) => Ok(text.parse()?),
        }
    }
}

impl From<AccountId> for RawAccountId {
    fn from(id: AccountId) -> Self {
        RawAccountId::Number(id.value())
    }
}

/// What the caller is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Deposit,
    Withdraw,
    Transfer,
    OpenAccount,
    Balance,
    History,
}

/// A request from the request-handling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRequest {
    /// Operation requested.
    pub kind: RequestKind,
    /// Authenticated account (the sender of a transfer).
    pub account_id: RawAccountId,
    /// Receiver of a transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterparty_id: Option<RawAccountId>,
    /// Amount in minor units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<i64>,
}

impl LedgerRequest {
    /// Build a balance-affecting request from an operation.
    pub fn from_operation(operation: Operation) -> Self {
        let (kind, counterparty_id) = match operation {
            Operation::Deposit { .. } => (RequestKind::Deposit, None),
            Operation::Withdraw { .. } => (RequestKind::Withdraw, None),
            Operation::Transfer { receiver_id, .. } => {
                (RequestKind::Transfer, Some(receiver_id.into()))
            }
        };

        Self {
            kind,
            account_id: operation.sender().into(),
            counterparty_id,
            amount: Some(operation.amount()),
        }
    }

    /// Convert into an engine operation, or `None` for account-level requests.
    pub fn operation(&self) -> Result<Option<Operation>, RequestError> {
        let account_id = self.account_id.resolve()?;

        let operation = match self.kind {
            RequestKind::Deposit => Operation::Deposit {
                account_id,
                amount: self.require_amount()?,
            },
            RequestKind::Withdraw => Operation::Withdraw {
                account_id,
                amount: self.require_amount()?,
            },
            RequestKind::Transfer => Operation::Transfer {
                sender_id: account_id,
                receiver_id: self
                    .counterparty_id
                    .as_ref()
                    .ok_or(RequestError::MissingField("counterparty_id"))?
                    .resolve()?,
                amount: self.require_amount()?,
            },
            RequestKind::OpenAccount | RequestKind::Balance | RequestKind::History => {
                return Ok(None)
            }
        };

        Ok(Some(operation))
    }

    fn require_amount(&self) -> Result<i64, RequestError> {
        self.amount.ok_or(RequestError::MissingField("amount"))
    }
}

/// Malformed request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// A field the request kind needs is absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// An account identifier is not an integer.
    #[error(transparent)]
    InvalidAccountId(#[from] ParseAccountIdError),

    /// Payload is not a request at all.
    #[error("Malformed request: {0}")]
    Malformed(String),
}

/// Response returned to the request-handling layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LedgerResponse {
    /// Balance-affecting operation committed.
    Completed { transaction: Transaction },
    /// Account state.
    Account { account: Account },
    /// Account history.
    History { transactions: Vec<Transaction> },
    /// Request refused; nothing changed.
    Rejected {
        code: String,
        http_status: u16,
        message: String,
        retryable: bool,
    },
}

impl LedgerResponse {
    /// Rejection for an engine error.
    pub fn from_error(err: &LedgerError) -> Self {
        LedgerResponse::Rejected {
            code: err.error_code().to_string(),
            http_status: http_status(err),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    /// Rejection for a malformed request.
    pub fn malformed(err: &RequestError) -> Self {
        LedgerResponse::Rejected {
            code: "MALFORMED_REQUEST".to_string(),
            http_status: 400,
            message: err.to_string(),
            retryable: false,
        }
    }

    /// Rejection while the service is not running.
    pub fn unavailable() -> Self {
        LedgerResponse::Rejected {
            code: "SERVICE_UNAVAILABLE".to_string(),
            http_status: 503,
            message: "Ledger service is not accepting requests".to_string(),
            retryable: true,
        }
    }

    /// Check if the request succeeded.
    pub fn is_success(&self) -> bool {
        !matches!(self, LedgerResponse::Rejected { .. })
    }
}

/// HTTP status the request layer should answer with for an engine error.
pub fn http_status(err: &LedgerError) -> u16 {
    match err {
        LedgerError::InvalidAmount { .. } | LedgerError::SameAccountTransfer(_) => 400,
        LedgerError::AccountNotFound(_) => 404,
        LedgerError::AccountAlreadyExists(_) => 409,
        LedgerError::InsufficientBalance { .. } => 422,
        LedgerError::InternalError(_) => 500,
    }
}
