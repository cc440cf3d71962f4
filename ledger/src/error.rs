//! Ledger error types.

use exchequer_common::AccountKey;
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by ledger stores and the posting engine.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("account {0} already exists")]
    AccountExists(AccountKey),

    #[error("account {0} not found")]
    AccountNotFound(AccountKey),

    #[error("insufficient funds in {key}: balance {available}, debit {requested}")]
    InsufficientFunds {
        key: AccountKey,
        available: Decimal,
        requested: Decimal,
    },

    /// Applying a posting would take a balance past the amount range.
    #[error("balance of {key} would overflow: balance {balance}, change {delta}")]
    BalanceOverflow {
        key: AccountKey,
        balance: Decimal,
        delta: Decimal,
    },

    /// A journal batch or a stored transaction failed the consistency check.
    #[error("inconsistent journal: {0}")]
    Inconsistent(String),

    #[error("timed out waiting for lock on {0}")]
    LockTimeout(AccountKey),

    #[error("ledger deadline exceeded")]
    Timeout,

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be turned back into a domain value.
    #[error("decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Whether the failure is contention or infrastructure rather than a
    /// business rejection.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::LockTimeout(_)
                | LedgerError::Timeout
                | LedgerError::Database(_)
                | LedgerError::TransactionClosed
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Database(err.to_string())
    }
}

/// Result type alias for ledger operations.
pub type LedgerResult<T> = std::result::Result<T, LedgerError>;
