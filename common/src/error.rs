//! Error taxonomy for Exchequer operations.
//!
//! Every failure surfaced by the offer and settlement engine falls into one of
//! these variants. Internal detail is kept in the variant for logging; clients
//! only ever see [`ExchangeError::client_message`].

use thiserror::Error;

use crate::{AmountError, InvalidCurrency};

const RETRY_MESSAGE: &str = "please retry your request later";
const OFFER_MESSAGE: &str = "invalid or expired offer";

/// Main error type for Exchequer operations.
#[derive(Error, Debug)]
pub enum ExchangeError {
    /// Bad currency, bad amount scale or missing request parameters.
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// Offer token failed to decrypt, or the cached offer is gone. Deliberately
    /// does not say which.
    #[error("Offer not found or expired")]
    NotFoundOrExpired,

    /// Internal data disagreed with the request, e.g. an offer owned by
    /// another client.
    #[error("Integrity fault: {0}")]
    IntegrityFault(String),

    /// Quote provider, offer cache or ledger was unavailable or timed out.
    #[error("Transient infrastructure failure: {0}")]
    Transient(String),

    /// The ledger refused a debit or could not find an account.
    #[error("Insufficient funds or missing account: {0}")]
    InsufficientFundsOrMissingAccount(String),

    /// Account already open for this (client, currency).
    #[error("Account already exists: {0}")]
    AccountExists(String),
}

impl ExchangeError {
    /// Validation failure tied to a request field.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        ExchangeError::Validation {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }

    /// Check if the client may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::Transient(_) | ExchangeError::IntegrityFault(_)
        )
    }

    /// Get suggested retry delay in milliseconds.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ExchangeError::Transient(_) => Some(1000),
            ExchangeError::IntegrityFault(_) => Some(1000),
            _ => None,
        }
    }

    /// Whether the failure is the caller's fault (4xx family).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ExchangeError::Validation { .. }
                | ExchangeError::NotFoundOrExpired
                | ExchangeError::InsufficientFundsOrMissingAccount(_)
                | ExchangeError::AccountExists(_)
        )
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            ExchangeError::Validation { .. } => "VALIDATION",
            ExchangeError::NotFoundOrExpired => "NOT_FOUND_OR_EXPIRED",
            ExchangeError::IntegrityFault(_) => "RETRY",
            ExchangeError::Transient(_) => "RETRY",
            ExchangeError::InsufficientFundsOrMissingAccount(_) => "INSUFFICIENT_FUNDS",
            ExchangeError::AccountExists(_) => "ACCOUNT_EXISTS",
        }
    }

    /// Message safe to return to the client.
    ///
    /// Only validation and insufficient-funds errors carry specific detail;
    /// everything else collapses to a generic text.
    pub fn client_message(&self) -> String {
        match self {
            ExchangeError::Validation { message, .. } => message.clone(),
            ExchangeError::NotFoundOrExpired => OFFER_MESSAGE.to_string(),
            ExchangeError::IntegrityFault(_) | ExchangeError::Transient(_) => {
                RETRY_MESSAGE.to_string()
            }
            ExchangeError::InsufficientFundsOrMissingAccount(detail) => detail.clone(),
            ExchangeError::AccountExists(_) => "account already exists".to_string(),
        }
    }
}

impl From<InvalidCurrency> for ExchangeError {
    fn from(err: InvalidCurrency) -> Self {
        ExchangeError::invalid("currency", err.to_string())
    }
}

impl From<AmountError> for ExchangeError {
    fn from(err: AmountError) -> Self {
        ExchangeError::invalid("amount", err.to_string())
    }
}

/// Result type alias for Exchequer operations.
pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
