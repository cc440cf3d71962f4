//! Translation of collaborator failures into the service error taxonomy.

use std::future::Future;
use std::time::Duration;

use exchequer_common::{ExchangeError, ExchangeResult};
use exchequer_crypto::CryptoError;
use exchequer_fx::FxError;
use exchequer_ledger::{LedgerError, LedgerResult};
use thiserror::Error;

/// Client text for a refused debit or an absent account.
pub const FUNDS_MESSAGE: &str =
    "please check you have both currency accounts and enough funds";

/// Failures while wiring an [`crate::Exchange`] together.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub(crate) fn from_fx(err: FxError) -> ExchangeError {
    match err {
        FxError::UnsupportedConversion { from, to } => ExchangeError::invalid(
            "currency",
            format!("conversion from {} to {} is not supported", from, to),
        ),
        overflow @ FxError::AmountOverflow { .. } => {
            ExchangeError::invalid("amount", overflow.to_string())
        }
        other => ExchangeError::Transient(other.to_string()),
    }
}

pub(crate) fn from_ledger(err: LedgerError) -> ExchangeError {
    match err {
        LedgerError::AccountExists(key) => ExchangeError::AccountExists(key.to_string()),
        LedgerError::AccountNotFound(_) | LedgerError::InsufficientFunds { .. } => {
            ExchangeError::InsufficientFundsOrMissingAccount(FUNDS_MESSAGE.to_string())
        }
        LedgerError::Inconsistent(detail) => ExchangeError::IntegrityFault(detail),
        overflow @ LedgerError::BalanceOverflow { .. } => {
            ExchangeError::invalid("amount", overflow.to_string())
        }
        other => ExchangeError::Transient(other.to_string()),
    }
}

pub(crate) fn timed_out(what: &str) -> ExchangeError {
    ExchangeError::Transient(format!("{} timed out", what))
}

/// Run a ledger read under `deadline` and translate its failure.
pub(crate) async fn ledger_read<T>(
    deadline: Duration,
    read: impl Future<Output = LedgerResult<T>>,
) -> ExchangeResult<T> {
    match tokio::time::timeout(deadline, read).await {
        Ok(result) => result.map_err(from_ledger),
        Err(_) => Err(timed_out("ledger read")),
    }
}
