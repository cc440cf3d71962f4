//! Quote and offer cache error types.

use exchequer_common::{Currency, CurrencyPair};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by quote providers and offer caches.
#[derive(Debug, Error)]
pub enum FxError {
    /// No rate known for the requested currency pair.
    #[error("Rate not available for {0}")]
    RateNotAvailable(CurrencyPair),

    /// The provider does not price this direction or asset class mix.
    #[error("Unsupported conversion from {from} to {to}")]
    UnsupportedConversion { from: Currency, to: Currency },

    /// Provider returned an error.
    #[error("Quote provider error: {0}")]
    ProviderError(String),

    /// The priced amount does not fit the amount range.
    #[error("Converting {amount} at {rate} for {pair} exceeds the amount range")]
    AmountOverflow {
        pair: CurrencyPair,
        amount: Decimal,
        rate: Decimal,
    },

    /// Offer cache could not be reached.
    #[error("Offer cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl FxError {
    /// Whether the failure is an outage rather than a rejection of the request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FxError::RateNotAvailable(_) | FxError::ProviderError(_) | FxError::CacheUnavailable(_)
        )
    }
}

/// Result type for quote and cache operations.
pub type FxResult<T> = Result<T, FxError>;
