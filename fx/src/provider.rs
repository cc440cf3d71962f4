//! Quote provider trait and the in-process rate table.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use exchequer_common::{Currency, CurrencyPair};
use rust_decimal::Decimal;
use tracing::debug;

use crate::conversion::Quote;
use crate::error::{FxError, FxResult};

/// Prices conversions between currencies.
#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Price a fiat to fiat conversion of `amount` units of `source`.
    async fn fiat_conversion(
        &self,
        source: Currency,
        destination: Currency,
        amount: Decimal,
    ) -> FxResult<Quote>;

    /// Price a crypto purchase (fiat to crypto) or sale (crypto to fiat).
    async fn crypto_conversion(
        &self,
        source: Currency,
        destination: Currency,
        amount: Decimal,
        is_purchase: bool,
    ) -> FxResult<Quote>;
}

/// Quote provider backed by a table of mid rates.
///
/// A rate stored for `A/B` also serves `B/A` through its reciprocal. The table
/// can be switched offline or slowed down to exercise caller timeouts.
pub struct RateTableProvider {
    name: String,
    rates: DashMap<CurrencyPair, Decimal>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl RateTableProvider {
    /// Create an empty table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rates: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Set the rate for one unit of `base` in `quote`.
    pub fn set_rate(&self, base: Currency, quote: Currency, rate: Decimal) {
        self.rates.insert(CurrencyPair::new(base, quote), rate);
    }

    /// Toggle whether quote requests succeed.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Delay every quote by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Look up a rate directly or through the inverse pair.
    pub fn rate(&self, pair: &CurrencyPair) -> Option<Decimal> {
        if let Some(rate) = self.rates.get(pair) {
            return Some(*rate);
        }
        self.rates
            .get(&pair.inverse())
            .filter(|rate| !rate.is_zero())
            .and_then(|rate| Decimal::ONE.checked_div(*rate))
    }

    async fn quote(&self, pair: CurrencyPair, amount: Decimal) -> FxResult<Quote> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if !self.available.load(Ordering::Relaxed) {
            return Err(FxError::ProviderError(format!("{} is offline", self.name)));
        }

        let rate = self.rate(&pair).ok_or(FxError::RateNotAvailable(pair))?;
        let quote = Quote::price(pair, rate, amount)?;

        debug!(
            provider = %self.name,
            pair = %pair,
            rate = %rate,
            amount = %quote.amount,
            "Quoted conversion"
        );

        Ok(quote)
    }
}

#[async_trait]
impl QuoteProvider for RateTableProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fiat_conversion(
        &self,
        source: Currency,
        destination: Currency,
        amount: Decimal,
    ) -> FxResult<Quote> {
        if !source.is_fiat() || !destination.is_fiat() {
            return Err(FxError::UnsupportedConversion {
                from: source,
                to: destination,
            });
        }
        self.quote(CurrencyPair::new(source, destination), amount)
            .await
    }

    async fn crypto_conversion(
        &self,
        source: Currency,
        destination: Currency,
        amount: Decimal,
        is_purchase: bool,
    ) -> FxResult<Quote> {
        let (fiat, crypto) = if is_purchase {
            (source, destination)
        } else {
            (destination, source)
        };
        if !fiat.is_fiat() || !crypto.is_crypto() {
            return Err(FxError::UnsupportedConversion {
                from: source,
                to: destination,
            });
        }
        self.quote(CurrencyPair::new(source, destination), amount)
            .await
    }
}
