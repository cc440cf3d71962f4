//! Offer generation.
//!
//! Validates a conversion request, prices it, caches the resulting offer for
//! its lifetime and hands the client an opaque token for it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use exchequer_common::{
    ClientId, Currency, ExchangeError, ExchangeResult, Money, SettlementKind,
};
use exchequer_crypto::{TokenCodec, TokenKind};
use exchequer_fx::{Offer, OfferCache, Quote, QuoteProvider};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::config::{OfferConfig, TimeoutConfig};
use crate::errors::{from_fx, timed_out};
use crate::metrics::SharedMetrics;

/// A client's request for a priced conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferRequest {
    pub client_id: ClientId,
    pub source: Currency,
    pub destination: Currency,
    /// Amount of `source` to debit.
    pub amount: Decimal,
    pub is_purchase: bool,
    pub is_sale: bool,
}

impl OfferRequest {
    /// Fiat to fiat conversion.
    pub fn fiat(client_id: ClientId, source: Currency, destination: Currency, amount: Decimal) -> Self {
        Self {
            client_id,
            source,
            destination,
            amount,
            is_purchase: false,
            is_sale: false,
        }
    }

    /// Fiat to crypto.
    pub fn purchase(client_id: ClientId, fiat: Currency, crypto: Currency, amount: Decimal) -> Self {
        Self {
            is_purchase: true,
            ..Self::fiat(client_id, fiat, crypto, amount)
        }
    }

    /// Crypto to fiat.
    pub fn sale(client_id: ClientId, crypto: Currency, fiat: Currency, amount: Decimal) -> Self {
        Self {
            is_sale: true,
            ..Self::fiat(client_id, crypto, fiat, amount)
        }
    }

    /// Check the request shape and return the settlement kind it asks for.
    pub fn validate(&self) -> ExchangeResult<SettlementKind> {
        let kind = SettlementKind::from_offer_flags(self.is_purchase, self.is_sale)
            .ok_or_else(|| {
                ExchangeError::invalid("isPurchase", "an offer cannot be both a purchase and a sale")
            })?;

        if self.source.is_clearing() || self.destination.is_clearing() {
            return Err(ExchangeError::invalid("currency", "currency is not tradable"));
        }
        if self.source == self.destination {
            return Err(ExchangeError::invalid(
                "destinationCurrency",
                "source and destination currencies must differ",
            ));
        }

        let shape_ok = match kind {
            SettlementKind::FiatExchange => self.source.is_fiat() && self.destination.is_fiat(),
            SettlementKind::CryptoPurchase => self.source.is_fiat() && self.destination.is_crypto(),
            SettlementKind::CryptoSale => self.source.is_crypto() && self.destination.is_fiat(),
            SettlementKind::ExternalDeposit => false,
        };
        if !shape_ok {
            return Err(ExchangeError::invalid(
                "currency",
                format!("{} to {} is not a valid {}", self.source, self.destination, kind),
            ));
        }

        Money::new(self.amount, self.source).validate_debit()?;
        Ok(kind)
    }
}

/// What the client gets back for a new offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTicket {
    /// Opaque handle to redeem the offer with.
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub rate: Decimal,
    pub debit: Money,
    pub credit: Money,
}

/// Builds, caches and tokenizes offers.
pub struct OfferGenerator {
    quotes: Arc<dyn QuoteProvider>,
    cache: Arc<dyn OfferCache>,
    codec: Arc<TokenCodec>,
    offers: OfferConfig,
    timeouts: TimeoutConfig,
    metrics: SharedMetrics,
}

impl OfferGenerator {
    pub fn new(
        quotes: Arc<dyn QuoteProvider>,
        cache: Arc<dyn OfferCache>,
        codec: Arc<TokenCodec>,
        offers: OfferConfig,
        timeouts: TimeoutConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            quotes,
            cache,
            codec,
            offers,
            timeouts,
            metrics,
        }
    }

    /// Price and cache a conversion offer.
    ///
    /// Nothing touches the ledger here; a failure at any step leaves no state
    /// behind except possibly an unreachable cache entry that expires on its own.
    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn create_offer(&self, request: &OfferRequest) -> ExchangeResult<OfferTicket> {
        let kind = request.validate()?;

        let quote = self.quote(kind, request).await?;
        if quote.amount <= Decimal::ZERO {
            self.metrics.transient_failure();
            error!(
                pair = %quote.pair,
                rate = %quote.rate,
                amount = %request.amount,
                "Quote truncated to a non-positive amount"
            );
            return Err(ExchangeError::Transient(format!(
                "quote for {} produced no credit",
                quote.pair
            )));
        }

        let ttl = self.ttl(kind);
        let lifetime = chrono::Duration::from_std(ttl)
            .map_err(|e| ExchangeError::Transient(format!("offer lifetime: {}", e)))?;
        let offer = Offer::new(
            request.client_id,
            &quote,
            request.is_purchase,
            request.is_sale,
            lifetime,
        );

        let token = self
            .codec
            .seal(TokenKind::Offer, offer.id.as_bytes())
            .map_err(|e| {
                error!(error = %e, "Offer token could not be sealed");
                ExchangeError::Transient(e.to_string())
            })?;

        self.store(&offer, ttl).await?;
        self.metrics.offer_created();

        info!(
            offer_id = %offer.id,
            client_id = %offer.client_id,
            kind = %kind,
            debit = %offer.debit(),
            credit = %offer.credit(),
            expires_at = %offer.expires_at,
            "Offer created"
        );

        Ok(OfferTicket {
            token,
            expires_at: offer.expires_at,
            rate: offer.rate,
            debit: offer.debit(),
            credit: offer.credit(),
        })
    }

    fn ttl(&self, kind: SettlementKind) -> Duration {
        if kind.is_crypto() {
            self.offers.crypto_ttl
        } else {
            self.offers.fiat_ttl
        }
    }

    async fn quote(&self, kind: SettlementKind, request: &OfferRequest) -> ExchangeResult<Quote> {
        let call = async {
            match kind {
                SettlementKind::FiatExchange => {
                    self.quotes
                        .fiat_conversion(request.source, request.destination, request.amount)
                        .await
                }
                _ => {
                    self.quotes
                        .crypto_conversion(
                            request.source,
                            request.destination,
                            request.amount,
                            request.is_purchase,
                        )
                        .await
                }
            }
        };

        match tokio::time::timeout(self.timeouts.quote, call).await {
            Ok(Ok(quote)) => Ok(quote),
            Ok(Err(e)) if e.is_transient() => {
                self.metrics.transient_failure();
                error!(provider = %self.quotes.name(), error = %e, "Quote failed");
                Err(from_fx(e))
            }
            Ok(Err(e)) => {
                warn!(provider = %self.quotes.name(), error = %e, "Quote refused");
                Err(from_fx(e))
            }
            Err(_) => {
                self.metrics.transient_failure();
                error!(provider = %self.quotes.name(), "Quote timed out");
                Err(timed_out("quote"))
            }
        }
    }

    async fn store(&self, offer: &Offer, ttl: Duration) -> ExchangeResult<()> {
        let key = offer.id.cache_key();
        match tokio::time::timeout(self.timeouts.cache, self.cache.set(&key, offer, ttl)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.metrics.transient_failure();
                error!(offer_id = %offer.id, error = %e, "Offer could not be cached");
                Err(from_fx(e))
            }
            Err(_) => {
                self.metrics.transient_failure();
                error!(offer_id = %offer.id, "Offer cache write timed out");
                Err(timed_out("offer cache"))
            }
        }
    }
}
