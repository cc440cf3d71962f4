//! Offer redemption and settlement.

use std::sync::Arc;

use exchequer_common::{
    ClientId, Currency, ExchangeError, ExchangeResult, Money, OfferId, OfferState,
    SettlementKind, TxId,
};
use exchequer_crypto::{TokenCodec, TokenKind};
use exchequer_fx::{Offer, OfferCache};
use exchequer_ledger::{JournalBatch, JournalEntry, LedgerEngine, Posting};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::TimeoutConfig;
use crate::errors::{from_fx, from_ledger, timed_out};
use crate::metrics::SharedMetrics;

/// Journal rows written by one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_id: TxId,
    pub kind: SettlementKind,
    pub entries: Vec<JournalEntry>,
}

impl From<Posting> for Receipt {
    fn from(posting: Posting) -> Self {
        Self {
            tx_id: posting.tx_id,
            kind: posting.kind,
            entries: posting.entries,
        }
    }
}

/// Turns redeemed offers and deposits into ledger postings.
pub struct SettlementEngine {
    cache: Arc<dyn OfferCache>,
    codec: Arc<TokenCodec>,
    ledger: Arc<LedgerEngine>,
    treasury: ClientId,
    timeouts: TimeoutConfig,
    metrics: SharedMetrics,
}

impl SettlementEngine {
    pub fn new(
        cache: Arc<dyn OfferCache>,
        codec: Arc<TokenCodec>,
        ledger: Arc<LedgerEngine>,
        treasury: ClientId,
        timeouts: TimeoutConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            cache,
            codec,
            ledger,
            treasury,
            timeouts,
            metrics,
        }
    }

    /// Redeem an offer token for `client_id`.
    ///
    /// The cached offer is removed before the posting starts. A posting that
    /// fails afterwards loses the offer; the client has to request a new one.
    #[instrument(skip(self, token), fields(client_id = %client_id))]
    pub async fn redeem(&self, client_id: ClientId, token: &str) -> ExchangeResult<Receipt> {
        let offer_id = match self.open_token(token) {
            Some(id) => id,
            None => {
                self.metrics.offer_missed();
                debug!("Offer token rejected");
                return Err(ExchangeError::NotFoundOrExpired);
            }
        };

        let offer = match self.take(offer_id).await? {
            Some(offer) => offer,
            None => {
                self.metrics.offer_missed();
                debug!(offer_id = %offer_id, "Offer not in cache");
                return Err(ExchangeError::NotFoundOrExpired);
            }
        };

        let mut state = OfferState::Cached;

        if offer.client_id != client_id {
            self.metrics.integrity_fault();
            warn!(
                offer_id = %offer.id,
                owner = %offer.client_id,
                presented_by = %client_id,
                "Offer presented by a client that does not own it"
            );
            self.advance(&mut state, OfferState::ConsumedButFailed, &offer);
            return Err(ExchangeError::IntegrityFault(format!(
                "offer {} owned by {} presented by {}",
                offer.id, offer.client_id, client_id
            )));
        }

        if offer.is_expired() {
            self.metrics.offer_missed();
            self.advance(&mut state, OfferState::Expired, &offer);
            return Err(ExchangeError::NotFoundOrExpired);
        }

        let kind = match offer.kind() {
            Some(kind) => kind,
            None => {
                self.metrics.integrity_fault();
                error!(offer_id = %offer.id, "Cached offer has both purchase and sale set");
                self.advance(&mut state, OfferState::ConsumedButFailed, &offer);
                return Err(ExchangeError::IntegrityFault(format!(
                    "offer {} has no settlement kind",
                    offer.id
                )));
            }
        };

        let batch = JournalBatch::conversion(kind, client_id, offer.debit(), offer.credit());
        match self.ledger.post(batch).await {
            Ok(posting) => {
                self.metrics.offer_redeemed();
                self.advance(&mut state, OfferState::Redeemed, &offer);
                info!(
                    offer_id = %offer.id,
                    tx_id = %posting.tx_id,
                    kind = %kind,
                    "Offer redeemed"
                );
                Ok(posting.into())
            }
            Err(e) => {
                self.metrics.settlement_failed();
                if e.is_transient() {
                    self.metrics.transient_failure();
                }
                error!(
                    offer_id = %offer.id,
                    kind = %kind,
                    error = %e,
                    "Settlement failed after offer was consumed"
                );
                self.advance(&mut state, OfferState::ConsumedButFailed, &offer);
                Err(from_ledger(e))
            }
        }
    }

    /// Credit external funds to a client's fiat account.
    #[instrument(skip(self), fields(client_id = %client_id))]
    pub async fn deposit(
        &self,
        client_id: ClientId,
        currency: Currency,
        amount: Decimal,
    ) -> ExchangeResult<Receipt> {
        if !currency.is_fiat() {
            return Err(ExchangeError::invalid(
                "currency",
                format!("deposits must be in a fiat currency, not {}", currency),
            ));
        }
        let money = Money::new(amount, currency);
        money.validate_debit()?;

        let batch = JournalBatch::external_deposit(self.treasury, client_id, money);
        let posting = self.ledger.post(batch).await.map_err(|e| {
            if e.is_transient() {
                self.metrics.transient_failure();
            }
            error!(currency = %currency, amount = %amount, error = %e, "Deposit failed");
            from_ledger(e)
        })?;

        self.metrics.deposit();
        info!(tx_id = %posting.tx_id, currency = %currency, amount = %amount, "Deposit posted");
        Ok(posting.into())
    }

    fn open_token(&self, token: &str) -> Option<OfferId> {
        let bytes = self.codec.open(TokenKind::Offer, token).ok()?;
        OfferId::from_slice(&bytes)
    }

    async fn take(&self, offer_id: OfferId) -> ExchangeResult<Option<Offer>> {
        let key = offer_id.cache_key();
        match tokio::time::timeout(self.timeouts.cache, self.cache.get_and_delete(&key)).await {
            Ok(Ok(offer)) => Ok(offer),
            Ok(Err(e)) => {
                self.metrics.transient_failure();
                error!(offer_id = %offer_id, error = %e, "Offer cache read failed");
                Err(from_fx(e))
            }
            Err(_) => {
                self.metrics.transient_failure();
                error!(offer_id = %offer_id, "Offer cache read timed out");
                Err(timed_out("offer cache"))
            }
        }
    }

    fn advance(&self, state: &mut OfferState, next: OfferState, offer: &Offer) {
        if let Err(e) = state.transition_to(next) {
            error!(offer_id = %offer.id, error = %e, "Offer lifecycle violated");
            return;
        }
        debug!(offer_id = %offer.id, state = ?state, "Offer state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use exchequer_common::{AccountKey, CurrencyPair, MAX_AMOUNT};
    use exchequer_fx::{InMemoryOfferCache, Quote};
    use exchequer_ledger::{InMemoryLedger, LedgerStore};
    use rust_decimal_macros::dec;

    struct Fixture {
        ledger: InMemoryLedger,
        cache: Arc<InMemoryOfferCache>,
        codec: Arc<TokenCodec>,
        metrics: SharedMetrics,
        engine: SettlementEngine,
        client: ClientId,
    }

    async fn fixture() -> Fixture {
        let ledger = InMemoryLedger::new();
        let cache = Arc::new(InMemoryOfferCache::new());
        let codec = Arc::new(TokenCodec::from_secret("settlement-test").unwrap());
        let metrics = Arc::new(Metrics::new());
        let engine = SettlementEngine::new(
            cache.clone(),
            codec.clone(),
            Arc::new(LedgerEngine::new(Arc::new(ledger.clone()))),
            ClientId::new(),
            TimeoutConfig::default(),
            metrics.clone(),
        );

        let client = ClientId::new();
        for currency in [Currency::usd(), Currency::cad()] {
            ledger
                .create_account(AccountKey::new(client, currency))
                .await
                .unwrap();
        }

        Fixture {
            ledger,
            cache,
            codec,
            metrics,
            engine,
            client,
        }
    }

    async fn cached_offer(f: &Fixture, owner: ClientId, ttl: chrono::Duration) -> String {
        let quote = Quote::price(
            CurrencyPair::new(Currency::usd(), Currency::cad()),
            dec!(1.35),
            dec!(100.00),
        )
        .unwrap();
        let offer = Offer::new(owner, &quote, false, false, ttl);
        f.cache
            .set(&offer.id.cache_key(), &offer, std::time::Duration::from_secs(120))
            .await
            .unwrap();
        f.codec.seal(TokenKind::Offer, offer.id.as_bytes()).unwrap()
    }

    async fn balance(f: &Fixture, currency: Currency) -> Decimal {
        f.ledger
            .account(&AccountKey::new(f.client, currency))
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    #[tokio::test]
    async fn test_redeem() {
        let f = fixture().await;
        f.engine
            .deposit(f.client, Currency::usd(), dec!(1000.00))
            .await
            .unwrap();
        let token = cached_offer(&f, f.client, chrono::Duration::minutes(2)).await;

        let receipt = f.engine.redeem(f.client, &token).await.unwrap();

        assert_eq!(receipt.kind, SettlementKind::FiatExchange);
        assert_eq!(receipt.entries.len(), 2);
        assert_eq!(balance(&f, Currency::usd()).await, dec!(900.00));
        assert_eq!(balance(&f, Currency::cad()).await, dec!(135.00));

        let again = f.engine.redeem(f.client, &token).await;
        assert!(matches!(again, Err(ExchangeError::NotFoundOrExpired)));

        let snapshot = f.metrics.snapshot();
        assert_eq!(snapshot.offers_redeemed, 1);
        assert_eq!(snapshot.offers_missed, 1);
        assert_eq!(snapshot.deposits, 1);
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let f = fixture().await;

        for token in ["", "nonsense", "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"] {
            let result = f.engine.redeem(f.client, token).await;
            assert!(matches!(result, Err(ExchangeError::NotFoundOrExpired)));
        }

        // A cursor token is not an offer token.
        let cursor = f.codec.seal(TokenKind::Cursor, OfferId::new().as_bytes()).unwrap();
        let result = f.engine.redeem(f.client, &cursor).await;
        assert!(matches!(result, Err(ExchangeError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn test_other_client_is_integrity_fault() {
        let f = fixture().await;
        let token = cached_offer(&f, f.client, chrono::Duration::minutes(2)).await;

        let err = f.engine.redeem(ClientId::new(), &token).await.unwrap_err();

        assert!(matches!(err, ExchangeError::IntegrityFault(_)));
        assert_eq!(err.client_message(), "please retry your request later");
        assert_eq!(f.metrics.snapshot().integrity_faults, 1);
        assert!(f.cache.is_empty());
    }

    #[tokio::test]
    async fn test_domain_expiry_checked() {
        let f = fixture().await;
        let token = cached_offer(&f, f.client, chrono::Duration::seconds(-1)).await;

        let result = f.engine.redeem(f.client, &token).await;
        assert!(matches!(result, Err(ExchangeError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn test_insufficient_funds_consumes_offer() {
        let f = fixture().await;
        let token = cached_offer(&f, f.client, chrono::Duration::minutes(2)).await;

        let err = f.engine.redeem(f.client, &token).await.unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_FUNDS");
        assert_eq!(f.metrics.snapshot().settlements_failed, 1);
        assert!(balance(&f, Currency::cad()).await.is_zero());

        f.engine
            .deposit(f.client, Currency::usd(), dec!(1000.00))
            .await
            .unwrap();
        let again = f.engine.redeem(f.client, &token).await;
        assert!(matches!(again, Err(ExchangeError::NotFoundOrExpired)));
    }

    #[tokio::test]
    async fn test_cache_down_is_transient() {
        let f = fixture().await;
        let token = cached_offer(&f, f.client, chrono::Duration::minutes(2)).await;
        f.cache.set_available(false);

        let err = f.engine.redeem(f.client, &token).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_deposit_validation() {
        let f = fixture().await;

        let crypto = f.engine.deposit(f.client, Currency::btc(), dec!(1)).await;
        let scale = f.engine.deposit(f.client, Currency::usd(), dec!(1.001)).await;
        let zero = f.engine.deposit(f.client, Currency::usd(), dec!(0)).await;

        for result in [crypto, scale, zero] {
            assert_eq!(result.unwrap_err().error_code(), "VALIDATION");
        }
        assert_eq!(f.ledger.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_deposit_to_missing_account() {
        let f = fixture().await;
        let err = f
            .engine
            .deposit(f.client, Currency::eur(), dec!(10.00))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::InsufficientFundsOrMissingAccount(_)));
    }

    #[tokio::test]
    async fn test_deposit_past_max_amount() {
        let f = fixture().await;

        for amount in [Decimal::MAX, Decimal::MAX.trunc(), MAX_AMOUNT + dec!(1)] {
            let err = f
                .engine
                .deposit(f.client, Currency::usd(), amount)
                .await
                .unwrap_err();
            assert_eq!(err.error_code(), "VALIDATION");
        }
        assert_eq!(f.ledger.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_deposit_overflowing_balance_is_refused() {
        let f = fixture().await;
        f.engine
            .deposit(f.client, Currency::usd(), MAX_AMOUNT)
            .await
            .unwrap();

        let err = f
            .engine
            .deposit(f.client, Currency::usd(), MAX_AMOUNT)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION");
        assert_eq!(balance(&f, Currency::usd()).await, MAX_AMOUNT);
        assert_eq!(f.ledger.journal_len(), 2);

        // The account is still usable afterwards.
        let token = cached_offer(&f, f.client, chrono::Duration::minutes(2)).await;
        f.engine.redeem(f.client, &token).await.unwrap();
        assert_eq!(balance(&f, Currency::usd()).await, MAX_AMOUNT - dec!(100.00));
    }

    #[tokio::test]
    async fn test_redeem_overflowing_credit_applies_nothing() {
        let f = fixture().await;
        f.engine
            .deposit(f.client, Currency::usd(), dec!(1000.00))
            .await
            .unwrap();
        f.engine
            .deposit(f.client, Currency::cad(), MAX_AMOUNT)
            .await
            .unwrap();
        let token = cached_offer(&f, f.client, chrono::Duration::minutes(2)).await;

        let err = f.engine.redeem(f.client, &token).await.unwrap_err();

        assert_eq!(err.error_code(), "VALIDATION");
        assert_eq!(balance(&f, Currency::usd()).await, dec!(1000.00));
        assert_eq!(balance(&f, Currency::cad()).await, MAX_AMOUNT);
        assert_eq!(f.metrics.snapshot().settlements_failed, 1);
    }
}
