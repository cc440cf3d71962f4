//! The exchange service facade.

use std::sync::Arc;

use exchequer_common::{
    AccountKey, ClientId, Currency, ExchangeError, ExchangeResult, SettlementKind, TxId,
};
use exchequer_crypto::TokenCodec;
use exchequer_fx::{InMemoryOfferCache, OfferCache, QuoteProvider};
use exchequer_ledger::{
    Account, InMemoryLedger, JournalEntry, LedgerEngine, LedgerStore, PostgresLedger,
};
use rust_decimal::Decimal;
use tracing::{error, info, instrument};

use crate::config::ExchangeConfig;
use crate::errors::{from_ledger, ledger_read, SetupError, FUNDS_MESSAGE};
use crate::metrics::{Metrics, SharedMetrics};
use crate::offers::{OfferGenerator, OfferRequest, OfferTicket};
use crate::pagination::{JournalQuery, LedgerReader, Page};
use crate::settlement::{Receipt, SettlementEngine};

/// Currency exchange service.
///
/// Owns the offer generator, the settlement engine and the ledger reader,
/// all wired from one [`ExchangeConfig`] and the injected collaborators.
pub struct Exchange {
    config: ExchangeConfig,
    store: Arc<dyn LedgerStore>,
    ledger: Arc<LedgerEngine>,
    offers: OfferGenerator,
    settlement: SettlementEngine,
    reader: LedgerReader,
    metrics: SharedMetrics,
}

impl Exchange {
    /// Wire an exchange over the given collaborators.
    pub fn new(
        config: ExchangeConfig,
        quotes: Arc<dyn QuoteProvider>,
        cache: Arc<dyn OfferCache>,
        store: Arc<dyn LedgerStore>,
    ) -> Result<Self, SetupError> {
        config.validate().map_err(SetupError::Config)?;

        let codec = Arc::new(TokenCodec::from_secret(&config.token_secret)?);
        let metrics: SharedMetrics = Arc::new(Metrics::new());
        let ledger = Arc::new(LedgerEngine::new(store.clone()).with_deadline(config.timeouts.ledger));

        let offers = OfferGenerator::new(
            quotes.clone(),
            cache.clone(),
            codec.clone(),
            config.offers.clone(),
            config.timeouts.clone(),
            metrics.clone(),
        );
        let settlement = SettlementEngine::new(
            cache,
            codec.clone(),
            ledger.clone(),
            config.treasury_client,
            config.timeouts.clone(),
            metrics.clone(),
        );
        let reader = LedgerReader::new(
            store.clone(),
            codec,
            config.pagination.clone(),
            config.timeouts.ledger,
        );

        info!(
            provider = quotes.name(),
            treasury = %config.treasury_client,
            "Exchange initialized"
        );

        Ok(Self {
            config,
            store,
            ledger,
            offers,
            settlement,
            reader,
            metrics,
        })
    }

    /// Exchange backed by in-process cache and ledger.
    pub fn in_memory(
        config: ExchangeConfig,
        quotes: Arc<dyn QuoteProvider>,
    ) -> Result<Self, SetupError> {
        let lock_wait = config.timeouts.lock_wait;
        Self::new(
            config,
            quotes,
            Arc::new(InMemoryOfferCache::new()),
            Arc::new(InMemoryLedger::with_lock_wait(lock_wait)),
        )
    }

    /// Exchange backed by PostgreSQL, with the schema applied.
    pub async fn connect_postgres(
        config: ExchangeConfig,
        quotes: Arc<dyn QuoteProvider>,
        cache: Arc<dyn OfferCache>,
    ) -> Result<Self, SetupError> {
        config.validate().map_err(SetupError::Config)?;

        let ledger = PostgresLedger::connect(&config.database_url, config.max_connections)
            .await?
            .with_lock_wait(config.timeouts.lock_wait);
        ledger.migrate().await?;

        Self::new(config, quotes, cache, Arc::new(ledger))
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn metrics(&self) -> &SharedMetrics {
        &self.metrics
    }

    /// Open a zero-balance account.
    #[instrument(skip(self), fields(client_id = %client_id, currency = %currency))]
    pub async fn open_account(
        &self,
        client_id: ClientId,
        currency: Currency,
    ) -> ExchangeResult<Account> {
        if currency.is_clearing() {
            return Err(ExchangeError::invalid(
                "currency",
                format!("{} is not a holdable currency", currency),
            ));
        }

        let key = AccountKey::new(client_id, currency);
        let account = ledger_read(self.config.timeouts.ledger, self.store.create_account(key))
            .await?;
        info!(account = %key, "Account opened");
        Ok(account)
    }

    /// Current balance row of one account.
    pub async fn balance(&self, client_id: ClientId, currency: Currency) -> ExchangeResult<Account> {
        let key = AccountKey::new(client_id, currency);
        ledger_read(self.config.timeouts.ledger, self.store.account(&key))
            .await?
            .ok_or_else(|| ExchangeError::InsufficientFundsOrMissingAccount(FUNDS_MESSAGE.to_string()))
    }

    /// Credit external funds to a fiat account.
    pub async fn deposit(
        &self,
        client_id: ClientId,
        currency: Currency,
        amount: Decimal,
    ) -> ExchangeResult<Receipt> {
        self.settlement.deposit(client_id, currency, amount).await
    }

    /// Price a conversion and hand back a redeemable offer.
    pub async fn create_offer(&self, request: &OfferRequest) -> ExchangeResult<OfferTicket> {
        self.offers.create_offer(request).await
    }

    /// Redeem an offer token.
    pub async fn redeem(&self, client_id: ClientId, token: &str) -> ExchangeResult<Receipt> {
        self.settlement.redeem(client_id, token).await
    }

    /// The client's own journal rows under `tx_id`.
    pub async fn transaction(
        &self,
        client_id: ClientId,
        tx_id: TxId,
    ) -> ExchangeResult<Vec<JournalEntry>> {
        let rows: Vec<JournalEntry> =
            ledger_read(self.config.timeouts.ledger, self.store.journal_for_tx(tx_id))
                .await?
                .into_iter()
                .filter(|entry| entry.client_id == client_id)
                .collect();

        if rows.is_empty() {
            return Err(ExchangeError::invalid("tx_id", "unknown transaction"));
        }
        Ok(rows)
    }

    pub async fn list_accounts(
        &self,
        client_id: ClientId,
        cursor: Option<&str>,
        page_size: i64,
    ) -> ExchangeResult<Page<Account>> {
        self.reader.list_accounts(client_id, cursor, page_size).await
    }

    pub async fn list_journal(
        &self,
        client_id: ClientId,
        currency: Currency,
        query: &JournalQuery,
        page_size: i64,
    ) -> ExchangeResult<Page<JournalEntry>> {
        self.reader
            .list_journal(client_id, currency, query, page_size)
            .await
    }

    /// Re-check a posted transaction against the journal consistency rules.
    pub async fn verify_transaction(&self, tx_id: TxId) -> ExchangeResult<SettlementKind> {
        self.ledger.verify_transaction(tx_id).await.map_err(|e| {
            error!(tx_id = %tx_id, error = %e, "Transaction failed verification");
            from_ledger(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exchequer_fx::RateTableProvider;
    use rust_decimal_macros::dec;

    fn exchange() -> Exchange {
        let quotes = Arc::new(RateTableProvider::new("rates"));
        quotes.set_rate(Currency::usd(), Currency::cad(), dec!(1.35));
        Exchange::in_memory(ExchangeConfig::with_secret("facade-test"), quotes).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let result = Exchange::in_memory(
            ExchangeConfig::default(),
            Arc::new(RateTableProvider::new("rates")),
        );
        assert!(matches!(result, Err(SetupError::Config(_))));
    }

    #[tokio::test]
    async fn test_open_account() {
        let exchange = exchange();
        let client = ClientId::new();

        let account = exchange.open_account(client, Currency::usd()).await.unwrap();
        assert!(account.balance.is_zero());

        let duplicate = exchange.open_account(client, Currency::usd()).await;
        assert!(matches!(duplicate, Err(ExchangeError::AccountExists(_))));

        let sentinel = exchange.open_account(client, Currency::deposit()).await;
        assert!(matches!(sentinel, Err(ExchangeError::Validation { .. })));

        let crypto = exchange.open_account(client, Currency::btc()).await;
        assert!(crypto.is_ok());
    }

    #[tokio::test]
    async fn test_balance_of_missing_account() {
        let exchange = exchange();
        let err = exchange
            .balance(ClientId::new(), Currency::usd())
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), FUNDS_MESSAGE);
    }

    #[tokio::test]
    async fn test_transaction_lookup() {
        let exchange = exchange();
        let client = ClientId::new();
        exchange.open_account(client, Currency::usd()).await.unwrap();

        let receipt = exchange
            .deposit(client, Currency::usd(), dec!(50.00))
            .await
            .unwrap();

        let rows = exchange.transaction(client, receipt.tx_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, dec!(50.00));

        let kind = exchange.verify_transaction(receipt.tx_id).await.unwrap();
        assert_eq!(kind, SettlementKind::ExternalDeposit);

        let stranger = exchange.transaction(ClientId::new(), receipt.tx_id).await;
        assert!(matches!(stranger, Err(ExchangeError::Validation { .. })));
    }
}
