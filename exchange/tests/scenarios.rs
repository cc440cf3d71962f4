//! End-to-end exchange scenarios over the in-memory stack.

use std::sync::Arc;
use std::time::Duration;

use chrono::Datelike;
use exchequer_common::{ClientId, Currency, ExchangeError, SettlementKind, MAX_AMOUNT};
use exchequer_exchange::{Exchange, ExchangeConfig, JournalQuery, OfferRequest};
use exchequer_fx::{InMemoryOfferCache, RateTableProvider};
use exchequer_ledger::InMemoryLedger;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

struct Harness {
    exchange: Arc<Exchange>,
    ledger: InMemoryLedger,
    quotes: Arc<RateTableProvider>,
}

fn harness() -> Harness {
    let quotes = Arc::new(RateTableProvider::new("scenario-rates"));
    quotes.set_rate(Currency::usd(), Currency::cad(), dec!(1.35));
    quotes.set_rate(Currency::usd(), Currency::eur(), dec!(0.90));
    quotes.set_rate(Currency::btc(), Currency::usd(), dec!(25000));

    let ledger = InMemoryLedger::new();
    let exchange = Exchange::new(
        ExchangeConfig::with_secret("scenario-secret"),
        quotes.clone(),
        Arc::new(InMemoryOfferCache::new()),
        Arc::new(ledger.clone()),
    )
    .unwrap();

    Harness {
        exchange: Arc::new(exchange),
        ledger,
        quotes,
    }
}

async fn funded_client(exchange: &Exchange, currencies: &[Currency], usd: Decimal) -> ClientId {
    let client = ClientId::new();
    for currency in currencies {
        exchange.open_account(client, *currency).await.unwrap();
    }
    if usd > Decimal::ZERO {
        exchange.deposit(client, Currency::usd(), usd).await.unwrap();
    }
    client
}

#[tokio::test]
async fn fiat_exchange_end_to_end() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], dec!(1000.00)).await;

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(100.00)))
        .await
        .unwrap();
    assert_eq!(ticket.credit.value, dec!(135.00));
    assert_eq!(ticket.rate, dec!(1.35));

    let receipt = h.exchange.redeem(client, &ticket.token).await.unwrap();
    assert_eq!(receipt.kind, SettlementKind::FiatExchange);

    let mut amounts: Vec<(&str, Decimal)> = receipt
        .entries
        .iter()
        .map(|e| (e.currency.code(), e.amount))
        .collect();
    amounts.sort();
    assert_eq!(amounts, vec![("CAD", dec!(135.00)), ("USD", dec!(-100.00))]);

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    let cad = h.exchange.balance(client, Currency::cad()).await.unwrap();
    assert_eq!(usd.balance, dec!(900.00));
    assert_eq!(cad.balance, dec!(135.00));
    assert_eq!(usd.last_tx_amount, dec!(-100.00));

    let rows = h.exchange.transaction(client, receipt.tx_id).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        h.exchange.verify_transaction(receipt.tx_id).await.unwrap(),
        SettlementKind::FiatExchange
    );

    let snapshot = h.exchange.metrics().snapshot();
    assert_eq!(snapshot.offers_created, 1);
    assert_eq!(snapshot.offers_redeemed, 1);
}

#[tokio::test]
async fn crypto_purchase_and_sale() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd(), Currency::btc()], dec!(1000.00)).await;

    let buy = h
        .exchange
        .create_offer(&OfferRequest::purchase(client, Currency::usd(), Currency::btc(), dec!(300.00)))
        .await
        .unwrap();
    let receipt = h.exchange.redeem(client, &buy.token).await.unwrap();
    assert_eq!(receipt.kind, SettlementKind::CryptoPurchase);

    let btc = h.exchange.balance(client, Currency::btc()).await.unwrap();
    assert_eq!(btc.balance, dec!(0.012));

    let sell = h
        .exchange
        .create_offer(&OfferRequest::sale(client, Currency::btc(), Currency::usd(), dec!(0.004)))
        .await
        .unwrap();
    let receipt = h.exchange.redeem(client, &sell.token).await.unwrap();
    assert_eq!(receipt.kind, SettlementKind::CryptoSale);

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    let btc = h.exchange.balance(client, Currency::btc()).await.unwrap();
    assert_eq!(usd.balance, dec!(800.00));
    assert_eq!(btc.balance, dec!(0.008));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn offer_redeems_at_most_once() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], dec!(1000.00)).await;

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(100.00)))
        .await
        .unwrap();

    let attempts = (0..16).map(|_| {
        let exchange = h.exchange.clone();
        let token = ticket.token.clone();
        tokio::spawn(async move { exchange.redeem(client, &token).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let settled = results.iter().filter(|r| r.is_ok()).count();
    let missed = results
        .iter()
        .filter(|r| matches!(r, Err(ExchangeError::NotFoundOrExpired)))
        .count();
    assert_eq!(settled, 1);
    assert_eq!(missed, 15);

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    assert_eq!(usd.balance, dec!(900.00));
    // One deposit plus one exchange.
    assert_eq!(h.ledger.journal_len(), 4);
}

#[tokio::test(start_paused = true)]
async fn offer_expires_after_ttl() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], dec!(1000.00)).await;

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(100.00)))
        .await
        .unwrap();

    tokio::time::advance(Duration::from_secs(180)).await;

    let result = h.exchange.redeem(client, &ticket.token).await;
    assert!(matches!(result, Err(ExchangeError::NotFoundOrExpired)));

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    assert_eq!(usd.balance, dec!(1000.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn opposing_exchanges_do_not_deadlock() {
    let h = harness();
    let currencies = [Currency::usd(), Currency::eur()];
    let client = funded_client(&h.exchange, &currencies, dec!(10000.00)).await;

    // Seed EUR through one exchange so both directions can settle.
    let seed = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::eur(), dec!(2000.00)))
        .await
        .unwrap();
    assert_ok!(h.exchange.redeem(client, &seed.token).await);

    let mut tokens = Vec::new();
    for i in 0..40 {
        let (source, destination) = if i % 2 == 0 {
            (Currency::usd(), Currency::eur())
        } else {
            (Currency::eur(), Currency::usd())
        };
        let ticket = h
            .exchange
            .create_offer(&OfferRequest::fiat(client, source, destination, dec!(10.00)))
            .await
            .unwrap();
        tokens.push(ticket.token);
    }

    let redemptions = tokens.into_iter().map(|token| {
        let exchange = h.exchange.clone();
        tokio::spawn(async move { exchange.redeem(client, &token).await })
    });
    let outcome = tokio::time::timeout(Duration::from_secs(10), join_all(redemptions))
        .await
        .expect("opposing exchanges deadlocked");

    for joined in outcome {
        assert_ok!(joined.unwrap());
    }

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    let eur = h.exchange.balance(client, Currency::eur()).await.unwrap();
    // 20 x (-10 USD, +9 EUR) and 20 x (-10 EUR, +11.11 USD).
    assert_eq!(usd.balance, dec!(8000.00) - dec!(200.00) + dec!(222.20));
    assert_eq!(eur.balance, dec!(1800.00) + dec!(180.00) - dec!(200.00));
}

#[tokio::test]
async fn foreign_offer_is_an_integrity_fault() {
    let h = harness();
    let owner = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], dec!(1000.00)).await;
    let thief = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], dec!(1000.00)).await;

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(owner, Currency::usd(), Currency::cad(), dec!(100.00)))
        .await
        .unwrap();

    let err = assert_err!(h.exchange.redeem(thief, &ticket.token).await);
    assert!(matches!(err, ExchangeError::IntegrityFault(_)));
    assert!(err.is_retryable());
    assert_eq!(err.client_message(), "please retry your request later");

    // The offer is spent either way.
    let owner_try = h.exchange.redeem(owner, &ticket.token).await;
    assert!(matches!(owner_try, Err(ExchangeError::NotFoundOrExpired)));

    for client in [owner, thief] {
        let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
        assert_eq!(usd.balance, dec!(1000.00));
    }
    assert_eq!(h.exchange.metrics().snapshot().integrity_faults, 1);
}

#[tokio::test]
async fn missing_destination_account_rolls_back() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd()], dec!(500.00)).await;

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(100.00)))
        .await
        .unwrap();

    let err = h.exchange.redeem(client, &ticket.token).await.unwrap_err();
    assert_eq!(
        err.client_message(),
        "please check you have both currency accounts and enough funds"
    );

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    assert_eq!(usd.balance, dec!(500.00));
    assert_eq!(h.ledger.journal_len(), 2);
}

#[tokio::test]
async fn quote_provider_outage_is_transient() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], dec!(100.00)).await;
    h.quotes.set_available(false);

    let err = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(10.00)))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.exchange.metrics().snapshot().offers_created, 0);
}

#[tokio::test]
async fn accounts_page_through_cursor() {
    let h = harness();
    let currencies: Vec<Currency> = Currency::all_holdable().into_iter().take(11).collect();
    let client = funded_client(&h.exchange, &currencies, Decimal::ZERO).await;

    let first = h.exchange.list_accounts(client, None, 10).await.unwrap();
    assert_eq!(first.items.len(), 10);
    let cursor = first.next_cursor.clone().expect("first page has a cursor");
    assert!(first
        .next_page_link("/accounts")
        .unwrap()
        .ends_with("&pageSize=10"));

    let second = h
        .exchange
        .list_accounts(client, Some(&cursor), 10)
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].currency, currencies[10]);
    assert!(second.next_cursor.is_none());
}

#[tokio::test]
async fn journal_pages_within_month() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd()], Decimal::ZERO).await;

    let mut first_at = None;
    for _ in 0..5 {
        let receipt = h
            .exchange
            .deposit(client, Currency::usd(), dec!(10.00))
            .await
            .unwrap();
        first_at.get_or_insert(receipt.entries[0].transacted_at);
    }
    let at = first_at.unwrap();

    let query = JournalQuery::month(at.year(), at.month());
    let page = h
        .exchange
        .list_journal(client, Currency::usd(), &query, 3)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 3);
    let cursor = page.next_cursor.clone().unwrap();

    // The cursor wins over a conflicting month.
    let mut next_query = JournalQuery::continue_from(cursor);
    next_query.year = Some(1999);
    next_query.month = Some(1);
    let rest = h
        .exchange
        .list_journal(client, Currency::usd(), &next_query, 3)
        .await
        .unwrap();
    assert_eq!(rest.items.len(), 2);
    assert!(rest.next_cursor.is_none());
    assert!(page.items[2].transacted_at <= rest.items[0].transacted_at);

    let empty = h
        .exchange
        .list_journal(client, Currency::usd(), &JournalQuery::month(1999, 1), 10)
        .await
        .unwrap();
    assert!(empty.items.is_empty());
}

#[tokio::test]
async fn cursor_and_offer_tokens_are_not_interchangeable() {
    let h = harness();
    let client = funded_client(
        &h.exchange,
        &[Currency::usd(), Currency::cad(), Currency::eur()],
        dec!(100.00),
    )
    .await;

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(10.00)))
        .await
        .unwrap();
    let as_cursor = h.exchange.list_accounts(client, Some(&ticket.token), 10).await;
    assert!(matches!(as_cursor, Err(ExchangeError::Validation { .. })));

    let page = h.exchange.list_accounts(client, None, 1).await.unwrap();
    let cursor = page.next_cursor.unwrap();
    let as_offer = h.exchange.redeem(client, &cursor).await;
    assert!(matches!(as_offer, Err(ExchangeError::NotFoundOrExpired)));

    // The real offer is untouched by the failed attempts.
    assert_ok!(h.exchange.redeem(client, &ticket.token).await);
}

#[tokio::test]
async fn extreme_amounts_are_refused_without_side_effects() {
    let h = harness();
    let client = funded_client(&h.exchange, &[Currency::usd(), Currency::cad()], MAX_AMOUNT).await;

    let err = h
        .exchange
        .deposit(client, Currency::usd(), MAX_AMOUNT)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "VALIDATION");

    for amount in [Decimal::MAX, MAX_AMOUNT] {
        let request = OfferRequest::fiat(client, Currency::usd(), Currency::cad(), amount);
        let err = h.exchange.create_offer(&request).await.unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION");
    }

    let ticket = h
        .exchange
        .create_offer(&OfferRequest::fiat(client, Currency::usd(), Currency::cad(), dec!(100.00)))
        .await
        .unwrap();
    assert_ok!(h.exchange.redeem(client, &ticket.token).await);

    let usd = h.exchange.balance(client, Currency::usd()).await.unwrap();
    let cad = h.exchange.balance(client, Currency::cad()).await.unwrap();
    assert_eq!(usd.balance, MAX_AMOUNT - dec!(100.00));
    assert_eq!(cad.balance, dec!(135.00));
    assert_eq!(h.ledger.journal_len(), 4);
}
