//! Simulation controller.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use exchequer_common::{ClientId, Currency, ExchangeError, TxId};
use exchequer_exchange::{Exchange, OfferRequest, OfferTicket, Receipt};
use exchequer_fx::{InMemoryOfferCache, RateTableProvider};

use crate::client::{ClientFactory, SimulatedClient};
use crate::metrics::SimulationMetrics;
use crate::scenario::{AssertCondition, FaultType, Scenario, ScenarioStep};

/// Upper bound on one concurrent batch of redemptions.
const BATCH_DEADLINE: Duration = Duration::from_secs(30);

/// Controls the simulation.
pub struct SimulationController {
    exchange: Arc<Exchange>,
    quotes: Arc<RateTableProvider>,
    cache: Arc<InMemoryOfferCache>,
    /// Number of clients.
    client_count: usize,
    /// Simulation speed multiplier.
    speed: f64,
    /// Random number generator.
    rng: Arc<Mutex<StdRng>>,
    /// Simulated clients.
    clients: Arc<RwLock<Vec<SimulatedClient>>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
    /// Transactions posted so far.
    posted: Arc<RwLock<Vec<TxId>>>,
    /// Running flag.
    running: Arc<RwLock<bool>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(
        exchange: Arc<Exchange>,
        quotes: Arc<RateTableProvider>,
        cache: Arc<InMemoryOfferCache>,
        client_count: usize,
        speed: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            exchange,
            quotes,
            cache,
            client_count,
            speed,
            rng: Arc::new(Mutex::new(rng)),
            clients: Arc::new(RwLock::new(Vec::new())),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
            posted: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Seed rates, then onboard and fund every client.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(clients = self.client_count, "Initializing simulation");

        seed_rates(&self.quotes);

        let clients = ClientFactory::create_clients(self.client_count);
        let funding = [
            (Currency::usd(), Decimal::new(1_000_000, 2)),
            (Currency::eur(), Decimal::new(100_000, 2)),
            (Currency::gbp(), Decimal::new(100_000, 2)),
        ];
        for client in &clients {
            client.onboard(&self.exchange, &funding).await?;
            info!(client = %client.name, client_id = %client.id, "Client onboarded");
        }

        *self.clients.write().await = clients;

        Ok(())
    }

    /// Run a scenario.
    pub async fn run_scenario(&self, scenario: Scenario) -> anyhow::Result<()> {
        info!(scenario = %scenario.name, "{}", scenario.description);

        *self.running.write().await = true;

        for step in &scenario.steps {
            if !*self.running.read().await {
                break;
            }

            self.execute_step(step).await?;
        }

        *self.running.write().await = false;

        Ok(())
    }

    /// Run random exchanges until the duration passes or Ctrl+C.
    pub async fn run(&self, duration: Option<Duration>) -> anyhow::Result<()> {
        info!("Running simulation in continuous mode");

        *self.running.write().await = true;

        let exchange = self.exchange.clone();
        let clients = self.clients.read().await.clone();
        let metrics = self.metrics.clone();
        let posted = self.posted.clone();
        let rng = self.rng.clone();
        let running = self.running.clone();
        let speed = self.speed;

        let handle = tokio::spawn(async move {
            let fiat = [Currency::usd(), Currency::eur(), Currency::gbp()];

            while *running.read().await {
                if clients.is_empty() {
                    break;
                }

                let (client, from, to, amount) = {
                    let mut rng = rng.lock().await;
                    let client = &clients[rng.gen_range(0..clients.len())];
                    let from = rng.gen_range(0..fiat.len());
                    let mut to = rng.gen_range(0..fiat.len());
                    while to == from {
                        to = rng.gen_range(0..fiat.len());
                    }
                    let cents: i64 = rng.gen_range(100..50_000);
                    (client.clone(), fiat[from], fiat[to], Decimal::new(cents, 2))
                };

                let request = OfferRequest::fiat(client.id, from, to, amount);
                let started = Instant::now();
                let outcome = match exchange.create_offer(&request).await {
                    Ok(ticket) => exchange.redeem(client.id, &ticket.token).await,
                    Err(e) => Err(e),
                };

                match outcome {
                    Ok(receipt) => {
                        metrics.write().await.record_settled(elapsed_ms(started));
                        posted.write().await.push(receipt.tx_id);
                    }
                    Err(e) => {
                        warn!(client = %client.name, error = %e, "Exchange failed");
                        metrics.write().await.record_error(&e);
                    }
                }

                let delay = Duration::from_millis((1000.0 / speed) as u64);
                tokio::time::sleep(delay).await;
            }
        });

        match duration {
            Some(d) => {
                tokio::time::sleep(d).await;
            }
            None => {
                tokio::signal::ctrl_c().await?;
            }
        }

        *self.running.write().await = false;
        handle.await?;

        Ok(())
    }

    /// Execute a single scenario step.
    async fn execute_step(&self, step: &ScenarioStep) -> anyhow::Result<()> {
        match step {
            ScenarioStep::Wait { seconds } => {
                let adjusted = (*seconds as f64 / self.speed) as u64;
                info!(seconds, adjusted, "Waiting");
                tokio::time::sleep(Duration::from_secs(adjusted)).await;
            }
            ScenarioStep::Deposit {
                client,
                amount,
                currency,
            } => {
                let client = self.client(client).await?;
                let receipt = self
                    .exchange
                    .deposit(client.id, parse_currency(currency)?, parse_amount(amount)?)
                    .await
                    .with_context(|| format!("deposit for {}", client.name))?;
                self.posted.write().await.push(receipt.tx_id);
                info!(client = %client.name, amount = %amount, currency = %currency, "Deposited");
            }
            ScenarioStep::Exchange {
                client,
                amount,
                from,
                to,
            } => {
                let client = self.client(client).await?;
                let request = fiat_request(client.id, amount, from, to)?;
                let started = Instant::now();
                let outcome = match self.exchange.create_offer(&request).await {
                    Ok(ticket) => self.exchange.redeem(client.id, &ticket.token).await,
                    Err(e) => Err(e),
                };
                self.record(&client, outcome, started).await;
            }
            ScenarioStep::RedemptionRace {
                client,
                amount,
                from,
                to,
                attempts,
            } => {
                let client = self.client(client).await?;
                let ticket = self.offer(&fiat_request(client.id, amount, from, to)?).await?;

                let outcomes = self
                    .redeem_all(client.id, vec![ticket.token; *attempts])
                    .await?;
                let settled = outcomes.iter().filter(|(r, _)| r.is_ok()).count();
                for (outcome, started) in outcomes {
                    self.record(&client, outcome, started).await;
                }

                info!(client = %client.name, attempts, settled, "Redemption race finished");
                if settled != 1 {
                    bail!("{} redemptions of one offer settled", settled);
                }
            }
            ScenarioStep::OpposingExchanges {
                client,
                amount,
                first,
                second,
                pairs,
            } => {
                let client = self.client(client).await?;
                let mut tokens = Vec::with_capacity(pairs * 2);
                for _ in 0..*pairs {
                    tokens.push(self.offer(&fiat_request(client.id, amount, first, second)?).await?.token);
                    tokens.push(self.offer(&fiat_request(client.id, amount, second, first)?).await?.token);
                }

                let outcomes = self.redeem_all(client.id, tokens).await?;
                let settled = outcomes.iter().filter(|(r, _)| r.is_ok()).count();
                for (outcome, started) in outcomes {
                    self.record(&client, outcome, started).await;
                }
                info!(client = %client.name, pairs, settled, "Opposing exchanges finished");
            }
            ScenarioStep::Expiry {
                client,
                amount,
                from,
                to,
            } => {
                let client = self.client(client).await?;
                let ticket = self.offer(&fiat_request(client.id, amount, from, to)?).await?;
                let ttl = self.exchange.config().offers.fiat_ttl;

                info!(client = %client.name, ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX), "Waiting out offer");
                tokio::time::sleep(ttl + Duration::from_millis(500)).await;

                match self.exchange.redeem(client.id, &ticket.token).await {
                    Err(ExchangeError::NotFoundOrExpired) => {
                        self.metrics
                            .write()
                            .await
                            .record_error(&ExchangeError::NotFoundOrExpired);
                        info!(client = %client.name, "Expired offer refused");
                    }
                    Ok(receipt) => bail!("expired offer settled as {}", receipt.tx_id),
                    Err(e) => bail!("expired offer failed with {}", e),
                }
            }
            ScenarioStep::PaginationWalk { client, page_size } => {
                let client = self.client(client).await?;
                let mut cursor: Option<String> = None;
                let mut pages = 0;
                let mut seen = Vec::new();

                loop {
                    let page = self
                        .exchange
                        .list_accounts(client.id, cursor.as_deref(), *page_size)
                        .await
                        .context("listing accounts")?;
                    pages += 1;
                    seen.extend(page.items.iter().map(|account| account.currency));

                    if let Some(link) = page.next_page_link("/accounts") {
                        info!(client = %client.name, page = pages, next = %link, "Account page");
                    }
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }

                info!(client = %client.name, pages, accounts = seen.len(), "Pagination walk finished");
                let mut expected = client.currencies.clone();
                expected.sort();
                if seen != expected {
                    bail!("walked {:?}, expected {:?}", seen, expected);
                }
            }
            ScenarioStep::InjectFault { fault } => {
                info!(fault = ?fault, "Injecting fault");
                match fault {
                    FaultType::QuoteOutage => self.quotes.set_available(false),
                    FaultType::QuoteLatency { delay_ms } => {
                        self.quotes.set_latency(Duration::from_millis(*delay_ms))
                    }
                    FaultType::CacheOutage => self.cache.set_available(false),
                }
            }
            ScenarioStep::ClearFaults => {
                info!("Clearing faults");
                self.quotes.set_available(true);
                self.quotes.set_latency(Duration::ZERO);
                self.cache.set_available(true);
            }
            ScenarioStep::Assert { condition } => self.check(condition).await?,
        }

        Ok(())
    }

    async fn check(&self, condition: &AssertCondition) -> anyhow::Result<()> {
        match condition {
            AssertCondition::BalanceEquals {
                client,
                currency,
                amount,
            } => {
                let client = self.client(client).await?;
                let expected = parse_amount(amount)?;
                let actual = client.balance(&self.exchange, parse_currency(currency)?).await;
                if actual != expected {
                    bail!(
                        "{} {} balance is {}, expected {}",
                        client.name,
                        currency,
                        actual,
                        expected
                    );
                }
                info!(client = %client.name, currency = %currency, balance = %actual, "Balance verified");
            }
            AssertCondition::LedgerConsistent => {
                let posted = self.posted.read().await.clone();
                for tx_id in &posted {
                    self.exchange
                        .verify_transaction(*tx_id)
                        .await
                        .with_context(|| format!("verifying {}", tx_id))?;
                }
                info!(transactions = posted.len(), "Ledger verified");
            }
        }
        Ok(())
    }

    async fn client(&self, name: &str) -> anyhow::Result<SimulatedClient> {
        self.clients
            .read()
            .await
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .with_context(|| format!("unknown client {}", name))
    }

    async fn offer(&self, request: &OfferRequest) -> anyhow::Result<OfferTicket> {
        self.exchange
            .create_offer(request)
            .await
            .with_context(|| format!("offer {} -> {}", request.source, request.destination))
    }

    /// Redeem every token from its own task.
    async fn redeem_all(
        &self,
        client_id: ClientId,
        tokens: Vec<String>,
    ) -> anyhow::Result<Vec<(Result<Receipt, ExchangeError>, Instant)>> {
        let tasks = tokens.into_iter().map(|token| {
            let exchange = self.exchange.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                (exchange.redeem(client_id, &token).await, started)
            })
        });

        let joined = tokio::time::timeout(BATCH_DEADLINE, join_all(tasks))
            .await
            .context("concurrent redemptions did not finish")?;

        joined
            .into_iter()
            .map(|r| r.context("redemption task panicked"))
            .collect()
    }

    async fn record(
        &self,
        client: &SimulatedClient,
        outcome: Result<Receipt, ExchangeError>,
        started: Instant,
    ) {
        match outcome {
            Ok(receipt) => {
                info!(client = %client.name, tx_id = %receipt.tx_id, kind = %receipt.kind, "Settled");
                self.posted.write().await.push(receipt.tx_id);
                self.metrics.write().await.record_settled(elapsed_ms(started));
            }
            Err(e) => {
                warn!(
                    client = %client.name,
                    code = e.error_code(),
                    message = %e.client_message(),
                    "Request failed"
                );
                self.metrics.write().await.record_error(&e);
            }
        }
    }

    /// Get simulation metrics.
    pub async fn metrics(&self) -> SimulationMetrics {
        self.metrics.read().await.clone()
    }
}

/// Mid-market rates the simulated provider quotes from.
pub fn seed_rates(quotes: &RateTableProvider) {
    let rates = [
        (Currency::usd(), Currency::eur(), Decimal::new(92, 2)),
        (Currency::usd(), Currency::gbp(), Decimal::new(79, 2)),
        (Currency::usd(), Currency::cad(), Decimal::new(135, 2)),
        (Currency::eur(), Currency::gbp(), Decimal::new(86, 2)),
        (Currency::btc(), Currency::usd(), Decimal::new(25_000, 0)),
    ];
    for (base, quote, rate) in rates {
        quotes.set_rate(base, quote, rate);
    }
}

fn fiat_request(client_id: ClientId, amount: &str, from: &str, to: &str) -> anyhow::Result<OfferRequest> {
    Ok(OfferRequest::fiat(
        client_id,
        parse_currency(from)?,
        parse_currency(to)?,
        parse_amount(amount)?,
    ))
}

fn parse_amount(amount: &str) -> anyhow::Result<Decimal> {
    Decimal::from_str(amount).with_context(|| format!("invalid amount {}", amount))
}

fn parse_currency(code: &str) -> anyhow::Result<Currency> {
    Ok(Currency::parse(code)?)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
