//! Simulated exchange clients.

use anyhow::Context;
use rust_decimal::Decimal;

use exchequer_common::{ClientId, Currency};
use exchequer_exchange::Exchange;

/// A simulated client holding a fixed set of accounts.
#[derive(Debug, Clone)]
pub struct SimulatedClient {
    /// Ledger identity.
    pub id: ClientId,
    /// Label used in scenarios and logs.
    pub name: String,
    /// Currencies the client has accounts in.
    pub currencies: Vec<Currency>,
}

impl SimulatedClient {
    pub fn new(name: impl Into<String>, currencies: Vec<Currency>) -> Self {
        Self {
            id: ClientId::new(),
            name: name.into(),
            currencies,
        }
    }

    /// Open every account and deposit the opening balances.
    pub async fn onboard(&self, exchange: &Exchange, funding: &[(Currency, Decimal)]) -> anyhow::Result<()> {
        for currency in &self.currencies {
            exchange
                .open_account(self.id, *currency)
                .await
                .with_context(|| format!("opening {} account for {}", currency, self.name))?;
        }

        for (currency, amount) in funding {
            if !self.currencies.contains(currency) || amount.is_zero() {
                continue;
            }
            exchange
                .deposit(self.id, *currency, *amount)
                .await
                .with_context(|| format!("funding {} {} for {}", amount, currency, self.name))?;
        }

        Ok(())
    }

    /// Current balance, zero when the account is missing.
    pub async fn balance(&self, exchange: &Exchange, currency: Currency) -> Decimal {
        exchange
            .balance(self.id, currency)
            .await
            .map(|account| account.balance)
            .unwrap_or(Decimal::ZERO)
    }
}

/// Client factory for creating test clients.
pub struct ClientFactory;

impl ClientFactory {
    /// Create N simulated clients, each with the standard account set.
    pub fn create_clients(count: usize) -> Vec<SimulatedClient> {
        let names = [
            "ALICE", "BOB", "CAROL", "DAVE", "ERIN", "FRANK", "GRACE", "HEIDI", "IVAN", "JUDY",
        ];

        (0..count)
            .map(|i| {
                let name = names
                    .get(i)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("CLIENT_{}", i + 1));
                SimulatedClient::new(name, Self::standard_currencies())
            })
            .collect()
    }

    /// Accounts every simulated client opens.
    pub fn standard_currencies() -> Vec<Currency> {
        vec![
            Currency::usd(),
            Currency::eur(),
            Currency::gbp(),
            Currency::cad(),
            Currency::btc(),
        ]
    }
}
