//! Account definitions for the ledger.

use chrono::{DateTime, Utc};
use exchequer_common::{AccountKey, ClientId, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::balance::BalanceChange;

/// Balance row for one (client, currency).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Owning client.
    pub client_id: ClientId,
    /// Account currency.
    pub currency: Currency,
    /// Current balance.
    pub balance: Decimal,
    /// Signed amount of the most recent posting.
    pub last_tx_amount: Decimal,
    /// When the most recent posting happened.
    pub last_tx_at: Option<DateTime<Utc>>,
    /// When the account was opened.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open an empty account.
    pub fn open(key: AccountKey) -> Self {
        Self {
            client_id: key.client_id,
            currency: key.currency,
            balance: Decimal::ZERO,
            last_tx_amount: Decimal::ZERO,
            last_tx_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> AccountKey {
        AccountKey::new(self.client_id, self.currency)
    }

    /// Record a posting whose resulting balance was already checked.
    pub fn apply(&mut self, change: &BalanceChange, at: DateTime<Utc>) {
        self.balance = change.balance_after;
        self.last_tx_amount = change.delta;
        self.last_tx_at = Some(at);
    }
}
