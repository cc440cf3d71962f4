//! PostgreSQL ledger store.
//!
//! Row locks are `SELECT ... FOR NO KEY UPDATE` inside the transaction, so a
//! balance is always read under the lock that guards its update. Each
//! transaction sets `lock_timeout`, which turns a long wait into
//! [`LedgerError::LockTimeout`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exchequer_common::time::{constants, DurationExt};
use exchequer_common::{AccountKey, ClientId, Currency, TxId};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info};
use uuid::Uuid;

use crate::account::Account;
use crate::balance::BalanceChange;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::JournalEntry;
use crate::store::{JournalKey, JournalWindow, LedgerStore, LedgerTransaction};

/// DDL for the `accounts` and `journal` tables.
pub const SCHEMA: &str = include_str!("../sql/schema.sql");

const UNIQUE_VIOLATION: &str = "23505";
const LOCK_NOT_AVAILABLE: &str = "55P03";

const ACCOUNT_COLUMNS: &str =
    "client_id, currency, balance, last_tx_amount, last_tx_at, created_at";

/// [`LedgerStore`] backed by PostgreSQL.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    lock_wait: Duration,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_wait: constants::lock_wait_timeout().as_std(),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tables if they do not exist.
    pub async fn migrate(&self) -> LedgerResult<()> {
        for statement in SCHEMA.split(';').filter(|s| has_sql(s)) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("Ledger schema ready");
        Ok(())
    }
}

fn has_sql(chunk: &str) -> bool {
    chunk
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with("--"))
}

fn db_code(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned())
}

fn lock_error(key: AccountKey) -> impl FnOnce(sqlx::Error) -> LedgerError {
    move |err| match db_code(&err).as_deref() {
        Some(LOCK_NOT_AVAILABLE) => LedgerError::LockTimeout(key),
        _ => LedgerError::from(err),
    }
}

fn parse_currency(code: &str) -> LedgerResult<Currency> {
    Currency::parse(code).map_err(|e| LedgerError::Decode(e.to_string()))
}

/// Present a stored NUMERIC at its currency's scale.
fn at_scale(mut value: Decimal, currency: Currency) -> Decimal {
    value.rescale(currency.decimal_places());
    value
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    client_id: Uuid,
    currency: String,
    balance: Decimal,
    last_tx_amount: Decimal,
    last_tx_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_account(self) -> LedgerResult<Account> {
        let currency = parse_currency(&self.currency)?;
        Ok(Account {
            client_id: ClientId::from_uuid(self.client_id),
            currency,
            balance: at_scale(self.balance, currency),
            last_tx_amount: at_scale(self.last_tx_amount, currency),
            last_tx_at: self.last_tx_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct JournalRow {
    tx_id: Uuid,
    client_id: Uuid,
    currency: String,
    amount: Decimal,
    transacted_at: DateTime<Utc>,
}

impl JournalRow {
    fn into_entry(self) -> LedgerResult<JournalEntry> {
        let currency = parse_currency(&self.currency)?;
        Ok(JournalEntry {
            tx_id: TxId::from_uuid(self.tx_id),
            client_id: ClientId::from_uuid(self.client_id),
            currency,
            amount: at_scale(self.amount, currency),
            transacted_at: self.transacted_at,
        })
    }
}

fn into_entries(rows: Vec<JournalRow>) -> LedgerResult<Vec<JournalEntry>> {
    rows.into_iter().map(JournalRow::into_entry).collect()
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>> {
        let mut tx = self.pool.begin().await?;

        let statement = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_wait.as_millis()
        );
        sqlx::query(&statement).execute(&mut *tx).await?;

        Ok(Box::new(PostgresTransaction { tx: Some(tx) }))
    }

    async fn create_account(&self, key: AccountKey) -> LedgerResult<Account> {
        let statement = format!(
            "INSERT INTO accounts (client_id, currency) VALUES ($1, $2) RETURNING {}",
            ACCOUNT_COLUMNS
        );
        let row: AccountRow = sqlx::query_as(&statement)
            .bind(*key.client_id.as_uuid())
            .bind(key.currency.code())
            .fetch_one(&self.pool)
            .await
            .map_err(|err| match db_code(&err).as_deref() {
                Some(UNIQUE_VIOLATION) => LedgerError::AccountExists(key),
                _ => LedgerError::from(err),
            })?;

        debug!(account = %key, "Account opened");
        row.into_account()
    }

    async fn account(&self, key: &AccountKey) -> LedgerResult<Option<Account>> {
        let statement = format!(
            "SELECT {} FROM accounts WHERE client_id = $1 AND currency = $2",
            ACCOUNT_COLUMNS
        );
        let row: Option<AccountRow> = sqlx::query_as(&statement)
            .bind(*key.client_id.as_uuid())
            .bind(key.currency.code())
            .fetch_optional(&self.pool)
            .await?;

        row.map(AccountRow::into_account).transpose()
    }

    async fn accounts_page(
        &self,
        client_id: ClientId,
        start: Option<Currency>,
        limit: usize,
    ) -> LedgerResult<Vec<Account>> {
        let statement = format!(
            r#"
            SELECT {} FROM accounts
            WHERE client_id = $1
              AND ($2::text IS NULL OR currency COLLATE "C" >= $2)
            ORDER BY currency COLLATE "C"
            LIMIT $3
            "#,
            ACCOUNT_COLUMNS
        );
        let rows: Vec<AccountRow> = sqlx::query_as(&statement)
            .bind(*client_id.as_uuid())
            .bind(start.map(|c| c.code()))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(AccountRow::into_account).collect()
    }

    async fn journal_page(
        &self,
        key: AccountKey,
        window: JournalWindow,
        from: Option<JournalKey>,
        limit: usize,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let rows: Vec<JournalRow> = sqlx::query_as(
            r#"
            SELECT tx_id, client_id, currency, amount, transacted_at FROM journal
            WHERE client_id = $1 AND currency = $2
              AND transacted_at >= $3 AND transacted_at < $4
              AND ($5::timestamptz IS NULL
                   OR (transacted_at, tx_id) >= ($5::timestamptz, $6::uuid))
            ORDER BY transacted_at, tx_id
            LIMIT $7
            "#,
        )
        .bind(*key.client_id.as_uuid())
        .bind(key.currency.code())
        .bind(window.start)
        .bind(window.end)
        .bind(from.map(|f| f.transacted_at))
        .bind(from.map(|f| *f.tx_id.as_uuid()))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }

    async fn journal_for_tx(&self, tx_id: TxId) -> LedgerResult<Vec<JournalEntry>> {
        let rows: Vec<JournalRow> = sqlx::query_as(
            r#"
            SELECT tx_id, client_id, currency, amount, transacted_at FROM journal
            WHERE tx_id = $1
            ORDER BY amount
            "#,
        )
        .bind(*tx_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        into_entries(rows)
    }
}

/// Transaction over a [`PostgresLedger`].
///
/// Dropping it without commit rolls the database transaction back.
pub struct PostgresTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn tx(&mut self) -> LedgerResult<&mut Transaction<'static, Postgres>> {
        self.tx.as_mut().ok_or(LedgerError::TransactionClosed)
    }
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn lock_account(&mut self, key: &AccountKey) -> LedgerResult<Account> {
        let statement = format!(
            "SELECT {} FROM accounts WHERE client_id = $1 AND currency = $2 FOR NO KEY UPDATE",
            ACCOUNT_COLUMNS
        );
        let tx = self.tx()?;
        let row: Option<AccountRow> = sqlx::query_as(&statement)
            .bind(*key.client_id.as_uuid())
            .bind(key.currency.code())
            .fetch_optional(&mut **tx)
            .await
            .map_err(lock_error(*key))?;

        row.ok_or(LedgerError::AccountNotFound(*key))?
            .into_account()
    }

    async fn update_balance(
        &mut self,
        change: &BalanceChange,
        at: DateTime<Utc>,
    ) -> LedgerResult<Account> {
        let key = &change.key;
        let statement = format!(
            r#"
            UPDATE accounts
            SET balance = $3, last_tx_amount = $4, last_tx_at = $5
            WHERE client_id = $1 AND currency = $2
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        );
        let tx = self.tx()?;
        let row: Option<AccountRow> = sqlx::query_as(&statement)
            .bind(*key.client_id.as_uuid())
            .bind(key.currency.code())
            .bind(change.balance_after)
            .bind(change.delta)
            .bind(at)
            .fetch_optional(&mut **tx)
            .await
            .map_err(lock_error(*key))?;

        row.ok_or(LedgerError::AccountNotFound(*key))?
            .into_account()
    }

    async fn insert_entries(&mut self, entries: &[JournalEntry]) -> LedgerResult<()> {
        let tx = self.tx()?;
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO journal (tx_id, client_id, currency, amount, transacted_at)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(*entry.tx_id.as_uuid())
            .bind(*entry.client_id.as_uuid())
            .bind(entry.currency.code())
            .bind(entry.amount)
            .bind(entry.transacted_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn commit(&mut self) -> LedgerResult<()> {
        let tx = self.tx.take().ok_or(LedgerError::TransactionClosed)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> LedgerResult<()> {
        let tx = self.tx.take().ok_or(LedgerError::TransactionClosed)?;
        tx.rollback().await?;
        Ok(())
    }
}
