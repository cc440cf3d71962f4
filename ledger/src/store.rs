//! Ledger store capability.
//!
//! A store holds accounts and journal rows. Balance mutations go through a
//! [`LedgerTransaction`]: lock rows, read them, update them, insert the paired
//! journal rows, commit. Dropping a transaction without committing discards
//! all of its changes and releases its locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exchequer_common::{AccountKey, ClientId, Currency, TxId};
use serde::{Deserialize, Serialize};

use crate::account::Account;
use crate::balance::BalanceChange;
use crate::error::LedgerResult;
use crate::journal::JournalEntry;

/// Half-open `[start, end)` range of `transacted_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl JournalWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Sort key of a journal row; pages start at a key inclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JournalKey {
    pub transacted_at: DateTime<Utc>,
    pub tx_id: TxId,
}

impl JournalKey {
    pub fn of(entry: &JournalEntry) -> Self {
        Self {
            transacted_at: entry.transacted_at,
            tx_id: entry.tx_id,
        }
    }
}

/// Persistent home of accounts and journal rows.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Start a transaction.
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>>;

    /// Open a zero-balance account. Fails with `AccountExists` on a duplicate.
    async fn create_account(&self, key: AccountKey) -> LedgerResult<Account>;

    /// Read an account outside any transaction.
    async fn account(&self, key: &AccountKey) -> LedgerResult<Option<Account>>;

    /// A client's accounts ordered by currency code, starting at `start`
    /// inclusive.
    async fn accounts_page(
        &self,
        client_id: ClientId,
        start: Option<Currency>,
        limit: usize,
    ) -> LedgerResult<Vec<Account>>;

    /// Journal rows of one account inside `window`, ordered by
    /// `(transacted_at, tx_id)`, starting at `from` inclusive.
    async fn journal_page(
        &self,
        key: AccountKey,
        window: JournalWindow,
        from: Option<JournalKey>,
        limit: usize,
    ) -> LedgerResult<Vec<JournalEntry>>;

    /// Every row posted under `tx_id`.
    async fn journal_for_tx(&self, tx_id: TxId) -> LedgerResult<Vec<JournalEntry>>;
}

/// A unit of work against a [`LedgerStore`].
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Take the row lock on an account and read it under that lock.
    async fn lock_account(&mut self, key: &AccountKey) -> LedgerResult<Account>;

    /// Write a checked change to a locked account.
    async fn update_balance(
        &mut self,
        change: &BalanceChange,
        at: DateTime<Utc>,
    ) -> LedgerResult<Account>;

    /// Insert journal rows.
    async fn insert_entries(&mut self, entries: &[JournalEntry]) -> LedgerResult<()>;

    /// Make every change visible and release the locks.
    async fn commit(&mut self) -> LedgerResult<()>;

    /// Discard every change and release the locks.
    async fn rollback(&mut self) -> LedgerResult<()>;
}
