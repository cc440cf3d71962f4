//! In-process ledger store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use exchequer_common::time::{constants, DurationExt};
use exchequer_common::{AccountKey, ClientId, Currency, TxId};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::account::Account;
use crate::balance::BalanceChange;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::JournalEntry;
use crate::store::{JournalKey, JournalWindow, LedgerStore, LedgerTransaction};

/// One account row: a row lock plus the committed state.
///
/// Readers outside a transaction read `state` without taking the row lock.
struct AccountRow {
    lock: Arc<Mutex<()>>,
    state: RwLock<Account>,
}

struct Inner {
    accounts: DashMap<AccountKey, Arc<AccountRow>>,
    journal: RwLock<Vec<JournalEntry>>,
    lock_wait: Duration,
}

/// [`LedgerStore`] kept entirely in memory.
///
/// Row locks are tokio mutexes held by the transaction until commit or drop;
/// a lock that cannot be taken within the lock wait fails with `LockTimeout`.
#[derive(Clone)]
pub struct InMemoryLedger {
    inner: Arc<Inner>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_lock_wait(constants::lock_wait_timeout().as_std())
    }

    pub fn with_lock_wait(lock_wait: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                accounts: DashMap::new(),
                journal: RwLock::new(Vec::new()),
                lock_wait,
            }),
        }
    }

    /// Number of journal rows committed so far.
    pub fn journal_len(&self) -> usize {
        self.inner.journal.read().len()
    }

    /// Sum of committed balances per currency across every client.
    pub fn total_balance(&self, currency: Currency) -> Decimal {
        self.inner
            .accounts
            .iter()
            .filter(|row| row.key().currency == currency)
            .map(|row| row.value().state.read().balance)
            .sum()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryTransaction {
            inner: self.inner.clone(),
            locked: BTreeMap::new(),
            pending: Vec::new(),
            open: true,
        }))
    }

    async fn create_account(&self, key: AccountKey) -> LedgerResult<Account> {
        match self.inner.accounts.entry(key) {
            Entry::Occupied(_) => Err(LedgerError::AccountExists(key)),
            Entry::Vacant(slot) => {
                let account = Account::open(key);
                slot.insert(Arc::new(AccountRow {
                    lock: Arc::new(Mutex::new(())),
                    state: RwLock::new(account.clone()),
                }));
                debug!(account = %key, "Account opened");
                Ok(account)
            }
        }
    }

    async fn account(&self, key: &AccountKey) -> LedgerResult<Option<Account>> {
        Ok(self
            .inner
            .accounts
            .get(key)
            .map(|row| row.value().state.read().clone()))
    }

    async fn accounts_page(
        &self,
        client_id: ClientId,
        start: Option<Currency>,
        limit: usize,
    ) -> LedgerResult<Vec<Account>> {
        let mut accounts: Vec<Account> = self
            .inner
            .accounts
            .iter()
            .filter(|row| row.key().client_id == client_id)
            .filter(|row| start.map_or(true, |start| row.key().currency >= start))
            .map(|row| row.value().state.read().clone())
            .collect();

        accounts.sort_by(|a, b| a.currency.cmp(&b.currency));
        accounts.truncate(limit);
        Ok(accounts)
    }

    async fn journal_page(
        &self,
        key: AccountKey,
        window: JournalWindow,
        from: Option<JournalKey>,
        limit: usize,
    ) -> LedgerResult<Vec<JournalEntry>> {
        let mut entries: Vec<JournalEntry> = self
            .inner
            .journal
            .read()
            .iter()
            .filter(|entry| entry.key() == key && window.contains(entry.transacted_at))
            .filter(|entry| from.map_or(true, |from| JournalKey::of(entry) >= from))
            .cloned()
            .collect();

        entries.sort_by_key(JournalKey::of);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn journal_for_tx(&self, tx_id: TxId) -> LedgerResult<Vec<JournalEntry>> {
        Ok(self
            .inner
            .journal
            .read()
            .iter()
            .filter(|entry| entry.tx_id == tx_id)
            .cloned()
            .collect())
    }
}

struct LockedRow {
    row: Arc<AccountRow>,
    _guard: OwnedMutexGuard<()>,
    working: Account,
}

/// Transaction over an [`InMemoryLedger`].
///
/// Changes are staged on working copies and applied on commit. Dropping the
/// transaction releases the row locks and discards the working copies.
pub struct InMemoryTransaction {
    inner: Arc<Inner>,
    locked: BTreeMap<AccountKey, LockedRow>,
    pending: Vec<JournalEntry>,
    open: bool,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> LedgerResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(LedgerError::TransactionClosed)
        }
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn lock_account(&mut self, key: &AccountKey) -> LedgerResult<Account> {
        self.ensure_open()?;
        if let Some(locked) = self.locked.get(key) {
            return Ok(locked.working.clone());
        }

        let row = self
            .inner
            .accounts
            .get(key)
            .map(|row| row.value().clone())
            .ok_or(LedgerError::AccountNotFound(*key))?;

        let guard = tokio::time::timeout(self.inner.lock_wait, row.lock.clone().lock_owned())
            .await
            .map_err(|_| LedgerError::LockTimeout(*key))?;

        let working = row.state.read().clone();
        self.locked.insert(
            *key,
            LockedRow {
                row,
                _guard: guard,
                working: working.clone(),
            },
        );
        Ok(working)
    }

    async fn update_balance(
        &mut self,
        change: &BalanceChange,
        at: DateTime<Utc>,
    ) -> LedgerResult<Account> {
        self.ensure_open()?;
        let locked = self
            .locked
            .get_mut(&change.key)
            .ok_or(LedgerError::AccountNotFound(change.key))?;

        locked.working.apply(change, at);
        Ok(locked.working.clone())
    }

    async fn insert_entries(&mut self, entries: &[JournalEntry]) -> LedgerResult<()> {
        self.ensure_open()?;
        self.pending.extend_from_slice(entries);
        Ok(())
    }

    async fn commit(&mut self) -> LedgerResult<()> {
        self.ensure_open()?;
        self.open = false;

        self.inner.journal.write().append(&mut self.pending);
        for locked in self.locked.values() {
            *locked.row.state.write() = locked.working.clone();
        }
        self.locked.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> LedgerResult<()> {
        self.ensure_open()?;
        self.open = false;
        self.pending.clear();
        self.locked.clear();
        Ok(())
    }
}
