//! Core ledger engine implementation.

use std::sync::Arc;
use std::time::Duration;

use exchequer_common::time::{constants, DurationExt};
use exchequer_common::{SettlementKind, TxId};
use tracing::{debug, info, instrument, warn};

use crate::balance::BalanceChange;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{check_consistency, JournalBatch, JournalEntry};
use crate::locking::lock_order;
use crate::store::{LedgerStore, LedgerTransaction};

/// Outcome of a committed posting.
#[derive(Debug, Clone)]
pub struct Posting {
    pub tx_id: TxId,
    pub kind: SettlementKind,
    pub entries: Vec<JournalEntry>,
    pub changes: Vec<BalanceChange>,
}

/// Posts journal batches atomically against a [`LedgerStore`].
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    deadline: Duration,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            deadline: constants::ledger_timeout().as_std(),
        }
    }

    /// Bound on a whole posting, lock waits included.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Post one settlement in a single store transaction.
    ///
    /// Accounts are locked in canonical order, every debit is checked against
    /// the balance read under its lock, then balances and journal rows are
    /// written and committed. On any error, or when the deadline passes,
    /// nothing is applied.
    #[instrument(skip(self, batch), fields(tx_id = %batch.tx_id, kind = %batch.kind))]
    pub async fn post(&self, batch: JournalBatch) -> LedgerResult<Posting> {
        batch
            .check()
            .map_err(|e| LedgerError::Inconsistent(e.to_string()))?;

        let changes = tokio::time::timeout(self.deadline, self.apply(&batch))
            .await
            .map_err(|_| {
                warn!(tx_id = %batch.tx_id, "Ledger deadline exceeded, posting abandoned");
                LedgerError::Timeout
            })??;

        info!(
            tx_id = %batch.tx_id,
            kind = %batch.kind,
            rows = batch.entries.len(),
            "Settlement posted"
        );

        Ok(Posting {
            tx_id: batch.tx_id,
            kind: batch.kind,
            entries: batch.entries,
            changes,
        })
    }

    async fn apply(&self, batch: &JournalBatch) -> LedgerResult<Vec<BalanceChange>> {
        let mut tx = self.store.begin().await?;

        match Self::write(tx.as_mut(), batch).await {
            Ok(changes) => {
                tx.commit().await?;
                Ok(changes)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn write(
        tx: &mut dyn LedgerTransaction,
        batch: &JournalBatch,
    ) -> LedgerResult<Vec<BalanceChange>> {
        let deltas = batch.deltas();
        let at = batch
            .entries
            .first()
            .map(|e| e.transacted_at)
            .unwrap_or_else(chrono::Utc::now);

        let mut changes = Vec::new();
        for key in lock_order(deltas.keys().copied()) {
            let account = tx.lock_account(&key).await?;
            let delta = deltas.get(&key).copied().unwrap_or_default();
            let change = BalanceChange::compute(key, account.balance, delta)?;
            debug!(
                account = %key,
                before = %change.balance_before,
                after = %change.balance_after,
                "Account locked"
            );
            changes.push(change);
        }

        for change in &changes {
            tx.update_balance(change, at).await?;
        }
        tx.insert_entries(&batch.entries).await?;

        Ok(changes)
    }

    /// Re-read one transaction and check it against the settlement rules.
    pub async fn verify_transaction(&self, tx_id: TxId) -> LedgerResult<SettlementKind> {
        let entries = self.store.journal_for_tx(tx_id).await?;
        check_consistency(&entries).map_err(|e| {
            warn!(tx_id = %tx_id, error = %e, "Journal integrity check failed");
            LedgerError::Inconsistent(e.to_string())
        })
    }
}
