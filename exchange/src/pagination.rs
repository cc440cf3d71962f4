//! Cursor-paginated reads of accounts and journal rows.
//!
//! Every query asks the store for one row more than the page holds. When that
//! extra row comes back, its sort key becomes the next cursor and the row is
//! dropped from the page.

use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use exchequer_common::time::month_bounds;
use exchequer_common::{AccountKey, ClientId, Currency, ExchangeError, ExchangeResult};
use exchequer_crypto::{TokenCodec, TokenKind};
use exchequer_ledger::{Account, JournalEntry, JournalKey, JournalWindow, LedgerStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::config::PaginationConfig;
use crate::errors::ledger_read;

const CURSOR_FIELD: &str = "pageCursor";
const CURSOR_MESSAGE: &str = "invalid page cursor or page size";

/// One page of results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Token for the following page, absent on the last page.
    pub next_cursor: Option<String>,
    /// Effective page size after defaults and clamping.
    pub page_size: usize,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }

    /// Query string link to the next page under `path`.
    pub fn next_page_link(&self, path: &str) -> Option<String> {
        self.next_cursor
            .as_ref()
            .map(|cursor| format!("{}?pageCursor={}&pageSize={}", path, cursor, self.page_size))
    }
}

/// Filter for a journal listing.
///
/// A cursor continues an earlier listing and takes precedence over the month
/// fields. Without a cursor both `year` and `month` are required.
#[derive(Debug, Clone, Default)]
pub struct JournalQuery {
    pub cursor: Option<String>,
    pub year: Option<i32>,
    pub month: Option<u32>,
    /// Seconds east of UTC the month boundaries are taken at.
    pub utc_offset_secs: Option<i32>,
}

impl JournalQuery {
    pub fn month(year: i32, month: u32) -> Self {
        Self {
            year: Some(year),
            month: Some(month),
            ..Self::default()
        }
    }

    pub fn continue_from(cursor: impl Into<String>) -> Self {
        Self {
            cursor: Some(cursor.into()),
            ..Self::default()
        }
    }

    pub fn with_offset(mut self, secs: i32) -> Self {
        self.utc_offset_secs = Some(secs);
        self
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountCursor {
    from: Currency,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalCursor {
    window: JournalWindow,
    from: JournalKey,
}

/// Reads ledger pages on behalf of clients.
pub struct LedgerReader {
    store: Arc<dyn LedgerStore>,
    codec: Arc<TokenCodec>,
    config: PaginationConfig,
    deadline: Duration,
}

impl LedgerReader {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        codec: Arc<TokenCodec>,
        config: PaginationConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            codec,
            config,
            deadline,
        }
    }

    /// A client's accounts ordered by currency code.
    pub async fn list_accounts(
        &self,
        client_id: ClientId,
        cursor: Option<&str>,
        page_size: i64,
    ) -> ExchangeResult<Page<Account>> {
        let size = self.page_size(page_size);
        let start = match cursor {
            Some(token) => Some(self.open_cursor::<AccountCursor>(token)?.from),
            None => None,
        };

        let rows = ledger_read(
            self.deadline,
            self.store.accounts_page(client_id, start, size + 1),
        )
        .await?;
        let (items, next) = split_page(rows, size);

        let next_cursor = match next {
            Some(account) => Some(self.seal_cursor(&AccountCursor {
                from: account.currency,
            })?),
            None => None,
        };

        debug!(client_id = %client_id, rows = items.len(), more = next_cursor.is_some(), "Accounts page read");
        Ok(Page {
            items,
            next_cursor,
            page_size: size,
        })
    }

    /// Journal rows of one account, ordered by posting time.
    pub async fn list_journal(
        &self,
        client_id: ClientId,
        currency: Currency,
        query: &JournalQuery,
        page_size: i64,
    ) -> ExchangeResult<Page<JournalEntry>> {
        let size = self.page_size(page_size);
        let (window, from) = match &query.cursor {
            Some(token) => {
                let cursor = self.open_cursor::<JournalCursor>(token)?;
                (cursor.window, Some(cursor.from))
            }
            None => (self.month_window(query)?, None),
        };

        let key = AccountKey::new(client_id, currency);
        let rows = ledger_read(
            self.deadline,
            self.store.journal_page(key, window, from, size + 1),
        )
        .await?;
        let (items, next) = split_page(rows, size);

        let next_cursor = match next {
            Some(entry) => Some(self.seal_cursor(&JournalCursor {
                window,
                from: JournalKey::of(&entry),
            })?),
            None => None,
        };

        debug!(account = %key, rows = items.len(), more = next_cursor.is_some(), "Journal page read");
        Ok(Page {
            items,
            next_cursor,
            page_size: size,
        })
    }

    fn page_size(&self, requested: i64) -> usize {
        if requested < 1 {
            self.config.default_page_size
        } else {
            usize::try_from(requested)
                .unwrap_or(usize::MAX)
                .min(self.config.max_page_size)
        }
    }

    fn month_window(&self, query: &JournalQuery) -> ExchangeResult<JournalWindow> {
        let (year, month) = match (query.year, query.month) {
            (Some(year), Some(month)) => (year, month),
            _ => {
                return Err(ExchangeError::invalid(
                    "month",
                    "a page cursor or both year and month are required",
                ))
            }
        };

        let offset = match query.utc_offset_secs {
            Some(secs) => FixedOffset::east_opt(secs)
                .ok_or_else(|| ExchangeError::invalid("offset", "UTC offset out of range"))?,
            None => self.config.default_utc_offset,
        };

        let (start, end) = month_bounds(year, month, offset)
            .ok_or_else(|| ExchangeError::invalid("month", "invalid year or month"))?;
        Ok(JournalWindow::new(start, end))
    }

    fn open_cursor<C: DeserializeOwned>(&self, token: &str) -> ExchangeResult<C> {
        let bytes = self
            .codec
            .open(TokenKind::Cursor, token)
            .map_err(|_| ExchangeError::invalid(CURSOR_FIELD, CURSOR_MESSAGE))?;
        serde_json::from_slice(&bytes).map_err(|_| ExchangeError::invalid(CURSOR_FIELD, CURSOR_MESSAGE))
    }

    fn seal_cursor<C: Serialize>(&self, cursor: &C) -> ExchangeResult<String> {
        let bytes = serde_json::to_vec(cursor)
            .map_err(|e| ExchangeError::Transient(format!("cursor encoding failed: {}", e)))?;
        self.codec.seal(TokenKind::Cursor, &bytes).map_err(|e| {
            error!(error = %e, "Cursor encryption failed");
            ExchangeError::Transient(e.to_string())
        })
    }
}

fn split_page<T>(mut rows: Vec<T>, size: usize) -> (Vec<T>, Option<T>) {
    if rows.len() > size {
        rows.truncate(size + 1);
        let next = rows.pop();
        (rows, next)
    } else {
        (rows, None)
    }
}
