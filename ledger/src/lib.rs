//! Exchequer Ledger
//!
//! Double-entry ledger for settlements: accounts keyed by (client, currency),
//! an append-only journal, and a posting engine that locks rows in canonical
//! order and commits balances and journal rows in one transaction.

pub mod account;
pub mod balance;
pub mod engine;
pub mod error;
pub mod journal;
pub mod locking;
pub mod memory;
pub mod postgres;
pub mod store;

pub use account::Account;
pub use balance::BalanceChange;
pub use engine::{LedgerEngine, Posting};
pub use error::{LedgerError, LedgerResult};
pub use journal::{check_consistency, ConsistencyError, JournalBatch, JournalEntry};
pub use locking::lock_order;
pub use memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use store::{JournalKey, JournalWindow, LedgerStore, LedgerTransaction};
