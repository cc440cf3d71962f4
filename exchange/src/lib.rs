//! Exchequer exchange service
//!
//! Prices currency conversions as short-lived offers, redeems them exactly
//! once against the double-entry ledger, and serves paginated reads of
//! accounts and journal rows.

pub mod config;
pub mod errors;
pub mod exchange;
pub mod metrics;
pub mod offers;
pub mod pagination;
pub mod settlement;

pub use config::{ExchangeConfig, OfferConfig, PaginationConfig, TimeoutConfig, MAX_OFFER_TTL};
pub use errors::{SetupError, FUNDS_MESSAGE};
pub use exchange::Exchange;
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use offers::{OfferGenerator, OfferRequest, OfferTicket};
pub use pagination::{JournalQuery, LedgerReader, Page};
pub use settlement::{Receipt, SettlementEngine};
