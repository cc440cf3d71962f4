//! Exchequer Quotes and Offers
//!
//! Everything an offer needs before it reaches the ledger.
//!
//! # Features
//!
//! - [`QuoteProvider`] capability for fiat and crypto conversions, with an
//!   in-process [`RateTableProvider`]
//! - The [`Offer`] entity: a priced, time-boxed conversion for one client
//! - [`OfferCache`] capability with atomic fetch-and-remove, with an
//!   in-process TTL implementation
//!
//! # Example
//!
//! ```rust,ignore
//! use exchequer_fx::{QuoteProvider, RateTableProvider};
//! use exchequer_common::Currency;
//!
//! let provider = RateTableProvider::new("table");
//! provider.set_rate(Currency::usd(), Currency::cad(), dec!(1.35));
//!
//! let quote = provider.fiat_conversion(Currency::usd(), Currency::cad(), dec!(100)).await?;
//! assert_eq!(quote.amount, dec!(135.00));
//! ```

pub mod provider;
pub mod cache;
pub mod conversion;
pub mod offer;
pub mod error;

pub use provider::{QuoteProvider, RateTableProvider};
pub use cache::{InMemoryOfferCache, OfferCache, OfferCacheConfig};
pub use conversion::Quote;
pub use offer::Offer;
pub use error::{FxError, FxResult};
