//! Exchange configuration.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use exchequer_common::time::{constants, DurationExt};
use exchequer_common::ClientId;

/// Longest offer lifetime accepted by [`ExchangeConfig::validate`].
pub const MAX_OFFER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Offer lifetimes.
#[derive(Debug, Clone)]
pub struct OfferConfig {
    /// Lifetime of a fiat to fiat offer.
    pub fiat_ttl: Duration,
    /// Lifetime of a crypto purchase or sale offer.
    pub crypto_ttl: Duration,
}

impl Default for OfferConfig {
    fn default() -> Self {
        Self {
            fiat_ttl: constants::fiat_offer_ttl().as_std(),
            crypto_ttl: constants::crypto_offer_ttl().as_std(),
        }
    }
}

/// Deadlines for calls to collaborators.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Quote provider call.
    pub quote: Duration,
    /// One offer cache operation.
    pub cache: Duration,
    /// A whole ledger posting, lock waits included.
    pub ledger: Duration,
    /// One account row lock.
    pub lock_wait: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            quote: constants::quote_timeout().as_std(),
            cache: constants::cache_timeout().as_std(),
            ledger: constants::ledger_timeout().as_std(),
            lock_wait: constants::lock_wait_timeout().as_std(),
        }
    }
}

/// Page size limits.
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Used when a request asks for fewer than one row.
    pub default_page_size: usize,
    /// Larger requests are clamped to this.
    pub max_page_size: usize,
    /// Offset applied to month windows when a request gives none.
    pub default_utc_offset: FixedOffset,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            max_page_size: 100,
            default_utc_offset: Utc.fix(),
        }
    }
}

/// Main exchange configuration.
#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    /// Secret the token key is derived from. Tokens from a different secret
    /// never decrypt.
    pub token_secret: String,
    /// Client owning the system clearing accounts.
    pub treasury_client: ClientId,
    /// Database URL.
    pub database_url: String,
    /// Database pool size.
    pub max_connections: u32,
    pub offers: OfferConfig,
    pub timeouts: TimeoutConfig,
    pub pagination: PaginationConfig,
    /// Log level.
    pub log_level: String,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            token_secret: String::new(),
            treasury_client: ClientId::from_uuid(uuid::Uuid::nil()),
            database_url: "postgres://localhost/exchequer".to_string(),
            max_connections: 10,
            offers: OfferConfig::default(),
            timeouts: TimeoutConfig::default(),
            pagination: PaginationConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ExchangeConfig {
    /// Configuration for tests and local runs with the given token secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            token_secret: secret.into(),
            ..Self::default()
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secret) = std::env::var("EXCHEQUER_TOKEN_SECRET") {
            config.token_secret = secret;
        }

        if let Ok(id) = std::env::var("EXCHEQUER_TREASURY_CLIENT") {
            if let Ok(id) = ClientId::parse(&id) {
                config.treasury_client = id;
            }
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Some(n) = env_parse("EXCHEQUER_MAX_CONNECTIONS") {
            config.max_connections = n;
        }

        if let Some(secs) = env_parse("EXCHEQUER_FIAT_OFFER_TTL_SECS") {
            config.offers.fiat_ttl = Duration::from_secs(secs);
        }

        if let Some(secs) = env_parse("EXCHEQUER_CRYPTO_OFFER_TTL_SECS") {
            config.offers.crypto_ttl = Duration::from_secs(secs);
        }

        if let Some(ms) = env_parse("EXCHEQUER_QUOTE_TIMEOUT_MS") {
            config.timeouts.quote = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse("EXCHEQUER_CACHE_TIMEOUT_MS") {
            config.timeouts.cache = Duration::from_millis(ms);
        }

        if let Some(ms) = env_parse("EXCHEQUER_LEDGER_TIMEOUT_MS") {
            config.timeouts.ledger = Duration::from_millis(ms);
        }

        if let Some(size) = env_parse("EXCHEQUER_DEFAULT_PAGE_SIZE") {
            config.pagination.default_page_size = size;
        }

        if let Some(size) = env_parse("EXCHEQUER_MAX_PAGE_SIZE") {
            config.pagination.max_page_size = size;
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.token_secret.is_empty() {
            return Err("Token secret cannot be empty".to_string());
        }

        if self.offers.fiat_ttl.is_zero() || self.offers.crypto_ttl.is_zero() {
            return Err("Offer lifetimes must be positive".to_string());
        }

        if self.offers.fiat_ttl > MAX_OFFER_TTL || self.offers.crypto_ttl > MAX_OFFER_TTL {
            return Err("Offer lifetimes cannot exceed one day".to_string());
        }

        if self.timeouts.lock_wait > self.timeouts.ledger {
            return Err("Lock wait cannot exceed the ledger deadline".to_string());
        }

        if self.pagination.default_page_size == 0 {
            return Err("Default page size cannot be 0".to_string());
        }

        if self.pagination.default_page_size > self.pagination.max_page_size {
            return Err("Default page size cannot exceed max page size".to_string());
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
