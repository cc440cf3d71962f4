//! Time utilities and constants.

use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

/// Default timing constants.
pub mod constants {
    use super::Duration;

    /// Lifetime of a fiat exchange offer (2 minutes).
    pub fn fiat_offer_ttl() -> Duration {
        Duration::minutes(2)
    }

    /// Lifetime of a crypto purchase/sale offer (2 minutes).
    pub fn crypto_offer_ttl() -> Duration {
        Duration::minutes(2)
    }

    /// Deadline for a quote provider call.
    pub fn quote_timeout() -> Duration {
        Duration::seconds(5)
    }

    /// Deadline for a single offer cache operation.
    pub fn cache_timeout() -> Duration {
        Duration::seconds(2)
    }

    /// Deadline for a whole ledger transaction, lock waits included.
    pub fn ledger_timeout() -> Duration {
        Duration::seconds(10)
    }

    /// Maximum wait for one account row lock.
    pub fn lock_wait_timeout() -> Duration {
        Duration::seconds(5)
    }
}

/// A timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Check if a timestamp has expired (is in the past).
pub fn is_expired(expiry: Timestamp) -> bool {
    now() > expiry
}

/// Calculate expiry time from now.
pub fn expires_in(duration: Duration) -> Timestamp {
    now() + duration
}

/// Half-open `[start, end)` bounds of a calendar month at a UTC offset.
///
/// Returns `None` for an out-of-range month or year.
pub fn month_bounds(year: i32, month: u32, offset: FixedOffset) -> Option<(Timestamp, Timestamp)> {
    let start = offset.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()?;
    let (next_year, next_month) = if month == 12 {
        (year.checked_add(1)?, 1)
    } else {
        (year, month + 1)
    };
    let end = offset
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()?;

    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

/// Duration extensions for convenient construction.
pub trait DurationExt {
    fn as_std(&self) -> std::time::Duration;
}

impl DurationExt for Duration {
    fn as_std(&self) -> std::time::Duration {
        self.to_std().unwrap_or(std::time::Duration::ZERO)
    }
}
