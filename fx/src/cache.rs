//! Offer cache with TTL and atomic fetch-and-remove.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{FxError, FxResult};
use crate::offer::Offer;

/// TTL key-value store for offers awaiting redemption.
#[async_trait]
pub trait OfferCache: Send + Sync {
    /// Store `offer` under `key`; it disappears once `ttl` elapses.
    async fn set(&self, key: &str, offer: &Offer, ttl: Duration) -> FxResult<()>;

    /// Fetch and remove the offer under `key` in one atomic step.
    ///
    /// Of any number of concurrent callers for the same key, at most one
    /// receives `Some`.
    async fn get_and_delete(&self, key: &str) -> FxResult<Option<Offer>>;
}

#[derive(Debug, Clone)]
struct CacheEntry {
    offer: Offer,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Configuration for the in-process offer cache.
#[derive(Debug, Clone)]
pub struct OfferCacheConfig {
    /// Entry count above which expired entries are swept on insert.
    pub max_entries: usize,
}

impl Default for OfferCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 100_000,
        }
    }
}

/// In-process [`OfferCache`].
///
/// Expiry is measured on the tokio clock so paused-time tests can advance it.
/// `get_and_delete` is a single `DashMap::remove`, which holds the shard lock
/// for the whole fetch-and-remove.
pub struct InMemoryOfferCache {
    entries: DashMap<String, CacheEntry>,
    config: OfferCacheConfig,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl InMemoryOfferCache {
    pub fn new() -> Self {
        Self::with_config(OfferCacheConfig::default())
    }

    pub fn with_config(config: OfferCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Toggle whether cache calls succeed.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Delay every cache call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.is_live(now));
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let total = self.entries.len();
        let live = self.entries.iter().filter(|e| e.is_live(now)).count();

        CacheStats {
            total_entries: total,
            live_entries: live,
            expired_entries: total - live,
        }
    }

    async fn check(&self) -> FxResult<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if !self.available.load(Ordering::Relaxed) {
            return Err(FxError::CacheUnavailable("offer cache is offline".to_string()));
        }
        Ok(())
    }
}

impl Default for InMemoryOfferCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OfferCache for InMemoryOfferCache {
    async fn set(&self, key: &str, offer: &Offer, ttl: Duration) -> FxResult<()> {
        self.check().await?;

        if self.entries.len() >= self.config.max_entries {
            self.evict_expired();
        }

        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| FxError::CacheUnavailable(format!("ttl {:?} is out of range", ttl)))?;
        let entry = CacheEntry {
            offer: offer.clone(),
            expires_at,
        };
        self.entries.insert(key.to_string(), entry);

        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        debug!(key = %key, ttl_ms, "Offer cached");
        Ok(())
    }

    async fn get_and_delete(&self, key: &str) -> FxResult<Option<Offer>> {
        self.check().await?;

        match self.entries.remove(key) {
            Some((_, entry)) if entry.is_live(Instant::now()) => {
                debug!(key = %key, "Offer taken from cache");
                Ok(Some(entry.offer))
            }
            Some(_) => {
                debug!(key = %key, "Cached offer had expired");
                Ok(None)
            }
            None => {
                debug!(key = %key, "Cache miss");
                Ok(None)
            }
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub expired_entries: usize,
}

/// Shared offer cache.
pub type SharedOfferCache = Arc<dyn OfferCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::Quote;
    use exchequer_common::{ClientId, Currency, CurrencyPair};
    use rust_decimal_macros::dec;

    fn offer() -> Offer {
        let quote = Quote::price(
            CurrencyPair::new(Currency::usd(), Currency::eur()),
            dec!(0.92),
            dec!(50.00),
        )
        .unwrap();
        Offer::new(ClientId::new(), &quote, false, false, chrono::Duration::minutes(2))
    }

    #[tokio::test]
    async fn test_set_and_take() {
        let cache = InMemoryOfferCache::new();
        let offer = offer();
        let key = offer.id.cache_key();

        cache.set(&key, &offer, Duration::from_secs(120)).await.unwrap();

        assert_eq!(cache.get_and_delete(&key).await.unwrap(), Some(offer));
        assert_eq!(cache.get_and_delete(&key).await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_miss() {
        let cache = InMemoryOfferCache::new();
        assert_eq!(cache.get_and_delete("absent").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires() {
        let cache = InMemoryOfferCache::new();
        let offer = offer();
        let key = offer.id.cache_key();

        cache.set(&key, &offer, Duration::from_secs(120)).await.unwrap();
        tokio::time::advance(Duration::from_secs(121)).await;

        assert_eq!(cache.stats().expired_entries, 1);
        assert_eq!(cache.get_and_delete(&key).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evict_expired() {
        let cache = InMemoryOfferCache::new();
        let short = offer();
        let long = offer();

        cache
            .set(&short.id.cache_key(), &short, Duration::from_secs(10))
            .await
            .unwrap();
        cache
            .set(&long.id.cache_key(), &long, Duration::from_secs(300))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        cache.evict_expired();

        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.live_entries, 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let cache = InMemoryOfferCache::new();
        cache.set_available(false);

        let result = cache.get_and_delete("key").await;
        assert!(matches!(result, Err(FxError::CacheUnavailable(_))));
    }

    #[tokio::test]
    async fn test_unrepresentable_ttl_is_refused() {
        let cache = InMemoryOfferCache::new();
        let offer = offer();

        let result = cache.set(&offer.id.cache_key(), &offer, Duration::MAX).await;
        assert!(matches!(result, Err(FxError::CacheUnavailable(_))));
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_take_yields_one_winner() {
        let cache = Arc::new(InMemoryOfferCache::new());
        let offer = offer();
        let key = offer.id.cache_key();
        cache.set(&key, &offer, Duration::from_secs(120)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = cache.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                cache.get_and_delete(&key).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
