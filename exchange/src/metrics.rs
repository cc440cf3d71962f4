//! Offer and settlement counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Exchange metrics.
#[derive(Default)]
pub struct Metrics {
    /// Offers priced and cached.
    pub offers_created: AtomicU64,
    /// Offers settled successfully.
    pub offers_redeemed: AtomicU64,
    /// Redemptions that found no offer: bad token, expired or already used.
    pub offers_missed: AtomicU64,
    /// Offers presented by a client other than their owner.
    pub integrity_faults: AtomicU64,
    /// Offers consumed from the cache whose posting then failed.
    pub settlements_failed: AtomicU64,
    /// External deposits posted.
    pub deposits: AtomicU64,
    /// Quote, cache or ledger calls that failed or timed out.
    pub transient_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offer_created(&self) {
        self.offers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn offer_redeemed(&self) {
        self.offers_redeemed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn offer_missed(&self) {
        self.offers_missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn integrity_fault(&self) {
        self.integrity_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn settlement_failed(&self) {
        self.settlements_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn deposit(&self) {
        self.deposits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transient_failure(&self) {
        self.transient_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            offers_created: self.offers_created.load(Ordering::Relaxed),
            offers_redeemed: self.offers_redeemed.load(Ordering::Relaxed),
            offers_missed: self.offers_missed.load(Ordering::Relaxed),
            integrity_faults: self.integrity_faults.load(Ordering::Relaxed),
            settlements_failed: self.settlements_failed.load(Ordering::Relaxed),
            deposits: self.deposits.load(Ordering::Relaxed),
            transient_failures: self.transient_failures.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("offers_created", "Offers priced and cached", s.offers_created),
            ("offers_redeemed", "Offers settled", s.offers_redeemed),
            ("offers_missed", "Redemptions with no live offer", s.offers_missed),
            ("integrity_faults", "Offers presented by a non-owner", s.integrity_faults),
            ("settlements_failed", "Consumed offers whose posting failed", s.settlements_failed),
            ("deposits", "External deposits posted", s.deposits),
            ("transient_failures", "Collaborator failures and timeouts", s.transient_failures),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP exchequer_{name}_total {help}\n# TYPE exchequer_{name}_total counter\nexchequer_{name}_total {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub offers_created: u64,
    pub offers_redeemed: u64,
    pub offers_missed: u64,
    pub integrity_faults: u64,
    pub settlements_failed: u64,
    pub deposits: u64,
    pub transient_failures: u64,
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
