//! Simulation metrics.

use std::collections::VecDeque;

use exchequer_common::ExchangeError;

/// Simulation metrics.
#[derive(Debug, Clone)]
pub struct SimulationMetrics {
    /// Redemptions attempted.
    pub total_redemptions: u64,
    /// Redemptions that posted to the ledger.
    pub settled: u64,
    /// Redemptions that found no live offer.
    pub missed: u64,
    /// Requests refused for funds or a missing account.
    pub refused: u64,
    /// Retryable failures: outages, timeouts and integrity faults.
    pub retryable: u64,
    /// Other failures.
    pub failed: u64,
    /// Latency samples (ms).
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_redemptions: 0,
            settled: 0,
            missed: 0,
            refused: 0,
            retryable: 0,
            failed: 0,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a successful redemption.
    pub fn record_settled(&mut self, latency_ms: u64) {
        self.total_redemptions += 1;
        self.settled += 1;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_ms);
    }

    /// Record a failed redemption or offer request by its error class.
    pub fn record_error(&mut self, err: &ExchangeError) {
        self.total_redemptions += 1;
        match err {
            ExchangeError::NotFoundOrExpired => self.missed += 1,
            ExchangeError::InsufficientFundsOrMissingAccount(_) => self.refused += 1,
            e if e.is_retryable() => self.retryable += 1,
            _ => self.failed += 1,
        }
    }

    /// Get average latency in ms.
    pub fn average_latency_ms(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p99 latency.
    pub fn p99_latency_ms(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Fraction of redemptions that settled.
    pub fn success_rate(&self) -> f64 {
        if self.total_redemptions == 0 {
            return 0.0;
        }

        self.settled as f64 / self.total_redemptions as f64
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_settled(100);
        metrics.record_settled(200);
        metrics.record_settled(150);
        metrics.record_error(&ExchangeError::NotFoundOrExpired);

        assert_eq!(metrics.total_redemptions, 4);
        assert_eq!(metrics.settled, 3);
        assert_eq!(metrics.missed, 1);
        assert_eq!(metrics.average_latency_ms(), 150);
        assert_eq!(metrics.p99_latency_ms(), 200);
        assert_eq!(metrics.success_rate(), 0.75);
    }

    #[test]
    fn test_error_classes() {
        let mut metrics = SimulationMetrics::new();

        metrics.record_error(&ExchangeError::Transient("cache down".to_string()));
        metrics.record_error(&ExchangeError::IntegrityFault("owner".to_string()));
        metrics.record_error(&ExchangeError::InsufficientFundsOrMissingAccount(String::new()));
        metrics.record_error(&ExchangeError::invalid("amount", "bad scale"));

        assert_eq!(metrics.retryable, 2);
        assert_eq!(metrics.refused, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.settled, 0);
    }
}
