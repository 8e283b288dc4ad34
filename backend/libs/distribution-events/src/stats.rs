//! Statistics tracking for event fan-out

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Snapshot of publisher activity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DistributionStats {
    pub events_published: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
    pub retries: u64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

/// Thread-safe statistics collector
#[derive(Clone)]
pub struct StatsCollector {
    events_published: Arc<AtomicU64>,
    deliveries_succeeded: Arc<AtomicU64>,
    deliveries_failed: Arc<AtomicU64>,
    retries: Arc<AtomicU64>,
    latencies: Arc<parking_lot::Mutex<Vec<f64>>>,
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            events_published: Arc::new(AtomicU64::new(0)),
            deliveries_succeeded: Arc::new(AtomicU64::new(0)),
            deliveries_failed: Arc::new(AtomicU64::new(0)),
            retries: Arc::new(AtomicU64::new(0)),
            latencies: Arc::new(parking_lot::Mutex::new(Vec::new())),
        }
    }

    pub fn record_publish(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a concluded delivery sequence for one target
    pub fn record_delivery(&self, delivered: bool, attempts: u32, latency_ms: f64) {
        if delivered {
            self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
        }
        if attempts > 1 {
            self.retries
                .fetch_add(u64::from(attempts - 1), Ordering::Relaxed);
        }
        self.record_latency(latency_ms);
    }

    /// Record a target that never got an attempt (no subscriber)
    pub fn record_skipped(&self) {
        self.deliveries_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_latency(&self, latency_ms: f64) {
        let mut latencies = self.latencies.lock();
        latencies.push(latency_ms);
        // Keep only last 1000 samples
        if latencies.len() > 1000 {
            latencies.drain(0..500);
        }
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> DistributionStats {
        let (p50, p99) = {
            let mut latencies = self.latencies.lock().clone();
            if latencies.is_empty() {
                (0.0, 0.0)
            } else {
                latencies.sort_by(|a, b| a.total_cmp(b));
                let last = latencies.len() - 1;
                let p50_idx = (latencies.len() as f64 * 0.50) as usize;
                let p99_idx = (latencies.len() as f64 * 0.99) as usize;
                (latencies[p50_idx.min(last)], latencies[p99_idx.min(last)])
            }
        };

        DistributionStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_failed: self.deliveries_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            latency_p50_ms: p50,
            latency_p99_ms: p99,
        }
    }

    pub fn reset(&self) {
        self.events_published.store(0, Ordering::Relaxed);
        self.deliveries_succeeded.store(0, Ordering::Relaxed);
        self.deliveries_failed.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.latencies.lock().clear();
    }
}
