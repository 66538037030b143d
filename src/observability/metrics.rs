//! Thread-safe metrics collection system
//!
//! Provides atomic counters and mutex-protected collections for tracking
//! routed requests, identifier caching, discovery, forwarding and config reloads.

use crate::error::ErrorKind;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Bound on retained request durations
const MAX_DURATION_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Request metrics
    requests_received: AtomicU64,
    requests_in_flight: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    failures_by_kind: Mutex<BTreeMap<String, u64>>,
    request_times: Mutex<Vec<u64>>, // in milliseconds

    // Identifier cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,

    // Outbound calls
    discovery_queries: AtomicU64,
    discovery_failures: AtomicU64,
    forward_attempts: AtomicU64,
    forward_retries: AtomicU64,

    // Configuration
    config_reloads: AtomicU64,
    config_reload_failures: AtomicU64,
    config_version: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            requests_in_flight: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            failures_by_kind: Mutex::new(BTreeMap::new()),
            request_times: Mutex::new(Vec::new()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            discovery_queries: AtomicU64::new(0),
            discovery_failures: AtomicU64::new(0),
            forward_attempts: AtomicU64::new(0),
            forward_retries: AtomicU64::new(0),
            config_reloads: AtomicU64::new(0),
            config_reload_failures: AtomicU64::new(0),
            config_version: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Request metrics
    pub fn request_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_succeeded(&self, duration: Duration) {
        self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        self.request_finished(duration);
    }

    pub fn request_failed(&self, kind: ErrorKind, duration: Duration) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut by_kind) = self.failures_by_kind.lock() {
            *by_kind.entry(kind.as_str().to_string()).or_insert(0) += 1;
        }
        self.request_finished(duration);
    }

    fn request_finished(&self, duration: Duration) {
        // Saturating so a reset during a request cannot wrap the gauge
        let _ = self
            .requests_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });

        if let Ok(mut times) = self.request_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_DURATION_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Identifier cache
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    // Outbound calls
    pub fn record_discovery_query(&self) {
        self.discovery_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discovery_failure(&self) {
        self.discovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_attempt(&self) {
        self.forward_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forward_retry(&self) {
        self.forward_retries.fetch_add(1, Ordering::Relaxed);
    }

    // Configuration
    pub fn record_config_reload(&self) {
        self.config_reloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_config_reload_failure(&self) {
        self.config_reload_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_config_version(&self, version: u64) {
        self.config_version.store(version, Ordering::Relaxed);
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.requests_received,
            &self.requests_in_flight,
            &self.requests_succeeded,
            &self.requests_failed,
            &self.cache_hits,
            &self.cache_misses,
            &self.discovery_queries,
            &self.discovery_failures,
            &self.forward_attempts,
            &self.forward_retries,
            &self.config_reloads,
            &self.config_reload_failures,
            &self.config_version,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);

        if let Ok(mut by_kind) = self.failures_by_kind.lock() {
            by_kind.clear();
        }
        if let Ok(mut times) = self.request_times.lock() {
            times.clear();
        }
    }

    /// Calculate request time statistics (pure function)
    fn request_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.request_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_request_time_ms, p50, p95, p99) = self.request_time_statistics();
        let failures_by_kind = self
            .failures_by_kind
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default();

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };

        MetricsSnapshot {
            requests: RequestMetrics {
                received: self.requests_received.load(Ordering::Relaxed),
                in_flight: self.requests_in_flight.load(Ordering::Relaxed),
                succeeded: self.requests_succeeded.load(Ordering::Relaxed),
                failed: self.requests_failed.load(Ordering::Relaxed),
                failures_by_kind,
                avg_request_time_ms,
                request_time_p50_ms: p50,
                request_time_p95_ms: p95,
                request_time_p99_ms: p99,
            },
            cache: CacheMetrics {
                hits,
                misses,
                hit_rate,
            },
            outbound: OutboundMetrics {
                discovery_queries: self.discovery_queries.load(Ordering::Relaxed),
                discovery_failures: self.discovery_failures.load(Ordering::Relaxed),
                forward_attempts: self.forward_attempts.load(Ordering::Relaxed),
                forward_retries: self.forward_retries.load(Ordering::Relaxed),
            },
            config: ConfigMetrics {
                version: self.config_version.load(Ordering::Relaxed),
                reloads: self.config_reloads.load(Ordering::Relaxed),
                reload_failures: self.config_reload_failures.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

// Public metrics structures
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub requests: RequestMetrics,
    pub cache: CacheMetrics,
    pub outbound: OutboundMetrics,
    pub config: ConfigMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestMetrics {
    pub received: u64,
    pub in_flight: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub failures_by_kind: BTreeMap<String, u64>,
    pub avg_request_time_ms: f64,
    pub request_time_p50_ms: f64,
    pub request_time_p95_ms: f64,
    pub request_time_p99_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundMetrics {
    pub discovery_queries: u64,
    pub discovery_failures: u64,
    pub forward_attempts: u64,
    pub forward_retries: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigMetrics {
    pub version: u64,
    pub reloads: u64,
    pub reload_failures: u64,
}

// Helper functions
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
