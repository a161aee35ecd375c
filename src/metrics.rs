//! In-memory counters for requests, faults and the runtime connection.
//!
//! Counters are atomics. Per-provider entries and per-operation running
//! timings live in `DashMap`s keyed by name, so memory stays flat however
//! long the session runs. Nothing is exported; the summary is logged at
//! shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Global metrics registry (singleton)
static METRICS: once_cell::sync::Lazy<Arc<Metrics>> =
    once_cell::sync::Lazy::new(|| Arc::new(Metrics::new()));

pub fn metrics() -> &'static Arc<Metrics> {
    &METRICS
}

/// How a dispatched request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Answered,
    /// Disabled or unregistered provider.
    Skipped,
    /// Error or panic caught at the fault boundary.
    Faulted,
}

#[derive(Debug, Default)]
struct ProviderCounters {
    requests: AtomicU64,
    skipped: AtomicU64,
    faults: AtomicU64,
    total_micros: AtomicU64,
}

impl ProviderCounters {
    fn snapshot(&self) -> ProviderStats {
        ProviderStats {
            requests: self.requests.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            total_micros: self.total_micros.load(Ordering::Relaxed),
        }
    }
}

/// Running count, sum and extremes of one operation's durations.
#[derive(Debug)]
struct TimingCounters {
    count: AtomicU64,
    total_micros: AtomicU64,
    min_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl TimingCounters {
    fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            min_micros: AtomicU64::new(u64::MAX),
            max_micros: AtomicU64::new(0),
        }
    }

    fn record(&self, micros: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.min_micros.fetch_min(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> Option<OperationStats> {
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        Some(OperationStats {
            count,
            min_micros: self.min_micros.load(Ordering::Relaxed),
            max_micros: self.max_micros.load(Ordering::Relaxed),
            mean_micros: self.total_micros.load(Ordering::Relaxed) / count,
        })
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    providers: DashMap<String, ProviderCounters>,
    operation_timings: DashMap<String, TimingCounters>,
    workspace_index_count: AtomicUsize,
    total_files_indexed: AtomicUsize,
    parse_errors: AtomicU64,
    connect_failures: AtomicU64,
    rpc_timeouts: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, provider: &str, outcome: RequestOutcome, elapsed: Duration) {
        let counters = self.providers.entry(provider.to_string()).or_default();
        counters.requests.fetch_add(1, Ordering::Relaxed);
        counters
            .total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        match outcome {
            RequestOutcome::Answered => {}
            RequestOutcome::Skipped => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Faulted => {
                counters.faults.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Records the timing of an operation
    pub fn record_timing(&self, operation: &str, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        if let Some(counters) = self.operation_timings.get(operation) {
            counters.record(micros);
            return;
        }
        self.operation_timings
            .entry(operation.to_string())
            .or_insert_with(TimingCounters::new)
            .record(micros);
    }

    pub fn record_workspace_index(&self, file_count: usize) {
        self.workspace_index_count.fetch_add(1, Ordering::Relaxed);
        self.total_files_indexed.fetch_add(file_count, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect_failure(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_timeout(&self) {
        self.rpc_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn summary(&self) -> MetricsSummary {
        let mut providers: Vec<(String, ProviderStats)> = self
            .providers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        let mut operations: Vec<(String, OperationStats)> = self
            .operation_timings
            .iter()
            .filter_map(|entry| Some((entry.key().clone(), entry.value().snapshot()?)))
            .collect();
        operations.sort_by(|a, b| a.0.cmp(&b.0));
        MetricsSummary {
            providers,
            operations,
            workspace_index_count: self.workspace_index_count.load(Ordering::Relaxed),
            total_files_indexed: self.total_files_indexed.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            rpc_timeouts: self.rpc_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderStats {
    pub requests: u64,
    pub skipped: u64,
    pub faults: u64,
    pub total_micros: u64,
}

/// Statistics for a single operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationStats {
    pub count: u64,
    pub min_micros: u64,
    pub max_micros: u64,
    pub mean_micros: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub providers: Vec<(String, ProviderStats)>,
    pub operations: Vec<(String, OperationStats)>,
    pub workspace_index_count: usize,
    pub total_files_indexed: usize,
    pub parse_errors: u64,
    pub connect_failures: u64,
    pub rpc_timeouts: u64,
}

/// Records the duration of a scope into the global registry when dropped.
pub struct TimingGuard {
    operation: String,
    start: Instant,
}

impl TimingGuard {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            start: Instant::now(),
        }
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        metrics().record_timing(&self.operation, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_provider_counters() {
        let m = Metrics::new();
        m.record_request("hover", RequestOutcome::Answered, Duration::from_micros(10));
        m.record_request("hover", RequestOutcome::Faulted, Duration::from_micros(30));
        m.record_request("completion", RequestOutcome::Skipped, Duration::ZERO);

        let summary = m.summary();
        assert_eq!(summary.providers[0].0, "completion");
        assert_eq!(summary.providers[0].1.skipped, 1);
        let (name, hover) = &summary.providers[1];
        assert_eq!(name, "hover");
        assert_eq!(hover.requests, 2);
        assert_eq!(hover.faults, 1);
        assert_eq!(hover.total_micros, 40);
    }

    #[test]
    fn test_operation_timing() {
        let m = Metrics::new();
        m.record_timing("test_op", Duration::from_micros(100));
        m.record_timing("test_op", Duration::from_micros(200));
        m.record_timing("test_op", Duration::from_micros(150));

        let summary = m.summary();
        assert_eq!(
            summary.operations,
            vec![(
                "test_op".to_string(),
                OperationStats {
                    count: 3,
                    min_micros: 100,
                    max_micros: 200,
                    mean_micros: 150,
                }
            )]
        );
    }

    #[test]
    fn test_timings_stay_flat_over_many_samples() {
        let m = Metrics::new();
        for micros in 1..=100_000 {
            m.record_timing("ingest", Duration::from_micros(micros));
        }
        let stats = m.summary().operations[0].1;
        assert_eq!(stats.count, 100_000);
        assert_eq!((stats.min_micros, stats.max_micros), (1, 100_000));
        assert_eq!(stats.mean_micros, 50_000);
        assert_eq!(m.operation_timings.len(), 1);
    }

    #[test]
    fn test_timing_guard() {
        {
            let _guard = TimingGuard::new("metrics_test_guard");
            thread::sleep(Duration::from_millis(10));
        }
        let summary = metrics().summary();
        let (_, stats) = summary
            .operations
            .iter()
            .find(|(name, _)| name == "metrics_test_guard")
            .unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.min_micros >= 10_000);
    }
}
