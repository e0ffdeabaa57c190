//! Per-operation storage metrics.
//!
//! Repositories time every call and report it under an operation name
//! (`save`, `findById`, `query`, ...). Successful calls add to the count and
//! total duration; failed calls only bump the error count.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;

/// Metrics sink shared by an engine and its repositories.
pub trait StorageMetrics: Send + Sync {
    fn record_operation(&self, operation: &str, duration: Duration);

    fn record_error(&self, operation: &str);

    fn operation_count(&self, operation: &str) -> u64;

    /// mean duration of successful calls, in milliseconds
    fn average_execution_time(&self, operation: &str) -> f64;

    fn error_count(&self, operation: &str) -> u64;

    fn all_metrics(&self) -> BTreeMap<String, OperationSnapshot>;

    /// forget one operation
    fn reset(&self, operation: &str);

    fn reset_all(&self);

    /// `(count - errors) / count`, or 0 when nothing was recorded
    fn success_rate(&self, operation: &str) -> f64 {
        let count = self.operation_count(operation);
        if count == 0 {
            return 0.0;
        }
        let errors = self.error_count(operation).min(count);
        (count - errors) as f64 / count as f64
    }
}

/// Metrics of one operation at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSnapshot {
    pub operation_count: u64,
    /// milliseconds
    pub average_execution_time: f64,
    pub error_count: u64,
    /// milliseconds
    pub total_duration: u64,
}

#[derive(Debug, Default)]
struct OperationMetrics {
    count: AtomicU64,
    total_micros: AtomicU64,
    errors: AtomicU64,
}

impl OperationMetrics {
    fn snapshot(&self) -> OperationSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_micros = self.total_micros.load(Ordering::Relaxed);
        OperationSnapshot {
            operation_count: count,
            average_execution_time: if count > 0 {
                total_micros as f64 / count as f64 / 1000.0
            } else {
                0.0
            },
            error_count: self.errors.load(Ordering::Relaxed),
            total_duration: total_micros / 1000,
        }
    }
}

/// The default in-process metrics sink.
#[derive(Debug, Default)]
pub struct InMemoryStorageMetrics {
    operations: RwLock<BTreeMap<String, Arc<OperationMetrics>>>,
}

impl InMemoryStorageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, operation: &str) -> Arc<OperationMetrics> {
        if let Some(metrics) = self.operations.read().get(operation) {
            return Arc::clone(metrics);
        }
        Arc::clone(self.operations.write().entry(operation.to_string()).or_default())
    }

    fn get(&self, operation: &str) -> Option<OperationSnapshot> {
        self.operations.read().get(operation).map(|m| m.snapshot())
    }
}

impl StorageMetrics for InMemoryStorageMetrics {
    fn record_operation(&self, operation: &str, duration: Duration) {
        let metrics = self.entry(operation);
        metrics.count.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        metrics.total_micros.fetch_add(micros, Ordering::Relaxed);
    }

    fn record_error(&self, operation: &str) {
        self.entry(operation).errors.fetch_add(1, Ordering::Relaxed);
    }

    fn operation_count(&self, operation: &str) -> u64 {
        self.get(operation).map(|s| s.operation_count).unwrap_or(0)
    }

    fn average_execution_time(&self, operation: &str) -> f64 {
        self.get(operation).map(|s| s.average_execution_time).unwrap_or(0.0)
    }

    fn error_count(&self, operation: &str) -> u64 {
        self.get(operation).map(|s| s.error_count).unwrap_or(0)
    }

    fn all_metrics(&self) -> BTreeMap<String, OperationSnapshot> {
        self.operations
            .read()
            .iter()
            .map(|(name, metrics)| (name.clone(), metrics.snapshot()))
            .collect()
    }

    fn reset(&self, operation: &str) {
        self.operations.write().remove(operation);
    }

    fn reset_all(&self) {
        self.operations.write().clear();
    }
}

/// measures one call
pub struct OpTimer {
    start: Instant,
}

impl OpTimer {
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_record_and_read() {
        let metrics = InMemoryStorageMetrics::new();
        metrics.record_operation("save", Duration::from_millis(10));
        metrics.record_operation("save", Duration::from_millis(30));
        metrics.record_error("save");

        assert_eq!(metrics.operation_count("save"), 2);
        assert_eq!(metrics.error_count("save"), 1);
        assert!((metrics.average_execution_time("save") - 20.0).abs() < 1e-9);
        assert!((metrics.success_rate("save") - 0.5).abs() < 1e-9);

        assert_eq!(metrics.operation_count("findById"), 0);
        assert_eq!(metrics.average_execution_time("findById"), 0.0);
        assert_eq!(metrics.success_rate("findById"), 0.0);
    }

    #[test]
    fn test_errors_without_successes() {
        let metrics = InMemoryStorageMetrics::new();
        metrics.record_error("query");

        let all = metrics.all_metrics();
        assert_eq!(all["query"].error_count, 1);
        assert_eq!(all["query"].operation_count, 0);
        assert_eq!(metrics.success_rate("query"), 0.0);
    }

    #[test]
    fn test_reset() {
        let metrics = InMemoryStorageMetrics::new();
        metrics.record_operation("save", Duration::from_millis(1));
        metrics.record_operation("count", Duration::from_millis(1));

        metrics.reset("save");
        assert_eq!(metrics.operation_count("save"), 0);
        assert_eq!(metrics.operation_count("count"), 1);

        metrics.reset_all();
        assert!(metrics.all_metrics().is_empty());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let metrics = InMemoryStorageMetrics::new();
        metrics.record_operation("save", Duration::from_millis(4));

        let value = serde_json::to_value(metrics.all_metrics()).unwrap();
        assert_eq!(value["save"]["operationCount"], 1);
        assert_eq!(value["save"]["totalDuration"], 4);
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(InMemoryStorageMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        metrics.record_operation("save", Duration::from_micros(5));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.operation_count("save"), 800);
    }
}
