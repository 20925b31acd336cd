//! Metrics collection for the execution engine.
//!
//! Counters are lock-free atomics; durations go into a fixed-bucket
//! histogram rather than a running average, so the distribution survives
//! aggregation.

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counter (monotonically increasing)
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram data snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    /// (upper_bound, count) pairs; the last bucket is +Inf.
    pub buckets: Vec<(f64, u64)>,
}

/// Histogram metric with fixed upper bounds.
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    inner: RwLock<HistogramInner>,
}

#[derive(Debug, Default)]
struct HistogramInner {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
    bucket_counts: Vec<u64>,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::duration_buckets()
    }
}

impl Histogram {
    /// Default duration buckets in milliseconds.
    pub fn duration_buckets() -> Self {
        Self::with_bounds(vec![
            5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
            30_000.0,
        ])
    }

    pub fn with_bounds(bounds: Vec<f64>) -> Self {
        let len = bounds.len();
        Self {
            bounds,
            inner: RwLock::new(HistogramInner {
                bucket_counts: vec![0; len + 1],
                min: f64::INFINITY,
                max: f64::NEG_INFINITY,
                ..Default::default()
            }),
        }
    }

    pub fn observe(&self, value: f64) {
        let mut inner = self.inner.write();
        inner.count += 1;
        inner.sum += value;
        inner.min = inner.min.min(value);
        inner.max = inner.max.max(value);
        let index = self
            .bounds
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.bounds.len());
        inner.bucket_counts[index] += 1;
    }

    pub fn observe_duration(&self, duration: Duration) {
        self.observe(duration.as_secs_f64() * 1_000.0);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let inner = self.inner.read();
        let mut buckets: Vec<(f64, u64)> = self
            .bounds
            .iter()
            .copied()
            .zip(inner.bucket_counts.iter().copied())
            .collect();
        buckets.push((f64::INFINITY, *inner.bucket_counts.last().unwrap_or(&0)));
        HistogramSnapshot {
            count: inner.count,
            sum: inner.sum,
            min: if inner.count == 0 { 0.0 } else { inner.min },
            max: if inner.count == 0 { 0.0 } else { inner.max },
            buckets,
        }
    }
}

/// Engine-wide outcome counters and latency distribution.
#[derive(Debug)]
pub struct ExecutionMetrics {
    pub steps_succeeded: Counter,
    pub steps_failed: Counter,
    pub transport_retries: Counter,
    pub validation_retries: Counter,
    pub semantic_retries: Counter,
    pub fatal_failures: Counter,
    pub plan_parse_retries: Counter,
    pub interrupts_raised: Counter,
    pub step_duration_ms: Histogram,
    pub plan_duration_ms: Histogram,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self {
            steps_succeeded: Counter::new(),
            steps_failed: Counter::new(),
            transport_retries: Counter::new(),
            validation_retries: Counter::new(),
            semantic_retries: Counter::new(),
            fatal_failures: Counter::new(),
            plan_parse_retries: Counter::new(),
            interrupts_raised: Counter::new(),
            step_duration_ms: Histogram::duration_buckets(),
            plan_duration_ms: Histogram::duration_buckets(),
        }
    }
}

impl Default for ExecutionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
