//! # Metrics Collection and Aggregation
//!
//! Core metric types exchanged between the load generator, the aggregation
//! loop, and downstream consumers (degradation monitoring, resilience
//! validation, streaming observers), plus the bounded ring buffer backing
//! every per-source history.

pub mod aggregator;
pub mod streamer;

pub use aggregator::{
    AggregatedUpdate, AggregatorConfig, CollectionStats, MetricSource, MetricsAggregator,
    MetricsSubscriber,
};
pub use streamer::{
    ClientMessage, MetricKind, MetricPayload, MetricsStreamer, ServerMessage, StreamFilters,
    StreamSink, StreamerConfig,
};

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyPercentiles {
    /// Compute percentiles from raw samples (milliseconds). Sorts a copy;
    /// callers hand in the bounded ring contents, never an unbounded series.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        // Nearest-rank percentile over the bounded sample window.
        let pick = |q: f64| {
            let idx = ((sorted.len() as f64 * q).ceil() as usize).saturating_sub(1);
            sorted[idx.min(sorted.len() - 1)]
        };
        Self {
            p50: pick(0.50),
            p90: pick(0.90),
            p95: pick(0.95),
            p99: pick(0.99),
        }
    }
}

/// System resource utilization as reported by the service under test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// CPU usage percentage (0-100)
    pub cpu_percent: f64,
    /// Memory usage percentage (0-100)
    pub memory_percent: f64,
}

/// Point-in-time view of the system under load.
///
/// This is the unit exchanged between generator, aggregator, and the
/// degradation/resilience consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub timestamp: DateTime<Utc>,
    /// Achieved throughput in transactions per second.
    pub throughput_tps: f64,
    pub latency: LatencyPercentiles,
    /// Failed submissions over total (0.0 to 1.0).
    pub error_rate: f64,
    /// Timed-out submissions over total (0.0 to 1.0).
    pub timeout_rate: f64,
    pub resources: ResourceUsage,
}

impl SystemMetrics {
    /// An all-healthy snapshot, useful as a neutral baseline.
    pub fn empty() -> Self {
        Self {
            timestamp: Utc::now(),
            throughput_tps: 0.0,
            latency: LatencyPercentiles::default(),
            error_rate: 0.0,
            timeout_rate: 0.0,
            resources: ResourceUsage::default(),
        }
    }
}

/// Anything that can be asked for a current [`SystemMetrics`] sample.
///
/// The load generator is the canonical probe; the degradation manager and
/// the resilience validator consume the same signal through this seam.
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    async fn sample(&self) -> Result<SystemMetrics>;
}

/// One polled reading from a metric source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedSample {
    pub recorded_at: DateTime<Utc>,
    /// Monotonic offset from the start of collection; rate computations use
    /// this rather than wall-clock timestamps.
    pub offset: Duration,
    pub values: HashMap<String, f64>,
}

/// Windowed aggregate of a single metric field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
    pub samples: usize,
}

/// Fixed-capacity ring of timestamped samples; pushing past capacity evicts
/// the oldest entry first.
#[derive(Debug, Clone)]
pub struct MetricsBuffer {
    capacity: usize,
    samples: VecDeque<TimedSample>,
}

impl MetricsBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, sample: TimedSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&TimedSample> {
        self.samples.back()
    }

    /// The most recent `count` samples, oldest first.
    pub fn window(&self, count: usize) -> impl Iterator<Item = &TimedSample> {
        let skip = self.samples.len().saturating_sub(count);
        self.samples.iter().skip(skip)
    }

    pub fn snapshot(&self) -> Vec<TimedSample> {
        self.samples.iter().cloned().collect()
    }

    /// Per-field mean/min/max/std-dev over the most recent `count` samples.
    pub fn aggregate(&self, count: usize) -> HashMap<String, AggregateStats> {
        let mut series: HashMap<String, Vec<f64>> = HashMap::new();
        for sample in self.window(count) {
            for (field, value) in &sample.values {
                series.entry(field.clone()).or_default().push(*value);
            }
        }
        series
            .into_iter()
            .map(|(field, values)| {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                (
                    field,
                    AggregateStats {
                        mean,
                        min,
                        max,
                        std_dev: variance.sqrt(),
                        samples: values.len(),
                    },
                )
            })
            .collect()
    }

    /// Delta-over-time rate of `field` between the first and last sample in
    /// the most recent `count`-sample window. `None` without two samples
    /// carrying the field, or when no wall-clock time separates them.
    pub fn rate(&self, field: &str, count: usize) -> Option<f64> {
        let window: Vec<&TimedSample> = self
            .window(count)
            .filter(|s| s.values.contains_key(field))
            .collect();
        let first = window.first()?;
        let last = window.last()?;
        let elapsed = last.offset.saturating_sub(first.offset).as_secs_f64();
        if elapsed <= 0.0 {
            return None;
        }
        Some((last.values[field] - first.values[field]) / elapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(offset_secs: u64, field: &str, value: f64) -> TimedSample {
        TimedSample {
            recorded_at: Utc::now(),
            offset: Duration::from_secs(offset_secs),
            values: HashMap::from([(field.to_string(), value)]),
        }
    }

    #[test]
    fn buffer_evicts_oldest_first() {
        let mut buffer = MetricsBuffer::new(3);
        for i in 0..5 {
            buffer.push(sample_at(i, "count", i as f64));
        }
        assert_eq!(buffer.len(), 3);
        let values: Vec<f64> = buffer.snapshot().iter().map(|s| s.values["count"]).collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn window_selects_most_recent() {
        let mut buffer = MetricsBuffer::new(10);
        for i in 0..10 {
            buffer.push(sample_at(i, "count", i as f64));
        }
        let recent: Vec<f64> = buffer.window(3).map(|s| s.values["count"]).collect();
        assert_eq!(recent, vec![7.0, 8.0, 9.0]);
    }

    #[test]
    fn aggregate_computes_field_stats() {
        let mut buffer = MetricsBuffer::new(10);
        for v in [2.0, 4.0, 6.0, 8.0] {
            buffer.push(sample_at(v as u64, "latency", v));
        }
        let stats = buffer.aggregate(10);
        let latency = &stats["latency"];
        assert_eq!(latency.mean, 5.0);
        assert_eq!(latency.min, 2.0);
        assert_eq!(latency.max, 8.0);
        assert_eq!(latency.samples, 4);
        assert!((latency.std_dev - 5.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn rate_is_delta_over_time() {
        let mut buffer = MetricsBuffer::new(10);
        buffer.push(sample_at(0, "total", 100.0));
        buffer.push(sample_at(10, "total", 300.0));
        let rate = buffer.rate("total", 10).unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
    }

    #[test]
    fn percentiles_from_sorted_ring() {
        let samples: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let p = LatencyPercentiles::from_samples(&samples);
        assert_eq!(p.p50, 50.0);
        assert_eq!(p.p99, 99.0);
        assert_eq!(LatencyPercentiles::from_samples(&[]), LatencyPercentiles::default());
    }
}
