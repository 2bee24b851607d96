//! Fixed-interval metric collection, buffering, and subscriber fan-out.

use crate::error::{Error, Result};
use crate::metrics::{AggregateStats, MetricsBuffer, TimedSample};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// A registered producer of metric values, polled once per tick.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> Result<HashMap<String, f64>>;
}

/// A consumer notified with one composed update per tick.
#[async_trait]
pub trait MetricsSubscriber: Send + Sync {
    fn name(&self) -> &str;
    async fn on_metrics(&self, update: &AggregatedUpdate) -> Result<()>;
}

/// Real-time composite of everything polled in a single tick.
///
/// All sources are polled before any subscriber sees the tick, so an update
/// is never a partially-polled composite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedUpdate {
    pub timestamp: DateTime<Utc>,
    /// Values keyed by source name, then field name.
    pub sources: HashMap<String, HashMap<String, f64>>,
}

/// Collection-loop self accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    pub ticks: u64,
    pub source_errors: u64,
    pub subscriber_errors: u64,
    pub last_tick_duration: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Polling interval for all sources.
    pub interval: Duration,
    /// Per-source ring buffer capacity; oldest samples are evicted first.
    pub buffer_capacity: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            buffer_capacity: 300,
        }
    }
}

impl AggregatorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }
}

/// Polls registered sources on a fixed interval, buffers per-source time
/// series, and publishes composed updates to subscribers.
pub struct MetricsAggregator {
    config: AggregatorConfig,
    sources: Arc<RwLock<Vec<Arc<dyn MetricSource>>>>,
    subscribers: Arc<RwLock<Vec<Arc<dyn MetricsSubscriber>>>>,
    buffers: Arc<DashMap<String, MetricsBuffer>>,
    current: Arc<DashMap<String, TimedSample>>,
    stats: Arc<RwLock<CollectionStats>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            sources: Arc::new(RwLock::new(Vec::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            buffers: Arc::new(DashMap::new()),
            current: Arc::new(DashMap::new()),
            stats: Arc::new(RwLock::new(CollectionStats::default())),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Register a source; its values are buffered under its name.
    pub fn register_metric_source(&self, source: Arc<dyn MetricSource>) {
        info!(source = source.name(), "metric source registered");
        self.sources.write().push(source);
    }

    pub fn subscribe(&self, subscriber: Arc<dyn MetricsSubscriber>) {
        info!(subscriber = subscriber.name(), "metrics subscriber attached");
        self.subscribers.write().push(subscriber);
    }

    pub fn unsubscribe(&self, name: &str) {
        self.subscribers.write().retain(|s| s.name() != name);
    }

    /// Spawn the fixed-interval collection loop.
    pub fn start_collection(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(Error::invalid_transition("start collection", "collecting"));
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);
        *task = Some(tokio::spawn(collection_loop(
            self.config.clone(),
            Arc::clone(&self.sources),
            Arc::clone(&self.subscribers),
            Arc::clone(&self.buffers),
            Arc::clone(&self.current),
            Arc::clone(&self.stats),
            shutdown_rx,
        )));
        Ok(())
    }

    /// Stop the loop and await its termination.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Windowed mean/min/max/std-dev for every field of `source`, over the
    /// most recent `window` worth of samples.
    pub fn calculate_aggregated_metrics(
        &self,
        source: &str,
        window: Duration,
    ) -> HashMap<String, AggregateStats> {
        match self.buffers.get(source) {
            Some(buffer) => buffer.aggregate(self.window_samples(window)),
            None => HashMap::new(),
        }
    }

    /// Delta-over-time rate of `field` across the window.
    pub fn calculate_rate(&self, source: &str, field: &str, window: Duration) -> Option<f64> {
        self.buffers
            .get(source)?
            .rate(field, self.window_samples(window))
    }

    /// Buffered history for one source id, oldest first.
    pub fn get_metrics_history(&self, source: &str) -> Vec<TimedSample> {
        self.buffers
            .get(source)
            .map(|buffer| buffer.snapshot())
            .unwrap_or_default()
    }

    /// Most recent reading for one source id.
    pub fn current_metrics(&self, source: &str) -> Option<TimedSample> {
        self.current.get(source).map(|entry| entry.value().clone())
    }

    pub fn collection_stats(&self) -> CollectionStats {
        self.stats.read().clone()
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.name().to_string()).collect()
    }

    fn window_samples(&self, window: Duration) -> usize {
        let interval = self.config.interval.as_secs_f64().max(1e-9);
        (window.as_secs_f64() / interval).ceil().max(1.0) as usize
    }
}

#[allow(clippy::too_many_arguments)]
async fn collection_loop(
    config: AggregatorConfig,
    sources: Arc<RwLock<Vec<Arc<dyn MetricSource>>>>,
    subscribers: Arc<RwLock<Vec<Arc<dyn MetricsSubscriber>>>>,
    buffers: Arc<DashMap<String, MetricsBuffer>>,
    current: Arc<DashMap<String, TimedSample>>,
    stats: Arc<RwLock<CollectionStats>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let collection_started = Instant::now();
    info!(interval = ?config.interval, "metrics collection started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }

        let tick_started = Instant::now();
        let timestamp = Utc::now();
        let mut composed: HashMap<String, HashMap<String, f64>> = HashMap::new();
        let mut source_errors = 0u64;

        // Poll every source before any subscriber is notified.
        let polled: Vec<Arc<dyn MetricSource>> = sources.read().clone();
        for source in polled {
            match source.collect().await {
                Ok(values) => {
                    let sample = TimedSample {
                        recorded_at: timestamp,
                        offset: collection_started.elapsed(),
                        values: values.clone(),
                    };
                    buffers
                        .entry(source.name().to_string())
                        .or_insert_with(|| MetricsBuffer::new(config.buffer_capacity))
                        .push(sample.clone());
                    current.insert(source.name().to_string(), sample);
                    composed.insert(source.name().to_string(), values);
                }
                Err(err) => {
                    source_errors += 1;
                    warn!(source = source.name(), error = %err, "metric source failed, skipping");
                }
            }
        }

        let update = AggregatedUpdate {
            timestamp,
            sources: composed,
        };
        let mut subscriber_errors = 0u64;
        let notified: Vec<Arc<dyn MetricsSubscriber>> = subscribers.read().clone();
        for subscriber in notified {
            if let Err(err) = subscriber.on_metrics(&update).await {
                subscriber_errors += 1;
                warn!(subscriber = subscriber.name(), error = %err, "subscriber failed, skipping");
            }
        }

        let mut stats = stats.write();
        stats.ticks += 1;
        stats.source_errors += source_errors;
        stats.subscriber_errors += subscriber_errors;
        stats.last_tick_duration = tick_started.elapsed();
        drop(stats);
        debug!("aggregation tick complete");
    }
    info!("metrics collection stopped");
}
