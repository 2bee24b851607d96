//! Fan-out of aggregated metrics to external observers.
//!
//! Each observer holds a subscription (metric kinds), free-form filters, and
//! an update interval. Updates inside the interval are batched per observer;
//! a batch flushes at the configured size or timeout, whichever comes first,
//! bounding both message count and staleness. Filters are applied just
//! before transmission and never mutate buffered state.

use crate::error::{Error, Result};
use crate::metrics::aggregator::{AggregatedUpdate, MetricsSubscriber};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Categories of streamed metrics an observer can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Load,
    AgentHealth,
    Business,
    Degradation,
    Resilience,
    Custom,
}

/// Observer-side restrictions, applied at transmission time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamFilters {
    /// Restrict to this entity-id subset; `None` passes every entity.
    #[serde(default)]
    pub entities: Option<HashSet<String>>,
    /// Field allow-list; `None` passes every field.
    #[serde(default)]
    pub fields: Option<HashSet<String>>,
}

impl StreamFilters {
    /// Apply to one payload; `None` means the payload is filtered out.
    fn apply(&self, payload: &MetricPayload) -> Option<MetricPayload> {
        if let Some(entities) = &self.entities {
            if !entities.contains(&payload.entity) {
                return None;
            }
        }
        let values = match &self.fields {
            Some(allowed) => payload
                .values
                .iter()
                .filter(|(field, _)| allowed.contains(*field))
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            None => payload.values.clone(),
        };
        Some(MetricPayload {
            values,
            ..payload.clone()
        })
    }
}

/// One streamed metric reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPayload {
    pub kind: MetricKind,
    pub entity: String,
    pub timestamp: DateTime<Utc>,
    pub values: HashMap<String, f64>,
}

/// Messages an observer sends to the streamer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { metric_types: Vec<MetricKind> },
    Unsubscribe { metric_types: Vec<MetricKind> },
    SetFilters { filters: StreamFilters },
    SetUpdateInterval { interval_seconds: f64 },
    Ping,
    /// Any unrecognized message type; logged and ignored.
    #[serde(other)]
    Unknown,
}

/// Messages the streamer sends to an observer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        observer_id: Uuid,
        available_kinds: Vec<MetricKind>,
    },
    SubscriptionConfirmed {
        metric_types: Vec<MetricKind>,
    },
    FiltersUpdated,
    MetricUpdate {
        data: MetricPayload,
    },
    MetricBatch {
        count: usize,
        data: Vec<MetricPayload>,
    },
    Pong,
}

/// Transport seam to one connected observer.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn deliver(&self, message: &ServerMessage) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamerConfig {
    /// Batch flushes when it reaches this many payloads.
    pub max_batch_size: usize,
    /// ... or when the oldest buffered payload is this stale.
    pub batch_timeout: Duration,
    /// Update interval observers start with before asking for their own.
    pub default_update_interval: Duration,
    /// Cadence of the background staleness check.
    pub flush_tick: Duration,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 50,
            batch_timeout: Duration::from_secs(2),
            default_update_interval: Duration::from_secs(1),
            flush_tick: Duration::from_millis(250),
        }
    }
}

impl StreamerConfig {
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }
}

struct ObserverState {
    subscription: HashSet<MetricKind>,
    filters: StreamFilters,
    update_interval: Duration,
    last_sent: Option<Instant>,
    batch: Vec<MetricPayload>,
    batch_started: Option<Instant>,
}

struct ObserverEntry {
    sink: Arc<dyn StreamSink>,
    state: Mutex<ObserverState>,
}

/// Routes aggregated metrics to connected observers over the
/// subscription/filter/batching protocol.
pub struct MetricsStreamer {
    config: StreamerConfig,
    observers: Arc<RwLock<HashMap<Uuid, Arc<ObserverEntry>>>>,
    source_kinds: RwLock<HashMap<String, MetricKind>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsStreamer {
    pub fn new(config: StreamerConfig) -> Self {
        Self {
            config,
            observers: Arc::new(RwLock::new(HashMap::new())),
            source_kinds: RwLock::new(HashMap::new()),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Declare which kind a source's payloads stream as. Unmapped sources
    /// stream as [`MetricKind::Custom`].
    pub fn map_source(&self, source: &str, kind: MetricKind) {
        self.source_kinds.write().insert(source.to_string(), kind);
    }

    /// Connect an observer; it receives `welcome` and starts with an empty
    /// subscription.
    pub async fn attach(&self, sink: Arc<dyn StreamSink>) -> Uuid {
        let observer_id = Uuid::new_v4();
        let entry = Arc::new(ObserverEntry {
            sink: Arc::clone(&sink),
            state: Mutex::new(ObserverState {
                subscription: HashSet::new(),
                filters: StreamFilters::default(),
                update_interval: self.config.default_update_interval,
                last_sent: None,
                batch: Vec::new(),
                batch_started: None,
            }),
        });
        self.observers.write().insert(observer_id, entry);

        let available_kinds: Vec<MetricKind> = {
            let kinds: HashSet<MetricKind> = self.source_kinds.read().values().copied().collect();
            kinds.into_iter().collect()
        };
        let welcome = ServerMessage::Welcome {
            observer_id,
            available_kinds,
        };
        if let Err(err) = sink.deliver(&welcome).await {
            warn!(%observer_id, error = %err, "welcome delivery failed");
        }
        info!(%observer_id, "observer attached");
        observer_id
    }

    pub fn detach(&self, observer_id: Uuid) {
        if self.observers.write().remove(&observer_id).is_some() {
            info!(%observer_id, "observer detached");
        }
    }

    /// Handle one client protocol message. Unknown types are logged and
    /// ignored; messages for unknown observers are an error.
    pub async fn handle_client_message(&self, observer_id: Uuid, message: ClientMessage) -> Result<()> {
        let entry = self
            .observers
            .read()
            .get(&observer_id)
            .cloned()
            .ok_or_else(|| Error::Streaming {
                message: format!("unknown observer {observer_id}"),
            })?;

        let reply = {
            let mut state = entry.state.lock();
            match message {
                ClientMessage::Subscribe { metric_types } => {
                    state.subscription.extend(metric_types);
                    Some(ServerMessage::SubscriptionConfirmed {
                        metric_types: state.subscription.iter().copied().collect(),
                    })
                }
                ClientMessage::Unsubscribe { metric_types } => {
                    for kind in metric_types {
                        state.subscription.remove(&kind);
                    }
                    Some(ServerMessage::SubscriptionConfirmed {
                        metric_types: state.subscription.iter().copied().collect(),
                    })
                }
                ClientMessage::SetFilters { filters } => {
                    state.filters = filters;
                    Some(ServerMessage::FiltersUpdated)
                }
                ClientMessage::SetUpdateInterval { interval_seconds } => {
                    state.update_interval = Duration::from_secs_f64(interval_seconds.max(0.01));
                    None
                }
                ClientMessage::Ping => Some(ServerMessage::Pong),
                ClientMessage::Unknown => {
                    warn!(%observer_id, "unknown client message type, ignoring");
                    None
                }
            }
        };

        if let Some(reply) = reply {
            entry.sink.deliver(&reply).await.map_err(|err| Error::Streaming {
                message: err.to_string(),
            })?;
        }
        Ok(())
    }

    /// Route one payload to every subscribed observer: immediate send when
    /// the observer's interval has elapsed, otherwise appended to its batch.
    pub async fn route(&self, payload: MetricPayload) {
        let entries: Vec<(Uuid, Arc<ObserverEntry>)> = self
            .observers
            .read()
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect();

        for (observer_id, entry) in entries {
            let outgoing = {
                let mut state = entry.state.lock();
                if !state.subscription.contains(&payload.kind) {
                    continue;
                }
                let due = match state.last_sent {
                    None => true,
                    Some(last) => last.elapsed() >= state.update_interval,
                };
                if due {
                    match state.filters.apply(&payload) {
                        Some(filtered) => {
                            state.last_sent = Some(Instant::now());
                            Some(ServerMessage::MetricUpdate { data: filtered })
                        }
                        None => None,
                    }
                } else {
                    // Buffered raw; filters run at flush time.
                    if state.batch.is_empty() {
                        state.batch_started = Some(Instant::now());
                    }
                    state.batch.push(payload.clone());
                    if state.batch.len() >= self.config.max_batch_size {
                        drain_batch(&mut state)
                    } else {
                        None
                    }
                }
            };
            if let Some(message) = outgoing {
                deliver_isolated(observer_id, &entry, &message).await;
            }
        }
    }

    /// Spawn the background staleness flusher.
    pub fn start(&self) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(Error::invalid_transition("start streamer", "streaming"));
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);
        let observers = Arc::clone(&self.observers);
        let batch_timeout = self.config.batch_timeout;
        let flush_tick = self.config.flush_tick;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(flush_tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                flush_stale_batches(&observers, batch_timeout).await;
            }
            debug!("streamer flush loop stopped");
        }));
        Ok(())
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

/// Build the batch message under the lock; filters applied per payload.
fn drain_batch(state: &mut ObserverState) -> Option<ServerMessage> {
    let buffered = std::mem::take(&mut state.batch);
    state.batch_started = None;
    let data: Vec<MetricPayload> = buffered
        .iter()
        .filter_map(|payload| state.filters.apply(payload))
        .collect();
    if data.is_empty() {
        return None;
    }
    state.last_sent = Some(Instant::now());
    Some(ServerMessage::MetricBatch {
        count: data.len(),
        data,
    })
}

async fn flush_stale_batches(
    observers: &RwLock<HashMap<Uuid, Arc<ObserverEntry>>>,
    batch_timeout: Duration,
) {
    let entries: Vec<(Uuid, Arc<ObserverEntry>)> = observers
        .read()
        .iter()
        .map(|(id, entry)| (*id, Arc::clone(entry)))
        .collect();
    for (observer_id, entry) in entries {
        let outgoing = {
            let mut state = entry.state.lock();
            let stale = state
                .batch_started
                .map(|started| started.elapsed() >= batch_timeout)
                .unwrap_or(false);
            if stale {
                drain_batch(&mut state)
            } else {
                None
            }
        };
        if let Some(message) = outgoing {
            deliver_isolated(observer_id, &entry, &message).await;
        }
    }
}

/// One observer's sink failing never disturbs the others.
async fn deliver_isolated(observer_id: Uuid, entry: &ObserverEntry, message: &ServerMessage) {
    if let Err(err) = entry.sink.deliver(message).await {
        warn!(%observer_id, error = %err, "delivery failed, observer skipped");
    }
}

#[async_trait]
impl MetricsSubscriber for MetricsStreamer {
    fn name(&self) -> &str {
        "metrics_streamer"
    }

    async fn on_metrics(&self, update: &AggregatedUpdate) -> Result<()> {
        let kinds = self.source_kinds.read().clone();
        for (source, values) in &update.sources {
            let payload = MetricPayload {
                kind: kinds.get(source).copied().unwrap_or(MetricKind::Custom),
                entity: source.clone(),
                timestamp: update.timestamp,
                values: values.clone(),
            };
            self.route(payload).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CollectingSink {
        messages: Mutex<Vec<ServerMessage>>,
    }

    impl CollectingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: Mutex::new(Vec::new()),
            })
        }

        fn take(&self) -> Vec<ServerMessage> {
            let mut messages = self.messages.lock();
            std::mem::take(&mut *messages)
        }
    }

    #[async_trait]
    impl StreamSink for CollectingSink {
        async fn deliver(&self, message: &ServerMessage) -> Result<()> {
            self.messages.lock().push(message.clone());
            Ok(())
        }
    }

    fn payload(entity: &str, field: &str, value: f64) -> MetricPayload {
        MetricPayload {
            kind: MetricKind::Load,
            entity: entity.to_string(),
            timestamp: Utc::now(),
            values: HashMap::from([(field.to_string(), value)]),
        }
    }

    #[test]
    fn unknown_client_message_parses_to_unknown() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"set_compression","level":3}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Unknown);

        let ping: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn protocol_messages_are_tagged_json() {
        let msg = ServerMessage::MetricBatch {
            count: 1,
            data: vec![payload("load_generator", "tps", 100.0)],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "metric_batch");
        assert_eq!(json["count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn welcome_then_subscription_flow() {
        let streamer = MetricsStreamer::new(StreamerConfig::default());
        streamer.map_source("load_generator", MetricKind::Load);
        let sink = CollectingSink::new();
        let id = streamer.attach(sink.clone() as Arc<dyn StreamSink>).await;

        streamer
            .handle_client_message(id, ClientMessage::Subscribe { metric_types: vec![MetricKind::Load] })
            .await
            .unwrap();
        streamer.handle_client_message(id, ClientMessage::Ping).await.unwrap();

        let messages = sink.take();
        assert!(matches!(messages[0], ServerMessage::Welcome { .. }));
        assert!(matches!(messages[1], ServerMessage::SubscriptionConfirmed { .. }));
        assert_eq!(messages[2], ServerMessage::Pong);
    }

    #[tokio::test(start_paused = true)]
    async fn first_update_immediate_then_batched() {
        let config = StreamerConfig::default()
            .with_max_batch_size(10)
            .with_batch_timeout(Duration::from_secs(1));
        let streamer = MetricsStreamer::new(config);
        streamer.start().unwrap();
        let sink = CollectingSink::new();
        let id = streamer.attach(sink.clone() as Arc<dyn StreamSink>).await;
        streamer
            .handle_client_message(id, ClientMessage::Subscribe { metric_types: vec![MetricKind::Load] })
            .await
            .unwrap();
        sink.take();

        // First payload: observer has never been sent to, goes out now.
        streamer.route(payload("a", "tps", 1.0)).await;
        // Within the update interval: buffered.
        streamer.route(payload("a", "tps", 2.0)).await;
        streamer.route(payload("a", "tps", 3.0)).await;

        let messages = sink.take();
        assert_eq!(messages.len(), 1);
        assert!(matches!(messages[0], ServerMessage::MetricUpdate { .. }));

        // The staleness flusher delivers the rest as one batch.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let messages = sink.take();
        assert_eq!(messages.len(), 1);
        match &messages[0] {
            ServerMessage::MetricBatch { count, data } => {
                assert_eq!(*count, 2);
                assert_eq!(data.len(), 2);
            }
            other => panic!("expected batch, got {other:?}"),
        }
        streamer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn batch_flushes_at_size() {
        let config = StreamerConfig::default()
            .with_max_batch_size(3)
            .with_batch_timeout(Duration::from_secs(3600));
        let streamer = MetricsStreamer::new(config);
        let sink = CollectingSink::new();
        let id = streamer.attach(sink.clone() as Arc<dyn StreamSink>).await;
        streamer
            .handle_client_message(id, ClientMessage::Subscribe { metric_types: vec![MetricKind::Load] })
            .await
            .unwrap();
        sink.take();

        streamer.route(payload("a", "tps", 1.0)).await; // immediate
        for v in 2..=4 {
            streamer.route(payload("a", "tps", v as f64)).await;
        }
        let messages = sink.take();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[1], ServerMessage::MetricBatch { count: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn filters_restrict_entities_and_fields() {
        let streamer = MetricsStreamer::new(StreamerConfig::default());
        let sink = CollectingSink::new();
        let id = streamer.attach(sink.clone() as Arc<dyn StreamSink>).await;
        streamer
            .handle_client_message(id, ClientMessage::Subscribe { metric_types: vec![MetricKind::Load] })
            .await
            .unwrap();
        streamer
            .handle_client_message(
                id,
                ClientMessage::SetFilters {
                    filters: StreamFilters {
                        entities: Some(HashSet::from(["agent-1".to_string()])),
                        fields: Some(HashSet::from(["tps".to_string()])),
                    },
                },
            )
            .await
            .unwrap();
        sink.take();

        // Entity outside the subset: filtered out entirely.
        streamer.route(payload("agent-2", "tps", 5.0)).await;
        assert!(sink.take().is_empty());

        // Allowed entity: only allow-listed fields survive.
        let mut multi = payload("agent-1", "tps", 7.0);
        multi.values.insert("queue_depth".to_string(), 42.0);
        streamer.route(multi).await;
        let messages = sink.take();
        match &messages[0] {
            ServerMessage::MetricUpdate { data } => {
                assert_eq!(data.values.len(), 1);
                assert!(data.values.contains_key("tps"));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribed_kind_not_routed() {
        let streamer = MetricsStreamer::new(StreamerConfig::default());
        let sink = CollectingSink::new();
        let _id = streamer.attach(sink.clone() as Arc<dyn StreamSink>).await;
        sink.take();
        streamer.route(payload("a", "tps", 1.0)).await;
        assert!(sink.take().is_empty());
    }
}
