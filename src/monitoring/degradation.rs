//! Degradation detection with weighted per-dimension voting.
//!
//! Each health dimension contributes points to the level buckets its
//! configured thresholds cross; crossing a higher threshold also credits
//! every bucket below it. The classified level is the highest bucket whose
//! accumulated score meets its minimum. The cascade keeps the classifier
//! monotone: a snapshot that is worse in every dimension can never classify
//! lower. Point values and minimums are tuning constants, not invariants.

use crate::error::{Error, Result};
use crate::metrics::{MetricsProbe, SystemMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Discrete health classification, ordered from healthy to worst.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    #[default]
    None,
    Moderate,
    Severe,
    Critical,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Critical => "critical",
        };
        write!(f, "{name}")
    }
}

/// The six monitored health dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthDimension {
    ErrorRate,
    LatencyP99,
    Cpu,
    Memory,
    TimeoutRate,
    AgentHealth,
}

impl HealthDimension {
    pub const ALL: [HealthDimension; 6] = [
        Self::ErrorRate,
        Self::LatencyP99,
        Self::Cpu,
        Self::Memory,
        Self::TimeoutRate,
        Self::AgentHealth,
    ];

    /// Agent health is a score where lower is worse; every other dimension
    /// degrades upward.
    fn lower_is_worse(self) -> bool {
        matches!(self, Self::AgentHealth)
    }
}

impl std::fmt::Display for HealthDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ErrorRate => "error_rate",
            Self::LatencyP99 => "latency_p99",
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::TimeoutRate => "timeout_rate",
            Self::AgentHealth => "agent_health",
        };
        write!(f, "{name}")
    }
}

/// Per-dimension threshold triple.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DimensionThresholds {
    pub moderate: f64,
    pub severe: f64,
    pub critical: f64,
}

impl DimensionThresholds {
    fn crossed(&self, value: f64, lower_is_worse: bool) -> Option<DegradationLevel> {
        if lower_is_worse {
            if value <= self.critical {
                Some(DegradationLevel::Critical)
            } else if value <= self.severe {
                Some(DegradationLevel::Severe)
            } else if value <= self.moderate {
                Some(DegradationLevel::Moderate)
            } else {
                None
            }
        } else if value >= self.critical {
            Some(DegradationLevel::Critical)
        } else if value >= self.severe {
            Some(DegradationLevel::Severe)
        } else if value >= self.moderate {
            Some(DegradationLevel::Moderate)
        } else {
            None
        }
    }
}

/// Thresholds for all six dimensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationThresholds {
    pub error_rate: DimensionThresholds,
    pub latency_p99_ms: DimensionThresholds,
    pub cpu_percent: DimensionThresholds,
    pub memory_percent: DimensionThresholds,
    pub timeout_rate: DimensionThresholds,
    /// Average agent health score in [0, 1]; lower is worse.
    pub agent_health: DimensionThresholds,
}

impl Default for DegradationThresholds {
    fn default() -> Self {
        Self {
            error_rate: DimensionThresholds { moderate: 0.02, severe: 0.05, critical: 0.10 },
            latency_p99_ms: DimensionThresholds { moderate: 500.0, severe: 1000.0, critical: 3000.0 },
            cpu_percent: DimensionThresholds { moderate: 70.0, severe: 85.0, critical: 95.0 },
            memory_percent: DimensionThresholds { moderate: 70.0, severe: 85.0, critical: 95.0 },
            timeout_rate: DimensionThresholds { moderate: 0.01, severe: 0.03, critical: 0.08 },
            agent_health: DimensionThresholds { moderate: 0.8, severe: 0.6, critical: 0.4 },
        }
    }
}

impl DegradationThresholds {
    fn for_dimension(&self, dimension: HealthDimension) -> &DimensionThresholds {
        match dimension {
            HealthDimension::ErrorRate => &self.error_rate,
            HealthDimension::LatencyP99 => &self.latency_p99_ms,
            HealthDimension::Cpu => &self.cpu_percent,
            HealthDimension::Memory => &self.memory_percent,
            HealthDimension::TimeoutRate => &self.timeout_rate,
            HealthDimension::AgentHealth => &self.agent_health,
        }
    }
}

/// Point values and bucket minimums for the voting scheme.
///
/// `major_points` must be >= `moderate_points` to preserve monotonicity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationScoring {
    pub moderate_points: u32,
    pub major_points: u32,
    pub moderate_minimum: u32,
    pub severe_minimum: u32,
    pub critical_minimum: u32,
}

impl Default for DegradationScoring {
    fn default() -> Self {
        Self {
            moderate_points: 1,
            major_points: 2,
            moderate_minimum: 1,
            severe_minimum: 2,
            critical_minimum: 3,
        }
    }
}

/// One dimension that crossed a threshold during an assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionCrossing {
    pub dimension: HealthDimension,
    pub level: DegradationLevel,
    pub value: f64,
}

/// Full result of scoring one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationAssessment {
    pub level: DegradationLevel,
    pub moderate_score: u32,
    pub severe_score: u32,
    pub critical_score: u32,
    pub crossings: Vec<DimensionCrossing>,
}

impl DegradationAssessment {
    /// Trigger-reason string composed from the crossed dimensions.
    pub fn reason(&self) -> String {
        if self.crossings.is_empty() {
            return "no thresholds crossed".to_string();
        }
        self.crossings
            .iter()
            .map(|c| format!("{}={:.4} crossed {}", c.dimension, c.value, c.level))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Record of one level transition. Append-only; the manager keeps a bounded
/// ring of the most recent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationEvent {
    pub level: DegradationLevel,
    pub previous_level: DegradationLevel,
    pub reason: String,
    pub metrics: SystemMetrics,
    pub occurred_at: DateTime<Utc>,
    /// Time from first degradation to this transition back to healthy;
    /// only set on events that return the system to `None`.
    pub recovery: Option<Duration>,
}

/// Running statistics over observed transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DegradationStats {
    pub moderate_events: u64,
    pub severe_events: u64,
    pub critical_events: u64,
    pub recoveries: u64,
    pub total_recovery: Duration,
}

impl DegradationStats {
    pub fn average_recovery(&self) -> Duration {
        if self.recoveries == 0 {
            Duration::ZERO
        } else {
            self.total_recovery / self.recoveries as u32
        }
    }

    fn count(&mut self, level: DegradationLevel) {
        match level {
            DegradationLevel::Moderate => self.moderate_events += 1,
            DegradationLevel::Severe => self.severe_events += 1,
            DegradationLevel::Critical => self.critical_events += 1,
            DegradationLevel::None => {}
        }
    }
}

/// A mitigation hook invoked when its level is entered. Advisory: built-in
/// strategies log recommended actions, they do not enforce them.
#[async_trait]
pub trait DegradationStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn apply(&self, event: &DegradationEvent) -> Result<()>;
}

struct AdvisoryStrategy {
    name: &'static str,
    recommendation: &'static str,
}

#[async_trait]
impl DegradationStrategy for AdvisoryStrategy {
    fn name(&self) -> &str {
        self.name
    }

    async fn apply(&self, event: &DegradationEvent) -> Result<()> {
        warn!(
            level = %event.level,
            reason = %event.reason,
            recommendation = self.recommendation,
            "degradation strategy triggered"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationManagerConfig {
    /// Re-evaluation interval of the monitoring loop.
    pub interval: Duration,
    /// Most recent transition events retained.
    pub event_capacity: usize,
}

impl Default for DegradationManagerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            event_capacity: 256,
        }
    }
}

struct MonitorState {
    current: DegradationLevel,
    degraded_since: Option<Instant>,
    events: VecDeque<DegradationEvent>,
    stats: DegradationStats,
}

/// Continuously scores system health, classifies a degradation level,
/// triggers level-specific strategies, and tracks recovery durations.
pub struct GracefulDegradationManager {
    thresholds: DegradationThresholds,
    scoring: DegradationScoring,
    config: DegradationManagerConfig,
    strategies: RwLock<HashMap<DegradationLevel, Vec<Arc<dyn DegradationStrategy>>>>,
    agent_health: Mutex<Option<f64>>,
    state: Mutex<MonitorState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Default for GracefulDegradationManager {
    fn default() -> Self {
        Self::new(
            DegradationThresholds::default(),
            DegradationScoring::default(),
            DegradationManagerConfig::default(),
        )
    }
}

impl GracefulDegradationManager {
    pub fn new(
        thresholds: DegradationThresholds,
        scoring: DegradationScoring,
        config: DegradationManagerConfig,
    ) -> Self {
        Self {
            thresholds,
            scoring,
            config,
            strategies: RwLock::new(HashMap::new()),
            agent_health: Mutex::new(None),
            state: Mutex::new(MonitorState {
                current: DegradationLevel::None,
                degraded_since: None,
                events: VecDeque::new(),
                stats: DegradationStats::default(),
            }),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Register the built-in advisory strategies for every level.
    pub fn with_default_strategies(self) -> Self {
        self.register_strategy(
            DegradationLevel::Moderate,
            Arc::new(AdvisoryStrategy {
                name: "reduce_noncritical_work",
                recommendation: "reduce non-critical work and defer background jobs",
            }),
        );
        self.register_strategy(
            DegradationLevel::Severe,
            Arc::new(AdvisoryStrategy {
                name: "shed_load",
                recommendation: "shed load and tighten request timeouts",
            }),
        );
        self.register_strategy(
            DegradationLevel::Critical,
            Arc::new(AdvisoryStrategy {
                name: "emergency_mode",
                recommendation: "enter emergency mode: reject all non-essential traffic",
            }),
        );
        self
    }

    pub fn register_strategy(&self, level: DegradationLevel, strategy: Arc<dyn DegradationStrategy>) {
        self.strategies.write().entry(level).or_default().push(strategy);
    }

    /// Latest externally-reported average agent health score in [0, 1].
    pub fn set_agent_health(&self, score: f64) {
        *self.agent_health.lock() = Some(score.clamp(0.0, 1.0));
    }

    /// Per-agent health scores; the dimension evaluates their mean.
    pub fn set_agent_health_scores(&self, scores: &HashMap<String, f64>) {
        if scores.is_empty() {
            *self.agent_health.lock() = None;
            return;
        }
        let mean = scores.values().sum::<f64>() / scores.len() as f64;
        self.set_agent_health(mean);
    }

    /// Score one snapshot without touching monitor state.
    pub fn assess(&self, metrics: &SystemMetrics, agent_health: Option<f64>) -> DegradationAssessment {
        let mut crossings = Vec::new();
        let (mut moderate, mut severe, mut critical) = (0u32, 0u32, 0u32);

        for dimension in HealthDimension::ALL {
            let value = match dimension {
                HealthDimension::ErrorRate => metrics.error_rate,
                HealthDimension::LatencyP99 => metrics.latency.p99,
                HealthDimension::Cpu => metrics.resources.cpu_percent,
                HealthDimension::Memory => metrics.resources.memory_percent,
                HealthDimension::TimeoutRate => metrics.timeout_rate,
                HealthDimension::AgentHealth => match agent_health {
                    Some(score) => score,
                    None => continue,
                },
            };
            let Some(level) = self
                .thresholds
                .for_dimension(dimension)
                .crossed(value, dimension.lower_is_worse())
            else {
                continue;
            };
            let points = if level == DegradationLevel::Moderate {
                self.scoring.moderate_points
            } else {
                self.scoring.major_points
            };
            // Cascade: a crossing credits its own bucket and every bucket
            // below it, which is what keeps the classifier monotone.
            match level {
                DegradationLevel::Critical => {
                    critical += points;
                    severe += points;
                    moderate += points;
                }
                DegradationLevel::Severe => {
                    severe += points;
                    moderate += points;
                }
                DegradationLevel::Moderate => moderate += points,
                DegradationLevel::None => {}
            }
            crossings.push(DimensionCrossing { dimension, level, value });
        }

        let level = if critical >= self.scoring.critical_minimum {
            DegradationLevel::Critical
        } else if severe >= self.scoring.severe_minimum {
            DegradationLevel::Severe
        } else if moderate >= self.scoring.moderate_minimum {
            DegradationLevel::Moderate
        } else {
            DegradationLevel::None
        };

        DegradationAssessment {
            level,
            moderate_score: moderate,
            severe_score: severe,
            critical_score: critical,
            crossings,
        }
    }

    /// Classify one snapshot; convenience over [`assess`](Self::assess).
    pub fn detect_degradation_level(
        &self,
        metrics: &SystemMetrics,
        agent_health: Option<f64>,
    ) -> DegradationLevel {
        self.assess(metrics, agent_health).level
    }

    /// Feed one snapshot through transition handling: record events, track
    /// recovery, and trigger strategies on level increases.
    pub async fn observe(&self, metrics: &SystemMetrics) {
        let agent_health = *self.agent_health.lock();
        let assessment = self.assess(metrics, agent_health);

        let (event, strategies) = {
            let mut state = self.state.lock();
            let previous = state.current;
            if assessment.level == previous {
                (None, Vec::new())
            } else {
                let increased = assessment.level > previous;
                let recovery = if assessment.level == DegradationLevel::None {
                    state.degraded_since.take().map(|since| since.elapsed())
                } else {
                    if state.degraded_since.is_none() {
                        state.degraded_since = Some(Instant::now());
                    }
                    None
                };
                let event = DegradationEvent {
                    level: assessment.level,
                    previous_level: previous,
                    reason: assessment.reason(),
                    metrics: metrics.clone(),
                    occurred_at: Utc::now(),
                    recovery,
                };
                if state.events.len() == self.config.event_capacity {
                    state.events.pop_front();
                }
                state.events.push_back(event.clone());
                state.stats.count(assessment.level);
                if let Some(recovery) = recovery {
                    state.stats.recoveries += 1;
                    state.stats.total_recovery += recovery;
                }
                state.current = assessment.level;

                let strategies = if increased {
                    self.strategies
                        .read()
                        .get(&assessment.level)
                        .cloned()
                        .unwrap_or_default()
                } else {
                    Vec::new()
                };
                (Some(event), strategies)
            }
        };

        if let Some(event) = event {
            if event.level > event.previous_level {
                info!(
                    level = %event.level,
                    previous = %event.previous_level,
                    reason = %event.reason,
                    "degradation level increased"
                );
            } else {
                info!(
                    level = %event.level,
                    previous = %event.previous_level,
                    recovery = ?event.recovery,
                    "degradation level decreased"
                );
            }
            for strategy in strategies {
                if let Err(err) = strategy.apply(&event).await {
                    warn!(strategy = strategy.name(), error = %err, "strategy failed, continuing");
                }
            }
        }
    }

    /// Spawn the fixed-interval monitoring loop against `probe`.
    pub fn start(self: &Arc<Self>, probe: Arc<dyn MetricsProbe>) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Err(Error::invalid_transition("start degradation monitor", "monitoring"));
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown.lock() = Some(shutdown_tx);
        let manager = Arc::clone(self);
        let poll = self.config.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = interval(poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval = ?poll, "degradation monitoring started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                match probe.sample().await {
                    Ok(metrics) => manager.observe(&metrics).await,
                    Err(err) => debug!(error = %err, "probe failed, skipping evaluation"),
                }
            }
            info!("degradation monitoring stopped");
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

    pub fn current_level(&self) -> DegradationLevel {
        self.state.lock().current
    }

    pub fn events(&self) -> Vec<DegradationEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    pub fn statistics(&self) -> DegradationStats {
        self.state.lock().stats.clone()
    }

    /// Clear accumulated events and statistics.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.current = DegradationLevel::None;
        state.degraded_since = None;
        state.events.clear();
        state.stats = DegradationStats::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::LatencyPercentiles;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn metrics(error_rate: f64, p99_ms: f64, cpu: f64, memory: f64, timeout_rate: f64) -> SystemMetrics {
        SystemMetrics {
            timestamp: Utc::now(),
            throughput_tps: 100.0,
            latency: LatencyPercentiles { p50: 10.0, p90: 20.0, p95: 30.0, p99: p99_ms },
            error_rate,
            timeout_rate,
            resources: crate::metrics::ResourceUsage { cpu_percent: cpu, memory_percent: memory },
        }
    }

    fn manager() -> GracefulDegradationManager {
        GracefulDegradationManager::default()
    }

    #[test]
    fn healthy_snapshot_scores_none() {
        let level = manager().detect_degradation_level(&metrics(0.0, 50.0, 20.0, 30.0, 0.0), None);
        assert_eq!(level, DegradationLevel::None);
    }

    #[test]
    fn isolated_critical_spike_is_not_critical() {
        // One dimension at critical: 2 points in the critical bucket is
        // below the minimum of 3, but carries severe (2 >= 2).
        let level = manager().detect_degradation_level(&metrics(0.5, 50.0, 20.0, 30.0, 0.0), None);
        assert_eq!(level, DegradationLevel::Severe);
    }

    #[test]
    fn two_critical_dimensions_reach_critical() {
        let level = manager().detect_degradation_level(&metrics(0.5, 5000.0, 20.0, 30.0, 0.0), None);
        assert_eq!(level, DegradationLevel::Critical);
    }

    #[test]
    fn single_moderate_crossing_is_moderate() {
        let level = manager().detect_degradation_level(&metrics(0.03, 50.0, 20.0, 30.0, 0.0), None);
        assert_eq!(level, DegradationLevel::Moderate);
    }

    #[test]
    fn agent_health_counts_when_provided() {
        let m = manager();
        let healthy = metrics(0.0, 50.0, 20.0, 30.0, 0.0);
        assert_eq!(m.detect_degradation_level(&healthy, Some(0.9)), DegradationLevel::None);
        assert_eq!(m.detect_degradation_level(&healthy, Some(0.3)), DegradationLevel::Severe);
    }

    #[test]
    fn reason_names_crossed_dimensions() {
        let assessment = manager().assess(&metrics(0.06, 1200.0, 20.0, 30.0, 0.0), None);
        let reason = assessment.reason();
        assert!(reason.contains("error_rate"));
        assert!(reason.contains("latency_p99"));
    }

    struct FailingStrategy;

    #[async_trait]
    impl DegradationStrategy for FailingStrategy {
        fn name(&self) -> &str {
            "failing"
        }

        async fn apply(&self, _event: &DegradationEvent) -> Result<()> {
            Err(Error::Internal { message: "strategy exploded".into() })
        }
    }

    struct CountingStrategy {
        applied: AtomicUsize,
    }

    #[async_trait]
    impl DegradationStrategy for CountingStrategy {
        fn name(&self) -> &str {
            "counting"
        }

        async fn apply(&self, _event: &DegradationEvent) -> Result<()> {
            self.applied.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transitions_record_events_and_recovery() {
        let m = manager();
        let degraded = metrics(0.5, 50.0, 20.0, 30.0, 0.0);
        let healthy = metrics(0.0, 50.0, 20.0, 30.0, 0.0);

        m.observe(&degraded).await;
        assert_eq!(m.current_level(), DegradationLevel::Severe);
        tokio::time::sleep(Duration::from_secs(30)).await;
        m.observe(&healthy).await;
        assert_eq!(m.current_level(), DegradationLevel::None);

        let events = m.events();
        assert_eq!(events.len(), 2);
        assert!(events[0].recovery.is_none());
        let recovery = events[1].recovery.expect("recovery duration recorded");
        assert!((recovery.as_secs_f64() - 30.0).abs() < 1.0, "recovery {recovery:?}");

        let stats = m.statistics();
        assert_eq!(stats.severe_events, 1);
        assert_eq!(stats.recoveries, 1);
        assert!(stats.average_recovery() >= Duration::from_secs(29));
    }

    #[tokio::test(start_paused = true)]
    async fn strategy_failure_is_isolated() {
        let m = manager();
        let counting = Arc::new(CountingStrategy { applied: AtomicUsize::new(0) });
        m.register_strategy(DegradationLevel::Severe, Arc::new(FailingStrategy));
        m.register_strategy(DegradationLevel::Severe, counting.clone());

        m.observe(&metrics(0.5, 50.0, 20.0, 30.0, 0.0)).await;
        assert_eq!(counting.applied.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn strategies_fire_only_on_increase() {
        let m = manager();
        let counting = Arc::new(CountingStrategy { applied: AtomicUsize::new(0) });
        m.register_strategy(DegradationLevel::Moderate, counting.clone());

        let severe = metrics(0.5, 50.0, 20.0, 30.0, 0.0);
        let moderate = metrics(0.03, 50.0, 20.0, 30.0, 0.0);
        m.observe(&severe).await;
        // Step down severe -> moderate records an event but triggers nothing.
        m.observe(&moderate).await;
        assert_eq!(counting.applied.load(Ordering::Relaxed), 0);
        assert_eq!(m.events().len(), 2);
    }
}
