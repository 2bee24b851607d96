//! Test-lifecycle orchestration.
//!
//! One [`StressTestOrchestrator`] owns the [`TestExecutionState`] value;
//! every other component observes it. Lifecycle calls are gated by the
//! current state and return an explicit failure, never a panic, when a
//! transition is not permitted.

use crate::error::{Error, Result};
use crate::generators::{GeneratorStatistics, LoadGenerator, LoadGeneratorConfig, Submitter};
use crate::injection::{ActiveFailure, FailureHook, FailureInjector};
use crate::metrics::{
    AggregatorConfig, MetricSource, MetricsAggregator, MetricsProbe, SystemMetrics,
};
use crate::monitoring::{
    DegradationEvent, DegradationManagerConfig, DegradationScoring, DegradationStats,
    DegradationThresholds, GracefulDegradationManager,
};
use crate::scenario::{CriteriaReport, TestScenario};
use crate::validators::{RecoveryThresholds, ResilienceReport, ResilienceValidator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

/// Execution state of a stress test. Exactly one orchestrator owns this
/// value at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TestExecutionState {
    #[default]
    Idle,
    Validating,
    Initializing,
    Running,
    Paused,
    Stopping,
    Completed,
    Failed,
}

impl std::fmt::Display for TestExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Events fired to lifecycle hooks as the state machine advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started { scenario_id: Uuid },
    Paused,
    Resumed,
    Stopped { reason: String },
    Completed { success: bool },
    Failed { reason: String },
}

/// Observer seam for lifecycle transitions; errors are isolated per hook.
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    fn name(&self) -> &str;
    async fn on_event(&self, event: &LifecycleEvent) -> Result<()>;
}

/// Tuning for the orchestrator and every component it owns.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    pub generator: LoadGeneratorConfig,
    pub aggregator: AggregatorConfig,
    pub thresholds: DegradationThresholds,
    pub scoring: DegradationScoring,
    pub degradation: DegradationManagerConfig,
    pub recovery: RecoveryThresholds,
}

/// Final results handed to the (external) storage and report layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestReport {
    pub scenario_id: Uuid,
    pub scenario_name: String,
    pub finished_at: DateTime<Utc>,
    /// Wall-clock run time, excluding paused intervals.
    pub elapsed: Duration,
    pub paused: Duration,
    pub generator: GeneratorStatistics,
    pub final_metrics: SystemMetrics,
    pub degradation_events: Vec<DegradationEvent>,
    pub degradation_stats: DegradationStats,
    pub resilience: ResilienceReport,
    pub criteria: CriteriaReport,
    pub stop_reason: Option<String>,
    pub success: bool,
}

struct OrchestratorState {
    state: TestExecutionState,
    scenario: Option<TestScenario>,
    run_started: Option<Instant>,
    paused_at: Option<Instant>,
    paused_total: Duration,
    stop_reason: Option<String>,
    report: Option<TestReport>,
}

/// Registers pre-failure baselines when failures activate and kicks off
/// recovery validation when they end naturally.
struct RecoveryCoordinator {
    resilience: Arc<ResilienceValidator>,
    probe: Arc<dyn MetricsProbe>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

#[async_trait]
impl FailureHook for RecoveryCoordinator {
    fn name(&self) -> &str {
        "recovery_coordinator"
    }

    async fn on_activated(&self, failure: &ActiveFailure) -> Result<()> {
        let baseline = self.probe.sample().await?;
        self.resilience
            .register_failure(failure.id, baseline, failure.scenario.duration);
        Ok(())
    }

    async fn on_deactivated(&self, failure: &ActiveFailure) -> Result<()> {
        let resilience = Arc::clone(&self.resilience);
        let probe = Arc::clone(&self.probe);
        let failure_id = failure.id;
        self.tasks.lock().push(tokio::spawn(async move {
            if let Err(err) = resilience.validate_recovery(failure_id, probe).await {
                warn!(%failure_id, error = %err, "recovery validation aborted");
            }
        }));
        Ok(())
    }
}

/// Top-level state machine sequencing validation, start, pause/resume,
/// stop, and completion of a stress test.
pub struct StressTestOrchestrator {
    generator: Arc<LoadGenerator>,
    injector: Arc<FailureInjector>,
    aggregator: Arc<MetricsAggregator>,
    degradation: Arc<GracefulDegradationManager>,
    resilience: Arc<ResilienceValidator>,
    recovery_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    hooks: RwLock<Vec<Arc<dyn LifecycleHook>>>,
    state: Mutex<OrchestratorState>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl StressTestOrchestrator {
    pub fn new(submitter: Arc<dyn Submitter>, config: OrchestratorConfig) -> Arc<Self> {
        let generator = Arc::new(LoadGenerator::with_config(submitter, config.generator));
        let aggregator = Arc::new(MetricsAggregator::new(config.aggregator));
        aggregator.register_metric_source(Arc::clone(&generator) as Arc<dyn MetricSource>);

        let degradation = Arc::new(
            GracefulDegradationManager::new(
                config.thresholds,
                config.scoring,
                config.degradation,
            )
            .with_default_strategies(),
        );
        let resilience = Arc::new(ResilienceValidator::new(config.recovery));

        let recovery_tasks = Arc::new(Mutex::new(Vec::new()));
        let injector = Arc::new(FailureInjector::new());
        injector.register_hook(Arc::new(RecoveryCoordinator {
            resilience: Arc::clone(&resilience),
            probe: Arc::clone(&generator) as Arc<dyn MetricsProbe>,
            tasks: Arc::clone(&recovery_tasks),
        }));

        Arc::new(Self {
            generator,
            injector,
            aggregator,
            degradation,
            resilience,
            recovery_tasks,
            hooks: RwLock::new(Vec::new()),
            state: Mutex::new(OrchestratorState {
                state: TestExecutionState::Idle,
                scenario: None,
                run_started: None,
                paused_at: None,
                paused_total: Duration::ZERO,
                stop_reason: None,
                report: None,
            }),
            watchdog: Mutex::new(None),
        })
    }

    pub fn register_hook(&self, hook: Arc<dyn LifecycleHook>) {
        self.hooks.write().push(hook);
    }

    /// Validate the scenario, start every component, and enter `Running`.
    pub async fn start(self: &Arc<Self>, scenario: TestScenario) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.state {
                TestExecutionState::Idle
                | TestExecutionState::Completed
                | TestExecutionState::Failed => {}
                other => return Err(Error::invalid_transition("start", other)),
            }
            state.state = TestExecutionState::Validating;
        }

        if let Err(err) = scenario.validate() {
            self.state.lock().state = TestExecutionState::Idle;
            warn!(scenario = %scenario.name, error = %err, "scenario rejected");
            return Err(err);
        }
        info!(scenario = %scenario.name, id = %scenario.id, "scenario validated");
        self.state.lock().state = TestExecutionState::Initializing;

        // Fresh accumulators for re-runs.
        self.degradation.reset();
        self.resilience.reset();

        if let Err(err) = self.start_components(&scenario) {
            self.abort_components().await;
            self.state.lock().state = TestExecutionState::Idle;
            return Err(err);
        }

        {
            let mut state = self.state.lock();
            state.state = TestExecutionState::Running;
            state.scenario = Some(scenario.clone());
            state.run_started = Some(Instant::now());
            state.paused_at = None;
            state.paused_total = Duration::ZERO;
            state.stop_reason = None;
            state.report = None;
        }
        self.spawn_watchdog(scenario.duration);
        info!(scenario = %scenario.name, "stress test running");
        self.fire(&LifecycleEvent::Started { scenario_id: scenario.id }).await;
        Ok(())
    }

    fn start_components(&self, scenario: &TestScenario) -> Result<()> {
        self.aggregator.start_collection()?;
        self.degradation
            .start(Arc::clone(&self.generator) as Arc<dyn MetricsProbe>)?;
        self.generator
            .start(scenario.profile.clone(), scenario.duration)?;
        self.injector.start(&scenario.failures);
        Ok(())
    }

    /// Suspend the worker pool; elapsed-time reporting excludes the pause.
    pub async fn pause(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.state != TestExecutionState::Running {
                return Err(Error::invalid_transition("pause", state.state));
            }
            state.state = TestExecutionState::Paused;
            state.paused_at = Some(Instant::now());
        }
        self.generator.set_paused(true);
        info!("stress test paused");
        self.fire(&LifecycleEvent::Paused).await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.state != TestExecutionState::Paused {
                return Err(Error::invalid_transition("resume", state.state));
            }
            if let Some(paused_at) = state.paused_at.take() {
                state.paused_total += paused_at.elapsed();
            }
            state.state = TestExecutionState::Running;
        }
        self.generator.set_paused(false);
        info!("stress test resumed");
        self.fire(&LifecycleEvent::Resumed).await;
        Ok(())
    }

    /// Stop early. The run is finalized and evaluated as it stands.
    pub async fn stop(&self, reason: &str) -> Result<()> {
        {
            let mut state = self.state.lock();
            match state.state {
                TestExecutionState::Running | TestExecutionState::Paused => {}
                other => return Err(Error::invalid_transition("stop", other)),
            }
            state.stop_reason = Some(reason.to_string());
        }
        info!(reason, "stress test stopping");
        self.fire(&LifecycleEvent::Stopped { reason: reason.to_string() }).await;
        self.finalize(None).await;
        Ok(())
    }

    /// Finish the run with an explicit verdict.
    pub async fn complete(&self, success: bool) -> Result<()> {
        {
            let state = self.state.lock();
            match state.state {
                TestExecutionState::Running | TestExecutionState::Paused => {}
                other => return Err(Error::invalid_transition("complete", other)),
            }
        }
        self.finalize(Some(success)).await;
        Ok(())
    }

    /// Wall-clock run time excluding paused intervals.
    pub fn elapsed(&self) -> Duration {
        let state = self.state.lock();
        let Some(run_started) = state.run_started else {
            return Duration::ZERO;
        };
        let mut elapsed = run_started.elapsed().saturating_sub(state.paused_total);
        if let Some(paused_at) = state.paused_at {
            elapsed = elapsed.saturating_sub(paused_at.elapsed());
        }
        elapsed
    }

    pub fn state(&self) -> TestExecutionState {
        self.state.lock().state
    }

    /// The results object, once the run has finalized.
    pub fn report(&self) -> Option<TestReport> {
        self.state.lock().report.clone()
    }

    pub fn generator(&self) -> &Arc<LoadGenerator> {
        &self.generator
    }

    pub fn aggregator(&self) -> &Arc<MetricsAggregator> {
        &self.aggregator
    }

    pub fn degradation(&self) -> &Arc<GracefulDegradationManager> {
        &self.degradation
    }

    pub fn resilience(&self) -> &Arc<ResilienceValidator> {
        &self.resilience
    }

    pub fn injector(&self) -> &Arc<FailureInjector> {
        &self.injector
    }

    fn spawn_watchdog(self: &Arc<Self>, duration: Duration) {
        let orchestrator = Arc::clone(self);
        *self.watchdog.lock() = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(500));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match orchestrator.state() {
                    TestExecutionState::Running | TestExecutionState::Paused => {}
                    _ => break,
                }
                if orchestrator.elapsed() >= duration {
                    // Natural end: verdict comes from the success criteria.
                    let _ = orchestrator.complete_if_active().await;
                    break;
                }
            }
        }));
    }

    async fn complete_if_active(&self) -> Result<()> {
        {
            let state = self.state.lock();
            match state.state {
                TestExecutionState::Running | TestExecutionState::Paused => {}
                other => return Err(Error::invalid_transition("complete", other)),
            }
        }
        self.finalize(None).await;
        Ok(())
    }

    /// Stop every component, assemble the report, and land in
    /// `Completed`/`Failed`. `success_override` of `None` takes the verdict
    /// from the scenario's success criteria.
    async fn finalize(&self, success_override: Option<bool>) {
        self.state.lock().state = TestExecutionState::Stopping;
        self.abort_components().await;

        let (scenario, run_elapsed, paused_total, stop_reason) = {
            let mut state = self.state.lock();
            if let Some(paused_at) = state.paused_at.take() {
                state.paused_total += paused_at.elapsed();
            }
            let elapsed = state
                .run_started
                .map(|started| started.elapsed().saturating_sub(state.paused_total))
                .unwrap_or(Duration::ZERO);
            (
                state.scenario.clone(),
                elapsed,
                state.paused_total,
                state.stop_reason.clone(),
            )
        };

        let final_metrics = self.generator.metrics_snapshot();
        let generator_stats = self.generator.statistics();
        let resilience_report = self.resilience.get_comprehensive_report();

        let report = scenario.as_ref().map(|scenario| {
            let criteria = scenario.criteria.evaluate(
                generator_stats.achieved_rate,
                Duration::from_secs_f64((final_metrics.latency.p99 / 1000.0).max(0.0)),
                final_metrics.error_rate,
                final_metrics.timeout_rate,
                resilience_report.resilience_score,
            );
            let success = success_override.unwrap_or(criteria.passed);
            TestReport {
                scenario_id: scenario.id,
                scenario_name: scenario.name.clone(),
                finished_at: Utc::now(),
                elapsed: run_elapsed,
                paused: paused_total,
                generator: generator_stats.clone(),
                final_metrics: final_metrics.clone(),
                degradation_events: self.degradation.events(),
                degradation_stats: self.degradation.statistics(),
                resilience: resilience_report.clone(),
                criteria,
                stop_reason: stop_reason.clone(),
                success,
            }
        });

        let success = report.as_ref().map(|r| r.success).unwrap_or(false);
        {
            let mut state = self.state.lock();
            state.report = report;
            state.state = if success {
                TestExecutionState::Completed
            } else if success_override == Some(false) {
                TestExecutionState::Failed
            } else {
                TestExecutionState::Completed
            };
        }
        info!(success, "stress test finalized");
        if success_override == Some(false) {
            self.fire(&LifecycleEvent::Failed { reason: "completed with failure verdict".into() })
                .await;
        } else {
            self.fire(&LifecycleEvent::Completed { success }).await;
        }
    }

    async fn abort_components(&self) {
        self.generator.stop().await;
        self.injector.stop().await;
        self.aggregator.stop().await;
        self.degradation.stop().await;
        let recovery_tasks: Vec<JoinHandle<()>> = self.recovery_tasks.lock().drain(..).collect();
        for task in &recovery_tasks {
            task.abort();
        }
        for task in recovery_tasks {
            let _ = task.await;
        }
    }

    async fn fire(&self, event: &LifecycleEvent) {
        let hooks: Vec<Arc<dyn LifecycleHook>> = self.hooks.read().clone();
        for hook in hooks {
            if let Err(err) = hook.on_event(event).await {
                warn!(hook = hook.name(), error = %err, "lifecycle hook failed");
            }
        }
    }
}
