//! Worker-pool load generation following a time-varying profile.

use crate::error::{Error, Result};
use crate::generators::rate::RateController;
use crate::metrics::{LatencyPercentiles, MetricsProbe, SystemMetrics};
use crate::scenario::LoadProfile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Opaque unit of work handed to the submission callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

/// Why a single submission did not succeed.
///
/// Failures are tallied into the error and timeout rates, never propagated
/// out of the worker loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmissionFailure {
    #[error("submission rejected: {0}")]
    Rejected(String),
    #[error("submission timed out after {0:?}")]
    Timeout(Duration),
}

/// The boundary to the system under test: one async call per unit of work.
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn submit(&self, unit: WorkUnit) -> std::result::Result<(), SubmissionFailure>;
}

/// Tuning for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadGeneratorConfig {
    /// Fixed worker pool size.
    pub worker_count: usize,
    /// Most-recent response-time samples retained for percentiles.
    pub response_window: usize,
    /// How often the pattern controller retargets the rate.
    pub pattern_tick: Duration,
}

impl Default for LoadGeneratorConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            response_window: 1000,
            pattern_tick: Duration::from_secs(1),
        }
    }
}

impl LoadGeneratorConfig {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count.max(1);
        self
    }

    pub fn with_response_window(mut self, window: usize) -> Self {
        self.response_window = window.max(1);
        self
    }
}

/// Counters and derived rates for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneratorStatistics {
    pub total_submitted: u64,
    pub total_failed: u64,
    pub total_timed_out: u64,
    pub target_rate: f64,
    pub achieved_rate: f64,
    pub peak_rate: f64,
    pub error_rate: f64,
    pub timeout_rate: f64,
    pub elapsed: Duration,
}

struct RunState {
    profile: LoadProfile,
    duration: Duration,
    rate: RateController,
    submitted: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    peak_rate_bits: AtomicU64,
    response_times_ms: RwLock<VecDeque<f64>>,
    response_window: usize,
}

impl RunState {
    fn record_response_time(&self, elapsed_ms: f64) {
        let mut ring = self.response_times_ms.write();
        if ring.len() == self.response_window {
            ring.pop_front();
        }
        ring.push_back(elapsed_ms);
    }
}

/// Runs a fixed-size worker pool against one shared [`RateController`],
/// while a pattern controller task retargets the rate over time according
/// to the scenario's [`LoadProfile`].
pub struct LoadGenerator {
    config: LoadGeneratorConfig,
    submitter: Arc<dyn Submitter>,
    run: RwLock<Option<Arc<RunState>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    paused: Mutex<Option<watch::Sender<bool>>>,
}

impl LoadGenerator {
    pub fn new(submitter: Arc<dyn Submitter>) -> Self {
        Self::with_config(submitter, LoadGeneratorConfig::default())
    }

    pub fn with_config(submitter: Arc<dyn Submitter>, config: LoadGeneratorConfig) -> Self {
        Self {
            config,
            submitter,
            run: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
            shutdown: Mutex::new(None),
            paused: Mutex::new(None),
        }
    }

    /// Spawn the worker pool and pattern controller for one run.
    ///
    /// The run ends on its own once `duration` elapses, or earlier when
    /// [`stop`](Self::stop) is called.
    pub fn start(&self, profile: LoadProfile, duration: Duration) -> Result<()> {
        if self.is_running() {
            return Err(Error::invalid_transition("start load generator", "running"));
        }

        let state = Arc::new(RunState {
            rate: RateController::new(profile.initial_rate()),
            profile,
            duration,
            submitted: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            peak_rate_bits: AtomicU64::new(0),
            response_times_ms: RwLock::new(VecDeque::with_capacity(self.config.response_window)),
            response_window: self.config.response_window,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (paused_tx, paused_rx) = watch::channel(false);

        let mut handles = Vec::with_capacity(self.config.worker_count + 1);
        for worker_id in 0..self.config.worker_count {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&state),
                Arc::clone(&self.submitter),
                shutdown_rx.clone(),
                paused_rx.clone(),
            )));
        }
        handles.push(tokio::spawn(pattern_loop(
            Arc::clone(&state),
            shutdown_tx.clone(),
            shutdown_rx,
            self.config.pattern_tick,
        )));

        info!(
            workers = self.config.worker_count,
            duration_secs = duration.as_secs(),
            "load generator started"
        );

        *self.run.write() = Some(state);
        *self.tasks.lock() = handles;
        *self.shutdown.lock() = Some(shutdown_tx);
        *self.paused.lock() = Some(paused_tx);
        Ok(())
    }

    /// Cancel all workers and await their termination; no background work
    /// survives this call.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().as_ref() {
            let _ = tx.send(true);
        }
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        futures::future::join_all(handles).await;
        *self.shutdown.lock() = None;
        *self.paused.lock() = None;
        info!("load generator stopped");
    }

    /// Suspend or resume the worker pool. The pacing schedule keeps running
    /// while paused, so resuming produces a catch-up burst by design.
    pub fn set_paused(&self, paused: bool) {
        if let Some(tx) = self.paused.lock().as_ref() {
            let _ = tx.send(paused);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown
            .lock()
            .as_ref()
            .map(|tx| !*tx.borrow())
            .unwrap_or(false)
    }

    /// Counters and derived rates for the current (or most recent) run.
    pub fn statistics(&self) -> GeneratorStatistics {
        let Some(state) = self.run.read().as_ref().map(Arc::clone) else {
            return GeneratorStatistics::default();
        };
        let submitted = state.submitted.load(Ordering::Relaxed);
        let failed = state.failed.load(Ordering::Relaxed);
        let timed_out = state.timed_out.load(Ordering::Relaxed);
        let errors = failed + timed_out;
        GeneratorStatistics {
            total_submitted: submitted,
            total_failed: failed,
            total_timed_out: timed_out,
            target_rate: state.rate.target_rate(),
            achieved_rate: state.rate.current_rate(),
            peak_rate: f64::from_bits(state.peak_rate_bits.load(Ordering::Relaxed)),
            error_rate: ratio(errors, submitted),
            timeout_rate: ratio(timed_out, submitted),
            elapsed: state.rate.elapsed(),
        }
    }

    /// Derive a [`SystemMetrics`] snapshot from the counters and the
    /// response-time ring buffer.
    pub fn metrics_snapshot(&self) -> SystemMetrics {
        let Some(state) = self.run.read().as_ref().map(Arc::clone) else {
            return SystemMetrics::empty();
        };
        let stats = self.statistics();
        let samples: Vec<f64> = state.response_times_ms.read().iter().copied().collect();
        SystemMetrics {
            timestamp: Utc::now(),
            throughput_tps: stats.achieved_rate,
            latency: LatencyPercentiles::from_samples(&samples),
            error_rate: stats.error_rate,
            timeout_rate: stats.timeout_rate,
            resources: Default::default(),
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

async fn worker_loop(
    worker_id: usize,
    state: Arc<RunState>,
    submitter: Arc<dyn Submitter>,
    mut shutdown: watch::Receiver<bool>,
    mut paused: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        if *paused.borrow() {
            tokio::select! {
                changed = paused.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = state.rate.wait_for_next_slot() => {
                let unit = WorkUnit {
                    sequence: state.submitted.fetch_add(1, Ordering::Relaxed),
                    created_at: Utc::now(),
                };
                let started = Instant::now();
                match submitter.submit(unit).await {
                    Ok(()) => {}
                    Err(SubmissionFailure::Timeout(_)) => {
                        state.timed_out.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(SubmissionFailure::Rejected(_)) => {
                        state.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                state.record_response_time(started.elapsed().as_secs_f64() * 1000.0);
            }
        }
    }
    debug!(worker_id, "worker stopped");
}

/// Retargets the shared rate controller once per tick according to the
/// profile, and ends the run when the scenario duration elapses.
async fn pattern_loop(
    state: Arc<RunState>,
    shutdown: watch::Sender<bool>,
    mut shutdown_rx: watch::Receiver<bool>,
    tick: Duration,
) {
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut rng = StdRng::from_entropy();
    let mut chaos_rate = match state.profile {
        LoadProfile::Chaos { min_tps, max_tps, .. } => rng.gen_range(min_tps..=max_tps),
        _ => 0.0,
    };
    let mut next_chaos_change = match state.profile {
        LoadProfile::Chaos { change_interval, .. } => change_interval,
        _ => Duration::ZERO,
    };

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown_rx.changed() => break,
        }
        if *shutdown.borrow() {
            break;
        }
        let elapsed = state.rate.elapsed();
        if elapsed >= state.duration {
            debug!("scenario duration elapsed, ending run");
            let _ = shutdown.send(true);
            break;
        }

        let target = match state.profile.rate_at(elapsed, state.duration) {
            Some(rate) => rate,
            None => {
                if let LoadProfile::Chaos { min_tps, max_tps, change_interval } = state.profile {
                    if elapsed >= next_chaos_change {
                        chaos_rate = rng.gen_range(min_tps..=max_tps);
                        next_chaos_change += change_interval;
                        debug!(rate = chaos_rate, "chaos rate redrawn");
                    }
                }
                chaos_rate
            }
        };
        state.rate.update_rate(target);

        let achieved = state.rate.current_rate();
        let peak = f64::from_bits(state.peak_rate_bits.load(Ordering::Relaxed));
        if achieved > peak {
            state.peak_rate_bits.store(achieved.to_bits(), Ordering::Relaxed);
        }
        if achieved > 0.0 && target > 0.0 && achieved < target * 0.5 {
            warn!(target, achieved, "achieved rate lagging far behind target");
        }
    }
}

#[async_trait]
impl crate::metrics::MetricSource for LoadGenerator {
    fn name(&self) -> &str {
        "load_generator"
    }

    async fn collect(&self) -> Result<std::collections::HashMap<String, f64>> {
        let stats = self.statistics();
        let snapshot = self.metrics_snapshot();
        Ok(std::collections::HashMap::from([
            ("total_submitted".to_string(), stats.total_submitted as f64),
            ("total_failed".to_string(), stats.total_failed as f64),
            ("total_timed_out".to_string(), stats.total_timed_out as f64),
            ("target_rate".to_string(), stats.target_rate),
            ("achieved_rate".to_string(), stats.achieved_rate),
            ("error_rate".to_string(), stats.error_rate),
            ("timeout_rate".to_string(), stats.timeout_rate),
            ("latency_p99_ms".to_string(), snapshot.latency.p99),
        ]))
    }
}

#[async_trait]
impl MetricsProbe for LoadGenerator {
    async fn sample(&self) -> Result<SystemMetrics> {
        Ok(self.metrics_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSubmitter {
        accepted: AtomicU64,
        fail_every: Option<u64>,
    }

    impl CountingSubmitter {
        fn always_ok() -> Self {
            Self { accepted: AtomicU64::new(0), fail_every: None }
        }

        fn failing_every(n: u64) -> Self {
            Self { accepted: AtomicU64::new(0), fail_every: Some(n) }
        }
    }

    #[async_trait]
    impl Submitter for CountingSubmitter {
        async fn submit(&self, unit: WorkUnit) -> std::result::Result<(), SubmissionFailure> {
            if let Some(n) = self.fail_every {
                if unit.sequence % n == 0 {
                    return Err(SubmissionFailure::Rejected("injected".into()));
                }
            }
            self.accepted.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sustained_run_converges_on_target() {
        let submitter = Arc::new(CountingSubmitter::always_ok());
        let generator = LoadGenerator::with_config(
            Arc::clone(&submitter) as Arc<dyn Submitter>,
            LoadGeneratorConfig::default().with_workers(4),
        );
        generator
            .start(LoadProfile::Sustained { tps: 100.0 }, Duration::from_secs(5))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        generator.stop().await;

        let stats = generator.statistics();
        let expected = 500.0;
        let total = stats.total_submitted as f64;
        assert!(
            (total - expected).abs() <= expected * 0.05 + 4.0,
            "total {total} not within 5% of {expected}"
        );
        assert_eq!(stats.total_failed, 0);
        assert_eq!(stats.error_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn submission_failures_are_counted_not_raised() {
        let submitter = Arc::new(CountingSubmitter::failing_every(2));
        let generator = LoadGenerator::with_config(
            submitter,
            LoadGeneratorConfig::default().with_workers(2),
        );
        generator
            .start(LoadProfile::Sustained { tps: 200.0 }, Duration::from_secs(2))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        generator.stop().await;

        let stats = generator.statistics();
        assert!(stats.total_submitted > 0);
        assert!(
            (stats.error_rate - 0.5).abs() < 0.1,
            "error rate {} should be near 0.5",
            stats.error_rate
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_all_workers() {
        let generator = LoadGenerator::new(Arc::new(CountingSubmitter::always_ok()));
        generator
            .start(LoadProfile::Sustained { tps: 50.0 }, Duration::from_secs(3600))
            .unwrap();
        assert!(generator.is_running());
        generator.stop().await;
        assert!(!generator.is_running());
        assert!(generator.tasks.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_is_rejected() {
        let generator = LoadGenerator::new(Arc::new(CountingSubmitter::always_ok()));
        generator
            .start(LoadProfile::Sustained { tps: 10.0 }, Duration::from_secs(60))
            .unwrap();
        let err = generator
            .start(LoadProfile::Sustained { tps: 10.0 }, Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
        generator.stop().await;
    }
}
