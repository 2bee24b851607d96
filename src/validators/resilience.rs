//! Resilience mechanism validation.
//!
//! Four independent validations, each producing an immutable result record
//! that accumulates into per-category statistics: automatic recovery after
//! a failure's natural end, circuit-breaker state transitions, retry with
//! exponential backoff, and dead-letter reprocessing. A composite 0-100
//! resilience score averages the success rates of the categories that have
//! observations.

use crate::error::{Error, Result};
use crate::metrics::{MetricsProbe, SystemMetrics};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests pass through normally.
    Closed,
    /// Requests are blocked until the timeout elapses.
    Open,
    /// Limited probes allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Successes in half-open before closing.
    pub success_threshold: u32,
    /// Time in open before probing half-open.
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(30),
        }
    }
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Minimal driven circuit breaker standing in for the service's own.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state; open circuits lapse into half-open once the timeout
    /// has passed.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.state
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        inner.consecutive_successes = 0;
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::Open => {}
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) {
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.open_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                }
            }
        }
    }
}

/// Gates that must all hold simultaneously for recovery to be declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryThresholds {
    pub max_error_rate: f64,
    /// Throughput must regain this fraction of the pre-failure value.
    pub min_throughput_ratio: f64,
    /// P99 latency must fall back under this multiple of pre-failure.
    pub max_latency_ratio: f64,
    pub max_timeout_rate: f64,
    /// Give up and record a recovery failure after this long.
    pub recovery_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for RecoveryThresholds {
    fn default() -> Self {
        Self {
            max_error_rate: 0.02,
            min_throughput_ratio: 0.85,
            max_latency_ratio: 1.2,
            max_timeout_rate: 0.01,
            recovery_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Result of one recovery observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub failure_id: Uuid,
    pub recovered: bool,
    /// Time from the failure's natural end until recovery (or give-up).
    pub waited: Duration,
    pub baseline: SystemMetrics,
    pub final_metrics: Option<SystemMetrics>,
    pub recorded_at: DateTime<Utc>,
}

/// Result of one circuit-breaker drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerValidation {
    pub opened: bool,
    pub reclosed: bool,
    pub failures_to_open: u32,
    pub time_to_open: Duration,
    pub time_to_close: Duration,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Result of one retry/backoff drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryValidation {
    pub attempts: u32,
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
    pub exponential_backoff_detected: bool,
    pub within_max_attempts: bool,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Result of one dead-letter reprocessing drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqValidation {
    pub processed: usize,
    pub succeeded: usize,
    pub success_rate: f64,
    pub average_processing: Duration,
    pub passed: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Drive parameters for the retry validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryProbeConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// How many leading attempts fail before one succeeds.
    pub failing_attempts: u32,
}

impl Default for RetryProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            failing_attempts: 3,
        }
    }
}

/// A message that failed normal processing, replayed out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    pub enqueued_at: DateTime<Utc>,
    pub reason: String,
}

/// Out-of-band reprocessing seam driven by the DLQ validation.
#[async_trait]
pub trait DlqProcessor: Send + Sync {
    async fn process(&self, message: DeadLetter) -> Result<()>;
}

/// Deterministic stand-in processor: optional periodic failures plus a
/// fixed processing delay.
pub struct SimulatedDlqProcessor {
    pub fail_every: Option<u64>,
    pub processing_delay: Duration,
    counter: AtomicU64,
}

impl SimulatedDlqProcessor {
    pub fn new(fail_every: Option<u64>, processing_delay: Duration) -> Self {
        Self {
            fail_every,
            processing_delay,
            counter: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl DlqProcessor for SimulatedDlqProcessor {
    async fn process(&self, message: DeadLetter) -> Result<()> {
        sleep(self.processing_delay).await;
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(modulus) = self.fail_every {
            if n % modulus == 0 {
                return Err(Error::Internal {
                    message: format!("dead letter {} reprocessing failed", message.id),
                });
            }
        }
        Ok(())
    }
}

/// Success-rate summary for one validation category.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CategoryStats {
    pub observations: usize,
    pub successes: usize,
}

impl CategoryStats {
    pub fn success_rate(&self) -> Option<f64> {
        if self.observations == 0 {
            None
        } else {
            Some(self.successes as f64 / self.observations as f64)
        }
    }
}

/// Composite report across all four categories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceReport {
    pub recovery: CategoryStats,
    pub circuit_breaker: CategoryStats,
    pub retry: CategoryStats,
    pub dlq: CategoryStats,
    /// Mean of the available category success rates, scaled to 0-100.
    /// Categories without observations are excluded, not zero-filled.
    pub resilience_score: Option<f64>,
}

struct PendingFailure {
    baseline: SystemMetrics,
    registered_at: Instant,
    failure_duration: Duration,
}

/// Validates recovery, circuit breaking, retry backoff, and DLQ processing.
pub struct ResilienceValidator {
    thresholds: RecoveryThresholds,
    pending: DashMap<Uuid, PendingFailure>,
    recoveries: RwLock<Vec<RecoveryEvent>>,
    breaker_validations: RwLock<Vec<CircuitBreakerValidation>>,
    retry_validations: RwLock<Vec<RetryValidation>>,
    dlq_validations: RwLock<Vec<DlqValidation>>,
}

impl Default for ResilienceValidator {
    fn default() -> Self {
        Self::new(RecoveryThresholds::default())
    }
}

impl ResilienceValidator {
    pub fn new(thresholds: RecoveryThresholds) -> Self {
        Self {
            thresholds,
            pending: DashMap::new(),
            recoveries: RwLock::new(Vec::new()),
            breaker_validations: RwLock::new(Vec::new()),
            retry_validations: RwLock::new(Vec::new()),
            dlq_validations: RwLock::new(Vec::new()),
        }
    }

    /// Snapshot the pre-failure baseline for a scheduled failure.
    pub fn register_failure(&self, failure_id: Uuid, baseline: SystemMetrics, failure_duration: Duration) {
        debug!(%failure_id, "pre-failure baseline registered");
        self.pending.insert(
            failure_id,
            PendingFailure {
                baseline,
                registered_at: Instant::now(),
                failure_duration,
            },
        );
    }

    /// The four gates, evaluated against the pre-failure baseline. Recovery
    /// is declared only when every gate holds simultaneously.
    pub fn recovery_gates(&self, baseline: &SystemMetrics, current: &SystemMetrics) -> [(&'static str, bool); 4] {
        let throughput_ok = baseline.throughput_tps <= 0.0
            || current.throughput_tps >= baseline.throughput_tps * self.thresholds.min_throughput_ratio;
        let latency_ok = baseline.latency.p99 <= 0.0
            || current.latency.p99 <= baseline.latency.p99 * self.thresholds.max_latency_ratio;
        [
            ("error_rate", current.error_rate <= self.thresholds.max_error_rate),
            ("throughput", throughput_ok),
            ("latency_p99", latency_ok),
            ("timeout_rate", current.timeout_rate <= self.thresholds.max_timeout_rate),
        ]
    }

    /// Wait out the failure's declared duration, then poll until every gate
    /// holds or the recovery timeout elapses. A timeout is recorded as a
    /// failed recovery, not an error.
    pub async fn validate_recovery(
        &self,
        failure_id: Uuid,
        probe: Arc<dyn MetricsProbe>,
    ) -> Result<RecoveryEvent> {
        let (_, pending) = self.pending.remove(&failure_id).ok_or_else(|| Error::Internal {
            message: format!("no registered failure {failure_id}"),
        })?;

        let since_registration = pending.registered_at.elapsed();
        if since_registration < pending.failure_duration {
            sleep(pending.failure_duration - since_registration).await;
        }

        let wait_started = Instant::now();
        let mut final_metrics = None;
        let recovered = loop {
            match probe.sample().await {
                Ok(current) => {
                    let gates = self.recovery_gates(&pending.baseline, &current);
                    let all_hold = gates.iter().all(|(_, ok)| *ok);
                    final_metrics = Some(current);
                    if all_hold {
                        break true;
                    }
                    if wait_started.elapsed() >= self.thresholds.recovery_timeout {
                        let failing: Vec<&str> = gates
                            .iter()
                            .filter(|(_, ok)| !ok)
                            .map(|(name, _)| *name)
                            .collect();
                        warn!(%failure_id, ?failing, "recovery timeout, gates still failing");
                        break false;
                    }
                }
                Err(err) => {
                    debug!(%failure_id, error = %err, "probe failed during recovery polling");
                    if wait_started.elapsed() >= self.thresholds.recovery_timeout {
                        break false;
                    }
                }
            }
            sleep(self.thresholds.poll_interval).await;
        };

        let event = RecoveryEvent {
            failure_id,
            recovered,
            waited: wait_started.elapsed(),
            baseline: pending.baseline,
            final_metrics,
            recorded_at: Utc::now(),
        };
        info!(%failure_id, recovered, waited = ?event.waited, "recovery validation complete");
        self.recoveries.write().push(event.clone());
        Ok(event)
    }

    /// Drive a breaker through open, half-open, and back to closed.
    pub async fn validate_circuit_breaker(&self, config: CircuitBreakerConfig) -> CircuitBreakerValidation {
        let breaker = CircuitBreaker::new(config.clone());
        let drive_started = Instant::now();

        let mut failures = 0u32;
        while breaker.state() == CircuitState::Closed && failures < config.failure_threshold * 2 {
            breaker.record_failure();
            failures += 1;
        }
        let opened = breaker.state() == CircuitState::Open;
        let time_to_open = drive_started.elapsed();

        // Wait out the open timeout, then probe.
        sleep(config.open_timeout).await;
        let half_open = breaker.state() == CircuitState::HalfOpen;
        for _ in 0..config.success_threshold {
            breaker.record_success();
        }
        let reclosed = half_open && breaker.state() == CircuitState::Closed;
        let time_to_close = drive_started.elapsed() - time_to_open;

        let validation = CircuitBreakerValidation {
            opened,
            reclosed,
            failures_to_open: failures,
            time_to_open,
            time_to_close,
            passed: opened && reclosed && failures == config.failure_threshold,
            recorded_at: Utc::now(),
        };
        info!(
            opened,
            reclosed,
            failures_to_open = failures,
            "circuit breaker validation complete"
        );
        self.breaker_validations.write().push(validation.clone());
        validation
    }

    /// Drive a bounded retry loop with doubling backoff and assess the
    /// observed inter-attempt timings.
    pub async fn validate_retry_backoff(&self, config: RetryProbeConfig) -> RetryValidation {
        let mut delays = Vec::new();
        let mut delay = config.initial_delay;
        let mut previous: Option<Instant> = None;
        let mut attempts = 0u32;

        for attempt in 1..=config.max_attempts.max(1) {
            attempts = attempt;
            let now = Instant::now();
            if let Some(prev) = previous {
                delays.push(now - prev);
            }
            previous = Some(now);

            if attempt > config.failing_attempts {
                break;
            }
            if attempt == config.max_attempts {
                break;
            }
            sleep(delay).await;
            delay *= 2;
        }

        self.assess_retry_timings(&delays, attempts, config.max_attempts)
    }

    /// Assess already-observed inter-attempt timings. The exponential
    /// signature requires at least two gaps, each exceeding 1.5x the
    /// previous one.
    pub fn assess_retry_timings(
        &self,
        delays: &[Duration],
        attempts: u32,
        max_attempts: u32,
    ) -> RetryValidation {
        let exponential_backoff_detected = delays.len() >= 2
            && delays.windows(2).all(|pair| {
                pair[1].as_secs_f64() > pair[0].as_secs_f64() * 1.5
            });
        let within_max_attempts = attempts <= max_attempts;
        let validation = RetryValidation {
            attempts,
            max_attempts,
            delays: delays.to_vec(),
            exponential_backoff_detected,
            within_max_attempts,
            passed: exponential_backoff_detected && within_max_attempts,
            recorded_at: Utc::now(),
        };
        info!(
            attempts,
            exponential_backoff_detected, "retry validation complete"
        );
        self.retry_validations.write().push(validation.clone());
        validation
    }

    /// Replay `message_count` simulated dead letters through `processor`:
    /// success rate must reach 80% with sub-second average processing.
    pub async fn validate_dlq(
        &self,
        processor: Arc<dyn DlqProcessor>,
        message_count: usize,
    ) -> DlqValidation {
        let mut succeeded = 0usize;
        let mut total_processing = Duration::ZERO;
        for _ in 0..message_count {
            let message = DeadLetter {
                id: Uuid::new_v4(),
                enqueued_at: Utc::now(),
                reason: "processing failed upstream".to_string(),
            };
            let started = Instant::now();
            match processor.process(message).await {
                Ok(()) => succeeded += 1,
                Err(err) => debug!(error = %err, "dead letter reprocessing failed"),
            }
            total_processing += started.elapsed();
        }

        let success_rate = if message_count == 0 {
            0.0
        } else {
            succeeded as f64 / message_count as f64
        };
        let average_processing = if message_count == 0 {
            Duration::ZERO
        } else {
            total_processing / message_count as u32
        };
        let validation = DlqValidation {
            processed: message_count,
            succeeded,
            success_rate,
            average_processing,
            passed: success_rate >= 0.8 && average_processing < Duration::from_millis(1000),
            recorded_at: Utc::now(),
        };
        info!(
            processed = message_count,
            succeeded, success_rate, "dlq validation complete"
        );
        self.dlq_validations.write().push(validation.clone());
        validation
    }

    /// Combine all categories into one 0-100 resilience score.
    pub fn get_comprehensive_report(&self) -> ResilienceReport {
        let recovery = category(&self.recoveries.read(), |e: &RecoveryEvent| e.recovered);
        let circuit_breaker =
            category(&self.breaker_validations.read(), |v: &CircuitBreakerValidation| v.passed);
        let retry = category(&self.retry_validations.read(), |v: &RetryValidation| v.passed);
        let dlq = category(&self.dlq_validations.read(), |v: &DlqValidation| v.passed);

        let rates: Vec<f64> = [&recovery, &circuit_breaker, &retry, &dlq]
            .iter()
            .filter_map(|stats| stats.success_rate())
            .collect();
        let resilience_score = if rates.is_empty() {
            None
        } else {
            Some(rates.iter().sum::<f64>() / rates.len() as f64 * 100.0)
        };

        ResilienceReport {
            recovery,
            circuit_breaker,
            retry,
            dlq,
            resilience_score,
        }
    }

    pub fn recovery_events(&self) -> Vec<RecoveryEvent> {
        self.recoveries.read().clone()
    }

    /// Clear all accumulated records and pending registrations.
    pub fn reset(&self) {
        self.pending.clear();
        self.recoveries.write().clear();
        self.breaker_validations.write().clear();
        self.retry_validations.write().clear();
        self.dlq_validations.write().clear();
    }
}

fn category<T>(records: &[T], passed: impl Fn(&T) -> bool) -> CategoryStats {
    CategoryStats {
        observations: records.len(),
        successes: records.iter().filter(|r| passed(r)).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{LatencyPercentiles, ResourceUsage};
    use std::collections::VecDeque;

    fn metrics(throughput: f64, p99: f64, error_rate: f64, timeout_rate: f64) -> SystemMetrics {
        SystemMetrics {
            timestamp: Utc::now(),
            throughput_tps: throughput,
            latency: LatencyPercentiles { p50: p99 / 4.0, p90: p99 / 2.0, p95: p99 / 1.5, p99 },
            error_rate,
            timeout_rate,
            resources: ResourceUsage::default(),
        }
    }

    struct ScriptedProbe {
        responses: Mutex<VecDeque<SystemMetrics>>,
        steady: SystemMetrics,
    }

    #[async_trait]
    impl MetricsProbe for ScriptedProbe {
        async fn sample(&self) -> Result<SystemMetrics> {
            Ok(self.responses.lock().pop_front().unwrap_or_else(|| self.steady.clone()))
        }
    }

    fn thresholds_with_timeout(secs: u64) -> RecoveryThresholds {
        RecoveryThresholds {
            recovery_timeout: Duration::from_secs(secs),
            poll_interval: Duration::from_millis(500),
            ..RecoveryThresholds::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_declared_when_all_gates_hold() {
        let validator = ResilienceValidator::new(thresholds_with_timeout(60));
        let baseline = metrics(100.0, 100.0, 0.0, 0.0);
        let id = Uuid::new_v4();
        validator.register_failure(id, baseline, Duration::from_secs(2));

        let probe = Arc::new(ScriptedProbe {
            // Two degraded polls, then healthy.
            responses: Mutex::new(VecDeque::from([
                metrics(40.0, 300.0, 0.2, 0.05),
                metrics(70.0, 150.0, 0.05, 0.02),
            ])),
            steady: metrics(95.0, 105.0, 0.01, 0.0),
        });
        let event = validator.validate_recovery(id, probe).await.unwrap();
        assert!(event.recovered);
        assert!(event.waited >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn single_failing_gate_blocks_recovery() {
        let validator = ResilienceValidator::new(thresholds_with_timeout(5));
        let baseline = metrics(100.0, 100.0, 0.0, 0.0);
        let id = Uuid::new_v4();
        validator.register_failure(id, baseline, Duration::from_secs(1));

        // Error rate 0.03 while everything else is fully recovered.
        let probe = Arc::new(ScriptedProbe {
            responses: Mutex::new(VecDeque::new()),
            steady: metrics(100.0, 100.0, 0.03, 0.0),
        });
        let event = validator.validate_recovery(id, probe).await.unwrap();
        assert!(!event.recovered, "error-rate gate alone must block recovery");
        assert!(event.waited >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_and_recloses() {
        let validator = ResilienceValidator::default();
        let config = CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(10),
        };
        let validation = validator.validate_circuit_breaker(config).await;
        assert!(validation.opened);
        assert!(validation.reclosed);
        assert_eq!(validation.failures_to_open, 5);
        assert!(validation.time_to_close >= Duration::from_secs(10));
        assert!(validation.passed);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_backoff_detected_on_doubling() {
        let validator = ResilienceValidator::default();
        let validation = validator
            .validate_retry_backoff(RetryProbeConfig {
                max_attempts: 5,
                initial_delay: Duration::from_millis(100),
                failing_attempts: 3,
            })
            .await;
        assert_eq!(validation.attempts, 4);
        assert!(validation.within_max_attempts);
        assert_eq!(validation.delays.len(), 3);
        assert!(validation.exponential_backoff_detected);
        assert!(validation.passed);
    }

    #[test]
    fn constant_timings_are_not_exponential() {
        let validator = ResilienceValidator::default();
        let constant = [Duration::from_millis(100); 4];
        let validation = validator.assess_retry_timings(&constant, 5, 5);
        assert!(!validation.exponential_backoff_detected);
        assert!(!validation.passed);
    }

    #[tokio::test(start_paused = true)]
    async fn dlq_pass_and_fail_paths() {
        let validator = ResilienceValidator::default();
        let reliable = Arc::new(SimulatedDlqProcessor::new(None, Duration::from_millis(10)));
        let ok = validator.validate_dlq(reliable, 20).await;
        assert_eq!(ok.succeeded, 20);
        assert!(ok.passed);

        // Every other message fails: 50% success rate misses the 80% bar.
        let flaky = Arc::new(SimulatedDlqProcessor::new(Some(2), Duration::from_millis(10)));
        let bad = validator.validate_dlq(flaky, 20).await;
        assert!((bad.success_rate - 0.5).abs() < 1e-9);
        assert!(!bad.passed);
    }

    #[tokio::test(start_paused = true)]
    async fn report_excludes_empty_categories() {
        let validator = ResilienceValidator::default();
        validator.validate_circuit_breaker(CircuitBreakerConfig::default()).await;
        validator
            .validate_retry_backoff(RetryProbeConfig::default())
            .await;

        let report = validator.get_comprehensive_report();
        assert_eq!(report.recovery.observations, 0);
        assert_eq!(report.circuit_breaker.observations, 1);
        // Two passing categories, none zero-filled: full marks.
        assert_eq!(report.resilience_score, Some(100.0));
    }

    #[test]
    fn empty_report_has_no_score() {
        let validator = ResilienceValidator::default();
        assert!(validator.get_comprehensive_report().resilience_score.is_none());
    }
}
