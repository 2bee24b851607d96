//! Failure injection on the test timeline.
//!
//! Each [`FailureScenario`] gets an independent timer task: sleep until its
//! start offset, activate, apply kind-specific side effects through the
//! registered hooks, sleep out its duration, deactivate. Scenarios run
//! concurrently; overlapping failures are all active at once and their
//! severities sum into an aggregate degradation level.

use crate::monitoring::DegradationLevel;
use crate::scenario::FailureScenario;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

/// A failure currently applied against the service.
#[derive(Debug, Clone)]
pub struct ActiveFailure {
    pub id: Uuid,
    pub scenario: FailureScenario,
    pub activated_at: DateTime<Utc>,
}

/// Side-effect seam invoked on activation and deactivation.
///
/// The resilience validator registers itself here to snapshot pre-failure
/// baselines; errors are isolated per hook and never disturb the timers.
#[async_trait]
pub trait FailureHook: Send + Sync {
    fn name(&self) -> &str;
    async fn on_activated(&self, failure: &ActiveFailure) -> crate::Result<()>;
    async fn on_deactivated(&self, failure: &ActiveFailure) -> crate::Result<()>;
}

/// Schedules and activates failure scenarios relative to test start.
pub struct FailureInjector {
    active: Arc<DashMap<Uuid, ActiveFailure>>,
    hooks: Arc<RwLock<Vec<Arc<dyn FailureHook>>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for FailureInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl FailureInjector {
    pub fn new() -> Self {
        Self {
            active: Arc::new(DashMap::new()),
            hooks: Arc::new(RwLock::new(Vec::new())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn register_hook(&self, hook: Arc<dyn FailureHook>) {
        self.hooks.write().push(hook);
    }

    /// Schedule one independent timer per scenario, measured from now
    /// (the caller invokes this at test start).
    pub fn start(&self, scenarios: &[FailureScenario]) {
        let mut tasks = self.tasks.lock();
        for scenario in scenarios.iter().cloned() {
            let active = Arc::clone(&self.active);
            let hooks = Arc::clone(&self.hooks);
            tasks.push(tokio::spawn(run_failure_timer(scenario, active, hooks)));
        }
        info!(scheduled = scenarios.len(), "failure scenarios scheduled");
    }

    /// Sum of active severities, bucketed:
    /// >= 2.0 critical, >= 1.0 severe, >= 0.5 moderate, else none.
    pub fn degradation_level(&self) -> DegradationLevel {
        let total: f64 = self.active.iter().map(|entry| entry.scenario.severity).sum();
        if total >= 2.0 {
            DegradationLevel::Critical
        } else if total >= 1.0 {
            DegradationLevel::Severe
        } else if total >= 0.5 {
            DegradationLevel::Moderate
        } else {
            DegradationLevel::None
        }
    }

    pub fn active_failures(&self) -> Vec<ActiveFailure> {
        self.active.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Cancel every pending and active timer immediately. Failures are not
    /// guaranteed to reach their natural deactivation.
    pub async fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            let _ = handle.await;
        }
        self.active.clear();
        info!("failure injector stopped");
    }
}

async fn run_failure_timer(
    scenario: FailureScenario,
    active: Arc<DashMap<Uuid, ActiveFailure>>,
    hooks: Arc<RwLock<Vec<Arc<dyn FailureHook>>>>,
) {
    sleep(scenario.start_offset).await;

    let failure = ActiveFailure {
        id: Uuid::new_v4(),
        scenario: scenario.clone(),
        activated_at: Utc::now(),
    };
    active.insert(failure.id, failure.clone());
    info!(
        kind = %scenario.kind,
        severity = scenario.severity,
        duration_secs = scenario.duration.as_secs(),
        "failure activated"
    );
    notify_hooks(&hooks, &failure, true).await;

    sleep(scenario.duration).await;

    if let Some((_, failure)) = active.remove(&failure.id) {
        info!(kind = %scenario.kind, "failure deactivated");
        notify_hooks(&hooks, &failure, false).await;
    }
}

async fn notify_hooks(
    hooks: &RwLock<Vec<Arc<dyn FailureHook>>>,
    failure: &ActiveFailure,
    activated: bool,
) {
    let snapshot: Vec<Arc<dyn FailureHook>> = hooks.read().clone();
    for hook in snapshot {
        let result = if activated {
            hook.on_activated(failure).await
        } else {
            hook.on_deactivated(failure).await
        };
        if let Err(err) = result {
            warn!(hook = hook.name(), error = %err, "failure hook failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::FailureKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingHook {
        activations: AtomicUsize,
        deactivations: AtomicUsize,
    }

    #[async_trait]
    impl FailureHook for CountingHook {
        fn name(&self) -> &str {
            "counting"
        }

        async fn on_activated(&self, _failure: &ActiveFailure) -> crate::Result<()> {
            self.activations.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        async fn on_deactivated(&self, _failure: &ActiveFailure) -> crate::Result<()> {
            self.deactivations.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn failure(offset_secs: u64, duration_secs: u64, severity: f64) -> FailureScenario {
        FailureScenario::new(
            FailureKind::ErrorInjection,
            Duration::from_secs(offset_secs),
            Duration::from_secs(duration_secs),
            severity,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_severities_sum_into_level() {
        let injector = FailureInjector::new();
        injector.start(&[failure(0, 30, 0.6), failure(0, 30, 0.6)]);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(injector.active_failures().len(), 2);
        assert_eq!(injector.degradation_level(), DegradationLevel::Severe);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(injector.degradation_level(), DegradationLevel::None);
        injector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn degradation_buckets() {
        let injector = FailureInjector::new();
        injector.start(&[failure(0, 60, 0.5)]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(injector.degradation_level(), DegradationLevel::Moderate);

        injector.start(&[failure(0, 60, 0.7), failure(0, 60, 0.9)]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(injector.degradation_level(), DegradationLevel::Critical);
        injector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hooks_fire_on_activation_and_deactivation() {
        let injector = FailureInjector::new();
        let hook = Arc::new(CountingHook {
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
        });
        injector.register_hook(hook.clone());
        injector.start(&[failure(1, 2, 0.4)]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(hook.activations.load(Ordering::Relaxed), 1);
        assert_eq!(hook.deactivations.load(Ordering::Relaxed), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(hook.deactivations.load(Ordering::Relaxed), 1);
        injector.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_pending_timers() {
        let injector = FailureInjector::new();
        injector.start(&[failure(3600, 60, 0.9)]);
        injector.stop().await;
        assert!(injector.active_failures().is_empty());
        assert_eq!(injector.degradation_level(), DegradationLevel::None);
    }
}
