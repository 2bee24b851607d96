//! # Tempest
//!
//! Stress-testing harness for a remote, agent-based transaction-processing
//! service: controlled synthetic load, timeline-driven failure injection,
//! continuous metrics aggregation and streaming, degradation detection, and
//! resilience validation.
//!
//! ## Anatomy
//!
//! - [`generators`] — a [`RateController`](generators::RateController) paces
//!   submission to a target rate; a [`LoadGenerator`](generators::LoadGenerator)
//!   drives a worker pool through an injected [`Submitter`](generators::Submitter)
//!   callback while a pattern controller retargets the rate over time.
//! - [`injection`] — a [`FailureInjector`](injection::FailureInjector)
//!   activates failure scenarios on independent timers and buckets the sum
//!   of active severities into a degradation level.
//! - [`metrics`] — a [`MetricsAggregator`](metrics::MetricsAggregator) polls
//!   registered sources on a fixed interval into bounded ring buffers and
//!   fans composed snapshots out to subscribers; a
//!   [`MetricsStreamer`](metrics::MetricsStreamer) serves external observers
//!   over a subscription/filter/batching protocol.
//! - [`monitoring`] — a
//!   [`GracefulDegradationManager`](monitoring::GracefulDegradationManager)
//!   scores health per dimension, classifies a discrete level, triggers
//!   level-specific strategies, and tracks recovery durations.
//! - [`validators`] — a
//!   [`ResilienceValidator`](validators::ResilienceValidator) validates
//!   automatic recovery, circuit breaking, retry backoff, and dead-letter
//!   reprocessing, then folds them into one resilience score.
//! - [`orchestration`] — a
//!   [`StressTestOrchestrator`](orchestration::StressTestOrchestrator)
//!   sequences the whole run through an explicit state machine.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tempest::prelude::*;
//!
//! struct NoopSubmitter;
//!
//! #[async_trait]
//! impl Submitter for NoopSubmitter {
//!     async fn submit(
//!         &self,
//!         _unit: WorkUnit,
//!     ) -> std::result::Result<(), SubmissionFailure> {
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tempest::Result<()> {
//!     tempest::observability::setup_observability("info")?;
//!
//!     let orchestrator = StressTestOrchestrator::new(
//!         Arc::new(NoopSubmitter),
//!         OrchestratorConfig::default(),
//!     );
//!     let scenario =
//!         TestScenario::ramp_stress(100.0, 1000.0, Duration::from_secs(300));
//!     orchestrator.start(scenario).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod generators;
pub mod injection;
pub mod metrics;
pub mod monitoring;
pub mod observability;
pub mod orchestration;
pub mod scenario;
pub mod validators;

pub use error::{Error, Result};
pub use generators::{LoadGenerator, RateController};
pub use injection::FailureInjector;
pub use metrics::{MetricsAggregator, MetricsStreamer};
pub use monitoring::GracefulDegradationManager;
pub use orchestration::StressTestOrchestrator;
pub use scenario::TestScenario;
pub use validators::ResilienceValidator;

/// Common imports for harness embedders and tests.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::generators::{
        GeneratorStatistics, LoadGenerator, LoadGeneratorConfig, RateController,
        SubmissionFailure, Submitter, WorkUnit,
    };
    pub use crate::injection::{ActiveFailure, FailureHook, FailureInjector};
    pub use crate::metrics::{
        AggregatedUpdate, AggregatorConfig, LatencyPercentiles, MetricKind, MetricSource,
        MetricsAggregator, MetricsProbe, MetricsStreamer, MetricsSubscriber, StreamSink,
        StreamerConfig, SystemMetrics,
    };
    pub use crate::monitoring::{
        DegradationEvent, DegradationLevel, DegradationStrategy, DegradationThresholds,
        GracefulDegradationManager,
    };
    pub use crate::orchestration::{
        LifecycleEvent, LifecycleHook, OrchestratorConfig, StressTestOrchestrator,
        TestExecutionState, TestReport,
    };
    pub use crate::scenario::{
        FailureKind, FailureScenario, LoadProfile, SuccessCriteria, TestScenario,
    };
    pub use crate::validators::{ResilienceReport, ResilienceValidator};

    pub use async_trait::async_trait;
    pub use std::sync::Arc;
    pub use std::time::Duration;
}

/// Harness-wide defaults.
pub mod constants {
    use std::time::Duration;

    /// Default worker pool size for load generation.
    pub const DEFAULT_WORKER_COUNT: usize = 10;

    /// Response-time samples retained for percentile computation.
    pub const RESPONSE_TIME_WINDOW: usize = 1000;

    /// Default metrics collection interval.
    pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(1);

    /// Ramp window cap for the ramp-up load profile.
    pub const MAX_RAMP_WINDOW: Duration = Duration::from_secs(60);

    /// Recovery is declared failed after waiting this long by default.
    pub const DEFAULT_RECOVERY_TIMEOUT: Duration = Duration::from_secs(120);
}
