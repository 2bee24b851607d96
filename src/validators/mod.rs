//! Validation of the service's resilience mechanisms.

pub mod resilience;

pub use resilience::{
    CategoryStats, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerValidation, CircuitState,
    DeadLetter, DlqProcessor, DlqValidation, RecoveryEvent, RecoveryThresholds, ResilienceReport,
    ResilienceValidator, RetryProbeConfig, RetryValidation, SimulatedDlqProcessor,
};
