//! Health monitoring: degradation classification, strategies, and
//! recovery accounting.

pub mod degradation;

pub use degradation::{
    DegradationAssessment, DegradationEvent, DegradationLevel, DegradationManagerConfig,
    DegradationScoring, DegradationStats, DegradationStrategy, DegradationThresholds,
    DimensionCrossing, DimensionThresholds, GracefulDegradationManager, HealthDimension,
};
