//! Error types for the tempest harness.

use thiserror::Error;

/// Main error type for tempest operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Scenario rejected before start; carries every violation found.
    #[error("invalid scenario: {}", violations.join("; "))]
    ScenarioValidation { violations: Vec<String> },

    /// Lifecycle call not permitted in the current execution state.
    #[error("cannot {operation} while {state}")]
    InvalidStateTransition { operation: String, state: String },

    /// A registered metric source failed to produce a payload.
    #[error("metric source '{source_name}' failed: {message}")]
    SourceCollection { source_name: String, message: String },

    /// A metrics subscriber failed while being notified.
    #[error("subscriber '{subscriber}' failed: {message}")]
    SubscriberNotification { subscriber: String, message: String },

    /// Delivery to a streaming observer failed.
    #[error("stream delivery failed: {message}")]
    Streaming { message: String },

    /// Probing the system under test for a metrics sample failed.
    #[error("metrics probe failed: {message}")]
    Probe { message: String },

    /// Configuration errors
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Internal harness errors
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Shorthand for an invalid lifecycle call.
    pub fn invalid_transition(operation: &str, state: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            operation: operation.to_string(),
            state: state.to_string(),
        }
    }
}

/// Result type alias for tempest operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Streaming {
            message: err.to_string(),
        }
    }
}
