//! Load generation: rate pacing and the worker pool driving the
//! submission callback against the system under test.

pub mod load;
pub mod rate;

pub use load::{
    GeneratorStatistics, LoadGenerator, LoadGeneratorConfig, SubmissionFailure, Submitter,
    WorkUnit,
};
pub use rate::RateController;
