//! Scenario definitions for stress-test runs.
//!
//! A [`TestScenario`] bundles a time-varying [`LoadProfile`], a set of
//! [`FailureScenario`]s injected on a timeline, and the [`SuccessCriteria`]
//! the run is judged against. Scenarios are validated before use and are
//! read-only once a test starts.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Time-varying target throughput for a test run.
///
/// All rates are in transactions per second. A profile is immutable once the
/// test starts; the pattern controller samples it once per second.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "pattern", rename_all = "snake_case")]
pub enum LoadProfile {
    /// Linear climb from `start_tps` to `peak_tps`, then hold at peak.
    ///
    /// The ramp window is capped at 60 seconds or one third of the total
    /// duration, whichever is smaller.
    RampUp { start_tps: f64, peak_tps: f64 },
    /// Constant rate for the full duration.
    Sustained { tps: f64 },
    /// Alternates between `sustained_tps` (for `burst_interval`) and
    /// `burst_tps` (for `burst_duration`).
    Burst {
        sustained_tps: f64,
        burst_tps: f64,
        burst_duration: Duration,
        burst_interval: Duration,
    },
    /// Sinusoidal rate around `sustained_tps`, floored at zero.
    Wave {
        sustained_tps: f64,
        amplitude: f64,
        period: Duration,
    },
    /// Rate redrawn uniformly from `[min_tps, max_tps]` every
    /// `change_interval`.
    Chaos {
        min_tps: f64,
        max_tps: f64,
        change_interval: Duration,
    },
}

impl LoadProfile {
    /// Target rate at `elapsed` into a run of `total` length, for the
    /// deterministic patterns. Returns `None` for [`LoadProfile::Chaos`],
    /// whose redraws are owned by the pattern controller.
    pub fn rate_at(&self, elapsed: Duration, total: Duration) -> Option<f64> {
        match self {
            Self::RampUp { start_tps, peak_tps } => {
                let ramp = ramp_window(total);
                if ramp.is_zero() || elapsed >= ramp {
                    Some(*peak_tps)
                } else {
                    let progress = elapsed.as_secs_f64() / ramp.as_secs_f64();
                    Some(start_tps + (peak_tps - start_tps) * progress)
                }
            }
            Self::Sustained { tps } => Some(*tps),
            Self::Burst {
                sustained_tps,
                burst_tps,
                burst_duration,
                burst_interval,
            } => {
                let cycle = burst_interval.as_secs_f64() + burst_duration.as_secs_f64();
                if cycle <= 0.0 {
                    return Some(*sustained_tps);
                }
                let phase = elapsed.as_secs_f64() % cycle;
                if phase < burst_interval.as_secs_f64() {
                    Some(*sustained_tps)
                } else {
                    Some(*burst_tps)
                }
            }
            Self::Wave {
                sustained_tps,
                amplitude,
                period,
            } => {
                let phase =
                    2.0 * std::f64::consts::PI * elapsed.as_secs_f64() / period.as_secs_f64();
                Some((sustained_tps + amplitude * phase.sin()).max(0.0))
            }
            Self::Chaos { .. } => None,
        }
    }

    /// Rate the profile opens with at `elapsed == 0`.
    pub fn initial_rate(&self) -> f64 {
        match self {
            Self::RampUp { start_tps, .. } => *start_tps,
            Self::Sustained { tps } => *tps,
            Self::Burst { sustained_tps, .. } => *sustained_tps,
            Self::Wave { sustained_tps, .. } => *sustained_tps,
            Self::Chaos { min_tps, .. } => *min_tps,
        }
    }

    fn validate_into(&self, violations: &mut Vec<String>) {
        match self {
            Self::RampUp { start_tps, peak_tps } => {
                if *start_tps < 0.0 {
                    violations.push("ramp-up start_tps must be non-negative".into());
                }
                if *peak_tps <= 0.0 {
                    violations.push("ramp-up peak_tps must be positive".into());
                }
                if peak_tps < start_tps {
                    violations.push("ramp-up peak_tps must be >= start_tps".into());
                }
            }
            Self::Sustained { tps } => {
                if *tps <= 0.0 {
                    violations.push("sustained tps must be positive".into());
                }
            }
            Self::Burst {
                sustained_tps,
                burst_tps,
                burst_duration,
                burst_interval,
            } => {
                if *sustained_tps <= 0.0 {
                    violations.push("burst sustained_tps must be positive".into());
                }
                if burst_tps < sustained_tps {
                    violations.push("burst burst_tps must be >= sustained_tps".into());
                }
                if burst_duration.is_zero() {
                    violations.push("burst burst_duration must be positive".into());
                }
                if burst_interval.is_zero() {
                    violations.push("burst burst_interval must be positive".into());
                }
            }
            Self::Wave {
                sustained_tps,
                amplitude,
                period,
            } => {
                if *sustained_tps <= 0.0 {
                    violations.push("wave sustained_tps must be positive".into());
                }
                if *amplitude < 0.0 {
                    violations.push("wave amplitude must be non-negative".into());
                }
                if period.is_zero() {
                    violations.push("wave period must be positive".into());
                }
            }
            Self::Chaos {
                min_tps,
                max_tps,
                change_interval,
            } => {
                if *min_tps < 0.0 {
                    violations.push("chaos min_tps must be non-negative".into());
                }
                if max_tps <= min_tps {
                    violations.push("chaos max_tps must be > min_tps".into());
                }
                if change_interval.is_zero() {
                    violations.push("chaos change_interval must be positive".into());
                }
            }
        }
    }
}

/// Ramp window used by the ramp-up profile: 60s or a third of the run,
/// whichever is smaller.
pub(crate) fn ramp_window(total: Duration) -> Duration {
    Duration::from_secs(60).min(total / 3)
}

/// Kinds of failures the injector can activate against the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    AgentCrash,
    NetworkLatency,
    NetworkPartition,
    ResourceExhaustion,
    ErrorInjection,
    TimeoutInjection,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::AgentCrash => "agent_crash",
            Self::NetworkLatency => "network_latency",
            Self::NetworkPartition => "network_partition",
            Self::ResourceExhaustion => "resource_exhaustion",
            Self::ErrorInjection => "error_injection",
            Self::TimeoutInjection => "timeout_injection",
        };
        write!(f, "{name}")
    }
}

/// A single failure to inject on the test timeline.
///
/// `start_offset` is relative to test start. Severity is in `[0, 1]`; the
/// injector sums severities of concurrently active failures to bucket an
/// aggregate degradation level. Scenarios may overlap freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureScenario {
    pub kind: FailureKind,
    pub start_offset: Duration,
    pub duration: Duration,
    pub severity: f64,
    /// Free-form, kind-specific parameters.
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

impl FailureScenario {
    pub fn new(kind: FailureKind, start_offset: Duration, duration: Duration, severity: f64) -> Self {
        Self {
            kind,
            start_offset,
            duration,
            severity,
            parameters: HashMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    fn validate_into(&self, index: usize, test_duration: Duration, violations: &mut Vec<String>) {
        if !(0.0..=1.0).contains(&self.severity) {
            violations.push(format!(
                "failure[{index}] ({}) severity {} outside [0, 1]",
                self.kind, self.severity
            ));
        }
        if self.duration.is_zero() {
            violations.push(format!("failure[{index}] ({}) duration must be positive", self.kind));
        }
        if self.start_offset >= test_duration {
            violations.push(format!(
                "failure[{index}] ({}) starts at {:?}, after the test ends",
                self.kind, self.start_offset
            ));
        }
    }
}

/// Named thresholds a finished run is judged against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessCriteria {
    /// Minimum sustained throughput (tps).
    pub min_throughput: f64,
    /// Maximum P99 latency.
    pub max_p99_latency: Duration,
    /// Maximum error rate (0.0 to 1.0).
    pub max_error_rate: f64,
    /// Maximum timeout rate (0.0 to 1.0).
    pub max_timeout_rate: f64,
    /// Minimum composite resilience score (0 to 100).
    pub min_resilience_score: f64,
}

impl Default for SuccessCriteria {
    fn default() -> Self {
        Self {
            min_throughput: 0.0,
            max_p99_latency: Duration::from_secs(5),
            max_error_rate: 0.05,
            max_timeout_rate: 0.02,
            min_resilience_score: 0.0,
        }
    }
}

/// Outcome of one named criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Per-criterion evaluation of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaReport {
    pub checks: Vec<CriterionCheck>,
    pub passed: bool,
}

impl SuccessCriteria {
    /// Evaluate measured outcomes against every named threshold.
    pub fn evaluate(
        &self,
        throughput: f64,
        p99_latency: Duration,
        error_rate: f64,
        timeout_rate: f64,
        resilience_score: Option<f64>,
    ) -> CriteriaReport {
        let mut checks = vec![
            CriterionCheck {
                name: "min_throughput".into(),
                passed: throughput >= self.min_throughput,
                detail: format!("{throughput:.1} tps vs required {:.1}", self.min_throughput),
            },
            CriterionCheck {
                name: "max_p99_latency".into(),
                passed: p99_latency <= self.max_p99_latency,
                detail: format!("{p99_latency:?} vs allowed {:?}", self.max_p99_latency),
            },
            CriterionCheck {
                name: "max_error_rate".into(),
                passed: error_rate <= self.max_error_rate,
                detail: format!("{error_rate:.4} vs allowed {:.4}", self.max_error_rate),
            },
            CriterionCheck {
                name: "max_timeout_rate".into(),
                passed: timeout_rate <= self.max_timeout_rate,
                detail: format!("{timeout_rate:.4} vs allowed {:.4}", self.max_timeout_rate),
            },
        ];
        if let Some(score) = resilience_score {
            checks.push(CriterionCheck {
                name: "min_resilience_score".into(),
                passed: score >= self.min_resilience_score,
                detail: format!("{score:.1} vs required {:.1}", self.min_resilience_score),
            });
        }
        let passed = checks.iter().all(|c| c.passed);
        CriteriaReport { checks, passed }
    }
}

/// A complete stress-test definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestScenario {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub profile: LoadProfile,
    pub duration: Duration,
    pub failures: Vec<FailureScenario>,
    pub criteria: SuccessCriteria,
}

impl TestScenario {
    pub fn new(name: &str, profile: LoadProfile, duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            profile,
            duration,
            failures: Vec::new(),
            criteria: SuccessCriteria::default(),
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_failure(mut self, failure: FailureScenario) -> Self {
        self.failures.push(failure);
        self
    }

    pub fn with_criteria(mut self, criteria: SuccessCriteria) -> Self {
        self.criteria = criteria;
        self
    }

    /// Validate the scenario, returning every violation found.
    ///
    /// Invalid scenarios are rejected outright, never repaired.
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();
        if self.name.trim().is_empty() {
            violations.push("scenario name must not be empty".into());
        }
        if self.duration.is_zero() {
            violations.push("scenario duration must be positive".into());
        }
        self.profile.validate_into(&mut violations);
        for (index, failure) in self.failures.iter().enumerate() {
            failure.validate_into(index, self.duration, &mut violations);
        }
        if !(0.0..=1.0).contains(&self.criteria.max_error_rate) {
            violations.push("criteria max_error_rate outside [0, 1]".into());
        }
        if !(0.0..=1.0).contains(&self.criteria.max_timeout_rate) {
            violations.push("criteria max_timeout_rate outside [0, 1]".into());
        }
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::ScenarioValidation { violations })
        }
    }
}

/// Predefined scenarios for common runs.
impl TestScenario {
    /// Steady-state baseline: constant load, no failures.
    pub fn baseline_sustained(tps: f64, duration: Duration) -> Self {
        Self::new("baseline_sustained", LoadProfile::Sustained { tps }, duration)
            .with_description("Steady-state throughput and latency baseline")
    }

    /// Ramp the service to peak while a mid-test agent crash is injected.
    pub fn ramp_stress(start_tps: f64, peak_tps: f64, duration: Duration) -> Self {
        let crash_at = duration / 2;
        Self::new("ramp_stress", LoadProfile::RampUp { start_tps, peak_tps }, duration)
            .with_description("Linear ramp to peak with a mid-run agent crash")
            .with_failure(FailureScenario::new(
                FailureKind::AgentCrash,
                crash_at,
                duration / 6,
                0.6,
            ))
    }

    /// Burst load with overlapping latency and error injection.
    pub fn burst_resilience(sustained_tps: f64, burst_tps: f64, duration: Duration) -> Self {
        Self::new(
            "burst_resilience",
            LoadProfile::Burst {
                sustained_tps,
                burst_tps,
                burst_duration: Duration::from_secs(15),
                burst_interval: Duration::from_secs(45),
            },
            duration,
        )
        .with_description("Burst load with overlapping network and error faults")
        .with_failure(FailureScenario::new(
            FailureKind::NetworkLatency,
            duration / 4,
            duration / 4,
            0.4,
        ))
        .with_failure(FailureScenario::new(
            FailureKind::ErrorInjection,
            duration / 3,
            duration / 4,
            0.5,
        ))
    }

    /// Long chaos soak: randomized load with rolling faults.
    pub fn chaos_soak(min_tps: f64, max_tps: f64, duration: Duration) -> Self {
        Self::new(
            "chaos_soak",
            LoadProfile::Chaos {
                min_tps,
                max_tps,
                change_interval: Duration::from_secs(10),
            },
            duration,
        )
        .with_description("Randomized load with rolling resource and timeout faults")
        .with_failure(FailureScenario::new(
            FailureKind::ResourceExhaustion,
            duration / 5,
            duration / 5,
            0.7,
        ))
        .with_failure(FailureScenario::new(
            FailureKind::TimeoutInjection,
            duration / 2,
            duration / 5,
            0.5,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ramp_profile_is_monotone_then_flat() {
        let profile = LoadProfile::RampUp { start_tps: 100.0, peak_tps: 1000.0 };
        let total = Duration::from_secs(120);
        let mut last = 0.0;
        for sec in 0..120 {
            let rate = profile.rate_at(Duration::from_secs(sec), total).unwrap();
            assert!(rate >= last, "rate decreased at {sec}s: {rate} < {last}");
            last = rate;
        }
        // Ramp window is min(60s, 40s) = 40s; beyond it the rate holds peak.
        assert_eq!(profile.rate_at(Duration::from_secs(40), total), Some(1000.0));
        assert_eq!(profile.rate_at(Duration::from_secs(119), total), Some(1000.0));
    }

    #[test]
    fn wave_profile_never_goes_negative() {
        let profile = LoadProfile::Wave {
            sustained_tps: 50.0,
            amplitude: 500.0,
            period: Duration::from_secs(20),
        };
        for sec in 0..40 {
            let rate = profile
                .rate_at(Duration::from_secs(sec), Duration::from_secs(40))
                .unwrap();
            assert!(rate >= 0.0, "negative rate {rate} at {sec}s");
        }
    }

    #[test]
    fn burst_profile_alternates() {
        let profile = LoadProfile::Burst {
            sustained_tps: 100.0,
            burst_tps: 500.0,
            burst_duration: Duration::from_secs(10),
            burst_interval: Duration::from_secs(30),
        };
        let total = Duration::from_secs(120);
        assert_eq!(profile.rate_at(Duration::from_secs(5), total), Some(100.0));
        assert_eq!(profile.rate_at(Duration::from_secs(35), total), Some(500.0));
        // Next cycle starts at 40s.
        assert_eq!(profile.rate_at(Duration::from_secs(45), total), Some(100.0));
    }

    #[test]
    fn invalid_scenario_lists_every_violation() {
        let scenario = TestScenario::new(
            "",
            LoadProfile::Sustained { tps: -5.0 },
            Duration::ZERO,
        )
        .with_failure(FailureScenario::new(
            FailureKind::AgentCrash,
            Duration::from_secs(10),
            Duration::ZERO,
            1.5,
        ));
        let err = scenario.validate().unwrap_err();
        match err {
            Error::ScenarioValidation { violations } => {
                assert!(violations.len() >= 5, "expected itemized violations: {violations:?}");
                assert!(violations.iter().any(|v| v.contains("name")));
                assert!(violations.iter().any(|v| v.contains("severity")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn preset_scenarios_validate() {
        let minute = Duration::from_secs(60);
        TestScenario::baseline_sustained(500.0, minute).validate().unwrap();
        TestScenario::ramp_stress(50.0, 800.0, minute * 5).validate().unwrap();
        TestScenario::burst_resilience(200.0, 1000.0, minute * 5).validate().unwrap();
        TestScenario::chaos_soak(100.0, 600.0, minute * 10).validate().unwrap();
    }

    #[test]
    fn criteria_report_itemizes_checks() {
        let criteria = SuccessCriteria {
            min_throughput: 100.0,
            max_p99_latency: Duration::from_millis(500),
            max_error_rate: 0.01,
            max_timeout_rate: 0.01,
            min_resilience_score: 70.0,
        };
        let report = criteria.evaluate(150.0, Duration::from_millis(300), 0.02, 0.0, Some(85.0));
        assert!(!report.passed);
        let failed: Vec<_> = report.checks.iter().filter(|c| !c.passed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "max_error_rate");
    }
}
