//! Task definitions and execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::cadence::{Cadence, CadenceError};
use crate::error::OrchestratorError;

/// Identifier of a recurring behavior
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskId {
    /// Monitor mentions/replies and respond
    InteractionCheck,
    /// Generate and post original content
    ContentGeneration,
    /// Re-evaluate strategy from engagement
    EngagementAnalysis,
    /// Any other behavior
    Custom(String),
}

impl TaskId {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InteractionCheck => "interaction-check",
            Self::ContentGeneration => "content-generation",
            Self::EngagementAnalysis => "engagement-analysis",
            Self::Custom(name) => name,
        }
    }

    /// Content-producing tasks may have their cadence tightened when they perform well
    pub fn is_content_class(&self) -> bool {
        matches!(self, Self::ContentGeneration)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        match value {
            "interaction-check" => Self::InteractionCheck,
            "content-generation" => Self::ContentGeneration,
            "engagement-analysis" => Self::EngagementAnalysis,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<TaskId> for String {
    fn from(value: TaskId) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// A recurring behavior registered with the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub cadence: Cadence,
    pub enabled: bool,
    /// Dispatch probability in [0, 1]
    pub weight: f64,
}

impl ScheduledTask {
    /// Create an enabled task at full weight
    pub fn new(id: impl Into<TaskId>, cadence: Cadence) -> Self {
        Self {
            id: id.into(),
            cadence,
            enabled: true,
            weight: 1.0,
        }
    }

    /// Create from a cadence expression, failing with `InvalidCadence`
    pub fn parse(id: impl Into<TaskId>, cadence: &str) -> Result<Self, OrchestratorError> {
        let id = id.into();
        let cadence = cadence
            .parse::<Cadence>()
            .map_err(|e: CadenceError| OrchestratorError::invalid_cadence(&id, e))?;
        Ok(Self::new(id, cadence))
    }

    /// Set weight (clamped to [0, 1])
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = clamp_weight(weight);
        self
    }

    /// Set enabled flag
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

pub(crate) fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, 1.0)
    }
}

/// Measured outcome reported by a behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub value: f64,
    pub unit: String,
}

impl Metric {
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    pub fn replies(count: u64) -> Self {
        Self::new(count as f64, "replies")
    }

    pub fn posts(count: u64) -> Self {
        Self::new(count as f64, "posts")
    }

    pub fn adjustments(count: usize) -> Self {
        Self::new(count as f64, "adjustments")
    }
}

/// Why an execution failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum FailureReason {
    /// Behavior returned an error or panicked
    Behavior(String),
    /// Behavior exceeded its timeout and was abandoned
    Timeout,
    /// Shutdown grace period expired before the behavior finished
    Shutdown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Behavior(msg) => write!(f, "{}", msg),
            Self::Timeout => f.write_str("timeout"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Outcome of one firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success { metric: Option<Metric> },
    Failure { reason: FailureReason },
    /// Previous invocation was still running
    SkippedOverlap,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::SkippedOverlap => "skipped_overlap",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }

    pub fn is_overlap(&self) -> bool {
        matches!(self, Self::SkippedOverlap)
    }

    pub fn metric(&self) -> Option<&Metric> {
        match self {
            Self::Success { metric } => metric.as_ref(),
            _ => None,
        }
    }
}

/// Immutable record of a single firing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskExecution {
    pub id: String,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl TaskExecution {
    pub fn new(
        task_id: TaskId,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: Outcome,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id,
            started_at,
            finished_at,
            outcome,
        }
    }

    pub fn latency_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_names() {
        assert_eq!(TaskId::from("interaction-check"), TaskId::InteractionCheck);
        assert_eq!(TaskId::ContentGeneration.as_str(), "content-generation");
        assert_eq!(TaskId::from("trend-scan"), TaskId::Custom("trend-scan".into()));
        assert!(TaskId::ContentGeneration.is_content_class());
        assert!(!TaskId::InteractionCheck.is_content_class());
    }

    #[test]
    fn test_parse_rejects_bad_cadence() {
        let err = ScheduledTask::parse(TaskId::ContentGeneration, "whenever").unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidCadence { .. }));
    }

    #[test]
    fn test_weight_clamped() {
        let task = ScheduledTask::parse("x", "every 5 minutes").unwrap().with_weight(1.7);
        assert_eq!(task.weight, 1.0);
        let task = task.with_weight(-0.3);
        assert_eq!(task.weight, 0.0);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = Outcome::Failure {
            reason: FailureReason::Behavior("rate limited".into()),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        let back: Outcome = serde_json::from_str(&json).unwrap();
        assert_eq!(outcome, back);
        assert_eq!(outcome.as_str(), "failure");
    }
}
