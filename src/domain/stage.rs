//! Pipeline stage model
//!
//! Stage identity, per-stage records and the single failure policy that maps
//! a stage's failure to either an unstable or a fatal run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pipeline stages in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Checkout,
    Build,
    Test,
    Analysis,
    Containerize,
    Publish,
    Deploy,
    Verify,
}

impl StageId {
    /// All stages, in the order they run
    pub const ALL: [StageId; 8] = [
        StageId::Checkout,
        StageId::Build,
        StageId::Test,
        StageId::Analysis,
        StageId::Containerize,
        StageId::Publish,
        StageId::Deploy,
        StageId::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Checkout => "checkout",
            StageId::Build => "build",
            StageId::Test => "test",
            StageId::Analysis => "analysis",
            StageId::Containerize => "containerize",
            StageId::Publish => "publish",
            StageId::Deploy => "deploy",
            StageId::Verify => "verify",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StageId::Checkout => "Source Checkout",
            StageId::Build => "Build",
            StageId::Test => "Test",
            StageId::Analysis => "Static Analysis",
            StageId::Containerize => "Containerize",
            StageId::Publish => "Publish",
            StageId::Deploy => "Deploy",
            StageId::Verify => "Verify",
        }
    }

    /// How a failure of this stage affects the run
    pub fn failure_class(&self) -> FailureClass {
        match self {
            StageId::Test | StageId::Analysis => FailureClass::QualitySignal,
            StageId::Publish | StageId::Verify => FailureClass::BestEffort,
            StageId::Checkout | StageId::Build | StageId::Containerize | StageId::Deploy => {
                FailureClass::Infrastructure
            }
        }
    }

    /// Turn a failure reason into this stage's outcome under the failure policy
    pub fn failed(&self, reason: impl Into<String>) -> StageOutcome {
        match self.failure_class() {
            FailureClass::QualitySignal | FailureClass::BestEffort => {
                StageOutcome::Unstable(reason.into())
            }
            FailureClass::Infrastructure => StageOutcome::Fatal(reason.into()),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        StageId::ALL
            .into_iter()
            .find(|stage| stage.as_str() == normalized)
            .ok_or_else(|| format!("unknown stage '{}'", s.trim()))
    }
}

/// Failure classes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Quality feedback (tests, analysis): the run continues as unstable
    QualitySignal,
    /// Side work whose loss does not invalidate the rollout
    BestEffort,
    /// Anything the later stages depend on: the run stops
    Infrastructure,
}

/// Result of executing one stage
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutcome {
    Success(Option<String>),
    Unstable(String),
    Fatal(String),
    Skipped(String),
}

impl StageOutcome {
    pub fn success() -> Self {
        StageOutcome::Success(None)
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        StageOutcome::Success(Some(message.into()))
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        StageOutcome::Skipped(reason.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StageOutcome::Fatal(_))
    }

    pub fn status(&self) -> StageStatus {
        match self {
            StageOutcome::Success(_) => StageStatus::Success,
            StageOutcome::Unstable(_) => StageStatus::Unstable,
            StageOutcome::Fatal(_) => StageStatus::Failed,
            StageOutcome::Skipped(_) => StageStatus::Skipped,
        }
    }

    pub fn message(&self) -> Option<String> {
        match self {
            StageOutcome::Success(message) => message.clone(),
            StageOutcome::Unstable(m) | StageOutcome::Fatal(m) | StageOutcome::Skipped(m) => {
                Some(m.clone())
            }
        }
    }
}

/// Stage status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Unstable,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Success => "✓",
            StageStatus::Unstable => "!",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "⊘",
            StageStatus::Running => "⟳",
            StageStatus::Pending => "○",
        }
    }
}

/// Stage record within a run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: StageId,
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl PipelineStage {
    pub fn new(id: StageId) -> Self {
        Self {
            id,
            display_name: id.display_name().to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// Record the outcome and timing
    pub fn finish(&mut self, outcome: &StageOutcome) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = outcome.status();
        self.message = outcome.message();
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) {
        self.status = StageStatus::Skipped;
        self.message = Some(reason.into());
    }

    /// One summary line, e.g. `✓ Build (1520ms)`
    pub fn summary_line(&self) -> String {
        let duration = self
            .duration_ms
            .map(|d| format!("{}ms", d))
            .unwrap_or_else(|| "-".to_string());
        match &self.message {
            Some(message) => format!(
                "{} {} ({}): {}",
                self.status.icon(),
                self.display_name,
                duration,
                message
            ),
            None => format!("{} {} ({})", self.status.icon(), self.display_name, duration),
        }
    }
}
