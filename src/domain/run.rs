//! Pipeline run model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::{PipelineStage, StageId, StageStatus};

/// Run status
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Unstable,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Unstable => "unstable",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success | RunStatus::Running => 0,
            RunStatus::Failed => 1,
            RunStatus::Unstable => 2,
            RunStatus::Cancelled => 130,
        }
    }

    /// Derive the final status from the recorded stages
    pub fn from_stages(stages: &[PipelineStage], cancelled: bool) -> Self {
        if cancelled {
            return RunStatus::Cancelled;
        }
        if stages.iter().any(|s| s.status == StageStatus::Failed) {
            RunStatus::Failed
        } else if stages.iter().any(|s| s.status == StageStatus::Unstable) {
            RunStatus::Unstable
        } else {
            RunStatus::Success
        }
    }
}

/// One execution of the pipeline
#[derive(Clone, Debug, Serialize)]
pub struct PipelineRun {
    pub id: String,
    pub build_number: u64,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stages: Vec<PipelineStage>,
}

impl PipelineRun {
    pub fn new(id: String, build_number: u64) -> Self {
        Self {
            id,
            build_number,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            exit_code: None,
            stages: StageId::ALL.into_iter().map(PipelineStage::new).collect(),
        }
    }

    pub fn stage(&self, id: StageId) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.id == id)
    }

    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.exit_code = Some(status.exit_code());
    }
}

/// Log line
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }

    pub fn stdout(content: impl Into<String>) -> Self {
        Self::new("stdout", content)
    }

    pub fn stderr(content: impl Into<String>) -> Self {
        Self::new("stderr", content)
    }

    pub fn is_stderr(&self) -> bool {
        self.stream == "stderr"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::StageOutcome;

    #[test]
    fn test_run_status_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Unstable.exit_code(), 2);
        assert_eq!(RunStatus::Cancelled.exit_code(), 130);
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Unstable.is_terminal());
    }

    #[test]
    fn test_new_run_has_every_stage_pending() {
        let run = PipelineRun::new("run-1".to_string(), 7);
        assert_eq!(run.stages.len(), StageId::ALL.len());
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(run.stage(StageId::Publish).map(|s| s.id), Some(StageId::Publish));
    }

    #[test]
    fn test_status_from_stages() {
        let mut run = PipelineRun::new("run-1".to_string(), 1);
        for stage in run.stages.iter_mut() {
            stage.finish(&StageOutcome::success());
        }
        assert_eq!(RunStatus::from_stages(&run.stages, false), RunStatus::Success);

        run.stages[2].finish(&StageOutcome::Unstable("tests failed".into()));
        assert_eq!(RunStatus::from_stages(&run.stages, false), RunStatus::Unstable);

        run.stages[6].finish(&StageOutcome::Fatal("rollout timed out".into()));
        assert_eq!(RunStatus::from_stages(&run.stages, false), RunStatus::Failed);
        assert_eq!(RunStatus::from_stages(&run.stages, true), RunStatus::Cancelled);
    }

    #[test]
    fn test_log_line_creation() {
        let line = LogLine::stdout("Hello");
        assert_eq!(line.stream, "stdout");
        assert!(!line.is_stderr());

        let line = LogLine::stderr("Error");
        assert_eq!(line.content, "Error");
        assert!(line.is_stderr());
    }
}
