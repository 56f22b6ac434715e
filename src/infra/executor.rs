//! Command executors
//!
//! Stages issue commands through `CommandExecutor` so the same stage code
//! drives real processes, a dry run, or a scripted fake in tests.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use crate::domain::run::LogLine;

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        spec: &CommandSpec,
        log_tx: Option<&broadcast::Sender<LogLine>>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;

    /// Dry runs skip waits that depend on real cluster state
    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Spawns real processes
pub struct ProcessExecutor;

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn execute(
        &self,
        spec: &CommandSpec,
        log_tx: Option<&broadcast::Sender<LogLine>>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        CommandRunner::run(spec, log_tx, cancel).await
    }
}

/// Logs each command and reports success without running it
pub struct DryRunExecutor;

#[async_trait]
impl CommandExecutor for DryRunExecutor {
    async fn execute(
        &self,
        spec: &CommandSpec,
        log_tx: Option<&broadcast::Sender<LogLine>>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled);
        }
        if let Some(tx) = log_tx {
            let mut line = format!("[dry-run] {}", spec.display());
            if let Some(ref dir) = spec.work_dir {
                line.push_str(&format!("  (in {})", dir.display()));
            }
            let _ = tx.send(LogLine::stdout(line));
        }
        Ok(CommandOutput::success())
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_logs_and_succeeds() {
        let (tx, mut rx) = broadcast::channel(4);
        let spec = CommandSpec::new("docker", ["push", "acme/app:1"]);
        let output = DryRunExecutor
            .execute(&spec, Some(&tx), &CancellationToken::new())
            .await
            .unwrap();

        assert!(output.is_success());
        assert!(DryRunExecutor.is_dry_run());
        assert_eq!(rx.recv().await.unwrap().content, "[dry-run] docker push acme/app:1");
    }

    #[tokio::test]
    async fn test_scripted_sequence_repeats_last() {
        let exec = scripted::ScriptedExecutor::new().on_sequence("kubectl get", &[(1, ""), (0, "ok")]);
        let spec = CommandSpec::new("kubectl", ["get", "pods"]);
        let cancel = CancellationToken::new();

        assert_eq!(exec.execute(&spec, None, &cancel).await.unwrap().exit_code, Some(1));
        assert_eq!(exec.execute(&spec, None, &cancel).await.unwrap().stdout, "ok");
        assert_eq!(exec.execute(&spec, None, &cancel).await.unwrap().stdout, "ok");
        assert_eq!(exec.calls().len(), 3);
    }
}
