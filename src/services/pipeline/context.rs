//! Pipeline execution context
//!
//! Everything a stage needs: configuration, the command executor, the run's
//! log channel and cancellation token, plus facts recorded by earlier stages.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::PipelineConfig;
use crate::domain::image::ImageRef;
use crate::domain::run::{LogLine, PipelineRun};
use crate::domain::stage::StageOutcome;
use crate::error::PipelineError;
use crate::infra::{CommandError, CommandExecutor, CommandOutput, CommandSpec};
use crate::state::RunStore;

/// Facts produced by one stage and consumed by later ones
#[derive(Clone, Debug, Default)]
pub struct RunFacts {
    /// Short commit hash after checkout
    pub commit: Option<String>,
    /// Packaged jar
    pub artifact: Option<PathBuf>,
    /// Both tags reached the registry
    pub published: bool,
}

/// A stage failure reason. The stage's failure class decides whether it is fatal.
#[derive(Debug)]
pub struct StageFailure(pub String);

impl StageFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

impl From<CommandError> for StageFailure {
    fn from(err: CommandError) -> Self {
        Self(err.to_string())
    }
}

impl From<PipelineError> for StageFailure {
    fn from(err: PipelineError) -> Self {
        Self(err.to_string())
    }
}

pub type StageResult = Result<StageOutcome, StageFailure>;

/// Execution context of one run
pub struct PipelineContext {
    pub run_id: String,
    pub build_number: u64,
    pub config: Arc<PipelineConfig>,
    pub executor: Arc<dyn CommandExecutor>,
    pub log_tx: broadcast::Sender<LogLine>,
    pub cancel_token: CancellationToken,
    /// Build-number tagged image
    pub image: ImageRef,
    facts: RwLock<RunFacts>,
    store: Option<Arc<RunStore>>,
}

impl PipelineContext {
    pub fn new(
        run_id: String,
        build_number: u64,
        config: Arc<PipelineConfig>,
        executor: Arc<dyn CommandExecutor>,
        log_tx: broadcast::Sender<LogLine>,
        cancel_token: CancellationToken,
    ) -> Self {
        let image = ImageRef::build_tagged(
            config.image.registry_host.as_deref(),
            config.image.registry_namespace.as_deref(),
            &config.image.name,
            build_number,
        );
        Self {
            run_id,
            build_number,
            config,
            executor,
            log_tx,
            cancel_token,
            image,
            facts: RwLock::new(RunFacts::default()),
            store: None,
        }
    }

    /// Report run progress into the agent's run store
    pub fn with_store(mut self, store: Arc<RunStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn log_stdout(&self, content: impl Into<String>) {
        let _ = self.log_tx.send(LogLine::stdout(content));
    }

    pub fn log_stderr(&self, content: impl Into<String>) {
        let _ = self.log_tx.send(LogLine::stderr(content));
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_dry_run(&self) -> bool {
        self.executor.is_dry_run()
    }

    /// Command rooted in the work dir with the default command timeout
    pub fn command<I, S>(&self, program: &str, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new(program, args)
            .current_dir(&self.config.work_dir)
            .timeout(self.config.timeouts.command)
    }

    /// Run a command and return its output whatever the exit status
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        if !self.is_dry_run() && !spec.quiet {
            self.log_stdout(format!(">>> {}", spec.display()));
        }
        self.executor
            .execute(spec, Some(&self.log_tx), &self.cancel_token)
            .await
    }

    /// Run a command, treating a non-zero exit or timeout as a failure
    pub async fn run_checked(
        &self,
        spec: &CommandSpec,
        what: &str,
    ) -> Result<CommandOutput, StageFailure> {
        let output = self.run(spec).await?;
        if output.is_success() {
            Ok(output)
        } else {
            let reason = output.describe_failure(what);
            self.log_stderr(format!("Error: {}", reason));
            Err(StageFailure(reason))
        }
    }

    pub async fn facts(&self) -> RunFacts {
        self.facts.read().await.clone()
    }

    pub async fn record_commit(&self, commit: String) {
        self.facts.write().await.commit = Some(commit);
    }

    pub async fn record_artifact(&self, artifact: PathBuf) {
        self.facts.write().await.artifact = Some(artifact);
    }

    pub async fn record_published(&self) {
        self.facts.write().await.published = true;
    }

    /// Push the current run snapshot to the store, if any
    pub async fn publish(&self, run: &PipelineRun) {
        if let Some(ref store) = self.store {
            store.update(run.clone()).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context builders for stage tests

    use super::*;
    use crate::infra::executor::scripted::ScriptedExecutor;
    use std::collections::HashMap;

    pub fn config_with(work_dir: &std::path::Path, vars: &[(&str, &str)]) -> PipelineConfig {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.insert(
            "PIPELINE_WORK_DIR".to_string(),
            work_dir.to_string_lossy().into_owned(),
        );
        PipelineConfig::from_lookup(move |key| map.get(key).cloned()).unwrap()
    }

    pub fn context(config: PipelineConfig, executor: Arc<ScriptedExecutor>) -> PipelineContext {
        let (tx, _) = broadcast::channel(1024);
        PipelineContext::new(
            "run-test".to_string(),
            7,
            Arc::new(config),
            executor,
            tx,
            CancellationToken::new(),
        )
    }

    /// Collect every line the context logs from now on
    pub fn capture_logs(ctx: &PipelineContext) -> broadcast::Receiver<LogLine> {
        ctx.log_tx.subscribe()
    }

    pub fn drain(rx: &mut broadcast::Receiver<LogLine>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line.content);
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::infra::executor::scripted::ScriptedExecutor;

    #[tokio::test]
    async fn test_image_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(
            dir.path(),
            &[
                ("PIPELINE_REGISTRY_HOST", "registry.example.com"),
                ("PIPELINE_REGISTRY_NAMESPACE", "acme"),
            ],
        );
        let ctx = context(config, Arc::new(ScriptedExecutor::new()));
        assert_eq!(
            ctx.image.to_string(),
            "registry.example.com/acme/jhipster-sample-app:7"
        );
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().on("docker build", 1, ""));
        let ctx = context(config_with(dir.path(), &[]), exec.clone());
        let mut rx = capture_logs(&ctx);

        let spec = ctx.command("docker", ["build", "."]);
        assert_eq!(spec.work_dir.as_deref(), Some(dir.path()));
        let err = ctx.run_checked(&spec, "docker build").await.unwrap_err();
        assert_eq!(err.0, "docker build failed (exit code 1)");

        let logs = drain(&mut rx);
        assert_eq!(logs[0], ">>> docker build .");
        assert_eq!(logs[1], "Error: docker build failed (exit code 1)");
    }

    #[tokio::test]
    async fn test_facts_are_shared_between_stages() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config_with(dir.path(), &[]), Arc::new(ScriptedExecutor::new()));
        ctx.record_commit("abc1234".to_string()).await;
        ctx.record_published().await;

        let facts = ctx.facts().await;
        assert_eq!(facts.commit.as_deref(), Some("abc1234"));
        assert!(facts.published);
        assert!(facts.artifact.is_none());
    }
}
