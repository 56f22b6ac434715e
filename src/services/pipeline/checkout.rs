//! Source checkout

use super::context::{PipelineContext, StageFailure, StageResult};
use crate::domain::stage::StageOutcome;
use crate::infra::CommandSpec;

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let config = &ctx.config;
    let branch = config.branch.as_str();

    if config.work_dir.join(".git").exists() {
        ctx.log_stdout(format!("Updating {} ({})", config.work_dir.display(), branch));
        let spec = ctx.command("git", ["pull", "--ff-only", "origin", branch]);
        ctx.run_checked(&spec, "git pull").await?;
    } else if let Some(ref url) = config.repo_url {
        ctx.log_stdout(format!("Cloning {} ({})", url, branch));
        // clone runs outside the work dir, which may not exist yet
        let spec = CommandSpec::new(
            "git",
            [
                "clone".to_string(),
                "--branch".to_string(),
                branch.to_string(),
                url.clone(),
                config.work_dir.to_string_lossy().into_owned(),
            ],
        )
        .timeout(config.timeouts.command);
        ctx.run_checked(&spec, "git clone").await?;
    } else {
        return Err(StageFailure::new(format!(
            "{} is not a git checkout and no repository URL is configured",
            config.work_dir.display()
        )));
    }

    let spec = ctx
        .command("git", ["rev-parse", "--short", "HEAD"])
        .capture()
        .quiet();
    let output = ctx.run_checked(&spec, "git rev-parse").await?;
    let commit = output.stdout.trim().to_string();
    if commit.is_empty() {
        return Ok(StageOutcome::success_with(format!("branch {}", branch)));
    }

    ctx.log_stdout(format!("Commit: {}", commit));
    ctx.record_commit(commit.clone()).await;
    Ok(StageOutcome::success_with(format!("{} @ {}", branch, commit)))
}

#[cfg(test)]
mod tests {
    use super::super::context::testing::*;
    use super::*;
    use crate::infra::executor::scripted::ScriptedExecutor;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_pulls_existing_checkout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let exec = Arc::new(ScriptedExecutor::new().on("git rev-parse", 0, "abc1234\n"));
        let ctx = context(config_with(dir.path(), &[]), exec.clone());

        let outcome = run(&ctx).await.unwrap();
        assert_eq!(outcome, StageOutcome::success_with("main @ abc1234"));
        assert_eq!(exec.calls()[0], "git pull --ff-only origin main");
        assert_eq!(ctx.facts().await.commit.as_deref(), Some("abc1234"));
    }

    #[tokio::test]
    async fn test_clones_when_not_a_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("app");
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = context(
            config_with(
                &target,
                &[
                    ("PIPELINE_REPO_URL", "https://example.com/app.git"),
                    ("PIPELINE_BRANCH", "release"),
                ],
            ),
            exec.clone(),
        );

        run(&ctx).await.unwrap();
        let clone = &exec.specs()[0];
        assert!(clone.work_dir.is_none());
        assert_eq!(
            exec.calls()[0],
            format!(
                "git clone --branch release https://example.com/app.git {}",
                target.display()
            )
        );
    }

    #[tokio::test]
    async fn test_no_checkout_and_no_url_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = context(config_with(dir.path(), &[]), exec.clone());

        let err = run(&ctx).await.unwrap_err();
        assert!(err.0.contains("no repository URL"));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_pull_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        let exec = Arc::new(ScriptedExecutor::new().on("git pull", 128, ""));
        let ctx = context(config_with(dir.path(), &[]), exec.clone());

        let err = run(&ctx).await.unwrap_err();
        assert_eq!(err.0, "git pull failed (exit code 128)");
        assert!(!exec.was_called("git rev-parse"));
    }
}
