//! Build stage: package the application jar with Maven

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::context::{PipelineContext, StageFailure, StageResult};
use crate::domain::stage::StageOutcome;

/// Maven entry point: the project's wrapper when present, otherwise `mvn`
pub fn maven(work_dir: &Path) -> String {
    let wrapper = work_dir.join("mvnw");
    if wrapper.is_file() {
        std::fs::canonicalize(&wrapper)
            .unwrap_or(wrapper)
            .to_string_lossy()
            .into_owned()
    } else {
        "mvn".to_string()
    }
}

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let config = &ctx.config;
    let spec = ctx.command(
        &maven(&config.work_dir),
        [
            "-ntp".to_string(),
            "-B".to_string(),
            "package".to_string(),
            "-DskipTests".to_string(),
            format!("-P{}", config.spring_profile),
        ],
    );
    ctx.run_checked(&spec, "maven package").await?;

    if ctx.is_dry_run() {
        return Ok(StageOutcome::success_with("artifact not located in dry run"));
    }

    let target = config.work_dir.join("target");
    let artifact = find_artifact(&target)
        .ok_or_else(|| {
            StageFailure::new(format!("no runnable jar found in {}", target.display()))
        })?;
    ctx.log_stdout(format!("Artifact: {}", artifact.display()));
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    ctx.record_artifact(artifact).await;
    Ok(StageOutcome::success_with(name))
}

/// Newest runnable jar in `target`
///
/// Spring Boot repackaging leaves `*.jar.original` and `*-plain.jar` beside the
/// executable jar; those are ignored.
pub fn find_artifact(target: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(target).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| {
            let name = p.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            p.is_file() && name.ends_with(".jar") && !name.ends_with("-plain.jar")
        })
        .max_by_key(|p| {
            std::fs::metadata(p)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
}

#[cfg(test)]
mod tests {
    use super::super::context::testing::*;
    use super::*;
    use crate::infra::executor::scripted::ScriptedExecutor;
    use std::sync::Arc;

    #[test]
    fn test_maven_prefers_wrapper() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(maven(dir.path()), "mvn");

        std::fs::write(dir.path().join("mvnw"), "#!/bin/sh\n").unwrap();
        assert!(maven(dir.path()).ends_with("/mvnw"));
        assert!(Path::new(&maven(dir.path())).is_absolute());
    }

    #[test]
    fn test_find_artifact_skips_repackaging_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_artifact(dir.path()).is_none());

        std::fs::write(dir.path().join("app-0.0.1.jar.original"), "").unwrap();
        std::fs::write(dir.path().join("app-0.0.1-plain.jar"), "").unwrap();
        assert!(find_artifact(dir.path()).is_none());

        std::fs::write(dir.path().join("app-0.0.1.jar"), "").unwrap();
        assert_eq!(
            find_artifact(dir.path()).unwrap().file_name().unwrap(),
            "app-0.0.1.jar"
        );
    }

    #[tokio::test]
    async fn test_build_records_artifact() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::fs::write(dir.path().join("target/jhipster-0.0.1.jar"), "").unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = context(config_with(dir.path(), &[]), exec.clone());

        let outcome = run(&ctx).await.unwrap();
        assert_eq!(outcome, StageOutcome::success_with("jhipster-0.0.1.jar"));
        assert_eq!(exec.calls()[0], "mvn -ntp -B package -DskipTests -Pprod");
        assert!(ctx.facts().await.artifact.is_some());
    }

    #[tokio::test]
    async fn test_missing_jar_fails() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(config_with(dir.path(), &[]), Arc::new(ScriptedExecutor::new()));
        let err = run(&ctx).await.unwrap_err();
        assert!(err.0.starts_with("no runnable jar found"));
    }

    #[tokio::test]
    async fn test_maven_failure() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new().on("mvn", 1, ""));
        let ctx = context(config_with(dir.path(), &[]), exec);
        let err = run(&ctx).await.unwrap_err();
        assert_eq!(err.0, "maven package failed (exit code 1)");
    }
}
