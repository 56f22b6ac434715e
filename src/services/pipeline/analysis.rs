//! Static analysis with the SonarQube Maven scanner

use super::build::maven;
use super::context::{PipelineContext, StageResult};
use crate::domain::stage::StageOutcome;

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let Some(ref analysis) = ctx.config.analysis else {
        return Ok(StageOutcome::skipped("no analysis server configured"));
    };

    let mut spec = ctx.command(
        &maven(&ctx.config.work_dir),
        [
            "-ntp".to_string(),
            "-B".to_string(),
            "initialize".to_string(),
            "sonar:sonar".to_string(),
            format!("-Dsonar.host.url={}", analysis.host_url),
            format!("-Dsonar.projectVersion={}", ctx.build_number),
        ],
    );
    // the scanner reads the token from its environment
    if let Some(ref token) = analysis.token {
        spec = spec.env("SONAR_TOKEN", token.clone());
    }

    ctx.run_checked(&spec, "static analysis").await?;
    Ok(StageOutcome::success_with(format!("report sent to {}", analysis.host_url)))
}

#[cfg(test)]
mod tests {
    use super::super::context::testing::*;
    use super::*;
    use crate::infra::executor::scripted::ScriptedExecutor;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_skipped_without_server() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = context(config_with(dir.path(), &[]), exec.clone());
        assert!(matches!(run(&ctx).await.unwrap(), StageOutcome::Skipped(_)));
        assert!(exec.calls().is_empty());
    }

    #[tokio::test]
    async fn test_token_goes_through_env() {
        let dir = tempfile::tempdir().unwrap();
        let exec = Arc::new(ScriptedExecutor::new());
        let ctx = context(
            config_with(
                dir.path(),
                &[
                    ("PIPELINE_SONAR_HOST_URL", "http://sonar:9000"),
                    ("SONAR_TOKEN", "squ_secret"),
                ],
            ),
            exec.clone(),
        );

        run(&ctx).await.unwrap();
        let call = exec.calls()[0].clone();
        assert_eq!(
            call,
            "mvn -ntp -B initialize sonar:sonar -Dsonar.host.url=http://sonar:9000 -Dsonar.projectVersion=7"
        );
        assert!(!call.contains("squ_secret"));
        assert_eq!(
            exec.specs()[0].env,
            vec![("SONAR_TOKEN".to_string(), "squ_secret".to_string())]
        );
    }
}
