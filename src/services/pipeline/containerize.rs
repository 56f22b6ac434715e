//! Containerize stage
//!
//! Builds the image with both tags. A project Dockerfile must start the
//! application with the configured Spring profile; without one a Dockerfile
//! is rendered into the data dir.

use std::path::{Path, PathBuf};

use super::context::{PipelineContext, StageFailure, StageResult};
use crate::domain::stage::StageOutcome;

const BASE_IMAGE: &str = "eclipse-temurin:17-jre-focal";
const RENDERED_DOCKERFILE: &str = "Dockerfile.rendered";

/// The Dockerfile activates `profile` via argument, system property or environment
pub fn has_profile_flag(dockerfile: &str, profile: &str) -> bool {
    let needles = [
        format!("spring.profiles.active={}", profile),
        format!("SPRING_PROFILES_ACTIVE={}", profile),
        format!("SPRING_PROFILES_ACTIVE {}", profile),
    ];
    dockerfile
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .any(|line| needles.iter().any(|n| line.contains(n.as_str())))
}

/// Dockerfile for a plain executable jar
pub fn render_dockerfile(artifact: &str, profile: &str) -> String {
    format!(
        r#"FROM {base}
WORKDIR /app
COPY {artifact} app.jar
ENV SPRING_PROFILES_ACTIVE={profile}
EXPOSE 8080
ENTRYPOINT ["java", "-jar", "/app/app.jar", "--spring.profiles.active={profile}"]
"#,
        base = BASE_IMAGE,
        artifact = artifact,
        profile = profile,
    )
}

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let config = &ctx.config;
    let profile = config.spring_profile.as_str();
    let dockerfile = dockerfile_for(ctx).await?;

    let latest = ctx.image.latest();
    let spec = ctx.command(
        "docker",
        [
            "build".to_string(),
            "-t".to_string(),
            ctx.image.to_string(),
            "-t".to_string(),
            latest.to_string(),
            "-f".to_string(),
            dockerfile.to_string_lossy().into_owned(),
            ".".to_string(),
        ],
    );
    ctx.run_checked(&spec, "docker build").await?;

    ctx.log_stdout(format!("Image built: {} ({} profile)", ctx.image, profile));
    Ok(StageOutcome::success_with(ctx.image.to_string()))
}

/// Locate or render the Dockerfile
async fn dockerfile_for(ctx: &PipelineContext) -> Result<PathBuf, StageFailure> {
    let config = &ctx.config;
    let profile = config.spring_profile.as_str();
    let existing = config.work_dir.join("Dockerfile");

    if existing.is_file() {
        let content = tokio::fs::read_to_string(&existing)
            .await
            .map_err(|e| StageFailure::new(format!("cannot read {}: {}", existing.display(), e)))?;
        if !has_profile_flag(&content, profile) {
            return Err(StageFailure::new(format!(
                "{} does not activate the '{}' profile (expected --spring.profiles.active={} or SPRING_PROFILES_ACTIVE={})",
                existing.display(),
                profile,
                profile,
                profile
            )));
        }
        return Ok(existing);
    }

    let artifact = match ctx.facts().await.artifact {
        Some(path) => relative_to(&path, &config.work_dir),
        None if ctx.is_dry_run() => "target/*.jar".to_string(),
        None => return Err(StageFailure::new("no Dockerfile and no packaged artifact")),
    };
    let rendered = config.data_dir.join(RENDERED_DOCKERFILE);
    if ctx.is_dry_run() {
        ctx.log_stdout(format!("[dry-run] render {} for {}", rendered.display(), artifact));
        return Ok(rendered);
    }

    tokio::fs::create_dir_all(&config.data_dir)
        .await
        .map_err(|e| {
            StageFailure::new(format!("cannot create {}: {}", config.data_dir.display(), e))
        })?;
    tokio::fs::write(&rendered, render_dockerfile(&artifact, profile))
        .await
        .map_err(|e| StageFailure::new(format!("cannot write {}: {}", rendered.display(), e)))?;
    ctx.log_stdout(format!("Rendered {} for {}", rendered.display(), artifact));
    Ok(rendered)
}

fn relative_to(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}
