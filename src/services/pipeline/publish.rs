//! Publish stage: push both tags to the registry

use super::context::{PipelineContext, StageResult};
use crate::domain::stage::StageOutcome;

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let Some(ref credentials) = ctx.config.registry_credentials else {
        return Ok(StageOutcome::skipped("no registry credentials"));
    };
    let registry = ctx.image.registry();
    let registry_label = registry.unwrap_or("Docker Hub");

    let mut login = vec![
        "login".to_string(),
        "--username".to_string(),
        credentials.username.clone(),
        "--password-stdin".to_string(),
    ];
    if let Some(host) = registry {
        login.push(host.to_string());
    }
    let spec = ctx
        .command("docker", login)
        .stdin(credentials.password.clone());
    ctx.log_stdout(format!("Logging in to {} as {}", registry_label, credentials.username));
    ctx.run_checked(&spec, "docker login").await?;

    let tags = [ctx.image.clone(), ctx.image.latest()];
    let mut pushed = Vec::with_capacity(tags.len());
    let mut failure = None;
    for image in &tags {
        let spec = ctx.command("docker", ["push".to_string(), image.to_string()]);
        match ctx.run_checked(&spec, &format!("docker push {}", image)).await {
            Ok(_) => pushed.push(image.tag.clone()),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let mut logout = vec!["logout".to_string()];
    if let Some(host) = registry {
        logout.push(host.to_string());
    }
    let _ = ctx.run(&ctx.command("docker", logout).quiet()).await;

    if let Some(e) = failure {
        return Err(e);
    }
    ctx.record_published().await;
    Ok(StageOutcome::success_with(format!(
        "pushed {} ({}) to {}",
        ctx.image.repository(),
        pushed.join(", "),
        registry_label
    )))
}
