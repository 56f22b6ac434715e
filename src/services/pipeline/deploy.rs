//! Deploy stage
//!
//! 1. apply backing manifests (namespace, config, storage, database)
//! 2. wait for the database pods
//! 3. apply application manifests
//! 4. point the application container at the new image
//! 5. wait for the rollout
//!
//! Any failure after step 1 captures `kubectl describe` and recent logs of the
//! failing workload before the stage fails.

use std::path::Path;
use std::time::Duration;

use super::context::{PipelineContext, StageFailure, StageResult};
use crate::config::env::constants::DIAGNOSTIC_LOG_TAIL;
use crate::domain::stage::StageOutcome;
use crate::services::manifests::{ManifestSet, Tier};
use crate::services::readiness::{wait_until_ready, PodReadyProbe, ReadinessOutcome};

/// Extra time granted to kubectl beyond its own `--timeout`
const ROLLOUT_GRACE: Duration = Duration::from_secs(30);

/// Workload to collect diagnostics for
enum Workload<'a> {
    Pods { app_label: &'a str },
    Deployment { name: &'a str },
}

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let config = &ctx.config;
    let cluster = &config.cluster;

    let manifests = ManifestSet::load(&config.manifests_path(), cluster)?;
    for warning in manifests.validate(cluster)? {
        ctx.log_stderr(format!("Warning: {}", warning));
    }

    for file in manifests.backing_files() {
        apply(ctx, &file.path).await?;
    }

    let has_database = manifests.docs().any(|d| {
        d.tier == Tier::Backing && matches!(d.kind.as_str(), "Deployment" | "StatefulSet")
    });
    if !has_database {
        ctx.log_stdout("No database workload in the manifests, skipping readiness wait");
    } else if ctx.is_dry_run() {
        ctx.log_stdout(format!(
            "[dry-run] wait for pods app={} to become ready",
            cluster.db_app_label
        ));
    } else {
        wait_for_database(ctx).await?;
    }

    if let Err(e) = prepare_application(ctx, &manifests).await {
        diagnose(ctx, Workload::Deployment { name: &cluster.app_deployment }).await;
        return Err(e);
    }

    let deployment = format!("deployment/{}", cluster.app_deployment);
    let set_image = ctx.command(
        "kubectl",
        [
            "set".to_string(),
            "image".to_string(),
            deployment.clone(),
            format!("{}={}", cluster.app_container, ctx.image),
            "-n".to_string(),
            cluster.namespace.clone(),
        ],
    );
    if let Err(e) = ctx.run_checked(&set_image, "kubectl set image").await {
        diagnose(ctx, Workload::Deployment { name: &cluster.app_deployment }).await;
        return Err(e);
    }

    let rollout_timeout = config.timeouts.rollout;
    let rollout = ctx
        .command(
            "kubectl",
            [
                "rollout".to_string(),
                "status".to_string(),
                deployment,
                "-n".to_string(),
                cluster.namespace.clone(),
                format!("--timeout={}s", rollout_timeout.as_secs()),
            ],
        )
        .timeout(rollout_timeout + ROLLOUT_GRACE);
    if let Err(e) = ctx.run_checked(&rollout, "kubectl rollout status").await {
        diagnose(ctx, Workload::Deployment { name: &cluster.app_deployment }).await;
        return Err(e);
    }

    Ok(StageOutcome::success_with(format!(
        "{} running {}",
        cluster.app_deployment, ctx.image
    )))
}

/// Apply application manifests and make the image available to the cluster
async fn prepare_application(
    ctx: &PipelineContext,
    manifests: &ManifestSet,
) -> Result<(), StageFailure> {
    for file in manifests.application_files() {
        apply(ctx, &file.path).await?;
    }

    let facts = ctx.facts().await;
    if ctx.config.cluster.minikube && !facts.published {
        // the cluster cannot pull an image that never reached a registry
        let spec = ctx
            .command("minikube", ["image".to_string(), "load".to_string(), ctx.image.to_string()]);
        ctx.run_checked(&spec, "minikube image load").await?;
    }
    Ok(())
}

async fn apply(ctx: &PipelineContext, path: &Path) -> Result<(), StageFailure> {
    let spec = ctx.command(
        "kubectl",
        ["apply".to_string(), "-f".to_string(), path.to_string_lossy().into_owned()],
    );
    let what = format!(
        "kubectl apply {}",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    ctx.run_checked(&spec, &what).await.map(|_| ())
}

async fn wait_for_database(ctx: &PipelineContext) -> Result<(), StageFailure> {
    let config = &ctx.config;
    let label = config.cluster.db_app_label.as_str();
    let probe = PodReadyProbe {
        executor: ctx.executor.as_ref(),
        namespace: config.cluster.namespace.clone(),
        app_label: label.to_string(),
        cancel: ctx.cancel_token.clone(),
        timeout: config.timeouts.readiness_interval.max(Duration::from_secs(10)),
    };

    ctx.log_stdout(format!(
        "Waiting up to {}s for pods app={} (every {}s)",
        config.timeouts.readiness.as_secs(),
        label,
        config.timeouts.readiness_interval.as_secs()
    ));
    let outcome = wait_until_ready(
        &probe,
        config.timeouts.readiness_interval,
        config.timeouts.readiness,
        &ctx.cancel_token,
    )
    .await;

    let reason = match outcome {
        ReadinessOutcome::Ready { attempts } => {
            ctx.log_stdout(format!("Database ready after {} checks", attempts));
            return Ok(());
        }
        ReadinessOutcome::Cancelled => return Err(StageFailure::new("cancelled")),
        ReadinessOutcome::TimedOut { attempts, last } => format!(
            "database not ready after {} checks ({})",
            attempts,
            last.unwrap_or_else(|| "no observation".to_string())
        ),
        ReadinessOutcome::Failed { reason, .. } => format!("database failed to start: {}", reason),
    };
    ctx.log_stderr(format!("Error: {}", reason));
    diagnose(ctx, Workload::Pods { app_label: label }).await;
    Err(StageFailure(reason))
}

/// Stream `kubectl describe` and recent logs of a workload into the run log
async fn diagnose(ctx: &PipelineContext, workload: Workload<'_>) {
    if ctx.is_cancelled() {
        return;
    }
    let namespace = ctx.config.cluster.namespace.as_str();
    let tail = format!("--tail={}", DIAGNOSTIC_LOG_TAIL);
    let (describe, logs) = match workload {
        Workload::Pods { app_label } => {
            let selector = format!("app={}", app_label);
            (
                args(&["describe", "pods", "-l", &selector, "-n", namespace]),
                args(&["logs", "-l", &selector, "-n", namespace, &tail, "--all-containers"]),
            )
        }
        Workload::Deployment { name } => {
            let target = format!("deployment/{}", name);
            (
                args(&["describe", &target, "-n", namespace]),
                args(&["logs", &target, "-n", namespace, &tail, "--all-containers"]),
            )
        }
    };

    ctx.log_stderr("--- diagnostics ---");
    for command_args in [describe, logs] {
        let spec = ctx.command("kubectl", command_args).timeout(Duration::from_secs(60));
        if let Err(e) = ctx.run(&spec).await {
            ctx.log_stderr(format!("Diagnostics command failed: {}", e));
        }
    }
    ctx.log_stderr("--- end diagnostics ---");
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}
