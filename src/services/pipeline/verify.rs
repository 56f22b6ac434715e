//! Verify stage
//!
//! Lists cluster state, optionally smoke-checks the health endpoint and logs
//! how to reach the application.

use async_trait::async_trait;
use std::time::Duration;

use super::context::{PipelineContext, StageFailure, StageResult};
use crate::domain::stage::StageOutcome;
use crate::services::readiness::{wait_until_ready, Probe, ProbeResult, ReadinessOutcome};

const SMOKE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Spring Boot actuator health endpoint
pub struct HealthEndpointProbe {
    client: reqwest::Client,
    url: String,
}

impl HealthEndpointProbe {
    pub fn new(base_url: &str, health_path: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(SMOKE_REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), health_path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for HealthEndpointProbe {
    async fn check(&self) -> ProbeResult {
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => return ProbeResult::NotReady(e.to_string()),
        };
        let status = response.status();
        if status.is_client_error() {
            return ProbeResult::Failed(format!("{} returned HTTP {}", self.url, status.as_u16()));
        }
        if !status.is_success() {
            return ProbeResult::NotReady(format!("HTTP {}", status.as_u16()));
        }
        // actuator reports {"status":"UP"}; other bodies count as healthy
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        match body["status"].as_str() {
            None | Some("UP") => ProbeResult::Ready,
            Some(other) => ProbeResult::NotReady(format!("health status {}", other)),
        }
    }
}

pub async fn run(ctx: &PipelineContext) -> StageResult {
    let cluster = &ctx.config.cluster;

    let spec = ctx.command(
        "kubectl",
        ["get", "pods,svc,deploy", "-n", cluster.namespace.as_str(), "-o", "wide"],
    );
    ctx.run_checked(&spec, "kubectl get").await?;

    if let Some(ref base_url) = ctx.config.smoke_url {
        smoke_check(ctx, base_url).await?;
    }

    let hint = access_hint(ctx).await;
    ctx.log_stdout(format!("Access: {}", hint));
    Ok(StageOutcome::success_with(hint))
}

async fn smoke_check(ctx: &PipelineContext, base_url: &str) -> Result<(), StageFailure> {
    let probe = HealthEndpointProbe::new(base_url, &ctx.config.cluster.health_path)
        .map_err(|e| StageFailure::new(format!("cannot build HTTP client: {}", e)))?;
    if ctx.is_dry_run() {
        ctx.log_stdout(format!("[dry-run] GET {}", probe.url()));
        return Ok(());
    }

    ctx.log_stdout(format!("Smoke check: GET {}", probe.url()));
    let timeouts = &ctx.config.timeouts;
    let outcome = wait_until_ready(
        &probe,
        timeouts.readiness_interval,
        timeouts.readiness,
        &ctx.cancel_token,
    )
    .await;
    match outcome {
        ReadinessOutcome::Ready { attempts } => {
            ctx.log_stdout(format!("Health check passed after {} attempts", attempts));
            Ok(())
        }
        ReadinessOutcome::Cancelled => Err(StageFailure::new("cancelled")),
        ReadinessOutcome::TimedOut { last, .. } => Err(StageFailure::new(format!(
            "smoke check against {} timed out ({})",
            probe.url(),
            last.unwrap_or_default()
        ))),
        ReadinessOutcome::Failed { reason, .. } => {
            Err(StageFailure::new(format!("smoke check failed: {}", reason)))
        }
    }
}

async fn access_hint(ctx: &PipelineContext) -> String {
    let cluster = &ctx.config.cluster;
    let port_forward = format!(
        "kubectl port-forward -n {} svc/{} 8080:80",
        cluster.namespace, cluster.app_service
    );
    if !cluster.minikube {
        return port_forward;
    }

    let spec = ctx
        .command(
            "minikube",
            ["service", cluster.app_service.as_str(), "-n", cluster.namespace.as_str(), "--url"],
        )
        .timeout(Duration::from_secs(30))
        .capture()
        .quiet();
    match ctx.run(&spec).await {
        Ok(output) if output.is_success() && !output.stdout.trim().is_empty() => {
            output.stdout.lines().next().unwrap_or_default().trim().to_string()
        }
        _ => format!("minikube service {} -n {} --url", cluster.app_service, cluster.namespace),
    }
}
