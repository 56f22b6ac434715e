//! Agent health
//!
//! GET /health, GET /status

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::domain::run::RunStatus;
use crate::domain::stage::StageStatus;
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct ActiveRun {
    run_id: String,
    build_number: u64,
    status: RunStatus,
    /// Stage currently executing
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    started_at: String,
    namespace: String,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    active_run: Option<ActiveRun>,
    finished_runs: usize,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(health_check))
}

/// No authentication
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_run = state.run_store.active().await.map(|run| ActiveRun {
        stage: run
            .stages
            .iter()
            .find(|s| s.status == StageStatus::Running)
            .map(|s| s.id.as_str().to_string()),
        run_id: run.id,
        build_number: run.build_number,
        status: run.status,
    });

    Json(HealthResponse {
        status: "ok",
        service: "rollout-pipeline",
        version: VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
        started_at: state.started_at.to_rfc3339(),
        namespace: state.config.cluster.namespace.clone(),
        image: state.config.image.name.clone(),
        active_run,
        finished_runs: state.run_store.history_count().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, PipelineConfig};
    use crate::domain::run::PipelineRun;
    use crate::infra::DryRunExecutor;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health_reports_active_run() {
        let config = PipelineConfig::from_lookup(|_| None).unwrap();
        let agent = AgentConfig::from_lookup(|_| None);
        let state = Arc::new(AppState::new(config, &agent, Arc::new(DryRunExecutor)));
        state
            .run_store
            .update(PipelineRun::new("r1".to_string(), 3))
            .await;

        let response = router()
            .with_state(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["namespace"], "jhipster");
        assert_eq!(body["active_run"]["run_id"], "r1");
        assert_eq!(body["active_run"]["build_number"], 3);
        assert_eq!(body["finished_runs"], 0);
    }
}
