//! Pipeline run API
//!
//! `/trigger`, `/runs/*` and the SSE log stream

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::domain::run::PipelineRun;
use crate::domain::stage::StageId;
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::services::agent::{self, RunPlan};
use crate::state::AppState;

/// Optional overrides for a triggered run
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerRequest {
    /// Build number from the CI server
    pub build_number: Option<u64>,
    pub branch: Option<String>,
    /// Stages to skip in addition to the configured ones
    #[serde(default)]
    pub skip: Vec<StageId>,
    /// Print commands instead of executing them
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub run_id: String,
    pub build_number: u64,
    pub status: String,
    pub stream_url: String,
}

#[derive(Debug, Deserialize)]
pub struct RunHistoryQuery {
    /// Default 20
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// success, unstable, failed, cancelled or running
    pub status: Option<String>,
}

fn default_limit() -> usize {
    20
}

#[derive(Debug, Serialize)]
pub struct RunHistoryResponse {
    pub runs: Vec<PipelineRun>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub run_id: String,
    pub cancelled: bool,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/trigger", post(trigger_run))
        .route("/runs/recent", get(get_recent_runs))
        .route("/runs/:run_id", get(get_run))
        .route("/runs/:run_id/cancel", post(cancel_run))
        .route("/runs/:run_id/logs/stream", get(stream_logs))
}

/// Start a run in the background
///
/// POST /trigger
/// Requires the API key. 409 while another run is in progress.
async fn trigger_run(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let request = parse_trigger_request(&body)?;
    if request.build_number == Some(0) {
        return Err(ApiError::bad_request("build_number must be a positive integer"));
    }
    let run_id = uuid::Uuid::new_v4().to_string();

    let cancel_token = state.try_register_run(&run_id).await.map_err(|current| {
        ApiError::conflict(format!("Run '{}' is already in progress", current))
    })?;

    let mut config = (*state.config).clone();
    if let Some(branch) = request.branch {
        config.branch = branch;
    }
    config.skip_stages.extend(request.skip);

    let build_number = match state
        .build_counter
        .next(request.build_number.or(config.build_number))
        .await
    {
        Ok(n) => n,
        Err(e) => {
            state.unregister_run(&run_id).await;
            return Err(e.into());
        }
    };

    state.log_hub.create(&run_id).await;
    state
        .run_store
        .update(PipelineRun::new(run_id.clone(), build_number))
        .await;

    info!(
        run_id = %run_id,
        build_number,
        dry_run = request.dry_run,
        "Run triggered"
    );

    let plan = RunPlan {
        run_id: run_id.clone(),
        build_number,
        config,
        dry_run: request.dry_run,
        cancel_token,
    };
    tokio::spawn(agent::execute(state.clone(), plan));

    Ok(Json(TriggerResponse {
        stream_url: format!("/runs/{}/logs/stream", run_id),
        run_id,
        build_number,
        status: "running".to_string(),
    }))
}

/// An empty body means no overrides; anything else must be a valid request
fn parse_trigger_request(body: &[u8]) -> ApiResult<TriggerRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TriggerRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("invalid trigger request: {}", e)))
}

/// GET /runs/:run_id
async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let run = state
        .run_store
        .get(&run_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Run '{}'", run_id)))?;
    Ok(Json(run))
}

/// GET /runs/recent
async fn get_recent_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunHistoryQuery>,
) -> impl IntoResponse {
    let runs = state
        .run_store
        .recent(query.limit, query.status.as_deref())
        .await;
    let total = runs.len();
    Json(RunHistoryResponse { runs, total })
}

/// POST /runs/:run_id/cancel
///
/// Requires the API key
async fn cancel_run(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if state.cancel_run(&run_id).await {
        info!(run_id = %run_id, "Run cancellation requested");
        return Ok(Json(CancelResponse {
            run_id,
            cancelled: true,
        }));
    }

    match state.run_store.get(&run_id).await {
        Some(run) => Err(ApiError::conflict(format!(
            "Run '{}' is already {}",
            run_id,
            run.status.as_str()
        ))),
        None => Err(ApiError::not_found(format!("Run '{}'", run_id))),
    }
}

/// Live run log
///
/// GET /runs/:run_id/logs/stream
///
/// Ends with a `complete` event carrying the final status. A finished run
/// yields only that event.
async fn stream_logs(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let rx = state.log_hub.subscribe(&run_id).await;
    if rx.is_none() && state.run_store.get(&run_id).await.is_none() {
        return Err(ApiError::not_found(format!("Run '{}'", run_id)));
    }

    let stream = async_stream::stream! {
        if let Some(mut rx) = rx {
            loop {
                match rx.recv().await {
                    Ok(log_line) => {
                        let json = serde_json::to_string(&log_line).unwrap_or_default();
                        yield Ok(Event::default().data(json));
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(run_id = %run_id, lagged = n, "Log subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }

        if let Some(run) = state.run_store.get(&run_id).await {
            yield Ok(Event::default().event("complete").data(
                serde_json::json!({
                    "status": run.status.as_str(),
                    "exit_code": run.exit_code,
                }).to_string()
            ));
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
