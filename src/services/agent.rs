//! Runs triggered through the HTTP agent

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::PipelineConfig;
use crate::infra::{CommandExecutor, DryRunExecutor};
use crate::services::pipeline::{self, PipelineContext};
use crate::state::AppState;

/// Settings of one triggered run
pub struct RunPlan {
    pub run_id: String,
    pub build_number: u64,
    pub config: PipelineConfig,
    pub dry_run: bool,
    pub cancel_token: CancellationToken,
}

/// Execute a registered run, then release the log channel and the run slot
pub async fn execute(state: Arc<AppState>, plan: RunPlan) {
    let RunPlan {
        run_id,
        build_number,
        config,
        dry_run,
        cancel_token,
    } = plan;

    let log_tx = state.log_hub.create(&run_id).await;
    let executor: Arc<dyn CommandExecutor> = if dry_run {
        Arc::new(DryRunExecutor)
    } else {
        state.executor.clone()
    };

    let ctx = PipelineContext::new(
        run_id.clone(),
        build_number,
        Arc::new(config),
        executor,
        log_tx,
        cancel_token,
    )
    .with_store(state.run_store.clone());

    let run = pipeline::execute(&ctx).await;
    drop(ctx);

    state.log_hub.finish(&run_id).await;
    state.unregister_run(&run_id).await;

    info!(
        run_id = %run_id,
        status = run.status.as_str(),
        exit_code = ?run.exit_code,
        "Triggered run finished"
    );
}
