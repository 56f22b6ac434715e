//! Pipeline orchestration
//!
//! Runs the stages strictly in order. A fatal outcome skips every remaining
//! stage; unstable outcomes let the run continue. Cancellation and the overall
//! run timeout both go through the context's cancellation token.

pub mod analysis;
pub mod build;
pub mod checkout;
pub mod containerize;
pub mod context;
pub mod deploy;
pub mod publish;
pub mod testing;
pub mod verify;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::run::{PipelineRun, RunStatus};
use crate::domain::stage::{StageId, StageOutcome};

pub use context::{PipelineContext, RunFacts, StageFailure, StageResult};

/// Execute every stage and return the finished run
pub async fn execute(ctx: &PipelineContext) -> PipelineRun {
    let mut run = PipelineRun::new(ctx.run_id.clone(), ctx.build_number);
    ctx.publish(&run).await;

    let run_timeout = ctx.config.timeouts.run;
    let timed_out = Arc::new(AtomicBool::new(false));
    let watchdog = spawn_run_timeout(run_timeout, ctx.cancel_token.clone(), timed_out.clone());

    info!(
        run_id = %ctx.run_id,
        build_number = ctx.build_number,
        image = %ctx.image,
        dry_run = ctx.is_dry_run(),
        "Pipeline started"
    );
    ctx.log_stdout(format!(
        "=== Pipeline run {} (build #{}) ===",
        ctx.run_id, ctx.build_number
    ));
    ctx.log_stdout(format!("Working directory: {}", ctx.config.work_dir.display()));
    ctx.log_stdout(format!("Image: {}", ctx.image));
    ctx.log_stdout(format!("Timestamp: {}", chrono::Utc::now().to_rfc3339()));

    let total = StageId::ALL.len();
    // reason recorded on every stage after the run stopped
    let mut halted: Option<String> = None;
    let mut cancelled = false;

    for (index, stage_id) in StageId::ALL.into_iter().enumerate() {
        if halted.is_none() && ctx.is_cancelled() {
            let (reason, by_request) = interruption(&timed_out, run_timeout);
            cancelled = by_request;
            halted = Some(reason);
        }
        if let Some(ref reason) = halted {
            run.stages[index].skip(reason.clone());
            continue;
        }
        if ctx.config.is_skipped(stage_id) {
            ctx.log_stdout(format!(
                "[{}/{}] {} skipped by configuration",
                index + 1,
                total,
                stage_id.display_name()
            ));
            run.stages[index].skip("skipped by configuration");
            continue;
        }

        run.stages[index].start();
        ctx.publish(&run).await;
        ctx.log_stdout(format!("[{}/{}] {}", index + 1, total, stage_id.display_name()));
        info!(run_id = %ctx.run_id, stage = %stage_id, "Stage started");

        let mut outcome = match run_stage(stage_id, ctx).await {
            Ok(outcome) => outcome,
            Err(failure) => stage_id.failed(failure.0),
        };
        if ctx.is_cancelled() {
            let (reason, by_request) = interruption(&timed_out, run_timeout);
            let message = if by_request { "cancelled".to_string() } else { reason.clone() };
            outcome = StageOutcome::Fatal(message);
            cancelled = by_request;
            halted = Some(reason);
        }

        match outcome {
            StageOutcome::Fatal(ref reason) => {
                error!(run_id = %ctx.run_id, stage = %stage_id, reason = %reason, "Stage failed");
                if halted.is_none() {
                    halted = Some(format!("{} failed", stage_id.display_name()));
                }
            }
            StageOutcome::Unstable(ref reason) => {
                warn!(run_id = %ctx.run_id, stage = %stage_id, reason = %reason, "Stage unstable")
            }
            _ => info!(run_id = %ctx.run_id, stage = %stage_id, "Stage finished"),
        }
        run.stages[index].finish(&outcome);
        ctx.log_stdout(run.stages[index].summary_line());
        ctx.publish(&run).await;
    }

    watchdog.abort();

    let status = RunStatus::from_stages(&run.stages, cancelled);
    run.complete(status);
    ctx.publish(&run).await;

    ctx.log_stdout("=== Summary ===");
    for stage in &run.stages {
        ctx.log_stdout(stage.summary_line());
    }
    ctx.log_stdout(format!(
        "Result: {} (exit code {})",
        status.as_str().to_uppercase(),
        status.exit_code()
    ));
    info!(
        run_id = %ctx.run_id,
        status = status.as_str(),
        exit_code = status.exit_code(),
        "Pipeline finished"
    );
    run
}

async fn run_stage(id: StageId, ctx: &PipelineContext) -> StageResult {
    match id {
        StageId::Checkout => checkout::run(ctx).await,
        StageId::Build => build::run(ctx).await,
        StageId::Test => testing::run(ctx).await,
        StageId::Analysis => analysis::run(ctx).await,
        StageId::Containerize => containerize::run(ctx).await,
        StageId::Publish => publish::run(ctx).await,
        StageId::Deploy => deploy::run(ctx).await,
        StageId::Verify => verify::run(ctx).await,
    }
}

/// Why the token fired: `(halt reason, requested by the user)`
fn interruption(timed_out: &AtomicBool, limit: Duration) -> (String, bool) {
    if timed_out.load(Ordering::SeqCst) {
        (format!("run timed out after {:?}", limit), false)
    } else {
        ("run cancelled".to_string(), true)
    }
}

/// Cancel the run once the overall time limit passes
fn spawn_run_timeout(
    limit: Duration,
    cancel_token: CancellationToken,
    timed_out: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel_token.cancelled() => {}
            _ = tokio::time::sleep(limit) => {
                error!("Pipeline run timed out after {:?}", limit);
                timed_out.store(true, Ordering::SeqCst);
                cancel_token.cancel();
            }
        }
    })
}
