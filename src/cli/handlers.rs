//! Subcommand handlers
//!
//! Each returns the process exit code.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::commands::{RunArgs, ServeArgs};
use crate::config::{AgentConfig, PipelineConfig};
use crate::domain::run::LogLine;
use crate::domain::stage::StageId;
use crate::infra::{BuildCounter, CommandExecutor, DryRunExecutor, ProcessExecutor};
use crate::services::manifests::ManifestSet;
use crate::services::pipeline::{self, PipelineContext};
use crate::state::AppState;

/// Log channels older than this are dropped by the agent
const LOG_RETENTION_HOURS: i64 = 24;

/// `run` and `plan`
pub async fn handle_run(config: PipelineConfig, args: &RunArgs, dry_run: bool) -> i32 {
    let counter = BuildCounter::new(&config.data_dir);
    let external = args.build_number.or(config.build_number);
    let build_number = if dry_run {
        // plan never advances the counter
        match external {
            Some(n) => Ok(n),
            None => counter.current().await.map(|n| n + 1),
        }
    } else {
        counter.next(external).await
    };
    let build_number = match build_number {
        Ok(n) => n,
        Err(e) => {
            error!("Cannot allocate a build number: {}", e);
            return 1;
        }
    };

    let executor: Arc<dyn CommandExecutor> = if dry_run {
        Arc::new(DryRunExecutor)
    } else {
        Arc::new(ProcessExecutor)
    };
    let (log_tx, log_rx) = broadcast::channel(1024);
    let printer = tokio::spawn(print_logs(log_rx));

    let cancel_token = CancellationToken::new();
    let ctrl_c = spawn_ctrl_c(cancel_token.clone());

    let run_id = uuid::Uuid::new_v4().to_string();
    let ctx = PipelineContext::new(
        run_id,
        build_number,
        Arc::new(config),
        executor,
        log_tx,
        cancel_token,
    );
    let run = pipeline::execute(&ctx).await;
    drop(ctx);

    ctrl_c.abort();
    if let Err(e) = printer.await {
        warn!("Log printer stopped: {}", e);
    }

    info!(
        run_id = %run.id,
        status = run.status.as_str(),
        build_number = run.build_number,
        "Pipeline finished"
    );
    run.status.exit_code()
}

/// Forward run output until the channel closes
async fn print_logs(mut rx: broadcast::Receiver<LogLine>) {
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    loop {
        match rx.recv().await {
            Ok(line) => {
                let text = format!("{}\n", line.content);
                let written = if line.is_stderr() {
                    stderr.write_all(text.as_bytes()).await
                } else {
                    stdout.write_all(text.as_bytes()).await
                };
                if written.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Log output lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    let _ = stdout.flush().await;
    let _ = stderr.flush().await;
}

fn spawn_ctrl_c(cancel_token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling the run");
            cancel_token.cancel();
        }
    })
}

/// `stages`
pub fn handle_stages(config: &PipelineConfig) -> i32 {
    println!("{:<4}{:<14}{:<18}{:<30}NOTE", "#", "STAGE", "NAME", "ON FAILURE");
    for (i, stage) in StageId::ALL.into_iter().enumerate() {
        let on_failure = stage.failed("").status();
        let note = if config.is_skipped(stage) {
            "skipped by configuration"
        } else {
            ""
        };
        println!(
            "{:<4}{:<14}{:<18}{:<30}{}",
            i + 1,
            stage.as_str(),
            stage.display_name(),
            format!("{:?} ({:?})", on_failure, stage.failure_class()),
            note
        );
    }
    0
}

/// `manifests`
pub fn handle_manifests(config: &PipelineConfig) -> i32 {
    let dir = config.manifests_path();
    let set = match ManifestSet::load(&dir, &config.cluster) {
        Ok(set) => set,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("Apply order ({}):", dir.display());
    print!("{}", set);

    match set.validate(&config.cluster) {
        Ok(warnings) => {
            for warning in &warnings {
                println!("Warning: {}", warning);
            }
            println!(
                "OK: deployment/{} container '{}' in namespace '{}'",
                config.cluster.app_deployment,
                config.cluster.app_container,
                config.cluster.namespace
            );
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

/// `serve`
pub async fn handle_serve(
    config: PipelineConfig,
    agent: AgentConfig,
    args: &ServeArgs,
) -> anyhow::Result<()> {
    let port = args.port.unwrap_or(agent.port);
    let state = Arc::new(AppState::new(config, &agent, Arc::new(ProcessExecutor)));

    spawn_log_cleanup(state.clone());

    let app = crate::api::router(state);
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("rollout-pipeline agent listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("agent server error")?;
    Ok(())
}

fn spawn_log_cleanup(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            state.log_hub.cleanup(LOG_RETENTION_HOURS).await;
        }
    });
}
