//! rollout-pipeline
//!
//! - `rollout-pipeline run`: execute the pipeline
//! - `rollout-pipeline plan`: print the commands without executing them
//! - `rollout-pipeline stages`: list the stages
//! - `rollout-pipeline manifests`: validate the cluster manifests
//! - `rollout-pipeline serve`: HTTP agent

use clap::Parser;
use std::env;
use tracing::{debug, error, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rollout_pipeline::cli::{self, handlers, CliArgs, Commands};
use rollout_pipeline::config::AgentConfig;
use rollout_pipeline::VERSION;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    load_env_file(&args);
    init_logging(&args);

    debug!("rollout-pipeline v{} starting", VERSION);

    let config = match cli::load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let exit_code = match &args.command {
        Commands::Run(run) => handlers::handle_run(config, run, false).await,
        Commands::Plan(run) => handlers::handle_run(config, run, true).await,
        Commands::Stages => handlers::handle_stages(&config),
        Commands::Manifests => handlers::handle_manifests(&config),
        Commands::Serve(serve) => {
            handlers::handle_serve(config, AgentConfig::from_env(), serve).await?;
            0
        }
    };

    std::process::exit(exit_code);
}

fn load_env_file(args: &CliArgs) {
    match args.env_file {
        Some(ref path) => {
            if let Err(e) = dotenvy::from_path(path) {
                eprintln!("Cannot load env file {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }
}

fn init_logging(args: &CliArgs) {
    let level = if let Some(ref level_str) = args.log_level {
        parse_level(level_str)
    } else if args.verbose {
        Level::DEBUG
    } else {
        let level_str = env::var("PIPELINE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        parse_level(&level_str)
    };

    let filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(format!(
            "rollout_pipeline={},tower_http={},hyper=warn,reqwest=warn",
            level, level
        ))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}
