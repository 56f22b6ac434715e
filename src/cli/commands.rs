use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::stage::StageId;

/// Build, containerize, publish and roll out a Spring Boot service to Kubernetes
#[derive(Parser, Debug)]
#[command(
    name = "rollout-pipeline",
    version,
    long_about = "rollout-pipeline checks out a JHipster service, builds and tests it with Maven, \
                  runs static analysis, packages it as a container image, publishes the image \
                  and rolls it out to a Kubernetes namespace.\n\n\
                  Settings come from PIPELINE_* environment variables, optionally loaded from \
                  an env file, and are overridden by the flags below."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "DIR", help = "Project working directory")]
    pub work_dir: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        help = "Load environment variables from this file (default: .env when present)"
    )]
    pub env_file: Option<PathBuf>,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Debug logging")]
    pub verbose: bool,

    #[arg(
        long = "skip",
        global = true,
        value_name = "STAGE",
        value_delimiter = ',',
        help = "Skip a stage (repeatable, or comma separated)"
    )]
    pub skip: Vec<StageId>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Execute the pipeline")]
    Run(RunArgs),

    #[command(
        about = "Print every command the pipeline would run",
        long_about = "Dry run: stages are walked in order and each external command is printed \
                      instead of executed. Readiness waits and the smoke check are skipped."
    )]
    Plan(RunArgs),

    #[command(about = "List the stages and their failure policy")]
    Stages,

    #[command(about = "Validate the cluster manifests and print the apply order")]
    Manifests,

    #[command(about = "Run the HTTP agent")]
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    #[arg(long, value_name = "N", help = "Build number used as the image tag")]
    pub build_number: Option<u64>,

    #[arg(long, help = "Branch to check out")]
    pub branch: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(short, long, env = "PORT", help = "Listening port")]
    pub port: Option<u16>,
}
