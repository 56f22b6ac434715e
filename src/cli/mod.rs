//! Command line interface

pub mod commands;
pub mod handlers;

use std::collections::HashMap;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

pub use commands::{CliArgs, Commands, RunArgs, ServeArgs};

/// Load the pipeline configuration with CLI flags taking precedence over the environment
pub fn load_config(args: &CliArgs) -> Result<PipelineConfig, PipelineError> {
    let mut overrides: HashMap<&str, String> = HashMap::new();
    if let Some(ref dir) = args.work_dir {
        overrides.insert("PIPELINE_WORK_DIR", dir.to_string_lossy().into_owned());
    }
    if let Commands::Run(run) | Commands::Plan(run) = &args.command {
        if let Some(n) = run.build_number {
            overrides.insert("PIPELINE_BUILD_NUMBER", n.to_string());
        }
        if let Some(ref branch) = run.branch {
            overrides.insert("PIPELINE_BRANCH", branch.clone());
        }
    }

    let mut config = PipelineConfig::from_lookup(|key| {
        overrides
            .get(key)
            .cloned()
            .or_else(|| std::env::var(key).ok())
    })?;
    config.skip_stages.extend(args.skip.iter().copied());
    Ok(config)
}
