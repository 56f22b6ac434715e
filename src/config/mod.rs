//! Configuration
//!
//! Environment variable parsing, CLI overrides are applied in `cli`

pub mod env;

pub use env::{
    AgentConfig, AnalysisConfig, ClusterConfig, ImageConfig, PipelineConfig, RegistryCredentials,
    Timeouts,
};
