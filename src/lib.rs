//! rollout-pipeline
//!
//! Checkout, build, test, analysis, containerize, publish, deploy and verify
//! for a JHipster service on Kubernetes, as a CLI or an HTTP agent.

pub mod api;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod middleware;
pub mod services;
pub mod state;

pub use config::env::constants::VERSION;
