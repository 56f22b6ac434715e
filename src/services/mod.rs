//! Services
//!
//! Pipeline stages, manifest handling, readiness polling and agent runs

pub mod agent;
pub mod manifests;
pub mod pipeline;
pub mod readiness;
