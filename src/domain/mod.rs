//! Domain models
//!
//! Plain data types, no dependency on axum or process handling

pub mod account;
pub mod image;
pub mod run;
pub mod stage;

pub use image::ImageRef;
pub use run::{LogLine, PipelineRun, RunStatus};
pub use stage::{FailureClass, PipelineStage, StageId, StageOutcome, StageStatus};
