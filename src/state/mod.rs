//! Runtime state
//!
//! Agent state, run history and log channels

pub mod app_state;
pub mod log_hub;
pub mod run_store;

pub use app_state::AppState;
pub use log_hub::LogHub;
pub use run_store::RunStore;
