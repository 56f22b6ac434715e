//! Infrastructure
//!
//! External process execution and local persistence

pub mod build_counter;
pub mod command;
pub mod executor;

pub use build_counter::BuildCounter;
pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
pub use executor::{CommandExecutor, DryRunExecutor, ProcessExecutor};
