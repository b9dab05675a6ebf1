//! CLI command handlers
//!
//! Argument parsing structures, log level selection and routing of the
//! parsed command to the pipeline.

pub mod args;
pub mod help;
pub mod router;

pub use args::{Cli, Commands, RunArgs};
pub use help::get_log_level;
pub use router::execute_command;
