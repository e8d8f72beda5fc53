//! Command line interface for rpb_release.
//!
//! A thin driver over the release engine: argument parsing, colored output
//! and one function per subcommand.

mod args;
pub mod commands;
mod output;

pub use args::{
    Args, Command, HistoryCommand, RuntimeConfig, parse_merge_request, parse_session_input,
};
pub use commands::execute_command;
pub use output::{LiveScreen, OutputManager};

use crate::error::Result;

/// Main CLI entry point
pub async fn run() -> Result<i32> {
    let args = Args::parse_args();
    execute_command(args).await
}

/// Validate arguments without executing (for testing)
pub fn validate_args(args: &Args) -> std::result::Result<(), String> {
    args.validate()
}
