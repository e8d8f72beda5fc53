//! Command execution functions coordinating all release operations.

mod helpers;
mod history;
mod session;
mod status;
mod step;
mod watch;

use crate::cli::{Args, Command, RuntimeConfig};
use crate::error::{ReleaseError, Result};

use history::execute_history;
use session::{execute_resume, execute_start};
use status::execute_status;
use step::{execute_abort, execute_proceed, execute_retry};
use watch::execute_watch;

/// Execute the parsed command and return the process exit code
pub async fn execute_command(args: Args) -> Result<i32> {
    if let Err(validation_error) = args.validate() {
        let output = super::OutputManager::new(false, false);
        output.error(&format!("Invalid arguments: {}", validation_error));
        return Ok(2);
    }

    let config = RuntimeConfig::from(&args);
    config.verbose_println(&format!("working directory: {}", config.work_dir.display()));

    let result = match &args.command {
        Command::Start { .. } => execute_start(&args, &config).await,
        Command::Resume => execute_resume(&config).await,
        Command::Status { json } => execute_status(&config, *json).await,
        Command::Retry => execute_retry(&config).await,
        Command::Proceed => execute_proceed(&config).await,
        Command::Abort { delete_remote, yes } => execute_abort(&config, *delete_remote, *yes).await,
        Command::Watch { once } => execute_watch(&config, *once).await,
        Command::History { action } => execute_history(&config, action.as_ref()),
    };

    match result {
        Ok(exit_code) => Ok(exit_code),
        Err(e) => {
            config.error_println(&format!("Command '{}' failed: {}", args.command.name(), e));

            let suggestions = e.recovery_suggestions();
            if !suggestions.is_empty() {
                config.println("\n💡 Recovery suggestions:");
                for suggestion in suggestions {
                    config.println(&format!("  • {}", suggestion));
                }
            }
            config.println(&format!("\n{}", failure_hint(&e)));
            Ok(1)
        }
    }
}

/// Whether running the command again can get past this error
fn failure_hint(error: &ReleaseError) -> &'static str {
    if error.is_recoverable() {
        "Fix the cause above, then re-run the command (rpb_release status shows where the release stands)."
    } else {
        "Re-running will fail the same way until the setup above is corrected."
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PreconditionError, StateError};
    use std::path::PathBuf;

    #[test]
    fn test_transient_failures_point_at_retrying() {
        let dirty = ReleaseError::Precondition(PreconditionError::DirtyWorkingDirectory);
        assert!(dirty.is_recoverable());
        assert!(failure_hint(&dirty).starts_with("Fix the cause above"));

        let locked = ReleaseError::State(StateError::Locked);
        assert!(locked.is_recoverable());
        assert_eq!(failure_hint(&locked), failure_hint(&dirty));
    }

    #[test]
    fn test_setup_failures_say_retry_cannot_help() {
        let outside = ReleaseError::Precondition(PreconditionError::RootNotFound {
            path: PathBuf::from("/tmp"),
        });
        assert!(!outside.is_recoverable());
        assert!(failure_hint(&outside).starts_with("Re-running will fail"));
    }
}
