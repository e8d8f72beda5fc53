//! Running release commands on a pseudo-terminal.
//!
//! Child processes see an interactive terminal, so git keeps its colors and
//! progress output. The engine talks to the [`CommandRunner`] trait; the real
//! implementation is [`PtyRunner`].

#[allow(unsafe_code)]
mod runner;

pub use runner::{DEFAULT_COLS, DEFAULT_ROWS, PtyRunner};

use crate::error::PtyError;
use std::future::Future;

/// A command that exited unsuccessfully
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    /// Command line that failed
    pub command: String,
    /// Exit status; `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "'{}' exited with status {}", self.command, code),
            None => write!(f, "'{}' was terminated", self.command),
        }
    }
}

/// Result of running a command sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Plain transcript of everything that ran, prompts included
    pub transcript: String,
    /// First failing command; the sequence stops there
    pub failure: Option<CommandFailure>,
}

impl CommandOutput {
    /// Whether every command exited zero
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }

    /// Append the output of a later command
    pub fn append(&mut self, other: CommandOutput) {
        if !other.transcript.is_empty() {
            if !self.transcript.is_empty() {
                self.transcript.push('\n');
            }
            self.transcript.push_str(&other.transcript);
        }
        if self.failure.is_none() {
            self.failure = other.failure;
        }
    }
}

/// Executes shell command sequences for the release engine.
///
/// A non-zero exit is reported through [`CommandOutput::failure`]; `Err` is
/// reserved for not being able to run anything at all.
pub trait CommandRunner: Send + Sync {
    /// Run `commands` in order, stopping at the first failure
    fn run_commands(
        &self,
        commands: &[String],
    ) -> impl Future<Output = Result<CommandOutput, PtyError>> + Send;

    /// Terminate the in-flight command, if any
    fn kill(&self);

    /// Resize the terminal commands run on
    fn resize(&self, rows: u16, cols: u16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_first_failure() {
        let mut out = CommandOutput {
            transcript: "$ a".to_string(),
            failure: None,
        };
        out.append(CommandOutput {
            transcript: "$ b\nboom".to_string(),
            failure: Some(CommandFailure {
                command: "b".to_string(),
                exit_code: Some(1),
            }),
        });
        out.append(CommandOutput {
            transcript: String::new(),
            failure: Some(CommandFailure {
                command: "c".to_string(),
                exit_code: None,
            }),
        });
        assert_eq!(out.transcript, "$ a\n$ b\nboom");
        assert_eq!(out.failure.as_ref().map(|f| f.command.as_str()), Some("b"));
        assert!(!out.success());
    }

    #[test]
    fn test_failure_display() {
        let failure = CommandFailure {
            command: "git merge x".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(failure.to_string(), "'git merge x' exited with status 1");
    }
}
