//! Error types for rpb_release operations.
//!
//! Step-level failures of a release are *not* represented here: they are
//! recorded on the persisted state as [`crate::state::StepError`] values and
//! recovered through Retry. The types below cover everything that stops an
//! operation outright.

use crate::state::ReleaseStep;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for rpb_release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Main error type for all rpb_release operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// A release cannot start
    #[error("Precondition failed: {0}")]
    Precondition(#[from] PreconditionError),

    /// State persistence errors
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Git probe errors
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// Pseudo-terminal errors
    #[error("PTY error: {0}")]
    Pty(#[from] PtyError),

    /// Code-host API errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Settings errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// History log errors
    #[error("History error: {0}")]
    History(#[from] HistoryError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// Operation invoked in a state that does not allow it
    #[error("Cannot {operation} while at step {step}")]
    InvalidTransition {
        /// Requested operation
        operation: &'static str,
        /// Step the release is at
        step: ReleaseStep,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Conditions that block `start` before any state exists
#[derive(Error, Debug)]
pub enum PreconditionError {
    /// Working tree has uncommitted changes
    #[error("Working directory not clean. Please commit or stash changes before releasing.")]
    DirtyWorkingDirectory,

    /// No git project root could be resolved
    #[error("Could not resolve a git project root from {path}")]
    RootNotFound {
        /// Directory that was probed
        path: PathBuf,
    },

    /// A persisted release already exists for this working directory
    #[error("A release is already in progress in {path}")]
    ReleaseInProgress {
        /// Working directory
        path: PathBuf,
    },

    /// The release selection is unusable
    #[error("Invalid release selection: {reason}")]
    InvalidSelection {
        /// Reason for the error
        reason: String,
    },
}

/// State management errors
#[derive(Error, Debug)]
pub enum StateError {
    /// State file corrupted
    #[error("State file corrupted: {reason}")]
    Corrupted {
        /// Reason for the error
        reason: String,
    },

    /// State file not found
    #[error("State file not found. No release in progress.")]
    NotFound,

    /// State version mismatch
    #[error("State file version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version
        expected: u32,
        /// Found version
        found: u32,
    },

    /// Another process holds the state lock
    #[error("State file is locked by another process")]
    Locked,

    /// Failed to save state
    #[error("Failed to save state: {reason}")]
    SaveFailed {
        /// Reason for the error
        reason: String,
    },

    /// Failed to load state
    #[error("Failed to load state: {reason}")]
    LoadFailed {
        /// Reason for the error
        reason: String,
    },
}

/// Read-only git query errors
#[derive(Error, Debug)]
pub enum GitError {
    /// git exited non-zero
    #[error("'{command}' failed: {stderr}")]
    CommandFailed {
        /// Command line
        command: String,
        /// Captured stderr
        stderr: String,
    },

    /// git could not be started
    #[error("Failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Pseudo-terminal errors. A non-zero exit status is never one of these.
#[derive(Error, Debug)]
pub enum PtyError {
    /// The OS refused to allocate a pseudo-terminal
    #[error("Failed to allocate pseudo-terminal: {reason}")]
    Allocation {
        /// Reason for the error
        reason: String,
    },

    /// The shell could not be started
    #[error("Failed to spawn '{command}': {reason}")]
    Spawn {
        /// Command line
        command: String,
        /// Reason for the error
        reason: String,
    },

    /// Runner was closed
    #[error("Runner has been closed")]
    Closed,

    /// Background task failed
    #[error("PTY task failed: {reason}")]
    Task {
        /// Reason for the error
        reason: String,
    },

    /// PTYs are not available on this platform
    #[error("Pseudo-terminals are not supported on this platform")]
    Unsupported,
}

/// Code-host API errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Resource does not exist
    #[error("Not found: {resource}")]
    NotFound {
        /// Requested resource
        resource: String,
    },

    /// Token rejected
    #[error("Authentication failed (HTTP {status})")]
    Unauthorized {
        /// HTTP status code
        status: u16,
    },

    /// Transport failure
    #[error("Network error: {reason}")]
    Network {
        /// Reason for the error
        reason: String,
    },

    /// Unexpected HTTP status
    #[error("Unexpected HTTP status {status}: {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body (truncated)
        body: String,
    },

    /// Response body could not be decoded
    #[error("Failed to decode response: {reason}")]
    Decode {
        /// Reason for the error
        reason: String,
    },

    /// No client was configured
    #[error("Code host is not configured: {reason}")]
    NotConfigured {
        /// Reason for the error
        reason: String,
    },
}

impl ApiError {
    /// Whether the error means the resource is missing rather than unreachable
    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound { .. })
    }
}

/// Settings errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Settings file unreadable
    #[error("Failed to read settings {path}: {reason}")]
    Read {
        /// Settings path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Settings file not valid TOML
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Exclude pattern rejected
    #[error("Invalid exclude pattern '{pattern}': {reason}")]
    InvalidExcludePattern {
        /// Offending pattern
        pattern: String,
        /// Reason for the error
        reason: String,
    },

    /// Job filter does not compile
    #[error("Invalid job filter pattern '{pattern}': {reason}")]
    InvalidJobFilter {
        /// Offending pattern
        pattern: String,
        /// Reason for the error
        reason: String,
    },

    /// Named environment is not configured
    #[error("Unknown environment '{name}'")]
    UnknownEnvironment {
        /// Environment name
        name: String,
    },

    /// Any other invalid value
    #[error("Invalid setting '{field}': {reason}")]
    Invalid {
        /// Setting name
        field: &'static str,
        /// Reason for the error
        reason: String,
    },
}

/// History log errors
#[derive(Error, Debug)]
pub enum HistoryError {
    /// No history directory could be determined
    #[error("Could not determine a history directory")]
    NoDirectory,

    /// Entry does not exist
    #[error("History entry '{id}' not found")]
    NotFound {
        /// Entry ID
        id: String,
    },

    /// Failed to write the log
    #[error("Failed to write history: {reason}")]
    WriteFailed {
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },
}

impl ReleaseError {
    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ReleaseError::Precondition(PreconditionError::DirtyWorkingDirectory) => vec![
                "Commit pending changes: git add . && git commit -m 'message'".to_string(),
                "Stash changes temporarily: git stash".to_string(),
            ],
            ReleaseError::Precondition(PreconditionError::RootNotFound { .. }) => vec![
                "Run from inside the project's git working tree".to_string(),
            ],
            ReleaseError::Precondition(PreconditionError::ReleaseInProgress { .. }) => vec![
                "Inspect it: rpb_release status".to_string(),
                "Continue it: rpb_release retry / rpb_release proceed".to_string(),
                "Discard it: rpb_release abort".to_string(),
            ],
            ReleaseError::State(StateError::Locked) => vec![
                "Another rpb_release process is driving this release; wait for it to exit"
                    .to_string(),
            ],
            ReleaseError::Api(ApiError::Unauthorized { .. }) => vec![
                "Set GITLAB_TOKEN to a token with api scope".to_string(),
            ],
            ReleaseError::Config(ConfigError::InvalidExcludePattern { .. }) => vec![
                "Narrow the pattern: bare '*', '**', '/' and '*/' exclude everything".to_string(),
            ],
            ReleaseError::InvalidTransition { .. } => vec![
                "Check the current step: rpb_release status".to_string(),
            ],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ReleaseError::Precondition(PreconditionError::RootNotFound { .. })
                | ReleaseError::State(StateError::Corrupted { .. })
                | ReleaseError::State(StateError::VersionMismatch { .. })
                | ReleaseError::Config(_)
                | ReleaseError::Pty(PtyError::Unsupported)
        )
    }
}
