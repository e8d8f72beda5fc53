//! # rpb_release
//!
//! Resumable multi-branch release orchestration against a GitLab-style code
//! host.
//!
//! A release merges a selection of merge-request branches into a cumulative
//! source branch, copies the result onto an environment release branch,
//! commits and tags it, opens the release merge request and follows the
//! pipeline that deploys it. Every transition is persisted, so a crash or a
//! detached operator resumes at the exact step that was running.
//!
//! ## Features
//!
//! - **Resumable**: state is saved atomically after every step
//! - **Recoverable failures**: merge conflicts continue the merge on retry,
//!   rejected commits rewind to the content copy
//! - **Live output**: git runs on a pseudo-terminal; colors survive on screen
//!   and are stripped from the stored transcript
//! - **Pipeline tracking**: the release MR's deploy jobs are polled and
//!   summarized as a stage
//! - **History**: finished and aborted releases are recorded
//!
//! ## Usage
//!
//! ```bash
//! rpb_release start 2.0.0 --env develop --mr 12:feature/login --mr 15:fix/typo
//! rpb_release status
//! rpb_release retry
//! rpb_release abort --delete-remote
//! ```

// The PTY runner needs unsafe for the session/controlling-terminal setup in
// the child and for the window-size ioctl; it opts in locally.
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod history;
pub mod host;
pub mod pipeline;
pub mod pty;
pub mod state;
pub mod terminal;
pub mod version;

pub use cli::Args;
pub use config::ReleaseSettings;
pub use engine::{
    Collaborators, ReleaseEvent, ReleaseMachine, ReleaseRequest, SessionAction, SessionEnd,
    StepOutcome, drive,
};
pub use error::{CliError, ReleaseError, Result};
pub use git::{CommandSequencer, ExcludeMatcher, GitWorkspace, Workspace};
pub use history::{HistoryStatus, HistoryStore};
pub use host::{CodeHost, GitLabClient, LogNotifier, Notifier};
pub use pipeline::{PipelineObserver, PipelineStage, PipelineStatus};
pub use pty::{CommandOutput, CommandRunner, PtyRunner};
pub use state::{ReleaseState, ReleaseStep, StateManager};
