//! Events the engine publishes while a release runs.

use crate::history::HistoryStatus;
use crate::pipeline::PipelineStatus;
use crate::state::{ReleaseStep, StepError};

/// Something the operator should see
#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseEvent {
    /// The source branch was probed on the remote before the release started
    SourceBranchChecked {
        /// Branch name
        branch: String,
        /// Whether it already exists remotely
        exists_on_remote: bool,
    },
    /// A step began executing
    StepStarted {
        /// The step
        step: ReleaseStep,
    },
    /// A step finished and the release moved on
    StepCompleted {
        /// The step that finished
        step: ReleaseStep,
        /// The step now current
        next: ReleaseStep,
    },
    /// A step failed and waits for Retry or Abort
    StepFailed {
        /// Recorded failure
        error: StepError,
    },
    /// The release merge request was opened (or found already open)
    MrCreated {
        /// Project-scoped id
        iid: u64,
        /// Web URL
        url: String,
    },
    /// The pipeline observer published a new status
    PipelineStatusUpdated(PipelineStatus),
    /// The release is over and its state file is gone
    Finished {
        /// How it ended
        status: HistoryStatus,
    },
}
