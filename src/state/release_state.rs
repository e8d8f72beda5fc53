//! Release state tracking and serialization.

use crate::error::{Result, StateError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Current version of the state format
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Step of the release workflow.
///
/// Declaration order is workflow order; `Ord` is relied on when deciding which
/// branches were already pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseStep {
    /// Fetch all remotes
    GitFetch,
    /// Check out (or create) the source branch
    CheckoutRoot,
    /// Merge the selected MR branches, one per execution
    MergeBranches,
    /// Check out (or create) the environment release branch
    CheckoutEnv,
    /// Replace the environment tree with the source tree
    CopyContent,
    /// Commit the copied content
    Commit,
    /// Suspended until the operator asks for the MR
    WaitForMr,
    /// Push the environment branch and open the MR
    PushAndCreateMr,
    /// Suspended until the operator asks to push root branches
    WaitForRootPush,
    /// Push the source branch and merge it back into root/develop
    PushRootBranches,
    /// Return the working tree to the base branch
    SwitchToRoot,
    /// Terminal
    Complete,
}

impl ReleaseStep {
    /// Step that follows a successful execution of `self`.
    ///
    /// `MergeBranches` is handled by the caller: it repeats until every MR
    /// branch is merged.
    pub fn next(self) -> ReleaseStep {
        match self {
            ReleaseStep::GitFetch => ReleaseStep::CheckoutRoot,
            ReleaseStep::CheckoutRoot => ReleaseStep::MergeBranches,
            ReleaseStep::MergeBranches => ReleaseStep::CheckoutEnv,
            ReleaseStep::CheckoutEnv => ReleaseStep::CopyContent,
            ReleaseStep::CopyContent => ReleaseStep::Commit,
            ReleaseStep::Commit => ReleaseStep::WaitForMr,
            ReleaseStep::WaitForMr => ReleaseStep::PushAndCreateMr,
            ReleaseStep::PushAndCreateMr => ReleaseStep::WaitForRootPush,
            ReleaseStep::WaitForRootPush => ReleaseStep::PushRootBranches,
            ReleaseStep::PushRootBranches => ReleaseStep::SwitchToRoot,
            ReleaseStep::SwitchToRoot => ReleaseStep::Complete,
            ReleaseStep::Complete => ReleaseStep::Complete,
        }
    }

    /// Suspend points wait for an explicit external trigger
    pub fn is_suspend(self) -> bool {
        matches!(self, ReleaseStep::WaitForMr | ReleaseStep::WaitForRootPush)
    }

    /// Whether the workflow is finished
    pub fn is_terminal(self) -> bool {
        self == ReleaseStep::Complete
    }

    /// Steps that run commands; a persisted state sitting on one of these
    /// without an error was interrupted mid-flight.
    pub fn is_executable(self) -> bool {
        !self.is_suspend() && !self.is_terminal()
    }
}

impl std::fmt::Display for ReleaseStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReleaseStep::GitFetch => "Git Fetch",
            ReleaseStep::CheckoutRoot => "Checkout Source Branch",
            ReleaseStep::MergeBranches => "Merge Branches",
            ReleaseStep::CheckoutEnv => "Checkout Environment Branch",
            ReleaseStep::CopyContent => "Copy Content",
            ReleaseStep::Commit => "Commit",
            ReleaseStep::WaitForMr => "Waiting For MR",
            ReleaseStep::PushAndCreateMr => "Push And Create MR",
            ReleaseStep::WaitForRootPush => "Waiting For Root Push",
            ReleaseStep::PushRootBranches => "Push Root Branches",
            ReleaseStep::SwitchToRoot => "Switch To Root",
            ReleaseStep::Complete => "Complete",
        };
        f.write_str(name)
    }
}

/// Deployment environment and the branch it tracks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Display name, e.g. `DEVELOP`
    pub name: String,
    /// Remote branch and release-branch suffix, e.g. `develop`
    pub branch_name: String,
}

impl Environment {
    /// Create an environment
    pub fn new(name: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch_name: branch_name.into(),
        }
    }
}

/// How a step failed; drives what Retry does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorCode {
    /// Any non-zero exit; Retry re-runs the step
    Generic,
    /// A merge stopped with conflicts; Retry continues the merge
    MergeConflict,
    /// The commit was refused; the tree was rewound to CopyContent
    CommitRejected,
    /// Found mid-flight on resume; Retry re-runs the step from scratch
    Interrupted,
}

impl std::fmt::Display for StepErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StepErrorCode::Generic => "step failed",
            StepErrorCode::MergeConflict => "merge conflict",
            StepErrorCode::CommitRejected => "commit rejected",
            StepErrorCode::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// Failure recorded on the state while the release waits for Retry or Abort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    /// Step that failed
    pub step: ReleaseStep,
    /// Classification
    pub code: StepErrorCode,
    /// Human readable message
    pub message: String,
}

/// A merge request chosen for the release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequestRef {
    /// Project-scoped MR id
    pub iid: u64,
    /// MR source branch
    pub source_branch: String,
    /// Web URL
    pub web_url: String,
    /// Head commit SHA
    pub sha: String,
}

/// Complete release operation state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseState {
    /// Version of the state format
    pub format_version: u32,
    /// Incremented on every save
    pub save_version: u64,
    /// Timestamp when release started
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// Timestamp when release was last updated
    pub updated_at: chrono::DateTime<chrono::Utc>,

    /// Code-host project
    pub project_id: String,
    /// Target environment
    pub environment: Environment,
    /// Version being released
    pub version: String,
    /// Cumulative branch the MR branches are merged into
    pub source_branch: String,
    /// Whether the source branch already existed on the remote at start
    pub source_branch_is_remote: bool,
    /// Merge the source branch back into root (and develop) at the end
    pub root_merge: bool,
    /// Long-lived base branch
    pub base_branch: String,
    /// Optional develop branch that also receives the root merge
    #[serde(default)]
    pub develop_branch: Option<String>,

    /// Selected MR ids, in merge order
    pub selected_mr_ids: Vec<u64>,
    /// MR source branches, index-aligned with `selected_mr_ids`
    pub mr_branches: Vec<String>,
    /// MR web URLs, index-aligned
    pub mr_urls: Vec<String>,
    /// MR head SHAs, index-aligned
    pub mr_commit_shas: Vec<String>,

    /// Step to execute (or retry) next
    pub current_step: ReleaseStep,
    /// Last step that finished successfully
    pub last_success_step: Option<ReleaseStep>,
    /// Index of the next MR branch to merge
    pub current_mr_index: usize,
    /// Branches merged so far; always a prefix of `mr_branches`
    pub merged_branches: Vec<String>,
    /// Display-only progress counter
    pub completed_sub_steps: usize,
    /// Display-only progress total
    pub total_sub_steps: usize,

    /// Pending failure, if any
    pub last_error: Option<StepError>,
    /// Tail of the failing command's output
    #[serde(default)]
    pub error_output: String,
    /// Capped transcript for resume display
    #[serde(default)]
    pub terminal_output: String,

    /// MR opened against the environment branch
    pub created_mr_url: Option<String>,
    /// Its project-scoped id
    pub created_mr_id: Option<u64>,
    /// Title of the release commit
    #[serde(default)]
    pub release_title: Option<String>,
    /// Tag created on the release commit
    pub tag_name: Option<String>,

    /// Absolute path of the orchestrated working tree
    pub work_dir: PathBuf,
}

/// Parameters collected before a release starts
#[derive(Debug, Clone)]
pub struct ReleaseParams {
    /// Code-host project
    pub project_id: String,
    /// Target environment
    pub environment: Environment,
    /// Version being released
    pub version: String,
    /// Cumulative branch name
    pub source_branch: String,
    /// Whether it already exists remotely
    pub source_branch_is_remote: bool,
    /// Merge back into root at the end
    pub root_merge: bool,
    /// Long-lived base branch
    pub base_branch: String,
    /// Optional develop branch
    pub develop_branch: Option<String>,
    /// Selected MRs in merge order
    pub merge_requests: Vec<MergeRequestRef>,
    /// Absolute working tree path
    pub work_dir: PathBuf,
}

/// Total display sub-steps for a release
pub fn total_sub_steps(mr_count: usize, root_merge: bool) -> usize {
    8 + mr_count + usize::from(root_merge)
}

impl ReleaseState {
    /// Create a fresh state positioned at `GitFetch`
    pub fn new(params: ReleaseParams) -> Self {
        let now = chrono::Utc::now();
        let mr_count = params.merge_requests.len();
        let (mut ids, mut branches, mut urls, mut shas) = (
            Vec::with_capacity(mr_count),
            Vec::with_capacity(mr_count),
            Vec::with_capacity(mr_count),
            Vec::with_capacity(mr_count),
        );
        for mr in params.merge_requests {
            ids.push(mr.iid);
            branches.push(mr.source_branch);
            urls.push(mr.web_url);
            shas.push(mr.sha);
        }

        Self {
            format_version: STATE_FORMAT_VERSION,
            save_version: 0,
            started_at: now,
            updated_at: now,
            project_id: params.project_id,
            environment: params.environment,
            version: params.version,
            source_branch: params.source_branch,
            source_branch_is_remote: params.source_branch_is_remote,
            root_merge: params.root_merge,
            base_branch: params.base_branch,
            develop_branch: params.develop_branch,
            selected_mr_ids: ids,
            mr_branches: branches,
            mr_urls: urls,
            mr_commit_shas: shas,
            current_step: ReleaseStep::GitFetch,
            last_success_step: None,
            current_mr_index: 0,
            merged_branches: Vec::new(),
            completed_sub_steps: 0,
            total_sub_steps: total_sub_steps(mr_count, params.root_merge),
            last_error: None,
            error_output: String::new(),
            terminal_output: String::new(),
            created_mr_url: None,
            created_mr_id: None,
            release_title: None,
            tag_name: None,
            work_dir: params.work_dir,
        }
    }

    /// Move to `step`, updating the display counter
    pub fn set_step(&mut self, step: ReleaseStep) {
        self.current_step = step;
        self.record_progress();
        self.touch();
    }

    /// Record a successful step
    pub fn mark_success(&mut self, step: ReleaseStep) {
        self.last_success_step = Some(step);
        self.touch();
    }

    /// Record a failure and the tail of its output
    pub fn record_error(&mut self, error: StepError, output: &str, tail_lines: usize) {
        self.last_error = Some(error);
        self.error_output = tail(output, tail_lines);
        self.touch();
    }

    /// Clear a pending failure
    pub fn clear_error(&mut self) {
        self.last_error = None;
        self.error_output.clear();
        self.touch();
    }

    /// Record that the branch at `current_mr_index` is merged
    pub fn record_merged(&mut self) {
        if let Some(branch) = self.mr_branches.get(self.current_mr_index) {
            self.merged_branches.push(branch.clone());
            self.current_mr_index = self.merged_branches.len();
            self.record_progress();
            self.touch();
        }
    }

    /// Whether every selected branch is merged
    pub fn all_merged(&self) -> bool {
        self.current_mr_index >= self.mr_branches.len()
    }

    /// Branch the merge step works on next
    pub fn pending_merge_branch(&self) -> Option<&str> {
        self.mr_branches.get(self.current_mr_index).map(String::as_str)
    }

    /// Append command output to the capped transcript
    pub fn append_output(&mut self, text: &str, max_lines: usize) {
        if text.is_empty() {
            return;
        }
        if !self.terminal_output.is_empty() && !self.terminal_output.ends_with('\n') {
            self.terminal_output.push('\n');
        }
        self.terminal_output.push_str(text);
        self.terminal_output = tail(&self.terminal_output, max_lines);
    }

    /// Sub-steps finished before the current position
    fn sub_steps_before_current(&self) -> usize {
        let n = self.mr_branches.len();
        let root = usize::from(self.root_merge);
        match self.current_step {
            ReleaseStep::GitFetch => 0,
            ReleaseStep::CheckoutRoot => 1,
            ReleaseStep::MergeBranches => 2 + self.merged_branches.len().min(n),
            ReleaseStep::CheckoutEnv => 2 + n,
            ReleaseStep::CopyContent => 3 + n,
            ReleaseStep::Commit => 4 + n,
            ReleaseStep::WaitForMr | ReleaseStep::PushAndCreateMr => 5 + n,
            ReleaseStep::WaitForRootPush | ReleaseStep::PushRootBranches => 6 + n,
            ReleaseStep::SwitchToRoot => 7 + n + root,
            ReleaseStep::Complete => self.total_sub_steps,
        }
    }

    /// The counter never decreases, even when a commit rejection rewinds the step
    fn record_progress(&mut self) {
        let position = self.sub_steps_before_current().min(self.total_sub_steps);
        self.completed_sub_steps = self.completed_sub_steps.max(position);
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    /// Get progress percentage
    pub fn progress_percent(&self) -> f64 {
        if self.total_sub_steps == 0 {
            return 0.0;
        }
        self.completed_sub_steps as f64 * 100.0 / self.total_sub_steps as f64
    }

    /// Get elapsed time
    pub fn elapsed_time(&self) -> chrono::Duration {
        self.updated_at - self.started_at
    }

    /// Validate state consistency
    pub fn validate(&self) -> Result<()> {
        if self.format_version != STATE_FORMAT_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: self.format_version,
            }
            .into());
        }

        let n = self.mr_branches.len();
        if self.selected_mr_ids.len() != n || self.mr_urls.len() != n || self.mr_commit_shas.len() != n
        {
            return Err(StateError::Corrupted {
                reason: "merge request sequences are not index-aligned".to_string(),
            }
            .into());
        }
        if self.current_mr_index > n
            || self.merged_branches.len() > n
            || self.merged_branches[..] != self.mr_branches[..self.merged_branches.len()]
        {
            return Err(StateError::Corrupted {
                reason: "merged branches are not a prefix of the selection".to_string(),
            }
            .into());
        }
        if self.current_step == ReleaseStep::MergeBranches
            && self.current_mr_index != self.merged_branches.len()
        {
            return Err(StateError::Corrupted {
                reason: format!(
                    "merge index {} does not match {} merged branches",
                    self.current_mr_index,
                    self.merged_branches.len()
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Create a summary of the release state
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Release {} → {} at {} ({:.0}% complete, {} elapsed)",
            self.version,
            self.environment.name,
            self.current_step,
            self.progress_percent(),
            format_duration(self.elapsed_time())
        );
        if let Some(error) = &self.last_error {
            summary.push_str(&format!(" - {} at {}: {}", error.code, error.step, error.message));
        }
        summary
    }
}

/// Last `lines` lines of `text`
pub fn tail(text: &str, lines: usize) -> String {
    let total = text.lines().count();
    if total <= lines {
        return text.to_string();
    }
    text.lines().skip(total - lines).collect::<Vec<_>>().join("\n")
}

fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
