//! Release state machine.
//!
//! Every transition is persisted before the next step runs, so the state file
//! always names the step to execute (or retry) after a crash. Step failures
//! never escape as `Err`: they are recorded on the state and wait for Retry
//! or Abort. `Err` is reserved for persistence, precondition and transition
//! errors.

use super::events::ReleaseEvent;
use crate::config::ReleaseSettings;
use crate::error::{ApiError, GitError, PreconditionError, PtyError, ReleaseError, Result};
use crate::git::{
    CommandSequencer, ExcludeMatcher, Workspace, commit_body, commit_title, merge_in_progress,
    source_branch_name, tag_name,
};
use crate::history::{HistoryStatus, HistoryStore};
use crate::host::{CodeHost, CreatedMergeRequest, NewMergeRequest, Notifier};
use crate::pipeline::{JobFilter, ObservedRelease, PipelineObserver, PipelineStatus};
use crate::pty::CommandRunner;
use crate::state::{
    Environment, MergeRequestRef, ReleaseParams, ReleaseState, ReleaseStep, StateManager,
    StepError, StepErrorCode, create_state_manager,
};
use crate::version::next_release_number;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// What the operator chose to release
#[derive(Debug, Clone)]
pub struct ReleaseRequest {
    /// Merge requests in merge order
    pub merge_requests: Vec<MergeRequestRef>,
    /// Target environment
    pub environment: Environment,
    /// Version label, e.g. `2.0.0`
    pub version: String,
    /// Cumulative branch; derived from the version when `None`
    pub source_branch: Option<String>,
    /// Merge the source branch back into root at the end
    pub root_merge: bool,
}

/// Everything the machine talks to
pub struct Collaborators<R, W, H> {
    /// Runs mutating git commands
    pub runner: Arc<R>,
    /// Read-only git queries
    pub workspace: W,
    /// Code-host API
    pub host: Arc<H>,
    /// Pipeline outcome sink
    pub notifier: Arc<dyn Notifier>,
    /// Where finished releases are recorded
    pub history: HistoryStore,
    /// Release settings
    pub settings: ReleaseSettings,
    /// Optional event listener
    pub events: Option<mpsc::UnboundedSender<ReleaseEvent>>,
}

/// Result of driving the current step once
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step succeeded
    Advanced {
        /// Step that ran
        from: ReleaseStep,
        /// Step now current
        to: ReleaseStep,
    },
    /// Waiting for the operator to proceed
    Suspended(ReleaseStep),
    /// A failure is pending; Retry or Abort
    Failed(StepError),
    /// Nothing left to run
    Completed,
}

/// Step failure before it is recorded on the state
#[derive(Debug)]
struct StepFailure {
    code: StepErrorCode,
    message: String,
    output: String,
}

impl StepFailure {
    fn generic(message: impl Into<String>) -> Self {
        Self {
            code: StepErrorCode::Generic,
            message: message.into(),
            output: String::new(),
        }
    }
}

impl From<GitError> for StepFailure {
    fn from(e: GitError) -> Self {
        Self::generic(e.to_string())
    }
}

impl From<PtyError> for StepFailure {
    fn from(e: PtyError) -> Self {
        Self::generic(e.to_string())
    }
}

impl From<ApiError> for StepFailure {
    fn from(e: ApiError) -> Self {
        Self::generic(e.to_string())
    }
}

/// Drives one release from GitFetch to Complete
pub struct ReleaseMachine<R, W, H> {
    state: ReleaseState,
    state_manager: StateManager,
    runner: Arc<R>,
    workspace: W,
    host: Arc<H>,
    observer: PipelineObserver<H>,
    history: HistoryStore,
    settings: ReleaseSettings,
    exclude: ExcludeMatcher,
    events: Option<mpsc::UnboundedSender<ReleaseEvent>>,
    continue_merge: bool,
}

impl<R, W, H> std::fmt::Debug for ReleaseMachine<R, W, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseMachine")
            .field("version", &self.state.version)
            .field("environment", &self.state.environment.name)
            .field("current_step", &self.state.current_step)
            .finish_non_exhaustive()
    }
}

impl<R, W, H> ReleaseMachine<R, W, H>
where
    R: CommandRunner + 'static,
    W: Workspace,
    H: CodeHost + 'static,
{
    /// Begin a new release. Fails if the tree is dirty, no project root
    /// resolves, or a release is already persisted for this tree.
    pub async fn start(collaborators: Collaborators<R, W, H>, request: ReleaseRequest) -> Result<Self> {
        collaborators.settings.validate()?;
        validate_request(&request)?;

        let work_dir = collaborators.workspace.work_dir().to_path_buf();
        let root = collaborators
            .workspace
            .project_root()
            .await
            .map_err(|e| {
                log::debug!("project root lookup failed: {}", e);
                PreconditionError::RootNotFound {
                    path: work_dir.clone(),
                }
            })?;

        let state_manager = create_state_manager(&root);
        if state_manager.state_exists() {
            return Err(PreconditionError::ReleaseInProgress { path: root }.into());
        }
        if !collaborators.workspace.is_clean().await? {
            return Err(PreconditionError::DirtyWorkingDirectory.into());
        }

        let settings = &collaborators.settings;
        let source_branch = request
            .source_branch
            .clone()
            .filter(|b| !b.trim().is_empty())
            .unwrap_or_else(|| source_branch_name(&request.version));
        let exists_on_remote = collaborators
            .workspace
            .remote_branch_exists(&settings.remote, &source_branch)
            .await?;

        let state = ReleaseState::new(ReleaseParams {
            project_id: settings.project_id.clone(),
            environment: request.environment,
            version: request.version,
            source_branch: source_branch.clone(),
            source_branch_is_remote: exists_on_remote,
            root_merge: request.root_merge,
            base_branch: settings.base_branch.clone(),
            develop_branch: settings.develop_branch.clone(),
            merge_requests: request.merge_requests,
            work_dir: root,
        });

        let mut machine = Self::assemble(collaborators, state, state_manager)?;
        machine.emit(ReleaseEvent::SourceBranchChecked {
            branch: source_branch,
            exists_on_remote,
        });
        machine.persist().await?;
        log::info!("started release: {}", machine.state.summary());
        Ok(machine)
    }

    /// Reload the persisted release for the workspace's project. A step that
    /// was mid-flight when the previous process died comes back as an
    /// Interrupted failure so the operator decides whether to retry it.
    pub async fn resume(collaborators: Collaborators<R, W, H>) -> Result<Self> {
        let work_dir = collaborators.workspace.work_dir().to_path_buf();
        let root = collaborators
            .workspace
            .project_root()
            .await
            .map_err(|_| PreconditionError::RootNotFound { path: work_dir })?;

        let mut state_manager = create_state_manager(&root);
        let state = state_manager.load_state().await?;
        let mut machine = Self::assemble(collaborators, state, state_manager)?;

        let step = machine.state.current_step;
        if step.is_executable() && machine.state.last_error.is_none() {
            log::warn!("release was interrupted during {}", step);
            machine.state.record_error(
                StepError {
                    step,
                    code: StepErrorCode::Interrupted,
                    message: format!(
                        "Release was interrupted during {}. Retry runs the step again.",
                        step
                    ),
                },
                "",
                0,
            );
            machine.persist().await?;
        }
        if step == ReleaseStep::WaitForRootPush {
            machine.start_observer();
        }
        log::info!("resumed release: {}", machine.state.summary());
        Ok(machine)
    }

    fn assemble(
        collaborators: Collaborators<R, W, H>,
        state: ReleaseState,
        state_manager: StateManager,
    ) -> Result<Self> {
        let Collaborators {
            runner,
            workspace,
            host,
            notifier,
            history,
            settings,
            events,
        } = collaborators;
        let exclude = settings.exclude_matcher()?;
        let observer = PipelineObserver::new(Arc::clone(&host), notifier, settings.poll_interval());
        Ok(Self {
            state,
            state_manager,
            runner,
            workspace,
            host,
            observer,
            history,
            settings,
            exclude,
            events,
            continue_merge: false,
        })
    }

    /// Current state
    pub fn state(&self) -> &ReleaseState {
        &self.state
    }

    /// The command runner, shared so a session can kill or resize it while a
    /// step is running
    pub fn runner(&self) -> Arc<R> {
        Arc::clone(&self.runner)
    }

    /// Latest pipeline status
    pub fn pipeline_status(&self) -> PipelineStatus {
        self.observer.status()
    }

    /// Receive every pipeline status the observer publishes
    pub fn pipeline_updates(&self) -> watch::Receiver<PipelineStatus> {
        self.observer.subscribe()
    }

    /// Whether the pipeline observer is running
    pub fn is_observing(&self) -> bool {
        self.observer.is_observing()
    }

    pub(crate) fn emit(&self, event: ReleaseEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    async fn persist(&mut self) -> Result<()> {
        self.state_manager.save_state(&mut self.state).await
    }

    fn sequencer(&self) -> CommandSequencer {
        CommandSequencer::from_state(&self.state, &self.settings.remote)
    }

    /// Run the current step once
    pub async fn execute_step(&mut self) -> Result<StepOutcome> {
        let step = self.state.current_step;
        if step.is_terminal() {
            return Ok(StepOutcome::Completed);
        }
        if let Some(error) = &self.state.last_error {
            return Ok(StepOutcome::Failed(error.clone()));
        }
        if step.is_suspend() {
            return Ok(StepOutcome::Suspended(step));
        }

        log::info!("running step {}", step);
        self.emit(ReleaseEvent::StepStarted { step });
        let continue_merge = std::mem::take(&mut self.continue_merge);

        match self.run_step(step, continue_merge).await {
            Ok(()) => {
                self.state.mark_success(step);
                let next = if step == ReleaseStep::MergeBranches && !self.state.all_merged() {
                    ReleaseStep::MergeBranches
                } else {
                    step.next()
                };
                self.state.set_step(next);
                self.persist().await?;
                if next == ReleaseStep::WaitForRootPush {
                    self.start_observer();
                }
                self.emit(ReleaseEvent::StepCompleted { step, next });
                Ok(StepOutcome::Advanced { from: step, to: next })
            }
            Err(failure) => {
                let error = self.record_failure(step, failure).await;
                self.persist().await?;
                self.emit(ReleaseEvent::StepFailed {
                    error: error.clone(),
                });
                Ok(StepOutcome::Failed(error))
            }
        }
    }

    /// Execute steps until the release suspends, fails or completes
    pub async fn run_until_suspended(&mut self) -> Result<StepOutcome> {
        loop {
            match self.execute_step().await? {
                StepOutcome::Advanced { .. } => continue,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Clear the pending failure so the next execution re-runs its step. A
    /// merge conflict with the merge still in progress is continued rather
    /// than restarted.
    pub fn prepare_retry(&mut self) -> Result<()> {
        let Some(error) = self.state.last_error.clone() else {
            return Err(ReleaseError::InvalidTransition {
                operation: "retry",
                step: self.state.current_step,
            });
        };
        self.continue_merge = error.code == StepErrorCode::MergeConflict
            && self.state.current_step == ReleaseStep::MergeBranches
            && merge_in_progress(&self.state.work_dir);
        log::info!(
            "retrying {} after {}{}",
            self.state.current_step,
            error.code,
            if self.continue_merge {
                " (continuing merge)"
            } else {
                ""
            }
        );
        self.state.clear_error();
        Ok(())
    }

    /// Re-execute the step named by the pending failure
    pub async fn retry(&mut self) -> Result<StepOutcome> {
        self.prepare_retry()?;
        self.execute_step().await
    }

    /// Leave the current suspension point without running anything yet
    pub async fn prepare_proceed(&mut self) -> Result<()> {
        let step = self.state.current_step;
        if self.state.last_error.is_some() {
            return Err(ReleaseError::InvalidTransition {
                operation: "proceed",
                step,
            });
        }
        let next = match step {
            ReleaseStep::WaitForMr => ReleaseStep::PushAndCreateMr,
            ReleaseStep::WaitForRootPush => {
                self.observer.stop();
                ReleaseStep::PushRootBranches
            }
            _ => {
                return Err(ReleaseError::InvalidTransition {
                    operation: "proceed",
                    step,
                });
            }
        };
        self.state.mark_success(step);
        self.state.set_step(next);
        self.persist().await
    }

    /// Exit whichever suspension point the release is at and run the next step
    pub async fn proceed(&mut self) -> Result<StepOutcome> {
        self.prepare_proceed().await?;
        self.execute_step().await
    }

    /// Exit WaitForMr: push the release branch and open its merge request
    pub async fn create_mr(&mut self) -> Result<StepOutcome> {
        self.require_step("create the merge request", ReleaseStep::WaitForMr)?;
        self.proceed().await
    }

    /// Exit WaitForRootPush: push the source branch and merge it back to root
    pub async fn push_root(&mut self) -> Result<StepOutcome> {
        self.require_step("push root branches", ReleaseStep::WaitForRootPush)?;
        self.proceed().await
    }

    fn require_step(&self, operation: &'static str, expected: ReleaseStep) -> Result<()> {
        let step = self.state.current_step;
        if step != expected || self.state.last_error.is_some() {
            return Err(ReleaseError::InvalidTransition { operation, step });
        }
        Ok(())
    }

    /// Record a finished release in history and remove its state
    pub async fn complete(&mut self) -> Result<()> {
        self.require_step("complete", ReleaseStep::Complete)?;
        self.observer.stop();
        self.finish(HistoryStatus::Completed)
    }

    /// Best-effort cleanup of everything the release created, then remove its
    /// state. Remote branches and tags are only deleted with `delete_remote`.
    pub async fn abort(&mut self, delete_remote: bool) -> Result<()> {
        log::warn!(
            "aborting release {} at {}",
            self.state.version,
            self.state.current_step
        );
        self.runner.kill();
        self.observer.stop();

        let seq = self.sequencer();
        let step = self.state.current_step;
        let tagged = step >= ReleaseStep::PushAndCreateMr;
        let tag = self.state.tag_name.clone().filter(|_| tagged);

        let mut commands = Vec::new();
        if merge_in_progress(&self.state.work_dir) {
            commands.extend(seq.abort_merge());
        }
        commands.extend(seq.abort_local(tag.as_deref()));
        if delete_remote {
            commands.extend(seq.abort_remote(
                tagged,
                step >= ReleaseStep::PushRootBranches,
                tag.as_deref(),
            ));
        }
        for command in commands {
            if let Err(failure) = self.run(vec![command]).await {
                log::warn!("abort cleanup: {}", failure.message);
            }
        }
        self.finish(HistoryStatus::Aborted)
    }

    fn finish(&mut self, status: HistoryStatus) -> Result<()> {
        if let Err(e) = self.history.record(&self.state, status) {
            log::warn!("failed to record release history: {}", e);
        }
        self.state_manager.cleanup_state()?;
        self.emit(ReleaseEvent::Finished { status });
        Ok(())
    }

    fn start_observer(&self) {
        let Some(mr_iid) = self.state.created_mr_id else {
            log::warn!("no release merge request recorded; pipeline is not observed");
            return;
        };
        let filter = self
            .settings
            .job_filter(&self.state.environment)
            .unwrap_or_else(|e| {
                log::warn!("{}; observing every job", e);
                JobFilter::all()
            });
        self.observer.start(ObservedRelease {
            project: self.state.project_id.clone(),
            mr_iid,
            filter,
            label: format!("{} → {}", self.state.version, self.state.environment.name),
        });
    }

    async fn record_failure(&mut self, step: ReleaseStep, failure: StepFailure) -> StepError {
        if failure.code == StepErrorCode::CommitRejected {
            let discard = self.sequencer().discard_rejected_commit();
            if let Err(e) = self.run(discard).await {
                log::warn!("failed to discard rejected commit: {}", e.message);
            }
            self.state.set_step(ReleaseStep::CopyContent);
        }
        let error = StepError {
            step,
            code: failure.code,
            message: failure.message,
        };
        log::warn!("step {} failed ({}): {}", step, error.code, error.message);
        self.state
            .record_error(error.clone(), &failure.output, self.settings.error_tail_lines);
        error
    }

    /// Run commands on the runner, appending the transcript to the state
    async fn run(&mut self, commands: Vec<String>) -> std::result::Result<(), StepFailure> {
        if commands.is_empty() {
            return Ok(());
        }
        let runner = Arc::clone(&self.runner);
        let output = runner.run_commands(&commands).await?;
        self.state
            .append_output(&output.transcript, self.settings.transcript_max_lines);
        match output.failure {
            None => Ok(()),
            Some(failure) => Err(StepFailure {
                code: StepErrorCode::Generic,
                message: failure.to_string(),
                output: output.transcript,
            }),
        }
    }

    async fn run_step(
        &mut self,
        step: ReleaseStep,
        continue_merge: bool,
    ) -> std::result::Result<(), StepFailure> {
        let seq = self.sequencer();
        match step {
            ReleaseStep::GitFetch => self.run(seq.fetch()).await,
            ReleaseStep::CheckoutRoot => self.run(seq.checkout_source()).await,
            ReleaseStep::MergeBranches => self.merge_next(&seq, continue_merge).await,
            ReleaseStep::CheckoutEnv => self.run(seq.checkout_env()).await,
            ReleaseStep::CopyContent => self.copy_content(&seq).await,
            ReleaseStep::Commit => self.commit(&seq).await,
            ReleaseStep::PushAndCreateMr => self.push_and_create_mr(&seq).await,
            ReleaseStep::PushRootBranches => {
                let mut commands = seq.push_source();
                if self.state.root_merge {
                    commands.extend(seq.merge_to_root());
                    commands.extend(seq.merge_to_develop());
                }
                self.run(commands).await
            }
            ReleaseStep::SwitchToRoot => self.run(seq.switch_to_root()).await,
            ReleaseStep::WaitForMr | ReleaseStep::WaitForRootPush | ReleaseStep::Complete => Ok(()),
        }
    }

    async fn merge_next(
        &mut self,
        seq: &CommandSequencer,
        continue_merge: bool,
    ) -> std::result::Result<(), StepFailure> {
        let Some(branch) = self.state.pending_merge_branch().map(str::to_string) else {
            return Ok(());
        };
        let commands = if continue_merge {
            seq.continue_merge()
        } else {
            seq.merge_branch(self.state.current_mr_index)
                .unwrap_or_default()
        };

        match self.run(commands).await {
            Ok(()) => {
                log::info!("merged {}", branch);
                self.state.record_merged();
                Ok(())
            }
            Err(mut failure) => {
                if merge_in_progress(&self.state.work_dir) {
                    failure.code = StepErrorCode::MergeConflict;
                    failure.message = format!(
                        "Merge conflict while merging {}. Resolve the conflicts, stage the files, then retry.",
                        branch
                    );
                }
                Err(failure)
            }
        }
    }

    async fn copy_content(&mut self, seq: &CommandSequencer) -> std::result::Result<(), StepFailure> {
        self.run(seq.copy_content()).await?;
        if self.exclude.is_empty() {
            return Ok(());
        }

        let source_files = self.workspace.list_files(&self.state.source_branch).await?;
        let env_files = self.workspace.list_files(&seq.env_release_branch()).await?;
        let (restore, remove) = self.exclude.plan_restore(&source_files, &env_files);
        log::info!(
            "keeping excluded paths: {} restored, {} removed",
            restore.len(),
            remove.len()
        );
        self.run(seq.restore_excluded(&restore, &remove)).await
    }

    async fn commit(&mut self, seq: &CommandSequencer) -> std::result::Result<(), StepFailure> {
        let titles = self
            .workspace
            .recent_commit_titles(&seq.remote_env_ref(), self.settings.commit_scan_depth)
            .await?;
        let number = next_release_number(&titles, &self.state.version);
        let title = commit_title(&self.state.version, &self.state.environment, number);
        let tag = tag_name(&self.state.environment, &self.state.version, number);

        let head = self.workspace.recent_commit_titles("HEAD", 1).await?;
        if head.first() == Some(&title) {
            log::info!("release commit '{}' already exists", title);
        } else {
            let body = commit_body(&self.state.merged_branches);
            self.run(seq.commit(&title, &body))
                .await
                .map_err(|failure| StepFailure {
                    code: StepErrorCode::CommitRejected,
                    message: format!(
                        "Commit was rejected ({}). Fix the problem on {} and retry.",
                        failure.message, self.state.source_branch
                    ),
                    output: failure.output,
                })?;
        }

        self.state.release_title = Some(title);
        self.state.tag_name = Some(tag);
        Ok(())
    }

    async fn push_and_create_mr(
        &mut self,
        seq: &CommandSequencer,
    ) -> std::result::Result<(), StepFailure> {
        let (Some(title), Some(tag)) = (self.state.release_title.clone(), self.state.tag_name.clone())
        else {
            return Err(StepFailure::generic(
                "No release commit recorded; abort and start the release again",
            ));
        };

        let mut commands = seq.tag(&tag, &title);
        commands.extend(seq.push_env_with_tags());
        self.run(commands).await?;

        if self.state.created_mr_id.is_some() {
            return Ok(());
        }
        let request = NewMergeRequest {
            source_branch: seq.env_release_branch(),
            target_branch: self.state.environment.branch_name.clone(),
            title,
            description: mr_description(&self.state),
        };
        let mr = self.open_merge_request(&request).await?;
        log::info!("release merge request !{}: {}", mr.iid, mr.web_url);
        self.state.created_mr_id = Some(mr.iid);
        self.state.created_mr_url = Some(mr.web_url.clone());
        self.emit(ReleaseEvent::MrCreated {
            iid: mr.iid,
            url: mr.web_url,
        });
        Ok(())
    }

    /// Create the MR; if one is already open for the same branches, use it
    async fn open_merge_request(
        &self,
        request: &NewMergeRequest,
    ) -> std::result::Result<CreatedMergeRequest, StepFailure> {
        let project = &self.state.project_id;
        match self.host.create_merge_request(project, request).await {
            Ok(mr) => Ok(mr),
            Err(ApiError::Status { status: 409, .. }) => self
                .host
                .find_open_merge_request(project, &request.source_branch, &request.target_branch)
                .await?
                .ok_or_else(|| {
                    StepFailure::generic(format!(
                        "A merge request from {} to {} conflicts but none is open",
                        request.source_branch, request.target_branch
                    ))
                }),
            Err(e) => Err(StepFailure::generic(format!(
                "Failed to create merge request: {}",
                e
            ))),
        }
    }
}

fn validate_request(request: &ReleaseRequest) -> Result<()> {
    let invalid = |reason: &str| -> ReleaseError {
        PreconditionError::InvalidSelection {
            reason: reason.to_string(),
        }
        .into()
    };
    if request.version.trim().is_empty() {
        return Err(invalid("version must not be empty"));
    }
    if request.merge_requests.is_empty() {
        return Err(invalid("select at least one merge request"));
    }
    let mut seen = std::collections::HashSet::new();
    for mr in &request.merge_requests {
        if mr.source_branch.trim().is_empty() {
            return Err(invalid(&format!("merge request !{} has no source branch", mr.iid)));
        }
        if !seen.insert(mr.source_branch.as_str()) {
            return Err(invalid(&format!(
                "branch {} is selected more than once",
                mr.source_branch
            )));
        }
    }
    Ok(())
}

fn mr_description(state: &ReleaseState) -> String {
    let mut description = format!(
        "Release {} to {}.\n\nMerged:\n",
        state.version, state.environment.name
    );
    for (branch, url) in state.mr_branches.iter().zip(&state.mr_urls) {
        if url.is_empty() {
            description.push_str(&format!("- {}\n", branch));
        } else {
            description.push_str(&format!("- {} ({})\n", branch, url));
        }
    }
    description
}
