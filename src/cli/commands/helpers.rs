//! Shared helper functions for command execution.

use crate::cli::{OutputManager, RuntimeConfig, output::LiveScreen};
use crate::config::ReleaseSettings;
use crate::engine::{Collaborators, ReleaseEvent, StepOutcome};
use crate::error::{PreconditionError, Result};
use crate::git::{GitWorkspace, Workspace, env_release_branch_name};
use crate::host::{GitLabClient, Notifier};
use crate::pipeline::{PipelineStage, PipelineStatus};
use crate::pty::{CommandRunner, PtyRunner};
use crate::state::{ReleaseState, ReleaseStep, StepErrorCode};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Collaborators wired to the real git, PTY and GitLab implementations
pub(super) type LiveCollaborators = Collaborators<PtyRunner, GitWorkspace, GitLabClient>;

/// Prompt user for confirmation with y/n input
pub(super) fn prompt_confirmation(prompt: &str) -> std::io::Result<bool> {
    use std::io::Write;

    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    let response = input.trim().to_lowercase();
    Ok(matches!(response.as_str(), "y" | "yes"))
}

pub(super) fn load_settings(config: &RuntimeConfig) -> Result<ReleaseSettings> {
    let settings = ReleaseSettings::discover(config.settings_path.as_deref(), &config.work_dir)?;
    Ok(settings)
}

pub(super) async fn project_root(config: &RuntimeConfig) -> Result<PathBuf> {
    GitWorkspace::new(&config.work_dir)
        .project_root()
        .await
        .map_err(|e| {
            log::debug!("{}", e);
            PreconditionError::RootNotFound {
                path: config.work_dir.clone(),
            }
            .into()
        })
}

pub(super) fn code_host(settings: &ReleaseSettings) -> Result<GitLabClient> {
    let token = settings.gitlab_token().unwrap_or_default();
    Ok(GitLabClient::new(&settings.gitlab_url, token)?)
}

/// Web URL of a merge request, when the project is given as a path
pub(super) fn merge_request_url(settings: &ReleaseSettings, iid: u64) -> String {
    if settings.project_id.contains('/') {
        format!(
            "{}/{}/-/merge_requests/{}",
            settings.gitlab_url.trim_end_matches('/'),
            settings.project_id.trim_matches('/'),
            iid
        )
    } else {
        String::new()
    }
}

/// Pipeline outcomes shown as status lines
struct OutputNotifier(OutputManager);

impl Notifier for OutputNotifier {
    fn notify(&self, title: &str, body: &str) {
        let _ = self.0.info(&format!("\x07{}: {}", title, body));
    }
}

/// Wire the collaborators for the project at `config.work_dir` and start the
/// task that prints their events and PTY frames
pub(super) async fn connect(
    config: &RuntimeConfig,
    hints: bool,
) -> Result<(LiveCollaborators, JoinHandle<()>)> {
    let settings = load_settings(config)?;
    let root = project_root(config).await?;
    let host = Arc::new(code_host(&settings)?);
    let history = settings.history_store()?;

    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let runner = Arc::new(settings.pty_runner(&root).with_frames(frames_tx));
    let printer = spawn_printer(config.output().clone(), events_rx, frames_rx, hints);

    let collaborators = Collaborators {
        runner,
        workspace: GitWorkspace::new(root),
        host,
        notifier: Arc::new(OutputNotifier(config.output().clone())),
        history,
        settings,
        events: Some(events_tx),
    };
    Ok((collaborators, printer))
}

/// Print events and frames until both senders are gone
fn spawn_printer(
    output: OutputManager,
    mut events: mpsc::UnboundedReceiver<ReleaseEvent>,
    mut frames: mpsc::UnboundedReceiver<String>,
    hints: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut screen = LiveScreen::new(output.is_quiet());
        let (mut events_open, mut frames_open) = (true, true);
        while events_open || frames_open {
            tokio::select! {
                biased;
                frame = frames.recv(), if frames_open => match frame {
                    Some(frame) => screen.draw(&frame),
                    None => frames_open = false,
                },
                event = events.recv(), if events_open => match event {
                    Some(event) => {
                        screen.settle();
                        print_event(&output, &event, hints);
                    }
                    None => events_open = false,
                },
            }
        }
        screen.settle();
    })
}

fn print_event(output: &OutputManager, event: &ReleaseEvent, hints: bool) {
    let _ = match event {
        ReleaseEvent::SourceBranchChecked {
            branch,
            exists_on_remote: true,
        } => output.info(&format!(
            "Source branch {} exists on the remote; merging on top of it",
            branch
        )),
        ReleaseEvent::SourceBranchChecked { branch, .. } => output.info(&format!(
            "Source branch {} will be created from the base branch",
            branch
        )),
        ReleaseEvent::StepStarted { step } => output.progress(&step.to_string()),
        ReleaseEvent::StepCompleted { step, next } => {
            let _ = output.success(&format!("{} done", step));
            match next {
                ReleaseStep::WaitForMr if hints => output.indent(
                    "Review the release branch, then type 'proceed' to push it and open the merge request",
                ),
                ReleaseStep::WaitForRootPush if hints => output.indent(
                    "Merge the release merge request, then type 'proceed' to push the root branches",
                ),
                _ => Ok(()),
            }
        }
        ReleaseEvent::StepFailed { error } => {
            let _ = output.warn(&format!(
                "{} failed ({}): {}",
                error.step, error.code, error.message
            ));
            if hints {
                output.indent("Type 'retry' to run it again or 'abort' to clean up")
            } else {
                Ok(())
            }
        }
        ReleaseEvent::MrCreated { iid, url } => {
            output.success(&format!("Merge request !{} opened: {}", iid, url))
        }
        ReleaseEvent::PipelineStatusUpdated(status) => output.info(&describe_pipeline(status)),
        ReleaseEvent::Finished { status } => output.success(&format!("Release {}", status)),
    };
}

/// One-line pipeline summary
pub(super) fn describe_pipeline(status: &PipelineStatus) -> String {
    let mut line = format!("Pipeline: {}", status.stage);
    if status.jobs.total > 0 || status.jobs.manual > 0 {
        line.push_str(&format!(
            " ({}/{} jobs done, {} running, {} failed",
            status.jobs.completed, status.jobs.total, status.jobs.running, status.jobs.failed
        ));
        if status.jobs.manual > 0 {
            line.push_str(&format!(", {} manual", status.jobs.manual));
        }
        line.push(')');
    }
    if let Some(url) = &status.pipeline_url
        && status.stage != PipelineStage::WaitingForMerge
    {
        line.push_str(&format!(" {}", url));
    }
    if let Some(error) = &status.error {
        line.push_str(&format!(" [last check failed: {}]", error));
    }
    line
}

/// Await `work`, killing the running command on Ctrl-C so the step fails
/// and is recorded instead of the process dying mid-step
pub(super) async fn until_interrupted<F: Future>(work: F, runner: &PtyRunner) -> F::Output {
    tokio::pin!(work);
    let mut killed = false;
    loop {
        tokio::select! {
            output = &mut work => return output,
            _ = tokio::signal::ctrl_c(), if !killed => {
                log::warn!("interrupted; stopping the running command");
                runner.kill();
                killed = true;
            }
        }
    }
}

/// Print where a one-shot command left the release and return the exit code
pub(super) fn report_outcome(
    config: &RuntimeConfig,
    outcome: &StepOutcome,
    state: &ReleaseState,
) -> i32 {
    match outcome {
        StepOutcome::Suspended(ReleaseStep::WaitForMr) => {
            config.println(&format!(
                "Waiting for review of {}.",
                env_release_branch_name(&state.version, &state.environment)
            ));
            config.indent("Run 'rpb_release proceed' to push it and open the merge request.");
            0
        }
        StepOutcome::Suspended(_) => {
            config.println(&format!(
                "Release merge request: {}",
                state.created_mr_url.as_deref().unwrap_or("-")
            ));
            config.indent("Run 'rpb_release watch' to follow its pipeline.");
            config.indent("Run 'rpb_release proceed' to push the root branches.");
            0
        }
        StepOutcome::Failed(error) => {
            config.error_println(&format!(
                "{} failed ({}): {}",
                error.step, error.code, error.message
            ));
            if !state.error_output.is_empty() {
                config.indent(&state.error_output);
            }
            let hint = match error.code {
                StepErrorCode::MergeConflict => {
                    "Resolve the conflicts and stage them, then run 'rpb_release retry'."
                }
                StepErrorCode::CommitRejected => {
                    "Fix the problem on the source branch, then run 'rpb_release retry'."
                }
                StepErrorCode::Generic | StepErrorCode::Interrupted => {
                    "Run 'rpb_release retry' to run the step again or 'rpb_release abort' to clean up."
                }
            };
            config.indent(hint);
            1
        }
        StepOutcome::Completed => {
            config.success_println(&format!(
                "Released {} to {}",
                state.version, state.environment.name
            ));
            0
        }
        StepOutcome::Advanced { to, .. } => {
            config.println(&format!("Release is at {}", to));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::pipeline::JobCounts;

    #[test]
    fn test_merge_request_url_needs_project_path() {
        let mut settings = ReleaseSettings {
            gitlab_url: "https://git.example.com/".to_string(),
            project_id: "group/app".to_string(),
            ..ReleaseSettings::default()
        };
        assert_eq!(
            merge_request_url(&settings, 4),
            "https://git.example.com/group/app/-/merge_requests/4"
        );
        settings.project_id = "42".to_string();
        assert_eq!(merge_request_url(&settings, 4), "");
    }

    #[test]
    fn test_describe_pipeline() {
        let status = PipelineStatus {
            stage: PipelineStage::Running,
            mr_merged: true,
            pipeline_url: Some("https://git.example.com/p/9".to_string()),
            jobs: JobCounts {
                total: 3,
                completed: 1,
                running: 2,
                manual: 1,
                ..JobCounts::default()
            },
            error: Some(ApiError::Network {
                reason: "timeout".to_string(),
            }),
            ..PipelineStatus::default()
        };
        let line = describe_pipeline(&status);
        assert!(line.starts_with("Pipeline: Running (1/3 jobs done, 2 running, 0 failed, 1 manual)"));
        assert!(line.contains("https://git.example.com/p/9"));
        assert!(line.ends_with("[last check failed: Network error: timeout]"));
    }
}
