//! Interactive start and resume.
//!
//! The release runs on the session loop; the operator types `proceed`,
//! `retry`, `abort` or `detach` on stdin. Ctrl-C and end of input detach,
//! leaving the persisted state for a later resume.

use super::helpers::{LiveCollaborators, connect, merge_request_url};
use crate::cli::args::{parse_merge_request, parse_session_input};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::engine::{ReleaseMachine, ReleaseRequest, SessionAction, SessionEnd, drive};
use crate::error::{CliError, Result};
use crate::git::GitWorkspace;
use crate::host::GitLabClient;
use crate::pty::PtyRunner;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type LiveMachine = ReleaseMachine<PtyRunner, GitWorkspace, GitLabClient>;

/// Execute start command
pub(super) async fn execute_start(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    let Command::Start {
        release_version,
        env,
        merge_requests,
        source_branch,
        root_merge,
    } = &args.command
    else {
        unreachable!("execute_start called with non-Start command");
    };

    let (collaborators, printer) = connect(config, true).await?;
    let request = build_request(
        &collaborators,
        release_version,
        env,
        merge_requests,
        source_branch,
        *root_merge,
    )?;

    config.println(&format!(
        "🚀 Releasing {} to {} ({} merge requests)",
        request.version,
        request.environment.name,
        request.merge_requests.len()
    ));
    let machine = match ReleaseMachine::start(collaborators, request).await {
        Ok(machine) => machine,
        Err(e) => {
            let _ = printer.await;
            return Err(e);
        }
    };
    run_session(config, machine, printer).await
}

fn build_request(
    collaborators: &LiveCollaborators,
    version: &str,
    env: &str,
    merge_requests: &[String],
    source_branch: &Option<String>,
    root_merge: bool,
) -> Result<ReleaseRequest> {
    let settings = &collaborators.settings;
    let environment = settings.environment(env)?.clone();
    let merge_requests = merge_requests
        .iter()
        .map(|spec| {
            parse_merge_request(spec).map(|mut mr| {
                mr.web_url = merge_request_url(settings, mr.iid);
                mr
            })
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|reason| CliError::InvalidArguments { reason })?;

    Ok(ReleaseRequest {
        merge_requests,
        environment,
        version: version.trim().to_string(),
        source_branch: source_branch.clone(),
        root_merge,
    })
}

/// Execute resume command
pub(super) async fn execute_resume(config: &RuntimeConfig) -> Result<i32> {
    let (collaborators, printer) = connect(config, true).await?;
    let machine = match ReleaseMachine::resume(collaborators).await {
        Ok(machine) => machine,
        Err(e) => {
            let _ = printer.await;
            return Err(e);
        }
    };

    let state = machine.state();
    config.println(&format!("📊 {}", state.summary()));
    if let Some(error) = &state.last_error {
        config.warning_println(&format!(
            "{} failed ({}): {}",
            error.step, error.code, error.message
        ));
        if !state.error_output.is_empty() {
            config.indent(&state.error_output);
        }
    }
    run_session(config, machine, printer).await
}

async fn run_session(
    config: &RuntimeConfig,
    machine: LiveMachine,
    printer: JoinHandle<()>,
) -> Result<i32> {
    config.println("Commands: proceed (p), retry (r), abort (a), abort! (also delete remote), detach (d)");

    let (actions_tx, actions_rx) = mpsc::unbounded_channel();
    let stdin_tx = actions_tx.clone();
    let output = config.output().clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_session_input(&line) {
                Some(action) => {
                    if stdin_tx.send(action).is_err() {
                        return;
                    }
                }
                None if line.trim().is_empty() => {}
                None => {
                    let _ = output.warn(&format!("Unknown command '{}'", line.trim()));
                }
            }
        }
        let _ = stdin_tx.send(SessionAction::Detach);
    });
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = actions_tx.send(SessionAction::Detach);
        }
    });

    let end = drive(machine, actions_rx).await;
    let _ = printer.await;

    match end? {
        SessionEnd::Completed => config.success_println("Release completed"),
        SessionEnd::Aborted => config.warning_println("Release aborted"),
        SessionEnd::Detached => {
            config.println("Detached. The release is saved; continue with 'rpb_release resume'.")
        }
    }
    Ok(0)
}
