//! Interactive driver: one consumer of operator actions per release.
//!
//! Steps run until the release suspends or fails; actions arriving while a
//! step runs are limited to resize, abort and detach (the latter two kill the
//! in-flight command first). Proceed and Retry are only honored while the
//! machine is idle, so the runner is never asked to run two sequences at once.

use super::events::ReleaseEvent;
use super::machine::{ReleaseMachine, StepOutcome};
use crate::error::Result;
use crate::git::Workspace;
use crate::host::CodeHost;
use crate::pty::CommandRunner;
use tokio::sync::mpsc;

/// Operator input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Leave the current suspension point
    Proceed,
    /// Re-run the failed step
    Retry,
    /// Clean up and end the release
    Abort {
        /// Also delete pushed branches and tags
        delete_remote: bool,
    },
    /// The operator's terminal changed size
    Resize {
        /// Rows
        rows: u16,
        /// Columns
        cols: u16,
    },
    /// Stop driving; the persisted state stays for a later resume
    Detach,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The release completed and was recorded
    Completed,
    /// The release was aborted
    Aborted,
    /// The operator detached; the release can be resumed
    Detached,
}

/// Action that interrupts a running step
#[derive(Debug, Clone, Copy)]
enum Interrupt {
    Abort { delete_remote: bool },
    Detach,
}

/// Drive `machine` until it completes, is aborted, or the operator detaches.
/// Closing the action channel counts as detaching.
pub async fn drive<R, W, H>(
    mut machine: ReleaseMachine<R, W, H>,
    mut actions: mpsc::UnboundedReceiver<SessionAction>,
) -> Result<SessionEnd>
where
    R: CommandRunner + 'static,
    W: Workspace,
    H: CodeHost + 'static,
{
    let runner = machine.runner();
    let mut pipeline = machine.pipeline_updates();

    loop {
        let mut interrupt = None;
        let outcome = {
            let run = machine.run_until_suspended();
            tokio::pin!(run);
            loop {
                tokio::select! {
                    outcome = &mut run => break outcome?,
                    Some(action) = actions.recv(), if interrupt.is_none() => match action {
                        SessionAction::Resize { rows, cols } => runner.resize(rows, cols),
                        SessionAction::Abort { delete_remote } => {
                            runner.kill();
                            interrupt = Some(Interrupt::Abort { delete_remote });
                        }
                        SessionAction::Detach => {
                            runner.kill();
                            interrupt = Some(Interrupt::Detach);
                        }
                        SessionAction::Proceed | SessionAction::Retry => {
                            log::debug!("ignoring {:?} while a step is running", action);
                        }
                    },
                }
            }
        };

        match interrupt {
            Some(Interrupt::Abort { delete_remote }) => {
                machine.abort(delete_remote).await?;
                return Ok(SessionEnd::Aborted);
            }
            Some(Interrupt::Detach) => return Ok(SessionEnd::Detached),
            None => {}
        }

        if outcome == StepOutcome::Completed {
            machine.complete().await?;
            return Ok(SessionEnd::Completed);
        }

        // Idle: suspended or failed. Wait for the operator.
        loop {
            tokio::select! {
                action = actions.recv() => {
                    let Some(action) = action else {
                        return Ok(SessionEnd::Detached);
                    };
                    match action {
                        SessionAction::Proceed => match machine.prepare_proceed().await {
                            Ok(()) => break,
                            Err(e) => log::warn!("{}", e),
                        },
                        SessionAction::Retry => match machine.prepare_retry() {
                            Ok(()) => break,
                            Err(e) => log::warn!("{}", e),
                        },
                        SessionAction::Abort { delete_remote } => {
                            machine.abort(delete_remote).await?;
                            return Ok(SessionEnd::Aborted);
                        }
                        SessionAction::Resize { rows, cols } => runner.resize(rows, cols),
                        SessionAction::Detach => return Ok(SessionEnd::Detached),
                    }
                }
                Ok(()) = pipeline.changed() => {
                    let status = pipeline.borrow_and_update().clone();
                    machine.emit(ReleaseEvent::PipelineStatusUpdated(status));
                }
            }
        }
    }
}
