//! One-shot retry, proceed and abort.
//!
//! Each loads the persisted release, performs one operation, runs until the
//! next stop and exits with the outcome.

use super::helpers::{connect, prompt_confirmation, report_outcome, until_interrupted};
use crate::cli::RuntimeConfig;
use crate::engine::ReleaseMachine;
use crate::error::Result;

/// Execute retry command
pub(super) async fn execute_retry(config: &RuntimeConfig) -> Result<i32> {
    let (collaborators, printer) = connect(config, false).await?;
    let mut machine = ReleaseMachine::resume(collaborators).await?;
    let runner = machine.runner();

    let outcome = until_interrupted(
        async {
            machine.prepare_retry()?;
            machine.run_until_suspended().await
        },
        runner.as_ref(),
    )
    .await?;

    if outcome == crate::engine::StepOutcome::Completed {
        machine.complete().await?;
    }
    let state = machine.state().clone();
    drop(runner);
    drop(machine);
    let _ = printer.await;
    Ok(report_outcome(config, &outcome, &state))
}

/// Execute proceed command
pub(super) async fn execute_proceed(config: &RuntimeConfig) -> Result<i32> {
    let (collaborators, printer) = connect(config, false).await?;
    let mut machine = ReleaseMachine::resume(collaborators).await?;
    let runner = machine.runner();

    let outcome = until_interrupted(
        async {
            machine.prepare_proceed().await?;
            machine.run_until_suspended().await
        },
        runner.as_ref(),
    )
    .await?;

    if outcome == crate::engine::StepOutcome::Completed {
        machine.complete().await?;
    }
    let state = machine.state().clone();
    drop(runner);
    drop(machine);
    let _ = printer.await;
    Ok(report_outcome(config, &outcome, &state))
}

/// Execute abort command
pub(super) async fn execute_abort(
    config: &RuntimeConfig,
    delete_remote: bool,
    yes: bool,
) -> Result<i32> {
    let (collaborators, printer) = connect(config, false).await?;
    let mut machine = ReleaseMachine::resume(collaborators).await?;

    config.println(&format!("📊 {}", machine.state().summary()));
    if !yes {
        let prompt = if delete_remote {
            "Abort this release and delete its pushed branches and tag?"
        } else {
            "Abort this release?"
        };
        if !prompt_confirmation(prompt)? {
            config.println("Abort cancelled");
            return Ok(1);
        }
    }

    machine.abort(delete_remote).await?;
    drop(machine);
    let _ = printer.await;
    config.success_println("Release aborted; the working tree is back on the base branch");
    Ok(0)
}
