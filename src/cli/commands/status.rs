//! Status command implementation.
//!
//! Displays the persisted release without taking its lock, so it works while
//! another process drives the release.

use super::helpers::project_root;
use crate::cli::RuntimeConfig;
use crate::error::{ReleaseError, Result, StateError};
use crate::git::env_release_branch_name;
use crate::state::create_state_manager;

/// Execute status command
pub(super) async fn execute_status(config: &RuntimeConfig, json: bool) -> Result<i32> {
    let root = project_root(config).await?;
    let state = match create_state_manager(&root).read_state() {
        Ok(state) => state,
        Err(ReleaseError::State(StateError::NotFound)) => {
            if json {
                println!("{{\"status\": \"no_active_release\"}}");
            } else {
                config.println("No release in progress");
            }
            return Ok(0);
        }
        Err(e) => return Err(e),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(0);
    }

    let output = config.output();
    let _ = output.section(&format!(
        "Release {} → {}",
        state.version, state.environment.name
    ));
    let _ = output.field("Step", &state.current_step.to_string());
    let _ = output.field("Progress", &format!("{:.0}%", state.progress_percent()));
    let source = if state.source_branch_is_remote {
        format!("{} (existed on the remote)", state.source_branch)
    } else {
        state.source_branch.clone()
    };
    let _ = output.field("Source branch", &source);
    let _ = output.field(
        "Release branch",
        &env_release_branch_name(&state.version, &state.environment),
    );
    let _ = output.field("Root merge", if state.root_merge { "yes" } else { "no" });
    if let Some(url) = &state.created_mr_url {
        let _ = output.field("Merge request", url);
    }
    if let Some(tag) = &state.tag_name {
        let _ = output.field("Tag", tag);
    }
    let _ = output.field(
        "Started",
        &state
            .started_at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
    );
    let _ = output.field(
        "Elapsed",
        &format!("{}m", state.elapsed_time().num_minutes()),
    );

    config.println(&format!(
        "\nMerge requests ({}/{} merged):",
        state.merged_branches.len(),
        state.mr_branches.len()
    ));
    for (i, branch) in state.mr_branches.iter().enumerate() {
        let mark = if i < state.merged_branches.len() { "✓" } else { "·" };
        let iid = state.selected_mr_ids.get(i).copied().unwrap_or_default();
        config.indent(&format!("{} !{} {}", mark, iid, branch));
    }

    if let Some(error) = &state.last_error {
        config.println("");
        config.warning_println(&format!(
            "{} failed ({}): {}",
            error.step, error.code, error.message
        ));
        if !state.error_output.is_empty() {
            config.indent(&state.error_output);
        }
    }
    Ok(0)
}
