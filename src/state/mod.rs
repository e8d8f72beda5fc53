//! State management for release operations.
//!
//! This module provides state tracking and persistence for release operations,
//! enabling resume after a crash or an operator walking away mid-release.

mod manager;
mod release_state;

pub use manager::StateManager;
pub use release_state::{
    Environment, MergeRequestRef, ReleaseParams, ReleaseState, ReleaseStep, StepError,
    StepErrorCode, STATE_FORMAT_VERSION, tail, total_sub_steps,
};

use std::path::{Path, PathBuf};

/// State file name inside the repository's git directory, so it never
/// shows up as an untracked file in the tree being released.
const STATE_FILE_NAME: &str = "rpb_release_state.json";

/// Path of the state file for a working directory
pub fn state_file_path(work_dir: &Path) -> PathBuf {
    crate::git::git_dir(work_dir).join(STATE_FILE_NAME)
}

/// Create a state manager for the given working directory
pub fn create_state_manager(work_dir: &Path) -> StateManager {
    StateManager::new(state_file_path(work_dir))
}

/// Quick check if release state exists in the given working directory
pub fn has_active_release(work_dir: &Path) -> bool {
    state_file_path(work_dir).exists()
}
