//! Git integration for release workflows.
//!
//! Command lines for each step come from [`CommandSequencer`]; which paths
//! survive the content copy is decided by [`ExcludeMatcher`]; quick read-only
//! lookups go through the [`Workspace`] trait.

pub mod commands;
mod exclude;
mod workspace;

pub use commands::{
    CommandSequencer, commit_body, commit_title, env_release_branch_name, shell_quote,
    source_branch_name, tag_name,
};
pub use exclude::ExcludeMatcher;
pub use workspace::{GitWorkspace, Workspace, git_dir, merge_in_progress};
