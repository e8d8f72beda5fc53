//! Code-host collaborator contract.
//!
//! The engine and the pipeline observer only need a handful of endpoints;
//! they are expressed as the [`CodeHost`] trait so tests can script them.
//! [`GitLabClient`] implements it over the GitLab v4 REST API.

mod gitlab;
mod notify;

pub use gitlab::GitLabClient;
pub use notify::{LogNotifier, Notifier};

use crate::error::ApiError;
use serde::Deserialize;
use std::future::Future;

/// Merge request as the observer needs it
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MergeRequestStatus {
    /// Project-scoped id
    pub iid: u64,
    /// `opened`, `merged`, `closed`, ...
    pub state: String,
    /// Merge commit, once merged
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    /// Squash commit, when the MR was squash-merged
    #[serde(default)]
    pub squash_commit_sha: Option<String>,
    /// Head commit
    #[serde(default)]
    pub sha: Option<String>,
    /// Web URL
    #[serde(default)]
    pub web_url: String,
}

impl MergeRequestStatus {
    /// Whether the MR has been merged
    pub fn is_merged(&self) -> bool {
        self.state == "merged"
    }

    /// Commit that landed on the target branch
    pub fn landed_commit(&self) -> Option<&str> {
        self.merge_commit_sha
            .as_deref()
            .or(self.squash_commit_sha.as_deref())
    }
}

/// A CI pipeline
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pipeline {
    /// Pipeline id
    pub id: u64,
    /// Overall status as reported by the host
    pub status: String,
    /// Commit the pipeline ran for
    #[serde(default)]
    pub sha: Option<String>,
    /// Web URL
    #[serde(default)]
    pub web_url: String,
}

/// Status of one CI job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not queued yet
    Created,
    /// Waiting for a resource group
    WaitingForResource,
    /// Preparing the executor
    Preparing,
    /// Queued
    Pending,
    /// Running
    Running,
    /// Finished successfully
    Success,
    /// Finished with an error
    Failed,
    /// Cancelled
    Canceled,
    /// Not run because of rules
    Skipped,
    /// Needs a manual trigger
    Manual,
    /// Delayed start
    Scheduled,
    /// Anything newer than this client
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Finished without error
    pub fn is_completed(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Skipped)
    }

    /// Finished with error
    pub fn is_failed(self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Canceled)
    }
}

/// One CI job
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PipelineJob {
    /// Job id
    pub id: u64,
    /// Job name
    pub name: String,
    /// Stage name
    #[serde(default)]
    pub stage: String,
    /// Status
    pub status: JobStatus,
    /// Web URL
    #[serde(default)]
    pub web_url: String,
}

/// Request to open a merge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMergeRequest {
    /// Source branch
    pub source_branch: String,
    /// Target branch
    pub target_branch: String,
    /// Title
    pub title: String,
    /// Description
    pub description: String,
}

/// A merge request the release opened (or found already open)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatedMergeRequest {
    /// Project-scoped id
    pub iid: u64,
    /// Web URL
    pub web_url: String,
}

/// Endpoints of the code host the release workflow consumes
pub trait CodeHost: Send + Sync {
    /// Current state of a merge request
    fn merge_request_status(
        &self,
        project: &str,
        iid: u64,
    ) -> impl Future<Output = Result<MergeRequestStatus, ApiError>> + Send;

    /// Pipelines that ran for a commit, newest first
    fn pipelines_by_commit(
        &self,
        project: &str,
        sha: &str,
    ) -> impl Future<Output = Result<Vec<Pipeline>, ApiError>> + Send;

    /// Pipelines associated with a merge request, newest first
    fn merge_request_pipelines(
        &self,
        project: &str,
        iid: u64,
    ) -> impl Future<Output = Result<Vec<Pipeline>, ApiError>> + Send;

    /// Jobs of a pipeline
    fn pipeline_jobs(
        &self,
        project: &str,
        pipeline_id: u64,
    ) -> impl Future<Output = Result<Vec<PipelineJob>, ApiError>> + Send;

    /// Open a merge request
    fn create_merge_request(
        &self,
        project: &str,
        request: &NewMergeRequest,
    ) -> impl Future<Output = Result<CreatedMergeRequest, ApiError>> + Send;

    /// Open merge request from `source` into `target`, if there is one
    fn find_open_merge_request(
        &self,
        project: &str,
        source: &str,
        target: &str,
    ) -> impl Future<Output = Result<Option<CreatedMergeRequest>, ApiError>> + Send;
}
