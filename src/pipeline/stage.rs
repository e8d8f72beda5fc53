//! Stage derivation from merge and job state.
//!
//! The stage is recomputed from scratch on every poll; a failed pipeline that
//! is restarted on the host goes back to Running.

use crate::error::{ApiError, ConfigError};
use crate::host::{JobStatus, PipelineJob};
use crate::state::Environment;
use regex::{Regex, RegexBuilder};

/// Where the post-release pipeline is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStage {
    /// No poll has finished yet
    #[default]
    Loading,
    /// The release MR is not merged
    WaitingForMerge,
    /// Merged, but no matching job has started
    WaitingForStart,
    /// Matching jobs are in progress
    Running,
    /// Every matching job finished without error
    Completed,
    /// At least one matching job failed
    Failed,
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PipelineStage::Loading => "Loading",
            PipelineStage::WaitingForMerge => "Waiting for merge",
            PipelineStage::WaitingForStart => "Waiting for pipeline",
            PipelineStage::Running => "Running",
            PipelineStage::Completed => "Completed",
            PipelineStage::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Counters over the jobs that matched the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JobCounts {
    /// Matching jobs that are not waiting for a manual trigger
    pub total: usize,
    /// Finished without error
    pub completed: usize,
    /// Finished with error
    pub failed: usize,
    /// Running right now
    pub running: usize,
    /// Matching jobs waiting for a manual trigger
    pub manual: usize,
}

/// Snapshot published by the observer. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineStatus {
    /// Derived stage
    pub stage: PipelineStage,
    /// Whether the release MR is merged
    pub mr_merged: bool,
    /// Pipeline being tracked
    pub pipeline_id: Option<u64>,
    /// Its web URL
    pub pipeline_url: Option<String>,
    /// Its overall status as reported by the host
    pub pipeline_state: Option<String>,
    /// Job counters
    pub jobs: JobCounts,
    /// Last failed check; polling continues regardless
    pub error: Option<ApiError>,
    /// When the last poll finished
    pub checked_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Selects the jobs that deploy this environment
#[derive(Debug, Clone)]
pub struct JobFilter {
    regex: Option<Regex>,
}

impl JobFilter {
    /// Compile `pattern`, substituting `{env}` (lowercased environment name),
    /// `{branch}` (environment branch) and `{app}`. Substituted values match
    /// literally. An empty pattern matches every job.
    pub fn new(pattern: &str, environment: &Environment, app: &str) -> Result<Self, ConfigError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(Self { regex: None });
        }

        let expanded = pattern
            .replace("{env}", &regex::escape(&environment.name.to_lowercase()))
            .replace("{branch}", &regex::escape(&environment.branch_name))
            .replace("{app}", &regex::escape(app));
        let regex = RegexBuilder::new(&expanded)
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidJobFilter {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { regex: Some(regex) })
    }

    /// Filter accepting every job
    pub fn all() -> Self {
        Self { regex: None }
    }

    /// Whether a job name is selected
    pub fn matches(&self, job_name: &str) -> bool {
        self.regex.as_ref().is_none_or(|re| re.is_match(job_name))
    }
}

/// Count the matching jobs by outcome
pub fn count_jobs(jobs: &[PipelineJob], filter: &JobFilter) -> JobCounts {
    let mut counts = JobCounts::default();
    for job in jobs.iter().filter(|job| filter.matches(&job.name)) {
        if job.status == JobStatus::Manual {
            counts.manual += 1;
            continue;
        }
        counts.total += 1;
        if job.status.is_completed() {
            counts.completed += 1;
        } else if job.status.is_failed() {
            counts.failed += 1;
        } else if job.status == JobStatus::Running {
            counts.running += 1;
        }
    }
    counts
}

/// Stage for a merge state and job counters
pub fn derive_stage(merged: bool, counts: &JobCounts) -> PipelineStage {
    if !merged {
        PipelineStage::WaitingForMerge
    } else if counts.total == 0 {
        PipelineStage::WaitingForStart
    } else if counts.failed > 0 {
        PipelineStage::Failed
    } else if counts.completed == counts.total {
        PipelineStage::Completed
    } else {
        PipelineStage::Running
    }
}
