//! Post-release pipeline observation.

mod observer;
mod stage;

pub use observer::{DEFAULT_POLL_INTERVAL, ObservedRelease, PipelineObserver, poll_once};
pub use stage::{JobCounts, JobFilter, PipelineStage, PipelineStatus, count_jobs, derive_stage};
