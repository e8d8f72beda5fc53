//! Poll loop tracking the release MR and its pipeline.
//!
//! The observer only publishes a [`PipelineStatus`]; it never touches the
//! release state. Starting an observer that is already observing is a no-op,
//! so at most one poll loop runs per observer.

use super::stage::{JobFilter, PipelineStage, PipelineStatus, count_jobs, derive_stage};
use crate::error::ApiError;
use crate::host::{CodeHost, Notifier, Pipeline};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(7);

/// What to observe
#[derive(Debug, Clone)]
pub struct ObservedRelease {
    /// Code-host project
    pub project: String,
    /// Release MR
    pub mr_iid: u64,
    /// Jobs that count
    pub filter: JobFilter,
    /// Label used in notifications, e.g. `2.0.0 → DEVELOP`
    pub label: String,
}

/// Tracks which transitions were already announced
#[derive(Debug, Default, Clone, Copy)]
struct NotifyState {
    failed_notified: bool,
}

impl NotifyState {
    /// Notification for moving from `previous` to `current`, if one is due.
    /// Completed is announced on entry; Failed once per episode.
    fn transition(
        &mut self,
        previous: PipelineStage,
        current: PipelineStage,
    ) -> Option<&'static str> {
        if current != PipelineStage::Failed {
            self.failed_notified = false;
        }
        match current {
            PipelineStage::Completed if previous != PipelineStage::Completed => {
                Some("Pipeline completed")
            }
            PipelineStage::Failed if !self.failed_notified => {
                self.failed_notified = true;
                Some("Pipeline failed")
            }
            _ => None,
        }
    }
}

/// Background observer of the post-release pipeline
pub struct PipelineObserver<H> {
    host: Arc<H>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    observing: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    status: Arc<watch::Sender<PipelineStatus>>,
}

impl<H> std::fmt::Debug for PipelineObserver<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineObserver")
            .field("interval", &self.interval)
            .field("observing", &self.observing.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<H: CodeHost + 'static> PipelineObserver<H> {
    /// Observer polling `host` every `interval`
    pub fn new(host: Arc<H>, notifier: Arc<dyn Notifier>, interval: Duration) -> Self {
        let (status, _) = watch::channel(PipelineStatus::default());
        let status = Arc::new(status);
        Self {
            host,
            notifier,
            interval,
            observing: AtomicBool::new(false),
            cancel: Mutex::new(None),
            status,
        }
    }

    /// Whether a poll loop is running
    pub fn is_observing(&self) -> bool {
        self.observing.load(Ordering::SeqCst)
    }

    /// Latest status
    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    /// Receive every published status
    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    /// Start polling. Does nothing if already observing.
    pub fn start(&self, release: ObservedRelease) {
        if self.observing.swap(true, Ordering::SeqCst) {
            log::debug!("pipeline observer already running");
            return;
        }
        self.status.send_replace(PipelineStatus::default());

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());

        let host = Arc::clone(&self.host);
        let notifier = Arc::clone(&self.notifier);
        let status = Arc::clone(&self.status);
        let interval = self.interval;

        log::info!(
            "observing pipeline of merge request !{} in {}",
            release.mr_iid,
            release.project
        );
        tokio::spawn(async move {
            let mut notify = NotifyState::default();
            loop {
                let previous = status.borrow().clone();
                let next = tokio::select! {
                    _ = token.cancelled() => break,
                    next = poll_once(host.as_ref(), &release, &previous) => next,
                };
                if token.is_cancelled() {
                    break;
                }
                if let Some(title) = notify.transition(previous.stage, next.stage) {
                    notifier.notify(title, &release.label);
                }
                status.send_replace(next);

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            log::debug!("pipeline observer stopped");
        });
    }

    /// Stop polling. Idempotent.
    pub fn stop(&self) {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            token.cancel();
        }
        self.observing.store(false, Ordering::SeqCst);
    }
}

impl<H> Drop for PipelineObserver<H> {
    fn drop(&mut self) {
        if let Some(token) = self
            .cancel
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            token.cancel();
        }
    }
}

/// Newest pipeline for the landed commit, falling back to the MR's own
/// pipelines when the commit has none
async fn find_pipeline<H: CodeHost>(
    host: &H,
    release: &ObservedRelease,
    landed_commit: Option<&str>,
) -> Result<Option<Pipeline>, ApiError> {
    if let Some(sha) = landed_commit {
        match host.pipelines_by_commit(&release.project, sha).await {
            Ok(pipelines) if !pipelines.is_empty() => return Ok(pipelines.into_iter().next()),
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
    }
    let pipelines = host
        .merge_request_pipelines(&release.project, release.mr_iid)
        .await?;
    Ok(pipelines.into_iter().next())
}

async fn fetch_status<H: CodeHost>(
    host: &H,
    release: &ObservedRelease,
) -> Result<PipelineStatus, ApiError> {
    let mr = host
        .merge_request_status(&release.project, release.mr_iid)
        .await?;
    let mut status = PipelineStatus {
        mr_merged: mr.is_merged(),
        ..PipelineStatus::default()
    };
    if !status.mr_merged {
        status.stage = PipelineStage::WaitingForMerge;
        return Ok(status);
    }

    if let Some(pipeline) = find_pipeline(host, release, mr.landed_commit()).await? {
        let jobs = host.pipeline_jobs(&release.project, pipeline.id).await?;
        status.jobs = count_jobs(&jobs, &release.filter);
        status.pipeline_id = Some(pipeline.id);
        status.pipeline_url = Some(pipeline.web_url);
        status.pipeline_state = Some(pipeline.status);
    }
    status.stage = derive_stage(true, &status.jobs);
    Ok(status)
}

/// One poll. A failed check keeps the previous stage and records the error.
pub async fn poll_once<H: CodeHost>(
    host: &H,
    release: &ObservedRelease,
    previous: &PipelineStatus,
) -> PipelineStatus {
    let mut status = match fetch_status(host, release).await {
        Ok(status) => status,
        Err(e) => {
            log::warn!("pipeline check failed: {}", e);
            PipelineStatus {
                error: Some(e),
                ..previous.clone()
            }
        }
    };
    status.checked_at = Some(chrono::Utc::now());
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_notified_once_on_entry() {
        let mut n = NotifyState::default();
        assert!(n.transition(PipelineStage::Running, PipelineStage::Completed).is_some());
        assert!(n.transition(PipelineStage::Completed, PipelineStage::Completed).is_none());
    }

    #[test]
    fn test_failed_notified_once_per_episode() {
        let mut n = NotifyState::default();
        assert!(n.transition(PipelineStage::Running, PipelineStage::Failed).is_some());
        assert!(n.transition(PipelineStage::Failed, PipelineStage::Failed).is_none());
        assert!(n.transition(PipelineStage::Failed, PipelineStage::Running).is_none());
        assert!(n.transition(PipelineStage::Running, PipelineStage::Failed).is_some());
    }

    #[test]
    fn test_loading_and_waiting_are_silent() {
        let mut n = NotifyState::default();
        assert!(n.transition(PipelineStage::Loading, PipelineStage::WaitingForMerge).is_none());
        assert!(n.transition(PipelineStage::WaitingForMerge, PipelineStage::Running).is_none());
    }
}
