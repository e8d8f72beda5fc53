//! Pipeline polling against a scripted code host

mod common;

#[cfg(test)]
mod tests {
    use super::common::{FakeHost, pipeline};
    use rpb_release::error::ApiError;
    use rpb_release::host::{JobStatus, Notifier};
    use rpb_release::pipeline::{
        JobFilter, ObservedRelease, PipelineObserver, PipelineStage, PipelineStatus, poll_once,
    };
    use rpb_release::state::Environment;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::watch;

    fn release() -> ObservedRelease {
        let env = Environment::new("DEVELOP", "develop");
        ObservedRelease {
            project: "group/app".to_string(),
            mr_iid: 77,
            filter: JobFilter::new("^deploy:{env}$", &env, "app").unwrap(),
            label: "2.0.0 → DEVELOP".to_string(),
        }
    }

    fn merged_host() -> FakeHost {
        let host = FakeHost::default();
        host.set_mr_state("merged", Some("abc123"));
        host
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<String>>);

    impl RecordingNotifier {
        fn titles(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, title: &str, _body: &str) {
            self.0.lock().unwrap().push(title.to_string());
        }
    }

    async fn wait_for_stage(rx: &mut watch::Receiver<PipelineStatus>, stage: PipelineStage) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.stage == stage))
            .await
            .expect("observer never reached the stage")
            .unwrap();
    }

    async fn let_polls_run(rx: &mut watch::Receiver<PipelineStatus>, polls: usize) {
        for _ in 0..polls {
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .expect("observer stopped polling")
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_unmerged_mr_waits_without_asking_for_jobs() {
        let host = FakeHost::default();
        host.set_mr_state("opened", None);
        *host.mr_pipelines.lock().unwrap() = vec![pipeline(3)];
        host.set_jobs(&[("deploy:develop", JobStatus::Running)]);

        let status = poll_once(&host, &release(), &PipelineStatus::default()).await;

        assert_eq!(status.stage, PipelineStage::WaitingForMerge);
        assert!(!status.mr_merged);
        assert_eq!(status.pipeline_id, None);
        assert!(status.checked_at.is_some());
        assert_eq!(host.job_requests(), 0);
        assert_eq!(host.mr_pipeline_requests(), 0);
    }

    #[tokio::test]
    async fn test_merged_without_matching_jobs_waits_for_start() {
        let host = merged_host();
        *host.commit_pipelines.lock().unwrap() = vec![pipeline(5)];
        host.set_jobs(&[("lint", JobStatus::Failed), ("deploy:staging", JobStatus::Success)]);

        let status = poll_once(&host, &release(), &PipelineStatus::default()).await;

        assert_eq!(status.stage, PipelineStage::WaitingForStart);
        assert!(status.mr_merged);
        assert_eq!(status.pipeline_id, Some(5));
        assert_eq!(status.jobs.total, 0);
        assert_eq!(host.job_requests(), 1);
    }

    #[tokio::test]
    async fn test_one_failed_matching_job_fails_the_pipeline() {
        let host = merged_host();
        *host.commit_pipelines.lock().unwrap() = vec![pipeline(5)];
        host.set_jobs(&[
            ("deploy:develop", JobStatus::Failed),
            ("deploy:develop", JobStatus::Running),
            ("lint", JobStatus::Success),
        ]);

        let status = poll_once(&host, &release(), &PipelineStatus::default()).await;

        assert_eq!(status.stage, PipelineStage::Failed);
        assert_eq!(status.jobs.total, 2);
        assert_eq!(status.jobs.failed, 1);
        assert_eq!(status.jobs.running, 1);
    }

    #[tokio::test]
    async fn test_commit_without_pipelines_falls_back_to_mr_pipelines() {
        let host = merged_host();
        *host.mr_pipelines.lock().unwrap() = vec![pipeline(9), pipeline(8)];
        host.set_jobs(&[("deploy:develop", JobStatus::Success)]);

        let status = poll_once(&host, &release(), &PipelineStatus::default()).await;

        assert_eq!(status.pipeline_id, Some(9));
        assert_eq!(
            status.pipeline_url.as_deref(),
            Some("https://git.example.com/group/app/-/pipelines/9")
        );
        assert_eq!(status.stage, PipelineStage::Completed);
        assert_eq!(host.mr_pipeline_requests(), 1);
    }

    #[tokio::test]
    async fn test_missing_commit_falls_back_to_mr_pipelines() {
        let host = merged_host();
        *host.commit_error.lock().unwrap() = Some(ApiError::NotFound {
            resource: "commit abc123".to_string(),
        });
        *host.mr_pipelines.lock().unwrap() = vec![pipeline(9)];
        host.set_jobs(&[("deploy:develop", JobStatus::Running)]);

        let status = poll_once(&host, &release(), &PipelineStatus::default()).await;

        assert_eq!(status.error, None);
        assert_eq!(status.pipeline_id, Some(9));
        assert_eq!(status.stage, PipelineStage::Running);
    }

    #[tokio::test]
    async fn test_other_commit_lookup_errors_are_not_swallowed() {
        let host = merged_host();
        *host.commit_error.lock().unwrap() = Some(ApiError::Status {
            status: 502,
            body: "bad gateway".to_string(),
        });
        *host.mr_pipelines.lock().unwrap() = vec![pipeline(9)];

        let status = poll_once(&host, &release(), &PipelineStatus::default()).await;

        assert!(matches!(status.error, Some(ApiError::Status { status: 502, .. })));
        assert_eq!(host.mr_pipeline_requests(), 0);
    }

    #[tokio::test]
    async fn test_failed_check_keeps_stage_until_next_good_poll() {
        let host = merged_host();
        *host.commit_pipelines.lock().unwrap() = vec![pipeline(5)];
        host.set_jobs(&[("deploy:develop", JobStatus::Running)]);
        let release = release();

        let running = poll_once(&host, &release, &PipelineStatus::default()).await;
        assert_eq!(running.stage, PipelineStage::Running);

        *host.status_error.lock().unwrap() = Some(ApiError::Network {
            reason: "connection reset".to_string(),
        });
        let failed_check = poll_once(&host, &release, &running).await;
        assert_eq!(failed_check.stage, PipelineStage::Running);
        assert_eq!(failed_check.pipeline_id, Some(5));
        assert!(matches!(failed_check.error, Some(ApiError::Network { .. })));
        assert!(failed_check.checked_at >= running.checked_at);

        *host.status_error.lock().unwrap() = None;
        host.set_jobs(&[("deploy:develop", JobStatus::Success)]);
        let recovered = poll_once(&host, &release, &failed_check).await;
        assert_eq!(recovered.error, None);
        assert_eq!(recovered.stage, PipelineStage::Completed);
    }

    #[tokio::test]
    async fn test_observer_announces_each_outcome_once() {
        let host = Arc::new(merged_host());
        *host.commit_pipelines.lock().unwrap() = vec![pipeline(5)];
        host.set_jobs(&[("deploy:develop", JobStatus::Failed)]);
        let notifier = Arc::new(RecordingNotifier::default());

        let observer = PipelineObserver::new(
            Arc::clone(&host),
            Arc::clone(&notifier) as Arc<dyn Notifier>,
            Duration::from_millis(10),
        );
        observer.start(release());
        observer.start(release());
        assert!(observer.is_observing());
        let mut rx = observer.subscribe();

        wait_for_stage(&mut rx, PipelineStage::Failed).await;
        let_polls_run(&mut rx, 3).await;
        assert_eq!(notifier.titles(), vec!["Pipeline failed"]);

        host.set_jobs(&[("deploy:develop", JobStatus::Success)]);
        wait_for_stage(&mut rx, PipelineStage::Completed).await;
        let_polls_run(&mut rx, 3).await;
        assert_eq!(notifier.titles(), vec!["Pipeline failed", "Pipeline completed"]);
        assert_eq!(observer.status().stage, PipelineStage::Completed);

        observer.stop();
        assert!(!observer.is_observing());
    }
}
