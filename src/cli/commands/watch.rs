//! Follow the pipeline of the release merge request.

use super::helpers::{code_host, describe_pipeline, load_settings, project_root};
use crate::cli::RuntimeConfig;
use crate::error::{CliError, Result};
use crate::pipeline::{ObservedRelease, PipelineStage, PipelineStatus, poll_once};
use crate::state::create_state_manager;

/// Execute watch command. Exits 0 when the pipeline completes and 1 when it
/// fails.
pub(super) async fn execute_watch(config: &RuntimeConfig, once: bool) -> Result<i32> {
    let settings = load_settings(config)?;
    let root = project_root(config).await?;
    let state = create_state_manager(&root).read_state()?;
    let Some(mr_iid) = state.created_mr_id else {
        return Err(CliError::ExecutionFailed {
            command: "watch".to_string(),
            reason: "the release merge request has not been opened yet".to_string(),
        }
        .into());
    };

    let host = code_host(&settings)?;
    let release = ObservedRelease {
        project: state.project_id.clone(),
        mr_iid,
        filter: settings.job_filter(&state.environment)?,
        label: format!("{} → {}", state.version, state.environment.name),
    };
    config.verbose_println(&format!(
        "polling merge request !{} every {}s",
        mr_iid,
        settings.poll_interval().as_secs()
    ));

    let mut status = PipelineStatus::default();
    loop {
        let next = poll_once(&host, &release, &status).await;
        let changed = next.stage != status.stage || next.jobs != status.jobs || next.error != status.error;
        status = next;
        if changed || once {
            config.println(&describe_pipeline(&status));
        }

        match status.stage {
            PipelineStage::Completed => {
                config.success_println(&format!("{} deployed", release.label));
                return Ok(0);
            }
            PipelineStage::Failed => {
                config.error_println(&format!("Pipeline for {} failed", release.label));
                return Ok(1);
            }
            _ if once => return Ok(0),
            _ => {}
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(0),
            _ = tokio::time::sleep(settings.poll_interval()) => {}
        }
    }
}
