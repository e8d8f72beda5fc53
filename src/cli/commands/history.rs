//! History command implementation.

use super::helpers::{load_settings, prompt_confirmation};
use crate::cli::{HistoryCommand, RuntimeConfig};
use crate::error::Result;
use crate::history::{HistoryIndexEntry, HistoryStatus};

/// Execute history command
pub(super) fn execute_history(config: &RuntimeConfig, action: Option<&HistoryCommand>) -> Result<i32> {
    let settings = load_settings(config)?;
    let store = settings.history_store()?;

    match action {
        None | Some(HistoryCommand::List) => {
            let entries = store.list()?;
            if entries.is_empty() {
                config.println(&format!("No releases recorded in {}", store.dir().display()));
                return Ok(0);
            }
            for entry in &entries {
                config.println(&list_line(entry));
                if let Some(error) = &entry.error {
                    config.indent(error);
                }
            }
            Ok(0)
        }
        Some(HistoryCommand::Show { id, transcript }) => {
            let detail = store.get(id)?;
            let entry = &detail.summary;
            let output = config.output();
            let _ = output.section(&format!(
                "{} {} → {}",
                entry.id, entry.version, entry.environment
            ));
            let _ = output.field("Status", &entry.status.to_string());
            let _ = output.field("Project", &entry.project_id);
            let _ = output.field("Source branch", &detail.source_branch);
            let _ = output.field("Final step", &entry.final_step.to_string());
            let _ = output.field("Tag", entry.tag_name.as_deref().unwrap_or("-"));
            let _ = output.field("Merge request", entry.created_mr_url.as_deref().unwrap_or("-"));
            let _ = output.field("Started", &entry.started_at.to_rfc3339());
            let _ = output.field("Finished", &entry.finished_at.to_rfc3339());
            if let Some(error) = &entry.error {
                let _ = output.field("Error", error);
            }

            config.println("\nMerge requests:");
            for mr in &detail.merge_requests {
                let mark = if mr.merged { "✓" } else { "·" };
                config.indent(&format!("{} !{} {} {}", mark, mr.iid, mr.branch, mr.url));
            }
            if *transcript && !detail.transcript.is_empty() {
                config.println("\nTranscript:");
                config.indent(&detail.transcript);
            }
            Ok(0)
        }
        Some(HistoryCommand::Delete { ids, yes }) => {
            if !yes && !prompt_confirmation(&format!("Delete {} history entries?", ids.len()))? {
                config.println("Nothing deleted");
                return Ok(1);
            }
            let removed = store.delete(ids)?;
            config.success_println(&format!("Deleted {} history entries", removed));
            Ok(0)
        }
    }
}

fn list_line(entry: &HistoryIndexEntry) -> String {
    let mark = match entry.status {
        HistoryStatus::Completed => "✓",
        HistoryStatus::Aborted => "✗",
    };
    format!(
        "{} {}  {:<9} {} → {}  {} MRs  {}",
        mark,
        entry.id,
        entry.status.to_string(),
        entry.version,
        entry.environment,
        entry.mr_count,
        entry.tag_name.as_deref().unwrap_or("-")
    )
}
