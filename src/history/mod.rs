//! Append-only log of finished releases.
//!
//! `index.json` holds one summary per release, newest first; each release
//! also gets `{id}.json` with its merge requests and transcript. Entries are
//! never modified once written.

use crate::error::{HistoryError, Result};
use crate::state::{ReleaseState, ReleaseStep};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const INDEX_FILE: &str = "index.json";

/// How a release ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryStatus {
    /// Ran to completion
    Completed,
    /// Aborted by the operator
    Aborted,
}

impl std::fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HistoryStatus::Completed => f.write_str("completed"),
            HistoryStatus::Aborted => f.write_str("aborted"),
        }
    }
}

/// Summary line in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryIndexEntry {
    /// Creation timestamp, `YYYYMMDD-HHMMSS` (with a suffix on collision)
    pub id: String,
    /// Outcome
    pub status: HistoryStatus,
    /// Code-host project
    pub project_id: String,
    /// Environment name
    pub environment: String,
    /// Released version
    pub version: String,
    /// Tag, if one was created
    pub tag_name: Option<String>,
    /// Release MR, if one was opened
    pub created_mr_url: Option<String>,
    /// Number of merged-in MRs
    pub mr_count: usize,
    /// Step the release ended at
    pub final_step: ReleaseStep,
    /// Pending error message when it ended
    pub error: Option<String>,
    /// Release start
    pub started_at: chrono::DateTime<chrono::Utc>,
    /// When this entry was written
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// One merged-in MR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMergeRequest {
    /// Project-scoped id
    pub iid: u64,
    /// Source branch
    pub branch: String,
    /// Web URL
    pub url: String,
    /// Head SHA at selection time
    pub sha: String,
    /// Whether it was merged before the release ended
    pub merged: bool,
}

/// Full record of one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryDetailEntry {
    /// Same data as the index line
    #[serde(flatten)]
    pub summary: HistoryIndexEntry,
    /// Cumulative source branch
    pub source_branch: String,
    /// Selected MRs in merge order
    pub merge_requests: Vec<HistoryMergeRequest>,
    /// Captured command transcript
    pub transcript: String,
}

/// History files in one directory
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    /// Store rooted at `dir`; created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the per-user data directory
    pub fn default_location() -> Result<Self> {
        let base = dirs::data_local_dir().ok_or(HistoryError::NoDirectory)?;
        Ok(Self::new(base.join("rpb_release").join("history")))
    }

    /// Directory the files live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn detail_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Snapshot `state` as a finished release
    pub fn record(&self, state: &ReleaseState, status: HistoryStatus) -> Result<HistoryIndexEntry> {
        fs::create_dir_all(&self.dir).map_err(|e| HistoryError::WriteFailed {
            reason: format!("Failed to create {}: {}", self.dir.display(), e),
        })?;

        let mut index = self.load_index()?;
        let now = chrono::Utc::now();
        let id = self.unique_id(&now.with_timezone(&chrono::Local), &index);

        let summary = HistoryIndexEntry {
            id: id.clone(),
            status,
            project_id: state.project_id.clone(),
            environment: state.environment.name.clone(),
            version: state.version.clone(),
            tag_name: state.tag_name.clone(),
            created_mr_url: state.created_mr_url.clone(),
            mr_count: state.mr_branches.len(),
            final_step: state.current_step,
            error: state.last_error.as_ref().map(|e| e.message.clone()),
            started_at: state.started_at,
            finished_at: now,
        };
        let merge_requests = (0..state.mr_branches.len())
            .map(|i| HistoryMergeRequest {
                iid: state.selected_mr_ids[i],
                branch: state.mr_branches[i].clone(),
                url: state.mr_urls[i].clone(),
                sha: state.mr_commit_shas[i].clone(),
                merged: i < state.merged_branches.len(),
            })
            .collect();
        let detail = HistoryDetailEntry {
            summary: summary.clone(),
            source_branch: state.source_branch.clone(),
            merge_requests,
            transcript: state.terminal_output.clone(),
        };

        write_json(&self.detail_path(&id), &detail)?;
        index.insert(0, summary.clone());
        write_json(&self.index_path(), &index)?;

        log::info!("recorded {} release {} as history entry {}", status, state.version, id);
        Ok(summary)
    }

    /// All summaries, newest first
    pub fn list(&self) -> Result<Vec<HistoryIndexEntry>> {
        self.load_index()
    }

    /// Full record of one release
    pub fn get(&self, id: &str) -> Result<HistoryDetailEntry> {
        let path = self.detail_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(HistoryError::NotFound { id: id.to_string() }.into());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_str(&contents)?)
    }

    /// Remove entries from the index and delete their detail files.
    /// Missing detail files are ignored. Returns how many index entries went.
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut index = self.load_index()?;
        let before = index.len();
        index.retain(|entry| !ids.contains(&entry.id));
        let removed = before - index.len();
        if removed > 0 {
            write_json(&self.index_path(), &index)?;
        }

        for id in ids {
            match fs::remove_file(self.detail_path(id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to delete history entry {}: {}", id, e),
            }
        }
        Ok(removed)
    }

    /// Read the index. A corrupt index is moved aside, never overwritten.
    fn load_index(&self) -> Result<Vec<HistoryIndexEntry>> {
        let path = self.index_path();
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str(&contents) {
            Ok(index) => Ok(index),
            Err(e) => {
                let backup = self.dir.join(format!(
                    "{}.corrupt-{}",
                    INDEX_FILE,
                    chrono::Utc::now().format("%Y%m%d-%H%M%S")
                ));
                log::warn!(
                    "history index is corrupt ({}); moving it to {}",
                    e,
                    backup.display()
                );
                fs::rename(&path, &backup).map_err(|e| HistoryError::WriteFailed {
                    reason: format!("Failed to back up corrupt index: {}", e),
                })?;
                Ok(Vec::new())
            }
        }
    }

    fn unique_id(
        &self,
        now: &chrono::DateTime<chrono::Local>,
        index: &[HistoryIndexEntry],
    ) -> String {
        let base = now.format("%Y%m%d-%H%M%S").to_string();
        let taken = |id: &str| {
            index.iter().any(|entry| entry.id == id) || self.detail_path(id).exists()
        };
        if !taken(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let id = format!("{}-{}", base, n);
            if !taken(&id) {
                return id;
            }
            n += 1;
        }
    }
}

/// Write-temp-then-rename so readers never see a partial file
fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let serialized = serde_json::to_string_pretty(value)?;
    let temp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&temp).map_err(|e| HistoryError::WriteFailed {
            reason: format!("Failed to create {}: {}", temp.display(), e),
        })?;
        file.write_all(serialized.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| HistoryError::WriteFailed {
                reason: format!("Failed to write {}: {}", temp.display(), e),
            })?;
    }
    fs::rename(&temp, path).map_err(|e| HistoryError::WriteFailed {
        reason: format!("Failed to replace {}: {}", path.display(), e),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReleaseError;
    use crate::state::{Environment, MergeRequestRef, ReleaseParams};

    fn state() -> ReleaseState {
        let mut state = ReleaseState::new(ReleaseParams {
            project_id: "group/app".to_string(),
            environment: Environment::new("DEVELOP", "develop"),
            version: "2.0.0".to_string(),
            source_branch: "release/rpb-2.0.0-root".to_string(),
            source_branch_is_remote: false,
            root_merge: false,
            base_branch: "main".to_string(),
            develop_branch: None,
            merge_requests: vec![
                MergeRequestRef {
                    iid: 1,
                    source_branch: "feat/a".to_string(),
                    web_url: "https://git/1".to_string(),
                    sha: "aaa".to_string(),
                },
                MergeRequestRef {
                    iid: 2,
                    source_branch: "feat/b".to_string(),
                    web_url: "https://git/2".to_string(),
                    sha: "bbb".to_string(),
                },
            ],
            work_dir: PathBuf::from("/tmp/repo"),
        });
        state.set_step(ReleaseStep::MergeBranches);
        state.record_merged();
        state.append_output("$ git merge origin/feat/a", 100);
        state
    }

    #[test]
    fn test_record_then_list_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history"));
        let entry = store.record(&state(), HistoryStatus::Aborted).unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![entry.clone()]);

        let detail = store.get(&entry.id).unwrap();
        assert_eq!(detail.summary.status, HistoryStatus::Aborted);
        assert_eq!(detail.merge_requests.len(), 2);
        assert!(detail.merge_requests[0].merged);
        assert!(!detail.merge_requests[1].merged);
        assert!(detail.transcript.contains("feat/a"));
    }

    #[test]
    fn test_newest_first_with_unique_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let first = store.record(&state(), HistoryStatus::Completed).unwrap();
        let second = store.record(&state(), HistoryStatus::Aborted).unwrap();
        assert_ne!(first.id, second.id);

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[test]
    fn test_delete_tolerates_missing_detail() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        let entry = store.record(&state(), HistoryStatus::Completed).unwrap();
        fs::remove_file(store.detail_path(&entry.id)).unwrap();

        let removed = store
            .delete(&[entry.id.clone(), "19990101-000000".to_string()])
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_index_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        fs::write(store.index_path(), "{not json").unwrap();

        store.record(&state(), HistoryStatus::Completed).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);

        let backups: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(backups[0].path()).unwrap(), "{not json");
    }

    #[test]
    fn test_missing_entry_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoryStore::new(dir.path());
        assert!(matches!(
            store.get("nope"),
            Err(ReleaseError::History(HistoryError::NotFound { .. }))
        ));
    }
}
