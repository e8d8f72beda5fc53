//! Scripted fakes for the engine's collaborators.

#![allow(dead_code)]

use rpb_release::config::ReleaseSettings;
use rpb_release::engine::{Collaborators, ReleaseEvent, ReleaseRequest};
use rpb_release::error::{ApiError, GitError, PtyError};
use rpb_release::history::HistoryStore;
use rpb_release::host::{
    CodeHost, CreatedMergeRequest, JobStatus, LogNotifier, MergeRequestStatus, NewMergeRequest,
    Pipeline, PipelineJob,
};
use rpb_release::pty::{CommandFailure, CommandOutput, CommandRunner};
use rpb_release::state::{Environment, MergeRequestRef};
use rpb_release::git::Workspace;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What a scripted command does
#[derive(Debug, Clone, Copy)]
pub enum Effect {
    /// Exit with this status
    Fail(i32),
    /// Leave MERGE_HEAD behind and exit 1
    Conflict,
}

#[derive(Debug)]
struct Rule {
    needle: String,
    remaining: usize,
    effect: Effect,
}

/// Runner that records commands and fails the ones it is told to
#[derive(Debug)]
pub struct ScriptedRunner {
    git_dir: PathBuf,
    log: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
    kills: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            git_dir: work_dir.join(".git"),
            log: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
            kills: AtomicUsize::new(0),
        }
    }

    /// The next `times` commands containing `needle` get `effect`
    pub fn script(&self, needle: &str, times: usize, effect: Effect) {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.to_string(),
            remaining: times,
            effect,
        });
    }

    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn ran(&self, needle: &str) -> bool {
        self.commands().iter().any(|c| c.contains(needle))
    }

    pub fn count(&self, needle: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(needle)).count()
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    fn merge_head(&self) -> PathBuf {
        self.git_dir.join("MERGE_HEAD")
    }

    fn execute(&self, command: &str) -> Option<i32> {
        self.log.lock().unwrap().push(command.to_string());

        let effect = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|r| r.remaining > 0 && command.contains(&r.needle))
                .map(|r| {
                    r.remaining -= 1;
                    r.effect
                })
        };
        match effect {
            Some(Effect::Fail(code)) => return Some(code),
            Some(Effect::Conflict) => {
                std::fs::write(self.merge_head(), "0000000\n").unwrap();
                return Some(1);
            }
            None => {}
        }

        if command.contains("merge --continue") || command.contains("merge --abort") {
            let _ = std::fs::remove_file(self.merge_head());
        }
        None
    }
}

impl CommandRunner for ScriptedRunner {
    async fn run_commands(&self, commands: &[String]) -> Result<CommandOutput, PtyError> {
        let mut output = CommandOutput::default();
        for command in commands {
            let failure = self.execute(command).map(|code| CommandFailure {
                command: command.clone(),
                exit_code: Some(code),
            });
            output.append(CommandOutput {
                transcript: format!("$ {}", command),
                failure,
            });
            if !output.success() {
                break;
            }
        }
        Ok(output)
    }

    fn kill(&self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }

    fn resize(&self, _rows: u16, _cols: u16) {}
}

/// Workspace answering from fixed data
#[derive(Debug, Clone)]
pub struct FakeWorkspace {
    pub root: PathBuf,
    pub clean: bool,
    pub remote_branches: Vec<String>,
    pub titles: HashMap<String, Vec<String>>,
    pub files: HashMap<String, Vec<String>>,
}

impl FakeWorkspace {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            clean: true,
            remote_branches: Vec::new(),
            titles: HashMap::new(),
            files: HashMap::new(),
        }
    }
}

impl Workspace for FakeWorkspace {
    fn work_dir(&self) -> &Path {
        &self.root
    }

    async fn project_root(&self) -> Result<PathBuf, GitError> {
        if self.root.join(".git").exists() {
            Ok(self.root.clone())
        } else {
            Err(GitError::CommandFailed {
                command: "git rev-parse --show-toplevel".to_string(),
                stderr: "fatal: not a git repository".to_string(),
            })
        }
    }

    async fn is_clean(&self) -> Result<bool, GitError> {
        Ok(self.clean)
    }

    async fn remote_branch_exists(&self, _remote: &str, branch: &str) -> Result<bool, GitError> {
        Ok(self.remote_branches.iter().any(|b| b == branch))
    }

    async fn recent_commit_titles(&self, rev: &str, count: usize) -> Result<Vec<String>, GitError> {
        let titles = self.titles.get(rev).cloned().unwrap_or_default();
        Ok(titles.into_iter().take(count).collect())
    }

    async fn list_files(&self, rev: &str) -> Result<Vec<String>, GitError> {
        Ok(self.files.get(rev).cloned().unwrap_or_default())
    }
}

/// Code host with canned answers
#[derive(Debug, Default)]
pub struct FakeHost {
    pub created: Mutex<Vec<NewMergeRequest>>,
    pub create_error: Mutex<Option<ApiError>>,
    pub open_mr: Mutex<Option<CreatedMergeRequest>>,
    pub mr_status: Mutex<Option<MergeRequestStatus>>,
    pub status_error: Mutex<Option<ApiError>>,
    pub commit_pipelines: Mutex<Vec<Pipeline>>,
    pub commit_error: Mutex<Option<ApiError>>,
    pub mr_pipelines: Mutex<Vec<Pipeline>>,
    pub jobs: Mutex<Vec<PipelineJob>>,
    pub mr_pipeline_requests: AtomicUsize,
    pub job_requests: AtomicUsize,
}

impl FakeHost {
    pub fn set_mr_state(&self, state: &str, merge_commit: Option<&str>) {
        *self.mr_status.lock().unwrap() = Some(MergeRequestStatus {
            iid: 77,
            state: state.to_string(),
            merge_commit_sha: merge_commit.map(str::to_string),
            squash_commit_sha: None,
            sha: Some("head".to_string()),
            web_url: "https://git.example.com/group/app/-/merge_requests/77".to_string(),
        });
    }

    pub fn set_jobs(&self, jobs: &[(&str, JobStatus)]) {
        *self.jobs.lock().unwrap() = jobs
            .iter()
            .enumerate()
            .map(|(i, (name, status))| PipelineJob {
                id: i as u64 + 1,
                name: name.to_string(),
                stage: "deploy".to_string(),
                status: *status,
                web_url: String::new(),
            })
            .collect();
    }

    pub fn job_requests(&self) -> usize {
        self.job_requests.load(Ordering::SeqCst)
    }

    pub fn mr_pipeline_requests(&self) -> usize {
        self.mr_pipeline_requests.load(Ordering::SeqCst)
    }
}

pub fn pipeline(id: u64) -> Pipeline {
    Pipeline {
        id,
        status: "running".to_string(),
        sha: Some("abc123".to_string()),
        web_url: format!("https://git.example.com/group/app/-/pipelines/{}", id),
    }
}

impl CodeHost for FakeHost {
    async fn merge_request_status(&self, _project: &str, iid: u64) -> Result<MergeRequestStatus, ApiError> {
        if let Some(error) = self.status_error.lock().unwrap().clone() {
            return Err(error);
        }
        self.mr_status
            .lock()
            .unwrap()
            .clone()
            .ok_or(ApiError::NotFound {
                resource: format!("merge request !{}", iid),
            })
    }

    async fn pipelines_by_commit(&self, _project: &str, _sha: &str) -> Result<Vec<Pipeline>, ApiError> {
        if let Some(error) = self.commit_error.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self.commit_pipelines.lock().unwrap().clone())
    }

    async fn merge_request_pipelines(&self, _project: &str, _iid: u64) -> Result<Vec<Pipeline>, ApiError> {
        self.mr_pipeline_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.mr_pipelines.lock().unwrap().clone())
    }

    async fn pipeline_jobs(&self, _project: &str, _pipeline_id: u64) -> Result<Vec<PipelineJob>, ApiError> {
        self.job_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn create_merge_request(
        &self,
        _project: &str,
        request: &NewMergeRequest,
    ) -> Result<CreatedMergeRequest, ApiError> {
        if let Some(error) = self.create_error.lock().unwrap().take() {
            return Err(error);
        }
        self.created.lock().unwrap().push(request.clone());
        Ok(CreatedMergeRequest {
            iid: 77,
            web_url: "https://git.example.com/group/app/-/merge_requests/77".to_string(),
        })
    }

    async fn find_open_merge_request(
        &self,
        _project: &str,
        _source: &str,
        _target: &str,
    ) -> Result<Option<CreatedMergeRequest>, ApiError> {
        Ok(self.open_mr.lock().unwrap().clone())
    }
}

/// A temporary project with a `.git` directory and its own history dir
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub runner: Arc<ScriptedRunner>,
    pub workspace: FakeWorkspace,
    pub host: Arc<FakeHost>,
    pub settings: ReleaseSettings,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let runner = Arc::new(ScriptedRunner::new(dir.path()));
        let workspace = FakeWorkspace::new(dir.path());
        let settings = ReleaseSettings {
            project_id: "group/app".to_string(),
            environments: vec![Environment::new("DEVELOP", "develop")],
            history_dir: Some(dir.path().join("history")),
            poll_interval_secs: 1,
            ..ReleaseSettings::default()
        };
        Self {
            dir,
            runner,
            workspace,
            host: Arc::new(FakeHost::default()),
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn history(&self) -> HistoryStore {
        HistoryStore::new(self.root().join("history"))
    }

    pub fn collaborators(
        &self,
    ) -> (
        Collaborators<ScriptedRunner, FakeWorkspace, FakeHost>,
        mpsc::UnboundedReceiver<ReleaseEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let collaborators = Collaborators {
            runner: Arc::clone(&self.runner),
            workspace: self.workspace.clone(),
            host: Arc::clone(&self.host),
            notifier: Arc::new(LogNotifier),
            history: self.history(),
            settings: self.settings.clone(),
            events: Some(tx),
        };
        (collaborators, rx)
    }
}

pub fn request(branches: &[&str], root_merge: bool) -> ReleaseRequest {
    ReleaseRequest {
        merge_requests: branches
            .iter()
            .enumerate()
            .map(|(i, branch)| MergeRequestRef {
                iid: i as u64 + 10,
                source_branch: branch.to_string(),
                web_url: format!("https://git.example.com/group/app/-/merge_requests/{}", i + 10),
                sha: format!("{:07}", i),
            })
            .collect(),
        environment: Environment::new("DEVELOP", "develop"),
        version: "2.0.0".to_string(),
        source_branch: None,
        root_merge,
    }
}

/// Every event received so far
pub fn drain(events: &mut mpsc::UnboundedReceiver<ReleaseEvent>) -> Vec<ReleaseEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
