//! Release settings.
//!
//! Settings come from a TOML file (every field optional) and can be
//! overridden from the environment. `validate` must pass before a release
//! starts: it is where broad exclude patterns and broken job filters are
//! rejected.

use crate::error::ConfigError;
use crate::git::ExcludeMatcher;
use crate::history::HistoryStore;
use crate::pipeline::JobFilter;
use crate::pty::PtyRunner;
use crate::state::Environment;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings file looked up in the working tree
pub const PROJECT_SETTINGS_FILE: &str = ".rpb_release.toml";

/// Upper bound for rows/cols handed to the PTY
const MAX_TERMINAL_DIMENSION: u16 = 1000;

/// All knobs of a release
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseSettings {
    /// Long-lived branch releases fork from
    pub base_branch: String,
    /// Branch that also receives the root merge
    pub develop_branch: Option<String>,
    /// Git remote name
    pub remote: String,
    /// Deployable environments
    pub environments: Vec<Environment>,
    /// Newline-separated exclude globs
    pub exclude_patterns: String,
    /// Regex selecting deploy jobs; `{env}`, `{branch}` and `{app}` are substituted
    pub job_filter_pattern: String,
    /// Value for `{app}`
    pub app_name: String,
    /// GitLab instance URL
    pub gitlab_url: String,
    /// Project id or `group/name` path
    pub project_id: String,
    /// Seconds between pipeline polls
    pub poll_interval_secs: u64,
    /// Live screen render cadence
    pub render_interval_ms: u64,
    /// PTY rows
    pub pty_rows: u16,
    /// PTY columns
    pub pty_cols: u16,
    /// Commits scanned for the previous release number
    pub commit_scan_depth: usize,
    /// Transcript lines kept in the state file
    pub transcript_max_lines: usize,
    /// Output lines kept with a step error
    pub error_tail_lines: usize,
    /// History directory; defaults to the user data directory
    pub history_dir: Option<PathBuf>,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            develop_branch: None,
            remote: "origin".to_string(),
            environments: Vec::new(),
            exclude_patterns: String::new(),
            job_filter_pattern: String::new(),
            app_name: String::new(),
            gitlab_url: "https://gitlab.com".to_string(),
            project_id: String::new(),
            poll_interval_secs: 7,
            render_interval_ms: 50,
            pty_rows: crate::pty::DEFAULT_ROWS,
            pty_cols: crate::pty::DEFAULT_COLS,
            commit_scan_depth: 20,
            transcript_max_lines: 5000,
            error_tail_lines: 50,
            history_dir: None,
        }
    }
}

impl ReleaseSettings {
    /// Parse TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a settings file
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Settings for `work_dir`: an explicit file, else `.rpb_release.toml`
    /// in the tree, else the user config file, else defaults. Environment
    /// overrides are applied on top.
    pub fn discover(explicit: Option<&Path>, work_dir: &Path) -> Result<Self, ConfigError> {
        let candidates = [
            Some(work_dir.join(PROJECT_SETTINGS_FILE)),
            dirs::config_dir().map(|d| d.join("rpb_release").join("config.toml")),
        ];
        let mut settings = match explicit {
            Some(path) => Self::load_from(path)?,
            None => match candidates.into_iter().flatten().find(|p| p.is_file()) {
                Some(path) => {
                    log::debug!("loading settings from {}", path.display());
                    Self::load_from(&path)?
                }
                None => Self::default(),
            },
        };
        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Apply `RPB_*` overrides read through `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = read("RPB_BASE_BRANCH") {
            self.base_branch = v;
        }
        if let Some(v) = read("RPB_REMOTE") {
            self.remote = v;
        }
        if let Some(v) = read("RPB_GITLAB_URL") {
            self.gitlab_url = v;
        }
        if let Some(v) = read("RPB_PROJECT_ID") {
            self.project_id = v;
        }
        if let Some(v) = read("RPB_JOB_FILTER") {
            self.job_filter_pattern = v;
        }
        if let Some(v) = read("RPB_HISTORY_DIR") {
            self.history_dir = Some(PathBuf::from(v));
        }
    }

    /// Check everything a release depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("base_branch", &self.base_branch), ("remote", &self.remote)] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.environments.is_empty() {
            return Err(ConfigError::Invalid {
                field: "environments",
                reason: "at least one environment is required".to_string(),
            });
        }
        if let Some(env) = self
            .environments
            .iter()
            .find(|e| e.name.trim().is_empty() || e.branch_name.trim().is_empty())
        {
            return Err(ConfigError::Invalid {
                field: "environments",
                reason: format!("environment {:?} needs a name and a branch_name", env.name),
            });
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_secs",
                reason: "must be positive".to_string(),
            });
        }
        for (field, value) in [("pty_rows", self.pty_rows), ("pty_cols", self.pty_cols)] {
            if value == 0 || value > MAX_TERMINAL_DIMENSION {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("must be between 1 and {}", MAX_TERMINAL_DIMENSION),
                });
            }
        }

        ExcludeMatcher::validate(&self.exclude_patterns)?;
        for env in &self.environments {
            JobFilter::new(&self.job_filter_pattern, env, &self.app_name)?;
        }
        Ok(())
    }

    /// Environment by name or branch, case-insensitively
    pub fn environment(&self, name: &str) -> Result<&Environment, ConfigError> {
        self.environments
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name) || e.branch_name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_string(),
            })
    }

    /// Compiled exclude patterns
    pub fn exclude_matcher(&self) -> Result<ExcludeMatcher, ConfigError> {
        ExcludeMatcher::compile(&self.exclude_patterns)
    }

    /// Job filter for one environment
    pub fn job_filter(&self, environment: &Environment) -> Result<JobFilter, ConfigError> {
        JobFilter::new(&self.job_filter_pattern, environment, &self.app_name)
    }

    /// Access token from `GITLAB_TOKEN` or `RPB_GITLAB_TOKEN`
    pub fn gitlab_token(&self) -> Option<String> {
        ["GITLAB_TOKEN", "RPB_GITLAB_TOKEN"]
            .iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|token| !token.trim().is_empty())
    }

    /// Pipeline poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Live render cadence
    pub fn render_interval(&self) -> Duration {
        Duration::from_millis(self.render_interval_ms.max(1))
    }

    /// PTY runner for `work_dir` sized and paced per these settings
    pub fn pty_runner(&self, work_dir: &Path) -> PtyRunner {
        PtyRunner::new(work_dir)
            .with_size(self.pty_rows, self.pty_cols)
            .with_render_interval(self.render_interval())
    }

    /// History store at the configured or default location
    pub fn history_store(&self) -> crate::error::Result<HistoryStore> {
        match &self.history_dir {
            Some(dir) => Ok(HistoryStore::new(dir)),
            None => HistoryStore::default_location(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ReleaseSettings {
        ReleaseSettings {
            environments: vec![Environment::new("DEVELOP", "develop")],
            ..ReleaseSettings::default()
        }
    }

    #[test]
    fn test_parse_partial_file_keeps_defaults() {
        let settings = ReleaseSettings::from_toml_str(
            r#"
base_branch = "master"
exclude_patterns = """
/node_modules/**
*.env
"""

[[environments]]
name = "DEVELOP"
branch_name = "develop"
"#,
        )
        .unwrap();
        assert_eq!(settings.base_branch, "master");
        assert_eq!(settings.remote, "origin");
        assert_eq!(settings.poll_interval_secs, 7);
        assert_eq!(settings.environments.len(), 1);
        assert!(settings.validate().is_ok());
        assert!(settings.exclude_matcher().unwrap().is_excluded("config/.env"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            ReleaseSettings::from_toml_str("bogus = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let mut settings = valid();
        settings.apply_overrides(|name| match name {
            "RPB_REMOTE" => Some("upstream".to_string()),
            "RPB_BASE_BRANCH" => Some("  ".to_string()),
            "RPB_HISTORY_DIR" => Some("/tmp/h".to_string()),
            _ => None,
        });
        assert_eq!(settings.remote, "upstream");
        assert_eq!(settings.base_branch, "main");
        assert_eq!(settings.history_dir, Some(PathBuf::from("/tmp/h")));
    }

    #[test]
    fn test_validate_rejects_broad_exclude() {
        for pattern in ["*", "**", "/", "*/"] {
            let settings = ReleaseSettings {
                exclude_patterns: format!("docs/\n{}", pattern),
                ..valid()
            };
            assert!(
                matches!(
                    settings.validate(),
                    Err(ConfigError::InvalidExcludePattern { .. })
                ),
                "{} should be rejected",
                pattern
            );
        }
    }

    #[test]
    fn test_validate_requires_environment_and_filter() {
        assert!(matches!(
            ReleaseSettings::default().validate(),
            Err(ConfigError::Invalid {
                field: "environments",
                ..
            })
        ));
        let settings = ReleaseSettings {
            job_filter_pattern: "deploy-[{env}".to_string(),
            ..valid()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidJobFilter { .. })
        ));
    }

    #[test]
    fn test_environment_lookup() {
        let settings = valid();
        assert_eq!(settings.environment("develop").unwrap().name, "DEVELOP");
        assert_eq!(settings.environment("Develop").unwrap().branch_name, "develop");
        assert!(matches!(
            settings.environment("prod"),
            Err(ConfigError::UnknownEnvironment { .. })
        ));
    }
}
