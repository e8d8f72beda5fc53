//! Command line argument parsing and validation.

use crate::engine::SessionAction;
use crate::state::MergeRequestRef;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Resumable multi-branch release driver
#[derive(Parser, Debug)]
#[command(
    name = "rpb_release",
    version,
    about = "Merge selected merge requests into a release branch and ship it to an environment",
    long_about = "Merge selected merge requests into a cumulative source branch, copy the result
onto an environment release branch, open the release merge request and follow
its pipeline. Every step is persisted; an interrupted release resumes where it
stopped.

Usage:
  rpb_release start 2.0.0 --env develop --mr 12:feature/login --mr 15:fix/typo
  rpb_release status
  rpb_release retry
  rpb_release proceed
  rpb_release abort --delete-remote"
)]
pub struct Args {
    /// Command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Working directory of the project (defaults to the current directory)
    #[arg(short = 'C', long, global = true, value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Settings file (defaults to .rpb_release.toml, then the user config)
    #[arg(long, global = true, env = "RPB_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Show debug-level messages
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a release and drive it interactively
    Start {
        /// Version label, e.g. 2.0.0
        #[arg(value_name = "VERSION")]
        release_version: String,

        /// Target environment (name or branch)
        #[arg(short, long)]
        env: String,

        /// Merge request as IID:BRANCH, in merge order
        #[arg(short, long = "mr", value_name = "IID:BRANCH", required = true)]
        merge_requests: Vec<String>,

        /// Cumulative source branch (defaults to release/rpb-VERSION-root)
        #[arg(long, value_name = "BRANCH")]
        source_branch: Option<String>,

        /// Merge the source branch back into the base branch at the end
        #[arg(long)]
        root_merge: bool,
    },

    /// Drive the persisted release interactively
    Resume,

    /// Show the persisted release
    Status {
        /// Print the raw state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-run the failed step and continue until the next stop
    Retry,

    /// Leave the current waiting point and continue until the next stop
    Proceed,

    /// Clean up the release and discard its state
    Abort {
        /// Also delete pushed branches and tags
        #[arg(long)]
        delete_remote: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Follow the pipeline of the release merge request
    Watch {
        /// Poll once and exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect finished releases
    History {
        /// History operation (defaults to list)
        #[command(subcommand)]
        action: Option<HistoryCommand>,
    },
}

/// History operations
#[derive(Subcommand, Debug)]
pub enum HistoryCommand {
    /// List finished releases, newest first
    List,
    /// Show one release in detail
    Show {
        /// Entry id
        id: String,
        /// Include the command transcript
        #[arg(long)]
        transcript: bool,
    },
    /// Delete entries
    Delete {
        /// Entry ids
        #[arg(required = true)]
        ids: Vec<String>,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

impl Command {
    /// Command name for messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Start { .. } => "start",
            Command::Resume => "resume",
            Command::Status { .. } => "status",
            Command::Retry => "retry",
            Command::Proceed => "proceed",
            Command::Abort { .. } => "abort",
            Command::Watch { .. } => "watch",
            Command::History { .. } => "history",
        }
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if let Some(dir) = &self.work_dir
            && !dir.is_dir()
        {
            return Err(format!("{} is not a directory", dir.display()));
        }
        if let Command::Start {
            release_version,
            merge_requests,
            ..
        } = &self.command
        {
            if release_version.trim().is_empty() {
                return Err("VERSION must not be empty".to_string());
            }
            for spec in merge_requests {
                parse_merge_request(spec)?;
            }
        }
        Ok(())
    }
}

/// Parse `IID:BRANCH`
pub fn parse_merge_request(spec: &str) -> Result<MergeRequestRef, String> {
    let (iid, branch) = spec
        .split_once(':')
        .ok_or_else(|| format!("'{}' is not IID:BRANCH", spec))?;
    let iid = iid
        .trim()
        .trim_start_matches('!')
        .parse::<u64>()
        .map_err(|_| format!("'{}' does not start with a merge request number", spec))?;
    let branch = branch.trim();
    if branch.is_empty() {
        return Err(format!("'{}' has an empty branch", spec));
    }
    Ok(MergeRequestRef {
        iid,
        source_branch: branch.to_string(),
        web_url: String::new(),
        sha: String::new(),
    })
}

/// Operator input typed during an interactive session
pub fn parse_session_input(line: &str) -> Option<SessionAction> {
    match line.trim().to_ascii_lowercase().as_str() {
        "p" | "proceed" => Some(SessionAction::Proceed),
        "r" | "retry" => Some(SessionAction::Retry),
        "a" | "abort" => Some(SessionAction::Abort {
            delete_remote: false,
        }),
        "abort!" | "abort --delete-remote" => Some(SessionAction::Abort {
            delete_remote: true,
        }),
        "d" | "detach" | "q" | "quit" => Some(SessionAction::Detach),
        _ => None,
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
    /// Directory the release runs in
    pub work_dir: PathBuf,
    /// Explicit settings file
    pub settings_path: Option<PathBuf>,
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        let work_dir = args
            .work_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            output: super::OutputManager::new(args.verbose, args.quiet),
            work_dir,
            settings_path: args.config.clone(),
        }
    }
}

impl RuntimeConfig {
    /// Get a reference to the output manager
    pub fn output(&self) -> &super::OutputManager {
        &self.output
    }

    /// Print message
    pub fn println(&self, message: &str) {
        let _ = self.output.println(message);
    }

    /// Print verbose message
    pub fn verbose_println(&self, message: &str) {
        let _ = self.output.verbose(message);
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print warning message
    pub fn warning_println(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Print success message
    pub fn success_println(&self, message: &str) {
        let _ = self.output.success(message);
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        let _ = self.output.indent(message);
    }

    /// Check if quiet output is enabled
    pub fn is_quiet(&self) -> bool {
        self.output.is_quiet()
    }

    /// Check if verbose output is enabled
    pub fn is_verbose(&self) -> bool {
        self.output.is_verbose()
    }
}
