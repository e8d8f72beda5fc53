//! Exact git command lines for every release step.
//!
//! Nothing here touches the filesystem or spawns processes; the engine hands
//! the returned lines to the PTY runner. Every command is written so that
//! running it twice is harmless (`checkout -B`, `tag -f`, merges that are
//! already merged report "Already up to date").

use crate::state::{Environment, ReleaseState};

/// Paths per `git checkout`/`git rm` invocation when restoring excluded paths
const PATHS_PER_COMMAND: usize = 64;

/// Name of the cumulative source branch for a version
pub fn source_branch_name(version: &str) -> String {
    format!("release/rpb-{}-root", version)
}

/// Name of the environment release branch
pub fn env_release_branch_name(version: &str, environment: &Environment) -> String {
    format!("release/rpb-{}-{}", version, environment.branch_name)
}

/// Release tag, `{envNameLower}-{version}-v{N}`
pub fn tag_name(environment: &Environment, version: &str, number: u32) -> String {
    format!(
        "{}-{}-v{}",
        environment.name.to_lowercase(),
        version,
        number
    )
}

/// Commit title, `release:{version} {envBranchSuffix} v{N}`
pub fn commit_title(version: &str, environment: &Environment, number: u32) -> String {
    format!("release:{} {} v{}", version, environment.branch_name, number)
}

/// Commit body: merged branch names, one per line
pub fn commit_body(merged_branches: &[String]) -> String {
    merged_branches.join("\n")
}

/// Quote a word for `sh -c`
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:@%+=,".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

fn join_quoted<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words
        .into_iter()
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Computes command lines for one release
#[derive(Debug, Clone)]
pub struct CommandSequencer {
    remote: String,
    base_branch: String,
    develop_branch: Option<String>,
    version: String,
    environment: Environment,
    source_branch: String,
    source_branch_is_remote: bool,
    mr_branches: Vec<String>,
}

impl CommandSequencer {
    /// Build a sequencer from the persisted release parameters
    pub fn from_state(state: &ReleaseState, remote: &str) -> Self {
        Self {
            remote: remote.to_string(),
            base_branch: state.base_branch.clone(),
            develop_branch: state.develop_branch.clone(),
            version: state.version.clone(),
            environment: state.environment.clone(),
            source_branch: state.source_branch.clone(),
            source_branch_is_remote: state.source_branch_is_remote,
            mr_branches: state.mr_branches.clone(),
        }
    }

    /// Environment release branch for this release
    pub fn env_release_branch(&self) -> String {
        env_release_branch_name(&self.version, &self.environment)
    }

    /// Remote-tracking ref of the environment branch
    pub fn remote_env_ref(&self) -> String {
        format!("{}/{}", self.remote, self.environment.branch_name)
    }

    /// Fetch everything the release needs
    pub fn fetch(&self) -> Vec<String> {
        vec![format!("git fetch {} --prune", shell_quote(&self.remote))]
    }

    /// Check out the source branch, creating it from the base branch unless
    /// it already exists on the remote
    pub fn checkout_source(&self) -> Vec<String> {
        let start_point = if self.source_branch_is_remote {
            format!("{}/{}", self.remote, self.source_branch)
        } else {
            format!("{}/{}", self.remote, self.base_branch)
        };
        vec![format!(
            "git checkout -B {} {}",
            shell_quote(&self.source_branch),
            shell_quote(&start_point)
        )]
    }

    /// Merge MR branch `index` into the source branch
    pub fn merge_branch(&self, index: usize) -> Option<Vec<String>> {
        let branch = self.mr_branches.get(index)?;
        Some(vec![format!(
            "git merge --no-ff --no-edit {}",
            shell_quote(&format!("{}/{}", self.remote, branch))
        )])
    }

    /// Conclude a merge whose conflicts the operator resolved
    pub fn continue_merge(&self) -> Vec<String> {
        vec!["git -c core.editor=true merge --continue".to_string()]
    }

    /// Check out the environment release branch from the remote environment branch
    pub fn checkout_env(&self) -> Vec<String> {
        vec![format!(
            "git checkout -B {} {}",
            shell_quote(&self.env_release_branch()),
            shell_quote(&self.remote_env_ref())
        )]
    }

    /// Replace the environment tree wholesale with the source tree
    pub fn copy_content(&self) -> Vec<String> {
        vec![
            format!("git checkout {}", shell_quote(&self.env_release_branch())),
            "git rm -r -q -f --ignore-unmatch -- .".to_string(),
            format!("git checkout {} -- .", shell_quote(&self.source_branch)),
        ]
    }

    /// Put excluded paths back: `restore` come from the environment release
    /// branch, `remove` did not exist there and are deleted
    pub fn restore_excluded(&self, restore: &[String], remove: &[String]) -> Vec<String> {
        let env_branch = self.env_release_branch();
        let mut commands = Vec::new();
        for chunk in restore.chunks(PATHS_PER_COMMAND) {
            commands.push(format!(
                "git checkout {} -- {}",
                shell_quote(&env_branch),
                join_quoted(chunk.iter().map(String::as_str))
            ));
        }
        for chunk in remove.chunks(PATHS_PER_COMMAND) {
            commands.push(format!(
                "git rm -q -f --ignore-unmatch -- {}",
                join_quoted(chunk.iter().map(String::as_str))
            ));
        }
        commands
    }

    /// Stage everything and commit with the generated title and body
    pub fn commit(&self, title: &str, body: &str) -> Vec<String> {
        let mut line = format!("git add -A && git commit -q -m {}", shell_quote(title));
        if !body.is_empty() {
            line.push_str(&format!(" -m {}", shell_quote(body)));
        }
        vec![line]
    }

    /// Throw away a rejected commit attempt and park the tree on the source
    /// branch so the operator can fix it there
    pub fn discard_rejected_commit(&self) -> Vec<String> {
        vec![
            "git reset -q --hard HEAD".to_string(),
            "git clean -f -d -q".to_string(),
            format!("git checkout {}", shell_quote(&self.source_branch)),
        ]
    }

    /// Annotated tag on the release commit
    pub fn tag(&self, tag: &str, title: &str) -> Vec<String> {
        vec![format!(
            "git tag -a -f {} -m {}",
            shell_quote(tag),
            shell_quote(title)
        )]
    }

    /// Push the environment release branch together with its tag
    pub fn push_env_with_tags(&self) -> Vec<String> {
        vec![format!(
            "git push -u {} {} --follow-tags",
            shell_quote(&self.remote),
            shell_quote(&self.env_release_branch())
        )]
    }

    /// Push the cumulative source branch
    pub fn push_source(&self) -> Vec<String> {
        vec![format!(
            "git push -u {} {}",
            shell_quote(&self.remote),
            shell_quote(&self.source_branch)
        )]
    }

    fn merge_source_into(&self, target: &str) -> Vec<String> {
        vec![
            format!(
                "git checkout -B {} {}",
                shell_quote(target),
                shell_quote(&format!("{}/{}", self.remote, target))
            ),
            format!(
                "git merge --no-ff --no-edit {}",
                shell_quote(&self.source_branch)
            ),
            format!("git push {} {}", shell_quote(&self.remote), shell_quote(target)),
        ]
    }

    /// Merge the source branch back into the base branch and push it
    pub fn merge_to_root(&self) -> Vec<String> {
        self.merge_source_into(&self.base_branch)
    }

    /// Merge the source branch into develop, if one is configured
    pub fn merge_to_develop(&self) -> Vec<String> {
        match &self.develop_branch {
            Some(develop) if develop != &self.base_branch => self.merge_source_into(develop),
            _ => Vec::new(),
        }
    }

    /// Return to the base branch
    pub fn switch_to_root(&self) -> Vec<String> {
        vec![format!("git checkout {}", shell_quote(&self.base_branch))]
    }

    /// Abandon an in-progress merge
    pub fn abort_merge(&self) -> Vec<String> {
        vec!["git merge --abort".to_string()]
    }

    /// Hard reset and delete the branches this release created locally
    pub fn abort_local(&self, tag: Option<&str>) -> Vec<String> {
        let mut commands = vec![
            "git reset -q --hard".to_string(),
            format!("git checkout {}", shell_quote(&self.base_branch)),
            format!("git branch -D {}", shell_quote(&self.env_release_branch())),
            format!("git branch -D {}", shell_quote(&self.source_branch)),
        ];
        if let Some(tag) = tag {
            commands.push(format!("git tag -d {}", shell_quote(tag)));
        }
        commands
    }

    /// Delete what was pushed. The source branch is only deleted when this
    /// release created it.
    pub fn abort_remote(
        &self,
        env_pushed: bool,
        source_pushed: bool,
        tag: Option<&str>,
    ) -> Vec<String> {
        let remote = shell_quote(&self.remote);
        let mut commands = Vec::new();
        if env_pushed {
            commands.push(format!(
                "git push {} --delete {}",
                remote,
                shell_quote(&self.env_release_branch())
            ));
            if let Some(tag) = tag {
                commands.push(format!(
                    "git push {} --delete {}",
                    remote,
                    shell_quote(&format!("refs/tags/{}", tag))
                ));
            }
        }
        if source_pushed && !self.source_branch_is_remote {
            commands.push(format!(
                "git push {} --delete {}",
                remote,
                shell_quote(&self.source_branch)
            ));
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequencer(source_is_remote: bool) -> CommandSequencer {
        CommandSequencer {
            remote: "origin".to_string(),
            base_branch: "main".to_string(),
            develop_branch: Some("dev".to_string()),
            version: "2.0.0".to_string(),
            environment: Environment::new("DEVELOP", "develop"),
            source_branch: source_branch_name("2.0.0"),
            source_branch_is_remote: source_is_remote,
            mr_branches: vec!["feat/a".to_string(), "feat/b".to_string()],
        }
    }

    #[test]
    fn test_naming_is_deterministic() {
        let env = Environment::new("DEVELOP", "develop");
        assert_eq!(source_branch_name("2.0.0"), "release/rpb-2.0.0-root");
        assert_eq!(env_release_branch_name("2.0.0", &env), "release/rpb-2.0.0-develop");
        assert_eq!(tag_name(&env, "2.0.0", 3), "develop-2.0.0-v3");
        assert_eq!(commit_title("2.0.0", &env, 3), "release:2.0.0 develop v3");
    }

    #[test]
    fn test_checkout_source_depends_on_remote_existence() {
        assert_eq!(
            sequencer(false).checkout_source(),
            vec!["git checkout -B release/rpb-2.0.0-root origin/main"]
        );
        assert_eq!(
            sequencer(true).checkout_source(),
            vec!["git checkout -B release/rpb-2.0.0-root origin/release/rpb-2.0.0-root"]
        );
    }

    #[test]
    fn test_merge_branch_by_index() {
        let seq = sequencer(false);
        assert_eq!(
            seq.merge_branch(1).unwrap(),
            vec!["git merge --no-ff --no-edit origin/feat/b"]
        );
        assert!(seq.merge_branch(2).is_none());
    }

    #[test]
    fn test_commit_quotes_title_and_body() {
        let seq = sequencer(false);
        let body = commit_body(&["feat/a".to_string(), "feat/b".to_string()]);
        assert_eq!(
            seq.commit("release:2.0.0 develop v1", &body),
            vec!["git add -A && git commit -q -m 'release:2.0.0 develop v1' -m 'feat/a\nfeat/b'"]
        );
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain/path.ts"), "plain/path.ts");
        assert_eq!(shell_quote("it's here"), r"'it'\''s here'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_restore_excluded_batches_paths() {
        let seq = sequencer(false);
        let restore: Vec<String> = (0..70).map(|i| format!("cfg/{i}.json")).collect();
        let commands = seq.restore_excluded(&restore, &["only-root.txt".to_string()]);
        assert_eq!(commands.len(), 3);
        assert!(commands[0].starts_with("git checkout release/rpb-2.0.0-develop -- cfg/0.json"));
        assert_eq!(commands[2], "git rm -q -f --ignore-unmatch -- only-root.txt");
    }

    #[test]
    fn test_abort_remote_never_deletes_preexisting_source() {
        let seq = sequencer(true);
        let commands = seq.abort_remote(true, true, Some("develop-2.0.0-v1"));
        assert_eq!(
            commands,
            vec![
                "git push origin --delete release/rpb-2.0.0-develop",
                "git push origin --delete refs/tags/develop-2.0.0-v1",
            ]
        );
    }

    #[test]
    fn test_merge_to_develop_skipped_without_develop() {
        let mut seq = sequencer(false);
        assert_eq!(seq.merge_to_develop().len(), 3);
        seq.develop_branch = None;
        assert!(seq.merge_to_develop().is_empty());
    }
}
