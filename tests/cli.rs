//! Binary-level tests for the command line surface

#[cfg(test)]
mod tests {
    use assert_cmd::Command;
    use predicates::prelude::*;
    use std::path::Path;

    /// The binary isolated from the user's config and any enclosing repository
    fn rpb(home: &Path) -> Command {
        let mut cmd = Command::cargo_bin("rpb_release").unwrap();
        cmd.env("HOME", home)
            .env("XDG_CONFIG_HOME", home.join("config"))
            .env("RPB_HISTORY_DIR", home.join("history"))
            .env("GIT_CEILING_DIRECTORIES", home)
            .env_remove("RPB_CONFIG")
            .arg("-C")
            .arg(home);
        cmd
    }

    #[test]
    fn test_help_lists_commands() {
        let dir = tempfile::tempdir().unwrap();
        rpb(dir.path())
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("start"))
            .stdout(predicate::str::contains("proceed"))
            .stdout(predicate::str::contains("history"));
    }

    #[test]
    fn test_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        rpb(dir.path())
            .arg("history")
            .assert()
            .success()
            .stdout(predicate::str::contains("No releases recorded"));
    }

    #[test]
    fn test_malformed_merge_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        rpb(dir.path())
            .args(["start", "2.0.0", "--env", "develop", "--mr", "feature/login"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("is not IID:BRANCH"));
    }

    #[test]
    fn test_start_requires_merge_requests() {
        let dir = tempfile::tempdir().unwrap();
        rpb(dir.path())
            .args(["start", "2.0.0", "--env", "develop"])
            .assert()
            .failure();
    }

    #[test]
    fn test_status_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        rpb(dir.path())
            .arg("status")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Command 'status' failed"));
    }

    #[test]
    fn test_unknown_history_entry() {
        let dir = tempfile::tempdir().unwrap();
        rpb(dir.path())
            .args(["history", "show", "20260101-000000-nope"])
            .assert()
            .code(1);
    }
}
