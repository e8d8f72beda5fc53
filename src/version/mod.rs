//! Release numbering.
//!
//! Release commits on an environment branch are titled
//! `release:{version} {envBranchSuffix} v{N}`. The next release of the same
//! version gets `N + 1`; a different version starts again at 1.

use regex::Regex;
use std::sync::LazyLock;

static RELEASE_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^release:(?P<version>\S+)\s+(?P<suffix>\S+)\s+v(?P<number>\d+)\b")
        .expect("release title regex is valid")
});

/// A parsed release commit title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseTitle {
    /// Version as written in the title
    pub version: String,
    /// Environment branch suffix
    pub suffix: String,
    /// Sequence number
    pub number: u32,
}

/// Parse a commit title written by a previous release
pub fn parse_release_title(title: &str) -> Option<ReleaseTitle> {
    let caps = RELEASE_TITLE_RE.captures(title.trim())?;
    Some(ReleaseTitle {
        version: caps["version"].to_string(),
        suffix: caps["suffix"].to_string(),
        number: caps["number"].parse().ok()?,
    })
}

/// Next sequence number given recent titles, newest first.
///
/// Only the newest release title counts: if it carries the same version the
/// number continues, otherwise (or with no release title at all) it is 1.
pub fn next_release_number<S: AsRef<str>>(titles: &[S], current_version: &str) -> u32 {
    titles
        .iter()
        .find_map(|title| parse_release_title(title.as_ref()))
        .filter(|parsed| versions_match(&parsed.version, current_version))
        .map(|parsed| parsed.number.saturating_add(1))
        .unwrap_or(1)
}

/// Canonical form: no `v` prefix, no leading zeros in numeric segments
pub fn normalize_version(version: &str) -> String {
    version_segments(version).join(".")
}

fn version_segments(version: &str) -> Vec<String> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    trimmed
        .split('.')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                let stripped = segment.trim_start_matches('0');
                if stripped.is_empty() { "0" } else { stripped }.to_string()
            } else {
                segment.to_ascii_lowercase()
            }
        })
        .collect()
}

/// Compare versions ignoring leading zeros. When one version has fewer
/// segments it matches if it is a prefix of the other (`4.5` ≡ `4.5.1`).
pub fn versions_match(a: &str, b: &str) -> bool {
    let a = version_segments(a);
    let b = version_segments(b);
    if a.iter().all(String::is_empty) || b.iter().all(String::is_empty) {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| x == y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_release_title() {
        let parsed = parse_release_title("release:1.2.0 dev v3").unwrap();
        assert_eq!(parsed.version, "1.2.0");
        assert_eq!(parsed.suffix, "dev");
        assert_eq!(parsed.number, 3);
        assert!(parse_release_title("Merge branch 'feat/a'").is_none());
        assert!(parse_release_title("release:1.2.0 dev").is_none());
    }

    #[test]
    fn test_next_number_continues_same_version() {
        let titles = ["release:1.2.0 dev v3"];
        assert_eq!(next_release_number(&titles, "1.2.0"), 4);
    }

    #[test]
    fn test_next_number_resets_for_new_version() {
        let titles = ["release:1.2.0 dev v3"];
        assert_eq!(next_release_number(&titles, "1.3.0"), 1);
    }

    #[test]
    fn test_next_number_defaults_to_one() {
        let titles: [&str; 2] = ["fix typo", "Merge branch 'x'"];
        assert_eq!(next_release_number(&titles, "1.2.0"), 1);
        assert_eq!(next_release_number::<&str>(&[], "1.2.0"), 1);
    }

    #[test]
    fn test_next_number_uses_newest_release_title() {
        let titles = [
            "hotfix applied",
            "release:4.05 stage v7",
            "release:4.5 stage v6",
        ];
        assert_eq!(next_release_number(&titles, "4.5"), 8);
    }

    #[test]
    fn test_versions_match_ignores_leading_zeros() {
        assert!(versions_match("4.05.01", "4.5.1"));
        assert!(versions_match("4.05", "4.5"));
    }

    #[test]
    fn test_versions_match_prefix_rule() {
        assert!(versions_match("4.5", "4.5.1"));
        assert!(!versions_match("4.6", "4.5.1"));
        assert!(!versions_match("", "4.5.1"));
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("v04.050.00"), "4.50.0");
        assert_eq!(normalize_version("1.2.0-RC1"), "1.2.0-rc1");
    }
}
