//! Exclude patterns for the wholesale content copy.
//!
//! Patterns are newline separated. A leading `/` anchors the pattern to the
//! project root; anything else may match at any depth, so it is tried against
//! every suffix of the path. `*` stays within one path segment, `**` spans
//! any number of segments and must be a segment of its own. A trailing `/`
//! means "everything below this directory".

use crate::error::ConfigError;
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone)]
enum Segment {
    /// `**`
    AnyDepth,
    /// A single-segment glob
    Glob(Pattern),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    anchored: bool,
    segments: Vec<Segment>,
}

impl CompiledPattern {
    fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidExcludePattern {
            pattern: raw.to_string(),
            reason: reason.to_string(),
        };

        let (anchored, body) = match raw.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        let (body, directory) = match body.strip_suffix('/') {
            Some(rest) => (rest, true),
            None => (body, false),
        };

        if body.is_empty() {
            return Err(invalid("pattern matches the whole project"));
        }

        let mut segments = Vec::new();
        for part in body.split('/') {
            if part.is_empty() {
                return Err(invalid("empty path segment"));
            }
            if part == "**" {
                if !matches!(segments.last(), Some(Segment::AnyDepth)) {
                    segments.push(Segment::AnyDepth);
                }
                continue;
            }
            if part.contains("**") {
                return Err(invalid("'**' must be a whole path segment"));
            }
            let glob = Pattern::new(part).map_err(|e| invalid(e.msg))?;
            segments.push(Segment::Glob(glob));
        }
        if directory && !matches!(segments.last(), Some(Segment::AnyDepth)) {
            segments.push(Segment::AnyDepth);
        }

        let everything = body
            .split('/')
            .all(|part| part == "*" || part == "**");
        if everything {
            return Err(invalid("pattern matches every path"));
        }

        Ok(Self { anchored, segments })
    }

    fn matches(&self, path: &[&str]) -> bool {
        if self.anchored {
            return match_segments(&self.segments, path);
        }
        (0..path.len()).any(|start| match_segments(&self.segments, &path[start..]))
    }
}

fn match_segments(pattern: &[Segment], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((Segment::AnyDepth, rest)) => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((Segment::Glob(glob), rest)) => match path.split_first() {
            Some((head, tail)) => glob.matches_with(head, MATCH_OPTIONS) && match_segments(rest, tail),
            None => false,
        },
    }
}

/// Compiled set of exclude patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeMatcher {
    patterns: Vec<CompiledPattern>,
}

impl ExcludeMatcher {
    /// Compile newline-separated patterns; blank lines and `#` comments are skipped
    pub fn compile(text: &str) -> Result<Self, ConfigError> {
        let patterns = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(CompiledPattern::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Reject broad or malformed patterns without keeping the result
    pub fn validate(text: &str) -> Result<(), ConfigError> {
        Self::compile(text).map(|_| ())
    }

    /// Whether no pattern was configured
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether a repository-relative path is excluded from the copy
    pub fn is_excluded(&self, path: &str) -> bool {
        let segments: Vec<&str> = path
            .trim_start_matches("./")
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        if segments.is_empty() {
            return false;
        }
        self.patterns.iter().any(|p| p.matches(&segments))
    }

    /// Split excluded paths into those to restore from the environment tree
    /// and those to delete because the environment tree never had them
    pub fn plan_restore(
        &self,
        source_files: &[String],
        env_files: &[String],
    ) -> (Vec<String>, Vec<String>) {
        let env: BTreeSet<&str> = env_files.iter().map(String::as_str).collect();
        let excluded: BTreeSet<&str> = source_files
            .iter()
            .chain(env_files.iter())
            .map(String::as_str)
            .filter(|path| self.is_excluded(path))
            .collect();

        let (restore, remove): (Vec<&str>, Vec<&str>) =
            excluded.into_iter().partition(|path| env.contains(path));
        (
            restore.into_iter().map(str::to_string).collect(),
            remove.into_iter().map(str::to_string).collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(text: &str) -> ExcludeMatcher {
        ExcludeMatcher::compile(text).unwrap()
    }

    #[test]
    fn test_unanchored_matches_any_depth() {
        let m = matcher("*.ts");
        assert!(m.is_excluded("src/app/foo.ts"));
        assert!(m.is_excluded("foo.ts"));
        assert!(!m.is_excluded("foo.ts.bak"));
    }

    #[test]
    fn test_anchored_matches_only_at_root() {
        let m = matcher("/node_modules/**");
        assert!(m.is_excluded("node_modules/a/b.js"));
        assert!(!m.is_excluded("vendor/node_modules/a/b.js"));
    }

    #[test]
    fn test_double_star_in_middle() {
        let m = matcher("config/**/secrets.yml");
        assert!(m.is_excluded("config/secrets.yml"));
        assert!(m.is_excluded("config/prod/eu/secrets.yml"));
        assert!(m.is_excluded("apps/web/config/dev/secrets.yml"));
        assert!(!m.is_excluded("config/prod/secrets.yml.tmpl"));
    }

    #[test]
    fn test_trailing_slash_is_directory() {
        let m = matcher("/deploy/");
        assert!(m.is_excluded("deploy/values.yaml"));
        assert!(!m.is_excluded("deployment.md"));
    }

    #[test]
    fn test_comments_and_blank_lines_skipped() {
        let m = matcher("# env specific\n\n/.env\n");
        assert!(m.is_excluded(".env"));
        assert!(!m.is_excluded("app/.env"));
    }

    #[test]
    fn test_broad_patterns_rejected() {
        for pattern in ["/", "*", "**", "*/", "/**", "**/*"] {
            assert!(
                ExcludeMatcher::validate(pattern).is_err(),
                "{pattern} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_wildcards_rejected() {
        for pattern in ["src/**.ts", "a***", "lib/[abc", "a//b"] {
            assert!(
                ExcludeMatcher::validate(pattern).is_err(),
                "{pattern} should be rejected"
            );
        }
    }

    #[test]
    fn test_plan_restore_partitions_by_env_presence() {
        let m = matcher("*.env\n/ci/**");
        let source = vec![
            "app.env".to_string(),
            "src/main.rs".to_string(),
            "ci/root-only.yml".to_string(),
        ];
        let env = vec!["app.env".to_string(), "ci/deploy.yml".to_string()];
        let (restore, remove) = m.plan_restore(&source, &env);
        assert_eq!(restore, vec!["app.env", "ci/deploy.yml"]);
        assert_eq!(remove, vec!["ci/root-only.yml"]);
    }
}
