// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeflow contributors

//! Branch patterns
//!
//! Branch names are matched like paths: `*` stays inside one `/` segment
//! and `**` spans any number of segments.

use glob::{MatchOptions, Pattern};

use crate::errors::{PipeflowError, PipeflowResult};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A compiled branch glob
#[derive(Debug, Clone)]
pub struct BranchPattern {
    pattern: Pattern,
}

impl BranchPattern {
    /// Compile a branch glob such as `release/*` or `feature/**`
    pub fn new(source: &str) -> PipeflowResult<Self> {
        let pattern = Pattern::new(source).map_err(|e| PipeflowError::BranchPattern {
            pattern: source.to_string(),
            message: e.msg.to_string(),
        })?;

        Ok(Self { pattern })
    }

    /// Whether a branch name matches
    pub fn matches(&self, branch: &str) -> bool {
        self.pattern.matches_with(branch, MATCH_OPTIONS)
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }
}

/// Whether any of the patterns matches the branch
pub fn matches_any(patterns: &[String], branch: &str) -> PipeflowResult<bool> {
    for source in patterns {
        if BranchPattern::new(source)?.matches(branch) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Branch name for a git ref (`refs/heads/main` → `main`)
pub fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, branch: &str) -> bool {
        BranchPattern::new(pattern).unwrap().matches(branch)
    }

    #[test]
    fn test_literal_branch() {
        assert!(matches("main", "main"));
        assert!(!matches("main", "maint"));
        assert!(!matches("main", "Main"));
    }

    #[test]
    fn test_single_segment_wildcard() {
        assert!(matches("release/*", "release/v1.2"));
        assert!(!matches("release/*", "release/v1/hotfix"));
        assert!(!matches("release/*", "release"));
    }

    #[test]
    fn test_multi_segment_wildcard() {
        assert!(matches("feature/**", "feature/login"));
        assert!(matches("feature/**", "feature/team/login"));
        assert!(matches("**", "any/depth/at/all"));
        assert!(!matches("feature/**", "bugfix/login"));
    }

    #[test]
    fn test_character_classes() {
        assert!(matches("v[0-9].x", "v2.x"));
        assert!(!matches("v[0-9].x", "vN.x"));
        assert!(matches("hotfix-?", "hotfix-1"));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            BranchPattern::new("release/***"),
            Err(PipeflowError::BranchPattern { .. })
        ));
    }

    #[test]
    fn test_branch_name_strips_heads_prefix() {
        assert_eq!(branch_name("refs/heads/release/v1"), "release/v1");
        assert_eq!(branch_name("main"), "main");
        assert_eq!(branch_name("refs/tags/v1.0.0"), "refs/tags/v1.0.0");
    }

    #[test]
    fn test_matches_any() {
        let patterns = vec!["main".to_string(), "release/**".to_string()];
        assert!(matches_any(&patterns, "release/2024/q1").unwrap());
        assert!(!matches_any(&patterns, "dev").unwrap());
        assert!(!matches_any(&[], "main").unwrap());
    }
}
