//! Case-sensitive glob matching of repository-relative paths.
//!
//! A path matches a pattern when the pattern matches the path itself or any
//! of its ancestor directories. Patterns without a `/` float, so `dist`
//! excludes `dist/app.js` and `web/dist/app.js` alike, while
//! `node_modules/**` and `*.log` behave as ordinary globs.

use globset::{Glob, GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::{HarnessError, Result};

/// Compiled set of ignore patterns for one repository.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    patterns: Vec<String>,
    set: GlobSet,
}

impl IgnoreMatcher {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            for glob in compile(pattern)? {
                builder.add(glob);
            }
        }
        let set = builder.build().map_err(|e| HarnessError::InvalidPattern {
            pattern: patterns.join(","),
            reason: e.to_string(),
        })?;
        Ok(Self {
            patterns: patterns.to_vec(),
            set,
        })
    }

    pub fn empty() -> Self {
        Self {
            patterns: Vec::new(),
            set: GlobSet::empty(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// True if `rel_path` (using `/` separators) should never be indexed.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        if self.set.is_empty() {
            return false;
        }
        candidates(rel_path).any(|c| self.set.is_match(c))
    }
}

/// Compile one user pattern into the globs that implement it.
pub(crate) fn compile(pattern: &str) -> Result<Vec<Glob>> {
    let pattern = pattern.trim().trim_start_matches("./").trim_end_matches('/');
    if pattern.is_empty() {
        return Err(HarnessError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "empty pattern".to_string(),
        });
    }
    let build = |p: &str| {
        GlobBuilder::new(p)
            .case_insensitive(false)
            .literal_separator(false)
            .build()
            .map_err(|e| HarnessError::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })
    };
    let mut globs = vec![build(pattern)?];
    if !pattern.contains('/') {
        globs.push(build(&format!("**/{}", pattern))?);
    }
    Ok(globs)
}

/// The path itself followed by each ancestor prefix, deepest first.
pub(crate) fn candidates(rel_path: &str) -> impl Iterator<Item = &str> {
    let rel_path = rel_path.trim_start_matches("./").trim_start_matches('/');
    let ancestors = rel_path
        .match_indices('/')
        .map(|(i, _)| &rel_path[..i])
        .collect::<Vec<_>>();
    std::iter::once(rel_path).chain(ancestors.into_iter().rev())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(patterns: &[&str]) -> IgnoreMatcher {
        let owned: Vec<String> = patterns.iter().map(|s| s.to_string()).collect();
        IgnoreMatcher::new(&owned).unwrap()
    }

    #[test]
    fn node_modules_glob_skips_nested_files() {
        let m = matcher(&["node_modules/**"]);
        assert!(m.is_ignored("node_modules/lodash/index.js"));
        assert!(!m.is_ignored("src/index.js"));
    }

    #[test]
    fn bare_directory_name_floats() {
        let m = matcher(&["dist", ".git"]);
        assert!(m.is_ignored("dist/app.js"));
        assert!(m.is_ignored("web/dist/app.js"));
        assert!(m.is_ignored(".git/HEAD"));
        assert!(!m.is_ignored("distribution/app.js"));
    }

    #[test]
    fn extension_glob_matches_any_depth() {
        let m = matcher(&["*.log"]);
        assert!(m.is_ignored("server.log"));
        assert!(m.is_ignored("logs/2024/server.log"));
        assert!(!m.is_ignored("logger.go"));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let m = matcher(&["*.log", "Build"]);
        assert!(!m.is_ignored("server.LOG"));
        assert!(m.is_ignored("Build/out.o"));
        assert!(!m.is_ignored("build/out.o"));
    }

    #[test]
    fn empty_matcher_ignores_nothing() {
        assert!(!IgnoreMatcher::empty().is_ignored("anything/at/all"));
        assert!(!matcher(&[]).is_ignored("a.go"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = IgnoreMatcher::new(&["src/[".to_string()]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPattern { .. }));
        let err = IgnoreMatcher::new(&["  ".to_string()]).unwrap_err();
        assert!(matches!(err, HarnessError::InvalidPattern { .. }));
    }

    #[test]
    fn candidates_walk_ancestors() {
        let all: Vec<&str> = candidates("a/b/c.go").collect();
        assert_eq!(all, vec!["a/b/c.go", "a/b", "a"]);
    }
}
