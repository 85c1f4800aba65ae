//! Access policy: role visibility, per-path classification, and repository
//! identity.

use globset::{GlobSet, GlobSetBuilder};

use crate::error::{HarnessError, Result};
use crate::ignore;
use crate::models::{AccessGroup, AccessRule, Role};

/// Access groups a role may see.
pub fn visible_groups(role: Role) -> &'static [AccessGroup] {
    match role {
        Role::Admin => &[
            AccessGroup::Public,
            AccessGroup::Internal,
            AccessGroup::Restricted,
        ],
        Role::Developer => &[AccessGroup::Public, AccessGroup::Internal],
        Role::Viewer => &[AccessGroup::Public],
    }
}

pub fn is_visible(role: Role, group: AccessGroup) -> bool {
    visible_groups(role).contains(&group)
}

/// Derive a repository id from its display name: lowercase, with runs of
/// whitespace collapsed to `-`.
pub fn derive_repo_id(name: &str) -> Result<String> {
    let id = name
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-");
    if id.is_empty() {
        return Err(HarnessError::InvalidPattern {
            pattern: name.to_string(),
            reason: "repository name must not be empty".to_string(),
        });
    }
    if id.contains('/') {
        return Err(HarnessError::InvalidPattern {
            pattern: name.to_string(),
            reason: "repository name must not contain '/'".to_string(),
        });
    }
    Ok(id)
}

/// Assigns an [`AccessGroup`] to repository-relative paths.
///
/// Rules are tried in order and the first match wins; unmatched paths get
/// the repository default.
#[derive(Debug, Clone)]
pub struct AccessClassifier {
    rules: Vec<(GlobSet, AccessGroup)>,
    default: AccessGroup,
}

impl AccessClassifier {
    pub fn new(rules: &[AccessRule], default: AccessGroup) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let mut builder = GlobSetBuilder::new();
            for glob in ignore::compile(&rule.pattern)? {
                builder.add(glob);
            }
            let set = builder.build().map_err(|e| HarnessError::InvalidPattern {
                pattern: rule.pattern.clone(),
                reason: e.to_string(),
            })?;
            compiled.push((set, rule.group));
        }
        Ok(Self {
            rules: compiled,
            default,
        })
    }

    pub fn classify(&self, rel_path: &str) -> AccessGroup {
        self.rules
            .iter()
            .find(|(set, _)| ignore::candidates(rel_path).any(|c| set.is_match(c)))
            .map(|(_, group)| *group)
            .unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_visibility_matches_policy() {
        assert_eq!(visible_groups(Role::Admin).len(), 3);
        assert!(is_visible(Role::Developer, AccessGroup::Internal));
        assert!(!is_visible(Role::Developer, AccessGroup::Restricted));
        assert!(is_visible(Role::Viewer, AccessGroup::Public));
        assert!(!is_visible(Role::Viewer, AccessGroup::Internal));
    }

    #[test]
    fn access_is_complete_over_all_pairs() {
        for role in [Role::Admin, Role::Developer, Role::Viewer] {
            for group in AccessGroup::ALL {
                let expected = match role {
                    Role::Admin => true,
                    Role::Developer => group != AccessGroup::Restricted,
                    Role::Viewer => group == AccessGroup::Public,
                };
                assert_eq!(is_visible(role, group), expected, "{role} / {group}");
            }
        }
    }

    #[test]
    fn repo_id_is_lowercase_and_dashed() {
        assert_eq!(derive_repo_id("Main Backend").unwrap(), "main-backend");
        assert_eq!(derive_repo_id("  Legacy   Monolith ").unwrap(), "legacy-monolith");
        assert_eq!(derive_repo_id("proj").unwrap(), "proj");
        assert!(derive_repo_id("   ").is_err());
        assert!(derive_repo_id("a/b").is_err());
    }

    #[test]
    fn first_matching_rule_wins() {
        let classifier = AccessClassifier::new(
            &[
                AccessRule {
                    pattern: "secrets/**".to_string(),
                    group: AccessGroup::Restricted,
                },
                AccessRule {
                    pattern: "internal".to_string(),
                    group: AccessGroup::Internal,
                },
                AccessRule {
                    pattern: "**/*.go".to_string(),
                    group: AccessGroup::Public,
                },
            ],
            AccessGroup::Internal,
        )
        .unwrap();
        assert_eq!(classifier.classify("secrets/keys.go"), AccessGroup::Restricted);
        assert_eq!(classifier.classify("pkg/internal/db.go"), AccessGroup::Internal);
        assert_eq!(classifier.classify("cmd/main.go"), AccessGroup::Public);
        assert_eq!(classifier.classify("README.md"), AccessGroup::Internal);
    }
}
