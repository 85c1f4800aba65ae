//! Credential resolution.
//!
//! Maps an inbound bearer credential to an [`AccessPrincipal`]. Everything
//! downstream trusts the resolved role and never sees the raw token.

use std::collections::HashMap;

use code_harness_core::error::{HarnessError, Result};
use code_harness_core::models::{AccessPrincipal, Role};

use crate::config::AuthConfig;

/// Subject used for local callers that present no credential.
pub const LOCAL_SUBJECT: &str = "local-user";

pub trait CredentialResolver: Send + Sync {
    /// Resolve `credential`. `None` means a local, unauthenticated caller.
    fn resolve(&self, credential: Option<&str>) -> Result<AccessPrincipal>;
}

/// Resolves tokens from the `[[auth.tokens]]` table.
///
/// Local callers without a token get `local-user` with role ADMIN.
pub struct StaticTokenResolver {
    tokens: HashMap<String, AccessPrincipal>,
}

impl StaticTokenResolver {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let mut tokens = HashMap::new();
        for entry in &config.tokens {
            let role: Role = entry.role.parse().map_err(|e: String| HarnessError::InvalidPattern {
                pattern: entry.role.clone(),
                reason: e,
            })?;
            tokens.insert(
                entry.token.clone(),
                AccessPrincipal::new(entry.subject.clone(), role).with_scopes(entry.scopes.clone()),
            );
        }
        Ok(Self { tokens })
    }
}

impl CredentialResolver for StaticTokenResolver {
    fn resolve(&self, credential: Option<&str>) -> Result<AccessPrincipal> {
        match credential {
            None => Ok(AccessPrincipal::new(LOCAL_SUBJECT, Role::Admin)),
            Some(token) => self
                .tokens
                .get(token)
                .cloned()
                .ok_or_else(|| HarnessError::AccessDenied("unrecognized credential".to_string())),
        }
    }
}
