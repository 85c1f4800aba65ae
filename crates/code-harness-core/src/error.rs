//! Typed failures surfaced by registry, indexing, and retrieval operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors a caller can match on.
///
/// Per-file parse failures and collaborator failures are normally absorbed
/// and logged by the pipeline; they only surface here when an operation's
/// contract cannot be met.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("repository '{0}' already exists")]
    DuplicateRepository(String),

    #[error("repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("path inaccessible: {}", .0.display())]
    PathInaccessible(PathBuf),

    #[error("{collaborator} unavailable: {reason}")]
    CollaboratorUnavailable {
        collaborator: &'static str,
        reason: String,
    },

    #[error("index corruption in repository '{repo_id}': {detail}")]
    IndexCorruption { repo_id: String, detail: String },

    #[error("chunk '{0}' not found")]
    ChunkNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl HarnessError {
    pub fn parse(path: impl Into<String>, reason: impl ToString) -> Self {
        HarnessError::Parse {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unavailable(collaborator: &'static str, reason: impl ToString) -> Self {
        HarnessError::CollaboratorUnavailable {
            collaborator,
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;
