//! Core data models shared by the indexing pipeline and the retrieval engine.
//!
//! These types describe managed repositories, the chunks parsed out of their
//! files, the audit records emitted while indexing and serving queries, and
//! the caller identity that access filtering is evaluated against.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a managed repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepoStatus {
    Active,
    Indexing,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Active => "ACTIVE",
            RepoStatus::Indexing => "INDEXING",
            RepoStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(RepoStatus::Active),
            "INDEXING" => Ok(RepoStatus::Indexing),
            "ERROR" => Ok(RepoStatus::Error),
            other => Err(format!("unknown repository status: {}", other)),
        }
    }
}

/// Visibility label attached to every chunk.
///
/// Ordered from least to most sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessGroup {
    Public,
    Internal,
    Restricted,
}

impl AccessGroup {
    pub const ALL: [AccessGroup; 3] = [
        AccessGroup::Public,
        AccessGroup::Internal,
        AccessGroup::Restricted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessGroup::Public => "PUBLIC",
            AccessGroup::Internal => "INTERNAL",
            AccessGroup::Restricted => "RESTRICTED",
        }
    }
}

impl fmt::Display for AccessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PUBLIC" => Ok(AccessGroup::Public),
            "INTERNAL" => Ok(AccessGroup::Internal),
            "RESTRICTED" => Ok(AccessGroup::Restricted),
            other => Err(format!(
                "unknown access group: '{}'. Use public, internal, or restricted.",
                other
            )),
        }
    }
}

/// A single path → access group classification rule.
///
/// Rules are evaluated in order; the first whose glob matches the
/// repository-relative path decides the group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    pub pattern: String,
    pub group: AccessGroup,
}

/// A managed repository root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    /// Deterministic id derived from `name` (see [`crate::access::derive_repo_id`]).
    pub id: String,
    pub name: String,
    pub root_path: PathBuf,
    /// Case-sensitive globs; matching paths are never indexed.
    pub ignore_patterns: Vec<String>,
    pub access_rules: Vec<AccessRule>,
    pub default_access: AccessGroup,
    pub status: RepoStatus,
    /// Reindex progress in `0..=100`, `None` when no reindex is running.
    pub progress: Option<u8>,
    pub file_count: u64,
    pub chunk_count: u64,
    pub last_indexed_at: Option<DateTime<Utc>>,
    /// Reason for the last transition into [`RepoStatus::Error`].
    pub last_error: Option<String>,
}

/// Semantic unit kind produced by the parsers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Module,
    Section,
    Page,
    ListItem,
    Paragraph,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "FUNCTION",
            ChunkKind::Class => "CLASS",
            ChunkKind::Method => "METHOD",
            ChunkKind::Module => "MODULE",
            ChunkKind::Section => "SECTION",
            ChunkKind::Page => "PAGE",
            ChunkKind::ListItem => "LIST_ITEM",
            ChunkKind::Paragraph => "PARAGRAPH",
        }
    }

    /// Lowercase words folded into a chunk's lexical terms, so that a
    /// query for "function" or "list item" hits chunks of that kind.
    pub fn label(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Module => "module",
            ChunkKind::Section => "section",
            ChunkKind::Page => "page",
            ChunkKind::ListItem => "list item",
            ChunkKind::Paragraph => "paragraph",
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUNCTION" => Ok(ChunkKind::Function),
            "CLASS" => Ok(ChunkKind::Class),
            "METHOD" => Ok(ChunkKind::Method),
            "MODULE" => Ok(ChunkKind::Module),
            "SECTION" => Ok(ChunkKind::Section),
            "PAGE" => Ok(ChunkKind::Page),
            "LIST_ITEM" => Ok(ChunkKind::ListItem),
            "PARAGRAPH" => Ok(ChunkKind::Paragraph),
            other => Err(format!("unknown chunk kind: {}", other)),
        }
    }
}

/// Where a chunk sits inside its source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Span {
    /// 1-based inclusive line range (source code, plain text).
    Lines { start_line: u32, end_line: u32 },
    /// 1-based PDF page.
    Page { page_number: u32 },
    /// Header-delimited document section with its line range.
    Section {
        title: String,
        start_line: u32,
        end_line: u32,
    },
}

impl Span {
    /// Stable textual key used when deriving chunk ids.
    pub fn key(&self) -> String {
        match self {
            Span::Lines {
                start_line,
                end_line,
            } => format!("L{}-{}", start_line, end_line),
            Span::Page { page_number } => format!("P{}", page_number),
            Span::Section {
                title,
                start_line,
                end_line,
            } => format!("S{}:L{}-{}", title, start_line, end_line),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Span::Lines {
                start_line,
                end_line,
            } => write!(f, "lines {}-{}", start_line, end_line),
            Span::Page { page_number } => write!(f, "page {}", page_number),
            Span::Section {
                title,
                start_line,
                end_line,
            } => write!(f, "section \"{}\" (lines {}-{})", title, start_line, end_line),
        }
    }
}

/// The atomic retrievable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id derived from repo, path, kind, span, and content hash.
    pub id: String,
    pub repo_id: String,
    /// Repository-relative path using `/` separators.
    pub source_path: String,
    pub kind: ChunkKind,
    pub span: Span,
    /// Identifier of the function/class/method, or the section title.
    pub symbol: Option<String>,
    pub language: Option<String>,
    pub content: String,
    /// SHA-256 of `content`.
    pub content_hash: String,
    pub access_group: AccessGroup,
    /// Empty when no embedding is available for this chunk.
    #[serde(default, skip_serializing)]
    pub dense_vector: Vec<f32>,
}

impl Chunk {
    /// Text fed to the lexical tokenizer: content plus the kind label,
    /// symbol name, and path segments.
    pub fn lexical_text(&self) -> String {
        let mut text = String::with_capacity(self.content.len() + 64);
        text.push_str(self.kind.label());
        text.push(' ');
        if let Some(symbol) = &self.symbol {
            text.push_str(symbol);
            text.push(' ');
        }
        text.push_str(&self.source_path);
        text.push('\n');
        text.push_str(&self.content);
        text
    }

    /// Resource URI used in access-log entries.
    pub fn resource_uri(&self) -> String {
        match &self.span {
            Span::Page { page_number } => format!(
                "doc://{}/{}#page={}",
                self.repo_id, self.source_path, page_number
            ),
            _ => format!("code://{}/{}", self.repo_id, self.source_path),
        }
    }

    /// First `max_chars` characters of the content, for display.
    pub fn snippet(&self, max_chars: usize) -> String {
        self.content.chars().take(max_chars).collect()
    }
}

/// Kind of watcher/pipeline action recorded in the index event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexEventKind {
    Create,
    Modify,
    Delete,
    Skip,
    AstParse,
    DocExtract,
}

impl fmt::Display for IndexEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexEventKind::Create => "CREATE",
            IndexEventKind::Modify => "MODIFY",
            IndexEventKind::Delete => "DELETE",
            IndexEventKind::Skip => "SKIP",
            IndexEventKind::AstParse => "AST_PARSE",
            IndexEventKind::DocExtract => "DOC_EXTRACT",
        };
        f.write_str(s)
    }
}

/// Audit record of a single watcher action. Observability only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEvent {
    pub timestamp: DateTime<Utc>,
    pub repo_id: String,
    pub file: String,
    pub kind: IndexEventKind,
    pub detail: String,
}

impl IndexEvent {
    pub fn new(
        repo_id: impl Into<String>,
        file: impl Into<String>,
        kind: IndexEventKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            repo_id: repo_id.into(),
            file: file.into(),
            kind,
            detail: detail.into(),
        }
    }
}

/// Caller role, resolved from an external credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Developer,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Developer => "DEVELOPER",
            Role::Viewer => "VIEWER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "DEVELOPER" => Ok(Role::Developer),
            "VIEWER" => Ok(Role::Viewer),
            other => Err(format!(
                "unknown role: '{}'. Use admin, developer, or viewer.",
                other
            )),
        }
    }
}

/// Identity a request is evaluated against. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPrincipal {
    /// Display name for audit entries (e.g. `"local-user"`).
    pub subject: String,
    pub role: Role,
    pub scopes: BTreeSet<String>,
}

impl AccessPrincipal {
    pub fn new(subject: impl Into<String>, role: Role) -> Self {
        Self {
            subject: subject.into(),
            role,
            scopes: BTreeSet::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes.extend(scopes.into_iter().map(Into::into));
        self
    }
}

/// Which retrieval path produced a result's final score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchType {
    Dense,
    Lexical,
    Hybrid,
    Reranked,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MatchType::Dense => "DENSE",
            MatchType::Lexical => "LEXICAL",
            MatchType::Hybrid => "HYBRID",
            MatchType::Reranked => "RERANKED",
        };
        f.write_str(s)
    }
}

/// A ranked search hit. Request-scoped; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub score: f64,
    pub match_type: MatchType,
    pub chunk: Chunk,
}

/// Outcome recorded for an access-controlled action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessStatus {
    Granted,
    Denied,
}

/// Action names used in the access log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessAction {
    Search,
    ReadResource,
    Reindex,
}

impl fmt::Display for AccessAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccessAction::Search => "SEARCH",
            AccessAction::ReadResource => "READ_RESOURCE",
            AccessAction::Reindex => "REINDEX",
        };
        f.write_str(s)
    }
}

/// Audit record of a search or resource read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub principal: String,
    pub role: Role,
    pub action: AccessAction,
    pub resource: String,
    pub status: AccessStatus,
    pub reason: Option<String>,
}
