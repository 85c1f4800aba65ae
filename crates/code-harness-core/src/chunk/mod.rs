//! File parsing into semantic chunks.
//!
//! [`Parser::parse`] selects a [`Chunker`] for the file category (source
//! code, Markdown, PDF, plain text) by extension and content sniffing, runs
//! it, and stamps every resulting draft with a content hash and a stable id.
//!
//! # Identity
//!
//! A chunk id is a UUID built from the SHA-256 of
//! `repo_id / source_path / kind / span / content_hash`. Identical bytes at
//! the same path always produce identical ids, so re-parsing an unchanged
//! file never churns the store or the embedder.
//!
//! # Failure policy
//!
//! Binary or corrupt input yields [`HarnessError::Parse`]. Callers log it
//! and treat the file as having zero chunks.

pub mod code;
pub mod markdown;
pub mod pdf;
pub mod text;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{HarnessError, Result};
use crate::models::{AccessGroup, Chunk, ChunkKind, Span};

pub use code::Language;

/// Bytes inspected when sniffing for binary content.
const SNIFF_LEN: usize = 8192;

/// A chunk before identity and ownership are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub kind: ChunkKind,
    pub span: Span,
    pub symbol: Option<String>,
    pub content: String,
}

/// Capability interface implemented once per file category.
pub trait Chunker: Send + Sync {
    /// Short label used in logs and index events (`"go"`, `"markdown"`, ...).
    fn label(&self) -> &'static str;

    /// True for document formats (Markdown, PDF) as opposed to source code.
    fn is_document(&self) -> bool {
        false
    }

    fn chunk(&self, path: &str, bytes: &[u8]) -> Result<Vec<ChunkDraft>>;
}

/// File category chosen for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Code(Language),
    Markdown,
    Pdf,
    Text,
}

const TEXT_EXTENSIONS: &[&str] = &[
    "txt", "text", "rst", "adoc", "toml", "yaml", "yml", "json", "ini", "cfg", "conf", "sh",
    "bash", "zsh", "sql", "html", "htm", "css", "scss", "c", "h", "cc", "cpp", "hpp", "cs", "rb",
    "php", "kt", "kts", "swift", "scala", "lua", "proto", "gradle", "xml", "graphql", "env",
];

const TEXT_FILENAMES: &[&str] = &["Makefile", "Dockerfile", "LICENSE", "README", "CHANGELOG"];

/// Pick the category for `path`, or `None` for unsupported files.
///
/// PDF is recognised by the `%PDF-` magic regardless of extension.
pub fn detect(path: &str, bytes: &[u8]) -> Option<FileCategory> {
    if bytes.starts_with(b"%PDF-") {
        return Some(FileCategory::Pdf);
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    if let Some(language) = Language::from_extension(&ext) {
        return Some(FileCategory::Code(language));
    }
    match ext.as_str() {
        "md" | "markdown" | "mdx" => Some(FileCategory::Markdown),
        "pdf" => Some(FileCategory::Pdf),
        e if TEXT_EXTENSIONS.contains(&e) => Some(FileCategory::Text),
        _ if TEXT_FILENAMES.contains(&file_name) => Some(FileCategory::Text),
        _ => None,
    }
}

/// True when the leading bytes contain a NUL, the usual binary tell.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(SNIFF_LEN)].contains(&0)
}

/// Entry point used by the indexing pipeline.
#[derive(Debug, Clone)]
pub struct Parser {
    max_tokens: usize,
}

impl Parser {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens: max_tokens.max(1),
        }
    }

    pub fn chunker_for(&self, category: FileCategory) -> Box<dyn Chunker> {
        match category {
            FileCategory::Code(language) => Box::new(code::CodeChunker::new(language)),
            FileCategory::Markdown => Box::new(markdown::MarkdownChunker::new(self.max_tokens)),
            FileCategory::Pdf => Box::new(pdf::PdfChunker),
            FileCategory::Text => Box::new(text::TextChunker::new(self.max_tokens)),
        }
    }

    /// Parse `bytes` found at `path` inside repository `repo_id`.
    ///
    /// Returned chunks carry [`AccessGroup::Public`] and no vector; the
    /// pipeline stamps the resolved access group and embeddings.
    pub fn parse(&self, repo_id: &str, path: &str, bytes: &[u8]) -> Result<Vec<Chunk>> {
        let category = detect(path, bytes)
            .ok_or_else(|| HarnessError::parse(path, "unsupported file type"))?;
        if category != FileCategory::Pdf && looks_binary(bytes) {
            return Err(HarnessError::parse(path, "binary content"));
        }
        let chunker = self.chunker_for(category);
        let drafts = chunker.chunk(path, bytes)?;
        let language = match category {
            FileCategory::Code(language) => Some(language.name().to_string()),
            _ => None,
        };
        Ok(drafts
            .into_iter()
            .map(|draft| finalize(repo_id, path, language.clone(), draft))
            .collect())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new(700)
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable chunk id for the given identity tuple.
pub fn chunk_id(repo_id: &str, path: &str, kind: ChunkKind, span: &Span, hash: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [repo_id, path, kind.as_str(), &span.key(), hash] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

fn finalize(repo_id: &str, path: &str, language: Option<String>, draft: ChunkDraft) -> Chunk {
    let hash = content_hash(draft.content.as_bytes());
    Chunk {
        id: chunk_id(repo_id, path, draft.kind, &draft.span, &hash),
        repo_id: repo_id.to_string(),
        source_path: path.to_string(),
        kind: draft.kind,
        span: draft.span,
        symbol: draft.symbol,
        language,
        content: draft.content,
        content_hash: hash,
        access_group: AccessGroup::Public,
        dense_vector: Vec::new(),
    }
}

/// Decode UTF-8, replacing invalid sequences.
pub(crate) fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
