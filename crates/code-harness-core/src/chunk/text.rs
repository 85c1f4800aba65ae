//! Paragraph-boundary splitter for plain text and oversized document
//! sections.
//!
//! # Algorithm
//!
//! 1. Convert `max_tokens` to `max_chars` using a 4 chars/token ratio.
//! 2. Group consecutive non-blank lines into paragraphs.
//! 3. Accumulate paragraphs into a buffer until adding the next one would
//!    exceed `max_chars`, then flush.
//! 4. A paragraph larger than `max_chars` is split on line boundaries; a
//!    single overlong line is hard-split at the last space before the limit.
//!
//! Every piece keeps the 1-based line range it came from.

use crate::error::Result;
use crate::models::{ChunkKind, Span};

use super::{decode, ChunkDraft, Chunker};

/// Approximate characters-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// A contiguous run of text with its line range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Piece {
    pub start_line: u32,
    pub end_line: u32,
    pub text: String,
}

/// Split `text`, whose first line is `first_line`, into pieces of at most
/// roughly `max_tokens` tokens.
pub fn split_paragraphs(text: &str, first_line: u32, max_tokens: usize) -> Vec<Piece> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let mut pieces = Vec::new();
    let mut buf: Option<Piece> = None;

    for para in paragraphs(text, first_line) {
        let would_be = match &buf {
            Some(b) => b.text.len() + 2 + para.text.len(),
            None => para.text.len(),
        };
        if would_be > max_chars {
            if let Some(b) = buf.take() {
                pieces.push(b);
            }
        }

        if para.text.len() > max_chars {
            pieces.extend(split_oversized(para, max_chars));
            continue;
        }

        match &mut buf {
            Some(b) => {
                b.text.push_str("\n\n");
                b.text.push_str(&para.text);
                b.end_line = para.end_line;
            }
            None => buf = Some(para),
        }
    }

    if let Some(b) = buf {
        pieces.push(b);
    }
    pieces
}

/// Consecutive non-blank lines, trimmed at the ends.
fn paragraphs(text: &str, first_line: u32) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut current: Option<Piece> = None;
    for (idx, line) in text.lines().enumerate() {
        let line_no = first_line + idx as u32;
        if line.trim().is_empty() {
            if let Some(p) = current.take() {
                out.push(p);
            }
            continue;
        }
        match &mut current {
            Some(p) => {
                p.text.push('\n');
                p.text.push_str(line.trim_end());
                p.end_line = line_no;
            }
            None => {
                current = Some(Piece {
                    start_line: line_no,
                    end_line: line_no,
                    text: line.trim_end().to_string(),
                })
            }
        }
    }
    if let Some(p) = current {
        out.push(p);
    }
    out
}

fn split_oversized(para: Piece, max_chars: usize) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut buf: Option<Piece> = None;
    for (idx, line) in para.text.lines().enumerate() {
        let line_no = para.start_line + idx as u32;
        if line.len() > max_chars {
            if let Some(b) = buf.take() {
                out.push(b);
            }
            for part in hard_split(line, max_chars) {
                out.push(Piece {
                    start_line: line_no,
                    end_line: line_no,
                    text: part.to_string(),
                });
            }
            continue;
        }
        if let Some(b) = &buf {
            if b.text.len() + 1 + line.len() > max_chars {
                if let Some(b) = buf.take() {
                    out.push(b);
                }
            }
        }
        match &mut buf {
            Some(b) => {
                b.text.push('\n');
                b.text.push_str(line);
                b.end_line = line_no;
            }
            None => {
                buf = Some(Piece {
                    start_line: line_no,
                    end_line: line_no,
                    text: line.to_string(),
                })
            }
        }
    }
    if let Some(b) = buf {
        out.push(b);
    }
    out
}

/// Split a single line into non-empty pieces no longer than `max_chars`
/// bytes, preferring space boundaries.
fn hard_split(line: &str, max_chars: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut remaining = line;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            parts.push(remaining);
            break;
        }
        let limit = snap_to_char_boundary(remaining, max_chars);
        let split_at = remaining[..limit]
            .rfind(' ')
            .map(|pos| pos + 1)
            .unwrap_or(limit);
        let split_at = if split_at == 0 {
            remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len())
        } else {
            split_at
        };
        let piece = remaining[..split_at].trim();
        if !piece.is_empty() {
            parts.push(piece);
        }
        remaining = &remaining[split_at..];
    }
    parts
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Plain text files: one `PARAGRAPH` chunk per piece.
pub struct TextChunker {
    max_tokens: usize,
}

impl TextChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

impl Chunker for TextChunker {
    fn label(&self) -> &'static str {
        "text"
    }

    fn chunk(&self, _path: &str, bytes: &[u8]) -> Result<Vec<ChunkDraft>> {
        let text = decode(bytes);
        Ok(split_paragraphs(&text, 1, self.max_tokens)
            .into_iter()
            .map(|p| ChunkDraft {
                kind: ChunkKind::Paragraph,
                span: Span::Lines {
                    start_line: p.start_line,
                    end_line: p.end_line,
                },
                symbol: None,
                content: p.text,
            })
            .collect())
    }
}
