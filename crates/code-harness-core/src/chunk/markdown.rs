//! Markdown: one `SECTION` chunk per ATX heading.
//!
//! Text before the first heading becomes `PARAGRAPH` chunks. Sections
//! larger than the token limit are broken into `PARAGRAPH` and `LIST_ITEM`
//! pieces that keep the section title. Headings inside fenced code blocks
//! are ignored.

use crate::error::Result;
use crate::models::{ChunkKind, Span};

use super::text::{split_paragraphs, Piece};
use super::{decode, ChunkDraft, Chunker};

const CHARS_PER_TOKEN: usize = 4;

pub struct MarkdownChunker {
    max_tokens: usize,
}

impl MarkdownChunker {
    pub fn new(max_tokens: usize) -> Self {
        Self { max_tokens }
    }
}

struct Section {
    title: String,
    start_line: u32,
    end_line: u32,
    lines: Vec<String>,
}

impl Chunker for MarkdownChunker {
    fn label(&self) -> &'static str {
        "markdown"
    }

    fn is_document(&self) -> bool {
        true
    }

    fn chunk(&self, _path: &str, bytes: &[u8]) -> Result<Vec<ChunkDraft>> {
        let text = decode(bytes);
        let max_chars = self.max_tokens.max(1) * CHARS_PER_TOKEN;

        let mut preamble: Vec<&str> = Vec::new();
        let mut sections: Vec<Section> = Vec::new();
        let mut fence: Option<&str> = None;

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let trimmed = line.trim_start();
            if let Some(marker) = fence {
                if trimmed.starts_with(marker) {
                    fence = None;
                }
            } else if trimmed.starts_with("```") {
                fence = Some("```");
            } else if trimmed.starts_with("~~~") {
                fence = Some("~~~");
            } else if let Some(title) = heading_title(line) {
                sections.push(Section {
                    title,
                    start_line: line_no,
                    end_line: line_no,
                    lines: vec![line.to_string()],
                });
                continue;
            }

            match sections.last_mut() {
                Some(section) => {
                    section.lines.push(line.to_string());
                    section.end_line = line_no;
                }
                None => preamble.push(line),
            }
        }

        let mut drafts = Vec::new();

        for piece in split_paragraphs(&preamble.join("\n"), 1, self.max_tokens) {
            drafts.push(ChunkDraft {
                kind: piece_kind(&piece),
                span: Span::Lines {
                    start_line: piece.start_line,
                    end_line: piece.end_line,
                },
                symbol: None,
                content: piece.text,
            });
        }

        for section in sections {
            // Trailing blank lines do not belong to the span.
            let mut end_line = section.end_line;
            let mut lines = section.lines;
            while lines.len() > 1 && lines.last().is_some_and(|l| l.trim().is_empty()) {
                lines.pop();
                end_line -= 1;
            }
            let content = lines.join("\n");

            if content.len() <= max_chars {
                drafts.push(ChunkDraft {
                    kind: ChunkKind::Section,
                    span: Span::Section {
                        title: section.title.clone(),
                        start_line: section.start_line,
                        end_line,
                    },
                    symbol: Some(section.title),
                    content,
                });
                continue;
            }

            let body = lines[1..].join("\n");
            for piece in split_paragraphs(&body, section.start_line + 1, self.max_tokens) {
                drafts.push(ChunkDraft {
                    kind: piece_kind(&piece),
                    span: Span::Section {
                        title: section.title.clone(),
                        start_line: piece.start_line,
                        end_line: piece.end_line,
                    },
                    symbol: Some(section.title.clone()),
                    content: piece.text,
                });
            }
        }

        Ok(drafts)
    }
}

/// `## Title ##` → `Title`. Requires 1-6 `#` followed by whitespace.
fn heading_title(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim();
    if title.is_empty() {
        return None;
    }
    Some(title.to_string())
}

fn is_list_line(line: &str) -> bool {
    let t = line.trim_start();
    if t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ") {
        return true;
    }
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (t[digits..].starts_with(". ") || t[digits..].starts_with(") "))
}

fn piece_kind(piece: &Piece) -> ChunkKind {
    let mut lines = piece.text.lines().filter(|l| !l.trim().is_empty());
    let first_is_item = lines.next().is_some_and(is_list_line);
    let rest_are_items =
        lines.all(|l| is_list_line(l) || l.starts_with(' ') || l.starts_with('\t'));
    if first_is_item && rest_are_items {
        ChunkKind::ListItem
    } else {
        ChunkKind::Paragraph
    }
}
