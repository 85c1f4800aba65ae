//! PDF: one `PAGE` chunk per page with extractable text.

use crate::error::{HarnessError, Result};
use crate::models::{ChunkKind, Span};

use super::{ChunkDraft, Chunker};

pub struct PdfChunker;

impl Chunker for PdfChunker {
    fn label(&self) -> &'static str {
        "pdf"
    }

    fn is_document(&self) -> bool {
        true
    }

    fn chunk(&self, path: &str, bytes: &[u8]) -> Result<Vec<ChunkDraft>> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(HarnessError::parse(path, "missing %PDF- header"));
        }
        // The extractor panics on some malformed inputs; contain it to this file.
        let pages = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| HarnessError::parse(path, "PDF extractor panicked"))?
            .map_err(|e| HarnessError::parse(path, e))?;

        Ok(pages
            .into_iter()
            .enumerate()
            .filter_map(|(idx, text)| {
                let content = normalize_page(&text);
                if content.is_empty() {
                    return None;
                }
                Some(ChunkDraft {
                    kind: ChunkKind::Page,
                    span: Span::Page {
                        page_number: idx as u32 + 1,
                    },
                    symbol: None,
                    content,
                })
            })
            .collect())
    }
}

/// Trim each line and collapse runs of blank lines.
fn normalize_page(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines().map(str::trim) {
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        out.push_str(line);
        blank_run = 0;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Two pages: text on the first, nothing on the second.
    fn two_page_pdf(text: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for body in [Some(text), None] {
            let operations = match body {
                Some(text) => vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 24.into()]),
                    Operation::new("Td", vec![100.into(), 600.into()]),
                    Operation::new("Tj", vec![Object::string_literal(text)]),
                    Operation::new("ET", vec![]),
                ],
                None => vec![],
            };
            let content = Content { operations };
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => 2,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    #[test]
    fn blank_pages_produce_no_chunks() {
        let bytes = two_page_pdf("Quarterly revenue forecast");
        let drafts = PdfChunker.chunk("report.pdf", &bytes).unwrap();
        assert!(drafts.len() <= 1);
        for draft in &drafts {
            assert_eq!(draft.kind, ChunkKind::Page);
            assert_eq!(draft.span, Span::Page { page_number: 1 });
            assert!(draft.content.contains("Quarterly"));
        }
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = PdfChunker.chunk("doc.pdf", b"not a pdf").unwrap_err();
        assert!(matches!(err, HarnessError::Parse { .. }));
    }

    #[test]
    fn truncated_pdf_is_a_parse_error() {
        let err = PdfChunker.chunk("doc.pdf", b"%PDF-1.4\n1 0 obj\n").unwrap_err();
        assert!(matches!(err, HarnessError::Parse { .. }));
    }

    #[test]
    fn normalizes_page_whitespace() {
        assert_eq!(normalize_page("  a \n\n\n b\nc  \n"), "a\n\nb\nc");
        assert_eq!(normalize_page(" \n \n"), "");
    }
}
