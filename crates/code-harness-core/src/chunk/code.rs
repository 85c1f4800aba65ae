//! Source code chunking over tree-sitter syntax trees.
//!
//! Each top-level definition becomes one chunk (`FUNCTION`, `CLASS`,
//! `MODULE`), and definitions nested in a class-like container become
//! `METHOD` chunks. Top-level statements that are not definitions, and
//! not package/import/comment preamble, are grouped into `MODULE` blocks.
//! A file with no definitions at all is a single `MODULE` chunk.

use tree_sitter::{Node, Parser as TsParser};

use crate::error::{HarnessError, Result};
use crate::models::{ChunkKind, Span};

use super::{decode, ChunkDraft, Chunker};

/// Languages with a bundled tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Go,
    Python,
    Java,
    JavaScript,
    TypeScript,
    Tsx,
    Rust,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "go" => Some(Language::Go),
            "py" | "pyi" => Some(Language::Python),
            "java" => Some(Language::Java),
            "js" | "mjs" | "cjs" | "jsx" => Some(Language::JavaScript),
            "ts" | "mts" | "cts" => Some(Language::TypeScript),
            "tsx" => Some(Language::Tsx),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::Java => "java",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
            Language::Rust => "rust",
        }
    }

    fn grammar(&self) -> tree_sitter::Language {
        match self {
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }

    /// Top-level nodes that never form a `MODULE` block on their own.
    fn is_preamble(&self, kind: &str) -> bool {
        if kind.contains("comment") {
            return true;
        }
        match self {
            Language::Go => matches!(kind, "package_clause" | "import_declaration"),
            Language::Python => matches!(
                kind,
                "import_statement" | "import_from_statement" | "future_import_statement"
            ),
            Language::Java => matches!(kind, "package_declaration" | "import_declaration"),
            Language::JavaScript | Language::TypeScript | Language::Tsx => {
                matches!(kind, "import_statement" | "hash_bang_line")
            }
            Language::Rust => matches!(
                kind,
                "use_declaration"
                    | "attribute_item"
                    | "inner_attribute_item"
                    | "extern_crate_declaration"
            ),
        }
    }
}

/// How a node participates in chunking.
enum Role<'t> {
    /// Emit a chunk; when `body` is set, walk it for nested definitions.
    Definition {
        kind: ChunkKind,
        name: Option<String>,
        body: Option<Node<'t>>,
        /// Whether functions directly inside `body` are methods.
        methods_inside: bool,
    },
    /// A wrapper (`export`, decorators) around the definition node given.
    Wrapper(Node<'t>),
    Other,
}

pub struct CodeChunker {
    language: Language,
}

impl CodeChunker {
    pub fn new(language: Language) -> Self {
        Self { language }
    }

    fn role<'t>(&self, node: Node<'t>, src: &str, in_container: bool) -> Role<'t> {
        let name = field_text(node, "name", src);
        let func_kind = if in_container {
            ChunkKind::Method
        } else {
            ChunkKind::Function
        };
        let leaf = |kind| Role::Definition {
            kind,
            name: name.clone(),
            body: None,
            methods_inside: false,
        };
        let container = |kind, methods_inside| Role::Definition {
            kind,
            name: name.clone(),
            body: node.child_by_field_name("body"),
            methods_inside,
        };

        match (self.language, node.kind()) {
            (Language::Go, "function_declaration") => leaf(ChunkKind::Function),
            (Language::Go, "method_declaration") => leaf(ChunkKind::Method),
            (Language::Go, "type_declaration") => Role::Definition {
                kind: ChunkKind::Class,
                name: first_named_child(node, "type_spec")
                    .and_then(|spec| field_text(spec, "name", src)),
                body: None,
                methods_inside: false,
            },

            (Language::Python, "function_definition") => leaf(func_kind),
            (Language::Python, "class_definition") => container(ChunkKind::Class, true),
            (Language::Python, "decorated_definition") => node
                .child_by_field_name("definition")
                .map(Role::Wrapper)
                .unwrap_or(Role::Other),

            (
                Language::Java,
                "class_declaration" | "interface_declaration" | "enum_declaration"
                | "record_declaration",
            ) => container(ChunkKind::Class, true),
            (Language::Java, "method_declaration" | "constructor_declaration") => {
                leaf(ChunkKind::Method)
            }

            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "function_declaration" | "generator_function_declaration",
            ) => leaf(func_kind),
            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "class_declaration" | "abstract_class_declaration",
            ) => container(ChunkKind::Class, true),
            (
                Language::TypeScript | Language::Tsx,
                "interface_declaration" | "enum_declaration" | "type_alias_declaration",
            ) => leaf(ChunkKind::Class),
            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "method_definition",
            ) => leaf(ChunkKind::Method),
            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "export_statement",
            ) => node
                .child_by_field_name("declaration")
                .map(Role::Wrapper)
                .unwrap_or(Role::Other),
            (
                Language::JavaScript | Language::TypeScript | Language::Tsx,
                "lexical_declaration" | "variable_declaration",
            ) if !in_container => match arrow_function_name(node, src) {
                Some(name) => Role::Definition {
                    kind: ChunkKind::Function,
                    name: Some(name),
                    body: None,
                    methods_inside: false,
                },
                None => Role::Other,
            },

            (Language::Rust, "function_item") => leaf(func_kind),
            (Language::Rust, "struct_item" | "enum_item" | "union_item") => {
                leaf(ChunkKind::Class)
            }
            (Language::Rust, "trait_item") => container(ChunkKind::Class, true),
            (Language::Rust, "impl_item") => Role::Definition {
                kind: ChunkKind::Class,
                name: field_text(node, "type", src),
                body: node.child_by_field_name("body"),
                methods_inside: true,
            },
            (Language::Rust, "mod_item") => container(ChunkKind::Module, false),

            _ => Role::Other,
        }
    }

    /// Walk the members of a container body, emitting nested definitions.
    fn walk_body(&self, body: Node<'_>, src: &str, methods_inside: bool, out: &mut Vec<ChunkDraft>) {
        let mut cursor = body.walk();
        for child in body.named_children(&mut cursor) {
            self.visit(child, src, methods_inside, out);
        }
    }

    /// Emit chunks for `node` if it is a definition. Returns whether it was.
    fn visit(&self, node: Node<'_>, src: &str, in_container: bool, out: &mut Vec<ChunkDraft>) -> bool {
        match self.role(node, src, in_container) {
            Role::Definition {
                kind,
                name,
                body,
                methods_inside,
            } => {
                out.push(draft(node, src, kind, name));
                if let Some(body) = body {
                    self.walk_body(body, src, methods_inside, out);
                }
                true
            }
            Role::Wrapper(inner) => {
                // Chunk the wrapper's full text under the inner definition's kind.
                let mut inner_out = Vec::new();
                if !self.visit(inner, src, in_container, &mut inner_out) {
                    return false;
                }
                if let Some(first) = inner_out.first_mut() {
                    let outer = draft(node, src, first.kind, first.symbol.clone());
                    *first = outer;
                }
                out.extend(inner_out);
                true
            }
            Role::Other => false,
        }
    }
}

impl Chunker for CodeChunker {
    fn label(&self) -> &'static str {
        self.language.name()
    }

    fn chunk(&self, path: &str, bytes: &[u8]) -> Result<Vec<ChunkDraft>> {
        let src = decode(bytes);
        let mut parser = TsParser::new();
        parser
            .set_language(&self.language.grammar())
            .map_err(|e| HarnessError::parse(path, format!("failed to set language: {e}")))?;
        let tree = parser
            .parse(src.as_bytes(), None)
            .ok_or_else(|| HarnessError::parse(path, "tree-sitter returned no tree"))?;
        let root = tree.root_node();
        if root.has_error() {
            tracing::debug!(path, language = self.language.name(), "syntax errors, chunking recovered tree");
        }

        let mut out = Vec::new();
        let mut residue: Vec<Node<'_>> = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if self.visit(child, &src, false, &mut out) {
                flush_residue(&mut residue, &src, &mut out);
            } else if !self.language.is_preamble(child.kind()) {
                residue.push(child);
            }
        }
        flush_residue(&mut residue, &src, &mut out);

        if out.is_empty() && !src.trim().is_empty() {
            let line_count = src.lines().count().max(1) as u32;
            out.push(ChunkDraft {
                kind: ChunkKind::Module,
                span: Span::Lines {
                    start_line: 1,
                    end_line: line_count,
                },
                symbol: None,
                content: src.trim_end().to_string(),
            });
        }

        out.sort_by_key(|d| match &d.span {
            Span::Lines { start_line, .. } => *start_line,
            _ => 0,
        });
        Ok(out)
    }
}

/// Merge a run of consecutive non-definition top-level nodes into one
/// `MODULE` chunk.
fn flush_residue(residue: &mut Vec<Node<'_>>, src: &str, out: &mut Vec<ChunkDraft>) {
    let (Some(first), Some(last)) = (residue.first(), residue.last()) else {
        return;
    };
    let range = first.start_byte()..last.end_byte();
    if let Some(content) = src.get(range) {
        if !content.trim().is_empty() {
            out.push(ChunkDraft {
                kind: ChunkKind::Module,
                span: Span::Lines {
                    start_line: first.start_position().row as u32 + 1,
                    end_line: last.end_position().row as u32 + 1,
                },
                symbol: None,
                content: content.to_string(),
            });
        }
    }
    residue.clear();
}

fn draft(node: Node<'_>, src: &str, kind: ChunkKind, symbol: Option<String>) -> ChunkDraft {
    ChunkDraft {
        kind,
        span: Span::Lines {
            start_line: node.start_position().row as u32 + 1,
            end_line: node.end_position().row as u32 + 1,
        },
        symbol,
        content: src.get(node.byte_range()).unwrap_or_default().to_string(),
    }
}

fn field_text(node: Node<'_>, field: &str, src: &str) -> Option<String> {
    node.child_by_field_name(field)
        .and_then(|n| src.get(n.byte_range()))
        .map(|s| s.to_string())
}

fn first_named_child<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    let found = node.named_children(&mut cursor).find(|c| c.kind() == kind);
    found
}

/// `const handler = (req) => ...` → `handler`.
fn arrow_function_name(node: Node<'_>, src: &str) -> Option<String> {
    let declarator = first_named_child(node, "variable_declarator")?;
    let value = declarator.child_by_field_name("value")?;
    match value.kind() {
        "arrow_function" | "function_expression" | "function" => {
            field_text(declarator, "name", src)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(language: Language, src: &str) -> Vec<ChunkDraft> {
        CodeChunker::new(language).chunk("f", src.as_bytes()).unwrap()
    }

    fn kinds(drafts: &[ChunkDraft]) -> Vec<(ChunkKind, Option<&str>)> {
        drafts
            .iter()
            .map(|d| (d.kind, d.symbol.as_deref()))
            .collect()
    }

    #[test]
    fn go_single_function_is_one_chunk() {
        let src = "package main\n\nimport \"fmt\"\n\nfunc Hello() {\n\tfmt.Println(\"hi\")\n}\n";
        let drafts = chunk(Language::Go, src);
        assert_eq!(kinds(&drafts), vec![(ChunkKind::Function, Some("Hello"))]);
        assert_eq!(
            drafts[0].span,
            Span::Lines {
                start_line: 5,
                end_line: 7
            }
        );
        assert!(drafts[0].content.starts_with("func Hello()"));
    }

    #[test]
    fn go_types_methods_and_module_blocks() {
        let src = "package svc\n\ntype Server struct {\n\tport int\n}\n\nfunc (s *Server) Start() error {\n\treturn nil\n}\n\nvar DefaultPort = 8080\n";
        let drafts = chunk(Language::Go, src);
        assert_eq!(
            kinds(&drafts),
            vec![
                (ChunkKind::Class, Some("Server")),
                (ChunkKind::Method, Some("Start")),
                (ChunkKind::Module, None),
            ]
        );
    }

    #[test]
    fn python_class_methods() {
        let src = "import os\n\nclass Auth:\n    def login(self):\n        pass\n\n    @staticmethod\n    def token():\n        return 1\n\ndef helper():\n    return 2\n";
        let drafts = chunk(Language::Python, src);
        assert_eq!(
            kinds(&drafts),
            vec![
                (ChunkKind::Class, Some("Auth")),
                (ChunkKind::Method, Some("login")),
                (ChunkKind::Method, Some("token")),
                (ChunkKind::Function, Some("helper")),
            ]
        );
        assert!(drafts[2].content.starts_with("@staticmethod"));
    }

    #[test]
    fn typescript_exports_and_arrow_functions() {
        let src = "import { x } from './x';\n\nexport interface User { id: string }\n\nexport class Repo {\n  find(id: string): User { return { id }; }\n}\n\nexport const handler = async (req: Request) => {\n  return req;\n};\n";
        let drafts = chunk(Language::TypeScript, src);
        assert_eq!(
            kinds(&drafts),
            vec![
                (ChunkKind::Class, Some("User")),
                (ChunkKind::Class, Some("Repo")),
                (ChunkKind::Method, Some("find")),
                (ChunkKind::Function, Some("handler")),
            ]
        );
        assert!(drafts[1].content.starts_with("export class Repo"));
    }

    #[test]
    fn rust_impl_methods_and_modules() {
        let src = "use std::fmt;\n\npub struct Point { x: i32 }\n\nimpl Point {\n    pub fn new() -> Self { Point { x: 0 } }\n}\n\nfn main() {}\n\nmod inner {\n    fn nested() {}\n}\n";
        let drafts = chunk(Language::Rust, src);
        assert_eq!(
            kinds(&drafts),
            vec![
                (ChunkKind::Class, Some("Point")),
                (ChunkKind::Class, Some("Point")),
                (ChunkKind::Method, Some("new")),
                (ChunkKind::Function, Some("main")),
                (ChunkKind::Module, Some("inner")),
                (ChunkKind::Function, Some("nested")),
            ]
        );
    }

    #[test]
    fn java_class_with_constructor() {
        let src = "package a;\n\nimport java.util.List;\n\npublic class Greeter {\n  public Greeter() {}\n  public String greet() { return \"hi\"; }\n}\n";
        let drafts = chunk(Language::Java, src);
        assert_eq!(
            kinds(&drafts),
            vec![
                (ChunkKind::Class, Some("Greeter")),
                (ChunkKind::Method, Some("Greeter")),
                (ChunkKind::Method, Some("greet")),
            ]
        );
    }

    #[test]
    fn file_without_definitions_is_one_module() {
        let drafts = chunk(Language::Python, "import os\n# just a comment\n");
        assert_eq!(kinds(&drafts), vec![(ChunkKind::Module, None)]);
        assert_eq!(
            drafts[0].span,
            Span::Lines {
                start_line: 1,
                end_line: 2
            }
        );
    }

    #[test]
    fn empty_file_has_no_chunks() {
        assert!(chunk(Language::Go, "  \n").is_empty());
    }
}
