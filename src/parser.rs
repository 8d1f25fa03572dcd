//! Tree-sitter based symbol extraction (§4.3).
//!
//! Walks each language's concrete syntax tree directly rather than through a
//! generic query DSL: the four supported languages branch on a small,
//! fixed set of node kinds, so a hand-written visitor reads more plainly
//! than a query-capture indirection layer would.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::{Node, Parser as TsParser};

use crate::language::Language;
use crate::models::{SymbolBlock, SymbolKind};

static ROUTE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\.(get|post|put|delete|patch|route|use)\s*\(").expect("regex"));
static PATH_ARG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\(\s*['"]/[^'"\)]*['"]"#).expect("regex"));
static HANDLER_NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)handler|callback").expect("regex"));
static PY_DEF_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"def\s+([A-Za-z_][A-Za-z0-9_]*)").expect("regex"));
static JS_METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.([A-Za-z_][A-Za-z0-9_]*)\s*\(").expect("regex"));
static JS_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\(\s*['"](/[^'"]*)['"]"#).expect("regex"));

struct Draft {
    kind: SymbolKind,
    name: Option<String>,
    start_line: u32,
    end_line: u32,
    text: String,
}

/// Parses source text into [`SymbolBlock`]s for one of the four supported
/// languages. Holds one tree-sitter `Parser` per language, lazily created.
pub struct SymbolParser {
    parsers: HashMap<Language, TsParser>,
}

impl Default for SymbolParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolParser {
    pub fn new() -> Self {
        let mut parsers = HashMap::new();
        for lang in [
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Tsx,
        ] {
            let mut parser = TsParser::new();
            parser
                .set_language(&lang.grammar())
                .expect("grammar ABI compatible with linked tree-sitter version");
            parsers.insert(lang, parser);
        }
        Self { parsers }
    }

    pub fn parse_symbols(&mut self, language: Language, content: &str) -> Vec<SymbolBlock> {
        let Some(parser) = self.parsers.get_mut(&language) else {
            return Vec::new();
        };
        let Some(tree) = parser.parse(content, None) else {
            return Vec::new();
        };
        let source = content.as_bytes();
        let root = tree.root_node();

        let mut drafts: Vec<Draft> = Vec::new();
        let mut stack: Vec<Node> = vec![root];
        while let Some(node) = stack.pop() {
            for child in node.children(&mut node.walk()).collect::<Vec<_>>().into_iter().rev() {
                stack.push(child);
            }
            if language == Language::Python {
                collect_python(node, source, &mut drafts);
            } else {
                collect_js_ts(node, source, &mut drafts);
            }
        }

        add_major_blocks(root, source, &mut drafts);

        let mut unique: HashMap<(u8, Option<String>, u32, u32), SymbolBlock> = HashMap::new();
        for draft in drafts {
            let key = (draft.kind as u8, draft.name.clone(), draft.start_line, draft.end_line);
            unique.entry(key).or_insert(SymbolBlock {
                kind: draft.kind,
                name: draft.name,
                start_line: draft.start_line,
                end_line: draft.end_line,
                text: draft.text,
            });
        }

        let mut blocks: Vec<SymbolBlock> = unique.into_values().collect();
        blocks.sort_by(|a, b| {
            (a.start_line, a.end_line, a.kind as u8).cmp(&(b.start_line, b.end_line, b.kind as u8))
        });
        blocks
    }
}

fn node_text(source: &[u8], node: Node) -> String {
    String::from_utf8_lossy(&source[node.start_byte()..node.end_byte()]).into_owned()
}

fn line_range(node: Node) -> (u32, u32) {
    (node.start_position().row as u32 + 1, node.end_position().row as u32 + 1)
}

fn field_text(node: Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field).map(|n| node_text(source, n))
}

fn collect_python(node: Node, source: &[u8], drafts: &mut Vec<Draft>) {
    match node.kind() {
        "function_definition" | "async_function_definition" => {
            let name = field_text(node, "name", source);
            let kind = handler_or_function(&name);
            let (start_line, end_line) = line_range(node);
            drafts.push(Draft {
                kind,
                name,
                start_line,
                end_line,
                text: node_text(source, node),
            });
        }
        "class_definition" => {
            let name = field_text(node, "name", source);
            let (start_line, end_line) = line_range(node);
            drafts.push(Draft {
                kind: SymbolKind::Class,
                name,
                start_line,
                end_line,
                text: node_text(source, node),
            });
        }
        "decorated_definition" => {
            let text = node_text(source, node);
            if ROUTE_PATTERN.is_match(&text) || text.contains("@app") {
                let (start_line, end_line) = line_range(node);
                let name = PY_DEF_NAME_RE
                    .captures(&text)
                    .map(|c| c[1].to_string());
                drafts.push(Draft {
                    kind: SymbolKind::Route,
                    name,
                    start_line,
                    end_line,
                    text,
                });
            }
        }
        "call" => {
            let text = node_text(source, node);
            if ROUTE_PATTERN.is_match(&text) && PATH_ARG_PATTERN.is_match(&text) {
                let (start_line, end_line) = line_range(node);
                drafts.push(Draft {
                    kind: SymbolKind::Route,
                    name: None,
                    start_line,
                    end_line,
                    text,
                });
            }
        }
        _ => {}
    }
}

fn collect_js_ts(node: Node, source: &[u8], drafts: &mut Vec<Draft>) {
    match node.kind() {
        "function_declaration" | "generator_function_declaration" => {
            let name = field_text(node, "name", source);
            let kind = handler_or_function(&name);
            let (start_line, end_line) = line_range(node);
            drafts.push(Draft {
                kind,
                name,
                start_line,
                end_line,
                text: node_text(source, node),
            });
        }
        "class_declaration" => {
            let name = field_text(node, "name", source);
            let (start_line, end_line) = line_range(node);
            drafts.push(Draft {
                kind: SymbolKind::Class,
                name,
                start_line,
                end_line,
                text: node_text(source, node),
            });
        }
        "method_definition" => {
            let name = field_text(node, "name", source);
            let kind = handler_or_function(&name);
            let (start_line, end_line) = line_range(node);
            drafts.push(Draft {
                kind,
                name,
                start_line,
                end_line,
                text: node_text(source, node),
            });
        }
        "variable_declarator" => {
            if let Some(value) = node.child_by_field_name("value") {
                if matches!(value.kind(), "arrow_function" | "function" | "function_expression") {
                    let name = field_text(node, "name", source);
                    let kind = handler_or_function(&name);
                    let (start_line, end_line) = line_range(node);
                    drafts.push(Draft {
                        kind,
                        name,
                        start_line,
                        end_line,
                        text: node_text(source, node),
                    });
                }
            }
        }
        "call_expression" => {
            let text = node_text(source, node);
            if ROUTE_PATTERN.is_match(&text) && PATH_ARG_PATTERN.is_match(&text) {
                let (start_line, end_line) = line_range(node);
                drafts.push(Draft {
                    kind: SymbolKind::Route,
                    name: extract_route_name(&text),
                    start_line,
                    end_line,
                    text,
                });
            }
        }
        _ => {}
    }
}

fn handler_or_function(name: &Option<String>) -> SymbolKind {
    match name {
        Some(n) if HANDLER_NAME_PATTERN.is_match(n) => SymbolKind::Handler,
        _ => SymbolKind::Function,
    }
}

fn extract_route_name(text: &str) -> Option<String> {
    let method = JS_METHOD_RE.captures(text)?[1].to_string();
    let path = JS_PATH_RE.captures(text).map(|c| c[1].to_string()).unwrap_or_default();
    Some(format!("{} {}", method.to_uppercase(), path).trim().to_string())
}

/// Top-level statements of at least 15 lines that aren't already covered by
/// a draft become `major_block` symbols — catches config blocks, large
/// object literals, and top-level scripts the per-language branches miss.
fn add_major_blocks(root: Node, source: &[u8], drafts: &mut Vec<Draft>) {
    let mut occupied: Vec<(u32, u32)> =
        drafts.iter().map(|d| (d.start_line, d.end_line)).collect();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if !child.is_named() {
            continue;
        }
        if matches!(
            child.kind(),
            "import_statement"
                | "import_from_statement"
                | "lexical_declaration"
                | "variable_declaration"
                | "comment"
                | "expression_statement"
        ) {
            continue;
        }
        let (start_line, end_line) = line_range(child);
        let span = end_line - start_line + 1;
        if span < 15 {
            continue;
        }
        if occupied.iter().any(|(s, e)| start_line >= *s && end_line <= *e) {
            continue;
        }
        drafts.push(Draft {
            kind: SymbolKind::MajorBlock,
            name: None,
            start_line,
            end_line,
            text: node_text(source, child),
        });
        occupied.push((start_line, end_line));
    }
}
