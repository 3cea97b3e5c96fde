//! Top-level function extraction from tool source files.
//!
//! Uses tree-sitter grammars to find the public top-level functions of a
//! source file together with their documentation, declared parameters and
//! exact source span. Private functions are skipped by naming convention:
//! a leading underscore in Python, a leading underscore or missing `pub` in
//! Rust.

use tree_sitter::{Node, Parser};

use crate::schema::Param;

/// Languages whose source files are broken down into function leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Python,
    Rust,
}

impl SourceLanguage {
    /// Map a file extension (without dot) to a supported language.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Self::Python),
            "rs" => Some(Self::Rust),
            _ => None,
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
        }
    }
}

impl std::fmt::Display for SourceLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceLanguage::Python => write!(f, "python"),
            SourceLanguage::Rust => write!(f, "rust"),
        }
    }
}

/// Errors from parsing a source file.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("failed to load grammar: {0}")]
    Grammar(#[from] tree_sitter::LanguageError),

    #[error("parser produced no tree")]
    NoTree,

    #[error("syntax error near line {line}")]
    Syntax { line: u32 },
}

/// A public top-level function found in a source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFunction {
    pub name: String,
    pub doc: Option<String>,
    pub params: Vec<Param>,
    /// 1-indexed line of the definition.
    pub line: u32,
    /// Exact source text of the definition, decorators included.
    pub source: String,
}

/// Stateful extractor wrapping a tree-sitter parser for one language.
pub struct FunctionExtractor {
    parser: Parser,
    language: SourceLanguage,
}

impl FunctionExtractor {
    pub fn new(language: SourceLanguage) -> Result<Self, ExtractError> {
        let mut parser = Parser::new();
        parser.set_language(&language.grammar())?;
        Ok(Self { parser, language })
    }

    pub fn language(&self) -> SourceLanguage {
        self.language
    }

    /// Extract public top-level functions, in source order.
    ///
    /// Any syntax error makes the whole file a parse failure so callers never
    /// register functions recovered from a half-parsed tree.
    pub fn extract(&mut self, source: &str) -> Result<Vec<ExtractedFunction>, ExtractError> {
        let tree = self
            .parser
            .parse(source, None)
            .ok_or(ExtractError::NoTree)?;
        let root = tree.root_node();
        if root.has_error() {
            return Err(ExtractError::Syntax {
                line: first_error_line(root),
            });
        }

        let bytes = source.as_bytes();
        let mut cursor = root.walk();
        let functions = root
            .named_children(&mut cursor)
            .filter_map(|node| match self.language {
                SourceLanguage::Python => python_function(node, bytes),
                SourceLanguage::Rust => rust_function(node, bytes),
            })
            .collect();
        Ok(functions)
    }
}

fn node_text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn first_error_line(node: Node) -> u32 {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.is_error() || child.is_missing() {
            return child.start_position().row as u32 + 1;
        }
        if child.has_error() {
            return first_error_line(child);
        }
    }
    node.start_position().row as u32 + 1
}

// ── Python ──────────────────────────────────────────────────────────────

fn python_function(node: Node, source: &[u8]) -> Option<ExtractedFunction> {
    let def = match node.kind() {
        "function_definition" => node,
        "decorated_definition" => node
            .child_by_field_name("definition")
            .filter(|d| d.kind() == "function_definition")?,
        _ => return None,
    };

    let name = node_text(def.child_by_field_name("name")?, source);
    if name.is_empty() || name.starts_with('_') {
        return None;
    }

    let doc = def
        .child_by_field_name("body")
        .and_then(|body| python_docstring(body, source));
    let params = def
        .child_by_field_name("parameters")
        .map(|p| python_params(p, source))
        .unwrap_or_default();

    Some(ExtractedFunction {
        name: name.to_string(),
        doc,
        params,
        line: def.start_position().row as u32 + 1,
        source: node_text(node, source).to_string(),
    })
}

fn python_docstring(body: Node, source: &[u8]) -> Option<String> {
    let mut cursor = body.walk();
    let first = body.named_children(&mut cursor).next()?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let mut inner = first.walk();
    let expr = first.named_children(&mut inner).next()?;
    if expr.kind() != "string" {
        return None;
    }
    let doc = clean_docstring(strip_string_quotes(node_text(expr, source)));
    if doc.is_empty() { None } else { Some(doc) }
}

fn python_params(params: Node, source: &[u8]) -> Vec<Param> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for p in params.named_children(&mut cursor) {
        let param = match p.kind() {
            "identifier" => Param::required(node_text(p, source)),
            "typed_parameter" => {
                // `*args: T` and `**kw: T` wrap a splat pattern instead of an identifier.
                let mut c = p.walk();
                let Some(ident) = p.named_children(&mut c).find(|n| n.kind() == "identifier")
                else {
                    continue;
                };
                let mut param = Param::required(node_text(ident, source));
                if let Some(ty) = p.child_by_field_name("type") {
                    param = param.with_annotation(node_text(ty, source));
                }
                param
            }
            "default_parameter" | "typed_default_parameter" => {
                let Some(name) = p.child_by_field_name("name") else {
                    continue;
                };
                if name.kind() != "identifier" {
                    continue;
                }
                let mut param = Param::optional(node_text(name, source));
                if let Some(ty) = p.child_by_field_name("type") {
                    param = param.with_annotation(node_text(ty, source));
                }
                param
            }
            _ => continue,
        };
        if param.name == "self" || param.name == "cls" {
            continue;
        }
        out.push(param);
    }
    out
}

/// Remove string prefixes (`r`, `b`, `u`, `f`) and the surrounding quotes.
fn strip_string_quotes(raw: &str) -> &str {
    let body = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if let Some(inner) = body
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
        {
            return inner;
        }
    }
    body
}

/// Dedent a docstring the way Python's `inspect.cleandoc` does.
fn clean_docstring(raw: &str) -> String {
    let mut lines = raw.lines();
    let first = lines.next().unwrap_or("").trim().to_string();
    let rest: Vec<&str> = lines.collect();

    let indent = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    let mut out = vec![first];
    out.extend(
        rest.iter()
            .map(|l| l.chars().skip(indent).collect::<String>().trim_end().to_string()),
    );

    while out.last().is_some_and(|l| l.is_empty()) {
        out.pop();
    }
    while out.first().is_some_and(|l| l.is_empty()) {
        out.remove(0);
    }
    out.join("\n")
}

// ── Rust ────────────────────────────────────────────────────────────────

fn rust_function(node: Node, source: &[u8]) -> Option<ExtractedFunction> {
    if node.kind() != "function_item" {
        return None;
    }
    let name = node_text(node.child_by_field_name("name")?, source);
    let mut cursor = node.walk();
    let public = node
        .named_children(&mut cursor)
        .any(|c| c.kind() == "visibility_modifier");
    if !public || name.is_empty() || name.starts_with('_') {
        return None;
    }

    let params = node
        .child_by_field_name("parameters")
        .map(|p| rust_params(p, source))
        .unwrap_or_default();

    Some(ExtractedFunction {
        name: name.to_string(),
        doc: rust_doc_comment(node, source),
        params,
        line: node.start_position().row as u32 + 1,
        source: node_text(node, source).to_string(),
    })
}

/// Collect `///` lines directly above an item, skipping interleaved attributes.
fn rust_doc_comment(node: Node, source: &[u8]) -> Option<String> {
    let mut lines = Vec::new();
    let mut sibling = node.prev_named_sibling();
    while let Some(s) = sibling {
        match s.kind() {
            "attribute_item" => {}
            "line_comment" => match node_text(s, source).strip_prefix("///") {
                Some(rest) if !rest.starts_with('/') => {
                    let rest = rest.trim_end();
                    lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
                }
                _ => break,
            },
            _ => break,
        }
        sibling = s.prev_named_sibling();
    }
    if lines.is_empty() {
        return None;
    }
    lines.reverse();
    let doc = lines.join("\n").trim().to_string();
    if doc.is_empty() { None } else { Some(doc) }
}

fn rust_params(params: Node, source: &[u8]) -> Vec<Param> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for p in params.named_children(&mut cursor) {
        if p.kind() != "parameter" {
            continue;
        }
        let Some(pattern) = p.child_by_field_name("pattern") else {
            continue;
        };
        let name = node_text(pattern, source).trim_start_matches("mut ").trim();
        if name.is_empty() || name == "_" {
            continue;
        }
        let ty = p
            .child_by_field_name("type")
            .map(|t| node_text(t, source))
            .unwrap_or("");
        let param = if ty.starts_with("Option<") {
            Param::optional(name)
        } else {
            Param::required(name)
        };
        out.push(if ty.is_empty() {
            param
        } else {
            param.with_annotation(ty)
        });
    }
    out
}
