//! AST backend: parses C/C++ buffers into translation units.
//!
//! A [`TranslationUnit`] owns the tree-sitter tree, the source text and a
//! declaration table built once at parse time. Everything that walks the
//! tree does so through [`Cursor`], a borrowed view that cannot outlive
//! the unit it came from.
//!
//! The cursor surface mirrors what libclang exposes (kind, extent,
//! spelling, children, lexical parent, referenced declaration, USR) so
//! the resolution code above it reads the same as it would against the
//! native library.

pub mod cursor;
mod symbols;

use regex::Regex;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;
use tree_sitter::{Node, Parser, Point, Tree};

pub use cursor::{Cursor, CursorKind, Extent, SourceLocation};
pub use symbols::Declaration;

use crate::compdb::source_file_in;
use crate::error::{CtrlkError, Result};
use symbols::DeclTable;

/// Parse-time switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Keep macro definitions and inclusion directives as cursors.
    pub detailed_preprocessing: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            detailed_preprocessing: true,
        }
    }
}

/// An in-memory buffer that stands in for the file on disk.
#[derive(Debug, Clone)]
pub struct UnsavedFile<'a> {
    pub path: &'a Path,
    pub content: &'a str,
}

/// Replace every run of non-ASCII bytes with a single space.
pub fn sanitize_buffer(content: &str) -> Cow<'_, str> {
    static NON_ASCII: OnceLock<Regex> = OnceLock::new();
    let re = NON_ASCII.get_or_init(|| Regex::new(r"[^\x00-\x7F]+").expect("static regex"));
    re.replace_all(content, " ")
}

/// One parsed buffer.
pub struct TranslationUnit {
    path: PathBuf,
    source: String,
    args: Vec<String>,
    options: ParseOptions,
    tree: Tree,
    decls: DeclTable,
}

impl std::fmt::Debug for TranslationUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranslationUnit")
            .field("path", &self.path)
            .field("bytes", &self.source.len())
            .field("declarations", &self.decls.len())
            .finish()
    }
}

/// Parse a translation unit.
///
/// The primary file is the first unsaved buffer when one is given,
/// otherwise the source file named in `args`, read from disk.
pub fn parse(args: &[String], unsaved: &[UnsavedFile<'_>], options: ParseOptions) -> Result<TranslationUnit> {
    let (path, source) = match unsaved.first() {
        Some(buffer) => (buffer.path.to_path_buf(), buffer.content.to_string()),
        None => {
            let path = source_file_in(args).ok_or_else(|| CtrlkError::ParseFailure {
                path: PathBuf::new(),
                reason: "no source file in arguments".to_string(),
            })?;
            let source = fs::read_to_string(&path).map_err(|e| CtrlkError::ParseFailure {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            (path, sanitize_buffer(&source).into_owned())
        }
    };

    TranslationUnit::from_source(path, source, args.to_vec(), options)
}

impl TranslationUnit {
    /// Parse `source` as the contents of `path`.
    pub fn from_source(
        path: PathBuf,
        source: String,
        args: Vec<String>,
        options: ParseOptions,
    ) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_cpp::LANGUAGE.into())
            .map_err(|e| CtrlkError::ParseFailure {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let tree = parser
            .parse(&source, None)
            .ok_or_else(|| CtrlkError::ParseFailure {
                path: path.clone(),
                reason: "parser produced no tree".to_string(),
            })?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let decls = DeclTable::build(tree.root_node(), source.as_bytes(), &file_name, options);
        debug!(file = %path.display(), declarations = decls.len(), "translation unit parsed");

        Ok(Self {
            path,
            source,
            args,
            options,
            tree,
            decls,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn options(&self) -> ParseOptions {
        self.options
    }

    /// Cursor for the whole unit.
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor::new(self, self.tree.root_node())
    }

    /// Root cursor, but only if this unit's primary file is `path`.
    pub fn cursor_for_file(&self, path: &Path) -> Option<Cursor<'_>> {
        let root = self.cursor();
        let extent = root.extent();
        (extent.start.file == extent.end.file && extent.start.file == path).then_some(root)
    }

    /// Deepest named node at a 1-based line/column.
    pub fn cursor_at(&self, line: usize, column: usize) -> Option<Cursor<'_>> {
        if line == 0 || column == 0 {
            return None;
        }
        let point = Point {
            row: line - 1,
            column: column - 1,
        };
        self.tree
            .root_node()
            .named_descendant_for_point_range(point, point)
            .map(|node| Cursor::new(self, node))
    }

    /// All declarations found in the unit, in source order.
    pub fn declarations(&self) -> impl Iterator<Item = Declaration<'_>> {
        self.decls.iter()
    }

    /// Quoted and angle-bracket includes, in source order.
    pub fn includes(&self) -> Vec<Include> {
        let mut out = Vec::new();
        let mut stack = vec![self.tree.root_node()];
        while let Some(node) = stack.pop() {
            if node.kind() == "preproc_include" {
                if let Some(path) = node.child_by_field_name("path") {
                    let text = path.utf8_text(self.source.as_bytes()).unwrap_or("");
                    let quoted = path.kind() == "string_literal";
                    let target = text.trim_matches(|c| c == '"' || c == '<' || c == '>');
                    if !target.is_empty() {
                        out.push(Include {
                            target: target.to_string(),
                            quoted,
                            line: node.start_position().row + 1,
                        });
                    }
                }
                continue;
            }
            let mut walker = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut walker).collect();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub(crate) fn decls(&self) -> &DeclTable {
        &self.decls
    }
}

/// One `#include` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub target: String,
    /// `"..."` rather than `<...>`.
    pub quoted: bool,
    pub line: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(source: &str) -> TranslationUnit {
        TranslationUnit::from_source(
            PathBuf::from("/proj/main.cpp"),
            source.to_string(),
            Vec::new(),
            ParseOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_sanitize_replaces_runs() {
        assert_eq!(sanitize_buffer("a\u{e9}\u{e8}b // caf\u{e9}"), "a b // caf ");
        assert!(matches!(sanitize_buffer("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_parse_prefers_unsaved_buffer() {
        let args = vec!["clang++".to_string(), "/nonexistent/main.cpp".to_string()];
        let buffer = UnsavedFile {
            path: Path::new("/nonexistent/main.cpp"),
            content: "int answer = 42;",
        };
        let tu = parse(&args, &[buffer], ParseOptions::default()).unwrap();
        assert_eq!(tu.path(), Path::new("/nonexistent/main.cpp"));
        assert_eq!(tu.declarations().count(), 1);
    }

    #[test]
    fn test_parse_missing_source_is_failure() {
        let args = vec!["clang++".to_string(), "/nonexistent/main.cpp".to_string()];
        let err = parse(&args, &[], ParseOptions::default()).unwrap_err();
        assert!(matches!(err, CtrlkError::ParseFailure { .. }));
    }

    #[test]
    fn test_parse_reads_source_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.cc");
        fs::write(&path, "namespace util { int twice(int x) { return x * 2; } }\n").unwrap();
        let args = vec![
            "g++".to_string(),
            "-c".to_string(),
            path.display().to_string(),
            "-o".to_string(),
            "lib.o".to_string(),
        ];
        let tu = parse(&args, &[], ParseOptions::default()).unwrap();
        let names: Vec<String> = tu.declarations().map(|d| d.name().to_string()).collect();
        assert!(names.contains(&"util".to_string()));
        assert!(names.contains(&"twice".to_string()));
    }

    #[test]
    fn test_cursor_for_file_checks_path() {
        let tu = unit("int x;");
        assert!(tu.cursor_for_file(Path::new("/proj/main.cpp")).is_some());
        assert!(tu.cursor_for_file(Path::new("/proj/other.cpp")).is_none());
    }

    #[test]
    fn test_includes_are_collected() {
        let tu = unit("#include \"local.h\"\n#include <vector>\nint x;\n");
        let includes = tu.includes();
        assert_eq!(includes.len(), 2);
        assert_eq!(includes[0].target, "local.h");
        assert!(includes[0].quoted);
        assert_eq!(includes[1].target, "vector");
        assert!(!includes[1].quoted);
        assert_eq!(includes[1].line, 2);
    }

    #[test]
    fn test_cursor_at_rejects_zero_position() {
        let tu = unit("int x;");
        assert!(tu.cursor_at(0, 1).is_none());
        assert!(tu.cursor_at(1, 0).is_none());
        assert!(tu.cursor_at(1, 5).is_some());
    }
}
