//! Borrowed AST cursors.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tree_sitter::Node;

use super::TranslationUnit;

/// What a cursor points at, in libclang's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorKind {
    TranslationUnit,
    Namespace,
    ClassDecl,
    StructDecl,
    UnionDecl,
    EnumDecl,
    EnumConstantDecl,
    FunctionDecl,
    CxxMethod,
    FieldDecl,
    VarDecl,
    ParmDecl,
    TypedefDecl,
    MacroDefinition,
    InclusionDirective,
    DeclRefExpr,
    TypeRef,
    MemberRef,
    NamespaceRef,
    CallExpr,
    Statement,
    Expression,
    Comment,
    Unexposed,
}

impl CursorKind {
    pub fn is_declaration(self) -> bool {
        matches!(
            self,
            CursorKind::Namespace
                | CursorKind::ClassDecl
                | CursorKind::StructDecl
                | CursorKind::UnionDecl
                | CursorKind::EnumDecl
                | CursorKind::EnumConstantDecl
                | CursorKind::FunctionDecl
                | CursorKind::CxxMethod
                | CursorKind::FieldDecl
                | CursorKind::VarDecl
                | CursorKind::ParmDecl
                | CursorKind::TypedefDecl
                | CursorKind::MacroDefinition
        )
    }

    pub fn is_reference(self) -> bool {
        matches!(
            self,
            CursorKind::DeclRefExpr | CursorKind::TypeRef | CursorKind::MemberRef | CursorKind::NamespaceRef
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CursorKind::TranslationUnit => "translation_unit",
            CursorKind::Namespace => "namespace",
            CursorKind::ClassDecl => "class_decl",
            CursorKind::StructDecl => "struct_decl",
            CursorKind::UnionDecl => "union_decl",
            CursorKind::EnumDecl => "enum_decl",
            CursorKind::EnumConstantDecl => "enum_constant_decl",
            CursorKind::FunctionDecl => "function_decl",
            CursorKind::CxxMethod => "cxx_method",
            CursorKind::FieldDecl => "field_decl",
            CursorKind::VarDecl => "var_decl",
            CursorKind::ParmDecl => "parm_decl",
            CursorKind::TypedefDecl => "typedef_decl",
            CursorKind::MacroDefinition => "macro_definition",
            CursorKind::InclusionDirective => "inclusion_directive",
            CursorKind::DeclRefExpr => "decl_ref_expr",
            CursorKind::TypeRef => "type_ref",
            CursorKind::MemberRef => "member_ref",
            CursorKind::NamespaceRef => "namespace_ref",
            CursorKind::CallExpr => "call_expr",
            CursorKind::Statement => "statement",
            CursorKind::Expression => "expression",
            CursorKind::Comment => "comment",
            CursorKind::Unexposed => "unexposed",
        }
    }

    /// Classify a node that is not in the declaration table.
    pub(crate) fn of_node(node: &Node<'_>) -> Self {
        match node.kind() {
            "translation_unit" => CursorKind::TranslationUnit,
            "identifier" => CursorKind::DeclRefExpr,
            "type_identifier" => CursorKind::TypeRef,
            "field_identifier" => CursorKind::MemberRef,
            "namespace_identifier" => CursorKind::NamespaceRef,
            "call_expression" => CursorKind::CallExpr,
            "preproc_include" => CursorKind::InclusionDirective,
            "comment" => CursorKind::Comment,
            kind if is_body_kind(kind) || kind.ends_with("_statement") => CursorKind::Statement,
            kind if kind.ends_with("_expression") || kind.ends_with("_literal") => CursorKind::Expression,
            _ => CursorKind::Unexposed,
        }
    }
}

/// Node kinds that hold a sequence of statements or member declarations.
pub(crate) fn is_body_kind(kind: &str) -> bool {
    matches!(
        kind,
        "compound_statement"
            | "declaration_list"
            | "field_declaration_list"
            | "enumerator_list"
            | "initializer_list"
            | "argument_list"
            | "condition_clause"
    )
}

/// A position in a file, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// Start and end of a cursor's source range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    pub start: SourceLocation,
    pub end: SourceLocation,
}

/// A node of a [`TranslationUnit`], valid for as long as the unit is borrowed.
#[derive(Clone, Copy)]
pub struct Cursor<'tu> {
    tu: &'tu TranslationUnit,
    node: Node<'tu>,
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("kind", &self.kind())
            .field("node", &self.node.kind())
            .field("spelling", &self.spelling())
            .finish()
    }
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.tu, other.tu) && self.node.id() == other.node.id()
    }
}

impl Eq for Cursor<'_> {}

impl<'tu> Cursor<'tu> {
    pub(crate) fn new(tu: &'tu TranslationUnit, node: Node<'tu>) -> Self {
        Self { tu, node }
    }

    pub fn translation_unit(&self) -> &'tu TranslationUnit {
        self.tu
    }

    pub fn kind(&self) -> CursorKind {
        match self.tu.decls().by_site(self.node.id()) {
            Some(entry) => entry.kind,
            None => CursorKind::of_node(&self.node),
        }
    }

    /// Name of a declaration or reference; `None` for anonymous constructs,
    /// statements and expressions.
    pub fn spelling(&self) -> Option<String> {
        if let Some(entry) = self.tu.decls().by_site(self.node.id()) {
            return Some(entry.name.clone());
        }
        if self.kind().is_reference() {
            return self.text().map(str::to_string);
        }
        None
    }

    /// Whether this cursor is a named definition that opens a lexical scope
    /// (namespace, record, enum or function body).
    pub fn is_scope(&self) -> bool {
        self.tu
            .decls()
            .by_site(self.node.id())
            .is_some_and(|entry| entry.defines_scope)
    }

    pub fn extent(&self) -> Extent {
        Extent {
            start: self.point_location(self.node.start_position()),
            end: self.point_location(self.node.end_position()),
        }
    }

    /// Where the cursor "is": the name for declarations, the start otherwise.
    pub fn location(&self) -> SourceLocation {
        match self.tu.decls().by_site(self.node.id()) {
            Some(entry) => SourceLocation {
                file: self.tu.path().to_path_buf(),
                line: entry.line,
                column: entry.column,
            },
            None => self.point_location(self.node.start_position()),
        }
    }

    /// Named children, minus preprocessor records when the unit was parsed
    /// without detailed preprocessing.
    pub fn children(&self) -> Vec<Cursor<'tu>> {
        let detailed = self.tu.options().detailed_preprocessing;
        let mut walker = self.node.walk();
        self.node
            .named_children(&mut walker)
            .filter(|child| detailed || !is_preprocessor_record(child.kind()))
            .map(|child| Cursor::new(self.tu, child))
            .collect()
    }

    /// Enclosing declaration context.
    ///
    /// Declarations report their nearest enclosing scope declaration (or the
    /// unit root). Syntactic parts of a declaration report that declaration.
    /// Statements, expressions and comments have no lexical parent.
    pub fn lexical_parent(&self) -> Option<Cursor<'tu>> {
        let decls = self.tu.decls();
        let is_declaration = decls.by_site(self.node.id()).is_some();

        if !is_declaration && is_opaque(self.node.kind()) {
            return None;
        }

        let mut current = self.node.parent()?;
        loop {
            if current.parent().is_none() {
                return Some(Cursor::new(self.tu, current));
            }
            match decls.by_site(current.id()) {
                Some(entry) if !is_declaration || entry.defines_scope => {
                    return Some(Cursor::new(self.tu, current));
                }
                _ => {}
            }
            if !is_declaration && is_opaque(current.kind()) {
                return None;
            }
            current = current.parent()?;
        }
    }

    /// The declaration this cursor refers to. Declarations refer to themselves.
    pub fn referenced(&self) -> Option<Cursor<'tu>> {
        let decls = self.tu.decls();
        let id = self.node.id();
        if decls.by_site(id).is_some() {
            return Some(*self);
        }

        let entry = if self.node.kind() == "call_expression" {
            let callee = callee_name_node(self.node)?;
            decls.resolve(callee, self.tu.source().as_bytes())?
        } else {
            decls.resolve(self.node, self.tu.source().as_bytes())?
        };
        self.tu.node_for(entry).map(|node| Cursor::new(self.tu, node))
    }

    /// Unique symbol reference of a declaration cursor.
    pub fn usr(&self) -> Option<String> {
        self.tu
            .decls()
            .by_site(self.node.id())
            .map(|entry| entry.usr.clone())
            .filter(|usr| !usr.is_empty())
    }

    fn text(&self) -> Option<&'tu str> {
        self.node.utf8_text(self.tu.source().as_bytes()).ok()
    }

    fn point_location(&self, point: tree_sitter::Point) -> SourceLocation {
        SourceLocation {
            file: self.tu.path().to_path_buf(),
            line: point.row + 1,
            column: point.column + 1,
        }
    }
}

fn is_preprocessor_record(kind: &str) -> bool {
    matches!(kind, "preproc_def" | "preproc_function_def" | "preproc_include")
}

/// Nodes whose lexical context is not tracked: bodies, statements,
/// expressions and comments.
fn is_opaque(kind: &str) -> bool {
    kind == "comment"
        || is_body_kind(kind)
        || kind.ends_with("_statement")
        || kind.ends_with("_expression")
}

/// The name node a call expression invokes.
fn callee_name_node(call: Node<'_>) -> Option<Node<'_>> {
    let mut node = call.child_by_field_name("function")?;
    loop {
        node = match node.kind() {
            "qualified_identifier" | "template_function" => node.child_by_field_name("name")?,
            "field_expression" => node.child_by_field_name("field")?,
            "parenthesized_expression" => node.named_child(0)?,
            _ => return Some(node),
        };
    }
}

impl TranslationUnit {
    /// Locate the tree node a declaration entry sits on.
    pub(crate) fn node_for(&self, entry: &super::symbols::DeclEntry) -> Option<Node<'_>> {
        let mut node = self
            .tree()
            .root_node()
            .descendant_for_byte_range(entry.site_range.start, entry.site_range.end)?;
        loop {
            if node.id() == entry.site {
                return Some(node);
            }
            node = node.parent()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ParseOptions;

    fn unit(source: &str) -> TranslationUnit {
        TranslationUnit::from_source(
            PathBuf::from("/proj/shapes.cpp"),
            source.to_string(),
            Vec::new(),
            ParseOptions::default(),
        )
        .unwrap()
    }

    const SOURCE: &str = "namespace geo {
struct Point {
    int x;
    int y;
};
int area(Point p) {
    // width times height
    return p.x * p.y;
}
}
int main() {
    geo::Point origin;
    return geo::area(origin);
}
";

    #[test]
    fn test_root_cursor_kind_and_extent() {
        let tu = unit(SOURCE);
        let root = tu.cursor();
        assert_eq!(root.kind(), CursorKind::TranslationUnit);
        assert_eq!(root.extent().start.line, 1);
        assert!(root.lexical_parent().is_none());
        assert!(root.referenced().is_none());
    }

    #[test]
    fn test_declaration_cursor_refers_to_itself() {
        let tu = unit(SOURCE);
        let cursor = tu.cursor_at(2, 2).unwrap();
        assert_eq!(cursor.kind(), CursorKind::StructDecl);
        assert_eq!(cursor.spelling().as_deref(), Some("Point"));
        assert_eq!(cursor.referenced(), Some(cursor));
        assert_eq!(cursor.usr().as_deref(), Some("c:@N@geo@S@Point"));
        assert!(cursor.is_scope());
    }

    #[test]
    fn test_lexical_parent_of_member_is_record() {
        let tu = unit(SOURCE);
        let field = tu.cursor_at(3, 5).unwrap().lexical_parent().unwrap();
        assert_eq!(field.kind(), CursorKind::FieldDecl);
        let record = field.lexical_parent().unwrap();
        assert_eq!(record.spelling().as_deref(), Some("Point"));
        let ns = record.lexical_parent().unwrap();
        assert_eq!(ns.kind(), CursorKind::Namespace);
        assert_eq!(ns.lexical_parent().unwrap().kind(), CursorKind::TranslationUnit);
    }

    #[test]
    fn test_reference_resolves_through_qualifier() {
        let tu = unit(SOURCE);
        // `area` in `geo::area(origin)`
        let cursor = tu.cursor_at(13, 17).unwrap();
        assert_eq!(cursor.kind(), CursorKind::DeclRefExpr);
        let decl = cursor.referenced().unwrap();
        assert_eq!(decl.kind(), CursorKind::FunctionDecl);
        assert_eq!(decl.usr().as_deref(), Some("c:@N@geo@F@area#"));
        assert_eq!(decl.location().line, 6);
        assert_eq!(decl.location().column, 5);
    }

    #[test]
    fn test_comment_has_no_parent_or_reference() {
        let tu = unit(SOURCE);
        let cursor = tu.cursor_at(7, 10).unwrap();
        assert_eq!(cursor.kind(), CursorKind::Comment);
        assert!(cursor.referenced().is_none());
        assert!(cursor.lexical_parent().is_none());
    }

    #[test]
    fn test_children_hide_macros_without_detailed_processing() {
        let source = "#define LIMIT 4\nint x;\n";
        let detailed = unit(source);
        assert_eq!(detailed.cursor().children().len(), 2);

        let plain = TranslationUnit::from_source(
            PathBuf::from("/proj/a.c"),
            source.to_string(),
            Vec::new(),
            ParseOptions {
                detailed_preprocessing: false,
            },
        )
        .unwrap();
        assert_eq!(plain.cursor().children().len(), 1);
    }
}
