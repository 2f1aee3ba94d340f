//! Declaration table and in-unit name lookup.
//!
//! Built in a single pass over the tree with an explicit work stack. Each
//! declaration is attached to one tree node (its site): the declaration node itself
//! for its first declarator, the declarator node for any further ones
//! (`int a, b;`). USRs follow clang's layout closely enough to be stable
//! across units: `c:@N@ns@S@Record@F@method#`, with function-local
//! entities qualified by file and byte offset instead.

use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tree_sitter::Node;

use super::cursor::CursorKind;
use super::ParseOptions;

#[derive(Debug, Clone)]
pub(crate) struct DeclEntry {
    pub name: String,
    pub kind: CursorKind,
    pub site: usize,
    pub site_range: Range<usize>,
    pub name_byte: usize,
    pub line: usize,
    pub column: usize,
    pub usr: String,
    /// Node id of the block, body or unit the declaration is visible in.
    pub container: usize,
    pub container_depth: usize,
    /// Names of the enclosing named scopes, outermost first.
    pub scope_names: Vec<String>,
    pub defines_scope: bool,
    pub is_definition: bool,
    pub is_local: bool,
}

#[derive(Debug, Default)]
pub(crate) struct DeclTable {
    entries: Vec<DeclEntry>,
    by_site: HashMap<usize, usize>,
    by_name_node: HashMap<usize, usize>,
    by_name: HashMap<String, Vec<usize>>,
}

/// Lexical context carried down the work stack.
#[derive(Debug, Clone)]
struct Context {
    segments: String,
    scope_names: Vec<String>,
    in_function: bool,
    in_record: bool,
    container: usize,
    container_depth: usize,
    depth: usize,
}

/// Declaration found by the classifier, before it gets a USR.
struct Found<'t> {
    site: Node<'t>,
    name_node: Node<'t>,
    qualifiers: Vec<String>,
    name: String,
    kind: CursorKind,
    defines_scope: bool,
    is_definition: bool,
}

impl DeclTable {
    pub fn build(root: Node<'_>, src: &[u8], file_name: &str, options: ParseOptions) -> Self {
        let mut table = DeclTable::default();
        let start = Context {
            segments: String::new(),
            scope_names: Vec::new(),
            in_function: false,
            in_record: false,
            container: root.id(),
            container_depth: 0,
            depth: 0,
        };

        let mut stack = vec![(root, start)];
        while let Some((node, ctx)) = stack.pop() {
            let found = classify(node, src, &ctx, options);
            let mut child_ctx = ctx.clone();
            child_ctx.depth = ctx.depth + 1;
            if is_container(node.kind()) {
                child_ctx.container = node.id();
                child_ctx.container_depth = ctx.depth;
            }

            for decl in found {
                let qualifier_segments: String = decl
                    .qualifiers
                    .iter()
                    .map(|q| table.scope_segment(q))
                    .collect();
                let is_local = ctx.in_function || decl.kind == CursorKind::ParmDecl;
                let usr = if decl.kind == CursorKind::MacroDefinition {
                    format!("c:{}@{}@macro@{}", file_name, decl.name_node.start_byte(), decl.name)
                } else if is_local {
                    format!("c:{}@{}@{}", file_name, decl.name_node.start_byte(), decl.name)
                } else {
                    format!(
                        "c:{}{}{}",
                        ctx.segments,
                        qualifier_segments,
                        own_segment(decl.kind, &decl.name)
                    )
                };

                if decl.defines_scope {
                    child_ctx.segments = format!("{}{}{}", ctx.segments, qualifier_segments, own_segment(decl.kind, &decl.name));
                    child_ctx.scope_names.extend(decl.qualifiers.iter().cloned());
                    child_ctx.scope_names.push(decl.name.clone());
                    if matches!(decl.kind, CursorKind::FunctionDecl | CursorKind::CxxMethod) {
                        child_ctx.in_function = true;
                        child_ctx.in_record = false;
                    }
                }

                let mut scope_names = ctx.scope_names.clone();
                scope_names.extend(decl.qualifiers.iter().cloned());
                let position = decl.name_node.start_position();
                table.push(
                    DeclEntry {
                        name: decl.name,
                        kind: decl.kind,
                        site: decl.site.id(),
                        site_range: decl.site.byte_range(),
                        name_byte: decl.name_node.start_byte(),
                        line: position.row + 1,
                        column: position.column + 1,
                        usr,
                        container: ctx.container,
                        container_depth: ctx.container_depth,
                        scope_names,
                        defines_scope: decl.defines_scope,
                        is_definition: decl.is_definition,
                        is_local,
                    },
                    decl.name_node.id(),
                );
            }

            // Anonymous scopes still contribute a USR segment.
            if let Some(segment) = anonymous_segment(node) {
                child_ctx.segments.push_str(segment);
            }
            if matches!(node.kind(), "class_specifier" | "struct_specifier" | "union_specifier")
                && node.child_by_field_name("body").is_some()
            {
                child_ctx.in_record = true;
            }

            let mut walker = node.walk();
            let children: Vec<Node<'_>> = node.named_children(&mut walker).collect();
            for child in children.into_iter().rev() {
                stack.push((child, child_ctx.clone()));
            }
        }

        table
    }

    fn push(&mut self, entry: DeclEntry, name_node: usize) {
        let idx = self.entries.len();
        self.by_site.insert(entry.site, idx);
        self.by_name_node.insert(name_node, idx);
        self.by_name.entry(entry.name.clone()).or_default().push(idx);
        self.entries.push(entry);
    }

    /// USR segment for a qualifier, using whatever is already known about that name.
    fn scope_segment(&self, name: &str) -> String {
        let kind = self
            .by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|idx| self.entries[*idx].kind)
            .find(|kind| is_scope_kind(*kind));
        match kind {
            Some(CursorKind::Namespace) => format!("@N@{}", name),
            Some(CursorKind::UnionDecl) => format!("@U@{}", name),
            Some(CursorKind::EnumDecl) => format!("@E@{}", name),
            _ => format!("@S@{}", name),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn by_site(&self, id: usize) -> Option<&DeclEntry> {
        self.by_site.get(&id).map(|idx| &self.entries[*idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = Declaration<'_>> {
        self.entries.iter().map(|entry| Declaration { entry })
    }

    /// Resolve a name node to the declaration it most plausibly refers to.
    ///
    /// Candidates must match the name, a compatible kind and any explicit
    /// qualifier. Among those visible from the reference (declared in an
    /// enclosing block, and before the use for locals) the innermost wins,
    /// definitions before declarations. When nothing is visible, non-local
    /// candidates are considered (members used from out-of-line bodies).
    pub fn resolve(&self, node: Node<'_>, src: &[u8]) -> Option<&DeclEntry> {
        if let Some(idx) = self.by_name_node.get(&node.id()) {
            return Some(&self.entries[*idx]);
        }

        let accepts: fn(CursorKind) -> bool = match node.kind() {
            "identifier" => is_value_kind,
            "type_identifier" => is_type_kind,
            "namespace_identifier" => is_scope_kind,
            "field_identifier" => is_member_kind,
            _ => return None,
        };
        let name = node.utf8_text(src).ok()?;
        let qualifiers = qualifiers_of(node, src);

        let matching: Vec<&DeclEntry> = self
            .by_name
            .get(name)?
            .iter()
            .map(|idx| &self.entries[*idx])
            .filter(|entry| accepts(entry.kind))
            .filter(|entry| qualifiers.is_empty() || entry.scope_names.ends_with(&qualifiers))
            .collect();
        if matching.is_empty() {
            return None;
        }

        let mut ancestors = HashSet::new();
        let mut current = Some(node);
        while let Some(n) = current {
            ancestors.insert(n.id());
            current = n.parent();
        }
        let offset = node.start_byte();

        let visible: Vec<&DeclEntry> = matching
            .iter()
            .copied()
            .filter(|entry| ancestors.contains(&entry.container))
            .filter(|entry| !entry.is_local || entry.name_byte <= offset)
            .collect();
        let pool = if visible.is_empty() {
            matching.into_iter().filter(|entry| !entry.is_local).collect()
        } else {
            visible
        };

        pool.into_iter()
            .max_by_key(|entry| (entry.container_depth, entry.is_definition, entry.name_byte))
    }
}

/// Public read-only view of one declaration.
#[derive(Debug, Clone, Copy)]
pub struct Declaration<'a> {
    entry: &'a DeclEntry,
}

impl<'a> Declaration<'a> {
    pub fn name(&self) -> &'a str {
        &self.entry.name
    }

    pub fn kind(&self) -> CursorKind {
        self.entry.kind
    }

    pub fn usr(&self) -> &'a str {
        &self.entry.usr
    }

    pub fn line(&self) -> usize {
        self.entry.line
    }

    pub fn column(&self) -> usize {
        self.entry.column
    }

    pub fn is_definition(&self) -> bool {
        self.entry.is_definition
    }

    /// Function-local entities and parameters.
    pub fn is_local(&self) -> bool {
        self.entry.is_local
    }
}

fn own_segment(kind: CursorKind, name: &str) -> String {
    match kind {
        CursorKind::Namespace => format!("@N@{}", name),
        CursorKind::ClassDecl | CursorKind::StructDecl => format!("@S@{}", name),
        CursorKind::UnionDecl => format!("@U@{}", name),
        CursorKind::EnumDecl => format!("@E@{}", name),
        CursorKind::FunctionDecl | CursorKind::CxxMethod => format!("@F@{}#", name),
        CursorKind::FieldDecl => format!("@FI@{}", name),
        CursorKind::TypedefDecl => format!("@T@{}", name),
        _ => format!("@{}", name),
    }
}

fn anonymous_segment(node: Node<'_>) -> Option<&'static str> {
    if node.child_by_field_name("name").is_some() {
        return None;
    }
    match node.kind() {
        "namespace_definition" => Some("@aN"),
        "class_specifier" | "struct_specifier" if node.child_by_field_name("body").is_some() => Some("@Sa"),
        "union_specifier" if node.child_by_field_name("body").is_some() => Some("@Ua"),
        "enum_specifier" if node.child_by_field_name("body").is_some() => Some("@Ea"),
        _ => None,
    }
}

fn is_container(kind: &str) -> bool {
    matches!(
        kind,
        "function_definition"
            | "lambda_expression"
            | "compound_statement"
            | "declaration_list"
            | "field_declaration_list"
            | "for_statement"
            | "for_range_loop"
            | "catch_clause"
    )
}

fn is_scope_kind(kind: CursorKind) -> bool {
    matches!(
        kind,
        CursorKind::Namespace
            | CursorKind::ClassDecl
            | CursorKind::StructDecl
            | CursorKind::UnionDecl
            | CursorKind::EnumDecl
    )
}

fn is_type_kind(kind: CursorKind) -> bool {
    matches!(
        kind,
        CursorKind::ClassDecl
            | CursorKind::StructDecl
            | CursorKind::UnionDecl
            | CursorKind::EnumDecl
            | CursorKind::TypedefDecl
    )
}

fn is_value_kind(kind: CursorKind) -> bool {
    matches!(
        kind,
        CursorKind::VarDecl
            | CursorKind::ParmDecl
            | CursorKind::FunctionDecl
            | CursorKind::CxxMethod
            | CursorKind::FieldDecl
            | CursorKind::EnumConstantDecl
            | CursorKind::MacroDefinition
    )
}

fn is_member_kind(kind: CursorKind) -> bool {
    matches!(kind, CursorKind::FieldDecl | CursorKind::CxxMethod | CursorKind::FunctionDecl)
}

/// Declarations introduced directly by `node`.
fn classify<'t>(node: Node<'t>, src: &[u8], ctx: &Context, options: ParseOptions) -> Vec<Found<'t>> {
    let mut out = Vec::new();
    match node.kind() {
        "namespace_definition" => {
            if let Some(name_node) = node.child_by_field_name("name") {
                let mut parts = split_scope(name_node.utf8_text(src).unwrap_or(""));
                if let Some(name) = parts.pop() {
                    out.push(Found {
                        site: node,
                        name_node,
                        qualifiers: parts,
                        name,
                        kind: CursorKind::Namespace,
                        defines_scope: true,
                        is_definition: true,
                    });
                }
            }
        }
        "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
            let has_body = node.child_by_field_name("body").is_some();
            if let (true, Some(name)) = (has_body, node.child_by_field_name("name")) {
                if let Some((name_node, qualifiers, name)) = declarator_name(name, src) {
                    let kind = match node.kind() {
                        "class_specifier" => CursorKind::ClassDecl,
                        "struct_specifier" => CursorKind::StructDecl,
                        "union_specifier" => CursorKind::UnionDecl,
                        _ => CursorKind::EnumDecl,
                    };
                    out.push(Found {
                        site: node,
                        name_node,
                        qualifiers,
                        name,
                        kind,
                        defines_scope: true,
                        is_definition: true,
                    });
                }
            }
        }
        "function_definition" => {
            if let Some(declarator) = node.child_by_field_name("declarator") {
                if let Some((name_node, qualifiers, name)) = declarator_name(declarator, src) {
                    let kind = if ctx.in_record || !qualifiers.is_empty() {
                        CursorKind::CxxMethod
                    } else {
                        CursorKind::FunctionDecl
                    };
                    out.push(Found {
                        site: node,
                        name_node,
                        qualifiers,
                        name,
                        kind,
                        defines_scope: true,
                        is_definition: true,
                    });
                }
            }
        }
        "declaration" | "field_declaration" | "type_definition" => {
            let mut walker = node.walk();
            let declarators: Vec<Node<'t>> = node.children_by_field_name("declarator", &mut walker).collect();
            for (i, declarator) in declarators.into_iter().enumerate() {
                let Some((name_node, qualifiers, name)) = declarator_name(declarator, src) else {
                    continue;
                };
                let is_function = declares_function(declarator);
                let kind = match (node.kind(), is_function) {
                    ("type_definition", _) => CursorKind::TypedefDecl,
                    ("field_declaration", true) => CursorKind::CxxMethod,
                    ("field_declaration", false) => CursorKind::FieldDecl,
                    (_, true) if ctx.in_record => CursorKind::CxxMethod,
                    (_, true) => CursorKind::FunctionDecl,
                    (_, false) => CursorKind::VarDecl,
                };
                out.push(Found {
                    site: if i == 0 { node } else { declarator },
                    name_node,
                    qualifiers,
                    name,
                    kind,
                    defines_scope: false,
                    is_definition: !is_function,
                });
            }
        }
        "parameter_declaration" | "optional_parameter_declaration" => {
            if let Some(declarator) = node.child_by_field_name("declarator") {
                if let Some((name_node, _, name)) = declarator_name(declarator, src) {
                    out.push(Found {
                        site: node,
                        name_node,
                        qualifiers: Vec::new(),
                        name,
                        kind: CursorKind::ParmDecl,
                        defines_scope: false,
                        is_definition: true,
                    });
                }
            }
        }
        "alias_declaration" | "enumerator" => {
            if let Some(name_node) = node.child_by_field_name("name") {
                let name = name_node.utf8_text(src).unwrap_or("").to_string();
                if !name.is_empty() {
                    let kind = if node.kind() == "enumerator" {
                        CursorKind::EnumConstantDecl
                    } else {
                        CursorKind::TypedefDecl
                    };
                    out.push(Found {
                        site: node,
                        name_node,
                        qualifiers: Vec::new(),
                        name,
                        kind,
                        defines_scope: false,
                        is_definition: true,
                    });
                }
            }
        }
        "preproc_def" | "preproc_function_def" if options.detailed_preprocessing => {
            if let Some(name_node) = node.child_by_field_name("name") {
                let name = name_node.utf8_text(src).unwrap_or("").to_string();
                if !name.is_empty() {
                    out.push(Found {
                        site: node,
                        name_node,
                        qualifiers: Vec::new(),
                        name,
                        kind: CursorKind::MacroDefinition,
                        defines_scope: false,
                        is_definition: true,
                    });
                }
            }
        }
        _ => {}
    }
    out
}

/// Follow a declarator chain down to the declared name.
fn declarator_name<'t>(mut node: Node<'t>, src: &[u8]) -> Option<(Node<'t>, Vec<String>, String)> {
    let mut qualifiers = Vec::new();
    loop {
        match node.kind() {
            "identifier" | "field_identifier" | "type_identifier" | "namespace_identifier"
            | "destructor_name" | "operator_name" => {
                let text = node.utf8_text(src).ok()?.trim().to_string();
                return (!text.is_empty()).then_some((node, qualifiers, text));
            }
            "qualified_identifier" | "qualified_type_identifier" => {
                if let Some(scope) = node.child_by_field_name("scope") {
                    qualifiers.extend(split_scope(scope.utf8_text(src).unwrap_or("")));
                }
                node = node.child_by_field_name("name")?;
            }
            "template_function" | "template_type" | "template_method" => {
                node = node.child_by_field_name("name")?;
            }
            _ => {
                let count = node.named_child_count();
                node = node
                    .child_by_field_name("declarator")
                    .or_else(|| count.checked_sub(1).and_then(|last| node.named_child(last)))?;
            }
        }
    }
}

/// Whether a declarator declares a function (not a pointer to one).
fn declares_function(mut node: Node<'_>) -> bool {
    loop {
        if node.kind() == "function_declarator" {
            return node
                .child_by_field_name("declarator")
                .is_some_and(|inner| inner.kind() != "parenthesized_declarator");
        }
        match node.child_by_field_name("declarator") {
            Some(inner) => node = inner,
            None => return false,
        }
    }
}

/// Explicit `a::b::` qualifiers in front of a name node.
fn qualifiers_of(node: Node<'_>, src: &[u8]) -> Vec<String> {
    let mut qualifiers: Vec<String> = Vec::new();
    let mut current = node;
    while let Some(parent) = current.parent() {
        if !matches!(parent.kind(), "qualified_identifier" | "qualified_type_identifier") {
            break;
        }
        if parent.child_by_field_name("name").map(|n| n.id()) != Some(current.id()) {
            break;
        }
        if let Some(scope) = parent.child_by_field_name("scope") {
            let mut outer = split_scope(scope.utf8_text(src).unwrap_or(""));
            outer.extend(qualifiers);
            qualifiers = outer;
        }
        current = parent;
    }
    qualifiers
}

fn split_scope(text: &str) -> Vec<String> {
    text.split("::")
        .map(|part| part.split('<').next().unwrap_or("").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::TranslationUnit;
    use std::path::PathBuf;

    fn unit(source: &str) -> TranslationUnit {
        TranslationUnit::from_source(
            PathBuf::from("/proj/widget.cpp"),
            source.to_string(),
            Vec::new(),
            ParseOptions::default(),
        )
        .unwrap()
    }

    fn usr_of(tu: &TranslationUnit, name: &str) -> Vec<String> {
        tu.declarations()
            .filter(|d| d.name() == name)
            .map(|d| d.usr().to_string())
            .collect()
    }

    #[test]
    fn test_usrs_follow_scopes() {
        let tu = unit(
            "namespace ui {
class Widget {
public:
    void draw();
    int width;
};
enum Color { Red, Green };
}
void ui::Widget::draw() {}
int counter;
",
        );
        assert_eq!(usr_of(&tu, "Widget"), vec!["c:@N@ui@S@Widget"]);
        assert_eq!(usr_of(&tu, "width"), vec!["c:@N@ui@S@Widget@FI@width"]);
        assert_eq!(usr_of(&tu, "Red"), vec!["c:@N@ui@E@Color@Red"]);
        assert_eq!(usr_of(&tu, "counter"), vec!["c:@counter"]);
        // In-class declaration and out-of-line definition agree.
        assert_eq!(usr_of(&tu, "draw"), vec!["c:@N@ui@S@Widget@F@draw#", "c:@N@ui@S@Widget@F@draw#"]);
    }

    #[test]
    fn test_locals_are_file_qualified() {
        let tu = unit("int f(int a) {\n    int b = a;\n    return b;\n}\n");
        let locals: Vec<_> = tu.declarations().filter(|d| d.is_local()).collect();
        assert_eq!(locals.len(), 2);
        assert!(locals.iter().all(|d| d.usr().starts_with("c:widget.cpp@")));
        assert!(!tu.declarations().find(|d| d.name() == "f").unwrap().is_local());
    }

    #[test]
    fn test_multiple_declarators_get_separate_entries() {
        let tu = unit("int a, b;\n");
        assert_eq!(usr_of(&tu, "a"), vec!["c:@a"]);
        assert_eq!(usr_of(&tu, "b"), vec!["c:@b"]);
    }

    #[test]
    fn test_shadowing_prefers_innermost() {
        let tu = unit("int value;\nint f() {\n    int value = 1;\n    return value;\n}\n");
        // `value` in the return statement
        let cursor = tu.cursor_at(4, 12).unwrap();
        let decl = cursor.referenced().unwrap();
        assert_eq!(decl.location().line, 3);
        assert!(decl.usr().unwrap().starts_with("c:widget.cpp@"));
    }

    #[test]
    fn test_function_pointer_is_variable() {
        let tu = unit("int (*callback)(int);\nint handler(int);\n");
        let kinds: HashMap<&str, CursorKind> = tu.declarations().map(|d| (d.name(), d.kind())).collect();
        assert_eq!(kinds["callback"], CursorKind::VarDecl);
        assert_eq!(kinds["handler"], CursorKind::FunctionDecl);
    }

    #[test]
    fn test_split_scope_drops_template_arguments() {
        assert_eq!(split_scope("std::vector<int>::"), vec!["std", "vector"]);
        assert!(split_scope("").is_empty());
    }
}
