//! Queries answered from a parsed unit: the symbol under a position and
//! the lexical scope of each line.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::ast::{Cursor, TranslationUnit};

/// A resolved declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolLocation {
    pub usr: String,
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

/// Scope label for every line of `root`'s file, indexed by 1-based line.
///
/// Index 0 is unused. Lines inside no named scope hold an empty string.
/// Each line takes the qualified name (`outer::inner`) of the deepest
/// scope declaration spanning it; among equally deep ones the first wins.
///
/// Only namespaces, records, enums and functions claim lines. Variables,
/// fields, parameters and references have spellings too but never label a
/// line, so `int x = 1;` inside `ns` reads `ns`, not `ns::x`. Unnamed
/// scopes claim nothing while their children are still visited.
pub fn compute_scope_table(root: Cursor<'_>) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut depths: Vec<i64> = Vec::new();

    // (cursor, depth, qualified name of the enclosing scope)
    let mut stack: Vec<(Cursor<'_>, i64, String)> = vec![(root, 0, String::new())];

    while let Some((parent, depth, path)) = stack.pop() {
        let parent_file = parent.extent().end.file;
        let children = parent.children();

        for child in children.into_iter().rev() {
            let extent = child.extent();
            if extent.end.file != parent_file {
                continue;
            }

            let mut child_path = path.clone();
            if child.is_scope() {
                if let Some(name) = child.spelling() {
                    if !child_path.is_empty() {
                        child_path.push_str("::");
                    }
                    child_path.push_str(&name);

                    let last = extent.end.line;
                    if names.len() <= last {
                        names.resize(last + 1, String::new());
                        depths.resize(last + 1, -1);
                    }
                    for line in extent.start.line..=last {
                        if depths[line] < depth {
                            depths[line] = depth;
                            names[line] = child_path.clone();
                        }
                    }
                }
            }
            stack.push((child, depth + 1, child_path));
        }
    }
    names
}

/// The declaration referenced at a 1-based position, walking outward
/// through lexical parents until something with a USR is found.
pub fn usr_under_cursor(tu: &TranslationUnit, line: usize, column: usize) -> Option<SymbolLocation> {
    let mut cursor = tu.cursor_at(line, column)?;
    loop {
        if let Some(decl) = cursor.referenced() {
            if let Some(usr) = decl.usr() {
                let location = decl.location();
                return Some(SymbolLocation {
                    usr,
                    file: location.file,
                    line: location.line,
                    column: location.column,
                });
            }
        }
        let next = cursor.lexical_parent()?;
        if next == cursor {
            return None;
        }
        cursor = next;
    }
}
