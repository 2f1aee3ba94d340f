//! Locating the AST library's builtin headers (`stddef.h`, `stdarg.h`, ...).
//!
//! Libraries ship them under `<prefix>/clang/<version>/include`. The
//! prefix depends on how the library was installed, so a handful of known
//! layouts relative to the library path are probed, then the usual
//! system-wide locations.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CtrlkError, Result};

/// Header whose presence proves a candidate directory is the builtin one.
const PROBE_HEADER: &str = "stddef.h";

fn candidate_roots(library_path: &Path) -> Vec<PathBuf> {
    vec![
        library_path.join("../lib/clang"),
        library_path.join("../clang"),
        library_path.join("clang"),
        library_path.to_path_buf(),
        PathBuf::from("/usr/lib64/clang"),
        PathBuf::from("/usr/lib/clang"),
    ]
}

/// Resolve the builtin include directory for the library at `library_path`.
pub fn resolve_builtin_include(library_path: &Path) -> Result<PathBuf> {
    for root in candidate_roots(library_path) {
        let Ok(entries) = fs::read_dir(&root) else {
            continue;
        };
        let mut versions: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        versions.sort_by(|a, b| version_key(a).cmp(&version_key(b)));

        let version_dir = match versions.last() {
            Some(latest) => root.join(latest),
            None => root.clone(),
        };
        let include = super::args::normalize_path(&version_dir.join("include"));
        debug!(candidate = %include.display(), "probing builtin include dir");
        if include.join(PROBE_HEADER).is_file() {
            return Ok(include);
        }
    }
    Err(CtrlkError::BuiltinHeaderResolution(library_path.to_path_buf()))
}

/// Orders `9.0.1` before `17`: numeric components first, then the raw name.
fn version_key(name: &str) -> (Vec<u64>, String) {
    let numbers = name
        .split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect();
    (numbers, name.to_string())
}
