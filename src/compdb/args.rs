//! Helpers for picking apart compiler argument vectors.

use std::path::{Path, PathBuf};

/// Extensions treated as C/C++ sources when scanning an argument vector.
const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx", "c++", "C", "m", "mm"];

/// Flags whose value is the next argument when not glued on.
const FLAGS_WITH_VALUE: &[&str] = &[
    "-o", "-I", "-isystem", "-iquote", "-idirafter", "-include", "-imacros", "-D", "-U", "-x",
    "-MF", "-MT", "-MQ", "-isysroot", "-target", "-arch", "-Xclang",
];

/// The source file a compiler invocation compiles, if any.
pub fn source_file_in(args: &[String]) -> Option<PathBuf> {
    let mut found = None;
    let mut skip_next = false;
    for arg in args.iter().skip(1) {
        if skip_next {
            skip_next = false;
            continue;
        }
        if FLAGS_WITH_VALUE.contains(&arg.as_str()) {
            skip_next = true;
            continue;
        }
        if arg.starts_with('-') {
            continue;
        }
        let path = Path::new(arg);
        let is_source = path
            .extension()
            .map(|ext| SOURCE_EXTENSIONS.contains(&ext.to_string_lossy().as_ref()))
            .unwrap_or(false);
        if is_source {
            found = Some(path.to_path_buf());
        }
    }
    found
}

/// Include search directories named by `-I`, `-iquote` and `-isystem`, in order.
///
/// Relative directories are resolved against `base`.
pub fn include_dirs(args: &[String], base: &Path) -> Vec<PathBuf> {
    const PREFIXES: &[&str] = &["-isystem", "-iquote", "-I"];

    let mut dirs = Vec::new();
    let mut iter = args.iter().peekable();
    while let Some(arg) = iter.next() {
        let Some(prefix) = PREFIXES.iter().find(|p| arg.starts_with(**p)) else {
            continue;
        };
        let value = if arg.len() > prefix.len() {
            Some(arg[prefix.len()..].to_string())
        } else {
            iter.next().cloned()
        };
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            let dir = Path::new(&value);
            dirs.push(if dir.is_absolute() { dir.to_path_buf() } else { base.join(dir) });
        }
    }
    dirs
}

/// Lexically normalize `.` and `..` components without touching the disk.
pub fn normalize_path(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn test_source_file_skips_flag_values() {
        let args = argv("clang++ -I include -o out/main.o -c src/main.cpp -DNAME=x.c");
        assert_eq!(source_file_in(&args), Some(PathBuf::from("src/main.cpp")));
        assert_eq!(source_file_in(&argv("clang++ -c")), None);
    }

    #[test]
    fn test_include_dirs_glued_and_separate() {
        let args = argv("cc -Iinc -I /abs/inc -isystem sys -iquote q -c a.c");
        assert_eq!(
            include_dirs(&args, Path::new("/proj")),
            vec![
                PathBuf::from("/proj/inc"),
                PathBuf::from("/abs/inc"),
                PathBuf::from("/proj/sys"),
                PathBuf::from("/proj/q"),
            ]
        );
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("/a/b/../c/./d.h")), PathBuf::from("/a/c/d.h"));
    }
}
