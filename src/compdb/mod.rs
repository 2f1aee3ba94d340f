//! Compilation database: per-file compiler invocations from `compile_commands.json`.
//!
//! The manifest is cached as an immutable [`Snapshot`] tagged with the
//! manifest's modification time. Callers always go through
//! [`CompilationDatabase::snapshot`], which re-reads the manifest only
//! when the file on disk is newer than the cached copy.

pub mod args;
pub mod builtin;

use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub use args::{include_dirs, normalize_path, source_file_in};
pub use builtin::resolve_builtin_include;

use crate::clock::FileStat;

/// One raw manifest entry. Both the `command` and `arguments` forms are accepted.
#[derive(Debug, Clone, Deserialize)]
struct ManifestEntry {
    #[serde(default)]
    directory: Option<String>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    arguments: Option<Vec<String>>,
}

/// Immutable view of the manifest at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<PathBuf, Vec<String>>,
    /// Manifest modification time this snapshot was built from.
    source_mtime: i64,
}

impl Snapshot {
    pub fn args(&self, file: &Path) -> Option<&[String]> {
        self.entries.get(file).map(Vec::as_slice)
    }

    pub fn contains(&self, file: &Path) -> bool {
        self.entries.contains_key(file)
    }

    pub fn files(&self) -> impl Iterator<Item = (&Path, &[String])> {
        self.entries.iter().map(|(f, a)| (f.as_path(), a.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source_mtime(&self) -> i64 {
        self.source_mtime
    }
}

/// Whether a cached snapshot must be rebuilt.
///
/// Nothing cached always loads. A manifest that has since disappeared
/// keeps the last good snapshot.
pub fn needs_refresh(cached_mtime: Option<i64>, manifest_mtime: Option<i64>) -> bool {
    match (cached_mtime, manifest_mtime) {
        (None, _) => true,
        (Some(cached), Some(on_disk)) => on_disk > cached,
        (Some(_), None) => false,
    }
}

/// Lazily refreshed compilation database for one project.
pub struct CompilationDatabase {
    manifest: PathBuf,
    builtin_include: PathBuf,
    system_roots: Vec<PathBuf>,
    stat: Arc<dyn FileStat>,
    cached: Mutex<Option<Arc<Snapshot>>>,
}

impl std::fmt::Debug for CompilationDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompilationDatabase")
            .field("manifest", &self.manifest)
            .field("builtin_include", &self.builtin_include)
            .finish()
    }
}

impl CompilationDatabase {
    pub fn new(
        manifest: PathBuf,
        builtin_include: PathBuf,
        system_roots: Vec<PathBuf>,
        stat: Arc<dyn FileStat>,
    ) -> Self {
        Self {
            manifest,
            builtin_include,
            system_roots,
            stat,
            cached: Mutex::new(None),
        }
    }

    pub fn manifest(&self) -> &Path {
        &self.manifest
    }

    /// The `-I<builtin>` flag appended to every retained entry.
    pub fn builtin_flag(&self) -> String {
        format!("-I{}", self.builtin_include.display())
    }

    /// Current snapshot, re-reading the manifest if it changed on disk.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let cached = self.cached.lock().ok().and_then(|guard| guard.clone());
        let on_disk = self.stat.modified(&self.manifest).ok();

        if let Some(snapshot) = &cached {
            if !needs_refresh(Some(snapshot.source_mtime), on_disk) {
                return Arc::clone(snapshot);
            }
        }

        let fresh = Arc::new(self.load(on_disk.unwrap_or(0)));
        if let Ok(mut guard) = self.cached.lock() {
            // Another caller may have loaded a newer manifest meanwhile.
            let newer = guard
                .as_ref()
                .filter(|current| current.source_mtime > fresh.source_mtime)
                .cloned();
            if let Some(current) = newer {
                return current;
            }
            *guard = Some(Arc::clone(&fresh));
        }
        fresh
    }

    fn load(&self, manifest_mtime: i64) -> Snapshot {
        let raw: Vec<ManifestEntry> = match fs::read_to_string(&self.manifest)
            .map_err(|e| e.to_string())
            .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
        {
            Ok(entries) => entries,
            Err(e) => {
                warn!(manifest = %self.manifest.display(), error = %e, "unable to read compile commands");
                return Snapshot {
                    entries: HashMap::new(),
                    source_mtime: manifest_mtime,
                };
            }
        };

        let manifest_dir = self.manifest.parent().unwrap_or(Path::new("/")).to_path_buf();
        let builtin_flag = self.builtin_flag();
        let mut entries = HashMap::new();
        let mut dropped = 0usize;

        for entry in raw {
            let Some((file, mut argv)) = self.accept(entry, &manifest_dir) else {
                dropped += 1;
                continue;
            };
            argv.push(builtin_flag.clone());
            entries.insert(file, argv);
        }

        info!(
            manifest = %self.manifest.display(),
            files = entries.len(),
            dropped,
            "compilation database loaded"
        );
        Snapshot {
            entries,
            source_mtime: manifest_mtime,
        }
    }

    /// Turn a manifest entry into `(absolute file, argv)` or reject it.
    fn accept(&self, entry: ManifestEntry, manifest_dir: &Path) -> Option<(PathBuf, Vec<String>)> {
        let argv: Vec<String> = match (entry.arguments, entry.command) {
            (Some(arguments), _) if !arguments.is_empty() => arguments,
            (_, Some(command)) => command.split_whitespace().map(str::to_string).collect(),
            _ => return None,
        };
        let compiler = argv.first()?;
        if !(compiler.contains("++") || compiler.contains("cc") || compiler.contains("clang")) {
            return None;
        }

        let directory = match entry.directory {
            Some(dir) if Path::new(&dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => manifest_dir.join(dir),
            None => manifest_dir.to_path_buf(),
        };
        let file = PathBuf::from(entry.file?);
        let file = normalize_path(&if file.is_absolute() { file } else { directory.join(file) });

        if self.system_roots.iter().any(|root| file.starts_with(root)) {
            debug!(file = %file.display(), "skipping system header entry");
            return None;
        }
        if self.stat.modified(&file).is_err() {
            debug!(file = %file.display(), "skipping entry for missing file");
            return None;
        }
        Some((file, argv))
    }
}

/// Walk from `start` up to `/` looking for `manifest_name`.
///
/// Returns the directory that holds it and the manifest path.
pub fn locate_manifest(start: &Path, manifest_name: &str) -> Option<(PathBuf, PathBuf)> {
    let mut current = Some(start);
    while let Some(dir) = current {
        let candidate = dir.join(manifest_name);
        if candidate.is_file() {
            return Some((dir.to_path_buf(), candidate));
        }
        current = dir.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StatMap;
    use tempfile::tempdir;

    fn database(dir: &Path, stat: Arc<StatMap>) -> CompilationDatabase {
        CompilationDatabase::new(
            dir.join("compile_commands.json"),
            PathBuf::from("/opt/clang/include"),
            vec![PathBuf::from("/usr/include")],
            stat,
        )
    }

    #[test]
    fn test_needs_refresh_predicate() {
        assert!(needs_refresh(None, None));
        assert!(needs_refresh(None, Some(5)));
        assert!(needs_refresh(Some(5), Some(6)));
        assert!(!needs_refresh(Some(5), Some(5)));
        assert!(!needs_refresh(Some(5), Some(4)));
        assert!(!needs_refresh(Some(5), None));
    }

    #[test]
    fn test_entries_filtered_and_builtin_appended() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let manifest = serde_json::json!([
            {"directory": root, "file": "src/a.cpp", "command": "clang++ -Iinc -c src/a.cpp"},
            {"directory": root, "file": "src/b.c", "arguments": ["gcc", "-c", "src/b.c"]},
            {"directory": root, "file": "src/gone.cpp", "command": "clang++ -c src/gone.cpp"},
            {"directory": root, "file": "/usr/include/sys.h", "command": "clang++ -c sys.h"},
            {"directory": root, "file": "gen.py", "command": "python gen.py"}
        ]);
        fs::write(root.join("compile_commands.json"), manifest.to_string()).unwrap();

        let stat = Arc::new(StatMap::new());
        stat.set(root.join("compile_commands.json"), 100);
        stat.set(root.join("src/a.cpp"), 1);
        stat.set(root.join("src/b.c"), 1);
        stat.set("/usr/include/sys.h", 1);
        stat.set(root.join("gen.py"), 1);

        let db = database(root, stat);
        let snapshot = db.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.args(&root.join("src/a.cpp")).unwrap(),
            &["clang++", "-Iinc", "-c", "src/a.cpp", "-I/opt/clang/include"]
        );
        assert_eq!(
            snapshot.args(&root.join("src/b.c")).unwrap(),
            &["gcc", "-c", "src/b.c", "-I/opt/clang/include"]
        );
        assert_eq!(snapshot.source_mtime(), 100);
    }

    #[test]
    fn test_reload_only_when_manifest_newer() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        let path = root.join("compile_commands.json");
        let entry = |file: &str| {
            serde_json::json!([{ "directory": root, "file": file, "command": format!("cc -c {}", file) }])
                .to_string()
        };
        fs::write(&path, entry("one.c")).unwrap();

        let stat = Arc::new(StatMap::new());
        stat.set(&path, 10);
        stat.set(root.join("one.c"), 1);
        stat.set(root.join("two.c"), 1);
        let db = database(root, Arc::clone(&stat));

        let first = db.snapshot();
        assert!(first.contains(&root.join("one.c")));

        // Content changes but the recorded time does not: cached copy wins.
        fs::write(&path, entry("two.c")).unwrap();
        let second = db.snapshot();
        assert!(Arc::ptr_eq(&first, &second));

        stat.set(&path, 11);
        let third = db.snapshot();
        assert!(third.contains(&root.join("two.c")));
        assert!(!third.contains(&root.join("one.c")));
    }

    #[test]
    fn test_unreadable_manifest_gives_empty_snapshot() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("compile_commands.json"), "not json").unwrap();
        let db = database(dir.path(), Arc::new(StatMap::new()));
        assert!(db.snapshot().is_empty());
    }

    #[test]
    fn test_locate_manifest_walks_up() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("a/compile_commands.json"), "[]").unwrap();

        let (root, manifest) = locate_manifest(&nested, "compile_commands.json").unwrap();
        assert_eq!(root, dir.path().join("a"));
        assert_eq!(manifest, dir.path().join("a/compile_commands.json"));
        assert!(locate_manifest(&nested, "missing.json").is_none());
    }
}
