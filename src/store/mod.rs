//! Persistent symbol index.
//!
//! An ordered string map kept in memory and written to
//! `<index dir>/index.bin` with bincode. Writes go to a `.tmp` file
//! first and are renamed into place so a crash never leaves a torn index.

pub mod keys;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::error::{CtrlkError, Result};

pub use keys::extract_part;

const INDEX_FILE: &str = "index.bin";

/// One declaration as written to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub name: String,
    pub usr: String,
    pub kind: String,
    pub line: usize,
    pub column: usize,
}

#[derive(Serialize, Deserialize)]
struct SerializableIndex {
    entries: Vec<(String, String)>,
}

pub struct IndexStore {
    /// `None` for a scratch store that never touches disk.
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, String>>,
    dirty: AtomicBool,
    /// Serializes writers of the `.tmp` file.
    flushing: Mutex<()>,
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("path", &self.path)
            .field("entries", &self.len())
            .finish()
    }
}

impl IndexStore {
    /// Open (or create) the index under `dir`.
    ///
    /// An unreadable index file is discarded: everything in it can be
    /// rebuilt by the next scan.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);

        let entries = if path.exists() {
            match Self::load(&path) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding unreadable index");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        info!(path = %path.display(), entries = entries.len(), "index opened");

        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            flushing: Mutex::new(()),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(BTreeMap::new()),
            dirty: AtomicBool::new(false),
            flushing: Mutex::new(()),
        }
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        let bytes = fs::read(path)?;
        let index: SerializableIndex =
            bincode::deserialize(&bytes).map_err(|e| CtrlkError::Serialize(format!("bincode: {}", e)))?;
        Ok(index.entries.into_iter().collect())
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, String>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, String>> {
        self.dirty.store(true, Ordering::Release);
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn delete(&self, key: &str) -> bool {
        self.write().remove(key).is_some()
    }

    /// Every `(key, value)` whose key starts with `prefix`, in key order.
    pub fn range(&self, prefix: &str) -> Vec<(String, String)> {
        self.read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Distinct symbol names starting with `prefix`, at most `limit` of them.
    pub fn match_prefix(&self, prefix: &str, limit: usize) -> Vec<String> {
        let start = format!("{}{}", keys::NAME_PREFIX, prefix);
        let entries = self.read();
        let mut names: Vec<String> = Vec::new();
        for (key, _) in entries.range(start.clone()..).take_while(|(k, _)| k.starts_with(&start)) {
            if names.len() >= limit {
                break;
            }
            if let Some(name) = extract_part(key, 1) {
                if names.last().map(String::as_str) != Some(name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    /// Recorded index-time modification time of `file`.
    pub fn recorded_mtime(&self, file: &str) -> Option<i64> {
        self.get(&keys::mtime_key(file)).and_then(|v| v.parse().ok())
    }

    pub fn origin_of(&self, header: &str) -> Option<String> {
        self.get(&keys::header_key(header))
    }

    /// Replace everything `file` contributed to the name and USR indexes.
    pub fn replace_file_symbols(&self, file: &str, symbols: &[SymbolRecord]) {
        let mut entries = self.write();
        clear_symbols(&mut entries, file);
        for symbol in symbols {
            entries.insert(keys::name_key(&symbol.name, &symbol.usr), String::new());
            entries.insert(
                keys::usr_key(&symbol.usr, file, symbol.line, symbol.column),
                symbol.kind.clone(),
            );
            entries.insert(
                keys::owner_key(file, &symbol.usr, symbol.line, symbol.column),
                symbol.name.clone(),
            );
        }
    }

    /// Drop `file`'s symbols together with its header mapping and recorded time.
    pub fn remove_file(&self, file: &str) {
        let mut entries = self.write();
        let removed = clear_symbols(&mut entries, file);
        entries.remove(&keys::header_key(file));
        entries.remove(&keys::mtime_key(file));
        debug!(file, removed, "file removed from index");
    }

    /// Write the index to disk if anything changed since the last flush.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _flushing = self.flushing.lock().unwrap_or_else(|e| e.into_inner());
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot = SerializableIndex {
            entries: self.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        };
        let bytes = bincode::serialize(&snapshot).map_err(|e| CtrlkError::Serialize(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        let result = (|| -> Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, path)?;
            Ok(())
        })();
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result?;

        debug!(bytes = bytes.len(), entries = snapshot.entries.len(), "index flushed");
        Ok(())
    }
}

/// Remove the `o`, `u` and orphaned `s` keys of `file`. Returns how many symbols went.
fn clear_symbols(entries: &mut BTreeMap<String, String>, file: &str) -> usize {
    let prefix = keys::owner_prefix(file);
    let owned: Vec<(String, String)> = entries
        .range(prefix.clone()..)
        .take_while(|(k, _)| k.starts_with(&prefix))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for (key, name) in &owned {
        entries.remove(key);
        let rest = &key[prefix.len()..];
        let mut parts = rest.split(keys::SEPARATOR);
        let (Some(usr), Some(line), Some(column)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        entries.remove(&format!(
            "{}{usr}{sep}{file}{sep}{line}{sep}{column}",
            keys::USR_PREFIX,
            sep = keys::SEPARATOR
        ));

        let usr_prefix = format!("{}{usr}{}", keys::USR_PREFIX, keys::SEPARATOR);
        let still_declared = entries
            .range(usr_prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&usr_prefix));
        if !still_declared {
            entries.remove(&keys::name_key(name, usr));
        }
    }
    owned.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(name: &str, usr: &str, line: usize) -> SymbolRecord {
        SymbolRecord {
            name: name.to_string(),
            usr: usr.to_string(),
            kind: "function_decl".to_string(),
            line,
            column: 5,
        }
    }

    #[test]
    fn test_range_is_prefix_bounded() {
        let store = IndexStore::in_memory();
        store.put("h%%%/p/a.h", "/p/a.cpp");
        store.put("h%%%/p/b.h", "/p/b.cpp");
        store.put("i%%%other", "x");
        store.put("f%%%/p/a.h", "10");

        let range = store.range("h%%%");
        assert_eq!(range.len(), 2);
        assert_eq!(range[0], ("h%%%/p/a.h".to_string(), "/p/a.cpp".to_string()));
        assert_eq!(store.recorded_mtime("/p/a.h"), Some(10));
        assert_eq!(store.origin_of("/p/b.h").as_deref(), Some("/p/b.cpp"));
    }

    #[test]
    fn test_match_prefix_distinct_and_limited() {
        let store = IndexStore::in_memory();
        store.replace_file_symbols(
            "/p/a.cpp",
            &[
                record("parse", "c:@F@parse#", 1),
                record("parse", "c:@N@x@F@parse#", 2),
                record("parser", "c:@S@parser", 3),
                record("print", "c:@F@print#", 4),
            ],
        );
        assert_eq!(store.match_prefix("par", 10), vec!["parse", "parser"]);
        assert_eq!(store.match_prefix("p", 2), vec!["parse", "parser"]);
        assert!(store.match_prefix("zzz", 10).is_empty());
    }

    #[test]
    fn test_shared_usr_survives_one_file_removal() {
        let store = IndexStore::in_memory();
        let decl = record("helper", "c:@F@helper#", 3);
        store.replace_file_symbols("/p/a.h", &[decl.clone()]);
        store.replace_file_symbols("/p/b.cpp", &[SymbolRecord { line: 9, ..decl }]);
        store.put(keys::header_key("/p/a.h"), "/p/b.cpp");
        store.put(keys::mtime_key("/p/a.h"), "5");

        store.remove_file("/p/a.h");
        assert_eq!(store.match_prefix("helper", 5), vec!["helper"]);
        assert!(store.origin_of("/p/a.h").is_none());
        assert!(store.recorded_mtime("/p/a.h").is_none());
        assert_eq!(store.range("u%%%c:@F@helper#%%%").len(), 1);

        store.remove_file("/p/b.cpp");
        assert!(store.match_prefix("helper", 5).is_empty());
        assert!(store.range("o%%%").is_empty());
    }

    #[test]
    fn test_flush_and_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = IndexStore::open(dir.path()).unwrap();
            store.put("f%%%/p/a.cpp", "42");
            store.flush().unwrap();
        }
        assert!(dir.path().join("index.bin").exists());
        assert!(!dir.path().join("index.tmp").exists());

        let reopened = IndexStore::open(dir.path()).unwrap();
        assert_eq!(reopened.recorded_mtime("/p/a.cpp"), Some(42));
    }

    #[test]
    fn test_corrupt_index_starts_empty() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("index.bin"), b"\xff\xff\xff\xff\xff\xff\xff\xff\xff").unwrap();
        let store = IndexStore::open(dir.path()).unwrap();
        assert!(store.is_empty());
    }
}
