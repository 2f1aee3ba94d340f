//! Staleness tracking: which originating files must be handed to the
//! bulk indexer.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::clock::FileStat;
use crate::compdb::CompilationDatabase;
use crate::error::{CtrlkError, Result};
use crate::indexer::{Indexer, ParseJob};
use crate::store::{extract_part, keys, IndexStore};

/// Compiler invocation for a file, possibly borrowed from the source that includes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArgs {
    /// The compilable file whose invocation applies.
    pub origin: PathBuf,
    pub args: Vec<String>,
    /// Modification time of the queried file.
    pub mtime: i64,
}

/// What one incremental pass handed to the indexer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    /// Jobs for compilation database entries.
    pub sources: usize,
    /// Jobs for origins of headers newer than their recorded time.
    pub header_origins: usize,
    /// Vanished files whose symbols were dropped.
    pub removed: usize,
    /// Stale headers whose origin is no longer in the compilation database.
    pub orphaned: usize,
}

pub struct Tracker<'a> {
    pub compdb: &'a CompilationDatabase,
    pub store: &'a IndexStore,
    pub indexer: &'a dyn Indexer,
    pub stat: &'a dyn FileStat,
}

impl Tracker<'_> {
    /// Resolve the invocation for `file`. `Ok(None)` means "not indexed".
    pub fn file_args(&self, file: &Path) -> Result<Option<FileArgs>> {
        let mtime = self.stat.modified(file).map_err(|source| CtrlkError::Stat {
            path: file.to_path_buf(),
            source,
        })?;
        let snapshot = self.compdb.snapshot();

        let origin = if snapshot.contains(file) {
            file.to_path_buf()
        } else {
            match self.store.origin_of(&file.to_string_lossy()) {
                Some(origin) => PathBuf::from(origin),
                None => return Ok(None),
            }
        };
        Ok(snapshot.args(&origin).map(|args| FileArgs {
            origin: origin.clone(),
            args: args.to_vec(),
            mtime,
        }))
    }

    /// Submit one job for `file` (or its origin). Returns whether a job was submitted.
    pub fn index_single_file(&self, file: &Path) -> Result<bool> {
        match self.file_args(file) {
            Ok(Some(found)) => {
                debug!(file = %file.display(), origin = %found.origin.display(), "reparse requested");
                self.indexer.submit(ParseJob {
                    file: found.origin,
                    args: found.args,
                    mtime: found.mtime,
                    force: false,
                });
                Ok(true)
            }
            Ok(None) => {
                debug!(file = %file.display(), "reparse requested for unindexed file");
                Ok(false)
            }
            Err(CtrlkError::Stat { path, source }) => {
                debug!(file = %path.display(), error = %source, "file vanished, dropping its symbols");
                self.indexer.remove_symbols(&path);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Full incremental pass over the compilation database and recorded headers.
    pub fn scan_and_index(&self) -> ScanReport {
        let snapshot = self.compdb.snapshot();
        let mut report = ScanReport::default();

        for (file, args) in snapshot.files() {
            match self.stat.modified(file) {
                Ok(mtime) => {
                    self.indexer.submit(ParseJob {
                        file: file.to_path_buf(),
                        args: args.to_vec(),
                        mtime,
                        force: false,
                    });
                    report.sources += 1;
                }
                Err(_) => {
                    self.indexer.remove_symbols(file);
                    report.removed += 1;
                }
            }
        }

        let mut queued: HashSet<String> = HashSet::new();
        for (key, origin) in self.store.range(keys::HEADER_PREFIX) {
            let Some(header) = extract_part(&key, 1) else {
                continue;
            };
            let recorded = self.store.recorded_mtime(header).unwrap_or(i64::MIN);
            let live = match self.stat.modified(Path::new(header)) {
                Ok(mtime) => mtime,
                Err(_) => {
                    debug!(header, "header vanished, dropping its symbols");
                    self.indexer.remove_symbols(Path::new(header));
                    report.removed += 1;
                    continue;
                }
            };
            if live <= recorded {
                continue;
            }

            let Some(args) = snapshot.args(Path::new(&origin)) else {
                debug!(header, origin = %origin, "stale header has no current origin");
                report.orphaned += 1;
                continue;
            };
            if queued.insert(origin.clone()) {
                debug!(header, origin = %origin, "header changed, reindexing origin");
                self.indexer.submit(ParseJob {
                    file: PathBuf::from(&origin),
                    args: args.to_vec(),
                    mtime: live,
                    force: true,
                });
                report.header_origins += 1;
            }
        }

        info!(
            sources = report.sources,
            header_origins = report.header_origins,
            removed = report.removed,
            orphaned = report.orphaned,
            "scan submitted"
        );
        report
    }
}
