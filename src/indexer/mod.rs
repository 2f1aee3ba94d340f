//! Bulk indexer: parses whole translation units in the background and
//! writes their declarations and include graph into the [`IndexStore`].
//!
//! Jobs run on a rayon pool. Submission never blocks; callers that need
//! the results wait with [`Indexer::wait_until_idle`].

use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::ast::{sanitize_buffer, ParseOptions, TranslationUnit};
use crate::clock::FileStat;
use crate::compdb::{include_dirs, normalize_path};
use crate::error::{CtrlkError, Result};
use crate::store::{keys, IndexStore, SymbolRecord};

/// One originating file to (re)index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJob {
    pub file: PathBuf,
    pub args: Vec<String>,
    /// Epoch seconds. The job is skipped if the index already holds this file at this time or later.
    pub mtime: i64,
    /// Parse even when the recorded time says the file is current. Set for
    /// origins of changed headers: the header's time says nothing about the origin's.
    pub force: bool,
}

/// Background indexing service.
pub trait Indexer: Send + Sync {
    fn submit(&self, job: ParseJob);
    /// Forget everything known about `file`.
    fn remove_symbols(&self, file: &Path);
    fn pending_job_count(&self) -> usize;
    /// Block until every submitted job has finished and the index is on disk.
    fn wait_until_idle(&self);
}

struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

struct Worker {
    store: Arc<IndexStore>,
    stat: Arc<dyn FileStat>,
    /// Include targets under these directories are not followed.
    skip_roots: Vec<PathBuf>,
}

pub struct BulkIndexer {
    pool: ThreadPool,
    worker: Arc<Worker>,
    pending: Arc<Pending>,
}

impl std::fmt::Debug for BulkIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkIndexer")
            .field("threads", &self.pool.current_num_threads())
            .field("pending", &self.pending_job_count())
            .finish()
    }
}

impl BulkIndexer {
    pub fn start(
        store: Arc<IndexStore>,
        stat: Arc<dyn FileStat>,
        skip_roots: Vec<PathBuf>,
        worker_count: usize,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_count.max(1))
            .thread_name(|i| format!("ctrlk-index-{}", i))
            .build()
            .map_err(|e| CtrlkError::Io(std::io::Error::other(e)))?;
        info!(workers = pool.current_num_threads(), "bulk indexer started");

        Ok(Self {
            pool,
            worker: Arc::new(Worker { store, stat, skip_roots }),
            pending: Arc::new(Pending {
                count: Mutex::new(0),
                idle: Condvar::new(),
            }),
        })
    }
}

impl Indexer for BulkIndexer {
    fn submit(&self, job: ParseJob) {
        if let Ok(mut count) = self.pending.count.lock() {
            *count += 1;
        }
        let worker = Arc::clone(&self.worker);
        let pending = Arc::clone(&self.pending);
        self.pool.spawn(move || {
            if let Err(e) = worker.run(&job) {
                warn!(file = %job.file.display(), error = %e, "indexing failed");
            }
            // The last job out puts the index on disk before it counts as done.
            let mut count = pending.count.lock().unwrap_or_else(|e| e.into_inner());
            if *count <= 1 {
                drop(count);
                if let Err(e) = worker.store.flush() {
                    warn!(error = %e, "index flush failed");
                }
                count = pending.count.lock().unwrap_or_else(|e| e.into_inner());
            }
            *count = count.saturating_sub(1);
            if *count == 0 {
                pending.idle.notify_all();
            }
        });
    }

    fn remove_symbols(&self, file: &Path) {
        self.worker.store.remove_file(&file.to_string_lossy());
        if self.pending_job_count() == 0 {
            if let Err(e) = self.worker.store.flush() {
                warn!(error = %e, "index flush failed");
            }
        }
    }

    fn pending_job_count(&self) -> usize {
        self.pending.count.lock().map(|c| *c).unwrap_or(0)
    }

    fn wait_until_idle(&self) {
        let mut count = self.pending.count.lock().unwrap_or_else(|e| e.into_inner());
        while *count > 0 {
            count = self.pending.idle.wait(count).unwrap_or_else(|e| e.into_inner());
        }
        drop(count);
        if let Err(e) = self.worker.store.flush() {
            warn!(error = %e, "index flush failed");
        }
    }
}

impl Worker {
    fn run(&self, job: &ParseJob) -> Result<()> {
        let origin = job.file.to_string_lossy().into_owned();
        if let Some(recorded) = self.store.recorded_mtime(&origin).filter(|_| !job.force) {
            if recorded >= job.mtime {
                debug!(file = %origin, recorded, job_mtime = job.mtime, "index up to date");
                return Ok(());
            }
        }

        let origin_mtime = match self.stat.modified(&job.file) {
            Ok(mtime) => mtime,
            Err(source) => {
                self.store.remove_file(&origin);
                return Err(CtrlkError::Stat {
                    path: job.file.clone(),
                    source,
                });
            }
        };

        let tu = self.parse_file(&job.file, &job.args)?;
        self.store.replace_file_symbols(&origin, &symbols_of(&tu));

        let base = job.file.parent().unwrap_or(Path::new("/")).to_path_buf();
        let search_dirs = include_dirs(&job.args, &base);
        let mut visited: HashSet<PathBuf> = HashSet::from([job.file.clone()]);
        let mut queue = vec![tu];
        let mut headers = 0usize;

        while let Some(unit) = queue.pop() {
            for header in self.resolve_includes(&unit, &search_dirs) {
                if !visited.insert(header.clone()) {
                    continue;
                }
                let Ok(mtime) = self.stat.modified(&header) else {
                    continue;
                };
                let name = header.to_string_lossy().into_owned();
                match self.parse_file(&header, &job.args) {
                    Ok(header_tu) => {
                        self.store.replace_file_symbols(&name, &symbols_of(&header_tu));
                        queue.push(header_tu);
                    }
                    Err(e) => warn!(header = %name, error = %e, "header parse failed"),
                }
                self.store.put(keys::header_key(&name), origin.clone());
                self.store.put(keys::mtime_key(&name), mtime.to_string());
                headers += 1;
            }
        }

        self.store.put(keys::mtime_key(&origin), origin_mtime.to_string());
        debug!(file = %origin, headers, "file indexed");
        Ok(())
    }

    fn parse_file(&self, path: &Path, args: &[String]) -> Result<TranslationUnit> {
        let source = fs::read_to_string(path).map_err(|e| CtrlkError::ParseFailure {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        TranslationUnit::from_source(
            path.to_path_buf(),
            sanitize_buffer(&source).into_owned(),
            args.to_vec(),
            ParseOptions::default(),
        )
    }

    /// Project headers named by `unit`'s `#include`s that exist on disk.
    fn resolve_includes(&self, unit: &TranslationUnit, search_dirs: &[PathBuf]) -> Vec<PathBuf> {
        let own_dir = unit.path().parent().unwrap_or(Path::new("/"));
        let mut found = Vec::new();
        for include in unit.includes() {
            let quoted_dir = include.quoted.then_some(own_dir);
            let resolved = quoted_dir
                .into_iter()
                .chain(search_dirs.iter().map(PathBuf::as_path))
                .map(|dir| normalize_path(&dir.join(&include.target)))
                .find(|candidate| self.stat.modified(candidate).is_ok());
            match resolved {
                Some(path) if self.skip_roots.iter().any(|root| path.starts_with(root)) => {}
                Some(path) => found.push(path),
                None => debug!(include = %include.target, from = %unit.path().display(), "include not found"),
            }
        }
        found
    }
}

fn symbols_of(tu: &TranslationUnit) -> Vec<SymbolRecord> {
    tu.declarations()
        .filter(|decl| !decl.is_local())
        .map(|decl| SymbolRecord {
            name: decl.name().to_string(),
            usr: decl.usr().to_string(),
            kind: decl.kind().as_str().to_string(),
            line: decl.line(),
            column: decl.column(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::DiskStat;
    use tempfile::tempdir;

    fn indexer(store: &Arc<IndexStore>, skip: Vec<PathBuf>) -> BulkIndexer {
        BulkIndexer::start(Arc::clone(store), Arc::new(DiskStat), skip, 2).unwrap()
    }

    fn job(file: &Path, mtime: i64) -> ParseJob {
        ParseJob {
            file: file.to_path_buf(),
            args: vec!["clang++".to_string(), "-Iinc".to_string(), file.display().to_string()],
            mtime,
            force: false,
        }
    }

    #[test]
    fn test_indexes_source_and_transitive_headers() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("inc")).unwrap();
        fs::write(root.join("inc/base.h"), "struct Base { int id; };\n").unwrap();
        fs::write(root.join("shape.h"), "#include \"base.h\"\nclass Shape : public Base {};\n").unwrap();
        fs::write(
            root.join("main.cpp"),
            "#include \"shape.h\"\n#include <vector>\nint main() { int local = 0; return local; }\n",
        )
        .unwrap();

        let store = Arc::new(IndexStore::in_memory());
        let indexer = indexer(&store, Vec::new());
        let main = root.join("main.cpp");
        indexer.submit(job(&main, i64::MAX - 1));
        indexer.wait_until_idle();
        assert_eq!(indexer.pending_job_count(), 0);

        let main_name = main.to_string_lossy().into_owned();
        let shape = root.join("shape.h").to_string_lossy().into_owned();
        let base = root.join("inc/base.h").to_string_lossy().into_owned();
        assert_eq!(store.origin_of(&shape).as_deref(), Some(main_name.as_str()));
        assert_eq!(store.origin_of(&base).as_deref(), Some(main_name.as_str()));
        assert!(store.recorded_mtime(&shape).is_some());
        assert!(store.recorded_mtime(&main_name).is_some());

        assert_eq!(store.match_prefix("Sha", 10), vec!["Shape"]);
        assert_eq!(store.match_prefix("main", 10), vec!["main"]);
        assert!(store.match_prefix("local", 10).is_empty());
    }

    #[test]
    fn test_up_to_date_job_is_skipped() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cpp");
        fs::write(&main, "int first();\n").unwrap();

        let store = Arc::new(IndexStore::in_memory());
        let name = main.to_string_lossy().into_owned();
        store.put(keys::mtime_key(&name), "100");

        let indexer = indexer(&store, Vec::new());
        indexer.submit(job(&main, 100));
        indexer.wait_until_idle();
        assert!(store.match_prefix("first", 10).is_empty());

        indexer.submit(job(&main, 101));
        indexer.wait_until_idle();
        assert_eq!(store.match_prefix("first", 10), vec!["first"]);
    }

    #[test]
    fn test_forced_job_ignores_recorded_time() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cpp");
        fs::write(&main, "int restored();\n").unwrap();

        let store = Arc::new(IndexStore::in_memory());
        let name = main.to_string_lossy().into_owned();
        store.put(keys::mtime_key(&name), "100");

        let indexer = indexer(&store, Vec::new());
        indexer.submit(ParseJob {
            force: true,
            ..job(&main, 90)
        });
        indexer.wait_until_idle();
        assert_eq!(store.match_prefix("restored", 10), vec!["restored"]);
    }

    #[test]
    fn test_index_reaches_disk_once_drained() {
        let dir = tempdir().unwrap();
        let main = dir.path().join("main.cpp");
        fs::write(&main, "int persisted();\n").unwrap();
        let index_dir = dir.path().join("index");

        {
            let store = Arc::new(IndexStore::open(&index_dir).unwrap());
            let indexer = indexer(&store, Vec::new());
            indexer.submit(job(&main, i64::MAX - 1));
            while indexer.pending_job_count() > 0 {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }

        let reopened = IndexStore::open(&index_dir).unwrap();
        assert_eq!(reopened.match_prefix("persisted", 10), vec!["persisted"]);
    }

    #[test]
    fn test_system_roots_not_followed() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("inc")).unwrap();
        fs::write(root.join("inc/sys.h"), "int from_system();\n").unwrap();
        fs::write(root.join("main.cpp"), "#include <sys.h>\nint main();\n").unwrap();

        let store = Arc::new(IndexStore::in_memory());
        let indexer = indexer(&store, vec![root.join("inc")]);
        indexer.submit(job(&root.join("main.cpp"), i64::MAX - 1));
        indexer.wait_until_idle();

        assert!(store.match_prefix("from_system", 10).is_empty());
        assert!(store.range(keys::HEADER_PREFIX).is_empty());
    }

    #[test]
    fn test_vanished_file_is_removed() {
        let dir = tempdir().unwrap();
        let gone = dir.path().join("gone.cpp");
        let name = gone.to_string_lossy().into_owned();

        let store = Arc::new(IndexStore::in_memory());
        store.replace_file_symbols(
            &name,
            &[SymbolRecord {
                name: "stale".to_string(),
                usr: "c:@F@stale#".to_string(),
                kind: "function_decl".to_string(),
                line: 1,
                column: 5,
            }],
        );
        store.put(keys::mtime_key(&name), "1");

        let indexer = indexer(&store, Vec::new());
        indexer.submit(job(&gone, 2));
        indexer.wait_until_idle();

        assert!(store.match_prefix("stale", 10).is_empty());
        assert!(store.recorded_mtime(&name).is_none());
    }
}
