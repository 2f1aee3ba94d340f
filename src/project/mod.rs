//! One registered source tree and everything it owns.
//!
//! Registration discovers the compilation manifest, locates the builtin
//! headers, opens the persistent index and starts both the bulk indexer
//! and the live-edit worker. After that a [`Project`] only answers
//! requests; it lives until the process exits.

pub mod tracker;

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::{Clock, DiskStat, FileStat, SystemClock};
use crate::compdb::{locate_manifest, normalize_path, resolve_builtin_include, CompilationDatabase};
use crate::config::{Config, CONFIG_FILE_NAME};
use crate::error::{CtrlkError, Result};
use crate::indexer::{BulkIndexer, Indexer};
use crate::resolve::SymbolLocation;
use crate::session::LiveEditCache;
use crate::store::IndexStore;

pub use tracker::{FileArgs, ScanReport, Tracker};

/// Time and file-system probes a project runs against.
#[derive(Clone)]
pub struct Environment {
    pub clock: Arc<dyn Clock>,
    pub stat: Arc<dyn FileStat>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            stat: Arc::new(DiskStat),
        }
    }
}

pub struct Project {
    root: PathBuf,
    library_path: PathBuf,
    builtin_include: PathBuf,
    config: Config,
    compdb: CompilationDatabase,
    store: Arc<IndexStore>,
    indexer: Arc<dyn Indexer>,
    live: LiveEditCache,
    stat: Arc<dyn FileStat>,
}

impl std::fmt::Debug for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Project")
            .field("root", &self.root)
            .field("library_path", &self.library_path)
            .field("builtin_include", &self.builtin_include)
            .finish()
    }
}

/// Absolute, lexically normalized form of `path`.
pub fn absolute_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_path(path)
    } else {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        normalize_path(&cwd.join(path))
    }
}

impl Project {
    pub fn register(root: &Path, library_path: &Path) -> Result<Self> {
        Self::register_with(root, library_path, Environment::default())
    }

    /// Register with explicit clock and stat probes.
    pub fn register_with(root: &Path, library_path: &Path, environment: Environment) -> Result<Self> {
        let requested = absolute_path(root);

        let requested_config = Config::load(&requested)?;
        let (project_root, manifest) = locate_manifest(&requested, &requested_config.manifest_name)
            .ok_or_else(|| CtrlkError::Configuration {
                root: requested.clone(),
                manifest: requested_config.manifest_name.clone(),
            })?;
        let config = if project_root != requested && !requested.join(CONFIG_FILE_NAME).is_file() {
            Config::load(&project_root)?
        } else {
            requested_config
        };

        let builtin_include = resolve_builtin_include(library_path)?;
        debug!(builtin = %builtin_include.display(), "builtin headers located");

        let store = Arc::new(IndexStore::open(&project_root.join(&config.index_dir))?);
        let mut skip_roots = config.system_include_roots.clone();
        skip_roots.push(builtin_include.clone());
        let indexer: Arc<dyn Indexer> = Arc::new(BulkIndexer::start(
            Arc::clone(&store),
            Arc::clone(&environment.stat),
            skip_roots,
            config.worker_count(),
        )?);

        let compdb = CompilationDatabase::new(
            manifest.clone(),
            builtin_include.clone(),
            config.system_include_roots.clone(),
            Arc::clone(&environment.stat),
        );
        let live = LiveEditCache::start(Arc::clone(&environment.clock))?;

        info!(
            root = %project_root.display(),
            manifest = %manifest.display(),
            workers = config.worker_count(),
            "project registered"
        );
        Ok(Self {
            root: project_root,
            library_path: library_path.to_path_buf(),
            builtin_include,
            config,
            compdb,
            store,
            indexer,
            live,
            stat: environment.stat,
        })
    }

    /// Directory holding the compilation manifest.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn builtin_include_path(&self) -> &Path {
        &self.builtin_include
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    fn tracker(&self) -> Tracker<'_> {
        Tracker {
            compdb: &self.compdb,
            store: &self.store,
            indexer: self.indexer.as_ref(),
            stat: self.stat.as_ref(),
        }
    }

    /// Compiler invocation for `file`; `None` when it was never indexed.
    pub fn file_args(&self, file: &Path) -> Result<Option<FileArgs>> {
        self.tracker().file_args(&absolute_path(file))
    }

    /// Reindex one file, or run a full incremental scan when `file` is `None`.
    pub fn reparse(&self, file: Option<&Path>) -> Result<ScanReport> {
        match file {
            Some(file) => {
                let submitted = self.tracker().index_single_file(&absolute_path(file))?;
                Ok(ScanReport {
                    sources: usize::from(submitted),
                    ..ScanReport::default()
                })
            }
            None => Ok(self.tracker().scan_and_index()),
        }
    }

    pub fn pending_job_count(&self) -> usize {
        self.indexer.pending_job_count()
    }

    /// Block until the bulk indexer is idle and the index is flushed.
    pub fn wait_until_idle(&self) {
        self.indexer.wait_until_idle();
    }

    /// Raw index entries whose key starts with `prefix`.
    pub fn search(&self, prefix: &str) -> Vec<(String, String)> {
        self.store.range(prefix)
    }

    /// Indexed symbol names starting with `prefix`.
    pub fn match_names(&self, prefix: &str, limit: usize) -> Vec<String> {
        self.store.match_prefix(prefix, limit)
    }

    /// Queue a live reparse. `invocation` is the compiler argv as a JSON array of strings.
    pub fn submit_live_parse(&self, invocation: &str, file: &Path, content: String) -> Result<()> {
        let args: Vec<String> = serde_json::from_str(invocation)
            .map_err(|e| CtrlkError::InvalidRequest(format!("compiler invocation must be a JSON string array: {}", e)))?;
        self.live.submit_parse(args, absolute_path(file), content);
        Ok(())
    }

    /// Wait for every queued live parse to land.
    pub fn sync_live(&self) {
        self.live.sync();
    }

    pub fn unload_live(&self, file: &Path) -> bool {
        self.live.unload(&absolute_path(file))
    }

    pub fn resolve_symbol_at(&self, file: &Path, line: usize, column: usize) -> Option<SymbolLocation> {
        self.live.get_session(&absolute_path(file))?.usr_at(line, column)
    }

    /// Scope label of `line`, `None` for "no scope" or no session.
    pub fn scope_at(&self, file: &Path, line: usize) -> Option<String> {
        let session = self.live.get_session(&absolute_path(file))?;
        session.scope_at(line).map(str::to_string)
    }
}
