//! Per-project configuration.
//!
//! Read from an optional `.ctrlk.toml` that sits next to the project's
//! compilation manifest. Every field has a default, so a missing file is
//! the same as an empty one.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{CtrlkError, Result};

/// Name of the optional config file.
pub const CONFIG_FILE_NAME: &str = ".ctrlk.toml";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Bulk indexer worker threads. `None` means `cpu_count * 3 / 2`.
    pub workers: Option<usize>,
    /// Directory (relative to the project root) holding the persistent index.
    pub index_dir: String,
    /// Manifest file name searched for in the project-root ancestry.
    pub manifest_name: String,
    /// Compilation database entries under these roots are ignored.
    pub system_include_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: None,
            index_dir: ".ctrlk-index".to_string(),
            manifest_name: "compile_commands.json".to_string(),
            system_include_roots: vec![PathBuf::from("/usr/include")],
        }
    }
}

impl Config {
    /// Load `.ctrlk.toml` from `dir`, falling back to defaults when absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)?;
        let config: Config = toml::from_str(&raw).map_err(|e| CtrlkError::Config {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!(path = %path.display(), ?config, "loaded project config");
        Ok(config)
    }

    /// Worker count for the bulk indexer.
    pub fn worker_count(&self) -> usize {
        self.workers
            .unwrap_or_else(|| {
                let cpus = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                cpus * 3 / 2
            })
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.index_dir, ".ctrlk-index");
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "workers = 3\nsystem_include_roots = [\"/opt/sdk/include\"]\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.system_include_roots, vec![PathBuf::from("/opt/sdk/include")]);
        assert_eq!(config.manifest_name, "compile_commands.json");
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE_NAME), "workers = \"many\"").unwrap();
        let err = Config::load(dir.path()).unwrap_err();
        assert!(matches!(err, CtrlkError::Config { .. }), "got {:?}", err);
    }
}
