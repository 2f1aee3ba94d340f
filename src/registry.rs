//! Registered projects, keyed by absolute root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::info;

use crate::error::{CtrlkError, Result};
use crate::project::{absolute_path, Environment, Project};

/// Projects live here from their first registration until the process exits.
#[derive(Default)]
pub struct ProjectRegistry {
    projects: RwLock<HashMap<PathBuf, Arc<Project>>>,
    environment: Option<Environment>,
}

impl std::fmt::Debug for ProjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectRegistry")
            .field("projects", &self.roots())
            .finish()
    }
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose projects use the given clock and stat probes.
    pub fn with_environment(environment: Environment) -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            environment: Some(environment),
        }
    }

    /// Return the project for `root`, creating it on first registration.
    pub fn register(&self, root: &Path, library_path: &Path) -> Result<Arc<Project>> {
        let requested = absolute_path(root);
        if let Some(existing) = self.exact(&requested) {
            return Ok(existing);
        }

        // Built outside the lock: registration parses config and starts threads.
        let environment = self.environment.clone().unwrap_or_default();
        let project = Arc::new(Project::register_with(&requested, library_path, environment)?);

        let mut projects = self.projects.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = projects.get(project.root()) {
            let existing = Arc::clone(existing);
            projects.insert(requested, Arc::clone(&existing));
            return Ok(existing);
        }
        projects.insert(project.root().to_path_buf(), Arc::clone(&project));
        projects.insert(requested, Arc::clone(&project));
        info!(root = %project.root().display(), "project added to registry");
        Ok(project)
    }

    /// The project registered for `path`, or the one whose root contains it.
    pub fn get(&self, path: &Path) -> Result<Arc<Project>> {
        let path = absolute_path(path);
        self.lookup(&path).ok_or(CtrlkError::UnknownProject(path))
    }

    fn exact(&self, path: &Path) -> Option<Arc<Project>> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        projects.get(path).cloned()
    }

    /// Exact key first, then the deepest registered root containing `path`.
    fn lookup(&self, path: &Path) -> Option<Arc<Project>> {
        if let Some(project) = self.exact(path) {
            return Some(project);
        }
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        projects
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.components().count())
            .map(|(_, project)| Arc::clone(project))
    }

    /// Distinct project roots.
    pub fn roots(&self) -> Vec<PathBuf> {
        let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
        let mut roots: Vec<PathBuf> = projects.values().map(|p| p.root().to_path_buf()).collect();
        roots.sort();
        roots.dedup();
        roots
    }

    /// Wait for every project's bulk indexer to finish and flush.
    pub fn wait_until_idle(&self) {
        let projects: Vec<Arc<Project>> = {
            let projects = self.projects.read().unwrap_or_else(|e| e.into_inner());
            projects.values().cloned().collect()
        };
        let mut seen: Vec<&Path> = Vec::new();
        for project in &projects {
            if seen.contains(&project.root()) {
                continue;
            }
            seen.push(project.root());
            project.wait_until_idle();
        }
    }
}
