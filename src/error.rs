//! Error types for ctrlk.
//!
//! "Not indexed" and "no session" are not errors: lookups that can miss
//! return `Option` so callers treat them as ordinary answers.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ctrlk operations.
#[derive(Error, Debug)]
pub enum CtrlkError {
    /// No compilation manifest anywhere in the project-root ancestry.
    #[error("could not find a '{manifest}' file in the directory hierarchy from '{}'", .root.display())]
    Configuration { root: PathBuf, manifest: String },

    /// The AST library's own builtin headers (stddef.h and friends) could not be located.
    #[error("cannot find builtin clang includes for library path '{}'", .0.display())]
    BuiltinHeaderResolution(PathBuf),

    /// The parser could not produce a usable translation unit.
    #[error("failed to parse {}: {reason}", .path.display())]
    ParseFailure { path: PathBuf, reason: String },

    /// A file vanished between scheduling and its stat() call.
    #[error("unable to stat {}: {source}", .path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A request carried arguments that cannot be interpreted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A request named a project root that was never registered.
    #[error("project not registered: {}", .0.display())]
    UnknownProject(PathBuf),

    #[error("config error in {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for ctrlk operations.
pub type Result<T> = std::result::Result<T, CtrlkError>;
