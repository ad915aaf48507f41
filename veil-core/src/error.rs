//! Engine error types
//!
//! Fatal conditions abort a whole run. Failures that only affect a single file
//! are not errors at this level; they are collected into the run report as
//! [`FileFailure`](crate::engine::FileFailure) entries.

use std::path::PathBuf;

/// Errors that abort an obfuscation or deobfuscation run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Project directory does not exist: {0}")]
    ProjectNotFound(PathBuf),

    #[error("Output directory {output} would overwrite input {input}")]
    OutputOverlapsInput { input: PathBuf, output: PathBuf },

    #[error("Obfuscation map not found: {0}")]
    MapNotFound(PathBuf),

    #[error("Failed to read obfuscation map {path}: {reason}")]
    MapUnreadable { path: PathBuf, reason: String },

    #[error("Output location is not writable: {0}")]
    PermissionDenied(PathBuf),

    #[error("No unused {category} alias of length {length} is left")]
    MappingCollision { category: &'static str, length: usize },

    #[error("Invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
