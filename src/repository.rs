//! Installable datasets, checkpoints, and samples.
//!
//! Each kind lives in its own directory under the data dir:
//!
//! ```text
//! <data-dir>/
//!   repository.json        # cached catalog
//!   tmp/<name>.part        # in-flight downloads
//!   datasets/<name>/       # installed items (index.json at the root for datasets)
//!   checkpoints/<name>/
//!   samples/<name>/
//! ```

mod archive;
mod catalog;
mod dataset;
mod dir;
mod install;
mod item;
mod transport;

use std::{io, path::PathBuf};

pub use catalog::{CatalogEntry, CatalogError, EntryKind, EntrySource, RepositoryCatalog};
pub use dataset::{Dataset, DatasetError};
pub use dir::RepoItemDir;
pub use install::{InstallConfig, InstallRule};
pub use item::{INDEX_FILE, PullOptions, RepositoryItem, is_pullable};
pub use transport::{Fetch, FetchError, HttpFetcher};

/// The kinds of installable items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Dataset,
    Checkpoint,
    Sample,
}

impl ItemKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Checkpoint => "checkpoint",
            Self::Sample => "sample",
        }
    }
}

/// Errors that can occur while fetching or installing items.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("integrity check failed for {name}: expected {algorithm} {expected}, got {actual}")]
    Integrity {
        name: String,
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    #[error("invalid install configuration for {name}: {reason}")]
    Config { name: String, reason: String },

    #[error("{name} is an {kind} item and cannot be installed with {operation}")]
    WrongKind {
        name: String,
        kind: EntryKind,
        operation: &'static str,
    },

    #[error("{0} is already installed")]
    AlreadyInstalled(String),

    #[error("another install holds {0}")]
    InstallInProgress(PathBuf),

    #[error("import source does not exist: {0}")]
    MissingImportSource(PathBuf),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, RepositoryError>;
