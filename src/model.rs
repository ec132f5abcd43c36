//! Data model for submissions and datasets.
//!
//! Items describe files; namespaces group items into subsets and subsets
//! into a dataset index.

mod index;
mod item;
mod namespace;

use std::{io, path::PathBuf};

pub use index::{DatasetIndex, Subset};
pub use item::{FileItem, FileListItem, FileType, Item};
pub use namespace::Namespace;

/// Errors raised while building or converting items.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("unknown file type for {0}")]
    UnknownFileType(PathBuf),

    #[error("no file types requested")]
    NoFileTypes,

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("path {path} is not under {root}")]
    PathNotUnderRoot { path: PathBuf, root: PathBuf },

    #[error("directory walk failed: {0}")]
    Walk(#[from] ignore::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, ModelError>;
