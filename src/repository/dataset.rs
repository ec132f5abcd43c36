//! Datasets: installed repository items with a loaded index.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::model::{DatasetIndex, Item, ModelError, Subset};

use super::dir::RepoItemDir;
use super::item::INDEX_FILE;

/// Why a dataset could not be opened.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset {0} does not exist in the catalog")]
    NotFound(String),

    #[error("dataset {0} is not installed; pull it first")]
    NotInstalled(String),

    #[error("dataset at {0} has no index file")]
    MissingIndex(PathBuf),

    #[error("invalid dataset index: {0}")]
    Index(#[from] ModelError),
}

pub type Result<T> = core::result::Result<T, DatasetError>;

/// An installed dataset and its index, with absolute item paths.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    location: PathBuf,
    index: DatasetIndex,
}

impl Dataset {
    /// Open an installed dataset by name.
    ///
    /// Distinguishes a name the catalog doesn't know from one that isn't installed.
    pub fn open(datasets: &RepoItemDir, name: &str) -> Result<Self> {
        let item = datasets
            .get(name)
            .ok_or_else(|| DatasetError::NotFound(name.to_string()))?;
        if !item.installed() {
            return Err(DatasetError::NotInstalled(name.to_string()));
        }
        Self::from_location(name, item.location())
    }

    /// Open a dataset directory directly (e.g. a local copy outside the data dir).
    ///
    /// The index's paths are re-rooted at `location`, whatever root they were written with.
    pub fn from_location(name: &str, location: &Path) -> Result<Self> {
        let index_path = location.join(INDEX_FILE);
        if !index_path.is_file() {
            return Err(DatasetError::MissingIndex(location.to_path_buf()));
        }
        let mut index = DatasetIndex::load(&index_path)?;
        index.rebase(location)?;
        index.make_absolute();
        debug!(dataset = name, subsets = index.subsets.len(), "dataset index loaded");

        Ok(Self {
            name: name.to_string(),
            location: location.to_path_buf(),
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn index(&self) -> &DatasetIndex {
        &self.index
    }

    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.index.subset(name)
    }

    /// Shortcut for an item inside a subset.
    pub fn item(&self, subset: &str, item: &str) -> Option<&Item> {
        self.subset(subset).and_then(|s| s.get(item))
    }
}
