//! Dataset index: subsets of items, rooted at the dataset directory.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{Item, Namespace, Result};

/// A named group of items (e.g. `dev-clean`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subset {
    pub items: Namespace<Item>,
}

impl Subset {
    pub fn new(items: Namespace<Item>) -> Self {
        Self { items }
    }

    pub fn get(&self, name: &str) -> Option<&Item> {
        self.items.get(name)
    }

    /// Make every item's paths relative to `root`.
    pub fn make_relative(&mut self, root: &Path) -> Result<()> {
        for (_, item) in self.items.iter_mut() {
            item.relative_to(root)?;
        }
        Ok(())
    }

    /// Make every item's paths absolute under `root`.
    pub fn make_absolute(&mut self, root: &Path) {
        for (_, item) in self.items.iter_mut() {
            item.absolute_to(root);
        }
    }
}

/// The on-disk index of an installed dataset.
///
/// Written once at install time as `index.json`; afterwards only the path mode changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetIndex {
    pub root_dir: PathBuf,
    pub subsets: Namespace<Subset>,
}

impl DatasetIndex {
    pub fn new(root_dir: impl Into<PathBuf>, subsets: Namespace<Subset>) -> Self {
        Self {
            root_dir: root_dir.into(),
            subsets,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.subsets.get(name)
    }

    /// Make every subset's items relative to `root_dir`, visiting subsets in order.
    pub fn make_relative(&mut self) -> Result<()> {
        let root = self.root_dir.clone();
        for (_, subset) in self.subsets.iter_mut() {
            subset.make_relative(&root)?;
        }
        Ok(())
    }

    /// Make every subset's items absolute under `root_dir`.
    pub fn make_absolute(&mut self) {
        let root = self.root_dir.clone();
        for (_, subset) in self.subsets.iter_mut() {
            subset.make_absolute(&root);
        }
    }

    /// Re-root the index (e.g. after the dataset directory moved), keeping items relative.
    pub fn rebase(&mut self, root_dir: impl Into<PathBuf>) -> Result<()> {
        self.make_relative()?;
        self.root_dir = root_dir.into();
        Ok(())
    }
}
