//! Local directories of installed items, one per item kind.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::Settings;

use super::catalog::{CatalogEntry, RepositoryCatalog};
use super::item::RepositoryItem;
use super::{ItemKind, Result};

/// A directory holding installed items of one kind, backed by the catalog.
#[derive(Debug, Clone)]
pub struct RepoItemDir {
    kind: ItemKind,
    root: PathBuf,
    tmp_dir: PathBuf,
    entries: Vec<CatalogEntry>,
}

impl RepoItemDir {
    pub fn new(kind: ItemKind, settings: &Settings, catalog: &RepositoryCatalog) -> Self {
        let root = match kind {
            ItemKind::Dataset => settings.dataset_dir(),
            ItemKind::Checkpoint => settings.checkpoint_dir(),
            ItemKind::Sample => settings.samples_dir(),
        };
        Self {
            kind,
            root,
            tmp_dir: settings.tmp_dir(),
            entries: catalog.entries(kind).to_vec(),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up an item by name.
    ///
    /// `None` means the catalog has no such entry. An entry that exists but is
    /// not installed comes back with `installed() == false`.
    pub fn get(&self, name: &str) -> Option<RepositoryItem> {
        self.entries.iter().find(|e| e.name == name).map(|entry| {
            RepositoryItem::new(self.root.join(name), entry.clone(), self.tmp_dir.clone())
        })
    }

    /// Every entry the catalog offers for this kind.
    pub fn available(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Names of installed items, sorted. Hidden entries (staging, locks) are skipped.
    pub fn installed(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.path().is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
