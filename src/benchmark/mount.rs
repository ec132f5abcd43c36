//! Flat views of nested file lists.
//!
//! Evaluators expect every feature file directly under one directory. A
//! [`FlatMount`] builds that directory out of symlinks and removes it on drop.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::fsutil;
use crate::model::Item;

use super::{BenchmarkError, Result};

/// A temporary directory with one symlink per file of an item.
#[derive(Debug)]
pub struct FlatMount {
    dir: TempDir,
}

impl FlatMount {
    /// Link every file of `item` into a fresh directory as `<stem>.<ext>`.
    ///
    /// Two files with the same name are an error; nothing is left behind.
    pub fn new(item: &Item) -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("benchkit-mount-").tempdir()?;
        let mut seen = BTreeSet::new();
        for file in item.files() {
            let Some(name) = file.file_name() else {
                continue;
            };
            if !seen.insert(name.to_os_string()) {
                return Err(BenchmarkError::DuplicateStem {
                    name: name.to_string_lossy().into_owned(),
                    dir: parent_or_empty(file),
                });
            }
            // Relative targets would resolve against the mount, not the cwd.
            fsutil::symlink(&std::path::absolute(file)?, &dir.path().join(name))?;
        }
        debug!(path = %dir.path().display(), files = seen.len(), "flat mount created");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

fn parent_or_empty(file: &Path) -> PathBuf {
    file.parent().map(Path::to_path_buf).unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::fs;

    use crate::model::{FileListItem, FileType};

    #[test]
    fn nested_files_are_flattened_and_removed_on_drop() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("spk1")).unwrap();
        fs::write(src.path().join("a.npy"), "a").unwrap();
        fs::write(src.path().join("spk1/b.npy"), "b").unwrap();
        let item: Item = FileListItem::from_dir(src.path(), &[FileType::Npy]).unwrap().into();

        let mount = FlatMount::new(&item).unwrap();
        let root = mount.path().to_path_buf();
        assert_eq!(fs::read_to_string(root.join("a.npy")).unwrap(), "a");
        assert_eq!(fs::read_to_string(root.join("b.npy")).unwrap(), "b");

        drop(mount);
        assert!(!root.exists());
        assert!(src.path().join("spk1/b.npy").exists());
    }

    #[test]
    fn relative_item_paths_stay_readable_through_the_mount() {
        let cwd = std::env::current_dir().unwrap();
        let src = tempfile::Builder::new()
            .prefix(".mount-src-")
            .tempdir_in(&cwd)
            .unwrap();
        fs::write(src.path().join("a.npy"), "a").unwrap();
        let relative = src.path().strip_prefix(&cwd).unwrap();
        let item: Item = FileListItem::from_dir(relative, &[FileType::Npy]).unwrap().into();
        assert!(item.files().iter().all(|f| f.is_relative()));

        let mount = FlatMount::new(&item).unwrap();
        assert_eq!(fs::read_to_string(mount.path().join("a.npy")).unwrap(), "a");
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let src = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("x")).unwrap();
        fs::create_dir_all(src.path().join("y")).unwrap();
        fs::write(src.path().join("x/a.npy"), "").unwrap();
        fs::write(src.path().join("y/a.npy"), "").unwrap();
        let item: Item = FileListItem::from_dir(src.path(), &[FileType::Npy]).unwrap().into();

        let err = FlatMount::new(&item).unwrap_err();
        assert!(matches!(err, BenchmarkError::DuplicateStem { ref name, .. } if name == "a.npy"));
    }
}
