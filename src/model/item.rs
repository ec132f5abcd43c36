//! Item types: typed descriptions of one file or an ordered list of files.
//!
//! An item's paths are either all relative (to some root) or all absolute.
//! `relative_path` records which; `relative_to` and `absolute_to` are the only
//! ways to switch between the two.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use super::{ModelError, Result};

/// Extension tag for the files an item describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Npy,
    Txt,
    Csv,
    Tsv,
    Wav,
    Flac,
    Item,
    Json,
    Yaml,
    Zip,
}

impl FileType {
    /// Every known file type.
    pub const ALL: [FileType; 10] = [
        Self::Npy,
        Self::Txt,
        Self::Csv,
        Self::Tsv,
        Self::Wav,
        Self::Flac,
        Self::Item,
        Self::Json,
        Self::Yaml,
        Self::Zip,
    ];

    /// The extension (without the leading dot).
    pub fn extension(self) -> &'static str {
        match self {
            Self::Npy => "npy",
            Self::Txt => "txt",
            Self::Csv => "csv",
            Self::Tsv => "tsv",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Item => "item",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Zip => "zip",
        }
    }

    /// Look up a file type by extension. Case-insensitive; `yml` maps to `Yaml`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        if ext == "yml" {
            return Some(Self::Yaml);
        }
        Self::ALL.into_iter().find(|t| t.extension() == ext)
    }

    /// Infer the file type from a path's suffix.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// A single file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    pub file: PathBuf,
    pub file_type: FileType,
    #[serde(default)]
    pub relative_path: bool,
}

impl FileItem {
    /// Describe an existing path, inferring the file type from its suffix.
    ///
    /// The path is stored as given; `relative_path` reflects whether it is relative.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let file = path.into();
        let file_type =
            FileType::from_path(&file).ok_or_else(|| ModelError::UnknownFileType(file.clone()))?;
        let relative_path = file.is_relative();
        Ok(Self {
            file,
            file_type,
            relative_path,
        })
    }
}

/// An ordered list of files sharing one file type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileListItem {
    pub files: Vec<PathBuf>,
    pub file_type: FileType,
    #[serde(default)]
    pub relative_path: bool,
}

impl FileListItem {
    /// Collect every file under `dir` (recursively) whose extension matches one of `types`.
    ///
    /// The list is sorted by path and frozen: later changes on disk are not seen.
    /// The item's `file_type` is the first of `types`.
    pub fn from_dir(dir: &Path, types: &[FileType]) -> Result<Self> {
        let Some(&file_type) = types.first() else {
            return Err(ModelError::NoFileTypes);
        };
        if !dir.is_dir() {
            return Err(ModelError::NotADirectory(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .follow_links(true)
            .build();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.into_path();
            if FileType::from_path(&path).is_some_and(|t| types.contains(&t)) {
                files.push(path);
            }
        }
        files.sort();

        Ok(Self {
            files,
            file_type,
            relative_path: dir.is_relative(),
        })
    }
}

/// One file or a list of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum Item {
    File(FileItem),
    FileList(FileListItem),
}

impl Item {
    pub fn file_type(&self) -> FileType {
        match self {
            Self::File(f) => f.file_type,
            Self::FileList(l) => l.file_type,
        }
    }

    pub fn is_relative(&self) -> bool {
        match self {
            Self::File(f) => f.relative_path,
            Self::FileList(l) => l.relative_path,
        }
    }

    /// All paths in this item, in order.
    pub fn files(&self) -> &[PathBuf] {
        match self {
            Self::File(f) => std::slice::from_ref(&f.file),
            Self::FileList(l) => &l.files,
        }
    }

    /// File stems of every path, in order.
    pub fn stems(&self) -> Vec<String> {
        self.files()
            .iter()
            .filter_map(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .collect()
    }

    /// Convert absolute paths to paths relative to `root`.
    ///
    /// No-op when already relative. Fails with [`ModelError::PathNotUnderRoot`]
    /// if any path lies outside `root`, leaving the item untouched.
    pub fn relative_to(&mut self, root: &Path) -> Result<()> {
        if self.is_relative() {
            return Ok(());
        }
        let converted = self
            .files()
            .iter()
            .map(|p| {
                p.strip_prefix(root)
                    .map(Path::to_path_buf)
                    .map_err(|_| ModelError::PathNotUnderRoot {
                        path: p.clone(),
                        root: root.to_path_buf(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        self.replace_paths(converted, true);
        Ok(())
    }

    /// Convert relative paths to absolute paths under `root`. No-op when already absolute.
    pub fn absolute_to(&mut self, root: &Path) {
        if !self.is_relative() {
            return;
        }
        let converted = self.files().iter().map(|p| root.join(p)).collect();
        self.replace_paths(converted, false);
    }

    fn replace_paths(&mut self, mut paths: Vec<PathBuf>, relative: bool) {
        match self {
            Self::File(f) => {
                if let Some(p) = paths.pop() {
                    f.file = p;
                }
                f.relative_path = relative;
            }
            Self::FileList(l) => {
                l.files = paths;
                l.relative_path = relative;
            }
        }
    }
}

impl From<FileItem> for Item {
    fn from(item: FileItem) -> Self {
        Self::File(item)
    }
}

impl From<FileListItem> for Item {
    fn from(item: FileListItem) -> Self {
        Self::FileList(item)
    }
}
