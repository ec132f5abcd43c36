//! Benchkit configuration.
//!
//! Loaded from `$BENCHKIT_HOME/config.toml` (default `~/.benchkit/config.toml`).
//! A missing file means defaults. Built once in `main` and passed down.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::{Deserialize, Serialize};

/// Default location of the remote repository catalog.
pub const DEFAULT_CATALOG_URL: &str = "https://repository.benchkit.dev/index.json";

/// Errors raised while locating, reading, or writing the config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine home directory; set BENCHKIT_HOME")]
    NoHome,

    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Benchkit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Root for datasets, checkpoints, samples, temp files, and the cached catalog.
    pub data_dir: PathBuf,

    /// Where the repository catalog is fetched from.
    pub catalog_url: String,

    /// The cached catalog is re-fetched once it is older than this.
    pub catalog_max_age_days: u64,

    /// Evaluator command lines by name (`abx`, `lexical`, `syntactic`, `tde`).
    /// The first element is the program, the rest are leading arguments.
    pub evaluators: BTreeMap<String, Vec<String>>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = Self::home()
            .map(|h| h.join("data"))
            .unwrap_or_else(|_| PathBuf::from(".benchkit/data"));
        Self {
            data_dir,
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            catalog_max_age_days: 7,
            evaluators: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Settings rooted at an explicit data directory, otherwise default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load settings from the config file, falling back to defaults when it is missing.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write these settings to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The benchkit home: `$BENCHKIT_HOME` or `~/.benchkit`.
    pub fn home() -> Result<PathBuf, ConfigError> {
        if let Ok(home) = env::var("BENCHKIT_HOME")
            && !home.is_empty()
        {
            return Ok(PathBuf::from(home));
        }
        dirs::home_dir()
            .map(|h| h.join(".benchkit"))
            .ok_or(ConfigError::NoHome)
    }

    /// The config file path.
    pub fn path() -> Result<PathBuf, ConfigError> {
        Ok(Self::home()?.join("config.toml"))
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join("datasets")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn samples_dir(&self) -> PathBuf {
        self.data_dir.join("samples")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    /// The locally cached copy of the repository catalog.
    pub fn catalog_file(&self) -> PathBuf {
        self.data_dir.join("repository.json")
    }

    pub fn catalog_max_age(&self) -> Duration {
        Duration::from_secs(self.catalog_max_age_days * 24 * 60 * 60)
    }

    /// The configured command line for an evaluator, if any.
    pub fn evaluator(&self, name: &str) -> Option<&[String]> {
        self.evaluators
            .get(name)
            .map(Vec::as_slice)
            .filter(|cmd| !cmd.is_empty())
    }
}
