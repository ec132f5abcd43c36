//! A directory of model outputs, its parameters, and its cached validation.

mod meta;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::model::{Item, ModelError, Namespace};
use crate::validation::{ValidationContext, ValidationResponse, Validator};

pub use meta::{META_FILE, ModelInfo, Publication, SubmissionMeta};

pub const PARAMS_FILE: &str = "params.yaml";
pub const SCORES_DIR: &str = "scores";

/// Benchmark parameters stored in `params.yaml`.
pub trait BenchmarkParams: Serialize + DeserializeOwned + Default + Clone + std::fmt::Debug {}

impl<T> BenchmarkParams for T where T: Serialize + DeserializeOwned + Default + Clone + std::fmt::Debug {}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("submission directory {0} does not exist")]
    MissingDirectory(PathBuf),

    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to write parameters: {0}")]
    Serialize(#[source] serde_yaml::Error),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, SubmissionError>;

/// A loaded submission.
///
/// Items are fixed at load time. Parameters and metadata are read on first
/// access; validation runs on first access and is cached until cleared.
#[derive(Debug)]
pub struct Submission<P> {
    location: PathBuf,
    items: Namespace<Item>,
    score_dir: PathBuf,
    params: Option<P>,
    meta: Option<Option<SubmissionMeta>>,
    validator: Validator,
    validation: Option<ValidationContext>,
}

impl<P: BenchmarkParams> Submission<P> {
    pub fn new(location: impl Into<PathBuf>, items: Namespace<Item>, validator: Validator) -> Self {
        let location = location.into();
        Self {
            score_dir: location.join(SCORES_DIR),
            location,
            items,
            params: None,
            meta: None,
            validator,
            validation: None,
        }
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn items(&self) -> &Namespace<Item> {
        &self.items
    }

    pub fn item(&self, name: &str) -> Option<&Item> {
        self.items.get(name)
    }

    pub fn score_dir(&self) -> &Path {
        &self.score_dir
    }

    pub fn set_score_dir(&mut self, dir: impl Into<PathBuf>) {
        self.score_dir = dir.into();
    }

    /// Parameters from `params.yaml`, or defaults when the file is absent.
    pub fn params(&mut self) -> Result<&P> {
        if self.params.is_none() {
            self.params = Some(read_params(&self.location)?);
        }
        Ok(self.params.get_or_insert_with(P::default))
    }

    /// Override the parameters for this run. Nothing is written to disk.
    pub fn set_params(&mut self, params: P) {
        self.params = Some(params);
    }

    /// Contents of `meta.yaml`, or `None` when the file is absent.
    pub fn meta(&mut self) -> Result<Option<&SubmissionMeta>> {
        if self.meta.is_none() {
            let path = self.location.join(META_FILE);
            let meta = if path.is_file() {
                Some(SubmissionMeta::load(&path)?)
            } else {
                None
            };
            self.meta = Some(meta);
        }
        Ok(self.meta.as_ref().and_then(Option::as_ref))
    }

    /// Validate `meta.yaml`. A missing file is a single Error.
    pub fn validate_meta(&mut self) -> Result<ValidationContext> {
        Ok(match self.meta()? {
            Some(meta) => meta.validate(),
            None => std::iter::once(
                ValidationResponse::error("meta.yaml is missing").with_filename(META_FILE),
            )
            .collect(),
        })
    }

    /// Findings of the item checks, computed on first access.
    pub fn validation_output(&mut self) -> &ValidationContext {
        if self.validation.is_none() {
            let ctx = self.validator.validate(&self.items);
            info!(
                location = %self.location.display(),
                items = self.items.len(),
                errors = ctx.errors().count(),
                warnings = ctx.warnings().count(),
                "submission validated"
            );
            self.validation = Some(ctx);
        }
        self.validation.get_or_insert_with(ValidationContext::new)
    }

    /// True iff the item checks produced no Error.
    pub fn valid(&mut self) -> bool {
        !self.validation_output().fails()
    }

    /// Forget cached findings; the next access re-validates.
    pub fn clear_validation(&mut self) {
        self.validation = None;
    }
}

fn read_params<P: BenchmarkParams>(location: &Path) -> Result<P> {
    let path = location.join(PARAMS_FILE);
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(P::default()),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() {
        return Ok(P::default());
    }
    serde_yaml::from_str(&text).map_err(|source| SubmissionError::Yaml { path, source })
}

/// Write default parameters to `params.yaml` unless the file exists.
///
/// Returns whether a file was written.
pub fn write_default_params<P: BenchmarkParams>(location: &Path) -> Result<bool> {
    let path = location.join(PARAMS_FILE);
    if path.exists() {
        return Ok(false);
    }
    let text = serde_yaml::to_string(&P::default()).map_err(SubmissionError::Serialize)?;
    fs::write(&path, text)?;
    debug!(path = %path.display(), "default parameters written");
    Ok(true)
}

/// Fail early when a submission directory is missing.
pub fn ensure_directory(location: &Path) -> Result<()> {
    if location.is_dir() {
        Ok(())
    } else {
        Err(SubmissionError::MissingDirectory(location.to_path_buf()))
    }
}
