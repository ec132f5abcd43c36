//! Benchmarks: which submission files to look for, how to check them, and
//! how to turn them into score files.
//!
//! Scoring itself is done by external evaluator programs; a [`Task`] prepares
//! their inputs, runs them, and leaves score files in the submission's score
//! directory. A benchmark's [`ScoreDir`] reads those files back.

pub mod abx;
pub mod batch;
pub mod evaluator;
pub mod mount;
pub mod slm;
pub mod tde;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::leaderboard::ScoreDir;
use crate::model::{Item, ModelError};
use crate::repository::Dataset;
use crate::submission::{BenchmarkParams, Submission, SubmissionError};
use crate::validation::columnar::TableError;

pub use batch::{Deadline, run_units};
pub use evaluator::Evaluator;
pub use mount::FlatMount;

#[derive(Debug, thiserror::Error)]
pub enum BenchmarkError {
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("dataset {dataset} has no item {subset}/{item}")]
    MissingDatasetItem {
        dataset: String,
        subset: String,
        item: String,
    },

    #[error("no command configured for evaluator {0}; add it under [evaluators] in config.toml")]
    MissingEvaluator(String),

    #[error("failed to start evaluator {name}: {source}")]
    Spawn { name: String, source: io::Error },

    #[error("evaluator {name} failed ({status}): {stderr}")]
    EvaluatorFailed {
        name: String,
        status: String,
        stderr: String,
    },

    #[error("evaluator {0} did not finish before its deadline")]
    Timeout(String),

    #[error("expected score file {0} is missing")]
    MissingScoreFile(PathBuf),

    #[error("invalid score file {path}: {source}")]
    ScoreFile { path: PathBuf, source: TableError },

    #[error("{name} appears twice in {dir}")]
    DuplicateStem { name: String, dir: PathBuf },

    #[error("failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = core::result::Result<T, BenchmarkError>;

/// Which task/set combinations to load. Empty lists select everything.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub tasks: Vec<String>,
    pub sets: Vec<String>,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn includes_task(&self, task: &str) -> bool {
        self.tasks.is_empty() || self.tasks.iter().any(|t| t == task)
    }

    pub fn includes_set(&self, set: &str) -> bool {
        self.sets.is_empty() || self.sets.iter().any(|s| s == set)
    }
}

/// One scoring step over a submission.
pub trait Task<P> {
    fn name(&self) -> &str;

    /// Write this task's score files into the submission's score directory.
    fn eval(&self, submission: &Submission<P>, dataset: &Dataset) -> Result<()>;
}

pub trait Benchmark {
    type Params: BenchmarkParams;
    type Scores: ScoreDir;

    fn name(&self) -> &'static str;

    fn dataset(&self) -> &Dataset;

    /// Load a submission directory, probing only the selected combinations.
    ///
    /// Writes default parameters on first load.
    fn load_submission(
        &self,
        location: &Path,
        selection: &Selection,
    ) -> Result<Submission<Self::Params>>;

    fn tasks(&self, params: &Self::Params) -> Result<Vec<Box<dyn Task<Self::Params>>>>;

    /// Reader over the score files of an evaluated submission.
    fn score_dir(&self, submission: &mut Submission<Self::Params>) -> Result<Self::Scores>;

    /// Run every task. Items are never modified.
    fn run(&self, submission: &mut Submission<Self::Params>) -> Result<()> {
        let params = submission.params()?.clone();
        fs::create_dir_all(submission.score_dir())?;
        for task in self.tasks(&params)? {
            info!(benchmark = self.name(), task = task.name(), "running task");
            task.eval(submission, self.dataset())?;
        }
        info!(
            benchmark = self.name(),
            scores = %submission.score_dir().display(),
            "evaluation complete"
        );
        Ok(())
    }
}

/// Look up a dataset item a benchmark depends on.
pub(crate) fn dataset_item<'a>(dataset: &'a Dataset, subset: &str, item: &str) -> Result<&'a Item> {
    dataset
        .item(subset, item)
        .ok_or_else(|| BenchmarkError::MissingDatasetItem {
            dataset: dataset.name().to_string(),
            subset: subset.to_string(),
            item: item.to_string(),
        })
}
