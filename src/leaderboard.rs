//! Score directories and the leaderboard entries built from them.

use std::fs;
use std::path::{Path, PathBuf};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::benchmark::{BenchmarkError, Result};
use crate::submission::{BenchmarkParams, Publication, Submission, SubmissionMeta};
use crate::validation::columnar::{Delimiter, Header, Table};

pub const LEADERBOARD_FILE: &str = "leaderboard.json";

/// What a score directory needs to know about the submission it belongs to.
#[derive(Debug, Clone)]
pub struct ScoreContext {
    pub benchmark: String,
    /// Directory holding the score files.
    pub location: PathBuf,
    pub submission: PathBuf,
    pub meta: Option<SubmissionMeta>,
    /// The parameters the submission was evaluated with.
    pub params: serde_json::Value,
}

impl ScoreContext {
    pub fn from_submission<P: BenchmarkParams>(
        benchmark: &str,
        submission: &mut Submission<P>,
    ) -> Result<Self> {
        let params = serde_json::to_value(submission.params()?)?;
        let meta = submission.meta()?.cloned();
        Ok(Self {
            benchmark: benchmark.to_string(),
            location: submission.score_dir().to_path_buf(),
            submission: submission.location().to_path_buf(),
            meta,
            params,
        })
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.location.join(file)
    }

    /// A score table that must exist.
    pub fn required_table(&self, file: &str, header: Header<'_>) -> Result<Table> {
        self.optional_table(file, header)?
            .ok_or_else(|| BenchmarkError::MissingScoreFile(self.path(file)))
    }

    /// A score table that may be absent.
    pub fn optional_table(&self, file: &str, header: Header<'_>) -> Result<Option<Table>> {
        let path = self.path(file);
        if !path.is_file() {
            return Ok(None);
        }
        Table::read(&path, header, Delimiter::Whitespace)
            .map(Some)
            .map_err(|source| BenchmarkError::ScoreFile { path, source })
    }

    /// A column of a score table parsed as numbers.
    pub fn numbers(&self, file: &str, table: &Table, column: &str) -> Result<Vec<f64>> {
        table
            .parse_column(column)
            .map_err(|source| BenchmarkError::ScoreFile {
                path: self.path(file),
                source,
            })
    }
}

/// Typed access to an evaluated submission's score files.
pub trait ScoreDir {
    type Scores: Serialize;

    fn context(&self) -> &ScoreContext;

    /// Every score the benchmark reports, read from disk.
    fn scores(&self) -> Result<Self::Scores>;

    fn build_leaderboard(&self) -> Result<LeaderboardEntry<Self::Scores>> {
        Ok(LeaderboardEntry::new(self.context(), self.scores()?))
    }

    /// Write `leaderboard.json` into the submission directory.
    fn write_leaderboard(&self) -> Result<PathBuf> {
        let entry = self.build_leaderboard()?;
        let path = self.context().submission.join(LEADERBOARD_FILE);
        fs::write(&path, serde_json::to_string_pretty(&entry)?)?;
        info!(path = %path.display(), "leaderboard entry written");
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDetails {
    pub train_set: Option<String>,
    pub gpu_budget: Option<String>,
    pub open_source: bool,
    pub code_url: Option<String>,
    pub parameters: serde_json::Value,
}

/// One row of a benchmark leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry<S> {
    pub submission_id: Uuid,
    pub model_id: Option<String>,
    pub benchmark: String,
    pub submitted_at: Timestamp,
    pub description: Option<String>,
    pub publication: Publication,
    pub details: EntryDetails,
    pub scores: S,
}

impl<S> LeaderboardEntry<S> {
    pub fn new(ctx: &ScoreContext, scores: S) -> Self {
        let meta = ctx.meta.clone().unwrap_or_default();
        Self {
            submission_id: Uuid::new_v4(),
            model_id: meta.model_info.model_id,
            benchmark: ctx.benchmark.clone(),
            submitted_at: Timestamp::now(),
            description: meta.model_info.system_description,
            publication: meta.publication,
            details: EntryDetails {
                train_set: meta.model_info.train_set,
                gpu_budget: meta.model_info.gpu_budget,
                open_source: meta.open_source,
                code_url: meta.code_url,
                parameters: ctx.params.clone(),
            },
            scores,
        }
    }
}

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    Some(values.iter().sum::<f64>() / n)
}

/// Mean of `(value, weight)` pairs; `None` when the weights sum to zero.
pub fn weighted_mean(pairs: &[(f64, f64)]) -> Option<f64> {
    let total: f64 = pairs.iter().map(|(_, w)| w).sum();
    if total.abs() < f64::EPSILON {
        return None;
    }
    Some(pairs.iter().map(|(v, w)| v * w).sum::<f64>() / total)
}

/// Read a written entry back with untyped scores.
pub fn read_entry(path: &Path) -> Result<LeaderboardEntry<serde_json::Value>> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}
