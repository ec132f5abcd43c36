//! ABX discriminability of speech features.
//!
//! A submission provides one feature file per utterance of each LibriSpeech
//! set (`dev-clean/<utterance>.npy` or `.txt`). The evaluator measures how well
//! the features discriminate phone triplets and writes one error rate per
//! speaker mode.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::leaderboard::{ScoreContext, ScoreDir, mean};
use crate::model::{FileListItem, FileType, Item, Namespace};
use crate::repository::Dataset;
use crate::submission::{self, Submission};
use crate::validation::array::{ArraySpec, array_checks};
use crate::validation::checks::{file_type_check, list_checker, not_empty};
use crate::validation::columnar::Header;
use crate::validation::{ValidationResponse, Validator};

use super::{
    Benchmark, BenchmarkError, Deadline, Evaluator, FlatMount, Result, Selection, Task, dataset_item,
};

pub const NAME: &str = "abx";
pub const DATASET: &str = "abx-dataset";
pub const SETS: [&str; 4] = ["dev-clean", "dev-other", "test-clean", "test-other"];

const WAV_LIST: &str = "wav_list";
const ITEM_FILE: &str = "item_file";
const FEATURE_TYPES: [FileType; 2] = [FileType::Npy, FileType::Txt];
const FEATURES: ArraySpec<'static> = ArraySpec {
    dtypes: &["float32", "float64"],
    ndim: 2,
    consistent_axis: Some(1),
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbxParams {
    /// Frame distance used by the evaluator (`cosine`, `euclidean`, ...).
    pub distance: String,
    /// Seconds between consecutive feature frames.
    pub feature_size: f64,
    pub speaker_modes: Vec<String>,
}

impl Default for AbxParams {
    fn default() -> Self {
        Self {
            distance: "cosine".into(),
            feature_size: 0.01,
            speaker_modes: vec!["within".into(), "across".into()],
        }
    }
}

pub struct AbxBenchmark {
    dataset: Dataset,
    settings: Settings,
}

impl AbxBenchmark {
    pub fn new(dataset: Dataset, settings: &Settings) -> Self {
        Self {
            dataset,
            settings: settings.clone(),
        }
    }
}

/// Features of one set: `.npy` files if there are any, otherwise `.txt`.
fn feature_item(dir: &Path) -> Result<Item> {
    let npy = FileListItem::from_dir(dir, &FEATURE_TYPES[..1])?;
    if !npy.files.is_empty() {
        return Ok(npy.into());
    }
    Ok(FileListItem::from_dir(dir, &FEATURE_TYPES[1..])?.into())
}

impl Benchmark for AbxBenchmark {
    type Params = AbxParams;
    type Scores = AbxScoreDir;

    fn name(&self) -> &'static str {
        NAME
    }

    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn load_submission(&self, location: &Path, selection: &Selection) -> Result<Submission<AbxParams>> {
        submission::ensure_directory(location)?;
        let mut items = Namespace::new();
        let mut validator = Validator::new();

        if selection.includes_task(NAME) {
            for set in SETS.into_iter().filter(|s| selection.includes_set(s)) {
                let dir = location.join(set);
                if !dir.is_dir() {
                    continue;
                }
                items.insert(set, feature_item(&dir)?);

                let expected = self.dataset.item(set, WAV_LIST).map(Item::stems);
                validator.register(set, move |item| check_features(item, expected.as_deref()));
            }
        }

        submission::write_default_params::<AbxParams>(location)?;
        Ok(Submission::new(location, items, validator))
    }

    fn tasks(&self, params: &AbxParams) -> Result<Vec<Box<dyn Task<AbxParams>>>> {
        Ok(vec![Box::new(AbxTask {
            evaluator: Evaluator::from_settings(&self.settings, NAME).ok(),
            params: params.clone(),
        })])
    }

    fn score_dir(&self, submission: &mut Submission<AbxParams>) -> Result<AbxScoreDir> {
        let sets = submission.items().keys().map(str::to_string).collect();
        Ok(AbxScoreDir {
            ctx: ScoreContext::from_submission(NAME, submission)?,
            sets,
        })
    }
}

/// One feature file per expected utterance, all float matrices of one width.
fn check_features(item: &Item, expected: Option<&[String]>) -> Vec<ValidationResponse> {
    let Some(expected) = expected else {
        return vec![ValidationResponse::error("dataset has no utterance list for this set")];
    };
    if let Some(empty) = not_empty(item) {
        return vec![empty];
    }
    let mut found = vec![file_type_check(item, &FEATURE_TYPES)];
    found.extend(list_checker(&item.stems(), expected));
    found.extend(array_checks(item, FEATURES));
    found
}

struct AbxTask {
    evaluator: Option<Evaluator>,
    params: AbxParams,
}

fn score_file(set: &str) -> String {
    format!("abx_{set}.txt")
}

impl Task<AbxParams> for AbxTask {
    fn name(&self) -> &str {
        NAME
    }

    fn eval(&self, submission: &Submission<AbxParams>, dataset: &Dataset) -> Result<()> {
        let sets: Vec<(&str, &Item)> = SETS
            .into_iter()
            .filter_map(|set| submission.item(set).map(|i| (set, i)))
            .collect();
        if sets.is_empty() {
            return Ok(());
        }
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| BenchmarkError::MissingEvaluator(NAME.to_string()))?;

        for (set, item) in sets {
            let item_file = dataset_item(dataset, set, ITEM_FILE)?
                .files()
                .first()
                .ok_or_else(|| BenchmarkError::MissingDatasetItem {
                    dataset: dataset.name().to_string(),
                    subset: set.to_string(),
                    item: ITEM_FILE.to_string(),
                })?;
            let output = submission.score_dir().join(score_file(set));
            let mount = FlatMount::new(item)?;

            let args: Vec<OsString> = vec![
                "--features".into(),
                mount.path().into(),
                "--item".into(),
                item_file.into(),
                "--distance".into(),
                self.params.distance.clone().into(),
                "--feature-size".into(),
                self.params.feature_size.to_string().into(),
                "--modes".into(),
                self.params.speaker_modes.join(",").into(),
                "--output".into(),
                output.clone().into(),
            ];
            evaluator.run(&args, Deadline::never())?;

            if !output.is_file() {
                return Err(BenchmarkError::MissingScoreFile(output));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AbxScores {
    /// Error rate by set, then by speaker mode.
    pub sets: BTreeMap<String, BTreeMap<String, f64>>,
    /// Error rate by speaker mode, averaged over sets.
    pub mean: BTreeMap<String, f64>,
}

/// Score files of an evaluated abx submission.
pub struct AbxScoreDir {
    ctx: ScoreContext,
    sets: Vec<String>,
}

impl AbxScoreDir {
    /// Error rate per speaker mode for one set.
    pub fn set_scores(&self, set: &str) -> Result<BTreeMap<String, f64>> {
        let file = score_file(set);
        let table = self.ctx.required_table(&file, Header::FirstRow)?;
        let modes = table.column("mode").map_err(|source| BenchmarkError::ScoreFile {
            path: self.ctx.path(&file),
            source,
        })?;
        let scores = self.ctx.numbers(&file, &table, "score")?;
        Ok(modes.into_iter().map(str::to_string).zip(scores).collect())
    }
}

impl ScoreDir for AbxScoreDir {
    type Scores = AbxScores;

    fn context(&self) -> &ScoreContext {
        &self.ctx
    }

    fn scores(&self) -> Result<AbxScores> {
        let mut scores = AbxScores::default();
        let mut by_mode: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for set in &self.sets {
            let set_scores = self.set_scores(set)?;
            for (mode, score) in &set_scores {
                by_mode.entry(mode.clone()).or_default().push(*score);
            }
            scores.sets.insert(set.clone(), set_scores);
        }
        scores.mean = by_mode
            .into_iter()
            .filter_map(|(mode, values)| mean(&values).map(|m| (mode, m)))
            .collect();
        Ok(scores)
    }
}
