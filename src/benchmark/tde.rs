//! Spoken term discovery.
//!
//! A submission lists the fragments it discovered for each language in a
//! class file (`english.txt`, ...):
//!
//! ```text
//! Class 1
//! s0107a 1.330 1.720
//! s2801b 0.250 0.610
//!
//! Class 2
//! ...
//! ```
//!
//! Each language is scored by the `tde` evaluator, which prints its metrics
//! as a JSON object. Grouping metrics can take very long, so every language
//! runs under its own deadline.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Settings;
use crate::leaderboard::{ScoreContext, ScoreDir, mean};
use crate::model::{FileItem, Item, Namespace};
use crate::repository::Dataset;
use crate::submission::{self, Submission};
use crate::validation::{ValidationResponse, Validator};

use super::{
    Benchmark, BenchmarkError, Deadline, Evaluator, Result, Selection, Task, run_units,
};

pub const NAME: &str = "tde";
pub const DATASET: &str = "tde-dataset";
pub const LANGUAGES: [&str; 5] = ["english", "french", "mandarin", "german", "wolof"];
pub const SCORE_FILE: &str = "tde_scores.json";

const WAV_LIST: &str = "wav_list";

/// Metric name to value, as printed by the evaluator.
pub type Metrics = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TdeParams {
    pub n_jobs: usize,
    /// Per-language time limit; `None` waits forever.
    pub grouping_timeout_secs: Option<u64>,
}

impl Default for TdeParams {
    fn default() -> Self {
        Self {
            n_jobs: 1,
            grouping_timeout_secs: Some(7200),
        }
    }
}

/// One discovered fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Interval {
    pub file: String,
    pub onset: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Class {
    pub id: u64,
    pub intervals: Vec<Interval>,
}

/// A parsed class file and every syntax problem found along the way.
#[derive(Debug, Default)]
pub struct ClassFile {
    pub classes: Vec<Class>,
    pub problems: Vec<ValidationResponse>,
}

impl ClassFile {
    /// Parse the whole text; problems don't stop the scan.
    pub fn parse(text: &str) -> Self {
        let mut out = Self::default();
        let mut ids = BTreeSet::new();
        let mut open = None;

        for (n, line) in text.lines().enumerate() {
            let line_no = n + 1;
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [] => {}
                ["Class", rest @ ..] => {
                    if let Some(header) = open.take() {
                        out.close_class(header);
                    }
                    let Some(id) = rest.first().and_then(|id| id.parse::<u64>().ok()) else {
                        out.problem(line_no, "class header needs a numeric id");
                        continue;
                    };
                    if !ids.insert(id) {
                        out.problem(line_no, format!("class {id} defined twice"));
                    }
                    open = Some(line_no);
                    out.classes.push(Class {
                        id,
                        intervals: Vec::new(),
                    });
                }
                [file, onset, offset] => {
                    let (Ok(onset), Ok(offset)) = (onset.parse::<f64>(), offset.parse::<f64>()) else {
                        out.problem(line_no, "onset and offset must be numbers");
                        continue;
                    };
                    if !onset.is_finite() || !offset.is_finite() || onset < 0.0 || onset >= offset {
                        out.problem(line_no, format!("invalid interval {onset}..{offset}"));
                        continue;
                    }
                    let interval = Interval {
                        file: (*file).to_string(),
                        onset,
                        offset,
                    };
                    // A rejected header leaves no class open.
                    match out.classes.last_mut().filter(|_| open.is_some()) {
                        Some(class) => class.intervals.push(interval),
                        None => out.problem(line_no, "interval outside of any class"),
                    }
                }
                _ => out.problem(line_no, "expected `Class <id>` or `<file> <onset> <offset>`"),
            }
        }
        if let Some(header) = open {
            out.close_class(header);
        }
        out
    }

    fn close_class(&mut self, header_line: usize) {
        if let Some(class) = self.classes.last()
            && class.intervals.is_empty()
        {
            let msg = format!("class {} has no intervals", class.id);
            self.problem(header_line, msg);
        }
    }

    fn problem(&mut self, line: usize, msg: impl Into<String>) {
        let msg = msg.into();
        self.problems
            .push(ValidationResponse::error(format!("line {line}: {msg}")).with_data(line));
    }

    pub fn interval_count(&self) -> usize {
        self.classes.iter().map(|c| c.intervals.len()).sum()
    }

    /// Files referenced by any interval.
    pub fn files(&self) -> BTreeSet<&str> {
        self.classes
            .iter()
            .flat_map(|c| &c.intervals)
            .map(|i| i.file.as_str())
            .collect()
    }
}

/// Syntax, then references to files the dataset knows.
fn check_class_file(item: &Item, known: Option<&[String]>) -> Vec<ValidationResponse> {
    let Some(path) = item.files().first() else {
        return vec![ValidationResponse::error("no class file")];
    };
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return vec![ValidationResponse::error(format!("cannot read class file: {e}"))],
    };

    let parsed = ClassFile::parse(&text);
    let mut found = parsed.problems.clone();
    match known {
        Some(known) => {
            let known: BTreeSet<&str> = known.iter().map(String::as_str).collect();
            found.extend(
                parsed
                    .files()
                    .into_iter()
                    .filter(|f| !known.contains(f))
                    .map(|f| ValidationResponse::error(format!("unknown file: {f}")).with_data(f)),
            );
        }
        None => found.push(ValidationResponse::error("dataset has no file list for this language")),
    }

    if found.is_empty() {
        found.push(ValidationResponse::ok(format!(
            "{} classes, {} intervals",
            parsed.classes.len(),
            parsed.interval_count()
        )));
    }
    found
}

pub struct TdeBenchmark {
    dataset: Dataset,
    settings: Settings,
    show_progress: bool,
}

impl TdeBenchmark {
    pub fn new(dataset: Dataset, settings: &Settings) -> Self {
        Self {
            dataset,
            settings: settings.clone(),
            show_progress: true,
        }
    }

    /// Draw a per-language progress bar while evaluating.
    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }
}

impl Benchmark for TdeBenchmark {
    type Params = TdeParams;
    type Scores = TdeScoreDir;

    fn name(&self) -> &'static str {
        NAME
    }

    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn load_submission(&self, location: &Path, selection: &Selection) -> Result<Submission<TdeParams>> {
        submission::ensure_directory(location)?;
        let mut items = Namespace::new();
        let mut validator = Validator::new();

        if selection.includes_task(NAME) {
            for lang in LANGUAGES.into_iter().filter(|l| selection.includes_set(l)) {
                let file = location.join(format!("{lang}.txt"));
                if !file.is_file() {
                    continue;
                }
                items.insert(lang, FileItem::from_file(file)?.into());

                let known = self.dataset.item(lang, WAV_LIST).map(Item::stems);
                validator.register(lang, move |item| check_class_file(item, known.as_deref()));
            }
        }

        submission::write_default_params::<TdeParams>(location)?;
        Ok(Submission::new(location, items, validator))
    }

    fn tasks(&self, params: &TdeParams) -> Result<Vec<Box<dyn Task<TdeParams>>>> {
        Ok(vec![Box::new(TdeTask {
            evaluator: Evaluator::from_settings(&self.settings, NAME).ok(),
            params: params.clone(),
            show_progress: self.show_progress,
        })])
    }

    fn score_dir(&self, submission: &mut Submission<TdeParams>) -> Result<TdeScoreDir> {
        Ok(TdeScoreDir {
            ctx: ScoreContext::from_submission(NAME, submission)?,
        })
    }
}

struct TdeTask {
    evaluator: Option<Evaluator>,
    params: TdeParams,
    show_progress: bool,
}

impl Task<TdeParams> for TdeTask {
    fn name(&self) -> &str {
        NAME
    }

    fn eval(&self, submission: &Submission<TdeParams>, dataset: &Dataset) -> Result<()> {
        let class_files: BTreeMap<String, PathBuf> = LANGUAGES
            .into_iter()
            .filter_map(|lang| {
                let file = submission.item(lang)?.files().first()?;
                Some((lang.to_string(), file.clone()))
            })
            .collect();
        if class_files.is_empty() {
            return Ok(());
        }
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| BenchmarkError::MissingEvaluator(NAME.to_string()))?;

        let budget = self.params.grouping_timeout_secs.map(Duration::from_secs);
        let languages = class_files.keys().cloned().collect();
        let results = run_units(languages, self.params.n_jobs, budget, self.show_progress, |lang, deadline| {
            score_language(evaluator, dataset.location(), lang, &class_files[lang], deadline)
        })?;

        let output = submission.score_dir().join(SCORE_FILE);
        fs::write(&output, serde_json::to_string_pretty(&results)?)?;
        info!(
            path = %output.display(),
            languages = results.len(),
            timed_out = results.values().filter(|r| r.is_none()).count(),
            "tde scores written"
        );
        Ok(())
    }
}

fn score_language(
    evaluator: &Evaluator,
    dataset: &Path,
    lang: &str,
    class_file: &Path,
    deadline: Deadline,
) -> Result<Metrics> {
    let args: Vec<OsString> = vec![
        "--language".into(),
        lang.into(),
        "--classes".into(),
        class_file.into(),
        "--dataset".into(),
        dataset.into(),
    ];
    let stdout = evaluator.run(&args, deadline)?;
    let metrics: Metrics = serde_json::from_str(stdout.trim())?;
    debug!(language = lang, metrics = metrics.len(), "language scored");
    Ok(metrics)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TdeScores {
    /// Metrics per language; `None` where the evaluator timed out.
    pub languages: BTreeMap<String, Option<Metrics>>,
    /// Each metric averaged over the languages that finished.
    pub mean: Metrics,
}

pub struct TdeScoreDir {
    ctx: ScoreContext,
}

impl TdeScoreDir {
    pub fn language_scores(&self) -> Result<BTreeMap<String, Option<Metrics>>> {
        let path = self.ctx.path(SCORE_FILE);
        if !path.is_file() {
            return Err(BenchmarkError::MissingScoreFile(path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(&path)?)?)
    }
}

impl ScoreDir for TdeScoreDir {
    type Scores = TdeScores;

    fn context(&self) -> &ScoreContext {
        &self.ctx
    }

    fn scores(&self) -> Result<TdeScores> {
        let languages = self.language_scores()?;
        let mut by_metric: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for metrics in languages.values().flatten() {
            for (name, value) in metrics {
                by_metric.entry(name).or_default().push(*value);
            }
        }
        let means = by_metric
            .into_iter()
            .filter_map(|(name, values)| mean(&values).map(|m| (name.to_string(), m)))
            .collect();
        Ok(TdeScores {
            languages,
            mean: means,
        })
    }
}
