//! Spoken language modelling probes: lexical and syntactic acceptability.
//!
//! A submission scores every probe pair; `lexical/dev.txt` holds one
//! `<id> <score>` line per lexical probe of the dev set, and so on. The
//! evaluators compare those scores against the gold files of the dataset and
//! write per-frequency-bin and per-type accuracy tables.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::leaderboard::{ScoreContext, ScoreDir, mean, weighted_mean};
use crate::model::{FileItem, Item, Namespace};
use crate::repository::Dataset;
use crate::submission::{self, Submission};
use crate::validation::checks::list_checker;
use crate::validation::columnar::{Delimiter, Header, Table, column_type_check};
use crate::validation::{ValidationResponse, Validator};

use super::{
    Benchmark, BenchmarkError, Deadline, Evaluator, Result, Selection, Task, dataset_item,
};

pub const NAME: &str = "slm";
pub const DATASET: &str = "slm-dataset";
pub const TASKS: [&str; 2] = ["lexical", "syntactic"];
pub const SETS: [&str; 2] = ["dev", "test"];

const GOLD_ITEM: &str = "gold";
const SUBMISSION_COLUMNS: &[&str] = &["id", "score"];
/// Frequency bin of words absent from the training vocabulary.
const OOV_BIN: &str = "oov";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalParams {
    pub by_pair: bool,
    pub by_length: bool,
}

impl Default for LexicalParams {
    fn default() -> Self {
        Self {
            by_pair: true,
            by_length: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntacticParams {
    pub by_pair: bool,
}

impl Default for SyntacticParams {
    fn default() -> Self {
        Self { by_pair: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlmParams {
    pub lexical: LexicalParams,
    pub syntactic: SyntacticParams,
}

fn item_name(task: &str, set: &str) -> String {
    format!("{task}_{set}")
}

pub struct SlmBenchmark {
    dataset: Dataset,
    settings: Settings,
}

impl SlmBenchmark {
    pub fn new(dataset: Dataset, settings: &Settings) -> Self {
        Self {
            dataset,
            settings: settings.clone(),
        }
    }
}

impl Benchmark for SlmBenchmark {
    type Params = SlmParams;
    type Scores = SlmScoreDir;

    fn name(&self) -> &'static str {
        NAME
    }

    fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    fn load_submission(&self, location: &Path, selection: &Selection) -> Result<Submission<SlmParams>> {
        submission::ensure_directory(location)?;
        let mut items = Namespace::new();
        let mut validator = Validator::new();

        for task in TASKS.into_iter().filter(|t| selection.includes_task(t)) {
            for set in SETS.into_iter().filter(|s| selection.includes_set(s)) {
                let file = location.join(task).join(format!("{set}.txt"));
                if !file.is_file() {
                    continue;
                }
                let name = item_name(task, set);
                items.insert(name.clone(), Item::from(FileItem::from_file(file)?));

                let gold = self
                    .dataset
                    .item(&name, GOLD_ITEM)
                    .and_then(|g| g.files().first().cloned());
                validator.register(name, move |item| check_probe_scores(item, gold.as_deref()));
            }
        }

        submission::write_default_params::<SlmParams>(location)?;
        Ok(Submission::new(location, items, validator))
    }

    fn tasks(&self, params: &SlmParams) -> Result<Vec<Box<dyn Task<SlmParams>>>> {
        let flag = |on: bool, name: &str| on.then(|| name.to_string());
        let lexical = ProbeTask {
            task: "lexical",
            evaluator: Evaluator::from_settings(&self.settings, "lexical").ok(),
            extra_args: [
                flag(params.lexical.by_pair, "--by-pair"),
                flag(params.lexical.by_length, "--by-length"),
            ]
            .into_iter()
            .flatten()
            .collect(),
        };
        let syntactic = ProbeTask {
            task: "syntactic",
            evaluator: Evaluator::from_settings(&self.settings, "syntactic").ok(),
            extra_args: flag(params.syntactic.by_pair, "--by-pair").into_iter().collect(),
        };
        Ok(vec![Box::new(lexical), Box::new(syntactic)])
    }

    fn score_dir(&self, submission: &mut Submission<SlmParams>) -> Result<SlmScoreDir> {
        let items = submission.items().keys().map(str::to_string).collect();
        Ok(SlmScoreDir {
            ctx: ScoreContext::from_submission(NAME, submission)?,
            items,
        })
    }
}

/// Scores must be numeric and cover exactly the gold probe ids.
fn check_probe_scores(item: &Item, gold: Option<&Path>) -> Vec<ValidationResponse> {
    let Some(file) = item.files().first() else {
        return vec![ValidationResponse::error("no submission file")];
    };
    let Some(gold) = gold else {
        return vec![ValidationResponse::error("dataset has no gold file for this set")];
    };

    let table = match Table::read(file, Header::Named(SUBMISSION_COLUMNS), Delimiter::Whitespace) {
        Ok(table) => table,
        Err(e) => return vec![ValidationResponse::error(e.to_string()).with_filename(file.clone())],
    };
    let gold_ids: Vec<String> = match Table::read(gold, Header::FirstRow, Delimiter::Whitespace)
        .and_then(|g| Ok(g.column("id")?.into_iter().map(str::to_string).collect()))
    {
        Ok(ids) => ids,
        Err(e) => return vec![ValidationResponse::error(format!("unreadable gold file: {e}"))],
    };
    let ids: Vec<String> = table
        .column("id")
        .map(|ids| ids.into_iter().map(str::to_string).collect())
        .unwrap_or_default();

    let mut found = vec![column_type_check::<f64>(&table, "score", "numeric")];
    if has_duplicates(&ids) {
        found.push(ValidationResponse::error("duplicate ids"));
    }
    found.extend(list_checker(&ids, &gold_ids));
    found
        .into_iter()
        .map(|r| r.with_filename(file.clone()))
        .collect()
}

fn has_duplicates(ids: &[String]) -> bool {
    let unique: BTreeSet<&String> = ids.iter().collect();
    unique.len() != ids.len()
}

/// Runs one probe evaluator over every set the submission provides.
struct ProbeTask {
    task: &'static str,
    evaluator: Option<Evaluator>,
    extra_args: Vec<String>,
}

impl ProbeTask {
    fn output_file(&self, set: &str) -> String {
        match self.task {
            "lexical" => lexical_file(set),
            _ => syntactic_file(set),
        }
    }
}

impl Task<SlmParams> for ProbeTask {
    fn name(&self) -> &str {
        self.task
    }

    fn eval(&self, submission: &Submission<SlmParams>, dataset: &Dataset) -> Result<()> {
        let sets: Vec<(&str, &Item)> = SETS
            .into_iter()
            .filter_map(|set| submission.item(&item_name(self.task, set)).map(|i| (set, i)))
            .collect();
        if sets.is_empty() {
            return Ok(());
        }
        let evaluator = self
            .evaluator
            .as_ref()
            .ok_or_else(|| BenchmarkError::MissingEvaluator(self.task.to_string()))?;

        for (set, item) in sets {
            let name = item_name(self.task, set);
            let gold = dataset_item(dataset, &name, GOLD_ITEM)?;
            let (Some(gold), Some(scores)) = (gold.files().first(), item.files().first()) else {
                continue;
            };
            let output = submission.score_dir().join(self.output_file(set));

            let mut args: Vec<OsString> = vec![
                "--gold".into(),
                gold.into(),
                "--submission".into(),
                scores.into(),
                "--output".into(),
                output.clone().into(),
            ];
            args.extend(self.extra_args.iter().map(OsString::from));
            evaluator.run(&args, Deadline::never())?;

            if !output.is_file() {
                return Err(BenchmarkError::MissingScoreFile(output));
            }
        }
        Ok(())
    }
}

fn lexical_file(set: &str) -> String {
    format!("lexical_{set}_by_frequency.txt")
}

fn syntactic_file(set: &str) -> String {
    format!("syntactic_{set}_by_type.txt")
}

fn semantic_file(set: &str) -> String {
    format!("semantic_{set}_correlation.txt")
}

/// One frequency bin of the lexical results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyRow {
    pub frequency: String,
    pub n: f64,
    pub score: f64,
}

/// One probe type of the syntactic results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeRow {
    pub kind: String,
    pub n: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalSummary {
    pub mean: Option<f64>,
    pub weighted_mean: Option<f64>,
    /// Mean over frequency bins, out-of-vocabulary bin excluded.
    pub mean_invocab: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyntacticSummary {
    pub mean: Option<f64>,
    pub weighted_mean: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlmScores {
    pub lexical: BTreeMap<String, LexicalSummary>,
    pub syntactic: BTreeMap<String, SyntacticSummary>,
    pub semantic: BTreeMap<String, Option<f64>>,
}

/// Score files of an evaluated slm submission.
pub struct SlmScoreDir {
    ctx: ScoreContext,
    items: Vec<String>,
}

impl SlmScoreDir {
    fn rows(&self, file: &str, first: &str) -> Result<Vec<(String, f64, f64)>> {
        let table = self.ctx.required_table(file, Header::FirstRow)?;
        let keys = table.column(first).map_err(|source| BenchmarkError::ScoreFile {
            path: self.ctx.path(file),
            source,
        })?;
        let n = self.ctx.numbers(file, &table, "n")?;
        let score = self.ctx.numbers(file, &table, "score")?;
        Ok(keys
            .into_iter()
            .zip(n)
            .zip(score)
            .map(|((k, n), s)| (k.to_string(), n, s))
            .collect())
    }

    pub fn lexical_by_frequency(&self, set: &str) -> Result<Vec<FrequencyRow>> {
        Ok(self
            .rows(&lexical_file(set), "frequency")?
            .into_iter()
            .map(|(frequency, n, score)| FrequencyRow { frequency, n, score })
            .collect())
    }

    pub fn syntactic_by_type(&self, set: &str) -> Result<Vec<TypeRow>> {
        Ok(self
            .rows(&syntactic_file(set), "type")?
            .into_iter()
            .map(|(kind, n, score)| TypeRow { kind, n, score })
            .collect())
    }

    /// Mean semantic correlation, or `None` when no semantic scores were produced.
    pub fn semantic_correlation(&self, set: &str) -> Result<Option<f64>> {
        let file = semantic_file(set);
        let Some(table) = self.ctx.optional_table(&file, Header::FirstRow)? else {
            return Ok(None);
        };
        Ok(mean(&self.ctx.numbers(&file, &table, "correlation")?))
    }

    pub fn lexical_summary(&self, set: &str) -> Result<LexicalSummary> {
        let rows = self.lexical_by_frequency(set)?;
        let scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
        let weighted: Vec<(f64, f64)> = rows.iter().map(|r| (r.score, r.n)).collect();
        let invocab: Vec<f64> = rows
            .iter()
            .filter(|r| r.frequency != OOV_BIN)
            .map(|r| r.score)
            .collect();
        Ok(LexicalSummary {
            mean: mean(&scores),
            weighted_mean: weighted_mean(&weighted),
            mean_invocab: mean(&invocab),
        })
    }

    pub fn syntactic_summary(&self, set: &str) -> Result<SyntacticSummary> {
        let rows = self.syntactic_by_type(set)?;
        let scores: Vec<f64> = rows.iter().map(|r| r.score).collect();
        let weighted: Vec<(f64, f64)> = rows.iter().map(|r| (r.score, r.n)).collect();
        Ok(SyntacticSummary {
            mean: mean(&scores),
            weighted_mean: weighted_mean(&weighted),
        })
    }

    pub fn location(&self) -> &Path {
        &self.ctx.location
    }
}

impl ScoreDir for SlmScoreDir {
    type Scores = SlmScores;

    fn context(&self) -> &ScoreContext {
        &self.ctx
    }

    fn scores(&self) -> Result<SlmScores> {
        let mut scores = SlmScores::default();
        for set in SETS {
            if self.items.contains(&item_name("lexical", set)) {
                scores.lexical.insert(set.to_string(), self.lexical_summary(set)?);
                scores
                    .semantic
                    .insert(set.to_string(), self.semantic_correlation(set)?);
            }
            if self.items.contains(&item_name("syntactic", set)) {
                scores.syntactic.insert(set.to_string(), self.syntactic_summary(set)?);
            }
        }
        Ok(scores)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    use crate::benchmark::tests::write_dataset;
    use crate::submission::PARAMS_FILE;

    const LEXICAL_SCORES: &str = r"printf 'frequency n score\noov 2 0.5\nlow 6 0.7\nhigh 2 0.9\n' > $6";
    const SYNTACTIC_SCORES: &str = r"printf 'type n score\nagreement 1 0.6\nnegation 3 1.0\n' > $6";

    struct Fixture {
        _data: TempDir,
        sub: TempDir,
        bench: SlmBenchmark,
    }

    fn gold(root: &Path, name: &str, text: &str) -> Item {
        let path = root.join(name);
        fs::write(&path, text).unwrap();
        FileItem::from_file(path).unwrap().into()
    }

    fn fixture(evaluators: &[(&str, &str)]) -> Fixture {
        let data = TempDir::new().unwrap();
        let lexical = gold(data.path(), "lexical_dev.txt", "id word\naa x\nab y\n");
        let syntactic = gold(data.path(), "syntactic_dev.txt", "id type\nsa t1\nsb t2\n");
        let dataset = write_dataset(
            data.path(),
            DATASET,
            vec![
                ("lexical_dev", vec![(GOLD_ITEM, lexical)]),
                ("syntactic_dev", vec![(GOLD_ITEM, syntactic)]),
            ],
        );

        let mut settings = Settings::with_data_dir(data.path());
        for (name, script) in evaluators {
            settings.evaluators.insert(
                (*name).to_string(),
                vec!["/bin/sh".into(), "-c".into(), (*script).into(), (*name).into()],
            );
        }

        let sub = TempDir::new().unwrap();
        fs::create_dir_all(sub.path().join("lexical")).unwrap();
        fs::create_dir_all(sub.path().join("syntactic")).unwrap();
        fs::write(sub.path().join("lexical/dev.txt"), "aa 0.1\nab -0.2\n").unwrap();
        fs::write(sub.path().join("syntactic/dev.txt"), "sa 1\nsb 2\n").unwrap();

        Fixture {
            _data: data,
            sub,
            bench: SlmBenchmark::new(dataset, &settings),
        }
    }

    fn close(a: Option<f64>, b: f64) -> bool {
        a.is_some_and(|a| (a - b).abs() < 1e-9)
    }

    #[test]
    fn loads_present_combinations_and_writes_params() {
        let f = fixture(&[]);
        let submission = f.bench.load_submission(f.sub.path(), &Selection::all()).unwrap();
        assert_eq!(
            submission.items().keys().collect::<Vec<_>>(),
            ["lexical_dev", "syntactic_dev"]
        );
        assert!(f.sub.path().join(PARAMS_FILE).is_file());
    }

    #[test]
    fn selection_limits_probing() {
        let f = fixture(&[]);
        let selection = Selection {
            tasks: vec!["lexical".into()],
            sets: Vec::new(),
        };
        let submission = f.bench.load_submission(f.sub.path(), &selection).unwrap();
        assert_eq!(submission.items().keys().collect::<Vec<_>>(), ["lexical_dev"]);
    }

    #[test]
    fn missing_submission_directory() {
        let f = fixture(&[]);
        let err = f
            .bench
            .load_submission(&f.sub.path().join("nope"), &Selection::all())
            .unwrap_err();
        assert!(matches!(err, BenchmarkError::Submission(_)));
    }

    #[test]
    fn valid_submission_passes() {
        let f = fixture(&[]);
        let mut submission = f.bench.load_submission(f.sub.path(), &Selection::all()).unwrap();
        assert!(submission.valid());
    }

    #[test]
    fn bad_scores_and_ids_are_reported() {
        let f = fixture(&[]);
        fs::write(f.sub.path().join("syntactic/dev.txt"), "sa one\nsc 2\n").unwrap();
        let mut submission = f.bench.load_submission(f.sub.path(), &Selection::all()).unwrap();

        assert!(!submission.valid());
        let errors: Vec<_> = submission
            .validation_output()
            .errors()
            .map(|r| (r.item_name.clone().unwrap(), r.msg.clone()))
            .collect();
        assert!(errors.iter().all(|(item, _)| item == "syntactic_dev"));
        assert!(errors.iter().any(|(_, msg)| msg.starts_with("column score must be numeric")));
        assert!(errors.iter().any(|(_, msg)| msg == "missing: sb"));
        assert!(errors.iter().any(|(_, msg)| msg == "unexpected: sc"));
    }

    #[test]
    fn run_and_read_scores() {
        let f = fixture(&[("lexical", LEXICAL_SCORES), ("syntactic", SYNTACTIC_SCORES)]);
        let mut submission = f.bench.load_submission(f.sub.path(), &Selection::all()).unwrap();
        f.bench.run(&mut submission).unwrap();

        let scores = f.bench.score_dir(&mut submission).unwrap();
        let lexical = scores.lexical_summary("dev").unwrap();
        assert!(close(lexical.mean, 0.7));
        assert!(close(lexical.weighted_mean, 0.7));
        assert!(close(lexical.mean_invocab, 0.8));

        let syntactic = scores.syntactic_summary("dev").unwrap();
        assert!(close(syntactic.mean, 0.8));
        assert!(close(syntactic.weighted_mean, 0.9));

        assert_eq!(scores.semantic_correlation("dev").unwrap(), None);
        let all = scores.scores().unwrap();
        assert!(all.lexical.contains_key("dev"));
        assert!(!all.lexical.contains_key("test"));

        fs::write(
            scores.location().join(semantic_file("dev")),
            "dataset correlation\nlibri 0.2\nsynthetic 0.4\n",
        )
        .unwrap();
        assert!(close(scores.semantic_correlation("dev").unwrap(), 0.3));
    }

    #[test]
    fn missing_score_file_is_an_error() {
        let f = fixture(&[("lexical", LEXICAL_SCORES), ("syntactic", "true")]);
        let mut submission = f.bench.load_submission(f.sub.path(), &Selection::all()).unwrap();
        let err = f.bench.run(&mut submission).unwrap_err();
        assert!(matches!(err, BenchmarkError::MissingScoreFile(_)));

        let scores = f.bench.score_dir(&mut submission).unwrap();
        assert!(scores.lexical_summary("dev").is_ok());
        assert!(matches!(
            scores.syntactic_summary("dev"),
            Err(BenchmarkError::MissingScoreFile(_))
        ));
    }

    #[test]
    fn unconfigured_evaluator_fails_only_when_needed() {
        let f = fixture(&[("lexical", LEXICAL_SCORES)]);
        let selection = Selection {
            tasks: vec!["lexical".into()],
            sets: Vec::new(),
        };
        let mut submission = f.bench.load_submission(f.sub.path(), &selection).unwrap();
        f.bench.run(&mut submission).unwrap();

        let mut submission = f.bench.load_submission(f.sub.path(), &Selection::all()).unwrap();
        let err = f.bench.run(&mut submission).unwrap_err();
        assert!(matches!(err, BenchmarkError::MissingEvaluator(ref name) if name == "syntactic"));
    }
}
