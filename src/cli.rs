//! CLI interface for benchkit.
//!
//! Commands split into three groups:
//!
//! - `benchkit datasets|checkpoints|samples <command>` manages installed items.
//! - `benchkit validate|evaluate|leaderboard <benchmark> <dir>` works on a submission.
//! - `benchkit config init|show` manages the config file.
//!
//! Command output goes to stdout, logs and progress to stderr.

mod format;

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use crate::benchmark::{Benchmark, Selection, abx, slm, tde};
use crate::config::Settings;
use crate::leaderboard::ScoreDir;
use crate::repository::{
    Dataset, HttpFetcher, ItemKind, PullOptions, RepoItemDir, RepositoryCatalog, is_pullable,
};

use format::{format_entry, format_response, format_summary};

/// Benchkit: benchmark data, submission checks, and scoring.
#[derive(Debug, Parser)]
#[command(name = "benchkit", version, after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Only report errors; hide progress bars.
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Re-fetch the repository catalog even if the cached copy is fresh.
    #[arg(long, global = true)]
    refresh: bool,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r#"Workflow: scoring a submission
  1. benchkit datasets pull slm-dataset
  2. benchkit validate slm ./my-submission
  3. benchkit evaluate slm ./my-submission
  4. benchkit leaderboard slm ./my-submission
     → writes ./my-submission/leaderboard.json

Evaluators are external programs configured in config.toml:
  [evaluators]
  lexical = ["python", "-m", "lexical_eval"]"#;

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage installed datasets.
    Datasets {
        #[command(subcommand)]
        command: ItemCommand,
    },

    /// Manage installed model checkpoints.
    Checkpoints {
        #[command(subcommand)]
        command: ItemCommand,
    },

    /// Manage installed audio samples.
    Samples {
        #[command(subcommand)]
        command: ItemCommand,
    },

    /// Check a submission directory and list every finding.
    ///
    /// Exits with an error when any check fails.
    Validate(SubmissionArgs),

    /// Run a benchmark's evaluators over a valid submission.
    Evaluate {
        #[command(flatten)]
        submission: SubmissionArgs,

        /// Write score files here instead of `<dir>/scores`.
        #[arg(long)]
        score_dir: Option<PathBuf>,
    },

    /// Build `leaderboard.json` from an evaluated submission.
    Leaderboard {
        #[command(flatten)]
        submission: SubmissionArgs,

        /// Read score files from here instead of `<dir>/scores`.
        #[arg(long)]
        score_dir: Option<PathBuf>,
    },

    /// Manage the config file.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ItemCommand {
    /// List catalog entries and whether they are installed.
    List {
        /// Only show installed items.
        #[arg(long)]
        installed: bool,
    },

    /// Download and install a hosted item.
    Pull {
        name: String,

        /// Skip the checksum comparison.
        #[arg(long)]
        no_verify: bool,
    },

    /// Install an external item from data already on disk.
    Import {
        name: String,

        /// Directory holding the original data.
        source: PathBuf,
    },

    /// Remove an installed item.
    Rm { name: String },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write the default config file if none exists.
    Init,

    /// Print the effective configuration.
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum BenchmarkArg {
    /// Spoken language modelling probes.
    Slm,
    /// ABX discriminability of speech features.
    Abx,
    /// Spoken term discovery.
    Tde,
}

#[derive(Debug, clap::Args)]
pub struct SubmissionArgs {
    #[arg(value_enum)]
    benchmark: BenchmarkArg,

    /// Submission directory.
    dir: PathBuf,

    /// Only load these tasks. Can be specified multiple times.
    #[arg(long)]
    task: Vec<String>,

    /// Only load these sets. Can be specified multiple times.
    #[arg(long)]
    set: Vec<String>,

    /// Use a dataset directory instead of the installed dataset.
    #[arg(long)]
    dataset: Option<PathBuf>,
}

impl SubmissionArgs {
    fn selection(&self) -> Selection {
        Selection {
            tasks: self.task.clone(),
            sets: self.set.clone(),
        }
    }
}

/// What to do with a loaded submission.
#[derive(Debug, Clone, Copy)]
enum Action<'a> {
    Validate,
    Evaluate { score_dir: Option<&'a Path> },
    Leaderboard { score_dir: Option<&'a Path> },
}

/// Run the CLI, returning an error message on failure.
pub fn run(settings: &Settings) -> Result<(), String> {
    let cli = Cli::parse();
    let opts = PullOptions {
        quiet: cli.quiet,
        ..PullOptions::default()
    };

    match &cli.command {
        Command::Datasets { command } => cmd_items(settings, ItemKind::Dataset, command, opts, cli.refresh),
        Command::Checkpoints { command } => {
            cmd_items(settings, ItemKind::Checkpoint, command, opts, cli.refresh)
        }
        Command::Samples { command } => cmd_items(settings, ItemKind::Sample, command, opts, cli.refresh),
        Command::Validate(args) => dispatch(settings, args, Action::Validate, &cli),
        Command::Evaluate {
            submission,
            score_dir,
        } => dispatch(
            settings,
            submission,
            Action::Evaluate {
                score_dir: score_dir.as_deref(),
            },
            &cli,
        ),
        Command::Leaderboard {
            submission,
            score_dir,
        } => dispatch(
            settings,
            submission,
            Action::Leaderboard {
                score_dir: score_dir.as_deref(),
            },
            &cli,
        ),
        Command::Config { command } => match command {
            ConfigCommand::Init => cmd_config_init(settings),
            ConfigCommand::Show => cmd_config_show(settings),
        },
    }
}

fn load_catalog(settings: &Settings, fetcher: &HttpFetcher, refresh: bool) -> Result<RepositoryCatalog, String> {
    RepositoryCatalog::load(settings, fetcher, refresh).map_err(|e| format!("failed to load catalog: {e}"))
}

fn cmd_items(
    settings: &Settings,
    kind: ItemKind,
    command: &ItemCommand,
    opts: PullOptions,
    refresh: bool,
) -> Result<(), String> {
    let fetcher = HttpFetcher::new().map_err(|e| format!("failed to set up HTTP client: {e}"))?;
    let catalog = load_catalog(settings, &fetcher, refresh)?;
    let dir = RepoItemDir::new(kind, settings, &catalog);
    let label = kind.label();

    let item = |name: &str| {
        dir.get(name)
            .ok_or_else(|| format!("no {label} named '{name}' in the catalog"))
    };

    match command {
        ItemCommand::List { installed } => {
            let names = dir
                .installed()
                .map_err(|e| format!("failed to list {}: {e}", dir.root().display()))?;
            let entries: Vec<_> = dir
                .available()
                .iter()
                .filter(|e| !installed || names.contains(&e.name))
                .collect();
            if entries.is_empty() {
                println!("No {label}s");
                return Ok(());
            }
            for entry in entries {
                println!("{}", format_entry(entry, names.contains(&entry.name)));
            }
            Ok(())
        }
        ItemCommand::Pull { name, no_verify } => {
            let item = item(name)?;
            if !is_pullable(item.origin()) {
                return Err(format!(
                    "{name} is assembled from external data; use `benchkit {label}s import {name} <dir>`"
                ));
            }
            let opts = PullOptions {
                verify: !no_verify,
                ..opts
            };
            item.pull(&fetcher, opts)
                .map_err(|e| format!("failed to pull {name}: {e}"))?;
            println!("{}", item.location().display());
            Ok(())
        }
        ItemCommand::Import { name, source } => {
            let item = item(name)?;
            item.import(source, &fetcher, opts)
                .map_err(|e| format!("failed to import {name}: {e}"))?;
            println!("{}", item.location().display());
            Ok(())
        }
        ItemCommand::Rm { name } => {
            let item = item(name)?;
            if !item.installed() {
                return Err(format!("{label} {name} is not installed"));
            }
            item.uninstall()
                .map_err(|e| format!("failed to remove {name}: {e}"))?;
            eprintln!("Removed {label} {name}");
            Ok(())
        }
    }
}

/// Open the dataset a benchmark scores against.
fn open_dataset(
    settings: &Settings,
    name: &str,
    location: Option<&Path>,
    refresh: bool,
) -> Result<Dataset, String> {
    if let Some(location) = location {
        return Dataset::from_location(name, location).map_err(|e| e.to_string());
    }
    let fetcher = HttpFetcher::new().map_err(|e| format!("failed to set up HTTP client: {e}"))?;
    let catalog = load_catalog(settings, &fetcher, refresh)?;
    let datasets = RepoItemDir::new(ItemKind::Dataset, settings, &catalog);
    Dataset::open(&datasets, name).map_err(|e| format!("{e}; pull it with `benchkit datasets pull {name}`"))
}

fn dispatch(settings: &Settings, args: &SubmissionArgs, action: Action<'_>, cli: &Cli) -> Result<(), String> {
    let dataset = |name: &str| open_dataset(settings, name, args.dataset.as_deref(), cli.refresh);
    match args.benchmark {
        BenchmarkArg::Slm => {
            let bench = slm::SlmBenchmark::new(dataset(slm::DATASET)?, settings);
            run_action(&bench, args, action)
        }
        BenchmarkArg::Abx => {
            let bench = abx::AbxBenchmark::new(dataset(abx::DATASET)?, settings);
            run_action(&bench, args, action)
        }
        BenchmarkArg::Tde => {
            let bench = tde::TdeBenchmark::new(dataset(tde::DATASET)?, settings).with_progress(!cli.quiet);
            run_action(&bench, args, action)
        }
    }
}

fn run_action<B: Benchmark>(bench: &B, args: &SubmissionArgs, action: Action<'_>) -> Result<(), String> {
    let mut submission = bench
        .load_submission(&args.dir, &args.selection())
        .map_err(|e| format!("failed to load submission: {e}"))?;

    match action {
        Action::Validate => {
            let meta = submission
                .validate_meta()
                .map_err(|e| format!("failed to read metadata: {e}"))?;
            let output = submission.validation_output().clone() + meta;
            for response in output.iter().filter(|r| !r.is_ok()) {
                println!("{}", format_response(response));
            }
            println!("{}", format_summary(&output));
            if output.fails() {
                return Err(format!("{} is not a valid {} submission", args.dir.display(), bench.name()));
            }
            Ok(())
        }
        Action::Evaluate { score_dir } => {
            if let Some(dir) = score_dir {
                submission.set_score_dir(dir);
            }
            if !submission.valid() {
                for response in submission.validation_output().errors() {
                    eprintln!("{}", format_response(response));
                }
                return Err(format!(
                    "refusing to evaluate an invalid submission; run `benchkit validate {} {}`",
                    bench.name(),
                    args.dir.display()
                ));
            }
            bench
                .run(&mut submission)
                .map_err(|e| format!("evaluation failed: {e}"))?;
            println!("{}", submission.score_dir().display());
            Ok(())
        }
        Action::Leaderboard { score_dir } => {
            if let Some(dir) = score_dir {
                submission.set_score_dir(dir);
            }
            let path = bench
                .score_dir(&mut submission)
                .and_then(|scores| scores.write_leaderboard())
                .map_err(|e| format!("failed to build leaderboard entry: {e}"))?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn cmd_config_init(settings: &Settings) -> Result<(), String> {
    let path = Settings::path().map_err(|e| e.to_string())?;
    if path.exists() {
        return Err(format!("{} already exists", path.display()));
    }
    settings
        .save_to(&path)
        .map_err(|e| format!("failed to write {}: {e}", path.display()))?;
    fs::create_dir_all(&settings.data_dir)
        .map_err(|e| format!("failed to create {}: {e}", settings.data_dir.display()))?;
    println!("{}", path.display());
    Ok(())
}

fn cmd_config_show(settings: &Settings) -> Result<(), String> {
    let text = toml::to_string_pretty(settings).map_err(|e| format!("failed to serialize config: {e}"))?;
    print!("{text}");
    Ok(())
}
