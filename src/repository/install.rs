//! Declarative install configs for externally sourced items.
//!
//! An install config is a map of numbered steps plus the index to persist once
//! every step has run:
//!
//! ```text
//! { "rules": { "0": { "action": "download", ... }, "1": { ... } },
//!   "index_obj": { ... } }
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::fsutil::{safe_join, symlink};

use super::transport::{Fetch, progress_bar};
use super::{RepositoryError, Result, archive};

/// One step of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InstallRule {
    /// Fetch `source` to `<location>/<target>`.
    Download { source: String, target: PathBuf },

    /// For each `(src, tgt)`, link `<location>/<src>` to `<import_location>/<tgt>`.
    Symlink { source_target: Vec<(PathBuf, PathBuf)> },

    /// Fetch the zip at `source` (of `size` bytes) and unpack it under `<location>/<target>`.
    DownloadExtract {
        source: String,
        target: PathBuf,
        size: u64,
    },
}

impl InstallRule {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Download { .. } => "download",
            Self::Symlink { .. } => "symlink",
            Self::DownloadExtract { .. } => "download_extract",
        }
    }
}

/// The install config document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallConfig {
    pub rules: BTreeMap<String, InstallRule>,
    pub index_obj: serde_json::Value,
}

impl InstallConfig {
    /// Parse an install config; any shape problem (including an unknown action)
    /// is a configuration error for `name`.
    pub fn parse(name: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| RepositoryError::Config {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Rules in execution order: numeric keys ascending, then other keys lexicographically.
    pub fn ordered_rules(&self) -> Vec<(&str, &InstallRule)> {
        let mut rules: Vec<_> = self.rules.iter().map(|(k, r)| (k.as_str(), r)).collect();
        rules.sort_by(|(a, _), (b, _)| rule_key_order(a, b));
        rules
    }
}

fn rule_key_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Everything a rule needs to run.
pub(super) struct RuleContext<'a> {
    pub name: &'a str,
    pub location: &'a Path,
    pub import_location: &'a Path,
    pub tmp_dir: &'a Path,
    pub fetcher: &'a dyn Fetch,
    pub show_progress: bool,
}

impl RuleContext<'_> {
    pub fn apply(&self, key: &str, rule: &InstallRule) -> Result<()> {
        debug!(item = self.name, step = key, action = rule.action(), "running install rule");
        match rule {
            InstallRule::Download { source, target } => {
                let dest = self.target(target)?;
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let bar = progress_bar(None, self.show_progress, &format!("{} [{key}]", self.name));
                let mut out = BufWriter::new(File::create(&dest)?);
                self.fetcher.download(source, &mut out, &bar)?;
                out.flush()?;
                bar.finish_and_clear();
            }
            InstallRule::Symlink { source_target } => {
                for (src, tgt) in source_target {
                    let link = self.target(src)?;
                    let pointee = self.import_source(tgt)?;
                    if !pointee.exists() {
                        return Err(RepositoryError::MissingImportSource(pointee));
                    }
                    if let Some(parent) = link.parent() {
                        fs::create_dir_all(parent)?;
                    }
                    symlink(&std::path::absolute(&pointee)?, &link)?;
                }
            }
            InstallRule::DownloadExtract {
                source,
                target,
                size,
            } => {
                let dest = self.target(target)?;
                fs::create_dir_all(self.tmp_dir)?;
                let part = self.tmp_dir.join(format!("{}-{key}.part", self.name));
                let bar = progress_bar(
                    Some(*size),
                    self.show_progress,
                    &format!("{} [{key}]", self.name),
                );
                let mut out = BufWriter::new(File::create(&part)?);
                self.fetcher.download(source, &mut out, &bar)?;
                out.flush()?;
                drop(out);
                bar.finish_and_clear();
                let extracted = archive::extract(&part, &dest);
                fs::remove_file(&part)?;
                extracted?;
            }
        }
        info!(item = self.name, step = key, action = rule.action(), "install rule done");
        Ok(())
    }

    fn target(&self, relative: &Path) -> Result<PathBuf> {
        safe_join(self.location, relative).ok_or_else(|| self.escape_error(relative))
    }

    fn import_source(&self, relative: &Path) -> Result<PathBuf> {
        safe_join(self.import_location, relative).ok_or_else(|| self.escape_error(relative))
    }

    fn escape_error(&self, path: &Path) -> RepositoryError {
        RepositoryError::Config {
            name: self.name.to_string(),
            reason: format!("path {} escapes its root", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_keys_sort_numerically() {
        let json = r#"{
            "rules": {
                "10": {"action": "download", "source": "s10", "target": "t"},
                "2": {"action": "download", "source": "s2", "target": "t"},
                "0": {"action": "download", "source": "s0", "target": "t"},
                "cleanup": {"action": "symlink", "source_target": []}
            },
            "index_obj": {}
        }"#;
        let config = InstallConfig::parse("x", json.as_bytes()).unwrap();
        let keys: Vec<_> = config.ordered_rules().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, ["0", "2", "10", "cleanup"]);
    }

    #[test]
    fn unknown_action_is_a_config_error() {
        let json = r#"{
            "rules": {"0": {"action": "teleport", "source": "s", "target": "t"}},
            "index_obj": {}
        }"#;
        let err = InstallConfig::parse("x", json.as_bytes()).unwrap_err();
        assert!(matches!(err, RepositoryError::Config { .. }));
    }

    #[test]
    fn missing_required_field_is_a_config_error() {
        let json = r#"{
            "rules": {"0": {"action": "download_extract", "source": "s", "target": "t"}},
            "index_obj": {}
        }"#;
        let err = InstallConfig::parse("x", json.as_bytes()).unwrap_err();
        assert!(matches!(err, RepositoryError::Config { .. }));
    }

    #[test]
    fn symlink_pairs_parse_from_arrays() {
        let json = r#"{"action": "symlink", "source_target": [["wav/dev", "LibriSpeech/dev-clean"]]}"#;
        let rule: InstallRule = serde_json::from_str(json).unwrap();
        assert_eq!(
            rule,
            InstallRule::Symlink {
                source_target: vec![(
                    PathBuf::from("wav/dev"),
                    PathBuf::from("LibriSpeech/dev-clean")
                )]
            }
        );
    }
}
