//! The repository catalog: what can be pulled, and from where.
//!
//! The remote catalog is cached at `<data-dir>/repository.json` and re-fetched
//! once the cached copy is older than the configured age.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Settings;

use super::transport::Fetch;
use super::{ItemKind, Result};

/// How a catalog entry gets installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Hosted as an archive; installed with `pull`.
    Internal,
    /// Assembled from third-party sources by an install config; installed with `import`.
    External,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Internal => "internal",
            Self::External => "external",
        })
    }
}

/// Where an entry's content comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    /// One archive, or several parts concatenated in order.
    Archive(Vec<String>),
    /// An install config document describing the import rules.
    InstallConfig(String),
}

/// Expected digest of an entry's archive bytes (all parts, in order).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    /// The catalog's `md5sum` field.
    Md5(String),
    /// An explicit `sha256` field; preferred when both are given.
    Sha256(String),
}

impl Checksum {
    pub fn algorithm(&self) -> &'static str {
        match self {
            Self::Md5(_) => "md5",
            Self::Sha256(_) => "sha256",
        }
    }

    /// The expected hex digest, compared case-insensitively.
    pub fn hex(&self) -> &str {
        match self {
            Self::Md5(hex) | Self::Sha256(hex) => hex,
        }
    }
}

/// Errors in the shape of a catalog entry.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("internal entry {0} has no archive URL")]
    MissingArchive(String),

    #[error("internal entry {0} has no checksum")]
    MissingChecksum(String),

    #[error("external entry {0} has no install config URL")]
    MissingInstallConfig(String),
}

/// One installable dataset, checkpoint, or sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCatalogEntry", into = "RawCatalogEntry")]
pub struct CatalogEntry {
    pub name: String,
    pub kind: EntryKind,
    pub checksum: Option<Checksum>,
    /// Archive size in bytes, used for progress.
    pub total_size: u64,
    pub description: String,
    pub source: EntrySource,
}

/// The wire form of a catalog entry, validated into [`CatalogEntry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawCatalogEntry {
    name: String,
    #[serde(rename = "type")]
    kind: EntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    md5sum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sha256: Option<String>,
    #[serde(default)]
    total_size: u64,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    zip_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    zip_parts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    install_config: Option<String>,
}

impl TryFrom<RawCatalogEntry> for CatalogEntry {
    type Error = CatalogError;

    fn try_from(raw: RawCatalogEntry) -> core::result::Result<Self, Self::Error> {
        let non_empty = |hex: Option<String>| hex.filter(|h| !h.trim().is_empty());
        let checksum = non_empty(raw.sha256)
            .map(Checksum::Sha256)
            .or_else(|| non_empty(raw.md5sum).map(Checksum::Md5));
        let source = match raw.kind {
            EntryKind::Internal => {
                let urls = match (raw.zip_parts, raw.zip_url) {
                    (Some(parts), _) if !parts.is_empty() => parts,
                    (_, Some(url)) => vec![url],
                    _ => return Err(CatalogError::MissingArchive(raw.name)),
                };
                if checksum.is_none() {
                    return Err(CatalogError::MissingChecksum(raw.name));
                }
                EntrySource::Archive(urls)
            }
            EntryKind::External => match raw.install_config {
                Some(url) => EntrySource::InstallConfig(url),
                None => return Err(CatalogError::MissingInstallConfig(raw.name)),
            },
        };
        Ok(Self {
            name: raw.name,
            kind: raw.kind,
            checksum,
            total_size: raw.total_size,
            description: raw.description,
            source,
        })
    }
}

impl From<CatalogEntry> for RawCatalogEntry {
    fn from(entry: CatalogEntry) -> Self {
        let (zip_url, zip_parts, install_config) = match entry.source {
            EntrySource::Archive(mut urls) if urls.len() == 1 => (urls.pop(), None, None),
            EntrySource::Archive(urls) => (None, Some(urls), None),
            EntrySource::InstallConfig(url) => (None, None, Some(url)),
        };
        let (md5sum, sha256) = match entry.checksum {
            Some(Checksum::Md5(hex)) => (Some(hex), None),
            Some(Checksum::Sha256(hex)) => (None, Some(hex)),
            None => (None, None),
        };
        Self {
            name: entry.name,
            kind: entry.kind,
            md5sum,
            sha256,
            total_size: entry.total_size,
            description: entry.description,
            zip_url,
            zip_parts,
            install_config,
        }
    }
}

/// The catalog document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryCatalog {
    pub last_modified: Timestamp,
    #[serde(default)]
    pub datasets: Vec<CatalogEntry>,
    #[serde(default)]
    pub checkpoints: Vec<CatalogEntry>,
    #[serde(default)]
    pub samples: Vec<CatalogEntry>,
}

impl RepositoryCatalog {
    pub fn entries(&self, kind: ItemKind) -> &[CatalogEntry] {
        match kind {
            ItemKind::Dataset => &self.datasets,
            ItemKind::Checkpoint => &self.checkpoints,
            ItemKind::Sample => &self.samples,
        }
    }

    pub fn find(&self, kind: ItemKind, name: &str) -> Option<&CatalogEntry> {
        self.entries(kind).iter().find(|e| e.name == name)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Load the catalog, refreshing the cached copy when it is missing or stale.
    ///
    /// `force` re-fetches regardless of age. If fetching fails and a stale copy
    /// exists, the stale copy is used.
    pub fn load(settings: &Settings, fetcher: &dyn Fetch, force: bool) -> Result<Self> {
        let path = settings.catalog_file();
        if !force && is_fresh(&path, settings.catalog_max_age()) {
            debug!(path = %path.display(), "using cached catalog");
            return Self::parse(&fs::read(&path)?);
        }

        match fetcher.get_bytes(&settings.catalog_url) {
            Ok(bytes) => {
                let catalog = Self::parse(&bytes)?;
                fs::create_dir_all(&settings.data_dir)?;
                fs::write(&path, &bytes)?;
                info!(url = %settings.catalog_url, last_modified = %catalog.last_modified, "catalog refreshed");
                Ok(catalog)
            }
            Err(e) if path.is_file() => {
                warn!(error = %e, "catalog refresh failed, using stale copy");
                Self::parse(&fs::read(&path)?)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Whether `path` exists and was modified less than `max_age` ago.
fn is_fresh(path: &Path, max_age: Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < max_age)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::io::Write;

    use indicatif::ProgressBar;
    use tempfile::TempDir;

    use crate::repository::transport::{FetchError, Result as FetchResult};

    const CATALOG: &str = r#"{
        "last_modified": "2024-03-01T12:00:00Z",
        "datasets": [
            {
                "name": "abx-dataset",
                "type": "internal",
                "md5sum": "00ff",
                "total_size": 1024,
                "zip_url": "https://example.org/abx.zip"
            },
            {
                "name": "librispeech-import",
                "type": "external",
                "install_config": "https://example.org/libri.json"
            }
        ],
        "checkpoints": [
            {
                "name": "cpc-small",
                "type": "internal",
                "sha256": "aa",
                "zip_parts": ["https://example.org/cpc.z01", "https://example.org/cpc.z02"]
            }
        ]
    }"#;

    /// Serves one fixed document and counts requests.
    struct CountingFetcher {
        body: Option<&'static str>,
        calls: Cell<usize>,
    }

    impl Fetch for CountingFetcher {
        fn get_bytes(&self, url: &str) -> FetchResult<Vec<u8>> {
            self.calls.set(self.calls.get() + 1);
            self.body
                .map(|b| b.as_bytes().to_vec())
                .ok_or_else(|| FetchError::UnsupportedUrl(url.to_string()))
        }

        fn download(&self, url: &str, out: &mut dyn Write, _: &ProgressBar) -> FetchResult<u64> {
            let bytes = self.get_bytes(url)?;
            out.write_all(&bytes)?;
            Ok(bytes.len() as u64)
        }
    }

    #[test]
    fn parses_entries_by_kind() {
        let catalog = RepositoryCatalog::parse(CATALOG.as_bytes()).unwrap();
        let abx = catalog.find(ItemKind::Dataset, "abx-dataset").unwrap();
        assert_eq!(abx.kind, EntryKind::Internal);
        assert_eq!(
            abx.source,
            EntrySource::Archive(vec!["https://example.org/abx.zip".into()])
        );

        let libri = catalog
            .find(ItemKind::Dataset, "librispeech-import")
            .unwrap();
        assert!(matches!(libri.source, EntrySource::InstallConfig(_)));

        let cpc = catalog.find(ItemKind::Checkpoint, "cpc-small").unwrap();
        assert!(matches!(&cpc.source, EntrySource::Archive(parts) if parts.len() == 2));

        assert!(catalog.samples.is_empty());
        assert!(catalog.find(ItemKind::Dataset, "cpc-small").is_none());
    }

    #[test]
    fn internal_entry_without_archive_is_rejected() {
        let json = r#"{"name": "x", "type": "internal", "md5sum": "00"}"#;
        let err = serde_json::from_str::<CatalogEntry>(json).unwrap_err();
        assert!(err.to_string().contains("no archive URL"));
    }

    #[test]
    fn internal_entry_without_checksum_is_rejected() {
        let json = r#"{"name": "x", "type": "internal", "zip_url": "https://e/x.zip"}"#;
        let err = serde_json::from_str::<CatalogEntry>(json).unwrap_err();
        assert!(err.to_string().contains("no checksum"));

        let json = r#"{"name": "x", "type": "internal", "md5sum": " ", "zip_url": "https://e/x.zip"}"#;
        assert!(serde_json::from_str::<CatalogEntry>(json).is_err());
    }

    #[test]
    fn md5sum_is_the_default_and_sha256_wins_when_given() {
        let catalog = RepositoryCatalog::parse(CATALOG.as_bytes()).unwrap();
        let abx = catalog.find(ItemKind::Dataset, "abx-dataset").unwrap();
        assert_eq!(abx.checksum, Some(Checksum::Md5("00ff".into())));
        let cpc = catalog.find(ItemKind::Checkpoint, "cpc-small").unwrap();
        assert_eq!(cpc.checksum, Some(Checksum::Sha256("aa".into())));

        let json = r#"{"name": "x", "type": "internal", "md5sum": "11", "sha256": "22", "zip_url": "https://e/x.zip"}"#;
        let entry: CatalogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.checksum.as_ref().map(Checksum::algorithm), Some("sha256"));

        let back = serde_json::to_value(&entry).unwrap();
        assert_eq!(back["sha256"], "22");
        assert!(back.get("md5sum").is_none());
    }

    #[test]
    fn external_entry_requires_install_config() {
        let json = r#"{"name": "x", "type": "external", "zip_url": "https://e/x.zip"}"#;
        let err = serde_json::from_str::<CatalogEntry>(json).unwrap_err();
        assert!(err.to_string().contains("no install config URL"));
    }

    #[test]
    fn fresh_cache_short_circuits() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::with_data_dir(dir.path());
        let fetcher = CountingFetcher {
            body: Some(CATALOG),
            calls: Cell::new(0),
        };

        RepositoryCatalog::load(&settings, &fetcher, false).unwrap();
        assert!(settings.catalog_file().is_file());
        RepositoryCatalog::load(&settings, &fetcher, false).unwrap();
        assert_eq!(fetcher.calls.get(), 1);

        RepositoryCatalog::load(&settings, &fetcher, true).unwrap();
        assert_eq!(fetcher.calls.get(), 2);
    }

    #[test]
    fn stale_cache_is_refetched() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::with_data_dir(dir.path());
        settings.catalog_max_age_days = 0;
        let fetcher = CountingFetcher {
            body: Some(CATALOG),
            calls: Cell::new(0),
        };

        RepositoryCatalog::load(&settings, &fetcher, false).unwrap();
        RepositoryCatalog::load(&settings, &fetcher, false).unwrap();
        assert_eq!(fetcher.calls.get(), 2);
    }

    #[test]
    fn offline_falls_back_to_stale_copy() {
        let dir = TempDir::new().unwrap();
        let mut settings = Settings::with_data_dir(dir.path());
        settings.catalog_max_age_days = 0;
        fs::write(settings.catalog_file(), CATALOG).unwrap();

        let offline = CountingFetcher {
            body: None,
            calls: Cell::new(0),
        };
        let catalog = RepositoryCatalog::load(&settings, &offline, false).unwrap();
        assert_eq!(catalog.datasets.len(), 2);
    }

    #[test]
    fn offline_without_cache_fails() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::with_data_dir(dir.path());
        let offline = CountingFetcher {
            body: None,
            calls: Cell::new(0),
        };
        assert!(RepositoryCatalog::load(&settings, &offline, false).is_err());
    }
}
