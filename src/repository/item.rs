//! Installable repository items and their lifecycle.
//!
//! ```text
//! NotInstalled --pull/import--> Installed --uninstall--> NotInstalled
//! ```
//!
//! Installs never leave a half-populated `location`: archives are extracted
//! into a staging directory and renamed into place, and a failed import
//! removes what it created.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use indicatif::ProgressBar;
use md5::Md5;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::archive;
use super::catalog::{CatalogEntry, Checksum, EntryKind, EntrySource};
use super::install::{InstallConfig, RuleContext};
use super::transport::{Fetch, HashingWriter, progress_bar};
use super::{RepositoryError, Result};

/// Name of the index file every installed dataset carries.
pub const INDEX_FILE: &str = "index.json";

/// Knobs shared by `pull` and `import`.
#[derive(Debug, Clone, Copy)]
pub struct PullOptions {
    /// Recompute the archive checksum and refuse to install on mismatch.
    pub verify: bool,
    /// Demote progress logging to debug.
    pub quiet: bool,
    /// Draw progress bars.
    pub show_progress: bool,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            verify: true,
            quiet: false,
            show_progress: true,
        }
    }
}

impl PullOptions {
    fn bars_visible(self) -> bool {
        self.show_progress && !self.quiet
    }
}

/// A catalog entry bound to its local install directory.
#[derive(Debug, Clone)]
pub struct RepositoryItem {
    location: PathBuf,
    origin: CatalogEntry,
    tmp_dir: PathBuf,
}

impl RepositoryItem {
    pub fn new(location: PathBuf, origin: CatalogEntry, tmp_dir: PathBuf) -> Self {
        Self {
            location,
            origin,
            tmp_dir,
        }
    }

    pub fn name(&self) -> &str {
        &self.origin.name
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn origin(&self) -> &CatalogEntry {
        &self.origin
    }

    pub fn installed(&self) -> bool {
        self.location.is_dir()
    }

    /// Download, verify, and extract an internal item.
    pub fn pull(&self, fetcher: &dyn Fetch, opts: PullOptions) -> Result<()> {
        let EntrySource::Archive(urls) = &self.origin.source else {
            return Err(self.wrong_kind("pull"));
        };
        if self.installed() {
            return Err(RepositoryError::AlreadyInstalled(self.name().to_string()));
        }
        let _lock = InstallLock::acquire(&self.location)?;

        fs::create_dir_all(&self.tmp_dir)?;
        // Truncating discards whatever an interrupted attempt left behind.
        let part = self.tmp_dir.join(format!("{}.part", self.name()));
        let result = self.fetch_and_extract(fetcher, urls, &part, opts);
        if part.exists()
            && let Err(e) = fs::remove_file(&part)
        {
            warn!(path = %part.display(), error = %e, "could not remove partial download");
        }
        result
    }

    fn fetch_and_extract(
        &self,
        fetcher: &dyn Fetch,
        urls: &[String],
        part: &Path,
        opts: PullOptions,
    ) -> Result<()> {
        self.log(opts, &format!("downloading {} part(s)", urls.len()));
        let total = (self.origin.total_size > 0).then_some(self.origin.total_size);
        let bar = progress_bar(total, opts.bars_visible(), self.name());
        let digest = match &self.origin.checksum {
            Some(Checksum::Sha256(_)) => download_all::<Sha256>(fetcher, urls, part, &bar)?,
            _ => download_all::<Md5>(fetcher, urls, part, &bar)?,
        };
        bar.finish_and_clear();

        if opts.verify {
            let Some(expected) = &self.origin.checksum else {
                return Err(RepositoryError::Integrity {
                    name: self.name().to_string(),
                    algorithm: "md5",
                    expected: String::new(),
                    actual: digest,
                });
            };
            if !archive::checksums_match(expected.hex(), &digest) {
                return Err(RepositoryError::Integrity {
                    name: self.name().to_string(),
                    algorithm: expected.algorithm(),
                    expected: expected.hex().to_string(),
                    actual: digest,
                });
            }
            self.log(opts, &format!("{} checksum verified", expected.algorithm()));
        }

        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        if let Err(e) = archive::extract(part, &staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        if let Some(parent) = self.location.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&staging, &self.location)?;
        self.log(opts, "installed");
        Ok(())
    }

    /// Run an external item's install config, linking data from `import_location`.
    pub fn import(
        &self,
        import_location: &Path,
        fetcher: &dyn Fetch,
        opts: PullOptions,
    ) -> Result<()> {
        let EntrySource::InstallConfig(url) = &self.origin.source else {
            return Err(self.wrong_kind("import"));
        };
        if self.installed() {
            return Err(RepositoryError::AlreadyInstalled(self.name().to_string()));
        }
        let _lock = InstallLock::acquire(&self.location)?;

        let config = InstallConfig::parse(self.name(), &fetcher.get_bytes(url)?)?;
        fs::create_dir_all(&self.location)?;

        let ctx = RuleContext {
            name: self.name(),
            location: &self.location,
            import_location,
            tmp_dir: &self.tmp_dir,
            fetcher,
            show_progress: opts.bars_visible(),
        };
        let result = config
            .ordered_rules()
            .into_iter()
            .try_for_each(|(key, rule)| ctx.apply(key, rule))
            .and_then(|()| {
                let json = serde_json::to_string_pretty(&config.index_obj)?;
                fs::write(self.location.join(INDEX_FILE), json)?;
                Ok(())
            });

        if let Err(e) = result {
            warn!(item = self.name(), error = %e, "import failed, removing partial install");
            fs::remove_dir_all(&self.location)?;
            return Err(e);
        }
        self.log(opts, &format!("imported {} rule(s)", config.rules.len()));
        Ok(())
    }

    /// Remove the install directory. No-op when not installed.
    pub fn uninstall(&self) -> Result<()> {
        if self.installed() {
            fs::remove_dir_all(&self.location)?;
            info!(item = self.name(), "uninstalled");
        }
        Ok(())
    }

    fn staging_dir(&self) -> PathBuf {
        self.location
            .with_file_name(format!(".{}.staging", self.name()))
    }

    fn wrong_kind(&self, operation: &'static str) -> RepositoryError {
        RepositoryError::WrongKind {
            name: self.name().to_string(),
            kind: self.origin.kind,
            operation,
        }
    }

    fn log(&self, opts: PullOptions, message: &str) {
        if opts.quiet {
            debug!(item = self.name(), "{message}");
        } else {
            info!(item = self.name(), "{message}");
        }
    }
}

/// Stream every part into `part` in order, returning the hex digest of the whole.
fn download_all<D: Digest>(
    fetcher: &dyn Fetch,
    urls: &[String],
    part: &Path,
    bar: &ProgressBar,
) -> Result<String> {
    let mut writer = HashingWriter::<_, D>::new(BufWriter::new(File::create(part)?));
    for url in urls {
        fetcher.download(url, &mut writer, bar)?;
    }
    Ok(writer.finish()?)
}

/// Advisory lock on a sibling `.name.lock` file, held while an item is being
/// installed. The OS drops the lock with the process, so a crashed install
/// leaves nothing that blocks the next one.
struct InstallLock {
    path: PathBuf,
    _file: File,
}

impl InstallLock {
    fn acquire(location: &Path) -> Result<Self> {
        let name = location
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = location.with_file_name(format!(".{name}.lock"));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { path, _file: file }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(RepositoryError::InstallInProgress(path))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for InstallLock {
    fn drop(&mut self) {
        // Removed while still locked; the lock itself goes with the handle.
        let _ = fs::remove_file(&self.path);
    }
}

/// Whether the entry should be installed with `pull` (vs `import`).
pub fn is_pullable(entry: &CatalogEntry) -> bool {
    entry.kind == EntryKind::Internal
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::repository::archive::tests::{checksum_file, write_zip};
    use crate::repository::transport::HttpFetcher;

    struct Fixture {
        dir: TempDir,
        fetcher: HttpFetcher,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                fetcher: HttpFetcher::new().unwrap(),
            }
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.dir.path().join(rel)
        }

        fn url(&self, rel: &str) -> String {
            format!("file://{}", self.path(rel).display())
        }

        fn item(&self, entry: CatalogEntry) -> RepositoryItem {
            RepositoryItem::new(
                self.path("datasets").join(&entry.name),
                entry,
                self.path("tmp"),
            )
        }

        fn internal(&self, name: &str, parts: &[&str], checksum: &str) -> RepositoryItem {
            self.item(CatalogEntry {
                name: name.into(),
                kind: EntryKind::Internal,
                checksum: Some(Checksum::Md5(checksum.into())),
                total_size: 0,
                description: String::new(),
                source: EntrySource::Archive(parts.iter().map(|p| self.url(p)).collect()),
            })
        }

        fn external(&self, name: &str, config: &str) -> RepositoryItem {
            fs::write(self.path("install.json"), config).unwrap();
            self.item(CatalogEntry {
                name: name.into(),
                kind: EntryKind::External,
                checksum: None,
                total_size: 0,
                description: String::new(),
                source: EntrySource::InstallConfig(self.url("install.json")),
            })
        }
    }

    fn quiet() -> PullOptions {
        PullOptions {
            verify: true,
            quiet: true,
            show_progress: false,
        }
    }

    #[test]
    fn pull_verifies_and_installs() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}"), ("dev/a.wav", "x")]);
        let sum = checksum_file::<Md5>(&fx.path("abx.zip"));
        let item = fx.internal("abx", &["abx.zip"], &sum);

        assert!(!item.installed());
        item.pull(&fx.fetcher, quiet()).unwrap();

        assert!(item.installed());
        assert!(item.location().join("dev/a.wav").is_file());
        assert!(!fx.path("tmp/abx.part").exists());
        assert!(!fx.path("datasets/.abx.lock").exists());
    }

    #[test]
    fn corrupted_archive_aborts_before_extraction() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let item = fx.internal("abx", &["abx.zip"], &"0".repeat(32));

        let err = item.pull(&fx.fetcher, quiet()).unwrap_err();

        assert!(matches!(err, RepositoryError::Integrity { .. }));
        assert!(!item.location().exists());
        assert!(!fx.path("datasets/.abx.staging").exists());
        assert!(!fx.path("tmp/abx.part").exists());
    }

    #[test]
    fn explicit_sha256_is_verified_with_sha256() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let md5 = checksum_file::<Md5>(&fx.path("abx.zip"));
        let sha = checksum_file::<Sha256>(&fx.path("abx.zip"));

        let mut entry = fx.internal("abx", &["abx.zip"], &md5).origin().clone();
        entry.checksum = Some(Checksum::Sha256(md5));
        let err = fx.item(entry.clone()).pull(&fx.fetcher, quiet()).unwrap_err();
        assert!(matches!(
            err,
            RepositoryError::Integrity { algorithm: "sha256", .. }
        ));

        entry.checksum = Some(Checksum::Sha256(sha.to_uppercase()));
        let item = fx.item(entry);
        item.pull(&fx.fetcher, quiet()).unwrap();
        assert!(item.installed());
    }

    #[test]
    fn unverified_pull_skips_checksum() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let item = fx.internal("abx", &["abx.zip"], "bogus");

        let opts = PullOptions {
            verify: false,
            ..quiet()
        };
        item.pull(&fx.fetcher, opts).unwrap();
        assert!(item.installed());
    }

    #[test]
    fn multi_part_archives_are_concatenated() {
        let fx = Fixture::new();
        write_zip(&fx.path("full.zip"), &[("a.txt", "alpha"), ("b.txt", "beta")]);
        let bytes = fs::read(fx.path("full.zip")).unwrap();
        let (head, tail) = bytes.split_at(bytes.len() / 2);
        fs::write(fx.path("full.z01"), head).unwrap();
        fs::write(fx.path("full.z02"), tail).unwrap();
        let sum = checksum_file::<Md5>(&fx.path("full.zip"));

        let item = fx.internal("ckpt", &["full.z01", "full.z02"], &sum);
        item.pull(&fx.fetcher, quiet()).unwrap();
        assert_eq!(
            fs::read_to_string(item.location().join("b.txt")).unwrap(),
            "beta"
        );
    }

    #[test]
    fn stale_partial_download_is_discarded() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let sum = checksum_file::<Md5>(&fx.path("abx.zip"));
        fs::create_dir_all(fx.path("tmp")).unwrap();
        fs::write(fx.path("tmp/abx.part"), "leftover junk from a killed run").unwrap();

        let item = fx.internal("abx", &["abx.zip"], &sum);
        item.pull(&fx.fetcher, quiet()).unwrap();
        assert!(item.installed());
    }

    #[test]
    fn pull_twice_fails_and_uninstall_resets() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let sum = checksum_file::<Md5>(&fx.path("abx.zip"));
        let item = fx.internal("abx", &["abx.zip"], &sum);

        item.pull(&fx.fetcher, quiet()).unwrap();
        let err = item.pull(&fx.fetcher, quiet()).unwrap_err();
        assert!(matches!(err, RepositoryError::AlreadyInstalled(_)));

        item.uninstall().unwrap();
        assert!(!item.installed());
        item.uninstall().unwrap();
    }

    #[test]
    fn concurrent_install_is_refused() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let sum = checksum_file::<Md5>(&fx.path("abx.zip"));
        let item = fx.internal("abx", &["abx.zip"], &sum);

        let _held = InstallLock::acquire(item.location()).unwrap();
        let err = item.pull(&fx.fetcher, quiet()).unwrap_err();
        assert!(matches!(err, RepositoryError::InstallInProgress(_)));
    }

    #[test]
    fn leftovers_from_a_killed_install_do_not_block() {
        let fx = Fixture::new();
        write_zip(&fx.path("abx.zip"), &[("index.json", "{}")]);
        let sum = checksum_file::<Md5>(&fx.path("abx.zip"));
        fs::create_dir_all(fx.path("datasets")).unwrap();
        fs::write(fx.path("datasets/.abx.lock"), "").unwrap();
        fs::create_dir_all(fx.path("tmp")).unwrap();
        fs::write(fx.path("tmp/abx.part"), "truncated").unwrap();

        let item = fx.internal("abx", &["abx.zip"], &sum);
        item.pull(&fx.fetcher, quiet()).unwrap();
        assert!(item.installed());
    }

    #[test]
    fn lock_is_released_on_drop() {
        let fx = Fixture::new();
        let location = fx.path("datasets/abx");
        drop(InstallLock::acquire(&location).unwrap());
        let _again = InstallLock::acquire(&location).unwrap();
    }

    #[test]
    fn pull_on_external_item_is_wrong_kind() {
        let fx = Fixture::new();
        let item = fx.external("libri", r#"{"rules": {}, "index_obj": {}}"#);
        let err = item.pull(&fx.fetcher, quiet()).unwrap_err();
        assert!(matches!(err, RepositoryError::WrongKind { .. }));

        let internal = fx.internal("abx", &["abx.zip"], "00");
        let err = internal
            .import(fx.dir.path(), &fx.fetcher, quiet())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::WrongKind { .. }));
    }

    #[test]
    fn import_runs_rules_in_key_order() {
        let fx = Fixture::new();
        fs::write(fx.path("v1.txt"), "first").unwrap();
        fs::write(fx.path("v2.txt"), "second").unwrap();
        let location = fx.path("datasets/libri");

        // "10" must run after "2": a string sort would run it first and the
        // symlink in "2" would have nothing to point at yet.
        let config = format!(
            r#"{{
                "rules": {{
                    "0": {{"action": "download", "source": "{v1}", "target": "words.txt"}},
                    "1": {{"action": "download", "source": "{v2}", "target": "words.txt"}},
                    "2": {{"action": "download", "source": "{v1}", "target": "raw/a.txt"}},
                    "10": {{"action": "symlink", "source_target": [["alias.txt", "raw/a.txt"]]}}
                }},
                "index_obj": {{"root_dir": "{root}", "subsets": {{}}}}
            }}"#,
            v1 = fx.url("v1.txt"),
            v2 = fx.url("v2.txt"),
            root = location.display(),
        );
        let item = fx.external("libri", &config);

        item.import(&location, &fx.fetcher, quiet()).unwrap();

        assert_eq!(
            fs::read_to_string(location.join("words.txt")).unwrap(),
            "second"
        );
        assert!(
            fs::symlink_metadata(location.join("alias.txt"))
                .unwrap()
                .file_type()
                .is_symlink()
        );
        assert_eq!(
            fs::read_to_string(location.join("alias.txt")).unwrap(),
            "first"
        );
        let index: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(location.join(INDEX_FILE)).unwrap())
                .unwrap();
        assert_eq!(index["subsets"], serde_json::json!({}));
    }

    #[test]
    fn import_out_of_order_dependency_fails_and_cleans_up() {
        let fx = Fixture::new();
        fs::write(fx.path("v1.txt"), "first").unwrap();
        let location = fx.path("datasets/libri");

        // The symlink step runs before the download it depends on.
        let config = format!(
            r#"{{
                "rules": {{
                    "0": {{"action": "symlink", "source_target": [["alias.txt", "raw/a.txt"]]}},
                    "1": {{"action": "download", "source": "{v1}", "target": "raw/a.txt"}}
                }},
                "index_obj": {{}}
            }}"#,
            v1 = fx.url("v1.txt"),
        );
        let item = fx.external("libri", &config);

        let err = item.import(&location, &fx.fetcher, quiet()).unwrap_err();
        assert!(matches!(err, RepositoryError::MissingImportSource(_)));
        assert!(!location.exists());
    }

    #[test]
    fn import_symlinks_into_external_location() {
        let fx = Fixture::new();
        let external = fx.path("LibriSpeech");
        fs::create_dir_all(external.join("dev-clean")).unwrap();
        fs::write(external.join("dev-clean/1.flac"), "fLaC").unwrap();
        write_zip(&fx.path("align.zip"), &[("dev-clean.txt", "1 0.0 0.5")]);

        let config = format!(
            r#"{{
                "rules": {{
                    "0": {{"action": "symlink", "source_target": [["wav/dev-clean", "dev-clean"]]}},
                    "1": {{"action": "download_extract", "source": "{zip}", "target": "alignments", "size": 10}}
                }},
                "index_obj": {{}}
            }}"#,
            zip = fx.url("align.zip"),
        );
        let item = fx.external("libri", &config);
        item.import(&external, &fx.fetcher, quiet()).unwrap();

        let location = item.location();
        assert!(location.join("wav/dev-clean/1.flac").is_file());
        assert!(location.join("alignments/dev-clean.txt").is_file());
        assert!(!fx.path("tmp/libri-1.part").exists());
        // Linked, not copied.
        assert!(
            fs::symlink_metadata(location.join("wav/dev-clean"))
                .unwrap()
                .file_type()
                .is_symlink()
        );
    }

    #[test]
    fn escaping_target_is_a_config_error() {
        let fx = Fixture::new();
        fs::write(fx.path("v1.txt"), "first").unwrap();
        let config = format!(
            r#"{{"rules": {{"0": {{"action": "download", "source": "{v1}", "target": "../evil.txt"}}}}, "index_obj": {{}}}}"#,
            v1 = fx.url("v1.txt"),
        );
        let item = fx.external("libri", &config);
        let err = item
            .import(fx.dir.path(), &fx.fetcher, quiet())
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Config { .. }));
        assert!(!fx.path("datasets/evil.txt").exists());
    }
}
