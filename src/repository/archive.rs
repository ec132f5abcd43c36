//! Zip extraction and archive checksums.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::Path;

use zip::ZipArchive;

use super::Result;

/// Extract every entry of the zip archive at `archive` into `dest`, creating `dest`.
///
/// Entries with unsafe paths (absolute, or escaping via `..`) are rejected by the
/// zip reader.
pub fn extract(archive: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    let mut zip = ZipArchive::new(BufReader::new(File::open(archive)?))?;
    zip.extract(dest)?;
    Ok(())
}

/// Compare two hex digests, ignoring case.
pub fn checksums_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}
