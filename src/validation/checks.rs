//! Reusable checks shared by the benchmarks.

use std::collections::BTreeSet;

use crate::model::{FileType, Item};

use super::ValidationResponse;

/// Compare a list of names against the expected list.
///
/// Equal sets produce a single Ok. Otherwise one Error per missing and one per
/// extra name, each group sorted. Duplicates are ignored.
pub fn list_checker(given: &[String], expected: &[String]) -> Vec<ValidationResponse> {
    let given: BTreeSet<&str> = given.iter().map(String::as_str).collect();
    let expected: BTreeSet<&str> = expected.iter().map(String::as_str).collect();

    if given == expected {
        return vec![ValidationResponse::ok("all expected entries are present")];
    }

    let missing = expected
        .difference(&given)
        .map(|name| ValidationResponse::error(format!("missing: {name}")).with_data(*name));
    let extra = given
        .difference(&expected)
        .map(|name| ValidationResponse::error(format!("unexpected: {name}")).with_data(*name));
    missing.chain(extra).collect()
}

/// Every path in `item` must exist on disk.
pub fn files_exist(item: &Item) -> Vec<ValidationResponse> {
    let missing: Vec<_> = item
        .files()
        .iter()
        .filter(|p| !p.is_file())
        .map(|p| ValidationResponse::error("file does not exist").with_filename(p.clone()))
        .collect();
    if missing.is_empty() {
        vec![ValidationResponse::ok("files exist")]
    } else {
        missing
    }
}

/// The item must be of one of `allowed`.
pub fn file_type_check(item: &Item, allowed: &[FileType]) -> ValidationResponse {
    let file_type = item.file_type();
    if allowed.contains(&file_type) {
        ValidationResponse::ok(format!("file type {file_type} accepted"))
    } else {
        let allowed: Vec<_> = allowed.iter().map(ToString::to_string).collect();
        ValidationResponse::error(format!(
            "file type {file_type} not accepted; expected one of: {}",
            allowed.join(", ")
        ))
    }
}

/// A file list must not be empty.
pub fn not_empty(item: &Item) -> Option<ValidationResponse> {
    item.files()
        .is_empty()
        .then(|| ValidationResponse::error("no files found"))
}
