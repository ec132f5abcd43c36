//! Output formatting for CLI display.

use indicatif::HumanBytes;

use crate::repository::{CatalogEntry, EntryKind};
use crate::validation::{ValidationContext, ValidationResponse};

/// One catalog entry per line: name, install state, kind, size, description.
pub(super) fn format_entry(entry: &CatalogEntry, installed: bool) -> String {
    let status = if installed { "installed" } else { "available" };
    let size = match entry.kind {
        EntryKind::Internal if entry.total_size > 0 => HumanBytes(entry.total_size).to_string(),
        _ => "-".to_string(),
    };
    let line = format!("{:<28} [{status}] [{}] {size:>10}", entry.name, entry.kind);
    if entry.description.is_empty() {
        line
    } else {
        format!("{line}  {}", entry.description)
    }
}

/// A finding as `kind [item] file: message`.
pub(super) fn format_response(response: &ValidationResponse) -> String {
    let item = response.item_name.as_deref().unwrap_or("-");
    let file = response
        .filename
        .as_ref()
        .map(|f| format!("{}: ", f.display()))
        .unwrap_or_default();
    format!("{:<7} [{item}] {file}{}", response.kind, response.msg)
}

pub(super) fn format_summary(output: &ValidationContext) -> String {
    let errors = output.errors().count();
    let warnings = output.warnings().count();
    let passed = output.oks().count();
    format!(
        "{}, {}, {passed} passed",
        plural(errors, "error"),
        plural(warnings, "warning")
    )
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}
