//! Validation engine: per-item checks and the findings they produce.
//!
//! Checks are registered explicitly against the item name they validate.
//! Running a [`Validator`] over a submission's items yields a
//! [`ValidationContext`]: every finding, tagged with the item it came from.
//! Only Errors fail a submission; Warnings never do.

pub mod array;
pub mod checks;
pub mod columnar;

use std::ops::Add;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::{Item, Namespace};

/// Severity of a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Ok,
    Warning,
    Error,
}

impl std::fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

/// One finding produced while checking a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub kind: ResponseKind,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<PathBuf>,
}

impl ValidationResponse {
    fn new(kind: ResponseKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            msg: msg.into(),
            data: None,
            item_name: None,
            filename: None,
            location: None,
        }
    }

    pub fn ok(msg: impl Into<String>) -> Self {
        Self::new(ResponseKind::Ok, msg)
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self::new(ResponseKind::Warning, msg)
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::new(ResponseKind::Error, msg)
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<serde_json::Value>) -> Self {
        self.data = Some(data.into());
        self
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<PathBuf>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// True for Ok and Warning.
    pub fn valid(&self) -> bool {
        self.kind != ResponseKind::Error
    }

    pub fn is_warning(&self) -> bool {
        self.kind == ResponseKind::Warning
    }

    pub fn is_ok(&self) -> bool {
        self.kind == ResponseKind::Ok
    }
}

/// An ordered accumulation of findings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationContext {
    responses: Vec<ValidationResponse>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, response: ValidationResponse) {
        self.responses.push(response);
    }

    pub fn extend(&mut self, responses: impl IntoIterator<Item = ValidationResponse>) {
        self.responses.extend(responses);
    }

    /// Append `other` after this context's findings.
    pub fn concat(&mut self, other: ValidationContext) {
        self.responses.extend(other.responses);
    }

    pub fn set_filename(&mut self, filename: &Path) {
        for r in &mut self.responses {
            r.filename = Some(filename.to_path_buf());
        }
    }

    pub fn set_item_name(&mut self, name: &str) {
        for r in &mut self.responses {
            r.item_name = Some(name.to_string());
        }
    }

    pub fn set_location(&mut self, location: &Path) {
        for r in &mut self.responses {
            r.location = Some(location.to_path_buf());
        }
    }

    /// True when any finding is an Error.
    pub fn fails(&self) -> bool {
        self.responses.iter().any(|r| !r.valid())
    }

    pub fn has_warnings(&self) -> bool {
        self.responses.iter().any(ValidationResponse::is_warning)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationResponse> {
        self.responses.iter().filter(|r| !r.valid())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationResponse> {
        self.responses.iter().filter(|r| r.is_warning())
    }

    pub fn oks(&self) -> impl Iterator<Item = &ValidationResponse> {
        self.responses.iter().filter(|r| r.is_ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationResponse> {
        self.responses.iter()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

impl Add for ValidationContext {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self.concat(rhs);
        self
    }
}

impl FromIterator<ValidationResponse> for ValidationContext {
    fn from_iter<I: IntoIterator<Item = ValidationResponse>>(iter: I) -> Self {
        Self {
            responses: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ValidationContext {
    type Item = ValidationResponse;
    type IntoIter = std::vec::IntoIter<ValidationResponse>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.into_iter()
    }
}

/// A check over one item.
pub type Check = Box<dyn Fn(&Item) -> Vec<ValidationResponse>>;

/// Registry of checks keyed by the item name they validate.
#[derive(Default)]
pub struct Validator {
    checks: Namespace<Check>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `check` to the item called `name`, replacing any previous check.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        check: impl Fn(&Item) -> Vec<ValidationResponse> + 'static,
    ) {
        self.checks.insert(name, Box::new(check));
    }

    pub fn has_check(&self, name: &str) -> bool {
        self.checks.contains(name)
    }

    /// Check every item in order.
    ///
    /// Items without a registered check get a "no validation found" Warning.
    /// Nothing short-circuits: all items are checked even after Errors.
    pub fn validate(&self, items: &Namespace<Item>) -> ValidationContext {
        let mut ctx = ValidationContext::new();
        for (name, item) in items.iter() {
            let mut found: ValidationContext = match self.checks.get(name) {
                Some(check) => check(item).into_iter().collect(),
                None => std::iter::once(ValidationResponse::warning("no validation found")).collect(),
            };
            found.set_item_name(name);
            ctx.concat(found);
        }
        ctx
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("checks", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}
