//! `meta.yaml`: who made a submission and how.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::validation::{ValidationContext, ValidationResponse};

use super::{Result, SubmissionError};

pub const META_FILE: &str = "meta.yaml";

/// Earliest publication year accepted.
const FIRST_YEAR: i32 = 1950;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelInfo {
    pub model_id: Option<String>,
    pub system_description: Option<String>,
    pub train_set: Option<String>,
    pub gpu_budget: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Publication {
    pub author_label: Option<String>,
    pub authors: Option<String>,
    pub paper_title: Option<String>,
    pub paper_url: Option<String>,
    pub publication_year: Option<i32>,
    pub institution: Option<String>,
    pub team: Option<String>,
    pub bib_reference: Option<String>,
    pub doi: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionMeta {
    pub model_info: ModelInfo,
    pub publication: Publication,
    pub open_source: bool,
    pub code_url: Option<String>,
}

fn present(field: Option<&String>) -> bool {
    field.is_some_and(|v| !v.trim().is_empty())
}

impl SubmissionMeta {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&text).map_err(|source| SubmissionError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the metadata for completeness.
    pub fn validate(&self) -> ValidationContext {
        let year = i32::from(jiff::Zoned::now().year());
        let mut ctx = self.validate_for_year(year);
        ctx.set_filename(Path::new(META_FILE));
        ctx
    }

    fn validate_for_year(&self, current_year: i32) -> ValidationContext {
        let mut ctx = ValidationContext::new();
        let info = &self.model_info;
        let publication = &self.publication;

        let required = [
            ("model_info.system_description", info.system_description.as_ref()),
            ("model_info.train_set", info.train_set.as_ref()),
            ("publication.author_label", publication.author_label.as_ref()),
            ("publication.authors", publication.authors.as_ref()),
            ("publication.institution", publication.institution.as_ref()),
        ];
        for (name, value) in required {
            if !present(value) {
                ctx.push(ValidationResponse::error(format!("{name} is required")));
            }
        }

        let recommended = [
            ("publication.paper_url", publication.paper_url.as_ref()),
            ("publication.doi", publication.doi.as_ref()),
        ];
        for (name, value) in recommended {
            if !present(value) {
                ctx.push(ValidationResponse::warning(format!("{name} is not set")));
            }
        }

        if self.open_source && !present(self.code_url.as_ref()) {
            ctx.push(ValidationResponse::error(
                "open_source is set but code_url is missing",
            ));
        }

        if let Some(year) = publication.publication_year
            && !(FIRST_YEAR..=current_year + 1).contains(&year)
        {
            ctx.push(ValidationResponse::error(format!(
                "publication_year {year} is not plausible"
            )));
        }

        if ctx.is_empty() {
            ctx.push(ValidationResponse::ok("metadata complete"));
        }
        ctx
    }
}
