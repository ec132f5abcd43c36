//! Delimited text tables: submission files, gold files, and score files.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::ValidationResponse;

#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("table has no header row")]
    MissingHeader,

    #[error("line {line}: expected {expected} columns, found {found}")]
    RaggedRow {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("no column named {0}")]
    MissingColumn(String),

    #[error("line {line}: cannot parse {value:?} in column {column}")]
    Parse {
        column: String,
        line: usize,
        value: String,
    },
}

pub type Result<T> = core::result::Result<T, TableError>;

/// How fields are separated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    /// Any run of whitespace.
    Whitespace,
    Comma,
    Tab,
}

impl Delimiter {
    fn split(self, line: &str) -> Vec<String> {
        match self {
            Self::Whitespace => line.split_whitespace().map(str::to_string).collect(),
            Self::Comma => line.split(',').map(|f| f.trim().to_string()).collect(),
            Self::Tab => line.split('\t').map(|f| f.trim().to_string()).collect(),
        }
    }
}

/// Where column names come from.
#[derive(Debug, Clone, Copy)]
pub enum Header<'a> {
    /// The first non-blank line names the columns.
    FirstRow,
    /// Headerless file with the given column names.
    Named(&'a [&'a str]),
}

/// A parsed table. Every row has exactly as many fields as there are columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Row {
    line: usize,
    fields: Vec<String>,
}

impl Table {
    /// Parse `text`. Blank lines are skipped; line numbers in errors are 1-based.
    pub fn parse(text: &str, header: Header<'_>, delimiter: Delimiter) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l))
            .filter(|(_, l)| !l.trim().is_empty());

        let columns = match header {
            Header::FirstRow => {
                let (_, first) = lines.next().ok_or(TableError::MissingHeader)?;
                delimiter.split(first)
            }
            Header::Named(names) => names.iter().map(ToString::to_string).collect(),
        };

        let mut rows = Vec::new();
        for (line, text) in lines {
            let fields = delimiter.split(text);
            if fields.len() != columns.len() {
                return Err(TableError::RaggedRow {
                    line,
                    expected: columns.len(),
                    found: fields.len(),
                });
            }
            rows.push(Row { line, fields });
        }
        Ok(Self { columns, rows })
    }

    pub fn read(path: &Path, header: Header<'_>, delimiter: Delimiter) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| TableError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, header, delimiter)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| TableError::MissingColumn(name.to_string()))
    }

    /// Raw values of one column, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<&str>> {
        let idx = self.index_of(name)?;
        Ok(self.rows.iter().map(|r| r.fields[idx].as_str()).collect())
    }

    /// Values of one column parsed as `T`. The first unparsable value is an error.
    pub fn parse_column<T: FromStr>(&self, name: &str) -> Result<Vec<T>> {
        let idx = self.index_of(name)?;
        self.rows
            .iter()
            .map(|r| {
                r.fields[idx].parse().map_err(|_| TableError::Parse {
                    column: name.to_string(),
                    line: r.line,
                    value: r.fields[idx].clone(),
                })
            })
            .collect()
    }
}

/// The table's columns must be exactly `expected`, in any order.
pub fn column_set_check(table: &Table, expected: &[&str]) -> Vec<ValidationResponse> {
    let found: BTreeSet<&str> = table.columns.iter().map(String::as_str).collect();
    let wanted: BTreeSet<&str> = expected.iter().copied().collect();
    if found == wanted {
        return vec![ValidationResponse::ok("columns match")];
    }
    let missing = wanted
        .difference(&found)
        .map(|c| ValidationResponse::error(format!("missing column: {c}")));
    let extra = found
        .difference(&wanted)
        .map(|c| ValidationResponse::error(format!("unexpected column: {c}")));
    missing.chain(extra).collect()
}

/// Every key in `expected` must appear in `column`: one Error per missing key.
pub fn required_keys_check(table: &Table, column: &str, expected: &[String]) -> Vec<ValidationResponse> {
    let values = match table.column(column) {
        Ok(values) => values,
        Err(e) => return vec![ValidationResponse::error(e.to_string())],
    };
    let present: BTreeSet<&str> = values.into_iter().collect();
    let missing: Vec<_> = expected
        .iter()
        .filter(|k| !present.contains(k.as_str()))
        .map(|k| ValidationResponse::error(format!("missing {column}: {k}")).with_data(k.as_str()))
        .collect();
    if missing.is_empty() {
        vec![ValidationResponse::ok(format!("all required {column} values present"))]
    } else {
        missing
    }
}

/// Every value in `column` must parse as `T`.
///
/// One Error names the first failing row and counts the rest.
pub fn column_type_check<T: FromStr>(table: &Table, column: &str, type_name: &str) -> ValidationResponse {
    let idx = match table.index_of(column) {
        Ok(idx) => idx,
        Err(e) => return ValidationResponse::error(e.to_string()),
    };
    let mut bad = table
        .rows
        .iter()
        .filter(|r| r.fields[idx].parse::<T>().is_err());
    match bad.next() {
        None => ValidationResponse::ok(format!("column {column} is {type_name}")),
        Some(first) => {
            let others = bad.count();
            ValidationResponse::error(format!(
                "column {column} must be {type_name}: line {} has {:?} ({others} more)",
                first.line, first.fields[idx]
            ))
        }
    }
}
