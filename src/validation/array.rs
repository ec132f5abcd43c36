//! Feature arrays: shape and dtype of `.npy` files and whitespace text matrices.
//!
//! Only headers are read for `.npy`; text matrices are scanned in full.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use crate::model::{FileType, Item};

use super::ValidationResponse;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

#[derive(Debug, thiserror::Error)]
pub enum ArrayError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("{0} is not an npy file")]
    NotNpy(PathBuf),

    #[error("{path}: unsupported npy version {major}.{minor}")]
    Version {
        path: PathBuf,
        major: u8,
        minor: u8,
    },

    #[error("{path}: malformed npy header: {reason}")]
    Header { path: PathBuf, reason: String },

    #[error("{path} line {line}: {reason}")]
    Text {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{0}: not an array file")]
    UnsupportedType(PathBuf),
}

pub type Result<T> = core::result::Result<T, ArrayError>;

/// What we know about an array without loading its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayInfo {
    /// Canonical dtype name (`float32`, `int64`, ...).
    pub dtype: String,
    pub shape: Vec<usize>,
    pub fortran_order: bool,
}

impl ArrayInfo {
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Read array metadata, dispatching on the file extension.
    pub fn read(path: &Path) -> Result<Self> {
        match FileType::from_path(path) {
            Some(FileType::Npy) => read_npy_header(path),
            Some(FileType::Txt) => read_text_matrix(path),
            _ => Err(ArrayError::UnsupportedType(path.to_path_buf())),
        }
    }
}

fn read_npy_header(path: &Path) -> Result<ArrayInfo> {
    let read_err = |source| ArrayError::Read {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = BufReader::new(File::open(path).map_err(read_err)?);

    let mut preamble = [0u8; 8];
    if reader.read_exact(&mut preamble).is_err() || &preamble[..6] != NPY_MAGIC {
        return Err(ArrayError::NotNpy(path.to_path_buf()));
    }
    let (major, minor) = (preamble[6], preamble[7]);

    let header_len = match major {
        1 => {
            let mut len = [0u8; 2];
            reader.read_exact(&mut len).map_err(read_err)?;
            usize::from(u16::from_le_bytes(len))
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len).map_err(read_err)?;
            usize::try_from(u32::from_le_bytes(len)).map_err(|_| ArrayError::Header {
                path: path.to_path_buf(),
                reason: "header length overflows".into(),
            })?
        }
        _ => {
            return Err(ArrayError::Version {
                path: path.to_path_buf(),
                major,
                minor,
            });
        }
    };

    let mut header = vec![0u8; header_len];
    reader.read_exact(&mut header).map_err(read_err)?;
    // Version 3 allows utf-8 field names; earlier versions are latin-1, which is ascii here.
    let header = String::from_utf8_lossy(&header);

    parse_header_dict(&header).map_err(|reason| ArrayError::Header {
        path: path.to_path_buf(),
        reason,
    })
}

/// Parse the python dict literal in an npy header:
/// `{'descr': '<f4', 'fortran_order': False, 'shape': (10, 39), }`
fn parse_header_dict(header: &str) -> core::result::Result<ArrayInfo, String> {
    let descr = dict_value(header, "descr")?;
    let descr = descr
        .trim_start_matches(['\'', '"'])
        .split(['\'', '"'])
        .next()
        .unwrap_or_default();
    if descr.is_empty() {
        return Err("empty descr".into());
    }

    let fortran_order = match dict_value(header, "fortran_order")?.split([',', '}']).next().map(str::trim) {
        Some("True") => true,
        Some("False") => false,
        other => return Err(format!("bad fortran_order: {other:?}")),
    };

    let shape = dict_value(header, "shape")?;
    let shape = shape
        .strip_prefix('(')
        .and_then(|s| s.split(')').next())
        .ok_or_else(|| "shape is not a tuple".to_string())?;
    let shape = shape
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.trim_end_matches('L').parse::<usize>().map_err(|_| format!("bad dimension {d:?}")))
        .collect::<core::result::Result<Vec<_>, _>>()?;

    Ok(ArrayInfo {
        dtype: dtype_name(descr),
        shape,
        fortran_order,
    })
}

/// The text following `'key':` in the header, leading whitespace trimmed.
fn dict_value<'a>(header: &'a str, key: &str) -> core::result::Result<&'a str, String> {
    for quote in ['\'', '"'] {
        let needle = format!("{quote}{key}{quote}");
        if let Some(pos) = header.find(&needle)
            && let Some(rest) = header[pos + needle.len()..].trim_start().strip_prefix(':')
        {
            return Ok(rest.trim_start());
        }
    }
    Err(format!("missing key {key}"))
}

/// Map a numpy type string such as `<f4` to its canonical name.
fn dtype_name(descr: &str) -> String {
    let body = descr.trim_start_matches(['<', '>', '|', '=']);
    let mut chars = body.chars();
    let kind = chars.next();
    let bytes: Option<usize> = chars.as_str().parse().ok();
    match (kind, bytes) {
        (Some('f'), Some(n)) => format!("float{}", n * 8),
        (Some('i'), Some(n)) => format!("int{}", n * 8),
        (Some('u'), Some(n)) => format!("uint{}", n * 8),
        (Some('c'), Some(n)) => format!("complex{}", n * 8),
        (Some('b'), Some(1)) => "bool".to_string(),
        _ => descr.to_string(),
    }
}

/// A text matrix: one row per non-blank line, whitespace-separated floats.
fn read_text_matrix(path: &Path) -> Result<ArrayInfo> {
    let text = fs::read_to_string(path).map_err(|source| ArrayError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let mut rows = 0;
    let mut cols: Option<usize> = None;
    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let text_err = |reason: String| ArrayError::Text {
            path: path.to_path_buf(),
            line: i + 1,
            reason,
        };
        let mut n = 0;
        for field in line.split_whitespace() {
            field
                .parse::<f64>()
                .map_err(|_| text_err(format!("{field:?} is not a number")))?;
            n += 1;
        }
        match cols {
            None => cols = Some(n),
            Some(c) if c != n => return Err(text_err(format!("expected {c} columns, found {n}"))),
            Some(_) => {}
        }
        rows += 1;
    }

    Ok(ArrayInfo {
        dtype: "float64".to_string(),
        shape: vec![rows, cols.unwrap_or(0)],
        fortran_order: false,
    })
}

/// The array's dtype must be one of `allowed`.
pub fn dtype_check(info: &ArrayInfo, allowed: &[&str]) -> Option<ValidationResponse> {
    (!allowed.contains(&info.dtype.as_str())).then(|| {
        ValidationResponse::error(format!(
            "dtype {} not accepted; expected one of: {}",
            info.dtype,
            allowed.join(", ")
        ))
    })
}

/// The array must have exactly `expected` dimensions.
pub fn ndim_check(info: &ArrayInfo, expected: usize) -> Option<ValidationResponse> {
    (info.ndim() != expected).then(|| {
        ValidationResponse::error(format!(
            "array must be {expected}-dimensional, found shape {:?}",
            info.shape
        ))
    })
}

/// Checks that one axis has the same size across a series of arrays.
///
/// The first array observed sets the expected size.
#[derive(Debug, Clone)]
pub struct DimensionTracker {
    axis: usize,
    expected: Option<(usize, PathBuf)>,
}

impl DimensionTracker {
    pub fn new(axis: usize) -> Self {
        Self {
            axis,
            expected: None,
        }
    }

    pub fn observe(&mut self, path: &Path, info: &ArrayInfo) -> Option<ValidationResponse> {
        let Some(&size) = info.shape.get(self.axis) else {
            return Some(
                ValidationResponse::error(format!("array has no axis {}", self.axis)).with_filename(path),
            );
        };
        match &self.expected {
            None => {
                self.expected = Some((size, path.to_path_buf()));
                None
            }
            Some((want, first)) if *want != size => Some(
                ValidationResponse::error(format!(
                    "axis {} has size {size}, but {} has {want}",
                    self.axis,
                    first.display()
                ))
                .with_filename(path),
            ),
            Some(_) => None,
        }
    }
}

/// Constraints on every array in a feature file list.
#[derive(Debug, Clone, Copy)]
pub struct ArraySpec<'a> {
    pub dtypes: &'a [&'a str],
    pub ndim: usize,
    /// Axis whose size must match across files.
    pub consistent_axis: Option<usize>,
}

/// Check every file of `item` against `spec`.
///
/// Yields one Ok when every file passes, otherwise the per-file Errors.
pub fn array_checks(item: &Item, spec: ArraySpec<'_>) -> Vec<ValidationResponse> {
    let mut tracker = spec.consistent_axis.map(DimensionTracker::new);
    let mut errors = Vec::new();

    for path in item.files() {
        let info = match ArrayInfo::read(path) {
            Ok(info) => info,
            Err(e) => {
                errors.push(ValidationResponse::error(e.to_string()).with_filename(path.clone()));
                continue;
            }
        };
        let found = [dtype_check(&info, spec.dtypes), ndim_check(&info, spec.ndim)];
        let mut file_errors: Vec<_> = found
            .into_iter()
            .flatten()
            .map(|r| r.with_filename(path.clone()))
            .collect();
        if file_errors.is_empty()
            && let Some(tracker) = tracker.as_mut()
        {
            file_errors.extend(tracker.observe(path, &info));
        }
        errors.extend(file_errors);
    }

    if errors.is_empty() {
        vec![ValidationResponse::ok(format!("{} arrays checked", item.files().len()))]
    } else {
        errors
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::model::FileListItem;

    /// Write a version 1.0 npy file with the given header fields and zeroed data.
    pub(crate) fn write_npy(path: &Path, descr: &str, shape: &[usize]) {
        let dims: Vec<String> = shape.iter().map(ToString::to_string).collect();
        let shape_str = if dims.len() == 1 {
            format!("({},)", dims[0])
        } else {
            format!("({})", dims.join(", "))
        };
        let mut header = format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape_str}, }}");
        // Pad so that magic + version + len + header is a multiple of 64, ending in newline.
        let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
        header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
        header.push('\n');

        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend([1u8, 0u8]);
        bytes.extend(u16::try_from(header.len()).unwrap().to_le_bytes());
        bytes.extend(header.as_bytes());
        let count: usize = shape.iter().product();
        bytes.extend(vec![0u8; count * 4]);
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn npy_header_is_parsed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.npy");
        write_npy(&path, "<f4", &[120, 39]);

        let info = ArrayInfo::read(&path).unwrap();
        assert_eq!(info.dtype, "float32");
        assert_eq!(info.shape, [120, 39]);
        assert!(!info.fortran_order);
        assert_eq!(info.ndim(), 2);
    }

    #[test]
    fn one_dimensional_and_scalar_shapes() {
        let info = parse_header_dict("{'descr': '<i8', 'fortran_order': True, 'shape': (5,), }").unwrap();
        assert_eq!(info.shape, [5]);
        assert_eq!(info.dtype, "int64");
        assert!(info.fortran_order);

        let info = parse_header_dict("{'descr': '|b1', 'fortran_order': False, 'shape': (), }").unwrap();
        assert!(info.shape.is_empty());
        assert_eq!(info.dtype, "bool");
    }

    #[test]
    fn version_two_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("v2.npy");
        let header = "{'descr': '>f8', 'fortran_order': False, 'shape': (3, 4), }\n";
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend([2u8, 0u8]);
        bytes.extend(u32::try_from(header.len()).unwrap().to_le_bytes());
        bytes.extend(header.as_bytes());
        fs::write(&path, bytes).unwrap();

        let info = ArrayInfo::read(&path).unwrap();
        assert_eq!(info.dtype, "float64");
        assert_eq!(info.shape, [3, 4]);
    }

    #[test]
    fn bad_magic_and_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.npy");
        fs::write(&path, b"not numpy at all").unwrap();
        assert!(matches!(ArrayInfo::read(&path), Err(ArrayError::NotNpy(_))));

        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend([9u8, 0u8, 0u8, 0u8]);
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            ArrayInfo::read(&path),
            Err(ArrayError::Version { major: 9, .. })
        ));
    }

    #[test]
    fn text_matrix_shape() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "0.1 0.2 0.3\n1 2 3\n\n-1e-3 4 5\n").unwrap();
        let info = ArrayInfo::read(&path).unwrap();
        assert_eq!(info.shape, [3, 3]);
        assert_eq!(info.dtype, "float64");

        fs::write(&path, "0.1 0.2\n1 2 3\n").unwrap();
        assert!(matches!(
            ArrayInfo::read(&path),
            Err(ArrayError::Text { line: 2, .. })
        ));

        fs::write(&path, "0.1 abc\n").unwrap();
        assert!(matches!(ArrayInfo::read(&path), Err(ArrayError::Text { line: 1, .. })));
    }

    #[test]
    fn dtype_and_ndim_checks() {
        let info = ArrayInfo {
            dtype: "int32".into(),
            shape: vec![10],
            fortran_order: false,
        };
        assert!(dtype_check(&info, &["float32", "float64"]).is_some());
        assert!(dtype_check(&info, &["int32"]).is_none());
        assert!(ndim_check(&info, 2).is_some());
        assert!(ndim_check(&info, 1).is_none());
    }

    #[test]
    fn first_observed_dimension_wins() {
        let mut tracker = DimensionTracker::new(1);
        let info = |cols| ArrayInfo {
            dtype: "float32".into(),
            shape: vec![7, cols],
            fortran_order: false,
        };
        assert!(tracker.observe(Path::new("a.npy"), &info(39)).is_none());
        assert!(tracker.observe(Path::new("b.npy"), &info(39)).is_none());
        let err = tracker.observe(Path::new("c.npy"), &info(40)).unwrap();
        assert_eq!(err.filename.as_deref(), Some(Path::new("c.npy")));
        assert!(err.msg.contains("a.npy"));
    }

    #[test]
    fn array_checks_over_a_feature_list() {
        let dir = TempDir::new().unwrap();
        write_npy(&dir.path().join("a.npy"), "<f4", &[10, 39]);
        write_npy(&dir.path().join("b.npy"), "<f4", &[12, 39]);
        let spec = ArraySpec {
            dtypes: &["float32", "float64"],
            ndim: 2,
            consistent_axis: Some(1),
        };

        let item: Item = FileListItem::from_dir(dir.path(), &[FileType::Npy]).unwrap().into();
        let found = array_checks(&item, spec);
        assert_eq!(found.len(), 1);
        assert!(found[0].is_ok());

        write_npy(&dir.path().join("c.npy"), "<i4", &[12, 39]);
        write_npy(&dir.path().join("d.npy"), "<f4", &[12, 40]);
        write_npy(&dir.path().join("e.npy"), "<f4", &[12]);
        let item: Item = FileListItem::from_dir(dir.path(), &[FileType::Npy]).unwrap().into();
        let found = array_checks(&item, spec);
        let flagged: Vec<_> = found
            .iter()
            .map(|r| r.filename.as_ref().unwrap().file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(flagged, ["c.npy", "d.npy", "e.npy"]);
    }
}
