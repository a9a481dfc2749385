#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Decides whether a produced result set answers the same question as the
//! reference result set.
//!
//! Outputs are first compared byte for byte. When that fails both files are
//! read as headerless tab-separated tables and compared column by column:
//! numeric columns may differ within a [`Tolerance`], everything else must
//! match exactly.

use std::{
    fmt::Display,
    path::{Path, PathBuf},
};

use colored::Colorize;
use similar::{ChangeTag, TextDiff};

/// Cell values treated as missing.
const MISSING_MARKERS: &[&str] = &["", "NULL"];

/// Absolute and relative closeness bounds for floating point columns.
///
/// `a` is close to reference `b` when `|a - b| <= abs + rel * |b|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    /// Absolute bound.
    pub abs: f64,
    /// Bound relative to the reference value.
    pub rel: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Self {
            abs: 1e-8,
            rel: 1e-5,
        }
    }
}

impl Tolerance {
    /// Whether `candidate` is within bounds of `reference`.
    pub fn close(&self, reference: f64, candidate: f64) -> bool {
        if reference == candidate {
            return true;
        }
        if !reference.is_finite() || !candidate.is_finite() {
            return false;
        }
        (candidate - reference).abs() <= self.abs + self.rel * reference.abs()
    }
}

/// Inferred type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Every cell is an integer and none is missing.
    Integer,
    /// Every present cell is a number.
    Float,
    /// Anything else.
    Text,
}

impl Display for ColumnKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnKind::Integer => write!(f, "integer"),
            ColumnKind::Float => write!(f, "float"),
            ColumnKind::Text => write!(f, "text"),
        }
    }
}

/// The first reason two outputs were judged different.
#[derive(Debug, Clone, PartialEq)]
pub enum Mismatch {
    /// A file could not be read.
    Missing(PathBuf),
    /// A file is empty while the other is not.
    Empty(PathBuf),
    /// A row has a different number of cells than the first row.
    Ragged {
        /// File containing the ragged row.
        path: PathBuf,
        /// Zero-based row index.
        row:  usize,
    },
    /// Row or column counts differ.
    Shape {
        /// `(rows, columns)` of the reference.
        reference: (usize, usize),
        /// `(rows, columns)` of the candidate.
        candidate: (usize, usize),
    },
    /// A column was inferred as different types.
    ColumnKind {
        /// Zero-based column index.
        column:    usize,
        /// Reference column type.
        reference: ColumnKind,
        /// Candidate column type.
        candidate: ColumnKind,
    },
    /// A cell differs (beyond tolerance, for numeric columns).
    Value {
        /// Zero-based row index.
        row:    usize,
        /// Zero-based column index.
        column: usize,
    },
}

impl Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Missing(path) => write!(f, "{} could not be read", path.display()),
            Mismatch::Empty(path) => write!(f, "{} is empty", path.display()),
            Mismatch::Ragged { path, row } => {
                write!(f, "row {} of {} has a different width", row + 1, path.display())
            }
            Mismatch::Shape {
                reference,
                candidate,
            } => write!(
                f,
                "expected {} rows x {} columns, got {} x {}",
                reference.0, reference.1, candidate.0, candidate.1
            ),
            Mismatch::ColumnKind {
                column,
                reference,
                candidate,
            } => write!(f, "column {} is {candidate}, expected {reference}", column + 1),
            Mismatch::Value { row, column } => {
                write!(f, "value at row {}, column {} differs", row + 1, column + 1)
            }
        }
    }
}

/// Result of comparing two output files.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// Byte-for-byte equal.
    Identical,
    /// Equal as tables, with numeric columns inside the tolerance.
    WithinTolerance,
    /// Not the same answer.
    Differs(Mismatch),
}

impl Comparison {
    /// Whether the candidate reproduces the reference.
    pub fn is_match(&self) -> bool {
        matches!(self, Comparison::Identical | Comparison::WithinTolerance)
    }
}

/// A headerless tab-separated result set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    /// Cells, row-major. All rows have the same width.
    rows:  Vec<Vec<String>>,
    /// Number of columns.
    width: usize,
}

impl Table {
    /// Parses tab-separated text, one row per line. An empty line is a row
    /// holding one empty cell; only the segment after the final newline is
    /// dropped. A row whose width differs from the first row's is reported
    /// by index.
    pub fn parse(text: &str) -> Result<Self, usize> {
        let body = text.strip_suffix('\n').unwrap_or(text);
        let rows: Vec<Vec<String>> = if text.is_empty() {
            Vec::new()
        } else {
            body.split('\n')
                .map(|line| line.strip_suffix('\r').unwrap_or(line))
                .map(|line| line.split('\t').map(str::to_string).collect())
                .collect()
        };
        let width = rows.first().map_or(0, Vec::len);
        if let Some(row) = rows.iter().position(|row| row.len() != width) {
            return Err(row);
        }
        Ok(Self { rows, width })
    }

    /// `(rows, columns)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.width)
    }

    /// Cells of one column, top to bottom.
    fn column(&self, index: usize) -> impl Iterator<Item = &str> {
        self.rows.iter().map(move |row| row[index].as_str())
    }

    /// Infers the type of one column.
    pub fn column_kind(&self, index: usize) -> ColumnKind {
        let mut any_missing = false;
        let mut all_integer = true;
        for cell in self.column(index) {
            if is_missing(cell) {
                any_missing = true;
                continue;
            }
            if cell.parse::<i64>().is_err() {
                all_integer = false;
                // `inf` and `nan` parse as floats but are words in a result set.
                if !cell.parse::<f64>().is_ok_and(f64::is_finite) {
                    return ColumnKind::Text;
                }
            }
        }
        if all_integer && !any_missing {
            ColumnKind::Integer
        } else {
            ColumnKind::Float
        }
    }
}

/// Whether a cell holds no value.
fn is_missing(cell: &str) -> bool {
    MISSING_MARKERS.contains(&cell)
}

/// Parses a float cell, `None` for missing values.
fn float_cell(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        None
    } else {
        cell.parse().ok()
    }
}

/// Compares produced output files against reference output files.
#[derive(Debug, Clone, Copy, Default)]
pub struct Comparator {
    /// Closeness bounds for float columns.
    tolerance: Tolerance,
}

impl Comparator {
    /// Creates a comparator with the given float tolerance.
    pub fn new(tolerance: Tolerance) -> Self {
        Self { tolerance }
    }

    /// Compares `candidate` against `reference`.
    pub fn compare(&self, reference: &Path, candidate: &Path) -> Comparison {
        let Ok(expected) = std::fs::read(reference) else {
            return Comparison::Differs(Mismatch::Missing(reference.to_path_buf()));
        };
        let Ok(actual) = std::fs::read(candidate) else {
            return Comparison::Differs(Mismatch::Missing(candidate.to_path_buf()));
        };

        if expected == actual {
            return Comparison::Identical;
        }
        if expected.is_empty() {
            return Comparison::Differs(Mismatch::Empty(reference.to_path_buf()));
        }
        if actual.is_empty() {
            return Comparison::Differs(Mismatch::Empty(candidate.to_path_buf()));
        }

        let expected = match Table::parse(&String::from_utf8_lossy(&expected)) {
            Ok(table) => table,
            Err(row) => {
                return Comparison::Differs(Mismatch::Ragged {
                    path: reference.to_path_buf(),
                    row,
                });
            }
        };
        let actual = match Table::parse(&String::from_utf8_lossy(&actual)) {
            Ok(table) => table,
            Err(row) => {
                return Comparison::Differs(Mismatch::Ragged {
                    path: candidate.to_path_buf(),
                    row,
                });
            }
        };

        match self.compare_tables(&expected, &actual) {
            Some(mismatch) => Comparison::Differs(mismatch),
            None => Comparison::WithinTolerance,
        }
    }

    /// Compares two parsed tables, returning the first difference found.
    pub fn compare_tables(&self, expected: &Table, actual: &Table) -> Option<Mismatch> {
        if expected.shape() != actual.shape() {
            return Some(Mismatch::Shape {
                reference: expected.shape(),
                candidate: actual.shape(),
            });
        }

        for column in 0..expected.width {
            let reference = expected.column_kind(column);
            let candidate = actual.column_kind(column);
            if reference != candidate {
                return Some(Mismatch::ColumnKind {
                    column,
                    reference,
                    candidate,
                });
            }

            let mut cells = expected.column(column).zip(actual.column(column));
            let differing = match reference {
                ColumnKind::Integer | ColumnKind::Float => cells
                    .map(|(e, a)| (float_cell(e), float_cell(a)))
                    .position(|pair| match pair {
                        (Some(e), Some(a)) => !self.tolerance.close(e, a),
                        (None, None) => false,
                        _ => true,
                    }),
                // Text must match cell for cell even when every numeric
                // column is close.
                ColumnKind::Text => cells.position(|(e, a)| e != a),
            };
            if let Some(row) = differing {
                return Some(Mismatch::Value { row, column });
            }
        }

        None
    }

    /// Convenience wrapper returning only whether the outputs match.
    pub fn same(&self, reference: &Path, candidate: &Path) -> bool {
        self.compare(reference, candidate).is_match()
    }
}

/// Whether `candidate` reproduces `reference` under the default tolerance.
pub fn same(reference: &Path, candidate: &Path) -> bool {
    Comparator::default().same(reference, candidate)
}

/// Renders a colored line diff of two outputs for the console.
pub fn render_diff(expected: &str, actual: &str) -> String {
    let diff = TextDiff::from_lines(expected, actual);
    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let line = change.value().trim_end_matches(['\r', '\n']);
        match change.tag() {
            ChangeTag::Equal => out.push_str(&format!("  {line}\n")),
            ChangeTag::Delete => out.push_str(&format!("{}\n", format!("- {line}").red())),
            ChangeTag::Insert => out.push_str(&format!("{}\n", format!("+ {line}").green())),
        }
    }
    out
}
