#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    path::Path,
    str::FromStr,
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tabled::{
    Table, Tabled,
    builder::Builder,
    settings::{Alignment, Modify, Style, object::Rows},
};

use super::executor::ExecutionOutcome;

/// The grading outcome for one student on one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Verdict {
    /// Execution succeeded and the output matched the reference.
    Verified,
    /// Execution succeeded but the output did not match.
    Mismatch,
    /// The query ran past its budget and was killed.
    Timeout,
    /// The engine rejected the query.
    SyntaxError,
    /// The student did not hand in this query.
    NoSubmission,
    /// The engine's output was not valid UTF-8.
    DecodeError,
}

impl Verdict {
    /// The code written into the result grid.
    pub fn code(&self) -> &'static str {
        match self {
            Verdict::Verified => "V",
            Verdict::Mismatch => "X",
            Verdict::Timeout => "Timeout",
            Verdict::SyntaxError => "SyntaxError",
            Verdict::NoSubmission => "No submission",
            Verdict::DecodeError => "Unicode decode error",
        }
    }

    /// Turns an execution outcome into a verdict.
    ///
    /// `matched` is only consulted when execution succeeded: an execution
    /// error is the verdict even if a stale output file happens to match.
    pub fn from_outcome(outcome: &ExecutionOutcome, matched: bool) -> Self {
        match outcome {
            ExecutionOutcome::Success(_) if matched => Verdict::Verified,
            ExecutionOutcome::Success(_) => Verdict::Mismatch,
            ExecutionOutcome::NoSubmission => Verdict::NoSubmission,
            ExecutionOutcome::Timeout => Verdict::Timeout,
            ExecutionOutcome::SyntaxError(_) => Verdict::SyntaxError,
            ExecutionOutcome::DecodeError => Verdict::DecodeError,
        }
    }

    /// Whether this verdict is a pass.
    pub fn is_verified(&self) -> bool {
        matches!(self, Verdict::Verified)
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Verdict {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "V" => Verdict::Verified,
            "X" => Verdict::Mismatch,
            "Timeout" => Verdict::Timeout,
            "SyntaxError" => Verdict::SyntaxError,
            "No submission" => Verdict::NoSubmission,
            "Unicode decode error" => Verdict::DecodeError,
            other => bail!("Unknown verdict code `{other}`"),
        })
    }
}

impl From<Verdict> for String {
    fn from(verdict: Verdict) -> Self {
        verdict.code().to_string()
    }
}

impl TryFrom<String> for Verdict {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Splits an identifier into a text prefix, its first run of digits, and the
/// remainder, so `q2` sorts before `q10`.
fn natural_key(s: &str) -> (&str, Option<u64>, &str) {
    let start = s.find(|c: char| c.is_ascii_digit()).unwrap_or(s.len());
    let (prefix, rest) = s.split_at(start);
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let (digits, tail) = rest.split_at(end);
    (prefix, digits.parse().ok(), tail)
}

/// Compares two identifiers in natural order, falling back to plain string
/// order so distinct identifiers never compare equal.
fn natural_cmp(a: &str, b: &str) -> Ordering {
    natural_key(a).cmp(&natural_key(b)).then_with(|| a.cmp(b))
}

/// A result grid column: one question of one batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Column {
    /// Batch (assignment) name.
    pub batch:    String,
    /// Question identifier within the batch, e.g. `q1`.
    pub question: String,
}

impl Column {
    /// Creates a column key.
    pub fn new(batch: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            batch:    batch.into(),
            question: question.into(),
        }
    }
}

impl Display for Column {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.batch, self.question)
    }
}

impl Ord for Column {
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(&self.batch, &other.batch)
            .then_with(|| natural_cmp(&self.question, &other.question))
    }
}

impl PartialOrd for Column {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Column> for String {
    fn from(column: Column) -> Self {
        column.to_string()
    }
}

impl TryFrom<String> for Column {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        let (batch, question) = value
            .rsplit_once('/')
            .with_context(|| format!("Column `{value}` is not of the form batch/question"))?;
        Ok(Column::new(batch, question))
    }
}

/// Per-student tally shown under the grid.
#[derive(Tabled, Debug, Clone, PartialEq, Eq)]
pub struct StudentSummary {
    #[tabled(rename = "Student")]
    /// Student identifier.
    pub student:  String,
    #[tabled(rename = "Verified")]
    /// Number of `V` cells.
    pub verified: usize,
    #[tabled(rename = "Graded")]
    /// Number of populated cells.
    pub graded:   usize,
}

/// Verdicts keyed by student identifier, then by column.
///
/// Both levels are ordered maps, so iteration (and the saved file) is always
/// sorted by student identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultMatrix {
    /// student id -> column -> verdict
    cells: BTreeMap<String, BTreeMap<Column, Verdict>>,
}

impl ResultMatrix {
    /// Creates an empty grid.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces one cell.
    pub fn upsert(&mut self, student: impl Into<String>, column: Column, verdict: Verdict) {
        self.cells
            .entry(student.into())
            .or_default()
            .insert(column, verdict);
    }

    /// Looks up one cell.
    pub fn get(&self, student: &str, batch: &str, question: &str) -> Option<Verdict> {
        self.cells
            .get(student)?
            .get(&Column::new(batch, question))
            .copied()
    }

    /// Student identifiers, sorted.
    pub fn students(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }

    /// Every column populated for any student, in natural order.
    pub fn columns(&self) -> Vec<Column> {
        self.cells
            .values()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Verdicts recorded for one student.
    pub fn row(&self, student: &str) -> Option<&BTreeMap<Column, Verdict>> {
        self.cells.get(student)
    }

    /// Whether no cell has been recorded.
    pub fn is_empty(&self) -> bool {
        self.cells.values().all(BTreeMap::is_empty)
    }

    /// Folds `other` into this grid; cells in `other` win.
    pub fn merge(&mut self, other: ResultMatrix) {
        for (student, row) in other.cells {
            let target = self.cells.entry(student).or_default();
            target.extend(row);
        }
    }

    /// Loads a grid saved by [`ResultMatrix::save`]. A missing file is an
    /// empty grid.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Could not read results from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Could not parse results in {}", path.display()))
    }

    /// Writes the grid as pretty JSON, sorted by student identifier.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Could not serialize results")?;
        std::fs::write(path, json)
            .with_context(|| format!("Could not write results to {}", path.display()))
    }

    /// Per-student verified/graded counts.
    pub fn summary(&self) -> Vec<StudentSummary> {
        self.cells
            .iter()
            .map(|(student, row)| StudentSummary {
                student:  student.clone(),
                verified: row.values().filter(|v| v.is_verified()).count(),
                graded:   row.len(),
            })
            .collect()
    }

    /// Renders the grid with one row per student and one column per
    /// question. Unpopulated cells are blank.
    pub fn to_table(&self) -> Table {
        let columns = self.columns();
        let mut builder = Builder::default();
        builder.push_record(
            std::iter::once("Student".to_string()).chain(columns.iter().map(Column::to_string)),
        );

        for (student, row) in &self.cells {
            builder.push_record(std::iter::once(student.clone()).chain(
                columns.iter().map(|column| {
                    row.get(column)
                        .map(|verdict| verdict.code().to_string())
                        .unwrap_or_default()
                }),
            ));
        }

        let mut table = builder.build();
        table
            .with(Style::modern())
            .with(Modify::new(Rows::first()).with(Alignment::center()));
        table
    }
}

impl Display for ResultMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("(no results)");
        }
        write!(f, "{}", self.to_table())
    }
}
