#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! Grading of one batch: a folder holding the reference answers and every
//! student's submission for one assignment.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, bail};
use itertools::Itertools;
use thiserror::Error;
use typed_builder::TypedBuilder;

use super::{
    compare::{Comparator, Comparison, render_diff},
    executor::{ExecutionOutcome, Executor},
    results::{Column, ResultMatrix, Verdict},
};
use crate::{
    config::{DEFAULT_DATABASE, DEFAULT_TIMEOUT_SECS},
    engine::CredentialTier,
    util::{dir_name, find_files, visible_dirs},
};

/// Folder holding the reference answers inside a batch.
pub const ANSWER_DIR: &str = "answer";

/// Problems with the on-disk layout of a batch.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// The batch path is not a directory.
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),
    /// The batch has no reference-answer folder.
    #[error("batch {0} has no `answer` folder")]
    MissingAnswer(PathBuf),
}

/// One question of a batch, as defined by a reference query file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    /// Identifier taken from the query file name, e.g. `q1`.
    pub id:       String,
    /// Reference query file.
    pub query:    PathBuf,
    /// Where the reference output is written and read back from.
    pub expected: PathBuf,
}

impl Question {
    /// Builds a question from a `qN.sql` file; `None` for other files.
    pub fn from_query_file(path: &Path) -> Option<Self> {
        if path.extension()? != "sql" {
            return None;
        }
        let id = path.file_stem()?.to_str()?.to_string();
        let expected = path.with_file_name(Self::output_file_name(&id));
        Some(Self {
            id,
            query: path.to_path_buf(),
            expected,
        })
    }

    /// Output file name for a question id: `q3` becomes `a3.txt`.
    pub fn output_file_name(id: &str) -> String {
        match id.strip_prefix('q') {
            Some(rest) => format!("a{rest}.txt"),
            None => format!("{id}.txt"),
        }
    }

    /// Query file a student is expected to hand in for this question.
    pub fn query_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.sql", self.id))
    }

    /// Output file produced for this question inside `dir`.
    pub fn output_in(&self, dir: &Path) -> PathBuf {
        dir.join(Self::output_file_name(&self.id))
    }
}

/// Natural ordering key for question ids (`q2` before `q10`).
fn question_order(id: &str) -> (Option<u64>, &str) {
    let digits: String = id.chars().filter(char::is_ascii_digit).collect();
    (digits.parse().ok(), id)
}

/// One student's folder in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Student identifier parsed from the folder name.
    pub student: String,
    /// The folder itself.
    pub dir:     PathBuf,
}

impl Submission {
    /// Creates a submission for `dir`, taking the student id from the folder
    /// name up to the first `_` (`101_alice` is student `101`).
    pub fn from_dir(dir: PathBuf) -> Self {
        let name = dir_name(&dir);
        let student = name.split('_').next().unwrap_or(&name).to_string();
        Self { student, dir }
    }
}

/// A discovered batch.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Batch name (the folder name), used as the column prefix.
    name:        String,
    /// Reference-answer folder.
    answer_dir:  PathBuf,
    /// Student folders, sorted by student id.
    submissions: Vec<Submission>,
}

impl Batch {
    /// Reads the layout of the batch folder at `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(LayoutError::NotADirectory(dir.to_path_buf()).into());
        }

        let answer_dir = dir.join(ANSWER_DIR);
        if !answer_dir.is_dir() {
            return Err(LayoutError::MissingAnswer(dir.to_path_buf()).into());
        }

        let submissions = visible_dirs(dir)?
            .into_iter()
            .filter(|path| dir_name(path) != ANSWER_DIR)
            .map(Submission::from_dir)
            .sorted_by(|a, b| a.student.cmp(&b.student))
            .collect();

        Ok(Self {
            name: dir_name(dir),
            answer_dir,
            submissions,
        })
    }

    /// Batch name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reference-answer folder.
    pub fn answer_dir(&self) -> &Path {
        &self.answer_dir
    }

    /// Student folders.
    pub fn submissions(&self) -> &[Submission] {
        &self.submissions
    }

    /// Questions defined by the reference folder, in natural order.
    pub fn questions(&self) -> Result<Vec<Question>> {
        Ok(find_files("sql", 0, &self.answer_dir)?
            .iter()
            .filter_map(|path| Question::from_query_file(path))
            .sorted_by(|a, b| question_order(&a.id).cmp(&question_order(&b.id)))
            .collect())
    }
}

/// Which students to grade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StudentFilter {
    /// Everyone in the batch.
    #[default]
    All,
    /// Only these identifiers.
    Only(BTreeSet<String>),
}

impl StudentFilter {
    /// Restricts grading to `ids`.
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StudentFilter::Only(ids.into_iter().map(Into::into).collect())
    }

    /// Whether `student` should be graded.
    pub fn admits(&self, student: &str) -> bool {
        match self {
            StudentFilter::All => true,
            StudentFilter::Only(ids) => ids.contains(student),
        }
    }
}

/// Schema scripts run with the admin credential before each batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupScripts {
    /// Creates the grading database; runs with no target database.
    pub create_database: Option<PathBuf>,
    /// Creates the tables.
    pub create_tables:   Option<PathBuf>,
    /// Loads the dataset.
    pub import_data:     Option<PathBuf>,
}

impl SetupScripts {
    /// Scripts in run order, each with whether it targets the grading
    /// database.
    fn in_order(&self) -> impl Iterator<Item = (&Path, bool)> {
        [
            (&self.create_database, false),
            (&self.create_tables, true),
            (&self.import_data, true),
        ]
        .into_iter()
        .filter_map(|(script, targeted)| script.as_deref().map(|path| (path, targeted)))
    }
}

/// What happened while grading one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Batch name.
    pub batch:    String,
    /// Questions whose reference query ran, and were graded.
    pub gradable: Vec<String>,
    /// Questions whose reference query failed, with the outcome.
    pub excluded: Vec<(String, ExecutionOutcome)>,
    /// Number of students graded.
    pub students: usize,
}

/// Drives reference qualification, student execution and comparison for a
/// batch, one query at a time.
#[derive(TypedBuilder)]
pub struct BatchGrader {
    /// Runs the queries.
    executor:      Executor,
    /// Database queries run against.
    #[builder(default = DEFAULT_DATABASE.to_string(), setter(into))]
    database:      String,
    /// Time budget for each query.
    #[builder(default = Duration::from_secs(DEFAULT_TIMEOUT_SECS))]
    budget:        Duration,
    /// Output comparison.
    #[builder(default)]
    comparator:    Comparator,
    /// Which students to grade.
    #[builder(default)]
    filter:        StudentFilter,
    /// Schema scripts run with the admin credential before each batch.
    #[builder(default)]
    setup:         SetupScripts,
    /// Print a diff for every mismatching answer.
    #[builder(default)]
    show_diffs:    bool,
}

impl BatchGrader {
    /// Grades `batch` into `matrix`.
    ///
    /// Returns `None` when the student filter selects nobody in this batch.
    pub async fn grade(
        &self,
        batch: &Batch,
        matrix: &mut ResultMatrix,
    ) -> Result<Option<BatchReport>> {
        let submissions: Vec<&Submission> = batch
            .submissions()
            .iter()
            .filter(|s| self.filter.admits(&s.student))
            .collect();

        if submissions.is_empty() && self.filter != StudentFilter::All {
            tracing::info!("No requested students in batch {}, skipping", batch.name());
            return Ok(None);
        }

        self.prepare().await?;

        let (gradable, excluded) = self.qualify(batch).await?;
        tracing::info!(
            "Grading batch {}: {} student(s), questions [{}]",
            batch.name(),
            submissions.len(),
            gradable.iter().map(|q| q.id.as_str()).join(", ")
        );

        for submission in &submissions {
            self.grade_submission(batch, submission, &gradable, matrix)
                .await?;
        }

        Ok(Some(BatchReport {
            batch: batch.name().to_string(),
            gradable: gradable.into_iter().map(|q| q.id).collect(),
            excluded: excluded
                .into_iter()
                .map(|(q, outcome)| (q.id, outcome))
                .collect(),
            students: submissions.len(),
        }))
    }

    /// Runs the schema scripts in order. Any failure aborts grading: without
    /// the schema no answer can be judged.
    pub async fn prepare(&self) -> Result<()> {
        for (script, targeted) in self.setup.in_order() {
            let database = if targeted { self.database.as_str() } else { "" };
            let output = std::env::temp_dir().join(format!(
                "sqlgrade-setup-{}.txt",
                script
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            ));
            let outcome = self
                .executor
                .execute(CredentialTier::Admin, script, database, &output, self.budget)
                .await?;
            match outcome {
                ExecutionOutcome::Success(_) => {
                    tracing::debug!("Ran setup script {}", script.display());
                }
                ExecutionOutcome::SyntaxError(diag) => {
                    bail!("Setup script {} failed: {diag}", script.display())
                }
                other => bail!("Setup script {} failed: {other:?}", script.display()),
            }
        }
        Ok(())
    }

    /// Runs every reference query with the admin credential and splits the
    /// questions into gradable and excluded ones.
    pub async fn qualify(
        &self,
        batch: &Batch,
    ) -> Result<(Vec<Question>, Vec<(Question, ExecutionOutcome)>)> {
        let mut gradable = Vec::new();
        let mut excluded = Vec::new();

        for question in batch.questions()? {
            let outcome = self
                .executor
                .execute(
                    CredentialTier::Admin,
                    &question.query,
                    &self.database,
                    &question.expected,
                    self.budget,
                )
                .await?;

            if outcome.is_success() {
                gradable.push(question);
            } else {
                tracing::warn!(
                    "Reference answer {} of batch {} failed ({:?}); not grading it",
                    question.id,
                    batch.name(),
                    outcome
                );
                excluded.push((question, outcome));
            }
        }

        Ok((gradable, excluded))
    }

    /// Runs and judges one student's queries for the gradable questions.
    pub async fn grade_submission(
        &self,
        batch: &Batch,
        submission: &Submission,
        gradable: &[Question],
        matrix: &mut ResultMatrix,
    ) -> Result<()> {
        for question in gradable {
            let output = question.output_in(&submission.dir);
            let outcome = self
                .executor
                .execute(
                    CredentialTier::Student,
                    &question.query_in(&submission.dir),
                    &self.database,
                    &output,
                    self.budget,
                )
                .await?;

            let matched = match &outcome {
                ExecutionOutcome::Success(produced) => {
                    let comparison = self.comparator.compare(&question.expected, produced);
                    if let Comparison::Differs(reason) = &comparison {
                        tracing::debug!(
                            "{} {}/{}: {reason}",
                            submission.student,
                            batch.name(),
                            question.id
                        );
                        if self.show_diffs {
                            self.print_diff(submission, question, produced);
                        }
                    }
                    comparison.is_match()
                }
                _ => false,
            };

            let verdict = Verdict::from_outcome(&outcome, matched);
            tracing::debug!("{} {}/{} = {verdict}", submission.student, batch.name(), question.id);
            matrix.upsert(
                submission.student.clone(),
                Column::new(batch.name(), question.id.clone()),
                verdict,
            );
        }

        Ok(())
    }

    /// Prints a colored diff of reference and produced output.
    fn print_diff(&self, submission: &Submission, question: &Question, produced: &Path) {
        let expected = std::fs::read_to_string(&question.expected).unwrap_or_default();
        let actual = std::fs::read_to_string(produced).unwrap_or_default();
        eprintln!(
            "Comparing expected and actual output for {} ({}):\n{}",
            question.id,
            submission.student,
            render_diff(&expected, &actual)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn question_maps_q_to_a() {
        let q = Question::from_query_file(Path::new("/b/answer/q12.sql")).expect("question");
        assert_eq!(q.id, "q12");
        assert_eq!(q.expected, Path::new("/b/answer/a12.txt"));
        assert_eq!(q.output_in(Path::new("/b/101")), Path::new("/b/101/a12.txt"));
        assert!(Question::from_query_file(Path::new("/b/answer/notes.txt")).is_none());
    }

    #[test]
    fn student_id_stops_at_underscore() {
        assert_eq!(Submission::from_dir(PathBuf::from("/b/101_alice")).student, "101");
        assert_eq!(Submission::from_dir(PathBuf::from("/b/102")).student, "102");
    }

    #[test]
    fn filter_admits_only_listed_ids() {
        let filter = StudentFilter::only(["101"]);
        assert!(filter.admits("101"));
        assert!(!filter.admits("102"));
        assert!(StudentFilter::All.admits("anyone"));
    }
}
