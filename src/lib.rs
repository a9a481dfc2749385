//! # sqlgrade
//!
//! Grades SQL query assignments. Every batch folder holds an `answer`
//! folder with reference queries and one folder per student; each query is
//! run against a shared query engine and its output compared with the
//! reference output.

#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Runtime configuration read from the environment
pub mod config;
/// Launching and killing query executions on the engine
pub mod engine;
/// For all things related to grading
pub mod grade;
/// Subprocess supervision with deadlines
pub mod process;
/// Student roster files
pub mod roster;
/// Utility functions for convenience
pub mod util;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use grade::{Batch, BatchGrader, BatchReport, ResultMatrix};

/// Grades each batch folder in turn, merging the verdicts into `matrix`.
///
/// Batches are processed strictly one after another because they share one
/// engine and one execution name.
pub async fn grade_batches(
    grader: &BatchGrader,
    batches: &[PathBuf],
    matrix: &mut ResultMatrix,
) -> Result<Vec<BatchReport>> {
    let mut reports = Vec::new();
    for dir in batches {
        let batch = Batch::discover(dir)
            .with_context(|| format!("Could not read batch {}", dir.display()))?;
        if let Some(report) = grader.grade(&batch, matrix).await? {
            reports.push(report);
        }
    }
    Ok(reports)
}

/// Grades `batches` and merges the verdicts into the result file at
/// `results`, which is created if missing.
pub async fn grade_into_file(
    grader: &BatchGrader,
    batches: &[PathBuf],
    results: &Path,
) -> Result<(ResultMatrix, Vec<BatchReport>)> {
    let mut fresh = ResultMatrix::new();
    let reports = grade_batches(grader, batches, &mut fresh).await?;

    let mut merged = ResultMatrix::load(results)?;
    merged.merge(fresh);
    merged.save(results)?;
    tracing::info!("Wrote results to {}", results.display());

    Ok((merged, reports))
}
