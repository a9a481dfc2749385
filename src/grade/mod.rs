#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

/// Batch discovery and the grading driver.
pub mod batch;
/// Output comparison.
pub mod compare;
/// Running one query under a time budget.
pub mod executor;
/// Verdicts and the result grid.
pub mod results;

pub use batch::{
    Batch, BatchGrader, BatchReport, LayoutError, Question, SetupScripts, StudentFilter,
    Submission,
};
pub use compare::{Comparator, Comparison, Mismatch, Tolerance, render_diff, same};
pub use executor::{ExecutionOutcome, Executor};
pub use results::{Column, ResultMatrix, StudentSummary, Verdict};
