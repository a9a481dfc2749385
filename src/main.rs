#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # sqlgrade
//! ## Introduction
//!
//! Grades SQL homework and exams. Run it from a folder that contains one
//! folder per batch (`hw1/`, `hw2/`, ...). Each batch holds an `answer/`
//! folder with the reference queries `q1.sql`, `q2.sql`, ... and one folder
//! per student with the same file names.
//!
//! ## Usage
//!
//! `sqlgrade grade` grades every batch and merges the verdicts into
//! `results.json`. `sqlgrade show results.json` prints the grid again.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;
use bpaf::*;
use colored::Colorize;
use dotenvy::dotenv;
use sqlgrade::{
    config,
    engine::QueryEngine,
    grade::{
        BatchGrader, Comparator, Comparison, Executor, ResultMatrix, SetupScripts, StudentFilter,
    },
    grade_into_file,
    roster::load_roster,
    util::{dir_name, visible_dirs},
};
use tabled::{Table, settings::Style};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Arguments of the `grade` subcommand.
#[derive(Debug, Clone)]
struct GradeArgs {
    /// Batch folders; all visible folders when empty.
    batches:    Vec<PathBuf>,
    /// Dataset folder, the client's working directory.
    data:       PathBuf,
    /// Script creating and selecting the database.
    db_sql:     Option<PathBuf>,
    /// Script creating the tables.
    tb_sql:     Option<PathBuf>,
    /// Script importing the data.
    import_sql: Option<PathBuf>,
    /// Student ids to grade.
    students:   Vec<String>,
    /// Roster file restricting the student ids.
    roster:     Option<PathBuf>,
    /// Result file to merge into.
    output:     PathBuf,
    /// Per-query time budget override, in seconds.
    timeout:    Option<u64>,
    /// Database override.
    database:   Option<String>,
    /// Print diffs for mismatches.
    show_diffs: bool,
}

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Grade batches
    Grade(GradeArgs),
    /// Compare two output files
    Compare(PathBuf, PathBuf),
    /// Print a saved result file
    Show(PathBuf),
}

/// Parsed command line.
#[derive(Debug, Clone)]
struct Opts {
    /// Enable debug logging.
    verbose: bool,
    /// Subcommand to run.
    cmd:     Cmd,
}

/// Whether `path` is an existing `.sql` file.
fn is_sql_file(path: &PathBuf) -> bool {
    path.is_file() && path.extension().is_some_and(|ext| ext == "sql")
}

/// Parse the command line arguments and return the options
fn options() -> Opts {
    /// parses an optional setup script
    fn script(name: &'static str, help: &'static str) -> impl Parser<Option<PathBuf>> {
        long(name)
            .help(help)
            .argument::<PathBuf>("FILE")
            .guard(is_sql_file, "must be an existing .sql file")
            .optional()
    }

    let batches = short('b')
        .long("batches")
        .help("Batch (directory) to grade, default all batches")
        .argument::<PathBuf>("DIR")
        .guard(|p: &PathBuf| p.is_dir(), "must be an existing directory")
        .many();
    let data = short('d')
        .long("data")
        .help("Dataset directory")
        .argument::<PathBuf>("DIR")
        .fallback(PathBuf::from("data"));
    let db_sql = script("db-sql", "SQL file for creating and using the database");
    let tb_sql = script("tb-sql", "SQL file for creating tables");
    let import_sql = script("import-sql", "SQL file for importing data");
    let students = short('s')
        .long("students")
        .help("Only grade these student ids")
        .argument::<String>("ID")
        .many();
    let roster = long("roster")
        .help("File listing the student ids to grade, one per line")
        .argument::<PathBuf>("FILE")
        .optional();
    let output = short('o')
        .long("output")
        .help("Result file to merge verdicts into")
        .argument::<PathBuf>("FILE")
        .fallback(PathBuf::from("results.json"));
    let timeout = short('t')
        .long("timeout")
        .help("Seconds a single query may run")
        .argument::<u64>("SECS")
        .optional();
    let database = long("database")
        .help("Database the queries run against")
        .argument::<String>("NAME")
        .optional();
    let show_diffs = long("show-diffs")
        .help("Print a diff for every mismatching answer")
        .switch();

    let grade = construct!(GradeArgs {
        batches,
        data,
        db_sql,
        tb_sql,
        import_sql,
        students,
        roster,
        output,
        timeout,
        database,
        show_diffs,
    })
    .map(Cmd::Grade)
    .to_options()
    .command("grade")
    .help("Grade student submissions against the reference answers");

    let reference = positional::<PathBuf>("REFERENCE").help("Reference output file");
    let candidate = positional::<PathBuf>("CANDIDATE").help("Produced output file");
    let compare = construct!(Cmd::Compare(reference, candidate))
        .to_options()
        .command("compare")
        .help("Check whether two output files hold the same answer");

    let file = positional::<PathBuf>("FILE").help("Result file");
    let show = construct!(Cmd::Show(file))
        .to_options()
        .command("show")
        .help("Print a saved result file");

    let verbose = short('v')
        .long("verbose")
        .help("Log every execution")
        .switch();
    let cmd = construct!([grade, compare, show]);

    construct!(Opts { verbose, cmd })
        .to_options()
        .descr("Query homework and exam grading tool")
        .run()
}

/// Every visible folder in the working directory except the dataset folder.
fn default_batches(data: &Path) -> Result<Vec<PathBuf>> {
    let data_name = dir_name(data);
    Ok(visible_dirs(Path::new("."))?
        .into_iter()
        .filter(|dir| dir_name(dir) != data_name)
        .collect())
}

/// Runs the `grade` subcommand.
async fn grade(args: GradeArgs) -> Result<()> {
    let cfg = config::ensure_initialized()?;

    let engine = QueryEngine::new(cfg.engine().clone());
    engine.locate()?;
    let mut executor = Executor::new(engine);
    if args.data.is_dir() {
        executor = executor.with_working_dir(&args.data);
    }

    let filter = if !args.students.is_empty() {
        StudentFilter::only(args.students)
    } else if let Some(roster) = &args.roster {
        StudentFilter::Only(load_roster(roster)?)
    } else {
        StudentFilter::All
    };

    let setup = SetupScripts {
        create_database: args.db_sql,
        create_tables:   args.tb_sql,
        import_data:     args.import_sql,
    };

    let grader = BatchGrader::builder()
        .executor(executor)
        .database(args.database.unwrap_or_else(|| cfg.database().to_string()))
        .budget(args.timeout.map_or(cfg.timeout(), Duration::from_secs))
        .comparator(Comparator::default())
        .filter(filter)
        .setup(setup)
        .show_diffs(args.show_diffs)
        .build();

    let batches = if args.batches.is_empty() {
        default_batches(&args.data)?
    } else {
        args.batches
    };

    let (matrix, reports) = grade_into_file(&grader, &batches, &args.output).await?;

    for report in &reports {
        for (question, outcome) in &report.excluded {
            eprintln!(
                "{} {}/{} was not graded: reference answer failed ({outcome:?})",
                "warning:".yellow(),
                report.batch,
                question
            );
        }
    }

    print_matrix(&matrix);
    Ok(())
}

/// Prints the grid and the per-student tally.
fn print_matrix(matrix: &ResultMatrix) {
    println!("{matrix}");
    if !matrix.is_empty() {
        println!("{}", Table::new(matrix.summary()).with(Style::modern()));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let opts = options();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let level = if opts.verbose { Level::DEBUG } else { Level::INFO };
    let filter_layer = LevelFilter::from_level(level);
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    match opts.cmd {
        Cmd::Grade(args) => grade(args).await?,
        Cmd::Compare(reference, candidate) => {
            match Comparator::default().compare(&reference, &candidate) {
                Comparison::Identical => println!("{}", "identical".green()),
                Comparison::WithinTolerance => println!("{}", "same within tolerance".green()),
                Comparison::Differs(reason) => {
                    println!("{} {reason}", "different:".red());
                    std::process::exit(1);
                }
            }
        }
        Cmd::Show(file) => print_matrix(&ResultMatrix::load(&file)?),
    };

    Ok(())
}
