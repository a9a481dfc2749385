#![cfg(unix)]

use std::{fs, time::Duration};

use sqlgrade::{
    engine::CredentialTier,
    grade::{ExecutionOutcome, Executor},
};


use engine_support::{fake_engine, fake_engine_with_kill, fake_executor, temp_root, write};

const BUDGET: Duration = Duration::from_secs(10);

#[tokio::test]
async fn missing_query_is_no_submission() {
    let root = temp_root();
    let outcome = fake_executor()
        .execute(
            CredentialTier::Student,
            &root.join("q1.sql"),
            "grading",
            &root.join("a1.txt"),
            BUDGET,
        )
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::NoSubmission);
    assert!(!root.join("a1.txt").exists());
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn success_writes_output() {
    let root = temp_root();
    write(&root.join("q1.sql"), "1\n2\n3");
    let output = root.join("a1.txt");

    let outcome = fake_executor()
        .execute(CredentialTier::Student, &root.join("q1.sql"), "grading", &output, BUDGET)
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Success(output.clone()));
    assert_eq!(fs::read_to_string(&output).expect("output"), "1\n2\n3\n");
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn engine_error_is_syntax_error_with_diagnostic_in_output() {
    let root = temp_root();
    write(&root.join("q2.sql"), "SELEC FAIL");
    let output = root.join("a2.txt");

    let outcome = fake_executor()
        .execute(CredentialTier::Student, &root.join("q2.sql"), "grading", &output, BUDGET)
        .await
        .expect("execute");

    let ExecutionOutcome::SyntaxError(diag) = outcome else {
        panic!("expected syntax error, got {outcome:?}");
    };
    assert!(diag.starts_with("ERROR 1064"), "banner should be skipped: {diag}");
    let written = fs::read_to_string(&output).expect("output");
    assert!(written.contains("ERROR 1064"));
    assert!(!written.contains("Warning"));
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn runaway_query_is_killed_as_timeout() {
    let root = temp_root();
    write(&root.join("q3.sql"), "SLEEP");
    let started = std::time::Instant::now();

    let outcome = fake_executor()
        .execute(
            CredentialTier::Student,
            &root.join("q3.sql"),
            "grading",
            &root.join("a3.txt"),
            Duration::from_millis(300),
        )
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Timeout);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(!root.join("a3.txt").exists());
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn kill_exit_code_is_timeout() {
    let root = temp_root();
    write(&root.join("q4.sql"), "KILLED");

    let outcome = fake_executor()
        .execute(
            CredentialTier::Student,
            &root.join("q4.sql"),
            "grading",
            &root.join("a4.txt"),
            BUDGET,
        )
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Timeout);
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn invalid_utf8_is_decode_error() {
    let root = temp_root();
    write(&root.join("q5.sql"), "BADBYTES");

    let outcome = fake_executor()
        .execute(
            CredentialTier::Student,
            &root.join("q5.sql"),
            "grading",
            &root.join("a5.txt"),
            BUDGET,
        )
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::DecodeError);
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn stale_output_does_not_survive_a_failed_run() {
    let root = temp_root();
    write(&root.join("q6.sql"), "SLEEP");
    write(&root.join("a6.txt"), "left over from last week\n");

    let outcome = fake_executor()
        .execute(
            CredentialTier::Student,
            &root.join("q6.sql"),
            "grading",
            &root.join("a6.txt"),
            Duration::from_millis(300),
        )
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Timeout);
    assert!(!root.join("a6.txt").exists());
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn credential_tier_selects_account() {
    let root = temp_root();
    write(&root.join("q7.sql"), "WHOAMI");
    let executor = fake_executor();

    for (tier, expected) in [(CredentialTier::Admin, "root\n"), (CredentialTier::Student, "student\n")]
    {
        let output = root.join("a7.txt");
        executor
            .execute(tier, &root.join("q7.sql"), "grading", &output, BUDGET)
            .await
            .expect("execute");
        assert_eq!(fs::read_to_string(&output).expect("output"), expected);
    }
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn timeout_runs_the_kill_by_name_command() {
    let root = temp_root();
    write(&root.join("q8.sql"), "SLEEP");
    let marker = root.join("killed");
    let executor = Executor::new(fake_engine_with_kill(&marker));

    let outcome = executor
        .execute(
            CredentialTier::Student,
            &root.join("q8.sql"),
            "grading",
            &root.join("a8.txt"),
            Duration::from_millis(300),
        )
        .await
        .expect("execute");

    assert_eq!(outcome, ExecutionOutcome::Timeout);
    assert!(marker.exists(), "kill command did not run");
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn finished_query_does_not_run_the_kill_command() {
    let root = temp_root();
    write(&root.join("q9.sql"), "1");
    let marker = root.join("killed");
    let executor = Executor::new(fake_engine_with_kill(&marker));

    executor
        .execute(CredentialTier::Student, &root.join("q9.sql"), "grading", &root.join("a9.txt"), BUDGET)
        .await
        .expect("execute");

    assert!(!marker.exists());
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn data_directory_is_passed_as_absolute_path() {
    let root = temp_root();
    let data = root.join("data");
    fs::create_dir_all(&data).expect("data dir");
    write(&root.join("q10.sql"), "DATADIR");
    let output = root.join("a10.txt");

    Executor::new(fake_engine())
        .with_working_dir(&data)
        .execute(CredentialTier::Admin, &root.join("q10.sql"), "grading", &output, BUDGET)
        .await
        .expect("execute");

    assert_eq!(
        fs::read_to_string(&output).expect("output"),
        format!("{}\n", data.display())
    );
    let _ = fs::remove_dir_all(root);
}

#[tokio::test]
async fn empty_database_is_left_out_of_the_command() {
    let root = temp_root();
    write(&root.join("q11.sql"), "CREATE DATABASE grading; -- NODB");

    let without = fake_executor()
        .execute(CredentialTier::Admin, &root.join("q11.sql"), "", &root.join("a11.txt"), BUDGET)
        .await
        .expect("execute");
    let with = fake_executor()
        .execute(
            CredentialTier::Admin,
            &root.join("q11.sql"),
            "grading",
            &root.join("a11.txt"),
            BUDGET,
        )
        .await
        .expect("execute");

    assert!(without.is_success());
    assert_eq!(
        with,
        ExecutionOutcome::SyntaxError("ERROR 1049 (42000): Unknown database 'grading'".to_string())
    );
    let _ = fs::remove_dir_all(root);
}
