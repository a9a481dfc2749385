use std::fs;

use sqlgrade::grade::{Column, ResultMatrix, StudentSummary, Verdict};


use engine_support::temp_root;

fn sample() -> ResultMatrix {
    let mut matrix = ResultMatrix::new();
    matrix.upsert("103", Column::new("hw1", "q10"), Verdict::Timeout);
    matrix.upsert("101", Column::new("hw1", "q2"), Verdict::Verified);
    matrix.upsert("101", Column::new("hw1", "q10"), Verdict::Mismatch);
    matrix.upsert("102", Column::new("hw1", "q2"), Verdict::NoSubmission);
    matrix
}

#[test]
fn saved_file_is_keyed_by_student_then_column() {
    let root = temp_root();
    let path = root.join("results.json");
    sample().save(&path).expect("save");

    let raw: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    assert_eq!(raw["101"]["hw1/q2"], "V");
    assert_eq!(raw["102"]["hw1/q2"], "No submission");
    assert_eq!(raw["103"]["hw1/q10"], "Timeout");

    assert_eq!(ResultMatrix::load(&path).expect("load"), sample());
    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_results_file_is_empty() {
    let root = temp_root();
    let matrix = ResultMatrix::load(&root.join("results.json")).expect("load");
    assert!(matrix.is_empty());
    assert_eq!(matrix.to_string(), "(no results)");
    let _ = fs::remove_dir_all(root);
}

#[test]
fn merge_keeps_old_cells_and_overwrites_regraded_ones() {
    let mut old = sample();
    let mut fresh = ResultMatrix::new();
    fresh.upsert("102", Column::new("hw1", "q2"), Verdict::Verified);
    fresh.upsert("104", Column::new("hw2", "q1"), Verdict::SyntaxError);

    old.merge(fresh);

    assert_eq!(old.get("102", "hw1", "q2"), Some(Verdict::Verified));
    assert_eq!(old.get("101", "hw1", "q10"), Some(Verdict::Mismatch));
    assert_eq!(old.get("104", "hw2", "q1"), Some(Verdict::SyntaxError));
    assert_eq!(old.students().collect::<Vec<_>>(), ["101", "102", "103", "104"]);
}

#[test]
fn table_lists_students_and_naturally_ordered_columns() {
    let rendered = sample().to_table().to_string();

    let q2 = rendered.find("hw1/q2").expect("q2 header");
    let q10 = rendered.find("hw1/q10").expect("q10 header");
    assert!(q2 < q10);

    let row_101 = rendered.find("101").expect("101 row");
    let row_103 = rendered.find("103").expect("103 row");
    assert!(row_101 < row_103);

    assert!(rendered.contains("No submission"));
    assert!(rendered.contains("Timeout"));
}

#[test]
fn summary_counts_verified_cells() {
    assert_eq!(sample().summary(), vec![
        StudentSummary {
            student:  "101".to_string(),
            verified: 1,
            graded:   2,
        },
        StudentSummary {
            student:  "102".to_string(),
            verified: 0,
            graded:   1,
        },
        StudentSummary {
            student:  "103".to_string(),
            verified: 0,
            graded:   1,
        },
    ]);
}

#[test]
fn unknown_verdict_code_fails_to_load() {
    let root = temp_root();
    let path = root.join("results.json");
    fs::write(&path, r#"{"101": {"hw1/q1": "maybe"}}"#).expect("write");

    assert!(ResultMatrix::load(&path).is_err());
    let _ = fs::remove_dir_all(root);
}
