use std::fs;

use sqlgrade::grade::{Comparator, Comparison, Mismatch, Tolerance, compare::ColumnKind, same};


use engine_support::{temp_root, write};

#[test]
fn comparator_is_reflexive() {
    let root = temp_root();
    let file = root.join("a1.txt");
    write(&file, "Ada\t3.14159\nBob\tNULL\n");

    assert!(same(&file, &file));
    assert_eq!(Comparator::default().compare(&file, &file), Comparison::Identical);
    let _ = fs::remove_dir_all(root);
}

#[test]
fn trailing_float_digits_are_within_tolerance() {
    let root = temp_root();
    let reference = root.join("answer/a1.txt");
    let candidate = root.join("101/a1.txt");
    write(&reference, "1\t2.3333333333\n2\t7.5\n");
    write(&candidate, "1\t2.3333333334\n2\t7.5000000001\n");

    assert_eq!(
        Comparator::default().compare(&reference, &candidate),
        Comparison::WithinTolerance
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn prefix_match_with_extra_rows_is_not_same() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "1\n2\n3\n");
    write(&candidate, "1\n2\n3\n4\n");

    assert_eq!(
        Comparator::default().compare(&reference, &candidate),
        Comparison::Differs(Mismatch::Shape {
            reference: (3, 1),
            candidate: (4, 1),
        })
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn integer_and_float_columns_do_not_mix() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "3\n4\n");
    write(&candidate, "3.0\n4.0\n");

    assert_eq!(
        Comparator::default().compare(&reference, &candidate),
        Comparison::Differs(Mismatch::ColumnKind {
            column:    0,
            reference: ColumnKind::Integer,
            candidate: ColumnKind::Float,
        })
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn changed_value_is_not_same() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "1\n2\n3\n");
    write(&candidate, "1\n2\n4\n");

    assert!(!same(&reference, &candidate));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn missing_or_empty_files_never_match() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let empty = root.join("empty.txt");
    write(&reference, "1\n");
    write(&empty, "");

    assert!(matches!(
        Comparator::default().compare(&reference, &root.join("nope.txt")),
        Comparison::Differs(Mismatch::Missing(_))
    ));
    assert!(matches!(
        Comparator::default().compare(&reference, &empty),
        Comparison::Differs(Mismatch::Empty(_))
    ));
    let _ = fs::remove_dir_all(root);
}

#[test]
fn looser_tolerance_accepts_rounded_answers() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "2.345678\n");
    write(&candidate, "2.35\n");

    assert!(!Comparator::default().same(&reference, &candidate));
    assert!(
        Comparator::new(Tolerance {
            abs: 0.01,
            rel: 0.0,
        })
        .same(&reference, &candidate)
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn empty_string_rows_count_toward_row_count() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "x\n\ny\n");
    write(&candidate, "x\ny\n");

    assert_eq!(
        Comparator::default().compare(&reference, &candidate),
        Comparison::Differs(Mismatch::Shape {
            reference: (3, 1),
            candidate: (2, 1),
        })
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn large_integers_are_compared_within_tolerance() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "100000\n");
    write(&candidate, "100001\n");

    assert_eq!(
        Comparator::default().compare(&reference, &candidate),
        Comparison::WithinTolerance
    );
    let _ = fs::remove_dir_all(root);
}

#[test]
fn non_finite_words_are_compared_as_text() {
    let root = temp_root();
    let reference = root.join("ref.txt");
    let candidate = root.join("cand.txt");
    write(&reference, "inf\n");
    write(&candidate, "infinity\n");

    assert_eq!(
        Comparator::default().compare(&reference, &candidate),
        Comparison::Differs(Mismatch::Value { row: 0, column: 0 })
    );
    let _ = fs::remove_dir_all(root);
}
