// tests/quality_checks.rs

use stardag::tasks::{CheckSpec, QualityCheckTask, TaskError};
use stardag::types::Comparison;
use stardag::warehouse::{MemoryWarehouse, Value};
use stardag_test_utils::builders::checks;

fn warehouse() -> MemoryWarehouse {
    let wh = MemoryWarehouse::new();
    wh.create_table("users", &["userid", "level"]);
    wh.insert_rows(
        "users",
        vec![
            vec![Value::Int(1), "free".into()],
            vec![Value::Null, "paid".into()],
            vec![Value::Int(3), "paid".into()],
        ],
    )
    .unwrap();
    wh.create_table("songs", &["song_id"]);
    wh
}

#[test]
fn null_key_check_reports_actual_and_expected() {
    let wh = warehouse();
    let mut session = wh.session();
    let sql = "SELECT COUNT(*) FROM users WHERE userid IS NULL";

    let err = checks(vec![CheckSpec::new(sql, 0i64)])
        .run(&mut session)
        .unwrap_err();

    let TaskError::QualityCheckFailed { failures } = &err else {
        panic!("expected a quality check failure, got {err:?}");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sql, sql);
    assert_eq!(failures[0].actual, Some(Value::Int(1)));
    assert_eq!(failures[0].expected, Value::Int(0));

    let message = err.to_string();
    assert!(message.contains("returned 1"), "{message}");
    assert!(message.contains("expected = 0"), "{message}");
}

#[test]
fn passing_checks_report_how_many_ran() {
    let wh = warehouse();
    let mut session = wh.session();

    let metrics = checks(vec![
        CheckSpec::new("SELECT COUNT(*) FROM users", 3i64),
        CheckSpec::new("SELECT COUNT(*) FROM users WHERE level = 'paid'", 1i64)
            .with_comparison(Comparison::Gt),
    ])
    .run(&mut session)
    .unwrap();

    assert_eq!(metrics.checks, Some(2));
}

#[test]
fn every_failing_check_is_reported() {
    let wh = warehouse();
    let mut session = wh.session();

    let err = checks(vec![
        CheckSpec::new("SELECT COUNT(*) FROM users WHERE userid IS NULL", 0i64),
        CheckSpec::new("SELECT COUNT(*) FROM users", 3i64),
        CheckSpec::new("SELECT COUNT(*) FROM songs", 0i64).with_comparison(Comparison::Gt),
    ])
    .run(&mut session)
    .unwrap_err();

    match err {
        TaskError::QualityCheckFailed { failures } => {
            let sqls: Vec<&str> = failures.iter().map(|f| f.sql.as_str()).collect();
            assert_eq!(
                sqls,
                vec![
                    "SELECT COUNT(*) FROM users WHERE userid IS NULL",
                    "SELECT COUNT(*) FROM songs",
                ]
            );
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn query_returning_no_rows_is_a_failure() {
    let wh = warehouse();
    let mut session = wh.session();

    let err = checks(vec![CheckSpec::new(
        "SELECT userid FROM users WHERE level = 'gold'",
        1i64,
    )])
    .run(&mut session)
    .unwrap_err();

    let TaskError::QualityCheckFailed { failures } = &err else {
        panic!("got {err:?}");
    };
    assert_eq!(failures[0].actual, None);
    assert!(err.to_string().contains("no rows"));
}

#[test]
fn non_empty_tables_expand_to_count_checks() {
    let wh = warehouse();
    let mut session = wh.session();

    let task = QualityCheckTask {
        checks: Vec::new(),
        non_empty_tables: vec!["users".to_string(), "songs".to_string()],
    };
    assert_eq!(task.check_count(), 2);

    let err = task.run(&mut session).unwrap_err();
    let TaskError::QualityCheckFailed { failures } = err else {
        panic!("expected a quality check failure");
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].sql, "SELECT COUNT(*) FROM songs");
    assert_eq!(failures[0].comparison, Comparison::Gt);
    assert_eq!(failures[0].actual, Some(Value::Int(0)));
}

#[test]
fn warehouse_errors_abort_the_check_task() {
    let wh = warehouse();
    let mut session = wh.session();

    let err = checks(vec![
        CheckSpec::new("SELECT COUNT(*) FROM missing", 0i64),
        CheckSpec::new("SELECT COUNT(*) FROM users", 99i64),
    ])
    .run(&mut session)
    .unwrap_err();

    assert!(matches!(err, TaskError::Warehouse(_)), "got {err:?}");
}

#[test]
fn float_and_int_values_compare_numerically() {
    let wh = warehouse();
    let mut session = wh.session();

    checks(vec![
        CheckSpec::new("SELECT COUNT(*) FROM users", Value::Float(3.0)),
        CheckSpec::new("SELECT COUNT(*) FROM users", Value::Float(2.5)).with_comparison(Comparison::Ge),
    ])
    .run(&mut session)
    .unwrap();
}
