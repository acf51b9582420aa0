// tests/config_errors.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use stardag::config::{load_and_validate, load_from_path};
use stardag::errors::{GraphError, StardagError};
use stardag::tasks::TaskKind;
use stardag::types::{Comparison, parse_duration};
use stardag::warehouse::Value;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("Pipeline.toml");
    fs::write(&path, contents).expect("write config");
    (dir, path)
}

#[test]
fn full_definition_parses_with_defaults() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[pipeline]
name = "sparkify"
retry_delay = "30s"

[[task]]
id = "Begin_execution"
kind = "marker"

[[task]]
id = "Stage_events"
kind = "staging"
after = ["Begin_execution"]
retries = 1
table = "staging_events"
bucket = "udacity-dend"
key = "log-data/{execution_date.year}/{execution_date.month}"
json_path = "log_json_path.json"
credentials = "aws_credentials"

[[task]]
id = "Load_user_dim_table"
kind = "dimension_load"
after = ["Stage_events"]
table = "users"
sql = "SELECT DISTINCT userid FROM staging_events"
mode = "truncate-insert"

[[task]]
id = "Run_data_quality_checks"
kind = "quality_check"
after = ["Load_user_dim_table"]
non_empty_tables = ["users"]
checks = [
  { sql = "SELECT COUNT(*) FROM users WHERE userid IS NULL", expected = 0 },
  { sql = "SELECT COUNT(*) FROM users", expected = 100, comparison = "le" },
]
"#,
    );

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.pipeline.name, "sparkify");
    assert_eq!(cfg.pipeline.retries, 3);
    assert_eq!(cfg.retry_delay, Duration::from_secs(30));
    assert_eq!(cfg.max_retry_delay, Duration::from_secs(3600));
    assert_eq!(cfg.warehouse.pool_size, 4);
    assert_eq!(cfg.max_active_tasks(), 4);
    assert_eq!(cfg.storage_root(), path.parent().unwrap().join("data"));

    let ids: Vec<&str> = cfg.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "Begin_execution",
            "Stage_events",
            "Load_user_dim_table",
            "Run_data_quality_checks"
        ]
    );

    let stage = cfg.task("Stage_events").unwrap();
    assert_eq!(stage.retries, Some(1));
    match &stage.kind {
        TaskKind::Staging(s) => {
            assert_eq!(s.region, "us-west-2");
            assert_eq!(s.json_path.as_deref(), Some("log_json_path.json"));
        }
        other => panic!("unexpected kind {other:?}"),
    }

    match &cfg.task("Run_data_quality_checks").unwrap().kind {
        TaskKind::QualityCheck(q) => {
            assert_eq!(q.checks[0].expected, Value::Int(0));
            assert_eq!(q.checks[0].comparison, Comparison::Eq);
            assert_eq!(q.checks[1].comparison, Comparison::Le);
            assert_eq!(q.check_count(), 3);
        }
        other => panic!("unexpected kind {other:?}"),
    }

    assert_eq!(cfg.task("Begin_execution").unwrap().kind, TaskKind::Marker);
    Ok(())
}

#[test]
fn empty_pipeline_is_rejected() {
    let (_dir, path) = write_config("[pipeline]\nname = \"empty\"\n");
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, StardagError::ConfigError(_)), "got {err:?}");
}

#[test]
fn unknown_upstream_is_rejected() {
    let (_dir, path) = write_config(
        r#"
[[task]]
id = "a"
kind = "marker"
after = ["ghost"]
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(
        matches!(
            err,
            StardagError::Graph(GraphError::UnknownUpstream { ref upstream, .. }) if upstream == "ghost"
        ),
        "got {err:?}"
    );
}

#[test]
fn duplicate_ids_are_rejected() {
    let (_dir, path) = write_config(
        r#"
[[task]]
id = "a"
kind = "marker"

[[task]]
id = "a"
kind = "marker"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, StardagError::Graph(GraphError::Duplicate(_))), "got {err:?}");
}

#[test]
fn cycles_are_rejected() {
    let (_dir, path) = write_config(
        r#"
[[task]]
id = "a"
kind = "marker"
after = ["b"]

[[task]]
id = "b"
kind = "marker"
after = ["a"]
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, StardagError::Graph(GraphError::Cycle(_))), "got {err:?}");
    assert!(err.to_string().contains("cycle detected"));
}

#[test]
fn bad_duration_is_rejected() {
    let (_dir, path) = write_config(
        r#"
[pipeline]
retry_delay = "5 fortnights"

[[task]]
id = "a"
kind = "marker"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(err.to_string().contains("retry_delay"), "{err}");
}

#[test]
fn zero_pool_size_is_rejected() {
    let (_dir, path) = write_config(
        r#"
[warehouse]
pool_size = 0

[[task]]
id = "a"
kind = "marker"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(err.to_string().contains("pool_size"), "{err}");
}

#[test]
fn unknown_kind_is_a_toml_error() {
    let (_dir, path) = write_config(
        r#"
[[task]]
id = "a"
kind = "spark_job"
"#,
    );
    let err = load_from_path(&path).unwrap_err();
    assert!(matches!(err, StardagError::TomlError(_)), "got {err:?}");
}

#[test]
fn invalid_load_mode_is_accepted_until_run_time() -> TestResult {
    let (_dir, path) = write_config(
        r#"
[[task]]
id = "facts"
kind = "fact_load"
table = "songplays"
sql = "SELECT * FROM staging_events"
mode = "merge"
"#,
    );
    let cfg = load_and_validate(&path)?;
    assert_eq!(cfg.tasks.len(), 1);
    Ok(())
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_and_validate(dir.path().join("nope.toml")).unwrap_err();
    assert!(matches!(err, StardagError::IoError(_)), "got {err:?}");
}

#[test]
fn oversized_duration_is_a_config_error() {
    let (_dir, path) = write_config(
        r#"
[pipeline]
retry_delay = "9999999999999999h"

[[task]]
id = "a"
kind = "marker"
"#,
    );
    let err = load_and_validate(&path).unwrap_err();
    assert!(matches!(err, StardagError::ConfigError(_)), "got {err:?}");
    assert!(err.to_string().contains("out of range"), "{err}");
}

#[test]
fn duration_units_scale_without_overflow() {
    assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
    assert_eq!(parse_duration("5m"), Ok(Duration::from_secs(300)));
    assert_eq!(parse_duration("2h"), Ok(Duration::from_secs(7200)));
    assert!(parse_duration("9999999999999999h").is_err());
    assert!(parse_duration("999999999999999999m").is_err());
    assert!(parse_duration("10d").is_err());
}
