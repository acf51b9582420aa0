// tests/staging.rs

use std::sync::Arc;

use chrono::NaiveDate;
use stardag::context::RunContext;
use stardag::credentials::StaticCredentialProvider;
use stardag::storage::MemoryObjectStore;
use stardag::tasks::{TaskEnv, TaskError};
use stardag::warehouse::{MemoryWarehouse, Value};
use stardag_test_utils::builders::{staging, test_credentials};

const EVENTS_KEY: &str = "log-data/{execution_date.year}/{execution_date.month}";

fn context(year: i32, month: u32) -> RunContext {
    RunContext::new(
        NaiveDate::from_ymd_opt(year, month, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap(),
    )
}

fn store() -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    store.put(
        "udacity-dend",
        "log-data/2018/11/2018-11-01-events.json",
        concat!(
            r#"{"artist": "Muse", "userId": 7, "page": "NextSong"}"#,
            "\n",
            r#"{"artist": null, "userId": 8, "page": "Home"}"#,
            "\n",
        ),
    );
    store.put(
        "udacity-dend",
        "log-data/2018/11/2018-11-02-events.json",
        r#"{"artist": "Blur", "userId": 9, "page": "NextSong"}"#,
    );
    store.put(
        "udacity-dend",
        "log-data/2018/12/2018-12-01-events.json",
        r#"{"artist": "Oasis", "userId": 10, "page": "NextSong"}"#,
    );
    store
}

fn warehouse(store: &Arc<MemoryObjectStore>) -> MemoryWarehouse {
    let wh = MemoryWarehouse::new().with_object_store(store.clone());
    wh.create_table("staging_events", &["artist", "userid", "page"]);
    wh
}

#[test]
fn renders_the_key_and_copies_matching_objects() {
    let store = store();
    let wh = warehouse(&store);
    let creds = test_credentials();
    let ctx = context(2018, 11);
    let env = TaskEnv {
        context: &ctx,
        store: store.as_ref(),
        credentials: &creds,
    };

    let metrics = staging("staging_events", "udacity-dend", EVENTS_KEY)
        .run(&env, &mut wh.session())
        .unwrap();

    assert_eq!(metrics.objects, Some(2));
    assert_eq!(metrics.table_rows, Some(3));

    let table = wh.table("staging_events").unwrap();
    let artists: Vec<&Value> = table.column("artist").unwrap();
    assert_eq!(
        artists,
        vec![&Value::from("Muse"), &Value::Null, &Value::from("Blur")]
    );

    let copy = wh
        .statements()
        .into_iter()
        .find(|s| s.starts_with("COPY"))
        .unwrap();
    assert!(copy.contains("FROM 's3://udacity-dend/log-data/2018/11'"), "{copy}");
    assert!(copy.contains("REGION 'us-west-2'"), "{copy}");
    assert!(copy.contains("JSON 'auto'"), "{copy}");
}

#[test]
fn rerun_replaces_previous_contents() {
    let store = store();
    let wh = warehouse(&store);
    let creds = test_credentials();
    let ctx = context(2018, 11);
    let env = TaskEnv {
        context: &ctx,
        store: store.as_ref(),
        credentials: &creds,
    };
    let task = staging("staging_events", "udacity-dend", EVENTS_KEY);

    task.run(&env, &mut wh.session()).unwrap();
    task.run(&env, &mut wh.session()).unwrap();
    assert_eq!(wh.row_count("staging_events"), 3);
}

#[test]
fn missing_source_fails_without_clearing_the_table() {
    let store = store();
    let wh = warehouse(&store);
    wh.insert_rows(
        "staging_events",
        vec![vec!["Keep".into(), Value::Int(1), "Home".into()]],
    )
    .unwrap();
    wh.clear_statements();

    let creds = test_credentials();
    let ctx = context(2019, 1);
    let env = TaskEnv {
        context: &ctx,
        store: store.as_ref(),
        credentials: &creds,
    };

    let err = staging("staging_events", "udacity-dend", EVENTS_KEY)
        .run(&env, &mut wh.session())
        .unwrap_err();

    assert_eq!(
        err,
        TaskError::SourceNotFound {
            location: "s3://udacity-dend/log-data/2019/1".to_string()
        }
    );
    assert_eq!(wh.row_count("staging_events"), 1);
    assert!(wh.statements().is_empty());
}

#[test]
fn jsonpaths_descriptor_maps_fields_positionally() {
    let store = store();
    store.put(
        "udacity-dend",
        "log_json_path.json",
        r#"{"jsonpaths": ["$.artist", "$['userId']", "$.page"]}"#,
    );
    let wh = warehouse(&store);
    let creds = test_credentials();
    let ctx = context(2018, 12);
    let env = TaskEnv {
        context: &ctx,
        store: store.as_ref(),
        credentials: &creds,
    };

    let mut task = staging("staging_events", "udacity-dend", EVENTS_KEY);
    task.json_path = Some("log_json_path.json".to_string());
    assert_eq!(task.json_descriptor(), "s3://udacity-dend/log_json_path.json");

    task.run(&env, &mut wh.session()).unwrap();

    let table = wh.table("staging_events").unwrap();
    assert_eq!(
        table.rows,
        vec![vec![Value::from("Oasis"), Value::Int(10), Value::from("NextSong")]]
    );
}

#[test]
fn empty_json_path_means_auto() {
    let mut task = staging("staging_events", "udacity-dend", EVENTS_KEY);
    task.json_path = Some("  ".to_string());
    assert_eq!(task.json_descriptor(), "auto");
}

#[test]
fn unknown_credentials_fail_the_task() {
    let store = store();
    let wh = warehouse(&store);
    let creds = StaticCredentialProvider::new();
    let ctx = context(2018, 11);
    let env = TaskEnv {
        context: &ctx,
        store: store.as_ref(),
        credentials: &creds,
    };

    let err = staging("staging_events", "udacity-dend", EVENTS_KEY)
        .run(&env, &mut wh.session())
        .unwrap_err();
    assert!(matches!(err, TaskError::Credentials(_)), "got {err:?}");
    assert!(wh.statements().is_empty());
}

#[test]
fn unknown_template_field_fails_the_task() {
    let store = store();
    let wh = warehouse(&store);
    let creds = test_credentials();
    let ctx = context(2018, 11);
    let env = TaskEnv {
        context: &ctx,
        store: store.as_ref(),
        credentials: &creds,
    };

    let err = staging("staging_events", "udacity-dend", "log-data/{execution_date.week}")
        .run(&env, &mut wh.session())
        .unwrap_err();
    assert!(matches!(err, TaskError::Template(_)), "got {err:?}");
}
