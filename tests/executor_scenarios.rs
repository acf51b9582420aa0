// tests/executor_scenarios.rs

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::NaiveDate;
use stardag::context::RunContext;
use stardag::dag::{Graph, Task};
use stardag::engine::{ExecutorOptions, RunReport, RunStatus, TaskStatus};
use stardag::tasks::{TaskError, TaskKind};
use stardag::warehouse::MemoryWarehouse;
use stardag_test_utils::builders::{Harness, fast_options, sql};
use stardag_test_utils::fakes::{
    FlakyConnector, PanickingConnector, RecordingConnector, StatementEvent, StatementLog,
};
use stardag_test_utils::{init_tracing, with_timeout};

fn context() -> RunContext {
    let date = NaiveDate::from_ymd_opt(2018, 11, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    RunContext::new(date)
}

fn sql_task(id: &str, script: &str) -> Task {
    Task::new(id, TaskKind::Sql(sql(script)))
}

#[tokio::test]
async fn failure_skips_downstream_and_fails_the_run() {
    init_tracing();
    let harness = Harness::new(4);

    let mut graph = Graph::new();
    graph.add_task(sql_task("A", "CREATE TABLE a (x int)"), &[]).unwrap();
    graph.add_task(sql_task("B", "SELECT * FROM missing_table"), &[]).unwrap();
    graph.add_task(Task::marker("C"), &["A", "B"]).unwrap();
    graph.add_task(Task::marker("D"), &["C"]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(4, 3)).run(context())).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.status_of("A"), Some(TaskStatus::Succeeded));
    assert_eq!(report.status_of("B"), Some(TaskStatus::Failed));
    assert_eq!(report.status_of("C"), Some(TaskStatus::Skipped));
    assert_eq!(report.status_of("D"), Some(TaskStatus::Skipped));

    let b = report.task("B").unwrap();
    assert_eq!(b.attempts, 1, "non-connection errors are not retried");
    assert!(matches!(b.error, Some(TaskError::Warehouse(_))), "got {:?}", b.error);

    let c = report.task("C").unwrap();
    assert_eq!(c.attempts, 0);
    assert!(c.error.is_none());
}

#[tokio::test]
async fn unrelated_branches_keep_running_after_a_failure() {
    init_tracing();
    let harness = Harness::new(2);

    let mut graph = Graph::new();
    graph.add_task(sql_task("bad", "DROP TABLE nope"), &[]).unwrap();
    graph.add_task(Task::marker("after_bad"), &["bad"]).unwrap();
    graph.add_task(sql_task("good", "CREATE TABLE g (x int)"), &[]).unwrap();
    graph
        .add_task(sql_task("after_good", "CREATE TABLE h (y int)"), &["good"])
        .unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(2, 0)).run(context())).await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.tasks_with(TaskStatus::Succeeded), vec!["good", "after_good"]);
    assert_eq!(report.tasks_with(TaskStatus::Skipped), vec!["after_bad"]);
    assert!(harness.warehouse.table("h").is_some());
}

#[tokio::test]
async fn all_tasks_succeed_and_report_is_in_topological_order() {
    init_tracing();
    let harness = Harness::new(2);

    let mut graph = Graph::new();
    graph.add_task(Task::marker("begin"), &[]).unwrap();
    graph
        .add_task(sql_task("create", "CREATE TABLE t (a int); CREATE TABLE u (b int)"), &["begin"])
        .unwrap();
    graph.add_task(Task::marker("end"), &["create"]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(2, 0)).run(context())).await;

    assert!(report.succeeded());
    assert_eq!(report.status, RunStatus::Completed);
    let ids: Vec<&str> = report.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["begin", "create", "end"]);
    assert_eq!(report.task("create").unwrap().metrics.as_ref().unwrap().statements, 2);
    assert_eq!(report.run_id, "scheduled__2018-11-01T00:00:00");
}

#[tokio::test]
async fn connection_errors_are_retried_until_success() {
    init_tracing();
    let flaky = FlakyConnector::new(MemoryWarehouse::new(), 2);
    let attempts = flaky.attempts();
    let harness = Harness::new(1).with_connector(Arc::new(flaky), 1);

    let mut graph = Graph::new();
    graph.add_task(sql_task("create", "CREATE TABLE t (a int)"), &[]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(1, 3)).run(context())).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.task("create").unwrap().attempts, 3);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_fail_with_attempt_count() {
    init_tracing();
    let flaky = FlakyConnector::new(MemoryWarehouse::new(), usize::MAX);
    let harness = Harness::new(1).with_connector(Arc::new(flaky), 1);

    let mut graph = Graph::new();
    graph.add_task(sql_task("create", "CREATE TABLE t (a int)"), &[]).unwrap();
    graph.add_task(Task::marker("after"), &["create"]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(1, 2)).run(context())).await;

    let create = report.task("create").unwrap();
    assert_eq!(create.status, TaskStatus::Failed);
    assert_eq!(create.attempts, 3);
    assert!(matches!(create.error, Some(TaskError::Connection(_))));
    assert_eq!(report.status_of("after"), Some(TaskStatus::Skipped));
}

#[tokio::test]
async fn task_retry_override_wins_over_pipeline_default() {
    init_tracing();
    let flaky = FlakyConnector::new(MemoryWarehouse::new(), usize::MAX);
    let harness = Harness::new(1).with_connector(Arc::new(flaky), 1);

    let mut graph = Graph::new();
    graph
        .add_task(sql_task("once", "CREATE TABLE t (a int)").with_retries(0), &[])
        .unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(1, 5)).run(context())).await;
    assert_eq!(report.task("once").unwrap().attempts, 1);
}

#[tokio::test]
async fn markers_run_without_a_warehouse_session() {
    init_tracing();
    let flaky = FlakyConnector::new(MemoryWarehouse::new(), usize::MAX);
    let attempts = flaky.attempts();
    let harness = Harness::new(1).with_connector(Arc::new(flaky), 1);

    let mut graph = Graph::new();
    graph.add_task(Task::marker("begin"), &[]).unwrap();
    graph.add_task(Task::marker("end"), &["begin"]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(1, 0)).run(context())).await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn panicking_task_is_recorded_as_failed_and_releases_its_session() {
    init_tracing();
    let harness = Harness::new(2).with_connector(Arc::new(PanickingConnector), 2);

    let mut graph = Graph::new();
    graph.add_task(sql_task("boom", "CREATE TABLE t (a int)"), &[]).unwrap();
    graph.add_task(Task::marker("after"), &["boom"]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(2, 3)).run(context())).await;

    let boom = report.task("boom").unwrap();
    assert_eq!(boom.status, TaskStatus::Failed);
    assert_eq!(boom.attempts, 1);
    match &boom.error {
        Some(TaskError::Panicked(msg)) => assert!(msg.contains("warehouse exploded"), "{msg}"),
        other => panic!("expected a panic failure, got {other:?}"),
    }
    assert_eq!(report.status_of("after"), Some(TaskStatus::Skipped));
    assert_eq!(harness.pool.available(), 2);
    assert_eq!(harness.pool.idle_count(), 0, "a session that panicked is not reused");
}

#[tokio::test]
async fn sequential_execution_still_runs_every_batch_member() {
    init_tracing();
    let harness = Harness::new(1);

    let mut graph = Graph::new();
    for name in ["a", "b", "c", "d"] {
        graph
            .add_task(sql_task(name, &format!("CREATE TABLE {name} (x int)")), &[])
            .unwrap();
    }

    let report = with_timeout(harness.executor(graph, fast_options(1, 0)).run(context())).await;

    assert_eq!(report.status, RunStatus::Completed);
    for name in ["a", "b", "c", "d"] {
        assert!(harness.warehouse.table(name).is_some(), "table {name} missing");
    }
    assert_eq!(harness.pool.available(), 1);
    assert_eq!(harness.pool.idle_count(), 1);
}

#[tokio::test]
async fn report_serializes_to_json() {
    init_tracing();
    let harness = Harness::new(1);

    let mut graph = Graph::new();
    graph.add_task(sql_task("bad", "SELECT * FROM nowhere"), &[]).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(1, 0)).run(context())).await;
    let json: serde_json::Value = serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();

    assert_eq!(json["status"], "failed");
    assert_eq!(json["logical_date"], "2018-11-01T00:00:00");
    assert_eq!(json["tasks"][0]["id"], "bad");
    assert_eq!(json["tasks"][0]["status"], "failed");
    assert!(json["tasks"][0]["error"].as_str().unwrap().contains("nowhere"));

    let table = report.render_table();
    assert!(table.contains("): failed"), "{table}");
    assert!(table.contains("error: warehouse error"), "{table}");
}

const ROOTS: [&str; 4] = ["r0", "r1", "r2", "r3"];

fn create(table: &str) -> String {
    format!("CREATE TABLE {table} (x int)")
}

/// Four independent slow roots feeding one task, with `max_active_tasks`
/// set to `limit`.
async fn run_fan_in(limit: usize) -> (RunReport, Arc<StatementLog>) {
    init_tracing();
    let recording = RecordingConnector::new(MemoryWarehouse::new(), Duration::from_millis(100));
    let log = recording.log();
    let harness = Harness::new(4).with_connector(Arc::new(recording), 4);

    let mut graph = Graph::new();
    for name in ROOTS {
        graph.add_task(sql_task(name, &create(name)), &[]).unwrap();
    }
    graph.add_task(sql_task("fan_in", &create("fan_in")), &ROOTS).unwrap();

    let report = with_timeout(harness.executor(graph, fast_options(limit, 0)).run(context())).await;
    (report, log)
}

fn assert_fan_in_waits_for_every_root(log: &StatementLog) {
    let started = log
        .position(&StatementEvent::Started(create("fan_in")))
        .expect("fan_in never started");
    for name in ROOTS {
        let finished = log
            .position(&StatementEvent::Finished(create(name)))
            .unwrap_or_else(|| panic!("{name} never finished"));
        assert!(finished < started, "fan_in started before {name} finished");
    }
}

#[tokio::test]
async fn active_task_limit_caps_parallel_batch_members() {
    let (report, log) = run_fan_in(2).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(log.peak(), 2);
    assert_fan_in_waits_for_every_root(&log);
}

#[tokio::test]
async fn whole_batch_runs_in_parallel_when_the_limit_allows() {
    let (report, log) = run_fan_in(4).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(log.peak(), 4);
    assert_fan_in_waits_for_every_root(&log);
}

#[tokio::test]
async fn sequential_limit_runs_one_statement_at_a_time() {
    let (report, log) = run_fan_in(1).await;

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(log.peak(), 1);
    assert_fan_in_waits_for_every_root(&log);
}

#[tokio::test]
async fn backoff_does_not_hold_an_active_task_slot() {
    init_tracing();
    // The first connect fails, so whichever task checks out first retries.
    let flaky = FlakyConnector::new(MemoryWarehouse::new(), 1);
    let recording = RecordingConnector::new(flaky, Duration::ZERO);
    let log = recording.log();
    let harness = Harness::new(2).with_connector(Arc::new(recording), 2);

    let mut graph = Graph::new();
    graph.add_task(sql_task("a", &create("a")), &[]).unwrap();
    graph.add_task(sql_task("b", &create("b")), &[]).unwrap();

    let options = ExecutorOptions {
        max_active_tasks: 1,
        retries: 1,
        retry_delay: Duration::from_millis(300),
        max_retry_delay: Duration::from_millis(300),
    };
    let report = with_timeout(harness.executor(graph, options).run(context())).await;
    assert_eq!(report.status, RunStatus::Completed);

    let (retried, other) = if report.task("a").unwrap().attempts == 2 {
        ("a", "b")
    } else {
        ("b", "a")
    };
    assert_eq!(report.task(retried).unwrap().attempts, 2);
    assert_eq!(report.task(other).unwrap().attempts, 1);

    // The other task ran while the retrying one was sleeping.
    let other_at = log.position(&StatementEvent::Started(create(other))).unwrap();
    let retried_at = log.position(&StatementEvent::Started(create(retried))).unwrap();
    assert!(other_at < retried_at, "events: {:?}", log.events());
}
