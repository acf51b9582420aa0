// src/engine/executor.rs

//! Async shell around [`RunState`].
//!
//! Each batch of ready tasks runs on a `JoinSet`. A task attempt checks
//! out its own warehouse session, then runs its synchronous body on the
//! blocking pool. Connection errors are retried with exponential backoff;
//! everything else fails the task at once.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::credentials::CredentialProvider;
use crate::dag::{Graph, Task};
use crate::engine::core::RunState;
use crate::engine::report::{RunReport, TaskReport};
use crate::engine::{RunStatus, TaskStatus};
use crate::storage::ObjectStore;
use crate::tasks::{TaskEnv, TaskError, TaskMetrics};
use crate::types::TaskId;
use crate::warehouse::{Warehouse, WarehousePool};

/// Knobs for a run.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Tasks of one batch running at the same time.
    pub max_active_tasks: usize,
    /// Retries for connection errors, unless a task overrides it.
    pub retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            max_active_tasks: 4,
            retries: 3,
            retry_delay: Duration::from_secs(5 * 60),
            max_retry_delay: Duration::from_secs(60 * 60),
        }
    }
}

impl ExecutorOptions {
    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(31);
        self.retry_delay
            .saturating_mul(factor)
            .min(self.max_retry_delay)
    }
}

/// Runs a [`Graph`] once per call to [`run`](Executor::run).
pub struct Executor {
    pipeline: String,
    graph: Arc<Graph>,
    pool: Arc<WarehousePool>,
    store: Arc<dyn ObjectStore>,
    credentials: Arc<dyn CredentialProvider>,
    options: ExecutorOptions,
}

impl Executor {
    pub fn new(
        graph: Arc<Graph>,
        pool: Arc<WarehousePool>,
        store: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            pipeline: "pipeline".to_string(),
            graph,
            pool,
            store,
            credentials,
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_pipeline_name(mut self, name: impl Into<String>) -> Self {
        self.pipeline = name.into();
        self
    }

    pub fn options(&self) -> &ExecutorOptions {
        &self.options
    }

    /// Execute the whole graph for one run and report every task's
    /// terminal state.
    pub async fn run(&self, context: RunContext) -> RunReport {
        let started_at = Utc::now();
        let context = Arc::new(context);
        let limiter = Arc::new(Semaphore::new(self.options.max_active_tasks.max(1)));

        info!(
            pipeline = %self.pipeline,
            run_id = %context.run_id(),
            logical_date = %context.logical_date(),
            tasks = self.graph.len(),
            "starting pipeline run"
        );

        let mut state = RunState::new(Arc::clone(&self.graph));
        let mut outcomes: HashMap<TaskId, Attempted> = HashMap::new();

        loop {
            let batch = state.next_batch();
            if batch.is_empty() {
                break;
            }

            let mut set = JoinSet::new();
            let mut spawned: HashMap<tokio::task::Id, TaskId> = HashMap::new();

            for id in batch {
                let Some(task) = self.graph.get(&id) else {
                    continue;
                };
                let job = TaskJob {
                    task: task.clone(),
                    context: Arc::clone(&context),
                    pool: Arc::clone(&self.pool),
                    store: Arc::clone(&self.store),
                    credentials: Arc::clone(&self.credentials),
                    options: self.options,
                };
                let handle = set.spawn(job.run(Arc::clone(&limiter)));
                spawned.insert(handle.id(), id);
            }

            while let Some(joined) = set.join_next_with_id().await {
                let attempted = match joined {
                    Ok((_, attempted)) => attempted,
                    Err(join_err) => {
                        let Some(id) = spawned.get(&join_err.id()).cloned() else {
                            error!(error = %join_err, "lost track of a finished task");
                            continue;
                        };
                        Attempted {
                            id,
                            attempts: 1,
                            duration: Duration::ZERO,
                            result: Err(TaskError::Panicked(join_err.to_string())),
                        }
                    }
                };

                match &attempted.result {
                    Ok(_) => state.record_success(&attempted.id),
                    Err(_) => {
                        state.record_failure(&attempted.id);
                    }
                }
                outcomes.insert(attempted.id.clone(), attempted);
            }
        }

        let status = state.finish();
        let report = self.build_report(&state, &context, outcomes, started_at, status);

        match status {
            RunStatus::Completed => info!(
                pipeline = %self.pipeline,
                run_id = %context.run_id(),
                "pipeline run completed"
            ),
            _ => error!(
                pipeline = %self.pipeline,
                run_id = %context.run_id(),
                failed = ?report.tasks_with(TaskStatus::Failed),
                skipped = ?report.tasks_with(TaskStatus::Skipped),
                "pipeline run failed"
            ),
        }

        report
    }

    fn build_report(
        &self,
        state: &RunState,
        context: &RunContext,
        mut outcomes: HashMap<TaskId, Attempted>,
        started_at: chrono::DateTime<Utc>,
        status: RunStatus,
    ) -> RunReport {
        // Incremental insertion keeps the graph acyclic, so this only falls
        // back to insertion order for graphs that were never validated.
        let order = self
            .graph
            .topological_order()
            .unwrap_or_else(|_| self.graph.tasks().map(|t| t.id.clone()).collect());

        let tasks = order
            .into_iter()
            .filter_map(|id| {
                let task = self.graph.get(&id)?;
                let status = state.status_of(&id).unwrap_or(TaskStatus::Pending);
                let attempted = outcomes.remove(&id);
                let (attempts, duration_ms, metrics, error) = match attempted {
                    Some(a) => {
                        let ms = a.duration.as_millis() as u64;
                        match a.result {
                            Ok(m) => (a.attempts, ms, Some(m), None),
                            Err(e) => (a.attempts, ms, None, Some(e)),
                        }
                    }
                    None => (0, 0, None, None),
                };
                Some(TaskReport {
                    id,
                    kind: task.kind.name().to_string(),
                    status,
                    attempts,
                    duration_ms,
                    metrics,
                    error,
                })
            })
            .collect();

        RunReport {
            pipeline: self.pipeline.clone(),
            run_id: context.run_id().to_string(),
            logical_date: context.logical_date(),
            status,
            started_at,
            finished_at: Utc::now(),
            tasks,
        }
    }
}

/// Result of all attempts of one task.
#[derive(Debug)]
struct Attempted {
    id: TaskId,
    attempts: u32,
    duration: Duration,
    result: Result<TaskMetrics, TaskError>,
}

/// Everything one task needs, owned so it can move onto the runtime.
struct TaskJob {
    task: Task,
    context: Arc<RunContext>,
    pool: Arc<WarehousePool>,
    store: Arc<dyn ObjectStore>,
    credentials: Arc<dyn CredentialProvider>,
    options: ExecutorOptions,
}

impl TaskJob {
    async fn run(self, limiter: Arc<Semaphore>) -> Attempted {
        let id = self.task.id.clone();
        let run_id = self.context.run_id().to_string();
        let retries = self.task.retries.unwrap_or(self.options.retries);

        let started = Instant::now();
        let mut attempt = 0u32;
        loop {
            // The slot is held for one attempt only, not across the backoff.
            let Ok(slot) = Arc::clone(&limiter).acquire_owned().await else {
                return Attempted {
                    id,
                    attempts: attempt,
                    duration: started.elapsed(),
                    result: Err(TaskError::Connection("executor shut down".to_string())),
                };
            };

            attempt += 1;
            info!(task = %id, run_id = %run_id, attempt, kind = self.task.kind.name(), "starting task");

            let result = self.attempt().await;
            drop(slot);
            match result {
                Err(err) if err.is_retryable() && attempt <= retries => {
                    let delay = self.options.backoff(attempt);
                    warn!(
                        task = %id,
                        run_id = %run_id,
                        attempt,
                        retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "task failed with a connection error; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => {
                    match &result {
                        Ok(metrics) => info!(
                            task = %id,
                            run_id = %run_id,
                            attempt,
                            status = "succeeded",
                            statements = metrics.statements,
                            "task finished"
                        ),
                        Err(err) => error!(
                            task = %id,
                            run_id = %run_id,
                            attempt,
                            status = "failed",
                            error = %err,
                            "task finished"
                        ),
                    }
                    return Attempted {
                        id,
                        attempts: attempt,
                        duration: started.elapsed(),
                        result,
                    };
                }
            }
        }
    }

    /// One attempt: check out a session, run the body on the blocking pool.
    async fn attempt(&self) -> Result<TaskMetrics, TaskError> {
        let mut conn = if self.task.kind.needs_warehouse() {
            Some(self.pool.checkout().await?)
        } else {
            None
        };

        let task = self.task.clone();
        let context = Arc::clone(&self.context);
        let store = Arc::clone(&self.store);
        let credentials = Arc::clone(&self.credentials);

        let handle = tokio::task::spawn_blocking(move || {
            let env = TaskEnv {
                context: &context,
                store: store.as_ref(),
                credentials: credentials.as_ref(),
            };
            let result = {
                let warehouse: Option<&mut dyn Warehouse> = match conn.as_mut() {
                    Some(c) => Some(&mut **c),
                    None => None,
                };
                task.kind.run(&env, warehouse)
            };
            if let (Err(TaskError::Connection(_)), Some(c)) = (&result, conn.as_mut()) {
                c.mark_broken();
            }
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => Err(TaskError::Panicked(panic_message(err.into_panic()))),
            Err(err) => Err(TaskError::Panicked(err.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
