// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod storage;
pub mod tasks;
pub mod types;
pub mod warehouse;

use std::fs;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::PipelineConfig;
use crate::config::loader::load_and_validate;
use crate::context::RunContext;
use crate::credentials::EnvCredentialProvider;
use crate::dag::Graph;
use crate::engine::{Executor, ExecutorOptions};
use crate::storage::LocalObjectStore;
use crate::warehouse::{MemoryWarehouse, WarehousePool};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - definition loading and validation
/// - the task graph
/// - object store, warehouse pool and credentials
/// - the executor, and report output
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading pipeline definition {}", args.config.display()))?;

    let context = build_context(&cfg, &args);
    let graph = Arc::new(Graph::from_config(&cfg)?);

    if args.dry_run {
        print_dry_run(&cfg, &graph, &context)?;
        return Ok(());
    }

    let root = args.data_dir.clone().unwrap_or_else(|| cfg.storage_root());
    info!(root = %root.display(), "using local object store");
    let store = Arc::new(LocalObjectStore::new(root));

    let warehouse = MemoryWarehouse::new().with_object_store(store.clone());
    let pool = WarehousePool::new(Arc::new(warehouse), cfg.warehouse.pool_size);

    let executor = Executor::new(graph, pool, store, Arc::new(EnvCredentialProvider))
        .with_pipeline_name(cfg.pipeline.name.clone())
        .with_options(executor_options(&cfg, args.sequential));

    let report = executor.run(context).await;
    print!("{}", report.render_table());

    if let Some(path) = &args.report {
        let json = report.to_json_pretty()?;
        fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
        debug!(path = %path.display(), "wrote run report");
    }

    if !report.succeeded() {
        bail!(
            "pipeline run {} failed (failed tasks: {:?})",
            report.run_id,
            report.tasks_with(engine::TaskStatus::Failed)
        );
    }
    Ok(())
}

/// Run context from the definition's default params and the CLI flags.
pub fn build_context(cfg: &PipelineConfig, args: &CliArgs) -> RunContext {
    let mut context = RunContext::new(args.logical_date())
        .with_params(cfg.pipeline.params.clone())
        .with_params(args.params.clone());
    if let Some(run_id) = &args.run_id {
        context = context.with_run_id(run_id.clone());
    }
    context
}

/// Executor options from `[pipeline]`/`[warehouse]`, `--sequential` wins.
pub fn executor_options(cfg: &PipelineConfig, sequential: bool) -> ExecutorOptions {
    ExecutorOptions {
        max_active_tasks: if sequential { 1 } else { cfg.max_active_tasks() },
        retries: cfg.pipeline.retries,
        retry_delay: cfg.retry_delay,
        max_retry_delay: cfg.max_retry_delay,
    }
}

/// Print the validated plan in execution order; nothing runs.
fn print_dry_run(cfg: &PipelineConfig, graph: &Graph, context: &RunContext) -> Result<()> {
    println!("stardag dry-run: {}", cfg.pipeline.name);
    if let Some(desc) = &cfg.pipeline.description {
        println!("  {desc}");
    }
    println!("  run_id = {}", context.run_id());
    println!("  logical_date = {}", context.logical_date());
    println!("  retries = {}", cfg.pipeline.retries);
    println!("  max_active_tasks = {}", cfg.max_active_tasks());
    println!("  warehouse.pool_size = {}", cfg.warehouse.pool_size);
    println!();

    let order = graph.topological_order()?;
    println!("tasks ({}):", order.len());
    for (i, id) in order.iter().enumerate() {
        let Some(task) = graph.get(id) else {
            continue;
        };
        println!("  {:>2}. {} [{}]", i + 1, id, task.kind.name());
        let summary = task.kind.summary();
        if !summary.is_empty() {
            println!("      {summary}");
        }
        let upstream = graph.upstream_of(id);
        if !upstream.is_empty() {
            println!("      after: {upstream:?}");
        }
        if let Some(retries) = task.retries {
            println!("      retries: {retries}");
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
