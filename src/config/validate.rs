// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::config::model::{PipelineConfig, RawPipelineFile, TaskConfig};
use crate::errors::{GraphError, Result, StardagError};
use crate::tasks::TaskKind;
use crate::types::parse_duration;

impl TryFrom<RawPipelineFile> for PipelineConfig {
    type Error = StardagError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_tasks(&raw)?;
        let (retry_delay, max_retry_delay) = validate_pipeline_section(&raw)?;
        validate_warehouse_section(&raw)?;
        validate_task_definitions(&raw.tasks)?;
        validate_task_graph(&raw.tasks)?;
        Ok(PipelineConfig::new_unchecked(raw, retry_delay, max_retry_delay))
    }
}

fn ensure_has_tasks(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.tasks.is_empty() {
        return Err(StardagError::ConfigError(
            "pipeline must contain at least one [[task]] entry".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(
    cfg: &RawPipelineFile,
) -> Result<(std::time::Duration, std::time::Duration)> {
    let section = &cfg.pipeline;

    let retry_delay = parse_duration(&section.retry_delay).map_err(|e| {
        StardagError::ConfigError(format!("[pipeline].retry_delay: {e}"))
    })?;
    let max_retry_delay = parse_duration(&section.max_retry_delay).map_err(|e| {
        StardagError::ConfigError(format!("[pipeline].max_retry_delay: {e}"))
    })?;

    if max_retry_delay < retry_delay {
        return Err(StardagError::ConfigError(format!(
            "[pipeline].max_retry_delay ({}) must not be shorter than retry_delay ({})",
            section.max_retry_delay, section.retry_delay
        )));
    }

    if section.max_active_tasks == Some(0) {
        return Err(StardagError::ConfigError(
            "[pipeline].max_active_tasks must be >= 1 (got 0)".to_string(),
        ));
    }

    Ok((retry_delay, max_retry_delay))
}

fn validate_warehouse_section(cfg: &RawPipelineFile) -> Result<()> {
    if cfg.warehouse.pool_size == 0 {
        return Err(StardagError::ConfigError(
            "[warehouse].pool_size must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

/// Per-kind checks that do not depend on the run.
///
/// Load modes are only checked when the task runs; a bad mode here is
/// logged but does not reject the definition.
fn validate_task_definitions(tasks: &[TaskConfig]) -> Result<()> {
    for task in tasks {
        if task.id.trim().is_empty() {
            return Err(StardagError::ConfigError(
                "every [[task]] needs a non-empty `id`".to_string(),
            ));
        }

        let require = |field: &str, value: &str| -> Result<()> {
            if value.trim().is_empty() {
                return Err(StardagError::ConfigError(format!(
                    "task '{}' has an empty `{}`",
                    task.id, field
                )));
            }
            Ok(())
        };

        match &task.kind {
            TaskKind::Staging(t) => {
                require("table", &t.table)?;
                require("bucket", &t.bucket)?;
                require("credentials", &t.credentials)?;
            }
            TaskKind::FactLoad(t) | TaskKind::DimensionLoad(t) => {
                require("table", &t.table)?;
                require("sql", &t.sql)?;
                if let Err(e) = t.mode.parse::<crate::types::LoadMode>() {
                    warn!(task = %task.id, error = %e, "load task will fail at run time");
                }
            }
            TaskKind::QualityCheck(t) => {
                if t.check_count() == 0 {
                    return Err(StardagError::ConfigError(format!(
                        "quality check task '{}' has no checks",
                        task.id
                    )));
                }
            }
            TaskKind::Sql(t) => require("sql", &t.sql)?,
            TaskKind::Marker => {}
        }
    }
    Ok(())
}

/// Duplicate ids, self-dependencies, unknown upstreams and cycles.
pub fn validate_task_graph(tasks: &[TaskConfig]) -> std::result::Result<(), GraphError> {
    let mut ids: HashSet<&str> = HashSet::new();
    for task in tasks {
        if !ids.insert(task.id.as_str()) {
            return Err(GraphError::Duplicate(task.id.clone()));
        }
    }

    for task in tasks {
        for up in &task.after {
            if *up == task.id {
                return Err(GraphError::Cycle(task.id.clone()));
            }
            if !ids.contains(up.as_str()) {
                return Err(GraphError::UnknownUpstream {
                    task: task.id.clone(),
                    upstream: up.clone(),
                });
            }
        }
    }

    // Edge direction: upstream -> task. For `after = ["A"]` on B we add A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for task in tasks {
        graph.add_node(task.id.as_str());
    }
    for task in tasks {
        for up in &task.after {
            graph.add_edge(up.as_str(), task.id.as_str(), ());
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphError::Cycle(cycle.node_id().to_string())),
    }
}
