// src/errors.rs

//! Crate-wide error types.
//!
//! Task-level failures live in [`crate::tasks::TaskError`]; warehouse and
//! storage errors live next to their traits. This module holds the errors
//! that stop a pipeline from being built at all.

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum StardagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Graph(#[from] GraphError),

}

/// Errors raised while building or ordering the task graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("cycle detected in task DAG involving task '{0}'")]
    Cycle(TaskId),

    #[error("task '{0}' is already registered")]
    Duplicate(TaskId),

    #[error("task '{task}' has unknown upstream '{upstream}'")]
    UnknownUpstream { task: TaskId, upstream: TaskId },
}

/// Errors raised while rendering a template against a run context.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template field '{field}' in '{template}'")]
    UnknownField { field: String, template: String },

    #[error("malformed template '{template}': {reason}")]
    Malformed { template: String, reason: String },
}

pub type Result<T> = std::result::Result<T, StardagError>;
