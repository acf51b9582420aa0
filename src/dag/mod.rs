// src/dag/mod.rs

//! Task graph.
//!
//! - [`task`] holds the task record (identity, kind, retry override).
//! - [`graph`] holds the validated DAG with topological ordering and
//!   ready-set computation.

pub mod graph;
pub mod task;

pub use graph::Graph;
pub use task::Task;
