// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use tracing::debug;

use crate::config::PipelineConfig;
use crate::config::validate::validate_task_graph;
use crate::dag::Task;
use crate::errors::GraphError;
use crate::types::TaskId;

/// Internal node structure: the task plus immediate upstream/downstream
/// neighbours, as indices into `Graph::nodes`.
#[derive(Debug, Clone)]
struct Node {
    task: Task,
    upstream: Vec<usize>,
    downstream: Vec<usize>,
}

/// Directed acyclic graph of tasks, in insertion order.
///
/// Edges point from an upstream task to the tasks that wait for it. All
/// orderings produced here break ties by insertion order, so the same
/// definition always yields the same plan.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    index: HashMap<TaskId, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` after the tasks named in `upstream`.
    ///
    /// Upstream tasks must already be registered, which keeps the graph
    /// acyclic by construction; a task naming itself is reported as a
    /// cycle. Repeated upstream ids are collapsed.
    pub fn add_task(&mut self, task: Task, upstream: &[&str]) -> Result<(), GraphError> {
        if self.index.contains_key(&task.id) {
            return Err(GraphError::Duplicate(task.id));
        }

        let mut upstream_idx = Vec::with_capacity(upstream.len());
        for up in upstream {
            if *up == task.id {
                return Err(GraphError::Cycle(task.id));
            }
            let idx = self
                .index
                .get(*up)
                .copied()
                .ok_or_else(|| GraphError::UnknownUpstream {
                    task: task.id.clone(),
                    upstream: up.to_string(),
                })?;
            if !upstream_idx.contains(&idx) {
                upstream_idx.push(idx);
            }
        }

        let idx = self.nodes.len();
        for &up in &upstream_idx {
            self.nodes[up].downstream.push(idx);
        }
        debug!(task = %task.id, upstream = ?upstream, "registered task");
        self.index.insert(task.id.clone(), idx);
        self.nodes.push(Node {
            task,
            upstream: upstream_idx,
            downstream: Vec::new(),
        });

        Ok(())
    }

    /// Build the graph from a pipeline definition.
    ///
    /// Tasks may name upstreams defined later in the file; the whole edge
    /// set is validated before anything is inserted.
    pub fn from_config(cfg: &PipelineConfig) -> Result<Self, GraphError> {
        validate_task_graph(&cfg.tasks)?;

        let mut graph = Graph::new();
        for tc in &cfg.tasks {
            let idx = graph.nodes.len();
            graph.index.insert(tc.id.clone(), idx);
            graph.nodes.push(Node {
                task: tc.to_task(),
                upstream: Vec::new(),
                downstream: Vec::new(),
            });
        }

        for (idx, tc) in cfg.tasks.iter().enumerate() {
            for up in &tc.after {
                let up_idx = graph.index[up];
                if !graph.nodes[idx].upstream.contains(&up_idx) {
                    graph.nodes[idx].upstream.push(up_idx);
                    graph.nodes[up_idx].downstream.push(idx);
                }
            }
        }

        Ok(graph)
    }

    /// Every task after all of its upstreams, ties broken by insertion
    /// order.
    pub fn topological_order(&self) -> Result<Vec<TaskId>, GraphError> {
        let mut indegree: Vec<usize> = self.nodes.iter().map(|n| n.upstream.len()).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(self.nodes[idx].task.id.clone());
            for &down in &self.nodes[idx].downstream {
                indegree[down] -= 1;
                if indegree[down] == 0 {
                    ready.push(Reverse(down));
                }
            }
        }

        if order.len() != self.nodes.len() {
            let stuck = indegree
                .iter()
                .position(|d| *d > 0)
                .map(|i| self.nodes[i].task.id.clone())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }

        Ok(order)
    }

    /// Tasks not in `completed` whose upstreams are all in `completed`, in
    /// insertion order.
    pub fn ready_tasks(&self, completed: &HashSet<TaskId>) -> Vec<TaskId> {
        self.nodes
            .iter()
            .filter(|n| !completed.contains(&n.task.id))
            .filter(|n| {
                n.upstream
                    .iter()
                    .all(|&up| completed.contains(&self.nodes[up].task.id))
            })
            .map(|n| n.task.id.clone())
            .collect()
    }

    /// Tasks without upstreams.
    pub fn roots(&self) -> Vec<TaskId> {
        self.ready_tasks(&HashSet::new())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.nodes[i].task)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All tasks in insertion order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.nodes.iter().map(|n| &n.task)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Immediate upstreams of `id`.
    pub fn upstream_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, |n| &n.upstream)
    }

    /// Immediate downstreams of `id`.
    pub fn downstream_of(&self, id: &str) -> Vec<&str> {
        self.neighbours(id, |n| &n.downstream)
    }

    /// Every task reachable downstream of `id`, in insertion order.
    pub fn descendants(&self, id: &str) -> Vec<TaskId> {
        let Some(&start) = self.index.get(id) else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = self.nodes[start].downstream.iter().copied().collect();
        while let Some(idx) = queue.pop_front() {
            if seen.insert(idx) {
                queue.extend(self.nodes[idx].downstream.iter().copied());
            }
        }

        let mut found: Vec<usize> = seen.into_iter().collect();
        found.sort_unstable();
        found
            .into_iter()
            .map(|i| self.nodes[i].task.id.clone())
            .collect()
    }

    fn neighbours(&self, id: &str, edges: impl Fn(&Node) -> &Vec<usize>) -> Vec<&str> {
        self.index
            .get(id)
            .map(|&i| {
                edges(&self.nodes[i])
                    .iter()
                    .map(|&j| self.nodes[j].task.id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }
}
