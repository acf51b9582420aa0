// src/warehouse/mod.rs

//! Warehouse client abstraction.
//!
//! - [`Warehouse`] is a single synchronous session: `execute` and
//!   `execute_scalar`.
//! - [`Connector`] opens sessions; [`pool::WarehousePool`] hands them out
//!   to tasks, one session per task execution.
//! - [`memory::MemoryWarehouse`] is an in-process warehouse that
//!   understands the statements the tasks issue.

use std::cmp::Ordering;
use std::fmt::{self, Debug};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::StorageError;

pub mod memory;
pub mod pool;

pub use memory::{MemoryWarehouse, Table};
pub use pool::{PooledConnection, WarehousePool};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WarehouseError {
    #[error("warehouse connection error: {0}")]
    Connection(String),

    #[error("unsupported statement: {0}")]
    Unsupported(String),

    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("invalid statement: {0}")]
    Invalid(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A single scalar value as returned by the warehouse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Ordering between two values, coercing between `Int` and `Float`.
    ///
    /// `None` when either side is `Null` or the types are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Text(other.to_string()),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

/// Result set of a statement. DDL/DML statements return no columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Rows {
    pub fn empty() -> Self {
        Self::default()
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|r| r.first())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// One warehouse session.
pub trait Warehouse: Send {
    /// Execute a single statement and return its result set.
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError>;

    /// Execute a query expected to return a single scalar.
    ///
    /// Returns `Ok(None)` when the query produced no rows.
    fn execute_scalar(&mut self, sql: &str) -> Result<Option<Value>, WarehouseError> {
        let rows = self.execute(sql)?;
        Ok(rows.rows.into_iter().next().and_then(|r| r.into_iter().next()))
    }
}

/// Opens new warehouse sessions.
pub trait Connector: Send + Sync + Debug {
    fn connect(&self) -> Result<Box<dyn Warehouse>, WarehouseError>;
}

/// Split a SQL script into individual statements on `;`, ignoring
/// separators inside single-quoted literals. Empty statements are dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    split_top_level(script, ';')
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split `s` on `sep` where it appears outside parentheses and quotes.
pub(crate) fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_quote = false;
    let mut start = 0;

    for (i, c) in s.char_indices() {
        match c {
            '\'' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => depth -= 1,
            c if c == sep && depth == 0 && !in_quote => {
                parts.push(&s[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
