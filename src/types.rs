// src/types.rs

//! Small shared enums and parsers used by config and tasks.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::warehouse::Value;

/// Canonical task identity type used throughout the crate.
pub type TaskId = String;

/// How a fact or dimension load treats rows already in the target table.
///
/// - `Append`: insert the query result on top of whatever is there.
///   Running it twice duplicates rows.
/// - `TruncateInsert`: clear the table, then insert. Idempotent for the
///   same source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Append,
    TruncateInsert,
}

impl FromStr for LoadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "append" => Ok(LoadMode::Append),
            "truncate-insert" | "truncate_insert" => Ok(LoadMode::TruncateInsert),
            other => Err(format!(
                "invalid load mode '{other}' (expected \"append\" or \"truncate-insert\")"
            )),
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadMode::Append => f.write_str("append"),
            LoadMode::TruncateInsert => f.write_str("truncate-insert"),
        }
    }
}

/// Comparison applied between a quality check's actual and expected value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    #[default]
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Eq => "=",
            Comparison::Ne => "<>",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        };
        f.write_str(op)
    }
}

impl Comparison {
    /// Whether `actual <op> expected` holds. Comparisons against `NULL`
    /// never hold.
    pub fn holds(&self, actual: &Value, expected: &Value) -> bool {
        use std::cmp::Ordering::*;

        let Some(ord) = actual.compare(expected) else {
            return false;
        };
        match self {
            Comparison::Eq => ord == Equal,
            Comparison::Ne => ord != Equal,
            Comparison::Gt => ord == Greater,
            Comparison::Ge => ord != Less,
            Comparison::Lt => ord == Less,
            Comparison::Le => ord != Greater,
        }
    }

    /// Map a SQL comparison operator onto a `Comparison`.
    pub fn from_sql_op(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Comparison::Eq),
            "<>" | "!=" => Some(Comparison::Ne),
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Ge),
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Le),
            _ => None,
        }
    }
}

/// Parse a duration string such as `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' missing unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    let secs_per_unit = match unit.as_str() {
        "ms" => return Ok(Duration::from_millis(value)),
        "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "unsupported duration unit '{unit}'; expected ms, s, m, or h"
            ));
        }
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is out of range"))
}
