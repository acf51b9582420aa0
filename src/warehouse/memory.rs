// src/warehouse/memory.rs

//! In-process warehouse.
//!
//! Understands the statement shapes the pipeline tasks issue:
//!
//! - `CREATE TABLE [IF NOT EXISTS] t (col type, ...)`
//! - `DROP TABLE [IF EXISTS] t`
//! - `DELETE FROM t`, `TRUNCATE [TABLE] t`
//! - `INSERT INTO t [(cols)] SELECT ...`
//! - `COPY t FROM 's3://bucket/prefix' ... JSON 'auto' | 's3://bucket/jsonpaths'`
//! - `SELECT [DISTINCT] *|COUNT(*)|col [AS alias], ... FROM t
//!   [WHERE cond AND cond ...]` with `col IS [NOT] NULL` and
//!   `col <op> literal` conditions.
//!
//! Identifiers are case-insensitive and stored lower-cased. Columns are
//! untyped.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, LazyLock, Mutex};

use regex::Regex;
use tracing::{debug, trace};

use super::{Connector, Rows, Value, Warehouse, WarehouseError, split_top_level};
use crate::storage::{ObjectLocation, ObjectStore, StorageError};
use crate::types::Comparison;

fn statement_re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("statement pattern must compile")
}

const IDENT: &str = r"[A-Za-z_][A-Za-z0-9_]*";

static CREATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(
        r"(?is)^CREATE\s+TABLE\s+(IF\s+NOT\s+EXISTS\s+)?({IDENT})\s*\((.*)\)$"
    ))
});
static DROP_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(r"(?is)^DROP\s+TABLE\s+(IF\s+EXISTS\s+)?({IDENT})$"))
});
static CLEAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(
        r"(?is)^(?:DELETE\s+FROM|TRUNCATE(?:\s+TABLE)?)\s+({IDENT})$"
    ))
});
static INSERT_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(
        r"(?is)^INSERT\s+INTO\s+({IDENT})\s*(?:\(([^)]*)\))?\s*(SELECT\b.*)$"
    ))
});
static COPY_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(r"(?is)^COPY\s+({IDENT})\s+FROM\s+'([^']*)'(.*)$"))
});
static COPY_JSON_RE: LazyLock<Regex> =
    LazyLock::new(|| statement_re(r"(?is)\bJSON\s+'([^']*)'"));
static SELECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(
        r"(?is)^SELECT\s+(DISTINCT\s+)?(.+?)\s+FROM\s+({IDENT})(?:\s+WHERE\s+(.+))?$"
    ))
});
static ITEM_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(
        r"(?is)^(COUNT\s*\(\s*\*\s*\)|\*|{IDENT})(?:\s+(?:AS\s+)?({IDENT}))?$"
    ))
});
static AND_RE: LazyLock<Regex> = LazyLock::new(|| statement_re(r"(?i)\s+AND\s+"));
static IS_NULL_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(r"(?is)^({IDENT})\s+IS\s+(NOT\s+)?NULL$"))
});
static COMPARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    statement_re(&format!(r"(?is)^({IDENT})\s*(=|<>|!=|>=|<=|>|<)\s*(.+)$"))
});

/// A table: column names plus untyped rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_lowercase()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.columns.iter().position(|c| *c == name)
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

#[derive(Debug, Default)]
struct Database {
    tables: BTreeMap<String, Table>,
}

impl Database {
    fn table(&self, name: &str) -> Result<&Table, WarehouseError> {
        self.tables
            .get(&name.to_lowercase())
            .ok_or_else(|| WarehouseError::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table, WarehouseError> {
        self.tables
            .get_mut(&name.to_lowercase())
            .ok_or_else(|| WarehouseError::UnknownTable(name.to_string()))
    }
}

/// In-process warehouse shared by all of its sessions.
///
/// Clones share the same tables. `COPY` reads from the configured object
/// store.
#[derive(Debug, Clone, Default)]
pub struct MemoryWarehouse {
    db: Arc<Mutex<Database>>,
    store: Option<Arc<dyn ObjectStore>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Create (or replace) an empty table.
    pub fn create_table(&self, name: &str, columns: &[&str]) {
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.tables.insert(name.to_lowercase(), Table::new(columns));
    }

    /// Append rows positionally to an existing table.
    pub fn insert_rows(&self, name: &str, rows: Vec<Vec<Value>>) -> Result<(), WarehouseError> {
        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        let table = db.table_mut(name)?;
        let width = table.columns.len();
        for mut row in rows {
            if row.len() > width {
                return Err(WarehouseError::Invalid(format!(
                    "row has {} values but table '{}' has {} columns",
                    row.len(),
                    name,
                    width
                )));
            }
            row.resize(width, Value::Null);
            table.rows.push(row);
        }
        Ok(())
    }

    /// Snapshot of a table.
    pub fn table(&self, name: &str) -> Option<Table> {
        let db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        db.tables.get(&name.to_lowercase()).cloned()
    }

    /// Number of rows in a table, 0 when it does not exist.
    pub fn row_count(&self, name: &str) -> usize {
        self.table(name).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Every statement executed through any session, in order.
    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear_statements(&self) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Open a session directly, without going through a pool.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            db: Arc::clone(&self.db),
            store: self.store.clone(),
            log: Arc::clone(&self.log),
        }
    }
}

impl Connector for MemoryWarehouse {
    fn connect(&self) -> Result<Box<dyn Warehouse>, WarehouseError> {
        Ok(Box::new(self.session()))
    }
}

/// One session on a [`MemoryWarehouse`]. Each statement runs atomically.
#[derive(Debug)]
pub struct MemorySession {
    db: Arc<Mutex<Database>>,
    store: Option<Arc<dyn ObjectStore>>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Warehouse for MemorySession {
    fn execute(&mut self, sql: &str) -> Result<Rows, WarehouseError> {
        let stmt = sql.trim().trim_end_matches(';').trim();
        trace!(sql = %stmt, "memory warehouse executing statement");
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stmt.to_string());

        let mut db = self.db.lock().unwrap_or_else(|e| e.into_inner());
        execute_statement(&mut db, self.store.as_deref(), stmt)
    }
}

fn execute_statement(
    db: &mut Database,
    store: Option<&dyn ObjectStore>,
    stmt: &str,
) -> Result<Rows, WarehouseError> {
    if let Some(c) = CREATE_RE.captures(stmt) {
        return create_table(db, c.get(1).is_some(), &c[2], &c[3]);
    }
    if let Some(c) = DROP_RE.captures(stmt) {
        let name = c[2].to_lowercase();
        if db.tables.remove(&name).is_none() && c.get(1).is_none() {
            return Err(WarehouseError::UnknownTable(name));
        }
        return Ok(Rows::empty());
    }
    if let Some(c) = CLEAR_RE.captures(stmt) {
        db.table_mut(&c[1])?.rows.clear();
        return Ok(Rows::empty());
    }
    if let Some(c) = INSERT_RE.captures(stmt) {
        let columns = c.get(2).map(|m| m.as_str());
        return insert_select(db, &c[1], columns, &c[3]);
    }
    if let Some(c) = COPY_RE.captures(stmt) {
        let descriptor = COPY_JSON_RE
            .captures(&c[3])
            .map(|j| j[1].to_string())
            .unwrap_or_else(|| "auto".to_string());
        let store = store.ok_or_else(|| {
            WarehouseError::Unsupported("COPY requires an object store".to_string())
        })?;
        return copy_json(db, store, &c[1], &c[2], &descriptor);
    }
    if SELECT_RE.is_match(stmt) {
        let query = parse_select(stmt)?;
        return run_select(db, &query);
    }

    Err(WarehouseError::Unsupported(stmt.to_string()))
}

fn create_table(
    db: &mut Database,
    if_not_exists: bool,
    name: &str,
    body: &str,
) -> Result<Rows, WarehouseError> {
    let name = name.to_lowercase();
    if db.tables.contains_key(&name) {
        if if_not_exists {
            return Ok(Rows::empty());
        }
        return Err(WarehouseError::Invalid(format!(
            "table '{name}' already exists"
        )));
    }

    const CONSTRAINTS: [&str; 5] = ["PRIMARY", "CONSTRAINT", "UNIQUE", "FOREIGN", "CHECK"];

    let mut columns = Vec::new();
    for part in split_top_level(body, ',') {
        let Some(first) = part.split_whitespace().next() else {
            continue;
        };
        if CONSTRAINTS.contains(&first.to_uppercase().as_str()) {
            continue;
        }
        columns.push(first.trim_matches('"').to_lowercase());
    }

    if columns.is_empty() {
        return Err(WarehouseError::Invalid(format!(
            "table '{name}' has no columns"
        )));
    }

    debug!(table = %name, ?columns, "memory warehouse created table");
    db.tables.insert(
        name,
        Table {
            columns,
            rows: Vec::new(),
        },
    );
    Ok(Rows::empty())
}

fn insert_select(
    db: &mut Database,
    table: &str,
    columns: Option<&str>,
    select: &str,
) -> Result<Rows, WarehouseError> {
    let query = parse_select(select)?;
    let result = run_select(db, &query)?;

    let target = db.table_mut(table)?;
    let target_cols: Vec<String> = match columns {
        Some(list) => list
            .split(',')
            .map(|c| c.trim().trim_matches('"').to_lowercase())
            .collect(),
        None => target.columns.clone(),
    };

    if result.columns.len() > target_cols.len() {
        return Err(WarehouseError::Invalid(format!(
            "INSERT INTO {} has {} target columns but the query returns {}",
            table,
            target_cols.len(),
            result.columns.len()
        )));
    }

    let mut indices = Vec::with_capacity(target_cols.len());
    for col in &target_cols {
        let idx = target
            .column_index(col)
            .ok_or_else(|| WarehouseError::UnknownColumn {
                table: table.to_string(),
                column: col.clone(),
            })?;
        indices.push(idx);
    }

    let width = target.columns.len();
    for row in result.rows {
        let mut full = vec![Value::Null; width];
        for (value, &idx) in row.into_iter().zip(indices.iter()) {
            full[idx] = value;
        }
        target.rows.push(full);
    }

    Ok(Rows::empty())
}

fn copy_json(
    db: &mut Database,
    store: &dyn ObjectStore,
    table: &str,
    source: &str,
    descriptor: &str,
) -> Result<Rows, WarehouseError> {
    let location = ObjectLocation::parse(source)?;
    let keys = location.list(store)?;
    if keys.is_empty() {
        return Err(StorageError::NotFound(location.to_string()).into());
    }

    let target = db.table_mut(table)?;
    let width = target.columns.len();

    let paths = if descriptor.eq_ignore_ascii_case("auto") {
        None
    } else {
        let paths = load_jsonpaths(store, descriptor)?;
        if paths.len() != width {
            return Err(WarehouseError::Invalid(format!(
                "jsonpaths file {} has {} paths but table '{}' has {} columns",
                descriptor,
                paths.len(),
                table,
                width
            )));
        }
        Some(paths)
    };

    let mut loaded = 0usize;
    for key in &keys {
        let bytes = store.get(&location.bucket, key)?;
        let text = String::from_utf8_lossy(&bytes);
        for record in serde_json::Deserializer::from_str(&text).into_iter::<serde_json::Value>() {
            let record = record.map_err(|e| {
                WarehouseError::Invalid(format!("s3://{}/{}: {}", location.bucket, key, e))
            })?;
            if !record.is_object() {
                return Err(WarehouseError::Invalid(format!(
                    "s3://{}/{}: expected JSON objects",
                    location.bucket, key
                )));
            }

            let row = match &paths {
                Some(paths) => paths
                    .iter()
                    .map(|p| Ok(json_path_get(&record, p)?.cloned().map(Value::from).unwrap_or(Value::Null)))
                    .collect::<Result<Vec<_>, WarehouseError>>()?,
                None => auto_row(&record, &target.columns),
            };
            target.rows.push(row);
            loaded += 1;
        }
    }

    debug!(table, objects = keys.len(), rows = loaded, "memory warehouse COPY complete");
    Ok(Rows::empty())
}

/// Map object keys onto table columns by case-insensitive name.
fn auto_row(record: &serde_json::Value, columns: &[String]) -> Vec<Value> {
    let by_name: HashMap<String, &serde_json::Value> = record
        .as_object()
        .map(|obj| obj.iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
        .unwrap_or_default();

    columns
        .iter()
        .map(|c| {
            by_name
                .get(c)
                .map(|v| Value::from((*v).clone()))
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn load_jsonpaths(store: &dyn ObjectStore, url: &str) -> Result<Vec<String>, WarehouseError> {
    let location = ObjectLocation::parse(url)?;
    let bytes = store.get(&location.bucket, &location.key)?;
    let doc: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| WarehouseError::Invalid(format!("jsonpaths file {url}: {e}")))?;

    doc.get("jsonpaths")
        .and_then(|p| p.as_array())
        .map(|paths| {
            paths
                .iter()
                .filter_map(|p| p.as_str().map(str::to_string))
                .collect()
        })
        .ok_or_else(|| {
            WarehouseError::Invalid(format!("jsonpaths file {url} has no \"jsonpaths\" array"))
        })
}

/// Evaluate a simple JSONPath (`$.a.b`, `$['a']`, `$.a[0]`).
fn json_path_get<'a>(
    root: &'a serde_json::Value,
    path: &str,
) -> Result<Option<&'a serde_json::Value>, WarehouseError> {
    let invalid = || WarehouseError::Invalid(format!("unsupported JSONPath '{path}'"));

    let mut rest = path.trim().strip_prefix('$').ok_or_else(invalid)?;
    let mut current = root;

    while !rest.is_empty() {
        let next = if let Some(r) = rest.strip_prefix('.') {
            let end = r.find(['.', '[']).unwrap_or(r.len());
            rest = &r[end..];
            current.get(&r[..end])
        } else if let Some(r) = rest.strip_prefix('[') {
            let end = r.find(']').ok_or_else(invalid)?;
            let inner = r[..end].trim();
            rest = &r[end + 1..];
            match strip_quotes(inner) {
                Some(key) => current.get(key),
                None => current.get(inner.parse::<usize>().map_err(|_| invalid())?),
            }
        } else {
            return Err(invalid());
        };

        match next {
            Some(v) => current = v,
            None => return Ok(None),
        }
    }

    Ok(Some(current))
}

fn strip_quotes(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
}

#[derive(Debug)]
enum Projection {
    Star,
    Count(String),
    /// (source column, output name)
    Columns(Vec<(String, String)>),
}

#[derive(Debug)]
enum Condition {
    IsNull(String),
    IsNotNull(String),
    Compare(String, Comparison, Value),
}

#[derive(Debug)]
struct SelectQuery {
    distinct: bool,
    projection: Projection,
    table: String,
    filter: Vec<Condition>,
}

fn parse_select(stmt: &str) -> Result<SelectQuery, WarehouseError> {
    let stmt = stmt.trim().trim_end_matches(';').trim();
    let c = SELECT_RE
        .captures(stmt)
        .ok_or_else(|| WarehouseError::Unsupported(stmt.to_string()))?;

    let projection = parse_projection(&c[2])?;
    let filter = match c.get(4) {
        Some(clause) => split_conjuncts(clause.as_str())
            .into_iter()
            .map(parse_condition)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(SelectQuery {
        distinct: c.get(1).is_some(),
        projection,
        table: c[3].to_lowercase(),
        filter,
    })
}

/// Split a WHERE clause on `AND` outside single-quoted literals.
fn split_conjuncts(clause: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for m in AND_RE.find_iter(clause) {
        // An odd number of quotes before the match means it sits in a literal.
        if clause[..m.start()].matches('\'').count() % 2 == 0 {
            parts.push(&clause[start..m.start()]);
            start = m.end();
        }
    }
    parts.push(&clause[start..]);
    parts
}

fn parse_projection(list: &str) -> Result<Projection, WarehouseError> {
    let items = split_top_level(list, ',');
    let mut columns = Vec::new();

    for item in &items {
        let item = item.trim();
        let c = ITEM_RE
            .captures(item)
            .ok_or_else(|| WarehouseError::Unsupported(format!("select item '{item}'")))?;
        let expr = c[1].to_lowercase();
        let alias = c.get(2).map(|m| m.as_str().to_lowercase());

        if expr.starts_with("count") && expr.ends_with(')') {
            if items.len() != 1 {
                return Err(WarehouseError::Unsupported(
                    "COUNT(*) cannot be combined with other select items".to_string(),
                ));
            }
            return Ok(Projection::Count(alias.unwrap_or_else(|| "count".to_string())));
        }
        if expr == "*" {
            if items.len() != 1 {
                return Err(WarehouseError::Unsupported(
                    "* cannot be combined with other select items".to_string(),
                ));
            }
            return Ok(Projection::Star);
        }

        let output = alias.unwrap_or_else(|| expr.clone());
        columns.push((expr, output));
    }

    Ok(Projection::Columns(columns))
}

fn parse_condition(cond: &str) -> Result<Condition, WarehouseError> {
    let cond = cond.trim();
    if let Some(c) = IS_NULL_RE.captures(cond) {
        let col = c[1].to_lowercase();
        return Ok(if c.get(2).is_some() {
            Condition::IsNotNull(col)
        } else {
            Condition::IsNull(col)
        });
    }
    if let Some(c) = COMPARE_RE.captures(cond) {
        let op = Comparison::from_sql_op(&c[2])
            .ok_or_else(|| WarehouseError::Unsupported(format!("operator '{}'", &c[2])))?;
        return Ok(Condition::Compare(c[1].to_lowercase(), op, parse_literal(&c[3])?));
    }
    Err(WarehouseError::Unsupported(format!("condition '{cond}'")))
}

fn parse_literal(s: &str) -> Result<Value, WarehouseError> {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('\'') && s.ends_with('\'') {
        return Ok(Value::Text(s[1..s.len() - 1].replace("''", "'")));
    }
    match s.to_uppercase().as_str() {
        "NULL" => return Ok(Value::Null),
        "TRUE" => return Ok(Value::Bool(true)),
        "FALSE" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = s.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(f) = s.parse::<f64>() {
        return Ok(Value::Float(f));
    }
    Err(WarehouseError::Unsupported(format!("literal '{s}'")))
}

fn run_select(db: &Database, query: &SelectQuery) -> Result<Rows, WarehouseError> {
    let table = db.table(&query.table)?;
    let column = |name: &str| {
        table
            .column_index(name)
            .ok_or_else(|| WarehouseError::UnknownColumn {
                table: query.table.clone(),
                column: name.to_string(),
            })
    };

    // Resolve column indices up front so unknown columns fail even on empty tables.
    let mut filter = Vec::with_capacity(query.filter.len());
    for cond in &query.filter {
        let resolved = match cond {
            Condition::IsNull(c) => (column(c)?, None),
            Condition::IsNotNull(c) => (column(c)?, Some((Comparison::Ne, None))),
            Condition::Compare(c, op, lit) => (column(c)?, Some((*op, Some(lit)))),
        };
        filter.push(resolved);
    }

    let matching = table.rows.iter().filter(|row| {
        filter.iter().all(|(idx, test)| {
            let value = &row[*idx];
            match test {
                None => value.is_null(),
                Some((_, None)) => !value.is_null(),
                Some((op, Some(lit))) => op.holds(value, lit),
            }
        })
    });

    let (columns, rows): (Vec<String>, Vec<Vec<Value>>) = match &query.projection {
        Projection::Count(alias) => {
            let n = matching.count() as i64;
            (vec![alias.clone()], vec![vec![Value::Int(n)]])
        }
        Projection::Star => (table.columns.clone(), matching.cloned().collect()),
        Projection::Columns(items) => {
            let mut indices = Vec::with_capacity(items.len());
            for (source, _) in items {
                indices.push(column(source)?);
            }
            let rows = matching
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect();
            (items.iter().map(|(_, out)| out.clone()).collect(), rows)
        }
    };

    let rows = if query.distinct {
        let mut unique: Vec<Vec<Value>> = Vec::with_capacity(rows.len());
        for row in rows {
            if !unique.contains(&row) {
                unique.push(row);
            }
        }
        unique
    } else {
        rows
    };

    Ok(Rows { columns, rows })
}
