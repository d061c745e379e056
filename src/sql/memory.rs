//! In-process SQL engine.
//!
//! [`MemoryDatabase`] interprets [`Statement`] values against tables held in
//! memory, with the MySQL behavior the SQL backend relies on: upserts keyed by
//! the primary key, `AUTO_INCREMENT` on zero or `NULL`, column types reported
//! in lowercase (`BOOLEAN` as `tinyint(1)`), and all-or-nothing transactions.
//!
//! It also records every statement it receives and can be told to fail
//! statements or refuse connections, which is how the reconciliation and
//! backend tests observe what was sent.

use crate::error::{Result, StorageError};
use crate::sql::{ColumnDef, ColumnInfo, ConnectionManager, Row, SqlConnection, SqlValue, Statement};
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

type Tables = BTreeMap<String, Table>;

#[derive(Debug, Clone)]
struct Column {
    name: String,
    column_type: String,
    default: SqlValue,
    auto_increment: bool,
}

impl Column {
    fn from_def(def: &ColumnDef) -> std::result::Result<Self, String> {
        let default = match &def.default {
            Some(literal) => parse_literal(literal)?,
            None => SqlValue::Null,
        };
        Ok(Self {
            name: def.name.clone(),
            column_type: def.column_type.clone(),
            default,
            auto_increment: def.auto_increment,
        })
    }
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<Column>,
    primary_key: Option<usize>,
    rows: Vec<Vec<SqlValue>>,
    next_auto: i64,
}

impl Table {
    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(column))
    }

    fn require(&self, table: &str, column: &str) -> std::result::Result<usize, String> {
        self.index_of(column)
            .ok_or_else(|| format!("Unknown column '{}' in '{}'", column, table))
    }

    /// Key rules for `ADD`/`MODIFY COLUMN`: at most one primary key, and an
    /// auto-increment column must be that key. Returns whether `def` becomes
    /// the primary key. `target` is the modified column's index.
    fn check_key(&self, def: &ColumnDef, target: Option<usize>) -> std::result::Result<bool, String> {
        if def.primary_key && self.primary_key.is_some() {
            return Err("Multiple primary key defined".to_string());
        }
        let keyed = def.primary_key || (target.is_some() && target == self.primary_key);
        if def.auto_increment && !keyed {
            return Err(
                "Incorrect table definition; there can be only one auto column and it must be defined as a key"
                    .to_string(),
            );
        }
        Ok(def.primary_key)
    }

    fn row(&self, values: &[SqlValue]) -> Row {
        Row::new(
            self.columns
                .iter()
                .zip(values)
                .map(|(c, v)| (c.name.clone(), v.clone()))
                .collect(),
        )
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: Mutex<Tables>,
    log: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    offline: AtomicBool,
    opened: AtomicU64,
}

/// Handle to an in-process SQL database. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of every statement received so far, in order.
    pub fn statements(&self) -> Vec<String> {
        lock(&self.inner.log).clone()
    }

    pub fn clear_statements(&self) {
        lock(&self.inner.log).clear();
    }

    /// Makes every statement whose text contains `pattern` fail.
    pub fn fail_when_contains(&self, pattern: impl Into<String>) {
        *lock(&self.inner.failure) = Some(pattern.into());
    }

    pub fn clear_failure(&self) {
        *lock(&self.inner.failure) = None;
    }

    /// While offline, `connect` fails.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> u64 {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn table_names(&self) -> Vec<String> {
        lock(&self.inner.tables).keys().cloned().collect()
    }

    pub fn row_count(&self, table: &str) -> Option<usize> {
        lock(&self.inner.tables).get(table).map(|t| t.rows.len())
    }

    /// Opens a connection.
    pub fn open(&self) -> Result<MemoryConnection> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("database is offline".into()));
        }
        self.inner.opened.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryConnection {
            db: self.clone(),
            transaction: None,
        })
    }
}

impl ConnectionManager for MemoryDatabase {
    type Connection = MemoryConnection;

    fn connect(&self) -> Result<MemoryConnection> {
        self.open()
    }
}

/// A connection to a [`MemoryDatabase`].
///
/// Inside a transaction the connection works on a private copy of the tables,
/// published on `COMMIT` and discarded on `ROLLBACK`.
#[derive(Debug)]
pub struct MemoryConnection {
    db: MemoryDatabase,
    transaction: Option<Tables>,
}

impl MemoryConnection {
    fn with_tables<R>(&mut self, f: impl FnOnce(&mut Tables) -> R) -> R {
        match self.transaction.as_mut() {
            Some(tables) => f(tables),
            None => f(&mut lock(&self.db.inner.tables)),
        }
    }

    fn run(&mut self, statement: &Statement) -> Result<(u64, Vec<Row>)> {
        let text = statement.to_string();
        trace!(statement = %text, "Memory database received statement");
        lock(&self.db.inner.log).push(text.clone());

        if !matches!(statement, Statement::Rollback) {
            if let Some(pattern) = lock(&self.db.inner.failure).as_deref() {
                if text.contains(pattern) {
                    return Err(StorageError::query(text, "injected failure"));
                }
            }
        }

        match statement {
            Statement::StartTransaction => {
                if self.transaction.is_none() {
                    self.transaction = Some(lock(&self.db.inner.tables).clone());
                }
                Ok((0, Vec::new()))
            }
            Statement::Commit => {
                if let Some(tables) = self.transaction.take() {
                    *lock(&self.db.inner.tables) = tables;
                }
                Ok((0, Vec::new()))
            }
            Statement::Rollback => {
                self.transaction = None;
                Ok((0, Vec::new()))
            }
            other => self
                .with_tables(|tables| apply(tables, other))
                .map_err(|message| StorageError::query(text, message)),
        }
    }
}

impl SqlConnection for MemoryConnection {
    fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.with_tables(|tables| tables.contains_key(table)))
    }

    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.with_tables(|tables| {
            let t = tables
                .get(table)
                .ok_or_else(|| StorageError::query(format!("DESCRIBE `{}`", table), "no such table"))?;
            Ok(t.columns
                .iter()
                .map(|c| ColumnInfo::new(c.name.clone(), reported_type(&c.column_type)))
                .collect())
        })
    }

    fn execute(&mut self, statement: &Statement) -> Result<u64> {
        self.run(statement).map(|(affected, _)| affected)
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        if !statement.is_query() {
            return Err(StorageError::query(statement, "statement returns no rows"));
        }
        self.run(statement).map(|(_, rows)| rows)
    }
}

/// Applies one non-transaction statement. Tables are left untouched when it
/// fails.
fn apply(tables: &mut Tables, statement: &Statement) -> std::result::Result<(u64, Vec<Row>), String> {
    let missing = |table: &str| format!("Table '{}' doesn't exist", table);

    match statement {
        Statement::CreateTable { table, columns } => {
            if tables.contains_key(table) {
                return Err(format!("Table '{}' already exists", table));
            }
            let mut built = Vec::with_capacity(columns.len());
            let mut primary_key = None;
            for (i, def) in columns.iter().enumerate() {
                if built.iter().any(|c: &Column| c.name.eq_ignore_ascii_case(&def.name)) {
                    return Err(format!("Duplicate column name '{}'", def.name));
                }
                if def.primary_key {
                    if primary_key.is_some() {
                        return Err("Multiple primary key defined".to_string());
                    }
                    primary_key = Some(i);
                }
                built.push(Column::from_def(def)?);
            }
            tables.insert(
                table.clone(),
                Table {
                    columns: built,
                    primary_key,
                    rows: Vec::new(),
                    next_auto: 1,
                },
            );
            Ok((0, Vec::new()))
        }
        Statement::AddColumn { table, column } => {
            let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
            if t.index_of(&column.name).is_some() {
                return Err(format!("Duplicate column name '{}'", column.name));
            }
            let keyed = t.check_key(column, None)?;
            let column = Column::from_def(column)?;
            for row in &mut t.rows {
                row.push(column.default.clone());
            }
            t.columns.push(column);
            if keyed {
                t.primary_key = Some(t.columns.len() - 1);
            }
            Ok((0, Vec::new()))
        }
        Statement::ModifyColumn { table, column } => {
            let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
            let index = t.require(table, &column.name)?;
            let keyed = t.check_key(column, Some(index))?;
            let replacement = Column::from_def(column)?;
            let existing = &mut t.columns[index];
            existing.column_type = replacement.column_type;
            existing.default = replacement.default;
            existing.auto_increment = replacement.auto_increment;
            if keyed {
                t.primary_key = Some(index);
            }
            Ok((0, Vec::new()))
        }
        Statement::DropColumn { table, column } => {
            let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
            let index = t.require(table, column)?;
            if t.columns.len() == 1 {
                return Err("You can't delete all columns with ALTER TABLE; use DROP TABLE instead".into());
            }
            t.columns.remove(index);
            for row in &mut t.rows {
                row.remove(index);
            }
            t.primary_key = match t.primary_key {
                Some(pk) if pk == index => None,
                Some(pk) if pk > index => Some(pk - 1),
                other => other,
            };
            Ok((0, Vec::new()))
        }
        Statement::Select { table, filter } => {
            let t = tables.get(table).ok_or_else(|| missing(table))?;
            let rows = match filter {
                Some((column, value)) => {
                    let index = t.require(table, column)?;
                    t.rows
                        .iter()
                        .filter(|row| row[index].sql_eq(value))
                        .map(|row| t.row(row))
                        .collect()
                }
                None => t.rows.iter().map(|row| t.row(row)).collect(),
            };
            Ok((0, rows))
        }
        Statement::SelectMax { table, column } => {
            let t = tables.get(table).ok_or_else(|| missing(table))?;
            let index = t.require(table, column)?;
            let max = t
                .rows
                .iter()
                .map(|row| &row[index])
                .filter(|v| !v.is_null())
                .max_by(|a, b| a.sql_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let rows = max
                .map(|v| vec![Row::new(vec![(t.columns[index].name.clone(), v.clone())])])
                .unwrap_or_default();
            Ok((0, rows))
        }
        Statement::Upsert { table, values } => {
            let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
            let mut assignments = Vec::with_capacity(values.len());
            for (column, value) in values {
                assignments.push((t.require(table, column)?, value));
            }

            let mut row: Vec<SqlValue> = t.columns.iter().map(|c| c.default.clone()).collect();
            for (index, value) in &assignments {
                row[*index] = (*value).clone();
            }

            let Some(pk) = t.primary_key else {
                t.rows.push(row);
                return Ok((1, Vec::new()));
            };

            if t.columns[pk].auto_increment && matches!(row[pk], SqlValue::Null | SqlValue::Int(0)) {
                row[pk] = SqlValue::Int(t.next_auto);
            }
            if row[pk].is_null() {
                return Err(format!("Column '{}' cannot be null", t.columns[pk].name));
            }
            if let SqlValue::Int(n) = row[pk] {
                t.next_auto = t.next_auto.max(n.saturating_add(1));
            }

            if let Some(existing) = t.rows.iter_mut().find(|r| r[pk].sql_eq(&row[pk])) {
                for (index, value) in &assignments {
                    existing[*index] = (*value).clone();
                }
                return Ok((2, Vec::new()));
            }
            t.rows.push(row);
            Ok((1, Vec::new()))
        }
        Statement::Delete { table, column, value } => {
            let t = tables.get_mut(table).ok_or_else(|| missing(table))?;
            let index = t.require(table, column)?;
            let before = t.rows.len();
            t.rows.retain(|row| !row[index].sql_eq(value));
            Ok(((before - t.rows.len()) as u64, Vec::new()))
        }
        Statement::StartTransaction | Statement::Commit | Statement::Rollback => Ok((0, Vec::new())),
    }
}

/// Column type as `information_schema` reports it.
fn reported_type(label: &str) -> String {
    let lower = label.trim().to_ascii_lowercase();
    match lower.as_str() {
        "boolean" | "bool" => "tinyint(1)".to_string(),
        _ => lower,
    }
}

/// Parses a rendered `DEFAULT` literal.
fn parse_literal(literal: &str) -> std::result::Result<SqlValue, String> {
    let literal = literal.trim();
    let upper = literal.to_ascii_uppercase();
    if upper == "NULL" {
        return Ok(SqlValue::Null);
    }
    if upper == "TRUE" || upper == "FALSE" {
        return Ok(SqlValue::Bool(upper == "TRUE"));
    }
    if let Some(hex) = upper.strip_prefix("X'").and_then(|s| s.strip_suffix('\'')) {
        if hex.len() % 2 != 0 {
            return Err(format!("invalid hex literal {}", literal));
        }
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|e| format!("invalid hex literal {}: {}", literal, e))?;
        return Ok(SqlValue::Bytes(Bytes::from(bytes)));
    }
    if let Some(inner) = literal.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Ok(SqlValue::Text(inner.replace("''", "'")));
    }
    if let Ok(n) = literal.parse::<i64>() {
        return Ok(SqlValue::Int(n));
    }
    literal
        .parse::<f64>()
        .map(SqlValue::Float)
        .map_err(|_| format!("unsupported default literal {}", literal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_users(conn: &mut MemoryConnection) {
        conn.execute(&Statement::CreateTable {
            table: "users".into(),
            columns: vec![
                ColumnDef::new("id", "INT").auto_increment().primary_key(),
                ColumnDef::new("name", "VARCHAR(255)").default_literal("''"),
                ColumnDef::new("active", "BOOLEAN").default_literal("FALSE"),
            ],
        })
        .unwrap();
    }

    fn upsert(id: i64, name: &str) -> Statement {
        Statement::Upsert {
            table: "users".into(),
            values: vec![
                ("id".into(), SqlValue::Int(id)),
                ("name".into(), SqlValue::Text(name.into())),
            ],
        }
    }

    fn select_by(column: &str, value: SqlValue) -> Statement {
        Statement::Select {
            table: "users".into(),
            filter: Some((column.into(), value)),
        }
    }

    #[test]
    fn test_upsert_inserts_then_updates() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);

        assert_eq!(conn.execute(&upsert(1, "ada")).unwrap(), 1);
        assert_eq!(conn.execute(&upsert(1, "grace")).unwrap(), 2);
        assert_eq!(db.row_count("users"), Some(1));

        let rows = conn.query(&select_by("id", SqlValue::Int(1))).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name"), Some(&SqlValue::Text("grace".into())));
        assert_eq!(rows[0].get("active"), Some(&SqlValue::Bool(false)));
    }

    #[test]
    fn test_auto_increment_on_zero() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);

        conn.execute(&upsert(0, "a")).unwrap();
        conn.execute(&upsert(5, "b")).unwrap();
        conn.execute(&upsert(0, "c")).unwrap();

        let max = conn
            .query(&Statement::SelectMax {
                table: "users".into(),
                column: "id".into(),
            })
            .unwrap();
        assert_eq!(max[0].first(), Some(&SqlValue::Int(6)));
    }

    #[test]
    fn test_select_max_on_empty_table() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);
        let rows = conn
            .query(&Statement::SelectMax {
                table: "users".into(),
                column: "id".into(),
            })
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_delete_by_column() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);
        conn.execute(&upsert(1, "ada")).unwrap();

        let delete = Statement::Delete {
            table: "users".into(),
            column: "id".into(),
            value: SqlValue::Int(1),
        };
        assert_eq!(conn.execute(&delete).unwrap(), 1);
        assert_eq!(conn.execute(&delete).unwrap(), 0);
    }

    #[test]
    fn test_reported_column_types() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);

        let columns = conn.table_columns("users").unwrap();
        assert_eq!(
            columns,
            vec![
                ColumnInfo::new("id", "int"),
                ColumnInfo::new("name", "varchar(255)"),
                ColumnInfo::new("active", "tinyint(1)"),
            ]
        );
    }

    #[test]
    fn test_rollback_discards_the_batch() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);
        db.fail_when_contains("DROP COLUMN");

        let batch = vec![
            Statement::AddColumn {
                table: "users".into(),
                column: ColumnDef::new("age", "INT").default_literal("0"),
            },
            Statement::DropColumn {
                table: "users".into(),
                column: "active".into(),
            },
        ];
        assert!(conn.execute_batch(&batch).is_err());

        let names: Vec<String> = conn
            .table_columns("users")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["id", "name", "active"]);

        let log = db.statements();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.iter().any(|s| s == "COMMIT"));
    }

    #[test]
    fn test_commit_publishes_the_batch() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);

        let batch = vec![Statement::DropColumn {
            table: "users".into(),
            column: "active".into(),
        }];
        conn.execute_batch(&batch).unwrap();

        let mut other = db.open().unwrap();
        assert_eq!(other.table_columns("users").unwrap().len(), 2);
    }

    #[test]
    fn test_alter_cannot_declare_a_second_primary_key() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);

        let modify = Statement::ModifyColumn {
            table: "users".into(),
            column: ColumnDef::new("id", "BIGINT").auto_increment().primary_key(),
        };
        let err = conn.execute(&modify).unwrap_err();
        assert!(err.to_string().contains("Multiple primary key defined"));

        let add = Statement::AddColumn {
            table: "users".into(),
            column: ColumnDef::new("code", "INT").primary_key(),
        };
        assert!(conn.execute(&add).is_err());
        assert_eq!(conn.table_columns("users").unwrap()[0].column_type, "int");
    }

    #[test]
    fn test_auto_increment_must_stay_on_the_key() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create_users(&mut conn);

        let retype_key = Statement::ModifyColumn {
            table: "users".into(),
            column: ColumnDef::new("id", "BIGINT").auto_increment(),
        };
        conn.execute(&retype_key).unwrap();
        assert_eq!(conn.table_columns("users").unwrap()[0].column_type, "bigint");
        conn.execute(&upsert(0, "auto")).unwrap();
        let rows = conn.query(&select_by("name", SqlValue::Text("auto".into()))).unwrap();
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Int(1)));

        let unkeyed = Statement::AddColumn {
            table: "users".into(),
            column: ColumnDef::new("seq", "INT").auto_increment(),
        };
        assert!(conn.execute(&unkeyed).is_err());
    }

    #[test]
    fn test_cannot_drop_last_column() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        conn.execute(&Statement::CreateTable {
            table: "t".into(),
            columns: vec![ColumnDef::new("only", "INT")],
        })
        .unwrap();
        let drop = Statement::DropColumn {
            table: "t".into(),
            column: "only".into(),
        };
        assert!(matches!(
            conn.execute(&drop),
            Err(StorageError::QueryExecution { .. })
        ));
    }

    #[test]
    fn test_unknown_table_and_column() {
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        assert!(conn.query(&select_by("id", SqlValue::Int(1))).is_err());

        create_users(&mut conn);
        assert!(conn.query(&select_by("nope", SqlValue::Int(1))).is_err());
        assert!(conn.execute(&upsert(1, "ok")).is_ok());
    }

    #[test]
    fn test_parse_literal() {
        assert_eq!(parse_literal("'o''neil'"), Ok(SqlValue::Text("o'neil".into())));
        assert_eq!(parse_literal("NULL"), Ok(SqlValue::Null));
        assert_eq!(parse_literal("TRUE"), Ok(SqlValue::Bool(true)));
        assert_eq!(parse_literal("-3"), Ok(SqlValue::Int(-3)));
        assert_eq!(parse_literal("0.5"), Ok(SqlValue::Float(0.5)));
        assert_eq!(
            parse_literal("X'AB01'"),
            Ok(SqlValue::Bytes(Bytes::from_static(&[0xab, 0x01])))
        );
        assert!(parse_literal("NOW()").is_err());
    }

    #[test]
    fn test_offline_database_refuses_connections() {
        let db = MemoryDatabase::new();
        db.set_offline(true);
        assert!(matches!(db.open(), Err(StorageError::Connection(_))));
        db.set_offline(false);
        assert!(db.open().is_ok());
        assert_eq!(db.connections_opened(), 1);
    }
}
