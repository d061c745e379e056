//! The seam between the SQL backend and a database driver.

use crate::error::Result;
use crate::sql::{SqlValue, Statement};
use tracing::{debug, warn};

/// One result row: column names and values in table column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, SqlValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, SqlValue)>) -> Self {
        Self { columns }
    }

    /// Value of a column, matched case-insensitively the way MySQL matches
    /// column names.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Removes and returns a column value.
    pub fn take(&mut self, column: &str) -> Option<SqlValue> {
        let index = self
            .columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(column))?;
        Some(self.columns.remove(index).1)
    }

    pub fn first(&self) -> Option<&SqlValue> {
        self.columns.first().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A column of a live table, as the database reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Full column type label, e.g. `varchar(255)`.
    pub column_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
        }
    }
}

/// An open connection to a relational database.
pub trait SqlConnection: Send {
    fn table_exists(&mut self, table: &str) -> Result<bool>;

    /// Live columns of a table in table order.
    fn table_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Runs a statement and returns the number of affected rows.
    fn execute(&mut self, statement: &Statement) -> Result<u64>;

    fn query(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Runs statements as one unit inside `START TRANSACTION` .. `COMMIT`.
    ///
    /// On the first failure the transaction is rolled back and that failure
    /// is returned.
    fn execute_batch(&mut self, statements: &[Statement]) -> Result<()> {
        self.execute(&Statement::StartTransaction)?;
        for statement in statements {
            debug!(statement = %statement, "Executing batched statement");
            if let Err(e) = self.execute(statement) {
                if let Err(rollback) = self.execute(&Statement::Rollback) {
                    warn!(error = %rollback, "Rollback failed");
                }
                return Err(e);
            }
        }
        self.execute(&Statement::Commit)?;
        Ok(())
    }
}

/// Hands out connections to the SQL backend.
///
/// Implementations that pool connections return them to the pool when the
/// connection is dropped.
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: SqlConnection;

    fn connect(&self) -> Result<Self::Connection>;
}
