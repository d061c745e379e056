//! Typed SQL statements.
//!
//! Every statement the SQL backend issues is a [`Statement`] value. Its
//! `Display` form is the MySQL text with `?` placeholders, and
//! [`Statement::params`] yields the values bound to those placeholders in
//! order. Drivers receive the typed statement, so they can either send the
//! text with parameters or interpret the variant directly (as
//! [`MemoryDatabase`](crate::sql::MemoryDatabase) does).

use crate::sql::SqlValue;
use std::fmt;

/// One column of a `CREATE TABLE` or `ALTER TABLE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: String,
    pub primary_key: bool,
    pub auto_increment: bool,
    /// Rendered literal for the `DEFAULT` clause.
    pub default: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            primary_key: false,
            auto_increment: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn default_literal(mut self, literal: impl Into<String>) -> Self {
        self.default = Some(literal.into());
        self
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` {}", self.name, self.column_type)?;
        if self.auto_increment {
            f.write_str(" AUTO_INCREMENT")?;
        }
        if self.primary_key {
            f.write_str(" PRIMARY KEY")?;
        }
        if let Some(literal) = &self.default {
            write!(f, " DEFAULT {}", literal)?;
        }
        Ok(())
    }
}

/// A statement understood by [`SqlConnection`](crate::sql::SqlConnection).
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    ModifyColumn {
        table: String,
        column: ColumnDef,
    },
    DropColumn {
        table: String,
        column: String,
    },
    StartTransaction,
    Commit,
    Rollback,
    /// `SELECT *`, optionally filtered by one equality predicate.
    Select {
        table: String,
        filter: Option<(String, SqlValue)>,
    },
    /// Highest value of one column.
    SelectMax {
        table: String,
        column: String,
    },
    /// Insert, or update every listed column when the key already exists.
    Upsert {
        table: String,
        values: Vec<(String, SqlValue)>,
    },
    Delete {
        table: String,
        column: String,
        value: SqlValue,
    },
}

impl Statement {
    /// Values bound to the `?` placeholders, in order.
    pub fn params(&self) -> Vec<&SqlValue> {
        match self {
            Statement::Select {
                filter: Some((_, value)),
                ..
            } => vec![value],
            Statement::Upsert { values, .. } => {
                // Bound once for VALUES and once for the UPDATE clause
                values.iter().chain(values.iter()).map(|(_, v)| v).collect()
            }
            Statement::Delete { value, .. } => vec![value],
            _ => Vec::new(),
        }
    }

    /// The table a statement targets, if any.
    pub fn table(&self) -> Option<&str> {
        match self {
            Statement::CreateTable { table, .. }
            | Statement::AddColumn { table, .. }
            | Statement::ModifyColumn { table, .. }
            | Statement::DropColumn { table, .. }
            | Statement::Select { table, .. }
            | Statement::SelectMax { table, .. }
            | Statement::Upsert { table, .. }
            | Statement::Delete { table, .. } => Some(table),
            Statement::StartTransaction | Statement::Commit | Statement::Rollback => None,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Statement::Select { .. } | Statement::SelectMax { .. })
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateTable { table, columns } => {
                write!(f, "CREATE TABLE `{}` (", table)?;
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", column)?;
                }
                f.write_str(")")
            }
            Statement::AddColumn { table, column } => {
                write!(f, "ALTER TABLE `{}` ADD COLUMN {}", table, column)
            }
            Statement::ModifyColumn { table, column } => {
                write!(f, "ALTER TABLE `{}` MODIFY COLUMN {}", table, column)
            }
            Statement::DropColumn { table, column } => {
                write!(f, "ALTER TABLE `{}` DROP COLUMN `{}`", table, column)
            }
            Statement::StartTransaction => f.write_str("START TRANSACTION"),
            Statement::Commit => f.write_str("COMMIT"),
            Statement::Rollback => f.write_str("ROLLBACK"),
            Statement::Select { table, filter } => {
                write!(f, "SELECT * FROM `{}`", table)?;
                if let Some((column, _)) = filter {
                    write!(f, " WHERE `{}` = ?", column)?;
                }
                Ok(())
            }
            Statement::SelectMax { table, column } => write!(
                f,
                "SELECT `{col}` FROM `{}` ORDER BY `{col}` DESC LIMIT 1",
                table,
                col = column
            ),
            Statement::Upsert { table, values } => {
                let columns: Vec<String> = values.iter().map(|(c, _)| format!("`{}`", c)).collect();
                let placeholders = vec!["?"; values.len()];
                let updates: Vec<String> =
                    values.iter().map(|(c, _)| format!("`{}` = ?", c)).collect();
                write!(
                    f,
                    "INSERT INTO `{}` ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
                    table,
                    columns.join(", "),
                    placeholders.join(", "),
                    updates.join(", ")
                )
            }
            Statement::Delete { table, column, .. } => {
                write!(f, "DELETE FROM `{}` WHERE `{}` = ?", table, column)
            }
        }
    }
}
