//! Schema Reconciliation Engine
//!
//! Brings a live table in line with a model's declared fields:
//!
//! 1. **Check**: if the table does not exist, create it.
//! 2. **Diff**: compare declared fields with the live columns.
//!    - declared but missing: `ADD COLUMN`
//!    - type label differs: `MODIFY COLUMN`
//!    - live but not declared: `DROP COLUMN`
//! 3. **Apply**: run every statement as one transaction.
//!
//! Statements follow field declaration order; drops come last, in live
//! column order. Identity and structured columns never carry a `DEFAULT`, and
//! only `CREATE TABLE` declares the primary key.

use crate::error::{Result, StorageError};
use crate::schema::{Field, Record, SchemaDescriptor, TypeMap, Value};
use crate::sql::{ColumnDef, ColumnInfo, SqlConnection, Statement};
use std::collections::HashSet;
use tracing::{debug, info};

/// What one reconciliation pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub created: bool,
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub dropped: Vec<String>,
}

impl Reconciliation {
    /// True when the live table already matched.
    pub fn is_noop(&self) -> bool {
        !self.created && self.added.is_empty() && self.modified.is_empty() && self.dropped.is_empty()
    }
}

/// Plans the statements for one table.
///
/// `zero` is the record of the model's zero value, the source of `DEFAULT`
/// literals. `live` is `None` when the table does not exist.
pub fn plan(
    descriptor: &SchemaDescriptor,
    types: &TypeMap,
    zero: &Record,
    live: Option<&[ColumnInfo]>,
) -> (Vec<Statement>, Reconciliation) {
    let table = descriptor.table().to_string();
    let mut report = Reconciliation::default();

    let Some(live) = live else {
        let columns = descriptor
            .fields()
            .iter()
            .map(|field| column_def(field, types, zero, Clause::Create))
            .collect();
        report.created = true;
        return (vec![Statement::CreateTable { table, columns }], report);
    };

    let mut statements = Vec::new();

    for field in descriptor.fields() {
        let existing = live
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(field.column()));
        match existing {
            None => {
                statements.push(Statement::AddColumn {
                    table: table.clone(),
                    column: column_def(field, types, zero, Clause::Add),
                });
                report.added.push(field.column().to_string());
            }
            Some(column) if !same_type(types.column_type(field.native_type()), &column.column_type) => {
                statements.push(Statement::ModifyColumn {
                    table: table.clone(),
                    column: column_def(field, types, zero, Clause::Modify),
                });
                report.modified.push(field.column().to_string());
            }
            Some(_) => {}
        }
    }

    let declared: HashSet<String> = descriptor
        .fields()
        .iter()
        .map(|f| f.column().to_ascii_lowercase())
        .collect();
    for column in live {
        if !declared.contains(&column.name.to_ascii_lowercase()) {
            statements.push(Statement::DropColumn {
                table: table.clone(),
                column: column.name.clone(),
            });
            report.dropped.push(column.name.clone());
        }
    }

    (statements, report)
}

/// Reconciles one table over an open connection.
///
/// Any failure, including a failed existence check, rolls back the batch and surfaces
/// as [`StorageError::SchemaReconciliation`].
pub fn reconcile<C: SqlConnection + ?Sized>(
    conn: &mut C,
    descriptor: &SchemaDescriptor,
    types: &TypeMap,
    zero: &Record,
) -> Result<Reconciliation> {
    let table = descriptor.table();
    let failed = |e: StorageError| StorageError::SchemaReconciliation {
        table: table.to_string(),
        message: e.to_string(),
    };

    let live = if conn.table_exists(table).map_err(failed)? {
        Some(conn.table_columns(table).map_err(failed)?)
    } else {
        None
    };

    let (statements, report) = plan(descriptor, types, zero, live.as_deref());
    if statements.is_empty() {
        debug!(table = %table, "Table schema is up to date");
        return Ok(report);
    }

    for statement in &statements {
        debug!(table = %table, statement = %statement, "Planned schema change");
    }
    conn.execute_batch(&statements).map_err(failed)?;

    info!(
        table = %table,
        created = report.created,
        added = report.added.len(),
        modified = report.modified.len(),
        dropped = report.dropped.len(),
        "Reconciled table schema"
    );
    Ok(report)
}

/// Which statement a column definition is rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    Create,
    Add,
    Modify,
}

/// The identity column is declared `PRIMARY KEY` only when the table is
/// created. Re-declaring it in an `ALTER` fails on a table that already has a
/// key, and `AUTO_INCREMENT` is only legal on a column that already is one.
fn column_def(field: &Field, types: &TypeMap, zero: &Record, clause: Clause) -> ColumnDef {
    let def = ColumnDef::new(field.column(), types.column_type(field.native_type()));
    if field.is_identity() {
        return match clause {
            Clause::Create if field.is_auto_generated() => def.auto_increment().primary_key(),
            Clause::Create => def.primary_key(),
            Clause::Modify if field.is_auto_generated() => def.auto_increment(),
            Clause::Modify | Clause::Add => def,
        };
    }
    if field.native_type().is_structured() {
        return def;
    }
    let zero_value = zero.get(field.column()).unwrap_or(&Value::Null);
    def.default_literal(types.default_literal(zero_value))
}

/// Compares a declared column type with a live one, ignoring case and the
/// forms MySQL reports back (`BOOLEAN` as `tinyint(1)`, integer display
/// widths such as `int(11)`).
fn same_type(declared: &str, live: &str) -> bool {
    normalize_type(declared) == normalize_type(live)
}

fn normalize_type(label: &str) -> String {
    let lower = label.trim().to_ascii_lowercase();
    if lower == "boolean" || lower == "bool" {
        return "tinyint(1)".to_string();
    }
    for base in ["tinyint", "smallint", "mediumint", "bigint", "int"] {
        if let Some(width) = lower.strip_prefix(base) {
            let is_display_width = width.starts_with('(')
                && width.ends_with(')')
                && width[1..width.len() - 1].chars().all(|c| c.is_ascii_digit());
            if is_display_width && !(base == "tinyint" && width == "(1)") {
                return base.to_string();
            }
            break;
        }
    }
    lower
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::tests::{Account, User};
    use crate::schema::Model;
    use crate::sql::{MemoryDatabase, MemoryConnection};

    fn user_schema() -> (SchemaDescriptor, TypeMap, Record) {
        let descriptor = SchemaDescriptor::describe::<User>().unwrap();
        let zero = descriptor.zero_record::<User>().unwrap();
        (descriptor, TypeMap::default(), zero)
    }

    fn create(conn: &mut MemoryConnection, table: &str, columns: Vec<ColumnDef>) {
        conn.execute(&Statement::CreateTable {
            table: table.into(),
            columns,
        })
        .unwrap();
    }

    #[test]
    fn test_creates_missing_table() {
        let (descriptor, types, zero) = user_schema();
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();

        let report = reconcile(&mut conn, &descriptor, &types, &zero).unwrap();
        assert!(report.created);

        let statements = db.statements();
        assert_eq!(
            statements,
            vec![
                "START TRANSACTION".to_string(),
                "CREATE TABLE `users` (`id` INT AUTO_INCREMENT PRIMARY KEY, \
                 `name` VARCHAR(255) DEFAULT '', `created_at` BIGINT DEFAULT 0)"
                    .to_string(),
                "COMMIT".to_string(),
            ]
        );
    }

    #[test]
    fn test_reconciliation_is_idempotent() {
        let (descriptor, types, zero) = user_schema();
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();

        reconcile(&mut conn, &descriptor, &types, &zero).unwrap();
        db.clear_statements();

        let report = reconcile(&mut conn, &descriptor, &types, &zero).unwrap();
        assert!(report.is_noop());
        assert!(db.statements().is_empty());
    }

    #[test]
    fn test_drops_undeclared_legacy_column() {
        let (descriptor, types, zero) = user_schema();
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create(
            &mut conn,
            "users",
            vec![
                ColumnDef::new("id", "INT").auto_increment().primary_key(),
                ColumnDef::new("name", "VARCHAR(255)"),
                ColumnDef::new("created_at", "BIGINT"),
                ColumnDef::new("legacy_flag", "BOOLEAN"),
            ],
        );
        db.clear_statements();

        let report = reconcile(&mut conn, &descriptor, &types, &zero).unwrap();
        assert_eq!(report.dropped, vec!["legacy_flag".to_string()]);
        assert!(report.added.is_empty());
        assert!(report.modified.is_empty());
        assert_eq!(
            db.statements(),
            vec![
                "START TRANSACTION",
                "ALTER TABLE `users` DROP COLUMN `legacy_flag`",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_adds_and_modifies_in_declaration_order() {
        let (descriptor, types, zero) = user_schema();
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create(
            &mut conn,
            "users",
            vec![
                ColumnDef::new("id", "INT").auto_increment().primary_key(),
                ColumnDef::new("name", "TEXT"),
            ],
        );
        db.clear_statements();

        let report = reconcile(&mut conn, &descriptor, &types, &zero).unwrap();
        assert_eq!(report.modified, vec!["name".to_string()]);
        assert_eq!(report.added, vec!["created_at".to_string()]);
        assert_eq!(
            db.statements(),
            vec![
                "START TRANSACTION",
                "ALTER TABLE `users` MODIFY COLUMN `name` VARCHAR(255) DEFAULT ''",
                "ALTER TABLE `users` ADD COLUMN `created_at` BIGINT DEFAULT 0",
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_identity_retype_does_not_redeclare_the_key() {
        let (descriptor, types, zero) = user_schema();
        let live = vec![
            ColumnInfo::new("id", "bigint"),
            ColumnInfo::new("name", "varchar(255)"),
            ColumnInfo::new("created_at", "bigint"),
        ];
        let (statements, report) = plan(&descriptor, &types, &zero, Some(&live));
        assert_eq!(report.modified, vec!["id"]);
        assert_eq!(
            statements[0].to_string(),
            "ALTER TABLE `users` MODIFY COLUMN `id` INT AUTO_INCREMENT"
        );

        let (statements, _) = plan(&descriptor, &types, &zero, Some(&live[1..]));
        assert_eq!(statements[0].to_string(), "ALTER TABLE `users` ADD COLUMN `id` INT");
    }

    #[test]
    fn test_identity_retype_applies_to_a_keyed_table() {
        let (descriptor, types, zero) = user_schema();
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create(
            &mut conn,
            "users",
            vec![
                ColumnDef::new("id", "BIGINT").auto_increment().primary_key(),
                ColumnDef::new("name", "VARCHAR(255)"),
                ColumnDef::new("created_at", "BIGINT"),
            ],
        );

        let report = reconcile(&mut conn, &descriptor, &types, &zero).unwrap();
        assert_eq!(report.modified, vec!["id".to_string()]);
        assert_eq!(conn.table_columns("users").unwrap()[0].column_type, "int");
        assert!(reconcile(&mut conn, &descriptor, &types, &zero).unwrap().is_noop());
    }

    #[test]
    fn test_one_statement_per_difference() {
        let (descriptor, types, zero) = user_schema();
        let live = vec![
            ColumnInfo::new("id", "int(11)"),
            ColumnInfo::new("old_a", "int"),
            ColumnInfo::new("old_b", "text"),
        ];
        let (statements, report) = plan(&descriptor, &types, &zero, Some(&live));
        assert_eq!(report.added, vec!["name", "created_at"]);
        assert_eq!(report.dropped, vec!["old_a", "old_b"]);
        assert!(report.modified.is_empty());
        assert_eq!(statements.len(), 4);
    }

    #[test]
    fn test_failure_rolls_back_everything() {
        let (descriptor, types, zero) = user_schema();
        let db = MemoryDatabase::new();
        let mut conn = db.open().unwrap();
        create(
            &mut conn,
            "users",
            vec![
                ColumnDef::new("id", "INT").auto_increment().primary_key(),
                ColumnDef::new("legacy_flag", "BOOLEAN"),
            ],
        );
        db.fail_when_contains("DROP COLUMN");

        let err = reconcile(&mut conn, &descriptor, &types, &zero).unwrap_err();
        assert!(matches!(err, StorageError::SchemaReconciliation { ref table, .. } if table == "users"));

        db.clear_failure();
        let names: Vec<String> = conn
            .table_columns("users")
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["id", "legacy_flag"]);
        assert_eq!(db.statements().last().map(String::as_str), Some("ROLLBACK"));
    }

    #[test]
    fn test_identity_and_structured_columns_have_no_default() {
        let descriptor = SchemaDescriptor::describe::<Account>().unwrap();
        let zero = Account::default().to_record().unwrap();
        let (statements, _) = plan(&descriptor, &TypeMap::default(), &zero, None);
        assert_eq!(
            statements[0].to_string(),
            "CREATE TABLE `accounts` (`uuid` VARCHAR(36) PRIMARY KEY, \
             `email` VARCHAR(255) DEFAULT '', `balance` DOUBLE DEFAULT 0, \
             `verified` BOOLEAN DEFAULT FALSE, `nickname` VARCHAR(255) DEFAULT NULL, \
             `profile` JSON)"
        );
    }

    #[test]
    fn test_type_comparison() {
        assert!(same_type("INT", "int"));
        assert!(same_type("INT", "int(11)"));
        assert!(same_type("BIGINT", "bigint(20)"));
        assert!(same_type("BOOLEAN", "tinyint(1)"));
        assert!(!same_type("TINYINT", "tinyint(1)"));
        assert!(same_type("VARCHAR(255)", "varchar(255)"));
        assert!(!same_type("VARCHAR(255)", "varchar(36)"));
        assert!(!same_type("INT", "integer"));
    }
}
