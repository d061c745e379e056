//! Relational backend.

use crate::error::{Result, StorageError};
use crate::schema::{Model, Record, SchemaDescriptor, TypeMap, Value};
use crate::service::{Backend, IdSequence};
use crate::sql::reconcile::{self, Reconciliation};
use crate::sql::{ConnectionManager, Row, SqlConnection, SqlValue, Statement};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Stores one model type in one SQL table. Every operation checks a
/// connection out of `M` and releases it before returning.
pub struct SqlBackend<T: Model, M: ConnectionManager> {
    database: M,
    descriptor: Arc<SchemaDescriptor>,
    types: TypeMap,
    sequence: IdSequence,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model, M: ConnectionManager> std::fmt::Debug for SqlBackend<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlBackend")
            .field("table", &self.descriptor.table())
            .finish_non_exhaustive()
    }
}

impl<T: Model, M: ConnectionManager> SqlBackend<T, M> {
    /// Builds the backend, failing if `T` has no valid persistence metadata.
    pub fn new(database: M, types: TypeMap) -> Result<Self> {
        Ok(Self {
            database,
            descriptor: Arc::new(SchemaDescriptor::describe::<T>()?),
            types,
            sequence: IdSequence::new(),
            _model: PhantomData,
        })
    }

    pub fn database(&self) -> &M {
        &self.database
    }

    /// Runs one reconciliation pass for the model's table.
    pub fn reconcile(&self) -> Result<Reconciliation> {
        let zero = self.descriptor.zero_record::<T>()?;
        let mut conn = self.database.connect()?;
        reconcile::reconcile(&mut conn, &self.descriptor, &self.types, &zero)
    }

    fn table(&self) -> String {
        self.descriptor.table().to_string()
    }

    fn select(&self, filter: Option<(&str, &Value)>) -> Result<Vec<T>> {
        let filter = match filter {
            Some((column, value)) => {
                let field = self.descriptor.require_field(column)?;
                Some((field.column().to_string(), self.types.encode_sql(value)))
            }
            None => None,
        };
        let statement = Statement::Select {
            table: self.table(),
            filter,
        };
        debug!(statement = %statement, "SQL query");

        let rows = self.database.connect()?.query(&statement)?;
        rows.into_iter().map(|row| self.decode_row(row)).collect()
    }

    fn decode_row(&self, mut row: Row) -> Result<T> {
        let mut record = Record::new();
        for field in self.descriptor.fields() {
            let stored = row.take(field.column()).unwrap_or(SqlValue::Null);
            let value = self
                .types
                .decode_sql(field.native_type(), stored)
                .map_err(|e| e.in_column(field.column()))?;
            record.insert(field.column(), value);
        }
        Ok(T::from_record(record)?)
    }

    fn highest_identity(&self) -> Result<i64> {
        let column = self.descriptor.identity().column().to_string();
        let statement = Statement::SelectMax {
            table: self.table(),
            column: column.clone(),
        };
        let rows = self.database.connect()?.query(&statement)?;
        let Some(stored) = rows.first().and_then(Row::first) else {
            return Ok(0);
        };
        match self.types.decode_sql(self.descriptor.identity().native_type(), stored.clone()) {
            Ok(value) => Ok(value.as_i64().unwrap_or(0)),
            Err(e) => Err(e.in_column(&column).into()),
        }
    }
}

impl<T: Model, M: ConnectionManager> Backend<T> for SqlBackend<T, M> {
    fn name(&self) -> &'static str {
        "sql"
    }

    fn descriptor(&self) -> &Arc<SchemaDescriptor> {
        &self.descriptor
    }

    fn startup(&self) -> Result<()> {
        let report = self.reconcile()?;
        info!(
            table = %self.descriptor.table(),
            changed = !report.is_noop(),
            "SQL backend ready"
        );
        Ok(())
    }

    fn find_one(&self, column: &str, value: &Value) -> Result<Option<T>> {
        Ok(self.select(Some((column, value)))?.into_iter().next())
    }

    fn find_all(&self) -> Result<Vec<T>> {
        self.select(None)
    }

    fn find_all_by(&self, column: &str, value: &Value) -> Result<Vec<T>> {
        self.select(Some((column, value)))
    }

    fn upsert(&self, object: &T) -> Result<()> {
        let record = self.descriptor.record_of(object)?;
        let values = self
            .descriptor
            .fields()
            .iter()
            .map(|field| {
                let value = record.get(field.column()).unwrap_or(&Value::Null);
                (field.column().to_string(), self.types.encode_sql(value))
            })
            .collect();
        let statement = Statement::Upsert {
            table: self.table(),
            values,
        };
        debug!(statement = %statement, "SQL upsert");
        self.database.connect()?.execute(&statement)?;

        if let Some(id) = self.descriptor.identity_in(&record)?.as_int() {
            self.sequence.observe(id);
        }
        Ok(())
    }

    fn delete(&self, object: &T) -> Result<bool> {
        let id = self.descriptor.identity_of(object)?;
        let value = self.descriptor.identity_value(&id)?;
        let statement = Statement::Delete {
            table: self.table(),
            column: self.descriptor.identity().column().to_string(),
            value: self.types.encode_sql(&value),
        };
        debug!(statement = %statement, id = %id, "SQL delete");
        let affected = self.database.connect()?.execute(&statement)?;
        Ok(affected > 0)
    }

    fn next_id(&self) -> Result<i64> {
        if !self.descriptor.identity().native_type().is_integer() {
            return Err(StorageError::InvalidIdentity(format!(
                "`{}` has a non-integer identity",
                self.descriptor.table()
            )));
        }
        self.sequence.next_with(|| self.highest_identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::schema::descriptor::tests::{Account, Profile, User};
    use crate::sql::MemoryDatabase;
    use uuid::Uuid;

    fn backend<T: Model>(db: &MemoryDatabase) -> SqlBackend<T, MemoryDatabase> {
        let backend = SqlBackend::new(db.clone(), TypeMap::default()).unwrap();
        backend.startup().unwrap();
        backend
    }

    #[test]
    fn test_upsert_statement_text() {
        let db = MemoryDatabase::new();
        let users = backend::<User>(&db);
        db.clear_statements();

        users
            .upsert(&User {
                id: 1,
                name: "ada".into(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(
            db.statements(),
            vec![
                "INSERT INTO `users` (`id`, `name`, `created_at`) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE `id` = ?, `name` = ?, `created_at` = ?"
            ]
        );
    }

    #[test]
    fn test_round_trip_with_uuid_and_structured_fields() {
        let db = MemoryDatabase::new();
        let accounts = backend::<Account>(&db);

        let account = Account {
            uuid: Uuid::new_v4(),
            email: "ada@example.com".into(),
            balance: -3.25,
            verified: true,
            nickname: Some("countess".into()),
            profile: Profile {
                bio: "it's ada".into(),
                links: vec!["a".into(), "b".into()],
            },
        };
        accounts.upsert(&account).unwrap();

        let found = accounts.find(&account.uuid.into()).unwrap();
        assert_eq!(found, Some(account.clone()));
        assert_eq!(accounts.find_all().unwrap(), vec![account]);
    }

    #[test]
    fn test_delete_reports_whether_a_row_was_removed() {
        let db = MemoryDatabase::new();
        let users = backend::<User>(&db);
        let user = User {
            id: 3,
            ..Default::default()
        };
        users.upsert(&user).unwrap();

        assert!(users.delete(&user).unwrap());
        assert!(!users.delete(&user).unwrap());
        assert_eq!(db.row_count("users"), Some(0));
    }

    #[test]
    fn test_next_id_on_uuid_identity_fails() {
        let db = MemoryDatabase::new();
        let accounts = backend::<Account>(&db);
        assert!(matches!(
            accounts.next_id(),
            Err(StorageError::InvalidIdentity(_))
        ));
    }

    #[test]
    fn test_corrupt_row_is_a_decode_error() {
        let db = MemoryDatabase::new();
        let accounts = backend::<Account>(&db);
        let mut conn = db.open().unwrap();
        conn.execute(&Statement::Upsert {
            table: "accounts".into(),
            values: vec![
                ("uuid".into(), SqlValue::Text("not-a-uuid".into())),
                ("email".into(), SqlValue::Text("x".into())),
            ],
        })
        .unwrap();

        let err = accounts.find_all().unwrap_err();
        assert!(matches!(
            err,
            StorageError::Decode(DecodeError::InColumn { ref column, .. }) if column == "uuid"
        ));
    }

    #[test]
    fn test_unknown_column_lookup() {
        let db = MemoryDatabase::new();
        let users = backend::<User>(&db);
        assert!(matches!(
            users.find_one("age", &Value::I32(3)),
            Err(StorageError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_connection_failure_surfaces() {
        let db = MemoryDatabase::new();
        let users: SqlBackend<User, _> = SqlBackend::new(db.clone(), TypeMap::default()).unwrap();

        db.set_offline(true);
        assert!(matches!(users.startup(), Err(StorageError::Connection(_))));
        assert!(matches!(users.find_all(), Err(StorageError::Connection(_))));

        db.set_offline(false);
        users.startup().unwrap();
        assert!(users.find_all().unwrap().is_empty());
    }

    #[test]
    fn test_each_operation_releases_its_connection() {
        let db = MemoryDatabase::new();
        let users = backend::<User>(&db);
        let opened = db.connections_opened();

        users.upsert(&User { id: 1, ..Default::default() }).unwrap();
        users.find_all().unwrap();
        assert_eq!(db.connections_opened(), opened + 2);
    }
}
