//! Error types for modelstore.
//!
//! Every fallible operation returns [`StorageError`]. A lookup that finds
//! nothing is not an error: it returns `Ok(None)`.
//!
//! Values that fail to convert back from their stored form surface as
//! [`DecodeError`], so corrupted rows or record files are reported instead of
//! being read as "not found".

use crate::schema::NativeType;
use thiserror::Error;

/// Errors raised by storage services and backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The model's persistence metadata is missing or invalid.
    /// Raised at service construction and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A backend connection could not be obtained.
    #[error("connection error: {0}")]
    Connection(String),

    /// A schema change failed; the whole batch was rolled back.
    #[error("failed to reconcile table `{table}`: {message}")]
    SchemaReconciliation { table: String, message: String },

    /// A data statement failed.
    #[error("failed to execute `{statement}`: {message}")]
    QueryExecution { statement: String, message: String },

    /// A stored value could not be converted back to its native type.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// A model value could not be converted to its stored form.
    #[error("failed to encode column `{column}`: {message}")]
    Encode { column: String, message: String },

    /// A lookup named a column the model does not declare.
    #[error("table `{table}` has no column `{column}`")]
    UnknownColumn { table: String, column: String },

    /// An identity value that cannot address a record.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Filesystem failure in the file backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation spawned onto the blocking pool did not complete.
    #[error("background task failed: {0}")]
    Task(String),
}

impl StorageError {
    pub(crate) fn query(statement: impl ToString, message: impl ToString) -> Self {
        StorageError::QueryExecution {
            statement: statement.to_string(),
            message: message.to_string(),
        }
    }
}

/// Errors converting stored values back into native values.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DecodeError {
    /// A non-nullable field has no stored value.
    #[error("missing value for column `{0}`")]
    MissingColumn(String),

    /// The stored value has a shape the native type cannot be built from.
    #[error("expected {expected}, found {found}")]
    UnexpectedType {
        expected: NativeType,
        found: &'static str,
    },

    /// The stored value has the right shape but an invalid content.
    #[error("invalid {kind} value: {message}")]
    InvalidValue { kind: NativeType, message: String },

    /// Structured (JSON) deserialization failed.
    #[error("invalid structured value: {0}")]
    Structured(String),

    /// Wraps another error with the column it happened in.
    #[error("column `{column}`: {source}")]
    InColumn {
        column: String,
        #[source]
        source: Box<DecodeError>,
    },
}

impl DecodeError {
    pub(crate) fn invalid(kind: NativeType, message: impl ToString) -> Self {
        DecodeError::InvalidValue {
            kind,
            message: message.to_string(),
        }
    }

    /// Attaches the column name, unless it is already attached.
    pub fn in_column(self, column: &str) -> Self {
        match self {
            DecodeError::MissingColumn(_) | DecodeError::InColumn { .. } => self,
            other => DecodeError::InColumn {
                column: column.to_string(),
                source: Box::new(other),
            },
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_column_context() {
        let err = DecodeError::invalid(NativeType::Uuid, "bad length").in_column("owner");
        assert_eq!(
            err.to_string(),
            "column `owner`: invalid UUID value: bad length"
        );

        // Already tagged errors are not wrapped twice
        let again = err.clone().in_column("other");
        assert_eq!(again, err);

        let missing = DecodeError::MissingColumn("name".into()).in_column("name");
        assert_eq!(missing, DecodeError::MissingColumn("name".into()));
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::SchemaReconciliation {
            table: "users".into(),
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "failed to reconcile table `users`: boom");

        let err: StorageError = DecodeError::MissingColumn("id".into()).into();
        assert!(matches!(err, StorageError::Decode(_)));
    }
}
