//! Model metadata and the Schema Descriptor.
//!
//! A model type declares its persisted fields once, through
//! [`Model::metadata`]. Each storage service turns that declaration into a
//! [`SchemaDescriptor`] when it is built, validating it up front so a bad
//! declaration fails at construction rather than on the first query.
//!
//! ## Example
//!
//! ```
//! use chrono::{DateTime, Utc};
//! use modelstore::error::{DecodeError, Result};
//! use modelstore::schema::{Field, Model, ModelMetadata, Record, SchemaDescriptor};
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct User {
//!     id: i32,
//!     name: String,
//!     created_at: DateTime<Utc>,
//! }
//!
//! impl Model for User {
//!     fn metadata() -> Option<ModelMetadata> {
//!         Some(
//!             ModelMetadata::new("users")
//!                 .field(Field::of::<i32>("id").auto_generated())
//!                 .field(Field::of::<String>("name"))
//!                 .field(Field::of::<DateTime<Utc>>("created_at")),
//!         )
//!     }
//!
//!     fn to_record(&self) -> Result<Record> {
//!         Ok(Record::new()
//!             .with("id", self.id)
//!             .with("name", self.name.clone())
//!             .with("created_at", self.created_at))
//!     }
//!
//!     fn from_record(mut record: Record) -> std::result::Result<Self, DecodeError> {
//!         Ok(Self {
//!             id: record.take("id")?,
//!             name: record.take("name")?,
//!             created_at: record.take("created_at")?,
//!         })
//!     }
//! }
//!
//! let descriptor = SchemaDescriptor::describe::<User>().unwrap();
//! assert_eq!(descriptor.table(), "users");
//! assert_eq!(descriptor.identity().column(), "id");
//! ```

use crate::error::{DecodeError, Result, StorageError};
use crate::schema::{Identity, Native, NativeType, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// A persistable model type.
///
/// `Default` supplies the zero value used for column default literals and
/// for [`create_instance`](crate::service::StorageService::create_instance).
pub trait Model: Default + Clone + Send + Sync + 'static {
    /// Declarative persistence metadata. `None` marks a type that is not
    /// persistable; building a service for it fails.
    fn metadata() -> Option<ModelMetadata>;

    /// Copies the persisted fields into a record keyed by column name.
    fn to_record(&self) -> Result<Record>;

    /// Rebuilds an instance from a record keyed by column name.
    fn from_record(record: Record) -> std::result::Result<Self, DecodeError>;
}

/// Declaration of one persisted field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    column: String,
    kind: NativeType,
    nullable: bool,
    identity: bool,
    auto_generated: bool,
}

impl Field {
    /// Declares a field of a built-in type.
    pub fn of<T: Native>(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: T::KIND,
            nullable: T::NULLABLE,
            identity: false,
            auto_generated: false,
        }
    }

    /// Declares a field stored through the structured fallback.
    pub fn json(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            kind: NativeType::Structured,
            nullable: true,
            identity: false,
            auto_generated: false,
        }
    }

    /// Marks the field as the model's identity.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    /// Marks the field as an identity whose values the service generates.
    pub fn auto_generated(mut self) -> Self {
        self.identity = true;
        self.auto_generated = true;
        self
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn native_type(&self) -> NativeType {
        self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn is_auto_generated(&self) -> bool {
        self.auto_generated
    }
}

/// The persistence declaration of a model type: table name and fields in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelMetadata {
    table: String,
    fields: Vec<Field>,
}

impl ModelMetadata {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }
}

/// Field values of one model instance, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: HashMap<String, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a built-in typed value.
    pub fn with(mut self, column: &str, value: impl Native) -> Self {
        self.values.insert(column.to_string(), value.into_value());
        self
    }

    /// Adds a value through the structured fallback.
    pub fn with_json<T: Serialize + ?Sized>(mut self, column: &str, value: &T) -> Result<Self> {
        let json = serde_json::to_value(value).map_err(|e| StorageError::Encode {
            column: column.to_string(),
            message: e.to_string(),
        })?;
        let value = if json.is_null() {
            Value::Null
        } else {
            Value::Structured(json)
        };
        self.values.insert(column.to_string(), value);
        Ok(self)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(column.into(), value)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.values.remove(column)
    }

    /// Removes a column and converts it to its built-in type.
    ///
    /// A missing column reads as `NULL`, which only nullable types accept.
    pub fn take<T: Native>(&mut self, column: &str) -> std::result::Result<T, DecodeError> {
        let value = self.values.remove(column).unwrap_or(Value::Null);
        if value.is_null() && !T::NULLABLE {
            return Err(DecodeError::MissingColumn(column.to_string()));
        }
        T::from_value(value).map_err(|e| e.in_column(column))
    }

    /// Removes a structured column and deserializes it.
    pub fn take_json<T: DeserializeOwned>(
        &mut self,
        column: &str,
    ) -> std::result::Result<T, DecodeError> {
        let json = match self.values.remove(column).unwrap_or(Value::Null) {
            Value::Null => serde_json::Value::Null,
            Value::Structured(json) => json,
            other => {
                return Err(DecodeError::UnexpectedType {
                    expected: NativeType::Structured,
                    found: other.type_name(),
                }
                .in_column(column))
            }
        };
        serde_json::from_value(json)
            .map_err(|e| DecodeError::Structured(e.to_string()).in_column(column))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Validated, read-only view of a model's persisted fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescriptor {
    model: &'static str,
    table: String,
    fields: Vec<Field>,
    identity: usize,
}

impl SchemaDescriptor {
    /// Builds the descriptor for a model type.
    pub fn describe<T: Model>() -> Result<Self> {
        Self::from_metadata(std::any::type_name::<T>(), T::metadata())
    }

    /// Builds a descriptor from a metadata declaration.
    pub fn from_metadata(model: &'static str, metadata: Option<ModelMetadata>) -> Result<Self> {
        let config = |message: String| StorageError::Configuration(message);

        let metadata = metadata
            .ok_or_else(|| config(format!("{} has no persistence metadata", model)))?;

        if metadata.table.trim().is_empty() {
            return Err(config(format!("{} declares an empty table name", model)));
        }

        let mut seen = HashSet::new();
        for field in &metadata.fields {
            if field.column.trim().is_empty() {
                return Err(config(format!("{} declares a field without a column name", model)));
            }
            if !seen.insert(field.column.as_str()) {
                return Err(config(format!(
                    "{} declares column `{}` more than once",
                    model, field.column
                )));
            }
        }

        let identities: Vec<usize> = metadata
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.identity)
            .map(|(i, _)| i)
            .collect();

        let identity = match identities.as_slice() {
            [index] => *index,
            [] => return Err(config(format!("{} has no identity field", model))),
            _ => {
                return Err(config(format!(
                    "{} declares {} identity fields, expected exactly one",
                    model,
                    identities.len()
                )))
            }
        };

        let id_field = &metadata.fields[identity];
        if !id_field.kind.is_identity_capable() {
            return Err(config(format!(
                "{} identity `{}` has type {}, which cannot address a record",
                model, id_field.column, id_field.kind
            )));
        }
        if id_field.auto_generated && !id_field.kind.is_integer() {
            return Err(config(format!(
                "{} identity `{}` is auto-generated but has non-integer type {}",
                model, id_field.column, id_field.kind
            )));
        }
        if id_field.nullable && !id_field.auto_generated {
            return Err(config(format!(
                "{} identity `{}` is nullable but not auto-generated",
                model, id_field.column
            )));
        }

        Ok(Self {
            model,
            table: metadata.table,
            fields: metadata.fields,
            identity,
        })
    }

    /// Rust type name of the described model.
    pub fn model_name(&self) -> &'static str {
        self.model
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Persisted fields in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn identity(&self) -> &Field {
        &self.fields[self.identity]
    }

    pub fn field(&self, column: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.column == column)
    }

    /// Like [`field`](Self::field), failing with `UnknownColumn`.
    pub fn require_field(&self, column: &str) -> Result<&Field> {
        self.field(column).ok_or_else(|| StorageError::UnknownColumn {
            table: self.table.clone(),
            column: column.to_string(),
        })
    }

    /// Extracts and validates the record of a model instance.
    ///
    /// Every declared column must hold a value of its declared type, or
    /// `NULL` when the field is nullable.
    pub fn record_of<T: Model>(&self, object: &T) -> Result<Record> {
        let record = object.to_record()?;
        for field in &self.fields {
            let encode_error = |message: String| StorageError::Encode {
                column: field.column.clone(),
                message,
            };
            match record.get(&field.column) {
                None | Some(Value::Null) if field.nullable => {}
                None | Some(Value::Null) => {
                    return Err(encode_error(format!(
                        "{} is not nullable but has no value",
                        self.model
                    )))
                }
                Some(value) if value.native_type() != Some(field.kind) => {
                    return Err(encode_error(format!(
                        "declared as {} but holds {}",
                        field.kind,
                        value.type_name()
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(record)
    }

    /// The identity of a record.
    pub fn identity_in(&self, record: &Record) -> Result<Identity> {
        let column = self.identity().column();
        let value = record.get(column).unwrap_or(&Value::Null);
        Identity::from_value(value).ok_or_else(|| {
            StorageError::InvalidIdentity(format!(
                "`{}`.`{}` holds {}",
                self.table,
                column,
                value.type_name()
            ))
        })
    }

    /// The identity of a model instance.
    pub fn identity_of<T: Model>(&self, object: &T) -> Result<Identity> {
        self.identity_in(&self.record_of(object)?)
    }

    /// Converts an identity into a value of the identity field's type.
    pub fn identity_value(&self, id: &Identity) -> Result<Value> {
        id.to_value(self.identity().kind)
            .map_err(|e| StorageError::InvalidIdentity(e.in_column(self.identity().column()).to_string()))
    }

    /// Whether the instance still needs a generated identity: the identity is
    /// auto-generated and currently zero or `NULL`.
    pub fn needs_generated_identity<T: Model>(&self, object: &T) -> Result<bool> {
        let field = self.identity();
        if !field.auto_generated {
            return Ok(false);
        }
        let record = object.to_record()?;
        Ok(match record.get(field.column()) {
            None | Some(Value::Null) => true,
            Some(value) => value.as_i64() == Some(0),
        })
    }

    /// Returns the instance with its identity replaced by `id`.
    pub fn with_identity<T: Model>(&self, object: T, id: i64) -> Result<T> {
        let field = self.identity();
        let mut record = object.to_record()?;
        let value = self.identity_value(&Identity::Int(id))?;
        record.insert(field.column(), value);
        Ok(T::from_record(record)?)
    }

    /// The record of the model's zero value, source of column defaults.
    pub fn zero_record<T: Model>(&self) -> Result<Record> {
        self.record_of(&T::default())
    }
}
