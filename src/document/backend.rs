//! Document backend.

use crate::document::{Document, DocumentStore, Filter};
use crate::error::{Result, StorageError};
use crate::schema::{Model, Record, SchemaDescriptor, TypeMap, Value};
use crate::service::{Backend, IdSequence};
use serde_json::Value as JsonValue;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info};

/// Stores one model type as one document per record in a collection named
/// after the table. Each document carries every declared field under its
/// column name; the identity column is the lookup key.
pub struct DocumentBackend<T: Model, S: DocumentStore> {
    store: S,
    descriptor: Arc<SchemaDescriptor>,
    types: TypeMap,
    sequence: IdSequence,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model, S: DocumentStore> std::fmt::Debug for DocumentBackend<T, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentBackend")
            .field("collection", &self.descriptor.table())
            .finish()
    }
}

impl<T: Model, S: DocumentStore> DocumentBackend<T, S> {
    pub fn new(store: S, types: TypeMap) -> Result<Self> {
        Ok(Self {
            store,
            descriptor: Arc::new(SchemaDescriptor::describe::<T>()?),
            types,
            sequence: IdSequence::new(),
            _model: PhantomData,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn collection(&self) -> &str {
        self.descriptor.table()
    }

    fn filter(&self, column: &str, value: &Value) -> Result<Filter> {
        let field = self.descriptor.require_field(column)?;
        Ok(Filter::eq(field.column(), self.types.encode_document(value)))
    }

    fn identity_filter(&self, object: &T) -> Result<Filter> {
        let id = self.descriptor.identity_of(object)?;
        let value = self.descriptor.identity_value(&id)?;
        self.filter(self.descriptor.identity().column(), &value)
    }

    fn highest_identity(&self) -> Result<i64> {
        let column = self.descriptor.identity().column();
        let documents = self.store.find_many(self.collection(), &Filter::all())?;
        Ok(documents
            .iter()
            .filter_map(|d| d.get(column).and_then(JsonValue::as_i64))
            .max()
            .unwrap_or(0))
    }
}

impl<T: Model, S: DocumentStore> Backend<T> for DocumentBackend<T, S> {
    fn name(&self) -> &'static str {
        "document"
    }

    fn descriptor(&self) -> &Arc<SchemaDescriptor> {
        &self.descriptor
    }

    fn startup(&self) -> Result<()> {
        let count = self.store.count(self.collection(), &Filter::all())?;
        info!(collection = %self.collection(), documents = count, "Document backend ready");
        Ok(())
    }

    fn find_one(&self, column: &str, value: &Value) -> Result<Option<T>> {
        let filter = self.filter(column, value)?;
        debug!(collection = %self.collection(), ?filter, "Document find_one");
        self.store
            .find_one(self.collection(), &filter)?
            .map(|d| from_document(&self.descriptor, &self.types, d))
            .transpose()
    }

    fn find_all(&self) -> Result<Vec<T>> {
        self.store
            .find_many(self.collection(), &Filter::all())?
            .into_iter()
            .map(|d| from_document(&self.descriptor, &self.types, d))
            .collect()
    }

    fn find_all_by(&self, column: &str, value: &Value) -> Result<Vec<T>> {
        let filter = self.filter(column, value)?;
        debug!(collection = %self.collection(), ?filter, "Document find_many");
        self.store
            .find_many(self.collection(), &filter)?
            .into_iter()
            .map(|d| from_document(&self.descriptor, &self.types, d))
            .collect()
    }

    fn upsert(&self, object: &T) -> Result<()> {
        let record = self.descriptor.record_of(object)?;
        let filter = self.identity_filter(object)?;
        let outcome = self
            .store
            .replace_one(self.collection(), &filter, to_document(&self.descriptor, &self.types, &record), true)?;
        debug!(collection = %self.collection(), ?outcome, "Document upsert");

        if let Some(id) = self.descriptor.identity_in(&record)?.as_int() {
            self.sequence.observe(id);
        }
        Ok(())
    }

    fn delete(&self, object: &T) -> Result<bool> {
        let filter = self.identity_filter(object)?;
        self.store.delete_one(self.collection(), &filter)
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

/// Lays a record out as a document: every declared field under its column
/// name, in its document form.
pub(crate) fn to_document(descriptor: &SchemaDescriptor, types: &TypeMap, record: &Record) -> Document {
    descriptor
        .fields()
        .iter()
        .map(|field| {
            let value = record.get(field.column()).unwrap_or(&Value::Null);
            (field.column().to_string(), types.encode_document(value))
        })
        .collect()
}

/// Rebuilds a model from a document. Absent fields read as `NULL`.
pub(crate) fn from_document<T: Model>(
    descriptor: &SchemaDescriptor,
    types: &TypeMap,
    mut document: Document,
) -> Result<T> {
    let mut record = Record::new();
    for field in descriptor.fields() {
        let stored = document.remove(field.column()).unwrap_or(JsonValue::Null);
        let value = types
            .decode_document(field.native_type(), stored)
            .map_err(|e| e.in_column(field.column()))?;
        record.insert(field.column(), value);
    }
    Ok(T::from_record(record)?)
}
