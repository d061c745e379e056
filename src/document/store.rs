//! The seam between the document backend and a document database.

use crate::error::Result;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// A stored document: field name to JSON value.
pub type Document = Map<String, JsonValue>;

/// Conjunction of field equality conditions. An empty filter matches every
/// document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, JsonValue)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: JsonValue) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.conditions.push((field.into(), value));
        self
    }

    pub fn conditions(&self) -> &[(String, JsonValue)] {
        &self.conditions
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(field, expected)| document.get(field).is_some_and(|v| json_eq(v, expected)))
    }
}

/// Equality with numbers compared by value, so `1` matches `1.0`.
fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

/// What a `replace_one` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    Inserted,
    NotFound,
}

/// A document database holding named collections.
pub trait DocumentStore: Send + Sync + 'static {
    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>>;

    fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>>;

    /// Replaces the first matching document; inserts it when nothing matches
    /// and `upsert` is set.
    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome>;

    /// Deletes the first matching document. Returns whether one was deleted.
    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool>;

    fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        Ok(self.find_many(collection, filter)?.len() as u64)
    }
}

/// In-process document store. Documents keep insertion order.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a document as-is, bypassing any backend encoding.
    pub fn insert_raw(&self, collection: &str, document: Document) {
        self.collections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Option<Document>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    fn find_many(&self, collection: &str, filter: &Filter) -> Result<Vec<Document>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    fn replace_one(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
        upsert: bool,
    ) -> Result<ReplaceOutcome> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let docs = collections.entry(collection.to_string()).or_default();
        if let Some(existing) = docs.iter_mut().find(|d| filter.matches(d)) {
            *existing = document;
            return Ok(ReplaceOutcome::Replaced);
        }
        if upsert {
            docs.push(document);
            Ok(ReplaceOutcome::Inserted)
        } else {
            Ok(ReplaceOutcome::NotFound)
        }
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool> {
        let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(index) => {
                docs.remove(index);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
