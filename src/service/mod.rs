//! Storage Service
//!
//! [`StorageService`] is the uniform CRUD façade applications use. It owns
//! the object cache and delegates persistence to a [`Backend`]:
//!
//! ```text
//!   find(id) ──> ObjectCache ──hit──> value
//!                    │ miss
//!                    ▼
//!                 Backend ──found──> put in cache ──> value
//!
//!   upsert / delete ──> Backend ──> invalidate cache entry
//! ```
//!
//! Writes never refresh the cache: the next `find` reads the stored form back
//! from the backend.
//!
//! All operations block. The `*_async` variants run them on Tokio's blocking
//! pool and need the service behind an `Arc`.

pub mod sequence;

pub use sequence::IdSequence;

use crate::cache::{CacheConfig, CacheSweeper, ObjectCache, SweepConfig};
use crate::error::{Result, StorageError};
use crate::schema::{Identity, Model, Native, SchemaDescriptor, Value};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// A storage backend for one model type.
pub trait Backend<T: Model>: Send + Sync + 'static {
    /// Short backend name used in logs.
    fn name(&self) -> &'static str;

    fn descriptor(&self) -> &Arc<SchemaDescriptor>;

    /// Prepares the backend: reconciles the table, creates the folder, etc.
    fn startup(&self) -> Result<()>;

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Looks a record up by identity.
    fn find(&self, id: &Identity) -> Result<Option<T>> {
        let descriptor = self.descriptor();
        let value = descriptor.identity_value(id)?;
        self.find_one(descriptor.identity().column(), &value)
    }

    /// First record whose column equals the value.
    fn find_one(&self, column: &str, value: &Value) -> Result<Option<T>>;

    fn find_all(&self) -> Result<Vec<T>>;

    fn find_all_by(&self, column: &str, value: &Value) -> Result<Vec<T>>;

    /// Inserts the record or replaces the one with the same identity.
    fn upsert(&self, object: &T) -> Result<()>;

    /// Deletes by identity. Returns whether a record was removed.
    fn delete(&self, object: &T) -> Result<bool>;

    /// Next auto-generated identity.
    fn next_id(&self) -> Result<i64>;
}

/// Cache-first CRUD service for one model type.
pub struct StorageService<T: Model, B: Backend<T>> {
    backend: B,
    descriptor: Arc<SchemaDescriptor>,
    cache: Arc<ObjectCache<Identity, T>>,
    _model: PhantomData<fn() -> T>,
}

impl<T: Model, B: Backend<T>> std::fmt::Debug for StorageService<T, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageService")
            .field("backend", &self.backend.name())
            .field("table", &self.descriptor.table())
            .field("cache", &self.cache)
            .finish()
    }
}

impl<T: Model, B: Backend<T>> StorageService<T, B> {
    pub fn new(backend: B, cache: CacheConfig) -> Self {
        let descriptor = Arc::clone(backend.descriptor());
        Self {
            backend,
            descriptor,
            cache: Arc::new(ObjectCache::new(cache.ttl)),
            _model: PhantomData,
        }
    }

    pub fn startup(&self) -> Result<()> {
        info!(
            backend = self.backend.name(),
            table = %self.descriptor.table(),
            "Starting storage service"
        );
        self.backend.startup()
    }

    pub fn shutdown(&self) -> Result<()> {
        info!(
            backend = self.backend.name(),
            table = %self.descriptor.table(),
            "Shutting down storage service"
        );
        self.cache.clear();
        self.backend.shutdown()
    }

    /// A zero-valued instance, with a fresh identity when identities are
    /// auto-generated.
    pub fn create_instance(&self) -> Result<T> {
        let object = T::default();
        if !self.descriptor.identity().is_auto_generated() {
            return Ok(object);
        }
        let id = self.backend.next_id()?;
        self.descriptor.with_identity(object, id)
    }

    /// Finds by identity, consulting the cache first.
    pub fn find(&self, id: impl Into<Identity>) -> Result<Option<T>> {
        let id = self.cache_key(id.into())?;
        if let Some(object) = self.cache.get(&id) {
            trace!(table = %self.descriptor.table(), id = %id, "Cache hit");
            return Ok(Some(object));
        }
        trace!(table = %self.descriptor.table(), id = %id, "Cache miss");

        let found = self.backend.find(&id)?;
        if let Some(object) = &found {
            self.cache.put(id, object.clone());
        }
        Ok(found)
    }

    /// Finds by identity in the backend, bypassing the cache.
    pub fn find_in_backend(&self, id: impl Into<Identity>) -> Result<Option<T>> {
        self.backend.find(&id.into())
    }

    pub fn find_one(&self, column: &str, value: impl Native) -> Result<Option<T>> {
        self.descriptor.require_field(column)?;
        self.backend.find_one(column, &value.into_value())
    }

    pub fn find_all(&self) -> Result<Vec<T>> {
        self.backend.find_all()
    }

    pub fn find_all_by(&self, column: &str, value: impl Native) -> Result<Vec<T>> {
        self.descriptor.require_field(column)?;
        self.backend.find_all_by(column, &value.into_value())
    }

    /// Live cached values. Never touches the backend.
    pub fn find_all_cached(&self) -> Vec<T> {
        self.cache.values()
    }

    /// Writes the object and returns it as stored.
    ///
    /// An auto-generated identity that is still zero is assigned first.
    pub fn upsert(&self, object: T) -> Result<T> {
        let object = if self.descriptor.needs_generated_identity(&object)? {
            let id = self.backend.next_id()?;
            debug!(table = %self.descriptor.table(), id, "Assigned generated identity");
            self.descriptor.with_identity(object, id)?
        } else {
            object
        };

        self.backend.upsert(&object)?;
        let id = self.descriptor.identity_of(&object)?;
        self.cache.remove(&id);
        Ok(object)
    }

    /// Deletes the object. Returns whether the backend held it.
    pub fn delete(&self, object: &T) -> Result<bool> {
        let id = self.descriptor.identity_of(object)?;
        let deleted = self.backend.delete(object)?;
        self.cache.remove(&id);
        Ok(deleted)
    }

    pub fn cache_object(&self, object: &T) -> Result<()> {
        let id = self.descriptor.identity_of(object)?;
        self.cache.put(id, object.clone());
        Ok(())
    }

    pub fn uncache_object(&self, object: &T) -> Result<()> {
        let id = self.descriptor.identity_of(object)?;
        self.cache.remove(&id);
        Ok(())
    }

    pub fn uncache_id(&self, id: impl Into<Identity>) -> Result<()> {
        let id = self.cache_key(id.into())?;
        self.cache.remove(&id);
        Ok(())
    }

    /// The identity in the form the identity field stores, so a UUID and its
    /// text share one cache entry.
    fn cache_key(&self, id: Identity) -> Result<Identity> {
        let value = self.descriptor.identity_value(&id)?;
        Identity::from_value(&value).ok_or_else(|| {
            StorageError::InvalidIdentity(format!(
                "`{}` cannot key the `{}` cache",
                id,
                self.descriptor.table()
            ))
        })
    }

    pub fn next_id(&self) -> Result<i64> {
        self.backend.next_id()
    }

    pub fn descriptor(&self) -> &Arc<SchemaDescriptor> {
        &self.descriptor
    }

    pub fn cache(&self) -> &ObjectCache<Identity, T> {
        &self.cache
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Starts a background sweeper over this service's cache. Must be called
    /// within a Tokio runtime; the sweeper stops when the handle is dropped.
    pub fn start_sweeper(&self, config: SweepConfig) -> CacheSweeper {
        CacheSweeper::start(Arc::clone(&self.cache), config)
    }

    // ========================================================================
    // ASYNC WRAPPERS
    // ========================================================================

    pub fn find_async(
        self: &Arc<Self>,
        id: impl Into<Identity>,
    ) -> impl Future<Output = Result<Option<T>>> + Send + 'static {
        let this = Arc::clone(self);
        let id = id.into();
        blocking(move || this.find(id))
    }

    pub fn find_one_async(
        self: &Arc<Self>,
        column: &str,
        value: impl Native,
    ) -> impl Future<Output = Result<Option<T>>> + Send + 'static {
        let this = Arc::clone(self);
        let column = column.to_string();
        let value = value.into_value();
        blocking(move || {
            this.descriptor.require_field(&column)?;
            this.backend.find_one(&column, &value)
        })
    }

    pub fn find_all_async(self: &Arc<Self>) -> impl Future<Output = Result<Vec<T>>> + Send + 'static {
        let this = Arc::clone(self);
        blocking(move || this.find_all())
    }

    pub fn find_all_by_async(
        self: &Arc<Self>,
        column: &str,
        value: impl Native,
    ) -> impl Future<Output = Result<Vec<T>>> + Send + 'static {
        let this = Arc::clone(self);
        let column = column.to_string();
        let value = value.into_value();
        blocking(move || {
            this.descriptor.require_field(&column)?;
            this.backend.find_all_by(&column, &value)
        })
    }

    pub fn upsert_async(self: &Arc<Self>, object: T) -> impl Future<Output = Result<T>> + Send + 'static {
        let this = Arc::clone(self);
        blocking(move || this.upsert(object))
    }

    pub fn delete_async(self: &Arc<Self>, object: T) -> impl Future<Output = Result<bool>> + Send + 'static {
        let this = Arc::clone(self);
        blocking(move || this.delete(&object))
    }
}

/// Runs a blocking operation on Tokio's blocking pool.
async fn blocking<R, F>(f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}
