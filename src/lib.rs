//! # modelstore - Backend-Agnostic Model Persistence
//!
//! modelstore persists plain Rust structs through one CRUD interface, whatever
//! the storage behind it: a relational SQL database, a document store, or flat
//! per-record JSON files. Every service keeps a time-bounded object cache in
//! front of its backend.
//!
//! ## Features
//!
//! - **One Interface**: [`StorageService`] offers find / upsert / delete and
//!   column lookups for any backend
//! - **Schema Reconciliation**: SQL tables are created and migrated to match
//!   the model at startup, all changes in one transaction
//! - **Object Cache**: sharded `RwLock` cache with optional TTL and a
//!   background sweeper
//! - **Async Wrappers**: every operation has a variant that runs on Tokio's
//!   blocking pool
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            StorageService<T, B>                         │
//! │                                                                         │
//! │  ┌──────────────────────┐        ┌───────────────────────────────────┐  │
//! │  │   SchemaDescriptor   │        │          ObjectCache              │  │
//! │  │ (fields, identity)   │        │  ┌───────┐ ┌───────┐ ┌───────┐    │  │
//! │  └──────────────────────┘        │  │Shard 0│ │Shard 1│ │...16  │    │  │
//! │                                  │  └───────┘ └───────┘ └───────┘    │  │
//! │                                  └───────────────────────────────────┘  │
//! │                         │ miss / write                                  │
//! │                         ▼                                               │
//! │     ┌────────────────┬──────────────────┬────────────────┐              │
//! │     │   SqlBackend   │ DocumentBackend  │  FileBackend   │              │
//! │     │ sqlx + reconcile│  DocumentStore  │ <table>/<id>.json │           │
//! │     └────────────────┴──────────────────┴────────────────┘              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use modelstore::{CacheConfig, FileBackend, StorageService, TypeMap};
//!
//! let backend = FileBackend::<User>::new("data", TypeMap::default())?;
//! let users = StorageService::new(backend, CacheConfig::default());
//! users.startup()?;
//!
//! let ada = users.upsert(User { id: 0, name: "ada".into(), ..Default::default() })?;
//! assert_eq!(ada.id, 1);
//! assert_eq!(users.find(1)?, Some(ada));
//! ```
//!
//! Model types describe themselves through [`Model`]; see
//! [`schema::descriptor`] for a full example.
//!
//! ## Module Overview
//!
//! - [`schema`]: model metadata, native values and the Type Map
//! - [`cache`]: the TTL object cache and its sweeper
//! - [`service`]: [`StorageService`] and the [`Backend`] trait
//! - [`sql`]: statements, the MySQL driver, reconciliation and the SQL backend
//! - [`document`]: the document-store backend
//! - [`file`]: the flat-file backend
//! - [`error`]: error types

pub mod cache;
pub mod document;
pub mod error;
pub mod file;
pub mod schema;
pub mod service;
pub mod sql;

// Re-export commonly used types for convenience
pub use cache::{CacheConfig, CacheSweeper, ObjectCache, SweepConfig};
pub use document::{DocumentBackend, DocumentStore, MemoryDocumentStore};
pub use error::{DecodeError, Result, StorageError};
pub use file::FileBackend;
pub use schema::{Field, Identity, Model, ModelMetadata, Native, Record, SchemaDescriptor, TypeMap, Value};
pub use service::{Backend, StorageService};
pub use sql::{MemoryDatabase, MySqlDatabase, PoolConfig, SqlBackend};

/// Version of modelstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
