//! SQL Module
//!
//! The relational backend and everything under it:
//!
//! - [`statement`]: typed statements rendering MySQL text
//! - [`connection`]: the driver seam ([`SqlConnection`], [`ConnectionManager`])
//! - [`mysql`]: the MySQL driver over a sqlx connection pool
//! - [`reconcile`]: the Schema Reconciliation Engine
//! - [`backend`]: [`SqlBackend`], the storage backend over a connection manager
//! - [`memory`]: an in-process engine implementing the driver seam
//!
//! ## Architecture
//!
//! ```text
//!   StorageService ──> SqlBackend ──> M::connect() ──> M::Connection
//!                          │                          ▲
//!                          │ startup()                │ Statement
//!                          ▼                          │
//!                     reconcile() ────────────────────┘
//! ```

pub mod backend;
pub mod connection;
pub mod memory;
pub mod mysql;
pub mod reconcile;
pub mod statement;
pub mod value;

pub use backend::SqlBackend;
pub use connection::{ColumnInfo, ConnectionManager, Row, SqlConnection};
pub use memory::{MemoryConnection, MemoryDatabase};
pub use mysql::{MySqlConnection, MySqlDatabase, PoolConfig};
pub use reconcile::{reconcile, Reconciliation};
pub use statement::{ColumnDef, Statement};
pub use value::SqlValue;
