//! Document Module
//!
//! The document-database backend and the store seam it talks to.

pub mod backend;
pub mod store;

pub use backend::DocumentBackend;
pub use store::{Document, DocumentStore, Filter, MemoryDocumentStore, ReplaceOutcome};
