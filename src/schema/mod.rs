//! Schema Module
//!
//! Everything a storage service knows about a model type:
//!
//! - [`types`]: the Type Map, native types and their backend representations
//! - [`value`]: native field values and record identities
//! - [`codec`]: the structured fallback codec
//! - [`descriptor`]: model metadata and the validated Schema Descriptor

pub mod codec;
pub mod descriptor;
pub mod types;
pub mod value;

pub use codec::{JsonCodec, StructuredCodec};
pub use descriptor::{Field, Model, ModelMetadata, Record, SchemaDescriptor};
pub use types::{NativeType, TypeMap};
pub use value::{Identity, Native, Value};
