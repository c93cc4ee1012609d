//! Table metadata model.
//!
//! This module holds the immutable, versioned description of a table:
//!
//! - column types and literal values (`types`, `values`);
//! - schemas and their evolution (`schema`, `schema_update`);
//! - partition transforms, specs and spec evolution (`transform`,
//!   `partition`, `spec_update`);
//! - snapshots and the top-level [`TableMetadata`] with its snapshot and
//!   metadata logs (`snapshot`, `table_metadata`);
//! - the typed view over table properties (`properties`).
//!
//! Nothing here performs IO; persistence lives in `catalog` and
//! `transaction`.

pub mod partition;
pub mod properties;
pub mod schema;
pub mod schema_update;
pub mod snapshot;
pub mod spec_update;
pub mod table_metadata;
pub mod transform;
pub mod types;
pub mod values;

pub use partition::{PartitionField, PartitionSpec, SpecError, UnboundPartitionField};
pub use properties::{PropertyError, TableProperties};
pub use schema::{Schema, SchemaError};
pub use snapshot::{Operation, Snapshot, Summary};
pub use table_metadata::{MetadataLogEntry, SnapshotLogEntry, TableMetadata};
pub use transform::Transform;
pub use types::{ListType, MapType, NestedField, PrimitiveType, StructType, Type};
pub use values::Datum;
