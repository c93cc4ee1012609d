//! # snapshot-table-format
//!
//! Snapshot-isolated table format with schema and partition evolution, time
//! travel and atomic optimistic commits.
//!
//! This crate is the supported public entry point and provides a small, stable surface.
//!
//! ## Example
//!
//! ```rust,no_run
//! use snapshot_table_format::prelude::*;
//! use std::collections::BTreeMap;
//!
//! # async fn demo() -> Result<(), TableError> {
//! let catalog = Catalog::new(StorageLocation::local("/tmp/warehouse"));
//! let ns: NamespaceIdent = "analytics".parse()?;
//! catalog.create_namespace_if_not_exists(&ns, BTreeMap::new()).await?;
//!
//! let schema = Schema::new(
//!     0,
//!     vec![
//!         NestedField::required(1, "id", PrimitiveType::Long),
//!         NestedField::optional(2, "day", PrimitiveType::Date),
//!     ],
//! )
//! .map_err(|source| TableError::Schema { source })?;
//! let table = catalog
//!     .create_table(
//!         &TableIdent::new(ns, "events")?,
//!         schema,
//!         &[UnboundPartitionField::new("day", Transform::Month)],
//!         BTreeMap::new(),
//!     )
//!     .await?;
//!
//! let plan = table
//!     .scan()
//!     .with_filter(Reference::new("id").greater_than(100_i64))
//!     .plan_files()
//!     .await?;
//! println!("{} files to read", plan.tasks.len());
//! # Ok(())
//! # }
//! ```

/// Convenience prelude with the stable, supported surface.
pub mod prelude;

/// Row filter construction.
pub mod expr {
    pub use snapshot_table_core::expr::{Predicate, PredicateOperator, Reference};
}

/// Parquet footer helpers.
pub mod parquet {
    pub use snapshot_table_core::helpers::parquet::data_file_from_parquet_bytes;
}

pub use snapshot_table_core::catalog::{Catalog, MetadataPointer, NamespaceIdent, TableIdent};
pub use snapshot_table_core::error::{TableError, TableResult};
pub use snapshot_table_core::manifest::{DataFile, DataFileBuilder, DataFileFormat};
pub use snapshot_table_core::metadata::{
    Datum, NestedField, Operation, PartitionField, PartitionSpec, PrimitiveType, Schema, Snapshot,
    TableMetadata, TableProperties, Transform, Type, UnboundPartitionField,
};
pub use snapshot_table_core::scan::{FileScanTask, ScanPlan, TableScan};
pub use snapshot_table_core::storage::StorageLocation;
pub use snapshot_table_core::table::Table;
pub use snapshot_table_core::transaction::{
    SchemaUpdate, SpecUpdate, Transaction, TransactionState,
};
