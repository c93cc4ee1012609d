//! Core engine for a snapshot-isolated table format.
//!
//! This crate provides the metadata layer for `snapshot-table-format`:
//!
//! - Schemas with stable field ids and additive, id-preserving evolution;
//!   partition specs built from transforms, with spec evolution
//!   (`metadata` module).
//! - Immutable snapshots over manifest lists and manifests that describe
//!   data files with per-column statistics (`manifest` module).
//! - A catalog of namespaces and tables whose only mutable state is a
//!   create-new pointer log (`catalog` module).
//! - Optimistic transactions that replay their updates onto newer versions
//!   when another writer wins a race (`transaction` module).
//! - Row filters, partition projection and statistics-based scan planning,
//!   including time travel by snapshot id or timestamp (`expr` and `scan`
//!   modules).
//! - Local and in-memory storage backends (`storage` module).
//!
//! Data files are written by the caller. The only file contents this crate
//! reads are Parquet footers (`helpers` module), to describe a written file
//! as a [`DataFile`].
#![deny(missing_docs)]
pub mod catalog;
pub mod error;
pub mod expr;
pub mod helpers;
pub mod manifest;
pub mod metadata;
pub mod scan;
pub mod storage;
pub mod table;
pub mod transaction;

#[cfg(test)]
pub(crate) mod test_util;

pub use catalog::{Catalog, NamespaceIdent, TableIdent};
pub use error::{TableError, TableResult};
pub use manifest::DataFile;
pub use scan::{FileScanTask, ScanPlan, TableScan};
pub use storage::StorageLocation;
pub use table::Table;
pub use transaction::{Transaction, TransactionState};
