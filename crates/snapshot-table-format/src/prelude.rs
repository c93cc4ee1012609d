//! Wrapper prelude.
//!
//! The `snapshot-table-format` crate is the supported public entry point.
//! Downstream code should prefer importing from this prelude instead of
//! depending on internal core module paths.

pub use crate::expr::{Predicate, Reference};
pub use crate::{
    Catalog, DataFile, Datum, NamespaceIdent, NestedField, Operation, PrimitiveType, ScanPlan,
    Schema, StorageLocation, Table, TableError, TableIdent, TableResult, Transaction,
    TransactionState, Transform, UnboundPartitionField,
};
