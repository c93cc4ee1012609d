//! Table handle.
//!
//! A [`Table`] pins one published version of a table: its metadata and the
//! pointer that published it. Handles are cheap to clone and never change
//! underneath the caller; [`Table::refresh`] and the commit helpers return
//! or load newer versions explicitly.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use snafu::prelude::*;

use crate::catalog::{Catalog, MetadataPointer, TableIdent};
use crate::error::{DataFileSnafu, TableResult};
use crate::expr::predicate::Predicate;
use crate::helpers::parquet::data_file_from_parquet_bytes;
use crate::manifest::data_file::DataFile;
use crate::metadata::partition::PartitionSpec;
use crate::metadata::schema::Schema;
use crate::metadata::snapshot::Snapshot;
use crate::metadata::table_metadata::{SnapshotLogEntry, TableMetadata};
use crate::metadata::values::Datum;
use crate::scan::TableScan;
use crate::storage::{self, layout};
use crate::transaction::Transaction;

/// One published version of a table.
#[derive(Debug, Clone)]
pub struct Table {
    ident: TableIdent,
    catalog: Catalog,
    metadata: Arc<TableMetadata>,
    pointer: MetadataPointer,
}

impl Table {
    pub(crate) fn new(
        ident: TableIdent,
        catalog: Catalog,
        metadata: TableMetadata,
        pointer: MetadataPointer,
    ) -> Self {
        Self {
            ident,
            catalog,
            metadata: Arc::new(metadata),
            pointer,
        }
    }

    /// Table identifier.
    pub fn ident(&self) -> &TableIdent {
        &self.ident
    }

    /// Catalog the table was loaded from.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Metadata of the pinned version.
    pub fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Shared handle on the pinned metadata.
    pub fn metadata_ref(&self) -> Arc<TableMetadata> {
        Arc::clone(&self.metadata)
    }

    /// Path of the metadata file of the pinned version.
    pub fn metadata_location(&self) -> &str {
        &self.pointer.metadata_location
    }

    /// Pointer that published the pinned version.
    pub fn pointer(&self) -> &MetadataPointer {
        &self.pointer
    }

    /// Current schema of the pinned version.
    pub fn schema(&self) -> TableResult<&Schema> {
        self.metadata.current_schema()
    }

    /// Default partition spec of the pinned version.
    pub fn spec(&self) -> TableResult<&PartitionSpec> {
        self.metadata.default_spec()
    }

    /// Current snapshot, if the table has one.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.metadata.current_snapshot()
    }

    /// The snapshot that was current at `timestamp_ms`.
    pub fn snapshot_as_of_timestamp(
        &self,
        timestamp_ms: i64,
        inclusive: bool,
    ) -> TableResult<&Snapshot> {
        self.metadata.snapshot_as_of_timestamp(timestamp_ms, inclusive)
    }

    /// Every change of the current snapshot, oldest first.
    pub fn history(&self) -> &[SnapshotLogEntry] {
        self.metadata.history()
    }

    /// Re-pin this handle to the latest published version.
    ///
    /// Returns whether the version changed.
    pub async fn refresh(&mut self) -> TableResult<bool> {
        let (metadata, pointer) = self.catalog.load_metadata(&self.ident).await?;
        let changed = pointer.version != self.pointer.version
            || pointer.metadata_location != self.pointer.metadata_location;
        if changed {
            debug!(
                "{}: refreshed from version {} to {}",
                self.ident, self.pointer.version, pointer.version
            );
        }
        self.metadata = Arc::new(metadata);
        self.pointer = pointer;
        Ok(changed)
    }

    /// Open a transaction based on this version.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Record updates with `f` and commit them.
    ///
    /// If `f` fails, nothing is committed and its error is returned.
    pub async fn transact<F>(&self, f: F) -> TableResult<Table>
    where
        F: FnOnce(&mut Transaction) -> TableResult<()>,
    {
        let mut txn = self.transaction();
        if let Err(e) = f(&mut txn) {
            txn.abort();
            return Err(e);
        }
        txn.commit().await
    }

    /// Append `files` in a transaction of their own.
    pub async fn append(&self, files: Vec<DataFile>) -> TableResult<Table> {
        self.transact(|txn| txn.append(files)).await
    }

    /// Replace the table contents with `files`.
    pub async fn overwrite(&self, files: Vec<DataFile>) -> TableResult<Table> {
        self.transact(|txn| txn.overwrite(files)).await
    }

    /// Delete the data files whose rows all match `filter`.
    pub async fn delete_where(&self, filter: Predicate) -> TableResult<Table> {
        self.transact(|txn| txn.delete_where(filter)).await
    }

    /// Set table properties.
    pub async fn set_properties(&self, properties: BTreeMap<String, String>) -> TableResult<Table> {
        self.transact(|txn| txn.set_properties(properties)).await
    }

    /// Make an earlier snapshot current again.
    pub async fn rollback_to_snapshot(&self, snapshot_id: i64) -> TableResult<Table> {
        self.transact(|txn| txn.rollback_to_snapshot(snapshot_id))
            .await
    }

    /// Plan reads of this version.
    pub fn scan(&self) -> TableScan<'_> {
        TableScan::new(self)
    }

    /// Fresh Parquet path under the data directory, placed in the directory
    /// of `partition` under the default spec.
    pub fn new_data_file_location(&self, partition: &[Option<Datum>]) -> TableResult<String> {
        let spec = self.metadata.default_spec()?;
        Ok(layout::data_file_path(
            self.metadata.location(),
            &spec.partition_path(partition),
            "parquet",
        ))
    }

    /// Write a Parquet payload to a fresh data path and append it.
    ///
    /// Statistics and the partition tuple come from the footer; all rows must
    /// fall into one partition of the default spec.
    pub async fn append_parquet(&self, payload: Bytes) -> TableResult<Table> {
        let schema = self.metadata.current_schema()?;
        let spec = self.metadata.default_spec()?;
        let staged = format!("{}/staged.parquet", self.metadata.location());
        let mut file = data_file_from_parquet_bytes(&staged, payload.clone(), schema, spec)
            .context(DataFileSnafu)?;

        let path = self.new_data_file_location(file.partition())?;
        storage::write_new(self.catalog.location(), Path::new(&path), &payload).await?;
        file.file_path = path;
        self.append(vec![file]).await
    }
}
