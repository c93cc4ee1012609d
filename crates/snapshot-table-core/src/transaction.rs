//! Optimistic transactions.
//!
//! A [`Transaction`] records [`TableUpdate`]s against the table version it was
//! opened on. Nothing is written until [`Transaction::commit`], which:
//!
//! 1. reloads the current pointer,
//! 2. replays the recorded updates on the version it found (schema, then
//!    spec, then properties, then data),
//! 3. writes manifests, a manifest list and the next metadata file,
//! 4. moves the pointer with a compare-and-swap.
//!
//! If another writer moved the pointer in between, the attempt is discarded
//! and the loop starts over after a backoff, up to
//! `commit.retry.num-retries` retries. Updates that no longer apply to the
//! newer version (a renamed column was renamed again, a deleted file is gone)
//! fail the commit with [`TableError::ConcurrentModification`]. So does an
//! overwrite that would replace data files appended after it was recorded.

pub(crate) mod apply;
pub(crate) mod snapshot_producer;
pub mod update;

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::{debug, info, warn};
use snafu::prelude::*;

use crate::error::{
    CommitConflictSnafu, ConcurrentModificationSnafu, DuplicateDataFileSnafu, ExpressionSnafu,
    SpecSnafu, TableError, TableResult, TransactionClosedSnafu,
};
use crate::expr::predicate::Predicate;
use crate::manifest::data_file::DataFile;
use crate::manifest::io::write_json_new;
use crate::metadata::partition::UnknownSpecSnafu;
use crate::metadata::snapshot::ADDED_DATA_FILES;
use crate::metadata::table_metadata::{TableMetadata, TableMetadataBuilder};
use crate::storage::layout;
use crate::table::Table;

use apply::{DataChanges, apply_metadata_updates};
use snapshot_producer::{ProducerContext, produce_snapshot};

pub use update::{SchemaUpdate, SpecUpdate, TableUpdate};

/// Lifecycle of a [`Transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Accepting updates.
    Open,
    /// Replaying updates on the current version.
    Validating,
    /// Publishing the new version.
    Committing,
    /// The last attempt lost the pointer race; a retry may follow.
    Conflict,
    /// The new version is published.
    Committed,
    /// Abandoned by the caller or by a failed commit.
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionState::Open => "open",
            TransactionState::Validating => "validating",
            TransactionState::Committing => "committing",
            TransactionState::Conflict => "conflicted",
            TransactionState::Committed => "committed",
            TransactionState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A set of table changes committed atomically.
///
/// Obtained from [`Table::transaction`]. The transaction borrows nothing from
/// the table handle; it keeps its own copy of the base version.
#[derive(Debug)]
pub struct Transaction {
    base: Table,
    updates: Vec<TableUpdate>,
    state: TransactionState,
}

/// Errors that mean the recorded updates do not fit the table any more.
fn is_replay_failure(err: &TableError) -> bool {
    matches!(
        err,
        TableError::Schema { .. }
            | TableError::Spec { .. }
            | TableError::Expression { .. }
            | TableError::DataFileNotFound { .. }
            | TableError::PartialFileDelete { .. }
            | TableError::SnapshotNotFound { .. }
    )
}

impl Transaction {
    pub(crate) fn new(base: Table) -> Self {
        Self {
            base,
            updates: Vec::new(),
            state: TransactionState::Open,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// The table version the transaction was opened on.
    pub fn base(&self) -> &Table {
        &self.base
    }

    /// Updates recorded so far, in call order.
    pub fn updates(&self) -> &[TableUpdate] {
        &self.updates
    }

    fn ensure_open(&self) -> TableResult<()> {
        ensure!(
            self.state == TransactionState::Open,
            TransactionClosedSnafu {
                state: self.state.to_string(),
            }
        );
        Ok(())
    }

    /// Base metadata with every recorded metadata update applied.
    pub(crate) fn preview(&self) -> TableResult<TableMetadataBuilder> {
        apply_metadata_updates(self.base.metadata(), &self.updates)
    }

    /// Record `update` if the transaction is open and the update applies to
    /// the transaction's view of the table.
    pub(crate) fn push(&mut self, update: TableUpdate) -> TableResult<()> {
        self.ensure_open()?;
        self.updates.push(update);
        if let Err(e) = self.preview() {
            self.updates.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Start a block of schema changes.
    pub fn update_schema(&mut self) -> TableResult<SchemaUpdate<'_>> {
        self.ensure_open()?;
        SchemaUpdate::new(self)
    }

    /// Start a block of partition spec changes.
    pub fn update_spec(&mut self) -> TableResult<SpecUpdate<'_>> {
        self.ensure_open()?;
        SpecUpdate::new(self)
    }

    fn check_new_files(&self, files: &[DataFile]) -> TableResult<()> {
        let preview = self.preview()?;
        let meta = preview.metadata();
        let schema = meta.current_schema()?;
        let mut seen: HashSet<String> = DataChanges::collect(&self.updates)
            .added
            .into_iter()
            .map(|f| f.file_path().to_string())
            .collect();
        for file in files {
            ensure!(
                seen.insert(file.file_path().to_string()),
                DuplicateDataFileSnafu {
                    path: file.file_path(),
                }
            );
            let spec = meta
                .spec_by_id(file.partition_spec_id())
                .context(UnknownSpecSnafu {
                    spec_id: file.partition_spec_id(),
                })
                .context(SpecSnafu)?;
            spec.validate_tuple(schema, file.file_path(), file.partition())
                .context(SpecSnafu)?;
        }
        Ok(())
    }

    fn check_filter(&self, filter: &Predicate) -> TableResult<()> {
        let preview = self.preview()?;
        filter
            .bind(preview.metadata().current_schema()?, true)
            .context(ExpressionSnafu)?;
        Ok(())
    }

    /// Add data files.
    pub fn append(&mut self, files: Vec<DataFile>) -> TableResult<()> {
        self.ensure_open()?;
        self.check_new_files(&files)?;
        self.push(TableUpdate::Append(files))
    }

    /// Replace the table contents with `files`.
    pub fn overwrite(&mut self, files: Vec<DataFile>) -> TableResult<()> {
        self.ensure_open()?;
        // earlier appends are dropped by the overwrite, so only check these
        let mut seen = HashSet::new();
        for file in &files {
            ensure!(
                seen.insert(file.file_path()),
                DuplicateDataFileSnafu {
                    path: file.file_path(),
                }
            );
        }
        self.push(TableUpdate::Overwrite(files))
    }

    /// Delete the files matching `filter` and add `files` in one snapshot.
    pub fn overwrite_by_filter(&mut self, filter: Predicate, files: Vec<DataFile>) -> TableResult<()> {
        self.ensure_open()?;
        self.check_filter(&filter)?;
        self.check_new_files(&files)?;
        self.push(TableUpdate::OverwriteByFilter { filter, files })
    }

    /// Delete every data file whose rows all match `filter`.
    ///
    /// Commit fails with [`TableError::PartialFileDelete`] if a file matches
    /// only partly.
    pub fn delete_where(&mut self, filter: Predicate) -> TableResult<()> {
        self.ensure_open()?;
        self.check_filter(&filter)?;
        self.push(TableUpdate::DeleteWhere(filter))
    }

    /// Delete data files by path.
    pub fn delete_files<I, S>(&mut self, paths: I) -> TableResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TableUpdate::DeleteFiles(
            paths.into_iter().map(Into::into).collect(),
        ))
    }

    /// Set table properties.
    pub fn set_properties(&mut self, properties: BTreeMap<String, String>) -> TableResult<()> {
        self.push(TableUpdate::SetProperties(properties))
    }

    /// Remove table properties. Missing keys are ignored.
    pub fn remove_properties<I, S>(&mut self, keys: I) -> TableResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(TableUpdate::RemoveProperties(
            keys.into_iter().map(Into::into).collect(),
        ))
    }

    /// Make an earlier snapshot current again.
    pub fn rollback_to_snapshot(&mut self, snapshot_id: i64) -> TableResult<()> {
        self.push(TableUpdate::RollbackTo { snapshot_id })
    }

    /// Discard the recorded updates.
    pub fn abort(&mut self) {
        if self.state != TransactionState::Committed {
            self.state = TransactionState::Aborted;
            self.updates.clear();
        }
    }

    fn fail(&mut self, err: TableError) -> TableError {
        self.state = TransactionState::Aborted;
        err
    }

    /// Commit the recorded updates, retrying on concurrent commits.
    ///
    /// Returns a handle on the published version. A transaction without
    /// updates publishes nothing and returns the current version.
    pub async fn commit(&mut self) -> TableResult<Table> {
        self.ensure_open()?;
        let ident = self.base.ident().clone();
        let catalog = self.base.catalog().clone();

        if self.updates.is_empty() {
            self.state = TransactionState::Committed;
            return catalog.load_table(&ident).await;
        }

        let max_attempts = match self.base.metadata().table_properties() {
            Ok(props) => props.commit_max_attempts(),
            Err(e) => return Err(self.fail(e)),
        };
        let changes_spec = self
            .updates
            .iter()
            .any(|u| matches!(u, TableUpdate::Spec(_)));
        let overwrites = self.updates.iter().any(|u| {
            matches!(
                u,
                TableUpdate::Overwrite(_) | TableUpdate::OverwriteByFilter { .. }
            )
        });
        let data = DataChanges::collect(&self.updates);

        for attempt in 1..=max_attempts {
            self.state = TransactionState::Validating;
            let (current, pointer) = match catalog.load_metadata(&ident).await {
                Ok(loaded) => loaded,
                Err(e) => return Err(self.fail(e)),
            };
            let base_meta = self.base.metadata();
            if current.table_uuid() != base_meta.table_uuid() {
                return Err(self.fail(
                    ConcurrentModificationSnafu {
                        ident: ident.to_string(),
                        reason: "the table was dropped and recreated",
                    }
                    .build(),
                ));
            }

            let rebased = pointer.version != self.base.pointer().version;
            if rebased {
                debug!(
                    "{ident}: rebasing from version {} onto {}",
                    self.base.pointer().version,
                    pointer.version
                );
            }
            if rebased && changes_spec && specs_changed(base_meta, &current) {
                return Err(self.fail(
                    ConcurrentModificationSnafu {
                        ident: ident.to_string(),
                        reason: "the partition spec was changed concurrently",
                    }
                    .build(),
                ));
            }

            if rebased && overwrites && files_added_since(base_meta, &current) {
                return Err(self.fail(
                    ConcurrentModificationSnafu {
                        ident: ident.to_string(),
                        reason: "data files were added concurrently to the overwritten table",
                    }
                    .build(),
                ));
            }

            let ctx = ProducerContext {
                location: catalog.location(),
                attempt,
            };
            let next = match self.next_version(&ctx, &current, &pointer.metadata_location, &data).await
            {
                Ok(next) => next,
                Err(e) if rebased && is_replay_failure(&e) => {
                    return Err(self.fail(
                        ConcurrentModificationSnafu {
                            ident: ident.to_string(),
                            reason: e.to_string(),
                        }
                        .build(),
                    ));
                }
                Err(e) => return Err(self.fail(e)),
            };

            let metadata_location = layout::metadata_file_path(current.location(), pointer.version + 1);
            if let Err(e) =
                write_json_new(catalog.location(), &metadata_location, "table metadata", &next).await
            {
                return Err(self.fail(e));
            }

            self.state = TransactionState::Committing;
            let swapped = match catalog
                .swap_pointer(&ident, Some(&pointer), &metadata_location, next.table_uuid())
                .await
            {
                Ok(swapped) => swapped,
                Err(e) => return Err(self.fail(e)),
            };
            if let Some(published) = swapped {
                self.state = TransactionState::Committed;
                self.updates.clear();
                info!(
                    "{ident}: committed version {} on attempt {attempt}",
                    published.version
                );
                return Ok(Table::new(ident, catalog, next, published));
            }

            self.state = TransactionState::Conflict;
            if attempt < max_attempts {
                let backoff = current
                    .table_properties()
                    .map(|p| p.commit_backoff(attempt))
                    .unwrap_or_default();
                warn!(
                    "{ident}: commit attempt {attempt}/{max_attempts} lost the pointer race; retrying in {backoff:?}"
                );
                tokio::time::sleep(backoff).await;
            }
        }

        Err(self.fail(
            CommitConflictSnafu {
                ident: ident.to_string(),
                attempts: max_attempts,
            }
            .build(),
        ))
    }

    async fn next_version(
        &self,
        ctx: &ProducerContext<'_>,
        current: &TableMetadata,
        current_location: &str,
        data: &DataChanges,
    ) -> TableResult<TableMetadata> {
        let mut builder = apply_metadata_updates(current, &self.updates)?;
        produce_snapshot(ctx, &mut builder, data).await?;
        builder.build(Some(current_location))
    }
}

fn specs_changed(base: &TableMetadata, current: &TableMetadata) -> bool {
    base.default_spec_id() != current.default_spec_id()
        || base.partition_specs().len() != current.partition_specs().len()
}

/// Whether any snapshot committed on top of `base`'s current snapshot added
/// data files. A concurrent rollback hides the base snapshot, in which case the
/// whole chain is checked.
fn files_added_since(base: &TableMetadata, current: &TableMetadata) -> bool {
    let Some(head) = current.current_snapshot_id() else {
        return false;
    };
    let seen = base.current_snapshot_id();
    current
        .ancestors_of(head)
        .take_while(|s| Some(s.snapshot_id()) != seen)
        .any(|s| s.summary().get_u64(ADDED_DATA_FILES).unwrap_or(0) > 0)
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Open && !self.updates.is_empty() {
            warn!(
                "transaction on {} dropped with {} uncommitted updates",
                self.base.ident(),
                self.updates.len()
            );
        }
    }
}
