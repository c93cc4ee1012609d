//! Turns the data changes of a transaction into one new snapshot.
//!
//! New files go into one fresh manifest per partition spec. Base manifests
//! holding deleted files are rewritten: the deleted entries are marked
//! `Deleted` under the new snapshot and the survivors become `Existing`.
//! Every other base manifest with live files is reused by reference.

use std::collections::{BTreeMap, HashSet};

use log::debug;
use snafu::prelude::*;
use uuid::Uuid;

use crate::error::{
    DataFileNotFoundSnafu, DuplicateDataFileSnafu, ExpressionSnafu, PartialFileDeleteSnafu,
    SpecSnafu, TableResult,
};
use crate::expr::evaluator::{
    InclusiveMetricsEvaluator, ManifestEvaluator, PartitionEvaluator, StrictMetricsEvaluator,
};
use crate::expr::predicate::BoundPredicate;
use crate::manifest::data_file::DataFile;
use crate::manifest::entry::{Manifest, ManifestEntry, ManifestStatus};
use crate::manifest::io::{read_manifest_list, read_manifests, write_manifest, write_manifest_list};
use crate::manifest::manifest_list::{ManifestFile, ManifestList};
use crate::metadata::partition::{PartitionSpec, UnknownSpecSnafu};
use crate::metadata::schema::Schema;
use crate::metadata::snapshot::{
    ADDED_DATA_FILES, ADDED_RECORDS, DELETED_DATA_FILES, DELETED_RECORDS, Operation, Snapshot,
    Summary, TOTAL_DATA_FILES, TOTAL_RECORDS, generate_unique_snapshot_id,
};
use crate::metadata::table_metadata::{TableMetadata, TableMetadataBuilder};
use crate::storage::{StorageLocation, layout};
use crate::transaction::apply::DataChanges;

/// Where and under which attempt the producer writes.
#[derive(Debug, Clone)]
pub(crate) struct ProducerContext<'a> {
    pub(crate) location: &'a StorageLocation,
    pub(crate) attempt: u32,
}

/// Delete predicates bound against the current schema.
struct DeleteMatcher<'a> {
    meta: &'a TableMetadata,
    delete_all: bool,
    filters: Vec<BoundPredicate>,
    paths: HashSet<&'a str>,
}

enum Verdict {
    Keep,
    Delete,
}

impl<'a> DeleteMatcher<'a> {
    fn new(meta: &'a TableMetadata, changes: &'a DataChanges) -> TableResult<Self> {
        let schema = meta.current_schema()?;
        let filters = changes
            .delete_filters
            .iter()
            .map(|f| f.bind(schema, true))
            .collect::<Result<Vec<_>, _>>()
            .context(ExpressionSnafu)?;
        Ok(Self {
            meta,
            delete_all: changes.delete_all,
            filters,
            paths: changes.delete_paths.iter().map(String::as_str).collect(),
        })
    }

    fn might_touch(&self, manifest: &ManifestFile) -> bool {
        if !manifest.has_live_files() {
            return false;
        }
        if self.delete_all || !self.paths.is_empty() {
            return true;
        }
        let Some(spec) = self.meta.spec_by_id(manifest.partition_spec_id) else {
            return true;
        };
        self.filters
            .iter()
            .any(|f| ManifestEvaluator::new(f, spec).eval(manifest))
    }

    /// Schema the entry's column stats were written with.
    fn file_schema(&self, entry: &ManifestEntry, manifest: &Manifest) -> Option<&'a Schema> {
        self.meta
            .snapshot_by_id(entry.snapshot_id)
            .and_then(|s| self.meta.schema_by_id(s.schema_id()))
            .or_else(|| self.meta.schema_by_id(manifest.schema_id))
    }

    fn verdict(&self, entry: &ManifestEntry, manifest: &Manifest) -> TableResult<Verdict> {
        let file = &entry.data_file;
        if self.delete_all || self.paths.contains(file.file_path()) {
            return Ok(Verdict::Delete);
        }
        let spec = self.meta.spec_by_id(manifest.partition_spec_id);
        let file_schema = self.file_schema(entry, manifest);
        for filter in &self.filters {
            let partition_match = spec
                .map(|s| PartitionEvaluator::new(filter, s).eval(file.partition()))
                .unwrap_or(true);
            let might_match = partition_match
                && file_schema
                    .map(|s| InclusiveMetricsEvaluator::new(file, s).eval(filter))
                    .unwrap_or(true);
            if !might_match {
                continue;
            }
            let all_match = file_schema
                .is_some_and(|s| StrictMetricsEvaluator::new(file, s).eval(filter));
            ensure!(
                all_match,
                PartialFileDeleteSnafu {
                    path: file.file_path(),
                }
            );
            return Ok(Verdict::Delete);
        }
        Ok(Verdict::Keep)
    }
}

fn check_added_files(meta: &TableMetadata, added: &[DataFile]) -> TableResult<()> {
    let schema = meta.current_schema()?;
    let mut seen = HashSet::new();
    for file in added {
        ensure!(
            seen.insert(file.file_path()),
            DuplicateDataFileSnafu {
                path: file.file_path(),
            }
        );
        let spec = spec_for(meta, file.partition_spec_id())?;
        spec.validate_tuple(schema, file.file_path(), file.partition())
            .context(SpecSnafu)?;
    }
    Ok(())
}

fn spec_for(meta: &TableMetadata, spec_id: i32) -> TableResult<&PartitionSpec> {
    meta.spec_by_id(spec_id)
        .context(UnknownSpecSnafu { spec_id })
        .context(SpecSnafu)
}

#[derive(Debug, Default)]
struct Counters {
    added_files: u64,
    added_records: u64,
    deleted_files: u64,
    deleted_records: u64,
}

/// Write manifests and a manifest list for `changes` and add the resulting
/// snapshot to `builder`. Returns the new snapshot id, or `None` when the
/// changes turn out to touch nothing.
pub(crate) async fn produce_snapshot(
    ctx: &ProducerContext<'_>,
    builder: &mut TableMetadataBuilder,
    changes: &DataChanges,
) -> TableResult<Option<i64>> {
    if changes.is_empty() {
        return Ok(None);
    }

    let meta = builder.metadata();
    check_added_files(meta, &changes.added)?;

    let table_dir = meta.location().to_string();
    let schema_id = meta.current_schema_id();
    let spec_id = meta.default_spec_id();
    let snapshot_id = generate_unique_snapshot_id(meta.snapshots().iter());
    let sequence_number = meta.last_sequence_number() + 1;
    let parent = meta.current_snapshot();
    let parent_id = parent.map(Snapshot::snapshot_id);
    let concurrency = meta.table_properties()?.manifest_read_concurrency();
    let commit_uuid = Uuid::new_v4();
    let mut manifest_count = 0usize;
    let mut counters = Counters::default();

    let base_manifests = match parent {
        Some(p) => read_manifest_list(ctx.location, p.manifest_list()).await?.entries,
        None => Vec::new(),
    };

    // rewrite manifests that lose files
    let mut rewritten: Vec<ManifestFile> = Vec::new();
    let mut reused: Vec<ManifestFile>;
    let mut found_paths: HashSet<String> = HashSet::new();
    if changes.has_deletes() {
        let matcher = DeleteMatcher::new(meta, changes)?;
        let (touched, untouched): (Vec<ManifestFile>, Vec<ManifestFile>) = base_manifests
            .into_iter()
            .filter(ManifestFile::has_live_files)
            .partition(|m| matcher.might_touch(m));
        reused = untouched;

        let manifests = read_manifests(ctx.location, &touched, concurrency).await?;
        for (file, manifest) in touched.into_iter().zip(manifests) {
            let mut entries = Vec::with_capacity(manifest.entries.len());
            let mut deleted_any = false;
            for entry in manifest.live_entries() {
                match matcher.verdict(entry, &manifest)? {
                    Verdict::Keep => entries.push(ManifestEntry {
                        status: ManifestStatus::Existing,
                        ..entry.clone()
                    }),
                    Verdict::Delete => {
                        deleted_any = true;
                        found_paths.insert(entry.data_file.file_path().to_string());
                        counters.deleted_files += 1;
                        counters.deleted_records += entry.data_file.record_count();
                        entries.push(ManifestEntry {
                            status: ManifestStatus::Deleted,
                            snapshot_id,
                            sequence_number,
                            data_file: entry.data_file.clone(),
                        });
                    }
                }
            }
            if !deleted_any {
                reused.push(file);
                continue;
            }
            let rewritten_manifest = Manifest {
                partition_spec_id: manifest.partition_spec_id,
                schema_id,
                entries,
            };
            let path = layout::manifest_path(&table_dir, &commit_uuid, manifest_count);
            manifest_count += 1;
            let len = write_manifest(ctx.location, &path, &rewritten_manifest).await?;
            let width = spec_for(meta, manifest.partition_spec_id)?.fields().len();
            rewritten.push(ManifestFile::describe(
                path,
                len,
                &rewritten_manifest,
                snapshot_id,
                sequence_number,
                width,
            ));
        }

        for path in &changes.delete_paths {
            ensure!(
                found_paths.contains(path),
                DataFileNotFoundSnafu { path: path.as_str() }
            );
        }
    } else {
        reused = base_manifests
            .into_iter()
            .filter(ManifestFile::has_live_files)
            .collect();
    }

    // one new manifest per spec for added files
    let mut by_spec: BTreeMap<i32, Vec<ManifestEntry>> = BTreeMap::new();
    for file in &changes.added {
        counters.added_files += 1;
        counters.added_records += file.record_count();
        by_spec
            .entry(file.partition_spec_id())
            .or_default()
            .push(ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id,
                sequence_number,
                data_file: file.clone(),
            });
    }
    let mut added_manifests = Vec::with_capacity(by_spec.len());
    for (partition_spec_id, entries) in by_spec {
        let manifest = Manifest {
            partition_spec_id,
            schema_id,
            entries,
        };
        let path = layout::manifest_path(&table_dir, &commit_uuid, manifest_count);
        manifest_count += 1;
        let len = write_manifest(ctx.location, &path, &manifest).await?;
        let width = spec_for(meta, partition_spec_id)?.fields().len();
        added_manifests.push(ManifestFile::describe(
            path,
            len,
            &manifest,
            snapshot_id,
            sequence_number,
            width,
        ));
    }

    if counters.added_files == 0 && counters.deleted_files == 0 {
        debug!("transaction on {table_dir} matched no data files; no snapshot written");
        return Ok(None);
    }

    let entries: Vec<ManifestFile> = added_manifests
        .into_iter()
        .chain(rewritten)
        .chain(reused)
        .collect();
    let total_files: u64 = entries.iter().map(ManifestFile::live_files_count).sum();
    let total_records: u64 = entries.iter().map(ManifestFile::live_rows_count).sum();

    let list_path = layout::manifest_list_path(&table_dir, snapshot_id, ctx.attempt);
    write_manifest_list(
        ctx.location,
        &list_path,
        &ManifestList {
            snapshot_id,
            entries,
        },
    )
    .await?;

    // a replace that matched nothing is still an overwrite, not an append
    let replaces = counters.deleted_files > 0 || changes.has_deletes();
    let operation = match (counters.added_files > 0, replaces) {
        (true, false) => Operation::Append,
        (true, true) => Operation::Overwrite,
        (false, _) => Operation::Delete,
    };
    let properties = BTreeMap::from([
        (ADDED_DATA_FILES.to_string(), counters.added_files.to_string()),
        (ADDED_RECORDS.to_string(), counters.added_records.to_string()),
        (DELETED_DATA_FILES.to_string(), counters.deleted_files.to_string()),
        (DELETED_RECORDS.to_string(), counters.deleted_records.to_string()),
        (TOTAL_DATA_FILES.to_string(), total_files.to_string()),
        (TOTAL_RECORDS.to_string(), total_records.to_string()),
    ]);
    let snapshot = Snapshot {
        snapshot_id,
        parent_snapshot_id: parent_id,
        sequence_number,
        timestamp_ms: builder.next_timestamp_ms(),
        manifest_list: list_path,
        schema_id,
        spec_id,
        summary: Summary {
            operation,
            properties,
        },
    };
    debug!(
        "snapshot {snapshot_id} on {table_dir}: {:?}, +{} -{} files",
        operation, counters.added_files, counters.deleted_files
    );
    builder.add_snapshot(snapshot)?;
    Ok(Some(snapshot_id))
}
