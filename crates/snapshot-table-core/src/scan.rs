//! Scan planning.
//!
//! [`TableScan`] turns a snapshot and a row filter into the list of data
//! files a reader has to open:
//!
//! - the filter is bound against the current schema, or against the schema
//!   of the chosen snapshot when reading an older snapshot,
//! - manifests whose partition summaries cannot satisfy the filter are
//!   skipped without being read,
//! - surviving manifests are read concurrently and each live file is checked
//!   against its partition tuple and column statistics.
//!
//! Statistics are read with the schema of the snapshot that added the file,
//! so a column added later counts as all-null for older files. Rows are never
//! read here; the residual on each task tells the reader what still has to be
//! filtered.

use std::collections::HashMap;

use log::debug;
use snafu::prelude::*;

use crate::error::{ExpressionSnafu, SchemaSnafu, TableResult};
use crate::expr::evaluator::{
    InclusiveMetricsEvaluator, ManifestEvaluator, PartitionEvaluator, StrictMetricsEvaluator,
};
use crate::expr::predicate::{BoundPredicate, Predicate};
use crate::manifest::data_file::DataFile;
use crate::manifest::entry::{Manifest, ManifestEntry};
use crate::manifest::io::{read_manifest_list, read_manifests};
use crate::metadata::schema::Schema;
use crate::metadata::snapshot::Snapshot;
use crate::metadata::table_metadata::TableMetadata;
use crate::table::Table;

/// One data file to read, with what is left of the row filter.
#[derive(Debug, Clone, PartialEq)]
pub struct FileScanTask {
    /// File to read.
    pub data_file: DataFile,
    /// Filter the reader still has to apply. `AlwaysTrue` when statistics
    /// prove every row matches.
    pub residual: Predicate,
    /// Spec the file's partition tuple was written under.
    pub partition_spec_id: i32,
    /// Schema the file's column statistics refer to.
    pub schema_id: i32,
    /// Field ids to read.
    pub project_field_ids: Vec<i32>,
}

/// Result of planning a scan.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    /// Snapshot planned, `None` for a table without snapshots.
    pub snapshot_id: Option<i64>,
    /// Projected read schema.
    pub schema: Schema,
    /// Files to read, in manifest order.
    pub tasks: Vec<FileScanTask>,
    /// Manifests read.
    pub manifests_scanned: usize,
    /// Manifests pruned by their partition summaries.
    pub manifests_skipped: usize,
    /// Live files pruned by partition values or column statistics.
    pub files_skipped: usize,
}

impl ScanPlan {
    /// Sum of the record counts of all tasks.
    pub fn record_count(&self) -> u64 {
        self.tasks.iter().map(|t| t.data_file.record_count()).sum()
    }
}

/// Builder for a scan of one table version.
#[derive(Debug, Clone)]
pub struct TableScan<'a> {
    table: &'a Table,
    snapshot_id: Option<i64>,
    as_of: Option<(i64, bool)>,
    filter: Predicate,
    selected: Option<Vec<String>>,
    limit: Option<u64>,
    case_sensitive: bool,
}

impl<'a> TableScan<'a> {
    pub(crate) fn new(table: &'a Table) -> Self {
        Self {
            table,
            snapshot_id: None,
            as_of: None,
            filter: Predicate::AlwaysTrue,
            selected: None,
            limit: None,
            case_sensitive: true,
        }
    }

    /// Scan a specific snapshot instead of the current one.
    pub fn snapshot_id(mut self, snapshot_id: i64) -> Self {
        self.snapshot_id = Some(snapshot_id);
        self.as_of = None;
        self
    }

    /// Scan the snapshot that was current at `timestamp_ms`.
    pub fn as_of_timestamp(mut self, timestamp_ms: i64, inclusive: bool) -> Self {
        self.as_of = Some((timestamp_ms, inclusive));
        self.snapshot_id = None;
        self
    }

    /// Add a row filter; repeated calls are combined with `AND`.
    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = std::mem::replace(&mut self.filter, Predicate::AlwaysTrue).and(filter);
        self
    }

    /// Read only these top-level columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Stop planning once files known to match fully hold `rows` records.
    pub fn limit(mut self, rows: u64) -> Self {
        self.limit = Some(rows);
        self
    }

    /// Match column names case-insensitively when `false`.
    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    fn resolve_snapshot(&self) -> TableResult<Option<&'a Snapshot>> {
        let meta = self.table.metadata();
        if let Some(id) = self.snapshot_id {
            return meta.require_snapshot(id).map(Some);
        }
        if let Some((ts, inclusive)) = self.as_of {
            return meta.snapshot_as_of_timestamp(ts, inclusive).map(Some);
        }
        Ok(meta.current_snapshot())
    }

    /// Plan the scan.
    pub async fn plan_files(&self) -> TableResult<ScanPlan> {
        let meta = self.table.metadata();
        let snapshot = self.resolve_snapshot()?;
        let time_travel = self.snapshot_id.is_some() || self.as_of.is_some();
        let schema = match snapshot {
            Some(s) if time_travel => meta.schema_for_snapshot(s)?,
            _ => meta.current_schema()?,
        };
        let bound = self
            .filter
            .bind(schema, self.case_sensitive)
            .context(ExpressionSnafu)?;
        let project_field_ids = match &self.selected {
            Some(names) => schema
                .select(names, self.case_sensitive)
                .context(SchemaSnafu)?,
            None => schema.fields().iter().map(|f| f.id).collect(),
        };

        let mut plan = ScanPlan {
            snapshot_id: snapshot.map(Snapshot::snapshot_id),
            schema: schema.project(&project_field_ids),
            tasks: Vec::new(),
            manifests_scanned: 0,
            manifests_skipped: 0,
            files_skipped: 0,
        };
        let Some(snapshot) = snapshot else {
            return Ok(plan);
        };
        if matches!(bound, BoundPredicate::AlwaysFalse) {
            debug!("{}: filter is never true; nothing to scan", self.table.ident());
            return Ok(plan);
        }

        let location = self.table.catalog().location();
        let list = read_manifest_list(location, snapshot.manifest_list()).await?;
        let mut evaluators: HashMap<i32, ManifestEvaluator> = HashMap::new();
        let mut selected = Vec::new();
        for manifest in list.entries {
            if !manifest.has_live_files() {
                continue;
            }
            let keep = match meta.spec_by_id(manifest.partition_spec_id) {
                Some(spec) => evaluators
                    .entry(spec.spec_id())
                    .or_insert_with(|| ManifestEvaluator::new(&bound, spec))
                    .eval(&manifest),
                None => true,
            };
            if keep {
                selected.push(manifest);
            } else {
                plan.manifests_skipped += 1;
            }
        }
        plan.manifests_scanned = selected.len();

        let concurrency = meta.table_properties()?.manifest_read_concurrency();
        let manifests = read_manifests(location, &selected, concurrency).await?;

        let mut planner = FilePlanner {
            meta,
            filter: &self.filter,
            bound: &bound,
            partition_evaluators: HashMap::new(),
        };
        let mut fully_matched_rows = 0u64;
        'manifests: for manifest in &manifests {
            for entry in manifest.live_entries() {
                let Some(residual) = planner.plan_entry(manifest, entry) else {
                    plan.files_skipped += 1;
                    continue;
                };
                let complete = residual.is_always_true();
                plan.tasks.push(FileScanTask {
                    data_file: entry.data_file.clone(),
                    residual,
                    partition_spec_id: manifest.partition_spec_id,
                    schema_id: planner
                        .file_schema(entry, manifest)
                        .map_or(schema.schema_id(), Schema::schema_id),
                    project_field_ids: project_field_ids.clone(),
                });
                if complete {
                    fully_matched_rows += entry.data_file.record_count();
                }
                if self.limit.is_some_and(|limit| fully_matched_rows >= limit) {
                    break 'manifests;
                }
            }
        }

        debug!(
            "{}: planned snapshot {} with {} files ({} manifests scanned, {} skipped, {} files skipped)",
            self.table.ident(),
            snapshot.snapshot_id(),
            plan.tasks.len(),
            plan.manifests_scanned,
            plan.manifests_skipped,
            plan.files_skipped
        );
        Ok(plan)
    }
}

struct FilePlanner<'m> {
    meta: &'m TableMetadata,
    filter: &'m Predicate,
    bound: &'m BoundPredicate,
    partition_evaluators: HashMap<i32, PartitionEvaluator>,
}

impl<'m> FilePlanner<'m> {
    fn file_schema(&self, entry: &ManifestEntry, manifest: &Manifest) -> Option<&'m Schema> {
        self.meta
            .snapshot_by_id(entry.snapshot_id)
            .and_then(|s| self.meta.schema_by_id(s.schema_id()))
            .or_else(|| self.meta.schema_by_id(manifest.schema_id))
    }

    /// Residual filter for a live entry, or `None` when the file is pruned.
    fn plan_entry(&mut self, manifest: &Manifest, entry: &ManifestEntry) -> Option<Predicate> {
        let data_file = &entry.data_file;
        let meta = self.meta;
        if let Some(spec) = meta.spec_by_id(manifest.partition_spec_id) {
            let bound = self.bound;
            let evaluator = self
                .partition_evaluators
                .entry(spec.spec_id())
                .or_insert_with(|| PartitionEvaluator::new(bound, spec));
            if !evaluator.eval(data_file.partition()) {
                return None;
            }
        }
        let Some(file_schema) = self.file_schema(entry, manifest) else {
            return Some(self.filter.clone());
        };
        if !InclusiveMetricsEvaluator::new(data_file, file_schema).eval(self.bound) {
            return None;
        }
        if StrictMetricsEvaluator::new(data_file, file_schema).eval(self.bound) {
            Some(Predicate::AlwaysTrue)
        } else {
            Some(self.filter.clone())
        }
    }
}
