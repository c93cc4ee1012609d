//! Versioned table metadata.
//!
//! A [`TableMetadata`] value is the full description of a table at one
//! version: every schema and partition spec it ever had, all live snapshots,
//! the snapshot log used for time travel and the log of previous metadata
//! files. Published metadata is never mutated; commits derive the next
//! version through [`TableMetadataBuilder`].

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use uuid::Uuid;

use crate::error::{
    CorruptMetadataSnafu, InvalidPropertySnafu, NoSnapshotAsOfSnafu, SnapshotNotFoundSnafu,
    SpecSnafu, TableResult,
};
use crate::metadata::partition::{PartitionSpec, UnboundPartitionField};
use crate::metadata::properties::TableProperties;
use crate::metadata::schema::Schema;
use crate::metadata::snapshot::{Snapshot, TOTAL_DATA_FILES};
use crate::metadata::spec_update::{SpecChange, SpecEvolutionContext, apply_spec_changes};

/// Metadata format version written by this crate.
pub const FORMAT_VERSION: u32 = 2;

/// One change of the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotLogEntry {
    /// Snapshot that became current.
    pub snapshot_id: i64,
    /// When it became current, in epoch milliseconds.
    pub timestamp_ms: i64,
}

/// A metadata file that was replaced by a later version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataLogEntry {
    /// Path of the previous metadata file.
    pub metadata_file: String,
    /// `last_updated_ms` of that version.
    pub timestamp_ms: i64,
}

/// Complete table state at one metadata version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub(crate) format_version: u32,
    pub(crate) table_uuid: Uuid,
    pub(crate) location: String,
    pub(crate) last_sequence_number: u64,
    pub(crate) last_updated_ms: i64,
    pub(crate) last_column_id: i32,
    pub(crate) schemas: Vec<Schema>,
    pub(crate) current_schema_id: i32,
    pub(crate) partition_specs: Vec<PartitionSpec>,
    pub(crate) default_spec_id: i32,
    pub(crate) last_partition_id: i32,
    #[serde(default)]
    pub(crate) properties: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) current_snapshot_id: Option<i64>,
    #[serde(default)]
    pub(crate) snapshots: Vec<Snapshot>,
    #[serde(default)]
    pub(crate) snapshot_log: Vec<SnapshotLogEntry>,
    #[serde(default)]
    pub(crate) metadata_log: Vec<MetadataLogEntry>,
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

impl TableMetadata {
    /// Metadata for a brand-new table.
    ///
    /// The schema becomes schema 0 and keeps the field ids it carries. The
    /// partition fields are bound against it to form spec 0.
    pub fn new_table(
        location: impl Into<String>,
        schema: Schema,
        partition_fields: &[UnboundPartitionField],
        properties: BTreeMap<String, String>,
    ) -> TableResult<Self> {
        TableProperties::try_from_map(&properties).context(InvalidPropertySnafu)?;

        let schema = schema.with_schema_id(0);
        let changes = partition_fields
            .iter()
            .map(|f| SpecChange::add(&schema, f))
            .collect::<Result<Vec<_>, _>>()
            .context(SpecSnafu)?;
        let unpartitioned = PartitionSpec::unpartitioned();
        let mut ctx = SpecEvolutionContext {
            schema: &schema,
            last_partition_id: unpartitioned.highest_field_id(),
            historical_specs: &[],
        };
        let spec = apply_spec_changes(&unpartitioned, &changes, 0, &mut ctx).context(SpecSnafu)?;
        let last_partition_id = ctx.last_partition_id;

        Ok(Self {
            format_version: FORMAT_VERSION,
            table_uuid: Uuid::new_v4(),
            location: location.into(),
            last_sequence_number: 0,
            last_updated_ms: now_ms(),
            last_column_id: schema.highest_field_id(),
            current_schema_id: 0,
            schemas: vec![schema],
            default_spec_id: 0,
            partition_specs: vec![spec],
            last_partition_id,
            properties,
            current_snapshot_id: None,
            snapshots: Vec::new(),
            snapshot_log: Vec::new(),
            metadata_log: Vec::new(),
        })
    }

    /// Check the cross-references a loaded metadata file must satisfy.
    pub fn validate(&self) -> TableResult<()> {
        self.current_schema()?;
        self.default_spec()?;
        if let Some(id) = self.current_snapshot_id {
            ensure!(
                self.snapshot_by_id(id).is_some(),
                CorruptMetadataSnafu {
                    reason: format!("current snapshot {id} is not in the snapshot list"),
                }
            );
        }
        for snapshot in &self.snapshots {
            ensure!(
                self.schema_by_id(snapshot.schema_id).is_some(),
                CorruptMetadataSnafu {
                    reason: format!(
                        "snapshot {} references unknown schema {}",
                        snapshot.snapshot_id, snapshot.schema_id
                    ),
                }
            );
        }
        Ok(())
    }

    /// Metadata format version.
    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    /// Table UUID, assigned at creation and never changed.
    pub fn table_uuid(&self) -> Uuid {
        self.table_uuid
    }

    /// Table directory relative to the warehouse root.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Highest snapshot sequence number assigned.
    pub fn last_sequence_number(&self) -> u64 {
        self.last_sequence_number
    }

    /// When this version was produced, in epoch milliseconds.
    pub fn last_updated_ms(&self) -> i64 {
        self.last_updated_ms
    }

    /// Highest column id ever assigned.
    pub fn last_column_id(&self) -> i32 {
        self.last_column_id
    }

    /// Highest partition field id ever assigned.
    pub fn last_partition_id(&self) -> i32 {
        self.last_partition_id
    }

    /// All schemas, oldest first.
    pub fn schemas(&self) -> &[Schema] {
        &self.schemas
    }

    /// Schema with the given id.
    pub fn schema_by_id(&self, schema_id: i32) -> Option<&Schema> {
        self.schemas.iter().find(|s| s.schema_id() == schema_id)
    }

    /// Id of the current schema.
    pub fn current_schema_id(&self) -> i32 {
        self.current_schema_id
    }

    /// The current schema.
    pub fn current_schema(&self) -> TableResult<&Schema> {
        self.schema_by_id(self.current_schema_id)
            .context(CorruptMetadataSnafu {
                reason: format!("current schema {} is missing", self.current_schema_id),
            })
    }

    /// All partition specs, oldest first.
    pub fn partition_specs(&self) -> &[PartitionSpec] {
        &self.partition_specs
    }

    /// Spec with the given id.
    pub fn spec_by_id(&self, spec_id: i32) -> Option<&PartitionSpec> {
        self.partition_specs.iter().find(|s| s.spec_id() == spec_id)
    }

    /// Id of the spec new data is written with.
    pub fn default_spec_id(&self) -> i32 {
        self.default_spec_id
    }

    /// The spec new data is written with.
    pub fn default_spec(&self) -> TableResult<&PartitionSpec> {
        self.spec_by_id(self.default_spec_id)
            .context(CorruptMetadataSnafu {
                reason: format!("default partition spec {} is missing", self.default_spec_id),
            })
    }

    /// Raw table properties.
    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    /// Typed view over the table properties.
    pub fn table_properties(&self) -> TableResult<TableProperties> {
        TableProperties::try_from_map(&self.properties).context(InvalidPropertySnafu)
    }

    /// Id of the current snapshot, if the table has one.
    pub fn current_snapshot_id(&self) -> Option<i64> {
        self.current_snapshot_id
    }

    /// The current snapshot, if the table has one.
    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshot_by_id(id))
    }

    /// All snapshots in commit order.
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Snapshot with the given id.
    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    /// Snapshot with the given id, or `SnapshotNotFound`.
    pub fn require_snapshot(&self, snapshot_id: i64) -> TableResult<&Snapshot> {
        self.snapshot_by_id(snapshot_id)
            .context(SnapshotNotFoundSnafu { snapshot_id })
    }

    /// Schema a snapshot was committed with.
    pub fn schema_for_snapshot(&self, snapshot: &Snapshot) -> TableResult<&Schema> {
        self.schema_by_id(snapshot.schema_id)
            .context(CorruptMetadataSnafu {
                reason: format!(
                    "snapshot {} references unknown schema {}",
                    snapshot.snapshot_id, snapshot.schema_id
                ),
            })
    }

    /// Every change of the current snapshot, oldest first.
    pub fn history(&self) -> &[SnapshotLogEntry] {
        &self.snapshot_log
    }

    /// Previous metadata files, oldest first.
    pub fn metadata_log(&self) -> &[MetadataLogEntry] {
        &self.metadata_log
    }

    /// Whether the current snapshot has any live data files.
    pub fn has_data(&self) -> bool {
        match self.current_snapshot() {
            Some(snapshot) => snapshot
                .summary
                .get_u64(TOTAL_DATA_FILES)
                .is_none_or(|n| n > 0),
            None => false,
        }
    }

    /// The snapshot that was current at `timestamp_ms`.
    ///
    /// With `inclusive`, a snapshot that became current exactly at
    /// `timestamp_ms` qualifies; otherwise only strictly earlier ones do.
    pub fn snapshot_as_of_timestamp(
        &self,
        timestamp_ms: i64,
        inclusive: bool,
    ) -> TableResult<&Snapshot> {
        let idx = self.snapshot_log.partition_point(|e| {
            if inclusive {
                e.timestamp_ms <= timestamp_ms
            } else {
                e.timestamp_ms < timestamp_ms
            }
        });
        let entry = idx
            .checked_sub(1)
            .and_then(|i| self.snapshot_log.get(i))
            .context(NoSnapshotAsOfSnafu {
                timestamp_ms,
                inclusive,
            })?;
        self.require_snapshot(entry.snapshot_id)
    }

    /// Walk the parent chain starting at `snapshot_id` (inclusive).
    pub fn ancestors_of(&self, snapshot_id: i64) -> Ancestors<'_> {
        Ancestors {
            metadata: self,
            next: self.snapshot_by_id(snapshot_id),
        }
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Iterator over a snapshot and its ancestors, newest first.
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    metadata: &'a TableMetadata,
    next: Option<&'a Snapshot>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Snapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current
            .parent_snapshot_id
            .and_then(|id| self.metadata.snapshot_by_id(id));
        Some(current)
    }
}

/// Derives the next metadata version from a base.
#[derive(Debug, Clone)]
pub(crate) struct TableMetadataBuilder {
    metadata: TableMetadata,
    base_updated_ms: i64,
}

impl TableMetadataBuilder {
    pub(crate) fn new(base: &TableMetadata) -> Self {
        Self {
            base_updated_ms: base.last_updated_ms,
            metadata: base.clone(),
        }
    }

    pub(crate) fn metadata(&self) -> &TableMetadata {
        &self.metadata
    }

    /// Add `schema` under the next schema id and make it current.
    pub(crate) fn add_current_schema(&mut self, schema: Schema, last_column_id: i32) -> i32 {
        self.metadata.last_column_id = self.metadata.last_column_id.max(last_column_id);
        let id = self
            .metadata
            .schemas
            .iter()
            .map(Schema::schema_id)
            .max()
            .map_or(0, |m| m + 1);
        self.metadata.schemas.push(schema.with_schema_id(id));
        self.metadata.current_schema_id = id;
        id
    }

    /// Add a spec built with [`Self::next_spec_id`] and make it the default.
    pub(crate) fn add_default_spec(&mut self, spec: PartitionSpec, last_partition_id: i32) {
        self.metadata.last_partition_id = self.metadata.last_partition_id.max(last_partition_id);
        self.metadata.default_spec_id = spec.spec_id();
        self.metadata.partition_specs.push(spec);
    }

    /// Next unused spec id.
    pub(crate) fn next_spec_id(&self) -> i32 {
        self.metadata
            .partition_specs
            .iter()
            .map(PartitionSpec::spec_id)
            .max()
            .map_or(0, |m| m + 1)
    }

    pub(crate) fn set_properties(&mut self, updates: &BTreeMap<String, String>) -> TableResult<()> {
        let mut next = self.metadata.properties.clone();
        next.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));
        TableProperties::try_from_map(&next).context(InvalidPropertySnafu)?;
        self.metadata.properties = next;
        Ok(())
    }

    pub(crate) fn remove_properties(&mut self, keys: &[String]) {
        for key in keys {
            self.metadata.properties.remove(key);
        }
    }

    /// Timestamp for a new snapshot log entry: now, but never earlier than
    /// the last entry.
    pub(crate) fn next_timestamp_ms(&self) -> i64 {
        let last = self
            .metadata
            .snapshot_log
            .last()
            .map_or(i64::MIN, |e| e.timestamp_ms);
        now_ms().max(last).max(self.base_updated_ms)
    }

    /// Record a new snapshot and make it current.
    pub(crate) fn add_snapshot(&mut self, snapshot: Snapshot) -> TableResult<()> {
        ensure!(
            self.metadata.snapshot_by_id(snapshot.snapshot_id).is_none(),
            CorruptMetadataSnafu {
                reason: format!("snapshot id {} is already in use", snapshot.snapshot_id),
            }
        );
        ensure!(
            snapshot.sequence_number > self.metadata.last_sequence_number,
            CorruptMetadataSnafu {
                reason: format!(
                    "snapshot sequence number {} is not above {}",
                    snapshot.sequence_number, self.metadata.last_sequence_number
                ),
            }
        );
        if let Some(last) = self.metadata.snapshot_log.last() {
            ensure!(
                snapshot.timestamp_ms >= last.timestamp_ms,
                CorruptMetadataSnafu {
                    reason: format!(
                        "snapshot timestamp {} precedes the last log entry {}",
                        snapshot.timestamp_ms, last.timestamp_ms
                    ),
                }
            );
        }
        self.metadata.last_sequence_number = snapshot.sequence_number;
        self.metadata.current_snapshot_id = Some(snapshot.snapshot_id);
        self.metadata.snapshot_log.push(SnapshotLogEntry {
            snapshot_id: snapshot.snapshot_id,
            timestamp_ms: snapshot.timestamp_ms,
        });
        self.metadata.snapshots.push(snapshot);
        Ok(())
    }

    /// Make an existing snapshot current again.
    pub(crate) fn set_current_snapshot(&mut self, snapshot_id: i64) -> TableResult<()> {
        self.metadata.require_snapshot(snapshot_id)?;
        if self.metadata.current_snapshot_id == Some(snapshot_id) {
            return Ok(());
        }
        let timestamp_ms = self.next_timestamp_ms();
        self.metadata.current_snapshot_id = Some(snapshot_id);
        self.metadata.snapshot_log.push(SnapshotLogEntry {
            snapshot_id,
            timestamp_ms,
        });
        Ok(())
    }

    /// Finish the new version. `previous_file` is the metadata file this
    /// version replaces; it is appended to the metadata log, which is then
    /// trimmed to `write.metadata.previous-versions-max` entries.
    pub(crate) fn build(mut self, previous_file: Option<&str>) -> TableResult<TableMetadata> {
        let keep = self.metadata.table_properties()?.previous_versions_max();
        if let Some(file) = previous_file {
            self.metadata.metadata_log.push(MetadataLogEntry {
                metadata_file: file.to_string(),
                timestamp_ms: self.base_updated_ms,
            });
        }
        let excess = self.metadata.metadata_log.len().saturating_sub(keep);
        self.metadata.metadata_log.drain(..excess);

        let last_log = self
            .metadata
            .snapshot_log
            .last()
            .map_or(i64::MIN, |e| e.timestamp_ms);
        self.metadata.last_updated_ms = now_ms().max(last_log).max(self.base_updated_ms);
        Ok(self.metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::snapshot::{Operation, Summary};
    use crate::metadata::transform::Transform;
    use crate::metadata::types::{NestedField, PrimitiveType};

    fn schema() -> Schema {
        Schema::new(
            7,
            vec![
                NestedField::optional(1, "name", PrimitiveType::String),
                NestedField::optional(2, "id", PrimitiveType::Int),
                NestedField::optional(3, "date", PrimitiveType::Date),
            ],
        )
        .unwrap()
    }

    fn snapshot(meta: &TableMetadata, id: i64, parent: Option<i64>, ts: i64) -> Snapshot {
        Snapshot {
            snapshot_id: id,
            parent_snapshot_id: parent,
            sequence_number: meta.last_sequence_number + 1,
            timestamp_ms: ts,
            manifest_list: format!("snap-{id}"),
            schema_id: meta.current_schema_id,
            spec_id: meta.default_spec_id,
            summary: Summary {
                operation: Operation::Append,
                properties: BTreeMap::new(),
            },
        }
    }

    fn with_snapshots(stamps: &[(i64, i64)]) -> TableMetadata {
        let mut meta = TableMetadata::new_table("db/t", schema(), &[], BTreeMap::new()).unwrap();
        let mut parent = None;
        for (id, ts) in stamps {
            let mut b = TableMetadataBuilder::new(&meta);
            b.add_snapshot(snapshot(&meta, *id, parent, *ts)).unwrap();
            meta = b.build(Some("prev.json")).unwrap();
            parent = Some(*id);
        }
        meta
    }

    #[test]
    fn new_table_binds_partition_fields() {
        let meta = TableMetadata::new_table(
            "db/t",
            schema(),
            &[UnboundPartitionField::new("date", Transform::Year)],
            BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(meta.current_schema().unwrap().schema_id(), 0);
        assert_eq!(meta.last_column_id(), 3);
        assert_eq!(meta.default_spec().unwrap().fields()[0].name, "date_year");
        assert_eq!(meta.last_partition_id(), 1000);
        assert!(!meta.has_data());
        meta.validate().unwrap();
    }

    #[test]
    fn new_table_rejects_bad_properties() {
        let props = BTreeMap::from([("commit.retry.num-retries".to_string(), "x".to_string())]);
        let err = TableMetadata::new_table("db/t", schema(), &[], props).unwrap_err();
        assert!(matches!(err, crate::error::TableError::InvalidProperty { .. }));
    }

    #[test]
    fn as_of_timestamp_searches_the_log() {
        let meta = with_snapshots(&[(11, 1_000), (22, 2_000), (33, 3_000)]);

        assert_eq!(meta.snapshot_as_of_timestamp(1_500, true).unwrap().snapshot_id(), 11);
        assert_eq!(meta.snapshot_as_of_timestamp(2_000, true).unwrap().snapshot_id(), 22);
        assert_eq!(meta.snapshot_as_of_timestamp(2_000, false).unwrap().snapshot_id(), 11);
        assert_eq!(meta.snapshot_as_of_timestamp(9_000, true).unwrap().snapshot_id(), 33);
        assert!(meta.snapshot_as_of_timestamp(999, true).unwrap_err().is_not_found());
    }

    #[test]
    fn ancestors_walk_parent_chain() {
        let meta = with_snapshots(&[(11, 1_000), (22, 2_000), (33, 3_000)]);
        let chain: Vec<i64> = meta.ancestors_of(33).map(Snapshot::snapshot_id).collect();
        assert_eq!(chain, vec![33, 22, 11]);
        assert_eq!(meta.ancestors_of(404).count(), 0);
    }

    #[test]
    fn rollback_appends_to_history() {
        let meta = with_snapshots(&[(11, 1_000), (22, 2_000)]);
        let mut b = TableMetadataBuilder::new(&meta);
        b.set_current_snapshot(11).unwrap();
        let rolled = b.build(None).unwrap();

        assert_eq!(rolled.current_snapshot_id(), Some(11));
        assert_eq!(rolled.history().len(), 3);
        assert_eq!(rolled.snapshots().len(), 2);

        let mut b = TableMetadataBuilder::new(&meta);
        assert!(b.set_current_snapshot(99).unwrap_err().is_not_found());
    }

    #[test]
    fn add_snapshot_rejects_reused_id_and_backwards_time() {
        let meta = with_snapshots(&[(11, 5_000)]);
        let mut b = TableMetadataBuilder::new(&meta);
        assert!(b.add_snapshot(snapshot(&meta, 11, Some(11), 6_000)).is_err());
        assert!(b.add_snapshot(snapshot(&meta, 12, Some(11), 4_000)).is_err());
    }

    #[test]
    fn metadata_log_is_trimmed() {
        let mut meta = TableMetadata::new_table(
            "db/t",
            schema(),
            &[],
            BTreeMap::from([(
                "write.metadata.previous-versions-max".to_string(),
                "2".to_string(),
            )]),
        )
        .unwrap();
        for i in 0..4 {
            let b = TableMetadataBuilder::new(&meta);
            meta = b.build(Some(&format!("v{i}.json"))).unwrap();
        }
        let files: Vec<_> = meta
            .metadata_log()
            .iter()
            .map(|e| e.metadata_file.as_str())
            .collect();
        assert_eq!(files, vec!["v2.json", "v3.json"]);
    }

    #[test]
    fn json_round_trip_keeps_everything() {
        let meta = with_snapshots(&[(11, 1_000)]);
        let back: TableMetadata = serde_json::from_str(&meta.to_json().unwrap()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn evolved_schema_gets_next_id() {
        let meta = with_snapshots(&[]);
        let mut b = TableMetadataBuilder::new(&meta);
        let same = meta.current_schema().unwrap().clone();
        assert_eq!(b.add_current_schema(same, 3), 1);
        assert_eq!(b.metadata().schemas().len(), 2);
        assert_eq!(b.metadata().current_schema_id(), 1);
        assert_eq!(b.next_spec_id(), 1);
    }
}
