//! Snapshots: immutable, point-in-time views of a table's data files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary key: data files added by the snapshot.
pub const ADDED_DATA_FILES: &str = "added-data-files";
/// Summary key: data files removed by the snapshot.
pub const DELETED_DATA_FILES: &str = "deleted-data-files";
/// Summary key: records added by the snapshot.
pub const ADDED_RECORDS: &str = "added-records";
/// Summary key: records removed by the snapshot.
pub const DELETED_RECORDS: &str = "deleted-records";
/// Summary key: live data files after the snapshot.
pub const TOTAL_DATA_FILES: &str = "total-data-files";
/// Summary key: live records after the snapshot.
pub const TOTAL_RECORDS: &str = "total-records";

/// Kind of data change a snapshot made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Only added files.
    Append,
    /// Added and removed files.
    Overwrite,
    /// Only removed files.
    Delete,
}

/// Operation plus counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// The operation.
    pub operation: Operation,
    /// String counters keyed by the constants in this module.
    #[serde(flatten)]
    pub properties: BTreeMap<String, String>,
}

impl Summary {
    /// Numeric counter, if present and well-formed.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.properties.get(key).and_then(|v| v.parse().ok())
    }
}

/// An immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub(crate) snapshot_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) parent_snapshot_id: Option<i64>,
    pub(crate) sequence_number: u64,
    pub(crate) timestamp_ms: i64,
    pub(crate) manifest_list: String,
    pub(crate) schema_id: i32,
    pub(crate) spec_id: i32,
    pub(crate) summary: Summary,
}

impl Snapshot {
    /// Snapshot id.
    pub fn snapshot_id(&self) -> i64 {
        self.snapshot_id
    }

    /// Id of the snapshot this one was derived from.
    pub fn parent_snapshot_id(&self) -> Option<i64> {
        self.parent_snapshot_id
    }

    /// Monotonic sequence number.
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Commit time in epoch milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Path of the manifest list, relative to the warehouse root.
    pub fn manifest_list(&self) -> &str {
        &self.manifest_list
    }

    /// Schema current when the snapshot was committed.
    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    /// Default partition spec when the snapshot was committed.
    pub fn spec_id(&self) -> i32 {
        self.spec_id
    }

    /// Operation and counters.
    pub fn summary(&self) -> &Summary {
        &self.summary
    }
}

/// Random positive snapshot id derived from a v4 UUID.
pub fn generate_snapshot_id() -> i64 {
    loop {
        let (lhs, rhs) = Uuid::new_v4().as_u64_pair();
        let id = ((lhs ^ rhs) & (i64::MAX as u64)) as i64;
        if id != 0 {
            return id;
        }
    }
}

/// Random snapshot id that does not collide with `existing`.
pub fn generate_unique_snapshot_id<'a>(existing: impl Iterator<Item = &'a Snapshot> + Clone) -> i64 {
    loop {
        let id = generate_snapshot_id();
        if !existing.clone().any(|s| s.snapshot_id == id) {
            return id;
        }
    }
}
