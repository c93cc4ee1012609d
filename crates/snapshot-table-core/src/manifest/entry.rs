//! Manifests: immutable lists of data file entries.

use serde::{Deserialize, Serialize};

use crate::manifest::data_file::DataFile;
use crate::manifest::manifest_list::FieldSummary;
use crate::metadata::values::Datum;

/// Lifecycle status of a data file within one manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    /// Carried over from an earlier snapshot.
    Existing,
    /// Added by the snapshot that wrote the manifest.
    Added,
    /// Removed by the snapshot that wrote the manifest.
    Deleted,
}

/// One data file and how the writing snapshot treated it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Status of the file.
    pub status: ManifestStatus,
    /// Snapshot that added (or, for `Deleted`, removed) the file.
    pub snapshot_id: i64,
    /// Sequence number of that snapshot.
    pub sequence_number: u64,
    /// The data file.
    pub data_file: DataFile,
}

impl ManifestEntry {
    /// Whether the file is live in the snapshot that owns this manifest.
    pub fn is_alive(&self) -> bool {
        self.status != ManifestStatus::Deleted
    }
}

/// Contents of one manifest file. Every entry shares one partition spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Spec of every entry's partition tuple.
    pub partition_spec_id: i32,
    /// Schema current when the manifest was written.
    pub schema_id: i32,
    /// Entries in write order.
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Entries that are not `Deleted`.
    pub fn live_entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter().filter(|e| e.is_alive())
    }

    /// Per-partition-field null presence and bounds across all entries.
    pub fn partition_summaries(&self, partition_width: usize) -> Vec<FieldSummary> {
        let mut summaries = vec![FieldSummary::default(); partition_width];
        for entry in &self.entries {
            for (summary, value) in summaries.iter_mut().zip(&entry.data_file.partition) {
                match value {
                    None => summary.contains_null = true,
                    Some(v) => summary.update_bounds(v),
                }
            }
        }
        summaries
    }
}

impl FieldSummary {
    fn update_bounds(&mut self, value: &Datum) {
        if value.is_nan() {
            return;
        }
        let replace_lower = self
            .lower_bound
            .as_ref()
            .is_none_or(|lo| value.compare(lo).is_some_and(|o| o.is_lt()));
        if replace_lower {
            self.lower_bound = Some(value.clone());
        }
        let replace_upper = self
            .upper_bound
            .as_ref()
            .is_none_or(|hi| value.compare(hi).is_some_and(|o| o.is_gt()));
        if replace_upper {
            self.upper_bound = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: ManifestStatus, year: Option<i32>) -> ManifestEntry {
        ManifestEntry {
            status,
            snapshot_id: 1,
            sequence_number: 1,
            data_file: DataFile::builder(format!("f-{year:?}"), 1)
                .partition(vec![year.map(Datum::Int)])
                .record_count(1)
                .build()
                .unwrap(),
        }
    }

    #[test]
    fn summaries_track_nulls_and_bounds() {
        let manifest = Manifest {
            partition_spec_id: 1,
            schema_id: 0,
            entries: vec![
                entry(ManifestStatus::Added, Some(52)),
                entry(ManifestStatus::Existing, Some(50)),
                entry(ManifestStatus::Deleted, None),
            ],
        };
        let summaries = manifest.partition_summaries(1);
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].contains_null);
        assert_eq!(summaries[0].lower_bound, Some(Datum::Int(50)));
        assert_eq!(summaries[0].upper_bound, Some(Datum::Int(52)));
        assert_eq!(manifest.live_entries().count(), 2);
    }
}
