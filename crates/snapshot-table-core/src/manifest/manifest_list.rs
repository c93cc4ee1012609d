//! Manifest lists: the per-snapshot index of manifests.

use serde::{Deserialize, Serialize};

use crate::manifest::entry::{Manifest, ManifestStatus};
use crate::metadata::values::Datum;

/// Summary of one partition field across a manifest's entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    /// Whether any entry has a null value for the field.
    pub contains_null: bool,
    /// Smallest non-null value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<Datum>,
    /// Largest non-null value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<Datum>,
}

/// A manifest as referenced from a manifest list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// Manifest path relative to the warehouse root.
    pub manifest_path: String,
    /// Size of the manifest in bytes.
    pub manifest_length: u64,
    /// Spec shared by every entry.
    pub partition_spec_id: i32,
    /// Snapshot that wrote the manifest.
    pub added_snapshot_id: i64,
    /// Sequence number of that snapshot.
    pub sequence_number: u64,
    /// Entries with status `Added`.
    pub added_files_count: u32,
    /// Entries with status `Existing`.
    pub existing_files_count: u32,
    /// Entries with status `Deleted`.
    pub deleted_files_count: u32,
    /// Rows in `Added` entries.
    pub added_rows_count: u64,
    /// Rows in `Existing` entries.
    pub existing_rows_count: u64,
    /// Rows in `Deleted` entries.
    pub deleted_rows_count: u64,
    /// One summary per partition field of the spec.
    #[serde(default)]
    pub partitions: Vec<FieldSummary>,
}

impl ManifestFile {
    /// Describe `manifest`, freshly written at `manifest_path`.
    pub fn describe(
        manifest_path: impl Into<String>,
        manifest_length: u64,
        manifest: &Manifest,
        added_snapshot_id: i64,
        sequence_number: u64,
        partition_width: usize,
    ) -> Self {
        let mut file = ManifestFile {
            manifest_path: manifest_path.into(),
            manifest_length,
            partition_spec_id: manifest.partition_spec_id,
            added_snapshot_id,
            sequence_number,
            added_files_count: 0,
            existing_files_count: 0,
            deleted_files_count: 0,
            added_rows_count: 0,
            existing_rows_count: 0,
            deleted_rows_count: 0,
            partitions: manifest.partition_summaries(partition_width),
        };
        for entry in &manifest.entries {
            let rows = entry.data_file.record_count;
            let (files, total) = match entry.status {
                ManifestStatus::Added => (&mut file.added_files_count, &mut file.added_rows_count),
                ManifestStatus::Existing => {
                    (&mut file.existing_files_count, &mut file.existing_rows_count)
                }
                ManifestStatus::Deleted => {
                    (&mut file.deleted_files_count, &mut file.deleted_rows_count)
                }
            };
            *files += 1;
            *total += rows;
        }
        file
    }

    /// Whether the manifest has any live (added or existing) files.
    pub fn has_live_files(&self) -> bool {
        self.added_files_count + self.existing_files_count > 0
    }

    /// Live files referenced by the manifest.
    pub fn live_files_count(&self) -> u64 {
        u64::from(self.added_files_count) + u64::from(self.existing_files_count)
    }

    /// Live rows referenced by the manifest.
    pub fn live_rows_count(&self) -> u64 {
        self.added_rows_count + self.existing_rows_count
    }
}

/// The manifests that make up one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestList {
    /// Owning snapshot.
    pub snapshot_id: i64,
    /// Manifests, newest first.
    pub entries: Vec<ManifestFile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::data_file::DataFile;
    use crate::manifest::entry::ManifestEntry;

    #[test]
    fn describe_counts_by_status() {
        let file = |path: &str, rows| {
            DataFile::builder(path, 0)
                .record_count(rows)
                .build()
                .unwrap()
        };
        let manifest = Manifest {
            partition_spec_id: 0,
            schema_id: 0,
            entries: vec![
                ManifestEntry {
                    status: ManifestStatus::Added,
                    snapshot_id: 2,
                    sequence_number: 2,
                    data_file: file("a", 10),
                },
                ManifestEntry {
                    status: ManifestStatus::Existing,
                    snapshot_id: 1,
                    sequence_number: 1,
                    data_file: file("b", 5),
                },
                ManifestEntry {
                    status: ManifestStatus::Deleted,
                    snapshot_id: 2,
                    sequence_number: 2,
                    data_file: file("c", 7),
                },
            ],
        };
        let mf = ManifestFile::describe("m.json", 100, &manifest, 2, 2, 0);
        assert_eq!(
            (mf.added_files_count, mf.existing_files_count, mf.deleted_files_count),
            (1, 1, 1)
        );
        assert_eq!(mf.live_rows_count(), 15);
        assert_eq!(mf.deleted_rows_count, 7);
        assert!(mf.has_live_files());
        assert!(mf.partitions.is_empty());
    }
}
