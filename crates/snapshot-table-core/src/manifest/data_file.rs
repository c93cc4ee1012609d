//! Data file descriptors.
//!
//! A [`DataFile`] records where a file lives, which partition it belongs to
//! and per-column statistics keyed by field id. Descriptors are immutable
//! once committed; they are copied between manifests but never edited.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::manifest::{DataFileError, EmptyPathSnafu, InvalidBoundsSnafu};
use crate::metadata::values::Datum;

/// On-disk format of a data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFileFormat {
    /// Apache Parquet.
    Parquet,
    /// Apache Avro.
    Avro,
    /// Apache ORC.
    Orc,
}

impl fmt::Display for DataFileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DataFileFormat::Parquet => "parquet",
            DataFileFormat::Avro => "avro",
            DataFileFormat::Orc => "orc",
        })
    }
}

/// A committed (or about to be committed) data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub(crate) file_path: String,
    pub(crate) file_format: DataFileFormat,
    pub(crate) partition_spec_id: i32,
    pub(crate) partition: Vec<Option<Datum>>,
    pub(crate) record_count: u64,
    pub(crate) file_size_in_bytes: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) value_counts: BTreeMap<i32, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) null_value_counts: BTreeMap<i32, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) lower_bounds: BTreeMap<i32, Datum>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) upper_bounds: BTreeMap<i32, Datum>,
}

impl DataFile {
    /// Start describing the file at `file_path`, written under `partition_spec_id`.
    pub fn builder(file_path: impl Into<String>, partition_spec_id: i32) -> DataFileBuilder {
        DataFileBuilder {
            file: DataFile {
                file_path: file_path.into(),
                file_format: DataFileFormat::Parquet,
                partition_spec_id,
                partition: Vec::new(),
                record_count: 0,
                file_size_in_bytes: 0,
                value_counts: BTreeMap::new(),
                null_value_counts: BTreeMap::new(),
                lower_bounds: BTreeMap::new(),
                upper_bounds: BTreeMap::new(),
            },
        }
    }

    /// Path relative to the warehouse root.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    /// File format.
    pub fn file_format(&self) -> DataFileFormat {
        self.file_format
    }

    /// Spec the partition tuple is expressed in.
    pub fn partition_spec_id(&self) -> i32 {
        self.partition_spec_id
    }

    /// Partition tuple, one value per field of the file's spec.
    pub fn partition(&self) -> &[Option<Datum>] {
        &self.partition
    }

    /// Number of rows.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Size in bytes.
    pub fn file_size_in_bytes(&self) -> u64 {
        self.file_size_in_bytes
    }

    /// Non-null plus null values per field id.
    pub fn value_counts(&self) -> &BTreeMap<i32, u64> {
        &self.value_counts
    }

    /// Null values per field id.
    pub fn null_value_counts(&self) -> &BTreeMap<i32, u64> {
        &self.null_value_counts
    }

    /// Lower bounds per field id.
    pub fn lower_bounds(&self) -> &BTreeMap<i32, Datum> {
        &self.lower_bounds
    }

    /// Upper bounds per field id.
    pub fn upper_bounds(&self) -> &BTreeMap<i32, Datum> {
        &self.upper_bounds
    }
}

/// Builder for [`DataFile`].
#[derive(Debug, Clone)]
pub struct DataFileBuilder {
    file: DataFile,
}

impl DataFileBuilder {
    /// File format (Parquet by default).
    pub fn file_format(mut self, format: DataFileFormat) -> Self {
        self.file.file_format = format;
        self
    }

    /// Partition tuple.
    pub fn partition(mut self, values: Vec<Option<Datum>>) -> Self {
        self.file.partition = values;
        self
    }

    /// Row count.
    pub fn record_count(mut self, n: u64) -> Self {
        self.file.record_count = n;
        self
    }

    /// File size.
    pub fn file_size_in_bytes(mut self, n: u64) -> Self {
        self.file.file_size_in_bytes = n;
        self
    }

    /// Statistics for one column. `value_count` includes nulls.
    pub fn column_stats(
        mut self,
        field_id: i32,
        value_count: u64,
        null_count: u64,
        lower: Option<Datum>,
        upper: Option<Datum>,
    ) -> Self {
        self.file.value_counts.insert(field_id, value_count);
        self.file.null_value_counts.insert(field_id, null_count);
        if let Some(lower) = lower {
            self.file.lower_bounds.insert(field_id, lower);
        }
        if let Some(upper) = upper {
            self.file.upper_bounds.insert(field_id, upper);
        }
        self
    }

    /// Lower and upper bound for one column, without counts.
    pub fn bounds(mut self, field_id: i32, lower: Datum, upper: Datum) -> Self {
        self.file.lower_bounds.insert(field_id, lower);
        self.file.upper_bounds.insert(field_id, upper);
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<DataFile, DataFileError> {
        let file = self.file;
        ensure!(!file.file_path.trim().is_empty(), EmptyPathSnafu);
        for (field_id, lower) in &file.lower_bounds {
            if let Some(upper) = file.upper_bounds.get(field_id) {
                ensure!(
                    lower.compare(upper).is_some_and(|o| o.is_le()),
                    InvalidBoundsSnafu {
                        path: file.file_path.clone(),
                        field_id: *field_id,
                    }
                );
            }
        }
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_records_stats_by_field_id() {
        let file = DataFile::builder("db/t/data/a.parquet", 0)
            .partition(vec![Some(Datum::Int(52))])
            .record_count(10)
            .file_size_in_bytes(512)
            .column_stats(2, 10, 1, Some(Datum::Int(1)), Some(Datum::Int(9)))
            .build()
            .unwrap();
        assert_eq!(file.record_count(), 10);
        assert_eq!(file.null_value_counts().get(&2), Some(&1));
        assert_eq!(file.lower_bounds().get(&2), Some(&Datum::Int(1)));
        assert_eq!(file.file_format(), DataFileFormat::Parquet);
    }

    #[test]
    fn inverted_bounds_and_empty_path_are_rejected() {
        let err = DataFile::builder("a.parquet", 0)
            .bounds(1, Datum::Int(5), Datum::Int(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, DataFileError::InvalidBounds { field_id: 1, .. }));

        assert!(matches!(
            DataFile::builder(" ", 0).build(),
            Err(DataFileError::EmptyPath)
        ));
    }

    #[test]
    fn json_keys_are_field_ids() {
        let file = DataFile::builder("a.parquet", 0)
            .bounds(3, Datum::Date(19174), Datum::Date(19174))
            .build()
            .unwrap();
        let json = serde_json::to_value(&file).unwrap();
        assert!(json["lower_bounds"]["3"].is_object());
        let back: DataFile = serde_json::from_value(json).unwrap();
        assert_eq!(back, file);
    }
}
