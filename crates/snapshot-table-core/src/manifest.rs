//! Manifest layer: data files, manifests and manifest lists.
//!
//! A snapshot points at one manifest list; the list points at manifests; each
//! manifest lists data files under a single partition spec. All three are
//! immutable once written, so historical snapshots stay readable while new
//! snapshots reuse unchanged manifests by reference.

pub mod data_file;
pub mod entry;
pub mod io;
pub mod manifest_list;

use parquet::errors::ParquetError;
use snafu::prelude::*;

use crate::metadata::partition::SpecError;

pub use data_file::{DataFile, DataFileBuilder, DataFileFormat};
pub use entry::{Manifest, ManifestEntry, ManifestStatus};
pub use manifest_list::{FieldSummary, ManifestFile, ManifestList};

/// Errors raised while describing a data file.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DataFileError {
    /// The file path is empty.
    #[snafu(display("Data file path must not be empty"))]
    EmptyPath,

    /// A lower bound is greater than its upper bound, or they are not comparable.
    #[snafu(display("Data file {path} has inverted bounds for field {field_id}"))]
    InvalidBounds {
        /// File path.
        path: String,
        /// Offending field id.
        field_id: i32,
    },

    /// The Parquet footer could not be read.
    #[snafu(display("Failed to read Parquet footer of {path}: {source}"))]
    Parquet {
        /// File path.
        path: String,
        /// Underlying Parquet error.
        source: ParquetError,
    },

    /// The file holds rows from more than one partition.
    #[snafu(display("Data file {path} spans more than one value of partition field {field}"))]
    MixedPartition {
        /// File path.
        path: String,
        /// Partition field name.
        field: String,
    },

    /// Partition values cannot be derived because the source column has no
    /// statistics.
    #[snafu(display("Data file {path} has no statistics for partition source column {column}"))]
    MissingPartitionStats {
        /// File path.
        path: String,
        /// Source column name.
        column: String,
    },

    /// Applying a partition transform to column statistics failed.
    #[snafu(display("Failed to derive partition of {path}: {source}"))]
    Partition {
        /// File path.
        path: String,
        /// Underlying transform error.
        source: SpecError,
    },
}
