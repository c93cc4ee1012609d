//! Helpers that derive table metadata from written data files.
//!
//! Current helpers:
//! - Parquet footer statistics to [`DataFile`](crate::manifest::DataFile)
//!   descriptors, including the partition tuple under a given spec.
pub mod parquet;
