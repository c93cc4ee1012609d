//! Error types and SNAFU context selectors for table operations.
//!
//! Module-level errors (`SchemaError`, `SpecError`, `ExpressionError`,
//! `StorageError`, `DataFileError`) roll up into [`TableError`], which is what
//! the public `Catalog`, `Table` and `Transaction` APIs return. Selectors are
//! `pub(crate)` so sibling modules can attach context without re-exporting
//! them.

use snafu::{Backtrace, prelude::*};

use crate::expr::ExpressionError;
use crate::manifest::DataFileError;
use crate::metadata::partition::SpecError;
use crate::metadata::properties::PropertyError;
use crate::metadata::schema::SchemaError;
use crate::storage::StorageError;

/// Errors from catalog, table and transaction operations.
///
/// Variants fall into a few families: validation (`Schema`, `Spec`,
/// `Expression`, `DataFile`, `InvalidProperty`), not-found, conflict
/// (`CommitConflict`, `ConcurrentModification`) and storage. Callers that
/// retry on their own can use [`TableError::is_conflict`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableError {
    /// A schema change was invalid.
    #[snafu(display("Schema error: {source}"))]
    Schema {
        /// Underlying schema error.
        source: SchemaError,
    },

    /// A partition spec change, or a data file's partition tuple, was invalid.
    #[snafu(display("Partition spec error: {source}"))]
    Spec {
        /// Underlying spec error.
        source: SpecError,
    },

    /// A row filter could not be bound to the table schema.
    #[snafu(display("Invalid row filter: {source}"))]
    Expression {
        /// Underlying binding error.
        source: ExpressionError,
    },

    /// Reading or writing an object failed. Surfaced unchanged.
    #[snafu(transparent)]
    Storage {
        /// Underlying storage error.
        source: StorageError,
    },

    /// Data file statistics could not be derived.
    #[snafu(display("Data file error: {source}"))]
    DataFile {
        /// Underlying data file error.
        source: DataFileError,
    },

    /// A table property has an invalid value.
    #[snafu(display("{source}"))]
    InvalidProperty {
        /// Underlying parse error.
        source: PropertyError,
    },

    /// A namespace or table identifier is malformed.
    #[snafu(display("Invalid identifier {ident:?}: {reason}"))]
    InvalidIdentifier {
        /// Offending identifier text.
        ident: String,
        /// What is wrong with it.
        reason: String,
    },

    /// No table under this identifier.
    #[snafu(display("Table {ident} does not exist"))]
    TableNotFound {
        /// Table identifier.
        ident: String,
    },

    /// The namespace does not exist.
    #[snafu(display("Namespace {namespace} does not exist"))]
    NamespaceNotFound {
        /// Namespace text.
        namespace: String,
    },

    /// No snapshot with this id.
    #[snafu(display("Snapshot {snapshot_id} does not exist"))]
    SnapshotNotFound {
        /// Requested snapshot id.
        snapshot_id: i64,
    },

    /// No snapshot was current at the requested time.
    #[snafu(display("No snapshot as of timestamp {timestamp_ms} (inclusive={inclusive})"))]
    NoSnapshotAsOf {
        /// Requested time in epoch milliseconds.
        timestamp_ms: i64,
        /// Whether a snapshot committed exactly at `timestamp_ms` qualifies.
        inclusive: bool,
    },

    /// A table already exists under this identifier.
    #[snafu(display("Table {ident} already exists"))]
    TableAlreadyExists {
        /// Table identifier.
        ident: String,
    },

    /// Every commit attempt lost the pointer compare-and-swap.
    #[snafu(display("Commit to {ident} failed after {attempts} attempts: concurrent commits kept winning"))]
    CommitConflict {
        /// Table identifier.
        ident: String,
        /// Attempts made.
        attempts: u32,
    },

    /// The table changed underneath the transaction in a way its pending
    /// changes cannot be replayed on.
    #[snafu(display("Concurrent modification of {ident}: {reason}"))]
    ConcurrentModification {
        /// Table identifier.
        ident: String,
        /// What no longer holds.
        reason: String,
    },

    /// A persisted metadata object could not be parsed.
    #[snafu(display("Corrupt metadata object {path}: {source}"))]
    CorruptJson {
        /// Object path.
        path: String,
        /// Underlying JSON error.
        source: serde_json::Error,
        /// Where the error was raised.
        backtrace: Backtrace,
    },

    /// A persisted metadata object parsed but violates an invariant.
    #[snafu(display("Corrupt table metadata: {reason}"))]
    CorruptMetadata {
        /// What is inconsistent.
        reason: String,
        /// Where the error was raised.
        backtrace: Backtrace,
    },

    /// Serializing a metadata object failed.
    #[snafu(display("Failed to serialize {what}: {source}"))]
    SerializeJson {
        /// Kind of object being written.
        what: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// The transaction was already committed or aborted.
    #[snafu(display("Transaction is {state} and cannot be used"))]
    TransactionClosed {
        /// Terminal state the transaction is in.
        state: String,
    },

    /// A data file named by a delete is not live in the table.
    #[snafu(display("Data file {path} is not part of the current snapshot"))]
    DataFileNotFound {
        /// Data file path.
        path: String,
    },

    /// The same data file path was added twice in one transaction.
    #[snafu(display("Data file {path} is added more than once"))]
    DuplicateDataFile {
        /// Data file path.
        path: String,
    },

    /// A delete filter matched only some rows of a data file; whole-file
    /// deletes cannot express that.
    #[snafu(display("Filter matches only part of data file {path}; row-level deletes are not supported"))]
    PartialFileDelete {
        /// Data file path.
        path: String,
    },
}

impl TableError {
    /// Whether the error is a commit conflict that a caller may retry with a
    /// fresh transaction.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            TableError::CommitConflict { .. } | TableError::ConcurrentModification { .. }
        )
    }

    /// Whether the error reports a missing table, namespace or snapshot.
    pub fn is_not_found(&self) -> bool {
        match self {
            TableError::TableNotFound { .. }
            | TableError::NamespaceNotFound { .. }
            | TableError::SnapshotNotFound { .. }
            | TableError::NoSnapshotAsOf { .. }
            | TableError::DataFileNotFound { .. } => true,
            TableError::Storage { source } => source.is_not_found(),
            _ => false,
        }
    }
}

/// Result alias for table operations.
pub type TableResult<T> = Result<T, TableError>;
