//! The versioned metadata pointer of a table.
//!
//! Each commit publishes a new metadata file and then creates pointer file
//! `N + 1` naming it:
//!
//! ```text
//! <table>/_pointer/0000000001.json
//! <table>/_pointer/0000000002.json
//! <table>/_pointer/CURRENT
//! ```
//!
//! Creating pointer `N + 1` with create-new semantics is the compare-and-swap:
//! of two writers racing from version `N`, exactly one succeeds. `CURRENT` is
//! only a hint. It is updated after the pointer file is created and may lag
//! behind it (for example after a crash between the two steps), so readers
//! start at the hint and read forward until a version is missing or still
//! being written.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use uuid::Uuid;

use crate::error::{CorruptJsonSnafu, CorruptMetadataSnafu, TableError, TableResult};
use crate::manifest::io::write_json_new;
use crate::storage::{self, StorageError, StorageLocation, layout};

/// One published version of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataPointer {
    /// Pointer version, starting at 1 for a new table.
    pub version: u64,
    /// Metadata file this version publishes.
    pub metadata_location: String,
    /// UUID of the table the metadata belongs to.
    pub table_uuid: Uuid,
    /// When the pointer was written.
    pub updated_at: DateTime<Utc>,
}

/// Reads and advances the pointer log of one table directory.
#[derive(Debug, Clone)]
pub struct PointerLog {
    location: StorageLocation,
    table_dir: String,
}

impl PointerLog {
    /// Pointer log of the table stored at `table_dir`.
    pub fn new(location: StorageLocation, table_dir: impl Into<String>) -> Self {
        Self {
            location,
            table_dir: table_dir.into(),
        }
    }

    fn pointer_rel(&self, version: u64) -> PathBuf {
        layout::pointer_path(&self.table_dir, version)
    }

    /// Version recorded in `CURRENT`, or 0 when there is no hint.
    pub async fn load_hint(&self) -> TableResult<u64> {
        let rel = layout::version_hint_path(&self.table_dir);
        let contents = match storage::read_to_string(&self.location, &rel).await {
            Ok(s) => s,
            Err(e) if e.is_not_found() => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let trimmed = contents.trim();
        ensure!(
            !trimmed.is_empty(),
            CorruptMetadataSnafu {
                reason: format!("pointer hint {} is empty", rel.display()),
            }
        );
        trimmed.parse::<u64>().ok().context(CorruptMetadataSnafu {
            reason: format!("pointer hint {} has invalid content {trimmed:?}", rel.display()),
        })
    }

    async fn read_pointer(&self, version: u64) -> TableResult<Option<MetadataPointer>> {
        let rel = self.pointer_rel(version);
        let bytes = match storage::read_all_bytes(&self.location, &rel).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        // a pointer still being written by a non-atomic writer is not yet published
        if bytes.iter().all(u8::is_ascii_whitespace) {
            debug!("pointer file {} is empty, treating it as in flight", rel.display());
            return Ok(None);
        }

        let pointer: MetadataPointer = serde_json::from_slice(&bytes).context(CorruptJsonSnafu {
            path: rel.to_string_lossy(),
        })?;
        ensure!(
            pointer.version == version,
            CorruptMetadataSnafu {
                reason: format!(
                    "pointer file {} records version {}",
                    rel.display(),
                    pointer.version
                ),
            }
        );
        Ok(Some(pointer))
    }

    /// The latest published pointer, or `None` when the table has none.
    pub async fn load_current(&self) -> TableResult<Option<MetadataPointer>> {
        let hint = self.load_hint().await?;
        let mut current = if hint > 0 {
            self.read_pointer(hint).await?
        } else {
            None
        };
        // a hint without its pointer means the table was dropped underneath us
        if hint > 0 && current.is_none() {
            return Ok(None);
        }

        let mut next = hint + 1;
        while let Some(pointer) = self.read_pointer(next).await? {
            debug!(
                "pointer hint for {} lags: found version {next}",
                self.table_dir
            );
            current = Some(pointer);
            next += 1;
        }
        Ok(current)
    }

    /// Publish `metadata_location` as the version after `expected`.
    ///
    /// `expected` is the version the caller based its change on (0 for a new
    /// table). Returns `Ok(None)` if another writer already moved the pointer,
    /// otherwise the new pointer.
    pub async fn compare_and_swap(
        &self,
        expected: u64,
        metadata_location: &str,
        table_uuid: Uuid,
    ) -> TableResult<Option<MetadataPointer>> {
        let current = self.load_current().await?.map_or(0, |p| p.version);
        if current != expected {
            debug!(
                "pointer of {} moved: expected {expected}, found {current}",
                self.table_dir
            );
            return Ok(None);
        }

        let version = expected.checked_add(1).context(CorruptMetadataSnafu {
            reason: "pointer version overflow".to_string(),
        })?;
        let pointer = MetadataPointer {
            version,
            metadata_location: metadata_location.to_string(),
            table_uuid,
            updated_at: Utc::now(),
        };

        let rel = self.pointer_rel(version);
        match write_json_new(&self.location, &rel.to_string_lossy(), "metadata pointer", &pointer)
            .await
        {
            Ok(_) => {}
            Err(TableError::Storage {
                source: StorageError::AlreadyExists { .. },
            }) => {
                debug!("lost pointer race for {} at version {version}", self.table_dir);
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let hint = layout::version_hint_path(&self.table_dir);
        storage::write_atomic(&self.location, &hint, format!("{version}\n").as_bytes()).await?;
        Ok(Some(pointer))
    }
}
