//! Reading and writing manifest objects.
//!
//! Every object here is written once with [`storage::write_new`] and never
//! modified, so concurrent readers need no coordination.

use std::path::Path;

use futures::{StreamExt, TryStreamExt, stream};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::prelude::*;

use crate::error::{CorruptJsonSnafu, SerializeJsonSnafu, TableResult};
use crate::manifest::entry::Manifest;
use crate::manifest::manifest_list::{ManifestFile, ManifestList};
use crate::storage::{self, StorageLocation};

/// Serialize `value` and create it at `path`. Returns the byte length.
pub(crate) async fn write_json_new<T: Serialize>(
    location: &StorageLocation,
    path: &str,
    what: &str,
    value: &T,
) -> TableResult<u64> {
    let json = serde_json::to_vec_pretty(value).context(SerializeJsonSnafu { what })?;
    storage::write_new(location, Path::new(path), &json).await?;
    Ok(json.len() as u64)
}

/// Read and parse the JSON object at `path`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    location: &StorageLocation,
    path: &str,
) -> TableResult<T> {
    let bytes = storage::read_all_bytes(location, Path::new(path)).await?;
    serde_json::from_slice(&bytes).context(CorruptJsonSnafu { path })
}

/// Write a manifest at `path`, returning its length.
pub async fn write_manifest(
    location: &StorageLocation,
    path: &str,
    manifest: &Manifest,
) -> TableResult<u64> {
    write_json_new(location, path, "manifest", manifest).await
}

/// Read the manifest at `path`.
pub async fn read_manifest(location: &StorageLocation, path: &str) -> TableResult<Manifest> {
    read_json(location, path).await
}

/// Write a manifest list at `path`.
pub async fn write_manifest_list(
    location: &StorageLocation,
    path: &str,
    list: &ManifestList,
) -> TableResult<u64> {
    write_json_new(location, path, "manifest list", list).await
}

/// Read the manifest list at `path`.
pub async fn read_manifest_list(
    location: &StorageLocation,
    path: &str,
) -> TableResult<ManifestList> {
    read_json(location, path).await
}

/// Read several manifests with up to `concurrency` reads in flight.
/// Results keep the order of `files`.
pub async fn read_manifests(
    location: &StorageLocation,
    files: &[ManifestFile],
    concurrency: usize,
) -> TableResult<Vec<Manifest>> {
    stream::iter(files)
        .map(|file| read_manifest(location, &file.manifest_path))
        .buffered(concurrency.max(1))
        .try_collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::data_file::DataFile;
    use crate::manifest::entry::{ManifestEntry, ManifestStatus};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn manifest(path: &str) -> Manifest {
        Manifest {
            partition_spec_id: 0,
            schema_id: 0,
            entries: vec![ManifestEntry {
                status: ManifestStatus::Added,
                snapshot_id: 9,
                sequence_number: 1,
                data_file: DataFile::builder(path, 0).record_count(3).build().unwrap(),
            }],
        }
    }

    #[tokio::test]
    async fn manifests_are_write_once() -> TestResult {
        let location = StorageLocation::memory();
        let m = manifest("a.parquet");
        let len = write_manifest(&location, "t/metadata/m0.json", &m).await?;
        assert!(len > 0);

        let err = write_manifest(&location, "t/metadata/m0.json", &m)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::TableError::Storage { ref source } if source.is_already_exists()
        ));
        assert_eq!(read_manifest(&location, "t/metadata/m0.json").await?, m);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_reads_preserve_order() -> TestResult {
        let location = StorageLocation::memory();
        let mut files = Vec::new();
        for i in 0..5 {
            let path = format!("t/metadata/m{i}.json");
            let m = manifest(&format!("{i}.parquet"));
            let len = write_manifest(&location, &path, &m).await?;
            files.push(ManifestFile::describe(path, len, &m, 9, 1, 0));
        }
        let manifests = read_manifests(&location, &files, 2).await?;
        let paths: Vec<_> = manifests
            .iter()
            .map(|m| m.entries[0].data_file.file_path().to_string())
            .collect();
        assert_eq!(paths, vec!["0.parquet", "1.parquet", "2.parquet", "3.parquet", "4.parquet"]);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_is_reported_as_corrupt() -> TestResult {
        let location = StorageLocation::memory();
        storage::write_new(&location, Path::new("t/bad.json"), b"{not json").await?;
        let err = read_manifest(&location, "t/bad.json").await.unwrap_err();
        assert!(matches!(err, crate::error::TableError::CorruptJson { .. }));
        Ok(())
    }
}
