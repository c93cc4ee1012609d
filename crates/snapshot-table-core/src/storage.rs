//! Storage backends and object helpers.
//!
//! Everything the table format persists goes through the free functions in
//! this module, keyed by a path *relative* to a [`StorageLocation`] root.
//! Two backends are supported:
//!
//! - `Local`: a directory on the local filesystem.
//! - `Memory`: a shared in-process map ([`MemoryStore`]), used by tests and
//!   short-lived warehouses.
//!
//! Metadata, manifests, manifest lists and data files are written once with
//! [`write_new`] ("create only if not exists"). The only object that is ever
//! replaced in place is the pointer version hint, which goes through
//! [`write_atomic`] (write-then-rename on the local backend).

pub mod error;
pub mod layout;
pub mod memory;

pub use error::{BackendError, StorageError};
pub(crate) use error::{AlreadyExistsSnafu, InvalidLocationSnafu, NotFoundSnafu, OtherIoSnafu};
pub use memory::MemoryStore;

use std::{
    io,
    path::{Component, Path, PathBuf},
};

use bytes::Bytes;
use snafu::{IntoError, prelude::*};
use tokio::{
    fs::{self, OpenOptions},
    io::AsyncWriteExt,
};

/// General result type used by storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Root of a warehouse or table in one of the supported backends.
#[derive(Clone, Debug)]
pub enum StorageLocation {
    /// A directory on the local filesystem.
    Local(PathBuf),
    /// A shared in-memory object store.
    Memory(MemoryStore),
}

impl StorageLocation {
    /// Creates a location for a local filesystem path.
    pub fn local(root: impl Into<PathBuf>) -> Self {
        StorageLocation::Local(root.into())
    }

    /// Creates a location backed by a fresh, empty in-memory store.
    pub fn memory() -> Self {
        StorageLocation::Memory(MemoryStore::new())
    }

    /// Parse a user-facing location string.
    ///
    /// `memory://` yields a fresh in-memory store; `file://<path>` and bare
    /// paths yield a local location.
    pub fn parse(spec: &str) -> StorageResult<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return InvalidLocationSnafu {
                spec,
                reason: "location is empty",
            }
            .fail();
        }
        if trimmed == "memory://" {
            return Ok(Self::memory());
        }
        if let Some(rest) = trimmed.strip_prefix("file://") {
            return Ok(Self::local(rest));
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            return InvalidLocationSnafu {
                spec,
                reason: format!("unsupported scheme {scheme:?}"),
            }
            .fail();
        }
        Ok(Self::local(trimmed))
    }

    /// Human-readable form of `rel` under this root, used in error messages.
    pub fn describe(&self, rel: &Path) -> String {
        match self {
            StorageLocation::Local(root) => root.join(rel).display().to_string(),
            StorageLocation::Memory(_) => format!("memory://{}", object_key(rel)),
        }
    }
}

/// Normalized `/`-separated object key for a relative path.
pub(crate) fn object_key(rel: &Path) -> String {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

async fn create_parent_dir(abs: &Path) -> StorageResult<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(BackendError::Local)
            .context(OtherIoSnafu {
                path: parent.display().to_string(),
            })?;
    }
    Ok(())
}

fn classify_local(path: String, e: io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => NotFoundSnafu { path }.into_error(BackendError::Local(e)),
        io::ErrorKind::AlreadyExists => {
            AlreadyExistsSnafu { path }.into_error(BackendError::Local(e))
        }
        _ => OtherIoSnafu { path }.into_error(BackendError::Local(e)),
    }
}

/// Guard that removes a temporary file on drop unless disarmed.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            // Best-effort cleanup on an error path.
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write `contents` to `rel_path`, replacing any existing object atomically.
///
/// On the local backend this writes a sibling temp file, syncs it and renames
/// it into place. Readers observe either the old or the new contents.
pub async fn write_atomic(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            create_parent_dir(&abs).await?;

            let tmp_path = abs.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
            let mut guard = TempFileGuard::new(tmp_path.clone());

            {
                let mut file = fs::File::create(&tmp_path)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_path.display().to_string(),
                    })?;
            }

            fs::rename(&tmp_path, &abs)
                .await
                .map_err(BackendError::Local)
                .context(OtherIoSnafu {
                    path: abs.display().to_string(),
                })?;

            guard.disarm();
            Ok(())
        }
        StorageLocation::Memory(store) => store
            .put(&object_key(rel_path), Bytes::copy_from_slice(contents))
            .context(OtherIoSnafu {
                path: location.describe(rel_path),
            }),
    }
}

/// Create a *new* object at `rel_path`, failing with
/// [`StorageError::AlreadyExists`] if something is already there.
///
/// This is the write-once primitive behind every metadata, manifest and data
/// object, and the compare-and-swap guard of the pointer log. On the local
/// backend the contents are written and synced to a sibling temp file which is
/// then hard-linked into place, so the object appears fully written or not at
/// all.
pub async fn write_new(
    location: &StorageLocation,
    rel_path: &Path,
    contents: &[u8],
) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            create_parent_dir(&abs).await?;

            let tmp_path = abs.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
            let _guard = TempFileGuard::new(tmp_path.clone());
            let tmp_str = tmp_path.display().to_string();

            {
                let mut file = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&tmp_path)
                    .await
                    .map_err(|e| classify_local(tmp_str.clone(), e))?;

                file.write_all(contents)
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu {
                        path: tmp_str.clone(),
                    })?;

                file.sync_all()
                    .await
                    .map_err(BackendError::Local)
                    .context(OtherIoSnafu { path: tmp_str })?;
            }

            // link(2) refuses to replace an existing target
            fs::hard_link(&tmp_path, &abs)
                .await
                .map_err(|e| classify_local(abs.display().to_string(), e))?;

            // the guard unlinks the temp name; the published link stays
            Ok(())
        }
        StorageLocation::Memory(store) => {
            let path = location.describe(rel_path);
            let inserted = store
                .put_if_absent(&object_key(rel_path), Bytes::copy_from_slice(contents))
                .context(OtherIoSnafu { path: path.clone() })?;
            if inserted {
                Ok(())
            } else {
                Err(AlreadyExistsSnafu { path: path.clone() }
                    .into_error(BackendError::Memory(format!("object exists: {path}"))))
            }
        }
    }
}

/// Read the full contents of the object at `rel_path`.
pub async fn read_all_bytes(location: &StorageLocation, rel_path: &Path) -> StorageResult<Bytes> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            fs::read(&abs)
                .await
                .map(Bytes::from)
                .map_err(|e| classify_local(abs.display().to_string(), e))
        }
        StorageLocation::Memory(store) => {
            let path = location.describe(rel_path);
            match store
                .get(&object_key(rel_path))
                .context(OtherIoSnafu { path: path.clone() })?
            {
                Some(bytes) => Ok(bytes),
                None => Err(NotFoundSnafu { path: path.clone() }
                    .into_error(BackendError::Memory(format!("no object at {path}")))),
            }
        }
    }
}

/// Read the object at `rel_path` as UTF-8 text.
pub async fn read_to_string(location: &StorageLocation, rel_path: &Path) -> StorageResult<String> {
    let bytes = read_all_bytes(location, rel_path).await?;
    String::from_utf8(bytes.to_vec()).map_err(|e| {
        OtherIoSnafu {
            path: location.describe(rel_path),
        }
        .into_error(BackendError::Local(io::Error::new(
            io::ErrorKind::InvalidData,
            e,
        )))
    })
}

/// Returns true if an object exists at `rel_path`.
pub async fn exists(location: &StorageLocation, rel_path: &Path) -> StorageResult<bool> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_path);
            match fs::metadata(&abs).await {
                Ok(meta) => Ok(meta.is_file()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
                Err(e) => Err(classify_local(abs.display().to_string(), e)),
            }
        }
        StorageLocation::Memory(store) => Ok(store
            .get(&object_key(rel_path))
            .context(OtherIoSnafu {
                path: location.describe(rel_path),
            })?
            .is_some()),
    }
}

/// List every object below the directory `rel_dir`, recursively.
///
/// Returned paths are relative to the location root and sorted. A missing
/// directory lists as empty.
pub async fn list_prefix(location: &StorageLocation, rel_dir: &Path) -> StorageResult<Vec<PathBuf>> {
    match location {
        StorageLocation::Local(root) => {
            let mut out = Vec::new();
            let mut pending = vec![root.join(rel_dir)];

            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(classify_local(dir.display().to_string(), e)),
                };

                while let Some(entry) = entries
                    .next_entry()
                    .await
                    .map_err(|e| classify_local(dir.display().to_string(), e))?
                {
                    let path = entry.path();
                    let file_type = entry
                        .file_type()
                        .await
                        .map_err(|e| classify_local(path.display().to_string(), e))?;
                    if file_type.is_dir() {
                        pending.push(path);
                    } else if let Ok(rel) = path.strip_prefix(root) {
                        out.push(rel.to_path_buf());
                    }
                }
            }

            out.sort();
            Ok(out)
        }
        StorageLocation::Memory(store) => {
            let key = object_key(rel_dir);
            let prefix = if key.is_empty() { key } else { format!("{key}/") };
            let keys = store.list(&prefix).context(OtherIoSnafu {
                path: location.describe(rel_dir),
            })?;
            Ok(keys.into_iter().map(PathBuf::from).collect())
        }
    }
}

/// Remove the directory `rel_dir` and everything below it.
///
/// Removing a missing directory is not an error.
pub async fn delete_prefix(location: &StorageLocation, rel_dir: &Path) -> StorageResult<()> {
    match location {
        StorageLocation::Local(root) => {
            let abs = root.join(rel_dir);
            match fs::remove_dir_all(&abs).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(classify_local(abs.display().to_string(), e)),
            }
        }
        StorageLocation::Memory(store) => {
            let key = object_key(rel_dir);
            store
                .remove_prefix(&format!("{key}/"))
                .context(OtherIoSnafu {
                    path: location.describe(rel_dir),
                })?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn backends(tmp: &TempDir) -> Vec<StorageLocation> {
        vec![StorageLocation::local(tmp.path()), StorageLocation::memory()]
    }

    #[tokio::test]
    async fn write_atomic_overwrites_existing_object() -> TestResult {
        let tmp = TempDir::new()?;
        for location in backends(&tmp) {
            let rel = Path::new("nested/hint");
            write_atomic(&location, rel, b"1").await?;
            write_atomic(&location, rel, b"2").await?;
            assert_eq!(read_to_string(&location, rel).await?, "2");
        }
        Ok(())
    }

    #[tokio::test]
    async fn write_atomic_leaves_no_temp_files() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        write_atomic(&location, Path::new("p/CURRENT"), b"3").await?;

        let listed = list_prefix(&location, Path::new("p")).await?;
        assert_eq!(listed, vec![PathBuf::from("p/CURRENT")]);
        Ok(())
    }

    #[tokio::test]
    async fn write_new_fails_if_object_exists() -> TestResult {
        let tmp = TempDir::new()?;
        for location in backends(&tmp) {
            let rel = Path::new("a/b/commit.json");
            write_new(&location, rel, b"first").await?;

            let err = write_new(&location, rel, b"second")
                .await
                .expect_err("expected AlreadyExists");
            assert!(err.is_already_exists(), "unexpected error: {err}");
            assert_eq!(read_to_string(&location, rel).await?, "first");
        }
        Ok(())
    }

    #[tokio::test]
    async fn write_new_publishes_complete_objects_only() -> TestResult {
        let tmp = TempDir::new()?;
        let location = StorageLocation::local(tmp.path());
        let rel = Path::new("t/_pointer/0000000001.json");
        write_new(&location, rel, br#"{"version":1}"#).await?;
        let err = write_new(&location, rel, b"{").await.unwrap_err();
        assert!(err.is_already_exists(), "unexpected error: {err}");

        // neither the winner nor the loser leaves a temp file behind
        let listed = list_prefix(&location, Path::new("t/_pointer")).await?;
        assert_eq!(listed, vec![rel.to_path_buf()]);
        assert_eq!(read_to_string(&location, rel).await?, r#"{"version":1}"#);
        Ok(())
    }

    #[tokio::test]
    async fn read_missing_object_is_not_found() -> TestResult {
        let tmp = TempDir::new()?;
        for location in backends(&tmp) {
            let err = read_all_bytes(&location, Path::new("missing.json"))
                .await
                .expect_err("expected NotFound");
            assert!(err.is_not_found());
            assert!(!exists(&location, Path::new("missing.json")).await?);
        }
        Ok(())
    }

    #[tokio::test]
    async fn list_prefix_is_recursive_and_sorted() -> TestResult {
        let tmp = TempDir::new()?;
        for location in backends(&tmp) {
            write_new(&location, Path::new("t/metadata/b.json"), b"{}").await?;
            write_new(&location, Path::new("t/metadata/a.json"), b"{}").await?;
            write_new(&location, Path::new("t/data/x/y.parquet"), b"PAR1").await?;
            write_new(&location, Path::new("tt/other.json"), b"{}").await?;

            let listed = list_prefix(&location, Path::new("t")).await?;
            assert_eq!(
                listed,
                vec![
                    PathBuf::from("t/data/x/y.parquet"),
                    PathBuf::from("t/metadata/a.json"),
                    PathBuf::from("t/metadata/b.json"),
                ]
            );
            assert!(list_prefix(&location, Path::new("nope")).await?.is_empty());
        }
        Ok(())
    }

    #[tokio::test]
    async fn delete_prefix_removes_subtree_only() -> TestResult {
        let tmp = TempDir::new()?;
        for location in backends(&tmp) {
            write_new(&location, Path::new("ns/t1/a.json"), b"{}").await?;
            write_new(&location, Path::new("ns/t10/b.json"), b"{}").await?;

            delete_prefix(&location, Path::new("ns/t1")).await?;
            delete_prefix(&location, Path::new("ns/never")).await?;

            assert!(!exists(&location, Path::new("ns/t1/a.json")).await?);
            assert!(exists(&location, Path::new("ns/t10/b.json")).await?);
        }
        Ok(())
    }

    #[test]
    fn parse_recognizes_schemes() {
        assert!(matches!(
            StorageLocation::parse("memory://"),
            Ok(StorageLocation::Memory(_))
        ));
        assert!(matches!(
            StorageLocation::parse("file:///tmp/wh"),
            Ok(StorageLocation::Local(p)) if p == Path::new("/tmp/wh")
        ));
        assert!(matches!(
            StorageLocation::parse("s3://bucket/wh"),
            Err(StorageError::InvalidLocation { .. })
        ));
        assert!(StorageLocation::parse("  ").is_err());
    }
}
