//! Object layout under a warehouse root.
//!
//! This module centralizes the relative path conventions for namespaces,
//! tables, the pointer log, metadata files, manifests and data files:
//!
//! ```text
//! <ns...>/_namespace.json
//! <ns...>/<table>/_pointer/0000000001.json
//! <ns...>/<table>/_pointer/CURRENT
//! <ns...>/<table>/metadata/00001-<uuid>.metadata.json
//! <ns...>/<table>/metadata/snap-<snapshot id>-<attempt>-<uuid>.manifest-list.json
//! <ns...>/<table>/metadata/<uuid>-m<n>.manifest.json
//! <ns...>/<table>/data/<partition path>/<uuid>.parquet
//! ```
//!
//! Paths are `/`-separated strings relative to the warehouse root so they can
//! be stored verbatim inside metadata and manifests.

use std::path::PathBuf;

use uuid::Uuid;

/// File marking a directory as a namespace.
pub const NAMESPACE_MARKER: &str = "_namespace.json";

/// Directory holding the versioned metadata pointer log of a table.
pub const POINTER_DIR_NAME: &str = "_pointer";

/// Version hint file inside the pointer directory.
pub const VERSION_HINT_FILE_NAME: &str = "CURRENT";

/// Number of digits used in zero-padded pointer file names.
pub const POINTER_FILENAME_DIGITS: usize = 10;

/// Directory holding metadata, manifest list and manifest files.
pub const METADATA_DIR_NAME: &str = "metadata";

/// Conventional directory where data files are stored.
pub const DATA_DIR_NAME: &str = "data";

/// Join path segments with `/`, skipping empty ones.
pub fn join(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

/// `<ns...>/_namespace.json`
pub fn namespace_marker_path(namespace_dir: &str) -> String {
    join(&[namespace_dir, NAMESPACE_MARKER])
}

/// `<table>/_pointer`
pub fn pointer_dir(table_dir: &str) -> PathBuf {
    PathBuf::from(join(&[table_dir, POINTER_DIR_NAME]))
}

/// `<table>/_pointer/CURRENT`
pub fn version_hint_path(table_dir: &str) -> PathBuf {
    pointer_dir(table_dir).join(VERSION_HINT_FILE_NAME)
}

/// `<table>/_pointer/<zero-padded version>.json`
pub fn pointer_path(table_dir: &str, version: u64) -> PathBuf {
    let file_name = format!("{:0width$}.json", version, width = POINTER_FILENAME_DIGITS);
    pointer_dir(table_dir).join(file_name)
}

/// Parse the version out of a pointer file name such as `0000000007.json`.
pub fn parse_pointer_file_name(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.len() != POINTER_FILENAME_DIGITS {
        return None;
    }
    stem.parse().ok()
}

/// `<table>/metadata/<version:05>-<uuid>.metadata.json`
pub fn metadata_file_path(table_dir: &str, version: u64) -> String {
    join(&[
        table_dir,
        METADATA_DIR_NAME,
        &format!("{version:05}-{}.metadata.json", Uuid::new_v4()),
    ])
}

/// `<table>/metadata/snap-<snapshot id>-<attempt>-<uuid>.manifest-list.json`
pub fn manifest_list_path(table_dir: &str, snapshot_id: i64, attempt: u32) -> String {
    join(&[
        table_dir,
        METADATA_DIR_NAME,
        &format!(
            "snap-{snapshot_id}-{attempt}-{}.manifest-list.json",
            Uuid::new_v4()
        ),
    ])
}

/// `<table>/metadata/<commit uuid>-m<n>.manifest.json`
pub fn manifest_path(table_dir: &str, commit_uuid: &Uuid, n: usize) -> String {
    join(&[
        table_dir,
        METADATA_DIR_NAME,
        &format!("{commit_uuid}-m{n}.manifest.json"),
    ])
}

/// `<table>/data/<partition path>/<uuid>.<extension>`
pub fn data_file_path(table_dir: &str, partition_path: &str, extension: &str) -> String {
    join(&[
        table_dir,
        DATA_DIR_NAME,
        partition_path,
        &format!("{}.{extension}", Uuid::new_v4()),
    ])
}
