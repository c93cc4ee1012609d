//! Integration tests for optimistic commits.
//!
//! Writers share one in-memory warehouse and race on the pointer log. These
//! tests check that:
//! - disjoint appends from stale handles both land,
//! - conflicting schema changes fail exactly one writer,
//! - a table dropped and recreated under a writer is not written to,
//! - a pointer that never finishes publishing exhausts the retry budget.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::path::Path;

use snapshot_table_core::catalog::{Catalog, NamespaceIdent, TableIdent};
use snapshot_table_core::error::TableError;
use snapshot_table_core::manifest::DataFile;
use snapshot_table_core::metadata::properties::{
    COMMIT_MAX_RETRY_WAIT_MS, COMMIT_MIN_RETRY_WAIT_MS, COMMIT_NUM_RETRIES,
};
use snapshot_table_core::metadata::{NestedField, PrimitiveType, Schema};
use snapshot_table_core::storage::{self, StorageLocation};
use snapshot_table_core::table::Table;
use snapshot_table_core::transaction::TransactionState;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn metrics_table() -> Result<(Catalog, Table), Box<dyn std::error::Error>> {
    metrics_table_at(StorageLocation::memory(), BTreeMap::new()).await
}

async fn metrics_table_at(
    location: StorageLocation,
    properties: BTreeMap<String, String>,
) -> Result<(Catalog, Table), Box<dyn std::error::Error>> {
    let catalog = Catalog::new(location);
    let ns: NamespaceIdent = "ops".parse()?;
    catalog
        .create_namespace_if_not_exists(&ns, BTreeMap::new())
        .await?;
    let schema = Schema::new(
        0,
        vec![
            NestedField::required(1, "host", PrimitiveType::String),
            NestedField::optional(2, "cpu", PrimitiveType::Double),
        ],
    )?;
    let ident = TableIdent::new(ns, "metrics")?;
    let table = catalog
        .create_table(&ident, schema, &[], properties)
        .await?;
    Ok((catalog, table))
}

fn retry_properties(num_retries: u32) -> BTreeMap<String, String> {
    BTreeMap::from([
        (COMMIT_NUM_RETRIES.to_string(), num_retries.to_string()),
        (COMMIT_MIN_RETRY_WAIT_MS.to_string(), "1".to_string()),
        (COMMIT_MAX_RETRY_WAIT_MS.to_string(), "2".to_string()),
    ])
}

fn file(path: &str) -> DataFile {
    DataFile::builder(path, 0)
        .record_count(10)
        .file_size_in_bytes(1024)
        .build()
        .unwrap()
}

#[tokio::test]
async fn disjoint_appends_from_stale_handles_both_commit() -> TestResult {
    let (catalog, table) = metrics_table().await?;
    let writer_a = catalog.load_table(table.ident()).await?;
    let writer_b = catalog.load_table(table.ident()).await?;

    let (a, b) = tokio::join!(
        writer_a.append(vec![file("ops/metrics/data/a.parquet")]),
        writer_b.append(vec![file("ops/metrics/data/b.parquet")]),
    );
    a?;
    b?;

    let table = catalog.load_table(table.ident()).await?;
    assert_eq!(table.pointer().version, 3);
    assert_eq!(table.metadata().snapshots().len(), 2);
    let mut paths: Vec<_> = table
        .scan()
        .plan_files()
        .await?
        .tasks
        .into_iter()
        .map(|t| t.data_file.file_path().to_string())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["ops/metrics/data/a.parquet", "ops/metrics/data/b.parquet"]);

    let head = table.current_snapshot().unwrap();
    let parent = head.parent_snapshot_id().unwrap();
    assert!(table.metadata().snapshot_by_id(parent).is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_renames_of_one_column_conflict_once() -> TestResult {
    let (catalog, table) = metrics_table().await?;

    let mut first = table.transaction();
    first.update_schema()?.rename_column("cpu", "cpu_pct")?.apply()?;
    let mut second = table.transaction();
    second.update_schema()?.rename_column("cpu", "cpu_ratio")?.apply()?;

    first.commit().await?;
    let err = second.commit().await.unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert!(matches!(err, TableError::ConcurrentModification { .. }));
    assert_eq!(second.state(), TransactionState::Aborted);

    let table = catalog.load_table(table.ident()).await?;
    let schema = table.schema()?;
    assert_eq!(schema.field_by_name("cpu_pct").unwrap().id, 2);
    assert!(schema.field_by_name("cpu_ratio").is_none());
    assert_eq!(table.metadata().schemas().len(), 2);
    Ok(())
}

#[tokio::test]
async fn compare_and_swap_rejects_stale_expectations() -> TestResult {
    let (catalog, table) = metrics_table().await?;
    let ident = table.ident().clone();
    let stale = table.pointer().clone();

    table.append(vec![file("ops/metrics/data/a.parquet")]).await?;
    let current = catalog.current_metadata_pointer(&ident).await?.unwrap();
    assert_eq!(current.version, 2);

    let swapped = catalog
        .compare_and_swap_pointer(
            &ident,
            Some(&stale),
            &current.metadata_location,
            table.metadata().table_uuid(),
        )
        .await?;
    assert!(!swapped);
    Ok(())
}

#[tokio::test]
async fn dropped_and_recreated_tables_start_a_fresh_chain() -> TestResult {
    let (catalog, table) = metrics_table().await?;
    let table = table.append(vec![file("ops/metrics/data/a.parquet")]).await?;
    let ident = table.ident().clone();

    catalog.drop_table(&ident, false).await?;
    assert!(!catalog.table_exists(&ident).await?);
    let err = catalog.load_table(&ident).await.unwrap_err();
    assert!(err.is_not_found());

    let schema = table.schema()?.clone();
    let fresh = catalog
        .create_table(&ident, schema, &[], BTreeMap::new())
        .await?;
    assert_ne!(fresh.metadata().table_uuid(), table.metadata().table_uuid());
    assert_eq!(fresh.pointer().version, 1);
    assert!(fresh.current_snapshot().is_none());
    assert!(fresh.metadata().metadata_log().is_empty());

    let err = table
        .append(vec![file("ops/metrics/data/b.parquet")])
        .await
        .unwrap_err();
    assert!(matches!(err, TableError::ConcurrentModification { .. }), "{err}");

    let reloaded = catalog.load_table(&ident).await?;
    assert!(reloaded.current_snapshot().is_none());
    Ok(())
}

#[tokio::test]
async fn purged_tables_release_their_name() -> TestResult {
    let (catalog, table) = metrics_table().await?;
    let ident = table.ident().clone();
    catalog.drop_table(&ident, true).await?;

    assert!(catalog.list_tables(ident.namespace()).await?.is_empty());
    let err = catalog.drop_table(&ident, true).await.unwrap_err();
    assert!(matches!(err, TableError::TableNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn in_flight_pointer_does_not_break_readers_or_writers() -> TestResult {
    let tmp = TempDir::new()?;
    let (catalog, table) =
        metrics_table_at(StorageLocation::local(tmp.path()), retry_properties(0)).await?;

    // a competing writer created pointer 2 and has not written its contents yet
    let next = tmp.path().join("ops/metrics/_pointer/0000000002.json");
    std::fs::File::create(&next)?;

    let loaded = catalog.load_table(table.ident()).await?;
    assert_eq!(loaded.pointer().version, 1);
    assert_eq!(loaded.metadata(), table.metadata());

    let err = loaded
        .append(vec![file("ops/metrics/data/a.parquet")])
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "{err}");
    assert!(matches!(err, TableError::CommitConflict { attempts: 1, .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_surface_commit_conflict() -> TestResult {
    let location = StorageLocation::memory();
    let (catalog, table) = metrics_table_at(location.clone(), retry_properties(2)).await?;

    let mut txn = table.transaction();
    txn.append(vec![file("ops/metrics/data/a.parquet")])?;

    // pointer 2 is claimed but never published, so every attempt loses the swap
    storage::write_new(&location, Path::new("ops/metrics/_pointer/0000000002.json"), b"").await?;

    let err = txn.commit().await.unwrap_err();
    match &err {
        TableError::CommitConflict { attempts, .. } => assert_eq!(*attempts, 3),
        other => panic!("expected CommitConflict, got {other}"),
    }
    assert_eq!(txn.state(), TransactionState::Aborted);
    assert!(txn.append(vec![file("ops/metrics/data/b.parquet")]).is_err());

    let latest = catalog.load_table(table.ident()).await?;
    assert_eq!(latest.pointer().version, 1);
    assert!(latest.current_snapshot().is_none());
    Ok(())
}
