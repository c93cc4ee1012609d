//! Integration tests for snapshot history and reads against the local backend.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arrow::array::{ArrayRef, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use tempfile::TempDir;

use snapshot_table_core::catalog::{Catalog, NamespaceIdent, TableIdent};
use snapshot_table_core::expr::Reference;
use snapshot_table_core::manifest::DataFile;
use snapshot_table_core::metadata::{Datum, NestedField, PrimitiveType, Schema};
use snapshot_table_core::storage::StorageLocation;
use snapshot_table_core::table::Table;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn users_schema() -> Schema {
    Schema::new(
        0,
        vec![
            NestedField::required(1, "user_id", PrimitiveType::Long),
            NestedField::optional(2, "email", PrimitiveType::String),
        ],
    )
    .unwrap()
}

async fn users_table(location: StorageLocation) -> Result<(Catalog, Table), Box<dyn std::error::Error>> {
    let catalog = Catalog::new(location);
    let ns: NamespaceIdent = "crm".parse()?;
    catalog
        .create_namespace_if_not_exists(&ns, BTreeMap::new())
        .await?;
    let table = catalog
        .create_table(
            &TableIdent::new(ns, "users")?,
            users_schema(),
            &[],
            BTreeMap::new(),
        )
        .await?;
    Ok((catalog, table))
}

fn user_file(path: &str) -> DataFile {
    DataFile::builder(path, 0)
        .record_count(3)
        .file_size_in_bytes(256)
        .build()
        .unwrap()
}

fn users_parquet(ids: Vec<i64>, emails: Vec<Option<&str>>) -> Result<Bytes, Box<dyn std::error::Error>> {
    let arrow_schema = Arc::new(users_schema().to_arrow_schema()?);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(ids)),
        Arc::new(StringArray::from(emails)),
    ];
    let batch = RecordBatch::try_new(arrow_schema.clone(), columns)?;
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, arrow_schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(Bytes::from(buf))
}

#[tokio::test]
async fn as_of_timestamp_reads_the_snapshot_current_then() -> TestResult {
    let (_catalog, table) = users_table(StorageLocation::memory()).await?;
    let t1 = table.append(vec![user_file("crm/users/data/one.parquet")]).await?;
    let s1 = t1.current_snapshot().unwrap().clone();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let t2 = t1.append(vec![user_file("crm/users/data/two.parquet")]).await?;
    let s2 = t2.current_snapshot().unwrap().clone();
    assert!(s2.timestamp_ms() > s1.timestamp_ms());

    let found = t2.snapshot_as_of_timestamp(s1.timestamp_ms(), true)?;
    assert_eq!(found.snapshot_id(), s1.snapshot_id());
    let found = t2.snapshot_as_of_timestamp(s2.timestamp_ms(), false)?;
    assert_eq!(found.snapshot_id(), s1.snapshot_id());
    assert!(t2.snapshot_as_of_timestamp(s1.timestamp_ms() - 1, true).is_err());

    let plan = t2
        .scan()
        .as_of_timestamp(s1.timestamp_ms(), true)
        .plan_files()
        .await?;
    assert_eq!(plan.snapshot_id, Some(s1.snapshot_id()));
    let paths: Vec<_> = plan.tasks.iter().map(|t| t.data_file.file_path()).collect();
    assert_eq!(paths, vec!["crm/users/data/one.parquet"]);

    let latest = t2.scan().plan_files().await?;
    assert_eq!(latest.tasks.len(), 2);
    Ok(())
}

#[tokio::test]
async fn scanning_an_unknown_snapshot_is_not_found() -> TestResult {
    let (_catalog, table) = users_table(StorageLocation::memory()).await?;
    let err = table.scan().snapshot_id(12345).plan_files().await.unwrap_err();
    assert!(err.is_not_found(), "{err}");
    Ok(())
}

#[tokio::test]
async fn local_warehouse_round_trip() -> TestResult {
    let tmp = TempDir::new()?;
    let (catalog, table) = users_table(StorageLocation::local(tmp.path())).await?;

    let payload = users_parquet(vec![1, 2, 3], vec![Some("a@x.io"), None, Some("c@x.io")])?;
    let table = table.append_parquet(payload).await?;
    let payload = users_parquet(vec![40, 50], vec![Some("d@x.io"), Some("e@x.io")])?;
    let table = table.append_parquet(payload).await?;

    let reopened = Catalog::new(StorageLocation::local(tmp.path()));
    let loaded = reopened.load_table(table.ident()).await?;
    assert_eq!(loaded.pointer().version, 3);
    assert_eq!(loaded.metadata(), table.metadata());
    assert_eq!(
        catalog.list_tables(&"crm".parse()?).await?,
        vec![table.ident().clone()]
    );

    let plan = loaded
        .scan()
        .with_filter(Reference::new("user_id").greater_than(Datum::Long(10)))
        .plan_files()
        .await?;
    assert_eq!(plan.tasks.len(), 1);
    let task = &plan.tasks[0];
    assert_eq!(task.data_file.record_count(), 2);
    assert!(task.residual.is_always_true());
    assert!(tmp.path().join(task.data_file.file_path()).exists());

    assert_eq!(loaded.scan().plan_files().await?.record_count(), 5);
    Ok(())
}
