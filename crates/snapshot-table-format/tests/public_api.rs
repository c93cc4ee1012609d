//! End-to-end tests through the public prelude.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::BTreeMap;
use std::sync::Arc;

use arrow::array::{ArrayRef, Date32Array, Int64Array};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use snapshot_table_format::prelude::*;
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn readings_schema() -> Schema {
    Schema::new(
        0,
        vec![
            NestedField::required(1, "sensor", PrimitiveType::Long),
            NestedField::required(2, "day", PrimitiveType::Date),
        ],
    )
    .unwrap()
}

fn readings(sensors: Vec<i64>, days: Vec<i32>) -> Result<Bytes, Box<dyn std::error::Error>> {
    let schema = Arc::new(readings_schema().to_arrow_schema()?);
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(sensors)),
        Arc::new(Date32Array::from(days)),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns)?;
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(Bytes::from(buf))
}

#[tokio::test]
async fn partitioned_parquet_appends_are_pruned_by_month() -> TestResult {
    let tmp = TempDir::new()?;
    let catalog = Catalog::new(StorageLocation::local(tmp.path()));
    let ns: NamespaceIdent = "iot".parse()?;
    catalog
        .create_namespace_if_not_exists(&ns, BTreeMap::new())
        .await?;
    let table = catalog
        .create_table(
            &TableIdent::new(ns, "readings")?,
            readings_schema(),
            &[UnboundPartitionField::new("day", Transform::Month)],
            BTreeMap::new(),
        )
        .await?;

    let jan = Datum::date_from_str("2024-01-10").unwrap();
    let feb = Datum::date_from_str("2024-02-03").unwrap();
    let (Datum::Date(jan_days), Datum::Date(feb_days)) = (jan.clone(), feb.clone()) else {
        panic!("dates parse to Date");
    };

    let table = table
        .append_parquet(readings(vec![1, 2], vec![jan_days, jan_days + 1])?)
        .await?;
    let table = table
        .append_parquet(readings(vec![3], vec![feb_days])?)
        .await?;
    assert_eq!(
        table.current_snapshot().unwrap().summary().operation,
        Operation::Append
    );

    let plan = table
        .scan()
        .with_filter(Reference::new("day").equal_to(feb))
        .plan_files()
        .await?;
    assert_eq!(plan.tasks.len(), 1);
    let file = &plan.tasks[0].data_file;
    assert_eq!(file.record_count(), 1);
    assert!(file.file_path().contains("/data/day_month="), "{}", file.file_path());

    let mixed = readings(vec![4, 5], vec![jan_days, feb_days])?;
    let err = table.append_parquet(mixed).await.unwrap_err();
    assert!(matches!(err, TableError::DataFile { .. }), "{err}");
    Ok(())
}

#[tokio::test]
async fn transactions_commit_schema_and_data_together() -> TestResult {
    let catalog = Catalog::new(StorageLocation::memory());
    let ns: NamespaceIdent = "iot".parse()?;
    catalog
        .create_namespace_if_not_exists(&ns, BTreeMap::new())
        .await?;
    let table = catalog
        .create_table(
            &TableIdent::new(ns, "readings")?,
            readings_schema(),
            &[],
            BTreeMap::new(),
        )
        .await?;

    let mut txn: Transaction = table.transaction();
    txn.update_schema()?
        .add_column("value", PrimitiveType::Double, false)?
        .apply()?;
    let file = DataFile::builder("iot/readings/data/a.parquet", 0)
        .record_count(1)
        .build()?;
    txn.append(vec![file])?;
    let committed = txn.commit().await?;
    assert_eq!(txn.state(), TransactionState::Committed);

    let snapshot = committed.current_snapshot().unwrap();
    assert_eq!(snapshot.schema_id(), 1);
    assert!(committed.schema()?.field_by_name("value").is_some());
    Ok(())
}
