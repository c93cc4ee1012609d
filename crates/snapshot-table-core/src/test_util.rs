use std::collections::BTreeMap;

use crate::catalog::{Catalog, TableIdent};
use crate::error::TableResult;
use crate::manifest::data_file::DataFile;
use crate::metadata::schema::Schema;
use crate::metadata::types::{NestedField, PrimitiveType};
use crate::metadata::values::Datum;
use crate::storage::StorageLocation;
use crate::table::Table;

pub(crate) type TestResult = Result<(), Box<dyn std::error::Error>>;

/// In-memory catalog with a `default` namespace.
pub(crate) async fn memory_catalog() -> TableResult<Catalog> {
    let catalog = Catalog::new(StorageLocation::memory());
    catalog
        .create_namespace_if_not_exists(&"default".parse()?, BTreeMap::new())
        .await?;
    Ok(catalog)
}

/// Unpartitioned `default.<name>` with columns `id`, `name`, `ts`.
pub(crate) async fn events_table(catalog: &Catalog, name: &str) -> TableResult<Table> {
    let schema = Schema::new(
        0,
        vec![
            NestedField::optional(1, "id", PrimitiveType::Long),
            NestedField::optional(2, "name", PrimitiveType::String),
            NestedField::optional(3, "ts", PrimitiveType::Timestamp),
        ],
    )
    .unwrap();
    let ident = TableIdent::new("default".parse()?, name)?;
    catalog
        .create_table(&ident, schema, &[], BTreeMap::new())
        .await
}

/// A data file of `table`'s default spec with `id` in `[min, max]`.
pub(crate) fn data_file(table: &Table, path: &str, records: u64, min: i64, max: i64) -> DataFile {
    DataFile::builder(path, table.metadata().default_spec_id())
        .record_count(records)
        .column_stats(1, records, 0, Some(Datum::Long(min)), Some(Datum::Long(max)))
        .build()
        .unwrap()
}
