//! A catalog stored in the same warehouse as the tables it names.
//!
//! Namespaces are directories holding a `_namespace.json` marker. A table is
//! a directory holding a pointer log (see [`pointer`]) plus its metadata,
//! manifests and data. The catalog's only mutable state is the pointer log,
//! and every pointer move is a create-new of the next version, so concurrent
//! processes sharing a warehouse need no other coordination.

pub mod ident;
pub mod pointer;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::error::{
    CorruptMetadataSnafu, NamespaceNotFoundSnafu, TableAlreadyExistsSnafu, TableError,
    TableNotFoundSnafu, TableResult,
};
use crate::manifest::io::{read_json, write_json_new};
use crate::metadata::partition::UnboundPartitionField;
use crate::metadata::schema::Schema;
use crate::metadata::table_metadata::TableMetadata;
use crate::storage::{self, StorageLocation, layout};
use crate::table::Table;

pub use ident::{NamespaceIdent, TableIdent};
pub use pointer::{MetadataPointer, PointerLog};

#[derive(Debug, Serialize, Deserialize)]
struct NamespaceMarker {
    namespace: Vec<String>,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

/// Entry point for creating, loading and dropping tables in a warehouse.
#[derive(Debug, Clone)]
pub struct Catalog {
    location: StorageLocation,
}

impl Catalog {
    /// Catalog over the warehouse rooted at `location`.
    pub fn new(location: StorageLocation) -> Self {
        Self { location }
    }

    /// Warehouse root.
    pub fn location(&self) -> &StorageLocation {
        &self.location
    }

    pub(crate) fn pointer_log(&self, ident: &TableIdent) -> PointerLog {
        PointerLog::new(self.location.clone(), ident.dir())
    }

    /// Create `namespace` unless it exists. Returns whether it was created.
    pub async fn create_namespace_if_not_exists(
        &self,
        namespace: &NamespaceIdent,
        properties: BTreeMap<String, String>,
    ) -> TableResult<bool> {
        let marker = NamespaceMarker {
            namespace: namespace.segments().to_vec(),
            properties,
        };
        match write_json_new(&self.location, &namespace.marker_path(), "namespace", &marker).await
        {
            Ok(_) => {
                info!("created namespace {namespace}");
                Ok(true)
            }
            Err(TableError::Storage { source }) if source.is_already_exists() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether `namespace` exists.
    pub async fn namespace_exists(&self, namespace: &NamespaceIdent) -> TableResult<bool> {
        Ok(storage::exists(&self.location, Path::new(&namespace.marker_path())).await?)
    }

    /// Properties recorded when `namespace` was created.
    pub async fn namespace_properties(
        &self,
        namespace: &NamespaceIdent,
    ) -> TableResult<BTreeMap<String, String>> {
        self.require_namespace(namespace).await?;
        let marker: NamespaceMarker = read_json(&self.location, &namespace.marker_path()).await?;
        Ok(marker.properties)
    }

    /// Every namespace in the warehouse, sorted.
    pub async fn list_namespaces(&self) -> TableResult<Vec<NamespaceIdent>> {
        let paths = storage::list_prefix(&self.location, Path::new("")).await?;
        let mut out = BTreeSet::new();
        for path in paths {
            if path.file_name().and_then(|n| n.to_str()) != Some(layout::NAMESPACE_MARKER) {
                continue;
            }
            let Some(parent) = path.parent() else {
                continue;
            };
            let segments: Vec<String> = parent
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if let Ok(ns) = NamespaceIdent::from_segments(segments) {
                out.insert(ns);
            }
        }
        Ok(out.into_iter().collect())
    }

    async fn require_namespace(&self, namespace: &NamespaceIdent) -> TableResult<()> {
        ensure!(
            self.namespace_exists(namespace).await?,
            NamespaceNotFoundSnafu {
                namespace: namespace.to_string(),
            }
        );
        Ok(())
    }

    /// Tables directly inside `namespace`, sorted by name.
    pub async fn list_tables(&self, namespace: &NamespaceIdent) -> TableResult<Vec<TableIdent>> {
        self.require_namespace(namespace).await?;
        let ns_dir = PathBuf::from(namespace.dir());
        let paths = storage::list_prefix(&self.location, &ns_dir).await?;

        let mut names = BTreeSet::new();
        for path in paths {
            let Ok(rel) = path.strip_prefix(&ns_dir) else {
                continue;
            };
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            if let [name, dir, file] = parts.as_slice() {
                if dir == layout::POINTER_DIR_NAME
                    && layout::parse_pointer_file_name(file).is_some()
                {
                    names.insert(name.clone());
                }
            }
        }

        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(TableIdent::new(namespace.clone(), name)?);
        }
        Ok(out)
    }

    /// Whether a table is published under `ident`.
    pub async fn table_exists(&self, ident: &TableIdent) -> TableResult<bool> {
        Ok(self.current_metadata_pointer(ident).await?.is_some())
    }

    /// Current pointer of `ident`, or `None` when no table is published there.
    pub async fn current_metadata_pointer(
        &self,
        ident: &TableIdent,
    ) -> TableResult<Option<MetadataPointer>> {
        self.pointer_log(ident).load_current().await
    }

    /// Publish `metadata_location` as the version after `expected` (`None` to
    /// create the first version). Returns whether the swap happened.
    pub async fn compare_and_swap_pointer(
        &self,
        ident: &TableIdent,
        expected: Option<&MetadataPointer>,
        metadata_location: &str,
        table_uuid: uuid::Uuid,
    ) -> TableResult<bool> {
        Ok(self
            .swap_pointer(ident, expected, metadata_location, table_uuid)
            .await?
            .is_some())
    }

    pub(crate) async fn swap_pointer(
        &self,
        ident: &TableIdent,
        expected: Option<&MetadataPointer>,
        metadata_location: &str,
        table_uuid: uuid::Uuid,
    ) -> TableResult<Option<MetadataPointer>> {
        let expected_version = expected.map_or(0, |p| p.version);
        let swapped = self
            .pointer_log(ident)
            .compare_and_swap(expected_version, metadata_location, table_uuid)
            .await?;
        if let Some(pointer) = &swapped {
            info!(
                "{ident} now at version {} ({})",
                pointer.version, pointer.metadata_location
            );
        }
        Ok(swapped)
    }

    /// Create a table with `schema` and an initial spec built from
    /// `partition_fields`.
    ///
    /// The schema keeps the field ids it carries and becomes schema 0.
    pub async fn create_table(
        &self,
        ident: &TableIdent,
        schema: Schema,
        partition_fields: &[UnboundPartitionField],
        properties: BTreeMap<String, String>,
    ) -> TableResult<Table> {
        self.require_namespace(ident.namespace()).await?;
        // a nested namespace may already occupy the table directory
        let clash = layout::namespace_marker_path(&ident.dir());
        ensure!(
            !storage::exists(&self.location, Path::new(&clash)).await?,
            TableAlreadyExistsSnafu {
                ident: ident.to_string(),
            }
        );
        ensure!(
            !self.table_exists(ident).await?,
            TableAlreadyExistsSnafu {
                ident: ident.to_string(),
            }
        );

        let metadata = TableMetadata::new_table(ident.dir(), schema, partition_fields, properties)?;
        let metadata_location = layout::metadata_file_path(&ident.dir(), 1);
        write_json_new(&self.location, &metadata_location, "table metadata", &metadata).await?;

        let pointer = self
            .swap_pointer(ident, None, &metadata_location, metadata.table_uuid())
            .await?
            .context(TableAlreadyExistsSnafu {
                ident: ident.to_string(),
            })?;
        info!("created table {ident} ({})", metadata.table_uuid());
        Ok(Table::new(ident.clone(), self.clone(), metadata, pointer))
    }

    /// Load the current version of `ident`.
    pub async fn load_table(&self, ident: &TableIdent) -> TableResult<Table> {
        let (metadata, pointer) = self.load_metadata(ident).await?;
        Ok(Table::new(ident.clone(), self.clone(), metadata, pointer))
    }

    /// Read the metadata the current pointer of `ident` publishes.
    pub(crate) async fn load_metadata(
        &self,
        ident: &TableIdent,
    ) -> TableResult<(TableMetadata, MetadataPointer)> {
        let pointer = self
            .current_metadata_pointer(ident)
            .await?
            .context(TableNotFoundSnafu {
                ident: ident.to_string(),
            })?;
        let metadata: TableMetadata = read_json(&self.location, &pointer.metadata_location).await?;
        ensure!(
            metadata.table_uuid() == pointer.table_uuid,
            CorruptMetadataSnafu {
                reason: format!(
                    "{} belongs to table {}, pointer expects {}",
                    pointer.metadata_location,
                    metadata.table_uuid(),
                    pointer.table_uuid
                ),
            }
        );
        metadata.validate()?;
        Ok((metadata, pointer))
    }

    /// Drop `ident`.
    ///
    /// Without `purge` only the pointer log is removed. Metadata and data
    /// stay behind and are unreachable. With `purge` the whole table
    /// directory is removed. Readers holding a loaded table keep working
    /// until they touch a purged object.
    pub async fn drop_table(&self, ident: &TableIdent, purge: bool) -> TableResult<()> {
        ensure!(
            self.table_exists(ident).await?,
            TableNotFoundSnafu {
                ident: ident.to_string(),
            }
        );
        let target = if purge {
            PathBuf::from(ident.dir())
        } else {
            layout::pointer_dir(&ident.dir())
        };
        storage::delete_prefix(&self.location, &target).await?;
        info!("dropped table {ident} (purge={purge})");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::{NestedField, PrimitiveType};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::optional(1, "name", PrimitiveType::String),
                NestedField::optional(2, "id", PrimitiveType::Int),
            ],
        )
        .unwrap()
    }

    async fn catalog_with_ns(ns: &str) -> TableResult<(Catalog, NamespaceIdent)> {
        let catalog = Catalog::new(StorageLocation::memory());
        let ns: NamespaceIdent = ns.parse()?;
        catalog
            .create_namespace_if_not_exists(&ns, BTreeMap::new())
            .await?;
        Ok((catalog, ns))
    }

    #[tokio::test]
    async fn namespaces_are_created_once() -> TestResult {
        let (catalog, ns) = catalog_with_ns("default").await?;
        let props = BTreeMap::from([("owner".to_string(), "etl".to_string())]);
        assert!(!catalog.create_namespace_if_not_exists(&ns, props).await?);
        assert!(catalog.namespace_exists(&ns).await?);
        assert!(catalog.namespace_properties(&ns).await?.is_empty());

        let nested: NamespaceIdent = "default.staging".parse()?;
        catalog
            .create_namespace_if_not_exists(&nested, BTreeMap::new())
            .await?;
        assert_eq!(catalog.list_namespaces().await?, vec![ns, nested]);
        Ok(())
    }

    #[tokio::test]
    async fn create_load_and_list() -> TestResult {
        let (catalog, ns) = catalog_with_ns("default").await?;
        let ident = TableIdent::new(ns.clone(), "events")?;
        let created = catalog
            .create_table(&ident, schema(), &[], BTreeMap::new())
            .await?;
        assert!(catalog.table_exists(&ident).await?);

        let loaded = catalog.load_table(&ident).await?;
        assert_eq!(
            loaded.metadata().table_uuid(),
            created.metadata().table_uuid()
        );
        assert_eq!(catalog.list_tables(&ns).await?, vec![ident.clone()]);

        let err = catalog
            .create_table(&ident, schema(), &[], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::TableAlreadyExists { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn missing_namespace_and_table_are_not_found() -> TestResult {
        let catalog = Catalog::new(StorageLocation::memory());
        let ident = TableIdent::parse("nowhere.t")?;
        let err = catalog
            .create_table(&ident, schema(), &[], BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TableError::NamespaceNotFound { .. }));

        let err = catalog.load_table(&ident).await.unwrap_err();
        assert!(err.is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn drop_without_purge_keeps_files() -> TestResult {
        let (catalog, ns) = catalog_with_ns("default").await?;
        let ident = TableIdent::new(ns.clone(), "events")?;
        let table = catalog
            .create_table(&ident, schema(), &[], BTreeMap::new())
            .await?;
        catalog.drop_table(&ident, false).await?;

        assert!(!catalog.table_exists(&ident).await?);
        assert!(catalog.list_tables(&ns).await?.is_empty());
        assert!(
            storage::exists(catalog.location(), Path::new(table.metadata_location())).await?
        );

        let err = catalog.drop_table(&ident, false).await.unwrap_err();
        assert!(matches!(err, TableError::TableNotFound { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn purge_removes_table_directory() -> TestResult {
        let (catalog, ns) = catalog_with_ns("default").await?;
        let ident = TableIdent::new(ns, "events")?;
        let table = catalog
            .create_table(&ident, schema(), &[], BTreeMap::new())
            .await?;
        catalog.drop_table(&ident, true).await?;
        assert!(
            !storage::exists(catalog.location(), Path::new(table.metadata_location())).await?
        );
        Ok(())
    }
}
