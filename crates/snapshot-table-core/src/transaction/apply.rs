//! Replaying recorded updates onto a metadata version.

use snafu::prelude::*;

use crate::error::{SchemaSnafu, SpecSnafu, TableResult};
use crate::expr::predicate::Predicate;
use crate::manifest::data_file::DataFile;
use crate::metadata::schema_update::{EvolutionContext, apply_schema_changes};
use crate::metadata::spec_update::{SpecEvolutionContext, apply_spec_changes};
use crate::metadata::table_metadata::{TableMetadata, TableMetadataBuilder};
use crate::transaction::update::TableUpdate;

/// Data file changes of one transaction, merged into a single snapshot.
#[derive(Debug, Clone, Default)]
pub(crate) struct DataChanges {
    pub(crate) added: Vec<DataFile>,
    pub(crate) delete_all: bool,
    pub(crate) delete_filters: Vec<Predicate>,
    pub(crate) delete_paths: Vec<String>,
}

impl DataChanges {
    pub(crate) fn collect<'a>(updates: impl IntoIterator<Item = &'a TableUpdate>) -> Self {
        let mut out = DataChanges::default();
        for update in updates {
            match update {
                TableUpdate::Append(files) => out.added.extend(files.iter().cloned()),
                TableUpdate::Overwrite(files) => {
                    // files added earlier in the transaction are replaced too
                    out.added.clear();
                    out.delete_all = true;
                    out.added.extend(files.iter().cloned());
                }
                TableUpdate::OverwriteByFilter { filter, files } => {
                    out.delete_filters.push(filter.clone());
                    out.added.extend(files.iter().cloned());
                }
                TableUpdate::DeleteWhere(filter) => out.delete_filters.push(filter.clone()),
                TableUpdate::DeleteFiles(paths) => out.delete_paths.extend(paths.iter().cloned()),
                _ => {}
            }
        }
        out
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.added.is_empty()
            && !self.delete_all
            && self.delete_filters.is_empty()
            && self.delete_paths.is_empty()
    }

    pub(crate) fn has_deletes(&self) -> bool {
        self.delete_all || !self.delete_filters.is_empty() || !self.delete_paths.is_empty()
    }
}

/// Apply the schema, spec, property and rollback updates of `updates` to
/// `base`, in that order. Data updates are left to the snapshot producer.
pub(crate) fn apply_metadata_updates(
    base: &TableMetadata,
    updates: &[TableUpdate],
) -> TableResult<TableMetadataBuilder> {
    let mut ordered: Vec<&TableUpdate> = updates.iter().collect();
    ordered.sort_by_key(|u| u.phase());

    let mut builder = TableMetadataBuilder::new(base);
    for update in ordered {
        match update {
            TableUpdate::Schema(changes) => {
                let meta = builder.metadata();
                let mut ctx = EvolutionContext {
                    last_column_id: meta.last_column_id(),
                    has_data: meta.has_data(),
                    partition_source_ids: meta.default_spec()?.source_ids(),
                };
                let evolved = apply_schema_changes(meta.current_schema()?, changes, &mut ctx)
                    .context(SchemaSnafu)?;
                builder.add_current_schema(evolved, ctx.last_column_id);
            }
            TableUpdate::Spec(changes) => {
                let new_spec_id = builder.next_spec_id();
                let meta = builder.metadata();
                let schema = meta.current_schema()?;
                let mut ctx = SpecEvolutionContext {
                    schema,
                    last_partition_id: meta.last_partition_id(),
                    historical_specs: meta.partition_specs(),
                };
                let spec = apply_spec_changes(meta.default_spec()?, changes, new_spec_id, &mut ctx)
                    .context(SpecSnafu)?;
                let last_partition_id = ctx.last_partition_id;
                builder.add_default_spec(spec, last_partition_id);
            }
            TableUpdate::SetProperties(props) => builder.set_properties(props)?,
            TableUpdate::RemoveProperties(keys) => builder.remove_properties(keys),
            TableUpdate::RollbackTo { snapshot_id } => builder.set_current_snapshot(*snapshot_id)?,
            _ => {}
        }
    }
    Ok(builder)
}
