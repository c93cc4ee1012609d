//! Pending table updates and the builders that record them.
//!
//! Builders validate each change against the transaction's view of the
//! table (the base plus everything recorded so far), so mistakes surface at
//! the call site. Commit replays the recorded changes against whatever
//! version is current at that time.

use std::collections::BTreeMap;

use snafu::prelude::*;

use crate::error::{SchemaSnafu, SpecSnafu, TableResult};
use crate::expr::predicate::Predicate;
use crate::manifest::data_file::DataFile;
use crate::metadata::partition::{PartitionSpec, UnboundPartitionField};
use crate::metadata::schema::Schema;
use crate::metadata::schema_update::{
    ColumnRef, EvolutionContext, SchemaChange, apply_schema_change,
};
use crate::metadata::spec_update::{SpecChange, SpecEvolutionContext, apply_spec_changes};
use crate::metadata::transform::Transform;
use crate::metadata::types::{PrimitiveType, Type};
use crate::transaction::Transaction;

/// One recorded operation of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TableUpdate {
    /// One schema update block. Produces one new schema.
    Schema(Vec<SchemaChange>),
    /// One spec update block. Produces one new default spec.
    Spec(Vec<SpecChange>),
    /// Set or replace table properties.
    SetProperties(BTreeMap<String, String>),
    /// Remove table properties.
    RemoveProperties(Vec<String>),
    /// Make an existing snapshot current.
    RollbackTo {
        /// Target snapshot.
        snapshot_id: i64,
    },
    /// Add data files.
    Append(Vec<DataFile>),
    /// Replace every live file with these.
    Overwrite(Vec<DataFile>),
    /// Delete the files matching `filter`, then add `files`.
    OverwriteByFilter {
        /// Rows to replace.
        filter: Predicate,
        /// Replacement files.
        files: Vec<DataFile>,
    },
    /// Delete the files matching a filter.
    DeleteWhere(Predicate),
    /// Delete files by path.
    DeleteFiles(Vec<String>),
}

impl TableUpdate {
    /// Replay order: schema, spec, properties and references, data.
    pub(crate) fn phase(&self) -> u8 {
        match self {
            TableUpdate::Schema(_) => 0,
            TableUpdate::Spec(_) => 1,
            TableUpdate::SetProperties(_)
            | TableUpdate::RemoveProperties(_)
            | TableUpdate::RollbackTo { .. } => 2,
            TableUpdate::Append(_)
            | TableUpdate::Overwrite(_)
            | TableUpdate::OverwriteByFilter { .. }
            | TableUpdate::DeleteWhere(_)
            | TableUpdate::DeleteFiles(_) => 3,
        }
    }

    /// Whether the update changes the set of data files.
    pub fn is_data_change(&self) -> bool {
        self.phase() == 3
    }
}

/// Records one block of schema changes.
///
/// ```no_run
/// # use snapshot_table_core::table::Table;
/// # use snapshot_table_core::metadata::PrimitiveType;
/// # async fn demo(table: &Table) -> Result<(), snapshot_table_core::error::TableError> {
/// let mut txn = table.transaction();
/// txn.update_schema()?
///     .add_column("retries", PrimitiveType::Int, false)?
///     .rename_column("retries", "retry_count")?
///     .apply()?;
/// txn.commit().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SchemaUpdate<'a> {
    txn: &'a mut Transaction,
    schema: Schema,
    ctx: EvolutionContext,
    changes: Vec<SchemaChange>,
}

impl<'a> SchemaUpdate<'a> {
    pub(crate) fn new(txn: &'a mut Transaction) -> TableResult<Self> {
        let preview = txn.preview()?;
        let meta = preview.metadata();
        let schema = meta.current_schema()?.clone();
        let ctx = EvolutionContext {
            last_column_id: meta.last_column_id(),
            has_data: meta.has_data(),
            partition_source_ids: meta.default_spec()?.source_ids(),
        };
        Ok(Self {
            txn,
            schema,
            ctx,
            changes: Vec::new(),
        })
    }

    fn record(mut self, change: SchemaChange) -> TableResult<Self> {
        self.schema =
            apply_schema_change(&self.schema, &change, &mut self.ctx).context(SchemaSnafu)?;
        self.changes.push(change);
        Ok(self)
    }

    fn column(&self, name: &str) -> TableResult<ColumnRef> {
        ColumnRef::resolve(&self.schema, name).context(SchemaSnafu)
    }

    /// Schema as it will look once this block is applied.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Add a top-level column.
    pub fn add_column(
        self,
        name: &str,
        field_type: impl Into<Type>,
        required: bool,
    ) -> TableResult<Self> {
        self.record(SchemaChange::AddColumn {
            parent: None,
            name: name.to_string(),
            field_type: field_type.into(),
            required,
            doc: None,
        })
    }

    /// Add a column inside the struct column `parent`.
    pub fn add_nested_column(
        self,
        parent: &str,
        name: &str,
        field_type: impl Into<Type>,
        required: bool,
    ) -> TableResult<Self> {
        let parent = self.column(parent)?;
        self.record(SchemaChange::AddColumn {
            parent: Some(parent),
            name: name.to_string(),
            field_type: field_type.into(),
            required,
            doc: None,
        })
    }

    /// Rename a column. `new_name` is the new leaf name.
    pub fn rename_column(self, name: &str, new_name: &str) -> TableResult<Self> {
        let column = self.column(name)?;
        self.record(SchemaChange::RenameColumn {
            column,
            new_name: new_name.to_string(),
        })
    }

    /// Delete a column. Its id is never reused.
    pub fn delete_column(self, name: &str) -> TableResult<Self> {
        let column = self.column(name)?;
        self.record(SchemaChange::DeleteColumn { column })
    }

    /// Widen a primitive column.
    pub fn update_column_type(self, name: &str, new_type: PrimitiveType) -> TableResult<Self> {
        let column = self.column(name)?;
        self.record(SchemaChange::UpdateColumnType { column, new_type })
    }

    /// Allow nulls in a required column.
    pub fn make_column_optional(self, name: &str) -> TableResult<Self> {
        let column = self.column(name)?;
        self.record(SchemaChange::MakeColumnOptional { column })
    }

    /// Record the block in the transaction. An empty block records nothing.
    pub fn apply(self) -> TableResult<()> {
        if !self.changes.is_empty() {
            self.txn.push(TableUpdate::Schema(self.changes))?;
        }
        Ok(())
    }
}

/// Records one block of partition spec changes.
///
/// Source columns resolve against the schema as evolved by earlier schema
/// blocks of the same transaction.
#[derive(Debug)]
pub struct SpecUpdate<'a> {
    txn: &'a mut Transaction,
    schema: Schema,
    spec: PartitionSpec,
    last_partition_id: i32,
    historical_specs: Vec<PartitionSpec>,
    changes: Vec<SpecChange>,
}

impl<'a> SpecUpdate<'a> {
    pub(crate) fn new(txn: &'a mut Transaction) -> TableResult<Self> {
        let preview = txn.preview()?;
        let meta = preview.metadata();
        Ok(Self {
            schema: meta.current_schema()?.clone(),
            spec: meta.default_spec()?.clone(),
            last_partition_id: meta.last_partition_id(),
            historical_specs: meta.partition_specs().to_vec(),
            changes: Vec::new(),
            txn,
        })
    }

    fn record(mut self, change: SpecChange) -> TableResult<Self> {
        let mut ctx = SpecEvolutionContext {
            schema: &self.schema,
            last_partition_id: self.last_partition_id,
            historical_specs: &self.historical_specs,
        };
        let spec = apply_spec_changes(
            &self.spec,
            std::slice::from_ref(&change),
            self.spec.spec_id(),
            &mut ctx,
        )
        .context(SpecSnafu)?;
        self.last_partition_id = ctx.last_partition_id;
        self.spec = spec;
        self.changes.push(change);
        Ok(self)
    }

    /// Spec as it will look once this block is applied.
    pub fn spec(&self) -> &PartitionSpec {
        &self.spec
    }

    /// Partition by `transform` of `source`. The field name defaults to the
    /// transform's conventional name (`date_year`, `id_bucket_16`, ...).
    pub fn add_field(
        self,
        source: &str,
        transform: Transform,
        name: Option<&str>,
    ) -> TableResult<Self> {
        let mut field = UnboundPartitionField::new(source, transform);
        if let Some(name) = name {
            field = field.with_name(name);
        }
        let change = SpecChange::add(&self.schema, &field).context(SpecSnafu)?;
        self.record(change)
    }

    /// Partition by the raw value of `source`.
    pub fn add_identity(self, source: &str) -> TableResult<Self> {
        self.add_field(source, Transform::Identity, None)
    }

    /// Rename a partition field.
    pub fn rename_field(self, name: &str, new_name: &str) -> TableResult<Self> {
        self.record(SpecChange::RenameField {
            name: name.to_string(),
            new_name: new_name.to_string(),
        })
    }

    /// Stop partitioning by a field. Files already written keep their spec.
    pub fn remove_field(self, name: &str) -> TableResult<Self> {
        self.record(SpecChange::RemoveField {
            name: name.to_string(),
        })
    }

    /// Record the block in the transaction. An empty block records nothing.
    pub fn apply(self) -> TableResult<()> {
        if !self.changes.is_empty() {
            self.txn.push(TableUpdate::Spec(self.changes))?;
        }
        Ok(())
    }
}
