//! Partition specs.
//!
//! A [`PartitionSpec`] is an ordered list of transforms over source columns.
//! Specs are immutable: evolution creates a new spec with a new id, and data
//! files keep the id of the spec they were written under.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::metadata::schema::Schema;
use crate::metadata::transform::Transform;
use crate::metadata::types::PrimitiveType;
use crate::metadata::values::Datum;

/// First id handed out to partition fields.
pub const PARTITION_FIELD_ID_START: i32 = 1000;

/// Errors raised while building, evolving or applying a partition spec.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SpecError {
    /// The source column does not exist in the schema.
    #[snafu(display("Partition source column {name:?} not found"))]
    SourceColumnNotFound {
        /// Requested column.
        name: String,
    },

    /// The source column is nested or not a primitive.
    #[snafu(display("Partition source column {name:?} is not a primitive column"))]
    SourceNotPrimitive {
        /// Offending column.
        name: String,
    },

    /// The transform cannot be applied to the source type.
    #[snafu(display("Transform {transform} cannot be applied to {column:?} of type {source_type}"))]
    TransformNotApplicable {
        /// Transform text.
        transform: String,
        /// Source column.
        column: String,
        /// Source type text.
        source_type: String,
    },

    /// The spec already partitions this column with this transform.
    #[snafu(display("Column {column:?} is already partitioned by {transform}"))]
    DuplicatePartitionField {
        /// Source column.
        column: String,
        /// Transform text.
        transform: String,
    },

    /// A partition field with this name exists already, or it would shadow a
    /// schema column.
    #[snafu(display("Partition field name {name:?} is already in use"))]
    PartitionNameCollision {
        /// Colliding name.
        name: String,
    },

    /// No partition field with this name.
    #[snafu(display("Partition field {name:?} not found"))]
    PartitionFieldNotFound {
        /// Requested name.
        name: String,
    },

    /// Transform text could not be parsed.
    #[snafu(display("Invalid transform {transform:?}"))]
    TransformParse {
        /// Text that failed to parse.
        transform: String,
    },

    /// Applying a transform to a value failed.
    #[snafu(display("Cannot apply {transform} to {value}: {reason}"))]
    TransformFailed {
        /// Transform text.
        transform: String,
        /// Value text.
        value: String,
        /// Why.
        reason: String,
    },

    /// The spec id is not known to the table.
    #[snafu(display("Unknown partition spec id {spec_id}"))]
    UnknownSpec {
        /// Requested id.
        spec_id: i32,
    },

    /// A data file's partition tuple does not fit its spec.
    #[snafu(display("Data file {path} has an invalid partition tuple: {reason}"))]
    InvalidPartitionTuple {
        /// Data file path.
        path: String,
        /// What is wrong.
        reason: String,
    },

    /// The spec references a source field id missing from the schema.
    #[snafu(display("Partition field {name:?} references unknown source field {source_id}"))]
    UnknownSourceField {
        /// Partition field name.
        name: String,
        /// Missing source id.
        source_id: i32,
    },
}

/// One partition column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionField {
    /// Field id of the source column.
    pub source_id: i32,
    /// Partition field id (1000 and up).
    pub field_id: i32,
    /// Partition field name.
    pub name: String,
    /// Transform applied to the source value.
    pub transform: Transform,
}

/// An immutable partition spec version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    spec_id: i32,
    fields: Vec<PartitionField>,
}

impl PartitionSpec {
    /// The spec with no partition fields (id 0).
    pub fn unpartitioned() -> Self {
        Self {
            spec_id: 0,
            fields: Vec::new(),
        }
    }

    pub(crate) fn from_parts(spec_id: i32, fields: Vec<PartitionField>) -> Self {
        Self { spec_id, fields }
    }

    /// Spec id.
    pub fn spec_id(&self) -> i32 {
        self.spec_id
    }

    /// Partition fields in order.
    pub fn fields(&self) -> &[PartitionField] {
        &self.fields
    }

    /// Whether the spec has no fields.
    pub fn is_unpartitioned(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<&PartitionField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Highest partition field id, or `PARTITION_FIELD_ID_START - 1` if none.
    pub fn highest_field_id(&self) -> i32 {
        self.fields
            .iter()
            .map(|f| f.field_id)
            .max()
            .unwrap_or(PARTITION_FIELD_ID_START - 1)
    }

    /// Source field ids referenced by this spec.
    pub fn source_ids(&self) -> HashSet<i32> {
        self.fields.iter().map(|f| f.source_id).collect()
    }

    /// Whether both specs have the same fields, ignoring spec ids.
    pub fn same_fields(&self, other: &PartitionSpec) -> bool {
        self.fields == other.fields
    }

    /// Partition value types, resolved against `schema`.
    pub fn partition_types(&self, schema: &Schema) -> Result<Vec<PrimitiveType>, SpecError> {
        self.fields
            .iter()
            .map(|f| {
                let source = schema.primitive_type_by_id(f.source_id).context(
                    UnknownSourceFieldSnafu {
                        name: f.name.clone(),
                        source_id: f.source_id,
                    },
                )?;
                f.transform
                    .result_type(source)
                    .context(TransformNotApplicableSnafu {
                        transform: f.transform.to_string(),
                        column: f.name.clone(),
                        source_type: source.to_string(),
                    })
            })
            .collect()
    }

    /// Compute the partition tuple for one row, given its source values.
    pub fn partition_values<'a>(
        &self,
        source_value: impl Fn(i32) -> Option<&'a Datum>,
    ) -> Result<Vec<Option<Datum>>, SpecError> {
        self.fields
            .iter()
            .map(|f| f.transform.apply(source_value(f.source_id)))
            .collect()
    }

    /// Check a data file's partition tuple against this spec.
    pub fn validate_tuple(
        &self,
        schema: &Schema,
        path: &str,
        values: &[Option<Datum>],
    ) -> Result<(), SpecError> {
        ensure!(
            values.len() == self.fields.len(),
            InvalidPartitionTupleSnafu {
                path,
                reason: format!(
                    "expected {} values, found {}",
                    self.fields.len(),
                    values.len()
                ),
            }
        );
        let types = self.partition_types(schema)?;
        for ((field, ty), value) in self.fields.iter().zip(&types).zip(values) {
            if let Some(v) = value {
                ensure!(
                    v.matches_type(ty),
                    InvalidPartitionTupleSnafu {
                        path,
                        reason: format!("value {v} does not match {} ({ty})", field.name),
                    }
                );
            }
        }
        Ok(())
    }

    /// Relative directory for a partition tuple, e.g. `date_year=2022`.
    pub fn partition_path(&self, values: &[Option<Datum>]) -> String {
        self.fields
            .iter()
            .zip(values)
            .map(|(f, v)| format!("{}={}", f.name, f.transform.to_human_string(v.as_ref())))
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// A partition field described by source column name, before binding to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnboundPartitionField {
    /// Source column name.
    pub source_name: String,
    /// Transform to apply.
    pub transform: Transform,
    /// Optional partition field name; derived from the transform if absent.
    pub name: Option<String>,
}

impl UnboundPartitionField {
    /// A field with a derived name.
    pub fn new(source_name: impl Into<String>, transform: Transform) -> Self {
        Self {
            source_name: source_name.into(),
            transform,
            name: None,
        }
    }

    /// Override the partition field name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}
