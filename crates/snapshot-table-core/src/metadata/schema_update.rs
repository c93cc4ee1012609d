//! Schema evolution operations.
//!
//! Changes reference existing columns by field id together with the name
//! the column had when the change was recorded. Replaying a change against a
//! schema where that id no longer carries the expected name fails with
//! [`SchemaError::StaleColumnReference`], which the commit engine reports as
//! a conflict.

use std::collections::HashSet;

use snafu::prelude::*;

use crate::metadata::schema::{
    ColumnAlreadyExistsSnafu, ColumnNotFoundSnafu, ColumnUsedByPartitionSnafu,
    InvalidTypePromotionSnafu, NotPrimitiveSnafu, ParentNotStructSnafu,
    RequiredColumnOnNonEmptyTableSnafu, Schema, SchemaError, StaleColumnReferenceSnafu,
};
use crate::metadata::types::{NestedField, PrimitiveType, Type};

/// A column captured by id and by the dotted name it had at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Stable field id.
    pub field_id: i32,
    /// Dotted path of the field when it was referenced.
    pub name: String,
}

impl ColumnRef {
    /// Resolve `name` in `schema`.
    pub fn resolve(schema: &Schema, name: &str) -> Result<Self, SchemaError> {
        let field = schema
            .field_by_name(name)
            .context(ColumnNotFoundSnafu { name })?;
        Ok(Self {
            field_id: field.id,
            name: schema.field_path(field.id).unwrap_or_else(|| name.to_string()),
        })
    }

    fn check<'a>(&self, schema: &'a Schema) -> Result<&'a NestedField, SchemaError> {
        let still_named = schema.field_path(self.field_id).as_deref() == Some(self.name.as_str());
        ensure!(
            still_named,
            StaleColumnReferenceSnafu {
                field_id: self.field_id,
                expected_name: self.name.clone(),
            }
        );
        schema
            .field_by_id(self.field_id)
            .context(StaleColumnReferenceSnafu {
                field_id: self.field_id,
                expected_name: self.name.clone(),
            })
    }
}

/// One recorded schema change.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    /// Add a column at the top level or inside a struct.
    AddColumn {
        /// Struct to add into; `None` for a top-level column.
        parent: Option<ColumnRef>,
        /// New column name.
        name: String,
        /// Column type; nested ids are reassigned on apply.
        field_type: Type,
        /// Whether the column is non-null.
        required: bool,
        /// Optional doc string.
        doc: Option<String>,
    },
    /// Rename a column, keeping its id.
    RenameColumn {
        /// Column to rename.
        column: ColumnRef,
        /// New leaf name.
        new_name: String,
    },
    /// Remove a column from the current schema. Its id is retired.
    DeleteColumn {
        /// Column to delete.
        column: ColumnRef,
    },
    /// Widen a primitive column.
    UpdateColumnType {
        /// Column to widen.
        column: ColumnRef,
        /// Target type.
        new_type: PrimitiveType,
    },
    /// Allow nulls in a required column.
    MakeColumnOptional {
        /// Column to relax.
        column: ColumnRef,
    },
}

/// Table state a schema change is validated against.
#[derive(Debug, Clone, Default)]
pub struct EvolutionContext {
    /// Highest column id ever assigned in the table.
    pub last_column_id: i32,
    /// Whether the table has committed data files.
    pub has_data: bool,
    /// Source field ids of the current default partition spec.
    pub partition_source_ids: HashSet<i32>,
}

fn siblings_mut<'a>(
    fields: &'a mut Vec<NestedField>,
    parent_id: Option<i32>,
) -> Option<&'a mut Vec<NestedField>> {
    let Some(parent_id) = parent_id else {
        return Some(fields);
    };
    for field in fields.iter_mut() {
        if let Type::Struct(s) = &mut field.field_type {
            if field.id == parent_id {
                return Some(&mut s.fields);
            }
            if let Some(found) = siblings_mut(&mut s.fields, Some(parent_id)) {
                return Some(found);
            }
        }
    }
    None
}

fn parent_of(fields: &[NestedField], id: i32, parent: Option<i32>) -> Option<Option<i32>> {
    for field in fields {
        if field.id == id {
            return Some(parent);
        }
        if let Type::Struct(s) = &field.field_type {
            if let Some(found) = parent_of(&s.fields, id, Some(field.id)) {
                return Some(found);
            }
        }
    }
    None
}

fn field_mut(fields: &mut [NestedField], id: i32) -> Option<&mut NestedField> {
    for field in fields.iter_mut() {
        if field.id == id {
            return Some(field);
        }
        if let Type::Struct(s) = &mut field.field_type {
            if let Some(found) = field_mut(&mut s.fields, id) {
                return Some(found);
            }
        }
    }
    None
}

fn subtree_ids(field: &NestedField) -> HashSet<i32> {
    let mut ids = HashSet::from([field.id]);
    if let Ok(schema) = Schema::new(0, vec![field.clone()]) {
        ids.extend(schema.field_ids());
    }
    ids
}

/// Apply one change, returning the evolved schema (same schema id).
///
/// `ctx.last_column_id` is advanced when new ids are assigned.
pub fn apply_schema_change(
    schema: &Schema,
    change: &SchemaChange,
    ctx: &mut EvolutionContext,
) -> Result<Schema, SchemaError> {
    let mut fields = schema.fields().to_vec();

    match change {
        SchemaChange::AddColumn {
            parent,
            name,
            field_type,
            required,
            doc,
        } => {
            let parent_id = match parent {
                Some(p) => {
                    let field = p.check(schema)?;
                    ensure!(
                        matches!(field.field_type, Type::Struct(_)),
                        ParentNotStructSnafu {
                            parent: p.name.clone()
                        }
                    );
                    Some(p.field_id)
                }
                None => None,
            };
            ensure!(
                !(*required && ctx.has_data),
                RequiredColumnOnNonEmptyTableSnafu { name: name.clone() }
            );

            let siblings = siblings_mut(&mut fields, parent_id).context(ParentNotStructSnafu {
                parent: parent.as_ref().map(|p| p.name.clone()).unwrap_or_default(),
            })?;
            ensure!(
                !siblings.iter().any(|f| f.name == *name),
                ColumnAlreadyExistsSnafu { name: name.clone() }
            );

            let mut next_id = ctx.last_column_id + 1;
            let id = next_id;
            let mut field_type = field_type.clone();
            field_type.assign_fresh_ids(&mut next_id);
            siblings.push(NestedField {
                id,
                name: name.clone(),
                required: *required,
                field_type,
                doc: doc.clone(),
            });
            ctx.last_column_id = next_id;
        }

        SchemaChange::RenameColumn { column, new_name } => {
            column.check(schema)?;
            let parent_id = parent_of(&fields, column.field_id, None).flatten();
            let siblings = siblings_mut(&mut fields, parent_id).context(ColumnNotFoundSnafu {
                name: column.name.clone(),
            })?;
            ensure!(
                !siblings
                    .iter()
                    .any(|f| f.name == *new_name && f.id != column.field_id),
                ColumnAlreadyExistsSnafu {
                    name: new_name.clone()
                }
            );
            if let Some(field) = siblings.iter_mut().find(|f| f.id == column.field_id) {
                field.name = new_name.clone();
            }
        }

        SchemaChange::DeleteColumn { column } => {
            let field = column.check(schema)?;
            ensure!(
                subtree_ids(field).is_disjoint(&ctx.partition_source_ids),
                ColumnUsedByPartitionSnafu {
                    name: column.name.clone()
                }
            );
            let parent_id = parent_of(&fields, column.field_id, None).flatten();
            let siblings = siblings_mut(&mut fields, parent_id).context(ColumnNotFoundSnafu {
                name: column.name.clone(),
            })?;
            siblings.retain(|f| f.id != column.field_id);
        }

        SchemaChange::UpdateColumnType { column, new_type } => {
            let field = column.check(schema)?;
            let current = field
                .field_type
                .as_primitive()
                .context(NotPrimitiveSnafu {
                    name: column.name.clone(),
                })?;
            ensure!(
                current.can_promote_to(new_type),
                InvalidTypePromotionSnafu {
                    name: column.name.clone(),
                    from: current.to_string(),
                    to: new_type.to_string(),
                }
            );
            if let Some(field) = field_mut(&mut fields, column.field_id) {
                field.field_type = Type::Primitive(*new_type);
            }
        }

        SchemaChange::MakeColumnOptional { column } => {
            column.check(schema)?;
            if let Some(field) = field_mut(&mut fields, column.field_id) {
                field.required = false;
            }
        }
    }

    schema.with_fields(fields)
}

/// Apply a list of changes in order.
pub fn apply_schema_changes(
    schema: &Schema,
    changes: &[SchemaChange],
    ctx: &mut EvolutionContext,
) -> Result<Schema, SchemaError> {
    let mut current = schema.clone();
    for change in changes {
        current = apply_schema_change(&current, change, ctx)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::StructType;

    fn base() -> (Schema, EvolutionContext) {
        let schema = Schema::new(
            0,
            vec![
                NestedField::optional(1, "name", PrimitiveType::String),
                NestedField::optional(2, "id", PrimitiveType::Int),
                NestedField::optional(3, "date", PrimitiveType::Date),
            ],
        )
        .unwrap();
        let ctx = EvolutionContext {
            last_column_id: 3,
            ..Default::default()
        };
        (schema, ctx)
    }

    fn rename(schema: &Schema, from: &str, to: &str) -> SchemaChange {
        SchemaChange::RenameColumn {
            column: ColumnRef::resolve(schema, from).unwrap(),
            new_name: to.to_string(),
        }
    }

    #[test]
    fn add_assigns_next_ids_and_never_reuses_deleted_ones() {
        let (schema, mut ctx) = base();
        let add = |name: &str| SchemaChange::AddColumn {
            parent: None,
            name: name.to_string(),
            field_type: PrimitiveType::String.into(),
            required: false,
            doc: None,
        };

        let s1 = apply_schema_change(&schema, &add("comments"), &mut ctx).unwrap();
        assert_eq!(s1.field_by_name("comments").map(|f| f.id), Some(4));

        let delete = SchemaChange::DeleteColumn {
            column: ColumnRef::resolve(&s1, "comments").unwrap(),
        };
        let s2 = apply_schema_change(&s1, &delete, &mut ctx).unwrap();
        assert!(s2.field_by_name("comments").is_none());

        let s3 = apply_schema_change(&s2, &add("comments"), &mut ctx).unwrap();
        assert_eq!(s3.field_by_name("comments").map(|f| f.id), Some(5));
        assert_eq!(ctx.last_column_id, 5);
    }

    #[test]
    fn required_add_rejected_once_table_has_data() {
        let (schema, mut ctx) = base();
        ctx.has_data = true;
        let err = apply_schema_change(
            &schema,
            &SchemaChange::AddColumn {
                parent: None,
                name: "salary".into(),
                field_type: PrimitiveType::Double.into(),
                required: true,
                doc: None,
            },
            &mut ctx,
        )
        .unwrap_err();
        assert_eq!(
            err,
            SchemaError::RequiredColumnOnNonEmptyTable {
                name: "salary".into()
            }
        );
    }

    #[test]
    fn rename_round_trip_is_structurally_identical() {
        let (schema, mut ctx) = base();
        let renamed = apply_schema_change(&schema, &rename(&schema, "id", "employee_id"), &mut ctx)
            .unwrap();
        assert_eq!(renamed.field_by_name("employee_id").map(|f| f.id), Some(2));

        let back =
            apply_schema_change(&renamed, &rename(&renamed, "employee_id", "id"), &mut ctx)
                .unwrap();
        assert!(back.same_structure(&schema));
    }

    #[test]
    fn rename_collision_is_rejected() {
        let (schema, mut ctx) = base();
        let err =
            apply_schema_change(&schema, &rename(&schema, "id", "name"), &mut ctx).unwrap_err();
        assert_eq!(err, SchemaError::ColumnAlreadyExists { name: "name".into() });
    }

    #[test]
    fn stale_reference_detected_after_concurrent_rename() {
        let (schema, mut ctx) = base();
        let mine = rename(&schema, "id", "b");
        let theirs = apply_schema_change(&schema, &rename(&schema, "id", "a"), &mut ctx).unwrap();

        let err = apply_schema_change(&theirs, &mine, &mut ctx).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::StaleColumnReference { field_id: 2, .. }
        ));
    }

    #[test]
    fn type_widening_rules_are_enforced() {
        let (schema, mut ctx) = base();
        let id = ColumnRef::resolve(&schema, "id").unwrap();
        let widened = apply_schema_change(
            &schema,
            &SchemaChange::UpdateColumnType {
                column: id.clone(),
                new_type: PrimitiveType::Long,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(widened.primitive_type_by_id(2), Some(&PrimitiveType::Long));

        let err = apply_schema_change(
            &schema,
            &SchemaChange::UpdateColumnType {
                column: id,
                new_type: PrimitiveType::String,
            },
            &mut ctx,
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::InvalidTypePromotion { .. }));
    }

    #[test]
    fn partition_source_cannot_be_deleted() {
        let (schema, mut ctx) = base();
        ctx.partition_source_ids.insert(3);
        let err = apply_schema_change(
            &schema,
            &SchemaChange::DeleteColumn {
                column: ColumnRef::resolve(&schema, "date").unwrap(),
            },
            &mut ctx,
        )
        .unwrap_err();
        assert_eq!(err, SchemaError::ColumnUsedByPartition { name: "date".into() });
    }

    #[test]
    fn nested_add_goes_into_struct() {
        let schema = Schema::new(
            0,
            vec![NestedField::optional(
                1,
                "address",
                Type::Struct(StructType::new(vec![NestedField::optional(
                    2,
                    "city",
                    PrimitiveType::String,
                )])),
            )],
        )
        .unwrap();
        let mut ctx = EvolutionContext {
            last_column_id: 2,
            ..Default::default()
        };
        let evolved = apply_schema_change(
            &schema,
            &SchemaChange::AddColumn {
                parent: Some(ColumnRef::resolve(&schema, "address").unwrap()),
                name: "zip".into(),
                field_type: PrimitiveType::String.into(),
                required: false,
                doc: None,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(evolved.field_by_name("address.zip").map(|f| f.id), Some(3));
    }
}
