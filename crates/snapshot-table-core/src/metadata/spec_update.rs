//! Partition spec evolution.

use snafu::prelude::*;

use crate::metadata::partition::{
    DuplicatePartitionFieldSnafu, PartitionField, PartitionFieldNotFoundSnafu,
    PartitionNameCollisionSnafu, PartitionSpec, SourceColumnNotFoundSnafu,
    SourceNotPrimitiveSnafu, SpecError, TransformNotApplicableSnafu, UnboundPartitionField,
};
use crate::metadata::schema::Schema;
use crate::metadata::schema_update::ColumnRef;
use crate::metadata::transform::Transform;

/// One recorded partition spec change.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecChange {
    /// Partition by a transform of a source column.
    AddField {
        /// Source column, captured by id.
        source: ColumnRef,
        /// Transform to apply.
        transform: Transform,
        /// Explicit partition field name.
        name: Option<String>,
    },
    /// Rename a partition field.
    RenameField {
        /// Current name.
        name: String,
        /// New name.
        new_name: String,
    },
    /// Drop a partition field from the spec.
    RemoveField {
        /// Field to drop.
        name: String,
    },
}

impl SpecChange {
    /// Resolve an unbound field against `schema` into an `AddField` change.
    pub fn add(schema: &Schema, field: &UnboundPartitionField) -> Result<Self, SpecError> {
        let source = ColumnRef::resolve(schema, &field.source_name).map_err(|_| {
            SourceColumnNotFoundSnafu {
                name: field.source_name.clone(),
            }
            .build()
        })?;
        Ok(SpecChange::AddField {
            source,
            transform: field.transform,
            name: field.name.clone(),
        })
    }
}

/// Table state a spec change is validated against.
#[derive(Debug, Clone)]
pub struct SpecEvolutionContext<'a> {
    /// Schema the new spec binds to.
    pub schema: &'a Schema,
    /// Highest partition field id ever assigned.
    pub last_partition_id: i32,
    /// Every spec the table has had; used to reuse ids of re-added fields.
    pub historical_specs: &'a [PartitionSpec],
}

fn apply_one(
    fields: &mut Vec<PartitionField>,
    change: &SpecChange,
    ctx: &mut SpecEvolutionContext<'_>,
) -> Result<(), SpecError> {
    match change {
        SpecChange::AddField {
            source,
            transform,
            name,
        } => {
            let schema = ctx.schema;
            let still_named = schema.field_path(source.field_id).as_deref()
                == Some(source.name.as_str());
            ensure!(
                still_named,
                SourceColumnNotFoundSnafu {
                    name: source.name.clone()
                }
            );
            let source_field = schema
                .field_by_id(source.field_id)
                .context(SourceColumnNotFoundSnafu {
                    name: source.name.clone(),
                })?;
            let source_type =
                source_field
                    .field_type
                    .as_primitive()
                    .context(SourceNotPrimitiveSnafu {
                        name: source.name.clone(),
                    })?;
            ensure!(
                transform.result_type(source_type).is_some(),
                TransformNotApplicableSnafu {
                    transform: transform.to_string(),
                    column: source.name.clone(),
                    source_type: source_type.to_string(),
                }
            );
            ensure!(
                !fields
                    .iter()
                    .any(|f| f.source_id == source.field_id && f.transform == *transform),
                DuplicatePartitionFieldSnafu {
                    column: source.name.clone(),
                    transform: transform.to_string(),
                }
            );

            let name = name
                .clone()
                .unwrap_or_else(|| transform.default_field_name(&source_field.name));
            ensure!(
                !fields.iter().any(|f| f.name == name),
                PartitionNameCollisionSnafu { name: name.clone() }
            );
            // a partition field may only shadow a column it is an identity of
            if let Some(column) = schema.field_by_name(&name) {
                ensure!(
                    *transform == Transform::Identity && column.id == source.field_id,
                    PartitionNameCollisionSnafu { name: name.clone() }
                );
            }

            let history = ctx.historical_specs;
            let reused = history
                .iter()
                .flat_map(|s| s.fields())
                .find(|f| f.source_id == source.field_id && f.transform == *transform)
                .map(|f| f.field_id);
            let field_id = match reused {
                Some(id) => id,
                None => {
                    ctx.last_partition_id += 1;
                    ctx.last_partition_id
                }
            };

            fields.push(PartitionField {
                source_id: source.field_id,
                field_id,
                name,
                transform: *transform,
            });
        }

        SpecChange::RenameField { name, new_name } => {
            ensure!(
                !fields.iter().any(|f| f.name == *new_name),
                PartitionNameCollisionSnafu {
                    name: new_name.clone()
                }
            );
            let field = fields
                .iter_mut()
                .find(|f| f.name == *name)
                .context(PartitionFieldNotFoundSnafu { name: name.clone() })?;
            field.name = new_name.clone();
        }

        SpecChange::RemoveField { name } => {
            let before = fields.len();
            fields.retain(|f| f.name != *name);
            ensure!(
                fields.len() < before,
                PartitionFieldNotFoundSnafu { name: name.clone() }
            );
        }
    }
    Ok(())
}

/// Apply `changes` in order on top of `spec`, producing a spec with
/// `new_spec_id`. `ctx.last_partition_id` is advanced for new fields.
pub fn apply_spec_changes(
    spec: &PartitionSpec,
    changes: &[SpecChange],
    new_spec_id: i32,
    ctx: &mut SpecEvolutionContext<'_>,
) -> Result<PartitionSpec, SpecError> {
    let mut fields = spec.fields().to_vec();
    for change in changes {
        apply_one(&mut fields, change, ctx)?;
    }
    Ok(PartitionSpec::from_parts(new_spec_id, fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::partition::PARTITION_FIELD_ID_START;
    use crate::metadata::types::{NestedField, PrimitiveType};

    fn schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::optional(1, "name", PrimitiveType::String),
                NestedField::optional(2, "id", PrimitiveType::Int),
                NestedField::optional(3, "date", PrimitiveType::Date),
            ],
        )
        .unwrap()
    }

    fn ctx<'a>(schema: &'a Schema, history: &'a [PartitionSpec]) -> SpecEvolutionContext<'a> {
        SpecEvolutionContext {
            schema,
            last_partition_id: PARTITION_FIELD_ID_START - 1,
            historical_specs: history,
        }
    }

    fn add(schema: &Schema, col: &str, t: Transform) -> SpecChange {
        SpecChange::add(schema, &UnboundPartitionField::new(col, t)).unwrap()
    }

    #[test]
    fn add_year_and_identity_assign_ids_from_1000() {
        let schema = schema();
        let mut ctx = ctx(&schema, &[]);
        let spec = apply_spec_changes(
            &PartitionSpec::unpartitioned(),
            &[
                add(&schema, "date", Transform::Year),
                add(&schema, "id", Transform::Identity),
            ],
            1,
            &mut ctx,
        )
        .unwrap();

        assert_eq!(spec.spec_id(), 1);
        let names: Vec<_> = spec.fields().iter().map(|f| (f.name.as_str(), f.field_id)).collect();
        assert_eq!(names, vec![("date_year", 1000), ("id", 1001)]);
        assert_eq!(ctx.last_partition_id, 1001);
    }

    #[test]
    fn invalid_additions_are_rejected() {
        let schema = schema();
        let mut c = ctx(&schema, &[]);

        assert!(matches!(
            SpecChange::add(&schema, &UnboundPartitionField::new("salary", Transform::Identity)),
            Err(SpecError::SourceColumnNotFound { .. })
        ));
        assert!(matches!(
            apply_spec_changes(
                &PartitionSpec::unpartitioned(),
                &[add(&schema, "name", Transform::Year)],
                1,
                &mut c
            ),
            Err(SpecError::TransformNotApplicable { .. })
        ));
        assert!(matches!(
            apply_spec_changes(
                &PartitionSpec::unpartitioned(),
                &[
                    add(&schema, "date", Transform::Year),
                    add(&schema, "date", Transform::Year)
                ],
                1,
                &mut c
            ),
            Err(SpecError::DuplicatePartitionField { .. })
        ));
        // named like another column
        let shadow = SpecChange::add(
            &schema,
            &UnboundPartitionField::new("date", Transform::Year).with_name("id"),
        )
        .unwrap();
        assert!(matches!(
            apply_spec_changes(&PartitionSpec::unpartitioned(), &[shadow], 1, &mut c),
            Err(SpecError::PartitionNameCollision { .. })
        ));
    }

    #[test]
    fn readding_removed_field_reuses_its_id() {
        let schema = schema();
        let mut c = ctx(&schema, &[]);
        let v1 = apply_spec_changes(
            &PartitionSpec::unpartitioned(),
            &[add(&schema, "date", Transform::Year)],
            1,
            &mut c,
        )
        .unwrap();
        let v2 = apply_spec_changes(
            &v1,
            &[SpecChange::RemoveField {
                name: "date_year".into(),
            }],
            2,
            &mut c,
        )
        .unwrap();
        assert!(v2.is_unpartitioned());

        let history = vec![PartitionSpec::unpartitioned(), v1.clone(), v2.clone()];
        let mut c = SpecEvolutionContext {
            last_partition_id: c.last_partition_id,
            ..ctx(&schema, &history)
        };
        let v3 = apply_spec_changes(&v2, &[add(&schema, "date", Transform::Year)], 3, &mut c)
            .unwrap();
        assert_eq!(v3.fields()[0].field_id, v1.fields()[0].field_id);
        assert_eq!(c.last_partition_id, 1000);
    }

    #[test]
    fn rename_and_remove_unknown_fields_fail() {
        let schema = schema();
        let mut c = ctx(&schema, &[]);
        let err = apply_spec_changes(
            &PartitionSpec::unpartitioned(),
            &[SpecChange::RemoveField { name: "x".into() }],
            1,
            &mut c,
        )
        .unwrap_err();
        assert_eq!(err, SpecError::PartitionFieldNotFound { name: "x".into() });

        let spec = apply_spec_changes(
            &PartitionSpec::unpartitioned(),
            &[
                add(&schema, "date", Transform::Year),
                SpecChange::RenameField {
                    name: "date_year".into(),
                    new_name: "yr".into(),
                },
            ],
            1,
            &mut c,
        )
        .unwrap();
        assert!(spec.field_by_name("yr").is_some());
    }
}
