//! Inclusive projection of row filters onto partition specs.
//!
//! The projection of a filter `p` onto a spec is a filter over partition
//! values that holds for a file's partition tuple whenever `p` holds for any
//! row in the file. It may be looser than `p` but never stricter, so a
//! partition tuple that fails the projection proves the file has no
//! matching rows.

use crate::expr::predicate::{BoundPredicate, BoundReference, PredicateOperator};
use crate::metadata::partition::{PartitionField, PartitionSpec};
use crate::metadata::transform::Transform;
use crate::metadata::values::Datum;

/// Project `predicate` onto the partition fields of `spec`.
///
/// References in the result use partition field ids and the partition value
/// types. Leaves over columns the spec does not partition by become
/// `AlwaysTrue`.
pub fn project_inclusive(predicate: &BoundPredicate, spec: &PartitionSpec) -> BoundPredicate {
    match predicate {
        BoundPredicate::AlwaysTrue => BoundPredicate::AlwaysTrue,
        BoundPredicate::AlwaysFalse => BoundPredicate::AlwaysFalse,
        BoundPredicate::And(l, r) => project_inclusive(l, spec).and(project_inclusive(r, spec)),
        BoundPredicate::Or(l, r) => project_inclusive(l, spec).or(project_inclusive(r, spec)),
        leaf => spec
            .fields()
            .iter()
            .filter(|f| Some(f.source_id) == leaf_field_id(leaf))
            .map(|f| project_leaf(leaf, f))
            .fold(BoundPredicate::AlwaysTrue, BoundPredicate::and),
    }
}

fn leaf_field_id(leaf: &BoundPredicate) -> Option<i32> {
    match leaf {
        BoundPredicate::Unary { term, .. }
        | BoundPredicate::Binary { term, .. }
        | BoundPredicate::Set { term, .. } => Some(term.field_id),
        _ => None,
    }
}

fn partition_term(field: &PartitionField, source: &BoundReference) -> Option<BoundReference> {
    Some(BoundReference {
        field_id: field.field_id,
        name: field.name.clone(),
        field_type: field.transform.result_type(&source.field_type)?,
    })
}

fn transform_literal(transform: Transform, literal: &Datum) -> Option<Datum> {
    transform.apply(Some(literal)).ok().flatten()
}

fn project_leaf(leaf: &BoundPredicate, field: &PartitionField) -> BoundPredicate {
    use PredicateOperator::*;

    let transform = field.transform;
    if transform == Transform::Void {
        return BoundPredicate::AlwaysTrue;
    }

    match leaf {
        BoundPredicate::Unary { op, term } => match (op, partition_term(field, term)) {
            // nulls map to nulls under every non-void transform
            (IsNull | NotNull, Some(term)) => BoundPredicate::Unary { op: *op, term },
            _ => BoundPredicate::AlwaysTrue,
        },

        BoundPredicate::Binary { op, term, literal } => {
            let Some(pterm) = partition_term(field, term) else {
                return BoundPredicate::AlwaysTrue;
            };
            let Some(value) = transform_literal(transform, literal) else {
                return BoundPredicate::AlwaysTrue;
            };
            let projected_op = match (op, transform) {
                (Eq, _) => Eq,
                (NotEq, Transform::Identity) => NotEq,
                (NotEq, _) => return BoundPredicate::AlwaysTrue,
                (op, Transform::Identity) => *op,
                (_, Transform::Bucket(_)) => return BoundPredicate::AlwaysTrue,
                // a < x implies t(a) <= t(x) for order-preserving transforms
                (LessThan | LessThanOrEq, _) => LessThanOrEq,
                (GreaterThan | GreaterThanOrEq, _) => GreaterThanOrEq,
                _ => return BoundPredicate::AlwaysTrue,
            };
            BoundPredicate::Binary {
                op: projected_op,
                term: pterm,
                literal: value,
            }
        }

        BoundPredicate::Set {
            op,
            term,
            literals,
        } => {
            let Some(pterm) = partition_term(field, term) else {
                return BoundPredicate::AlwaysTrue;
            };
            match (op, transform) {
                (In, _) => {
                    let mut values: Vec<Datum> = Vec::with_capacity(literals.len());
                    for literal in literals {
                        let Some(v) = transform_literal(transform, literal) else {
                            return BoundPredicate::AlwaysTrue;
                        };
                        if !values.iter().any(|x| x.equivalent(&v)) {
                            values.push(v);
                        }
                    }
                    BoundPredicate::Set {
                        op: In,
                        term: pterm,
                        literals: values,
                    }
                }
                (NotIn, Transform::Identity) => BoundPredicate::Set {
                    op: NotIn,
                    term: pterm,
                    literals: literals.clone(),
                },
                _ => BoundPredicate::AlwaysTrue,
            }
        }

        _ => BoundPredicate::AlwaysTrue,
    }
}
