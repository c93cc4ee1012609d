//! Pruning evaluators.
//!
//! All evaluators here are conservative in one direction only:
//!
//! - [`ManifestEvaluator`], [`PartitionEvaluator`] and
//!   [`InclusiveMetricsEvaluator`] answer "might any row match?" and return
//!   `false` only when no row can.
//! - [`StrictMetricsEvaluator`] answers "must every row match?" and returns
//!   `true` only when every row does.
//!
//! Values that cannot be compared never prune.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::expr::predicate::{BoundPredicate, BoundReference, PredicateOperator};
use crate::expr::projection::project_inclusive;
use crate::manifest::data_file::DataFile;
use crate::manifest::manifest_list::{FieldSummary, ManifestFile};
use crate::metadata::partition::PartitionSpec;
use crate::metadata::schema::Schema;
use crate::metadata::types::PrimitiveType;
use crate::metadata::values::Datum;

fn cmp(a: &Datum, b: &Datum) -> Option<Ordering> {
    if a.is_nan() || b.is_nan() {
        return None;
    }
    a.compare(b)
}

fn is_floating(term: &BoundReference) -> bool {
    matches!(term.field_type, PrimitiveType::Float | PrimitiveType::Double)
}

/// Walk `predicate`, deciding leaves with `leaf`.
fn visit<F>(predicate: &BoundPredicate, leaf: &F) -> bool
where
    F: Fn(PredicateOperator, &BoundReference, &[Datum]) -> bool,
{
    match predicate {
        BoundPredicate::AlwaysTrue => true,
        BoundPredicate::AlwaysFalse => false,
        BoundPredicate::And(l, r) => visit(l, leaf) && visit(r, leaf),
        BoundPredicate::Or(l, r) => visit(l, leaf) || visit(r, leaf),
        BoundPredicate::Unary { op, term } => leaf(*op, term, &[]),
        BoundPredicate::Binary { op, term, literal } => {
            leaf(*op, term, std::slice::from_ref(literal))
        }
        BoundPredicate::Set {
            op,
            term,
            literals,
        } => leaf(*op, term, literals),
    }
}

fn positions(spec: &PartitionSpec) -> HashMap<i32, usize> {
    spec.fields()
        .iter()
        .enumerate()
        .map(|(pos, f)| (f.field_id, pos))
        .collect()
}

/// Prunes manifests by the partition summaries in the manifest list.
#[derive(Debug, Clone)]
pub struct ManifestEvaluator {
    projected: BoundPredicate,
    positions: HashMap<i32, usize>,
}

impl ManifestEvaluator {
    /// Evaluator for manifests written under `spec`.
    pub fn new(filter: &BoundPredicate, spec: &PartitionSpec) -> Self {
        Self {
            projected: project_inclusive(filter, spec),
            positions: positions(spec),
        }
    }

    /// Whether `manifest` might contain a matching file.
    pub fn eval(&self, manifest: &ManifestFile) -> bool {
        visit(&self.projected, &|op, term, literals| {
            match self
                .positions
                .get(&term.field_id)
                .and_then(|pos| manifest.partitions.get(*pos))
            {
                Some(summary) => summary_might_match(summary, op, literals),
                None => true,
            }
        })
    }
}

fn summary_might_match(summary: &FieldSummary, op: PredicateOperator, literals: &[Datum]) -> bool {
    use PredicateOperator::*;

    let lower = summary.lower_bound.as_ref();
    let upper = summary.upper_bound.as_ref();
    let lit = literals.first();
    // missing bounds mean every value is null
    let below_upper = |x: &Datum, strict: bool| match upper {
        None => false,
        Some(u) => cmp(u, x).is_none_or(|o| if strict { o.is_gt() } else { o.is_ge() }),
    };
    let above_lower = |x: &Datum, strict: bool| match lower {
        None => false,
        Some(l) => cmp(l, x).is_none_or(|o| if strict { o.is_lt() } else { o.is_le() }),
    };
    let within = |x: &Datum| above_lower(x, false) && below_upper(x, false);

    match (op, lit) {
        (IsNull, _) => summary.contains_null,
        (NotNull, _) => !(summary.contains_null && lower.is_none()),
        (LessThan, Some(x)) => above_lower(x, true),
        (LessThanOrEq, Some(x)) => above_lower(x, false),
        (GreaterThan, Some(x)) => below_upper(x, true),
        (GreaterThanOrEq, Some(x)) => below_upper(x, false),
        (Eq, Some(x)) => within(x),
        (In, _) => literals.iter().any(|x| within(x)),
        _ => true,
    }
}

/// Evaluates a projected filter against one partition tuple.
///
/// A null partition value satisfies only `IS NULL` and `IS NOT NAN`.
#[derive(Debug, Clone)]
pub struct PartitionEvaluator {
    projected: BoundPredicate,
    positions: HashMap<i32, usize>,
}

impl PartitionEvaluator {
    /// Evaluator for files partitioned by `spec`.
    pub fn new(filter: &BoundPredicate, spec: &PartitionSpec) -> Self {
        Self {
            projected: project_inclusive(filter, spec),
            positions: positions(spec),
        }
    }

    /// Whether a file with partition tuple `partition` might hold matching rows.
    pub fn eval(&self, partition: &[Option<Datum>]) -> bool {
        visit(&self.projected, &|op, term, literals| {
            match self
                .positions
                .get(&term.field_id)
                .and_then(|pos| partition.get(*pos))
            {
                Some(value) => value_might_match(value.as_ref(), op, literals),
                None => true,
            }
        })
    }
}

fn value_might_match(value: Option<&Datum>, op: PredicateOperator, literals: &[Datum]) -> bool {
    use PredicateOperator::*;

    let Some(v) = value else {
        return matches!(op, IsNull | NotNan);
    };
    let test = |x: &Datum, f: fn(Ordering) -> bool| cmp(v, x).is_none_or(f);
    match (op, literals.first()) {
        (IsNull, _) => false,
        (NotNull, _) => true,
        (IsNan, _) => v.is_nan(),
        (NotNan, _) => !v.is_nan(),
        (LessThan, Some(x)) => test(x, Ordering::is_lt),
        (LessThanOrEq, Some(x)) => test(x, Ordering::is_le),
        (GreaterThan, Some(x)) => test(x, Ordering::is_gt),
        (GreaterThanOrEq, Some(x)) => test(x, Ordering::is_ge),
        (Eq, Some(x)) => test(x, Ordering::is_eq),
        (NotEq, Some(x)) => test(x, Ordering::is_ne),
        (In, _) => literals.iter().any(|x| test(x, Ordering::is_eq)),
        (NotIn, _) => literals.iter().all(|x| test(x, Ordering::is_ne)),
        _ => true,
    }
}

/// Column statistics of one file, read through the schema it was written with.
struct ColumnStats<'a> {
    record_count: u64,
    present: bool,
    null_count: Option<u64>,
    lower: Option<&'a Datum>,
    upper: Option<&'a Datum>,
}

impl<'a> ColumnStats<'a> {
    fn of(file: &'a DataFile, file_schema: &Schema, field_id: i32) -> Self {
        Self {
            record_count: file.record_count,
            present: file_schema.field_by_id(field_id).is_some(),
            null_count: file.null_value_counts.get(&field_id).copied(),
            lower: file.lower_bounds.get(&field_id),
            upper: file.upper_bounds.get(&field_id),
        }
    }

    fn all_null(&self) -> bool {
        !self.present || self.null_count == Some(self.record_count)
    }

    fn no_nulls(&self) -> bool {
        self.present && self.null_count == Some(0)
    }
}

/// Decides whether a data file might contain rows matching a filter, from
/// its per-column counts and bounds.
///
/// Columns the file's schema does not contain read as all-null.
#[derive(Debug, Clone, Copy)]
pub struct InclusiveMetricsEvaluator<'a> {
    file: &'a DataFile,
    file_schema: &'a Schema,
}

impl<'a> InclusiveMetricsEvaluator<'a> {
    /// Evaluator over `file`, whose stats are keyed by ids of `file_schema`.
    pub fn new(file: &'a DataFile, file_schema: &'a Schema) -> Self {
        Self { file, file_schema }
    }

    /// Whether any row of the file might match `filter`.
    pub fn eval(&self, filter: &BoundPredicate) -> bool {
        if self.file.record_count == 0 {
            return false;
        }
        visit(filter, &|op, term, literals| {
            let stats = ColumnStats::of(self.file, self.file_schema, term.field_id);
            rows_might_match(&stats, op, term, literals)
        })
    }
}

fn rows_might_match(
    stats: &ColumnStats<'_>,
    op: PredicateOperator,
    term: &BoundReference,
    literals: &[Datum],
) -> bool {
    use PredicateOperator::*;

    if stats.all_null() {
        return matches!(op, IsNull | NotNan | NotEq | NotIn);
    }
    let lower_fails = |x: &Datum, f: fn(Ordering) -> bool| {
        stats.lower.and_then(|l| cmp(l, x)).is_some_and(f)
    };
    let upper_fails = |x: &Datum, f: fn(Ordering) -> bool| {
        stats.upper.and_then(|u| cmp(u, x)).is_some_and(f)
    };
    let outside = |x: &Datum| lower_fails(x, Ordering::is_gt) || upper_fails(x, Ordering::is_lt);

    match (op, literals.first()) {
        (IsNull, _) => stats.null_count != Some(0),
        (NotNull, _) => true,
        (IsNan | NotNan, _) => true,
        (LessThan, Some(x)) => !lower_fails(x, Ordering::is_ge),
        (LessThanOrEq, Some(x)) => !lower_fails(x, Ordering::is_gt),
        (GreaterThan, Some(x)) => !upper_fails(x, Ordering::is_le),
        (GreaterThanOrEq, Some(x)) => !upper_fails(x, Ordering::is_lt),
        (Eq, Some(x)) => !outside(x),
        (NotEq, Some(x)) => {
            // only a file holding nothing but `x` can be skipped
            let only_x = !is_floating(term)
                && stats.no_nulls()
                && stats.lower.zip(stats.upper).is_some_and(|(l, u)| {
                    cmp(l, x) == Some(Ordering::Equal) && cmp(u, x) == Some(Ordering::Equal)
                });
            !only_x
        }
        (In, _) => !literals.iter().all(|x| outside(x)),
        _ => true,
    }
}

/// Decides whether every row of a data file matches a filter.
///
/// Used to drop the residual filter of files that need no row-level
/// filtering.
#[derive(Debug, Clone, Copy)]
pub struct StrictMetricsEvaluator<'a> {
    file: &'a DataFile,
    file_schema: &'a Schema,
}

impl<'a> StrictMetricsEvaluator<'a> {
    /// Evaluator over `file`, whose stats are keyed by ids of `file_schema`.
    pub fn new(file: &'a DataFile, file_schema: &'a Schema) -> Self {
        Self { file, file_schema }
    }

    /// Whether every row of the file matches `filter`.
    pub fn eval(&self, filter: &BoundPredicate) -> bool {
        if self.file.record_count == 0 {
            return true;
        }
        visit(filter, &|op, term, literals| {
            let stats = ColumnStats::of(self.file, self.file_schema, term.field_id);
            rows_must_match(&stats, op, term, literals)
        })
    }
}

fn rows_must_match(
    stats: &ColumnStats<'_>,
    op: PredicateOperator,
    term: &BoundReference,
    literals: &[Datum],
) -> bool {
    use PredicateOperator::*;

    match op {
        IsNull => return stats.all_null(),
        NotNull => return stats.no_nulls(),
        _ => {}
    }
    // NaN rows are not reflected in the bounds
    if !stats.no_nulls() || is_floating(term) {
        return false;
    }
    let (Some(lower), Some(upper)) = (stats.lower, stats.upper) else {
        return false;
    };
    let lower_is = |x: &Datum, f: fn(Ordering) -> bool| cmp(lower, x).is_some_and(f);
    let upper_is = |x: &Datum, f: fn(Ordering) -> bool| cmp(upper, x).is_some_and(f);
    let outside = |x: &Datum| lower_is(x, Ordering::is_gt) || upper_is(x, Ordering::is_lt);

    match (op, literals.first()) {
        (LessThan, Some(x)) => upper_is(x, Ordering::is_lt),
        (LessThanOrEq, Some(x)) => upper_is(x, Ordering::is_le),
        (GreaterThan, Some(x)) => lower_is(x, Ordering::is_gt),
        (GreaterThanOrEq, Some(x)) => lower_is(x, Ordering::is_ge),
        (Eq, Some(x)) => lower_is(x, Ordering::is_eq) && upper_is(x, Ordering::is_eq),
        (NotEq, Some(x)) => outside(x),
        (In, _) => {
            cmp(lower, upper) == Some(Ordering::Equal)
                && literals.iter().any(|x| lower_is(x, Ordering::is_eq))
        }
        (NotIn, _) => literals.iter().all(|x| outside(x)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::predicate::{Predicate, Reference};
    use crate::metadata::partition::PartitionField;
    use crate::metadata::transform::Transform;
    use crate::metadata::types::NestedField;

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

    fn bind(p: Predicate) -> BoundPredicate {
        p.bind(&schema(), true).unwrap()
    }

    fn year_spec() -> PartitionSpec {
        PartitionSpec::from_parts(
            1,
            vec![PartitionField {
                source_id: 3,
                field_id: 1000,
                name: "date_year".into(),
                transform: Transform::Year,
            }],
        )
    }

    fn manifest_file(lower: Option<i32>, upper: Option<i32>, contains_null: bool) -> ManifestFile {
        ManifestFile {
            manifest_path: "m.json".into(),
            manifest_length: 1,
            partition_spec_id: 1,
            added_snapshot_id: 1,
            sequence_number: 1,
            added_files_count: 1,
            existing_files_count: 0,
            deleted_files_count: 0,
            added_rows_count: 1,
            existing_rows_count: 0,
            deleted_rows_count: 0,
            partitions: vec![FieldSummary {
                contains_null,
                lower_bound: lower.map(Datum::Int),
                upper_bound: upper.map(Datum::Int),
            }],
        }
    }

    fn ids_file() -> DataFile {
        // ids 10..=20, two nulls out of 50 rows
        DataFile::builder("f.parquet", 0)
            .record_count(50)
            .column_stats(2, 50, 2, Some(Datum::Int(10)), Some(Datum::Int(20)))
            .build()
            .unwrap()
    }

    #[test]
    fn manifests_outside_the_year_are_pruned() {
        let filter = bind(Reference::new("date").equal_to("2022-07-01"));
        let eval = ManifestEvaluator::new(&filter, &year_spec());
        // 2021 only
        assert!(!eval.eval(&manifest_file(Some(51), Some(51), false)));
        // 2022 only
        assert!(eval.eval(&manifest_file(Some(52), Some(52), false)));
        // 2020..2023
        assert!(eval.eval(&manifest_file(Some(50), Some(53), false)));
        // nothing but nulls
        assert!(!eval.eval(&manifest_file(None, None, true)));
    }

    #[test]
    fn manifest_null_checks_use_contains_null() {
        let is_null = bind(Reference::new("date").is_null());
        let eval = ManifestEvaluator::new(&is_null, &year_spec());
        assert!(!eval.eval(&manifest_file(Some(51), Some(52), false)));
        assert!(eval.eval(&manifest_file(Some(51), Some(52), true)));

        let not_null = bind(Reference::new("date").is_not_null());
        let eval = ManifestEvaluator::new(&not_null, &year_spec());
        assert!(!eval.eval(&manifest_file(None, None, true)));
        assert!(eval.eval(&manifest_file(Some(51), Some(52), true)));
    }

    #[test]
    fn unrelated_columns_never_prune_manifests() {
        let filter = bind(Reference::new("name").equal_to("x"));
        let eval = ManifestEvaluator::new(&filter, &year_spec());
        assert!(eval.eval(&manifest_file(Some(1), Some(1), false)));
    }

    #[test]
    fn partition_tuples_follow_null_semantics() {
        let filter = bind(Reference::new("date").greater_than_or_equal_to("2022-01-01"));
        let eval = PartitionEvaluator::new(&filter, &year_spec());
        assert!(eval.eval(&[Some(Datum::Int(52))]));
        assert!(eval.eval(&[Some(Datum::Int(53))]));
        assert!(!eval.eval(&[Some(Datum::Int(51))]));
        assert!(!eval.eval(&[None]));

        let is_null = bind(Reference::new("date").is_null());
        let eval = PartitionEvaluator::new(&is_null, &year_spec());
        assert!(eval.eval(&[None]));
        assert!(!eval.eval(&[Some(Datum::Int(52))]));
    }

    #[test]
    fn inclusive_metrics_prune_by_bounds() {
        let file = ids_file();
        let s = schema();
        let eval = InclusiveMetricsEvaluator::new(&file, &s);
        assert!(!eval.eval(&bind(Reference::new("id").less_than(10))));
        assert!(eval.eval(&bind(Reference::new("id").less_than_or_equal_to(10))));
        assert!(!eval.eval(&bind(Reference::new("id").greater_than(20))));
        assert!(eval.eval(&bind(Reference::new("id").greater_than_or_equal_to(20))));
        assert!(!eval.eval(&bind(Reference::new("id").equal_to(25))));
        assert!(eval.eval(&bind(Reference::new("id").equal_to(15))));
        assert!(!eval.eval(&bind(Reference::new("id").is_in([1, 2, 30]))));
        assert!(eval.eval(&bind(Reference::new("id").is_in([1, 12]))));
        assert!(eval.eval(&bind(Reference::new("id").is_null())));
        assert!(eval.eval(&bind(Reference::new("id").not_equal_to(15))));
    }

    #[test]
    fn inclusive_metrics_missing_stats_never_prune() {
        let file = DataFile::builder("f.parquet", 0)
            .record_count(5)
            .build()
            .unwrap();
        let s = schema();
        let eval = InclusiveMetricsEvaluator::new(&file, &s);
        assert!(eval.eval(&bind(Reference::new("id").equal_to(1))));
        assert!(eval.eval(&bind(Reference::new("id").is_null())));
    }

    #[test]
    fn columns_added_after_the_file_read_as_null() {
        let old_schema = Schema::new(
            0,
            vec![NestedField::optional(1, "name", PrimitiveType::String)],
        )
        .unwrap();
        let file = DataFile::builder("f.parquet", 0)
            .record_count(5)
            .build()
            .unwrap();
        let inclusive = InclusiveMetricsEvaluator::new(&file, &old_schema);
        assert!(!inclusive.eval(&bind(Reference::new("id").equal_to(1))));
        assert!(!inclusive.eval(&bind(Reference::new("id").is_not_null())));
        assert!(inclusive.eval(&bind(Reference::new("id").is_null())));

        let strict = StrictMetricsEvaluator::new(&file, &old_schema);
        assert!(strict.eval(&bind(Reference::new("id").is_null())));
        assert!(!strict.eval(&bind(Reference::new("id").equal_to(1))));
    }

    #[test]
    fn empty_files_never_match() {
        let file = DataFile::builder("f.parquet", 0).build().unwrap();
        let s = schema();
        assert!(!InclusiveMetricsEvaluator::new(&file, &s).eval(&BoundPredicate::AlwaysTrue));
    }

    #[test]
    fn strict_metrics_require_no_nulls() {
        let s = schema();
        let with_nulls = ids_file();
        let eval = StrictMetricsEvaluator::new(&with_nulls, &s);
        assert!(!eval.eval(&bind(Reference::new("id").greater_than(5))));

        let no_nulls = DataFile::builder("g.parquet", 0)
            .record_count(50)
            .column_stats(2, 50, 0, Some(Datum::Int(10)), Some(Datum::Int(20)))
            .build()
            .unwrap();
        let eval = StrictMetricsEvaluator::new(&no_nulls, &s);
        assert!(eval.eval(&bind(Reference::new("id").greater_than(5))));
        assert!(eval.eval(&bind(Reference::new("id").less_than_or_equal_to(20))));
        assert!(!eval.eval(&bind(Reference::new("id").less_than(20))));
        assert!(eval.eval(&bind(Reference::new("id").not_equal_to(25))));
        assert!(eval.eval(&bind(Reference::new("id").is_not_in([1, 2, 30]))));
        assert!(!eval.eval(&bind(Reference::new("id").equal_to(15))));
        assert!(eval.eval(&bind(Reference::new("id").is_not_null())));
    }

    #[test]
    fn strict_equality_on_single_valued_file() {
        let s = schema();
        let file = DataFile::builder("g.parquet", 0)
            .record_count(3)
            .column_stats(2, 3, 0, Some(Datum::Int(7)), Some(Datum::Int(7)))
            .build()
            .unwrap();
        let eval = StrictMetricsEvaluator::new(&file, &s);
        assert!(eval.eval(&bind(Reference::new("id").equal_to(7))));
        assert!(eval.eval(&bind(Reference::new("id").is_in([7, 8]))));
        assert!(!InclusiveMetricsEvaluator::new(&file, &s)
            .eval(&bind(Reference::new("id").not_equal_to(7))));
    }
}
