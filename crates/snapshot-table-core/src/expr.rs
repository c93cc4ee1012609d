//! Row filters and the evaluators scan planning prunes with.
//!
//! - [`predicate`]: unbound and bound filter trees.
//! - [`projection`]: inclusive projection of a row filter onto a partition spec.
//! - [`evaluator`]: manifest summary, partition tuple and column metrics
//!   evaluation.

pub mod evaluator;
pub mod predicate;
pub mod projection;

use snafu::prelude::*;

pub use evaluator::{
    InclusiveMetricsEvaluator, ManifestEvaluator, PartitionEvaluator, StrictMetricsEvaluator,
};
pub use predicate::{BoundPredicate, BoundReference, Predicate, PredicateOperator, Reference};
pub use projection::project_inclusive;

/// Errors raised while binding a filter to a schema.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExpressionError {
    /// The filter names a column the schema does not have.
    #[snafu(display("Filter references unknown column {name:?}"))]
    UnknownColumn {
        /// Column name as written in the filter.
        name: String,
    },

    /// The filter compares a struct, list or map column.
    #[snafu(display("Filter column {name:?} is not a primitive column"))]
    NotPrimitive {
        /// Column name.
        name: String,
    },

    /// A literal cannot be converted to the column type.
    #[snafu(display("Literal {literal} cannot be compared with column {column} of type {column_type}"))]
    InvalidLiteral {
        /// Column name.
        column: String,
        /// Literal as written.
        literal: String,
        /// Column type.
        column_type: String,
    },

    /// The operator does not fit the predicate form.
    #[snafu(display("Operator {op} is not valid here (column {column})"))]
    InvalidOperator {
        /// Operator symbol.
        op: String,
        /// Column name.
        column: String,
    },
}
