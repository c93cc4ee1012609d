//! Row filters.
//!
//! [`Predicate`] is the unbound, name-based form users build and persist.
//! [`Predicate::bind`] resolves column names to field ids against a schema
//! and coerces literals to the column type, producing a [`BoundPredicate`]
//! the evaluators work on.

use std::fmt;
use std::ops::Not;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::expr::{
    ExpressionError, InvalidLiteralSnafu, InvalidOperatorSnafu, NotPrimitiveSnafu,
    UnknownColumnSnafu,
};
use crate::metadata::schema::Schema;
use crate::metadata::types::PrimitiveType;
use crate::metadata::values::Datum;

/// Comparison and membership operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOperator {
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    NotNull,
    /// `IS NAN`
    IsNan,
    /// `IS NOT NAN`
    NotNan,
    /// `<`
    LessThan,
    /// `<=`
    LessThanOrEq,
    /// `>`
    GreaterThan,
    /// `>=`
    GreaterThanOrEq,
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `IN (...)`
    In,
    /// `NOT IN (...)`
    NotIn,
}

impl PredicateOperator {
    /// The operator selecting exactly the rows this one rejects.
    pub fn negate(self) -> Self {
        use PredicateOperator::*;
        match self {
            IsNull => NotNull,
            NotNull => IsNull,
            IsNan => NotNan,
            NotNan => IsNan,
            LessThan => GreaterThanOrEq,
            LessThanOrEq => GreaterThan,
            GreaterThan => LessThanOrEq,
            GreaterThanOrEq => LessThan,
            Eq => NotEq,
            NotEq => Eq,
            In => NotIn,
            NotIn => In,
        }
    }

    fn symbol(self) -> &'static str {
        use PredicateOperator::*;
        match self {
            IsNull => "IS NULL",
            NotNull => "IS NOT NULL",
            IsNan => "IS NAN",
            NotNan => "IS NOT NAN",
            LessThan => "<",
            LessThanOrEq => "<=",
            GreaterThan => ">",
            GreaterThanOrEq => ">=",
            Eq => "=",
            NotEq => "!=",
            In => "IN",
            NotIn => "NOT IN",
        }
    }
}

/// An unbound row filter over column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every row.
    AlwaysTrue,
    /// Matches no row.
    AlwaysFalse,
    /// Both sides match.
    And {
        /// Left side.
        left: Box<Predicate>,
        /// Right side.
        right: Box<Predicate>,
    },
    /// Either side matches.
    Or {
        /// Left side.
        left: Box<Predicate>,
        /// Right side.
        right: Box<Predicate>,
    },
    /// The child does not match.
    Not {
        /// Negated filter.
        child: Box<Predicate>,
    },
    /// Null and NaN checks.
    Unary {
        /// One of the null or NaN operators.
        op: PredicateOperator,
        /// Column name.
        term: String,
    },
    /// Column compared with a literal.
    Binary {
        /// Comparison operator.
        op: PredicateOperator,
        /// Column name.
        term: String,
        /// Literal; coerced to the column type on bind.
        literal: Datum,
    },
    /// Column tested against a literal set.
    Set {
        /// `In` or `NotIn`.
        op: PredicateOperator,
        /// Column name.
        term: String,
        /// Literals; coerced to the column type on bind.
        literals: Vec<Datum>,
    },
}

impl Predicate {
    /// Conjunction, folding constants.
    pub fn and(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::AlwaysFalse, _) | (_, Predicate::AlwaysFalse) => Predicate::AlwaysFalse,
            (Predicate::AlwaysTrue, x) | (x, Predicate::AlwaysTrue) => x,
            (l, r) => Predicate::And {
                left: Box::new(l),
                right: Box::new(r),
            },
        }
    }

    /// Disjunction, folding constants.
    pub fn or(self, other: Predicate) -> Predicate {
        match (self, other) {
            (Predicate::AlwaysTrue, _) | (_, Predicate::AlwaysTrue) => Predicate::AlwaysTrue,
            (Predicate::AlwaysFalse, x) | (x, Predicate::AlwaysFalse) => x,
            (l, r) => Predicate::Or {
                left: Box::new(l),
                right: Box::new(r),
            },
        }
    }

    /// Negation, folding constants and double negation.
    pub fn negate(self) -> Predicate {
        match self {
            Predicate::AlwaysTrue => Predicate::AlwaysFalse,
            Predicate::AlwaysFalse => Predicate::AlwaysTrue,
            Predicate::Not { child } => *child,
            other => Predicate::Not {
                child: Box::new(other),
            },
        }
    }

    /// Whether the filter is the constant `true`.
    pub fn is_always_true(&self) -> bool {
        matches!(self, Predicate::AlwaysTrue)
    }

    /// Resolve names against `schema` and coerce literals.
    ///
    /// `NOT` is pushed down to the leaves while binding, so the result never
    /// contains `Not`.
    pub fn bind(&self, schema: &Schema, case_sensitive: bool) -> Result<BoundPredicate, ExpressionError> {
        bind(self, schema, case_sensitive, false)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        self.negate()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::AlwaysTrue => f.write_str("TRUE"),
            Predicate::AlwaysFalse => f.write_str("FALSE"),
            Predicate::And { left, right } => write!(f, "({left}) AND ({right})"),
            Predicate::Or { left, right } => write!(f, "({left}) OR ({right})"),
            Predicate::Not { child } => write!(f, "NOT ({child})"),
            Predicate::Unary { op, term } => write!(f, "{term} {}", op.symbol()),
            Predicate::Binary { op, term, literal } => {
                write!(f, "{term} {} {literal}", op.symbol())
            }
            Predicate::Set { op, term, literals } => {
                let items: Vec<String> = literals.iter().map(ToString::to_string).collect();
                write!(f, "{term} {} ({})", op.symbol(), items.join(", "))
            }
        }
    }
}

/// A named column, the starting point for building filters.
///
/// ```
/// use snapshot_table_core::expr::Reference;
///
/// let filter = Reference::new("date")
///     .equal_to("2022-07-01")
///     .and(Reference::new("id").greater_than(10));
/// assert_eq!(filter.to_string(), "(date = 2022-07-01) AND (id > 10)");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    name: String,
}

impl Reference {
    /// Reference the column `name` (dotted for nested fields).
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn unary(self, op: PredicateOperator) -> Predicate {
        Predicate::Unary {
            op,
            term: self.name,
        }
    }

    fn binary(self, op: PredicateOperator, literal: impl Into<Datum>) -> Predicate {
        Predicate::Binary {
            op,
            term: self.name,
            literal: literal.into(),
        }
    }

    fn set<D: Into<Datum>>(
        self,
        op: PredicateOperator,
        literals: impl IntoIterator<Item = D>,
    ) -> Predicate {
        Predicate::Set {
            op,
            term: self.name,
            literals: literals.into_iter().map(Into::into).collect(),
        }
    }

    /// `column IS NULL`
    pub fn is_null(self) -> Predicate {
        self.unary(PredicateOperator::IsNull)
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(self) -> Predicate {
        self.unary(PredicateOperator::NotNull)
    }

    /// `column IS NAN`
    pub fn is_nan(self) -> Predicate {
        self.unary(PredicateOperator::IsNan)
    }

    /// `column IS NOT NAN`
    pub fn is_not_nan(self) -> Predicate {
        self.unary(PredicateOperator::NotNan)
    }

    /// `column < literal`
    pub fn less_than(self, literal: impl Into<Datum>) -> Predicate {
        self.binary(PredicateOperator::LessThan, literal)
    }

    /// `column <= literal`
    pub fn less_than_or_equal_to(self, literal: impl Into<Datum>) -> Predicate {
        self.binary(PredicateOperator::LessThanOrEq, literal)
    }

    /// `column > literal`
    pub fn greater_than(self, literal: impl Into<Datum>) -> Predicate {
        self.binary(PredicateOperator::GreaterThan, literal)
    }

    /// `column >= literal`
    pub fn greater_than_or_equal_to(self, literal: impl Into<Datum>) -> Predicate {
        self.binary(PredicateOperator::GreaterThanOrEq, literal)
    }

    /// `column = literal`
    pub fn equal_to(self, literal: impl Into<Datum>) -> Predicate {
        self.binary(PredicateOperator::Eq, literal)
    }

    /// `column != literal`
    pub fn not_equal_to(self, literal: impl Into<Datum>) -> Predicate {
        self.binary(PredicateOperator::NotEq, literal)
    }

    /// `column IN (literals)`
    pub fn is_in<D: Into<Datum>>(self, literals: impl IntoIterator<Item = D>) -> Predicate {
        self.set(PredicateOperator::In, literals)
    }

    /// `column NOT IN (literals)`
    pub fn is_not_in<D: Into<Datum>>(self, literals: impl IntoIterator<Item = D>) -> Predicate {
        self.set(PredicateOperator::NotIn, literals)
    }
}

/// A column resolved to its field id and type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundReference {
    /// Field id (a schema field id, or a partition field id after projection).
    pub field_id: i32,
    /// Name the column was resolved under.
    pub name: String,
    /// Column type.
    pub field_type: PrimitiveType,
}

/// A filter bound to field ids. Never contains `NOT`.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundPredicate {
    /// Matches every row.
    AlwaysTrue,
    /// Matches no row.
    AlwaysFalse,
    /// Both sides match.
    And(Box<BoundPredicate>, Box<BoundPredicate>),
    /// Either side matches.
    Or(Box<BoundPredicate>, Box<BoundPredicate>),
    /// Null and NaN checks.
    Unary {
        /// Operator.
        op: PredicateOperator,
        /// Column.
        term: BoundReference,
    },
    /// Comparison with a literal of the column type.
    Binary {
        /// Operator.
        op: PredicateOperator,
        /// Column.
        term: BoundReference,
        /// Literal.
        literal: Datum,
    },
    /// Set membership.
    Set {
        /// `In` or `NotIn`.
        op: PredicateOperator,
        /// Column.
        term: BoundReference,
        /// Literals of the column type.
        literals: Vec<Datum>,
    },
}

impl BoundPredicate {
    /// Conjunction, folding constants.
    pub fn and(self, other: BoundPredicate) -> BoundPredicate {
        match (self, other) {
            (BoundPredicate::AlwaysFalse, _) | (_, BoundPredicate::AlwaysFalse) => {
                BoundPredicate::AlwaysFalse
            }
            (BoundPredicate::AlwaysTrue, x) | (x, BoundPredicate::AlwaysTrue) => x,
            (l, r) => BoundPredicate::And(Box::new(l), Box::new(r)),
        }
    }

    /// Disjunction, folding constants.
    pub fn or(self, other: BoundPredicate) -> BoundPredicate {
        match (self, other) {
            (BoundPredicate::AlwaysTrue, _) | (_, BoundPredicate::AlwaysTrue) => {
                BoundPredicate::AlwaysTrue
            }
            (BoundPredicate::AlwaysFalse, x) | (x, BoundPredicate::AlwaysFalse) => x,
            (l, r) => BoundPredicate::Or(Box::new(l), Box::new(r)),
        }
    }

    /// Field ids referenced by the filter.
    pub fn field_ids(&self) -> Vec<i32> {
        let mut out = Vec::new();
        self.collect_field_ids(&mut out);
        out.sort_unstable();
        out.dedup();
        out
    }

    fn collect_field_ids(&self, out: &mut Vec<i32>) {
        match self {
            BoundPredicate::AlwaysTrue | BoundPredicate::AlwaysFalse => {}
            BoundPredicate::And(l, r) | BoundPredicate::Or(l, r) => {
                l.collect_field_ids(out);
                r.collect_field_ids(out);
            }
            BoundPredicate::Unary { term, .. }
            | BoundPredicate::Binary { term, .. }
            | BoundPredicate::Set { term, .. } => out.push(term.field_id),
        }
    }
}

fn bind(
    predicate: &Predicate,
    schema: &Schema,
    case_sensitive: bool,
    negated: bool,
) -> Result<BoundPredicate, ExpressionError> {
    let op_for = |op: PredicateOperator| if negated { op.negate() } else { op };
    match predicate {
        Predicate::AlwaysTrue if negated => Ok(BoundPredicate::AlwaysFalse),
        Predicate::AlwaysTrue => Ok(BoundPredicate::AlwaysTrue),
        Predicate::AlwaysFalse if negated => Ok(BoundPredicate::AlwaysTrue),
        Predicate::AlwaysFalse => Ok(BoundPredicate::AlwaysFalse),
        Predicate::And { left, right } => {
            let l = bind(left, schema, case_sensitive, negated)?;
            let r = bind(right, schema, case_sensitive, negated)?;
            Ok(if negated { l.or(r) } else { l.and(r) })
        }
        Predicate::Or { left, right } => {
            let l = bind(left, schema, case_sensitive, negated)?;
            let r = bind(right, schema, case_sensitive, negated)?;
            Ok(if negated { l.and(r) } else { l.or(r) })
        }
        Predicate::Not { child } => bind(child, schema, case_sensitive, !negated),
        Predicate::Unary { op, term } => {
            let (term, required) = resolve(schema, term, case_sensitive)?;
            bind_unary(op_for(*op), term, required)
        }
        Predicate::Binary { op, term, literal } => {
            let (term, _) = resolve(schema, term, case_sensitive)?;
            let op = op_for(*op);
            ensure!(
                !matches!(
                    op,
                    PredicateOperator::IsNull
                        | PredicateOperator::NotNull
                        | PredicateOperator::IsNan
                        | PredicateOperator::NotNan
                        | PredicateOperator::In
                        | PredicateOperator::NotIn
                ),
                InvalidOperatorSnafu {
                    op: op.symbol(),
                    column: term.name.clone(),
                }
            );
            let literal = coerce(&term, literal)?;
            Ok(BoundPredicate::Binary { op, term, literal })
        }
        Predicate::Set {
            op,
            term,
            literals,
        } => {
            let (term, _) = resolve(schema, term, case_sensitive)?;
            let op = op_for(*op);
            ensure!(
                matches!(op, PredicateOperator::In | PredicateOperator::NotIn),
                InvalidOperatorSnafu {
                    op: op.symbol(),
                    column: term.name.clone(),
                }
            );
            let mut coerced: Vec<Datum> = Vec::with_capacity(literals.len());
            for literal in literals {
                let value = coerce(&term, literal)?;
                if !coerced.iter().any(|v| v.equivalent(&value)) {
                    coerced.push(value);
                }
            }
            Ok(match (op, coerced.len()) {
                (PredicateOperator::In, 0) => BoundPredicate::AlwaysFalse,
                (PredicateOperator::NotIn, 0) => BoundPredicate::AlwaysTrue,
                (PredicateOperator::In, 1) => BoundPredicate::Binary {
                    op: PredicateOperator::Eq,
                    term,
                    literal: coerced.remove(0),
                },
                (PredicateOperator::NotIn, 1) => BoundPredicate::Binary {
                    op: PredicateOperator::NotEq,
                    term,
                    literal: coerced.remove(0),
                },
                _ => BoundPredicate::Set {
                    op,
                    term,
                    literals: coerced,
                },
            })
        }
    }
}

fn bind_unary(
    op: PredicateOperator,
    term: BoundReference,
    required: bool,
) -> Result<BoundPredicate, ExpressionError> {
    let floating = matches!(term.field_type, PrimitiveType::Float | PrimitiveType::Double);
    Ok(match op {
        PredicateOperator::IsNull if required => BoundPredicate::AlwaysFalse,
        PredicateOperator::NotNull if required => BoundPredicate::AlwaysTrue,
        PredicateOperator::IsNan if !floating => BoundPredicate::AlwaysFalse,
        PredicateOperator::NotNan if !floating => BoundPredicate::AlwaysTrue,
        PredicateOperator::IsNull
        | PredicateOperator::NotNull
        | PredicateOperator::IsNan
        | PredicateOperator::NotNan => BoundPredicate::Unary { op, term },
        other => {
            return InvalidOperatorSnafu {
                op: other.symbol(),
                column: term.name,
            }
            .fail();
        }
    })
}

fn resolve(
    schema: &Schema,
    name: &str,
    case_sensitive: bool,
) -> Result<(BoundReference, bool), ExpressionError> {
    let field = if case_sensitive {
        schema.field_by_name(name)
    } else {
        schema.field_by_name_case_insensitive(name)
    }
    .context(UnknownColumnSnafu { name })?;
    let field_type = *field
        .field_type
        .as_primitive()
        .context(NotPrimitiveSnafu { name })?;
    // a required field nested in an optional struct can still read as null
    let never_null = field.required && schema.fields().iter().any(|f| f.id == field.id);
    Ok((
        BoundReference {
            field_id: field.id,
            name: name.to_string(),
            field_type,
        },
        never_null,
    ))
}

fn coerce(term: &BoundReference, literal: &Datum) -> Result<Datum, ExpressionError> {
    literal.to_type(&term.field_type).context(InvalidLiteralSnafu {
        column: term.name.clone(),
        literal: literal.to_string(),
        column_type: term.field_type.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::types::NestedField;

    fn schema() -> Schema {
        Schema::new(
            0,
            vec![
                NestedField::optional(1, "name", PrimitiveType::String),
                NestedField::required(2, "id", PrimitiveType::Int),
                NestedField::optional(3, "date", PrimitiveType::Date),
                NestedField::optional(4, "score", PrimitiveType::Double),
            ],
        )
        .unwrap()
    }

    fn term(id: i32, name: &str, ty: PrimitiveType) -> BoundReference {
        BoundReference {
            field_id: id,
            name: name.into(),
            field_type: ty,
        }
    }

    #[test]
    fn string_literal_is_coerced_to_date() {
        let bound = Reference::new("date")
            .equal_to("2022-07-01")
            .bind(&schema(), true)
            .unwrap();
        assert_eq!(
            bound,
            BoundPredicate::Binary {
                op: PredicateOperator::Eq,
                term: term(3, "date", PrimitiveType::Date),
                literal: Datum::Date(19174),
            }
        );
    }

    #[test]
    fn bind_errors() {
        let s = schema();
        assert!(matches!(
            Reference::new("missing").equal_to(1).bind(&s, true),
            Err(ExpressionError::UnknownColumn { .. })
        ));
        assert!(matches!(
            Reference::new("date").equal_to("not a date").bind(&s, true),
            Err(ExpressionError::InvalidLiteral { .. })
        ));
        assert!(Reference::new("NAME").is_null().bind(&s, true).is_err());
        assert!(Reference::new("NAME").is_null().bind(&s, false).is_ok());
    }

    #[test]
    fn not_is_pushed_to_leaves() {
        let filter = !(Reference::new("id")
            .less_than(5)
            .or(Reference::new("name").is_null()));
        let bound = filter.bind(&schema(), true).unwrap();
        assert_eq!(
            bound,
            BoundPredicate::And(
                Box::new(BoundPredicate::Binary {
                    op: PredicateOperator::GreaterThanOrEq,
                    term: term(2, "id", PrimitiveType::Int),
                    literal: Datum::Int(5),
                }),
                Box::new(BoundPredicate::Unary {
                    op: PredicateOperator::NotNull,
                    term: term(1, "name", PrimitiveType::String),
                }),
            )
        );
    }

    #[test]
    fn required_and_set_shortcuts() {
        let s = schema();
        assert_eq!(
            Reference::new("id").is_null().bind(&s, true).unwrap(),
            BoundPredicate::AlwaysFalse
        );
        assert_eq!(
            Reference::new("id")
                .is_in(Vec::<i32>::new())
                .bind(&s, true)
                .unwrap(),
            BoundPredicate::AlwaysFalse
        );
        assert!(matches!(
            Reference::new("id").is_in([7, 7]).bind(&s, true).unwrap(),
            BoundPredicate::Binary {
                op: PredicateOperator::Eq,
                ..
            }
        ));
        assert_eq!(
            Reference::new("name").is_nan().bind(&s, true).unwrap(),
            BoundPredicate::AlwaysFalse
        );
    }

    #[test]
    fn constants_fold() {
        let p = Predicate::AlwaysTrue.and(Reference::new("id").equal_to(1));
        assert!(matches!(p, Predicate::Binary { .. }));
        assert!(Predicate::AlwaysFalse.or(Predicate::AlwaysTrue).is_always_true());
        assert_eq!(!!Reference::new("id").equal_to(1), Reference::new("id").equal_to(1));
    }

    #[test]
    fn serde_round_trip() {
        let p = Reference::new("date")
            .greater_than_or_equal_to(Datum::date_from_str("2022-01-01").unwrap())
            .and(Reference::new("name").is_not_in(["a", "b"]));
        let json = serde_json::to_string(&p).unwrap();
        let back: Predicate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
