//! Column types of the table schema.
//!
//! Every column, struct member, list element and map key/value carries a
//! stable integer id. Names are only a view over ids: renames never change
//! them and deleted ids are never handed out again.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Leaf value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveType {
    /// True or false.
    Boolean,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit IEEE 754 float.
    Float,
    /// 64-bit IEEE 754 float.
    Double,
    /// Fixed-point decimal.
    Decimal {
        /// Total number of digits.
        precision: u32,
        /// Digits to the right of the decimal point.
        scale: u32,
    },
    /// Calendar date without time zone, stored as days from 1970-01-01.
    Date,
    /// Time of day, stored as microseconds from midnight.
    Time,
    /// Timestamp without time zone, stored as microseconds from the epoch.
    Timestamp,
    /// Timestamp adjusted to UTC, stored as microseconds from the epoch.
    Timestamptz,
    /// UTF-8 string.
    String,
    /// 16-byte universally unique identifier.
    Uuid,
    /// Fixed-length byte array.
    Fixed(u64),
    /// Variable-length byte array.
    Binary,
}

impl PrimitiveType {
    /// Whether values of this type may be widened to `target` without loss.
    ///
    /// Allowed: `int -> long`, `float -> double`, and
    /// `decimal(p, s) -> decimal(p', s)` with `p' >= p`.
    pub fn can_promote_to(&self, target: &PrimitiveType) -> bool {
        match (self, target) {
            (a, b) if a == b => true,
            (PrimitiveType::Int, PrimitiveType::Long) => true,
            (PrimitiveType::Float, PrimitiveType::Double) => true,
            (
                PrimitiveType::Decimal {
                    precision: p1,
                    scale: s1,
                },
                PrimitiveType::Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => s1 == s2 && p2 >= p1,
            _ => false,
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Decimal { precision, scale } => {
                write!(f, "decimal({precision},{scale})")
            }
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Time => write!(f, "time"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::Timestamptz => write!(f, "timestamptz"),
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Uuid => write!(f, "uuid"),
            PrimitiveType::Fixed(len) => write!(f, "fixed[{len}]"),
            PrimitiveType::Binary => write!(f, "binary"),
        }
    }
}

/// A column type: a primitive or one of the nested containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    /// A leaf value.
    Primitive(PrimitiveType),
    /// A struct of named fields.
    Struct(StructType),
    /// A list of elements.
    List(ListType),
    /// A map from keys to values.
    Map(MapType),
}

impl From<PrimitiveType> for Type {
    fn from(p: PrimitiveType) -> Self {
        Type::Primitive(p)
    }
}

impl Type {
    /// The primitive type, if this is a leaf.
    pub fn as_primitive(&self) -> Option<&PrimitiveType> {
        match self {
            Type::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// The struct type, if this is a struct.
    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            Type::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Largest id used anywhere inside this type (0 for primitives).
    pub fn highest_nested_id(&self) -> i32 {
        match self {
            Type::Primitive(_) => 0,
            Type::Struct(s) => s
                .fields
                .iter()
                .map(|f| f.id.max(f.field_type.highest_nested_id()))
                .max()
                .unwrap_or(0),
            Type::List(l) => l.element_id.max(l.element_type.highest_nested_id()),
            Type::Map(m) => m
                .key_id
                .max(m.value_id)
                .max(m.key_type.highest_nested_id())
                .max(m.value_type.highest_nested_id()),
        }
    }

    /// Replace every nested id with a fresh one taken from `next_id`.
    ///
    /// Ids are handed out parent level first, then children, so a struct's
    /// direct members get consecutive ids.
    pub fn assign_fresh_ids(&mut self, next_id: &mut i32) {
        match self {
            Type::Primitive(_) => {}
            Type::Struct(s) => {
                for field in &mut s.fields {
                    *next_id += 1;
                    field.id = *next_id;
                }
                for field in &mut s.fields {
                    field.field_type.assign_fresh_ids(next_id);
                }
            }
            Type::List(l) => {
                *next_id += 1;
                l.element_id = *next_id;
                l.element_type.assign_fresh_ids(next_id);
            }
            Type::Map(m) => {
                *next_id += 1;
                m.key_id = *next_id;
                *next_id += 1;
                m.value_id = *next_id;
                m.key_type.assign_fresh_ids(next_id);
                m.value_type.assign_fresh_ids(next_id);
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Primitive(p) => write!(f, "{p}"),
            Type::Struct(s) => {
                write!(f, "struct<")?;
                for (i, field) in s.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.field_type)?;
                }
                write!(f, ">")
            }
            Type::List(l) => write!(f, "list<{}>", l.element_type),
            Type::Map(m) => write!(f, "map<{}, {}>", m.key_type, m.value_type),
        }
    }
}

/// Ordered collection of named fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StructType {
    /// Member fields in declaration order.
    pub fields: Vec<NestedField>,
}

impl StructType {
    /// Creates a struct from its member fields.
    pub fn new(fields: Vec<NestedField>) -> Self {
        Self { fields }
    }

    /// Direct member with the given name.
    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// List container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListType {
    /// Id of the element pseudo-field.
    pub element_id: i32,
    /// Whether elements are non-null.
    pub element_required: bool,
    /// Element type.
    pub element_type: Box<Type>,
}

/// Map container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapType {
    /// Id of the key pseudo-field.
    pub key_id: i32,
    /// Key type; keys are always required.
    pub key_type: Box<Type>,
    /// Id of the value pseudo-field.
    pub value_id: i32,
    /// Whether values are non-null.
    pub value_required: bool,
    /// Value type.
    pub value_type: Box<Type>,
}

/// A named, id-carrying member of a struct or schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedField {
    /// Stable field id.
    pub id: i32,
    /// Current display name.
    pub name: String,
    /// Whether the field is non-null.
    pub required: bool,
    /// Field type.
    pub field_type: Type,
    /// Optional documentation string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
}

impl NestedField {
    /// A nullable field.
    pub fn optional(id: i32, name: impl Into<String>, field_type: impl Into<Type>) -> Self {
        Self {
            id,
            name: name.into(),
            required: false,
            field_type: field_type.into(),
            doc: None,
        }
    }

    /// A non-null field.
    pub fn required(id: i32, name: impl Into<String>, field_type: impl Into<Type>) -> Self {
        Self {
            required: true,
            ..Self::optional(id, name, field_type)
        }
    }

    /// Attach a doc string.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

impl fmt::Display for NestedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let req = if self.required { "required" } else { "optional" };
        write!(f, "{}: {} {} {}", self.id, self.name, req, self.field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn promotion_rules() {
        use PrimitiveType::*;
        assert!(Int.can_promote_to(&Long));
        assert!(Float.can_promote_to(&Double));
        assert!(!Long.can_promote_to(&Int));
        assert!(!Int.can_promote_to(&String));
        assert!(
            Decimal {
                precision: 9,
                scale: 3
            }
            .can_promote_to(&Decimal {
                precision: 12,
                scale: 3
            })
        );
        assert!(
            !Decimal {
                precision: 9,
                scale: 3
            }
            .can_promote_to(&Decimal {
                precision: 12,
                scale: 2
            })
        );
    }

    #[test]
    fn fresh_ids_are_assigned_level_by_level() {
        let mut ty = Type::Struct(StructType::new(vec![
            NestedField::optional(0, "a", PrimitiveType::Int),
            NestedField::optional(
                0,
                "b",
                Type::List(ListType {
                    element_id: 0,
                    element_required: false,
                    element_type: Box::new(PrimitiveType::String.into()),
                }),
            ),
            NestedField::optional(0, "c", PrimitiveType::Long),
        ]));
        let mut next = 10;
        ty.assign_fresh_ids(&mut next);

        let s = ty.as_struct().unwrap();
        let ids: Vec<i32> = s.fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![11, 12, 13]);
        match &s.fields[1].field_type {
            Type::List(l) => assert_eq!(l.element_id, 14),
            other => panic!("unexpected type {other}"),
        }
        assert_eq!(ty.highest_nested_id(), 14);
    }

    #[test]
    fn display_is_readable() {
        let ty = Type::Struct(StructType::new(vec![NestedField::optional(
            1,
            "price",
            PrimitiveType::Decimal {
                precision: 9,
                scale: 3,
            },
        )]));
        assert_eq!(ty.to_string(), "struct<price: decimal(9,3)>");
    }
}
