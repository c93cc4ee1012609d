//! Table schemas.
//!
//! A [`Schema`] is an immutable, id-stamped version of the table's column
//! set. Table metadata keeps every schema ever committed so snapshots can be
//! read with the schema they were written under.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arrow::datatypes::{
    DataType, Field as ArrowField, Fields, Schema as ArrowSchema, TimeUnit as ArrowTimeUnit,
};
use parquet::arrow::PARQUET_FIELD_ID_META_KEY;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::metadata::types::{ListType, MapType, NestedField, PrimitiveType, StructType, Type};

/// Errors raised while building or evolving a schema.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SchemaError {
    /// Two sibling fields share a name.
    #[snafu(display("Duplicate field name {name:?}"))]
    DuplicateFieldName {
        /// The repeated name.
        name: String,
    },

    /// Two fields share an id.
    #[snafu(display("Duplicate field id {id}"))]
    DuplicateFieldId {
        /// The repeated id.
        id: i32,
    },

    /// No column has the given name.
    #[snafu(display("Column {name:?} not found"))]
    ColumnNotFound {
        /// The requested name.
        name: String,
    },

    /// A column with the given name already exists.
    #[snafu(display("Column {name:?} already exists"))]
    ColumnAlreadyExists {
        /// The colliding name.
        name: String,
    },

    /// A required column cannot be added once the table holds data.
    #[snafu(display("Cannot add required column {name:?}: table already contains data files"))]
    RequiredColumnOnNonEmptyTable {
        /// The rejected column.
        name: String,
    },

    /// Type change is not a supported widening.
    #[snafu(display("Cannot change column {name:?} from {from} to {to}"))]
    InvalidTypePromotion {
        /// The column being changed.
        name: String,
        /// Current type.
        from: String,
        /// Requested type.
        to: String,
    },

    /// Operation requires a primitive column.
    #[snafu(display("Column {name:?} is not a primitive column"))]
    NotPrimitive {
        /// The offending column.
        name: String,
    },

    /// Nested add target is not a struct.
    #[snafu(display("Parent {parent:?} is not a struct column"))]
    ParentNotStruct {
        /// The parent path.
        parent: String,
    },

    /// The column referenced by id no longer carries the expected name.
    #[snafu(display(
        "Column {expected_name:?} (field id {field_id}) was renamed or deleted since it was referenced"
    ))]
    StaleColumnReference {
        /// Field id captured when the change was recorded.
        field_id: i32,
        /// Name the field had at that time.
        expected_name: String,
    },

    /// The column is a source of the current partition spec.
    #[snafu(display("Column {name:?} is used by the current partition spec"))]
    ColumnUsedByPartition {
        /// The protected column.
        name: String,
    },

    /// Arrow type has no table-format counterpart.
    #[snafu(display("Unsupported Arrow type {data_type} for column {name:?}"))]
    UnsupportedArrowType {
        /// Column name.
        name: String,
        /// Arrow type rendered as text.
        data_type: String,
    },

    /// Table-format type cannot be represented in Arrow.
    #[snafu(display("Column {name:?} of type {ty} cannot be represented in Arrow"))]
    UnrepresentableType {
        /// Column name.
        name: String,
        /// The type rendered as text.
        ty: String,
    },
}

/// An immutable schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    schema_id: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    identifier_field_ids: Vec<i32>,
    fields: Vec<NestedField>,
}

fn validate_struct(
    fields: &[NestedField],
    ids: &mut HashSet<i32>,
) -> Result<(), SchemaError> {
    let mut names = HashSet::new();
    for field in fields {
        ensure!(
            names.insert(field.name.as_str()),
            DuplicateFieldNameSnafu {
                name: field.name.clone()
            }
        );
        ensure!(ids.insert(field.id), DuplicateFieldIdSnafu { id: field.id });
        validate_type(&field.field_type, ids)?;
    }
    Ok(())
}

fn validate_type(ty: &Type, ids: &mut HashSet<i32>) -> Result<(), SchemaError> {
    match ty {
        Type::Primitive(_) => Ok(()),
        Type::Struct(s) => validate_struct(&s.fields, ids),
        Type::List(l) => {
            ensure!(
                ids.insert(l.element_id),
                DuplicateFieldIdSnafu { id: l.element_id }
            );
            validate_type(&l.element_type, ids)
        }
        Type::Map(m) => {
            ensure!(ids.insert(m.key_id), DuplicateFieldIdSnafu { id: m.key_id });
            ensure!(
                ids.insert(m.value_id),
                DuplicateFieldIdSnafu { id: m.value_id }
            );
            validate_type(&m.key_type, ids)?;
            validate_type(&m.value_type, ids)
        }
    }
}

fn find_by_id(fields: &[NestedField], id: i32) -> Option<&NestedField> {
    for field in fields {
        if field.id == id {
            return Some(field);
        }
        if let Some(found) = find_in_type(&field.field_type, id) {
            return Some(found);
        }
    }
    None
}

fn find_in_type(ty: &Type, id: i32) -> Option<&NestedField> {
    match ty {
        Type::Primitive(_) => None,
        Type::Struct(s) => find_by_id(&s.fields, id),
        Type::List(l) => find_in_type(&l.element_type, id),
        Type::Map(m) => find_in_type(&m.key_type, id).or_else(|| find_in_type(&m.value_type, id)),
    }
}

fn path_by_id(fields: &[NestedField], id: i32, prefix: &str) -> Option<String> {
    for field in fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        if field.id == id {
            return Some(path);
        }
        if let Type::Struct(s) = &field.field_type {
            if let Some(found) = path_by_id(&s.fields, id, &path) {
                return Some(found);
            }
        }
    }
    None
}

impl Schema {
    /// Build a schema, validating sibling-name and global-id uniqueness.
    pub fn new(schema_id: i32, fields: Vec<NestedField>) -> Result<Self, SchemaError> {
        validate_struct(&fields, &mut HashSet::new())?;
        Ok(Self {
            schema_id,
            identifier_field_ids: Vec::new(),
            fields,
        })
    }

    /// Build a schema from fields whose ids are placeholders; ids `1..` are
    /// assigned top-level first, then nested members.
    pub fn with_fresh_ids(schema_id: i32, fields: Vec<NestedField>) -> Result<Self, SchemaError> {
        let mut ty = Type::Struct(StructType::new(fields));
        let mut next = 0;
        ty.assign_fresh_ids(&mut next);
        match ty {
            Type::Struct(s) => Self::new(schema_id, s.fields),
            _ => Self::new(schema_id, Vec::new()),
        }
    }

    /// Mark row-identifier columns by id.
    pub fn with_identifier_field_ids(mut self, ids: Vec<i32>) -> Self {
        self.identifier_field_ids = ids;
        self
    }

    /// Schema id.
    pub fn schema_id(&self) -> i32 {
        self.schema_id
    }

    /// Top-level fields in order.
    pub fn fields(&self) -> &[NestedField] {
        &self.fields
    }

    /// Identifier field ids.
    pub fn identifier_field_ids(&self) -> &[i32] {
        &self.identifier_field_ids
    }

    /// Same fields under another schema id.
    pub(crate) fn with_schema_id(mut self, schema_id: i32) -> Self {
        self.schema_id = schema_id;
        self
    }

    /// Replace the field list, validating the result.
    pub(crate) fn with_fields(&self, fields: Vec<NestedField>) -> Result<Self, SchemaError> {
        validate_struct(&fields, &mut HashSet::new())?;
        Ok(Self {
            schema_id: self.schema_id,
            identifier_field_ids: self.identifier_field_ids.clone(),
            fields,
        })
    }

    /// Field with the given id, at any depth.
    pub fn field_by_id(&self, id: i32) -> Option<&NestedField> {
        find_by_id(&self.fields, id)
    }

    /// Field by name. Top-level names win; otherwise `a.b.c` walks structs.
    pub fn field_by_name(&self, name: &str) -> Option<&NestedField> {
        if let Some(field) = self.fields.iter().find(|f| f.name == name) {
            return Some(field);
        }
        let mut parts = name.split('.');
        let first = parts.next()?;
        let mut current = self.fields.iter().find(|f| f.name == first)?;
        for part in parts {
            current = current.field_type.as_struct()?.field_by_name(part)?;
        }
        Some(current)
    }

    /// Case-insensitive top-level or dotted lookup.
    pub fn field_by_name_case_insensitive(&self, name: &str) -> Option<&NestedField> {
        let lower = name.to_lowercase();
        let mut parts = lower.split('.');
        let first = parts.next()?;
        let mut current = self
            .fields
            .iter()
            .find(|f| f.name.to_lowercase() == first)?;
        for part in parts {
            current = current
                .field_type
                .as_struct()?
                .fields
                .iter()
                .find(|f| f.name.to_lowercase() == part)?;
        }
        Some(current)
    }

    /// Dotted path of the field with the given id.
    pub fn field_path(&self, id: i32) -> Option<String> {
        path_by_id(&self.fields, id, "")
    }

    /// Primitive type of the field with the given id.
    pub fn primitive_type_by_id(&self, id: i32) -> Option<&PrimitiveType> {
        self.field_by_id(id).and_then(|f| f.field_type.as_primitive())
    }

    /// Largest id used in this schema.
    pub fn highest_field_id(&self) -> i32 {
        Type::Struct(StructType::new(self.fields.clone())).highest_nested_id()
    }

    /// Every field id present in this schema.
    pub fn field_ids(&self) -> HashSet<i32> {
        let mut ids = HashSet::new();
        // validate_struct collects every id as a side effect
        let _ = validate_struct(&self.fields, &mut ids);
        ids
    }

    /// Whether both schemas have identical fields, ignoring schema ids.
    pub fn same_structure(&self, other: &Schema) -> bool {
        self.fields == other.fields && self.identifier_field_ids == other.identifier_field_ids
    }

    /// Resolve column names to top-level or nested field ids.
    pub fn select(&self, names: &[String], case_sensitive: bool) -> Result<Vec<i32>, SchemaError> {
        names
            .iter()
            .map(|name| {
                let field = if case_sensitive {
                    self.field_by_name(name)
                } else {
                    self.field_by_name_case_insensitive(name)
                };
                field
                    .map(|f| f.id)
                    .context(ColumnNotFoundSnafu { name: name.clone() })
            })
            .collect()
    }

    /// Schema restricted to the given top-level field ids, in schema order.
    pub fn project(&self, ids: &[i32]) -> Schema {
        let wanted: HashSet<i32> = ids.iter().copied().collect();
        Schema {
            schema_id: self.schema_id,
            identifier_field_ids: Vec::new(),
            fields: self
                .fields
                .iter()
                .filter(|f| wanted.contains(&f.id))
                .cloned()
                .collect(),
        }
    }

    /// Build a schema from an Arrow schema, assigning fresh field ids.
    pub fn try_from_arrow(arrow: &ArrowSchema) -> Result<Self, SchemaError> {
        let fields = arrow
            .fields()
            .iter()
            .map(|f| arrow_field_to_nested(f))
            .collect::<Result<Vec<_>, _>>()?;
        Self::with_fresh_ids(0, fields)
    }

    /// Arrow view of this schema. Every field carries its id in the
    /// `PARQUET:field_id` metadata entry.
    pub fn to_arrow_schema(&self) -> Result<ArrowSchema, SchemaError> {
        let fields = self
            .fields
            .iter()
            .map(nested_to_arrow_field)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ArrowSchema::new(fields))
    }
}

fn arrow_field_to_nested(field: &ArrowField) -> Result<NestedField, SchemaError> {
    let field_type = arrow_type_to_type(field.name(), field.data_type())?;
    Ok(NestedField {
        id: 0,
        name: field.name().clone(),
        required: !field.is_nullable(),
        field_type,
        doc: field.metadata().get("doc").cloned(),
    })
}

fn arrow_type_to_type(name: &str, dt: &DataType) -> Result<Type, SchemaError> {
    let primitive = |p: PrimitiveType| Ok(Type::Primitive(p));
    match dt {
        DataType::Boolean => primitive(PrimitiveType::Boolean),
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::UInt8 | DataType::UInt16 => {
            primitive(PrimitiveType::Int)
        }
        DataType::Int64 | DataType::UInt32 => primitive(PrimitiveType::Long),
        DataType::Float16 | DataType::Float32 => primitive(PrimitiveType::Float),
        DataType::Float64 => primitive(PrimitiveType::Double),
        DataType::Decimal128(p, s) if *s >= 0 => primitive(PrimitiveType::Decimal {
            precision: u32::from(*p),
            scale: s.unsigned_abs().into(),
        }),
        DataType::Date32 => primitive(PrimitiveType::Date),
        DataType::Time64(ArrowTimeUnit::Microsecond) => primitive(PrimitiveType::Time),
        DataType::Timestamp(_, None) => primitive(PrimitiveType::Timestamp),
        DataType::Timestamp(_, Some(_)) => primitive(PrimitiveType::Timestamptz),
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            primitive(PrimitiveType::String)
        }
        DataType::Binary | DataType::LargeBinary | DataType::BinaryView => {
            primitive(PrimitiveType::Binary)
        }
        DataType::FixedSizeBinary(n) if *n >= 0 => {
            primitive(PrimitiveType::Fixed(n.unsigned_abs().into()))
        }
        DataType::Struct(fields) => Ok(Type::Struct(StructType::new(
            fields
                .iter()
                .map(|f| arrow_field_to_nested(f))
                .collect::<Result<Vec<_>, _>>()?,
        ))),
        DataType::List(element) | DataType::LargeList(element) => Ok(Type::List(ListType {
            element_id: 0,
            element_required: !element.is_nullable(),
            element_type: Box::new(arrow_type_to_type(name, element.data_type())?),
        })),
        DataType::Map(entries, _) => match entries.data_type() {
            DataType::Struct(kv) if kv.len() == 2 => Ok(Type::Map(MapType {
                key_id: 0,
                key_type: Box::new(arrow_type_to_type(name, kv[0].data_type())?),
                value_id: 0,
                value_required: !kv[1].is_nullable(),
                value_type: Box::new(arrow_type_to_type(name, kv[1].data_type())?),
            })),
            other => UnsupportedArrowTypeSnafu {
                name,
                data_type: other.to_string(),
            }
            .fail(),
        },
        other => UnsupportedArrowTypeSnafu {
            name,
            data_type: other.to_string(),
        }
        .fail(),
    }
}

fn with_field_id(field: ArrowField, id: i32) -> ArrowField {
    field.with_metadata(HashMap::from([(
        PARQUET_FIELD_ID_META_KEY.to_string(),
        id.to_string(),
    )]))
}

fn nested_to_arrow_field(field: &NestedField) -> Result<ArrowField, SchemaError> {
    let dt = type_to_arrow(&field.name, &field.field_type)?;
    Ok(with_field_id(
        ArrowField::new(&field.name, dt, !field.required),
        field.id,
    ))
}

fn type_to_arrow(name: &str, ty: &Type) -> Result<DataType, SchemaError> {
    let unrepresentable = || {
        UnrepresentableTypeSnafu {
            name,
            ty: ty.to_string(),
        }
        .build()
    };
    Ok(match ty {
        Type::Primitive(p) => match p {
            PrimitiveType::Boolean => DataType::Boolean,
            PrimitiveType::Int => DataType::Int32,
            PrimitiveType::Long => DataType::Int64,
            PrimitiveType::Float => DataType::Float32,
            PrimitiveType::Double => DataType::Float64,
            PrimitiveType::Decimal { precision, scale } => {
                let p = u8::try_from(*precision)
                    .ok()
                    .filter(|p| *p <= 38)
                    .ok_or_else(unrepresentable)?;
                let s = i8::try_from(*scale).map_err(|_| unrepresentable())?;
                DataType::Decimal128(p, s)
            }
            PrimitiveType::Date => DataType::Date32,
            PrimitiveType::Time => DataType::Time64(ArrowTimeUnit::Microsecond),
            PrimitiveType::Timestamp => DataType::Timestamp(ArrowTimeUnit::Microsecond, None),
            PrimitiveType::Timestamptz => {
                DataType::Timestamp(ArrowTimeUnit::Microsecond, Some(Arc::from("+00:00")))
            }
            PrimitiveType::String => DataType::Utf8,
            PrimitiveType::Uuid => DataType::FixedSizeBinary(16),
            PrimitiveType::Fixed(len) => {
                DataType::FixedSizeBinary(i32::try_from(*len).map_err(|_| unrepresentable())?)
            }
            PrimitiveType::Binary => DataType::Binary,
        },
        Type::Struct(s) => DataType::Struct(Fields::from(
            s.fields
                .iter()
                .map(nested_to_arrow_field)
                .collect::<Result<Vec<_>, _>>()?,
        )),
        Type::List(l) => DataType::List(Arc::new(with_field_id(
            ArrowField::new(
                "element",
                type_to_arrow(name, &l.element_type)?,
                !l.element_required,
            ),
            l.element_id,
        ))),
        Type::Map(m) => {
            let key = with_field_id(
                ArrowField::new("key", type_to_arrow(name, &m.key_type)?, false),
                m.key_id,
            );
            let value = with_field_id(
                ArrowField::new(
                    "value",
                    type_to_arrow(name, &m.value_type)?,
                    !m.value_required,
                ),
                m.value_id,
            );
            DataType::Map(
                Arc::new(ArrowField::new(
                    "key_value",
                    DataType::Struct(Fields::from(vec![key, value])),
                    false,
                )),
                false,
            )
        }
    })
}
