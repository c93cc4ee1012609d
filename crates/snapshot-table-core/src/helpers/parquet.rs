//! Helpers for describing Parquet files from their footers.
//!
//! [`data_file_from_parquet_bytes`] reads only the footer of a Parquet
//! payload and builds a [`DataFile`] with:
//! - the row count and byte size,
//! - per-column value counts, null counts and bounds, keyed by field id,
//! - the partition tuple under a given spec.
//!
//! Columns are matched to table fields by the Parquet field id when the
//! writer recorded one, otherwise by top-level name. Row-group statistics are
//! merged; a bound is only reported when every row group that holds values
//! reports an exact one.

use bytes::Bytes;
use parquet::basic::{LogicalType, TimeUnit};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::statistics::Statistics;
use parquet::schema::types::ColumnDescriptor;
use snafu::prelude::*;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::manifest::data_file::{DataFile, DataFileFormat};
use crate::manifest::{
    DataFileError, MissingPartitionStatsSnafu, MixedPartitionSnafu, ParquetSnafu,
    PartitionSnafu,
};
use crate::metadata::partition::PartitionSpec;
use crate::metadata::schema::Schema;
use crate::metadata::transform::Transform;
use crate::metadata::types::PrimitiveType;
use crate::metadata::values::Datum;

/// Merged statistics of one column across row groups.
#[derive(Debug, Default)]
struct ColumnAcc {
    values: u64,
    nulls: Option<u64>,
    lower: Option<Datum>,
    upper: Option<Datum>,
    bounds_known: bool,
}

impl ColumnAcc {
    fn new() -> Self {
        Self {
            nulls: Some(0),
            bounds_known: true,
            ..Default::default()
        }
    }

    fn merge_lower(&mut self, candidate: Datum) {
        let replace = self
            .lower
            .as_ref()
            .is_none_or(|cur| candidate.compare(cur).is_some_and(|o| o.is_lt()));
        if replace {
            self.lower = Some(candidate);
        }
    }

    fn merge_upper(&mut self, candidate: Datum) {
        let replace = self
            .upper
            .as_ref()
            .is_none_or(|cur| candidate.compare(cur).is_some_and(|o| o.is_gt()));
        if replace {
            self.upper = Some(candidate);
        }
    }

    fn bounds(&self) -> (Option<&Datum>, Option<&Datum>) {
        if self.bounds_known {
            (self.lower.as_ref(), self.upper.as_ref())
        } else {
            (None, None)
        }
    }

    fn all_null(&self) -> bool {
        self.nulls == Some(self.values)
    }
}

/// Multiplier from a Parquet time unit to microseconds, as (mul, div).
fn micros_scale(logical: Option<&LogicalType>) -> (i64, i64) {
    let unit = match logical {
        Some(LogicalType::Timestamp { unit, .. }) | Some(LogicalType::Time { unit, .. }) => unit,
        _ => return (1, 1),
    };
    match unit {
        TimeUnit::MILLIS => (1000, 1),
        TimeUnit::MICROS => (1, 1),
        TimeUnit::NANOS => (1, 1000),
    }
}

fn scale_micros(v: i64, (mul, div): (i64, i64), round_up: bool) -> Option<i64> {
    let scaled = v.checked_mul(mul)?;
    if div == 1 {
        return Some(scaled);
    }
    let floor = scaled.div_euclid(div);
    if round_up && scaled.rem_euclid(div) != 0 {
        floor.checked_add(1)
    } else {
        Some(floor)
    }
}

/// Big-endian two's complement bytes to an integer.
fn be_bytes_to_i128(bytes: &[u8]) -> Option<i128> {
    if bytes.is_empty() || bytes.len() > 16 {
        return None;
    }
    let fill = if bytes[0] & 0x80 != 0 { 0xff } else { 0x00 };
    let mut buf = [fill; 16];
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Some(i128::from_be_bytes(buf))
}

/// Convert one raw statistics value to a datum of the table column type.
/// `upper` selects rounding for lossy unit conversions.
fn to_datum(raw: RawValue<'_>, ty: &PrimitiveType, scale: (i64, i64), upper: bool) -> Option<Datum> {
    use PrimitiveType as P;
    Some(match (ty, raw) {
        (P::Boolean, RawValue::Bool(b)) => Datum::Boolean(b),
        (P::Int, RawValue::I32(v)) => Datum::Int(v),
        (P::Long, RawValue::I64(v)) => Datum::Long(v),
        (P::Long, RawValue::I32(v)) => Datum::Long(i64::from(v)),
        (P::Float, RawValue::F32(v)) if !v.is_nan() => Datum::Float(v),
        (P::Double, RawValue::F64(v)) if !v.is_nan() => Datum::Double(v),
        (P::Date, RawValue::I32(v)) => Datum::Date(v),
        (P::Time, RawValue::I64(v)) => Datum::Time(scale_micros(v, scale, upper)?),
        (P::Time, RawValue::I32(v)) => Datum::Time(scale_micros(i64::from(v), scale, upper)?),
        (P::Timestamp, RawValue::I64(v)) => Datum::Timestamp(scale_micros(v, scale, upper)?),
        (P::Timestamptz, RawValue::I64(v)) => Datum::Timestamptz(scale_micros(v, scale, upper)?),
        (P::String, RawValue::Bytes(b)) => Datum::String(std::str::from_utf8(b).ok()?.to_string()),
        (P::Binary, RawValue::Bytes(b)) => Datum::Binary(b.to_vec()),
        (P::Fixed(_), RawValue::Bytes(b)) => Datum::Fixed(b.to_vec()),
        (P::Uuid, RawValue::Bytes(b)) => Datum::Uuid(Uuid::from_slice(b).ok()?),
        (P::Decimal { scale: s, .. }, RawValue::I32(v)) => Datum::Decimal {
            unscaled: i128::from(v),
            scale: *s,
        },
        (P::Decimal { scale: s, .. }, RawValue::I64(v)) => Datum::Decimal {
            unscaled: i128::from(v),
            scale: *s,
        },
        (P::Decimal { scale: s, .. }, RawValue::Bytes(b)) => Datum::Decimal {
            unscaled: be_bytes_to_i128(b)?,
            scale: *s,
        },
        _ => return None,
    })
}

#[derive(Clone, Copy)]
enum RawValue<'a> {
    Bool(bool),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Bytes(&'a [u8]),
}

/// Exact (min, max) of a row group's statistics, as raw values.
fn raw_bounds(stats: &Statistics) -> (Option<RawValue<'_>>, Option<RawValue<'_>>) {
    macro_rules! exact {
        ($s:expr, $v:ident => $wrap:expr) => {{
            let min = $s.min_opt().filter(|_| $s.min_is_exact()).map(|$v| $wrap);
            let max = $s.max_opt().filter(|_| $s.max_is_exact()).map(|$v| $wrap);
            (min, max)
        }};
    }
    match stats {
        Statistics::Boolean(s) => exact!(s, v => RawValue::Bool(*v)),
        Statistics::Int32(s) => exact!(s, v => RawValue::I32(*v)),
        Statistics::Int64(s) => exact!(s, v => RawValue::I64(*v)),
        Statistics::Float(s) => exact!(s, v => RawValue::F32(*v)),
        Statistics::Double(s) => exact!(s, v => RawValue::F64(*v)),
        Statistics::ByteArray(s) => exact!(s, v => RawValue::Bytes(v.data())),
        Statistics::FixedLenByteArray(s) => exact!(s, v => RawValue::Bytes(v.data())),
        Statistics::Int96(_) => (None, None),
    }
}

/// Table field id for a top-level Parquet column, if it maps to one.
fn field_id_for(descr: &ColumnDescriptor, schema: &Schema) -> Option<(i32, PrimitiveType)> {
    if descr.path().parts().len() != 1 {
        return None;
    }
    let info = descr.self_type().get_basic_info();
    let field = if info.has_id() {
        schema.field_by_id(info.id())
    } else {
        schema.field_by_name(descr.name())
    }?;
    let ty = field.field_type.as_primitive()?;
    Some((field.id, *ty))
}

/// Describe a Parquet payload destined for `path` as a [`DataFile`] of a
/// table with `schema`, partitioned by `spec`.
///
/// Every row must fall into the same partition.
pub fn data_file_from_parquet_bytes(
    path: &str,
    payload: Bytes,
    schema: &Schema,
    spec: &PartitionSpec,
) -> Result<DataFile, DataFileError> {
    let file_size = payload.len() as u64;
    let reader = SerializedFileReader::new(payload).context(ParquetSnafu { path })?;
    let meta = reader.metadata();
    let record_count = u64::try_from(meta.file_metadata().num_rows()).unwrap_or(0);
    let schema_descr = meta.file_metadata().schema_descr();

    let mut columns: BTreeMap<i32, ColumnAcc> = BTreeMap::new();
    for (idx, descr) in schema_descr.columns().iter().enumerate() {
        let Some((field_id, ty)) = field_id_for(descr, schema) else {
            continue;
        };
        let scale = micros_scale(descr.logical_type_ref());
        let mut acc = ColumnAcc::new();
        for rg in meta.row_groups() {
            let chunk = rg.column(idx);
            let values = u64::try_from(chunk.num_values()).unwrap_or(0);
            acc.values += values;
            let Some(stats) = chunk.statistics() else {
                acc.nulls = None;
                acc.bounds_known = false;
                continue;
            };
            let group_nulls = stats.null_count_opt();
            acc.nulls = acc.nulls.zip(group_nulls).map(|(a, b)| a + b);
            if group_nulls == Some(values) {
                continue;
            }
            let (min, max) = raw_bounds(stats);
            let lower = min.and_then(|v| to_datum(v, &ty, scale, false));
            let upper = max.and_then(|v| to_datum(v, &ty, scale, true));
            match (lower, upper) {
                (Some(lower), Some(upper)) => {
                    acc.merge_lower(lower);
                    acc.merge_upper(upper);
                }
                _ => acc.bounds_known = false,
            }
        }
        columns.insert(field_id, acc);
    }

    let mut partition = Vec::with_capacity(spec.fields().len());
    for field in spec.fields() {
        if field.transform == Transform::Void || record_count == 0 {
            partition.push(None);
            continue;
        }
        let column_name = || {
            schema
                .field_path(field.source_id)
                .unwrap_or_else(|| field.source_id.to_string())
        };
        let acc = columns
            .get(&field.source_id)
            .context(MissingPartitionStatsSnafu {
                path,
                column: column_name(),
            })?;
        if acc.all_null() {
            partition.push(None);
            continue;
        }
        ensure!(
            acc.nulls.is_some(),
            MissingPartitionStatsSnafu {
                path,
                column: column_name(),
            }
        );
        ensure!(
            acc.nulls == Some(0),
            MixedPartitionSnafu {
                path,
                field: field.name.clone(),
            }
        );
        let (Some(lower), Some(upper)) = acc.bounds() else {
            return MissingPartitionStatsSnafu {
                path,
                column: column_name(),
            }
            .fail();
        };
        // bucket is not order preserving, so equal buckets of the bounds say nothing
        if matches!(field.transform, Transform::Bucket(_)) {
            ensure!(
                lower.equivalent(upper),
                MixedPartitionSnafu {
                    path,
                    field: field.name.clone(),
                }
            );
        }
        let low = field
            .transform
            .apply(Some(lower))
            .context(PartitionSnafu { path })?;
        let high = field
            .transform
            .apply(Some(upper))
            .context(PartitionSnafu { path })?;
        ensure!(
            low == high,
            MixedPartitionSnafu {
                path,
                field: field.name.clone(),
            }
        );
        partition.push(low);
    }

    let mut builder = DataFile::builder(path, spec.spec_id())
        .file_format(DataFileFormat::Parquet)
        .partition(partition)
        .record_count(record_count)
        .file_size_in_bytes(file_size);
    let mut unknown_nulls = Vec::new();
    for (field_id, acc) in &columns {
        let (lower, upper) = acc.bounds();
        match acc.nulls {
            Some(nulls) => {
                builder =
                    builder.column_stats(*field_id, acc.values, nulls, lower.cloned(), upper.cloned());
            }
            None => {
                unknown_nulls.push((*field_id, acc.values));
                if let (Some(lower), Some(upper)) = (lower, upper) {
                    builder = builder.bounds(*field_id, lower.clone(), upper.clone());
                }
            }
        }
    }
    let mut file = builder.build()?;
    file.value_counts.extend(unknown_nulls);
    Ok(file)
}
