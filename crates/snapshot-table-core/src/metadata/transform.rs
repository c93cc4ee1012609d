//! Partition transforms.
//!
//! A transform maps a source column value to a partition value. Temporal
//! transforms count whole units from the 1970 epoch, `bucket[N]` hashes the
//! canonical byte form with 32-bit Murmur3 (seed 0), and `truncate[W]`
//! floors numbers to a multiple of `W` or keeps a `W`-long prefix.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::prelude::*;

use crate::metadata::partition::{SpecError, TransformFailedSnafu, TransformParseSnafu};
use crate::metadata::types::PrimitiveType;
use crate::metadata::values::{Datum, days_to_date, micros_to_datetime};

const UNIX_EPOCH_YEAR: i32 = 1970;
const MICROS_PER_DAY: i64 = 86_400_000_000;
const MICROS_PER_HOUR: i64 = 3_600_000_000;

/// A partition transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transform {
    /// Source value unchanged.
    Identity,
    /// Murmur3 hash modulo `N`.
    Bucket(u32),
    /// Floor to a multiple of `W`, or a `W`-long prefix.
    Truncate(u32),
    /// Years since 1970.
    Year,
    /// Months since 1970-01.
    Month,
    /// Calendar day.
    Day,
    /// Hours since the epoch.
    Hour,
    /// Always null.
    Void,
}

impl Transform {
    /// Partition value type for a source column type, or `None` when the
    /// transform does not apply to that type.
    pub fn result_type(&self, source: &PrimitiveType) -> Option<PrimitiveType> {
        use PrimitiveType as P;
        match self {
            Transform::Identity | Transform::Void => Some(*source),
            Transform::Bucket(n) if *n > 0 => match source {
                P::Int
                | P::Long
                | P::Decimal { .. }
                | P::Date
                | P::Time
                | P::Timestamp
                | P::Timestamptz
                | P::String
                | P::Uuid
                | P::Fixed(_)
                | P::Binary => Some(P::Int),
                _ => None,
            },
            Transform::Truncate(w) if *w > 0 => match source {
                P::Int | P::Long | P::Decimal { .. } | P::String | P::Binary => Some(*source),
                _ => None,
            },
            Transform::Year | Transform::Month => match source {
                P::Date | P::Timestamp | P::Timestamptz => Some(P::Int),
                _ => None,
            },
            Transform::Day => match source {
                P::Date | P::Timestamp | P::Timestamptz => Some(P::Date),
                _ => None,
            },
            Transform::Hour => match source {
                P::Timestamp | P::Timestamptz => Some(P::Int),
                _ => None,
            },
            Transform::Bucket(_) | Transform::Truncate(_) => None,
        }
    }

    /// Whether `a <= b` implies `transform(a) <= transform(b)`.
    pub fn preserves_order(&self) -> bool {
        !matches!(self, Transform::Bucket(_) | Transform::Void)
    }

    /// Default partition field name for a source column.
    pub fn default_field_name(&self, source: &str) -> String {
        match self {
            Transform::Identity => source.to_string(),
            Transform::Bucket(n) => format!("{source}_bucket_{n}"),
            Transform::Truncate(w) => format!("{source}_trunc_{w}"),
            Transform::Year => format!("{source}_year"),
            Transform::Month => format!("{source}_month"),
            Transform::Day => format!("{source}_day"),
            Transform::Hour => format!("{source}_hour"),
            Transform::Void => format!("{source}_null"),
        }
    }

    /// Apply the transform to a single value. Nulls map to nulls.
    pub fn apply(&self, value: Option<&Datum>) -> Result<Option<Datum>, SpecError> {
        let Some(value) = value else {
            return Ok(None);
        };
        let fail = |reason: &str| {
            TransformFailedSnafu {
                transform: self.to_string(),
                value: value.to_string(),
                reason,
            }
            .fail()
        };

        let out = match (self, value) {
            (Transform::Identity, v) => v.clone(),
            (Transform::Void, _) => return Ok(None),

            (Transform::Year, Datum::Date(d)) => match days_to_date(*d) {
                Some(date) => Datum::Int(date.year() - UNIX_EPOCH_YEAR),
                None => return fail("date out of range"),
            },
            (Transform::Year, Datum::Timestamp(us) | Datum::Timestamptz(us)) => {
                match micros_to_datetime(*us) {
                    Some(ts) => Datum::Int(ts.year() - UNIX_EPOCH_YEAR),
                    None => return fail("timestamp out of range"),
                }
            }
            (Transform::Month, Datum::Date(d)) => match days_to_date(*d) {
                Some(date) => Datum::Int(months_since_epoch(date.year(), date.month0())),
                None => return fail("date out of range"),
            },
            (Transform::Month, Datum::Timestamp(us) | Datum::Timestamptz(us)) => {
                match micros_to_datetime(*us) {
                    Some(ts) => Datum::Int(months_since_epoch(ts.year(), ts.month0())),
                    None => return fail("timestamp out of range"),
                }
            }
            (Transform::Day, Datum::Date(d)) => Datum::Date(*d),
            (Transform::Day, Datum::Timestamp(us) | Datum::Timestamptz(us)) => {
                match i32::try_from(us.div_euclid(MICROS_PER_DAY)) {
                    Ok(days) => Datum::Date(days),
                    Err(_) => return fail("timestamp out of range"),
                }
            }
            (Transform::Hour, Datum::Timestamp(us) | Datum::Timestamptz(us)) => {
                match i32::try_from(us.div_euclid(MICROS_PER_HOUR)) {
                    Ok(hours) => Datum::Int(hours),
                    Err(_) => return fail("timestamp out of range"),
                }
            }

            (Transform::Bucket(n), v) if *n > 0 => {
                let hash = match v {
                    Datum::Int(x) | Datum::Date(x) => hash_long(i64::from(*x)),
                    Datum::Long(x)
                    | Datum::Time(x)
                    | Datum::Timestamp(x)
                    | Datum::Timestamptz(x) => hash_long(*x),
                    Datum::Decimal { unscaled, .. } => hash_decimal(*unscaled),
                    Datum::String(s) => hash_bytes(s.as_bytes()),
                    Datum::Uuid(u) => hash_bytes(u.as_bytes()),
                    Datum::Fixed(b) | Datum::Binary(b) => hash_bytes(b),
                    _ => return fail("type cannot be bucketed"),
                };
                match hash {
                    Ok(h) => Datum::Int(bucket_n(h, *n)),
                    Err(e) => return fail(&e.to_string()),
                }
            }

            (Transform::Truncate(w), v) if *w > 0 => match v {
                Datum::Int(x) => {
                    let w = i32::try_from(*w).unwrap_or(i32::MAX);
                    Datum::Int(x - x.rem_euclid(w))
                }
                Datum::Long(x) => Datum::Long(x - x.rem_euclid(i64::from(*w))),
                Datum::Decimal { unscaled, scale } => Datum::Decimal {
                    unscaled: unscaled - unscaled.rem_euclid(i128::from(*w)),
                    scale: *scale,
                },
                Datum::String(s) => Datum::String(s.chars().take(*w as usize).collect()),
                Datum::Binary(b) => Datum::Binary(b.iter().take(*w as usize).copied().collect()),
                _ => return fail("type cannot be truncated"),
            },

            _ => return fail("transform does not apply to this value"),
        };
        Ok(Some(out))
    }

    /// Render a partition value the way it appears in data file paths.
    pub fn to_human_string(&self, value: Option<&Datum>) -> String {
        let Some(value) = value else {
            return "null".to_string();
        };
        match (self, value) {
            (Transform::Year, Datum::Int(y)) => format!("{}", UNIX_EPOCH_YEAR + y),
            (Transform::Month, Datum::Int(m)) => {
                let year = UNIX_EPOCH_YEAR + m.div_euclid(12);
                let month = m.rem_euclid(12) + 1;
                format!("{year:04}-{month:02}")
            }
            (Transform::Hour, Datum::Int(h)) => {
                match micros_to_datetime(i64::from(*h) * MICROS_PER_HOUR) {
                    Some(ts) => format!("{}-{:02}", ts.format("%Y-%m-%d"), ts.hour()),
                    None => h.to_string(),
                }
            }
            _ => value.to_string(),
        }
    }
}

fn months_since_epoch(year: i32, month0: u32) -> i32 {
    (year - UNIX_EPOCH_YEAR) * 12 + month0 as i32
}

fn hash_bytes(v: &[u8]) -> std::io::Result<i32> {
    let mut rdr = v;
    murmur3::murmur3_32(&mut rdr, 0).map(|h| h as i32)
}

fn hash_long(v: i64) -> std::io::Result<i32> {
    hash_bytes(&v.to_le_bytes())
}

/// Hash of the minimal big-endian two's-complement representation.
fn hash_decimal(v: i128) -> std::io::Result<i32> {
    let bytes = v.to_be_bytes();
    let filler = if v < 0 { 0xff } else { 0x00 };
    let mut start = 0;
    while start < bytes.len() - 1
        && bytes[start] == filler
        && (bytes[start + 1] & 0x80 == filler & 0x80)
    {
        start += 1;
    }
    hash_bytes(&bytes[start..])
}

fn bucket_n(hash: i32, n: u32) -> i32 {
    (hash & i32::MAX) % i32::try_from(n).unwrap_or(i32::MAX)
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Identity => write!(f, "identity"),
            Transform::Bucket(n) => write!(f, "bucket[{n}]"),
            Transform::Truncate(w) => write!(f, "truncate[{w}]"),
            Transform::Year => write!(f, "year"),
            Transform::Month => write!(f, "month"),
            Transform::Day => write!(f, "day"),
            Transform::Hour => write!(f, "hour"),
            Transform::Void => write!(f, "void"),
        }
    }
}

impl FromStr for Transform {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let param = |prefix: &str| -> Option<Result<u32, SpecError>> {
            let inner = s.strip_prefix(prefix)?.strip_suffix(']')?;
            Some(
                inner
                    .parse::<u32>()
                    .ok()
                    .filter(|n| *n > 0)
                    .context(TransformParseSnafu { transform: s }),
            )
        };
        match s {
            "identity" => Ok(Transform::Identity),
            "year" => Ok(Transform::Year),
            "month" => Ok(Transform::Month),
            "day" => Ok(Transform::Day),
            "hour" => Ok(Transform::Hour),
            "void" => Ok(Transform::Void),
            _ => {
                if let Some(n) = param("bucket[") {
                    n.map(Transform::Bucket)
                } else if let Some(w) = param("truncate[") {
                    w.map(Transform::Truncate)
                } else {
                    TransformParseSnafu { transform: s }.fail()
                }
            }
        }
    }
}

impl Serialize for Transform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Transform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Transform::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(t: Transform, v: Datum) -> Datum {
        t.apply(Some(&v)).unwrap().unwrap()
    }

    #[test]
    fn temporal_transforms_count_from_epoch() {
        let d = Datum::date_from_str("2022-07-01").unwrap();
        assert_eq!(apply(Transform::Year, d.clone()), Datum::Int(52));
        assert_eq!(apply(Transform::Month, d.clone()), Datum::Int(52 * 12 + 6));
        assert_eq!(apply(Transform::Day, d.clone()), d);

        let before = Datum::date_from_str("1969-12-31").unwrap();
        assert_eq!(apply(Transform::Year, before.clone()), Datum::Int(-1));
        assert_eq!(apply(Transform::Month, before), Datum::Int(-1));

        let ts = Datum::Timestamp(MICROS_PER_HOUR * 25 + 1);
        assert_eq!(apply(Transform::Hour, ts.clone()), Datum::Int(25));
        assert_eq!(apply(Transform::Day, ts), Datum::Date(1));
        assert_eq!(apply(Transform::Hour, Datum::Timestamp(-1)), Datum::Int(-1));
    }

    #[test]
    fn bucket_matches_reference_hashes() {
        assert_eq!(hash_long(34).unwrap(), 2017239379);
        assert_eq!(hash_bytes("iceberg".as_bytes()).unwrap(), 1210000089);
        // int and long hash identically
        assert_eq!(
            apply(Transform::Bucket(16), Datum::Int(34)),
            apply(Transform::Bucket(16), Datum::Long(34))
        );
        assert_eq!(
            apply(Transform::Bucket(16), Datum::Int(34)),
            Datum::Int(2017239379 % 16)
        );
    }

    #[test]
    fn decimal_hash_uses_minimal_bytes() {
        // 14.20 -> unscaled 1420 -> 0x058c
        assert_eq!(
            hash_decimal(1420).unwrap(),
            hash_bytes(&[0x05, 0x8c]).unwrap()
        );
        assert_eq!(hash_decimal(-1).unwrap(), hash_bytes(&[0xff]).unwrap());
        assert_eq!(hash_decimal(128).unwrap(), hash_bytes(&[0x00, 0x80]).unwrap());
    }

    #[test]
    fn truncate_floors_and_prefixes() {
        assert_eq!(apply(Transform::Truncate(10), Datum::Int(-1)), Datum::Int(-10));
        assert_eq!(apply(Transform::Truncate(10), Datum::Long(19)), Datum::Long(10));
        assert_eq!(
            apply(Transform::Truncate(3), Datum::string("iceberg")),
            Datum::string("ice")
        );
    }

    #[test]
    fn result_types_gate_applicability() {
        assert_eq!(
            Transform::Year.result_type(&PrimitiveType::Date),
            Some(PrimitiveType::Int)
        );
        assert_eq!(Transform::Hour.result_type(&PrimitiveType::Date), None);
        assert_eq!(Transform::Bucket(4).result_type(&PrimitiveType::Double), None);
        assert_eq!(
            Transform::Truncate(4).result_type(&PrimitiveType::Date),
            None
        );
    }

    #[test]
    fn parse_and_display_round_trip() {
        for t in [
            Transform::Identity,
            Transform::Bucket(16),
            Transform::Truncate(4),
            Transform::Year,
            Transform::Month,
            Transform::Day,
            Transform::Hour,
            Transform::Void,
        ] {
            assert_eq!(t.to_string().parse::<Transform>().unwrap(), t);
        }
        assert!("bucket[0]".parse::<Transform>().is_err());
        assert!("weekly".parse::<Transform>().is_err());
    }

    #[test]
    fn human_strings_for_paths() {
        assert_eq!(Transform::Year.to_human_string(Some(&Datum::Int(52))), "2022");
        assert_eq!(
            Transform::Month.to_human_string(Some(&Datum::Int(52 * 12 + 6))),
            "2022-07"
        );
        assert_eq!(Transform::Identity.to_human_string(None), "null");
    }
}
