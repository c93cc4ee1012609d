//! Single typed values: partition tuples, column bounds and filter literals.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::metadata::types::PrimitiveType;

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// A single value of a [`PrimitiveType`].
///
/// Temporal values use the physical representation of the table format:
/// days for dates, microseconds for times and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datum {
    /// Boolean value.
    Boolean(bool),
    /// 32-bit integer.
    Int(i32),
    /// 64-bit integer.
    Long(i64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Decimal as an unscaled integer plus scale.
    Decimal {
        /// Unscaled value.
        #[serde(with = "i128_as_string")]
        unscaled: i128,
        /// Number of fractional digits.
        scale: u32,
    },
    /// Days since 1970-01-01.
    Date(i32),
    /// Microseconds since midnight.
    Time(i64),
    /// Microseconds since the epoch, no zone.
    Timestamp(i64),
    /// Microseconds since the epoch, UTC.
    Timestamptz(i64),
    /// UTF-8 string.
    String(String),
    /// UUID.
    Uuid(Uuid),
    /// Fixed-length bytes.
    Fixed(Vec<u8>),
    /// Variable-length bytes.
    Binary(Vec<u8>),
}

mod i128_as_string {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub(super) fn serialize<S: Serializer>(v: &i128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i128, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(D::Error::custom)
    }
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Calendar date for a day offset from the epoch.
pub(crate) fn days_to_date(days: i32) -> Option<NaiveDate> {
    epoch().checked_add_signed(chrono::Duration::days(i64::from(days)))
}

/// Naive UTC date-time for a microsecond offset from the epoch.
pub(crate) fn micros_to_datetime(micros: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_micros(micros).map(|dt| dt.naive_utc())
}

fn date_to_days(date: NaiveDate) -> Option<i32> {
    i32::try_from(date.signed_duration_since(epoch()).num_days()).ok()
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

fn rescale(unscaled: i128, from: u32, to: u32) -> Option<i128> {
    match from.cmp(&to) {
        Ordering::Equal => Some(unscaled),
        Ordering::Less => unscaled.checked_mul(pow10(to - from)?),
        Ordering::Greater => {
            let factor = pow10(from - to)?;
            (unscaled % factor == 0).then_some(unscaled / factor)
        }
    }
}

fn parse_decimal(s: &str, scale: u32) -> Option<i128> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let frac_trimmed = frac_part.trim_end_matches('0');
    if frac_trimmed.len() > scale as usize {
        return None;
    }
    let mut unscaled: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    unscaled = unscaled.checked_mul(pow10(scale)?)?;
    if !frac_trimmed.is_empty() {
        let frac: i128 = frac_trimmed.parse().ok()?;
        let shift = pow10(scale - frac_trimmed.len() as u32)?;
        unscaled = unscaled.checked_add(frac.checked_mul(shift)?)?;
    }
    Some(if negative { -unscaled } else { unscaled })
}

fn parse_timestamp(s: &str) -> Option<i64> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(ts.and_utc().timestamp_micros());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ts| ts.and_utc().timestamp_micros())
}

fn parse_timestamptz(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.timestamp_micros())
        .ok()
        .or_else(|| parse_timestamp(s))
}

impl Datum {
    /// A string value.
    pub fn string(s: impl Into<String>) -> Self {
        Datum::String(s.into())
    }

    /// A date value from year, month and day.
    pub fn date_from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(date_to_days)
            .map(Datum::Date)
    }

    /// A date value from an ISO `YYYY-MM-DD` string.
    pub fn date_from_str(s: &str) -> Option<Self> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .ok()
            .and_then(date_to_days)
            .map(Datum::Date)
    }

    /// A decimal value parsed from its plain text form at the given scale.
    pub fn decimal_from_str(s: &str, scale: u32) -> Option<Self> {
        parse_decimal(s, scale).map(|unscaled| Datum::Decimal { unscaled, scale })
    }

    /// Whether this value can be stored in a column of type `ty` as is.
    pub fn matches_type(&self, ty: &PrimitiveType) -> bool {
        matches!(
            (self, ty),
            (Datum::Boolean(_), PrimitiveType::Boolean)
                | (Datum::Int(_), PrimitiveType::Int)
                | (Datum::Long(_), PrimitiveType::Long)
                | (Datum::Float(_), PrimitiveType::Float)
                | (Datum::Double(_), PrimitiveType::Double)
                | (Datum::Date(_), PrimitiveType::Date)
                | (Datum::Time(_), PrimitiveType::Time)
                | (Datum::Timestamp(_), PrimitiveType::Timestamp)
                | (Datum::Timestamptz(_), PrimitiveType::Timestamptz)
                | (Datum::String(_), PrimitiveType::String)
                | (Datum::Uuid(_), PrimitiveType::Uuid)
                | (Datum::Fixed(_), PrimitiveType::Fixed(_))
                | (Datum::Binary(_), PrimitiveType::Binary)
        ) || matches!(
            (self, ty),
            (Datum::Decimal { scale, .. }, PrimitiveType::Decimal { scale: s, .. }) if scale == s
        )
    }

    /// Convert this value to the representation of `ty`.
    ///
    /// Returns `None` when the conversion would lose information or the text
    /// cannot be parsed (for example `"2022-13-01"` as a date).
    pub fn to_type(&self, ty: &PrimitiveType) -> Option<Datum> {
        if self.matches_type(ty) {
            return Some(self.clone());
        }
        match (self, ty) {
            (Datum::Int(v), PrimitiveType::Long) => Some(Datum::Long(i64::from(*v))),
            (Datum::Int(v), PrimitiveType::Float) => Some(Datum::Float(*v as f32)),
            (Datum::Int(v), PrimitiveType::Double) => Some(Datum::Double(f64::from(*v))),
            (Datum::Int(v), PrimitiveType::Decimal { scale, .. }) => {
                rescale(i128::from(*v), 0, *scale).map(|unscaled| Datum::Decimal {
                    unscaled,
                    scale: *scale,
                })
            }
            (Datum::Long(v), PrimitiveType::Int) => i32::try_from(*v).ok().map(Datum::Int),
            (Datum::Long(v), PrimitiveType::Double) => Some(Datum::Double(*v as f64)),
            (Datum::Long(v), PrimitiveType::Timestamp) => Some(Datum::Timestamp(*v)),
            (Datum::Long(v), PrimitiveType::Timestamptz) => Some(Datum::Timestamptz(*v)),
            (Datum::Long(v), PrimitiveType::Decimal { scale, .. }) => {
                rescale(i128::from(*v), 0, *scale).map(|unscaled| Datum::Decimal {
                    unscaled,
                    scale: *scale,
                })
            }
            (Datum::Float(v), PrimitiveType::Double) => Some(Datum::Double(f64::from(*v))),
            (Datum::Double(v), PrimitiveType::Float) => {
                let narrowed = *v as f32;
                (f64::from(narrowed) == *v).then_some(Datum::Float(narrowed))
            }
            (Datum::Decimal { unscaled, scale }, PrimitiveType::Decimal { scale: target, .. }) => {
                rescale(*unscaled, *scale, *target).map(|unscaled| Datum::Decimal {
                    unscaled,
                    scale: *target,
                })
            }
            (Datum::Date(d), PrimitiveType::Timestamp) => {
                Some(Datum::Timestamp(i64::from(*d) * MICROS_PER_DAY))
            }
            (Datum::Date(d), PrimitiveType::Timestamptz) => {
                Some(Datum::Timestamptz(i64::from(*d) * MICROS_PER_DAY))
            }
            (Datum::Timestamp(v), PrimitiveType::Timestamptz) => Some(Datum::Timestamptz(*v)),
            (Datum::Timestamptz(v), PrimitiveType::Timestamp) => Some(Datum::Timestamp(*v)),
            (Datum::Fixed(b), PrimitiveType::Binary) => Some(Datum::Binary(b.clone())),
            (Datum::Binary(b), PrimitiveType::Fixed(len)) if b.len() as u64 == *len => {
                Some(Datum::Fixed(b.clone()))
            }
            (Datum::Fixed(b), PrimitiveType::Uuid) | (Datum::Binary(b), PrimitiveType::Uuid) => {
                Uuid::from_slice(b).ok().map(Datum::Uuid)
            }
            (Datum::String(s), ty) => Self::parse_str(s, ty),
            _ => None,
        }
    }

    fn parse_str(s: &str, ty: &PrimitiveType) -> Option<Datum> {
        let t = s.trim();
        match ty {
            PrimitiveType::Boolean => t.parse().ok().map(Datum::Boolean),
            PrimitiveType::Int => t.parse().ok().map(Datum::Int),
            PrimitiveType::Long => t.parse().ok().map(Datum::Long),
            PrimitiveType::Float => t.parse().ok().map(Datum::Float),
            PrimitiveType::Double => t.parse().ok().map(Datum::Double),
            PrimitiveType::Decimal { scale, .. } => Self::decimal_from_str(t, *scale),
            PrimitiveType::Date => Self::date_from_str(t),
            PrimitiveType::Time => NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
                .ok()
                .map(|tm| {
                    Datum::Time(
                        i64::from(tm.num_seconds_from_midnight()) * 1_000_000
                            + i64::from(tm.nanosecond() / 1_000),
                    )
                }),
            PrimitiveType::Timestamp => parse_timestamp(t).map(Datum::Timestamp),
            PrimitiveType::Timestamptz => parse_timestamptz(t).map(Datum::Timestamptz),
            PrimitiveType::String => Some(Datum::String(s.to_string())),
            PrimitiveType::Uuid => Uuid::parse_str(t).ok().map(Datum::Uuid),
            PrimitiveType::Fixed(_) | PrimitiveType::Binary => None,
        }
    }

    /// Order two values.
    ///
    /// Numeric values of compatible widths compare by value (`Int(1)` vs
    /// `Long(2)`), decimals compare after rescaling, strings and bytes compare
    /// lexicographically by byte. Unrelated kinds return `None`.
    pub fn compare(&self, other: &Datum) -> Option<Ordering> {
        use Datum::*;
        match (self, other) {
            (Boolean(a), Boolean(b)) => a.partial_cmp(b),
            (Int(a), Int(b)) => a.partial_cmp(b),
            (Int(a), Long(b)) => i64::from(*a).partial_cmp(b),
            (Long(a), Int(b)) => a.partial_cmp(&i64::from(*b)),
            (Long(a), Long(b)) => a.partial_cmp(b),
            (Float(a), Float(b)) => a.partial_cmp(b),
            (Float(a), Double(b)) => f64::from(*a).partial_cmp(b),
            (Double(a), Float(b)) => a.partial_cmp(&f64::from(*b)),
            (Double(a), Double(b)) => a.partial_cmp(b),
            (
                Decimal {
                    unscaled: a,
                    scale: sa,
                },
                Decimal {
                    unscaled: b,
                    scale: sb,
                },
            ) => {
                let target = (*sa).max(*sb);
                let a = rescale(*a, *sa, target)?;
                let b = rescale(*b, *sb, target)?;
                a.partial_cmp(&b)
            }
            (Date(a), Date(b)) => a.partial_cmp(b),
            (Time(a), Time(b)) => a.partial_cmp(b),
            (Timestamp(a) | Timestamptz(a), Timestamp(b) | Timestamptz(b)) => a.partial_cmp(b),
            (String(a), String(b)) => a.as_bytes().partial_cmp(b.as_bytes()),
            (Uuid(a), Uuid(b)) => a.as_bytes().partial_cmp(b.as_bytes()),
            (Fixed(a) | Binary(a), Fixed(b) | Binary(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    /// Whether two values compare equal under [`Datum::compare`].
    pub fn equivalent(&self, other: &Datum) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Whether the value is a floating point NaN.
    pub fn is_nan(&self) -> bool {
        match self {
            Datum::Float(v) => v.is_nan(),
            Datum::Double(v) => v.is_nan(),
            _ => false,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Boolean(v) => write!(f, "{v}"),
            Datum::Int(v) => write!(f, "{v}"),
            Datum::Long(v) => write!(f, "{v}"),
            Datum::Float(v) => write!(f, "{v}"),
            Datum::Double(v) => write!(f, "{v}"),
            Datum::Decimal { unscaled, scale } => {
                if *scale == 0 {
                    return write!(f, "{unscaled}");
                }
                let sign = if *unscaled < 0 { "-" } else { "" };
                let digits = unscaled.unsigned_abs().to_string();
                let scale = *scale as usize;
                let padded = format!("{digits:0>width$}", width = scale + 1);
                let (int_part, frac_part) = padded.split_at(padded.len() - scale);
                write!(f, "{sign}{int_part}.{frac_part}")
            }
            Datum::Date(d) => match days_to_date(*d) {
                Some(date) => write!(f, "{}", date.format("%Y-%m-%d")),
                None => write!(f, "date({d})"),
            },
            Datum::Time(us) => {
                let secs = us.div_euclid(1_000_000);
                let micros = us.rem_euclid(1_000_000);
                write!(
                    f,
                    "{:02}:{:02}:{:02}.{micros:06}",
                    secs / 3600,
                    (secs / 60) % 60,
                    secs % 60
                )
            }
            Datum::Timestamp(us) => match micros_to_datetime(*us) {
                Some(ts) => write!(f, "{}", ts.format("%Y-%m-%dT%H:%M:%S%.6f")),
                None => write!(f, "timestamp({us})"),
            },
            Datum::Timestamptz(us) => match micros_to_datetime(*us) {
                Some(ts) => write!(f, "{}+00:00", ts.format("%Y-%m-%dT%H:%M:%S%.6f")),
                None => write!(f, "timestamptz({us})"),
            },
            Datum::String(s) => write!(f, "{s}"),
            Datum::Uuid(u) => write!(f, "{u}"),
            Datum::Fixed(b) | Datum::Binary(b) => {
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! datum_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Datum {
                fn from(v: $ty) -> Self {
                    Datum::$variant(v.into())
                }
            }
        )*
    };
}

datum_from! {
    bool => Boolean,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    Uuid => Uuid,
}
