//! Row munging: converting generic values into the shape a destination
//! column expects before they are bound or bulk-loaded

use std::sync::Arc;

use chrono::NaiveTime;

use crate::detector::datetime_from_str;
use crate::{
    Kind, PolysqlError, RecordMeta, Result, Value, parse_bool, parse_date, parse_time,
    plain_decimal,
};

/// Converts a positional row in place.
pub type RowMungeFn = Arc<dyn Fn(&mut [Value]) -> Result<()> + Send + Sync>;

/// Builds a munge fn for destination columns of the given kinds.
///
/// `int_bool` engines receive booleans as `Int64(0|1)`.
pub fn munge_for_kinds(kinds: Vec<Kind>, int_bool: bool) -> RowMungeFn {
    Arc::new(move |row: &mut [Value]| {
        if row.len() != kinds.len() {
            return Err(PolysqlError::generic(format!(
                "row has {} values but destination has {} columns",
                row.len(),
                kinds.len()
            )));
        }
        for (idx, (value, kind)) in row.iter_mut().zip(&kinds).enumerate() {
            let taken = std::mem::replace(value, Value::Null);
            *value = munge_value(taken, *kind, int_bool)
                .map_err(|e| PolysqlError::generic_with(format!("column {}: {}", idx, e), e))?;
        }
        Ok(())
    })
}

pub fn munge_for_meta(meta: &RecordMeta, int_bool: bool) -> RowMungeFn {
    munge_for_kinds(meta.kinds(), int_bool)
}

/// Munges statement arguments laid out as `num_rows` rows of `width` values.
/// Values past the last row, such as WHERE parameters, are left as is.
pub fn munge_rows(
    munge: &RowMungeFn,
    width: usize,
    num_rows: usize,
    args: &mut [Value],
) -> Result<()> {
    let needed = width * num_rows;
    if args.len() < needed {
        return Err(PolysqlError::generic(format!(
            "expected at least {} arguments for {} rows of {} columns, got {}",
            needed,
            num_rows,
            width,
            args.len()
        )));
    }
    if width == 0 {
        return Ok(());
    }
    for row in args[..needed].chunks_mut(width) {
        munge(row)?;
    }
    Ok(())
}

/// Converts a single value into the shape of `kind`.
pub fn munge_value(value: Value, kind: Kind, int_bool: bool) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let converted = match (kind, value) {
        (Kind::Unknown | Kind::Null, v) => v,

        (Kind::Text, Value::String(s)) => Value::String(s),
        (Kind::Text, Value::Bytes(b)) => Value::String(
            String::from_utf8(b).map_err(|e| PolysqlError::generic_with("bytes are not UTF-8", e))?,
        ),
        (Kind::Text, v) => Value::String(v.to_string()),

        (Kind::Int, Value::Int64(i)) => Value::Int64(i),
        (Kind::Int, Value::Bool(b)) => Value::Int64(i64::from(b)),
        (Kind::Int, Value::Float64(f)) if f.fract() == 0.0 && f.is_finite() => {
            Value::Int64(int_from_float(f)?)
        }
        (Kind::Int, Value::String(s) | Value::Decimal(s)) => match s.trim() {
            "" => Value::Null,
            trimmed => Value::Int64(trimmed.parse().map_err(|e| {
                PolysqlError::generic_with(format!("cannot parse {:?} as int", s), e)
            })?),
        },

        (Kind::Float, Value::Float64(f)) => Value::Float64(f),
        (Kind::Float, Value::Int64(i)) => Value::Float64(i as f64),
        (Kind::Float, Value::String(s) | Value::Decimal(s)) => match s.trim() {
            "" => Value::Null,
            trimmed => Value::Float64(trimmed.parse().map_err(|e| {
                PolysqlError::generic_with(format!("cannot parse {:?} as float", s), e)
            })?),
        },

        (Kind::Decimal, Value::Int64(i)) => Value::Decimal(i.to_string()),
        (Kind::Decimal, Value::Float64(f)) if f.is_finite() => Value::Decimal(f.to_string()),
        (Kind::Decimal, Value::String(s) | Value::Decimal(s)) => match s.trim() {
            "" => Value::Null,
            trimmed => match plain_decimal(trimmed) {
                Some(plain) => Value::Decimal(plain),
                None => {
                    return Err(PolysqlError::generic(format!(
                        "cannot parse {:?} as decimal",
                        s
                    )));
                }
            },
        },

        (Kind::Bool, Value::Bool(b)) => bool_value(b, int_bool),
        (Kind::Bool, Value::Int64(i)) => bool_value(i != 0, int_bool),
        (Kind::Bool, Value::String(s)) if s.is_empty() => Value::Null,
        (Kind::Bool, Value::String(s)) => match parse_bool(&s) {
            Some(b) => bool_value(b, int_bool),
            None => {
                return Err(PolysqlError::generic(format!("cannot parse {:?} as bool", s)));
            }
        },

        (Kind::Bytes, Value::Bytes(b)) => Value::Bytes(b),
        (Kind::Bytes, Value::String(s)) => Value::Bytes(s.into_bytes()),

        (Kind::Datetime, Value::DateTime(dt)) => Value::DateTime(dt),
        (Kind::Datetime, Value::Date(d)) => Value::DateTime(d.and_time(NaiveTime::MIN).and_utc()),
        (Kind::Datetime, Value::String(s)) if s.is_empty() => Value::Null,
        (Kind::Datetime, Value::String(s)) => match datetime_from_str(&s, None) {
            Some(dt) => Value::DateTime(dt),
            None => {
                return Err(PolysqlError::generic(format!(
                    "cannot parse {:?} as datetime",
                    s
                )));
            }
        },

        (Kind::Date, Value::Date(d)) => Value::Date(d),
        (Kind::Date, Value::DateTime(dt)) => Value::Date(dt.date_naive()),
        (Kind::Date, Value::String(s)) if s.is_empty() => Value::Null,
        (Kind::Date, Value::String(s)) => match parse_date(&s) {
            Some((d, _)) => Value::Date(d),
            None => {
                return Err(PolysqlError::generic(format!("cannot parse {:?} as date", s)));
            }
        },

        (Kind::Time, Value::Time(t)) => Value::Time(t),
        (Kind::Time, Value::DateTime(dt)) => Value::Time(dt.time()),
        (Kind::Time, Value::String(s)) if s.is_empty() => Value::Null,
        (Kind::Time, Value::String(s)) => match parse_time(&s) {
            Some((t, _)) => Value::Time(t),
            None => {
                return Err(PolysqlError::generic(format!("cannot parse {:?} as time", s)));
            }
        },

        (kind, other) => {
            return Err(PolysqlError::generic(format!(
                "cannot convert {} value into {}",
                other.kind(),
                kind
            )));
        }
    };
    Ok(converted)
}

/// Converts an integral float, rejecting values outside the `i64` range.
pub fn int_from_float(f: f64) -> Result<i64> {
    // 2^63 is exact in f64; anything at or past it would saturate.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if (-LIMIT..LIMIT).contains(&f) {
        Ok(f as i64)
    } else {
        Err(PolysqlError::generic(format!("float {} out of range for int", f)))
    }
}

fn bool_value(b: bool, int_bool: bool) -> Value {
    if int_bool {
        Value::Int64(i64::from(b))
    } else {
        Value::Bool(b)
    }
}
