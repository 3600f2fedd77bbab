//! Mapping between PostgreSQL types, kinds and values

use bytes::BytesMut;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use polysql_core::{
    DATE_LAYOUT, Kind, PolysqlError, Result, TIME_LAYOUT, Value, int_from_float, parse_bool,
    parse_date, parse_datetime, parse_time,
};
use postgres_types::{FromSql, IsNull, ToSql, Type, WrongType, to_sql_checked};
use tokio_postgres::Row;

use crate::numeric::{decode_numeric, encode_numeric};

type BoxError = Box<dyn std::error::Error + Sync + Send>;

/// Maps a type name to a kind. Accepts both internal names (`int8`,
/// `timestamptz`) and the SQL names reported by `information_schema`
/// (`bigint`, `timestamp with time zone`).
pub fn kind_from_pg_type(type_name: &str) -> Kind {
    let lower = type_name.trim().to_ascii_lowercase();
    if lower.starts_with('_') || lower.ends_with("[]") || lower == "array" {
        return Kind::Text;
    }
    let base = lower
        .split_once('(')
        .map_or(lower.as_str(), |(base, rest)| {
            // `timestamp(3) with time zone` keeps its suffix
            if rest.contains("with time zone") {
                "timestamp with time zone"
            } else {
                base
            }
        })
        .trim();

    match base {
        "" => Kind::Unknown,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "int" | "bigint" | "smallserial"
        | "serial" | "bigserial" | "serial2" | "serial4" | "serial8" | "oid" => Kind::Int,
        "float4" | "float8" | "real" | "double precision" | "float" => Kind::Float,
        "numeric" | "decimal" | "money" => Kind::Decimal,
        "bool" | "boolean" => Kind::Bool,
        "bytea" => Kind::Bytes,
        "timestamp" | "timestamptz" | "timestamp without time zone"
        | "timestamp with time zone" => Kind::Datetime,
        "date" => Kind::Date,
        "time" | "timetz" | "time without time zone" | "time with time zone" => Kind::Time,
        _ => Kind::Text,
    }
}

/// DDL type used for a column of `kind`.
pub fn db_type_for_kind(kind: Kind) -> &'static str {
    match kind {
        Kind::Text | Kind::Unknown | Kind::Null => "TEXT",
        Kind::Int => "BIGINT",
        Kind::Float => "DOUBLE PRECISION",
        Kind::Decimal => "NUMERIC",
        Kind::Bool => "BOOLEAN",
        Kind::Bytes => "BYTEA",
        Kind::Datetime => "TIMESTAMPTZ",
        Kind::Date => "DATE",
        Kind::Time => "TIME",
    }
}

fn is_text_type(ty: &Type) -> bool {
    matches!(*ty, Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN)
}

/// Types whose binary input is plain UTF-8: the text family, extension
/// text types such as `citext`, and enums.
fn accepts_text(ty: &Type) -> bool {
    <String as ToSql>::accepts(ty) || matches!(ty.kind(), postgres_types::Kind::Enum(_))
}

fn is_integer_type(ty: &Type) -> bool {
    matches!(*ty, Type::INT2 | Type::INT4 | Type::INT8)
}

/// An owned parameter shaped for a specific target type, so the binary
/// width always matches what the server expects (INT4 gets 4 bytes).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(String),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(chrono::DateTime<Utc>),
}

impl PgValue {
    /// Converts `value` for a parameter or COPY column of type `ty`.
    /// Values with no faithful representation in `ty` are rejected.
    pub(crate) fn for_type(value: &Value, ty: &Type) -> Result<Self> {
        let mismatch =
            || PolysqlError::generic(format!("cannot convert {} value to {}", value.kind(), ty));
        let converted = match value {
            Value::Null => PgValue::Null,
            Value::Bool(b) => match *ty {
                Type::BOOL => PgValue::Bool(*b),
                _ if is_integer_type(ty) => Self::coerce_int(i64::from(*b), ty)?,
                _ if accepts_text(ty) => PgValue::Text(b.to_string()),
                _ => return Err(mismatch()),
            },
            Value::Int64(i) => Self::coerce_int(*i, ty)?,
            Value::Float64(f) => match *ty {
                Type::FLOAT8 => PgValue::Float64(*f),
                Type::FLOAT4 => PgValue::Float32(*f as f32),
                Type::NUMERIC => PgValue::Numeric(f.to_string()),
                _ if is_integer_type(ty) => {
                    if f.fract() != 0.0 {
                        return Err(PolysqlError::generic(format!(
                            "float {} is not an integer, cannot store in {}",
                            f, ty
                        )));
                    }
                    Self::coerce_int(int_from_float(*f)?, ty)?
                }
                _ if accepts_text(ty) => PgValue::Text(f.to_string()),
                _ => return Err(mismatch()),
            },
            Value::Decimal(s) | Value::String(s) => Self::coerce_string(s, ty)?,
            Value::Bytes(b) => match *ty {
                Type::BYTEA => PgValue::Bytes(b.clone()),
                _ if accepts_text(ty) => PgValue::Text(String::from_utf8_lossy(b).into_owned()),
                _ => return Err(mismatch()),
            },
            Value::Date(d) => match *ty {
                Type::DATE => PgValue::Date(*d),
                Type::TIMESTAMP => PgValue::Timestamp(d.and_time(NaiveTime::MIN)),
                Type::TIMESTAMPTZ => PgValue::TimestampTz(d.and_time(NaiveTime::MIN).and_utc()),
                _ if accepts_text(ty) => PgValue::Text(d.format(DATE_LAYOUT).to_string()),
                _ => return Err(mismatch()),
            },
            Value::Time(t) => match *ty {
                Type::TIME => PgValue::Time(*t),
                _ if accepts_text(ty) => PgValue::Text(t.format(TIME_LAYOUT).to_string()),
                _ => return Err(mismatch()),
            },
            Value::DateTime(dt) => match *ty {
                Type::TIMESTAMPTZ => PgValue::TimestampTz(*dt),
                Type::TIMESTAMP => PgValue::Timestamp(dt.naive_utc()),
                Type::DATE => PgValue::Date(dt.date_naive()),
                Type::TIME => PgValue::Time(dt.time()),
                _ if accepts_text(ty) => {
                    PgValue::Text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
                }
                _ => return Err(mismatch()),
            },
        };
        Ok(converted)
    }

    /// Picks the integer width of the target column.
    fn coerce_int(value: i64, ty: &Type) -> Result<Self> {
        let out_of_range =
            |_| PolysqlError::generic(format!("integer {} out of range for {}", value, ty));
        Ok(match *ty {
            Type::INT2 => PgValue::Int16(i16::try_from(value).map_err(out_of_range)?),
            Type::INT4 => PgValue::Int32(i32::try_from(value).map_err(out_of_range)?),
            Type::INT8 => PgValue::Int64(value),
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::FLOAT8 => PgValue::Float64(value as f64),
            Type::NUMERIC => PgValue::Numeric(value.to_string()),
            Type::BOOL => PgValue::Bool(value != 0),
            _ if accepts_text(ty) => PgValue::Text(value.to_string()),
            _ => {
                return Err(PolysqlError::generic(format!(
                    "cannot convert integer {} to {}",
                    value, ty
                )));
            }
        })
    }

    /// Parses text into the target type. Enums and other text-like types
    /// receive the text as is.
    fn coerce_string(s: &str, ty: &Type) -> Result<Self> {
        let invalid = || PolysqlError::generic(format!("cannot convert {:?} to {}", s, ty));
        let trimmed = s.trim();

        Ok(match *ty {
            Type::INT2 | Type::INT4 | Type::INT8 => {
                let parsed: i64 = trimmed.parse().map_err(|_| invalid())?;
                Self::coerce_int(parsed, ty)?
            }
            Type::FLOAT4 => PgValue::Float32(trimmed.parse().map_err(|_| invalid())?),
            Type::FLOAT8 => PgValue::Float64(trimmed.parse().map_err(|_| invalid())?),
            Type::NUMERIC => PgValue::Numeric(trimmed.to_string()),
            Type::BOOL => PgValue::Bool(parse_bool(trimmed).ok_or_else(invalid)?),
            Type::DATE => PgValue::Date(parse_date(trimmed).ok_or_else(invalid)?.0),
            Type::TIME => PgValue::Time(parse_time(trimmed).ok_or_else(invalid)?.0),
            Type::TIMESTAMP => {
                PgValue::Timestamp(parse_datetime(trimmed).ok_or_else(invalid)?.0.naive_utc())
            }
            Type::TIMESTAMPTZ => PgValue::TimestampTz(parse_datetime(trimmed).ok_or_else(invalid)?.0),
            Type::JSON | Type::JSONB => {
                PgValue::Json(serde_json::from_str(s).map_err(|_| invalid())?)
            }
            Type::UUID => PgValue::Uuid(trimmed.parse().map_err(|_| invalid())?),
            Type::BYTEA => PgValue::Bytes(s.as_bytes().to_vec()),
            _ if accepts_text(ty) => PgValue::Text(s.to_string()),
            _ => return Err(invalid()),
        })
    }
}

impl ToSql for PgValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> std::result::Result<IsNull, BoxError> {
        match self {
            PgValue::Null => Ok(IsNull::Yes),
            PgValue::Bool(v) => v.to_sql_checked(ty, out),
            PgValue::Int16(v) => v.to_sql_checked(ty, out),
            PgValue::Int32(v) => v.to_sql_checked(ty, out),
            PgValue::Int64(v) => v.to_sql_checked(ty, out),
            PgValue::Float32(v) => v.to_sql_checked(ty, out),
            PgValue::Float64(v) => v.to_sql_checked(ty, out),
            PgValue::Numeric(v) => {
                if *ty != Type::NUMERIC {
                    return Err(Box::new(WrongType::new::<PgValue>(ty.clone())));
                }
                encode_numeric(v, out)?;
                Ok(IsNull::No)
            }
            // Enum input is the label's bytes, which `String` does not accept.
            PgValue::Text(v) if matches!(ty.kind(), postgres_types::Kind::Enum(_)) => {
                v.to_sql(ty, out)
            }
            PgValue::Text(v) => v.to_sql_checked(ty, out),
            PgValue::Bytes(v) => v.to_sql_checked(ty, out),
            PgValue::Uuid(v) => v.to_sql_checked(ty, out),
            PgValue::Json(v) => v.to_sql_checked(ty, out),
            PgValue::Date(v) => v.to_sql_checked(ty, out),
            PgValue::Time(v) => v.to_sql_checked(ty, out),
            PgValue::Timestamp(v) => v.to_sql_checked(ty, out),
            PgValue::TimestampTz(v) => v.to_sql_checked(ty, out),
        }
    }

    /// Every variant checks its own target type in `to_sql`.
    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Converts positional args for a statement whose parameter types are
/// `types`. Extra args with no declared type are sent as text.
pub(crate) fn values_for_types(values: &[Value], types: &[Type]) -> Result<Vec<PgValue>> {
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            PgValue::for_type(value, types.get(idx).unwrap_or(&Type::TEXT))
                .map_err(|e| PolysqlError::generic_with(format!("parameter ${}: {}", idx + 1, e), e))
        })
        .collect()
}

pub(crate) fn as_params(values: &[PgValue]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// NUMERIC read as exact decimal text.
struct PgNumericString(String);

impl<'a> FromSql<'a> for PgNumericString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(decode_numeric(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw UTF-8 payload of types without a dedicated mapping, such as enums.
struct PgFallbackString(String);

impl<'a> FromSql<'a> for PgFallbackString {
    fn from_sql(_: &Type, raw: &'a [u8]) -> std::result::Result<Self, BoxError> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

/// Reads column `idx` of `row` as a generic value.
pub(crate) fn row_value(row: &Row, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_();
    let read_err = |e: tokio_postgres::Error| {
        PolysqlError::generic_with(format!("read column {} ({})", idx, ty), e)
    };

    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx).map_err(read_err)?.map(Value::Bool),
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(read_err)?
            .map(|v| Value::Int64(v.into())),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(read_err)?
            .map(|v| Value::Int64(v.into())),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx).map_err(read_err)?.map(Value::Int64),
        Type::OID => row
            .try_get::<_, Option<u32>>(idx)
            .map_err(read_err)?
            .map(|v| Value::Int64(v.into())),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(read_err)?
            .map(|v| Value::Float64(v.into())),
        Type::FLOAT8 => row.try_get::<_, Option<f64>>(idx).map_err(read_err)?.map(Value::Float64),
        Type::NUMERIC => row
            .try_get::<_, Option<PgNumericString>>(idx)
            .map_err(read_err)?
            .map(|v| Value::Decimal(v.0)),
        Type::BYTEA => row.try_get::<_, Option<Vec<u8>>>(idx).map_err(read_err)?.map(Value::Bytes),
        Type::DATE => row.try_get::<_, Option<NaiveDate>>(idx).map_err(read_err)?.map(Value::Date),
        Type::TIME => row.try_get::<_, Option<NaiveTime>>(idx).map_err(read_err)?.map(Value::Time),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(read_err)?
            .map(|v| Value::DateTime(v.and_utc())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<chrono::DateTime<Utc>>>(idx)
            .map_err(read_err)?
            .map(Value::DateTime),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(read_err)?
            .map(|v| Value::String(v.to_string())),
        Type::UUID => row
            .try_get::<_, Option<uuid::Uuid>>(idx)
            .map_err(read_err)?
            .map(|v| Value::String(v.to_string())),
        _ if is_text_type(ty) => {
            row.try_get::<_, Option<String>>(idx).map_err(read_err)?.map(Value::String)
        }
        _ => match row.try_get::<_, Option<PgFallbackString>>(idx) {
            Ok(v) => v.map(|v| Value::String(v.0)),
            Err(e) => {
                tracing::trace!(column = idx, pg_type = %ty, error = %e, "unreadable column value");
                None
            }
        },
    };
    Ok(value.unwrap_or(Value::Null))
}
