//! Mapping between SQLite declared types, kinds and values

use chrono::SecondsFormat;
use polysql_core::{Kind, Value, parse_date, parse_datetime, parse_time};
use rusqlite::types::{Value as SqlValue, ValueRef};

/// Maps a declared column type to a kind, following SQLite's affinity rules
/// with the temporal and boolean names recognized first.
pub fn kind_from_decl_type(decl_type: &str) -> Kind {
    let upper = decl_type.trim().to_ascii_uppercase();
    let base = upper
        .split_once('(')
        .map_or(upper.as_str(), |(base, _)| base)
        .trim();

    match base {
        "" => Kind::Unknown,
        "BOOL" | "BOOLEAN" => Kind::Bool,
        "DATETIME" | "TIMESTAMP" => Kind::Datetime,
        "DATE" => Kind::Date,
        "TIME" => Kind::Time,
        "JSON" => Kind::Text,
        _ if base.contains("INT") => Kind::Int,
        _ if base.contains("CHAR") || base.contains("CLOB") || base.contains("TEXT") => Kind::Text,
        _ if base.contains("BLOB") => Kind::Bytes,
        _ if base.contains("REAL") || base.contains("FLOA") || base.contains("DOUB") => {
            Kind::Float
        }
        _ => Kind::Decimal,
    }
}

/// DDL type used for a column of `kind`.
pub fn db_type_for_kind(kind: Kind) -> &'static str {
    match kind {
        Kind::Text | Kind::Unknown | Kind::Null => "TEXT",
        Kind::Int => "INTEGER",
        Kind::Float => "REAL",
        Kind::Decimal => "NUMERIC",
        Kind::Bool => "BOOLEAN",
        Kind::Bytes => "BLOB",
        Kind::Datetime => "DATETIME",
        Kind::Date => "DATE",
        Kind::Time => "TIME",
    }
}

pub(crate) fn values_to_rusqlite(values: &[Value]) -> Vec<SqlValue> {
    values.iter().map(value_to_rusqlite).collect()
}

pub(crate) fn value_to_rusqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int64(i) => SqlValue::Integer(*i),
        Value::Float64(f) => SqlValue::Real(*f),
        Value::Decimal(d) => SqlValue::Text(d.clone()),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format(polysql_core::DATE_LAYOUT).to_string()),
        Value::Time(t) => SqlValue::Text(t.format(polysql_core::TIME_LAYOUT).to_string()),
        Value::DateTime(dt) => SqlValue::Text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
    }
}

/// Converts a stored value, using the column kind to recover booleans,
/// decimals and temporal values that SQLite stores as integers or text.
pub(crate) fn rusqlite_to_value(value_ref: ValueRef<'_>, kind: Kind) -> Value {
    match (value_ref, kind) {
        (ValueRef::Null, _) => Value::Null,

        (ValueRef::Integer(i), Kind::Bool) => Value::Bool(i != 0),
        (ValueRef::Integer(i), Kind::Decimal) => Value::Decimal(i.to_string()),
        (ValueRef::Integer(i), _) => Value::Int64(i),

        (ValueRef::Real(f), Kind::Decimal) => Value::Decimal(f.to_string()),
        (ValueRef::Real(f), _) => Value::Float64(f),

        (ValueRef::Text(s), kind) => {
            let text = String::from_utf8_lossy(s);
            text_to_value(&text, kind).unwrap_or_else(|| Value::String(text.into_owned()))
        }

        (ValueRef::Blob(b), Kind::Bytes) => Value::Bytes(b.to_vec()),
        // Blobs outside BLOB columns usually hold text.
        (ValueRef::Blob(b), _) => match std::str::from_utf8(b) {
            Ok(s) => Value::String(s.to_string()),
            Err(_) => Value::Bytes(b.to_vec()),
        },
    }
}

fn text_to_value(text: &str, kind: Kind) -> Option<Value> {
    match kind {
        Kind::Datetime => parse_datetime(text).map(|(dt, _)| Value::DateTime(dt)),
        Kind::Date => parse_date(text).map(|(d, _)| Value::Date(d)),
        Kind::Time => parse_time(text).map(|(t, _)| Value::Time(t)),
        Kind::Decimal => Some(Value::Decimal(text.to_string())),
        Kind::Bool => polysql_core::parse_bool(text).map(Value::Bool),
        _ => None,
    }
}

/// Converts a value for use in metadata payloads.
pub(crate) fn value_ref_to_json(value_ref: ValueRef<'_>) -> serde_json::Value {
    match value_ref {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(s) => serde_json::Value::from(String::from_utf8_lossy(s).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("INTEGER", Kind::Int)]
    #[case("bigint", Kind::Int)]
    #[case("VARCHAR(64)", Kind::Text)]
    #[case("TEXT", Kind::Text)]
    #[case("BLOB", Kind::Bytes)]
    #[case("DOUBLE PRECISION", Kind::Float)]
    #[case("NUMERIC(10,2)", Kind::Decimal)]
    #[case("DECIMAL", Kind::Decimal)]
    #[case("BOOLEAN", Kind::Bool)]
    #[case("DATETIME", Kind::Datetime)]
    #[case("timestamp", Kind::Datetime)]
    #[case("DATE", Kind::Date)]
    #[case("TIME", Kind::Time)]
    #[case("", Kind::Unknown)]
    fn test_kind_from_decl_type(#[case] decl: &str, #[case] expected: Kind) {
        assert_eq!(kind_from_decl_type(decl), expected);
    }

    #[test]
    fn test_ddl_types_map_back_to_their_kind() {
        for kind in Kind::ALL {
            if matches!(kind, Kind::Unknown | Kind::Null) {
                continue;
            }
            assert_eq!(kind_from_decl_type(db_type_for_kind(kind)), kind);
        }
    }

    #[test]
    fn test_stored_values_recover_kind() {
        assert_eq!(rusqlite_to_value(ValueRef::Integer(1), Kind::Bool), Value::Bool(true));
        assert_eq!(
            rusqlite_to_value(ValueRef::Text(b"2024-03-01"), Kind::Date),
            Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        );
        assert_eq!(
            rusqlite_to_value(ValueRef::Text(b"2024-03-01T10:00:00Z"), Kind::Datetime),
            Value::DateTime(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(
            rusqlite_to_value(ValueRef::Text(b"not a date"), Kind::Date),
            Value::from("not a date")
        );
    }

    #[test]
    fn test_datetime_is_stored_as_rfc3339_utc() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            value_to_rusqlite(&Value::DateTime(dt)),
            SqlValue::Text("2024-03-01T10:00:00Z".to_string())
        );
    }
}
