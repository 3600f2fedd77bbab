//! Wrapping of rusqlite errors into the polysql taxonomy

use std::fmt::Display;

use polysql_core::PolysqlError;
use rusqlite::ErrorCode;

/// Wraps a rusqlite error, promoting constraint failures and missing
/// objects.
pub(crate) fn wrap_err(context: impl Display, e: rusqlite::Error) -> PolysqlError {
    let message = format!("{}: {}", context, e);

    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &e
        && ffi_err.code == ErrorCode::ConstraintViolation
    {
        return PolysqlError::constraint_violation(message, e);
    }

    let text = e.to_string();
    if ["no such table", "no such column", "unknown database"]
        .iter()
        .any(|pattern| text.contains(pattern))
    {
        return PolysqlError::not_exist_with(message, e);
    }

    PolysqlError::generic_with(message, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polysql_core::ErrorKind;
    use rusqlite::Connection;

    #[test]
    fn test_native_errors_are_classified() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE actor (id INTEGER PRIMARY KEY)")
            .unwrap();
        conn.execute("INSERT INTO actor (id) VALUES (1)", []).unwrap();

        let dup = conn
            .execute("INSERT INTO actor (id) VALUES (1)", [])
            .unwrap_err();
        assert_eq!(wrap_err("insert", dup).kind(), ErrorKind::ConstraintViolation);

        let missing = conn.execute("DELETE FROM film", []).unwrap_err();
        assert_eq!(wrap_err("delete", missing).kind(), ErrorKind::NotExist);

        let syntax = conn.execute("DELETE FROM", []).unwrap_err();
        let wrapped = wrap_err("delete", syntax);
        assert_eq!(wrapped.kind(), ErrorKind::Generic);
        assert!(std::error::Error::source(&wrapped).is_some());
    }
}
