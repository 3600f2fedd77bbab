//! Wrapping of tokio-postgres and pool errors into the polysql taxonomy

use std::fmt::Display;

use polysql_core::PolysqlError;
use tokio_postgres::error::SqlState;

/// SQLSTATE codes reported for objects that are missing.
const NOT_EXIST_STATES: &[SqlState] = &[
    SqlState::UNDEFINED_TABLE,
    SqlState::INVALID_SCHEMA_NAME,
    SqlState::INVALID_CATALOG_NAME,
    SqlState::UNDEFINED_COLUMN,
];

/// Renders the server message with its detail and hint.
fn describe(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = db_error.message().to_string();
    if let Some(detail) = db_error.detail()
        && !detail.trim().is_empty()
    {
        message.push_str(&format!(" (detail: {})", detail));
    }
    if let Some(hint) = db_error.hint()
        && !hint.trim().is_empty()
    {
        message.push_str(&format!(" (hint: {})", hint));
    }
    format!("{} (SQLSTATE {})", message, db_error.code().code())
}

/// Wraps a tokio-postgres error, promoting missing objects and class 23
/// integrity violations.
pub(crate) fn wrap_err(context: impl Display, e: tokio_postgres::Error) -> PolysqlError {
    let message = format!("{}: {}", context, describe(&e));

    match e.code() {
        Some(code) if NOT_EXIST_STATES.contains(code) => PolysqlError::not_exist_with(message, e),
        Some(code) if code.code().starts_with("23") => {
            PolysqlError::constraint_violation(message, e)
        }
        _ => PolysqlError::generic_with(message, e),
    }
}

/// Wraps a failure to obtain a pooled connection.
pub(crate) fn pool_err(context: impl Display, e: deadpool_postgres::PoolError) -> PolysqlError {
    match e {
        deadpool_postgres::PoolError::Backend(e) => wrap_err(context, e),
        other => PolysqlError::generic_with(format!("{}: {}", context, other), other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_exist_states() {
        for code in ["42P01", "3F000", "3D000", "42703"] {
            assert!(
                NOT_EXIST_STATES.contains(&SqlState::from_code(code)),
                "{} should map to NotExist",
                code
            );
        }
        assert!(!NOT_EXIST_STATES.contains(&SqlState::UNIQUE_VIOLATION));
    }
}
