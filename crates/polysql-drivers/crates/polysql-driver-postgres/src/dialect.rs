//! PostgreSQL dialect facts

use std::sync::LazyLock;

use polysql_core::{
    ALL_JOINS, Dialect, DriverType, QUERY_KEYWORDS, default_ops, enquote_double,
    exec_mode_default, param_numbered, placeholders_numbered,
};

/// Leading keywords of PostgreSQL statements that return rows.
pub const POSTGRES_QUERY_KEYWORDS: &[&str] = QUERY_KEYWORDS;

/// Bound values per batch statement.
const MAX_BATCH_VALUES: usize = 1000;

static POSTGRES_DIALECT: LazyLock<Dialect> = LazyLock::new(|| Dialect {
    driver_type: DriverType::POSTGRES,
    placeholders: placeholders_numbered,
    param: param_numbered,
    enquote: enquote_double,
    exec_mode_for: exec_mode_default,
    ops: default_ops(),
    joins: ALL_JOINS,
    max_batch_values: MAX_BATCH_VALUES,
    catalog: true,
    int_bool: false,
});

/// The dialect shared by every PostgreSQL grip.
pub fn postgres_dialect() -> &'static Dialect {
    &POSTGRES_DIALECT
}

#[cfg(test)]
mod tests {
    use super::*;
    use polysql_core::ExecMode;

    #[test]
    fn test_dialect_facts() {
        let dialect = postgres_dialect();
        assert_eq!(dialect.driver_type, DriverType::POSTGRES);
        assert_eq!((dialect.placeholders)(2, 2), "($1, $2), ($3, $4)");
        assert_eq!((dialect.param)(3), "$3");
        assert!(dialect.catalog);
        assert!(!dialect.int_bool);
        assert_eq!(dialect.max_batch_rows(3), 333);
    }

    #[test]
    fn test_pragma_is_not_a_query() {
        let dialect = postgres_dialect();
        assert_eq!(
            (dialect.exec_mode_for)("/* hint */ SELECT 1").unwrap(),
            ExecMode::Query
        );
        assert_eq!((dialect.exec_mode_for)("PRAGMA x").unwrap(), ExecMode::Exec);
    }
}
