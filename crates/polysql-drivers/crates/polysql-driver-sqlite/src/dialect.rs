//! SQLite dialect facts

use std::sync::LazyLock;

use polysql_core::{
    ALL_JOINS, Dialect, DriverType, ExecMode, Result, classify_exec_mode, default_ops,
    enquote_double, param_question, placeholders_question,
};

/// Leading keywords of SQLite statements that return rows.
pub const SQLITE_QUERY_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "VALUES", "TABLE", "SHOW", "EXPLAIN", "DESCRIBE", "PRAGMA",
];

/// Bound values per batch statement.
const MAX_BATCH_VALUES: usize = 500;

static SQLITE_DIALECT: LazyLock<Dialect> = LazyLock::new(|| Dialect {
    driver_type: DriverType::SQLITE,
    placeholders: placeholders_question,
    param: param_question,
    enquote: enquote_double,
    exec_mode_for: sqlite_exec_mode,
    ops: default_ops(),
    joins: ALL_JOINS,
    max_batch_values: MAX_BATCH_VALUES,
    catalog: false,
    int_bool: true,
});

/// The dialect shared by every SQLite grip.
pub fn sqlite_dialect() -> &'static Dialect {
    &SQLITE_DIALECT
}

fn sqlite_exec_mode(sql: &str) -> Result<ExecMode> {
    classify_exec_mode(sql, SQLITE_QUERY_KEYWORDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polysql_core::JoinType;

    #[test]
    fn test_dialect_facts() {
        let dialect = sqlite_dialect();
        assert_eq!(dialect.driver_type, DriverType::SQLITE);
        assert_eq!((dialect.placeholders)(2, 2), "(?, ?), (?, ?)");
        assert_eq!((dialect.enquote)("order"), "\"order\"");
        assert!(!dialect.catalog);
        assert!(dialect.int_bool);
        assert!(dialect.supports_join(JoinType::Full));
        assert_eq!(dialect.max_batch_rows(3), 166);
    }

    #[test]
    fn test_pragma_is_a_query() {
        let dialect = sqlite_dialect();
        assert_eq!(
            (dialect.exec_mode_for)("PRAGMA table_info('actor')").unwrap(),
            ExecMode::Query
        );
        assert_eq!(
            (dialect.exec_mode_for)("VACUUM").unwrap(),
            ExecMode::Exec
        );
    }
}
