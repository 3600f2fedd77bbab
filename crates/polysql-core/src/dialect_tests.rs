//! Tests for Dialect helpers

use super::*;
use pretty_assertions::assert_eq;
use rstest::rstest;

fn upper_folding_dialect() -> Dialect {
    Dialect {
        driver_type: DriverType::new("upperdb"),
        placeholders: placeholders_question,
        param: param_question,
        enquote: enquote_double_upper,
        exec_mode_for: exec_mode_default,
        ops: default_ops(),
        joins: &[JoinType::Inner, JoinType::Left],
        max_batch_values: 1000,
        catalog: true,
        int_bool: false,
    }
}

mod placeholder_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_question_single() {
        assert_eq!(placeholders_question(1, 1), "(?)");
    }

    #[test]
    fn test_question_groups() {
        assert_eq!(placeholders_question(3, 2), "(?, ?, ?), (?, ?, ?)");
    }

    #[test]
    fn test_numbered_single() {
        assert_eq!(placeholders_numbered(1, 1), "($1)");
    }

    #[test]
    fn test_numbered_continues_across_rows() {
        assert_eq!(placeholders_numbered(3, 2), "($1, $2, $3), ($4, $5, $6)");
    }

    #[test]
    fn test_zero_rows_is_empty() {
        assert_eq!(placeholders_question(2, 0), "");
    }

    #[rstest]
    #[case(1, 1)]
    #[case(3, 2)]
    #[case(5, 7)]
    fn test_group_and_marker_counts(#[case] cols: usize, #[case] rows: usize) {
        for rendered in [placeholders_question(cols, rows), placeholders_numbered(cols, rows)] {
            let groups: Vec<&str> = rendered.split("), (").collect();
            assert_eq!(groups.len(), rows);
            for group in groups {
                let markers = group.trim_matches(|c: char| c == '(' || c == ')').split(", ").count();
                assert_eq!(markers, cols);
            }
            assert!(!rendered.ends_with(", "));
        }
    }
}

mod enquote_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_enquote_simple() {
        assert_eq!(enquote_double("users"), "\"users\"");
    }

    #[test]
    fn test_enquote_embedded_quote() {
        assert_eq!(enquote_double("my\"table"), "\"my\"\"table\"");
    }

    #[test]
    fn test_enquote_already_quoted_unchanged() {
        assert_eq!(enquote_double("\"users\""), "\"users\"");
        assert_eq!(enquote_double("\"my\"\"table\""), "\"my\"\"table\"");
    }

    #[test]
    fn test_enquote_twice_is_stable() {
        let once = enquote_double("order");
        assert_eq!(enquote_double(&once), once);
    }

    #[test]
    fn test_enquote_lone_quote_is_escaped() {
        assert_eq!(enquote_double("\""), "\"\"\"\"");
    }

    #[test]
    fn test_upper_folding_matches_case_variants() {
        let dialect = upper_folding_dialect();
        assert_eq!((dialect.enquote)("users"), (dialect.enquote)("USERS"));
        assert_eq!((dialect.enquote)("users"), "\"USERS\"");
    }
}

mod exec_mode_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[rstest]
    #[case("SELECT * FROM t")]
    #[case("  select 1")]
    #[case("WITH c AS (SELECT 1) SELECT * FROM c")]
    #[case("-- leading comment\nSELECT 1")]
    #[case("/* block */ SELECT 1")]
    #[case("(SELECT 1) UNION (SELECT 2)")]
    #[case("VALUES (1), (2)")]
    #[case("EXPLAIN SELECT 1")]
    fn test_query_statements(#[case] sql: &str) {
        assert_eq!(exec_mode_default(sql).unwrap(), ExecMode::Query);
    }

    #[rstest]
    #[case("INSERT INTO t VALUES (1)")]
    #[case("UPDATE t SET a = 1")]
    #[case("DELETE FROM t")]
    #[case("CREATE TABLE t (a INT)")]
    #[case("DROP TABLE t")]
    #[case("ALTER TABLE t ADD COLUMN b INT")]
    #[case("TRUNCATE t")]
    #[case("/* multi\nline */ insert into t values (1)")]
    fn test_exec_statements(#[case] sql: &str) {
        assert_eq!(exec_mode_default(sql).unwrap(), ExecMode::Exec);
    }

    #[rstest]
    #[case("")]
    #[case("   \n\t ")]
    #[case("-- just a comment")]
    #[case("/* only */ -- comments\n")]
    fn test_empty_input_is_error(#[case] sql: &str) {
        let err = exec_mode_default(sql).unwrap_err();
        assert!(err.to_string().contains("empty or ambiguous"), "{}", err);
    }

    #[test]
    fn test_unclosed_block_comment_is_error() {
        let err = exec_mode_default("/* never closed SELECT 1").unwrap_err();
        assert!(err.to_string().contains("unclosed block comment"), "{}", err);
    }

    #[test]
    fn test_custom_keywords() {
        assert_eq!(
            classify_exec_mode("PRAGMA table_info(t)", &["PRAGMA"]).unwrap(),
            ExecMode::Query
        );
        assert_eq!(
            classify_exec_mode("PRAGMA table_info(t)", QUERY_KEYWORDS).unwrap(),
            ExecMode::Exec
        );
    }
}

mod dialect_fact_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_max_batch_rows() {
        let dialect = upper_folding_dialect();
        assert_eq!(dialect.max_batch_rows(3), 333);
        assert_eq!(dialect.max_batch_rows(0), 1000);
        assert_eq!(dialect.max_batch_rows(5000), 1);
    }

    #[test]
    fn test_ops_and_joins() {
        let dialect = upper_folding_dialect();
        assert_eq!(dialect.op(Op::Eq), Some("="));
        assert_eq!(dialect.op(Op::And), Some("AND"));
        assert!(dialect.supports_join(JoinType::Left));
        assert!(!dialect.supports_join(JoinType::Full));
        assert_eq!(Op::Ne.token(), "!=");
    }
}
