//! SQL text builders shared by the bundled drivers
//!
//! Every identifier goes through the dialect's `enquote`, so case folding and
//! quote escaping are decided by the driver rather than here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Dialect, Kind, PolysqlError, Result};

/// A possibly catalog- and schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: None,
            table: table.into(),
        }
    }

    pub fn with_schema(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            catalog: None,
            schema: Some(schema.into()),
            table: table.into(),
        }
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Renders the quoted, qualified name for `dialect`.
    pub fn render(&self, dialect: &Dialect) -> Result<String> {
        let mut parts = Vec::with_capacity(3);
        if let Some(catalog) = &self.catalog {
            if !dialect.catalog {
                return Err(PolysqlError::Unsupported(format!(
                    "{}: catalog-qualified table names",
                    dialect.driver_type
                )));
            }
            parts.push((dialect.enquote)(catalog));
        }
        if let Some(schema) = &self.schema {
            parts.push((dialect.enquote)(schema));
        }
        parts.push((dialect.enquote)(&self.table));
        Ok(parts.join("."))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(catalog) = &self.catalog {
            write!(f, "{}.", catalog)?;
        }
        if let Some(schema) = &self.schema {
            write!(f, "{}.", schema)?;
        }
        f.write_str(&self.table)
    }
}

impl From<&str> for TableName {
    fn from(table: &str) -> Self {
        TableName::new(table)
    }
}

/// Column of a table to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: Kind,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        Self {
            name: name.into(),
            kind,
            not_null: false,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Shape of a table to be created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn new(name: impl Into<TableName>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// `INSERT INTO t ("a", "b") VALUES (?, ?), (?, ?)` for `num_rows` rows.
pub fn insert_sql(
    dialect: &Dialect,
    table: &TableName,
    cols: &[String],
    num_rows: usize,
) -> Result<String> {
    if cols.is_empty() {
        return Err(PolysqlError::InvalidSql(format!(
            "insert into {}: no columns",
            table
        )));
    }
    if num_rows == 0 {
        return Err(PolysqlError::InvalidSql(format!(
            "insert into {}: zero rows",
            table
        )));
    }

    Ok(format!(
        "INSERT INTO {} ({}) VALUES {}",
        table.render(dialect)?,
        dialect.enquote_all(cols).join(", "),
        (dialect.placeholders)(cols.len(), num_rows)
    ))
}

/// `UPDATE t SET "a" = ?, "b" = ? [WHERE ...]`.
///
/// `where_clause` is appended verbatim; its parameters follow the SET
/// parameters.
pub fn update_sql(
    dialect: &Dialect,
    table: &TableName,
    cols: &[String],
    where_clause: Option<&str>,
) -> Result<String> {
    if cols.is_empty() {
        return Err(PolysqlError::InvalidSql(format!(
            "update {}: no columns",
            table
        )));
    }

    let assignments: Vec<String> = cols
        .iter()
        .enumerate()
        .map(|(idx, col)| format!("{} = {}", (dialect.enquote)(col), (dialect.param)(idx + 1)))
        .collect();

    let mut sql = format!(
        "UPDATE {} SET {}",
        table.render(dialect)?,
        assignments.join(", ")
    );
    if let Some(where_clause) = where_clause.map(str::trim).filter(|w| !w.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(where_clause);
    }
    Ok(sql)
}

/// `CREATE TABLE` statement, mapping kinds through `type_for_kind`.
pub fn create_table_sql(
    dialect: &Dialect,
    def: &TableDef,
    type_for_kind: impl Fn(Kind) -> &'static str,
) -> Result<String> {
    if def.columns.is_empty() {
        return Err(PolysqlError::InvalidSql(format!(
            "create table {}: no columns",
            def.name
        )));
    }

    let mut column_defs: Vec<String> = def
        .columns
        .iter()
        .map(|col| {
            let mut col_def = format!("{} {}", (dialect.enquote)(&col.name), type_for_kind(col.kind));
            if col.not_null {
                col_def.push_str(" NOT NULL");
            }
            col_def
        })
        .collect();

    let pk_columns: Vec<&str> = def
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.as_str())
        .collect();
    if !pk_columns.is_empty() {
        column_defs.push(format!(
            "PRIMARY KEY ({})",
            dialect.enquote_all(&pk_columns).join(", ")
        ));
    }

    Ok(format!(
        "CREATE TABLE {} ({})",
        def.name.render(dialect)?,
        column_defs.join(", ")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        DriverType, exec_mode_default, default_ops, enquote_double, param_numbered,
        placeholders_numbered, ALL_JOINS,
    };
    use pretty_assertions::assert_eq;

    fn numbered_dialect(catalog: bool) -> Dialect {
        Dialect {
            driver_type: DriverType::new("testdb"),
            placeholders: placeholders_numbered,
            param: param_numbered,
            enquote: enquote_double,
            exec_mode_for: exec_mode_default,
            ops: default_ops(),
            joins: ALL_JOINS,
            max_batch_values: 100,
            catalog,
            int_bool: false,
        }
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_sql() {
        let sql = insert_sql(
            &numbered_dialect(true),
            &TableName::with_schema("public", "actor"),
            &cols(&["id", "name"]),
            2,
        )
        .unwrap();
        assert_eq!(
            sql,
            r#"INSERT INTO "public"."actor" ("id", "name") VALUES ($1, $2), ($3, $4)"#
        );
    }

    #[test]
    fn test_update_sql() {
        let sql = update_sql(
            &numbered_dialect(true),
            &TableName::new("actor"),
            &cols(&["name"]),
            Some("id = $2"),
        )
        .unwrap();
        assert_eq!(sql, r#"UPDATE "actor" SET "name" = $1 WHERE id = $2"#);
    }

    #[test]
    fn test_create_table_sql() {
        let def = TableDef::new(
            "actor",
            vec![
                ColumnDef::new("id", Kind::Int).not_null().primary_key(),
                ColumnDef::new("name", Kind::Text),
            ],
        );
        let sql = create_table_sql(&numbered_dialect(true), &def, |kind| match kind {
            Kind::Int => "BIGINT",
            _ => "TEXT",
        })
        .unwrap();
        assert_eq!(
            sql,
            r#"CREATE TABLE "actor" ("id" BIGINT NOT NULL, "name" TEXT, PRIMARY KEY ("id"))"#
        );
    }

    #[test]
    fn test_catalog_rejected_without_support() {
        let name = TableName::new("actor").with_catalog("sakila");
        assert_eq!(
            name.render(&numbered_dialect(true)).unwrap(),
            r#""sakila"."actor""#
        );
        let err = name.render(&numbered_dialect(false)).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_empty_columns_rejected() {
        let dialect = numbered_dialect(true);
        assert!(insert_sql(&dialect, &TableName::new("t"), &[], 1).is_err());
        assert!(insert_sql(&dialect, &TableName::new("t"), &cols(&["a"]), 0).is_err());
        assert!(update_sql(&dialect, &TableName::new("t"), &[], None).is_err());
    }
}
