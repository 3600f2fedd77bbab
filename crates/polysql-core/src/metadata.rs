//! Metadata payloads describing a source, its tables and their columns

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DriverType, Grip, Kind, Result, TableName};

/// Description of a whole source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub handle: String,
    /// Location with any password masked.
    pub location: String,
    pub driver: DriverType,
    /// Name of the native client library, e.g. `rusqlite`.
    pub db_driver: String,
    pub db_product: String,
    pub db_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub name: String,
    pub fq_name: String,
    pub size: Option<i64>,
    pub table_count: usize,
    pub view_count: usize,
    pub tables: Vec<TableMetadata>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub db_properties: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    Table,
    View,
}

/// Description of one table or view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub fq_name: String,
    pub table_type: TableType,
    /// The engine's own name for the table type, e.g. `BASE TABLE`.
    pub db_table_type: String,
    pub row_count: i64,
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub columns: Vec<ColumnMetadata>,
}

impl TableMetadata {
    pub fn column(&self, name: &str) -> Option<&ColumnMetadata> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Description of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    /// One-based position within the table.
    pub position: i64,
    pub primary_key: bool,
    /// Type name without modifiers, e.g. `VARCHAR`.
    pub base_type: String,
    /// Full declared type, e.g. `VARCHAR(64)`.
    pub column_type: String,
    pub kind: Kind,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Strips a type modifier: `VARCHAR(64)` becomes `VARCHAR`.
pub fn base_type_name(column_type: &str) -> &str {
    column_type
        .split_once('(')
        .map_or(column_type, |(base, _)| base)
        .trim()
}

/// Loads metadata for each named table.
///
/// A table that fails (dropped concurrently, permission denied) is logged
/// and left out of the result.
pub async fn collect_tables(grip: &dyn Grip, names: &[TableName]) -> Vec<TableMetadata> {
    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        match grip.table_metadata(name).await {
            Ok(table) => tables.push(table),
            Err(e) => {
                tracing::warn!(
                    handle = %grip.source().handle,
                    table = %name,
                    error = %e,
                    "skipping table in source metadata"
                );
            }
        }
    }
    tables
}

/// Counts of tables and views in `tables`.
pub fn count_table_types(tables: &[TableMetadata]) -> (usize, usize) {
    tables.iter().fold((0, 0), |(t, v), table| match table.table_type {
        TableType::Table => (t + 1, v),
        TableType::View => (t, v + 1),
    })
}

/// Serializes metadata to pretty JSON.
pub fn to_json<T: Serialize>(metadata: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(metadata)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(name: &str, table_type: TableType) -> TableMetadata {
        TableMetadata {
            name: name.to_string(),
            fq_name: format!("main.{}", name),
            table_type,
            db_table_type: "table".to_string(),
            row_count: 0,
            size: None,
            comment: None,
            columns: vec![ColumnMetadata {
                name: "id".to_string(),
                position: 1,
                primary_key: true,
                base_type: "INTEGER".to_string(),
                column_type: "INTEGER".to_string(),
                kind: Kind::Int,
                nullable: false,
                default_value: None,
                comment: None,
            }],
        }
    }

    #[test]
    fn test_base_type_name() {
        assert_eq!(base_type_name("VARCHAR(64)"), "VARCHAR");
        assert_eq!(base_type_name("numeric (10, 2)"), "numeric");
        assert_eq!(base_type_name("TEXT"), "TEXT");
    }

    #[test]
    fn test_count_table_types() {
        let tables = vec![
            table("actor", TableType::Table),
            table("film", TableType::Table),
            table("actor_info", TableType::View),
        ];
        assert_eq!(count_table_types(&tables), (2, 1));
    }

    #[test]
    fn test_table_metadata_json_is_snake_case() {
        let json = to_json(&table("actor", TableType::View)).unwrap();
        assert!(json.contains("\"table_type\": \"view\""), "{}", json);
        assert!(json.contains("\"kind\": \"int\""), "{}", json);
        assert!(!json.contains("comment"), "{}", json);

        let back: TableMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.column("id").map(|c| c.position), Some(1));
    }
}
