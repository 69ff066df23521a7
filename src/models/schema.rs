//! Metadata types returned by the introspection operations.

use crate::models::backend::BackendKind;
use serde::{Deserialize, Serialize};

/// Server/database-level information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub backend: BackendKind,
    pub server_version: Option<String>,
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Kind of a listed relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableType {
    Table,
    View,
}

impl TableType {
    /// Parse catalog spellings ("BASE TABLE", "VIEW", "table", ...).
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("view") {
            Self::View
        } else {
            Self::Table
        }
    }
}

/// One entry from `list_tables`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub table_type: TableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, table_type: TableType) -> Self {
        Self {
            name: name.into(),
            table_type,
            schema: None,
        }
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }
}

/// One column from `get_table_structure`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            is_primary_key: false,
            default_value: None,
        }
    }

    pub fn with_primary_key(mut self, is_pk: bool) -> Self {
        self.is_primary_key = is_pk;
        self
    }

    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }
}

/// Full structure of one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
}

impl TableSchema {
    /// Assemble from columns; the primary key is derived from the flagged
    /// columns.
    pub fn from_columns(table_name: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        let primary_key = columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.clone())
            .collect();
        Self {
            table_name: table_name.into(),
            columns,
            primary_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_type_parse() {
        assert_eq!(TableType::parse("BASE TABLE"), TableType::Table);
        assert_eq!(TableType::parse("VIEW"), TableType::View);
        assert_eq!(TableType::parse("view"), TableType::View);
        assert_eq!(TableType::parse("table"), TableType::Table);
    }

    #[test]
    fn test_schema_derives_primary_key() {
        let schema = TableSchema::from_columns(
            "users",
            vec![
                ColumnDefinition::new("id", "INTEGER", false).with_primary_key(true),
                ColumnDefinition::new("name", "TEXT", true),
            ],
        );
        assert_eq!(schema.primary_key, vec!["id".to_string()]);
        assert_eq!(schema.columns.len(), 2);
    }
}
