//! dbt catalog.json parsing
//!
//! The catalog carries the warehouse-observed column types of every
//! materialized node and source.

use crate::manifest::ManifestError;
use crate::types::parse_data_type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use vinyl_core::{Column, Schema, TableRef};

/// dbt catalog.json structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Materialized nodes (models, seeds, snapshots)
    #[serde(default)]
    pub nodes: BTreeMap<String, CatalogTable>,

    /// Source tables
    #[serde(default)]
    pub sources: BTreeMap<String, CatalogTable>,
}

impl Catalog {
    /// Load catalog from file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_json(&contents)
    }

    /// Parse catalog from JSON string
    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json)
            .map_err(|e| ManifestError::ParseError(e.to_string()))
    }

    /// Look up a node or source by unique_id
    pub fn table(&self, unique_id: &str) -> Option<&CatalogTable> {
        self.nodes.get(unique_id).or_else(|| self.sources.get(unique_id))
    }
}

/// One table in the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTable {
    pub metadata: CatalogTableMetadata,

    #[serde(default)]
    pub columns: BTreeMap<String, CatalogColumn>,

    #[serde(default)]
    pub unique_id: Option<String>,
}

impl CatalogTable {
    /// Columns in warehouse order
    pub fn schema(&self) -> Schema {
        let mut columns: Vec<&CatalogColumn> = self.columns.values().collect();
        columns.sort_by_key(|c| c.index);

        Schema::from_columns(
            columns
                .into_iter()
                .map(|c| Column::new(c.name.clone(), parse_data_type(&c.data_type)))
                .collect(),
        )
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef {
            database: self.metadata.database.clone(),
            schema: self.metadata.schema.clone(),
            name: self.metadata.name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTableMetadata {
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    pub name: String,

    /// BASE TABLE, VIEW, ...
    #[serde(rename = "type", default)]
    pub table_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,

    #[serde(rename = "type")]
    pub data_type: String,

    #[serde(default)]
    pub index: usize,

    #[serde(default)]
    pub comment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vinyl_core::LogicalType;

    #[test]
    fn schema_follows_column_index() {
        let catalog = Catalog::from_json(
            r#"{
                "nodes": {},
                "sources": {
                    "source.shop.raw.orders": {
                        "metadata": {"schema": "raw", "name": "orders", "type": "BASE TABLE"},
                        "columns": {
                            "amount": {"name": "amount", "type": "DOUBLE", "index": 2},
                            "id": {"name": "id", "type": "INTEGER", "index": 1}
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let table = catalog.table("source.shop.raw.orders").unwrap();
        let schema = table.schema();
        assert_eq!(schema.column_names(), vec!["id", "amount"]);
        assert_eq!(schema.columns[1].logical_type, LogicalType::Float);
        assert_eq!(table.table_ref().fqn(), "raw.orders");
    }
}
