//! dbt manifest.json parsing
//!
//! Parses dbt-generated manifest.json to extract models, seeds, sources, and
//! their dependencies. Only the fields the lineage engine consumes are modelled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use vinyl_core::{Dag, DagError, TableRef};

/// dbt manifest.json structure (subset of fields we care about)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Metadata about the manifest
    #[serde(default)]
    pub metadata: ManifestMetadata,

    /// Model, seed, snapshot and test nodes
    #[serde(default)]
    pub nodes: BTreeMap<String, ManifestNode>,

    /// Source definitions
    #[serde(default)]
    pub sources: BTreeMap<String, ManifestSource>,
}

impl Manifest {
    /// Read `manifest.json`
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_json(&contents)
    }

    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json)
            .map_err(|e| ManifestError::ParseError(e.to_string()))
    }

    /// Enabled nodes of one resource type, in id order
    pub fn nodes_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a ManifestNode> {
        self.nodes
            .values()
            .filter(move |node| node.resource_type == resource_type && node.config.enabled)
    }

    /// Enabled models
    pub fn models(&self) -> Vec<&ManifestNode> {
        self.nodes_of_type("model").collect()
    }

    /// Enabled seeds
    pub fn seeds(&self) -> Vec<&ManifestNode> {
        self.nodes_of_type("seed").collect()
    }

    pub fn get_node(&self, unique_id: &str) -> Option<&ManifestNode> {
        self.nodes.get(unique_id)
    }

    pub fn get_source(&self, unique_id: &str) -> Option<&ManifestSource> {
        self.sources.get(unique_id)
    }

    /// Dependency DAG over sources, seeds and models
    ///
    /// Tests are left out. Edges point from a dependency to its dependent.
    pub fn dependency_graph(&self) -> Result<Dag<String>, ManifestError> {
        let mut dag = Dag::new();

        for source_id in self.sources.keys() {
            dag.add_node(source_id.clone());
        }

        for (node_id, node) in &self.nodes {
            if node.resource_type == "test" {
                continue;
            }
            dag.add_node(node_id.clone());

            for dep_id in &node.depends_on.nodes {
                dag.add_edge(dep_id.clone(), node_id.clone())?;
            }
        }

        Ok(dag)
    }
}

/// Manifest metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub dbt_schema_version: String,
    #[serde(default)]
    pub dbt_version: String,
    #[serde(default)]
    pub generated_at: String,
    #[serde(default)]
    pub adapter_type: Option<String>,
}

/// A node in the manifest (model, seed, test, snapshot, etc.)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestNode {
    /// Unique identifier (e.g., "model.my_project.users")
    pub unique_id: String,

    pub name: String,

    pub resource_type: String,

    #[serde(default)]
    pub package_name: String,

    #[serde(default)]
    pub original_file_path: String,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    /// Alias (output table name)
    #[serde(default)]
    pub alias: Option<String>,

    /// Fully rendered relation name
    #[serde(default)]
    pub relation_name: Option<String>,

    #[serde(default)]
    pub config: NodeConfig,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub columns: BTreeMap<String, ColumnDefinition>,

    #[serde(default)]
    pub depends_on: DependsOn,

    /// SQL with Jinja rendered
    #[serde(default)]
    pub compiled_code: Option<String>,

    /// SQL as written
    #[serde(default)]
    pub raw_code: Option<String>,
}

impl ManifestNode {
    /// Compiled SQL, falling back to raw SQL
    pub fn sql(&self) -> Option<&str> {
        self.compiled_code
            .as_deref()
            .or(self.raw_code.as_deref())
            .filter(|s| !s.trim().is_empty())
    }

    /// Physical location of the materialized node
    pub fn table_ref(&self) -> TableRef {
        TableRef {
            database: self.database.clone(),
            schema: self.schema.clone(),
            name: self.alias.clone().unwrap_or_else(|| self.name.clone()),
        }
    }
}

/// The `config` block of a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub materialized: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            materialized: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A documented column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Declared warehouse type, e.g. `varchar(20)`
    #[serde(default)]
    pub data_type: Option<String>,
}

/// `depends_on` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    /// Unique ids of upstream nodes, including macros
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// A source in the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestSource {
    /// Unique identifier (e.g., "source.my_project.raw.users")
    pub unique_id: String,

    /// Source name (e.g., "raw")
    pub source_name: String,

    /// Table name (e.g., "users")
    pub name: String,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    /// Identifier (actual table name)
    #[serde(default)]
    pub identifier: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub columns: BTreeMap<String, ColumnDefinition>,
}

impl ManifestSource {
    /// Physical location of the source table
    pub fn table_ref(&self) -> TableRef {
        TableRef {
            database: self.database.clone(),
            schema: self.schema.clone(),
            name: self.identifier.clone().unwrap_or_else(|| self.name.clone()),
        }
    }
}

/// Manifest parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse manifest JSON: {0}")]
    ParseError(String),

    #[error("Invalid dependency graph: {0}")]
    Graph(#[from] DagError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "metadata": {"dbt_version": "1.7.0"},
        "nodes": {
            "model.shop.orders": {
                "unique_id": "model.shop.orders",
                "name": "orders",
                "resource_type": "model",
                "schema": "analytics",
                "compiled_code": "select * from raw.orders",
                "depends_on": {"nodes": ["source.shop.raw.orders"]}
            },
            "model.shop.order_totals": {
                "unique_id": "model.shop.order_totals",
                "name": "order_totals",
                "resource_type": "model",
                "alias": "totals",
                "raw_code": "select id from {{ ref('orders') }}",
                "depends_on": {"nodes": ["model.shop.orders"]}
            },
            "test.shop.not_null": {
                "unique_id": "test.shop.not_null",
                "name": "not_null",
                "resource_type": "test",
                "depends_on": {"nodes": ["model.shop.orders"]}
            }
        },
        "sources": {
            "source.shop.raw.orders": {
                "unique_id": "source.shop.raw.orders",
                "source_name": "raw",
                "name": "orders",
                "schema": "raw",
                "columns": {"id": {"name": "id", "data_type": "int"}}
            }
        }
    }"#;

    #[test]
    fn parse_minimal_manifest() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.metadata.dbt_version, "1.7.0");
        assert_eq!(manifest.models().len(), 2);

        let orders = manifest.get_node("model.shop.orders").unwrap();
        assert_eq!(orders.sql(), Some("select * from raw.orders"));
        assert_eq!(orders.table_ref().fqn(), "analytics.orders");

        let totals = manifest.get_node("model.shop.order_totals").unwrap();
        assert_eq!(totals.table_ref().name, "totals");

        let source = manifest.get_source("source.shop.raw.orders").unwrap();
        assert_eq!(source.table_ref().fqn(), "raw.orders");
    }

    #[test]
    fn dependency_graph_skips_tests() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let dag = manifest.dependency_graph().unwrap();

        assert_eq!(dag.len(), 3);
        assert!(!dag.contains(&"test.shop.not_null".to_string()));
        assert_eq!(
            dag.topological_sort(),
            vec![
                "source.shop.raw.orders".to_string(),
                "model.shop.orders".to_string(),
                "model.shop.order_totals".to_string(),
            ]
        );
    }

    #[test]
    fn invalid_json_is_a_parse_error() {
        assert!(matches!(
            Manifest::from_json("{not json"),
            Err(ManifestError::ParseError(_))
        ));
    }
}
