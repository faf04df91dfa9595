//! dbt artifact parsing
//!
//! This crate handles:
//! - Parsing manifest.json and catalog.json (dbt-generated artifacts)
//! - Mapping warehouse data types to logical types
//! - Replacing `ref()`/`source()` blocks in raw model SQL
//! - Building the manifest dependency graph

pub mod catalog;
pub mod manifest;
pub mod refs;
pub mod types;

pub use catalog::{Catalog, CatalogColumn, CatalogTable, CatalogTableMetadata};
pub use manifest::{
    ColumnDefinition, DependsOn, Manifest, ManifestError, ManifestMetadata, ManifestNode,
    ManifestSource, NodeConfig,
};
pub use refs::{extract_references, render_references, DbtReference};
pub use types::parse_data_type;
