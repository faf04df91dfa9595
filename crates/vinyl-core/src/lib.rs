//! Vinyl Core
//!
//! Core domain model shared by every vinyl crate: types, errors,
//! configuration, the dependency graph and the lineage output schema.
//! Never rename error type strings or lineage field names - they are part
//! of the public API.

pub mod config;
pub mod dag;
pub mod error;
pub mod lineage;
pub mod schema;

pub use config::{ConfigError, DataAccessMode, Dialect, VinylConfig};
pub use dag::{Dag, DagError};
pub use error::{push_unique, VinylError, VinylErrorType};
pub use lineage::{
    dataset_urn, field_urn, lineage_ascii, link_id, model_name_from_urn, Asset, AssetKind,
    AssetLink, ColumnLink, Lineage, LineageColumn, LineageError, LineageType, LinkKind,
};
pub use schema::{Column, LogicalType, Nullability, Schema, TableRef};
