//! Vinyl engine - declaring, compiling and tracing data projects
//!
//! This crate implements:
//! - Declared tables with keys and foreign keys, and the relationship graph
//! - Lazy relations with automatic joins and null-filling set operations
//! - Source connectors and reproducible twin samples
//! - Model declarations and dependency resolution
//! - SQL compilation of every selected node, with per-node errors
//! - Column lineage stitched from the compiled project

pub mod column;
pub mod connector;
pub mod dbt;
pub mod defs;
pub mod exec;
pub mod expr;
pub mod field;
pub mod lineage;
pub mod project;
pub mod relation;
pub mod render;
pub mod set_ops;
pub mod source;
pub mod sqlast;
pub mod value;

pub use column::{lit, Col, SortKey};
pub use connector::{Connector, ConnectorError, CsvConnector, MemoryConnector, Resource};
pub use defs::{Defs, DefsBuilder, DefsError, ModelInputs, NodeBody, NodeDef, NodeKind};
pub use exec::ExecError;
pub use expr::{AggFn, BinaryOp, Expr, ScalarFn};
pub use field::{
    Field, FieldRef, ForeignKey, RegistryError, Relationship, SchemaRegistry, TableDecl,
};
pub use lineage::stitch_lineage;
pub use project::{Project, ProjectError, ResolveCache, Resolved};
pub use relation::{ConnectionFn, JoinHow, Relation, RelationError, SetOpKind};
pub use set_ops::{difference, intersect, join, union, JoinError, JoinOptions};
pub use source::{materialize_twin, source, DataAccess, SourceError};
pub use sqlast::{classify, SqlAstNode, SqlProject};
pub use value::{Batch, Value};
