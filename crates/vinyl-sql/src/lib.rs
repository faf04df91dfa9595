//! SQL parsing and analysis
//!
//! This crate handles:
//! - Parsing SQL using datafusion-sqlparser-rs, per dialect
//! - Re-quoting identifiers and transpiling between dialects
//! - Schema inference from SQL queries
//! - Column tracing and unaltered-column detection
//! - Wildcard expansion before lineage

pub mod dialect;
pub mod inference;
pub mod optimize;
pub mod parser;
pub mod trace;

pub use dialect::{quote_identifiers, quoted_ident, sqlparser_dialect, transpile};
pub use inference::{
    sqlparser_type_to_logical, InferenceContext, InferenceError, SchemaInference, TableEntry,
};
pub use optimize::{expand_wildcards, OptimizeError};
pub use parser::{ParseError, ParsedSql, SqlParser};
pub use trace::{
    column_graph, find_unaltered_cols, is_unaltered, trace_query, ColumnOrigin, Lin, OpKind,
    OpNode, TraceError, TracedColumn,
};
