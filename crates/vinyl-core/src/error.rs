//! Per-node error records
//!
//! IMPORTANT: the serialized `type` strings are a stable contract.
//! NEVER rename them - downstream consumers key off these values.

use serde::{Deserialize, Serialize};

/// Error taxonomy for compile and lineage failures
///
/// These names are STABLE. Add new variants, never rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VinylErrorType {
    /// A referenced file or artifact is missing
    #[serde(rename = "FileNotFoundError")]
    FileNotFound,

    /// The backing database refused or failed a request
    #[serde(rename = "DatabaseError")]
    Database,

    /// AST optimization failed
    #[serde(rename = "OptimizeError")]
    Optimize,

    /// SQL could not be parsed
    #[serde(rename = "ParseError")]
    Parse,

    /// The dependency graph contains a cycle
    #[serde(rename = "CycleError")]
    Cycle,

    /// A node produced nothing to compile
    #[serde(rename = "NoContentsError")]
    NoContents,

    /// Anything not covered above
    #[serde(rename = "MiscellaneousError")]
    Miscellaneous,

    /// Column lineage could not be derived
    #[serde(rename = "NoLineageError")]
    NoLineage,
}

impl VinylErrorType {
    /// Stable string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileNotFound => "FileNotFoundError",
            Self::Database => "DatabaseError",
            Self::Optimize => "OptimizeError",
            Self::Parse => "ParseError",
            Self::Cycle => "CycleError",
            Self::NoContents => "NoContentsError",
            Self::Miscellaneous => "MiscellaneousError",
            Self::NoLineage => "NoLineageError",
        }
    }
}

impl std::fmt::Display for VinylErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tagged error attached to one compiled node
///
/// Collected on the owning node during batch compilation instead of
/// unwinding the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VinylError {
    /// Node the error belongs to
    pub node_id: String,

    /// Upstream node that caused it, if any
    pub source_id: Option<String>,

    /// Error category
    #[serde(rename = "type")]
    pub error_type: VinylErrorType,

    /// Human-readable message
    pub msg: String,

    /// Chain of underlying causes
    pub traceback: Option<String>,

    /// SQL dialect in effect
    pub dialect: Option<String>,

    /// Free-form structured context
    pub context: Option<serde_json::Value>,
}

impl VinylError {
    /// Create a new error with minimal fields
    pub fn new(node_id: impl Into<String>, error_type: VinylErrorType, msg: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            source_id: None,
            error_type,
            msg: msg.into(),
            traceback: None,
            dialect: None,
            context: None,
        }
    }

    /// Set the upstream node
    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Set the traceback
    pub fn with_traceback(mut self, traceback: impl Into<String>) -> Self {
        self.traceback = Some(traceback.into());
        self
    }

    /// Set the dialect
    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = Some(dialect.into());
        self
    }

    /// Set structured context
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Key used to drop duplicate records on one node
    pub fn dedup_key(&self) -> (VinylErrorType, Option<&str>, &str) {
        (self.error_type, self.source_id.as_deref(), self.msg.as_str())
    }

    /// Serialize to a JSON object
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "node_id": self.node_id,
            "source_id": self.source_id,
            "type": self.error_type.as_str(),
            "msg": self.msg,
            "traceback": self.traceback,
            "dialect": self.dialect,
            "context": self.context,
        })
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl std::fmt::Display for VinylError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.error_type, self.node_id, self.msg)
    }
}

impl std::error::Error for VinylError {}

/// Append an error unless an identical one is already recorded
pub fn push_unique(errors: &mut Vec<VinylError>, error: VinylError) {
    if !errors.iter().any(|e| e.dedup_key() == error.dedup_key()) {
        errors.push(error);
    }
}
