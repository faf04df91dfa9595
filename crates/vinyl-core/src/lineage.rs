//! Lineage output schema
//!
//! Field names (`asset_id`, `assets`, `asset_links`, `columns`,
//! `column_links`) are a STABLE contract. Consumers key off them.

use crate::error::VinylError;
use crate::schema::TableRef;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Extracts the bare table name from an asset URN
static MODEL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",[^,]+\.([^,]+),[^)]+\)$").expect("valid URN regex"));

/// Asset URN for a table on a platform
pub fn dataset_urn(platform: &str, table: &TableRef) -> String {
    format!(
        "urn:li:dataset:(urn:li:dataPlatform:{},{},PROD)",
        platform,
        table.fqn()
    )
}

/// Column URN within an asset
pub fn field_urn(asset_urn: &str, column: &str) -> String {
    format!("urn:li:SchemaField:({},{})", asset_urn, column)
}

/// Bare model/table name of an asset URN
pub fn model_name_from_urn(urn: &str) -> Option<&str> {
    MODEL_NAME_RE
        .captures(urn)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Stable link identifier
pub fn link_id(source_id: &str, target_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"|");
    hasher.update(target_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// What kind of node an asset stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Source,
    Model,
}

/// Whether a column flows through unchanged or is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Direct,
    Derived,
}

/// Lineage mode a link belongs to
///
/// `Direct` links show up in every mode; `All` links only when the full
/// lineage is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineageType {
    All,
    Direct,
}

/// A table-level node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset URN
    pub id: String,

    /// Display name
    pub name: String,

    /// Project node the asset was compiled from
    pub node_id: String,

    pub kind: AssetKind,

    /// Errors recorded while compiling or tracing this asset
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<VinylError>,
}

impl Asset {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A table-level edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetLink {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
}

/// A column node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageColumn {
    /// Column URN
    pub id: String,

    /// Owning asset URN
    pub asset_id: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

/// A column-level edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLink {
    pub id: String,
    pub source_id: String,
    pub target_id: String,

    /// Direct copy or derived computation
    pub ntype: LinkKind,

    /// How the target was produced (`identity`, `rename`, `aggregate`, ...)
    pub how: String,

    pub lineage_type: LineageType,
}

/// Lineage validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineageError {
    #[error("Asset link {link} references unknown asset {asset}")]
    DanglingAssetLink { link: String, asset: String },

    #[error("Column link {link} references unknown column {column}")]
    DanglingColumnLink { link: String, column: String },

    #[error("Root asset {0} is not among the assets")]
    MissingRoot(String),
}

/// Lineage output aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    /// Root asset, once resolved
    pub asset_id: Option<String>,

    pub assets: Vec<Asset>,
    pub asset_links: Vec<AssetLink>,
    pub columns: Vec<LineageColumn>,
    pub column_links: Vec<ColumnLink>,

    /// Timestamp (ISO 8601)
    pub generated_at: String,
}

impl Default for Lineage {
    fn default() -> Self {
        Self::new()
    }
}

impl Lineage {
    pub fn new() -> Self {
        Self {
            asset_id: None,
            assets: Vec::new(),
            asset_links: Vec::new(),
            columns: Vec::new(),
            column_links: Vec::new(),
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn asset(&self, id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.id == id)
    }

    pub fn asset_mut(&mut self, id: &str) -> Option<&mut Asset> {
        self.assets.iter_mut().find(|a| a.id == id)
    }

    /// Asset compiled from a project node
    pub fn asset_for_node(&self, node_id: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.node_id == node_id)
    }

    pub fn column(&self, id: &str) -> Option<&LineageColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Add an asset unless one with the same id exists
    pub fn add_asset(&mut self, asset: Asset) {
        if self.asset(&asset.id).is_none() {
            self.assets.push(asset);
        }
    }

    /// Add a column unless one with the same id exists
    pub fn add_column(&mut self, column: LineageColumn) {
        if self.column(&column.id).is_none() {
            self.columns.push(column);
        }
    }

    /// Add a table-level edge, ignoring duplicates
    pub fn add_asset_link(&mut self, source_id: &str, target_id: &str) {
        let id = link_id(source_id, target_id);
        if !self.asset_links.iter().any(|l| l.id == id) {
            self.asset_links.push(AssetLink {
                id,
                source_id: source_id.to_string(),
                target_id: target_id.to_string(),
            });
        }
    }

    /// Add a column-level edge, ignoring duplicates
    pub fn add_column_link(&mut self, source_id: &str, target_id: &str, ntype: LinkKind, how: &str) {
        let id = link_id(source_id, target_id);
        if self.column_links.iter().any(|l| l.id == id) {
            return;
        }

        let lineage_type = match ntype {
            LinkKind::Direct => LineageType::Direct,
            LinkKind::Derived => LineageType::All,
        };
        self.column_links.push(ColumnLink {
            id,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            ntype,
            how: how.to_string(),
            lineage_type,
        });
    }

    /// Column links ending at a column
    pub fn links_into(&self, column_id: &str) -> Vec<&ColumnLink> {
        self.column_links
            .iter()
            .filter(|l| l.target_id == column_id)
            .collect()
    }

    /// Copy restricted to one lineage mode
    pub fn restrict(&self, mode: LineageType) -> Lineage {
        let mut out = self.clone();
        if mode == LineageType::Direct {
            out.column_links.retain(|l| l.lineage_type == LineageType::Direct);
        }
        out
    }

    /// Check that every link endpoint and the root are known
    pub fn validate(&self) -> Result<(), LineageError> {
        let assets: HashSet<&str> = self.assets.iter().map(|a| a.id.as_str()).collect();
        for link in &self.asset_links {
            for end in [&link.source_id, &link.target_id] {
                if !assets.contains(end.as_str()) {
                    return Err(LineageError::DanglingAssetLink {
                        link: link.id.clone(),
                        asset: end.clone(),
                    });
                }
            }
        }

        let columns: HashSet<&str> = self.columns.iter().map(|c| c.id.as_str()).collect();
        for link in &self.column_links {
            for end in [&link.source_id, &link.target_id] {
                if !columns.contains(end.as_str()) {
                    return Err(LineageError::DanglingColumnLink {
                        link: link.id.clone(),
                        column: end.clone(),
                    });
                }
            }
        }

        match &self.asset_id {
            Some(root) if !assets.contains(root.as_str()) => {
                Err(LineageError::MissingRoot(root.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Total number of errors across assets
    pub fn error_count(&self) -> usize {
        self.assets.iter().map(|a| a.errors.len()).sum()
    }

    /// Render the table-level graph as a text tree
    pub fn to_ascii(&self) -> String {
        let display = |id: &str| model_name_from_urn(id).unwrap_or(id).to_string();
        let edges: Vec<(String, String)> = self
            .asset_links
            .iter()
            .map(|l| (display(&l.source_id), display(&l.target_id)))
            .collect();
        lineage_ascii(&edges)
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Render an edge set as a tree, one block per root
///
/// Roots are nodes that never appear as an edge target. Siblings are sorted
/// by name, so the output does not depend on edge order.
pub fn lineage_ascii(edges: &[(String, String)]) -> String {
    let mut adjacency: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (source, target) in edges {
        adjacency.entry(source.as_str()).or_default().insert(target.as_str());
        adjacency.entry(target.as_str()).or_default();
    }

    let targets: BTreeSet<&str> = adjacency.values().flatten().copied().collect();
    let roots: Vec<&str> = adjacency
        .keys()
        .copied()
        .filter(|n| !targets.contains(n))
        .collect();

    let mut out = String::new();
    for root in roots {
        out.push_str(root);
        out.push('\n');
        let mut path = vec![root];
        render_children(&adjacency, root, "", &mut path, &mut out);
    }
    out
}

fn render_children<'a>(
    adjacency: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    node: &'a str,
    prefix: &str,
    path: &mut Vec<&'a str>,
    out: &mut String,
) {
    let Some(children) = adjacency.get(node) else {
        return;
    };

    let count = children.len();
    for (i, &child) in children.iter().enumerate() {
        let last = i + 1 == count;
        out.push_str(prefix);
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(child);
        out.push('\n');

        if path.contains(&child) {
            continue;
        }
        path.push(child);
        let next_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
        render_children(adjacency, child, &next_prefix, path, out);
        path.pop();
    }
}
