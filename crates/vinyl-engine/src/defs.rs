//! Model and metric declarations
//!
//! A project declares sources, models and metrics with [`DefsBuilder`].
//! Dependencies are named when a model is declared and resolved when the
//! builder is finished, so declarations may come in any order.

use crate::field::RegistryError;
use crate::relation::Relation;
use crate::source::SourceError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use vinyl_core::{Dag, DagError, Dialect, Schema, TableRef, VinylConfig, VinylError, VinylErrorType};

/// Body of a function model or metric
pub type ModelFn = Arc<dyn Fn(&ModelInputs) -> anyhow::Result<Relation> + Send + Sync>;

/// What a declared node is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Source,
    Model,

    /// Query-time layer that is never materialized
    Metric,
}

impl NodeKind {
    fn segment(&self) -> &'static str {
        match self {
            NodeKind::Source => "sources",
            NodeKind::Model => "models",
            NodeKind::Metric => "metrics",
        }
    }
}

/// How a node produces its relation
#[derive(Clone)]
pub enum NodeBody {
    Source(Relation),
    Function(ModelFn),
    Sql {
        sql: String,
        dialect: Dialect,

        /// Schema known ahead of compilation, e.g. from a warehouse catalog
        declared_schema: Option<Schema>,
    },
}

impl fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeBody::Source(relation) => f.debug_tuple("Source").field(relation).finish(),
            NodeBody::Function(_) => f.write_str("Function(..)"),
            NodeBody::Sql { sql, dialect, .. } => f
                .debug_struct("Sql")
                .field("sql", sql)
                .field("dialect", dialect)
                .finish(),
        }
    }
}

/// A declared node
#[derive(Debug, Clone)]
pub struct NodeDef {
    /// `<project>.<sources|models|metrics>.<name>`
    pub id: String,
    pub name: String,
    pub kind: NodeKind,

    /// Ids of direct dependencies, in declaration order
    pub deps: Vec<String>,
    pub body: NodeBody,

    /// Table the node is materialized as (or reads, for sources)
    pub table: TableRef,
    pub platform: String,
}

/// Declaration errors
#[derive(Debug, thiserror::Error)]
pub enum DefsError {
    #[error("Node declared twice: {0}")]
    Duplicate(String),

    #[error("{node} depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    #[error("{node} depends on '{dependency}', which matches {candidates}")]
    AmbiguousDependency {
        node: String,
        dependency: String,
        candidates: String,
    },

    #[error("Source {0} is not a physical table")]
    NotATable(String),

    #[error("{}", .0.msg)]
    Cycle(VinylError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

const DEFAULT_SCHEMA: &str = "main";

struct Pending {
    def: NodeDef,
    deps: Vec<String>,
}

/// Collects declarations for one project
pub struct DefsBuilder {
    project: String,
    platform: String,
    database: Option<String>,
    schema: Option<String>,
    pending: Vec<Pending>,
}

impl DefsBuilder {
    /// Models land in the configured `database.schema`, defaulting to the
    /// project name and `main`
    pub fn new(project: impl Into<String>, config: &VinylConfig) -> Self {
        let project = project.into();
        Self {
            platform: config.platform.clone(),
            database: config.database.clone().or_else(|| Some(project.clone())),
            schema: config.schema.clone().or_else(|| Some(DEFAULT_SCHEMA.to_string())),
            project,
            pending: Vec::new(),
        }
    }

    fn id(&self, kind: NodeKind, name: &str) -> String {
        format!("{}.{}.{}", self.project, kind.segment(), name)
    }

    fn model_table(&self, name: &str) -> TableRef {
        TableRef::new(self.database.clone(), self.schema.clone(), name)
    }

    fn push(mut self, def: NodeDef, deps: Vec<String>) -> Self {
        self.pending.push(Pending { def, deps });
        self
    }

    /// Declare a source over a base relation
    pub fn source(self, name: impl Into<String>, relation: Relation) -> Result<Self, DefsError> {
        let name = name.into();
        let (table, platform) = relation
            .base_table()
            .map(|(table, platform)| (table.clone(), platform.to_string()))
            .ok_or_else(|| DefsError::NotATable(name.clone()))?;

        let def = NodeDef {
            id: self.id(NodeKind::Source, &name),
            name,
            kind: NodeKind::Source,
            deps: Vec::new(),
            body: NodeBody::Source(relation),
            table,
            platform,
        };
        Ok(self.push(def, Vec::new()))
    }

    /// Declare a model computed by a function of its dependencies
    ///
    /// Dependencies are node ids or unique node names.
    pub fn model<F>(self, name: impl Into<String>, deps: &[&str], f: F) -> Self
    where
        F: Fn(&ModelInputs) -> anyhow::Result<Relation> + Send + Sync + 'static,
    {
        self.function(NodeKind::Model, name.into(), deps, Arc::new(f))
    }

    /// Declare a metric, a model that is never materialized
    pub fn metric<F>(self, name: impl Into<String>, deps: &[&str], f: F) -> Self
    where
        F: Fn(&ModelInputs) -> anyhow::Result<Relation> + Send + Sync + 'static,
    {
        self.function(NodeKind::Metric, name.into(), deps, Arc::new(f))
    }

    fn function(self, kind: NodeKind, name: String, deps: &[&str], body: ModelFn) -> Self {
        let def = NodeDef {
            id: self.id(kind, &name),
            table: self.model_table(&name),
            platform: self.platform.clone(),
            name,
            kind,
            deps: Vec::new(),
            body: NodeBody::Function(body),
        };
        let deps = deps.iter().map(|d| d.to_string()).collect();
        self.push(def, deps)
    }

    /// Declare a model whose body is a SQL query
    pub fn sql_model(
        self,
        name: impl Into<String>,
        deps: &[&str],
        sql: impl Into<String>,
        dialect: Dialect,
        declared_schema: Option<Schema>,
    ) -> Self {
        let name = name.into();
        let table = self.model_table(&name);
        self.sql_model_at(name, table, deps, sql, dialect, declared_schema)
    }

    /// Like [`DefsBuilder::sql_model`] with an explicit physical table
    pub(crate) fn sql_model_at(
        self,
        name: String,
        table: TableRef,
        deps: &[&str],
        sql: impl Into<String>,
        dialect: Dialect,
        declared_schema: Option<Schema>,
    ) -> Self {
        let def = NodeDef {
            id: self.id(NodeKind::Model, &name),
            table,
            platform: self.platform.clone(),
            name,
            kind: NodeKind::Model,
            deps: Vec::new(),
            body: NodeBody::Sql {
                sql: sql.into(),
                dialect,
                declared_schema,
            },
        };
        let deps = deps.iter().map(|d| d.to_string()).collect();
        self.push(def, deps)
    }

    /// Resolve dependencies and build the graphs
    pub fn build(self) -> Result<Defs, DefsError> {
        let mut nodes: BTreeMap<String, NodeDef> = BTreeMap::new();
        let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut declared: Vec<(String, Vec<String>)> = Vec::new();

        for Pending { def, deps } in self.pending {
            if nodes.contains_key(&def.id) {
                return Err(DefsError::Duplicate(def.id));
            }
            by_name.entry(def.name.clone()).or_default().push(def.id.clone());
            declared.push((def.id.clone(), deps));
            nodes.insert(def.id.clone(), def);
        }

        let mut graph = Dag::new();
        for id in nodes.keys() {
            graph.add_node(id.clone());
        }

        for (id, deps) in declared {
            let mut resolved = Vec::with_capacity(deps.len());
            for dep in deps {
                let dep_id = if nodes.contains_key(&dep) {
                    dep
                } else {
                    match by_name.get(&dep).map(Vec::as_slice) {
                        Some([only]) => only.clone(),
                        Some(many) if !many.is_empty() => {
                            return Err(DefsError::AmbiguousDependency {
                                node: id,
                                dependency: dep,
                                candidates: many.join(", "),
                            })
                        }
                        _ => {
                            return Err(DefsError::UnknownDependency {
                                node: id,
                                dependency: dep,
                            })
                        }
                    }
                };

                graph.add_edge(dep_id.clone(), id.clone()).map_err(|e| cycle_error(&id, e))?;
                if !resolved.contains(&dep_id) {
                    resolved.push(dep_id);
                }
            }
            if let Some(def) = nodes.get_mut(&id) {
                def.deps = resolved;
            }
        }

        let metrics: Vec<String> = nodes
            .values()
            .filter(|n| n.kind == NodeKind::Metric)
            .map(|n| n.id.clone())
            .collect();
        let mut db_graph = graph.clone();
        db_graph.remove_nodes_and_reconnect(&metrics);

        info!(
            project = %self.project,
            nodes = nodes.len(),
            metrics = metrics.len(),
            "Loaded project definitions"
        );

        Ok(Defs {
            project: self.project,
            nodes,
            by_name,
            graph,
            db_graph: Arc::new(db_graph),
        })
    }
}

fn cycle_error(node: &str, error: DagError) -> DefsError {
    DefsError::Cycle(VinylError::new(node, VinylErrorType::Cycle, error.to_string()))
}

/// Every declaration of one project plus its dependency graphs
#[derive(Debug)]
pub struct Defs {
    project: String,
    nodes: BTreeMap<String, NodeDef>,
    by_name: BTreeMap<String, Vec<String>>,
    graph: Dag<String>,

    /// `graph` with metric nodes removed and their edges reconnected
    db_graph: Arc<Dag<String>>,
}

impl Defs {
    pub fn builder(project: impl Into<String>, config: &VinylConfig) -> DefsBuilder {
        DefsBuilder::new(project, config)
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NodeDef> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id of a node given its id or unique name
    pub fn resolve_id(&self, name_or_id: &str) -> Option<&str> {
        if let Some((id, _)) = self.nodes.get_key_value(name_or_id) {
            return Some(id);
        }
        match self.by_name.get(name_or_id).map(Vec::as_slice) {
            Some([only]) => Some(only.as_str()),
            _ => None,
        }
    }

    /// Dependency graph over every declared node
    pub fn graph(&self) -> &Dag<String> {
        &self.graph
    }

    /// Dependency graph used for compilation, without metrics
    pub fn db_graph(&self) -> &Arc<Dag<String>> {
        &self.db_graph
    }

    /// Ids of every node of a kind
    pub fn ids_of(&self, kind: NodeKind) -> BTreeSet<&str> {
        self.nodes
            .values()
            .filter(|n| n.kind == kind)
            .map(|n| n.id.as_str())
            .collect()
    }
}

/// Dependency relations handed to a model body
pub struct ModelInputs {
    node: String,
    inputs: BTreeMap<String, Relation>,
    names: BTreeMap<String, String>,
}

impl ModelInputs {
    pub(crate) fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            inputs: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, def: &NodeDef, relation: Relation) {
        self.names.insert(def.name.clone(), def.id.clone());
        self.inputs.insert(def.id.clone(), relation);
    }

    /// Dependency by node id or name
    pub fn get(&self, name_or_id: &str) -> anyhow::Result<&Relation> {
        let id = self
            .names
            .get(name_or_id)
            .map(String::as_str)
            .unwrap_or(name_or_id);
        match self.inputs.get(id) {
            Some(relation) => Ok(relation),
            None => {
                debug!(node = %self.node, dependency = name_or_id, "Dependency unavailable");
                anyhow::bail!("{}: dependency '{}' is unavailable", self.node, name_or_id)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Relation)> {
        self.inputs.iter().map(|(id, r)| (id.as_str(), r))
    }
}
