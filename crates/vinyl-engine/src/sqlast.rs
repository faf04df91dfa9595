//! SQL AST compilation
//!
//! Each selected node compiles to an [`SqlAstNode`]: its dialect AST, output
//! schema and the schemas of the tables it reads. Errors are collected on
//! the node they belong to, so one broken model never stops the rest of the
//! project from compiling.

use crate::defs::{NodeBody, NodeDef, NodeKind};
use crate::project::{Project, ResolveCache, ResolveError};
use sqlparser::ast::Query;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vinyl_core::{push_unique, Dag, Dialect, Schema, TableRef, VinylError, VinylErrorType};
use vinyl_sql::{expand_wildcards, InferenceContext, OptimizeError, ParseError};

/// Error type of a failure raised while resolving or compiling a node
pub fn classify(error: &anyhow::Error) -> VinylErrorType {
    if let Some(replayed) = error.downcast_ref::<ResolveError>() {
        replayed.error_type
    } else if error.downcast_ref::<ParseError>().is_some() {
        VinylErrorType::Parse
    } else if error.downcast_ref::<OptimizeError>().is_some() {
        VinylErrorType::Optimize
    } else {
        VinylErrorType::Miscellaneous
    }
}

/// Physical table behind a dependency
#[derive(Debug, Clone, PartialEq)]
pub struct DepTable {
    pub name: String,
    pub table: TableRef,
    pub platform: String,
    pub kind: NodeKind,
}

impl DepTable {
    fn from_def(def: &NodeDef) -> Self {
        Self {
            name: def.name.clone(),
            table: def.table.clone(),
            platform: def.platform.clone(),
            kind: def.kind,
        }
    }
}

/// One compiled node
#[derive(Debug, Clone)]
pub struct SqlAstNode {
    pub id: String,
    pub kind: NodeKind,

    /// Compiled AST, after optimization once the project is optimized
    pub ast: Option<Query>,

    /// AST as compiled, before optimization
    pub original_ast: Option<Query>,
    pub schema: Option<Schema>,
    pub dialect: Dialect,
    pub table: TableRef,
    pub platform: String,

    /// Direct dependencies in the compilation graph
    pub deps: Vec<String>,
    pub dep_schemas: BTreeMap<String, Schema>,
    pub dep_tables: BTreeMap<String, DepTable>,
    pub errors: Vec<VinylError>,
}

impl SqlAstNode {
    fn new(id: &str, kind: NodeKind, table: TableRef, platform: String, dialect: Dialect) -> Self {
        Self {
            id: id.to_string(),
            kind,
            ast: None,
            original_ast: None,
            schema: None,
            dialect,
            table,
            platform,
            deps: Vec::new(),
            dep_schemas: BTreeMap::new(),
            dep_tables: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    fn failed(id: &str, error_type: VinylErrorType, msg: String, dialect: Dialect) -> Self {
        let mut node = Self::new(id, NodeKind::Model, TableRef::named(id), String::new(), dialect);
        node.record(VinylError::new(id, error_type, msg));
        node
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Compiled SQL text
    pub fn sql(&self) -> Option<String> {
        self.ast.as_ref().map(|q| q.to_string())
    }

    fn record(&mut self, error: VinylError) {
        let error = error.with_dialect(self.dialect.as_str());
        warn!(node = %self.id, kind = %error.error_type, source = ?error.source_id, "{}", error.msg);
        push_unique(&mut self.errors, error);
    }

    /// Dependency schemas under every name the AST may use for them
    pub fn inference_context(&self) -> InferenceContext {
        let mut context = InferenceContext::new();
        for (dep, schema) in &self.dep_schemas {
            let mut names = vec![dep.clone()];
            if let Some(table) = self.dep_tables.get(dep) {
                names.extend([table.table.fqn(), table.table.name.clone(), table.name.clone()]);
            }
            context.add_dependency(dep.clone(), names, schema.clone());
        }
        context
    }

    /// Expand wildcards, keeping the compiled AST in `original_ast`
    pub fn optimize(&mut self) {
        let Some(mut ast) = self.ast.take() else {
            return;
        };
        let original = ast.clone();
        let context = self.inference_context();

        match expand_wildcards(&mut ast, &context, self.dialect) {
            Ok(()) => self.ast = Some(ast),
            Err(e) => {
                self.ast = Some(original.clone());
                self.record(VinylError::new(&self.id, VinylErrorType::Optimize, e.to_string()));
            }
        }
        self.original_ast = Some(original);
    }
}

/// Compile one node
///
/// Dependencies that fail are recorded on this node with their id as the
/// source and left out of its inputs; the body is still compiled.
pub(crate) fn compile_node(
    project: &Project,
    id: &str,
    db_graph: &Dag<String>,
    cache: &mut ResolveCache,
) -> SqlAstNode {
    let dialect = project.dialect();
    let Some(def) = project.defs().node(id) else {
        let message = format!("Unknown node: {}", id);
        return SqlAstNode::failed(id, VinylErrorType::Miscellaneous, message, dialect);
    };
    let dialect = match &def.body {
        NodeBody::Sql { dialect, .. } => *dialect,
        _ => dialect,
    };

    debug!(node = id, "Compiling node");
    let mut node = SqlAstNode::new(id, def.kind, def.table.clone(), def.platform.clone(), dialect);
    node.deps = db_graph
        .parents(&id.to_string())
        .into_iter()
        .cloned()
        .collect();

    let (_, failures) = project.resolve_deps(def, cache);
    for (dep, error) in &failures {
        node.record(VinylError::new(id, classify(error), format!("{:#}", error)).with_source(dep));
    }

    for dep in &node.deps {
        let Some(dep_def) = project.defs().node(dep) else {
            continue;
        };
        match project.resolve_cached(dep, cache) {
            Ok(resolved) => {
                node.dep_schemas.insert(dep.clone(), resolved.schema().clone());
                node.dep_tables.insert(dep.clone(), DepTable::from_def(dep_def));
            }
            Err(e) => debug!(node = id, dependency = %dep, error = %e, "No schema for dependency"),
        }
    }

    let compiled = project
        .resolve_cached(id, cache)
        .and_then(|resolved| Ok((resolved.to_query(dialect)?, resolved.schema().clone())));
    match compiled {
        Ok((query, schema)) => {
            node.ast = Some(query);
            node.schema = Some(schema);
        }
        Err(e) => node.record(VinylError::new(id, classify(&e), format!("{:#}", e))),
    }

    node
}

/// Compiled nodes of a project
#[derive(Debug, Clone)]
pub struct SqlProject {
    nodes: BTreeMap<String, SqlAstNode>,
    order: Vec<String>,
    db_graph: Arc<Dag<String>>,
    dialect: Dialect,
}

impl SqlProject {
    /// Compile nodes one after another, sharing one resolution cache
    pub fn compile(project: &Project, ids: Vec<String>) -> Self {
        let db_graph = project.defs().db_graph().clone();
        let mut cache = ResolveCache::default();
        let nodes = ids
            .iter()
            .map(|id| (id.clone(), compile_node(project, id, &db_graph, &mut cache)))
            .collect();

        Self {
            nodes,
            order: ids,
            db_graph,
            dialect: project.dialect(),
        }
    }

    /// Compile every node on the blocking pool
    ///
    /// Workers share the read-only compilation graph and resolve their
    /// dependencies independently, writing only to their own node.
    pub async fn compile_parallel(project: Project, ids: Vec<String>) -> Self {
        let db_graph = project.defs().db_graph().clone();
        let dialect = project.dialect();

        let handles: Vec<_> = ids
            .iter()
            .map(|id| {
                let project = project.clone();
                let db_graph = db_graph.clone();
                let id = id.clone();
                tokio::task::spawn_blocking(move || {
                    compile_node(&project, &id, &db_graph, &mut ResolveCache::default())
                })
            })
            .collect();

        let mut nodes = BTreeMap::new();
        for (id, handle) in ids.iter().zip(handles) {
            let node = match handle.await {
                Ok(node) => node,
                Err(e) => SqlAstNode::failed(
                    id,
                    VinylErrorType::Miscellaneous,
                    format!("Compile worker failed: {}", e),
                    dialect,
                ),
            };
            nodes.insert(id.clone(), node);
        }

        Self {
            nodes,
            order: ids,
            db_graph,
            dialect,
        }
    }

    /// Expand wildcards in every compiled node
    pub fn optimize(&mut self) {
        for node in self.nodes.values_mut() {
            node.optimize();
        }
    }

    pub fn node(&self, id: &str) -> Option<&SqlAstNode> {
        self.nodes.get(id)
    }

    /// Nodes in dependency order
    pub fn nodes(&self) -> impl Iterator<Item = &SqlAstNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn db_graph(&self) -> &Arc<Dag<String>> {
        &self.db_graph
    }

    /// Every recorded error, in node order
    pub fn errors(&self) -> Vec<&VinylError> {
        self.nodes().flat_map(|n| n.errors.iter()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::DefsBuilder;
    use crate::relation::Relation;
    use vinyl_core::{Column, LogicalType, VinylConfig};

    fn project() -> Project {
        let config = VinylConfig::default();
        let orders = Relation::unbound(
            TableRef::new(Some("shop"), Some("raw"), "orders"),
            "postgres",
            None,
            Schema::from_columns(vec![
                Column::new("id", LogicalType::Int),
                Column::new("amount", LogicalType::Float),
            ]),
            None,
        );
        let defs = DefsBuilder::new("shop", &config)
            .source("orders", orders)
            .unwrap()
            .sql_model("all_orders", &["orders"], "SELECT * FROM shop.raw.orders", Dialect::Ansi, None)
            .sql_model("bad", &["orders"], "SELEC amount FROM orders", Dialect::Ansi, None)
            .build()
            .unwrap();
        Project::new(defs, config)
    }

    #[test]
    fn optimize_keeps_the_original_ast() {
        let project = project();
        let mut sql = SqlProject::compile(&project, vec!["shop.models.all_orders".to_string()]);
        sql.optimize();

        let node = sql.node("shop.models.all_orders").unwrap();
        assert!(node.errors.is_empty(), "{:?}", node.errors);
        assert_eq!(node.original_ast.as_ref().unwrap().to_string(), "SELECT * FROM shop.raw.orders");
        let expanded = node.sql().unwrap();
        assert!(expanded.contains("amount"), "{expanded}");
        assert_eq!(node.dep_tables["shop.sources.orders"].platform, "postgres");
    }

    #[test]
    fn parse_failures_stay_on_their_node() {
        let project = project();
        let sql = SqlProject::compile(
            &project,
            vec!["shop.models.all_orders".to_string(), "shop.models.bad".to_string()],
        );

        assert!(sql.node("shop.models.all_orders").unwrap().errors.is_empty());
        let bad = sql.node("shop.models.bad").unwrap();
        assert_eq!(bad.errors.len(), 1);
        assert_eq!(bad.errors[0].error_type, VinylErrorType::Parse);
        assert_eq!(bad.errors[0].dialect.as_deref(), Some("ansi"));
        assert!(bad.ast.is_none());
    }

    #[test]
    fn classify_downcasts_known_errors() {
        let parse = vinyl_sql::SqlParser::new().parse_query("SELEC 1").unwrap_err();
        assert_eq!(classify(&anyhow::Error::from(parse)), VinylErrorType::Parse);
        assert_eq!(classify(&anyhow::anyhow!("boom")), VinylErrorType::Miscellaneous);
    }
}
