//! Project: node selection, dependency resolution and SQL compilation

use crate::connector::ConnectorError;
use crate::defs::{Defs, ModelInputs, NodeBody, NodeDef, NodeKind};
use crate::relation::{ConnectionFn, Relation};
use crate::sqlast::{classify, SqlProject};
use sqlparser::ast::Query;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};
use vinyl_core::{Dialect, LogicalType, Schema, VinylConfig, VinylErrorType};
use vinyl_sql::{InferenceContext, SchemaInference, SqlParser};

/// A resolved node
#[derive(Debug, Clone)]
pub enum Resolved {
    Relation(Relation),

    /// A SQL-bodied model, parsed but not executable
    Sql { query: Query, schema: Schema },
}

impl Resolved {
    pub fn schema(&self) -> &Schema {
        match self {
            Resolved::Relation(relation) => relation.schema(),
            Resolved::Sql { schema, .. } => schema,
        }
    }

    /// SQL AST of the node in a dialect
    pub fn to_query(&self, dialect: Dialect) -> anyhow::Result<Query> {
        match self {
            Resolved::Relation(relation) => Ok(relation.to_sql_ast(dialect)?),
            Resolved::Sql { query, .. } => Ok(query.clone()),
        }
    }
}

/// A failure replayed from the resolution cache
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ResolveError {
    pub error_type: VinylErrorType,
    pub message: String,
}

/// Resolution results of one compile pass
#[derive(Debug, Default)]
pub struct ResolveCache {
    entries: HashMap<String, Result<Resolved, ResolveError>>,
}

impl ResolveCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Project errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),
}

/// A loaded project
#[derive(Debug, Clone)]
pub struct Project {
    defs: Arc<Defs>,
    config: Arc<VinylConfig>,
}

impl Project {
    pub fn new(defs: Defs, config: VinylConfig) -> Self {
        Self {
            defs: Arc::new(defs),
            config: Arc::new(config),
        }
    }

    pub fn defs(&self) -> &Defs {
        &self.defs
    }

    pub fn config(&self) -> &VinylConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Derived nodes to compile, in dependency order
    ///
    /// With no ids every model is selected. Otherwise the ids plus their
    /// ancestors and descendants, bounded by the given depths. Sources are
    /// never selected. A metric id stands for the models it reads.
    pub fn select_lineage_nodes(
        &self,
        ids: &[&str],
        predecessor_depth: Option<usize>,
        successor_depth: Option<usize>,
    ) -> Result<Vec<String>, ProjectError> {
        let db_graph = self.defs.db_graph();

        let selected = if ids.is_empty() {
            None
        } else {
            let mut seeds = BTreeSet::new();
            for id in ids {
                let def = self
                    .defs
                    .resolve_id(id)
                    .and_then(|id| self.defs.node(id))
                    .ok_or_else(|| ProjectError::UnknownNode(id.to_string()))?;
                if def.kind == NodeKind::Metric {
                    seeds.extend(
                        self.defs
                            .graph()
                            .get_relatives([def.id.clone()], true, None)
                            .into_iter()
                            .filter(|n| db_graph.contains(n)),
                    );
                } else {
                    seeds.insert(def.id.clone());
                }
            }
            Some(db_graph.get_ancestors_and_descendants(seeds, predecessor_depth, successor_depth))
        };

        Ok(db_graph
            .topological_sort()
            .into_iter()
            .filter(|id| selected.as_ref().map_or(true, |s| s.contains(id)))
            .filter(|id| {
                self.defs
                    .node(id)
                    .is_some_and(|n| n.kind != NodeKind::Source)
            })
            .collect())
    }

    /// Resolve a node to its relation or parsed SQL
    ///
    /// `id` may be a full node id or an unambiguous bare name. Dependencies
    /// that fail are left out of the node's inputs. Pass a cache to share
    /// results across calls.
    pub fn resolve(&self, id: &str, cache: Option<&mut ResolveCache>) -> anyhow::Result<Resolved> {
        let id = self
            .defs
            .resolve_id(id)
            .ok_or_else(|| ProjectError::UnknownNode(id.to_string()))?;
        match cache {
            Some(cache) => self.resolve_cached(id, cache),
            None => self.resolve_cached(id, &mut ResolveCache::default()),
        }
    }

    pub(crate) fn resolve_cached(
        &self,
        id: &str,
        cache: &mut ResolveCache,
    ) -> anyhow::Result<Resolved> {
        if let Some(hit) = cache.entries.get(id) {
            return hit.clone().map_err(anyhow::Error::from);
        }

        let result = self.resolve_uncached(id, cache);
        let entry = match &result {
            Ok(resolved) => Ok(resolved.clone()),
            Err(e) => Err(ResolveError {
                error_type: classify(e),
                message: format!("{:#}", e),
            }),
        };
        cache.entries.insert(id.to_string(), entry);
        result
    }

    fn resolve_uncached(&self, id: &str, cache: &mut ResolveCache) -> anyhow::Result<Resolved> {
        let def = self
            .defs
            .node(id)
            .ok_or_else(|| ProjectError::UnknownNode(id.to_string()))?;

        let (deps, failures) = self.resolve_deps(def, cache);
        for (dep, error) in &failures {
            debug!(
                node = id,
                dependency = %dep,
                error = %format!("{:#}", error),
                "Omitting failed dependency"
            );
        }
        self.build(def, &deps)
    }

    /// Direct dependencies of a node, split into resolved and failed
    pub(crate) fn resolve_deps(
        &self,
        def: &NodeDef,
        cache: &mut ResolveCache,
    ) -> (Vec<(String, Resolved)>, Vec<(String, anyhow::Error)>) {
        let mut resolved = Vec::new();
        let mut failed = Vec::new();
        for dep in &def.deps {
            match self.resolve_cached(dep, cache) {
                Ok(r) => resolved.push((dep.clone(), r)),
                Err(e) => failed.push((dep.clone(), e)),
            }
        }
        (resolved, failed)
    }

    fn build(&self, def: &NodeDef, deps: &[(String, Resolved)]) -> anyhow::Result<Resolved> {
        debug!(node = %def.id, deps = deps.len(), "Building node");
        match &def.body {
            NodeBody::Source(relation) => Ok(Resolved::Relation(relation.clone())),

            NodeBody::Function(body) => {
                let mut inputs = ModelInputs::new(&def.id);
                for (dep_id, resolved) in deps {
                    if let Some(dep) = self.defs.node(dep_id) {
                        inputs.insert(dep, input_relation(dep, resolved));
                    }
                }
                let relation = body(&inputs)?;
                if relation.schema().is_empty() {
                    return Err(ResolveError {
                        error_type: VinylErrorType::NoContents,
                        message: format!("{} produced no columns", def.id),
                    }
                    .into());
                }
                Ok(Resolved::Relation(relation))
            }

            NodeBody::Sql {
                sql,
                dialect,
                declared_schema,
            } => {
                if sql.trim().is_empty() {
                    return Err(ResolveError {
                        error_type: VinylErrorType::NoContents,
                        message: format!("{} has no SQL", def.id),
                    }
                    .into());
                }

                let query = SqlParser::from_dialect(*dialect).parse_query(sql)?;
                let context = self.inference_context(deps);
                let schema = match SchemaInference::new(&context).infer_query(&query) {
                    Ok(inferred) => with_declared_types(inferred, declared_schema.as_ref()),
                    Err(e) => match declared_schema {
                        Some(declared) => {
                            debug!(node = %def.id, error = %e, "Using declared schema");
                            declared.clone()
                        }
                        None => return Err(e.into()),
                    },
                };
                Ok(Resolved::Sql { query, schema })
            }
        }
    }

    fn inference_context(&self, deps: &[(String, Resolved)]) -> InferenceContext {
        let mut context = InferenceContext::new();
        for (dep_id, resolved) in deps {
            if let Some(dep) = self.defs.node(dep_id) {
                context.add_dependency(dep_id.clone(), reference_names(dep), resolved.schema().clone());
            }
        }
        context
    }

    /// Compile the selected nodes to SQL ASTs
    ///
    /// Failures are recorded on the node they occur in and never abort the
    /// pass. With `parallel` the nodes compile on a dedicated runtime, so
    /// this must not be called from async code; use
    /// [`SqlProject::compile_parallel`] there.
    pub fn get_sql_project(
        &self,
        ids: &[&str],
        predecessor_depth: Option<usize>,
        successor_depth: Option<usize>,
        parallel: bool,
    ) -> Result<SqlProject, ProjectError> {
        let selected = self.select_lineage_nodes(ids, predecessor_depth, successor_depth)?;
        info!(nodes = selected.len(), parallel, "Compiling SQL project");

        let mut sql_project = if parallel {
            match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
                Ok(runtime) => runtime.block_on(SqlProject::compile_parallel(self.clone(), selected)),
                Err(e) => {
                    warn!(error = %e, "Could not start compile workers, compiling sequentially");
                    SqlProject::compile(self, selected)
                }
            }
        } else {
            SqlProject::compile(self, selected)
        };

        sql_project.optimize();
        info!(
            nodes = sql_project.len(),
            errors = sql_project.errors().len(),
            "Compiled SQL project"
        );
        Ok(sql_project)
    }
}

/// Names a node's table can be referenced by in SQL
pub(crate) fn reference_names(def: &NodeDef) -> Vec<String> {
    let mut names = vec![def.table.fqn(), def.table.name.clone(), def.name.clone(), def.id.clone()];
    names.dedup();
    names
}

/// Relation a dependency contributes to a model body
///
/// Sources and metrics are used as they are. Models are replaced by a
/// placeholder over their table that keeps their schema and provenance, so
/// the compiled SQL reads the upstream table instead of inlining it.
fn input_relation(dep: &NodeDef, resolved: &Resolved) -> Relation {
    match (dep.kind, resolved) {
        (NodeKind::Source | NodeKind::Metric, Resolved::Relation(relation)) => relation.clone(),

        (NodeKind::Model, Resolved::Relation(upstream)) => {
            let origins = upstream
                .columns()
                .into_iter()
                .filter_map(|c| upstream.column_origin(c).map(|o| (c.to_string(), o)))
                .collect();

            let source = upstream.clone();
            let dep_id = dep.id.clone();
            let connection: Arc<ConnectionFn> = Arc::new(move || {
                source.execute().map_err(|e| ConnectorError::Connect {
                    resource: dep_id.clone(),
                    message: e.to_string(),
                })
            });

            let placeholder = Relation::placeholder(
                &dep.id,
                dep.table.clone(),
                &dep.platform,
                upstream.schema().clone(),
                origins,
                Some(connection),
            );
            match upstream.registry() {
                Some(registry) => placeholder.with_registry(registry.clone()),
                None => placeholder,
            }
        }

        (_, Resolved::Sql { schema, .. }) => Relation::placeholder(
            &dep.id,
            dep.table.clone(),
            &dep.platform,
            schema.clone(),
            BTreeMap::new(),
            None,
        ),
    }
}

/// Fill types inference could not determine from a declared schema
fn with_declared_types(mut inferred: Schema, declared: Option<&Schema>) -> Schema {
    let Some(declared) = declared else {
        return inferred;
    };
    for column in &mut inferred.columns {
        if column.logical_type == LogicalType::Unknown {
            if let Some(known) = declared.find_column(&column.name) {
                column.logical_type = known.logical_type.clone();
            }
        }
    }
    inferred
}
