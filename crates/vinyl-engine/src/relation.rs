//! Relations
//!
//! A [`Relation`] is an immutable, typed relational expression. Every
//! transformation returns a new relation that shares its inputs; in-place
//! chains go through [`Relation::mutable`]. Data is only touched by
//! [`Relation::execute`], which resolves the lazy connections of the base
//! tables underneath.

use crate::column::{Col, SortKey};
use crate::connector::ConnectorError;
use crate::exec::{self, ExecError};
use crate::expr::Expr;
use crate::field::{FieldRef, SchemaRegistry};
use crate::render;
use crate::value::Batch;
use sqlparser::ast::Query;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use vinyl_core::{Column, Dialect, Schema, TableRef};
use vinyl_sql::{ParseError, SqlParser};

/// Zero-argument data loader for one base table
pub type ConnectionFn = dyn Fn() -> Result<Batch, ConnectorError> + Send + Sync;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

fn next_node_id() -> u64 {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Join kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinHow {
    Inner,
    Left,
    Right,
    Outer,
    Cross,
}

impl JoinHow {
    pub fn sql_keyword(&self) -> &'static str {
        match self {
            JoinHow::Inner => "INNER JOIN",
            JoinHow::Left => "LEFT JOIN",
            JoinHow::Right => "RIGHT JOIN",
            JoinHow::Outer => "FULL OUTER JOIN",
            JoinHow::Cross => "CROSS JOIN",
        }
    }
}

/// Set operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    Union,
    Difference,
    Intersect,
}

/// Operator of one node in a relation tree
#[derive(Debug, Clone)]
pub enum RelOp {
    /// A physical table, loaded through the relation's connections
    Unbound {
        table: TableRef,
        platform: String,

        /// Declared table name in the registry
        decl: Option<String>,
    },

    /// An upstream project node standing in for its compiled relation
    Placeholder {
        node_id: String,
        table: TableRef,
        platform: String,

        /// Declared column each output column passes through from
        origins: BTreeMap<String, FieldRef>,
    },

    Select {
        input: Arc<RelNode>,
        items: Vec<(String, Expr)>,
    },

    Filter {
        input: Arc<RelNode>,
        predicate: Expr,
    },

    Aggregate {
        input: Arc<RelNode>,
        by: Vec<(String, Expr)>,
        metrics: Vec<(String, Expr)>,
    },

    Sort {
        input: Arc<RelNode>,
        keys: Vec<SortKey>,
    },

    Limit {
        input: Arc<RelNode>,
        n: usize,
        offset: usize,
    },

    Distinct {
        input: Arc<RelNode>,
    },

    Join {
        left: Arc<RelNode>,
        right: Arc<RelNode>,
        on: Option<Expr>,
        how: JoinHow,

        /// Output names of the left and right columns, in input order
        left_names: Vec<String>,
        right_names: Vec<String>,
    },

    /// Inputs share one column layout
    SetOp {
        kind: SetOpKind,
        inputs: Vec<Arc<RelNode>>,
        distinct: bool,
    },
}

/// One node of a relation tree
#[derive(Debug)]
pub struct RelNode {
    pub id: u64,
    pub op: RelOp,
    pub schema: Schema,
}

impl RelNode {
    pub(crate) fn new(op: RelOp, schema: Schema) -> Self {
        Self {
            id: next_node_id(),
            op,
            schema,
        }
    }

    /// Whether this node reads a physical table or placeholder directly
    pub fn is_base(&self) -> bool {
        matches!(self.op, RelOp::Unbound { .. } | RelOp::Placeholder { .. })
    }

    /// Output name in this node of column `name` of node `id` below it
    ///
    /// Follows passthrough operators and join renames.
    pub fn resolve(&self, id: u64, name: &str) -> Option<String> {
        if self.id == id {
            return self.schema.contains(name).then(|| name.to_string());
        }

        match &self.op {
            RelOp::Filter { input, .. }
            | RelOp::Sort { input, .. }
            | RelOp::Limit { input, .. }
            | RelOp::Distinct { input } => input.resolve(id, name),
            RelOp::Select { input, items } => {
                let inner = input.resolve(id, name)?;
                items
                    .iter()
                    .find(|(_, expr)| expr.as_column() == Some(inner.as_str()))
                    .map(|(out, _)| out.clone())
            }
            RelOp::Join {
                left,
                right,
                left_names,
                right_names,
                ..
            } => {
                let side = |node: &RelNode, names: &[String]| {
                    let inner = node.resolve(id, name)?;
                    let index = node.schema.index_of(&inner)?;
                    names.get(index).cloned()
                };
                side(left, left_names).or_else(|| side(right, right_names))
            }
            _ => None,
        }
    }

    /// Declared column that output column `name` passes through from
    pub fn origin(&self, name: &str) -> Option<FieldRef> {
        match &self.op {
            RelOp::Unbound { decl, .. } => decl
                .as_ref()
                .filter(|_| self.schema.contains(name))
                .map(|table| FieldRef::new(table.clone(), name)),
            RelOp::Placeholder { origins, .. } => origins.get(name).cloned(),
            RelOp::Filter { input, .. }
            | RelOp::Sort { input, .. }
            | RelOp::Limit { input, .. }
            | RelOp::Distinct { input } => input.origin(name),
            RelOp::Select { input, items } => items
                .iter()
                .find(|(out, _)| out == name)
                .and_then(|(_, expr)| expr.as_column())
                .and_then(|inner| input.origin(inner)),
            RelOp::Aggregate { input, by, .. } => by
                .iter()
                .find(|(out, _)| out == name)
                .and_then(|(_, expr)| expr.as_column())
                .and_then(|inner| input.origin(inner)),
            RelOp::Join {
                left,
                right,
                left_names,
                right_names,
                ..
            } => {
                if let Some(index) = left_names.iter().position(|n| n == name) {
                    left.origin(&left.schema.columns[index].name)
                } else {
                    let index = right_names.iter().position(|n| n == name)?;
                    right.origin(&right.schema.columns[index].name)
                }
            }
            RelOp::SetOp { .. } => None,
        }
    }

    /// Whether node `id` is this node or sits below it
    pub fn contains(&self, id: u64) -> bool {
        if self.id == id {
            return true;
        }
        match &self.op {
            RelOp::Unbound { .. } | RelOp::Placeholder { .. } => false,
            RelOp::Select { input, .. }
            | RelOp::Filter { input, .. }
            | RelOp::Aggregate { input, .. }
            | RelOp::Sort { input, .. }
            | RelOp::Limit { input, .. }
            | RelOp::Distinct { input } => input.contains(id),
            RelOp::Join { left, right, .. } => left.contains(id) || right.contains(id),
            RelOp::SetOp { inputs, .. } => inputs.iter().any(|i| i.contains(id)),
        }
    }
}

/// Relation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RelationError {
    #[error("Unknown column '{column}' (available: {available})")]
    UnknownColumn { column: String, available: String },

    #[error("Duplicate output column: {0}")]
    DuplicateColumn(String),

    #[error("Aggregate not allowed here: {0}")]
    MisplacedAggregate(String),

    #[error("Metric does not aggregate: {0}")]
    NotAggregated(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),
}

/// An immutable typed relational expression
#[derive(Clone)]
pub struct Relation {
    node: Arc<RelNode>,
    connections: Arc<BTreeMap<u64, Arc<ConnectionFn>>>,
    registry: Option<Arc<SchemaRegistry>>,
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("id", &self.node.id)
            .field("columns", &self.columns())
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl Relation {
    /// A physical table
    pub fn unbound(
        table: TableRef,
        platform: impl Into<String>,
        decl: Option<String>,
        schema: Schema,
        connection: Option<Arc<ConnectionFn>>,
    ) -> Self {
        let op = RelOp::Unbound {
            table,
            platform: platform.into(),
            decl,
        };
        Self::base(RelNode::new(op, schema), connection)
    }

    /// A stand-in for an upstream project node
    pub fn placeholder(
        node_id: impl Into<String>,
        table: TableRef,
        platform: impl Into<String>,
        schema: Schema,
        origins: BTreeMap<String, FieldRef>,
        connection: Option<Arc<ConnectionFn>>,
    ) -> Self {
        let op = RelOp::Placeholder {
            node_id: node_id.into(),
            table,
            platform: platform.into(),
            origins,
        };
        Self::base(RelNode::new(op, schema), connection)
    }

    fn base(node: RelNode, connection: Option<Arc<ConnectionFn>>) -> Self {
        let mut connections = BTreeMap::new();
        if let Some(connection) = connection {
            connections.insert(node.id, connection);
        }
        Self {
            node: Arc::new(node),
            connections: Arc::new(connections),
            registry: None,
        }
    }

    /// Attach the registry used for automatic joins
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn registry(&self) -> Option<&Arc<SchemaRegistry>> {
        self.registry.as_ref()
    }

    pub fn node(&self) -> &Arc<RelNode> {
        &self.node
    }

    pub fn id(&self) -> u64 {
        self.node.id
    }

    pub fn schema(&self) -> &Schema {
        &self.node.schema
    }

    pub fn columns(&self) -> Vec<&str> {
        self.node.schema.column_names()
    }

    /// Physical table and platform when this is a base relation
    pub fn base_table(&self) -> Option<(&TableRef, &str)> {
        match &self.node.op {
            RelOp::Unbound { table, platform, .. } | RelOp::Placeholder { table, platform, .. } => {
                Some((table, platform))
            }
            _ => None,
        }
    }

    /// Column of this relation, usable in expressions over joins
    pub fn col(&self, name: &str) -> Col {
        Col::promote(Expr::Column {
            name: name.to_string(),
            relation: Some(self.node.id),
        })
    }

    /// Like [`Relation::col`], failing for unknown columns
    pub fn try_col(&self, name: &str) -> Result<Col, RelationError> {
        if self.node.schema.contains(name) {
            Ok(self.col(name))
        } else {
            Err(self.unknown_column(name))
        }
    }

    /// New relation over this one, keeping its connections
    pub(crate) fn derive(&self, op: RelOp, schema: Schema) -> Relation {
        Relation {
            node: Arc::new(RelNode::new(op, schema)),
            connections: self.connections.clone(),
            registry: self.registry.clone(),
        }
    }

    /// New relation over several inputs, merging their connections
    pub(crate) fn combine(inputs: &[&Relation], op: RelOp, schema: Schema) -> Relation {
        let mut connections = BTreeMap::new();
        for input in inputs {
            for (id, connection) in input.connections.iter() {
                connections.insert(*id, connection.clone());
            }
        }
        Relation {
            node: Arc::new(RelNode::new(op, schema)),
            connections: Arc::new(connections),
            registry: inputs.iter().find_map(|r| r.registry.clone()),
        }
    }

    pub(crate) fn unknown_column(&self, name: &str) -> RelationError {
        RelationError::UnknownColumn {
            column: name.to_string(),
            available: self.columns().join(", "),
        }
    }

    /// Rewrite an expression to plain names of this relation's columns
    pub(crate) fn localize(&self, expr: &Expr) -> Result<Expr, RelationError> {
        for (name, relation) in expr.column_refs() {
            self.local_name(name, relation)?;
        }
        Ok(expr.map_columns(&|name, relation| {
            Expr::column(self.local_name(name, relation).unwrap_or_else(|_| name.to_string()))
        }))
    }

    fn local_name(&self, name: &str, relation: Option<u64>) -> Result<String, RelationError> {
        let resolved = match relation {
            Some(id) => self.node.resolve(id, name),
            None => None,
        };
        match resolved {
            Some(local) => Ok(local),
            None if self.node.schema.contains(name) => Ok(name.to_string()),
            None => Err(self.unknown_column(name)),
        }
    }

    fn items<I>(&self, cols: I) -> Result<Vec<(String, Expr)>, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<Col>,
    {
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for col in cols {
            let col = col.into();
            let name = col.output_name();
            if !seen.insert(name.clone()) {
                return Err(RelationError::DuplicateColumn(name));
            }
            items.push((name, self.localize(&col.expr)?));
        }
        Ok(items)
    }

    fn item_schema(&self, items: &[(String, Expr)]) -> Schema {
        let input = &self.node.schema;
        Schema::from_columns(
            items
                .iter()
                .map(|(name, expr)| match expr.as_column().and_then(|c| input.find_column(c)) {
                    Some(column) => column.renamed(name.clone()),
                    None => Column::new(name.clone(), expr.data_type(input)),
                })
                .collect(),
        )
    }

    /// Project to the given columns
    ///
    /// A list made only of aggregates becomes a whole-table aggregation.
    pub fn select<I>(&self, cols: I) -> Result<Relation, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<Col>,
    {
        let items = self.items(cols)?;
        if !items.is_empty() && items.iter().all(|(_, e)| e.is_aggregate()) {
            let aggregates = items.into_iter().map(|(n, e)| Col::promote(e).alias(n));
            return self.aggregate(Vec::<Col>::new(), aggregates);
        }
        if let Some((name, _)) = items.iter().find(|(_, e)| e.is_aggregate()) {
            return Err(RelationError::MisplacedAggregate(name.clone()));
        }

        let schema = self.item_schema(&items);
        Ok(self.derive(
            RelOp::Select {
                input: self.node.clone(),
                items,
            },
            schema,
        ))
    }

    /// Keep rows where `predicate` is true
    pub fn filter(&self, predicate: impl Into<Col>) -> Result<Relation, RelationError> {
        let predicate = self.localize(&predicate.into().expr)?;
        if predicate.is_aggregate() {
            return Err(RelationError::MisplacedAggregate("filter".to_string()));
        }
        Ok(self.derive(
            RelOp::Filter {
                input: self.node.clone(),
                predicate,
            },
            self.node.schema.clone(),
        ))
    }

    /// Add or replace columns, keeping the rest
    pub fn mutate<I>(&self, cols: I) -> Result<Relation, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<Col>,
    {
        let new_items = self.items(cols)?;
        let mut items: Vec<(String, Expr)> = self
            .columns()
            .into_iter()
            .map(|name| (name.to_string(), Expr::column(name)))
            .collect();

        for (name, expr) in new_items {
            if expr.is_aggregate() {
                return Err(RelationError::MisplacedAggregate(name));
            }
            match items.iter_mut().find(|(existing, _)| *existing == name) {
                Some(slot) => slot.1 = expr,
                None => items.push((name, expr)),
            }
        }

        let schema = self.item_schema(&items);
        Ok(self.derive(
            RelOp::Select {
                input: self.node.clone(),
                items,
            },
            schema,
        ))
    }

    /// Rename columns, keeping their order
    pub fn rename<I, A, B>(&self, pairs: I) -> Result<Relation, RelationError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: AsRef<str>,
        B: Into<String>,
    {
        let mut renames = BTreeMap::new();
        for (from, to) in pairs {
            let from = from.as_ref();
            if !self.node.schema.contains(from) {
                return Err(self.unknown_column(from));
            }
            renames.insert(from.to_string(), to.into());
        }

        self.select(self.columns().into_iter().map(|name| {
            let col = Col::named(name);
            match renames.get(name) {
                Some(to) => col.alias(to.clone()),
                None => col,
            }
        }))
    }

    /// Group by `by` and compute `metrics` per group
    pub fn aggregate<B, M>(&self, by: B, metrics: M) -> Result<Relation, RelationError>
    where
        B: IntoIterator,
        B::Item: Into<Col>,
        M: IntoIterator,
        M::Item: Into<Col>,
    {
        let by = self.items(by)?;
        let metrics = self.items(metrics)?;

        if let Some((name, _)) = by.iter().find(|(_, e)| e.is_aggregate()) {
            return Err(RelationError::MisplacedAggregate(name.clone()));
        }
        if let Some((name, _)) = metrics.iter().find(|(_, e)| !e.is_aggregate()) {
            return Err(RelationError::NotAggregated(name.clone()));
        }
        if let Some((name, _)) = metrics.iter().find(|(m, _)| by.iter().any(|(b, _)| b == m)) {
            return Err(RelationError::DuplicateColumn(name.clone()));
        }

        let mut all = by.clone();
        all.extend(metrics.iter().cloned());
        let schema = self.item_schema(&all);

        Ok(self.derive(
            RelOp::Aggregate {
                input: self.node.clone(),
                by,
                metrics,
            },
            schema,
        ))
    }

    /// Order rows by `keys`
    pub fn sort<I>(&self, keys: I) -> Result<Relation, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<SortKey>,
    {
        let keys = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                Ok(SortKey {
                    expr: self.localize(&key.expr)?,
                    ascending: key.ascending,
                })
            })
            .collect::<Result<Vec<_>, RelationError>>()?;

        Ok(self.derive(
            RelOp::Sort {
                input: self.node.clone(),
                keys,
            },
            self.node.schema.clone(),
        ))
    }

    /// At most `n` rows after skipping `offset`
    pub fn limit(&self, n: usize, offset: usize) -> Relation {
        self.derive(
            RelOp::Limit {
                input: self.node.clone(),
                n,
                offset,
            },
            self.node.schema.clone(),
        )
    }

    pub fn distinct(&self) -> Relation {
        self.derive(
            RelOp::Distinct {
                input: self.node.clone(),
            },
            self.node.schema.clone(),
        )
    }

    /// Apply a chain of transformations in place
    ///
    /// ```ignore
    /// let top = trips.mutable(|r| {
    ///     r.filter(Col::named("fare").gt(0))?.sort([Col::named("fare").desc()])?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn mutable<F>(&self, f: F) -> Result<Relation, RelationError>
    where
        F: FnOnce(&mut RelationBuilder) -> Result<(), RelationError>,
    {
        let mut builder = RelationBuilder {
            current: self.clone(),
        };
        f(&mut builder)?;
        Ok(builder.current)
    }

    /// Declared column an output column passes through from
    pub fn column_origin(&self, name: &str) -> Option<FieldRef> {
        self.node.origin(name)
    }

    /// Declared tables that output columns pass through from
    pub fn owner_tables(&self) -> BTreeSet<String> {
        self.columns()
            .into_iter()
            .filter_map(|c| self.column_origin(c))
            .map(|origin| origin.table)
            .collect()
    }

    /// Evaluate against the connected data
    pub fn execute(&self) -> Result<Batch, ExecError> {
        exec::execute(&self.node, &self.connections)
    }

    /// Dialect-quoted SQL text
    pub fn to_sql(&self, dialect: Dialect) -> String {
        render::render(&self.node, dialect)
    }

    /// Parsed SQL AST in a dialect
    pub fn to_sql_ast(&self, dialect: Dialect) -> Result<Query, ParseError> {
        SqlParser::from_dialect(dialect).parse_query(&self.to_sql(dialect))
    }
}

/// In-place view of a relation inside [`Relation::mutable`]
pub struct RelationBuilder {
    current: Relation,
}

impl RelationBuilder {
    pub fn relation(&self) -> &Relation {
        &self.current
    }

    pub fn select<I>(&mut self, cols: I) -> Result<&mut Self, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<Col>,
    {
        self.current = self.current.select(cols)?;
        Ok(self)
    }

    pub fn filter(&mut self, predicate: impl Into<Col>) -> Result<&mut Self, RelationError> {
        self.current = self.current.filter(predicate)?;
        Ok(self)
    }

    pub fn mutate<I>(&mut self, cols: I) -> Result<&mut Self, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<Col>,
    {
        self.current = self.current.mutate(cols)?;
        Ok(self)
    }

    pub fn rename<I, A, B>(&mut self, pairs: I) -> Result<&mut Self, RelationError>
    where
        I: IntoIterator<Item = (A, B)>,
        A: AsRef<str>,
        B: Into<String>,
    {
        self.current = self.current.rename(pairs)?;
        Ok(self)
    }

    pub fn aggregate<B, M>(&mut self, by: B, metrics: M) -> Result<&mut Self, RelationError>
    where
        B: IntoIterator,
        B::Item: Into<Col>,
        M: IntoIterator,
        M::Item: Into<Col>,
    {
        self.current = self.current.aggregate(by, metrics)?;
        Ok(self)
    }

    pub fn sort<I>(&mut self, keys: I) -> Result<&mut Self, RelationError>
    where
        I: IntoIterator,
        I::Item: Into<SortKey>,
    {
        self.current = self.current.sort(keys)?;
        Ok(self)
    }

    pub fn limit(&mut self, n: usize, offset: usize) -> &mut Self {
        self.current = self.current.limit(n, offset);
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.current = self.current.distinct();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::lit;
    use crate::value::Value;
    use vinyl_core::LogicalType;

    fn trips() -> Relation {
        let schema = Schema::from_columns(vec![
            Column::new("id", LogicalType::Int),
            Column::new("fare", LogicalType::Float),
            Column::new("zone", LogicalType::String),
        ]);
        let rows = vec![
            vec![Value::Int(1), Value::Float(10.0), Value::from("a")],
            vec![Value::Int(2), Value::Float(0.0), Value::from("b")],
            vec![Value::Int(3), Value::Float(25.5), Value::from("a")],
        ];
        let batch = Batch::new(vec!["id".into(), "fare".into(), "zone".into()], rows);
        let connection: Arc<ConnectionFn> = Arc::new(move || Ok(batch.clone()));
        Relation::unbound(
            TableRef::new(Some("taxi"), Some("raw"), "trips"),
            "duckdb",
            Some("taxi.Trips".to_string()),
            schema,
            Some(connection),
        )
    }

    #[test]
    fn transformations_return_new_relations() {
        let trips = trips();
        let filtered = trips.filter(Col::named("fare").gt(0)).unwrap();
        assert_ne!(filtered.id(), trips.id());
        assert_eq!(trips.execute().unwrap().len(), 3);
        assert_eq!(filtered.execute().unwrap().len(), 2);
    }

    #[test]
    fn mutable_chains_in_place() {
        let top = trips()
            .mutable(|r| {
                r.filter(Col::named("fare").gt(0))?
                    .sort([Col::named("fare").desc()])?
                    .limit(1, 0);
                Ok(())
            })
            .unwrap();
        let batch = top.execute().unwrap();
        assert_eq!(batch.rows, vec![vec![Value::Int(3), Value::Float(25.5), Value::from("a")]]);
    }

    #[test]
    fn rename_keeps_provenance() {
        let renamed = trips().rename([("zone", "pickup_zone")]).unwrap();
        assert_eq!(renamed.columns(), vec!["id", "fare", "pickup_zone"]);
        assert_eq!(
            renamed.column_origin("pickup_zone"),
            Some(FieldRef::new("taxi.Trips", "zone"))
        );
        assert_eq!(renamed.owner_tables().into_iter().collect::<Vec<_>>(), vec!["taxi.Trips"]);
    }

    #[test]
    fn mutate_adds_and_replaces() {
        let mutated = trips()
            .mutate([
                (Col::named("fare") * 2).alias("fare"),
                lit("x").alias("tag"),
            ])
            .unwrap();
        assert_eq!(mutated.columns(), vec!["id", "fare", "zone", "tag"]);
        assert_eq!(mutated.column_origin("fare"), None);

        let batch = mutated.execute().unwrap();
        assert_eq!(batch.rows[2][1], Value::Float(51.0));
    }

    #[test]
    fn aggregate_validates_metrics() {
        let trips = trips();
        let totals = trips
            .aggregate([Col::named("zone")], [Col::named("fare").sum().alias("total")])
            .unwrap();
        assert_eq!(totals.columns(), vec!["zone", "total"]);
        assert_eq!(totals.schema().columns[1].logical_type, LogicalType::Float);

        let err = trips.aggregate([Col::named("zone")], [Col::named("fare")]).unwrap_err();
        assert!(matches!(err, RelationError::NotAggregated(_)));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let err = trips().select([Col::named("nope")]).unwrap_err();
        assert!(matches!(err, RelationError::UnknownColumn { .. }));
    }

    #[test]
    fn select_of_aggregates_is_an_aggregation() {
        let count = trips().select([Col::count_rows().alias("n")]).unwrap();
        assert_eq!(count.execute().unwrap().rows, vec![vec![Value::Int(3)]]);
    }
}
