//! Column tracing over SQL ASTs
//!
//! Follows every output column of a query back through aliases, CTEs,
//! subqueries, joins and set operations to the dependency columns it was
//! computed from. Each column gets an operator tree ([`Lin`]) that can be
//! turned into a small graph to decide whether the column passes through
//! unaltered.

use crate::inference::{is_aggregate_function, normalize, InferenceContext};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, Query, Select, SelectItem, SetExpr,
    SetOperator, TableFactor, TableWithJoins, WindowType,
};
use std::collections::HashMap;
use std::ops::ControlFlow;
use tracing::debug;

/// Kind of operator on a column's path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Output,
    Relation,
    Alias,
    Field,
    SortKey,
    Cast,
    Literal,
    Arithmetic,
    Expression,
    Function,
    Aggregate,
    Window,
    Case,
    SetOp,
    Subquery,
}

impl OpKind {
    /// Operators that forward a value without changing it
    pub fn is_passthrough(&self) -> bool {
        matches!(self, OpKind::Alias | OpKind::Field | OpKind::SortKey)
    }

    /// Derivation label used on column links
    pub fn how(&self) -> &'static str {
        match self {
            OpKind::Output | OpKind::Relation | OpKind::Alias | OpKind::Field | OpKind::SortKey => {
                "identity"
            }
            OpKind::Cast => "cast",
            OpKind::Literal => "literal",
            OpKind::Arithmetic => "arithmetic",
            OpKind::Expression => "expression",
            OpKind::Function => "function",
            OpKind::Aggregate => "aggregate",
            OpKind::Window => "window",
            OpKind::Case => "case",
            OpKind::SetOp => "set_operation",
            OpKind::Subquery => "subquery",
        }
    }
}

/// Operator tree behind one column
#[derive(Debug, Clone, PartialEq)]
pub enum Lin {
    /// A column read straight from a dependency
    Base { dep_id: String, column: String },

    Op {
        kind: OpKind,
        label: String,
        inputs: Vec<Lin>,
    },
}

impl Lin {
    fn op(kind: OpKind, label: impl Into<String>, inputs: Vec<Lin>) -> Self {
        Lin::Op {
            kind,
            label: label.into(),
            inputs,
        }
    }

    /// Dependency columns this column reads, in first-seen order
    pub fn origins(&self) -> Vec<ColumnOrigin> {
        let mut origins = Vec::new();
        self.collect_origins(&mut origins);
        origins
    }

    fn collect_origins(&self, out: &mut Vec<ColumnOrigin>) {
        match self {
            Lin::Base { dep_id, column } => {
                let origin = ColumnOrigin {
                    dep_id: dep_id.clone(),
                    column: column.clone(),
                };
                if !out.contains(&origin) {
                    out.push(origin);
                }
            }
            Lin::Op { kind: OpKind::Relation, .. } => {}
            Lin::Op { inputs, .. } => {
                for input in inputs {
                    input.collect_origins(out);
                }
            }
        }
    }

    fn collect_relations(&self, out: &mut Vec<Lin>) {
        match self {
            Lin::Base { dep_id, .. } => push_relation(out, Lin::op(OpKind::Relation, dep_id, vec![])),
            Lin::Op { kind: OpKind::Relation, .. } => push_relation(out, self.clone()),
            Lin::Op { inputs, .. } => {
                for input in inputs {
                    input.collect_relations(out);
                }
            }
        }
    }

    /// Label of the first operator that changes the value
    fn derivation(&self) -> String {
        match self {
            Lin::Base { .. } => "identity".to_string(),
            Lin::Op { kind, inputs, .. } if kind.is_passthrough() || *kind == OpKind::Output => inputs
                .first()
                .map(Lin::derivation)
                .unwrap_or_else(|| "expression".to_string()),
            Lin::Op { kind: OpKind::SetOp, label, .. } => label.clone(),
            Lin::Op { kind, .. } => kind.how().to_string(),
        }
    }
}

fn push_relation(out: &mut Vec<Lin>, relation: Lin) {
    if !out.contains(&relation) {
        out.push(relation);
    }
}

/// Node of a per-column operator graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpNode {
    pub kind: OpKind,
    pub label: String,
}

/// A dependency column an output column was computed from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnOrigin {
    pub dep_id: String,
    pub column: String,
}

/// One traced output column
#[derive(Debug, Clone, PartialEq)]
pub struct TracedColumn {
    /// Output column name
    pub name: String,

    /// Operator tree the value flows through
    pub lineage: Lin,

    /// Dependency columns read by the value
    pub origins: Vec<ColumnOrigin>,

    /// Equal to exactly one dependency column
    pub unaltered: bool,

    /// `identity`, `rename`, or the kind of derivation
    pub how: String,
}

impl TracedColumn {
    fn new(name: String, lineage: Lin) -> Self {
        let origins = lineage.origins();
        let graph = column_graph(&name, &lineage);
        let unaltered = origins.len() == 1 && is_unaltered(&graph);

        let how = if unaltered {
            if origins[0].column.eq_ignore_ascii_case(&name) {
                "identity".to_string()
            } else {
                "rename".to_string()
            }
        } else {
            lineage.derivation()
        };

        Self {
            name,
            lineage,
            origins,
            unaltered,
            how,
        }
    }
}

/// Column tracing errors
#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Cannot trace: {0}")]
    Unsupported(String),

    #[error("Set operation sides have {left} and {right} columns")]
    SetArity { left: usize, right: usize },
}

type Columns = Vec<(String, Lin)>;

struct ScopeTable {
    alias: String,
    columns: Columns,
}

/// Trace every output column of a query
pub fn trace_query(query: &Query, context: &InferenceContext) -> Result<Vec<TracedColumn>, TraceError> {
    let tracer = Tracer { context };
    let columns = tracer.query(query, &HashMap::new())?;
    debug!(columns = columns.len(), "Traced query");

    Ok(columns
        .into_iter()
        .map(|(name, lin)| TracedColumn::new(name.clone(), Lin::op(OpKind::Output, name, vec![lin])))
        .collect())
}

/// Names of the traced columns that pass through unaltered
pub fn find_unaltered_cols(columns: &[TracedColumn]) -> Vec<&str> {
    columns
        .iter()
        .filter(|c| c.unaltered)
        .map(|c| c.name.as_str())
        .collect()
}

/// Build the operator graph for one column
///
/// Edges run from an input to its consumer. Relation nodes are shared by
/// label; a base column becomes `Relation(dep) -> Field(column)`.
pub fn column_graph(name: &str, lin: &Lin) -> DiGraph<OpNode, ()> {
    let mut graph = DiGraph::new();
    let mut relations = HashMap::new();

    let top = add_lin(&mut graph, &mut relations, lin);
    if !matches!(lin, Lin::Op { kind: OpKind::Output, .. }) {
        let output = graph.add_node(OpNode {
            kind: OpKind::Output,
            label: name.to_string(),
        });
        graph.add_edge(top, output, ());
    }

    graph
}

fn add_lin(
    graph: &mut DiGraph<OpNode, ()>,
    relations: &mut HashMap<String, NodeIndex>,
    lin: &Lin,
) -> NodeIndex {
    match lin {
        Lin::Base { dep_id, column } => {
            let relation = relation_node(graph, relations, dep_id);
            let field = graph.add_node(OpNode {
                kind: OpKind::Field,
                label: column.clone(),
            });
            graph.add_edge(relation, field, ());
            field
        }
        Lin::Op { kind: OpKind::Relation, label, inputs } => {
            let existed = relations.contains_key(label);
            let node = relation_node(graph, relations, label);
            if !existed {
                for input in inputs {
                    let input = add_lin(graph, relations, input);
                    graph.add_edge(input, node, ());
                }
            }
            node
        }
        Lin::Op { kind, label, inputs } => {
            let node = graph.add_node(OpNode {
                kind: *kind,
                label: label.clone(),
            });
            for input in inputs {
                let input = add_lin(graph, relations, input);
                graph.add_edge(input, node, ());
            }
            node
        }
    }
}

fn relation_node(
    graph: &mut DiGraph<OpNode, ()>,
    relations: &mut HashMap<String, NodeIndex>,
    label: &str,
) -> NodeIndex {
    *relations.entry(label.to_string()).or_insert_with(|| {
        graph.add_node(OpNode {
            kind: OpKind::Relation,
            label: label.to_string(),
        })
    })
}

/// Whether a column graph only forwards its value
///
/// Relation-to-relation edges are dropped first, then every node that has
/// both inputs and consumers must be an alias, field or sort key.
pub fn is_unaltered(graph: &DiGraph<OpNode, ()>) -> bool {
    let mut pruned = graph.clone();
    pruned.retain_edges(|g, e| match g.edge_endpoints(e) {
        Some((a, b)) => !(g[a].kind == OpKind::Relation && g[b].kind == OpKind::Relation),
        None => true,
    });

    pruned.node_indices().all(|n| {
        let has_inputs = pruned.neighbors_directed(n, Direction::Incoming).next().is_some();
        let has_consumers = pruned.neighbors_directed(n, Direction::Outgoing).next().is_some();
        !(has_inputs && has_consumers) || pruned[n].kind.is_passthrough()
    })
}

struct Tracer<'a> {
    context: &'a InferenceContext,
}

impl Tracer<'_> {
    fn query(&self, query: &Query, ctes: &HashMap<String, Columns>) -> Result<Columns, TraceError> {
        let mut local = ctes.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let columns = self.query(&cte.query, &local)?;
                local.insert(normalize(&cte.alias.name.value), columns);
            }
        }

        let mut columns = self.set_expr(&query.body, &local)?;

        if let Some(order_by) = &query.order_by {
            for key in &order_by.exprs {
                let name = match &key.expr {
                    Expr::Identifier(ident) => &ident.value,
                    Expr::CompoundIdentifier(idents) => match idents.last() {
                        Some(ident) => &ident.value,
                        None => continue,
                    },
                    _ => continue,
                };
                if let Some((col_name, lin)) = columns.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                    *lin = Lin::op(OpKind::SortKey, col_name.clone(), vec![lin.clone()]);
                }
            }
        }

        Ok(columns)
    }

    fn set_expr(&self, body: &SetExpr, ctes: &HashMap<String, Columns>) -> Result<Columns, TraceError> {
        match body {
            SetExpr::Select(select) => self.select(select, ctes),
            SetExpr::Query(query) => self.query(query, ctes),
            SetExpr::SetOperation { op, left, right, .. } => {
                let left = self.set_expr(left, ctes)?;
                let right = self.set_expr(right, ctes)?;
                if left.len() != right.len() {
                    return Err(TraceError::SetArity {
                        left: left.len(),
                        right: right.len(),
                    });
                }

                let label = match op {
                    SetOperator::Union => "union",
                    SetOperator::Except => "except",
                    SetOperator::Intersect => "intersect",
                    #[allow(unreachable_patterns)]
                    _ => "set_operation",
                };

                Ok(left
                    .into_iter()
                    .zip(right)
                    .map(|((name, l), (_, r))| {
                        // Rows of an EXCEPT only ever come from the left side
                        let inputs = if label == "except" { vec![l] } else { vec![l, r] };
                        (name, Lin::op(OpKind::SetOp, label, inputs))
                    })
                    .collect())
            }
            other => Err(TraceError::Unsupported(other.to_string())),
        }
    }

    fn select(&self, select: &Select, ctes: &HashMap<String, Columns>) -> Result<Columns, TraceError> {
        let scope = self.from_clause(&select.from, ctes)?;
        let mut columns = Vec::new();

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    let lin = self.expr(expr, &scope, ctes)?;
                    columns.push((output_name(expr), lin));
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let lin = self.expr(expr, &scope, ctes)?;
                    columns.push((
                        alias.value.clone(),
                        Lin::op(OpKind::Alias, alias.value.clone(), vec![lin]),
                    ));
                }
                SelectItem::Wildcard(_) => {
                    for table in &scope {
                        columns.extend(table.columns.iter().cloned());
                    }
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.0.last().map(|i| i.value.as_str()).unwrap_or_default();
                    let table = find_table(&scope, qualifier)
                        .ok_or_else(|| TraceError::UnknownTable(name.to_string()))?;
                    columns.extend(table.columns.iter().cloned());
                }
            }
        }

        Ok(columns)
    }

    fn from_clause(
        &self,
        from: &[TableWithJoins],
        ctes: &HashMap<String, Columns>,
    ) -> Result<Vec<ScopeTable>, TraceError> {
        let mut scope = Vec::new();
        for table in from {
            self.table_factor(&table.relation, ctes, &mut scope)?;
            for join in &table.joins {
                self.table_factor(&join.relation, ctes, &mut scope)?;
            }
        }
        Ok(scope)
    }

    fn table_factor(
        &self,
        factor: &TableFactor,
        ctes: &HashMap<String, Columns>,
        scope: &mut Vec<ScopeTable>,
    ) -> Result<(), TraceError> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let table_name = name.0.last().map(|i| i.value.clone()).unwrap_or_default();
                let visible = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or(table_name);

                let cte = match name.0.as_slice() {
                    [single] => ctes.get(&normalize(&single.value)),
                    _ => None,
                };

                let columns = match cte {
                    Some(columns) => wrap_fields(&format!("cte:{}", name), columns),
                    None => {
                        let entry = self
                            .context
                            .lookup_object(name)
                            .ok_or_else(|| TraceError::UnknownTable(name.to_string()))?;
                        entry
                            .schema
                            .columns
                            .iter()
                            .map(|c| {
                                let lin = Lin::Base {
                                    dep_id: entry.dep_id.clone(),
                                    column: c.name.clone(),
                                };
                                (c.name.clone(), lin)
                            })
                            .collect()
                    }
                };

                scope.push(ScopeTable { alias: visible, columns });
                Ok(())
            }
            TableFactor::Derived { subquery, alias, .. } => {
                let visible = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default();
                let inner = self.query(subquery, ctes)?;
                scope.push(ScopeTable {
                    columns: wrap_fields(&format!("subquery:{}", visible), &inner),
                    alias: visible,
                });
                Ok(())
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.table_factor(&table_with_joins.relation, ctes, scope)?;
                for join in &table_with_joins.joins {
                    self.table_factor(&join.relation, ctes, scope)?;
                }
                Ok(())
            }
            other => Err(TraceError::Unsupported(other.to_string())),
        }
    }

    fn expr(
        &self,
        expr: &Expr,
        scope: &[ScopeTable],
        ctes: &HashMap<String, Columns>,
    ) -> Result<Lin, TraceError> {
        match expr {
            Expr::Identifier(ident) => scope
                .iter()
                .find_map(|t| find_column(&t.columns, &ident.value))
                .cloned()
                .ok_or_else(|| TraceError::UnknownColumn(ident.value.clone())),

            Expr::CompoundIdentifier(idents) => {
                let (qualifier, column) = match idents.as_slice() {
                    [.., q, c] => (q.value.as_str(), c.value.as_str()),
                    _ => return Err(TraceError::UnknownColumn(expr.to_string())),
                };
                let table = find_table(scope, qualifier)
                    .ok_or_else(|| TraceError::UnknownTable(qualifier.to_string()))?;
                find_column(&table.columns, column)
                    .cloned()
                    .ok_or_else(|| TraceError::UnknownColumn(expr.to_string()))
            }

            Expr::Nested(inner) => self.expr(inner, scope, ctes),

            Expr::Value(value) => Ok(Lin::op(OpKind::Literal, value.to_string(), vec![])),

            Expr::Cast { expr: inner, data_type, .. } => Ok(Lin::op(
                OpKind::Cast,
                data_type.to_string(),
                vec![self.expr(inner, scope, ctes)?],
            )),

            Expr::BinaryOp { left, op, right } => {
                use sqlparser::ast::BinaryOperator::*;

                let kind = match op {
                    Plus | Minus | Multiply | Divide | Modulo => OpKind::Arithmetic,
                    _ => OpKind::Expression,
                };
                Ok(Lin::op(
                    kind,
                    op.to_string(),
                    vec![self.expr(left, scope, ctes)?, self.expr(right, scope, ctes)?],
                ))
            }

            Expr::UnaryOp { op, expr: inner } => Ok(Lin::op(
                OpKind::Expression,
                op.to_string(),
                vec![self.expr(inner, scope, ctes)?],
            )),

            Expr::Function(func) => {
                let name = func.name.to_string().to_lowercase();
                let mut args: Vec<&Expr> = match &func.args {
                    FunctionArguments::List(list) => list
                        .args
                        .iter()
                        .filter_map(|arg| match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
                            FunctionArg::Named { arg: FunctionArgExpr::Expr(e), .. } => Some(e),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };

                let kind = match &func.over {
                    Some(window) => {
                        if let WindowType::WindowSpec(spec) = window {
                            args.extend(spec.partition_by.iter());
                            args.extend(spec.order_by.iter().map(|o| &o.expr));
                        }
                        OpKind::Window
                    }
                    None if is_aggregate_function(&name) => OpKind::Aggregate,
                    None => OpKind::Function,
                };

                let inputs = args
                    .into_iter()
                    .map(|arg| self.expr(arg, scope, ctes))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Lin::op(kind, name, inputs))
            }

            Expr::Case { operand, conditions, results, else_result } => {
                let inputs = operand
                    .iter()
                    .map(|e| e.as_ref())
                    .chain(conditions.iter())
                    .chain(results.iter())
                    .chain(else_result.iter().map(|e| e.as_ref()))
                    .map(|e| self.expr(e, scope, ctes))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Lin::op(OpKind::Case, "case", inputs))
            }

            Expr::Subquery(query) => {
                // Correlated references are not visible from inside; keep what resolves
                let inputs = match self.query(query, ctes) {
                    Ok(columns) => columns.into_iter().take(1).map(|(_, lin)| lin).collect(),
                    Err(_) => Vec::new(),
                };
                Ok(Lin::op(OpKind::Subquery, "subquery", inputs))
            }

            other => {
                let mut inputs = Vec::new();
                let _ = sqlparser::ast::visit_expressions(other, |e| {
                    let found = match e {
                        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
                            self.expr(e, scope, ctes).ok()
                        }
                        _ => None,
                    };
                    if let Some(lin) = found {
                        if !inputs.contains(&lin) {
                            inputs.push(lin);
                        }
                    }
                    ControlFlow::<()>::Continue(())
                });
                Ok(Lin::op(OpKind::Expression, "expr", inputs))
            }
        }
    }
}

/// Columns of a CTE or subquery as seen from the enclosing query
fn wrap_fields(relation: &str, columns: &Columns) -> Columns {
    let mut inner_relations = Vec::new();
    for (_, lin) in columns {
        lin.collect_relations(&mut inner_relations);
    }
    let relation = Lin::op(OpKind::Relation, relation, inner_relations);

    columns
        .iter()
        .map(|(name, lin)| {
            (
                name.clone(),
                Lin::op(OpKind::Field, name.clone(), vec![lin.clone(), relation.clone()]),
            )
        })
        .collect()
}

fn find_table<'s>(scope: &'s [ScopeTable], alias: &str) -> Option<&'s ScopeTable> {
    scope
        .iter()
        .find(|t| t.alias == alias)
        .or_else(|| scope.iter().find(|t| t.alias.eq_ignore_ascii_case(alias)))
}

fn find_column<'c>(columns: &'c Columns, name: &str) -> Option<&'c Lin> {
    columns
        .iter()
        .find(|(n, _)| n == name)
        .or_else(|| columns.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
        .map(|(_, lin)| lin)
}

/// Name an unaliased projection gets
pub(crate) fn output_name(expr: &Expr) -> String {
    match expr {
        Expr::Identifier(ident) => ident.value.clone(),
        Expr::CompoundIdentifier(idents) => idents.last().map(|i| i.value.clone()).unwrap_or_default(),
        Expr::Nested(inner) => output_name(inner),
        Expr::Cast { expr, .. } => output_name(expr),
        Expr::Function(func) => func.name.to_string().to_lowercase(),
        _ => "expr".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;
    use pretty_assertions::assert_eq;
    use vinyl_core::{Column, LogicalType, Schema};

    fn context() -> InferenceContext {
        let mut context = InferenceContext::new();
        context.add_dependency(
            "shop.models.trips",
            ["trips"],
            Schema::from_columns(vec![
                Column::new("trip_distance", LogicalType::Float),
                Column::new("total_amount", LogicalType::Float),
                Column::new("vendor", LogicalType::String),
            ]),
        );
        context.add_dependency(
            "shop.sources.vendors",
            ["raw.vendors"],
            Schema::from_columns(vec![
                Column::new("vendor", LogicalType::String),
                Column::new("city", LogicalType::String),
            ]),
        );
        context
    }

    fn trace(sql: &str) -> Vec<TracedColumn> {
        let query = SqlParser::new().parse_query(sql).unwrap();
        trace_query(&query, &context()).unwrap()
    }

    fn origin(dep_id: &str, column: &str) -> ColumnOrigin {
        ColumnOrigin {
            dep_id: dep_id.to_string(),
            column: column.to_string(),
        }
    }

    #[test]
    fn select_star_is_all_identity() {
        let columns = trace("SELECT * FROM trips");
        assert_eq!(find_unaltered_cols(&columns), vec!["trip_distance", "total_amount", "vendor"]);
        assert!(columns.iter().all(|c| c.how == "identity"));
        assert_eq!(columns[1].origins, vec![origin("shop.models.trips", "total_amount")]);
    }

    #[test]
    fn alias_is_a_rename() {
        let columns = trace("SELECT t.trip_distance AS dist FROM trips AS t");
        assert!(columns[0].unaltered);
        assert_eq!(columns[0].name, "dist");
        assert_eq!(columns[0].how, "rename");
    }

    #[test]
    fn arithmetic_fans_in() {
        let columns = trace("SELECT total_amount / trip_distance AS per_mile FROM trips");
        let column = &columns[0];
        assert!(!column.unaltered);
        assert_eq!(column.how, "arithmetic");
        assert_eq!(
            column.origins,
            vec![
                origin("shop.models.trips", "total_amount"),
                origin("shop.models.trips", "trip_distance"),
            ]
        );
    }

    #[test]
    fn aggregate_and_group_key() {
        let columns = trace("SELECT vendor, SUM(total_amount) AS total FROM trips GROUP BY vendor");
        assert!(columns[0].unaltered);
        assert!(!columns[1].unaltered);
        assert_eq!(columns[1].how, "aggregate");
    }

    #[test]
    fn passthrough_survives_ctes_subqueries_and_sorting() {
        let columns = trace(
            "WITH base AS (SELECT trip_distance, total_amount FROM trips) \
             SELECT s.total_amount FROM (SELECT * FROM base) AS s ORDER BY total_amount",
        );
        assert_eq!(columns.len(), 1);
        assert!(columns[0].unaltered);
        assert_eq!(columns[0].how, "identity");
        assert_eq!(columns[0].origins, vec![origin("shop.models.trips", "total_amount")]);
    }

    #[test]
    fn join_resolves_qualified_columns() {
        let columns = trace(
            "SELECT t.total_amount, v.city FROM trips AS t \
             LEFT JOIN raw.vendors AS v ON t.vendor = v.vendor",
        );
        assert_eq!(columns[1].origins, vec![origin("shop.sources.vendors", "city")]);
        assert_eq!(find_unaltered_cols(&columns), vec!["total_amount", "city"]);
    }

    #[test]
    fn union_is_derived_from_both_sides() {
        let columns = trace("SELECT vendor FROM trips UNION ALL SELECT vendor FROM raw.vendors");
        assert!(!columns[0].unaltered);
        assert_eq!(columns[0].how, "union");
        assert_eq!(columns[0].origins.len(), 2);
    }

    #[test]
    fn literals_have_no_origins() {
        let columns = trace("SELECT 'x' AS tag, CAST(trip_distance AS INT) AS d FROM trips");
        assert!(columns[0].origins.is_empty());
        assert!(!columns[0].unaltered);
        assert_eq!(columns[1].how, "cast");
    }

    #[test]
    fn unknown_column_is_an_error() {
        let query = SqlParser::new().parse_query("SELECT nope FROM trips").unwrap();
        assert!(matches!(
            trace_query(&query, &context()),
            Err(TraceError::UnknownColumn(_))
        ));
    }

    #[test]
    fn relation_edges_are_pruned_before_checking() {
        let inner = Lin::Base {
            dep_id: "d".to_string(),
            column: "a".to_string(),
        };
        let relation = Lin::op(
            OpKind::Relation,
            "cte:x",
            vec![Lin::op(OpKind::Relation, "d", vec![])],
        );
        let lin = Lin::op(OpKind::Field, "a", vec![inner, relation]);

        let graph = column_graph("a", &lin);
        // Relation(d), Field(a), Relation(cte:x), Field(a), Output(a)
        assert_eq!(graph.node_count(), 5);
        assert!(is_unaltered(&graph));
    }
}
