//! Schema inference from SQL queries
//!
//! Determines output schemas from SQL queries without executing them, given
//! the schemas of the tables the query reads.

use sqlparser::ast::{
    DataType, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, ObjectName,
    Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableWithJoins, Value,
};
use std::collections::HashMap;
use tracing::debug;
use vinyl_core::{Column, LogicalType, Schema};

/// A table visible to a query
#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    /// Node the table is produced by
    pub dep_id: String,

    pub schema: Schema,
}

/// Context for schema inference containing available table schemas
///
/// Lookups are case-insensitive and fall back from `db.schema.table` to
/// `schema.table` to `table`.
#[derive(Debug, Clone, Default)]
pub struct InferenceContext {
    table_schemas: HashMap<String, TableEntry>,
}

impl InferenceContext {
    /// Create a new inference context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table schema under its own name
    pub fn add_table(&mut self, name: impl Into<String>, schema: Schema) {
        let name = name.into();
        self.add_dependency(name.clone(), [name], schema);
    }

    /// Register a dependency's schema under every name it can be referenced by
    pub fn add_dependency<I, S>(&mut self, dep_id: impl Into<String>, names: I, schema: Schema)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entry = TableEntry {
            dep_id: dep_id.into(),
            schema,
        };
        for name in names {
            self.table_schemas.insert(normalize(name.as_ref()), entry.clone());
        }
    }

    /// Look up a table by dotted name
    pub fn lookup(&self, name: &str) -> Option<&TableEntry> {
        let parts: Vec<&str> = name.split('.').collect();
        self.lookup_parts(&parts)
    }

    /// Look up a table by parsed name
    pub fn lookup_object(&self, name: &ObjectName) -> Option<&TableEntry> {
        let parts: Vec<&str> = name.0.iter().map(|i| i.value.as_str()).collect();
        self.lookup_parts(&parts)
    }

    fn lookup_parts(&self, parts: &[&str]) -> Option<&TableEntry> {
        (0..parts.len()).find_map(|skip| {
            let key = normalize(&parts[skip..].join("."));
            let entry = self.table_schemas.get(&key)?;
            if skip > 0 {
                debug!(name = %parts.join("."), matched = %key, "Matched table by suffix");
            }
            Some(entry)
        })
    }

    /// Get schema for a table
    pub fn get_table_schema(&self, name: &str) -> Option<&Schema> {
        self.lookup(name).map(|e| &e.schema)
    }

    pub fn is_empty(&self) -> bool {
        self.table_schemas.is_empty()
    }
}

pub(crate) fn normalize(name: &str) -> String {
    name.trim_matches(|c| c == '"' || c == '`').to_lowercase()
}

type CteSchemas = HashMap<String, Schema>;

/// Schema inference engine
pub struct SchemaInference<'a> {
    /// Inference context with available schemas
    context: &'a InferenceContext,
}

impl<'a> SchemaInference<'a> {
    /// Create a new schema inference engine
    pub fn new(context: &'a InferenceContext) -> Self {
        Self { context }
    }

    /// Infer schema from a parsed SQL statement
    pub fn infer_statement(&self, statement: &Statement) -> Result<Schema, InferenceError> {
        match statement {
            Statement::Query(query) => self.infer_query(query),
            _ => Err(InferenceError::UnsupportedStatement(
                "Only SELECT queries are supported".to_string(),
            )),
        }
    }

    /// Infer schema from a query
    pub fn infer_query(&self, query: &Query) -> Result<Schema, InferenceError> {
        self.infer_query_scoped(query, &CteSchemas::new())
    }

    fn infer_query_scoped(&self, query: &Query, ctes: &CteSchemas) -> Result<Schema, InferenceError> {
        let mut local = ctes.clone();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let schema = self.infer_query_scoped(&cte.query, &local)?;
                local.insert(normalize(&cte.alias.name.value), schema);
            }
        }

        self.infer_set_expr(&query.body, &local)
    }

    /// Infer schema from a set expression
    fn infer_set_expr(&self, set_expr: &SetExpr, ctes: &CteSchemas) -> Result<Schema, InferenceError> {
        match set_expr {
            SetExpr::Select(select) => self.infer_select(select, ctes),
            SetExpr::Query(query) => self.infer_query_scoped(query, ctes),
            SetExpr::SetOperation { left, right, .. } => {
                // Names come from the left side; types widen across both
                let left = self.infer_set_expr(left, ctes)?;
                let right = self.infer_set_expr(right, ctes)?;
                if left.len() != right.len() {
                    return Err(InferenceError::SetOperationArity(left.len(), right.len()));
                }

                let columns = left
                    .columns
                    .into_iter()
                    .zip(right.columns)
                    .map(|(l, r)| {
                        let logical_type = match (&l.logical_type, &r.logical_type) {
                            (a, b) if a == b => a.clone(),
                            (a, b) if a.is_numeric() && b.is_numeric() => a.promote(b),
                            (LogicalType::Unknown, b) => b.clone(),
                            (a, _) => a.clone(),
                        };
                        Column::new(l.name, logical_type)
                    })
                    .collect();
                Ok(Schema::from_columns(columns))
            }
            _ => Err(InferenceError::UnsupportedConstruct(
                "Unsupported set expression".to_string(),
            )),
        }
    }

    /// Infer schema from a SELECT statement
    fn infer_select(&self, select: &Select, ctes: &CteSchemas) -> Result<Schema, InferenceError> {
        // First, build the tables visible through the FROM clause
        let scope = self.infer_from_clause(&select.from, ctes)?;
        let source_schema = merge_scope(&scope);

        let group_by_cols: Option<Vec<String>> = match &select.group_by {
            GroupByExpr::All(_) => None,
            GroupByExpr::Expressions(exprs, _) if exprs.is_empty() => None,
            GroupByExpr::Expressions(exprs, _) => exprs
                .iter()
                .map(|expr| match expr {
                    Expr::Identifier(ident) => Some(ident.value.clone()),
                    Expr::CompoundIdentifier(idents) => idents.last().map(|i| i.value.clone()),
                    _ => None,
                })
                .collect(),
        };

        let mut columns = Vec::new();

        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) => {
                    let (col_type, col_name) = self.infer_expr(expr, &scope, &source_schema)?;
                    check_group_key(expr, &col_name, group_by_cols.as_deref())?;
                    columns.push(Column::new(col_name, col_type));
                }
                SelectItem::ExprWithAlias { expr, alias } => {
                    let (col_type, _) = self.infer_expr(expr, &scope, &source_schema)?;
                    check_group_key(expr, &alias.value, group_by_cols.as_deref())?;
                    columns.push(Column::new(alias.value.clone(), col_type));
                }
                SelectItem::Wildcard(_) => {
                    columns.extend(source_schema.columns.iter().cloned());
                }
                SelectItem::QualifiedWildcard(name, _) => {
                    let qualifier = name.0.last().map(|i| i.value.as_str()).unwrap_or_default();
                    match find_scope(&scope, qualifier) {
                        Some((_, schema)) => columns.extend(schema.columns.iter().cloned()),
                        None => return Err(InferenceError::UnknownTable(name.to_string())),
                    }
                }
            }
        }

        Ok(Schema::from_columns(columns))
    }

    /// Tables visible in a FROM clause, keyed by alias
    fn infer_from_clause(
        &self,
        from: &[TableWithJoins],
        ctes: &CteSchemas,
    ) -> Result<Vec<(String, Schema)>, InferenceError> {
        let mut scope = Vec::new();
        for table_with_joins in from {
            self.infer_table_factor(&table_with_joins.relation, ctes, &mut scope)?;
            for join in &table_with_joins.joins {
                self.infer_table_factor(&join.relation, ctes, &mut scope)?;
            }
        }
        Ok(scope)
    }

    /// Infer schema from a table factor
    fn infer_table_factor(
        &self,
        table_factor: &TableFactor,
        ctes: &CteSchemas,
        scope: &mut Vec<(String, Schema)>,
    ) -> Result<(), InferenceError> {
        match table_factor {
            TableFactor::Table { name, alias, .. } => {
                let visible = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .or_else(|| name.0.last().map(|i| i.value.clone()))
                    .unwrap_or_default();

                let cte = match name.0.as_slice() {
                    [single] => ctes.get(&normalize(&single.value)),
                    _ => None,
                };
                let schema = cte
                    .or_else(|| self.context.lookup_object(name).map(|e| &e.schema))
                    .ok_or_else(|| InferenceError::UnknownTable(name.to_string()))?;

                scope.push((visible, schema.clone()));
                Ok(())
            }
            TableFactor::Derived { subquery, alias, .. } => {
                let schema = self.infer_query_scoped(subquery, ctes)?;
                let visible = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default();
                scope.push((visible, schema));
                Ok(())
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.infer_table_factor(&table_with_joins.relation, ctes, scope)?;
                for join in &table_with_joins.joins {
                    self.infer_table_factor(&join.relation, ctes, scope)?;
                }
                Ok(())
            }
            _ => Err(InferenceError::UnsupportedConstruct(
                "Unsupported table factor".to_string(),
            )),
        }
    }

    /// Infer type and name from an expression
    fn infer_expr(
        &self,
        expr: &Expr,
        scope: &[(String, Schema)],
        source_schema: &Schema,
    ) -> Result<(LogicalType, String), InferenceError> {
        match expr {
            Expr::Identifier(ident) => {
                let col_name = ident.value.clone();

                match find_column(source_schema, &col_name) {
                    Some(col) => Ok((col.logical_type.clone(), col.name.clone())),
                    None => Err(InferenceError::UnknownColumn(col_name)),
                }
            }

            Expr::CompoundIdentifier(idents) => {
                // e.g., table.column
                let (qualifier, column) = match idents.as_slice() {
                    [.., q, c] => (q.value.as_str(), c.value.as_str()),
                    [c] => ("", c.value.as_str()),
                    [] => return Err(InferenceError::UnknownColumn(String::new())),
                };
                let schema = match find_scope(scope, qualifier) {
                    Some((_, schema)) => schema,
                    None => source_schema,
                };

                match find_column(schema, column) {
                    Some(col) => Ok((col.logical_type.clone(), col.name.clone())),
                    None => Err(InferenceError::UnknownColumn(expr.to_string())),
                }
            }

            Expr::Nested(inner) => self.infer_expr(inner, scope, source_schema),

            Expr::Cast { expr, data_type, .. } => {
                let logical_type = sqlparser_type_to_logical(data_type);
                let (_, name) = self.infer_expr(expr, scope, source_schema)?;
                Ok((logical_type, name))
            }

            Expr::Value(value) => Ok(infer_literal(value)),

            Expr::Function(func) => {
                let args: Vec<&Expr> = match &func.args {
                    FunctionArguments::List(list) => list
                        .args
                        .iter()
                        .filter_map(|arg| match arg {
                            FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => Some(e),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                let func_name = func.name.to_string().to_lowercase();
                let return_type = match func_name.as_str() {
                    "count" => LogicalType::Int,
                    "avg" | "mean" | "stddev" | "variance" => LogicalType::Float,
                    "sum" | "min" | "max" | "abs" | "round" | "coalesce" | "ifnull" | "nullif"
                    | "first_value" | "last_value" | "lag" | "lead" => match args.first() {
                        Some(arg) => self.infer_expr(arg, scope, source_schema)?.0,
                        None => LogicalType::Unknown,
                    },
                    "concat" | "upper" | "lower" | "trim" | "substring" | "substr" => {
                        LogicalType::String
                    }
                    "length" | "row_number" | "rank" | "dense_rank" => LogicalType::Int,
                    "now" | "current_timestamp" => LogicalType::Timestamp,
                    "current_date" => LogicalType::Date,
                    _ => LogicalType::Unknown,
                };
                Ok((return_type, func_name))
            }

            Expr::BinaryOp { left, op, right } => {
                use sqlparser::ast::BinaryOperator::*;

                let (left_type, _) = self.infer_expr(left, scope, source_schema)?;
                let (right_type, _) = self.infer_expr(right, scope, source_schema)?;

                let result_type = match op {
                    Eq | NotEq | Lt | LtEq | Gt | GtEq | And | Or => LogicalType::Bool,
                    Divide => LogicalType::Float,
                    Plus | Minus | Multiply | Modulo => left_type.promote(&right_type),
                    StringConcat => LogicalType::String,
                    _ => LogicalType::Unknown,
                };
                Ok((result_type, "expr".to_string()))
            }

            Expr::IsNull(_) | Expr::IsNotNull(_) | Expr::InList { .. } | Expr::Between { .. }
            | Expr::Like { .. } => Ok((LogicalType::Bool, "expr".to_string())),

            Expr::Case { results, else_result, .. } => {
                let first = results.first().or(else_result.as_deref());
                let logical_type = match first {
                    Some(e) => self.infer_expr(e, scope, source_schema)?.0,
                    None => LogicalType::Unknown,
                };
                Ok((logical_type, "case_expr".to_string()))
            }

            _ => Ok((LogicalType::Unknown, "expr".to_string())),
        }
    }
}

fn merge_scope(scope: &[(String, Schema)]) -> Schema {
    let mut columns: Vec<Column> = Vec::new();
    for (_, schema) in scope {
        for col in &schema.columns {
            // Left side wins on name collisions
            if !columns.iter().any(|c| c.name == col.name) {
                columns.push(col.clone());
            }
        }
    }
    Schema::from_columns(columns)
}

fn find_scope<'s>(scope: &'s [(String, Schema)], alias: &str) -> Option<&'s (String, Schema)> {
    scope
        .iter()
        .find(|(a, _)| a == alias)
        .or_else(|| scope.iter().find(|(a, _)| a.eq_ignore_ascii_case(alias)))
}

fn find_column<'s>(schema: &'s Schema, name: &str) -> Option<&'s Column> {
    schema
        .find_column(name)
        .or_else(|| schema.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
}

fn check_group_key(expr: &Expr, name: &str, group_by: Option<&[String]>) -> Result<(), InferenceError> {
    let Some(keys) = group_by else {
        return Ok(());
    };

    let is_group_key = match expr {
        Expr::Identifier(ident) => keys.contains(&ident.value),
        Expr::CompoundIdentifier(idents) => {
            idents.last().map(|i| keys.contains(&i.value)).unwrap_or(false)
        }
        Expr::Value(_) => true,
        _ => contains_aggregate(expr),
    };

    if is_group_key {
        Ok(())
    } else {
        Err(InferenceError::InvalidGroupByColumn(name.to_string()))
    }
}

/// Whether an expression contains an aggregate call
pub fn contains_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(func) => {
            func.over.is_none() && is_aggregate_function(&func.name.to_string())
        }
        Expr::BinaryOp { left, right, .. } => contains_aggregate(left) || contains_aggregate(right),
        Expr::UnaryOp { expr, .. } | Expr::Nested(expr) | Expr::Cast { expr, .. } => {
            contains_aggregate(expr)
        }
        Expr::Case { conditions, results, else_result, .. } => {
            conditions.iter().chain(results.iter()).any(contains_aggregate)
                || else_result.as_deref().is_some_and(contains_aggregate)
        }
        _ => false,
    }
}

/// Check if a function name is an aggregate
pub fn is_aggregate_function(name: &str) -> bool {
    matches!(
        name.to_uppercase().as_str(),
        "COUNT" | "SUM" | "AVG" | "MEAN" | "MIN" | "MAX" | "STDDEV" | "VARIANCE"
            | "ARRAY_AGG" | "STRING_AGG" | "LISTAGG" | "PERCENTILE_CONT" | "PERCENTILE_DISC"
            | "ANY_VALUE"
    )
}

/// Convert sqlparser DataType to LogicalType
pub fn sqlparser_type_to_logical(data_type: &DataType) -> LogicalType {
    use sqlparser::ast::ExactNumberInfo;

    match data_type {
        DataType::SmallInt(_) | DataType::Int(_) | DataType::BigInt(_) | DataType::Integer(_) => {
            LogicalType::Int
        }
        DataType::Float(_) | DataType::Real | DataType::Double | DataType::DoublePrecision => {
            LogicalType::Float
        }
        DataType::Decimal(info) | DataType::Numeric(info) => {
            let clamp = |v: u64| Some(v.min(u16::MAX as u64) as u16);
            match info {
                ExactNumberInfo::None => LogicalType::Decimal { precision: None, scale: None },
                ExactNumberInfo::Precision(p) => LogicalType::Decimal {
                    precision: clamp(*p),
                    scale: Some(0),
                },
                ExactNumberInfo::PrecisionAndScale(p, s) => LogicalType::Decimal {
                    precision: clamp(*p),
                    scale: clamp(*s),
                },
            }
        }
        DataType::Boolean => LogicalType::Bool,
        DataType::Char(_) | DataType::Varchar(_) | DataType::Text | DataType::String(_) => {
            LogicalType::String
        }
        DataType::Date => LogicalType::Date,
        DataType::Timestamp(_, _) | DataType::Datetime(_) => LogicalType::Timestamp,
        DataType::JSON => LogicalType::Json,
        _ => LogicalType::Unknown,
    }
}

/// Infer type from a literal value
fn infer_literal(value: &Value) -> (LogicalType, String) {
    match value {
        Value::Number(n, _) if n.contains('.') => (LogicalType::Float, "literal".to_string()),
        Value::Number(_, _) => (LogicalType::Int, "literal".to_string()),
        Value::SingleQuotedString(_) | Value::DoubleQuotedString(_) => {
            (LogicalType::String, "literal".to_string())
        }
        Value::Boolean(_) => (LogicalType::Bool, "literal".to_string()),
        Value::Null => (LogicalType::Unknown, "null".to_string()),
        _ => (LogicalType::Unknown, "literal".to_string()),
    }
}

/// Schema inference errors
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Unsupported statement: {0}")]
    UnsupportedStatement(String),

    #[error("Unsupported SQL construct: {0}")]
    UnsupportedConstruct(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Set operation sides have {0} and {1} columns")]
    SetOperationArity(usize, usize),

    #[error("Column '{0}' not in GROUP BY and not an aggregate")]
    InvalidGroupByColumn(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::SqlParser;

    fn create_test_context() -> InferenceContext {
        let mut context = InferenceContext::new();

        let users_schema = Schema::from_columns(vec![
            Column::new("id", LogicalType::Int),
            Column::new("name", LogicalType::String),
            Column::new("email", LogicalType::String),
            Column::new("age", LogicalType::Int),
        ]);
        context.add_dependency("p.sources.users", ["analytics.users", "users"], users_schema);

        let orders_schema = Schema::from_columns(vec![
            Column::new("order_id", LogicalType::Int),
            Column::new("user_id", LogicalType::Int),
            Column::new("amount", LogicalType::Float),
        ]);
        context.add_table("orders", orders_schema);

        context
    }

    fn infer(sql: &str) -> Result<Schema, InferenceError> {
        let context = create_test_context();
        let query = SqlParser::new().parse_query(sql).unwrap();
        SchemaInference::new(&context).infer_query(&query)
    }

    #[test]
    fn qualified_names_fall_back_to_their_suffix() {
        let context = create_test_context();
        assert_eq!(context.lookup("Analytics.Users").unwrap().dep_id, "p.sources.users");
        assert_eq!(context.lookup("prod.analytics.users").unwrap().dep_id, "p.sources.users");
        assert_eq!(context.lookup("warehouse.orders").unwrap().dep_id, "orders");
        assert!(context.lookup("analytics.missing").is_none());

        let schema = infer("SELECT amount FROM warehouse.sales.orders").unwrap();
        assert_eq!(schema.column_names(), vec!["amount"]);
    }

    #[test]
    fn infer_simple_select() {
        let schema = infer("SELECT id, name FROM users").unwrap();
        assert_eq!(schema.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn infer_with_alias() {
        let schema = infer("SELECT id, name AS user_name, email AS user_email FROM users").unwrap();
        assert_eq!(schema.column_names(), vec!["id", "user_name", "user_email"]);
    }

    #[test]
    fn infer_with_cast() {
        let schema = infer("SELECT CAST(id AS VARCHAR) FROM users").unwrap();
        assert_eq!(schema.columns.len(), 1);
        assert_eq!(schema.columns[0].logical_type, LogicalType::String);
    }

    #[test]
    fn infer_select_star_expands() {
        let schema = infer("SELECT * FROM Analytics.Users").unwrap();
        assert_eq!(schema.columns.len(), 4);
    }

    #[test]
    fn infer_with_literal() {
        let schema = infer("SELECT id, 'active' AS status FROM users").unwrap();
        assert_eq!(schema.columns[1].logical_type, LogicalType::String);
    }

    #[test]
    fn infer_join_with_qualified_wildcard() {
        let schema =
            infer("SELECT u.name, o.* FROM users AS u JOIN orders AS o ON u.id = o.user_id").unwrap();
        assert_eq!(schema.column_names(), vec!["name", "order_id", "user_id", "amount"]);
    }

    #[test]
    fn infer_through_ctes() {
        let schema = infer(
            "WITH big AS (SELECT user_id, amount * 2 AS doubled FROM orders) \
             SELECT user_id, doubled FROM big",
        )
        .unwrap();
        assert_eq!(schema.column_names(), vec!["user_id", "doubled"]);
        assert_eq!(schema.columns[1].logical_type, LogicalType::Float);
    }

    #[test]
    fn infer_group_by_with_aggregate() {
        let schema = infer("SELECT name, COUNT(*) AS user_count FROM users GROUP BY name").unwrap();
        assert_eq!(schema.column_names(), vec!["name", "user_count"]);
        assert_eq!(schema.columns[1].logical_type, LogicalType::Int);
    }

    #[test]
    fn infer_group_by_unaliased_aggregate_is_named_after_function() {
        let schema = infer("SELECT name, SUM(age) FROM users GROUP BY name").unwrap();
        assert_eq!(schema.column_names(), vec!["name", "sum"]);
    }

    #[test]
    fn infer_group_by_invalid_column_errors() {
        let result = infer("SELECT name, email FROM users GROUP BY name");
        assert!(matches!(result, Err(InferenceError::InvalidGroupByColumn(_))));
    }

    #[test]
    fn infer_union_widens_types() {
        let schema = infer("SELECT age AS v FROM users UNION ALL SELECT amount FROM orders").unwrap();
        assert_eq!(schema.column_names(), vec!["v"]);
        assert_eq!(schema.columns[0].logical_type, LogicalType::Float);
    }

    #[test]
    fn unknown_table_errors() {
        assert!(matches!(infer("SELECT a FROM missing"), Err(InferenceError::UnknownTable(_))));
    }
}
