//! SQL rendering
//!
//! Every node renders to one SELECT with an explicit column list. Base
//! tables are referenced directly, anything else becomes a subquery aliased
//! `t0`, `t1`, ... within its parent.

use crate::expr::{AggFn, Expr};
use crate::relation::{RelNode, RelOp, SetOpKind};
use crate::value::Value;
use vinyl_core::{Dialect, LogicalType, TableRef};

/// Column reference renderer: `(name, relation) -> SQL`
pub type ColumnRenderer<'a> = dyn Fn(&str, Option<u64>) -> String + 'a;

/// Render a relation tree as a query
pub fn render(node: &RelNode, dialect: Dialect) -> String {
    let q = |name: &str| dialect.quote_ident(name);
    let local = |name: &str, _: Option<u64>| format!("t0.{}", q(name));

    match &node.op {
        RelOp::Unbound { .. } | RelOp::Placeholder { .. } => {
            format!("SELECT {} FROM {}", passthrough(node, dialect), from_item(node, "t0", dialect))
        }

        RelOp::Select { input, items } => {
            let columns = items
                .iter()
                .map(|(name, expr)| match expr.as_column() {
                    Some(column) if column == name => local(column, None),
                    _ => format!("{} AS {}", render_expr(expr, dialect, &local), q(name)),
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("SELECT {} FROM {}", columns, from_item(input, "t0", dialect))
        }

        RelOp::Filter { input, predicate } => format!(
            "SELECT {} FROM {} WHERE {}",
            passthrough(input, dialect),
            from_item(input, "t0", dialect),
            render_expr(predicate, dialect, &local)
        ),

        RelOp::Aggregate { input, by, metrics } => {
            let columns = by
                .iter()
                .chain(metrics)
                .map(|(name, expr)| match expr.as_column() {
                    Some(column) if column == name => local(column, None),
                    _ => format!("{} AS {}", render_expr(expr, dialect, &local), q(name)),
                })
                .collect::<Vec<_>>()
                .join(", ");
            let mut sql = format!("SELECT {} FROM {}", columns, from_item(input, "t0", dialect));
            if !by.is_empty() {
                let keys = by
                    .iter()
                    .map(|(_, expr)| render_expr(expr, dialect, &local))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" GROUP BY {}", keys));
            }
            sql
        }

        RelOp::Sort { input, keys } => {
            let keys = keys
                .iter()
                .map(|key| {
                    let direction = if key.ascending { "ASC" } else { "DESC" };
                    format!("{} {}", render_expr(&key.expr, dialect, &local), direction)
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SELECT {} FROM {} ORDER BY {}",
                passthrough(input, dialect),
                from_item(input, "t0", dialect),
                keys
            )
        }

        RelOp::Limit { input, n, offset } => {
            let mut sql = format!(
                "SELECT {} FROM {} LIMIT {}",
                passthrough(input, dialect),
                from_item(input, "t0", dialect),
                n
            );
            if *offset > 0 {
                sql.push_str(&format!(" OFFSET {}", offset));
            }
            sql
        }

        RelOp::Distinct { input } => format!(
            "SELECT DISTINCT {} FROM {}",
            passthrough(input, dialect),
            from_item(input, "t0", dialect)
        ),

        RelOp::Join {
            left,
            right,
            on,
            how,
            left_names,
            right_names,
        } => {
            let side = |alias: &str, input: &RelNode, names: &[String]| {
                input
                    .schema
                    .columns
                    .iter()
                    .zip(names)
                    .map(|(column, out)| {
                        let reference = format!("{}.{}", alias, q(&column.name));
                        if column.name == *out {
                            reference
                        } else {
                            format!("{} AS {}", reference, q(out))
                        }
                    })
                    .collect::<Vec<_>>()
            };
            let mut columns = side("t0", left, left_names);
            columns.extend(side("t1", right, right_names));

            let mut sql = format!(
                "SELECT {} FROM {} {} {}",
                columns.join(", "),
                from_item(left, "t0", dialect),
                how.sql_keyword(),
                from_item(right, "t1", dialect)
            );
            if let Some(predicate) = on {
                let qualify = |name: &str, relation: Option<u64>| {
                    let pinned = relation.and_then(|id| {
                        left.resolve(id, name)
                            .map(|n| ("t0", n))
                            .or_else(|| right.resolve(id, name).map(|n| ("t1", n)))
                    });
                    match pinned {
                        Some((alias, local)) => format!("{}.{}", alias, q(&local)),
                        None if left.schema.contains(name) => format!("t0.{}", q(name)),
                        None => format!("t1.{}", q(name)),
                    }
                };
                sql.push_str(&format!(" ON {}", render_expr(predicate, dialect, &qualify)));
            }
            sql
        }

        RelOp::SetOp {
            kind,
            inputs,
            distinct,
        } => {
            let columns = node
                .schema
                .columns
                .iter()
                .map(|c| q(&c.name))
                .collect::<Vec<_>>()
                .join(", ");
            let operator = set_operator(*kind, *distinct, dialect);
            inputs
                .iter()
                .enumerate()
                .map(|(i, input)| {
                    format!(
                        "SELECT {} FROM ({}) AS t{}",
                        columns,
                        render(input, dialect),
                        i
                    )
                })
                .collect::<Vec<_>>()
                .join(&format!(" {} ", operator))
        }
    }
}

fn set_operator(kind: SetOpKind, distinct: bool, dialect: Dialect) -> &'static str {
    // BigQuery wants the quantifier spelled out
    let explicit = dialect == Dialect::BigQuery;
    match (kind, distinct, explicit) {
        (SetOpKind::Union, false, _) => "UNION ALL",
        (SetOpKind::Union, true, false) => "UNION",
        (SetOpKind::Union, true, true) => "UNION DISTINCT",
        (SetOpKind::Difference, _, false) => "EXCEPT",
        (SetOpKind::Difference, _, true) => "EXCEPT DISTINCT",
        (SetOpKind::Intersect, _, false) => "INTERSECT",
        (SetOpKind::Intersect, _, true) => "INTERSECT DISTINCT",
    }
}

/// `t0."a", t0."b", ...` over every column of a node
fn passthrough(node: &RelNode, dialect: Dialect) -> String {
    node.schema
        .columns
        .iter()
        .map(|c| format!("t0.{}", dialect.quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn from_item(node: &RelNode, alias: &str, dialect: Dialect) -> String {
    match &node.op {
        RelOp::Unbound { table, .. } | RelOp::Placeholder { table, .. } => {
            format!("{} AS {}", table_name(table, dialect), alias)
        }
        _ => format!("({}) AS {}", render(node, dialect), alias),
    }
}

/// Quoted, dotted table name
pub fn table_name(table: &TableRef, dialect: Dialect) -> String {
    table
        .parts()
        .into_iter()
        .map(|part| dialect.quote_ident(part))
        .collect::<Vec<_>>()
        .join(".")
}

/// SQL type name for a logical type
pub fn sql_type(logical_type: &LogicalType) -> String {
    match logical_type {
        LogicalType::Bool => "BOOLEAN".to_string(),
        LogicalType::Int => "BIGINT".to_string(),
        LogicalType::Float => "DOUBLE".to_string(),
        LogicalType::Decimal {
            precision: Some(p),
            scale: Some(s),
        } => format!("DECIMAL({}, {})", p, s),
        LogicalType::Decimal { precision: Some(p), .. } => format!("DECIMAL({})", p),
        LogicalType::Decimal { .. } => "DECIMAL".to_string(),
        LogicalType::String | LogicalType::Unknown => "VARCHAR".to_string(),
        LogicalType::Date => "DATE".to_string(),
        LogicalType::Timestamp => "TIMESTAMP".to_string(),
        LogicalType::Json => "JSON".to_string(),
    }
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(true) => "TRUE".to_string(),
        Value::Bool(false) => "FALSE".to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format!("{:?}", f),
        Value::Float(_) => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
    }
}

/// Render an expression, delegating column references to `column`
pub fn render_expr(expr: &Expr, dialect: Dialect, column: &ColumnRenderer<'_>) -> String {
    let sub = |e: &Expr| render_expr(e, dialect, column);

    match expr {
        Expr::Column { name, relation } => column(name, *relation),
        Expr::Literal(value) => literal(value),
        Expr::Binary { op, left, right } => {
            format!("({} {} {})", sub(left), op.symbol(), sub(right))
        }
        Expr::Not(e) => format!("NOT ({})", sub(e)),
        Expr::Negate(e) => format!("-({})", sub(e)),
        Expr::IsNull(e) => format!("({} IS NULL)", sub(e)),
        Expr::IsNotNull(e) => format!("({} IS NOT NULL)", sub(e)),
        Expr::Cast { expr, to } => format!("CAST({} AS {})", sub(expr), sql_type(to)),
        Expr::Function { func, args } => format!(
            "{}({})",
            func.sql_name(),
            args.iter().map(sub).collect::<Vec<_>>().join(", ")
        ),
        Expr::Aggregate { func, arg } => match (func, arg) {
            (AggFn::Count, None) => "COUNT(*)".to_string(),
            (AggFn::CountDistinct, Some(arg)) => format!("COUNT(DISTINCT {})", sub(arg)),
            (func, Some(arg)) => format!("{}({})", aggregate_name(*func), sub(arg)),
            (func, None) => format!("{}(*)", aggregate_name(*func)),
        },
    }
}

fn aggregate_name(func: AggFn) -> &'static str {
    match func {
        AggFn::Sum => "SUM",
        AggFn::Mean => "AVG",
        AggFn::Min => "MIN",
        AggFn::Max => "MAX",
        AggFn::Count | AggFn::CountDistinct => "COUNT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{lit, Col};
    use crate::relation::Relation;
    use vinyl_core::{Column, Schema};

    fn orders() -> Relation {
        Relation::unbound(
            TableRef::new(Some("shop"), Some("raw"), "orders"),
            "duckdb",
            None,
            Schema::from_columns(vec![
                Column::new("id", LogicalType::Int),
                Column::new("amount", LogicalType::Float),
                Column::new("status", LogicalType::String),
            ]),
            None,
        )
    }

    #[test]
    fn base_tables_render_directly() {
        assert_eq!(
            orders().to_sql(Dialect::Postgres),
            r#"SELECT t0."id", t0."amount", t0."status" FROM "shop"."raw"."orders" AS t0"#
        );
    }

    #[test]
    fn nested_operators_become_subqueries() {
        let sql = orders()
            .filter(Col::named("status").eq(lit("paid")))
            .unwrap()
            .aggregate([Col::named("status")], [Col::named("amount").sum().alias("total")])
            .unwrap()
            .to_sql(Dialect::Postgres);

        assert_eq!(
            sql,
            concat!(
                r#"SELECT t0."status", SUM(t0."amount") AS "total" FROM "#,
                r#"(SELECT t0."id", t0."amount", t0."status" FROM "shop"."raw"."orders" AS t0 "#,
                r#"WHERE (t0."status" = 'paid')) AS t0 GROUP BY t0."status""#
            )
        );
    }

    #[test]
    fn rendered_sql_parses_in_each_dialect() {
        let relation = orders()
            .mutate([Col::named("amount").cast(LogicalType::Int).alias("cents")])
            .unwrap()
            .sort([Col::named("cents").desc()])
            .unwrap()
            .limit(10, 5);

        for dialect in [Dialect::Postgres, Dialect::BigQuery, Dialect::Snowflake, Dialect::DuckDb] {
            relation.to_sql_ast(dialect).unwrap();
        }
    }
}
