//! Dialect mapping and identifier rewriting

use crate::parser::{ParseError, SqlParser};
use sqlparser::ast::{
    visit_expressions_mut, visit_relations_mut, Expr, Ident, Query, Select, SelectItem, SetExpr,
    TableFactor,
};
use sqlparser::dialect::{
    BigQueryDialect, Dialect as SqlDialect, DuckDbDialect, GenericDialect, MySqlDialect,
    PostgreSqlDialect, SnowflakeDialect,
};
use std::ops::ControlFlow;
use vinyl_core::Dialect;

/// sqlparser dialect for a configured dialect
pub fn sqlparser_dialect(dialect: Dialect) -> Box<dyn SqlDialect> {
    match dialect {
        Dialect::Ansi => Box::new(GenericDialect {}),
        Dialect::BigQuery => Box::new(BigQueryDialect {}),
        Dialect::Snowflake => Box::new(SnowflakeDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
    }
}

/// Identifier quoted the way `dialect` expects
pub fn quoted_ident(value: &str, dialect: Dialect) -> Ident {
    Ident::with_quote(dialect.quote_char(), value)
}

/// Quote every identifier in a query with the dialect's quote character
///
/// Covers column references, table names, CTE names and aliases. Function
/// names are left untouched.
pub fn quote_identifiers(query: &mut Query, dialect: Dialect) {
    let quote = dialect.quote_char();

    let _ = visit_relations_mut(query, |name| {
        for ident in &mut name.0 {
            ident.quote_style = Some(quote);
        }
        ControlFlow::<()>::Continue(())
    });

    let _ = visit_expressions_mut(query, |expr| {
        match expr {
            Expr::Identifier(ident) => ident.quote_style = Some(quote),
            Expr::CompoundIdentifier(idents) => {
                for ident in idents {
                    ident.quote_style = Some(quote);
                }
            }
            Expr::Subquery(subquery) => quote_aliases(subquery, quote),
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });

    quote_aliases(query, quote);
}

fn quote_aliases(query: &mut Query, quote: char) {
    if let Some(with) = &mut query.with {
        for cte in &mut with.cte_tables {
            cte.alias.name.quote_style = Some(quote);
            quote_aliases(&mut cte.query, quote);
        }
    }
    quote_set_expr(&mut query.body, quote);
}

fn quote_set_expr(body: &mut SetExpr, quote: char) {
    match body {
        SetExpr::Select(select) => quote_select(select, quote),
        SetExpr::Query(query) => quote_aliases(query, quote),
        SetExpr::SetOperation { left, right, .. } => {
            quote_set_expr(left, quote);
            quote_set_expr(right, quote);
        }
        _ => {}
    }
}

fn quote_select(select: &mut Select, quote: char) {
    for item in &mut select.projection {
        if let SelectItem::ExprWithAlias { alias, .. } = item {
            alias.quote_style = Some(quote);
        }
    }

    for table in &mut select.from {
        quote_table_factor(&mut table.relation, quote);
        for join in &mut table.joins {
            quote_table_factor(&mut join.relation, quote);
        }
    }
}

fn quote_table_factor(factor: &mut TableFactor, quote: char) {
    match factor {
        TableFactor::Table { alias, .. } => {
            if let Some(alias) = alias {
                alias.name.quote_style = Some(quote);
            }
        }
        TableFactor::Derived { subquery, alias, .. } => {
            if let Some(alias) = alias {
                alias.name.quote_style = Some(quote);
            }
            quote_aliases(subquery, quote);
        }
        TableFactor::NestedJoin { table_with_joins, alias } => {
            if let Some(alias) = alias {
                alias.name.quote_style = Some(quote);
            }
            quote_table_factor(&mut table_with_joins.relation, quote);
            for join in &mut table_with_joins.joins {
                quote_table_factor(&mut join.relation, quote);
            }
        }
        _ => {}
    }
}

/// Re-render a query written in one dialect for another
pub fn transpile(sql: &str, from: Dialect, to: Dialect) -> Result<String, ParseError> {
    let mut query = SqlParser::from_dialect(from).parse_query(sql)?;
    quote_identifiers(&mut query, to);
    Ok(query.to_string())
}
