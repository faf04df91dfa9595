//! Query optimization before lineage
//!
//! Expands `*` and `t.*` into explicit, dialect-quoted column lists so every
//! output column of a compiled node is named in its AST.

use crate::dialect::quoted_ident;
use crate::inference::{normalize, InferenceContext};
use crate::trace::output_name;
use sqlparser::ast::{
    Expr, Query, Select, SelectItem, SetExpr, TableFactor, TableWithJoins,
    WildcardAdditionalOptions,
};
use std::collections::HashMap;
use tracing::debug;
use vinyl_core::Dialect;

/// Optimizer errors
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("Cannot expand columns of unknown table: {0}")]
    UnknownTable(String),

    #[error("Cannot optimize: {0}")]
    Unsupported(String),
}

/// Replace every wildcard in a query with the columns it stands for
pub fn expand_wildcards(
    query: &mut Query,
    context: &InferenceContext,
    dialect: Dialect,
) -> Result<(), OptimizeError> {
    let expander = Expander { context, dialect };
    let columns = expander.query(query, &HashMap::new())?;
    debug!(columns = columns.len(), ?dialect, "Expanded wildcards");
    Ok(())
}

struct Expander<'a> {
    context: &'a InferenceContext,
    dialect: Dialect,
}

impl Expander<'_> {
    /// Returns the query's output column names
    fn query(
        &self,
        query: &mut Query,
        ctes: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, OptimizeError> {
        let mut local = ctes.clone();
        if let Some(with) = &mut query.with {
            for cte in &mut with.cte_tables {
                let names = self.query(&mut cte.query, &local)?;
                local.insert(normalize(&cte.alias.name.value), names);
            }
        }
        self.set_expr(&mut query.body, &local)
    }

    fn set_expr(
        &self,
        body: &mut SetExpr,
        ctes: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, OptimizeError> {
        match body {
            SetExpr::Select(select) => self.select(select, ctes),
            SetExpr::Query(query) => self.query(query, ctes),
            SetExpr::SetOperation { left, right, .. } => {
                let names = self.set_expr(left, ctes)?;
                self.set_expr(right, ctes)?;
                Ok(names)
            }
            other => Err(OptimizeError::Unsupported(other.to_string())),
        }
    }

    fn select(
        &self,
        select: &mut Select,
        ctes: &HashMap<String, Vec<String>>,
    ) -> Result<Vec<String>, OptimizeError> {
        let mut scope = Vec::new();
        for table in &mut select.from {
            self.from_item(table, ctes, &mut scope)?;
        }

        let mut projection = Vec::with_capacity(select.projection.len());
        let mut names = Vec::new();

        for item in select.projection.drain(..) {
            match item {
                SelectItem::Wildcard(ref options) if is_plain(options) => {
                    for (qualifier, columns) in &scope {
                        for column in columns {
                            projection.push(self.column_item(qualifier, column));
                            names.push(column.clone());
                        }
                    }
                }
                SelectItem::QualifiedWildcard(ref name, ref options) if is_plain(options) => {
                    let qualifier = name.0.last().map(|i| i.value.as_str()).unwrap_or_default();
                    let (qualifier, columns) = scope
                        .iter()
                        .find(|(q, _)| q.eq_ignore_ascii_case(qualifier))
                        .ok_or_else(|| OptimizeError::UnknownTable(name.to_string()))?;
                    for column in columns {
                        projection.push(self.column_item(qualifier, column));
                        names.push(column.clone());
                    }
                }
                SelectItem::ExprWithAlias { ref alias, .. } => {
                    names.push(alias.value.clone());
                    projection.push(item);
                }
                SelectItem::UnnamedExpr(ref expr) => {
                    names.push(output_name(expr));
                    projection.push(item);
                }
                // Modified wildcards stay as written
                other => projection.push(other),
            }
        }

        select.projection = projection;
        Ok(names)
    }

    fn column_item(&self, qualifier: &str, column: &str) -> SelectItem {
        let column = quoted_ident(column, self.dialect);
        if qualifier.is_empty() {
            SelectItem::UnnamedExpr(Expr::Identifier(column))
        } else {
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(vec![
                quoted_ident(qualifier, self.dialect),
                column,
            ]))
        }
    }

    fn from_item(
        &self,
        table: &mut TableWithJoins,
        ctes: &HashMap<String, Vec<String>>,
        scope: &mut Vec<(String, Vec<String>)>,
    ) -> Result<(), OptimizeError> {
        self.table_factor(&mut table.relation, ctes, scope)?;
        for join in &mut table.joins {
            self.table_factor(&mut join.relation, ctes, scope)?;
        }
        Ok(())
    }

    fn table_factor(
        &self,
        factor: &mut TableFactor,
        ctes: &HashMap<String, Vec<String>>,
        scope: &mut Vec<(String, Vec<String>)>,
    ) -> Result<(), OptimizeError> {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let qualifier = alias
                    .as_ref()
                    .map(|a| a.name.value.clone())
                    .or_else(|| name.0.last().map(|i| i.value.clone()))
                    .unwrap_or_default();

                let cte = match name.0.as_slice() {
                    [single] => ctes.get(&normalize(&single.value)).cloned(),
                    _ => None,
                };
                let columns = match cte {
                    Some(columns) => columns,
                    None => self
                        .context
                        .lookup_object(name)
                        .map(|entry| entry.schema.column_names().into_iter().map(String::from).collect())
                        .ok_or_else(|| OptimizeError::UnknownTable(name.to_string()))?,
                };

                scope.push((qualifier, columns));
                Ok(())
            }
            TableFactor::Derived { subquery, alias, .. } => {
                let columns = self.query(subquery, ctes)?;
                let qualifier = alias.as_ref().map(|a| a.name.value.clone()).unwrap_or_default();
                scope.push((qualifier, columns));
                Ok(())
            }
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.from_item(table_with_joins, ctes, scope)
            }
            other => Err(OptimizeError::Unsupported(other.to_string())),
        }
    }
}

/// A wildcard without EXCLUDE/EXCEPT/REPLACE/RENAME/ILIKE modifiers
fn is_plain(options: &WildcardAdditionalOptions) -> bool {
    options.opt_ilike.is_none()
        && options.opt_exclude.is_none()
        && options.opt_except.is_none()
        && options.opt_replace.is_none()
        && options.opt_rename.is_none()
}
