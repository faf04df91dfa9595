//! Set operations
//!
//! `join` either takes explicit predicates or infers them from the
//! relationship graph of the registry. `union`, `difference` and
//! `intersect` accept inputs with different columns and fill the gaps with
//! NULL.

use crate::column::Col;
use crate::expr::{BinaryOp, Expr};
use crate::field::{FieldRef, Relationship};
use crate::relation::{JoinHow, RelOp, Relation, SetOpKind};
use crate::value::Value;
use std::collections::BTreeSet;
use tracing::debug;
use vinyl_core::{Column, LogicalType, Schema};

/// Join options
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// Infer predicates from the relationship graph when `on` is empty
    pub auto: bool,

    /// Permit one cross join when inputs are unrelated
    pub allow_cross_join: bool,

    /// Explicit predicates
    pub on: Vec<Col>,

    /// Join kind; left for inferred joins and inner for explicit ones
    pub how: Option<JoinHow>,

    /// Name template for clashing left columns; empty keeps the name
    pub lname: String,

    /// Name template for clashing right columns
    pub rname: String,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            auto: true,
            allow_cross_join: false,
            on: Vec::new(),
            how: None,
            lname: String::new(),
            rname: "{name}_right".to_string(),
        }
    }
}

impl JoinOptions {
    pub fn on(predicates: impl IntoIterator<Item = Col>) -> Self {
        Self {
            on: predicates.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn how(mut self, how: JoinHow) -> Self {
        self.how = Some(how);
        self
    }

    pub fn allow_cross_join(mut self) -> Self {
        self.allow_cross_join = true;
        self
    }
}

/// Join errors
#[derive(Debug, thiserror::Error)]
pub enum JoinError {
    #[error("join needs at least two relations")]
    TooFewInputs,

    #[error("No relationship between {left} and {right}; pass predicates or allow a cross join")]
    NoRelationship { left: String, right: String },

    #[error("Join predicate references a column outside the inputs: {0}")]
    UnknownColumn(String),

    #[error("Automatic join needs a schema registry")]
    NoRegistry,
}

/// Join two or more relations
///
/// Inputs are reduced left to right. With automatic inference each step
/// picks the first remaining input related to anything joined so far, so
/// relationships through an intermediate input are found regardless of
/// input order.
pub fn join(inputs: &[&Relation], options: &JoinOptions) -> Result<Relation, JoinError> {
    let (first, rest) = match inputs {
        [first, rest @ ..] if !rest.is_empty() => (*first, rest),
        _ => return Err(JoinError::TooFewInputs),
    };

    if !options.on.is_empty() || !options.auto {
        return explicit_join(first, rest, options);
    }

    let registry = inputs
        .iter()
        .find_map(|r| r.registry().cloned())
        .ok_or(JoinError::NoRegistry)?;

    let mut acc = first.clone();
    let mut remaining: Vec<&Relation> = rest.to_vec();
    let mut crossed = false;

    while !remaining.is_empty() {
        let found = remaining.iter().enumerate().find_map(|(i, candidate)| {
            infer_predicate(&registry, &acc, candidate).map(|predicate| (i, predicate))
        });

        match found {
            Some((i, predicate)) => {
                let right = remaining.remove(i);
                let how = options.how.unwrap_or(JoinHow::Left);
                acc = joined(&acc, right, Some(predicate), how, options);
            }
            None if options.allow_cross_join && !crossed => {
                let right = remaining.remove(0);
                debug!(
                    left = ?acc.owner_tables(),
                    right = ?right.owner_tables(),
                    "Cross joining unrelated inputs"
                );
                acc = joined(&acc, right, None, JoinHow::Cross, options);
                crossed = true;
            }
            None => {
                let describe =
                    |r: &Relation| r.owner_tables().into_iter().collect::<Vec<_>>().join(", ");
                return Err(JoinError::NoRelationship {
                    left: describe(&acc),
                    right: describe(remaining[0]),
                });
            }
        }
    }

    Ok(acc)
}

/// Output columns that pass through from a declared column
fn origins(relation: &Relation) -> Vec<(String, FieldRef)> {
    relation
        .columns()
        .into_iter()
        .filter_map(|c| relation.column_origin(c).map(|o| (c.to_string(), o)))
        .collect()
}

/// Equality predicate between `left` and `right` from the relationship graph
///
/// When several relationships apply the smallest one wins.
fn infer_predicate(
    registry: &crate::field::SchemaRegistry,
    left: &Relation,
    right: &Relation,
) -> Option<Expr> {
    let left_cols = origins(left);
    let right_cols = origins(right);
    let find = |cols: &[(String, FieldRef)], table: &str, column: &str| {
        cols.iter()
            .find(|(_, o)| o.table == table && o.column == column)
            .map(|(name, _)| name.clone())
    };

    let mut candidates: Vec<(&Relationship, String, String)> = Vec::new();
    for a in left.owner_tables() {
        for b in right.owner_tables() {
            for rel in registry.relationships_between(&a, &b) {
                let pair = match (
                    find(&left_cols, &rel.source_table, &rel.source_column),
                    find(&right_cols, &rel.target_table, &rel.target_column),
                ) {
                    (Some(l), Some(r)) => Some((l, r)),
                    _ => match (
                        find(&left_cols, &rel.target_table, &rel.target_column),
                        find(&right_cols, &rel.source_table, &rel.source_column),
                    ) {
                        (Some(l), Some(r)) => Some((l, r)),
                        _ => None,
                    },
                };
                if let Some((l, r)) = pair {
                    candidates.push((rel, l, r));
                }
            }
        }
    }

    candidates.sort_by(|x, y| x.0.cmp(y.0));
    candidates.dedup_by(|x, y| x.1 == y.1 && x.2 == y.2);
    let mut candidates = candidates.into_iter();
    let (chosen, l, r) = candidates.next()?;
    for (skipped, _, _) in candidates {
        debug!(chosen = ?chosen, skipped = ?skipped, "Ignoring additional relationship");
    }

    Some(Expr::binary(
        BinaryOp::Eq,
        Expr::Column {
            name: l,
            relation: Some(left.id()),
        },
        Expr::Column {
            name: r,
            relation: Some(right.id()),
        },
    ))
}

fn explicit_join(
    first: &Relation,
    rest: &[&Relation],
    options: &JoinOptions,
) -> Result<Relation, JoinError> {
    let how = options.how.unwrap_or(JoinHow::Inner);
    let mut pending: Vec<Expr> = options.on.iter().map(|c| c.expr.clone()).collect();
    let mut acc = first.clone();

    for right in rest {
        // Predicates whose pinned columns are all available at this step
        let (ready, later): (Vec<Expr>, Vec<Expr>) = pending.into_iter().partition(|expr| {
            expr.column_refs().iter().all(|(_, relation)| match relation {
                Some(id) => acc.node().contains(*id) || right.node().contains(*id),
                None => true,
            })
        });
        pending = later;

        let predicate = ready
            .into_iter()
            .reduce(|a, b| Expr::binary(BinaryOp::And, a, b));
        let how = if predicate.is_none() && how != JoinHow::Cross {
            JoinHow::Cross
        } else {
            how
        };
        acc = joined(&acc, right, predicate, how, options);
    }

    match pending.first() {
        Some(expr) => Err(JoinError::UnknownColumn(
            expr.column_refs()
                .first()
                .map(|(name, _)| name.to_string())
                .unwrap_or_default(),
        )),
        None => Ok(acc),
    }
}

fn apply_template(template: &str, name: &str) -> String {
    template.replace("{name}", name)
}

/// Build the join node, renaming clashing columns
fn joined(
    left: &Relation,
    right: &Relation,
    on: Option<Expr>,
    how: JoinHow,
    options: &JoinOptions,
) -> Relation {
    let left_cols: BTreeSet<&str> = left.columns().into_iter().collect();
    let right_cols: BTreeSet<&str> = right.columns().into_iter().collect();

    let left_names: Vec<String> = left
        .columns()
        .into_iter()
        .map(|name| {
            if right_cols.contains(name) && !options.lname.is_empty() {
                apply_template(&options.lname, name)
            } else {
                name.to_string()
            }
        })
        .collect();

    let taken: BTreeSet<String> = left_names.iter().cloned().collect();
    let right_names: Vec<String> = right
        .columns()
        .into_iter()
        .map(|name| {
            if taken.contains(name) || left_cols.contains(name) {
                apply_template(&options.rname, name)
            } else {
                name.to_string()
            }
        })
        .collect();

    let nullable = |column: &Column, outer: bool| {
        if outer {
            column.clone().with_nullability(vinyl_core::Nullability::Yes)
        } else {
            column.clone()
        }
    };
    let left_outer = matches!(how, JoinHow::Right | JoinHow::Outer);
    let right_outer = matches!(how, JoinHow::Left | JoinHow::Outer);

    let mut columns: Vec<Column> = left
        .schema()
        .columns
        .iter()
        .zip(&left_names)
        .map(|(c, name)| nullable(c, left_outer).renamed(name.clone()))
        .collect();
    columns.extend(
        right
            .schema()
            .columns
            .iter()
            .zip(&right_names)
            .map(|(c, name)| nullable(c, right_outer).renamed(name.clone())),
    );

    Relation::combine(
        &[left, right],
        RelOp::Join {
            left: left.node().clone(),
            right: right.node().clone(),
            on,
            how,
            left_names,
            right_names,
        },
        Schema::from_columns(columns),
    )
}

/// Align inputs on the union of their columns, NULL where missing
fn aligned(inputs: &[&Relation]) -> (Schema, Vec<Relation>) {
    let mut columns: Vec<Column> = Vec::new();
    for input in inputs {
        for column in &input.schema().columns {
            match columns.iter_mut().find(|c| c.name == column.name) {
                Some(existing) => {
                    existing.logical_type = existing.logical_type.promote(&column.logical_type);
                }
                None => columns.push(column.clone()),
            }
        }
    }

    let aligned = inputs
        .iter()
        .map(|input| {
            let needs_fill = columns.iter().any(|c| !input.schema().contains(&c.name));
            let same_order = input.columns() == columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
            if !needs_fill && same_order {
                return (*input).clone();
            }

            let items = columns.iter().map(|c| {
                if input.schema().contains(&c.name) {
                    Col::named(c.name.clone())
                } else {
                    Col::promote(Expr::Cast {
                        expr: Box::new(Expr::Literal(Value::Null)),
                        to: match &c.logical_type {
                            LogicalType::Unknown => LogicalType::String,
                            other => other.clone(),
                        },
                    })
                    .alias(c.name.clone())
                }
            });
            // Every item is a known column or a literal
            input.select(items).unwrap_or_else(|_| (*input).clone())
        })
        .collect();

    (Schema::from_columns(columns), aligned)
}

fn set_op(kind: SetOpKind, inputs: &[&Relation], distinct: bool) -> Result<Relation, JoinError> {
    if inputs.len() < 2 {
        return Err(JoinError::TooFewInputs);
    }

    let (schema, aligned) = aligned(inputs);
    let refs: Vec<&Relation> = aligned.iter().collect();
    Ok(Relation::combine(
        &refs,
        RelOp::SetOp {
            kind,
            inputs: aligned.iter().map(|r| r.node().clone()).collect(),
            distinct,
        },
        schema,
    ))
}

/// Rows of every input, keeping duplicates unless `distinct`
pub fn union(inputs: &[&Relation], distinct: bool) -> Result<Relation, JoinError> {
    set_op(SetOpKind::Union, inputs, distinct)
}

/// Distinct rows of the first input found in none of the others
pub fn difference(inputs: &[&Relation]) -> Result<Relation, JoinError> {
    set_op(SetOpKind::Difference, inputs, true)
}

/// Distinct rows found in every input
pub fn intersect(inputs: &[&Relation]) -> Result<Relation, JoinError> {
    set_op(SetOpKind::Intersect, inputs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{MemoryConnector, Resource};
    use crate::field::{Field, SchemaRegistry, TableDecl};
    use crate::source::{source, DataAccess};
    use std::sync::Arc;
    use vinyl_core::TableRef;

    struct Shop {
        customers: Relation,
        orders: Relation,
        regions: Relation,
    }

    fn shop() -> Shop {
        let registry = Arc::new(
            SchemaRegistry::builder()
                .table(
                    TableDecl::new("shop.Regions", TableRef::named("regions"))
                        .field(Field::new("region_id", LogicalType::Int).primary_key())
                        .field(Field::new("region", LogicalType::String)),
                )
                .table(
                    TableDecl::new("shop.Customers", TableRef::named("customers"))
                        .field(Field::new("customer_id", LogicalType::Int).primary_key())
                        .field(
                            Field::new("region_id", LogicalType::Int)
                                .references_column("shop.Regions", "region_id"),
                        ),
                )
                .table(
                    TableDecl::new("shop.Orders", TableRef::named("orders"))
                        .field(Field::new("order_id", LogicalType::Int).primary_key())
                        .field(
                            Field::new("customer_id", LogicalType::Int)
                                .references_column("shop.Customers", "customer_id"),
                        ),
                )
                .build()
                .unwrap(),
        );

        let int = |v: i64| Value::Int(v);
        let connector = MemoryConnector::new()
            .with_table(
                &TableRef::named("regions"),
                registry.table("shop.Regions").unwrap().schema(),
                vec![vec![int(1), Value::from("north")], vec![int(2), Value::from("south")]],
            )
            .with_table(
                &TableRef::named("customers"),
                registry.table("shop.Customers").unwrap().schema(),
                vec![vec![int(10), int(1)], vec![int(11), int(2)]],
            )
            .with_table(
                &TableRef::named("orders"),
                registry.table("shop.Orders").unwrap().schema(),
                vec![vec![int(100), int(10)], vec![int(101), int(10)], vec![int(102), int(11)]],
            );
        let resource = Resource::from_connector("mem", "duckdb", Arc::new(connector));
        let access = DataAccess::full();

        Shop {
            customers: source(&registry, "shop.Customers", &resource, &access).unwrap(),
            orders: source(&registry, "shop.Orders", &resource, &access).unwrap(),
            regions: source(&registry, "shop.Regions", &resource, &access).unwrap(),
        }
    }

    #[test]
    fn multi_hop_join_is_found_in_any_input_order() {
        let shop = shop();
        // Orders and Regions only relate through Customers
        let joined = join(&[&shop.orders, &shop.regions, &shop.customers], &JoinOptions::default()).unwrap();

        assert_eq!(
            joined.columns(),
            vec!["order_id", "customer_id", "customer_id_right", "region_id", "region_id_right", "region"]
        );
        let batch = joined.execute().unwrap();
        assert_eq!(batch.len(), 3);
        let regions: Vec<_> = batch.column("region").unwrap().into_iter().cloned().collect();
        assert_eq!(regions, vec![Value::from("north"), Value::from("north"), Value::from("south")]);
    }

    #[test]
    fn explicit_predicates_default_to_inner() {
        let shop = shop();
        let options = JoinOptions::on([shop.orders.col("customer_id").eq(shop.customers.col("customer_id"))]);
        let joined = join(&[&shop.orders, &shop.customers], &options).unwrap();

        assert!(matches!(joined.node().op, RelOp::Join { how: JoinHow::Inner, .. }));
        assert_eq!(joined.execute().unwrap().len(), 3);
    }

    #[test]
    fn unrelated_inputs_need_cross_join_permission() {
        let shop = shop();
        let regions = shop.regions.select([Col::named("region")]).unwrap();
        let orders = shop.orders.select([Col::named("order_id")]).unwrap();

        let err = join(&[&orders, &regions], &JoinOptions::default()).unwrap_err();
        assert!(matches!(err, JoinError::NoRelationship { .. }));

        let crossed = join(&[&orders, &regions], &JoinOptions::default().allow_cross_join()).unwrap();
        assert_eq!(crossed.execute().unwrap().len(), 6);
    }

    #[test]
    fn set_ops_fill_missing_columns_with_null() {
        let shop = shop();
        let a = shop.customers.select([Col::named("customer_id")]).unwrap();
        let b = shop.orders.select([Col::named("order_id"), Col::named("customer_id")]).unwrap();

        let unioned = union(&[&a, &b], false).unwrap();
        assert_eq!(unioned.columns(), vec!["customer_id", "order_id"]);

        let batch = unioned.execute().unwrap();
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.rows[0], vec![Value::Int(10), Value::Null]);

        let common = intersect(&[
            &shop.customers.select([Col::named("customer_id")]).unwrap(),
            &shop.orders.select([Col::named("customer_id")]).unwrap(),
        ])
        .unwrap();
        assert_eq!(common.execute().unwrap().len(), 2);

        let without = difference(&[
            &shop.orders.select([Col::named("customer_id")]).unwrap(),
            &shop
                .customers
                .select([Col::named("customer_id")])
                .unwrap()
                .filter(Col::named("customer_id").eq(10))
                .unwrap(),
        ])
        .unwrap();
        assert_eq!(without.execute().unwrap().rows, vec![vec![Value::Int(11)]]);
    }
}
