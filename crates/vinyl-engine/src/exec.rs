//! In-memory executor
//!
//! Evaluates a relation tree bottom-up over row batches. Base tables are
//! loaded through the connection functions carried by the relation.

use crate::connector::ConnectorError;
use crate::expr::{EvalError, Expr, RowContext};
use crate::relation::{ConnectionFn, JoinHow, RelNode, RelOp, SetOpKind};
use crate::value::{Batch, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Execution errors
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("No connection for table {0}")]
    Unbound(String),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error("Table {table} is missing columns: {columns}")]
    MissingColumns { table: String, columns: String },
}

/// One row of a batch
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl RowContext for Row<'_> {
    fn value(&self, name: &str, _relation: Option<u64>) -> Result<Value, EvalError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.values[i].clone())
            .ok_or_else(|| EvalError::UnknownColumn(name.to_string()))
    }
}

/// A candidate pair of rows while evaluating a join predicate
struct JoinRow<'a> {
    left_node: &'a RelNode,
    right_node: &'a RelNode,
    left: Row<'a>,
    right: Row<'a>,
}

impl RowContext for JoinRow<'_> {
    fn value(&self, name: &str, relation: Option<u64>) -> Result<Value, EvalError> {
        if let Some(id) = relation {
            if let Some(local) = self.left_node.resolve(id, name) {
                return self.left.value(&local, None);
            }
            if let Some(local) = self.right_node.resolve(id, name) {
                return self.right.value(&local, None);
            }
        }
        self.left
            .value(name, None)
            .or_else(|_| self.right.value(name, None))
    }
}

pub(crate) fn execute(
    node: &RelNode,
    connections: &BTreeMap<u64, Arc<ConnectionFn>>,
) -> Result<Batch, ExecError> {
    match &node.op {
        RelOp::Unbound { table, .. } | RelOp::Placeholder { table, .. } => {
            let connection = connections
                .get(&node.id)
                .ok_or_else(|| ExecError::Unbound(table.fqn()))?;
            debug!(table = %table, "Loading table");
            let batch = connection()?;

            let wanted = node.schema.column_names();
            batch.project(&wanted).ok_or_else(|| ExecError::MissingColumns {
                table: table.fqn(),
                columns: wanted
                    .iter()
                    .filter(|n| batch.column_index(n).is_none())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", "),
            })
        }

        RelOp::Select { input, items } => {
            let batch = execute(input, connections)?;
            let rows = batch
                .rows
                .iter()
                .map(|values| {
                    let row = Row {
                        columns: &batch.columns,
                        values,
                    };
                    items.iter().map(|(_, expr)| expr.eval(&row)).collect()
                })
                .collect::<Result<Vec<_>, EvalError>>()?;
            Ok(Batch::new(names(items), rows))
        }

        RelOp::Filter { input, predicate } => {
            let batch = execute(input, connections)?;
            let mut rows = Vec::new();
            for values in &batch.rows {
                let row = Row {
                    columns: &batch.columns,
                    values,
                };
                if predicate.eval(&row)? == Value::Bool(true) {
                    rows.push(values.clone());
                }
            }
            Ok(Batch::new(batch.columns, rows))
        }

        RelOp::Aggregate { input, by, metrics } => {
            let batch = execute(input, connections)?;
            aggregate(&batch, by, metrics)
        }

        RelOp::Sort { input, keys } => {
            let batch = execute(input, connections)?;
            let mut keyed = batch
                .rows
                .into_iter()
                .map(|values| {
                    let row = Row {
                        columns: &batch.columns,
                        values: &values,
                    };
                    let key = keys
                        .iter()
                        .map(|k| k.expr.eval(&row))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok((key, values))
                })
                .collect::<Result<Vec<_>, EvalError>>()?;

            keyed.sort_by(|(a, _), (b, _)| {
                for ((x, y), key) in a.iter().zip(b).zip(keys) {
                    let ordering = if key.ascending { x.cmp(y) } else { y.cmp(x) };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
            Ok(Batch::new(batch.columns, keyed.into_iter().map(|(_, v)| v).collect()))
        }

        RelOp::Limit { input, n, offset } => {
            let batch = execute(input, connections)?;
            let rows = batch.rows.into_iter().skip(*offset).take(*n).collect();
            Ok(Batch::new(batch.columns, rows))
        }

        RelOp::Distinct { input } => {
            let batch = execute(input, connections)?;
            Ok(Batch::new(batch.columns, dedup(batch.rows)))
        }

        RelOp::Join {
            left,
            right,
            on,
            how,
            left_names,
            right_names,
        } => {
            let left_batch = execute(left, connections)?;
            let right_batch = execute(right, connections)?;
            let rows = join(left, right, &left_batch, &right_batch, on.as_ref(), *how)?;
            let mut columns = left_names.clone();
            columns.extend(right_names.iter().cloned());
            Ok(Batch::new(columns, rows))
        }

        RelOp::SetOp {
            kind,
            inputs,
            distinct,
        } => {
            let batches = inputs
                .iter()
                .map(|input| execute(input, connections))
                .collect::<Result<Vec<_>, _>>()?;
            let columns = node.schema.column_names().into_iter().map(String::from).collect();
            Ok(Batch::new(columns, set_op(*kind, *distinct, batches)))
        }
    }
}

fn names(items: &[(String, Expr)]) -> Vec<String> {
    items.iter().map(|(name, _)| name.clone()).collect()
}

/// Groups in first-seen order
fn aggregate(
    batch: &Batch,
    by: &[(String, Expr)],
    metrics: &[(String, Expr)],
) -> Result<Batch, ExecError> {
    let rows: Vec<Row> = batch
        .rows
        .iter()
        .map(|values| Row {
            columns: &batch.columns,
            values,
        })
        .collect();

    let mut order: Vec<Vec<Value>> = Vec::new();
    let mut groups: HashMap<Vec<Value>, Vec<&dyn RowContext>> = HashMap::new();
    for row in &rows {
        let key = by
            .iter()
            .map(|(_, expr)| expr.eval(row))
            .collect::<Result<Vec<_>, _>>()?;
        let group = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Vec::new()
        });
        group.push(row as &dyn RowContext);
    }

    // A whole-table aggregate yields one row even over no input
    if by.is_empty() && order.is_empty() {
        order.push(Vec::new());
        groups.insert(Vec::new(), Vec::new());
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let members = groups.get(&key).map(Vec::as_slice).unwrap_or_default();
        let mut values = key;
        for (_, metric) in metrics {
            values.push(metric.eval_group(members)?);
        }
        out.push(values);
    }

    let mut columns = names(by);
    columns.extend(names(metrics));
    Ok(Batch::new(columns, out))
}

/// Nested-loop join
fn join(
    left_node: &RelNode,
    right_node: &RelNode,
    left: &Batch,
    right: &Batch,
    on: Option<&Expr>,
    how: JoinHow,
) -> Result<Vec<Vec<Value>>, ExecError> {
    let nulls = |width: usize| vec![Value::Null; width];
    let mut rows = Vec::new();
    let mut right_matched = vec![false; right.rows.len()];

    for l in &left.rows {
        let mut matched = false;
        for (ri, r) in right.rows.iter().enumerate() {
            let keep = match on {
                None => true,
                Some(predicate) => {
                    let row = JoinRow {
                        left_node,
                        right_node,
                        left: Row {
                            columns: &left.columns,
                            values: l,
                        },
                        right: Row {
                            columns: &right.columns,
                            values: r,
                        },
                    };
                    predicate.eval(&row)? == Value::Bool(true)
                }
            };
            if keep {
                matched = true;
                right_matched[ri] = true;
                rows.push(l.iter().chain(r.iter()).cloned().collect());
            }
        }
        if !matched && matches!(how, JoinHow::Left | JoinHow::Outer) {
            rows.push(l.iter().cloned().chain(nulls(right.columns.len())).collect());
        }
    }

    if matches!(how, JoinHow::Right | JoinHow::Outer) {
        for (r, matched) in right.rows.iter().zip(right_matched) {
            if !matched {
                rows.push(nulls(left.columns.len()).into_iter().chain(r.iter().cloned()).collect());
            }
        }
    }

    Ok(rows)
}

fn dedup(rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    let mut seen = HashSet::new();
    rows.into_iter().filter(|row| seen.insert(row.clone())).collect()
}

fn set_op(kind: SetOpKind, distinct: bool, batches: Vec<Batch>) -> Vec<Vec<Value>> {
    let mut batches = batches.into_iter();
    let Some(first) = batches.next() else {
        return Vec::new();
    };

    match kind {
        SetOpKind::Union => {
            let mut rows = first.rows;
            for batch in batches {
                rows.extend(batch.rows);
            }
            if distinct {
                dedup(rows)
            } else {
                rows
            }
        }
        SetOpKind::Difference => {
            let others: HashSet<Vec<Value>> = batches.flat_map(|b| b.rows).collect();
            dedup(first.rows.into_iter().filter(|r| !others.contains(r)).collect())
        }
        SetOpKind::Intersect => {
            let others: Vec<HashSet<Vec<Value>>> =
                batches.map(|b| b.rows.into_iter().collect()).collect();
            dedup(
                first
                    .rows
                    .into_iter()
                    .filter(|r| others.iter().all(|set| set.contains(r)))
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(values: &[&[i64]]) -> Vec<Vec<Value>> {
        values
            .iter()
            .map(|r| r.iter().map(|v| Value::Int(*v)).collect())
            .collect()
    }

    fn batch(values: &[&[i64]]) -> Batch {
        Batch::new(vec!["a".into()], rows(values))
    }

    #[test]
    fn union_keeps_duplicates_unless_distinct() {
        let inputs = || vec![batch(&[&[1], &[2]]), batch(&[&[2]])];
        assert_eq!(set_op(SetOpKind::Union, false, inputs()).len(), 3);
        assert_eq!(set_op(SetOpKind::Union, true, inputs()).len(), 2);
    }

    #[test]
    fn difference_and_intersect_use_set_semantics() {
        let inputs = || vec![batch(&[&[1], &[1], &[2], &[3]]), batch(&[&[2]])];
        assert_eq!(set_op(SetOpKind::Difference, false, inputs()), rows(&[&[1], &[3]]));
        assert_eq!(set_op(SetOpKind::Intersect, false, inputs()), rows(&[&[2]]));
    }

    #[test]
    fn aggregate_without_keys_over_nothing_yields_one_row() {
        let empty = Batch::new(vec!["a".into()], Vec::new());
        let count = Expr::Aggregate {
            func: crate::expr::AggFn::Count,
            arg: None,
        };
        let out = aggregate(&empty, &[], &[("n".to_string(), count)]).unwrap();
        assert_eq!(out.rows, vec![vec![Value::Int(0)]]);
    }
}
