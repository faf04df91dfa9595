//! Engine expressions
//!
//! The expression tree relations are built from. Expressions are evaluated
//! row by row by the executor and rendered to SQL by the compiler.

use crate::value::Value;
use vinyl_core::{LogicalType, Schema};

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq
        )
    }
}

/// Row-level functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFn {
    Upper,
    Lower,
    Abs,
    Round,
    Length,
    Coalesce,
}

impl ScalarFn {
    pub fn sql_name(&self) -> &'static str {
        match self {
            ScalarFn::Upper => "UPPER",
            ScalarFn::Lower => "LOWER",
            ScalarFn::Abs => "ABS",
            ScalarFn::Round => "ROUND",
            ScalarFn::Length => "LENGTH",
            ScalarFn::Coalesce => "COALESCE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "UPPER" => Some(ScalarFn::Upper),
            "LOWER" => Some(ScalarFn::Lower),
            "ABS" => Some(ScalarFn::Abs),
            "ROUND" => Some(ScalarFn::Round),
            "LENGTH" | "LEN" => Some(ScalarFn::Length),
            "COALESCE" | "IFNULL" => Some(ScalarFn::Coalesce),
            _ => None,
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggFn {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    CountDistinct,
}

impl AggFn {
    /// Default output column name
    pub fn name(&self) -> &'static str {
        match self {
            AggFn::Sum => "sum",
            AggFn::Mean => "mean",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Count => "count",
            AggFn::CountDistinct => "count_distinct",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "SUM" => Some(AggFn::Sum),
            "AVG" | "MEAN" => Some(AggFn::Mean),
            "MIN" => Some(AggFn::Min),
            "MAX" => Some(AggFn::Max),
            "COUNT" => Some(AggFn::Count),
            _ => None,
        }
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column of an input; `relation` pins it to one side of a join
    Column { name: String, relation: Option<u64> },

    Literal(Value),

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Not(Box<Expr>),

    Negate(Box<Expr>),

    IsNull(Box<Expr>),

    IsNotNull(Box<Expr>),

    Cast { expr: Box<Expr>, to: LogicalType },

    Function { func: ScalarFn, args: Vec<Expr> },

    /// `None` argument means `COUNT(*)`
    Aggregate { func: AggFn, arg: Option<Box<Expr>> },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Self {
        Expr::Column {
            name: name.into(),
            relation: None,
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Name when this is a bare column reference
    pub fn as_column(&self) -> Option<&str> {
        match self {
            Expr::Column { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |expr| found |= matches!(expr, Expr::Aggregate { .. }));
        found
    }

    /// Copy with every column reference pinned to `relation`
    pub fn pinned(&self, relation: u64) -> Expr {
        self.map_columns(&|name, _| Expr::Column {
            name: name.to_string(),
            relation: Some(relation),
        })
    }

    /// Copy with every column reference replaced by `f(name, relation)`
    pub fn map_columns(&self, f: &dyn Fn(&str, Option<u64>) -> Expr) -> Expr {
        let boxed = |e: &Expr| Box::new(e.map_columns(f));
        match self {
            Expr::Column { name, relation } => f(name, *relation),
            Expr::Literal(v) => Expr::Literal(v.clone()),
            Expr::Binary { op, left, right } => Expr::Binary {
                op: *op,
                left: boxed(left),
                right: boxed(right),
            },
            Expr::Not(e) => Expr::Not(boxed(e)),
            Expr::Negate(e) => Expr::Negate(boxed(e)),
            Expr::IsNull(e) => Expr::IsNull(boxed(e)),
            Expr::IsNotNull(e) => Expr::IsNotNull(boxed(e)),
            Expr::Cast { expr, to } => Expr::Cast {
                expr: boxed(expr),
                to: to.clone(),
            },
            Expr::Function { func, args } => Expr::Function {
                func: *func,
                args: args.iter().map(|a| a.map_columns(f)).collect(),
            },
            Expr::Aggregate { func, arg } => Expr::Aggregate {
                func: *func,
                arg: arg.as_deref().map(boxed),
            },
        }
    }

    /// Every column name referenced, in first-seen order
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    /// Every column reference with the relation it is pinned to
    pub fn column_refs(&self) -> Vec<(&str, Option<u64>)> {
        let mut out = Vec::new();
        self.walk(&mut |expr| {
            if let Expr::Column { name, relation } = expr {
                out.push((name.as_str(), *relation));
            }
        });
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        self.walk(&mut |expr| {
            if let Expr::Column { name, .. } = expr {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
        });
    }

    fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Column { .. } | Expr::Literal(_) => {}
            Expr::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Expr::Not(e) | Expr::Negate(e) | Expr::IsNull(e) | Expr::IsNotNull(e) => e.walk(f),
            Expr::Cast { expr, .. } => expr.walk(f),
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            Expr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.walk(f);
                }
            }
        }
    }

    /// Output type against an input schema
    pub fn data_type(&self, schema: &Schema) -> LogicalType {
        match self {
            Expr::Column { name, .. } => schema
                .find_column(name)
                .map(|c| c.logical_type.clone())
                .unwrap_or(LogicalType::Unknown),
            Expr::Literal(value) => value.logical_type(),
            Expr::Binary { op, left, right } => {
                if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    LogicalType::Bool
                } else if *op == BinaryOp::Div {
                    LogicalType::Float
                } else {
                    left.data_type(schema).promote(&right.data_type(schema))
                }
            }
            Expr::Not(_) | Expr::IsNull(_) | Expr::IsNotNull(_) => LogicalType::Bool,
            Expr::Negate(e) => e.data_type(schema),
            Expr::Cast { to, .. } => to.clone(),
            Expr::Function { func, args } => match func {
                ScalarFn::Upper | ScalarFn::Lower => LogicalType::String,
                ScalarFn::Length => LogicalType::Int,
                ScalarFn::Abs | ScalarFn::Round | ScalarFn::Coalesce => args
                    .first()
                    .map(|a| a.data_type(schema))
                    .unwrap_or(LogicalType::Unknown),
            },
            Expr::Aggregate { func, arg } => match func {
                AggFn::Count | AggFn::CountDistinct => LogicalType::Int,
                AggFn::Mean => LogicalType::Float,
                AggFn::Sum | AggFn::Min | AggFn::Max => arg
                    .as_ref()
                    .map(|a| a.data_type(schema))
                    .unwrap_or(LogicalType::Unknown),
            },
        }
    }

    /// Evaluate against one row
    pub fn eval(&self, row: &dyn RowContext) -> Result<Value, EvalError> {
        match self {
            Expr::Column { name, relation } => row.value(name, *relation),
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Binary { op, left, right } => {
                let left = left.eval(row)?;
                // AND/OR short-circuit on a decided left side
                match (op, &left) {
                    (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let right = right.eval(row)?;
                eval_binary(*op, &left, &right)
            }
            Expr::Not(e) => Ok(match e.eval(row)? {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            }),
            Expr::Negate(e) => Ok(match e.eval(row)? {
                Value::Int(i) => Value::Int(-i),
                Value::Float(f) => Value::Float(-f),
                _ => Value::Null,
            }),
            Expr::IsNull(e) => Ok(Value::Bool(e.eval(row)?.is_null())),
            Expr::IsNotNull(e) => Ok(Value::Bool(!e.eval(row)?.is_null())),
            Expr::Cast { expr, to } => Ok(expr.eval(row)?.cast(to)),
            Expr::Function { func, args } => {
                let args = args.iter().map(|a| a.eval(row)).collect::<Result<Vec<_>, _>>()?;
                Ok(eval_scalar(*func, &args))
            }
            Expr::Aggregate { func, .. } => Err(EvalError::AggregateInRowContext(func.name().to_string())),
        }
    }

    /// Evaluate against a group of rows
    ///
    /// Aggregates fold over the group; anything else is taken from the
    /// first row, which is only meaningful for grouping keys.
    pub fn eval_group(&self, rows: &[&dyn RowContext]) -> Result<Value, EvalError> {
        match self {
            Expr::Aggregate { func, arg } => {
                let values = match arg {
                    Some(arg) => rows.iter().map(|r| arg.eval(*r)).collect::<Result<Vec<_>, _>>()?,
                    None => return Ok(Value::Int(rows.len() as i64)),
                };
                Ok(eval_aggregate(*func, values))
            }
            Expr::Binary { op, left, right } => {
                eval_binary(*op, &left.eval_group(rows)?, &right.eval_group(rows)?)
            }
            Expr::Not(e) => Ok(match e.eval_group(rows)? {
                Value::Bool(b) => Value::Bool(!b),
                _ => Value::Null,
            }),
            Expr::Cast { expr, to } => Ok(expr.eval_group(rows)?.cast(to)),
            Expr::Function { func, args } => {
                let args = args
                    .iter()
                    .map(|a| a.eval_group(rows))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(eval_scalar(*func, &args))
            }
            other => match rows.first() {
                Some(row) => other.eval(*row),
                None => Ok(Value::Null),
            },
        }
    }
}

/// Source of column values while evaluating
pub trait RowContext {
    fn value(&self, name: &str, relation: Option<u64>) -> Result<Value, EvalError>;
}

/// Evaluation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Aggregate {0} used outside of an aggregation")]
    AggregateInRowContext(String),

    #[error("Cannot apply {op} to {left} and {right}")]
    TypeMismatch { op: String, left: String, right: String },
}

fn eval_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    use BinaryOp::*;

    match op {
        And | Or => {
            return Ok(match (left, right) {
                (Value::Bool(a), Value::Bool(b)) => Value::Bool(if op == And { *a && *b } else { *a || *b }),
                (Value::Bool(false), _) | (_, Value::Bool(false)) if op == And => Value::Bool(false),
                (Value::Bool(true), _) | (_, Value::Bool(true)) if op == Or => Value::Bool(true),
                _ => Value::Null,
            });
        }
        _ => {}
    }

    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if op.is_comparison() {
        let ordering = left.cmp(right);
        return Ok(Value::Bool(match op {
            Eq => ordering.is_eq(),
            NotEq => ordering.is_ne(),
            Lt => ordering.is_lt(),
            LtEq => ordering.is_le(),
            Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        }));
    }

    let mismatch = || EvalError::TypeMismatch {
        op: op.symbol().to_string(),
        left: left.to_string(),
        right: right.to_string(),
    };

    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(match op {
            Add => Value::Int(a.wrapping_add(*b)),
            Sub => Value::Int(a.wrapping_sub(*b)),
            Mul => Value::Int(a.wrapping_mul(*b)),
            Div if *b == 0 => Value::Null,
            Div => Value::Float(*a as f64 / *b as f64),
            Mod if *b == 0 => Value::Null,
            Mod => Value::Int(a % b),
            _ => return Err(mismatch()),
        }),
        (Value::String(a), Value::String(b)) if op == Add => Ok(Value::String(format!("{}{}", a, b))),
        (a, b) => {
            let (a, b) = (a.as_f64().ok_or_else(mismatch)?, b.as_f64().ok_or_else(mismatch)?);
            Ok(match op {
                Add => Value::Float(a + b),
                Sub => Value::Float(a - b),
                Mul => Value::Float(a * b),
                Div if b == 0.0 => Value::Null,
                Div => Value::Float(a / b),
                Mod if b == 0.0 => Value::Null,
                Mod => Value::Float(a % b),
                _ => return Err(mismatch()),
            })
        }
    }
}

fn eval_scalar(func: ScalarFn, args: &[Value]) -> Value {
    let first = args.first().cloned().unwrap_or(Value::Null);
    match func {
        ScalarFn::Upper => match first {
            Value::String(s) => Value::String(s.to_uppercase()),
            other => other,
        },
        ScalarFn::Lower => match first {
            Value::String(s) => Value::String(s.to_lowercase()),
            other => other,
        },
        ScalarFn::Abs => match first {
            Value::Int(i) => Value::Int(i.abs()),
            Value::Float(f) => Value::Float(f.abs()),
            other => other,
        },
        ScalarFn::Round => {
            let digits = args.get(1).and_then(Value::as_i64).unwrap_or(0) as i32;
            match first {
                Value::Float(f) => {
                    let scale = 10f64.powi(digits);
                    Value::Float((f * scale).round() / scale)
                }
                other => other,
            }
        }
        ScalarFn::Length => match first {
            Value::String(s) => Value::Int(s.chars().count() as i64),
            Value::Null => Value::Null,
            other => Value::Int(other.to_string().len() as i64),
        },
        ScalarFn::Coalesce => args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null),
    }
}

fn eval_aggregate(func: AggFn, values: Vec<Value>) -> Value {
    let present: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    match func {
        AggFn::Count => Value::Int(present.len() as i64),
        AggFn::CountDistinct => {
            let distinct: std::collections::HashSet<&Value> = present.iter().collect();
            Value::Int(distinct.len() as i64)
        }
        AggFn::Min => present.into_iter().min().unwrap_or(Value::Null),
        AggFn::Max => present.into_iter().max().unwrap_or(Value::Null),
        AggFn::Sum => {
            if present.is_empty() {
                Value::Null
            } else if present.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(present.iter().filter_map(Value::as_i64).sum())
            } else {
                Value::Float(present.iter().filter_map(Value::as_f64).sum())
            }
        }
        AggFn::Mean => {
            let numbers: Vec<f64> = present.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
    }
}
