//! Column algebra
//!
//! [`Col`] is what model code writes expressions with. It wraps an engine
//! [`Expr`] plus an optional output name, and converts to and from
//! sqlparser expressions.

use crate::expr::{AggFn, BinaryOp, Expr, ScalarFn};
use crate::relation::{Relation, RelationError};
use crate::render::render_expr;
use crate::value::Value;
use sqlparser::ast::{self as sql, FunctionArg, FunctionArgExpr, FunctionArguments, UnaryOperator};
use sqlparser::parser::{Parser, ParserError};
use std::ops;
use vinyl_core::{Dialect, LogicalType};
use vinyl_sql::{sqlparser_dialect, sqlparser_type_to_logical, ParseError};

/// A column expression with an optional output name
#[derive(Debug, Clone, PartialEq)]
pub struct Col {
    pub expr: Expr,
    pub name: Option<String>,
}

/// Sort direction for one key
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
}

/// A literal column
pub fn lit(value: impl Into<Value>) -> Col {
    Col::promote(Expr::Literal(value.into()))
}

impl Col {
    /// Wrap an engine expression
    pub fn promote(expr: Expr) -> Self {
        Self { expr, name: None }
    }

    /// Unwrap to the engine expression
    pub fn demote(self) -> Expr {
        self.expr
    }

    /// An unqualified column reference
    pub fn named(name: impl Into<String>) -> Self {
        Self::promote(Expr::column(name))
    }

    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Output name: the alias, else the column or aggregate name
    pub fn output_name(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.expr {
            Expr::Column { name, .. } => name.clone(),
            Expr::Aggregate { func, arg } => match arg.as_deref().and_then(Expr::as_column) {
                Some(column) => format!("{}_{}", column, func.name()),
                None => func.name().to_string(),
            },
            Expr::Function { func, args } => match args.first().and_then(Expr::as_column) {
                Some(column) => format!("{}_{}", func.sql_name().to_lowercase(), column),
                None => func.sql_name().to_lowercase(),
            },
            Expr::Cast { expr, .. } => expr.as_column().unwrap_or("expr").to_string(),
            _ => "expr".to_string(),
        }
    }

    fn binary(self, op: BinaryOp, other: impl Into<Col>) -> Col {
        Col::promote(Expr::binary(op, self.expr, other.into().expr))
    }

    fn unary(self, wrap: fn(Box<Expr>) -> Expr) -> Col {
        Col::promote(wrap(Box::new(self.expr)))
    }

    pub fn eq(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::NotEq, other)
    }

    pub fn lt(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::LtEq, other)
    }

    pub fn gt(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::GtEq, other)
    }

    pub fn and(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(self, other: impl Into<Col>) -> Col {
        self.binary(BinaryOp::Or, other)
    }

    pub fn is_null(self) -> Col {
        self.unary(Expr::IsNull)
    }

    pub fn is_not_null(self) -> Col {
        self.unary(Expr::IsNotNull)
    }

    pub fn cast(self, to: LogicalType) -> Col {
        Col::promote(Expr::Cast {
            expr: Box::new(self.expr),
            to,
        })
    }

    /// First non-null of this and `others`
    pub fn coalesce(self, others: impl IntoIterator<Item = impl Into<Col>>) -> Col {
        let mut args = vec![self.expr];
        args.extend(others.into_iter().map(|c| c.into().expr));
        Col::promote(Expr::Function {
            func: ScalarFn::Coalesce,
            args,
        })
    }

    fn scalar(self, func: ScalarFn) -> Col {
        Col::promote(Expr::Function {
            func,
            args: vec![self.expr],
        })
    }

    pub fn upper(self) -> Col {
        self.scalar(ScalarFn::Upper)
    }

    pub fn lower(self) -> Col {
        self.scalar(ScalarFn::Lower)
    }

    pub fn abs(self) -> Col {
        self.scalar(ScalarFn::Abs)
    }

    pub fn length(self) -> Col {
        self.scalar(ScalarFn::Length)
    }

    pub fn round(self, digits: i64) -> Col {
        Col::promote(Expr::Function {
            func: ScalarFn::Round,
            args: vec![self.expr, Expr::literal(digits)],
        })
    }

    fn aggregate(self, func: AggFn) -> Col {
        Col::promote(Expr::Aggregate {
            func,
            arg: Some(Box::new(self.expr)),
        })
    }

    pub fn sum(self) -> Col {
        self.aggregate(AggFn::Sum)
    }

    pub fn mean(self) -> Col {
        self.aggregate(AggFn::Mean)
    }

    pub fn min(self) -> Col {
        self.aggregate(AggFn::Min)
    }

    pub fn max(self) -> Col {
        self.aggregate(AggFn::Max)
    }

    /// Count of non-null values
    pub fn count(self) -> Col {
        self.aggregate(AggFn::Count)
    }

    pub fn count_distinct(self) -> Col {
        self.aggregate(AggFn::CountDistinct)
    }

    /// `COUNT(*)`
    pub fn count_rows() -> Col {
        Col::promote(Expr::Aggregate {
            func: AggFn::Count,
            arg: None,
        })
    }

    pub fn asc(self) -> SortKey {
        SortKey {
            expr: self.expr,
            ascending: true,
        }
    }

    pub fn desc(self) -> SortKey {
        SortKey {
            expr: self.expr,
            ascending: false,
        }
    }

    /// Convert a native sqlparser expression over `relation`'s columns
    pub fn from_sql(expr: &sql::Expr, relation: &Relation) -> Result<Col, RelationError> {
        let converted = Col::promote(convert(expr, relation)?);
        Ok(match expr {
            sql::Expr::Identifier(ident) => converted.alias(ident.value.clone()),
            _ => converted,
        })
    }

    /// Convert to a native sqlparser expression
    pub fn to_sql_expr(&self, dialect: Dialect) -> Result<sql::Expr, ParseError> {
        let text = render_expr(&self.expr, dialect, &|name, _| dialect.quote_ident(name));
        let sql_dialect = sqlparser_dialect(dialect);
        let parse_error = |error: ParserError| ParseError {
            sql: text.clone(),
            dialect,
            error,
        };

        Parser::new(&*sql_dialect)
            .try_with_sql(&text)
            .map_err(parse_error)?
            .parse_expr()
            .map_err(parse_error)
    }
}

fn unsupported(expr: &sql::Expr) -> RelationError {
    RelationError::Unsupported(format!("expression {}", expr))
}

fn convert(expr: &sql::Expr, relation: &Relation) -> Result<Expr, RelationError> {
    let boxed = |e: &sql::Expr| convert(e, relation).map(Box::new);

    match expr {
        sql::Expr::Identifier(ident) => Ok(relation.try_col(&ident.value)?.expr),
        sql::Expr::CompoundIdentifier(idents) => match idents.last() {
            Some(ident) => Ok(relation.try_col(&ident.value)?.expr),
            None => Err(unsupported(expr)),
        },
        sql::Expr::Nested(inner) => convert(inner, relation),
        sql::Expr::Value(value) => Ok(Expr::Literal(match value {
            sql::Value::Number(n, _) => Value::infer(n),
            sql::Value::SingleQuotedString(s) | sql::Value::DoubleQuotedString(s) => Value::String(s.clone()),
            sql::Value::Boolean(b) => Value::Bool(*b),
            sql::Value::Null => Value::Null,
            _ => return Err(unsupported(expr)),
        })),
        sql::Expr::BinaryOp { left, op, right } => {
            let op = match op {
                sql::BinaryOperator::Plus => BinaryOp::Add,
                sql::BinaryOperator::Minus => BinaryOp::Sub,
                sql::BinaryOperator::Multiply => BinaryOp::Mul,
                sql::BinaryOperator::Divide => BinaryOp::Div,
                sql::BinaryOperator::Modulo => BinaryOp::Mod,
                sql::BinaryOperator::Eq => BinaryOp::Eq,
                sql::BinaryOperator::NotEq => BinaryOp::NotEq,
                sql::BinaryOperator::Lt => BinaryOp::Lt,
                sql::BinaryOperator::LtEq => BinaryOp::LtEq,
                sql::BinaryOperator::Gt => BinaryOp::Gt,
                sql::BinaryOperator::GtEq => BinaryOp::GtEq,
                sql::BinaryOperator::And => BinaryOp::And,
                sql::BinaryOperator::Or => BinaryOp::Or,
                _ => return Err(unsupported(expr)),
            };
            Ok(Expr::Binary {
                op,
                left: boxed(left)?,
                right: boxed(right)?,
            })
        }
        sql::Expr::UnaryOp { op, expr: inner } => match op {
            UnaryOperator::Not => Ok(Expr::Not(boxed(inner)?)),
            UnaryOperator::Minus => Ok(Expr::Negate(boxed(inner)?)),
            UnaryOperator::Plus => convert(inner, relation),
            _ => Err(unsupported(expr)),
        },
        sql::Expr::IsNull(inner) => Ok(Expr::IsNull(boxed(inner)?)),
        sql::Expr::IsNotNull(inner) => Ok(Expr::IsNotNull(boxed(inner)?)),
        sql::Expr::Cast { expr: inner, data_type, .. } => Ok(Expr::Cast {
            expr: boxed(inner)?,
            to: sqlparser_type_to_logical(data_type),
        }),
        sql::Expr::Function(func) => {
            let name = func.name.to_string();
            let (args, distinct, star) = function_args(&func.args, relation)?;

            if let Some(agg) = AggFn::from_name(&name) {
                let func = match (agg, distinct) {
                    (AggFn::Count, true) => AggFn::CountDistinct,
                    (agg, _) => agg,
                };
                return match (star, args.into_iter().next()) {
                    (true, _) if func == AggFn::Count => Ok(Expr::Aggregate { func, arg: None }),
                    (false, Some(arg)) => Ok(Expr::Aggregate {
                        func,
                        arg: Some(Box::new(arg)),
                    }),
                    _ => Err(unsupported(expr)),
                };
            }

            match ScalarFn::from_name(&name) {
                Some(func) => Ok(Expr::Function { func, args }),
                None => Err(RelationError::Unsupported(format!("function {}", name))),
            }
        }
        _ => Err(unsupported(expr)),
    }
}

/// Arguments, whether DISTINCT was given, and whether the call was `f(*)`
fn function_args(
    args: &FunctionArguments,
    relation: &Relation,
) -> Result<(Vec<Expr>, bool, bool), RelationError> {
    let FunctionArguments::List(list) = args else {
        return Ok((Vec::new(), false, false));
    };

    let distinct = matches!(list.duplicate_treatment, Some(sql::DuplicateTreatment::Distinct));
    let mut out = Vec::new();
    let mut star = false;
    for arg in &list.args {
        let arg = match arg {
            FunctionArg::Unnamed(arg) => arg,
            FunctionArg::Named { arg, .. } => arg,
            _ => continue,
        };
        match arg {
            FunctionArgExpr::Expr(e) => out.push(convert(e, relation)?),
            FunctionArgExpr::Wildcard | FunctionArgExpr::QualifiedWildcard(_) => star = true,
        }
    }
    Ok((out, distinct, star))
}

impl From<&str> for Col {
    fn from(name: &str) -> Self {
        Col::named(name)
    }
}

impl From<String> for Col {
    fn from(name: String) -> Self {
        Col::named(name)
    }
}

impl From<Expr> for Col {
    fn from(expr: Expr) -> Self {
        Col::promote(expr)
    }
}

impl From<i64> for Col {
    fn from(v: i64) -> Self {
        lit(v)
    }
}

impl From<i32> for Col {
    fn from(v: i32) -> Self {
        lit(v)
    }
}

impl From<f64> for Col {
    fn from(v: f64) -> Self {
        lit(v)
    }
}

impl From<bool> for Col {
    fn from(v: bool) -> Self {
        lit(v)
    }
}

impl From<Value> for Col {
    fn from(v: Value) -> Self {
        Col::promote(Expr::Literal(v))
    }
}

impl From<Col> for SortKey {
    fn from(col: Col) -> Self {
        col.asc()
    }
}

impl From<&str> for SortKey {
    fn from(name: &str) -> Self {
        Col::named(name).asc()
    }
}

macro_rules! arithmetic {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<Col>> ops::$trait<T> for Col {
            type Output = Col;

            fn $method(self, rhs: T) -> Col {
                self.binary($op, rhs)
            }
        }
    };
}

arithmetic!(Add, add, BinaryOp::Add);
arithmetic!(Sub, sub, BinaryOp::Sub);
arithmetic!(Mul, mul, BinaryOp::Mul);
arithmetic!(Div, div, BinaryOp::Div);
arithmetic!(Rem, rem, BinaryOp::Mod);

impl ops::Not for Col {
    type Output = Col;

    fn not(self) -> Col {
        self.unary(Expr::Not)
    }
}

impl ops::Neg for Col {
    type Output = Col;

    fn neg(self) -> Col {
        self.unary(Expr::Negate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_build_expressions() {
        let col = (Col::named("a") + 1) * Col::named("b");
        assert_eq!(col.expr.columns(), vec!["a", "b"]);
        assert!(matches!(col.expr, Expr::Binary { op: BinaryOp::Mul, .. }));

        let negated = !Col::named("flag");
        assert!(matches!(negated.expr, Expr::Not(_)));
    }

    #[test]
    fn output_names() {
        assert_eq!(Col::named("a").output_name(), "a");
        assert_eq!(Col::named("a").sum().output_name(), "a_sum");
        assert_eq!(Col::count_rows().output_name(), "count");
        assert_eq!(Col::named("a").upper().alias("shout").output_name(), "shout");
    }

    #[test]
    fn promote_then_demote_is_lossless() {
        let expr = Expr::binary(BinaryOp::Gt, Expr::column("x"), Expr::literal(3));
        assert_eq!(Col::promote(expr.clone()).demote(), expr);
    }

    #[test]
    fn to_sql_expr_parses_in_dialect() {
        let col = Col::named("amount").gt(100).and(Col::named("status").is_not_null());
        let native = col.to_sql_expr(Dialect::Postgres).unwrap();
        let text = native.to_string();
        assert!(text.contains(r#""amount" > 100"#));
        assert!(text.contains(r#""status" IS NOT NULL"#));
        assert!(text.contains("AND"));
    }
}
