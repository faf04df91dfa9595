//! Cell values and row batches
//!
//! Values carry a total order (NULL first, then booleans, numbers and
//! strings) so rows can be sorted, grouped and deduplicated directly.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};
use vinyl_core::{LogicalType, Schema};

/// A single cell
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Logical type of this value, `Unknown` for NULL
    pub fn logical_type(&self) -> LogicalType {
        match self {
            Value::Null => LogicalType::Unknown,
            Value::Bool(_) => LogicalType::Bool,
            Value::Int(_) => LogicalType::Int,
            Value::Float(_) => LogicalType::Float,
            Value::String(_) => LogicalType::String,
        }
    }

    /// Parse a text field as the given type
    ///
    /// Empty fields are NULL. Fields that do not parse as the declared type
    /// are kept as strings.
    pub fn parse(text: &str, logical_type: &LogicalType) -> Value {
        if text.is_empty() {
            return Value::Null;
        }

        let parsed = match logical_type {
            LogicalType::Int => text.parse().ok().map(Value::Int),
            LogicalType::Float | LogicalType::Decimal { .. } => text.parse().ok().map(Value::Float),
            LogicalType::Bool => match text.to_lowercase().as_str() {
                "true" | "t" | "1" => Some(Value::Bool(true)),
                "false" | "f" | "0" => Some(Value::Bool(false)),
                _ => None,
            },
            LogicalType::Unknown => Some(Value::infer(text)),
            _ => None,
        };
        parsed.unwrap_or_else(|| Value::String(text.to_string()))
    }

    /// Parse a text field, guessing its type
    pub fn infer(text: &str) -> Value {
        if text.is_empty() {
            Value::Null
        } else if let Ok(i) = text.parse() {
            Value::Int(i)
        } else if let Ok(f) = text.parse() {
            Value::Float(f)
        } else if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
            Value::Bool(text.eq_ignore_ascii_case("true"))
        } else {
            Value::String(text.to_string())
        }
    }

    /// Convert to another logical type, NULL if not representable
    pub fn cast(&self, to: &LogicalType) -> Value {
        match (self, to) {
            (Value::Null, _) => Value::Null,
            (v, LogicalType::String) => Value::String(v.to_string()),
            (Value::String(s), t) => Value::parse(s, t),
            (v, LogicalType::Int) => v.as_f64().map(|f| Value::Int(f as i64)).unwrap_or(Value::Null),
            (v, LogicalType::Float | LogicalType::Decimal { .. }) => {
                v.as_f64().map(Value::Float).unwrap_or(Value::Null)
            }
            (Value::Bool(b), LogicalType::Bool) => Value::Bool(*b),
            (v, LogicalType::Bool) => v.as_f64().map(|f| Value::Bool(f != 0.0)).unwrap_or(Value::Null),
            (v, _) => v.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (a, b) if a.rank() == 2 && b.rank() == 2 => {
                let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
                a.total_cmp(&b)
            }
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            // Integral floats must hash like the equal Int
            Value::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => (*f as i64).hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Rows with named columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Column names, in row order
    pub columns: Vec<String>,

    pub rows: Vec<Vec<Value>>,
}

impl Batch {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// An empty batch shaped like a schema
    pub fn empty(schema: &Schema) -> Self {
        Self {
            columns: schema.columns.iter().map(|c| c.name.clone()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(|row| &row[index]).collect())
    }

    /// Reorder or subset columns; `None` if a name is missing
    pub fn project(&self, names: &[&str]) -> Option<Batch> {
        let indices = names
            .iter()
            .map(|n| self.column_index(n))
            .collect::<Option<Vec<_>>>()?;

        Some(Batch {
            columns: names.iter().map(|n| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    /// Rows sorted, for order-insensitive comparisons
    pub fn sorted_rows(&self) -> Vec<Vec<Value>> {
        let mut rows = self.rows.clone();
        rows.sort();
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn numeric_values_compare_across_types() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert!(Value::Int(1) < Value::Float(1.5));
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Float(1e9) < Value::String("a".into()));

        let set: HashSet<Value> = [Value::Int(3), Value::Float(3.0)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn parse_follows_declared_type() {
        assert_eq!(Value::parse("42", &LogicalType::Int), Value::Int(42));
        assert_eq!(Value::parse("", &LogicalType::Int), Value::Null);
        assert_eq!(Value::parse("4.5", &LogicalType::Float), Value::Float(4.5));
        assert_eq!(Value::parse("abc", &LogicalType::Int), Value::String("abc".into()));
        assert_eq!(Value::parse("t", &LogicalType::Bool), Value::Bool(true));
        assert_eq!(Value::parse("7", &LogicalType::Unknown), Value::Int(7));
    }

    #[test]
    fn cast_between_types() {
        assert_eq!(Value::Float(2.7).cast(&LogicalType::Int), Value::Int(2));
        assert_eq!(Value::Int(5).cast(&LogicalType::String), Value::String("5".into()));
        assert_eq!(Value::String("1.5".into()).cast(&LogicalType::Float), Value::Float(1.5));
        assert_eq!(Value::Null.cast(&LogicalType::Int), Value::Null);
    }

    #[test]
    fn project_reorders_columns() {
        let batch = Batch::new(
            vec!["a".into(), "b".into()],
            vec![vec![Value::Int(1), Value::from("x")]],
        );
        let projected = batch.project(&["b", "a"]).unwrap();
        assert_eq!(projected.rows[0], vec![Value::from("x"), Value::Int(1)]);
        assert!(batch.project(&["c"]).is_none());
    }
}
