//! Logical types, columns, schemas and table locations

use serde::{Deserialize, Serialize};

/// Column type, independent of any warehouse
///
/// Warehouse type names map onto this in `vinyl_dbt::parse_data_type`;
/// values and SQL inference both produce it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogicalType {
    Bool,
    Int,
    Float,
    Decimal {
        precision: Option<u16>,
        scale: Option<u16>,
    },
    String,
    Date,
    Timestamp,

    /// JSON, VARIANT and other semi-structured types
    Json,

    /// Nothing is known about the column's type
    Unknown,
}

impl LogicalType {
    /// Whether arithmetic is defined on this type
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Decimal { .. })
    }

    /// Result type of combining two numeric operands
    pub fn promote(&self, other: &LogicalType) -> LogicalType {
        match (self, other) {
            (Self::Int, Self::Int) => Self::Int,
            (Self::Unknown, t) | (t, Self::Unknown) => t.clone(),
            (a, b) if a.is_numeric() && b.is_numeric() => Self::Float,
            (a, _) => a.clone(),
        }
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool => write!(f, "BOOL"),
            Self::Int => write!(f, "INT"),
            Self::Float => write!(f, "FLOAT"),
            Self::Decimal { precision, scale } => {
                match (precision, scale) {
                    (Some(p), Some(s)) => write!(f, "DECIMAL({}, {})", p, s),
                    (Some(p), None) => write!(f, "DECIMAL({})", p),
                    _ => write!(f, "DECIMAL"),
                }
            }
            Self::String => write!(f, "STRING"),
            Self::Date => write!(f, "DATE"),
            Self::Timestamp => write!(f, "TIMESTAMP"),
            Self::Json => write!(f, "JSON"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Whether a column may hold NULL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Nullability {
    Yes,
    No,
    Unknown,
}

/// One named, typed output column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub logical_type: LogicalType,

    /// Outer joins and null-filled set operations turn this to `Yes`
    pub nullable: Nullability,
}

impl Column {
    /// Column of unknown nullability
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: Nullability::Unknown,
        }
    }

    pub fn with_nullability(mut self, nullable: Nullability) -> Self {
        self.nullable = nullable;
        self
    }

    /// Same column under another name
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Output columns of a relation or node, in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn find_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Position of a column by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Physical location of a table: `database.schema.name`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    pub name: String,
}

impl TableRef {
    /// A bare table name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            database: None,
            schema: None,
            name: name.into(),
        }
    }

    /// Fully qualified location
    pub fn new(
        database: Option<impl Into<String>>,
        schema: Option<impl Into<String>>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            database: database.map(Into::into),
            schema: schema.map(Into::into),
            name: name.into(),
        }
    }

    /// Name parts in order, skipping absent qualifiers
    pub fn parts(&self) -> Vec<&str> {
        self.database
            .iter()
            .chain(self.schema.iter())
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
            .collect()
    }

    /// Dotted name
    pub fn fqn(&self) -> String {
        self.parts().join(".")
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logical_type_display() {
        assert_eq!(LogicalType::Bool.to_string(), "BOOL");
        assert_eq!(
            LogicalType::Decimal { precision: Some(10), scale: Some(2) }.to_string(),
            "DECIMAL(10, 2)"
        );
    }

    #[test]
    fn numeric_promotion() {
        assert_eq!(LogicalType::Int.promote(&LogicalType::Int), LogicalType::Int);
        assert_eq!(LogicalType::Int.promote(&LogicalType::Float), LogicalType::Float);
        assert_eq!(LogicalType::Unknown.promote(&LogicalType::Int), LogicalType::Int);
    }

    #[test]
    fn schema_operations() {
        let schema = Schema::from_columns(vec![
            Column::new("id", LogicalType::Int),
            Column::new("name", LogicalType::String),
        ]);

        assert_eq!(schema.column_names(), vec!["id", "name"]);
        assert!(schema.find_column("id").is_some());
        assert!(schema.find_column("nonexistent").is_none());
        assert_eq!(schema.index_of("name"), Some(1));
    }

    #[test]
    fn table_ref_fqn() {
        let table = TableRef::new(Some("db"), Some("raw"), "stores");
        assert_eq!(table.fqn(), "db.raw.stores");
        assert_eq!(TableRef::named("stores").parts(), vec!["stores"]);
    }
}
