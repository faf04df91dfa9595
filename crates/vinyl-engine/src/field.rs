//! Fields, table declarations and the relationship registry
//!
//! Tables are declared into a [`SchemaRegistryBuilder`] first and foreign keys
//! are resolved in a second phase by table lookup, so declarations may refer
//! to tables declared later. The built [`SchemaRegistry`] is read-only and
//! holds the relationship graph used for automatic joins.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use vinyl_core::{Column, LogicalType, Nullability, Schema, TableRef};

/// A resolved reference to a declared column
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldRef {
    /// Declared table name, e.g. `shop.Stores`
    pub table: String,

    pub column: String,
}

impl FieldRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl std::fmt::Display for FieldRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Foreign key target as written in a declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignKey {
    /// Direct reference to another field
    Field(FieldRef),

    /// `(table, column)` pair; the table may be a bare or dotted name
    Named { table: String, column: String },

    /// `"ns.Table.column"`
    Dotted(String),
}

impl ForeignKey {
    /// Split into `(table, column)` as written
    fn parts(&self) -> Option<(&str, &str)> {
        match self {
            ForeignKey::Field(field) => Some((field.table.as_str(), field.column.as_str())),
            ForeignKey::Named { table, column } => Some((table.as_str(), column.as_str())),
            ForeignKey::Dotted(path) => path.rsplit_once('.'),
        }
    }
}

impl std::fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForeignKey::Field(field) => write!(f, "{}", field),
            ForeignKey::Named { table, column } => write!(f, "({}, {})", table, column),
            ForeignKey::Dotted(path) => write!(f, "{}", path),
        }
    }
}

/// One declared column
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub logical_type: LogicalType,
    pub description: Option<String>,
    pub primary_key: bool,
    pub unique: bool,
    pub pii: bool,
    pub nullable: Nullability,
    pub foreign_key: Option<ForeignKey>,
}

impl Field {
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            description: None,
            primary_key: false,
            unique: false,
            pii: false,
            nullable: Nullability::Unknown,
            foreign_key: None,
        }
    }

    /// Mark as primary key, which also makes it unique
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.unique = true;
        self.nullable = Nullability::No;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn pii(mut self) -> Self {
        self.pii = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_nullability(mut self, nullable: Nullability) -> Self {
        self.nullable = nullable;
        self
    }

    /// Reference another field
    pub fn references(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_key = Some(foreign_key);
        self
    }

    /// Reference `table.column` by name
    pub fn references_column(self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references(ForeignKey::Named {
            table: table.into(),
            column: column.into(),
        })
    }

    /// Primary keys are always unique
    pub fn is_unique(&self) -> bool {
        self.unique || self.primary_key
    }

    pub fn column(&self) -> Column {
        Column::new(self.name.clone(), self.logical_type.clone()).with_nullability(self.nullable)
    }
}

/// A declared table: its fields and where it physically lives
#[derive(Debug, Clone, PartialEq)]
pub struct TableDecl {
    /// Declared name, unique within a registry (e.g. `shop.Stores`)
    pub name: String,

    /// Physical location
    pub table: TableRef,

    pub fields: Vec<Field>,

    /// Declared total row count, used to size twin samples
    pub total_rows: Option<usize>,
}

impl TableDecl {
    pub fn new(name: impl Into<String>, table: TableRef) -> Self {
        Self {
            name: name.into(),
            table,
            fields: Vec::new(),
            total_rows: None,
        }
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_total_rows(mut self, total_rows: usize) -> Self {
        self.total_rows = Some(total_rows);
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn schema(&self) -> Schema {
        Schema::from_columns(self.fields.iter().map(Field::column).collect())
    }

    /// Last segment of the declared name
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }
}

/// Edge label in the relationship graph: `source.column == target.column`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Relationship {
    pub source_table: String,
    pub source_column: String,
    pub target_table: String,
    pub target_column: String,
}

/// A foreign key that could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedForeignKey {
    /// Field holding the foreign key
    pub field: FieldRef,

    /// Target as written
    pub target: String,

    pub reason: String,
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Table declared twice: {0}")]
    DuplicateTable(String),

    #[error("Unresolved foreign key on {field}: {target} ({reason})")]
    UnresolvedForeignKey {
        field: String,
        target: String,
        reason: String,
    },
}

/// Collects table declarations before foreign keys are resolved
#[derive(Debug, Default)]
pub struct SchemaRegistryBuilder {
    tables: Vec<TableDecl>,
    strict: bool,
}

impl SchemaRegistryBuilder {
    /// Declare a table
    pub fn table(mut self, table: TableDecl) -> Self {
        self.tables.push(table);
        self
    }

    pub fn declare(&mut self, table: TableDecl) -> &mut Self {
        self.tables.push(table);
        self
    }

    /// Fail the build on unresolved foreign keys
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Resolve foreign keys and freeze the registry
    pub fn build(self) -> Result<SchemaRegistry, RegistryError> {
        let mut tables = BTreeMap::new();
        for table in self.tables {
            if tables.contains_key(&table.name) {
                return Err(RegistryError::DuplicateTable(table.name));
            }
            tables.insert(table.name.clone(), table);
        }

        let mut registry = SchemaRegistry {
            tables,
            graph: DiGraph::new(),
            index: HashMap::new(),
            unresolved: Vec::new(),
        };

        for name in registry.tables.keys() {
            let node = registry.graph.add_node(name.clone());
            registry.index.insert(name.clone(), node);
        }

        let mut edges = Vec::new();
        let mut unresolved_keys = Vec::new();
        for table in registry.tables.values() {
            for field in &table.fields {
                let Some(foreign_key) = &field.foreign_key else {
                    continue;
                };
                let this = FieldRef::new(&table.name, &field.name);

                match registry.resolve_foreign_key(foreign_key) {
                    Ok(target) => {
                        // target -> this, plus the way back for one-to-one keys
                        edges.push(Relationship {
                            source_table: target.table.clone(),
                            source_column: target.column.clone(),
                            target_table: this.table.clone(),
                            target_column: this.column.clone(),
                        });
                        if field.is_unique() {
                            edges.push(Relationship {
                                source_table: this.table.clone(),
                                source_column: this.column.clone(),
                                target_table: target.table,
                                target_column: target.column,
                            });
                        }
                    }
                    Err(reason) => {
                        let unresolved = UnresolvedForeignKey {
                            field: this,
                            target: foreign_key.to_string(),
                            reason,
                        };
                        if self.strict {
                            return Err(RegistryError::UnresolvedForeignKey {
                                field: unresolved.field.to_string(),
                                target: unresolved.target,
                                reason: unresolved.reason,
                            });
                        }
                        warn!(
                            field = %unresolved.field,
                            target = %unresolved.target,
                            "Unresolved foreign key: {}", unresolved.reason
                        );
                        unresolved_keys.push(unresolved);
                    }
                }
            }
        }

        registry.unresolved = unresolved_keys;

        for edge in edges {
            let (Some(&from), Some(&to)) = (
                registry.index.get(&edge.source_table),
                registry.index.get(&edge.target_table),
            ) else {
                continue;
            };
            registry.graph.add_edge(from, to, edge);
        }

        debug!(
            tables = registry.tables.len(),
            relationships = registry.graph.edge_count(),
            "Built schema registry"
        );
        Ok(registry)
    }
}

/// Frozen table declarations plus their relationship graph
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableDecl>,
    graph: DiGraph<String, Relationship>,
    index: HashMap<String, NodeIndex>,
    unresolved: Vec<UnresolvedForeignKey>,
}

impl SchemaRegistry {
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// A registry with no tables
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a table by declared name, or by its last segment when unambiguous
    pub fn table(&self, name: &str) -> Option<&TableDecl> {
        if let Some(table) = self.tables.get(name) {
            return Some(table);
        }

        let mut matches = self.tables.values().filter(|t| t.short_name() == name);
        match (matches.next(), matches.next()) {
            (Some(table), None) => Some(table),
            _ => None,
        }
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDecl> {
        self.tables.values()
    }

    pub fn field(&self, table: &str, column: &str) -> Option<&Field> {
        self.table(table)?.get_field(column)
    }

    /// Foreign keys that resolved to nothing
    pub fn unresolved_foreign_keys(&self) -> &[UnresolvedForeignKey] {
        &self.unresolved
    }

    pub fn relationship_graph(&self) -> &DiGraph<String, Relationship> {
        &self.graph
    }

    /// Edges between two tables in either direction, sorted
    pub fn relationships_between(&self, a: &str, b: &str) -> Vec<&Relationship> {
        let (Some(&na), Some(&nb)) = (self.index.get(a), self.index.get(b)) else {
            return Vec::new();
        };

        let mut edges: Vec<&Relationship> = self
            .graph
            .edges_directed(na, Direction::Outgoing)
            .filter(|e| e.target() == nb)
            .chain(
                self.graph
                    .edges_directed(nb, Direction::Outgoing)
                    .filter(|e| e.target() == na),
            )
            .map(|e| e.weight())
            .collect();
        edges.sort();
        edges
    }

    fn resolve_foreign_key(&self, foreign_key: &ForeignKey) -> Result<FieldRef, String> {
        let (table, column) = foreign_key
            .parts()
            .ok_or_else(|| "expected table.column".to_string())?;
        let decl = self
            .table(table)
            .ok_or_else(|| format!("no table named {}", table))?;
        if decl.get_field(column).is_none() {
            return Err(format!("{} has no column {}", decl.name, column));
        }
        Ok(FieldRef::new(&decl.name, column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> TableDecl {
        TableDecl::new("shop.Stores", TableRef::named("stores"))
            .field(Field::new("store_nbr", LogicalType::Int).primary_key())
            .field(Field::new("city", LogicalType::String))
    }

    fn transactions(fk: ForeignKey) -> TableDecl {
        TableDecl::new("shop.StoreNumTransactions", TableRef::named("transactions"))
            .field(Field::new("store_nbr", LogicalType::Int).references(fk))
            .field(Field::new("transactions", LogicalType::Int))
    }

    #[test]
    fn primary_key_implies_unique() {
        let field = Field::new("id", LogicalType::Int).primary_key();
        assert!(field.is_unique());
        assert_eq!(field.column().nullable, Nullability::No);
    }

    #[test]
    fn foreign_key_forms_resolve_alike() {
        for fk in [
            ForeignKey::Field(FieldRef::new("shop.Stores", "store_nbr")),
            ForeignKey::Named {
                table: "Stores".into(),
                column: "store_nbr".into(),
            },
            ForeignKey::Dotted("shop.Stores.store_nbr".into()),
        ] {
            let registry = SchemaRegistry::builder()
                .table(transactions(fk))
                .table(stores())
                .build()
                .unwrap();

            assert!(registry.unresolved_foreign_keys().is_empty());
            let edges = registry.relationships_between("shop.Stores", "shop.StoreNumTransactions");
            assert_eq!(edges.len(), 1);
            assert_eq!(edges[0].source_table, "shop.Stores");
            assert_eq!(edges[0].target_column, "store_nbr");
        }
    }

    #[test]
    fn unique_foreign_key_adds_reverse_edge() {
        let registry = SchemaRegistry::builder()
            .table(stores())
            .table(
                TableDecl::new("shop.StoreManager", TableRef::named("managers")).field(
                    Field::new("store_nbr", LogicalType::Int)
                        .unique()
                        .references_column("Stores", "store_nbr"),
                ),
            )
            .build()
            .unwrap();

        assert_eq!(registry.relationship_graph().edge_count(), 2);
        let sources: Vec<&str> = registry
            .relationships_between("shop.Stores", "shop.StoreManager")
            .iter()
            .map(|r| r.source_table.as_str())
            .collect();
        assert!(sources.contains(&"shop.Stores"));
        assert!(sources.contains(&"shop.StoreManager"));
    }

    #[test]
    fn missing_targets_are_tolerated_and_listed() {
        let registry = SchemaRegistry::builder()
            .table(transactions(ForeignKey::Dotted("shop.Missing.id".into())))
            .build()
            .unwrap();

        let unresolved = registry.unresolved_foreign_keys();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(unresolved[0].field.column, "store_nbr");
        assert_eq!(registry.relationship_graph().edge_count(), 0);
    }

    #[test]
    fn strict_mode_rejects_missing_targets() {
        let result = SchemaRegistry::builder()
            .strict(true)
            .table(stores())
            .table(transactions(ForeignKey::Named {
                table: "Stores".into(),
                column: "nope".into(),
            }))
            .build();

        assert!(matches!(result, Err(RegistryError::UnresolvedForeignKey { .. })));
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let result = SchemaRegistry::builder().table(stores()).table(stores()).build();
        assert!(matches!(result, Err(RegistryError::DuplicateTable(_))));
    }

    #[test]
    fn plain_foreign_key_is_one_way() {
        let registry = SchemaRegistry::builder()
            .table(stores())
            .table(transactions(ForeignKey::Named {
                table: "Stores".into(),
                column: "store_nbr".into(),
            }))
            .build()
            .unwrap();

        assert_eq!(registry.relationship_graph().edge_count(), 1);
        let edges = registry.relationships_between("shop.StoreNumTransactions", "shop.Stores");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].source_table, "shop.Stores");
        assert_eq!(edges[0].target_table, "shop.StoreNumTransactions");
    }
}
