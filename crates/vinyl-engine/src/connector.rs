//! Data connectors
//!
//! A [`Connector`] hands out table contents and schemas. Connections are
//! opened lazily through a [`Resource`], so declaring a source never touches
//! the backing system.

use crate::value::{Batch, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;
use vinyl_core::{Column, LogicalType, Schema, TableRef};

/// Errors from connectors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectorError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Failed to connect to {resource}: {message}")]
    Connect { resource: String, message: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Malformed CSV in {path}: {message}")]
    Csv { path: String, message: String },
}

/// Access to tables in one backing system
pub trait Connector: Send + Sync + fmt::Debug {
    /// All rows of a table
    fn get_table(&self, table: &TableRef) -> Result<Batch, ConnectorError>;

    /// Column names and types of a table
    fn table_schema(&self, table: &TableRef) -> Result<Schema, ConnectorError>;

    fn row_count(&self, table: &TableRef) -> Result<usize, ConnectorError> {
        Ok(self.get_table(table)?.len())
    }

    /// Whether tables are plain files that can be sampled cheaply
    fn is_file_backed(&self) -> bool {
        false
    }
}

/// In-memory tables, for tests and demos
#[derive(Debug, Default)]
pub struct MemoryConnector {
    /// Tables by fully qualified name
    tables: RwLock<HashMap<String, (Schema, Batch)>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table, replacing any previous one at the same location
    pub fn insert(&self, table: &TableRef, schema: Schema, rows: Vec<Vec<Value>>) {
        let batch = Batch::new(
            schema.columns.iter().map(|c| c.name.clone()).collect(),
            rows,
        );
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(table.fqn(), (schema, batch));
        }
    }

    pub fn with_table(self, table: &TableRef, schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        self.insert(table, schema, rows);
        self
    }

    pub fn table_count(&self) -> usize {
        self.tables.read().map(|t| t.len()).unwrap_or_default()
    }

    fn lookup(&self, table: &TableRef) -> Result<(Schema, Batch), ConnectorError> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ConnectorError::TableNotFound(table.fqn()))?;
        tables
            .get(&table.fqn())
            .cloned()
            .ok_or_else(|| ConnectorError::TableNotFound(table.fqn()))
    }
}

impl Connector for MemoryConnector {
    fn get_table(&self, table: &TableRef) -> Result<Batch, ConnectorError> {
        Ok(self.lookup(table)?.1)
    }

    fn table_schema(&self, table: &TableRef) -> Result<Schema, ConnectorError> {
        Ok(self.lookup(table)?.0)
    }
}

/// CSV files laid out as `<dir>/<table>.csv`
#[derive(Debug, Clone)]
pub struct CsvConnector {
    dir: PathBuf,

    /// Declared column types per table name
    schemas: HashMap<String, Schema>,
}

impl CsvConnector {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            schemas: HashMap::new(),
        }
    }

    /// Declare column types for a table instead of guessing them
    pub fn with_schema(mut self, table: impl Into<String>, schema: Schema) -> Self {
        self.schemas.insert(table.into(), schema);
        self
    }

    pub fn path_for(&self, table: &TableRef) -> PathBuf {
        self.dir.join(format!("{}.csv", table.name))
    }
}

impl Connector for CsvConnector {
    fn get_table(&self, table: &TableRef) -> Result<Batch, ConnectorError> {
        let path = self.path_for(table);
        if !path.exists() {
            return Err(ConnectorError::TableNotFound(table.fqn()));
        }
        Ok(read_csv(&path, self.schemas.get(&table.name))?.1)
    }

    fn table_schema(&self, table: &TableRef) -> Result<Schema, ConnectorError> {
        if let Some(schema) = self.schemas.get(&table.name) {
            return Ok(schema.clone());
        }
        let path = self.path_for(table);
        if !path.exists() {
            return Err(ConnectorError::TableNotFound(table.fqn()));
        }
        Ok(read_csv(&path, None)?.0)
    }

    fn is_file_backed(&self) -> bool {
        true
    }
}

/// Read a CSV file with a header row
///
/// With a schema, fields are parsed as the declared types and columns are
/// returned in schema order. Without one, each column takes the type of its
/// first non-empty value.
pub fn read_csv(path: &Path, schema: Option<&Schema>) -> Result<(Schema, Batch), ConnectorError> {
    let csv_error = |e: csv::Error| ConnectorError::Csv {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_error)?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }

    let schema = match schema {
        Some(schema) => schema.clone(),
        None => Schema::from_columns(
            headers
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let logical_type = records
                        .iter()
                        .map(|r| Value::infer(r.get(i).map(String::as_str).unwrap_or_default()))
                        .find(|v| !v.is_null())
                        .map(|v| v.logical_type())
                        .unwrap_or(LogicalType::Unknown);
                    Column::new(name.clone(), logical_type)
                })
                .collect(),
        ),
    };

    let positions = schema
        .columns
        .iter()
        .map(|c| headers.iter().position(|h| *h == c.name))
        .collect::<Vec<_>>();

    let rows = records
        .iter()
        .map(|record| {
            schema
                .columns
                .iter()
                .zip(&positions)
                .map(|(column, position)| match position.and_then(|p| record.get(p)) {
                    Some(text) => Value::parse(text, &column.logical_type),
                    None => Value::Null,
                })
                .collect()
        })
        .collect();

    debug!(path = %path.display(), rows = records.len(), "Read CSV");
    Ok((schema.clone(), Batch::new(schema.column_names().into_iter().map(String::from).collect(), rows)))
}

/// Write a batch as CSV with a header row; NULL becomes an empty field
pub fn write_csv(path: &Path, batch: &Batch) -> Result<(), ConnectorError> {
    let csv_error = |e: csv::Error| ConnectorError::Csv {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer.write_record(&batch.columns).map_err(csv_error)?;
    for row in &batch.rows {
        writer
            .write_record(row.iter().map(|v| if v.is_null() { String::new() } else { v.to_string() }))
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|e| ConnectorError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

type ConnectFn = dyn Fn() -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync;

/// A named backing system that connects on first use
#[derive(Clone)]
pub struct Resource {
    name: String,

    /// URN platform of tables in this resource
    platform: String,

    connect: Arc<ConnectFn>,
    connection: Arc<OnceLock<Arc<dyn Connector>>>,
}

impl Resource {
    pub fn new<F>(name: impl Into<String>, platform: impl Into<String>, connect: F) -> Self
    where
        F: Fn() -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            platform: platform.into(),
            connect: Arc::new(connect),
            connection: Arc::new(OnceLock::new()),
        }
    }

    /// Wrap an already open connector
    pub fn from_connector(
        name: impl Into<String>,
        platform: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self::new(name, platform, move || Ok(connector.clone()))
    }

    /// A resource with nothing behind it
    ///
    /// Relations built on it compile and trace, but fail to execute.
    pub fn unconnected(name: impl Into<String>, platform: impl Into<String>) -> Self {
        let name = name.into();
        let resource = name.clone();
        Self::new(name, platform, move || {
            Err(ConnectorError::Connect {
                resource: resource.clone(),
                message: "no connector configured".to_string(),
            })
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn is_connected(&self) -> bool {
        self.connection.get().is_some()
    }

    /// The connector, opening it on first call
    pub fn connector(&self) -> Result<Arc<dyn Connector>, ConnectorError> {
        if let Some(connector) = self.connection.get() {
            return Ok(connector.clone());
        }

        debug!(resource = %self.name, "Connecting");
        let connector = (self.connect)()?;
        Ok(self.connection.get_or_init(|| connector).clone())
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("platform", &self.platform)
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn schema() -> Schema {
        Schema::from_columns(vec![
            Column::new("id", LogicalType::Int),
            Column::new("name", LogicalType::String),
        ])
    }

    #[test]
    fn memory_connector_round_trip() {
        let table = TableRef::named("users");
        let connector = MemoryConnector::new().with_table(
            &table,
            schema(),
            vec![vec![Value::Int(1), Value::from("ada")]],
        );

        assert_eq!(connector.row_count(&table).unwrap(), 1);
        assert_eq!(connector.table_schema(&table).unwrap(), schema());
        assert!(matches!(
            connector.get_table(&TableRef::named("missing")),
            Err(ConnectorError::TableNotFound(_))
        ));
    }

    #[test]
    fn csv_connector_reads_declared_and_guessed_types() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.csv"), "id,name,score\n1,ada,2.5\n2,,\n").unwrap();

        let guessed = CsvConnector::new(dir.path());
        let table = TableRef::named("users");
        let schema = guessed.table_schema(&table).unwrap();
        assert_eq!(schema.columns[0].logical_type, LogicalType::Int);
        assert_eq!(schema.columns[2].logical_type, LogicalType::Float);

        let batch = guessed.get_table(&table).unwrap();
        assert_eq!(batch.rows[1], vec![Value::Int(2), Value::Null, Value::Null]);

        let declared = CsvConnector::new(dir.path()).with_schema(
            "users",
            Schema::from_columns(vec![Column::new("name", LogicalType::String)]),
        );
        assert_eq!(declared.get_table(&table).unwrap().columns, vec!["name"]);
        assert!(declared.is_file_backed());
    }

    #[test]
    fn write_then_read_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        let batch = Batch::new(
            vec!["id".into(), "name".into()],
            vec![vec![Value::Int(1), Value::Null]],
        );

        write_csv(&path, &batch).unwrap();
        let (_, read) = read_csv(&path, Some(&schema())).unwrap();
        assert_eq!(read, batch);
    }

    #[test]
    fn resource_connects_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resource = Resource::new("warehouse", "duckdb", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MemoryConnector::new()) as Arc<dyn Connector>)
        });

        assert!(!resource.is_connected());
        resource.connector().unwrap();
        resource.connector().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(Resource::unconnected("none", "duckdb").connector().is_err());
    }
}
