//! Source relations and twin data access
//!
//! A source is a declared table bound to a resource. Nothing is read when
//! the relation is built: the relation carries a connection function that
//! loads either the real table or its twin when executed.

use crate::connector::{read_csv, write_csv, ConnectorError, Resource};
use crate::field::SchemaRegistry;
use crate::relation::{ConnectionFn, Relation};
use crate::value::Batch;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use vinyl_core::{DataAccessMode, Schema, TableRef, VinylConfig};

/// How sources reach their data
#[derive(Debug, Clone, PartialEq)]
pub struct DataAccess {
    pub mode: DataAccessMode,

    /// Directory of pre-materialized twin snapshots
    pub twin_dir: Option<PathBuf>,

    /// Approximate number of rows in a sampled twin
    pub sample_row_count: usize,
}

impl DataAccess {
    /// Always read the real tables
    pub fn full() -> Self {
        Self {
            mode: DataAccessMode::Full,
            twin_dir: None,
            sample_row_count: 0,
        }
    }

    pub fn twin(twin_dir: Option<PathBuf>, sample_row_count: usize) -> Self {
        Self {
            mode: DataAccessMode::Twin,
            twin_dir,
            sample_row_count,
        }
    }

    pub fn from_config(config: &VinylConfig) -> Self {
        Self {
            mode: config.preview,
            twin_dir: config.resolved_twin_dir(),
            sample_row_count: config.sample_row_count,
        }
    }

    /// Snapshot path of a table's twin
    pub fn snapshot_path(&self, table: &TableRef) -> Option<PathBuf> {
        self.twin_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.csv", table.name)))
    }
}

/// Source errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Table not declared: {0}")]
    UnknownTable(String),

    #[error("No twin directory configured")]
    NoTwinDir,

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Relation over a declared table
pub fn source(
    registry: &Arc<SchemaRegistry>,
    table: &str,
    resource: &Resource,
    access: &DataAccess,
) -> Result<Relation, SourceError> {
    let decl = registry
        .table(table)
        .ok_or_else(|| SourceError::UnknownTable(table.to_string()))?;

    let schema = decl.schema();
    let connection: Arc<ConnectionFn> = match access.mode {
        DataAccessMode::Full => {
            let resource = resource.clone();
            let table = decl.table.clone();
            Arc::new(move || resource.connector()?.get_table(&table))
        }
        DataAccessMode::Twin => {
            let twin = Twin {
                resource: resource.clone(),
                table: decl.table.clone(),
                schema: schema.clone(),
                snapshot: access.snapshot_path(&decl.table),
                total_rows: decl.total_rows,
                sample_row_count: access.sample_row_count,
            };
            Arc::new(move || twin.load())
        }
    };

    debug!(table = %decl.name, mode = ?access.mode, "Declared source");
    Ok(Relation::unbound(
        decl.table.clone(),
        resource.platform(),
        Some(decl.name.clone()),
        schema,
        Some(connection),
    )
    .with_registry(registry.clone()))
}

/// Everything needed to load one table's twin
struct Twin {
    resource: Resource,
    table: TableRef,
    schema: Schema,
    snapshot: Option<PathBuf>,
    total_rows: Option<usize>,
    sample_row_count: usize,
}

impl Twin {
    fn load(&self) -> Result<Batch, ConnectorError> {
        if let Some(path) = self.snapshot.as_ref().filter(|p| p.exists()) {
            debug!(table = %self.table, path = %path.display(), "Reading twin snapshot");
            return read_csv(path, Some(&self.schema)).map(|(_, batch)| batch);
        }

        let connector = self.resource.connector()?;
        if connector.is_file_backed() {
            if let Some(total) = self.total_rows.filter(|t| *t > 0) {
                let fraction = (self.sample_row_count as f64 / total as f64).min(1.0);
                debug!(table = %self.table, fraction, "Sampling twin");
                return Ok(sample(connector.get_table(&self.table)?, fraction, &self.table.name));
            }
        }

        warn!(table = %self.table, "No twin available, reading full table");
        connector.get_table(&self.table)
    }
}

/// FNV-1a, stable across runs and platforms
fn seed_for(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

/// Keep each row with probability `fraction`, reproducibly per table
pub fn sample(batch: Batch, fraction: f64, table_name: &str) -> Batch {
    if fraction >= 1.0 {
        return batch;
    }

    let mut rng = StdRng::seed_from_u64(seed_for(table_name));
    let rows = batch
        .rows
        .into_iter()
        .filter(|_| rng.random::<f64>() < fraction)
        .collect();
    Batch::new(batch.columns, rows)
}

/// Write a twin snapshot for a declared table from its real data
///
/// The snapshot holds roughly `sample_row_count` rows.
pub fn materialize_twin(
    registry: &SchemaRegistry,
    table: &str,
    resource: &Resource,
    access: &DataAccess,
) -> Result<PathBuf, SourceError> {
    let decl = registry
        .table(table)
        .ok_or_else(|| SourceError::UnknownTable(table.to_string()))?;
    let path = access.snapshot_path(&decl.table).ok_or(SourceError::NoTwinDir)?;

    let connector = resource.connector()?;
    let batch = connector.get_table(&decl.table)?;
    let fraction = match batch.len() {
        0 => 1.0,
        n => access.sample_row_count as f64 / n as f64,
    };
    let twin = sample(batch, fraction, &decl.table.name);

    ensure_parent(&path)?;
    write_csv(&path, &twin)?;
    debug!(table = %decl.name, rows = twin.len(), path = %path.display(), "Materialized twin");
    Ok(path)
}

fn ensure_parent(path: &Path) -> Result<(), ConnectorError> {
    match path.parent() {
        Some(dir) => std::fs::create_dir_all(dir).map_err(|e| ConnectorError::Io {
            path: dir.display().to_string(),
            message: e.to_string(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, CsvConnector, MemoryConnector};
    use crate::field::{Field, TableDecl};
    use crate::value::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vinyl_core::LogicalType;

    fn registry(total_rows: Option<usize>) -> Arc<SchemaRegistry> {
        let mut decl = TableDecl::new("taxi.Trips", TableRef::named("trips"))
            .field(Field::new("id", LogicalType::Int).primary_key())
            .field(Field::new("fare", LogicalType::Float));
        if let Some(total) = total_rows {
            decl = decl.with_total_rows(total);
        }
        Arc::new(SchemaRegistry::builder().table(decl).build().unwrap())
    }

    fn write_trips(dir: &Path, rows: usize) {
        let mut csv = String::from("id,fare\n");
        for i in 0..rows {
            csv.push_str(&format!("{},{}.5\n", i, i));
        }
        std::fs::write(dir.join("trips.csv"), csv).unwrap();
    }

    #[test]
    fn connection_is_lazy() {
        let connects = Arc::new(AtomicUsize::new(0));
        let counter = connects.clone();
        let resource = Resource::new("mem", "duckdb", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let connector = MemoryConnector::new().with_table(
                &TableRef::named("trips"),
                Schema::from_columns(vec![
                    vinyl_core::Column::new("id", LogicalType::Int),
                    vinyl_core::Column::new("fare", LogicalType::Float),
                ]),
                vec![vec![Value::Int(1), Value::Float(2.0)]],
            );
            Ok(Arc::new(connector) as Arc<dyn Connector>)
        });

        let trips = source(&registry(None), "taxi.Trips", &resource, &DataAccess::full()).unwrap();
        let doubled = trips.mutate([(crate::column::Col::named("fare") * 2).alias("fare")]).unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 0);

        assert_eq!(doubled.execute().unwrap().rows, vec![vec![Value::Int(1), Value::Float(4.0)]]);
        trips.execute().unwrap();
        assert_eq!(connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn twin_samples_file_backed_tables() {
        let data = tempfile::tempdir().unwrap();
        write_trips(data.path(), 1000);
        let resource = Resource::from_connector("files", "file", Arc::new(CsvConnector::new(data.path())));

        let access = DataAccess::twin(None, 100);
        let trips = source(&registry(Some(1000)), "taxi.Trips", &resource, &access).unwrap();
        let first = trips.execute().unwrap();
        let second = trips.execute().unwrap();

        assert!(first.len() > 30 && first.len() < 250, "sampled {} rows", first.len());
        assert_eq!(first, second);
    }

    #[test]
    fn twin_prefers_snapshot_and_falls_back_to_full() {
        let data = tempfile::tempdir().unwrap();
        let twins = tempfile::tempdir().unwrap();
        write_trips(data.path(), 20);
        let resource = Resource::from_connector("files", "file", Arc::new(CsvConnector::new(data.path())));
        let access = DataAccess::twin(Some(twins.path().to_path_buf()), 5);

        // No total row count and no snapshot yet
        let trips = source(&registry(None), "taxi.Trips", &resource, &access).unwrap();
        assert_eq!(trips.execute().unwrap().len(), 20);

        let path = materialize_twin(&registry(None), "taxi.Trips", &resource, &access).unwrap();
        assert!(path.exists());

        let twin_rows = trips.execute().unwrap().len();
        assert!(twin_rows < 20);
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let resource = Resource::unconnected("none", "duckdb");
        let err = source(&registry(None), "taxi.Nope", &resource, &DataAccess::full()).unwrap_err();
        assert!(matches!(err, SourceError::UnknownTable(_)));
    }
}
