//! Configuration schema (vinyl.toml)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// SQL dialect configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Generic ANSI SQL
    #[default]
    Ansi,

    /// BigQuery SQL dialect
    BigQuery,

    /// Snowflake SQL dialect
    Snowflake,

    /// PostgreSQL SQL dialect
    Postgres,

    /// DuckDB SQL dialect
    DuckDb,

    /// MySQL SQL dialect
    MySql,
}

impl Dialect {
    /// Stable lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ansi => "ansi",
            Self::BigQuery => "bigquery",
            Self::Snowflake => "snowflake",
            Self::Postgres => "postgres",
            Self::DuckDb => "duckdb",
            Self::MySql => "mysql",
        }
    }

    /// Character used to quote identifiers
    pub fn quote_char(&self) -> char {
        match self {
            Self::BigQuery | Self::MySql => '`',
            _ => '"',
        }
    }

    /// Quote an identifier, doubling embedded quote characters
    pub fn quote_ident(&self, ident: &str) -> String {
        let q = self.quote_char();
        let escaped = ident.replace(q, &format!("{q}{q}"));
        format!("{q}{escaped}{q}")
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ansi" | "generic" => Ok(Self::Ansi),
            "bigquery" => Ok(Self::BigQuery),
            "snowflake" => Ok(Self::Snowflake),
            "postgres" | "postgresql" | "redshift" => Ok(Self::Postgres),
            "duckdb" => Ok(Self::DuckDb),
            "mysql" => Ok(Self::MySql),
            other => Err(ConfigError::ParseError(format!("unknown dialect: {}", other))),
        }
    }
}

/// How sources reach their data
///
/// `Full` hits the real connector; `Twin` reads a cheap local sample with the
/// same expression tree shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataAccessMode {
    Full,

    #[default]
    Twin,
}

fn default_sample_row_count() -> usize {
    1000
}

fn default_platform() -> String {
    "duckdb".to_string()
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VinylConfig {
    /// SQL dialect used for compilation
    #[serde(default)]
    pub dialect: Dialect,

    /// Data access mode handed to source construction
    #[serde(default)]
    pub preview: DataAccessMode,

    /// Approximate row count of twin samples
    #[serde(default = "default_sample_row_count")]
    pub sample_row_count: usize,

    /// Directory holding pre-materialized twin snapshots
    #[serde(default)]
    pub twin_dir: Option<PathBuf>,

    /// Compile nodes on a worker pool
    #[serde(default)]
    pub parallel_compile: bool,

    /// Fail project load on foreign keys that do not resolve
    #[serde(default)]
    pub strict_foreign_keys: bool,

    /// Platform used in asset URNs for derived models
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Database used in asset URNs for derived models
    #[serde(default)]
    pub database: Option<String>,

    /// Schema used in asset URNs for derived models
    #[serde(default)]
    pub schema: Option<String>,

    /// Project root path (for resolving relative paths)
    #[serde(skip)]
    pub project_root: PathBuf,
}

impl Default for VinylConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            preview: DataAccessMode::default(),
            sample_row_count: default_sample_row_count(),
            twin_dir: None,
            parallel_compile: false,
            strict_foreign_keys: false,
            platform: default_platform(),
            database: None,
            schema: None,
            project_root: std::env::current_dir().unwrap_or_default(),
        }
    }
}

impl VinylConfig {
    /// Load config from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let mut config = Self::from_toml(&contents)?;

        // Set project root to parent of config file
        if let Some(parent) = path.parent() {
            config.project_root = parent.to_path_buf();
        }

        Ok(config)
    }

    /// Load config from TOML string
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml)
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save config to TOML file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, toml)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Twin directory resolved against the project root
    pub fn resolved_twin_dir(&self) -> Option<PathBuf> {
        self.twin_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                self.project_root.join(dir)
            }
        })
    }
}

/// Config error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = VinylConfig::default();
        assert_eq!(config.dialect, Dialect::Ansi);
        assert_eq!(config.preview, DataAccessMode::Twin);
        assert_eq!(config.sample_row_count, 1000);
        assert!(!config.strict_foreign_keys);
    }

    #[test]
    fn parse_partial_toml() {
        let config = VinylConfig::from_toml(
            r#"
            dialect = "bigquery"
            preview = "full"
            sample_row_count = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect, Dialect::BigQuery);
        assert_eq!(config.preview, DataAccessMode::Full);
        assert_eq!(config.sample_row_count, 50);
        assert_eq!(config.platform, "duckdb");
    }

    #[test]
    fn config_file_sets_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vinyl.toml");
        VinylConfig {
            twin_dir: Some(PathBuf::from("twins")),
            ..VinylConfig::default()
        }
        .save_to_file(&path)
        .unwrap();

        let loaded = VinylConfig::from_file(&path).unwrap();
        assert_eq!(loaded.project_root, dir.path());
        assert_eq!(loaded.resolved_twin_dir(), Some(dir.path().join("twins")));
    }

    #[test]
    fn dialect_quoting() {
        assert_eq!(Dialect::Postgres.quote_ident("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::BigQuery.quote_ident("col"), "`col`");
        assert_eq!("postgresql".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert!("oracle".parse::<Dialect>().is_err());
    }
}
