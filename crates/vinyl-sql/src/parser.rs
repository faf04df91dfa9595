//! SQL parsing using sqlparser-rs
//!
//! Parses SQL into AST for one of the supported dialects.

use crate::dialect::sqlparser_dialect;
use sqlparser::ast::{Query, Statement};
use sqlparser::dialect::Dialect as SqlDialect;
use sqlparser::parser::{Parser, ParserError};
use vinyl_core::Dialect;

/// SQL parser with configurable dialect
pub struct SqlParser {
    dialect: Dialect,
    inner: Box<dyn SqlDialect>,
}

impl SqlParser {
    /// Create a new SQL parser with the default (generic) dialect
    pub fn new() -> Self {
        Self::from_dialect(Dialect::Ansi)
    }

    /// Create a parser for a configured dialect
    pub fn from_dialect(dialect: Dialect) -> Self {
        Self {
            dialect,
            inner: sqlparser_dialect(dialect),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse SQL string into AST
    pub fn parse(&self, sql: &str) -> Result<ParsedSql, ParseError> {
        match Parser::parse_sql(&*self.inner, sql) {
            Ok(statements) => Ok(ParsedSql {
                sql: sql.to_string(),
                statements,
            }),
            Err(error) => Err(ParseError {
                sql: sql.to_string(),
                dialect: self.dialect,
                error,
            }),
        }
    }

    /// Parse SQL that must consist of exactly one query
    pub fn parse_query(&self, sql: &str) -> Result<Query, ParseError> {
        let parsed = self.parse(sql)?;
        if parsed.statement_count() != 1 {
            return Err(self.error(
                sql,
                format!("Expected a single query, found {} statements", parsed.statement_count()),
            ));
        }

        parsed
            .into_query()
            .ok_or_else(|| self.error(sql, "Expected a SELECT query".to_string()))
    }

    fn error(&self, sql: &str, message: String) -> ParseError {
        ParseError {
            sql: sql.to_string(),
            dialect: self.dialect,
            error: ParserError::ParserError(message),
        }
    }
}

impl Default for SqlParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Successfully parsed SQL with AST
#[derive(Debug, Clone)]
pub struct ParsedSql {
    /// Original SQL string
    pub sql: String,

    /// Parsed statements
    pub statements: Vec<Statement>,
}

impl ParsedSql {
    /// Get the first statement (most common for models)
    pub fn first_statement(&self) -> Option<&Statement> {
        self.statements.first()
    }

    /// Check if this is a SELECT statement
    pub fn is_select(&self) -> bool {
        matches!(self.first_statement(), Some(Statement::Query(_)))
    }

    /// Get the query if this is a SELECT statement
    pub fn as_query(&self) -> Option<&Query> {
        match self.first_statement() {
            Some(Statement::Query(query)) => Some(query.as_ref()),
            _ => None,
        }
    }

    /// Take ownership of the first query
    pub fn into_query(self) -> Option<Query> {
        match self.statements.into_iter().next() {
            Some(Statement::Query(query)) => Some(*query),
            _ => None,
        }
    }

    /// Count the number of statements
    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }
}

/// SQL parsing error
#[derive(Debug)]
pub struct ParseError {
    /// Original SQL string
    pub sql: String,

    /// Dialect the SQL was parsed with
    pub dialect: Dialect,

    /// Parser error from sqlparser
    pub error: ParserError,
}

impl ParseError {
    /// Check if this is an unsupported syntax error
    pub fn is_unsupported_syntax(&self) -> bool {
        let error_msg = self.error.to_string().to_lowercase();
        error_msg.contains("expected") || error_msg.contains("unexpected")
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SQL parse error ({}): {}", self.dialect, self.error)
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_select() {
        let parser = SqlParser::new();
        let parsed = parser.parse("SELECT id, name FROM users WHERE active = true").unwrap();

        assert_eq!(parsed.statement_count(), 1);
        assert!(parsed.is_select());
    }

    #[test]
    fn parse_with_cte() {
        let parser = SqlParser::new();
        let sql = r#"
            WITH active_users AS (
                SELECT * FROM users WHERE active = true
            )
            SELECT id, name FROM active_users
        "#;

        let query = parser.parse_query(sql).unwrap();
        assert!(query.with.is_some());
    }

    #[test]
    fn parse_invalid_sql() {
        let parser = SqlParser::new();
        let error = parser.parse("SELECT FROM WHERE").unwrap_err();
        assert!(error.is_unsupported_syntax());
        assert!(error.to_string().starts_with("SQL parse error (ansi)"));
    }

    #[test]
    fn parse_query_rejects_non_queries() {
        let parser = SqlParser::from_dialect(Dialect::Postgres);
        assert!(parser.parse_query("CREATE TABLE t (id INT)").is_err());
        assert!(parser.parse_query("SELECT 1; SELECT 2").is_err());
    }

    #[test]
    fn different_dialects() {
        let sql = "SELECT id FROM users";
        for dialect in [
            Dialect::Ansi,
            Dialect::BigQuery,
            Dialect::Snowflake,
            Dialect::Postgres,
            Dialect::DuckDb,
            Dialect::MySql,
        ] {
            assert!(SqlParser::from_dialect(dialect).parse(sql).is_ok(), "{dialect}");
        }
    }
}
