//! `{{ ref() }}` / `{{ source() }}` handling in raw dbt SQL
//!
//! Raw model code is only parseable once every Jinja reference has been
//! replaced by the physical table it points at.

use crate::manifest::Manifest;
use std::ops::Range;

/// A reference to a dbt model or source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbtReference {
    /// ref('model_name')
    Ref { model_name: String },

    /// source('source_name', 'table_name')
    Source { source_name: String, table_name: String },
}

impl DbtReference {
    /// unique_id of the referenced manifest entry
    pub fn resolve(&self, manifest: &Manifest) -> Option<String> {
        match self {
            Self::Ref { model_name } => manifest
                .nodes
                .values()
                .find(|n| n.name == *model_name && n.resource_type != "test")
                .map(|n| n.unique_id.clone()),
            Self::Source { source_name, table_name } => manifest
                .sources
                .values()
                .find(|s| s.source_name == *source_name && s.name == *table_name)
                .map(|s| s.unique_id.clone()),
        }
    }

    /// Table name substituted into the SQL
    pub fn table_name(&self, manifest: Option<&Manifest>) -> String {
        let resolved = manifest.and_then(|m| {
            let id = self.resolve(m)?;
            m.get_node(&id)
                .map(|n| n.table_ref())
                .or_else(|| m.get_source(&id).map(|s| s.table_ref()))
        });

        match (resolved, self) {
            (Some(table), _) => table.fqn(),
            (None, Self::Ref { model_name }) => model_name.clone(),
            (None, Self::Source { source_name, table_name }) => {
                format!("{}.{}", source_name, table_name)
            }
        }
    }
}

/// All references with the byte span of their `{{ ... }}` block
pub fn extract_references(sql: &str) -> Vec<(Range<usize>, DbtReference)> {
    let mut references = Vec::new();

    let mut start = 0;
    while let Some(open) = sql[start..].find("{{") {
        let open_pos = start + open;
        let Some(close) = sql[open_pos..].find("}}") else {
            break;
        };
        let close_pos = open_pos + close;
        let content = sql[open_pos + 2..close_pos].trim();

        if let Some(reference) = parse_call(content) {
            references.push((open_pos..close_pos + 2, reference));
        }
        start = close_pos + 2;
    }

    references
}

/// Replace every reference block with its table name
pub fn render_references(sql: &str, manifest: Option<&Manifest>) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for (span, reference) in extract_references(sql) {
        out.push_str(&sql[last..span.start]);
        out.push_str(&reference.table_name(manifest));
        last = span.end;
    }
    out.push_str(&sql[last..]);
    out
}

fn parse_call(content: &str) -> Option<DbtReference> {
    let (name, rest) = content.split_once('(')?;
    let args: Vec<&str> = rest
        .trim_end()
        .strip_suffix(')')?
        .split(',')
        .map(str::trim)
        .collect();

    match (name.trim(), args.as_slice()) {
        ("ref", [model]) => Some(DbtReference::Ref {
            model_name: string_literal(model)?.to_string(),
        }),
        // ref('package', 'model')
        ("ref", [_, model]) => Some(DbtReference::Ref {
            model_name: string_literal(model)?.to_string(),
        }),
        ("source", [source, table]) => Some(DbtReference::Source {
            source_name: string_literal(source)?.to_string(),
            table_name: string_literal(table)?.to_string(),
        }),
        _ => None,
    }
}

fn string_literal(s: &str) -> Option<&str> {
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| s.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_ref_and_source() {
        let sql = r#"
            WITH base AS (SELECT * FROM {{ source('raw', "users") }})
            SELECT * FROM {{ref('staging_users')}} JOIN base USING (id)
        "#;

        let refs: Vec<DbtReference> = extract_references(sql).into_iter().map(|(_, r)| r).collect();
        assert_eq!(
            refs,
            vec![
                DbtReference::Source {
                    source_name: "raw".into(),
                    table_name: "users".into(),
                },
                DbtReference::Ref { model_name: "staging_users".into() },
            ]
        );
    }

    #[test]
    fn render_without_manifest() {
        let sql = "SELECT * FROM {{ ref('users') }} WHERE {{ config(x=1) }} active";
        assert_eq!(
            render_references(sql, None),
            "SELECT * FROM users WHERE {{ config(x=1) }} active"
        );
    }

    #[test]
    fn render_with_manifest() {
        let manifest = Manifest::from_json(
            r#"{
                "nodes": {
                    "model.p.users": {
                        "unique_id": "model.p.users",
                        "name": "users",
                        "resource_type": "model",
                        "database": "db",
                        "schema": "analytics"
                    }
                },
                "sources": {}
            }"#,
        )
        .unwrap();

        assert_eq!(
            render_references("select id from {{ ref('users') }}", Some(&manifest)),
            "select id from db.analytics.users"
        );
    }
}
