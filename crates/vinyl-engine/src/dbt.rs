//! Loading a dbt project
//!
//! dbt sources and seeds become declared tables, and models become SQL
//! models over their `ref()`/`source()`-rendered code. Column types come from
//! `catalog.json` when one is given, falling back to the types documented in
//! the manifest.

use crate::connector::Resource;
use crate::defs::{Defs, DefsError};
use crate::field::{Field, SchemaRegistry, TableDecl};
use crate::source::{source, DataAccess};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};
use vinyl_core::{Column, LogicalType, Schema, TableRef, VinylConfig};
use vinyl_dbt::{parse_data_type, Catalog, ColumnDefinition, Manifest};

/// Declared columns of a dbt node, preferring the catalog
fn declared_schema(
    catalog: Option<&Catalog>,
    unique_id: &str,
    columns: &BTreeMap<String, ColumnDefinition>,
) -> Option<Schema> {
    if let Some(table) = catalog.and_then(|c| c.table(unique_id)) {
        return Some(table.schema());
    }
    if columns.is_empty() {
        return None;
    }

    Some(Schema::from_columns(
        columns
            .values()
            .map(|c| {
                let logical_type = c
                    .data_type
                    .as_deref()
                    .map(parse_data_type)
                    .unwrap_or(LogicalType::Unknown);
                Column::new(&c.name, logical_type)
            })
            .collect(),
    ))
}

fn table_decl(name: &str, table: TableRef, schema: Option<Schema>) -> TableDecl {
    schema
        .map(|s| s.columns)
        .unwrap_or_default()
        .into_iter()
        .fold(TableDecl::new(name, table), |decl, column| {
            decl.field(Field::new(column.name, column.logical_type))
        })
}

impl Defs {
    /// Declarations of a parsed dbt project
    ///
    /// The manifest's adapter type, when recorded, overrides the configured
    /// platform. Sources are named `{source_name}.{name}`; seeds and models
    /// keep their dbt names.
    pub fn from_dbt(
        project: impl Into<String>,
        manifest: &Manifest,
        catalog: Option<&Catalog>,
        config: &VinylConfig,
    ) -> Result<Defs, DefsError> {
        let project = project.into();
        let mut config = config.clone();
        if let Some(adapter) = &manifest.metadata.adapter_type {
            config.platform = adapter.clone();
        }

        // dbt unique id -> declared name
        let mut names: HashMap<&str, String> = HashMap::new();
        let mut tables = Vec::new();

        for source in manifest.sources.values() {
            let name = format!("{}.{}", source.source_name, source.name);
            let schema = declared_schema(catalog, &source.unique_id, &source.columns);
            tables.push(table_decl(&name, source.table_ref(), schema));
            names.insert(&source.unique_id, name);
        }
        for seed in manifest.seeds() {
            let schema = declared_schema(catalog, &seed.unique_id, &seed.columns);
            tables.push(table_decl(&seed.name, seed.table_ref(), schema));
            names.insert(&seed.unique_id, seed.name.clone());
        }

        let registry = Arc::new(
            tables
                .into_iter()
                .fold(SchemaRegistry::builder(), |builder, decl| builder.table(decl))
                .build()?,
        );
        let resource = Resource::unconnected(project.clone(), config.platform.clone());
        let access = DataAccess::from_config(&config);

        let mut builder = Defs::builder(project, &config);
        for decl in registry.tables() {
            let relation = source(&registry, &decl.name, &resource, &access)?;
            builder = builder.source(decl.name.clone(), relation)?;
        }

        let models = manifest.models();
        for model in &models {
            names.insert(&model.unique_id, model.name.clone());
        }

        for model in models {
            let deps: Vec<&str> = model
                .depends_on
                .nodes
                .iter()
                .filter_map(|dep| match names.get(dep.as_str()) {
                    Some(name) => Some(name.as_str()),
                    None => {
                        debug!(model = %model.unique_id, dependency = %dep, "Ignoring dependency");
                        None
                    }
                })
                .collect();

            let sql = model
                .sql()
                .map(|sql| vinyl_dbt::render_references(sql, Some(manifest)))
                .unwrap_or_default();
            let schema = declared_schema(catalog, &model.unique_id, &model.columns);

            builder = builder.sql_model_at(
                model.name.clone(),
                model.table_ref(),
                &deps,
                sql,
                config.dialect,
                schema,
            );
        }

        let defs = builder.build()?;
        info!(
            sources = registry.tables().count(),
            nodes = defs.len(),
            platform = %config.platform,
            "Loaded dbt project"
        );
        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defs::{NodeBody, NodeKind};
    use crate::project::Project;
    use pretty_assertions::assert_eq;
    use vinyl_core::{field_urn, LinkKind};

    const MANIFEST: &str = r#"{
        "metadata": {"dbt_version": "1.7.0", "adapter_type": "postgres"},
        "nodes": {
            "model.shop.stg_users": {
                "unique_id": "model.shop.stg_users",
                "name": "stg_users",
                "resource_type": "model",
                "database": "analytics",
                "schema": "dbt",
                "raw_code": "select id, name from {{ source('raw', 'users') }}",
                "depends_on": {"nodes": ["source.shop.raw.users"]}
            },
            "model.shop.users": {
                "unique_id": "model.shop.users",
                "name": "users",
                "resource_type": "model",
                "database": "analytics",
                "schema": "dbt",
                "compiled_code": "select id from analytics.dbt.stg_users",
                "depends_on": {"nodes": ["model.shop.stg_users", "macro.dbt.is_incremental"]}
            },
            "model.shop.old": {
                "unique_id": "model.shop.old",
                "name": "old",
                "resource_type": "model",
                "config": {"enabled": false},
                "raw_code": "select 1"
            }
        },
        "sources": {
            "source.shop.raw.users": {
                "unique_id": "source.shop.raw.users",
                "source_name": "raw",
                "name": "users",
                "database": "db",
                "schema": "raw",
                "columns": {
                    "id": {"name": "id", "data_type": "integer"},
                    "name": {"name": "name", "data_type": "text"}
                }
            }
        }
    }"#;

    fn defs() -> Defs {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        Defs::from_dbt("shop", &manifest, None, &VinylConfig::default()).unwrap()
    }

    #[test]
    fn declares_sources_and_enabled_models() {
        let defs = defs();
        assert_eq!(defs.len(), 3);
        assert_eq!(
            defs.ids_of(NodeKind::Source).into_iter().collect::<Vec<_>>(),
            vec!["shop.sources.raw.users"]
        );

        let users = defs.node("shop.models.users").unwrap();
        assert_eq!(users.deps, vec!["shop.models.stg_users".to_string()]);
        assert_eq!(users.table.fqn(), "analytics.dbt.users");
        assert_eq!(users.platform, "postgres");
        assert!(defs.node("shop.models.old").is_none());
    }

    #[test]
    fn catalog_types_win_over_documented_ones() {
        let manifest = Manifest::from_json(MANIFEST).unwrap();
        let catalog = Catalog::from_json(
            r#"{
                "sources": {
                    "source.shop.raw.users": {
                        "metadata": {"database": "db", "schema": "raw", "name": "users"},
                        "columns": {
                            "name": {"name": "name", "type": "VARCHAR", "index": 2},
                            "id": {"name": "id", "type": "BIGINT", "index": 1},
                            "signed_up": {"name": "signed_up", "type": "TIMESTAMP", "index": 3}
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let defs = Defs::from_dbt("shop", &manifest, Some(&catalog), &VinylConfig::default()).unwrap();
        let NodeBody::Source(users) = &defs.node("shop.sources.raw.users").unwrap().body else {
            panic!("expected a source");
        };
        assert_eq!(users.columns(), vec!["id", "name", "signed_up"]);
        assert_eq!(users.schema().columns[2].logical_type, LogicalType::Timestamp);
    }

    #[test]
    fn lineage_runs_through_rendered_references() {
        let project = Project::new(defs(), VinylConfig::default());
        let sql = project.get_sql_project(&["users"], None, None, false).unwrap();
        assert!(sql.errors().is_empty(), "{:?}", sql.errors());

        let lineage = sql.stitch_lineage(Some("shop.models.users"));
        let raw = "urn:li:dataset:(urn:li:dataPlatform:postgres,db.raw.users,PROD)";
        let stg = "urn:li:dataset:(urn:li:dataPlatform:postgres,analytics.dbt.stg_users,PROD)";
        let users = "urn:li:dataset:(urn:li:dataPlatform:postgres,analytics.dbt.users,PROD)";

        let into_stg = lineage.links_into(&field_urn(stg, "id"));
        assert_eq!(into_stg.len(), 1);
        assert_eq!(into_stg[0].source_id, field_urn(raw, "id"));

        let into_users = lineage.links_into(&field_urn(users, "id"));
        assert_eq!(into_users.len(), 1);
        assert_eq!(into_users[0].source_id, field_urn(stg, "id"));
        assert_eq!(into_users[0].ntype, LinkKind::Direct);
    }
}
