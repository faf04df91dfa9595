//! Lineage stitching
//!
//! Turns a compiled [`SqlProject`] into table and column lineage. Table
//! links come from the compilation graph; column links come from tracing
//! each node's AST back to its dependencies.

use crate::defs::NodeKind;
use crate::sqlast::{SqlAstNode, SqlProject};
use tracing::{debug, warn};
use vinyl_core::{
    dataset_urn, field_urn, push_unique, Asset, AssetKind, Lineage, LineageColumn, LinkKind,
    Schema, VinylError, VinylErrorType,
};
use vinyl_sql::trace_query;

fn asset_kind(kind: NodeKind) -> AssetKind {
    match kind {
        NodeKind::Source => AssetKind::Source,
        NodeKind::Model | NodeKind::Metric => AssetKind::Model,
    }
}

fn add_columns(lineage: &mut Lineage, asset_id: &str, schema: &Schema) {
    for column in &schema.columns {
        lineage.add_column(LineageColumn {
            id: field_urn(asset_id, &column.name),
            asset_id: asset_id.to_string(),
            name: column.name.clone(),
            data_type: Some(column.logical_type.to_string()),
        });
    }
}

fn add_column_ref(lineage: &mut Lineage, asset_id: &str, name: &str) -> String {
    let id = field_urn(asset_id, name);
    lineage.add_column(LineageColumn {
        id: id.clone(),
        asset_id: asset_id.to_string(),
        name: name.to_string(),
        data_type: None,
    });
    id
}

fn node_asset(node: &SqlAstNode) -> String {
    dataset_urn(&node.platform, &node.table)
}

/// Table and column lineage of a compiled project
///
/// `root`, a node id, becomes the lineage's `asset_id` when it was
/// compiled. Nodes with errors keep their asset and table links but get no
/// column links.
pub fn stitch_lineage(project: &SqlProject, root: Option<&str>) -> Lineage {
    let mut lineage = Lineage::new();

    // Compiled nodes first so their assets carry their errors
    for node in project.nodes() {
        let asset_id = node_asset(node);
        lineage.add_asset(Asset {
            id: asset_id.clone(),
            name: node.table.name.clone(),
            node_id: node.id.clone(),
            kind: asset_kind(node.kind),
            errors: node.errors.clone(),
        });
        if let Some(schema) = &node.schema {
            add_columns(&mut lineage, &asset_id, schema);
        }
    }

    for node in project.nodes() {
        let asset_id = node_asset(node);

        for dep in &node.deps {
            let Some(table) = node.dep_tables.get(dep) else {
                continue;
            };
            let dep_asset = dataset_urn(&table.platform, &table.table);
            lineage.add_asset(Asset {
                id: dep_asset.clone(),
                name: table.table.name.clone(),
                node_id: dep.clone(),
                kind: asset_kind(table.kind),
                errors: Vec::new(),
            });
            if let Some(schema) = node.dep_schemas.get(dep) {
                add_columns(&mut lineage, &dep_asset, schema);
            }
            lineage.add_asset_link(&dep_asset, &asset_id);
        }

        let Some(ast) = node.ast.as_ref().filter(|_| !node.has_errors()) else {
            debug!(node = %node.id, "Skipping column lineage");
            continue;
        };

        let traced = match trace_query(ast, &node.inference_context()) {
            Ok(traced) => traced,
            Err(e) => {
                warn!(node = %node.id, error = %e, "Could not trace columns");
                if let Some(asset) = lineage.asset_mut(&asset_id) {
                    push_unique(
                        &mut asset.errors,
                        VinylError::new(&node.id, VinylErrorType::NoLineage, e.to_string())
                            .with_dialect(node.dialect.as_str()),
                    );
                }
                continue;
            }
        };

        for column in &traced {
            let target = add_column_ref(&mut lineage, &asset_id, &column.name);
            let ntype = if column.unaltered {
                LinkKind::Direct
            } else {
                LinkKind::Derived
            };

            for origin in &column.origins {
                let Some(table) = node.dep_tables.get(&origin.dep_id) else {
                    continue;
                };
                let dep_asset = dataset_urn(&table.platform, &table.table);
                let source = add_column_ref(&mut lineage, &dep_asset, &origin.column);
                lineage.add_column_link(&source, &target, ntype, &column.how);
            }
        }
    }

    lineage.asset_id = root
        .and_then(|id| project.node(id))
        .map(node_asset);

    debug!(
        assets = lineage.assets.len(),
        column_links = lineage.column_links.len(),
        errors = lineage.error_count(),
        "Stitched lineage"
    );
    lineage
}

impl SqlProject {
    /// See [`stitch_lineage`]
    pub fn stitch_lineage(&self, root: Option<&str>) -> Lineage {
        stitch_lineage(self, root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::Col;
    use crate::defs::DefsBuilder;
    use crate::project::Project;
    use crate::relation::Relation;
    use pretty_assertions::assert_eq;
    use vinyl_core::{Column, Dialect, LineageType, LogicalType, TableRef, VinylConfig};

    fn project() -> Project {
        let config = VinylConfig::default();
        let trips = Relation::unbound(
            TableRef::new(Some("nyc"), Some("raw"), "trips"),
            "bigquery",
            None,
            Schema::from_columns(vec![
                Column::new("fare", LogicalType::Float),
                Column::new("tip", LogicalType::Float),
                Column::new("zone", LogicalType::String),
            ]),
            None,
        );
        let defs = DefsBuilder::new("nyc", &config)
            .source("trips", trips)
            .unwrap()
            .model("totals", &["trips"], |inputs| {
                Ok(inputs
                    .get("trips")?
                    .select([Col::named("zone"), (Col::named("fare") + Col::named("tip")).alias("total")])?)
            })
            .sql_model("copy", &["totals"], "SELECT * FROM totals", Dialect::Ansi, None)
            .build()
            .unwrap();
        Project::new(defs, config)
    }

    #[test]
    fn links_distinguish_direct_and_derived_columns() {
        let sql = project().get_sql_project(&[], None, None, false).unwrap();
        let lineage = sql.stitch_lineage(Some("nyc.models.totals"));
        lineage.validate().unwrap();

        let trips = "urn:li:dataset:(urn:li:dataPlatform:bigquery,nyc.raw.trips,PROD)";
        let totals = "urn:li:dataset:(urn:li:dataPlatform:duckdb,nyc.main.totals,PROD)";
        assert_eq!(lineage.asset_id.as_deref(), Some(totals));

        let zone = lineage.links_into(&field_urn(totals, "zone"));
        assert_eq!(zone.len(), 1);
        assert_eq!(zone[0].source_id, field_urn(trips, "zone"));
        assert_eq!(zone[0].ntype, LinkKind::Direct);

        let total = lineage.links_into(&field_urn(totals, "total"));
        assert_eq!(total.len(), 2);
        assert!(total.iter().all(|l| l.ntype == LinkKind::Derived && l.how == "arithmetic"));

        let direct = lineage.restrict(LineageType::Direct);
        assert!(direct.column_links.iter().all(|l| l.ntype == LinkKind::Direct));
    }

    #[test]
    fn wildcard_models_pass_columns_through() {
        let sql = project().get_sql_project(&["copy"], Some(1), Some(0), false).unwrap();
        let lineage = sql.stitch_lineage(None);

        let totals = "urn:li:dataset:(urn:li:dataPlatform:duckdb,nyc.main.totals,PROD)";
        let copy = "urn:li:dataset:(urn:li:dataPlatform:duckdb,nyc.main.copy,PROD)";
        for column in ["zone", "total"] {
            let links = lineage.links_into(&field_urn(copy, column));
            assert_eq!(links.len(), 1, "{column}");
            assert_eq!(links[0].source_id, field_urn(totals, column));
            assert_eq!(links[0].how, "identity");
        }
        assert_eq!(lineage.asset_links.len(), 2);
    }
}
