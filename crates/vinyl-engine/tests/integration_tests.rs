//! Integration tests for declaring, joining, compiling and tracing projects

use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;
use vinyl_core::{
    field_urn, Column, Dag, DagError, Dialect, LinkKind, LogicalType, Schema, TableRef,
    VinylConfig, VinylErrorType,
};
use vinyl_engine::{
    join, source, union, Col, DataAccess, Defs, DefsError, Field, JoinError, JoinOptions,
    MemoryConnector, Project, Relation, Resource, SchemaRegistry, TableDecl, Value,
};

fn int(v: i64) -> Value {
    Value::Int(v)
}

/// A declared table over in-memory rows
fn table(decl: TableDecl, rows: Vec<Vec<Value>>) -> Relation {
    let name = decl.name.clone();
    let physical = decl.table.clone();
    let schema = decl.schema();
    let registry = Arc::new(SchemaRegistry::builder().table(decl).build().unwrap());
    let connector = MemoryConnector::new().with_table(&physical, schema, rows);
    let resource = Resource::from_connector("mem", "duckdb", Arc::new(connector));
    source(&registry, &name, &resource, &DataAccess::full()).unwrap()
}

struct Stores {
    stores: Relation,
    transactions: Relation,
}

fn stores() -> Stores {
    let registry = Arc::new(
        SchemaRegistry::builder()
            .table(
                TableDecl::new("retail.Stores", TableRef::new(Some("retail"), Some("raw"), "stores"))
                    .field(Field::new("store_nbr", LogicalType::Int).primary_key())
                    .field(Field::new("city", LogicalType::String)),
            )
            .table(
                TableDecl::new(
                    "retail.StoreNumTransactions",
                    TableRef::new(Some("retail"), Some("raw"), "store_transactions"),
                )
                .field(
                    Field::new("store_nbr", LogicalType::Int)
                        .unique()
                        .references_column("retail.Stores", "store_nbr"),
                )
                .field(Field::new("transactions", LogicalType::Int)),
            )
            .build()
            .unwrap(),
    );

    let connector = MemoryConnector::new()
        .with_table(
            &TableRef::new(Some("retail"), Some("raw"), "stores"),
            registry.table("retail.Stores").unwrap().schema(),
            vec![
                vec![int(1), Value::from("Quito")],
                vec![int(2), Value::from("Guayaquil")],
                vec![int(3), Value::from("Cuenca")],
            ],
        )
        .with_table(
            &TableRef::new(Some("retail"), Some("raw"), "store_transactions"),
            registry.table("retail.StoreNumTransactions").unwrap().schema(),
            vec![vec![int(1), int(120)], vec![int(2), int(80)], vec![int(3), int(45)]],
        );
    let resource = Resource::from_connector("mem", "duckdb", Arc::new(connector));
    let access = DataAccess::full();

    Stores {
        stores: source(&registry, "retail.Stores", &resource, &access).unwrap(),
        transactions: source(&registry, "retail.StoreNumTransactions", &resource, &access).unwrap(),
    }
}

fn taxi_project() -> Project {
    let config = VinylConfig::default();
    let trips = table(
        TableDecl::new("taxi.Trips", TableRef::new(Some("nyc"), Some("raw"), "trips"))
            .field(Field::new("trip_id", LogicalType::Int).primary_key())
            .field(Field::new("trip_distance", LogicalType::Float))
            .field(Field::new("fare_amount", LogicalType::Float))
            .field(Field::new("total_amount", LogicalType::Float)),
        vec![
            vec![int(1), Value::Float(2.5), Value::Float(10.0), Value::Float(12.5)],
            vec![int(2), Value::Float(0.8), Value::Float(5.0), Value::Float(6.0)],
        ],
    );

    let defs = Defs::builder("taxi", &config)
        .source("trips", trips)
        .unwrap()
        .model("amount_base", &["trips"], |inputs| {
            Ok(inputs
                .get("trips")?
                .select([Col::named("trip_distance"), Col::named("total_amount")])?)
        })
        .model("amount_by_trip_distance", &["amount_base"], |inputs| {
            Ok(inputs.get("amount_base")?.sort([Col::named("trip_distance")])?)
        })
        .sql_model("copy", &["amount_base"], "SELECT * FROM amount_base", Dialect::Ansi, None)
        .build()
        .unwrap();
    Project::new(defs, config)
}

#[test]
fn cycles_are_rejected() {
    let mut dag = Dag::new();
    dag.add_edge("a".to_string(), "b".to_string()).unwrap();
    dag.add_edge("b".to_string(), "c".to_string()).unwrap();
    let err = dag.add_edge("c".to_string(), "a".to_string()).unwrap_err();
    assert!(matches!(err, DagError::Cycle { .. }));
    assert_eq!(dag.edges().len(), 2);

    let config = VinylConfig::default();
    let result = Defs::builder("loop", &config)
        .sql_model("a", &["b"], "SELECT x FROM b", Dialect::Ansi, None)
        .sql_model("b", &["a"], "SELECT x FROM a", Dialect::Ansi, None)
        .build();
    match result {
        Err(DefsError::Cycle(error)) => assert_eq!(error.error_type, VinylErrorType::Cycle),
        other => panic!("expected a cycle, got {:?}", other.map(|d| d.len())),
    }
}

#[test]
fn aliased_columns_still_join() {
    let Stores { stores, transactions } = stores();
    let a = stores
        .select([stores.col("city").alias("cit"), stores.col("store_nbr").alias("nbr")])
        .unwrap();
    let b = transactions
        .select([
            transactions.col("store_nbr").alias("nbr2"),
            transactions.col("transactions").alias("t"),
        ])
        .unwrap();

    let joined = join(&[&a, &b], &JoinOptions::default()).unwrap();
    assert_eq!(joined.columns(), vec!["cit", "nbr", "nbr2", "t"]);

    let batch = joined.execute().unwrap();
    assert_eq!(batch.len(), 3);
    for row in batch.sorted_rows() {
        assert_eq!(row[1], row[2]);
    }
}

#[test]
fn join_order_does_not_change_the_result() {
    let Stores { stores, transactions } = stores();
    let forward = join(&[&stores, &transactions], &JoinOptions::default()).unwrap();
    let backward = join(&[&transactions, &stores], &JoinOptions::default()).unwrap();

    let columns = |r: &Relation| r.columns().into_iter().map(String::from).collect::<BTreeSet<_>>();
    assert_eq!(columns(&forward), columns(&backward));

    let names = ["store_nbr", "city", "transactions"];
    let rows = |r: &Relation| r.execute().unwrap().project(&names).unwrap().sorted_rows();
    assert_eq!(rows(&forward), rows(&backward));
}

fn paint_table(decl: &str, table_name: &str, field: Field, rows: Vec<Value>) -> Relation {
    table(
        TableDecl::new(decl, TableRef::named(table_name)).field(field),
        rows.into_iter().map(|v| vec![v]).collect(),
    )
}

fn colors() -> Relation {
    paint_table(
        "paint.Colors",
        "colors",
        Field::new("color", LogicalType::String),
        vec![Value::from("red"), Value::from("blue")],
    )
}

fn sizes() -> Relation {
    paint_table(
        "paint.Sizes",
        "sizes",
        Field::new("size", LogicalType::Int),
        vec![int(1), int(2), int(3)],
    )
}

#[test]
fn unrelated_tables_need_an_explicit_cross_join() {
    let (colors, sizes) = (colors(), sizes());

    let err = join(&[&colors, &sizes], &JoinOptions::default()).unwrap_err();
    assert!(matches!(err, JoinError::NoRelationship { .. }), "{err}");

    let crossed = join(&[&colors, &sizes], &JoinOptions::default().allow_cross_join()).unwrap();
    assert_eq!(crossed.execute().unwrap().len(), 2 * 3);
}

#[test]
fn only_one_cross_join_per_join() {
    let finishes = paint_table(
        "paint.Finishes",
        "finishes",
        Field::new("finish", LogicalType::String),
        vec![Value::from("matte"), Value::from("gloss")],
    );
    let (colors, sizes) = (colors(), sizes());

    let err = join(&[&colors, &sizes, &finishes], &JoinOptions::default().allow_cross_join())
        .unwrap_err();
    match err {
        JoinError::NoRelationship { right, .. } => assert_eq!(right, "paint.Finishes"),
        other => panic!("expected no relationship, got {other}"),
    }
}

#[test]
fn cross_join_order_sets_the_column_order() {
    let (colors, sizes) = (colors(), sizes());
    let options = JoinOptions::default().allow_cross_join();

    let forward = join(&[&colors, &sizes], &options).unwrap();
    let backward = join(&[&sizes, &colors], &options).unwrap();
    assert_eq!(forward.columns(), vec!["color", "size"]);
    assert_eq!(backward.columns(), vec!["size", "color"]);
    assert_eq!(forward.execute().unwrap().len(), backward.execute().unwrap().len());
}

#[test]
fn union_fills_missing_columns_with_nulls() {
    let left = table(
        TableDecl::new("u.Left", TableRef::named("left_side"))
            .field(Field::new("a", LogicalType::Int))
            .field(Field::new("b", LogicalType::String)),
        vec![vec![int(1), Value::from("x")]],
    );
    let right = table(
        TableDecl::new("u.Right", TableRef::named("right_side"))
            .field(Field::new("a", LogicalType::Int))
            .field(Field::new("c", LogicalType::Float)),
        vec![vec![int(2), Value::Float(0.5)]],
    );

    let unioned = union(&[&left, &right], false).unwrap();
    assert_eq!(unioned.columns(), vec!["a", "b", "c"]);
    assert_eq!(
        unioned.execute().unwrap().sorted_rows(),
        vec![
            vec![int(1), Value::from("x"), Value::Null],
            vec![int(2), Value::Null, Value::Float(0.5)],
        ]
    );
}

#[test]
fn failures_stay_on_their_nodes() {
    let config = VinylConfig::default();
    let base = table(
        TableDecl::new("e.Base", TableRef::named("base")).field(Field::new("x", LogicalType::Int)),
        vec![vec![int(1)]],
    );
    let defs = Defs::builder("e", &config)
        .source("base", base)
        .unwrap()
        .model("n1", &["base"], |_| anyhow::bail!("n1 is broken"))
        .model("n2", &["n1"], |inputs| Ok(inputs.get("n1")?.clone()))
        .model("n3", &["base"], |inputs| Ok(inputs.get("base")?.select(["x"])?))
        .build()
        .unwrap();
    let project = Project::new(defs, config);

    let sql = project.get_sql_project(&[], None, None, false).unwrap();
    assert_eq!(sql.len(), 3);

    let n3 = sql.node("e.models.n3").unwrap();
    assert!(n3.errors.is_empty(), "{:?}", n3.errors);
    assert!(n3.ast.is_some());

    let n1 = sql.node("e.models.n1").unwrap();
    assert!(n1.has_errors());
    assert!(n1.errors[0].msg.contains("n1 is broken"));

    let n2 = sql.node("e.models.n2").unwrap();
    assert!(n2
        .errors
        .iter()
        .any(|e| e.source_id.as_deref() == Some("e.models.n1")));

    let parallel = project.get_sql_project(&[], None, None, true).unwrap();
    for id in ["e.models.n1", "e.models.n2", "e.models.n3"] {
        let types = |p: &vinyl_engine::SqlProject| {
            p.node(id)
                .unwrap()
                .errors
                .iter()
                .map(|e| (e.error_type, e.source_id.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(types(&sql), types(&parallel), "{id}");
    }
}

#[test]
fn selected_model_pulls_in_its_ancestors() {
    let project = taxi_project();
    let sql = project
        .get_sql_project(&["taxi.models.amount_by_trip_distance"], None, None, false)
        .unwrap();
    assert_eq!(sql.len(), 2);
    assert!(sql.errors().is_empty(), "{:?}", sql.errors());

    let lineage = sql.stitch_lineage(Some("taxi.models.amount_by_trip_distance"));
    let base = "urn:li:dataset:(urn:li:dataPlatform:duckdb,taxi.main.amount_base,PROD)";
    let sorted = "urn:li:dataset:(urn:li:dataPlatform:duckdb,taxi.main.amount_by_trip_distance,PROD)";
    let links = lineage.links_into(&field_urn(sorted, "total_amount"));
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].source_id, field_urn(base, "total_amount"));
    assert_eq!(links[0].ntype, LinkKind::Direct);
}

#[test]
fn select_star_links_are_direct_identity() {
    let sql = taxi_project()
        .get_sql_project(&["copy"], Some(1), Some(0), false)
        .unwrap();
    let lineage = sql.stitch_lineage(None);

    let copy = "urn:li:dataset:(urn:li:dataPlatform:duckdb,taxi.main.copy,PROD)";
    for column in ["trip_distance", "total_amount"] {
        let links = lineage.links_into(&field_urn(copy, column));
        assert_eq!(links.len(), 1, "{column}");
        assert_eq!(links[0].ntype, LinkKind::Direct);
        assert_eq!(links[0].how, "identity");
    }
}

#[test]
fn lineage_rendering_is_deterministic() {
    let render = || {
        let sql = taxi_project().get_sql_project(&[], None, None, false).unwrap();
        let lineage = sql.stitch_lineage(None);
        (lineage.to_ascii(), lineage.column_links.len())
    };

    let (first, links) = render();
    assert!(first.contains("amount_base"), "{first}");
    assert!(links > 0);
    assert_eq!(render(), (first, links));
}

#[test]
fn lineage_ascii_names_models_instead_of_urns() {
    let sql = taxi_project().get_sql_project(&[], None, None, false).unwrap();
    let ascii = sql.stitch_lineage(None).to_ascii();
    assert!(!ascii.contains("urn:li:"), "{ascii}");

    let names: Vec<&str> = ascii
        .lines()
        .map(|line| line.trim_start_matches(|c: char| !c.is_alphanumeric() && c != '_'))
        .collect();
    for model in ["trips", "amount_base", "amount_by_trip_distance", "copy"] {
        assert!(names.contains(&model), "{model} missing from\n{ascii}");
    }
}

#[test]
fn parse_errors_serialize_with_their_type() {
    let config = VinylConfig::default();
    let defs = Defs::builder("bad", &config)
        .sql_model("broken", &[], "SELEC 1", Dialect::Ansi, None)
        .build()
        .unwrap();
    let sql = Project::new(defs, config).get_sql_project(&[], None, None, false).unwrap();

    let errors = sql.errors();
    assert_eq!(errors.len(), 1);
    let json: serde_json::Value = serde_json::from_str(&errors[0].to_json().unwrap()).unwrap();
    assert_eq!(json["type"], "ParseError");
    assert_eq!(json["node_id"], "bad.models.broken");
    assert_eq!(json["dialect"], "ansi");
}

#[test]
fn sql_model_schema_comes_from_its_query() {
    let config = VinylConfig::default();
    let declared = Schema::from_columns(vec![Column::new("x", LogicalType::Int)]);
    let defs = Defs::builder("s", &config)
        .sql_model("lit", &[], "SELECT 1 AS x", Dialect::Ansi, Some(declared.clone()))
        .build()
        .unwrap();
    let sql = Project::new(defs, config).get_sql_project(&[], None, None, false).unwrap();
    assert_eq!(sql.node("s.models.lit").unwrap().schema.as_ref().unwrap().column_names(), vec!["x"]);
}
