//! Comparisons across different source kinds

use crate::common::TestFixture;
use tabrecon::{open_source, ColumnMapping, CompareOptions, Engine, RunReport, SourceConfig, SourceKind};

const ORDERS_CSV: &str = "id,customer,amount\n1,acme,10.5\n2,globex,20.25\n3,initech,7.75\n";

fn compare(source: &SourceConfig, target: &SourceConfig, mapping: &ColumnMapping) -> RunReport {
    let options = CompareOptions {
        chunk_size: 2,
        ..CompareOptions::default()
    };
    let mut source = open_source(source, options.chunk_size).unwrap();
    let mut target = open_source(target, options.chunk_size).unwrap();
    Engine::new(options)
        .compare(source.as_mut(), target.as_mut(), mapping)
        .unwrap()
}

fn csv_config(fixture: &TestFixture) -> SourceConfig {
    let path = fixture.create_raw("orders.csv", ORDERS_CSV).unwrap();
    SourceConfig::new(SourceKind::Delimited, path.to_string_lossy())
}

#[test]
fn test_csv_against_duckdb_table() {
    let fixture = TestFixture::new().unwrap();
    let db_path = fixture.root().join("warehouse.duckdb");
    {
        let conn = duckdb::Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE orders (order_id INTEGER, customer VARCHAR, amount DOUBLE);
             INSERT INTO orders VALUES (1, 'acme', 10.5), (2, 'globex', 21.0), (3, 'initech', 7.75);",
        )
        .unwrap();
    }
    let mut target = SourceConfig::new(SourceKind::Table, db_path.to_string_lossy());
    target.table = Some("orders".into());

    let mapping = ColumnMapping::new().map("order_id", "id").key("order_id");
    let report = compare(&csv_config(&fixture), &target, &mapping);
    let result = &report.comparison;
    assert!(result.is_complete());
    assert_eq!(result.counts.matched, 2);
    assert_eq!(result.counts.mismatched, 1);
    assert_eq!(result.diffs[0].cells[0].column, "amount");
}

#[test]
fn test_csv_against_fixed_width() {
    let fixture = TestFixture::new().unwrap();
    let fixed = fixture
        .create_raw(
            "orders.txt",
            "id customer amount\n1  acme     10.5  \n2  globex   20.25 \n3  initech  7.75  \n",
        )
        .unwrap();
    let mut target = SourceConfig::new(SourceKind::FixedWidth, fixed.to_string_lossy());
    target.widths = vec![3, 9, 6];

    let report = compare(&csv_config(&fixture), &target, &ColumnMapping::new().key("id"));
    assert!(report.comparison.is_clean(), "{:?}", report.comparison.diffs);
    assert_eq!(report.comparison.counts.matched, 3);
}

#[test]
fn test_csv_against_directory_bundle() {
    let fixture = TestFixture::new().unwrap();
    fixture
        .create_raw("bundle/part1.csv", "id,customer,amount\n1,acme,10.5\n")
        .unwrap();
    fixture
        .create_raw("bundle/part2.csv", "id,customer,amount\n2,globex,20.25\n4,hooli,1.0\n")
        .unwrap();
    let target = SourceConfig::new(SourceKind::Archive, fixture.path_str("bundle"));

    let report = compare(&csv_config(&fixture), &target, &ColumnMapping::new().key("id"));
    let counts = &report.comparison.counts;
    assert_eq!(counts.matched, 2);
    assert_eq!(counts.missing_in_target, 1);
    assert_eq!(counts.missing_in_source, 1);
}

#[test]
fn test_csv_against_http_api() {
    let mut server = mockito::Server::new();
    let _page = server
        .mock("GET", "/orders")
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"data": [
                {"id": 1, "customer": "acme", "amount": 10.5},
                {"id": 2, "customer": "GLOBEX", "amount": 20.25},
                {"id": 3, "customer": "initech", "amount": 7.75}
            ]}"#,
        )
        .create();

    let fixture = TestFixture::new().unwrap();
    let mut target = SourceConfig::new(SourceKind::Http, format!("{}/orders", server.url()));
    target.records_field = Some("data".into());

    let report = compare(&csv_config(&fixture), &target, &ColumnMapping::new().key("id"));
    assert_eq!(report.comparison.counts.matched, 2);
    assert_eq!(report.comparison.counts.mismatched, 1);

    let options = CompareOptions {
        strategy: tabrecon::schema::StrategyOptions {
            case_fold: true,
            ..Default::default()
        },
        ..CompareOptions::default()
    };
    let mut source = open_source(&csv_config(&fixture), options.chunk_size).unwrap();
    let mut target = open_source(&target, options.chunk_size).unwrap();
    let folded = Engine::new(options)
        .compare(source.as_mut(), target.as_mut(), &ColumnMapping::new().key("id"))
        .unwrap();
    assert!(folded.comparison.is_clean());
}
