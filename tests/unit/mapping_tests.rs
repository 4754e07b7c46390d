//! Unit tests for column mapping and schema reconciliation

use tabrecon::mapping::ColumnMapping;
use tabrecon::model::{ColumnInfo, DataType};
use tabrecon::schema::{reconcile, CompareStrategy, StrategyOptions};
use tabrecon::TabreconError;

fn cols(defs: &[(&str, DataType)]) -> Vec<ColumnInfo> {
    defs.iter().map(|(n, t)| ColumnInfo::new(*n, *t)).collect()
}

#[test]
fn test_mapping_string_form() {
    let mapping = ColumnMapping::from_strings("name:full_name, salary:annual_salary", "load_ts").unwrap();
    assert_eq!(mapping.source_for("full_name"), Some("name"));
    assert_eq!(mapping.source_for("annual_salary"), Some("salary"));
    assert!(mapping.is_ignored("load_ts"));
}

#[test]
fn test_mapping_string_rejects_bad_pairs() {
    assert!(ColumnMapping::parse_pairs("name").is_err());
    assert!(ColumnMapping::parse_pairs("a:x,b:x").is_err());
    assert!(ColumnMapping::parse_pairs(":x").is_err());
}

#[test]
fn test_reconcile_pairs_mapped_and_same_name_columns() {
    let source = cols(&[("ID", DataType::Integer), ("name", DataType::Text), ("extra", DataType::Text)]);
    let target = cols(&[("id", DataType::Integer), ("name", DataType::Text), ("other", DataType::Text)]);
    let mapping = ColumnMapping::new().map("id", "ID").key("id");

    let reconciled = reconcile(&source, &target, &mapping, &StrategyOptions::default()).unwrap();
    let targets: Vec<_> = reconciled.pairs.iter().map(|p| p.target.as_str()).collect();
    assert_eq!(targets, vec!["id", "name"]);
    assert_eq!(reconciled.key_names(), vec!["id"]);
    assert!(!reconciled.implicit_keys);
}

#[test]
fn test_reconcile_missing_key_fails_before_streaming() {
    let source = cols(&[("id", DataType::Integer)]);
    let target = cols(&[("id", DataType::Integer)]);
    let mapping = ColumnMapping::new().key("order_id");
    let err = reconcile(&source, &target, &mapping, &StrategyOptions::default()).unwrap_err();
    assert!(matches!(err, TabreconError::Validation { .. }));
}

#[test]
fn test_reconcile_numeric_tolerance_strategy() {
    let source = cols(&[("id", DataType::Integer), ("amt", DataType::Float)]);
    let target = cols(&[("id", DataType::Integer), ("amt", DataType::Float)]);
    let options = StrategyOptions {
        absolute_tolerance: 0.01,
        ..StrategyOptions::default()
    };
    let reconciled = reconcile(&source, &target, &ColumnMapping::new().key("id"), &options).unwrap();
    let amt = reconciled.pairs.iter().find(|p| p.target == "amt").unwrap();
    assert!(matches!(amt.strategy, CompareStrategy::Numeric { .. }));
}
