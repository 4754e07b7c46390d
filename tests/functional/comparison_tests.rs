//! End-to-end comparison behaviour over delimited files

use crate::common::{compare_files, sample_data, TestFixture};
use std::collections::BTreeSet;
use tabrecon::model::{KeyPart, RowKey, Value};
use tabrecon::result::{CellStatus, Side};
use tabrecon::{ColumnMapping, CompareMode, CompareOptions, ComparisonResult, RowStatus, RunReport};

fn key(id: i64) -> RowKey {
    RowKey(vec![KeyPart::Int(id)])
}

fn outcomes(result: &ComparisonResult) -> BTreeSet<(String, RowStatus)> {
    result.diffs.iter().map(|d| (d.key.to_string(), d.status)).collect()
}

fn with_chunk_size(chunk_size: usize) -> CompareOptions {
    CompareOptions {
        chunk_size,
        ..CompareOptions::default()
    }
}

#[test]
fn test_identical_files_have_no_differences() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_csv("source.csv", &sample_data::simple_rows()).unwrap();
    let target = fixture.create_csv("target.csv", &sample_data::simple_rows()).unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    let result = &report.comparison;
    assert!(result.is_clean());
    assert_eq!(result.counts.matched, 3);
    assert_eq!(result.counts.mismatched, 0);
    assert_eq!(result.counts.missing_in_source + result.counts.missing_in_target, 0);
    assert!(result.diffs.is_empty());
}

#[test]
fn test_identity_mapping_without_keys_matches_everything() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_csv("source.csv", &sample_data::simple_rows()).unwrap();
    let target = fixture.create_csv("target.csv", &sample_data::simple_rows()).unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new(), CompareOptions::default()).unwrap();
    assert!(report.comparison.is_clean());
    assert_eq!(report.comparison.counts.matched, 3);
}

#[test]
fn test_mapped_scenario_outcomes() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_csv("source.csv", &sample_data::source_rows()).unwrap();
    let target = fixture.create_csv("target.csv", &sample_data::target_rows()).unwrap();
    let mapping = ColumnMapping::new().map("id", "ID").key("id");

    let report = compare_files(&source, &target, &mapping, CompareOptions::default()).unwrap();
    let result = &report.comparison;
    assert!(result.is_complete());
    assert_eq!(result.counts.matched, 1);
    assert_eq!(result.counts.mismatched, 1);
    assert_eq!(result.counts.missing_in_source, 1);
    assert_eq!(result.counts.missing_in_target, 0);
    assert_eq!(result.key_columns, vec!["id"]);

    let mismatch = result.diffs.iter().find(|d| d.status == RowStatus::Mismatched).unwrap();
    assert_eq!(mismatch.key, key(2));
    assert_eq!(mismatch.cells.len(), 1);
    assert_eq!(mismatch.cells[0].column, "salary");
    assert_eq!(mismatch.cells[0].source_value, Value::Int(200));
    assert_eq!(mismatch.cells[0].target_value, Value::Int(250));
    assert_eq!(mismatch.cells[0].status, CellStatus::Mismatch);

    let missing = result.diffs.iter().find(|d| d.status == RowStatus::MissingInSource).unwrap();
    assert_eq!(missing.key, key(3));
}

#[test]
fn test_chunk_size_does_not_change_outcomes() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture
        .create_raw("source.csv", "id,v\n1,a\n2,b\n2,b\n3,c\n4,d\n6,f\n")
        .unwrap();
    let target = fixture
        .create_raw("target.csv", "id,v\n4,d\n3,x\n1,a\n5,e\n2,b\n")
        .unwrap();
    let mapping = ColumnMapping::new().key("id");

    let small = compare_files(&source, &target, &mapping, with_chunk_size(1)).unwrap();
    let large = compare_files(&source, &target, &mapping, with_chunk_size(10_000)).unwrap();

    assert_eq!(small.comparison.counts, large.comparison.counts);
    assert_eq!(outcomes(&small.comparison), outcomes(&large.comparison));
    assert_eq!(small.comparison.counts.matched, 3);
    assert_eq!(small.comparison.counts.mismatched, 1);
    assert_eq!(small.comparison.counts.missing_in_source, 1);
    assert_eq!(small.comparison.counts.missing_in_target, 1);
    assert_eq!(small.comparison.counts.duplicate_key, 1);
}

#[test]
fn test_duplicate_key_on_source_reported_once() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n1,a\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n").unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    let result = &report.comparison;
    assert_eq!(result.counts.matched, 1);
    assert_eq!(result.counts.duplicate_key, 1);

    let duplicates: Vec<_> = result.diffs.iter().filter(|d| d.status == RowStatus::DuplicateKey).collect();
    assert_eq!(duplicates.len(), 1);
    assert_eq!(duplicates[0].key, key(1));
    assert_eq!(duplicates[0].side, Some(Side::Source));
}

#[test]
fn test_null_cells() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,a,b,c\n1,,,x\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,a,b,c\n1,,y,\n").unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    let diff = &report.comparison.diffs[0];
    assert_eq!(diff.status, RowStatus::Mismatched);
    let statuses: Vec<_> = diff.cells.iter().map(|c| (c.column.as_str(), c.status)).collect();
    assert_eq!(statuses, vec![("b", CellStatus::SourceNull), ("c", CellStatus::TargetNull)]);
}

#[test]
fn test_null_counts_compared_across_sides() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,a,b,c\n1,,,x\n2,,q,r\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,a,b,c\n1,,y,\n2,z,q,r\n").unwrap();

    for parallel in [false, true] {
        let options = CompareOptions {
            parallel,
            chunk_size: 1,
            ..CompareOptions::default()
        };
        let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
        let nulls = |column: &str| {
            let counts = report.comparison.null_counts.iter().find(|c| c.column == column).unwrap();
            (counts.source_nulls, counts.target_nulls)
        };
        assert_eq!(nulls("id"), (0, 0));
        assert_eq!(nulls("a"), (2, 1));
        assert_eq!(nulls("b"), (1, 0));
        assert_eq!(nulls("c"), (0, 1));
        let differing: Vec<&str> = report.comparison.null_count_differences().map(|c| c.column.as_str()).collect();
        assert_eq!(differing, vec!["a", "b", "c"]);
    }
}

#[test]
fn test_truncation_keeps_true_total() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n2,a\n3,a\n4,a\n5,a\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,b\n2,b\n3,b\n4,b\n5,b\n").unwrap();
    let options = CompareOptions {
        max_reported_diffs: 1,
        ..CompareOptions::default()
    };

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
    let result = &report.comparison;
    assert_eq!(result.diffs.len(), 1);
    assert!(result.truncated);
    assert_eq!(result.total_diffs, 5);
    assert_eq!(result.counts.mismatched, 5);
}

#[test]
fn test_sorted_and_parallel_modes_agree() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n2,b\n4,d\n5,e\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n3,c\n4,x\n5,e\n").unwrap();
    let mapping = ColumnMapping::new().key("id");

    let baseline = compare_files(&source, &target, &mapping, with_chunk_size(2)).unwrap();
    let sorted = compare_files(
        &source,
        &target,
        &mapping,
        CompareOptions {
            mode: CompareMode::Sorted,
            chunk_size: 2,
            ..CompareOptions::default()
        },
    )
    .unwrap();
    let parallel = compare_files(
        &source,
        &target,
        &mapping,
        CompareOptions {
            parallel: true,
            chunk_size: 1,
            ..CompareOptions::default()
        },
    )
    .unwrap();

    for report in [&sorted, &parallel] {
        assert!(report.comparison.is_complete());
        assert_eq!(report.comparison.counts, baseline.comparison.counts);
        assert_eq!(outcomes(&report.comparison), outcomes(&baseline.comparison));
    }
    assert_eq!(baseline.comparison.counts.matched, 2);
    assert_eq!(baseline.comparison.counts.mismatched, 1);
}

#[test]
fn test_numeric_tolerance() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,amount\n1,100.00\n2,100.00\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,amount\n1,100.004\n2,100.5\n").unwrap();
    let mut options = CompareOptions::default();
    options.strategy.absolute_tolerance = 0.01;

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
    assert_eq!(report.comparison.counts.matched, 1);
    assert_eq!(report.comparison.counts.mismatched, 1);
    assert_eq!(report.comparison.diffs[0].key, key(2));
}

#[test]
fn test_report_serialization_preserves_counts_and_order() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_csv("source.csv", &sample_data::source_rows()).unwrap();
    let target = fixture.create_csv("target.csv", &sample_data::target_rows()).unwrap();
    let mapping = ColumnMapping::new().map("id", "ID").key("id");

    let report = compare_files(&source, &target, &mapping, CompareOptions::default()).unwrap();
    let json = serde_json::to_string(&report).unwrap();
    let back: RunReport = serde_json::from_str(&json).unwrap();

    assert_eq!(back.comparison.counts, report.comparison.counts);
    let order = |r: &RunReport| r.comparison.diffs.iter().map(|d| (d.key.clone(), d.status)).collect::<Vec<_>>();
    assert_eq!(order(&back), order(&report));
    assert_eq!(back.comparison.run_id, report.comparison.run_id);
}
