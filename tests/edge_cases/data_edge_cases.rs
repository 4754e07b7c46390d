//! Edge cases in input data: malformed rows, unicode, quoting, empty files

use crate::common::{compare_files, TestFixture};
use tabrecon::sources::MalformedRowPolicy;
use tabrecon::{
    open_source, ColumnMapping, CompareMode, CompareOptions, Engine, RunStatus, SourceConfig, SourceKind, TabreconError,
};

#[test]
fn test_unicode_and_quoted_fields() {
    let fixture = TestFixture::new().unwrap();
    let content = "id,name,notes\n1,Café,\"Delicious, café ☕\"\n2,北京,\"say \"\"hi\"\"\"\n3,🚀,rocket\n";
    let source = fixture.create_raw("source.csv", content).unwrap();
    let target = fixture.create_raw("target.csv", content).unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    assert!(report.comparison.is_clean());
    assert_eq!(report.comparison.counts.matched, 3);
}

#[test]
fn test_empty_sides() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n2,b\n").unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    assert!(report.comparison.is_complete());
    assert_eq!(report.comparison.source.rows, 0);
    assert_eq!(report.comparison.counts.missing_in_source, 2);
}

#[test]
fn test_malformed_rows_fail_the_run_by_default() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n2\n3,c\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n2,b\n3,c\n").unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    let result = &report.comparison;
    assert!(!result.is_complete());
    match &result.status {
        RunStatus::Incomplete { chunk_index, .. } => assert_eq!(*chunk_index, Some(0)),
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn test_malformed_rows_skipped_and_counted() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n2\n3,c\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n3,c\n").unwrap();

    let mut source_config = SourceConfig::new(SourceKind::Delimited, source.to_string_lossy());
    source_config.malformed_rows = MalformedRowPolicy::Skip;
    let mut source = open_source(&source_config, 10).unwrap();
    let mut target = open_source(&SourceConfig::new(SourceKind::Delimited, target.to_string_lossy()), 10).unwrap();

    let report = Engine::new(CompareOptions::default())
        .compare(source.as_mut(), target.as_mut(), &ColumnMapping::new().key("id"))
        .unwrap();
    assert!(report.comparison.is_clean());
    assert_eq!(report.comparison.source.skipped_rows, 1);
    assert_eq!(report.comparison.source.rows, 2);
}

#[test]
fn test_unsorted_input_in_sorted_mode_is_incomplete() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n3,c\n2,b\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n2,b\n3,c\n").unwrap();
    let options = CompareOptions {
        mode: CompareMode::Sorted,
        chunk_size: 1,
        ..CompareOptions::default()
    };

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
    match &report.comparison.status {
        RunStatus::Incomplete { error, row_key, .. } => {
            assert!(error.contains("Validation"), "{}", error);
            assert_eq!(row_key.as_deref(), Some("[2]"));
        }
        other => panic!("unexpected status {:?}", other),
    }
    assert!(report.comparison.counts.matched >= 1);
}

#[test]
fn test_schema_problems_fail_before_streaming() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n").unwrap();
    let target = fixture.create_raw("target.csv", "key,w\n1,a\n").unwrap();

    let err = compare_files(&source, &target, &ColumnMapping::new(), CompareOptions::default()).unwrap_err();
    assert!(matches!(err, TabreconError::Validation { .. }));

    let err = compare_files(
        &source,
        &target,
        &ColumnMapping::new().map("key", "id").key("nope"),
        CompareOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, TabreconError::Validation { .. }));
}

#[test]
fn test_missing_file_is_connection_error() {
    let fixture = TestFixture::new().unwrap();
    let config = SourceConfig::new(SourceKind::Delimited, fixture.path_str("absent.csv"));
    let err = open_source(&config, 10).and_then(|mut s| s.schema()).unwrap_err();
    assert!(matches!(err, TabreconError::Connection { .. }));
}

#[test]
fn test_integral_float_keys_match_integer_keys() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1.0,a\n2.0,b\n2.5,c\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n2,b\n").unwrap();

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    assert_eq!(report.comparison.counts.matched, 2);
    assert_eq!(report.comparison.counts.missing_in_target, 1);
}

#[test]
fn test_key_inferred_differently_per_side_still_aligns() {
    let fixture = TestFixture::new().unwrap();
    let mut rows: Vec<String> = (1..=1000).map(|i| format!("{},v{}", i, i)).collect();
    rows.push("X1,tail".to_string());
    let source = fixture
        .create_raw("source.csv", &format!("id,v\n{}\n", rows.join("\n")))
        .unwrap();
    rows.reverse();
    let target = fixture
        .create_raw("target.csv", &format!("id,v\n{}\n", rows.join("\n")))
        .unwrap();

    // The source samples only integers; the target sees "X1" first and keeps text
    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), CompareOptions::default()).unwrap();
    let result = &report.comparison;
    assert!(result.is_clean(), "{:?} {:?}", result.status, result.counts);
    assert_eq!(result.counts.matched, 1001);
}
