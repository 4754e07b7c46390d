//! Quality checks over delimited files, standalone and alongside a comparison

use crate::common::TestFixture;
use tabrecon::model::{KeyPart, RowKey, RowView, Value};
use tabrecon::quality::RowCountExpectation;
use tabrecon::result::{CheckDetail, CheckKind, KeyCount};
use tabrecon::{open_source, BuiltinRule, BusinessRule, ColumnMapping, CompareOptions, Engine, QualityOptions, SourceConfig, SourceKind};

fn text_key(s: &str) -> RowKey {
    RowKey(vec![KeyPart::Text(s.to_string())])
}

fn check_file(fixture: &TestFixture, name: &str, content: &str, options: QualityOptions) -> tabrecon::QualityCheckResult {
    let path = fixture.create_raw(name, content).unwrap();
    let config = SourceConfig::new(SourceKind::Delimited, path.to_string_lossy()).with_chunk_size(2);
    let mut adapter = open_source(&config, 2).unwrap();
    Engine::new(CompareOptions::default()).check(adapter.as_mut(), options).unwrap()
}

#[test]
fn test_duplicate_detection() {
    let fixture = TestFixture::new().unwrap();
    let options = QualityOptions::default().with_keys(vec!["code".into()]);
    let result = check_file(&fixture, "codes.csv", "code,n\nA,1\nB,2\nA,3\nC,4\nB,5\nB,6\n", options);

    let outcome = result.check(CheckKind::Duplicates).unwrap();
    assert!(!outcome.passed);
    match &outcome.detail {
        CheckDetail::Duplicates {
            distinct_keys,
            duplicate_keys,
            extra_rows,
            sample,
            ..
        } => {
            assert_eq!(*distinct_keys, 3);
            assert_eq!(*duplicate_keys, 2);
            assert_eq!(*extra_rows, 3);
            assert_eq!(
                sample,
                &vec![
                    KeyCount {
                        key: text_key("A"),
                        count: 2
                    },
                    KeyCount {
                        key: text_key("B"),
                        count: 3
                    },
                ]
            );
        }
        other => panic!("unexpected detail {:?}", other),
    }
}

#[test]
fn test_row_count_and_nulls() {
    let fixture = TestFixture::new().unwrap();
    let options = QualityOptions {
        row_count: Some(RowCountExpectation::Exact(4)),
        null_thresholds: [("email".to_string(), 0.25)].into_iter().collect(),
        ..QualityOptions::default()
    };
    let result = check_file(
        &fixture,
        "people.csv",
        "id,email\n1,a@x.io\n2,\n3,\n4,d@x.io\n",
        options,
    );

    assert_eq!(result.rows, 4);
    assert!(result.check(CheckKind::RowCount).unwrap().passed);
    let nulls = result.check(CheckKind::Nulls).unwrap();
    assert!(!nulls.passed);
    match &nulls.detail {
        CheckDetail::Nulls { columns, .. } => {
            let email = columns.iter().find(|c| c.column == "email").unwrap();
            assert_eq!(email.nulls, 2);
            assert_eq!(email.ratio, 0.5);
            assert!(!email.passed);
        }
        other => panic!("unexpected detail {:?}", other),
    }
    assert!(!result.passed());
}

#[test]
fn test_business_rules() {
    let fixture = TestFixture::new().unwrap();
    let options = QualityOptions::default()
        .with_keys(vec!["id".into()])
        .with_rule(BuiltinRule::SumEquals {
            addends: vec!["net".into(), "tax".into()],
            total: "gross".into(),
            tolerance: 0.001,
        })
        .with_rule(BusinessRule::predicate("gross_positive", |row: &RowView| {
            matches!(row.get("gross").and_then(Value::as_f64), Some(g) if g > 0.0)
        }));
    let result = check_file(
        &fixture,
        "invoices.csv",
        "id,net,tax,gross\n1,10,2,12\n2,5,1,7\n3,0,0,0\n",
        options,
    );

    let rules: Vec<_> = result.checks.iter().filter(|c| c.kind == CheckKind::BusinessRule).collect();
    assert_eq!(rules.len(), 2);
    for rule in rules {
        assert!(!rule.passed);
        match &rule.detail {
            CheckDetail::BusinessRule { violations, sample, .. } => {
                assert_eq!(*violations, 1);
                assert_eq!(sample.len(), 1);
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }
}

#[test]
fn test_quality_alongside_comparison_uses_paired_count() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id,v\n1,a\n2,b\n2,b\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n2,b\n").unwrap();

    let paired = QualityOptions {
        row_count: Some(RowCountExpectation::Paired),
        ..QualityOptions::default()
    };
    let mut source = open_source(&SourceConfig::new(SourceKind::Delimited, source.to_string_lossy()), 1).unwrap();
    let mut target = open_source(&SourceConfig::new(SourceKind::Delimited, target.to_string_lossy()), 1).unwrap();
    let report = Engine::new(CompareOptions::default())
        .with_source_quality(paired.clone())
        .with_target_quality(paired)
        .compare(source.as_mut(), target.as_mut(), &ColumnMapping::new().key("id"))
        .unwrap();

    assert_eq!(report.quality.len(), 2);
    let source_quality = &report.quality[0];
    assert!(!source_quality.check(CheckKind::RowCount).unwrap().passed);
    assert!(!source_quality.check(CheckKind::Duplicates).unwrap().passed);
    let target_quality = &report.quality[1];
    assert!(!target_quality.check(CheckKind::RowCount).unwrap().passed);
    assert!(target_quality.check(CheckKind::Duplicates).unwrap().passed);
    assert!(!report.is_clean());
}
