//! Memory budgets, spilling, cancellation and timeouts

use crate::common::{compare_files, TestFixture};
use std::io::Write;
use tabrecon::{
    open_source, CancellationToken, ColumnMapping, CompareMode, CompareOptions, Engine, RunStatus, SourceConfig,
    SourceKind,
};

const ROWS: usize = 2_000;

#[test]
fn test_spilled_pending_rows_still_match() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_large_csv("source.csv", ROWS).unwrap();
    let target = fixture.create_large_csv_reversed("target.csv", ROWS).unwrap();
    let options = CompareOptions {
        chunk_size: 100,
        memory_budget: 16 * 1024,
        ..CompareOptions::default()
    };

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
    let result = &report.comparison;
    assert!(result.is_clean(), "{:?}", result.status);
    assert_eq!(result.counts.matched, ROWS as u64);
    assert_eq!(result.source.rows, ROWS as u64);
    assert_eq!(result.target.rows, ROWS as u64);
}

#[test]
fn test_spill_budget_exhaustion_is_reported() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_large_csv("source.csv", ROWS).unwrap();
    let target = fixture.create_large_csv_reversed("target.csv", ROWS).unwrap();
    let options = CompareOptions {
        chunk_size: 100,
        memory_budget: 4 * 1024,
        spill_budget: 1024,
        ..CompareOptions::default()
    };

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
    match &report.comparison.status {
        RunStatus::Incomplete { error, .. } => assert!(error.contains("Resource exhausted"), "{}", error),
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn test_sorted_mode_keeps_memory_flat() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_large_csv("source.csv", ROWS).unwrap();
    let target = fixture.create_large_csv("target.csv", ROWS).unwrap();
    let options = CompareOptions {
        mode: CompareMode::Sorted,
        chunk_size: 50,
        memory_budget: 64 * 1024,
        ..CompareOptions::default()
    };

    let report = compare_files(&source, &target, &ColumnMapping::new().key("id"), options).unwrap();
    assert!(report.comparison.is_clean(), "{:?}", report.comparison.status);
    assert_eq!(report.comparison.counts.matched, ROWS as u64);
}

#[test]
fn test_cancelled_run() {
    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_large_csv("source.csv", 10).unwrap();
    let target = fixture.create_large_csv("target.csv", 10).unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let mut source = open_source(&SourceConfig::new(SourceKind::Delimited, source.to_string_lossy()), 2).unwrap();
    let mut target = open_source(&SourceConfig::new(SourceKind::Delimited, target.to_string_lossy()), 2).unwrap();
    let report = Engine::new(CompareOptions::default())
        .with_cancellation(token)
        .compare(source.as_mut(), target.as_mut(), &ColumnMapping::new().key("id"))
        .unwrap();

    assert_eq!(report.comparison.status, RunStatus::Cancelled);
    assert!(!report.is_complete());
    assert_eq!(report.comparison.counts.matched, 0);
}

#[test]
fn test_http_timeout_fails_before_comparing() {
    let mut server = mockito::Server::new();
    let _slow = server
        .mock("GET", "/slow")
        .with_header("content-type", "application/json")
        .with_chunked_body(|w| {
            std::thread::sleep(std::time::Duration::from_secs(3));
            w.write_all(br#"[{"id": 1}]"#)
        })
        .create();

    let fixture = TestFixture::new().unwrap();
    let source = fixture.create_raw("source.csv", "id\n1\n").unwrap();
    let mut target = SourceConfig::new(SourceKind::Http, format!("{}/slow", server.url()));
    target.timeout_secs = Some(1);

    let mut source = open_source(&SourceConfig::new(SourceKind::Delimited, source.to_string_lossy()), 10).unwrap();
    let mut target = open_source(&target, 10).unwrap();
    let outcome = Engine::new(CompareOptions::default()).compare(
        source.as_mut(),
        target.as_mut(),
        &ColumnMapping::new().key("id"),
    );
    // Reading the schema already hits the timeout, so nothing is compared
    assert!(outcome.is_err());
}
