//! Integration tests for the run, compare, check and schema commands

use crate::common::{assertions, sample_data, CliTestRunner};
use serde_json::json;
use tabrecon::{RunReport, TabreconError};

#[test]
fn test_run_command_writes_report() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture.create_csv("data/source.csv", &sample_data::source_rows()).unwrap();
    fixture.create_csv("data/target.csv", &sample_data::target_rows()).unwrap();
    let config = fixture
        .create_json(
            "run.json",
            &json!({
                "source": {"type": "csv", "location": "data/source.csv"},
                "target": {"type": "csv", "location": "data/target.csv"},
                "mapping": {"columns": {"id": "ID"}, "keys": ["id"]},
                "compare": {"chunk_size": 1},
                "quality": {"target": {"row_count": {"exact": 3}}}
            }),
        )
        .unwrap();
    let output = fixture.path_str("out/report.json");

    let complete = runner
        .run_command(&["run", &config.to_string_lossy(), "--output", &output, "--json"])
        .unwrap();
    assert!(complete);

    let output = fixture.root().join("out/report.json");
    assertions::assert_file_exists_and_not_empty(&output);
    assertions::assert_json_contains_keys(&output, &["comparison", "quality"]).unwrap();

    let report: RunReport = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(report.comparison.counts.matched, 1);
    assert_eq!(report.comparison.counts.mismatched, 1);
    assert_eq!(report.comparison.counts.missing_in_source, 1);
    assert_eq!(report.quality.len(), 1);
    assert!(report.quality[0].passed());
}

#[test]
fn test_run_command_parallel_flag() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    fixture.create_csv("source.csv", &sample_data::simple_rows()).unwrap();
    fixture.create_csv("target.csv", &sample_data::simple_rows()).unwrap();
    let config = fixture
        .create_json(
            "run.json",
            &json!({
                "source": {"type": "delimited", "location": "source.csv"},
                "target": {"type": "delimited", "location": "target.csv"},
                "mapping": {"keys": ["id"]}
            }),
        )
        .unwrap();

    runner.expect_success(&["run", &config.to_string_lossy(), "--parallel"]);
}

#[test]
fn test_invalid_run_config_fails() {
    let runner = CliTestRunner::new().unwrap();
    let config = runner
        .fixture()
        .create_json("run.json", &json!({"source": {"type": "csv", "location": "a.csv"}}))
        .unwrap();
    let err = runner.expect_failure(&["run", &config.to_string_lossy()]);
    assert!(matches!(err, TabreconError::Config { .. }));
}

#[test]
fn test_compare_command() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let source = fixture.create_csv("source.csv", &sample_data::source_rows()).unwrap();
    let target = fixture
        .create_delimited("target.dat", &sample_data::target_rows(), '|')
        .unwrap();
    let output = fixture.path_str("compare.json");

    runner.expect_success(&[
        "compare",
        &source.to_string_lossy(),
        &target.to_string_lossy(),
        "--map",
        "ID:id",
        "--key",
        "id",
        "--max-diffs",
        "1",
        "--output",
        &output,
    ]);

    let report: RunReport = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(report.comparison.diffs.len(), 1);
    assert!(report.comparison.truncated);
    assert_eq!(report.comparison.total_diffs, 2);
}

#[test]
fn test_compare_command_unknown_key_fails() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let source = fixture.create_csv("source.csv", &sample_data::simple_rows()).unwrap();
    let target = fixture.create_csv("target.csv", &sample_data::simple_rows()).unwrap();

    let err = runner.expect_failure(&[
        "compare",
        &source.to_string_lossy(),
        &target.to_string_lossy(),
        "--key",
        "sku",
    ]);
    assert!(matches!(err, TabreconError::Validation { .. }));
}

#[test]
fn test_incomplete_compare_reports_false() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let source = fixture.create_raw("source.csv", "id,v\n2,b\n1,a\n").unwrap();
    let target = fixture.create_raw("target.csv", "id,v\n1,a\n2,b\n").unwrap();

    let complete = runner
        .run_command(&[
            "compare",
            &source.to_string_lossy(),
            &target.to_string_lossy(),
            "--key",
            "id",
            "--sorted",
            "--chunk-size",
            "1",
        ])
        .unwrap();
    assert!(!complete);
}

#[test]
fn test_check_command() {
    let runner = CliTestRunner::new().unwrap();
    let fixture = runner.fixture();
    let input = fixture.create_raw("codes.csv", "code,n\nA,1\nB,\nA,3\n").unwrap();
    let output = fixture.path_str("check.json");

    runner.expect_success(&[
        "check",
        &input.to_string_lossy(),
        "--key",
        "code",
        "--expected-rows",
        "3",
        "--max-null-ratio",
        "0.5",
        "--output",
        &output,
        "--json",
    ]);

    let result: tabrecon::QualityCheckResult =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(result.rows, 3);
    let failed: Vec<_> = result.failed_checks().map(|c| c.name.as_str()).collect();
    assert_eq!(failed, vec!["duplicates(code)"]);
}

#[test]
fn test_schema_command() {
    let runner = CliTestRunner::new().unwrap();
    let input = runner
        .fixture()
        .create_raw("data.tsv", "id\tname\tprice\n1\tApple\t1.5\n")
        .unwrap();
    runner.expect_success(&["schema", &input.to_string_lossy()]);

    let err = runner.expect_failure(&["schema", &runner.fixture().path_str("missing.csv")]);
    assert!(matches!(err, TabreconError::Connection { .. }));
}
