//! Integration tests for batch runs driven by a metadata sheet

use crate::common::{assertions, CliTestRunner};
use tabrecon::metadata::load_batch;
use tabrecon::RunReport;

const HEADER: &str = "ComparisonType,Filename1,Filename2,Separator1,Separator2,ColumnMapping,IgnoredColumns,KeyColumns,SkipFile\n";

fn write_feeds(runner: &CliTestRunner) {
    let fixture = runner.fixture();
    fixture
        .create_raw("feeds/employees.csv", "emp_id,name,salary\n1,Ann,100\n2,Bob,200\n")
        .unwrap();
    fixture
        .create_raw("feeds/employees_new.dat", "id|full_name|salary|load_ts\n1|Ann|100|x\n2|Bob|210|y\n")
        .unwrap();
    fixture
        .create_raw("feeds/items.csv", "sku,qty\nA,1\nB,2\n")
        .unwrap();
    fixture
        .create_raw("feeds/items_copy.csv", "sku,qty\nA,1\nB,2\n")
        .unwrap();
}

#[test]
fn test_batch_runs_feed_to_feed_rows() {
    let runner = CliTestRunner::new().unwrap();
    write_feeds(&runner);
    let fixture = runner.fixture();
    let metadata = fixture
        .create_raw(
            "metadata.csv",
            &format!(
                "{}\
                 Feed To Feed,feeds/employees.csv,feeds/employees_new.dat,\",\",|,\"emp_id:id,name:full_name\",load_ts,id,\n\
                 Feed To Feed,feeds/items.csv,feeds/items_copy.csv,,,,,sku,\n\
                 Feed To Feed,feeds/missing.csv,feeds/items.csv,,,,,,#Skip until delivered\n\
                 DB To DB,a,b,,,,,,\n",
                HEADER
            ),
        )
        .unwrap();
    let out_dir = fixture.path_str("reports");

    let complete = runner
        .run_command(&["batch", &metadata.to_string_lossy(), "--output-dir", &out_dir])
        .unwrap();
    assert!(complete);

    let employees = fixture.root().join("reports/employees_vs_employees_new.json");
    assertions::assert_file_exists_and_not_empty(&employees);
    let report: RunReport = serde_json::from_str(&std::fs::read_to_string(&employees).unwrap()).unwrap();
    assert_eq!(report.comparison.counts.matched, 1);
    assert_eq!(report.comparison.counts.mismatched, 1);
    assert_eq!(report.comparison.diffs[0].cells[0].column, "salary");
    assert!(report.comparison.columns.iter().all(|p| p.target != "load_ts"));

    let items = fixture.root().join("reports/items_vs_items_copy.json");
    let report: RunReport = serde_json::from_str(&std::fs::read_to_string(&items).unwrap()).unwrap();
    assert!(report.is_clean());
}

#[test]
fn test_batch_entry_failure_marks_batch_incomplete() {
    let runner = CliTestRunner::new().unwrap();
    write_feeds(&runner);
    let metadata = runner
        .fixture()
        .create_raw(
            "metadata.csv",
            &format!(
                "{}\
                 Feed To Feed,feeds/items.csv,feeds/items_copy.csv,,,,,sku,\n\
                 Feed To Feed,feeds/gone.csv,feeds/items.csv,,,,,sku,\n",
                HEADER
            ),
        )
        .unwrap();

    let complete = runner.run_command(&["batch", &metadata.to_string_lossy()]).unwrap();
    assert!(!complete);
}

#[test]
fn test_load_batch_resolves_against_sheet_directory() {
    let runner = CliTestRunner::new().unwrap();
    let metadata = runner
        .fixture()
        .create_raw(
            "sheets/metadata.csv",
            &format!("{}Feed To Feed,in/a.csv,in/b.csv,\\t,tab,,,,\n", HEADER),
        )
        .unwrap();

    let entries = load_batch(&metadata).unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].source.location.ends_with("a.csv"));
    assert!(std::path::Path::new(&entries[0].source.location).starts_with(runner.fixture().root().join("sheets")));
    assert_eq!(entries[0].source.separator, Some('\t'));
    assert_eq!(entries[0].target.separator, Some('\t'));
}
