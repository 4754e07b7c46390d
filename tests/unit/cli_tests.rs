//! Unit tests for CLI argument parsing and validation

use clap::Parser;
use std::path::PathBuf;
use tabrecon::cli::{Cli, Commands};
use tabrecon::SourceKind;

#[test]
fn test_cli_run_command() {
    let cli = Cli::try_parse_from(["tabrecon", "run", "run.json"]).unwrap();
    match cli.command {
        Commands::Run {
            config,
            output,
            parallel,
            json,
        } => {
            assert_eq!(config, PathBuf::from("run.json"));
            assert!(output.is_none());
            assert!(!parallel);
            assert!(!json);
        }
        _ => panic!("Expected Run command"),
    }
}

#[test]
fn test_cli_compare_defaults() {
    let cli = Cli::try_parse_from(["tabrecon", "compare", "a.csv", "b.csv"]).unwrap();
    match cli.command {
        Commands::Compare {
            source,
            target,
            source_type,
            keys,
            max_diffs,
            chunk_size,
            sorted,
            ..
        } => {
            assert_eq!(source, "a.csv");
            assert_eq!(target, "b.csv");
            assert!(source_type.is_none());
            assert!(keys.is_empty());
            assert_eq!(max_diffs, 1000);
            assert_eq!(chunk_size, 10000);
            assert!(!sorted);
        }
        _ => panic!("Expected Compare command"),
    }
}

#[test]
fn test_cli_compare_with_options() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "compare",
        "a.dat",
        "b.parquet",
        "--source-type",
        "csv",
        "--source-separator",
        "|",
        "--key",
        "id",
        "--map",
        "ID:id,amt:amount",
        "--ignore",
        "load_ts",
        "--max-diffs",
        "5",
        "--chunk-size",
        "500",
        "--parallel",
        "--json",
    ])
    .unwrap();

    match cli.command {
        Commands::Compare {
            source_type,
            source_separator,
            keys,
            mapping,
            ignore,
            max_diffs,
            chunk_size,
            parallel,
            json,
            ..
        } => {
            assert_eq!(source_type, Some(SourceKind::Delimited));
            assert_eq!(source_separator, Some('|'));
            assert_eq!(keys, vec!["id"]);
            assert_eq!(mapping.as_deref(), Some("ID:id,amt:amount"));
            assert_eq!(ignore.as_deref(), Some("load_ts"));
            assert_eq!(max_diffs, 5);
            assert_eq!(chunk_size, 500);
            assert!(parallel);
            assert!(json);
        }
        _ => panic!("Expected Compare command"),
    }
}

#[test]
fn test_cli_zero_chunk_size_rejected() {
    let result = Cli::try_parse_from(["tabrecon", "compare", "a.csv", "b.csv", "--chunk-size", "0"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_unknown_source_type_rejected() {
    let result = Cli::try_parse_from(["tabrecon", "schema", "data.xyz", "--type", "spreadsheet"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_check_command() {
    let cli = Cli::try_parse_from([
        "tabrecon",
        "check",
        "data.csv",
        "--key",
        "id",
        "--expected-rows",
        "42",
        "--max-null-ratio",
        "0.1",
    ])
    .unwrap();
    match cli.command {
        Commands::Check {
            input,
            kind,
            keys,
            expected_rows,
            max_null_ratio,
            ..
        } => {
            assert_eq!(input, "data.csv");
            assert!(kind.is_none());
            assert_eq!(keys, vec!["id"]);
            assert_eq!(expected_rows, Some(42));
            assert_eq!(max_null_ratio, Some(0.1));
        }
        _ => panic!("Expected Check command"),
    }
}

#[test]
fn test_cli_check_ratio_out_of_range() {
    let result = Cli::try_parse_from(["tabrecon", "check", "data.csv", "--max-null-ratio", "2"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_batch_command() {
    let cli = Cli::try_parse_from(["tabrecon", "batch", "meta.csv", "--output-dir", "out"]).unwrap();
    match cli.command {
        Commands::Batch { metadata, output_dir } => {
            assert_eq!(metadata, PathBuf::from("meta.csv"));
            assert_eq!(output_dir, Some(PathBuf::from("out")));
        }
        _ => panic!("Expected Batch command"),
    }
}

#[test]
fn test_cli_global_verbose_flag() {
    let cli = Cli::try_parse_from(["tabrecon", "schema", "data.csv", "--verbose"]).unwrap();
    assert!(cli.verbose);

    let cli = Cli::try_parse_from(["tabrecon", "-v", "schema", "data.csv"]).unwrap();
    assert!(cli.verbose);
}

#[test]
fn test_cli_missing_subcommand() {
    assert!(Cli::try_parse_from(["tabrecon"]).is_err());
}
