//! Command implementations for the tabrecon CLI

use crate::cli::Commands;
use crate::compare::{CompareMode, CompareOptions};
use crate::config::RunConfig;
use crate::engine::{Engine, RunReport};
use crate::error::Result;
use crate::hash::hash_column_names;
use crate::mapping::ColumnMapping;
use crate::metadata::load_batch;
use crate::output::{format_bytes, JsonFormatter, PrettyPrinter};
use crate::progress::ProgressReporter;
use crate::quality::{QualityOptions, RowCountExpectation};
use crate::sources::{open_source, SourceConfig, SourceKind};
use std::path::{Path, PathBuf};

/// Execute a command. Returns `false` when a run finished incomplete.
pub fn execute_command(command: Commands) -> Result<bool> {
    match command {
        Commands::Run {
            config,
            output,
            parallel,
            json,
        } => run_command(&config, output.as_deref(), parallel, json),
        Commands::Compare {
            source,
            target,
            source_type,
            target_type,
            source_separator,
            target_separator,
            keys,
            mapping,
            ignore,
            max_diffs,
            chunk_size,
            sorted,
            parallel,
            output,
            json,
        } => {
            let mut config = RunConfig::new(
                source_config(&source, source_type, source_separator),
                source_config(&target, target_type, target_separator),
            );
            config.mapping = ColumnMapping::from_strings(mapping.as_deref().unwrap_or(""), ignore.as_deref().unwrap_or(""))?;
            config.mapping.keys = keys;
            config.compare = CompareOptions {
                mode: if sorted { CompareMode::Sorted } else { CompareMode::Unsorted },
                chunk_size,
                max_reported_diffs: max_diffs,
                parallel,
                ..CompareOptions::default()
            };
            config.validate()?;
            compare_command(&config, output.as_deref(), json)
        }
        Commands::Check {
            input,
            kind,
            separator,
            keys,
            expected_rows,
            max_null_ratio,
            output,
            json,
        } => {
            let mut options = QualityOptions::default().with_keys(keys);
            options.row_count = expected_rows.map(RowCountExpectation::Exact);
            if let Some(ratio) = max_null_ratio {
                options.max_null_ratio = ratio;
            }
            check_command(&source_config(&input, kind, separator), options, output.as_deref(), json)
        }
        Commands::Schema { input, kind, separator } => schema_command(&source_config(&input, kind, separator)),
        Commands::Batch { metadata, output_dir } => batch_command(&metadata, output_dir.as_deref()),
    }
}

fn source_config(location: &str, kind: Option<SourceKind>, separator: Option<char>) -> SourceConfig {
    let mut config = SourceConfig::new(kind.unwrap_or_else(|| SourceKind::detect(location)), location);
    config.separator = separator;
    config
}

fn run_command(path: &Path, output: Option<&Path>, parallel: bool, json: bool) -> Result<bool> {
    let mut config = RunConfig::load(path)?;
    if parallel {
        config.compare.parallel = true;
    }
    compare_command(&config, output, json)
}

fn compare_command(config: &RunConfig, output: Option<&Path>, json: bool) -> Result<bool> {
    let progress = if json {
        ProgressReporter::new_minimal()
    } else {
        ProgressReporter::new_for_compare()
    };
    let (mut source, mut target) = config.open_sources()?;
    let mut engine = config.engine().with_progress(progress);
    let report = engine.compare(source.as_mut(), target.as_mut(), &config.mapping)?;

    emit(&report, output, json, PrettyPrinter::print_report)?;
    Ok(report.is_complete())
}

fn check_command(config: &SourceConfig, options: QualityOptions, output: Option<&Path>, json: bool) -> Result<bool> {
    let progress = if json {
        ProgressReporter::new_minimal()
    } else {
        ProgressReporter::new_for_check()
    };
    let mut adapter = open_source(config, crate::DEFAULT_CHUNK_SIZE)?;
    let mut engine = Engine::new(CompareOptions::default()).with_progress(progress);
    let result = engine.check(adapter.as_mut(), options)?;

    emit(&result, output, json, PrettyPrinter::print_quality)?;
    Ok(result.status.is_complete())
}

fn schema_command(config: &SourceConfig) -> Result<bool> {
    let mut adapter = open_source(config, crate::DEFAULT_CHUNK_SIZE)?;
    let schema = adapter.schema()?;
    let names: Vec<String> = schema.iter().map(|c| c.name.clone()).collect();
    log::debug!("Column fingerprint: {}", hash_column_names(&names));
    PrettyPrinter::print_schema(&adapter.describe(), &schema);
    Ok(true)
}

fn batch_command(metadata: &Path, output_dir: Option<&Path>) -> Result<bool> {
    let entries = load_batch(metadata)?;
    let mut lines = Vec::with_capacity(entries.len());
    let mut complete = true;

    for entry in entries {
        let name = entry.name();
        let outcome = run_batch_entry(&entry.source, &entry.target, &entry.mapping).and_then(|report| {
            if let Some(dir) = output_dir {
                let path: PathBuf = dir.join(format!("{}.json", name));
                let bytes = JsonFormatter::write(&report, &path)?;
                log::info!("Wrote {} ({})", path.display(), format_bytes(bytes));
            }
            Ok(report)
        });
        match outcome {
            Ok(report) => {
                complete &= report.is_complete();
                lines.push((name, Ok(report.is_clean())));
            }
            Err(e) => {
                log::error!("Batch entry {} failed: {}", name, e);
                complete = false;
                lines.push((name, Err(e.to_string())));
            }
        }
    }

    PrettyPrinter::print_batch_summary(&lines);
    Ok(complete)
}

fn run_batch_entry(source: &SourceConfig, target: &SourceConfig, mapping: &ColumnMapping) -> Result<RunReport> {
    let options = CompareOptions::default();
    let mut source = open_source(source, options.chunk_size)?;
    let mut target = open_source(target, options.chunk_size)?;
    Engine::new(options).compare(source.as_mut(), target.as_mut(), mapping)
}

/// Print as JSON or pretty text, and write the JSON to `output` when given
fn emit<T: serde::Serialize>(data: &T, output: Option<&Path>, json: bool, pretty: fn(&T)) -> Result<()> {
    if json {
        println!("{}", JsonFormatter::format(data)?);
    } else {
        pretty(data);
    }
    if let Some(path) = output {
        let bytes = JsonFormatter::write(data, path)?;
        if !json {
            println!("\n📄 Report written to {} ({})", path.display(), format_bytes(bytes));
        }
    }
    Ok(())
}
