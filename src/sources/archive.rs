//! Bundles of delimited files: zip, tar and tar.zst archives, or a
//! directory. Entries are read in order and concatenated into one stream.

use super::delimited::{RecordDecoder, TextSettings};
use super::producer;
use super::{require_path, RowReader, SourceAdapter, SourceConfig, StreamOptions};
use crate::error::{Result, TabreconError};
use crate::hash::hash_column_names;
use crate::model::Schema;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tar::Archive;
use walkdir::WalkDir;
use zstd::Decoder;

const DATA_EXTENSIONS: &[&str] = &["csv", "txt", "dat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BundleKind {
    Directory,
    Zip,
    Tar,
    TarZstd,
}

impl BundleKind {
    fn detect(path: &Path) -> Result<Self> {
        let lower = path.to_string_lossy().to_lowercase();
        if path.is_dir() {
            Ok(Self::Directory)
        } else if lower.ends_with(".zip") {
            Ok(Self::Zip)
        } else if lower.ends_with(".tar.zst") || lower.ends_with(".tzst") {
            Ok(Self::TarZstd)
        } else if lower.ends_with(".tar") {
            Ok(Self::Tar)
        } else {
            Err(TabreconError::config(format!(
                "Unsupported bundle: {} (expected .zip, .tar, .tar.zst or a directory)",
                path.display()
            )))
        }
    }
}

fn is_data_entry(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| DATA_EXTENSIONS.iter().any(|d| ext.eq_ignore_ascii_case(d)))
        .unwrap_or(false)
}

/// Visit data entries in bundle order; `visit` returns `false` to stop early
fn for_each_entry<F>(path: &Path, kind: BundleKind, mut visit: F) -> Result<()>
where
    F: FnMut(&str, &mut dyn Read) -> Result<bool>,
{
    match kind {
        BundleKind::Directory => {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry?;
                let name = entry.path().to_string_lossy().to_string();
                if !entry.file_type().is_file() || !is_data_entry(&name) {
                    continue;
                }
                let mut file = File::open(entry.path())?;
                if !visit(&name, &mut file)? {
                    break;
                }
            }
        }
        BundleKind::Zip => {
            let mut archive = zip::ZipArchive::new(File::open(path)?)?;
            for i in 0..archive.len() {
                let mut entry = archive.by_index(i)?;
                let name = entry.name().to_string();
                if entry.is_dir() || !is_data_entry(&name) {
                    continue;
                }
                if !visit(&name, &mut entry)? {
                    break;
                }
            }
        }
        BundleKind::Tar => visit_tar(Archive::new(File::open(path)?), &mut visit)?,
        BundleKind::TarZstd => visit_tar(Archive::new(Decoder::new(File::open(path)?)?), &mut visit)?,
    }
    Ok(())
}

fn visit_tar<R, F>(mut archive: Archive<R>, visit: &mut F) -> Result<()>
where
    R: Read,
    F: FnMut(&str, &mut dyn Read) -> Result<bool>,
{
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().to_string();
        if !is_data_entry(&name) {
            continue;
        }
        if !visit(&name, &mut entry)? {
            break;
        }
    }
    Ok(())
}

/// Bundle adapter
pub struct ArchiveSource {
    path: PathBuf,
    settings: TextSettings,
    options: StreamOptions,
    schema: Option<Schema>,
    header: Vec<String>,
}

impl ArchiveSource {
    pub fn new(config: &SourceConfig, options: StreamOptions) -> Result<Self> {
        Ok(Self {
            path: PathBuf::from(&config.location),
            settings: TextSettings::from_config(config, ',')?,
            options,
            schema: None,
            header: Vec::new(),
        })
    }

    fn kind(&self) -> Result<BundleKind> {
        let path = require_path(&self.describe(), &self.path.to_string_lossy())?;
        BundleKind::detect(&path)
    }
}

impl SourceAdapter for ArchiveSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn options(&self) -> &StreamOptions {
        &self.options
    }

    fn schema(&mut self) -> Result<Schema> {
        if let Some(schema) = &self.schema {
            return Ok(schema.clone());
        }
        let kind = self.kind()?;
        let settings = self.settings.clone();
        let mut first = None;

        for_each_entry(&self.path, kind, |name, input| {
            let mut reader = settings.reader(input);
            let columns = settings.sniff(&mut reader)?;
            let header: Vec<String> = if settings.has_header {
                reader.headers()?.iter().map(|h| h.trim().to_string()).collect()
            } else {
                Vec::new()
            };
            log::debug!("Schema taken from bundle entry {}", name);
            first = Some((columns, header));
            Ok(false)
        })?;

        let (columns, header) = first.ok_or_else(|| {
            TabreconError::connection(self.describe(), "bundle contains no .csv, .txt or .dat entries")
        })?;
        let schema = Arc::new(columns);
        self.header = header;
        self.schema = Some(schema.clone());
        Ok(schema)
    }

    fn open_reader(&mut self) -> Result<Box<dyn RowReader>> {
        let schema = self.schema()?;
        let kind = self.kind()?;
        let path = self.path.clone();
        let settings = self.settings.clone();
        let decoder = RecordDecoder::new(&schema, settings.nulls.clone());
        let expected = hash_column_names(&self.header);

        let reader = producer::spawn(self.describe(), self.options.timeout, move |sink| {
            let mut record_no = 0u64;
            for_each_entry(&path, kind, |name, input| {
                let mut reader = settings.reader(input);
                if settings.has_header {
                    let header: Vec<String> = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
                    if hash_column_names(&header) != expected {
                        return Err(TabreconError::schema_mismatch(format!(
                            "bundle entry {} has header [{}] which differs from the first entry",
                            name,
                            header.join(", ")
                        )));
                    }
                }
                log::debug!("Reading bundle entry {}", name);
                for record in reader.records() {
                    record_no += 1;
                    sink.send(decoder.decode_result(record, record_no)?)?;
                }
                Ok(true)
            })
        })?;
        Ok(Box::new(reader))
    }
}
