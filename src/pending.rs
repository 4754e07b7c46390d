//! Alignment state: per-side pending rows held in memory, and the
//! hash-partitioned temp files that state moves to once it outgrows its
//! memory budget. Partitions are consumed one at a time, so only one
//! partition's worth of records is ever loaded back.

use crate::error::{Result, TabreconError};
use crate::hash::KeyFingerprint;
use crate::model::{Row, RowKey};
use indexmap::IndexMap;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::marker::PhantomData;

/// Files per partitioning level
pub const SPILL_PARTITIONS: usize = 16;

/// A buffered row together with its key and origin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRow {
    pub key: RowKey,
    pub row: Row,
    pub chunk_index: u64,
}

impl PendingRow {
    pub fn estimated_size(&self) -> usize {
        self.key.estimated_size() + self.row.estimated_size() + std::mem::size_of::<KeyFingerprint>()
    }
}

/// Rows of one side waiting for their key on the other side
#[derive(Debug, Default)]
pub struct PendingSet {
    rows: IndexMap<KeyFingerprint, PendingRow>,
    bytes: usize,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn memory_bytes(&self) -> usize {
        self.bytes
    }

    pub fn contains(&self, fingerprint: &KeyFingerprint) -> bool {
        self.rows.contains_key(fingerprint)
    }

    pub fn insert(&mut self, fingerprint: KeyFingerprint, entry: PendingRow) {
        self.bytes += entry.estimated_size();
        if let Some(previous) = self.rows.insert(fingerprint, entry) {
            self.bytes -= previous.estimated_size();
        }
    }

    pub fn take(&mut self, fingerprint: &KeyFingerprint) -> Option<PendingRow> {
        let entry = self.rows.swap_remove(fingerprint)?;
        self.bytes -= entry.estimated_size();
        Some(entry)
    }

    /// Remove every pending row
    pub fn drain(&mut self) -> impl Iterator<Item = (KeyFingerprint, PendingRow)> + '_ {
        self.bytes = 0;
        self.rows.drain(..)
    }
}

struct PartitionFile {
    writer: BufWriter<File>,
    bytes: u64,
}

impl PartitionFile {
    fn create() -> Result<Self> {
        Ok(Self {
            writer: BufWriter::with_capacity(1 << 16, tempfile::tempfile()?),
            bytes: 0,
        })
    }

    fn into_reader(self) -> Result<BufReader<File>> {
        let mut file = self.writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(0))?;
        Ok(BufReader::new(file))
    }
}

/// Records spread over [`SPILL_PARTITIONS`] temp files by key fingerprint,
/// one JSON line per record.
///
/// The disk budget covers the bytes of files that still exist; files are
/// deleted as soon as they are consumed.
pub struct PartitionedSpill<T> {
    label: String,
    level: usize,
    files: Vec<Option<PartitionFile>>,
    budget: u64,
    live: u64,
    records: u64,
    items: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> PartitionedSpill<T> {
    pub fn new(label: impl Into<String>, budget: u64) -> Self {
        Self::at_level(label.into(), 0, budget)
    }

    fn at_level(label: String, level: usize, budget: u64) -> Self {
        Self {
            label,
            level,
            files: (0..SPILL_PARTITIONS).map(|_| None).collect(),
            budget,
            live: 0,
            records: 0,
            items: PhantomData,
        }
    }

    /// Records written and not yet consumed
    pub fn len(&self) -> u64 {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Bytes currently held on disk
    pub fn live_bytes(&self) -> u64 {
        self.live
    }

    pub fn put(&mut self, fingerprint: KeyFingerprint, item: &T) -> Result<()> {
        let mut line = serde_json::to_vec(&(fingerprint, item))?;
        line.push(b'\n');
        self.write_line(fingerprint, &line)
    }

    fn write_line(&mut self, fingerprint: KeyFingerprint, line: &[u8]) -> Result<()> {
        let len = line.len() as u64;
        if self.live + len > self.budget {
            return Err(TabreconError::resource_exhausted(format!(
                "{} spill files would exceed their budget of {} bytes",
                self.label, self.budget
            )));
        }
        let slot = fingerprint.partition(self.level, SPILL_PARTITIONS);
        if self.files[slot].is_none() {
            self.files[slot] = Some(PartitionFile::create()?);
        }
        if let Some(file) = self.files[slot].as_mut() {
            file.writer.write_all(line)?;
            file.bytes += len;
        }
        self.live += len;
        self.records += 1;
        Ok(())
    }

    /// Hand each partition's records to `visit`, in write order within the
    /// partition. A partition larger than `memory_budget` is split again at
    /// the next level before it is loaded.
    pub fn drain(
        mut self,
        memory_budget: usize,
        visit: &mut dyn FnMut(Vec<(KeyFingerprint, T)>) -> Result<()>,
    ) -> Result<()> {
        for slot in 0..self.files.len() {
            let file = match self.files[slot].take() {
                Some(file) => file,
                None => continue,
            };
            let bytes = file.bytes;
            let reader = file.into_reader()?;

            if bytes > memory_budget as u64 && self.level + 1 < KeyFingerprint::LEVELS {
                log::debug!(
                    "{}: partition {} holds {} bytes, splitting at level {}",
                    self.label,
                    slot,
                    bytes,
                    self.level + 1
                );
                let headroom = self.budget.saturating_sub(self.live);
                let mut split = Self::at_level(self.label.clone(), self.level + 1, headroom);
                for line in reader.lines() {
                    let mut line = line?.into_bytes();
                    let (fingerprint, _): (KeyFingerprint, IgnoredAny) = serde_json::from_slice(&line)?;
                    line.push(b'\n');
                    split.write_line(fingerprint, &line)?;
                }
                self.live -= bytes;
                self.records = self.records.saturating_sub(split.records);
                split.drain(memory_budget, visit)?;
            } else {
                let mut records = Vec::new();
                for line in reader.lines() {
                    records.push(serde_json::from_str::<(KeyFingerprint, T)>(&line?)?);
                }
                self.live -= bytes;
                self.records = self.records.saturating_sub(records.len() as u64);
                visit(records)?;
            }
        }
        Ok(())
    }
}
