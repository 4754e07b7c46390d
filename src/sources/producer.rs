//! Background producer threads for sources whose readers borrow their
//! handle (DuckDB statements, Parquet row iterators, archive entries).
//!
//! The thread owns the handle and pushes row batches through a bounded
//! channel; the consumer waits at most the adapter timeout for each batch.

use super::{RowRead, RowReader};
use crate::error::{Result, TabreconError};
use std::collections::VecDeque;
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Rows per channel message
pub const BATCH_ROWS: usize = 1024;

/// Messages buffered in the channel
pub const QUEUE_DEPTH: usize = 2;

enum Message {
    Rows(Vec<RowRead>),
    Failed(TabreconError),
    Done,
}

/// Producer side of the channel
pub struct RowSink {
    tx: SyncSender<Message>,
    buffer: Vec<RowRead>,
}

impl RowSink {
    /// Queue one row; blocks while the consumer is behind.
    /// Fails with `Cancelled` once the consumer has gone away.
    pub fn send(&mut self, row: RowRead) -> Result<()> {
        self.buffer.push(row);
        if self.buffer.len() >= BATCH_ROWS {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(BATCH_ROWS));
        self.tx.send(Message::Rows(batch)).map_err(|_| TabreconError::Cancelled)
    }
}

/// Consumer side: a [`RowReader`] fed by the producer thread
pub struct ProducerReader {
    name: String,
    rx: Option<Receiver<Message>>,
    buffer: VecDeque<RowRead>,
    timeout: Duration,
    finished: bool,
    timed_out: bool,
    handle: Option<JoinHandle<()>>,
}

/// Start `work` on a named thread and return the reader that drains it
pub fn spawn<F>(name: String, timeout: Duration, work: F) -> Result<ProducerReader>
where
    F: FnOnce(&mut RowSink) -> Result<()> + Send + 'static,
{
    let (tx, rx) = sync_channel(QUEUE_DEPTH);
    let thread_name = format!("tabrecon-{}", name);
    let log_name = name.clone();

    let handle = thread::Builder::new().name(thread_name).spawn(move || {
        let mut sink = RowSink {
            tx,
            buffer: Vec::with_capacity(BATCH_ROWS),
        };
        let outcome = work(&mut sink).and_then(|_| sink.flush());
        match outcome {
            Ok(()) => {
                let _ = sink.tx.send(Message::Done);
            }
            Err(TabreconError::Cancelled) => {
                log::debug!("Producer for {} stopped: consumer closed", log_name);
            }
            Err(e) => {
                let _ = sink.tx.send(Message::Failed(e));
            }
        }
    })?;

    Ok(ProducerReader {
        name,
        rx: Some(rx),
        buffer: VecDeque::new(),
        timeout,
        finished: false,
        timed_out: false,
        handle: Some(handle),
    })
}

impl RowReader for ProducerReader {
    fn next_row(&mut self) -> Result<Option<RowRead>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            if self.finished {
                return Ok(None);
            }
            let rx = match self.rx.as_ref() {
                Some(rx) => rx,
                None => return Ok(None),
            };
            match rx.recv_timeout(self.timeout) {
                Ok(Message::Rows(rows)) => self.buffer.extend(rows),
                Ok(Message::Done) => self.finished = true,
                Ok(Message::Failed(e)) => {
                    self.finished = true;
                    return Err(e);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.finished = true;
                    self.timed_out = true;
                    return Err(TabreconError::timeout(self.name.clone(), self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.finished = true;
                    return Err(TabreconError::connection(
                        self.name.clone(),
                        "reader thread exited unexpectedly",
                    ));
                }
            }
        }
    }
}

impl Drop for ProducerReader {
    fn drop(&mut self) {
        // Closing the receiver makes the producer's next send fail
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            if self.timed_out {
                log::warn!("Detaching stalled reader thread for {}", self.name);
            } else if handle.join().is_err() {
                log::warn!("Reader thread for {} panicked", self.name);
            }
        }
    }
}
