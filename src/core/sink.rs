// Append-only CSV output with durable commits and an exclusive run lock.
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde_json::Value;

use crate::core::decode::cell_text;
use crate::core::error::{Error, ErrorKind, io_error_kind};

/// How the output is opened at the start of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SinkMode {
    /// Discard any existing output.
    Fresh,
    /// Keep existing output; cut it back to `committed_len` when given.
    Resume { committed_len: Option<u64> },
}

pub trait RowSink {
    fn open(&mut self, mode: SinkMode) -> Result<(), Error>;
    fn write_header(&mut self, columns: &[String]) -> Result<(), Error>;
    fn append(&mut self, rows: &[Vec<Value>]) -> Result<(), Error>;
    /// Flushes durably and returns the committed output length in bytes.
    fn commit(&mut self) -> Result<u64, Error>;
}

pub struct CsvFileSink {
    path: PathBuf,
    writer: Option<csv::Writer<File>>,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, err: io::Error, message: &str) -> Error {
        Error::new(io_error_kind(&err))
            .with_message(message)
            .with_path(&self.path)
            .with_source(err)
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<File>, Error> {
        self.writer.as_mut().ok_or_else(|| {
            Error::new(ErrorKind::Internal).with_message("csv sink used before open")
        })
    }

    fn csv_error(&self, err: csv::Error, message: &str) -> Error {
        Error::new(ErrorKind::Io)
            .with_message(message)
            .with_path(&self.path)
            .with_source(err)
    }
}

impl RowSink for CsvFileSink {
    fn open(&mut self, mode: SinkMode) -> Result<(), Error> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| self.io_error(err, "failed to open output"))?;
        file.try_lock_exclusive().map_err(|err| {
            self.io_error(err, "output is locked by another run")
        })?;

        match mode {
            SinkMode::Fresh => {
                file.set_len(0)
                    .map_err(|err| self.io_error(err, "failed to truncate output"))?;
            }
            SinkMode::Resume { committed_len } => {
                let len = file
                    .metadata()
                    .map_err(|err| self.io_error(err, "failed to stat output"))?
                    .len();
                if let Some(committed) = committed_len {
                    if len > committed {
                        tracing::warn!(
                            path = %self.path.display(),
                            discarded_bytes = len - committed,
                            "output has rows past the last checkpoint; truncating"
                        );
                        file.set_len(committed)
                            .map_err(|err| self.io_error(err, "failed to truncate output"))?;
                    } else if len < committed {
                        tracing::warn!(
                            path = %self.path.display(),
                            len,
                            committed,
                            "output is shorter than the last checkpoint recorded"
                        );
                    }
                }
            }
        }

        // Row width follows the page schema, which need not match the header.
        let writer = csv::WriterBuilder::new()
            .flexible(true)
            .terminator(csv::Terminator::CRLF)
            .from_writer(file);
        self.writer = Some(writer);
        Ok(())
    }

    fn write_header(&mut self, columns: &[String]) -> Result<(), Error> {
        let result = self.writer()?.write_record(columns);
        result.map_err(|err| self.csv_error(err, "failed to write header"))
    }

    fn append(&mut self, rows: &[Vec<Value>]) -> Result<(), Error> {
        for row in rows {
            let record: Vec<String> = row.iter().map(cell_text).collect();
            let result = self.writer()?.write_record(&record);
            result.map_err(|err| self.csv_error(err, "failed to write row"))?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<u64, Error> {
        let writer = self.writer()?;
        let flushed = writer.flush();
        let synced = flushed.and_then(|()| writer.get_ref().sync_data());
        let len = synced.and_then(|()| writer.get_ref().metadata().map(|meta| meta.len()));
        len.map_err(|err| self.io_error(err, "failed to flush output"))
    }
}
