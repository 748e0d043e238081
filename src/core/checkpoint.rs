//! Purpose: Durable record of export progress (cursor + cumulative row count).
//! Exports: `Checkpoint`, `CheckpointStore`, `FileCheckpointStore`.
//! Role: Lets an interrupted run resume at the page after the last committed one.
//! Invariants: Saves are write-temp, fsync, rename; readers never see a partial file.
//! Invariants: A missing file loads as `None`; an unreadable one is a `Corrupt` error.
//! Invariants: Legacy field names (`last_token`, `records_processed`, `timestamp`) load too.
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::cursor::ResumeCursor;
use crate::core::error::{Error, ErrorKind};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(alias = "last_token", default)]
    pub cursor: Option<ResumeCursor>,
    #[serde(alias = "records_processed", default)]
    pub rows_written: u64,
    #[serde(alias = "timestamp", default)]
    pub saved_at: String,
    /// Output file length when this checkpoint was committed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_len: Option<u64>,
}

impl Checkpoint {
    pub fn new(cursor: Option<ResumeCursor>, rows_written: u64, output_len: Option<u64>) -> Self {
        Self {
            cursor,
            rows_written,
            saved_at: now_rfc3339(),
            output_len,
        }
    }
}

pub trait CheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, Error>;
    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), Error>;
    fn clear(&mut self) -> Result<(), Error>;
}

#[derive(Clone, Debug)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self) -> Result<Option<Checkpoint>, Error> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message("failed to read checkpoint")
                    .with_path(&self.path)
                    .with_source(err));
            }
        };
        let checkpoint = serde_json::from_str(&text).map_err(|err| {
            Error::new(ErrorKind::Corrupt)
                .with_message("invalid checkpoint json")
                .with_path(&self.path)
                .with_source(err)
        })?;
        Ok(Some(checkpoint))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> Result<(), Error> {
        let io_err = |message: &str, err: io::Error| {
            Error::new(ErrorKind::Io)
                .with_message(message)
                .with_path(&self.path)
                .with_source(err)
        };
        let json = serde_json::to_string_pretty(checkpoint).map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to encode checkpoint")
                .with_source(err)
        })?;

        let mut temp = NamedTempFile::new_in(self.parent_dir())
            .map_err(|err| io_err("failed to create checkpoint temp file", err))?;
        temp.write_all(json.as_bytes())
            .and_then(|()| temp.write_all(b"\n"))
            .map_err(|err| io_err("failed to write checkpoint", err))?;
        temp.as_file()
            .sync_all()
            .map_err(|err| io_err("failed to sync checkpoint", err))?;
        temp.persist(&self.path)
            .map_err(|err| io_err("failed to replace checkpoint", err.error))?;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), Error> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::new(ErrorKind::Io)
                .with_message("failed to remove checkpoint")
                .with_path(&self.path)
                .with_source(err)),
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
