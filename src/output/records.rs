use crate::crawler::Record;
use crate::frontier::WorkUnit;
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One line of the records file
#[derive(Debug, Serialize)]
struct RecordLine<'a> {
    unit: &'a str,
    category: &'a [String],
    captured_at: String,
    record: &'a Record,
}

/// Append-only JSON-lines writer for extracted records
///
/// Shared by all workers; each call writes and flushes whole lines under
/// one lock so lines from different workers never interleave.
pub struct RecordSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl RecordSink {
    /// Opens `path` for appending, creating parent directories
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the records extracted from `unit`
    ///
    /// # Returns
    ///
    /// Number of lines written
    pub fn write(&self, unit: &WorkUnit, records: &[Record]) -> io::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let captured_at = chrono::Utc::now().to_rfc3339();
        let mut writer = self.writer.lock();

        for record in records {
            let line = RecordLine {
                unit: unit.key(),
                category: unit.ancestors(),
                captured_at: captured_at.clone(),
                record,
            };
            serde_json::to_writer(&mut *writer, &line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        Ok(records.len())
    }
}
