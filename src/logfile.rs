//! Tab-delimited, append-only log files.
//!
//! A [`LogFile`] writes its header when it is created, so the header always
//! precedes data rows. Every row is flushed as soon as it is written, and the
//! file is flushed again when the writer is closed or dropped.

use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A row type with a fixed column layout.
pub trait LogRecord {
    const HEADER: &'static [&'static str];

    /// Field values in header order.
    fn fields(&self) -> Vec<String>;
}

/// Formats a millisecond timestamp the way all log files store them.
pub fn format_ms(ms: f64) -> String {
    format!("{ms:.3}")
}

fn format_opt_ms(ms: Option<f64>) -> String {
    ms.map(format_ms).unwrap_or_default()
}

/// Row of the general (runner) log.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralRow {
    pub timestamp: f64,
    pub message: String,
}

impl GeneralRow {
    pub fn new(timestamp: f64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

impl LogRecord for GeneralRow {
    const HEADER: &'static [&'static str] = &["timestamp", "message"];

    fn fields(&self) -> Vec<String> {
        vec![format_ms(self.timestamp), self.message.clone()]
    }
}

/// Row of the per-experiment log.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentRow {
    pub timestamp: f64,
    pub stimulus_timestamp: Option<f64>,
    pub keypress_timestamp: Option<f64>,
    pub key_pressed: Option<String>,
    pub message: String,
}

impl ExperimentRow {
    /// A row with only a timestamp and a message.
    pub fn message(timestamp: f64, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            stimulus_timestamp: None,
            keypress_timestamp: None,
            key_pressed: None,
            message: message.into(),
        }
    }
}

impl LogRecord for ExperimentRow {
    const HEADER: &'static [&'static str] = &[
        "timestamp",
        "stimulus_timestamp",
        "keypress_timestamp",
        "key_pressed",
        "message",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            format_ms(self.timestamp),
            format_opt_ms(self.stimulus_timestamp),
            format_opt_ms(self.keypress_timestamp),
            self.key_pressed.clone().unwrap_or_default(),
            self.message.clone(),
        ]
    }
}

/// Row of the eye-tracker event log.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerRow {
    pub timestamp: f64,
    pub event: &'static str,
    pub message: String,
}

impl LogRecord for TrackerRow {
    const HEADER: &'static [&'static str] = &["timestamp", "event", "message"];

    fn fields(&self) -> Vec<String> {
        vec![
            format_ms(self.timestamp),
            self.event.to_string(),
            self.message.clone(),
        ]
    }
}

/// Keeps one event on one line.
fn escape_field(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for ch in field.chars() {
        match ch {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

pub struct LogFile<R: LogRecord> {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: usize,
    _record: PhantomData<R>,
}

impl<R: LogRecord> LogFile<R> {
    /// Creates (truncating) `path` and writes the header row.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        let mut log = Self {
            path,
            writer: Some(BufWriter::new(file)),
            rows: 0,
            _record: PhantomData,
        };
        let header: Vec<String> = R::HEADER.iter().map(|h| h.to_string()).collect();
        log.write_line(&header)?;
        log::debug!("opened log file {}", log.path.display());
        Ok(log)
    }

    pub fn write(&mut self, record: &R) -> Result<()> {
        self.write_line(&record.fields())?;
        self.rows += 1;
        Ok(())
    }

    fn write_line(&mut self, fields: &[String]) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("log file {} is closed", self.path.display()),
            )
            .into());
        };
        let line = fields
            .iter()
            .map(|f| escape_field(f))
            .collect::<Vec<_>>()
            .join("\t");
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of data rows written so far (header excluded).
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    /// Flushes to disk and releases the handle.
    pub fn close(mut self) -> Result<()> {
        self.finish()
    }

    /// Drops the file handle without closing cleanly, as when the disk
    /// goes away mid-session.
    #[cfg(test)]
    pub(crate) fn lose_handle(&mut self) {
        self.writer = None;
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
            log::debug!(
                "closed log file {} after {} rows",
                self.path.display(),
                self.rows
            );
        }
        Ok(())
    }
}

impl<R: LogRecord> Drop for LogFile<R> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            log::error!("failed to close log file {}: {}", self.path.display(), e);
        }
    }
}
