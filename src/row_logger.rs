//! This module provides the [RowLogger], which owns one CSV file per
//! listener run and adapts its column schema to the traffic it sees. The
//! logger starts with no schema at all; the first message it logs fixes
//! the column set (the flattened keys of that message, in encounter
//! order), and every later message is projected onto those columns.
//! Fields a later message adds are silently dropped, fields it is missing
//! are written as empty cells, so the file always stays rectangular and
//! the plotting scripts never have to guess at the header.
//!
//! The file lives at `<log-root>/<YYYY-MM-DD>/<HH;MM;SS>.csv`, one file
//! per run, created lazily when the first message arrives and appended to
//! for the rest of the process lifetime.

use crate::flatten::flatten;
use chrono::Local;
use log::debug;
use serde_json::{Map, Value};
use std::{
    error::Error,
    fmt::{self, Display},
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

/// A nice little error that we can return if things go wrong while
/// creating or appending to the log file.
#[derive(Debug)]
pub enum RowLogError {
    /// Returned when io fails while creating directories, writing the
    /// header, or appending a row.
    IoError(std::io::Error),
}

impl Display for RowLogError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RowLogError::IoError(error) => write!(f, "io error: {}", error),
        }
    }
}

impl Error for RowLogError {}

impl From<std::io::Error> for RowLogError {
    fn from(value: std::io::Error) -> Self {
        Self::IoError(value)
    }
}

/// A CSV logger whose column schema is fixed by the first message it logs.
///
/// Two states: before the first successful [RowLogger::log] call no file
/// exists and `columns` is `None`; afterwards the file exists with its
/// header written and the schema never changes again. A failed append
/// does not revert the schema.
#[derive(Debug)]
pub struct RowLogger {
    path: PathBuf,
    columns: Option<Vec<String>>,
}

impl RowLogger {
    /// Instantiates an uninitialized logger that will write to `path`.
    /// Nothing is created on disk until the first message is logged.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RowLogger {
            path: path.into(),
            columns: None,
        }
    }

    /// Instantiates a logger writing to `<log_root>/<date>/<time>.csv`,
    /// named after the current local time. This is the path layout the
    /// offline plotting scripts expect.
    pub fn with_timestamped_path(log_root: impl AsRef<Path>) -> Self {
        let now = Local::now();
        let dir = log_root.as_ref().join(now.format("%Y-%m-%d").to_string());
        Self::new(dir.join(format!("{}.csv", now.format("%H;%M;%S"))))
    }

    /// The path this logger writes to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The fixed column set, or `None` before the first message.
    pub fn columns(&self) -> Option<&[String]> {
        self.columns.as_deref()
    }

    /// Appends one message to the log file as a CSV row, fixing the
    /// column schema first if this is the first message of the run.
    ///
    /// Every successful call durably appends exactly one row; the file
    /// handle is opened and closed per call, so a crash never loses more
    /// than the in-flight row.
    pub fn log(&mut self, msg: &Map<String, Value>) -> Result<(), RowLogError> {
        let record = flatten(msg);

        if self.columns.is_none() {
            self.initialize(&record)?;
        }

        let columns = self.columns.as_deref().unwrap_or(&[]);
        let row: Vec<String> = columns
            .iter()
            .map(|column| {
                record
                    .iter()
                    .find(|(key, _)| key == column)
                    .map(|(_, value)| render_field(value))
                    .unwrap_or_default()
            })
            .collect();

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{}", row.join(","))?;
        Ok(())
    }

    /// Creates the log file (and its parent directories) and writes the
    /// header row. The schema is only committed once the header is on
    /// disk, so a failure here leaves the logger uninitialized and the
    /// next message will try again.
    fn initialize(&mut self, record: &[(String, Value)]) -> Result<(), RowLogError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }

        let columns: Vec<String> = record.iter().map(|(key, _)| key.clone()).collect();
        let header: Vec<String> = columns.iter().map(|name| escape_field(name)).collect();

        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", header.join(","))?;

        debug!(
            "fixed schema to {} columns at {}",
            columns.len(),
            self.path.display()
        );
        self.columns = Some(columns);
        Ok(())
    }
}

/// Renders one flattened value as a CSV cell. Strings go in verbatim
/// (without their JSON quotes), null becomes an empty cell, everything
/// else uses its compact JSON text.
fn render_field(value: &Value) -> String {
    let text = match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    escape_field(&text)
}

/// Quotes a cell if it contains a comma, quote, or line break, doubling
/// any embedded quotes.
fn escape_field(text: &str) -> String {
    if text.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_owned()
    }
}
