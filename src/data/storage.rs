//! Rotating CSV recorder.
//!
//! The recorder owns the single active output file. Each file is created by
//! [`Recorder::rotate`], which writes the header from the column list at that
//! instant and keeps a snapshot of those columns; every later
//! [`Recorder::append`] lays its values out in exactly that snapshot order, so a
//! file's header and rows can never disagree.
use crate::config::StorageConfig;
use crate::core::{SensorIdentity, Uploader};
use crate::data::registry::Column;
use crate::error::{AppResult, LoggerError};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Timestamp format used in rows and file names.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Name of the first header field.
pub const TIMESTAMP_HEADER: &str = "Timestamp";

/// One completed cycle: a single timestamp and one value per column identity.
#[derive(Clone, Debug)]
pub struct Row {
    /// Single timestamp shared by every value of the row.
    pub timestamp: DateTime<Local>,
    values: HashMap<SensorIdentity, f64>,
}

impl Row {
    /// Create an empty row stamped with `timestamp`.
    pub fn new(timestamp: DateTime<Local>) -> Self {
        Self {
            timestamp,
            values: HashMap::new(),
        }
    }

    /// Set the value of one column.
    pub fn set(&mut self, identity: SensorIdentity, value: f64) {
        self.values.insert(identity, value);
    }

    /// Value of one column, if present.
    pub fn get(&self, identity: &SensorIdentity) -> Option<f64> {
        self.values.get(identity).copied()
    }

    /// Identities carried by this row, in no particular order.
    pub fn identities(&self) -> impl Iterator<Item = &SensorIdentity> {
        self.values.keys()
    }

    /// Number of values carried by this row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row carries no value.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

struct OutputFile {
    path: PathBuf,
    columns: Vec<Column>,
    writer: csv::Writer<File>,
    rows: u64,
}

/// Owner of the active CSV file.
pub struct Recorder {
    output_dir: PathBuf,
    file_prefix: String,
    nan_token: String,
    float_precision: Option<usize>,
    uploader: Arc<dyn Uploader>,
    current: Option<OutputFile>,
}

impl Recorder {
    /// Create a recorder; no file is open until the first [`Recorder::rotate`].
    pub fn new(settings: &StorageConfig, uploader: Arc<dyn Uploader>) -> Self {
        Self {
            output_dir: settings.output_dir.clone(),
            file_prefix: settings.file_prefix.clone(),
            nan_token: settings.nan_token.clone(),
            float_precision: settings.float_precision,
            uploader,
            current: None,
        }
    }

    /// Close the current file (if any), hand it to the uploader, and open a new
    /// one whose header is derived from `columns`.
    ///
    /// Returns the path of the newly opened file.
    pub fn rotate(&mut self, columns: &[Column]) -> AppResult<PathBuf> {
        self.close()?;

        std::fs::create_dir_all(&self.output_dir)?;
        let (path, file) = self.create_file(Local::now())?;

        let mut writer = csv::Writer::from_writer(file);
        let header = std::iter::once(TIMESTAMP_HEADER).chain(columns.iter().map(|c| c.label.as_str()));
        writer.write_record(header)?;
        writer.flush()?;

        tracing::info!(
            path = %path.display(),
            columns = columns.len(),
            "Created new CSV file"
        );
        self.current = Some(OutputFile {
            path: path.clone(),
            columns: columns.to_vec(),
            writer,
            rows: 0,
        });
        Ok(path)
    }

    /// Write one row to the open file, in the order of the file's header.
    ///
    /// Fails with an I/O error when no file is open and with a configuration
    /// error when the row carries an identity the file has no column for.
    pub fn append(&mut self, row: &Row) -> AppResult<()> {
        let file = self.current.as_mut().ok_or_else(|| {
            LoggerError::Io(io::Error::new(ErrorKind::NotFound, "no output file is open"))
        })?;

        if let Some(unknown) = row
            .identities()
            .find(|id| !file.columns.iter().any(|c| &c.identity == *id))
        {
            return Err(LoggerError::Configuration(format!(
                "row carries identity {unknown} which has no column in {}",
                file.path.display()
            )));
        }

        let mut record = Vec::with_capacity(file.columns.len() + 1);
        record.push(row.timestamp.format(TIMESTAMP_FORMAT).to_string());
        for column in &file.columns {
            let value = row.get(&column.identity).unwrap_or(f64::NAN);
            record.push(format_value(value, &self.nan_token, self.float_precision));
        }

        file.writer.write_record(&record)?;
        file.writer.flush()?;
        file.rows += 1;
        tracing::debug!(path = %file.path.display(), rows = file.rows, "Row appended");
        Ok(())
    }

    /// Flush and close the current file, handing it to the uploader.
    ///
    /// Returns the closed file's path, or `None` if nothing was open.
    pub fn close(&mut self) -> AppResult<Option<PathBuf>> {
        let Some(mut file) = self.current.take() else {
            return Ok(None);
        };
        file.writer.flush()?;
        tracing::info!(
            path = %file.path.display(),
            rows = file.rows,
            "Closed CSV file"
        );
        self.uploader.submit(&file.path);
        Ok(Some(file.path))
    }

    /// Path of the open file.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|f| f.path.as_path())
    }

    /// Column snapshot the open file's header was written from.
    pub fn current_columns(&self) -> Option<&[Column]> {
        self.current.as_ref().map(|f| f.columns.as_slice())
    }

    /// Rows written to the open file so far.
    pub fn rows_in_current_file(&self) -> u64 {
        self.current.as_ref().map_or(0, |f| f.rows)
    }

    fn create_file(&self, now: DateTime<Local>) -> AppResult<(PathBuf, File)> {
        let stem = format!("{}_{}", self.file_prefix, now.format(TIMESTAMP_FORMAT));
        for attempt in 0u32.. {
            let name = if attempt == 0 {
                format!("{stem}.csv")
            } else {
                format!("{stem}_{attempt}.csv")
            };
            let path = self.output_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(LoggerError::Io(io::Error::new(
            ErrorKind::AlreadyExists,
            "no free file name left",
        )))
    }
}

/// Render one value the way it appears in the CSV.
pub fn format_value(value: f64, nan_token: &str, precision: Option<usize>) -> String {
    if value.is_nan() {
        return nan_token.to_string();
    }
    match precision {
        Some(p) => format!("{value:.p$}"),
        None => format!("{value:?}"),
    }
}
