//! Per-day attendance CSV files and their zip export.
//!
//! One file per local calendar day, `<dir>/YYYYMMDD.csv`, each line
//! `identity,timestamp,IN|OUT` with an RFC 3339 local timestamp.

use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, SecondsFormat};
use presence_core::Identity;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// File name the export is offered under.
pub const EXPORT_FILE_NAME: &str = "out.zip";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("read attendance logs: {0}")]
    Io(#[from] io::Error),
    #[error("build zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

pub struct AttendanceLog {
    dir: PathBuf,
    // Serializes appends so concurrent check-ins never interleave.
    append: Mutex<()>,
}

impl AttendanceLog {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            append: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(day: NaiveDate) -> String {
        format!("{}.csv", day.format("%Y%m%d"))
    }

    pub fn format_line(identity: &Identity, at: &DateTime<Local>, direction: Direction) -> String {
        format!(
            "{identity},{},{}\n",
            at.to_rfc3339_opts(SecondsFormat::Micros, false),
            direction.as_str()
        )
    }

    /// Append one event to the file for `at`'s local day. Returns that file.
    pub async fn record(
        &self,
        identity: &Identity,
        direction: Direction,
        at: DateTime<Local>,
    ) -> io::Result<PathBuf> {
        let path = self.dir.join(Self::file_name(at.date_naive()));
        let line = Self::format_line(identity, &at, direction);

        let _guard = self.append.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::info!(
            identity = %identity,
            direction = direction.as_str(),
            file = %path.display(),
            "attendance recorded"
        );
        Ok(path)
    }

    /// Day files present in the log directory, oldest first.
    pub fn day_files(&self) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let is_day_file = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".csv"))
                .is_some_and(|stem| NaiveDate::parse_from_str(stem, "%Y%m%d").is_ok());
            if is_day_file && entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    /// Zip every day file into an in-memory archive. Blocking.
    pub fn export_zip(&self) -> Result<Vec<u8>, ExportError> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let files = self.day_files()?;
        for path in &files {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            writer.start_file(name, options)?;
            writer.write_all(&fs::read(path)?)?;
        }

        let archive = writer.finish()?.into_inner();
        tracing::info!(files = files.len(), bytes = archive.len(), "attendance logs exported");
        Ok(archive)
    }
}
