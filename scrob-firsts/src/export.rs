//! Tabular export of a finished aggregate
//!
//! Rows are numbered after sorting by first-scrobble time. Dates are
//! rendered in the viewer's time zone. Every cell is trimmed and stripped
//! of ASCII control characters.

use crate::aggregator::Aggregate;
use chrono::{Local, TimeZone, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const HEADERS: [&str; 5] = ["#", "Artist", "First Track", "First Album", "First Scrobbled Date"];

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// One output row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub rank: usize,
    pub artist: String,
    pub first_track: String,
    pub first_album: String,
    pub first_scrobbled: String,
}

impl ExportRow {
    fn cells(&self) -> [String; 5] {
        [
            self.rank.to_string(),
            self.artist.clone(),
            self.first_track.clone(),
            self.first_album.clone(),
            self.first_scrobbled.clone(),
        ]
    }
}

/// Remove ASCII control characters and surrounding whitespace
pub fn clean_value(value: &str) -> String {
    let printable: String = value.chars().filter(|c| !c.is_ascii_control()).collect();
    printable.trim().to_string()
}

/// Render a Unix timestamp in `tz`
pub fn format_timestamp<Tz>(timestamp: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match Utc.timestamp_opt(timestamp, 0).single() {
        Some(utc) => utc.with_timezone(tz).format(DATE_FORMAT).to_string(),
        None => String::new(),
    }
}

/// Build rows in presentation order, dates rendered in `tz`
pub fn build_rows<Tz>(aggregate: &Aggregate, tz: &Tz) -> Vec<ExportRow>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    aggregate
        .sorted_by_timestamp()
        .into_iter()
        .enumerate()
        .map(|(idx, (artist, entry))| ExportRow {
            rank: idx + 1,
            artist: clean_value(artist),
            first_track: clean_value(&entry.label),
            first_album: clean_value(&entry.group),
            first_scrobbled: clean_value(&format_timestamp(entry.timestamp, tz)),
        })
        .collect()
}

/// Rows with dates in the local time zone
pub fn build_local_rows(aggregate: &Aggregate) -> Vec<ExportRow> {
    build_rows(aggregate, &Local)
}

/// `<output_dir>/<username>_1st_scrobbles_<unix_now>.<ext>`
pub fn export_path(output_dir: &Path, username: &str, now: i64, format: ExportFormat) -> PathBuf {
    let safe_user: String = username
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    output_dir.join(format!(
        "{}_1st_scrobbles_{}.{}",
        safe_user,
        now,
        format.extension()
    ))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn write_csv<W: Write>(rows: &[ExportRow], mut out: W) -> Result<(), ExportError> {
    writeln!(out, "{}", HEADERS.join(","))?;
    for row in rows {
        let line: Vec<String> = row.cells().iter().map(|c| csv_field(c)).collect();
        writeln!(out, "{}", line.join(","))?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_json<W: Write>(rows: &[ExportRow], mut out: W) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut out, rows)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

/// Write `rows` to `path`, creating the parent folder if needed
pub fn save(rows: &[ExportRow], path: &Path, format: ExportFormat) -> Result<(), ExportError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    let result = match format {
        ExportFormat::Csv => write_csv(rows, file),
        ExportFormat::Json => write_json(rows, file),
    };

    match &result {
        Ok(()) => info!(path = %path.display(), rows = rows.len(), "Export written"),
        Err(e) => error!(path = %path.display(), error = %e, "Export failed"),
    }
    result
}
