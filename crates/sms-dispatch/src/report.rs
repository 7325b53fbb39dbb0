//! Report generator
//!
//! ```text
//! Numero,Mensaje,Estado,FechaHora
//! +5511999999999,"Hola ""amigo""",Delivered,05/03/2025 14:07:31
//! ```
//!
//! The message column is always quoted. Other columns are quoted only when
//! they contain a delimiter, which in practice means adapter error messages.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use tracing::info;

use sms_common::{parse_timestamp, DispatchRecord, DispatchStatus};

use crate::{DispatchError, Result};

pub const REPORT_HEADER: &str = "Numero,Mensaje,Estado,FechaHora";

/// Filename timestamp pattern (`yyMMdd_HHmm`)
pub const REPORT_FILE_TIMESTAMP: &str = "%y%m%d_%H%M";

pub fn render_report(records: &[DispatchRecord]) -> String {
    let mut out = String::with_capacity(REPORT_HEADER.len() + 1 + records.len() * 64);
    out.push_str(REPORT_HEADER);
    out.push('\n');

    for record in records {
        out.push_str(&quote_if_needed(&record.recipient));
        out.push(',');
        out.push_str(&quote(&record.body));
        out.push(',');
        out.push_str(&quote_if_needed(&record.status.to_string()));
        out.push(',');
        out.push_str(&record.sent_at_display());
        out.push('\n');
    }
    out
}

pub fn report_file_name(prefix: &str, at: NaiveDateTime) -> String {
    format!("{}{}.csv", prefix, at.format(REPORT_FILE_TIMESTAMP))
}

/// Write the report for `records` into `dir` (created if missing).
/// Reading the records never mutates them, so this is safe mid-run.
pub fn write_report(dir: impl AsRef<Path>, prefix: &str, records: &[DispatchRecord]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let path = dir.join(report_file_name(prefix, Local::now().naive_local()));
    fs::write(&path, render_report(records))?;

    info!(path = %path.display(), records = records.len(), "Report written");
    Ok(path)
}

/// One parsed report line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub recipient: String,
    pub message: String,
    pub status: DispatchStatus,
    pub sent_at: Option<NaiveDateTime>,
}

impl From<ReportRow> for DispatchRecord {
    fn from(row: ReportRow) -> Self {
        DispatchRecord {
            recipient: row.recipient,
            body: row.message,
            status: row.status,
            sent_at: row.sent_at,
        }
    }
}

pub fn parse_report(text: &str) -> Result<Vec<ReportRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.iter().collect::<Vec<_>>().join(",");
    if headers != REPORT_HEADER {
        return Err(DispatchError::Report(format!("unexpected header '{}'", headers)));
    }

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = |i: usize| record.get(i).unwrap_or_default();

        let status = field(2)
            .parse::<DispatchStatus>()
            .map_err(|e| DispatchError::Report(format!("row {}: {}", line + 1, e)))?;
        let sent_at = match field(3).trim() {
            "" => None,
            value => Some(parse_timestamp(value).map_err(|e| {
                DispatchError::Report(format!("row {}: bad timestamp '{}': {}", line + 1, value, e))
            })?),
        };

        rows.push(ReportRow {
            recipient: field(0).to_string(),
            message: field(1).to_string(),
            status,
            sent_at,
        });
    }
    Ok(rows)
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn quote_if_needed(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        quote(value)
    } else {
        value.to_string()
    }
}
