//! CSV input loader
//!
//! Reads headerless `recipient,body` lines into pending records. Every
//! physical line is one record. Quoted fields follow RFC 4180 within the
//! line, and an unquoted body keeps everything after the first comma. Both
//! fields are trimmed and stripped of literal double quotes; lines left with
//! an empty recipient or body are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use csv::StringRecord;
use tracing::{debug, info};

use sms_common::DispatchRecord;

use crate::{DispatchError, Result};

pub fn load_records<R: Read>(reader: R) -> Result<Vec<DispatchRecord>> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line in BufReader::new(reader).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(row) = parse_line(&line)? else {
            skipped += 1;
            continue;
        };
        if row.len() < 2 {
            skipped += 1;
            continue;
        }

        let recipient = clean_field(&row[0]);
        let body = clean_field(&row.iter().skip(1).collect::<Vec<_>>().join(","));

        if recipient.is_empty() || body.is_empty() {
            skipped += 1;
            continue;
        }
        records.push(DispatchRecord::new(recipient, body));
    }

    debug!(loaded = records.len(), skipped, "Parsed input records");
    Ok(records)
}

/// Parse one physical line on its own, so an unterminated quote ends with
/// the line instead of swallowing the lines after it.
fn parse_line(line: &str) -> Result<Option<StringRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let row = reader.records().next().transpose()?;
    Ok(row)
}

/// Load a `.csv` file. Any other extension is refused before it is opened.
pub fn load_file(path: impl AsRef<Path>) -> Result<Vec<DispatchRecord>> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if !is_csv {
        return Err(DispatchError::Input(format!(
            "only .csv files are accepted: {}",
            path.display()
        )));
    }

    let records = load_records(File::open(path)?)?;
    info!(path = %path.display(), records = records.len(), "Input file loaded");
    Ok(records)
}

fn clean_field(value: &str) -> String {
    value.replace('"', "").trim().to_string()
}
