// 🏗️ Input Parsers - Target and stored sequences from CSV or JSON files
//
// CSV: header row required. "Description" and "Amount" (any case) are the content
// fields, "Date" is optional, every other non-empty cell becomes an attribute.
// Headers and cells are trimmed.
// JSON: an array of objects, same field names.

use crate::record::{RawRecord, RawTarget, RecordId};
use crate::settings::Settings;
use anyhow::{bail, Context, Result};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
}

impl InputFormat {
    /// Detect by file extension
    pub fn detect(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        match extension.as_deref() {
            Some("csv") => Ok(InputFormat::Csv),
            Some("json") => Ok(InputFormat::Json),
            _ => bail!("Unsupported input file (expected .csv or .json): {}", path.display()),
        }
    }
}

/// Load the desired day content
pub fn load_targets(path: &Path) -> Result<Vec<RawTarget>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;

    match InputFormat::detect(path)? {
        InputFormat::Csv => read_targets_csv(file),
        InputFormat::Json => serde_json::from_reader(file)
            .with_context(|| format!("Failed to parse target JSON: {}", path.display())),
    }
}

/// Load a stored day dumped as JSON (id, position, description, amount, ...)
pub fn load_records_json(path: &Path) -> Result<Vec<RawRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("Failed to parse records JSON: {}", path.display()))
}

/// Guard source for a JSON dump: records carrying a non-null protection column
pub fn protected_in_dump(records: &[RawRecord], settings: &Settings) -> HashSet<RecordId> {
    let Some(column) = &settings.columns.protected_by else {
        return HashSet::new();
    };

    records
        .iter()
        .filter(|r| r.attributes.get(column).is_some_and(|v| !v.is_null()))
        .filter_map(|r| r.id)
        .collect()
}

pub fn read_targets_csv<R: Read>(reader: R) -> Result<Vec<RawTarget>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV header")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut targets = Vec::new();

    for (line_num, result) in reader.records().enumerate() {
        // +2 because: 1-indexed + header row
        let record = result.with_context(|| format!("Failed to parse CSV line {}", line_num + 2))?;

        let mut target = RawTarget::default();
        for (header, value) in headers.iter().zip(record.iter()) {
            let cell = Some(value.to_string()).filter(|v| !v.is_empty());
            match header.to_ascii_lowercase().as_str() {
                "description" => target.description = cell,
                "amount" => target.amount = cell,
                "date" => target.date = cell,
                _ => {
                    if let Some(cell) = cell {
                        target
                            .attributes
                            .insert(header.clone(), serde_json::Value::String(cell));
                    }
                }
            }
        }
        targets.push(target);
    }

    Ok(targets)
}
