//! Work item sources and input preparation.
//!
//! A source file is a JSON array. Each element is either a bare string (used
//! as-is) or an object whose `field` holds the payload:
//!
//! ```json
//! [
//!   {"entry": "…", "url": "https://…", "datetime": "2024-05-06", "comment": []},
//!   "a bare payload also works"
//! ]
//! ```
//!
//! [`prepare_summaries`] produces such a file from raw summary records by
//! splitting embedded translator annotations (`（翻评：…）`) out of `entry`.

use crate::driver::BatchError;
use crate::models::SummaryRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use tracing::{info, instrument};

/// `（翻评：…）` in full-width or ASCII parentheses, traditional or simplified.
static ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[（(]翻[評评]：([^）)]+)[）)]").expect("annotation regex is valid"));

/// Strip annotations from `entry`, returning the cleaned text and the
/// annotation bodies in order of appearance.
pub fn extract_comments(entry: &str) -> (String, Vec<String>) {
    let comments = ANNOTATION
        .captures_iter(entry)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    let cleaned = ANNOTATION.replace_all(entry, "");
    (cleaned.trim().to_string(), comments)
}

/// Apply [`extract_comments`] to every record that has an `entry`, in place.
/// Records without one are left untouched.
pub fn clean_records(records: &mut [SummaryRecord]) {
    for record in records.iter_mut() {
        if let Some(entry) = record.entry.as_deref() {
            let (cleaned, comments) = extract_comments(entry);
            record.entry = Some(cleaned);
            record.comment = Some(comments);
        }
    }
}

fn source_error(path: &Path, reason: impl ToString) -> BatchError {
    BatchError::Source {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

/// Pull one payload per element out of an already-parsed source.
pub fn payloads_from_value(value: Value, field: &str) -> Result<Vec<String>, String> {
    let Value::Array(elements) = value else {
        return Err("expected a JSON array".to_string());
    };

    elements
        .into_iter()
        .enumerate()
        .map(|(i, element)| match element {
            Value::String(s) => Ok(s),
            Value::Object(mut map) => match map.remove(field) {
                Some(Value::String(s)) => Ok(s),
                Some(_) => Err(format!("element {i}: field `{field}` is not a string")),
                None => Err(format!("element {i}: missing field `{field}`")),
            },
            _ => Err(format!("element {i}: expected a string or an object")),
        })
        .collect()
}

/// Read the ordered payload list for a batch.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display(), field = %field))]
pub async fn load_payloads(path: impl AsRef<Path>, field: &str) -> Result<Vec<String>, BatchError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| source_error(path, e))?;
    let value: Value = serde_json::from_str(&raw).map_err(|e| source_error(path, e))?;
    let payloads = payloads_from_value(value, field).map_err(|e| source_error(path, e))?;
    info!(count = payloads.len(), "Loaded work items");
    Ok(payloads)
}

/// Read raw summaries from `input`, split out annotations, write to `output`.
#[instrument(level = "info", skip_all, fields(input = %input.as_ref().display(), output = %output.as_ref().display()))]
pub async fn prepare_summaries(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<usize, BatchError> {
    let (input, output) = (input.as_ref(), output.as_ref());
    let raw = tokio::fs::read_to_string(input)
        .await
        .map_err(|e| source_error(input, e))?;
    let mut records: Vec<SummaryRecord> =
        serde_json::from_str(&raw).map_err(|e| source_error(input, e))?;

    clean_records(&mut records);
    let with_comments = records
        .iter()
        .filter(|r| r.comment.as_ref().is_some_and(|c| !c.is_empty()))
        .count();

    let json = serde_json::to_string_pretty(&records).map_err(|e| source_error(output, e))?;
    tokio::fs::write(output, json)
        .await
        .map_err(|e| source_error(output, e))?;

    info!(
        records = records.len(),
        with_comments, "Processing complete; cleaned records written"
    );
    Ok(records.len())
}
