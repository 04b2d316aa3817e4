//! SQL extraction
//!
//! Pulls a single SQL statement out of free-form model output.

use crate::error::{BridgeError, Result};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref FENCED_SQL: Regex = Regex::new(r"(?s)```sql\s*(.*?)\s*```").unwrap();
    static ref LABELED_SQL: Regex = Regex::new(r"SQL:\s*([\s\S]*?)(?:\n\s*\n|\z)").unwrap();
    static ref BARE_SELECT: Regex = Regex::new(r"(?is)(SELECT.*?;)").unwrap();
}

/// Extract one SQL statement from model output.
///
/// Tries, in order: a ```sql fenced block, a "SQL:" labelled section up to a
/// blank line, and a bare SELECT statement ending at the first semicolon.
/// The first successful match wins; no match is a hard stop for the current
/// attempt.
pub fn extract_sql(text: &str) -> Result<String> {
    if let Some(caps) = FENCED_SQL.captures(text) {
        return Ok(caps[1].trim().to_string());
    }

    if let Some(caps) = LABELED_SQL.captures(text) {
        let candidate = caps[1].trim();
        if !candidate.is_empty() {
            return Ok(candidate.to_string());
        }
    }

    if let Some(caps) = BARE_SELECT.captures(text) {
        return Ok(caps[1].trim().to_string());
    }

    Err(BridgeError::Extraction(
        "no SQL statement found in model output".to_string(),
    ))
}
