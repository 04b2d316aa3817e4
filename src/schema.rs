//! Schema context
//!
//! The full schema description is a text blob organized into per-table
//! sections, each opened by a bolded table-name marker. Loaded once and
//! shared read-only for the whole session.

use crate::error::{BridgeError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

lazy_static! {
    static ref TABLE_MARKER: Regex = Regex::new(r"\*\*([A-Za-z_][A-Za-z0-9_]*)").unwrap();
}

pub struct SchemaContext {
    text: String,
}

impl SchemaContext {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Schema(format!("failed to read schema context {}: {}", path.display(), e))
        })?;
        if text.trim().is_empty() {
            return Err(BridgeError::Schema(format!(
                "schema context {} is empty",
                path.display()
            )));
        }
        Ok(Self { text })
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn full_text(&self) -> &str {
        &self.text
    }

    /// Split the blob into per-table sections, keyed by the marker name.
    /// Lines before the first marker belong to no section.
    pub fn table_sections(&self) -> Vec<(String, String)> {
        let mut sections: Vec<(String, Vec<&str>)> = Vec::new();
        for line in self.text.lines() {
            if let Some(caps) = TABLE_MARKER.captures(line) {
                sections.push((caps[1].to_string(), vec![line]));
            } else if let Some((_, lines)) = sections.last_mut() {
                lines.push(line);
            }
        }
        sections
            .into_iter()
            .map(|(name, lines)| (name, lines.join("\n")))
            .collect()
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table_sections().iter().any(|(n, _)| n == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = "\
Schema overview line.

**Agency** table
- agency_code (PK)
- agency_name

**LoanApplication**
- ID (PK)
- agency_code (FK to Agency)
";

    #[test]
    fn test_sections_split_on_markers() {
        let schema = SchemaContext::from_text(SCHEMA);
        let sections = schema.table_sections();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].0, "Agency");
        assert!(sections[0].1.contains("agency_name"));
        assert_eq!(sections[1].0, "LoanApplication");
        assert!(sections[1].1.contains("FK to Agency"));
    }

    #[test]
    fn test_preamble_belongs_to_no_section() {
        let schema = SchemaContext::from_text(SCHEMA);
        for (_, body) in schema.table_sections() {
            assert!(!body.contains("Schema overview line"));
        }
    }

    #[test]
    fn test_has_table() {
        let schema = SchemaContext::from_text(SCHEMA);
        assert!(schema.has_table("Agency"));
        assert!(!schema.has_table("Race"));
    }
}
