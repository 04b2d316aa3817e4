//! Schema relevance
//!
//! Narrows the full schema to the tables a failing query actually touches,
//! expanded with junction/lookup pairs so the joins needed to reach
//! descriptive columns survive the narrowing. Full-schema correction prompts
//! degrade model accuracy; this is a precision/recall trade-off, and the one
//! guarantee is that a table referenced in the query is never dropped.

use crate::schema::SchemaContext;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};

lazy_static! {
    static ref TABLE_REF: Regex =
        Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref ALIAS_BINDING: Regex =
        Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z_][A-Za-z0-9_]*)\s+(?:AS\s+)?([A-Za-z_][A-Za-z0-9_]*)")
            .unwrap();
    static ref QUALIFIED_COLUMN: Regex =
        Regex::new(r"\b([A-Za-z_][A-Za-z0-9_]*)\.[A-Za-z_][A-Za-z0-9_]*").unwrap();
}

/// Keywords that can trail a table name and must not bind as aliases.
const NON_ALIAS_KEYWORDS: &[&str] = &[
    "WHERE", "ON", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "GROUP", "ORDER", "HAVING",
    "LIMIT", "UNION", "USING", "NATURAL", "AS",
];

/// Junction-table detection data.
///
/// Schema-specific and pluggable: the plural-suffix rule and the default
/// pair list fit the loan-application schema this tool ships with, and are
/// not expected to generalize to other schemas.
#[derive(Debug, Clone)]
pub struct JunctionHeuristic {
    /// Known junction -> lookup pairs.
    pub pairs: Vec<(String, String)>,
    /// Treat `Foos` as a junction for a known table `Foo`.
    pub strip_plural_suffix: bool,
}

impl Default for JunctionHeuristic {
    fn default() -> Self {
        Self {
            pairs: vec![
                ("DenialReasons".to_string(), "DenialReason".to_string()),
                ("ApplicantRace".to_string(), "Race".to_string()),
                ("CoApplicantRace".to_string(), "Race".to_string()),
            ],
            strip_plural_suffix: true,
        }
    }
}

impl JunctionHeuristic {
    /// Junction/lookup pairs implied by `table`, limited to lookup tables the
    /// schema actually has a section for.
    fn expansions(&self, table: &str, known: &HashSet<String>) -> Vec<(String, String)> {
        let mut found = Vec::new();
        if self.strip_plural_suffix {
            if let Some(stripped) = table.strip_suffix('s') {
                if known.contains(stripped) {
                    found.push((table.to_string(), stripped.to_string()));
                }
            }
        }
        for (junction, lookup) in &self.pairs {
            if junction == table && known.contains(lookup) {
                found.push((junction.clone(), lookup.clone()));
            }
        }
        found
    }
}

pub struct SchemaRelevance {
    heuristic: JunctionHeuristic,
}

impl SchemaRelevance {
    pub fn new(heuristic: JunctionHeuristic) -> Self {
        Self { heuristic }
    }

    /// The schema subset relevant to `query`: sections for every referenced
    /// table plus paired lookup tables, prefixed with relationship notes for
    /// each detected junction/lookup pair. Falls back to the full schema when
    /// no section matches.
    pub fn relevant_subset(&self, query: &str, schema: &SchemaContext) -> String {
        let sections = schema.table_sections();
        let known: HashSet<String> = sections.iter().map(|(name, _)| name.clone()).collect();

        let mut tables = self.referenced_tables(query);

        // Junction expansion. Sorted iteration keeps the notes deterministic.
        let sorted: BTreeSet<String> = tables.iter().cloned().collect();
        let mut pairs_found: Vec<(String, String)> = Vec::new();
        for table in &sorted {
            for (junction, lookup) in self.heuristic.expansions(table, &known) {
                tables.insert(lookup.clone());
                if !pairs_found.contains(&(junction.clone(), lookup.clone())) {
                    pairs_found.push((junction, lookup));
                }
            }
        }

        let selected: Vec<&(String, String)> = sections
            .iter()
            .filter(|(name, _)| tables.contains(name))
            .collect();

        if selected.is_empty() {
            return schema.full_text().to_string();
        }

        let mut out = vec!["Schema for tables involved in the query:".to_string()];
        for (junction, lookup) in &pairs_found {
            out.push(format!(
                "===== IMPORTANT RELATIONSHIP =====\n\
                 {junction} is a JUNCTION table holding key pairs only.\n\
                 {lookup} is the LOOKUP table holding the descriptive columns.\n\
                 To read descriptive values you MUST join {junction} to {lookup} via their shared code column.\n\
                 =================================="
            ));
        }
        for (_, body) in &selected {
            out.push(body.clone());
        }
        out.join("\n\n")
    }

    /// Tables named after FROM/JOIN, plus tables reached by resolving the
    /// aliases of qualified column references.
    fn referenced_tables(&self, query: &str) -> HashSet<String> {
        let mut tables: HashSet<String> = HashSet::new();
        for caps in TABLE_REF.captures_iter(query) {
            tables.insert(caps[1].to_string());
        }

        let mut aliases: HashMap<String, String> = HashMap::new();
        for caps in ALIAS_BINDING.captures_iter(query) {
            let table = caps[1].to_string();
            let alias = caps[2].to_string();
            if NON_ALIAS_KEYWORDS
                .iter()
                .any(|kw| alias.eq_ignore_ascii_case(kw))
            {
                continue;
            }
            tables.insert(table.clone());
            aliases.insert(alias, table);
        }

        for caps in QUALIFIED_COLUMN.captures_iter(query) {
            if let Some(table) = aliases.get(&caps[1]) {
                tables.insert(table.clone());
            }
        }

        tables
    }
}

impl Default for SchemaRelevance {
    fn default() -> Self {
        Self::new(JunctionHeuristic::default())
    }
}
