//! Error diagnosis
//!
//! Classifies raw remote-execution output into an error category and
//! extracts a human-readable message. Classification is best-effort
//! substring matching over an ordered rule table, not a SQL parser; its
//! precision limits are a documented property of the design.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    static ref LINE_MARKER: Regex = Regex::new(r"(?i)\bline\s+\d+").unwrap();
}

/// Substrings that mark a line as part of the error message.
const ERROR_MARKERS: &[&str] = &["error", "exception", "failed"];

/// Error classification taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    ColumnNotFound,
    MissingJoinCondition,
    AmbiguousColumn,
    MissingGroupBy,
    SyntaxError,
    RelationNotFound,
    Uncategorized,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::ColumnNotFound => "ColumnNotFound",
            ErrorCategory::MissingJoinCondition => "MissingJoinCondition",
            ErrorCategory::AmbiguousColumn => "AmbiguousColumn",
            ErrorCategory::MissingGroupBy => "MissingGroupBy",
            ErrorCategory::SyntaxError => "SyntaxError",
            ErrorCategory::RelationNotFound => "RelationNotFound",
            ErrorCategory::Uncategorized => "Uncategorized",
        };
        write!(f, "{}", name)
    }
}

impl ErrorCategory {
    /// Fixed remediation guidance injected into the correction prompt.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            ErrorCategory::ColumnNotFound => {
                "This is a column name error. Check:\n\
                 1. The column might be in a different table than you think\n\
                 2. For many-to-many relationships, join to the lookup table to get descriptive fields\n\
                 3. Junction tables typically contain only foreign keys, not descriptive names\n\
                 \n\
                 Example fix:\n\
                 INCORRECT: SELECT J.description FROM JunctionTable J\n\
                 CORRECT:   SELECT L.description FROM JunctionTable J JOIN LookupTable L ON J.lookup_id = L.id"
            }
            ErrorCategory::MissingJoinCondition => {
                "This is a JOIN condition error. Check:\n\
                 1. Every JOIN must have an ON clause with proper conditions\n\
                 2. Make sure foreign keys match between tables\n\
                 3. Verify the join fields exist in both tables\n\
                 \n\
                 Example fix:\n\
                 INCORRECT: SELECT * FROM TableA JOIN TableB\n\
                 CORRECT:   SELECT * FROM TableA A JOIN TableB B ON A.id = B.table_a_id"
            }
            ErrorCategory::AmbiguousColumn => {
                "This is an ambiguous column reference error. Check:\n\
                 1. Qualify column names with table aliases when multiple tables are involved\n\
                 2. The same column name might exist in several of the joined tables\n\
                 \n\
                 Example fix:\n\
                 INCORRECT: SELECT id, code FROM JunctionTable JOIN LookupTable\n\
                 CORRECT:   SELECT J.id, J.code FROM JunctionTable J JOIN LookupTable L ON J.code = L.code"
            }
            ErrorCategory::MissingGroupBy => {
                "This is a GROUP BY error. Check:\n\
                 1. All non-aggregated columns in the SELECT clause must appear in the GROUP BY clause\n\
                 2. Aggregated and non-aggregated columns cannot mix without GROUP BY\n\
                 \n\
                 Example fix:\n\
                 INCORRECT: SELECT category_name, COUNT(*) FROM Categories JOIN Items GROUP BY category_id\n\
                 CORRECT:   SELECT category_name, COUNT(*) FROM Categories JOIN Items GROUP BY category_name"
            }
            ErrorCategory::SyntaxError => {
                "This is a syntax error. Check:\n\
                 1. Missing commas between columns\n\
                 2. Missing parentheses or mismatched quotes\n\
                 3. SQL keywords properly spaced\n\
                 4. Table aliases consistent throughout the query\n\
                 \n\
                 Example fix:\n\
                 INCORRECT: SELECT column1 column2 FROM table\n\
                 CORRECT:   SELECT column1, column2 FROM table"
            }
            ErrorCategory::RelationNotFound => {
                "This is a table name error. Check:\n\
                 1. The table name is spelled correctly\n\
                 2. The case of the table name (PostgreSQL is case-sensitive)\n\
                 3. An alias is not being used as if it were a table name\n\
                 \n\
                 Example fix:\n\
                 INCORRECT: SELECT * FROM items\n\
                 CORRECT:   SELECT * FROM Items"
            }
            ErrorCategory::Uncategorized => {
                "Analyze the error message and fix the specific issue it points at. \
                 Verify every table and column name against the schema."
            }
        }
    }
}

/// One classification rule: every `required` substring must appear, and at
/// least one `indicators` substring must appear when the list is non-empty.
struct ClassificationRule {
    category: ErrorCategory,
    required: &'static [&'static str],
    indicators: &'static [&'static str],
}

/// Evaluated top to bottom; the first match wins.
const RULES: &[ClassificationRule] = &[
    ClassificationRule {
        category: ErrorCategory::ColumnNotFound,
        required: &["column"],
        indicators: &["does not exist", "not found"],
    },
    ClassificationRule {
        category: ErrorCategory::MissingJoinCondition,
        required: &[],
        indicators: &["cross join", "missing join condition"],
    },
    ClassificationRule {
        category: ErrorCategory::AmbiguousColumn,
        required: &["column"],
        indicators: &["ambiguous"],
    },
    ClassificationRule {
        category: ErrorCategory::MissingGroupBy,
        required: &[],
        indicators: &["must appear in the group by clause", "not in group by"],
    },
    ClassificationRule {
        category: ErrorCategory::SyntaxError,
        required: &[],
        indicators: &["syntax error"],
    },
    ClassificationRule {
        category: ErrorCategory::RelationNotFound,
        required: &["relation"],
        indicators: &["does not exist", "not found"],
    },
];

#[derive(Debug, Clone, Serialize)]
pub struct Diagnosis {
    pub message: String,
    pub category: ErrorCategory,
}

pub struct ErrorDiagnoser;

impl ErrorDiagnoser {
    pub fn new() -> Self {
        Self
    }

    /// Extract a message from the raw output and classify it.
    pub fn diagnose(&self, raw_output: &str) -> Diagnosis {
        let message = self.extract_message(raw_output);
        let category = self.classify(&message);
        Diagnosis { message, category }
    }

    /// Classify a message into the taxonomy, in rule priority order.
    pub fn classify(&self, message: &str) -> ErrorCategory {
        let msg = message.to_lowercase();
        for rule in RULES {
            let required_ok = rule.required.iter().all(|s| msg.contains(s));
            let indicator_ok =
                rule.indicators.is_empty() || rule.indicators.iter().any(|s| msg.contains(s));
            if required_ok && indicator_ok {
                return rule.category;
            }
        }
        ErrorCategory::Uncategorized
    }

    /// Scan the output line by line, collecting error-marker lines and,
    /// separately, hint lines; the message is the error lines followed by
    /// the hints block.
    pub fn extract_message(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return "No output returned from the database.".to_string();
        }

        let mut error_lines: Vec<&str> = Vec::new();
        let mut hint_lines: Vec<&str> = Vec::new();
        for line in raw.lines() {
            let lower = line.to_lowercase();
            if lower.contains("hint:") {
                hint_lines.push(line);
            } else if ERROR_MARKERS.iter().any(|m| lower.contains(m))
                || LINE_MARKER.is_match(&lower)
            {
                error_lines.push(line);
            }
        }

        if error_lines.is_empty() && hint_lines.is_empty() {
            return "Unknown error occurred while executing the query.".to_string();
        }

        let mut message = error_lines.join("\n");
        if !hint_lines.is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(&hint_lines.join("\n"));
        }
        message
    }
}

impl Default for ErrorDiagnoser {
    fn default() -> Self {
        Self::new()
    }
}
