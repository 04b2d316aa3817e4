//! Query logging
//!
//! Append-only observability artifacts: one JSON-lines entry per question
//! (prompts sent, raw model responses) and one per correction attempt.
//! Write-only; nothing in the pipeline reads these back. A bounded
//! in-memory ring keeps the most recent questions available to the HTTP
//! front end.

use crate::diagnostics::ErrorCategory;
use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub question_id: String,
    pub question: String,
    pub plan_prompt: String,
    pub plan_response: String,
    pub synthesis_prompt: String,
    pub synthesis_response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptLogEntry {
    pub timestamp: DateTime<Utc>,
    pub question_id: String,
    /// 1..=max; the original synthesis is not an attempt.
    pub attempt: u32,
    pub failing_query: String,
    pub diagnosis_message: String,
    pub category: ErrorCategory,
    pub correction_prompt: String,
    /// None when no SQL could be extracted from the correction response.
    pub corrected_query: Option<String>,
}

pub struct QueryLogger {
    question_log: Option<PathBuf>,
    attempt_log: Option<PathBuf>,
    recent: Mutex<Vec<QuestionLogEntry>>,
    max_in_memory: usize,
}

impl QueryLogger {
    /// Logger writing `questions.log` and `attempts.log` under `log_dir`.
    pub fn new(log_dir: &Path, max_in_memory: usize) -> Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        Ok(Self {
            question_log: Some(log_dir.join("questions.log")),
            attempt_log: Some(log_dir.join("attempts.log")),
            recent: Mutex::new(Vec::new()),
            max_in_memory,
        })
    }

    /// Logger that keeps the in-memory ring but writes no files.
    pub fn disabled() -> Self {
        Self {
            question_log: None,
            attempt_log: None,
            recent: Mutex::new(Vec::new()),
            max_in_memory: 100,
        }
    }

    pub fn log_question(&self, entry: QuestionLogEntry) -> Result<()> {
        {
            let mut recent = self
                .recent
                .lock()
                .map_err(|_| BridgeError::Execution("log ring poisoned".to_string()))?;
            recent.push(entry.clone());
            if recent.len() > self.max_in_memory {
                recent.remove(0);
            }
        }
        if let Some(ref path) = self.question_log {
            append_line(path, &serde_json::to_string(&entry)?)?;
        }
        Ok(())
    }

    pub fn log_attempt(&self, entry: AttemptLogEntry) -> Result<()> {
        if let Some(ref path) = self.attempt_log {
            append_line(path, &serde_json::to_string(&entry)?)?;
        }
        Ok(())
    }

    pub fn recent_questions(&self, limit: usize) -> Vec<QuestionLogEntry> {
        self.recent
            .lock()
            .map(|recent| recent.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default()
    }
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::ErrorCategory;

    fn question_entry(id: &str) -> QuestionLogEntry {
        QuestionLogEntry {
            timestamp: Utc::now(),
            question_id: id.to_string(),
            question: "count the agencies".to_string(),
            plan_prompt: "plan prompt".to_string(),
            plan_response: "1. Tables: Agency".to_string(),
            synthesis_prompt: "synthesis prompt".to_string(),
            synthesis_response: "```sql\nSELECT COUNT(*) FROM Agency;\n```".to_string(),
        }
    }

    #[test]
    fn test_log_files_accumulate_parseable_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let logger = QueryLogger::new(dir.path(), 10).unwrap();

        logger.log_question(question_entry("q1")).unwrap();
        logger.log_question(question_entry("q2")).unwrap();
        logger
            .log_attempt(AttemptLogEntry {
                timestamp: Utc::now(),
                question_id: "q2".to_string(),
                attempt: 1,
                failing_query: "SELECT x FROM Agency;".to_string(),
                diagnosis_message: "ERROR: column \"x\" does not exist".to_string(),
                category: ErrorCategory::ColumnNotFound,
                correction_prompt: "fix it".to_string(),
                corrected_query: Some("SELECT agency_name FROM Agency;".to_string()),
            })
            .unwrap();

        let questions = std::fs::read_to_string(dir.path().join("questions.log")).unwrap();
        let lines: Vec<&str> = questions.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let entry: QuestionLogEntry = serde_json::from_str(line).unwrap();
            assert_eq!(entry.question, "count the agencies");
        }

        let attempts = std::fs::read_to_string(dir.path().join("attempts.log")).unwrap();
        let entry: AttemptLogEntry = serde_json::from_str(attempts.lines().next().unwrap()).unwrap();
        assert_eq!(entry.attempt, 1);
        assert_eq!(entry.category, ErrorCategory::ColumnNotFound);
    }

    #[test]
    fn test_ring_is_bounded_and_newest_first() {
        let logger = QueryLogger::disabled();
        for i in 0..5 {
            logger.log_question(question_entry(&format!("q{}", i))).unwrap();
        }
        let recent = logger.recent_questions(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question_id, "q4");
        assert_eq!(recent[1].question_id, "q3");
    }
}
