//! Repair loop controller
//!
//! Orchestrates plan generation, SQL synthesis, remote execution, diagnosis
//! and correction into one bounded cycle. The controller returns a
//! structured report for every terminal state; only connection failures and
//! model-transport failures surface as errors.

use crate::diagnostics::ErrorDiagnoser;
use crate::error::{BridgeError, Result};
use crate::executor::QueryExecutor;
use crate::extraction::extract_sql;
use crate::llm::LanguageModel;
use crate::logging::{AttemptLogEntry, QueryLogger, QuestionLogEntry};
use crate::prompts;
use crate::relevance::SchemaRelevance;
use crate::schema::SchemaContext;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Bounds for the repair loop.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum correction attempts after the original synthesis.
    pub max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Terminal state of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineOutcome {
    Succeeded,
    Aborted,
    AttemptsExhausted,
}

/// A SQL statement plus its provenance in the loop.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    pub sql: String,
    /// 0 = original synthesis, 1..=max = correction attempts.
    pub attempt: u32,
}

/// Structured outcome returned to every front end.
#[derive(Debug, Clone, Serialize)]
pub struct QueryReport {
    pub outcome: PipelineOutcome,
    pub final_query: Option<String>,
    pub final_result: Option<String>,
    pub attempts_used: u32,
    pub plan_text: String,
    pub error: Option<String>,
}

const EXHAUSTED_RECOMMENDATION: &str =
    "Attempt budget exhausted. Try rephrasing the question, or check the query manually.";

pub struct RepairPipeline {
    llm: Arc<dyn LanguageModel>,
    executor: Arc<dyn QueryExecutor>,
    schema: SchemaContext,
    relevance: SchemaRelevance,
    diagnoser: ErrorDiagnoser,
    logger: Arc<QueryLogger>,
    config: PipelineConfig,
}

impl RepairPipeline {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        executor: Arc<dyn QueryExecutor>,
        schema: SchemaContext,
        relevance: SchemaRelevance,
        logger: Arc<QueryLogger>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            llm,
            executor,
            schema,
            relevance,
            diagnoser: ErrorDiagnoser::new(),
            logger,
            config,
        }
    }

    /// Run one question through the full synthesize/execute/repair cycle.
    pub async fn run_question(&self, question: &str) -> Result<QueryReport> {
        let question_id = uuid::Uuid::new_v4().to_string();
        info!(question, %question_id, "processing question");

        // Plan generation. A malformed plan only degrades synthesis quality;
        // it never aborts the pipeline.
        let plan_prompt = prompts::build_plan_prompt(self.schema.full_text(), question);
        let plan = self.llm.generate(&plan_prompt).await?;

        let synthesis_prompt =
            prompts::build_synthesis_prompt(&plan, self.schema.full_text(), question);
        let synthesis_response = self.llm.generate(&synthesis_prompt).await?;

        if let Err(e) = self.logger.log_question(QuestionLogEntry {
            timestamp: Utc::now(),
            question_id: question_id.clone(),
            question: question.to_string(),
            plan_prompt,
            plan_response: plan.clone(),
            synthesis_prompt,
            synthesis_response: synthesis_response.clone(),
        }) {
            warn!("failed to write question log: {}", e);
        }

        let mut current = match extract_sql(&synthesis_response) {
            Ok(sql) => CandidateQuery { sql, attempt: 0 },
            Err(e) => {
                warn!("synthesis produced no extractable SQL, aborting");
                return Ok(self.aborted(plan, 0, e));
            }
        };

        loop {
            info!(attempt = current.attempt, query = %current.sql, "executing candidate");
            let result = self.executor.execute_query(&current.sql).await?;

            if result.succeeded {
                info!(attempt = current.attempt, "query succeeded");
                return Ok(QueryReport {
                    outcome: PipelineOutcome::Succeeded,
                    final_query: Some(current.sql),
                    final_result: Some(result.raw_output),
                    attempts_used: current.attempt,
                    plan_text: plan,
                    error: None,
                });
            }

            if current.attempt >= self.config.max_attempts {
                warn!(
                    attempts = current.attempt,
                    "attempt budget exhausted, surfacing last output"
                );
                return Ok(QueryReport {
                    outcome: PipelineOutcome::AttemptsExhausted,
                    final_query: Some(current.sql),
                    final_result: Some(result.raw_output),
                    attempts_used: current.attempt,
                    plan_text: plan,
                    error: Some(EXHAUSTED_RECOMMENDATION.to_string()),
                });
            }

            let diagnosis = self.diagnoser.diagnose(&result.raw_output);
            info!(category = %diagnosis.category, "diagnosed execution failure");

            let subset = self.relevance.relevant_subset(&current.sql, &self.schema);
            let correction_prompt = prompts::build_correction_prompt(
                question,
                &plan,
                &current.sql,
                &diagnosis,
                &subset,
            );
            let correction_response = self.llm.generate(&correction_prompt).await?;
            let extracted = extract_sql(&correction_response);

            if let Err(e) = self.logger.log_attempt(AttemptLogEntry {
                timestamp: Utc::now(),
                question_id: question_id.clone(),
                attempt: current.attempt + 1,
                failing_query: current.sql.clone(),
                diagnosis_message: diagnosis.message.clone(),
                category: diagnosis.category,
                correction_prompt,
                corrected_query: extracted.as_ref().ok().cloned(),
            }) {
                warn!("failed to write attempt log: {}", e);
            }

            match extracted {
                Ok(sql) => {
                    current = CandidateQuery {
                        sql,
                        attempt: current.attempt + 1,
                    };
                }
                Err(e) => {
                    // Retrying a non-answer would spend attempt budget
                    // without new information; the loop stops instead.
                    warn!("correction produced no extractable SQL, aborting");
                    return Ok(self.aborted(plan, current.attempt, e));
                }
            }
        }
    }

    fn aborted(&self, plan: String, attempts_used: u32, cause: BridgeError) -> QueryReport {
        QueryReport {
            outcome: PipelineOutcome::Aborted,
            final_query: None,
            final_result: None,
            attempts_used,
            plan_text: plan,
            error: Some(cause.to_string()),
        }
    }
}
