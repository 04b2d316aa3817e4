use async_trait::async_trait;
use sqlbridge::diagnostics::ErrorCategory;
use sqlbridge::error::{BridgeError, Result};
use sqlbridge::executor::{ExecutionResult, QueryExecutor};
use sqlbridge::llm::LanguageModel;
use sqlbridge::logging::QueryLogger;
use sqlbridge::pipeline::{PipelineConfig, PipelineOutcome, RepairPipeline};
use sqlbridge::relevance::SchemaRelevance;
use sqlbridge::schema::SchemaContext;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Model that replays a fixed script of responses and records every prompt
/// it was asked.
struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(responses: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| BridgeError::Llm("scripted model ran out of responses".to_string()))
    }
}

/// Executor that replays a fixed script of results, then a fallback forever.
struct ScriptedExecutor {
    script: Mutex<VecDeque<ExecutionResult>>,
    fallback: ExecutionResult,
    calls: AtomicUsize,
}

impl ScriptedExecutor {
    fn new(script: Vec<ExecutionResult>, fallback: ExecutionResult) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute_query(&self, _query: &str) -> Result<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

fn success(output: &str) -> ExecutionResult {
    ExecutionResult {
        succeeded: true,
        raw_output: output.to_string(),
        exit_status: 0,
        error_category: None,
    }
}

fn failure(output: &str, category: ErrorCategory) -> ExecutionResult {
    ExecutionResult {
        succeeded: false,
        raw_output: output.to_string(),
        exit_status: 1,
        error_category: Some(category),
    }
}

const SCHEMA: &str = "\
**Agency**
- agency_code (PK)
- agency_name

**ApplicantRace**
- ID (FK to LoanApplication)
- race_number
- race_code (FK to Race)

**Race**
- race_code (PK)
- race_name
";

fn pipeline(
    model: Arc<ScriptedModel>,
    executor: Arc<ScriptedExecutor>,
    max_attempts: u32,
) -> RepairPipeline {
    RepairPipeline::new(
        model,
        executor,
        SchemaContext::from_text(SCHEMA),
        SchemaRelevance::default(),
        Arc::new(QueryLogger::disabled()),
        PipelineConfig { max_attempts },
    )
}

#[tokio::test]
async fn test_first_try_success_uses_zero_attempts() {
    let model = ScriptedModel::new(&[
        "1. Tables: Agency",
        "```sql\nSELECT COUNT(*) FROM Agency;\n```",
    ]);
    let executor = ScriptedExecutor::new(vec![], success("count\n42"));

    let report = pipeline(model.clone(), executor.clone(), 3)
        .run_question("count rows")
        .await
        .unwrap();

    assert_eq!(report.outcome, PipelineOutcome::Succeeded);
    assert_eq!(
        report.final_query.as_deref(),
        Some("SELECT COUNT(*) FROM Agency;")
    );
    assert_eq!(report.final_result.as_deref(), Some("count\n42"));
    assert_eq!(report.attempts_used, 0);
    assert_eq!(report.plan_text, "1. Tables: Agency");
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_single_correction_repairs_column_error() {
    let model = ScriptedModel::new(&[
        "1. Tables: ApplicantRace, Race",
        "```sql\nSELECT AR.race_name FROM ApplicantRace AR;\n```",
        "```sql\nSELECT R.race_name FROM ApplicantRace AR JOIN Race R ON AR.race_code = R.race_code;\n```",
    ]);
    let executor = ScriptedExecutor::new(
        vec![
            failure(
                "ERROR: column \"ar.race_name\" does not exist",
                ErrorCategory::ColumnNotFound,
            ),
            success("race_name\nAsian"),
        ],
        success(""),
    );

    let report = pipeline(model.clone(), executor.clone(), 3)
        .run_question("list applicant race names")
        .await
        .unwrap();

    assert_eq!(report.outcome, PipelineOutcome::Succeeded);
    assert_eq!(report.attempts_used, 1);
    assert_eq!(executor.calls(), 2);
    assert!(report.final_query.unwrap().contains("JOIN Race R"));

    // The correction prompt carried the diagnosis, the category guidance and
    // the narrowed schema with its junction note.
    let correction_prompt = model.prompt(2);
    assert!(correction_prompt.contains("does not exist"));
    assert!(correction_prompt.contains("column name error"));
    assert!(correction_prompt.contains("IMPORTANT RELATIONSHIP"));
    assert!(correction_prompt.contains("**Race**"));
}

#[tokio::test]
async fn test_exhausted_budget_surfaces_last_output() {
    let model = ScriptedModel::new(&[
        "1. Tables: Agency",
        "```sql\nSELECT one;\n```",
        "```sql\nSELECT two;\n```",
        "```sql\nSELECT three;\n```",
        "```sql\nSELECT four;\n```",
    ]);
    let executor = ScriptedExecutor::new(
        vec![
            failure("ERROR: syntax error near \"one\"", ErrorCategory::SyntaxError),
            failure("ERROR: syntax error near \"two\"", ErrorCategory::SyntaxError),
            failure("ERROR: syntax error near \"three\"", ErrorCategory::SyntaxError),
        ],
        failure("ERROR: syntax error near \"four\"", ErrorCategory::SyntaxError),
    );

    let report = pipeline(model.clone(), executor.clone(), 3)
        .run_question("nonsense question")
        .await
        .unwrap();

    assert_eq!(report.outcome, PipelineOutcome::AttemptsExhausted);
    assert_eq!(report.attempts_used, 3);
    assert_eq!(executor.calls(), 4);
    assert_eq!(
        report.final_result.as_deref(),
        Some("ERROR: syntax error near \"four\"")
    );
    assert!(report.error.unwrap().contains("rephrasing"));
    // Exactly max_attempts corrections were requested from the model.
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn test_attempt_bound_of_one_is_respected() {
    let model = ScriptedModel::new(&[
        "plan",
        "```sql\nSELECT one;\n```",
        "```sql\nSELECT two;\n```",
    ]);
    let executor = ScriptedExecutor::new(
        vec![],
        failure("ERROR: relation \"one\" does not exist", ErrorCategory::RelationNotFound),
    );

    let report = pipeline(model, executor.clone(), 1)
        .run_question("anything")
        .await
        .unwrap();

    assert_eq!(report.outcome, PipelineOutcome::AttemptsExhausted);
    assert_eq!(report.attempts_used, 1);
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_no_sql_at_synthesis_aborts_without_executing() {
    let model = ScriptedModel::new(&[
        "1. Tables: Agency",
        "I cannot answer that question from the schema provided.",
    ]);
    let executor = ScriptedExecutor::new(vec![], success(""));

    let report = pipeline(model, executor.clone(), 3)
        .run_question("what is the meaning of life")
        .await
        .unwrap();

    assert_eq!(report.outcome, PipelineOutcome::Aborted);
    assert_eq!(report.attempts_used, 0);
    assert_eq!(executor.calls(), 0);
    assert!(report.final_query.is_none());
    assert!(report.error.unwrap().contains("Extraction"));
}

#[tokio::test]
async fn test_no_sql_at_correction_aborts() {
    let model = ScriptedModel::new(&[
        "plan",
        "```sql\nSELECT bogus FROM Agency;\n```",
        "I am unable to repair this query.",
    ]);
    let executor = ScriptedExecutor::new(
        vec![],
        failure(
            "ERROR: column \"bogus\" does not exist",
            ErrorCategory::ColumnNotFound,
        ),
    );

    let report = pipeline(model, executor.clone(), 3)
        .run_question("anything")
        .await
        .unwrap();

    assert_eq!(report.outcome, PipelineOutcome::Aborted);
    assert_eq!(executor.calls(), 1);
    assert!(report.error.unwrap().contains("Extraction"));
}

#[tokio::test]
async fn test_model_transport_failure_propagates() {
    let model = ScriptedModel::new(&["1. Tables: Agency"]);
    let executor = ScriptedExecutor::new(vec![], success(""));

    let outcome = pipeline(model, executor.clone(), 3)
        .run_question("count rows")
        .await;

    match outcome {
        Err(BridgeError::Llm(_)) => {}
        other => panic!("expected LLM error, got {:?}", other.map(|r| r.outcome)),
    }
    assert_eq!(executor.calls(), 0);
}
