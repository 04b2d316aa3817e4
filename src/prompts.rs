//! Prompt builders
//!
//! One builder per model call the pipeline makes: plan generation, SQL
//! synthesis, and correction. The correction prompt folds in the diagnosis
//! and the per-category remediation guidance.

use crate::diagnostics::Diagnosis;

/// System role sent with every chat completion.
pub const SYSTEM_PROMPT: &str = "You are an expert PostgreSQL assistant. \
Your task is to generate or fix SQL queries based on database schemas. \
You provide only the SQL query without explanation unless specifically asked. \
Always ensure column and table names match the schema exactly.";

/// Ask for a structured breakdown of the question, no SQL yet.
pub fn build_plan_prompt(schema: &str, question: &str) -> String {
    format!(
        r#"Question:
{question}

Database Schema:
{schema}

Break the question down into a structured query plan. List, in order:
1. Tables required.
2. Joins, naming the key columns on both sides.
3. Projected columns.
4. Filters.
5. Grouping, if any aggregate is involved.
6. Ordering, if the question implies one.

Output only the numbered plan. Do not write SQL."#
    )
}

/// Ask for a single PostgreSQL statement from plan + schema + question.
pub fn build_synthesis_prompt(plan: &str, schema: &str, question: &str) -> String {
    format!(
        r#"Question:
{question}

Query plan:
{plan}

Database Schema:
{schema}

Instructions:
1. Follow the query plan; verify every table and column it names against the schema.
2. IMPORTANT: Always use fully qualified column names (table.column) for ALL columns.
3. When joining tables:
   - Use junction tables for many-to-many relationships where the schema requires them
   - Always use the join keys the schema specifies
   - Use meaningful table aliases consistently throughout the query
4. Follow proper SQL patterns:
   - Use explicit JOIN syntax with ON conditions
   - Match column and table names EXACTLY as they appear in the schema
   - GROUP BY all non-aggregated columns in SELECT statements
5. Construct a single PostgreSQL query that answers the question precisely.
6. Output only the SQL query enclosed in ```sql markdown tags.

Common errors to avoid:
1. NEVER use unqualified column names when joining multiple tables
2. NEVER directly join tables that require a junction table between them
3. NEVER reference columns that do not exist in the schema
4. ALWAYS include every JOIN needed to reach the referenced tables
5. Be careful with aggregate functions - GROUP BY all non-aggregated columns
6. Avoid ambiguous column references - qualify with a table name or alias"#
    )
}

/// Ask for a repaired statement given the failure diagnosis.
pub fn build_correction_prompt(
    question: &str,
    plan: &str,
    failing_query: &str,
    diagnosis: &Diagnosis,
    schema_subset: &str,
) -> String {
    format!(
        r#"I need to fix a SQL query that failed.

Original question: {question}

Query plan:
{plan}

Failed SQL query:
```sql
{failing_query}
```

Error message:
{message}

{hint}

Relevant schema:
{schema_subset}

Instructions:
1. Analyze the error message carefully.
2. Identify the specific issue in the query.
3. Fix ONLY what is needed to address the error.
4. Junction tables typically contain ONLY foreign keys; descriptive fields
   live in the paired lookup table and require a join to reach.
5. Ensure all column and table names match the schema exactly.
6. Provide the corrected query ONLY, enclosed in ```sql markdown tags."#,
        message = diagnosis.message,
        hint = diagnosis.category.remediation_hint(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{Diagnosis, ErrorCategory};

    #[test]
    fn test_plan_prompt_carries_question_and_schema() {
        let prompt = build_plan_prompt("**Agency**\n- id", "count the agencies");
        assert!(prompt.contains("count the agencies"));
        assert!(prompt.contains("**Agency**"));
        assert!(prompt.contains("Do not write SQL"));
    }

    #[test]
    fn test_correction_prompt_carries_hint_and_failing_query() {
        let diagnosis = Diagnosis {
            message: "ERROR: column \"a.name\" does not exist".to_string(),
            category: ErrorCategory::ColumnNotFound,
        };
        let prompt = build_correction_prompt(
            "list agency names",
            "1. Tables: Agency",
            "SELECT a.name FROM Agency a;",
            &diagnosis,
            "**Agency**\n- agency_code\n- agency_name",
        );
        assert!(prompt.contains("SELECT a.name FROM Agency a;"));
        assert!(prompt.contains("does not exist"));
        assert!(prompt.contains(ErrorCategory::ColumnNotFound.remediation_hint()));
    }
}
