use anyhow::Result;
use clap::Parser;
use sqlbridge::config::BridgeConfig;
use sqlbridge::executor::{QueryExecutor, RemoteQueryExecutor};
use sqlbridge::llm::HttpLlmClient;
use sqlbridge::logging::QueryLogger;
use sqlbridge::pipeline::{PipelineConfig, PipelineOutcome, QueryReport, RepairPipeline};
use sqlbridge::relevance::SchemaRelevance;
use sqlbridge::schema::SchemaContext;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sqlbridge")]
#[command(about = "Ask a remote PostgreSQL database questions in plain language")]
struct Args {
    /// One question to run; without it an interactive session starts
    question: Option<String>,

    /// Path to the schema context file
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// Remote host to run queries on
    #[arg(long)]
    host: Option<String>,

    /// Maximum correction attempts per question
    #[arg(long)]
    max_attempts: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = BridgeConfig::from_env();
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(schema) = args.schema {
        config.schema_path = schema;
    }

    let schema = SchemaContext::load(&config.schema_path)?;
    let llm = Arc::new(HttpLlmClient::from_env());
    let executor = Arc::new(RemoteQueryExecutor::new(
        config.remote_target(),
        config.connection_config(),
        config.command_timeout(),
    ));
    let logger = Arc::new(QueryLogger::new(&config.log_dir, 100)?);
    let pipeline = RepairPipeline::new(
        llm,
        executor.clone(),
        schema,
        SchemaRelevance::default(),
        logger,
        PipelineConfig {
            max_attempts: config.max_attempts,
        },
    );

    // Smoke-test the remote channel before accepting questions.
    info!(host = %config.host, "testing connection");
    let probe = executor.execute_query("SELECT 1;").await?;
    if !probe.succeeded {
        executor.shutdown().await;
        anyhow::bail!("connection test failed:\n{}", probe.raw_output);
    }
    println!("Connected to {}.", config.host);

    if let Some(question) = args.question {
        run_one(&pipeline, &question).await;
    } else {
        println!("Ask questions about the database. Type 'exit' to quit.");
        let stdin = io::stdin();
        loop {
            print!("\n> ");
            io::stdout().flush()?;
            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                break;
            }
            let question = line.trim();
            if question.is_empty() {
                continue;
            }
            if question.eq_ignore_ascii_case("exit") {
                break;
            }
            run_one(&pipeline, question).await;
        }
    }

    executor.shutdown().await;
    Ok(())
}

async fn run_one(pipeline: &RepairPipeline, question: &str) {
    let started = std::time::Instant::now();
    match pipeline.run_question(question).await {
        Ok(report) => print_report(&report),
        Err(e) => eprintln!("Error: {}", e),
    }
    info!(elapsed = ?started.elapsed(), "question finished");
}

fn print_report(report: &QueryReport) {
    match report.outcome {
        PipelineOutcome::Succeeded => {
            if let Some(ref query) = report.final_query {
                println!("\nSQL: {}", query);
            }
            if report.attempts_used > 0 {
                println!("(repaired after {} correction attempt(s))", report.attempts_used);
            }
            if let Some(ref result) = report.final_result {
                println!("\n{}", result);
            }
        }
        PipelineOutcome::Aborted => {
            println!(
                "\nNo usable SQL came back from the model: {}",
                report.error.as_deref().unwrap_or("unknown cause")
            );
            println!("Try rephrasing your question.");
        }
        PipelineOutcome::AttemptsExhausted => {
            if let Some(ref query) = report.final_query {
                println!("\nLast query tried: {}", query);
            }
            if let Some(ref result) = report.final_result {
                println!("\nLast output:\n{}", result);
            }
            if let Some(ref error) = report.error {
                println!("\n{}", error);
            }
        }
    }
}
