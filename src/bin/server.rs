//! HTTP front end
//! Simple HTTP server using tokio and basic HTTP handling; every route just
//! calls into the pipeline.

use sqlbridge::config::BridgeConfig;
use sqlbridge::executor::{QueryExecutor, RemoteQueryExecutor};
use sqlbridge::llm::HttpLlmClient;
use sqlbridge::logging::QueryLogger;
use sqlbridge::pipeline::{PipelineConfig, RepairPipeline};
use sqlbridge::relevance::SchemaRelevance;
use sqlbridge::schema::SchemaContext;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

struct AppState {
    pipeline: RepairPipeline,
    executor: Arc<RemoteQueryExecutor>,
    logger: Arc<QueryLogger>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = BridgeConfig::from_env();
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
        logger.clone(),
        PipelineConfig {
            max_attempts: config.max_attempts,
        },
    );

    let state = Arc::new(AppState {
        pipeline,
        executor,
        logger,
    });

    let addr = std::env::var("SQLBRIDGE_BIND").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                info!(%addr, "new connection");
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        error!("connection error: {}", e);
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down, releasing pooled connections");
                break;
            }
        }
    }

    state.executor.shutdown().await;
    Ok(())
}

async fn handle_connection(mut stream: TcpStream, state: Arc<AppState>) -> std::io::Result<()> {
    let request = read_request(&mut stream).await?;
    let response = handle_request(&request, &state).await;
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Read the request head plus a Content-Length body.
async fn read_request(stream: &mut TcpStream) -> Result<String, std::io::Error> {
    let mut raw = Vec::new();
    let mut buffer = [0u8; 4096];
    loop {
        let read = stream.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..read]);
        if let Some(header_end) = find_header_end(&raw) {
            let head = String::from_utf8_lossy(&raw[..header_end]);
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.trim()
                        .eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            if raw.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    Ok(String::from_utf8_lossy(&raw).to_string())
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn handle_request(request: &str, state: &AppState) -> String {
    let request_line = request.lines().next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let path = parts
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let path = if path.is_empty() { "/" } else { path };

    match (method, path) {
        ("GET", "/api/health") => {
            json_response(200, r#"{"status":"ok","service":"sqlbridge"}"#.to_string())
        }
        ("GET", "/api/recent") => {
            let recent = state.logger.recent_questions(20);
            match serde_json::to_string(&recent) {
                Ok(body) => json_response(200, format!(r#"{{"questions":{}}}"#, body)),
                Err(_) => json_response(500, r#"{"error":"serialization failed"}"#.to_string()),
            }
        }
        ("POST", "/api/query") => handle_query(request, state).await,
        _ => json_response(404, r#"{"error":"not found"}"#.to_string()),
    }
}

async fn handle_query(request: &str, state: &AppState) -> String {
    let body = request
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or_default();

    let question = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => match value["question"].as_str() {
            Some(q) if !q.trim().is_empty() => q.trim().to_string(),
            _ => return json_response(400, r#"{"error":"missing question"}"#.to_string()),
        },
        Err(_) => return json_response(400, r#"{"error":"invalid JSON body"}"#.to_string()),
    };

    match state.pipeline.run_question(&question).await {
        Ok(report) => {
            let body = serde_json::json!({
                "question": question,
                "outcome": report.outcome,
                "sql_query": report.final_query,
                "plan": report.plan_text,
                "results": report.final_result,
                "attempts": report.attempts_used,
                "error": report.error,
            });
            json_response(200, body.to_string())
        }
        Err(e) => {
            error!("pipeline error: {}", e);
            json_response(500, format!(r#"{{"error":{}}}"#, serde_json::json!(e.to_string())))
        }
    }
}

fn json_response(status: u16, body: String) -> String {
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    )
}
