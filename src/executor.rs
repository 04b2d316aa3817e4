//! Remote query execution
//!
//! Composes the connection manager into the one operation the repair loop
//! needs: run a SQL statement on the remote host and report how it went.
//! The SQL travels over the remote process's stdin, never as a shell-quoted
//! argument.

use crate::connection::{CommandOutput, ConnectionConfig, ConnectionKey, ConnectionManager, SshCredentials};
use crate::diagnostics::{ErrorCategory, ErrorDiagnoser};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Outcome of running one candidate query.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub raw_output: String,
    pub exit_status: i32,
    pub error_category: Option<ErrorCategory>,
}

/// Seam between the repair loop and the remote channel.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute_query(&self, query: &str) -> Result<ExecutionResult>;

    /// Release pooled resources. Called once at shutdown.
    async fn shutdown(&self) {}
}

/// Where and how queries run remotely.
#[derive(Debug, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub credentials: SshCredentials,
    /// Directory the runner is invoked from.
    pub working_dir: String,
    /// Command that reads SQL on stdin and prints the result set.
    pub runner_command: String,
    /// Database credentials exposed to the runner as environment variables.
    pub db_user: String,
    pub db_password: String,
}

pub struct RemoteQueryExecutor {
    manager: Mutex<ConnectionManager>,
    target: RemoteTarget,
    diagnoser: ErrorDiagnoser,
    command_timeout: Duration,
}

impl RemoteQueryExecutor {
    pub fn new(target: RemoteTarget, config: ConnectionConfig, command_timeout: Duration) -> Self {
        Self {
            manager: Mutex::new(ConnectionManager::new(config)),
            target,
            diagnoser: ErrorDiagnoser::new(),
            command_timeout,
        }
    }

    /// The remote invocation: database credentials as environment variables,
    /// working-directory change, then the runner, which reads SQL on stdin.
    fn invocation(&self) -> (String, Vec<String>) {
        let script = format!("cd {} && {}", self.target.working_dir, self.target.runner_command);
        (
            "env".to_string(),
            vec![
                format!("DB_USER={}", self.target.db_user),
                format!("DB_PASSWORD={}", self.target.db_password),
                "sh".to_string(),
                "-c".to_string(),
                script,
            ],
        )
    }

    async fn run_once(&self, query: &str) -> Result<CommandOutput> {
        let (program, args) = self.invocation();
        let mut manager = self.manager.lock().await;
        let session = manager
            .acquire(&self.target.host, &self.target.credentials)
            .await?;

        match manager
            .execute(&session, &program, &args, query, self.command_timeout)
            .await
        {
            Ok(output) => Ok(output),
            Err(e) => {
                // Only a dead transport warrants a second try; a timeout or
                // runner failure on a live session is reported as-is.
                if session.check().await.is_err() {
                    warn!("transport died mid-execution, retrying with a fresh session");
                    let key = ConnectionKey {
                        host: self.target.host.clone(),
                        user: self.target.credentials.user.clone(),
                    };
                    manager.evict(&key);
                    let session = manager
                        .acquire(&self.target.host, &self.target.credentials)
                        .await?;
                    manager
                        .execute(&session, &program, &args, query, self.command_timeout)
                        .await
                } else {
                    Err(e)
                }
            }
        }
    }
}

#[async_trait]
impl QueryExecutor for RemoteQueryExecutor {
    async fn execute_query(&self, query: &str) -> Result<ExecutionResult> {
        // The remote runner only accepts reads; reject anything else before
        // paying for a round trip.
        if !query.trim_start().to_uppercase().starts_with("SELECT") {
            let raw_output = "Error: only SELECT statements are allowed".to_string();
            let error_category = Some(self.diagnoser.diagnose(&raw_output).category);
            return Ok(ExecutionResult {
                succeeded: false,
                raw_output,
                exit_status: 1,
                error_category,
            });
        }

        info!(host = %self.target.host, "executing query on remote database");
        let output = self.run_once(query).await?;

        let raw_output = match (output.stdout.is_empty(), output.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", output.stdout, output.stderr),
            (false, true) => output.stdout.clone(),
            (true, false) => output.stderr.clone(),
            (true, true) => String::new(),
        };

        // A result set that legitimately contains the word "error" is
        // misclassified by this check.
        let succeeded = output.exit_status == 0 && !raw_output.to_lowercase().contains("error");
        let error_category = if succeeded {
            None
        } else {
            Some(self.diagnoser.diagnose(&raw_output).category)
        };

        Ok(ExecutionResult {
            succeeded,
            raw_output,
            exit_status: output.exit_status,
            error_category,
        })
    }

    async fn shutdown(&self) {
        self.manager.lock().await.release_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> RemoteTarget {
        RemoteTarget {
            host: "db.example.edu".to_string(),
            credentials: SshCredentials {
                user: "alice".to_string(),
                keyfile: None,
            },
            working_dir: "~/sqlbridge".to_string(),
            runner_command: "python3 run_query.py".to_string(),
            db_user: "alice".to_string(),
            db_password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_invocation_passes_credentials_as_env_not_argv_sql() {
        let executor = RemoteQueryExecutor::new(
            target(),
            ConnectionConfig::default(),
            Duration::from_secs(300),
        );
        let (program, args) = executor.invocation();
        assert_eq!(program, "env");
        assert!(args.contains(&"DB_USER=alice".to_string()));
        assert!(args.contains(&"DB_PASSWORD=hunter2".to_string()));
        // The SQL itself never appears in the invocation.
        assert!(args.iter().all(|a| !a.to_uppercase().contains("SELECT")));
        assert_eq!(args.last().unwrap(), "cd ~/sqlbridge && python3 run_query.py");
    }

    #[tokio::test]
    async fn test_non_select_statement_rejected_locally() {
        let executor = RemoteQueryExecutor::new(
            target(),
            ConnectionConfig::default(),
            Duration::from_secs(300),
        );
        let result = executor.execute_query("DROP TABLE Agency;").await.unwrap();
        assert!(!result.succeeded);
        assert_eq!(result.exit_status, 1);
        assert!(result.raw_output.contains("only SELECT statements"));
    }
}
