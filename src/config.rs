//! Configuration
//!
//! Everything the pipeline needs is injected from here; no module-level
//! mutable state anywhere in the crate.

use crate::connection::{ConnectionConfig, SshCredentials};
use crate::executor::RemoteTarget;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the bridge, read once at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Remote host the query runner lives on.
    pub host: String,
    /// SSH login user.
    pub ssh_user: String,
    /// Optional private key file; system SSH config applies otherwise.
    pub keyfile: Option<PathBuf>,
    /// Database credentials exposed to the remote runner as env vars.
    pub db_user: String,
    pub db_password: String,
    /// Directory on the remote host the runner is invoked from.
    pub working_dir: String,
    /// Command that reads SQL on stdin and prints the result set.
    pub runner_command: String,
    /// Schema context file.
    pub schema_path: PathBuf,
    /// Directory for the append-only question/attempt logs.
    pub log_dir: PathBuf,
    /// Maximum correction attempts per question.
    pub max_attempts: u32,
    /// Connect retry bound and linear backoff step.
    pub max_connect_attempts: u32,
    pub backoff_step_secs: u64,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl BridgeConfig {
    /// Build a configuration from environment variables, with defaults for
    /// everything except the database credentials.
    pub fn from_env() -> Self {
        Self {
            host: env_or("SQLBRIDGE_HOST", "ilab.cs.rutgers.edu"),
            ssh_user: std::env::var("SQLBRIDGE_SSH_USER")
                .or_else(|_| std::env::var("USER"))
                .unwrap_or_else(|_| "postgres".to_string()),
            keyfile: std::env::var("SQLBRIDGE_SSH_KEYFILE").ok().map(PathBuf::from),
            db_user: env_or("DB_USER", ""),
            db_password: env_or("DB_PASSWORD", ""),
            working_dir: env_or("SQLBRIDGE_REMOTE_DIR", "~/sqlbridge"),
            runner_command: env_or("SQLBRIDGE_RUNNER", "python3 run_query.py"),
            schema_path: PathBuf::from(env_or("SQLBRIDGE_SCHEMA", "schema_context.txt")),
            log_dir: PathBuf::from(env_or("SQLBRIDGE_LOG_DIR", "logs")),
            max_attempts: env_parse("SQLBRIDGE_MAX_ATTEMPTS", 3),
            max_connect_attempts: env_parse("SQLBRIDGE_MAX_CONNECT_ATTEMPTS", 3),
            backoff_step_secs: env_parse("SQLBRIDGE_BACKOFF_STEP_SECS", 2),
            connect_timeout_secs: env_parse("SQLBRIDGE_CONNECT_TIMEOUT_SECS", 15),
            command_timeout_secs: env_parse("SQLBRIDGE_COMMAND_TIMEOUT_SECS", 300),
        }
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            max_connect_attempts: self.max_connect_attempts,
            backoff_step: Duration::from_secs(self.backoff_step_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn remote_target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.host.clone(),
            credentials: SshCredentials {
                user: self.ssh_user.clone(),
                keyfile: self.keyfile.clone(),
            },
            working_dir: self.working_dir.clone(),
            runner_command: self.runner_command.clone(),
            db_user: self.db_user.clone(),
            db_password: self.db_password.clone(),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = BridgeConfig::from_env();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_connect_attempts, 3);
        assert_eq!(config.command_timeout(), Duration::from_secs(300));
        assert_eq!(config.connection_config().connect_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        std::env::set_var("SQLBRIDGE_TEST_GARBAGE", "not-a-number");
        let value: u32 = env_parse("SQLBRIDGE_TEST_GARBAGE", 7);
        assert_eq!(value, 7);
        std::env::remove_var("SQLBRIDGE_TEST_GARBAGE");
    }
}
