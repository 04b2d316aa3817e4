//! Connection manager
//!
//! Owns a pool of live SSH sessions keyed by (host, user). Session setup
//! dominates the latency of the whole pipeline, so sessions are reused
//! across the original query and every correction attempt; staleness is
//! detected with a liveness check rather than assumed.

use crate::error::{BridgeError, Result};
use openssh::{KnownHosts, Session, SessionBuilder, Stdio};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Identity a pooled session is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub user: String,
}

/// SSH login identity.
#[derive(Debug, Clone)]
pub struct SshCredentials {
    pub user: String,
    /// Optional private key file; system SSH config applies otherwise.
    pub keyfile: Option<PathBuf>,
}

/// Output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Retry and backoff bounds for session setup.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub max_connect_attempts: u32,
    /// Linear backoff: sleep `backoff_step * attempt` between attempts.
    pub backoff_step: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connect_attempts: 3,
            backoff_step: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

pub struct ConnectionManager {
    config: ConnectionConfig,
    sessions: HashMap<ConnectionKey, Arc<Session>>,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
        }
    }

    /// Return a live cached session for this identity, connecting if the
    /// cache is empty or the cached transport is dead.
    pub async fn acquire(&mut self, host: &str, credentials: &SshCredentials) -> Result<Arc<Session>> {
        let key = ConnectionKey {
            host: host.to_string(),
            user: credentials.user.clone(),
        };

        if let Some(session) = self.sessions.get(&key) {
            if session.check().await.is_ok() {
                debug!(host, user = %credentials.user, "reusing pooled session");
                return Ok(Arc::clone(session));
            }
            warn!(host, user = %credentials.user, "pooled session is dead, reconnecting");
            self.sessions.remove(&key);
        }

        let session = Arc::new(self.connect(host, credentials).await?);
        self.sessions.insert(key, Arc::clone(&session));
        Ok(session)
    }

    async fn connect(&self, host: &str, credentials: &SshCredentials) -> Result<Session> {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.config.max_connect_attempts {
            info!(host, user = %credentials.user, attempt, "connecting");

            let mut builder = SessionBuilder::default();
            builder
                .known_hosts_check(KnownHosts::Accept)
                .user(credentials.user.clone())
                .control_directory(std::env::temp_dir())
                .connect_timeout(self.config.connect_timeout);
            if let Some(ref keyfile) = credentials.keyfile {
                builder.keyfile(keyfile);
            }

            match builder.connect(host).await {
                Ok(session) => match session.check().await {
                    Ok(()) => return Ok(session),
                    Err(e) => last_error = Some(e.to_string()),
                },
                Err(e) => last_error = Some(e.to_string()),
            }

            if attempt < self.config.max_connect_attempts {
                let backoff = self.config.backoff_step * attempt;
                warn!(host, attempt, ?backoff, "connect failed, backing off");
                tokio::time::sleep(backoff).await;
            }
        }

        Err(BridgeError::Connection(format!(
            "failed to connect to {} after {} attempts: {}",
            host,
            self.config.max_connect_attempts,
            last_error.unwrap_or_else(|| "unknown cause".to_string())
        )))
    }

    /// Run a remote command, feeding `stdin_payload` over the input stream
    /// and signalling end-of-input before waiting for completion.
    pub async fn execute(
        &self,
        session: &Session,
        program: &str,
        args: &[String],
        stdin_payload: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut command = session.command(program);
        for arg in args {
            command.arg(arg.as_str());
        }

        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .await
            .map_err(|e| BridgeError::Execution(format!("failed to spawn remote command: {}", e)))?;

        if let Some(mut stdin) = child.stdin().take() {
            stdin
                .write_all(stdin_payload.as_bytes())
                .await
                .map_err(|e| {
                    BridgeError::Execution(format!("failed to write query to remote stdin: {}", e))
                })?;
            stdin.shutdown().await.map_err(|e| {
                BridgeError::Execution(format!("failed to close remote stdin: {}", e))
            })?;
        }

        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BridgeError::Execution(format!("remote command timed out after {:?}", timeout))
            })?
            .map_err(|e| BridgeError::Execution(format!("remote command failed: {}", e)))?;

        Ok(CommandOutput {
            exit_status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    /// Drop a session so the next acquire reconnects.
    pub fn evict(&mut self, key: &ConnectionKey) {
        if self.sessions.remove(key).is_some() {
            info!(host = %key.host, user = %key.user, "evicted session");
        }
    }

    pub fn pooled_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Close every pooled session. Idempotent.
    pub async fn release_all(&mut self) {
        for (key, session) in self.sessions.drain() {
            match Arc::try_unwrap(session) {
                Ok(session) => {
                    if let Err(e) = session.close().await {
                        warn!(host = %key.host, "error closing session: {}", e);
                    }
                }
                // A handle still borrowed at shutdown is dropped without an
                // explicit close; the transport dies with the process.
                Err(_) => warn!(host = %key.host, "session still in use at shutdown, dropping"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_key_identity() {
        let a = ConnectionKey {
            host: "db.example.edu".to_string(),
            user: "alice".to_string(),
        };
        let b = ConnectionKey {
            host: "db.example.edu".to_string(),
            user: "alice".to_string(),
        };
        let c = ConnectionKey {
            host: "db.example.edu".to_string(),
            user: "bob".to_string(),
        };
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_default_bounds() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_connect_attempts, 3);
        assert_eq!(config.backoff_step, Duration::from_secs(2));
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_release_all_is_idempotent_on_empty_pool() {
        let mut manager = ConnectionManager::new(ConnectionConfig::default());
        assert_eq!(manager.pooled_sessions(), 0);
        manager.release_all().await;
        manager.release_all().await;
        assert_eq!(manager.pooled_sessions(), 0);
    }
}
