use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::retry::RetryPolicy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Raw result of one remote command: stdout and stderr combined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: String,
    pub exit_code: i32,
}

/// A live remote shell. Implementations block the calling thread.
pub trait Connection: Send {
    /// Cheap liveness probe used before reusing a cached connection.
    fn is_alive(&mut self) -> bool;

    /// Runs `command`. Failures of the transport itself must be reported as
    /// `ToolErrorKind::Connection` so the manager retries on a fresh connection.
    fn run(&mut self, command: &str, timeout: Duration) -> Result<CommandOutput, ToolError>;
}

pub trait Connector: Send + Sync {
    /// Logical host key; one cached connection is kept per key.
    fn host_key(&self) -> String;

    fn connect(&self) -> Result<Box<dyn Connection>, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Success,
    Error,
    FailedMaxAttempts,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemoteOutcome {
    pub status: RemoteStatus,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "exitCode")]
    pub exit_code: Option<i32>,
    pub attempts: usize,
}

impl RemoteOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RemoteStatus::Success
    }

    /// Output if any, otherwise the error, otherwise `OK`.
    pub fn text(&self) -> String {
        if !self.output.trim().is_empty() {
            return self.output.clone();
        }
        if let Some(error) = self.error.as_ref() {
            return format!("SSH ERROR: {}", error);
        }
        "OK".to_string()
    }

    pub fn into_result(self) -> Result<CommandOutput, ToolError> {
        match self.status {
            RemoteStatus::Success => Ok(CommandOutput {
                output: self.output,
                exit_code: self.exit_code.unwrap_or(0),
            }),
            RemoteStatus::Error => Err(ToolError::execution(
                self.error.unwrap_or_else(|| "Remote command failed".to_string()),
            )),
            RemoteStatus::FailedMaxAttempts => Err(ToolError::connection(format!(
                "Remote host unreachable after {} attempts: {}",
                self.attempts,
                self.error.unwrap_or_default()
            ))),
        }
    }
}

type ConnectionCache = HashMap<String, Box<dyn Connection>>;

/// Owns the process-wide cached connection and the retry loop around it.
///
/// The cache lock is held for the whole `execute`, so remote commands are
/// serialized and the single connection is never used from two threads.
#[derive(Clone)]
pub struct RemoteConnectionManager {
    logger: Logger,
    connector: Arc<dyn Connector>,
    cache: Arc<Mutex<ConnectionCache>>,
    policy: RetryPolicy,
    default_timeout: Duration,
}

impl RemoteConnectionManager {
    pub fn new(
        logger: Logger,
        connector: Arc<dyn Connector>,
        policy: RetryPolicy,
        default_timeout: Duration,
    ) -> Self {
        Self {
            logger: logger.child("remote"),
            connector,
            cache: Arc::new(Mutex::new(HashMap::new())),
            policy,
            default_timeout,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn host_key(&self) -> String {
        self.connector.host_key()
    }

    pub async fn execute_default(&self, command: &str) -> RemoteOutcome {
        self.execute(command, self.default_timeout).await
    }

    pub async fn execute(&self, command: &str, timeout: Duration) -> RemoteOutcome {
        let key = self.connector.host_key();
        let mut cache = self.cache.lock().await;
        let mut attempt = 0usize;
        let mut last_error: Option<String> = None;

        while attempt < self.policy.max_attempts {
            attempt += 1;
            let cached = cache.remove(&key);
            let connector = self.connector.clone();
            let command_owned = command.to_string();
            let joined = tokio::task::spawn_blocking(move || {
                run_attempt(connector.as_ref(), cached, &command_owned, timeout)
            })
            .await;

            let (connection, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    self.logger.error(
                        "Remote worker panicked",
                        Some(&serde_json::json!({"error": err.to_string()})),
                    );
                    return RemoteOutcome {
                        status: RemoteStatus::Error,
                        output: String::new(),
                        error: Some("Remote worker failed".to_string()),
                        exit_code: None,
                        attempts: attempt,
                    };
                }
            };
            if let Some(connection) = connection {
                cache.insert(key.clone(), connection);
            }

            match result {
                Ok(out) => {
                    self.logger.debug(
                        "Remote command finished",
                        Some(&serde_json::json!({
                            "attempt": attempt,
                            "exit_code": out.exit_code,
                            "bytes": out.output.len(),
                        })),
                    );
                    return RemoteOutcome {
                        status: RemoteStatus::Success,
                        output: out.output,
                        error: None,
                        exit_code: Some(out.exit_code),
                        attempts: attempt,
                    };
                }
                Err(err) if err.is_connection() => {
                    self.logger.warn(
                        "Remote connection failed",
                        Some(&serde_json::json!({
                            "attempt": attempt,
                            "max_attempts": self.policy.max_attempts,
                            "error": err.message,
                        })),
                    );
                    last_error = Some(err.message);
                    if self.policy.has_attempts_left(attempt) {
                        tokio::time::sleep(self.policy.delay_after(attempt)).await;
                    }
                }
                Err(err) => {
                    return RemoteOutcome {
                        status: RemoteStatus::Error,
                        output: String::new(),
                        error: Some(err.message),
                        exit_code: None,
                        attempts: attempt,
                    };
                }
            }
        }

        self.logger.error(
            "Remote command gave up",
            Some(&serde_json::json!({"attempts": attempt, "error": last_error})),
        );
        RemoteOutcome {
            status: RemoteStatus::FailedMaxAttempts,
            output: String::new(),
            error: last_error,
            exit_code: None,
            attempts: attempt,
        }
    }

    /// Connectivity check used by `ping`.
    pub async fn probe(&self) -> Result<(), ToolError> {
        self.execute("true", self.default_timeout)
            .await
            .into_result()
            .map(|_| ())
    }

    pub async fn disconnect(&self) -> bool {
        self.cache
            .lock()
            .await
            .remove(&self.connector.host_key())
            .is_some()
    }
}

fn run_attempt(
    connector: &dyn Connector,
    cached: Option<Box<dyn Connection>>,
    command: &str,
    timeout: Duration,
) -> (Option<Box<dyn Connection>>, Result<CommandOutput, ToolError>) {
    let reused = cached.and_then(|mut conn| if conn.is_alive() { Some(conn) } else { None });
    let mut connection = match reused {
        Some(conn) => conn,
        None => match connector.connect() {
            Ok(conn) => conn,
            Err(err) => return (None, Err(err)),
        },
    };
    match connection.run(command, timeout) {
        Ok(out) => (Some(connection), Ok(out)),
        Err(err) if err.is_connection() => (None, Err(err)),
        Err(err) => (Some(connection), Err(err)),
    }
}
