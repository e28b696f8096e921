use crate::errors::ToolError;
use crate::managers::commands::Command;
use crate::services::logger::Logger;
use crate::services::remote::RemoteConnectionManager;
use crate::services::security::SecurityValidator;
use crate::stores::history_store::ExecutionHistory;
use crate::utils::reply;
use crate::utils::shell::shell_quote;
use std::sync::Arc;

const PY_HEREDOC_TAG: &str = "SCRIPTOPS_PY_EOF";

/// Raw shell, inline python, host health and the execution history.
#[derive(Clone)]
pub struct SystemManager {
    logger: Logger,
    security: Arc<SecurityValidator>,
    remote: Arc<RemoteConnectionManager>,
    history: Arc<ExecutionHistory>,
    files_dir: String,
}

impl SystemManager {
    pub fn new(
        logger: Logger,
        security: Arc<SecurityValidator>,
        remote: Arc<RemoteConnectionManager>,
        history: Arc<ExecutionHistory>,
        files_dir: String,
    ) -> Self {
        Self {
            logger: logger.child("system"),
            security,
            remote,
            history,
            files_dir,
        }
    }

    async fn shell(&self, command: &str) -> Result<String, ToolError> {
        self.security.validate_command(command)?;
        self.logger.info("Raw command", Some(&serde_json::json!({"command": command})));
        let outcome = self
            .remote
            .execute_default(&format!(
                "cd {} 2>/dev/null; {}",
                shell_quote(&self.files_dir),
                command
            ))
            .await;
        if outcome.is_success() {
            return Ok(reply::block("output", &outcome.text()));
        }
        Ok(reply::error(&outcome.text()))
    }

    async fn python(&self, code: &str) -> Result<String, ToolError> {
        self.security.validate_command(code)?;
        if code.lines().any(|line| line.trim() == PY_HEREDOC_TAG) {
            return Err(ToolError::validation("Code contains the reserved heredoc marker"));
        }
        let outcome = self
            .remote
            .execute_default(&format!(
                "python3 - <<'{tag}' 2>&1\n{code}\n{tag}",
                tag = PY_HEREDOC_TAG,
                code = code
            ))
            .await;
        if outcome.is_success() {
            return Ok(reply::block("python", &outcome.text()));
        }
        Ok(reply::error(&outcome.text()))
    }

    async fn ping(&self) -> Result<String, ToolError> {
        let out = self
            .remote
            .execute_default("uptime && free -h && df -h /")
            .await
            .into_result()?;
        Ok(reply::block(
            &format!("server {}", self.remote.host_key()),
            out.output.trim_end(),
        ))
    }

    fn stats(&self) -> String {
        let stats = self.history.stats();
        reply::block(
            "stats",
            &format!(
                "Total: {}\nSuccessful: {}\nFailed: {}\nSuccess rate: {}\nAverage duration: {:.2} s",
                stats.total_executions,
                stats.successful,
                stats.failed,
                stats.success_rate,
                stats.average_duration_seconds
            ),
        )
    }

    fn recent(&self, limit: usize) -> String {
        let records = self.history.recent(limit);
        if records.is_empty() {
            return reply::block("history", "No executions yet");
        }
        let lines: Vec<String> = records
            .iter()
            .map(|r| {
                let status = serde_json::to_value(r.status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let mut line = format!(
                    "{} {} [{}] {} {:.2}s",
                    r.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    r.filename,
                    r.session_id,
                    status,
                    r.duration_seconds
                );
                if let Some(error) = r.error.as_ref() {
                    line.push_str(&format!(" ({})", error));
                }
                line
            })
            .collect();
        reply::block("history", &lines.join("\n"))
    }

    pub async fn handle_command(&self, command: Command) -> Result<String, ToolError> {
        match command {
            Command::Shell { command } => self.shell(&command).await,
            Command::Python { code } => self.python(&code).await,
            Command::Ping => self.ping().await,
            Command::Stats => Ok(self.stats()),
            Command::History { limit } => Ok(self.recent(limit)),
            other => Err(ToolError::internal(format!(
                "system handler cannot serve {:?}",
                other
            ))),
        }
    }
}

#[async_trait::async_trait]
impl crate::managers::commands::CommandHandler for SystemManager {
    async fn handle(&self, _operator: &str, command: Command) -> Result<String, ToolError> {
        self.handle_command(command).await
    }
}
