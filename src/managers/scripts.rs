use crate::constants::limits;
use crate::errors::ToolError;
use crate::managers::commands::Command;
use crate::services::execution::{ExecutionEngine, ProcessStatus, RunResult, StopResult};
use crate::services::logger::Logger;
use crate::utils::reply;
use std::sync::Arc;

pub fn render_run(result: &RunResult) -> String {
    if !result.is_success() {
        return reply::error(&result.message);
    }
    let mut lines = vec![result.message.clone()];
    if let Some(pid) = result.pid {
        lines.push(format!("PID: {}", pid));
    }
    if let Some(log) = result.log_file.as_ref() {
        lines.push(format!("Log: {}", log));
    }
    if let Some(id) = result.session_id.as_ref() {
        lines.push(format!("Session: {}", id));
    }
    reply::success(&lines.join("\n"))
}

fn render_status(status: &ProcessStatus) -> String {
    if !status.running {
        return reply::block("status", &format!("{} is not running", status.pattern));
    }
    reply::block(
        "status",
        &format!("{} is running\n{}", status.pattern, status.processes.join("\n")),
    )
}

fn render_stop(result: &StopResult) -> String {
    if result.stopped {
        return reply::success(&format!("Stopped {}", result.pattern));
    }
    reply::error(&format!(
        "{} still has {} process(es)\n{}",
        result.pattern,
        result.remaining.len(),
        result.remaining.join("\n")
    ))
}

#[derive(Clone)]
pub struct ScriptManager {
    logger: Logger,
    engine: Arc<ExecutionEngine>,
}

impl ScriptManager {
    pub fn new(logger: Logger, engine: Arc<ExecutionEngine>) -> Self {
        Self {
            logger: logger.child("scripts"),
            engine,
        }
    }

    pub async fn handle_command(&self, command: Command) -> Result<String, ToolError> {
        match command {
            Command::Run { name, args } => {
                let result = self.engine.run_file(&name, &args, None).await;
                Ok(render_run(&result))
            }
            Command::Status { name } => {
                let status = self.engine.process_status(&name).await?;
                Ok(render_status(&status))
            }
            Command::Running => {
                let status = self.engine.running_scripts().await?;
                if status.processes.is_empty() {
                    return Ok(reply::block("running", "No scripts running"));
                }
                Ok(reply::block("running", &status.processes.join("\n")))
            }
            Command::Kill { pattern } => {
                let result = self.engine.stop_process(&pattern).await?;
                Ok(render_stop(&result))
            }
            Command::KillAll => {
                let result = self.engine.stop_all().await?;
                self.logger.info(
                    "Stop all requested",
                    Some(&serde_json::json!({"stopped": result.stopped})),
                );
                Ok(render_stop(&result))
            }
            Command::Logs { key, lines } => {
                let content = self.engine.tail_log(&key, lines).await?;
                Ok(reply::block(&format!("{}.log", key), &content))
            }
            Command::LastLog => match self.engine.last_log(limits::LAST_LOG_LINES).await? {
                Some((name, content)) => Ok(reply::block(&name, &content)),
                None => Ok(reply::block("lastlog", "No logs yet")),
            },
            other => Err(ToolError::internal(format!(
                "scripts handler cannot serve {:?}",
                other
            ))),
        }
    }
}

#[async_trait::async_trait]
impl crate::managers::commands::CommandHandler for ScriptManager {
    async fn handle(&self, _operator: &str, command: Command) -> Result<String, ToolError> {
        self.handle_command(command).await
    }
}
