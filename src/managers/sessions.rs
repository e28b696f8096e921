use crate::errors::ToolError;
use crate::managers::commands::Command;
use crate::managers::scripts::render_run;
use crate::services::interactive::InteractiveSessionEngine;
use crate::services::logger::Logger;
use crate::stores::session_store::SessionStatus;
use crate::utils::reply;
use dashmap::DashMap;
use std::sync::Arc;

/// Interactive sessions as seen from the chat. The session an operator
/// created last is their pending one; free text goes there.
#[derive(Clone)]
pub struct SessionManager {
    logger: Logger,
    interactive: Arc<InteractiveSessionEngine>,
    pending: Arc<DashMap<String, String>>,
    retention_days: i64,
}

impl SessionManager {
    pub fn new(
        logger: Logger,
        interactive: Arc<InteractiveSessionEngine>,
        retention_days: i64,
    ) -> Self {
        Self {
            logger: logger.child("sessions"),
            interactive,
            pending: Arc::new(DashMap::new()),
            retention_days,
        }
    }

    pub fn pending_for(&self, operator: &str) -> Option<String> {
        self.pending.get(operator).map(|id| id.value().clone())
    }

    fn create(&self, operator: &str, name: &str, requirements: Vec<String>) -> Result<String, ToolError> {
        let id = self.interactive.create_with_requirements(name, requirements)?;
        match self.interactive.requirement_prompt(&id)? {
            Some(prompt) => {
                self.pending.insert(operator.to_string(), id.clone());
                Ok(reply::block("session", &format!("Session {} created\n{}", id, prompt)))
            }
            None => Ok(reply::success(&format!(
                "Session {} created with no parameters, ready: exec {}",
                id, id
            ))),
        }
    }

    fn submit(&self, operator: &str, id: Option<String>, value: &str) -> Result<String, ToolError> {
        let id = match id.or_else(|| self.pending_for(operator)) {
            Some(id) => id,
            None => {
                return Err(ToolError::validation("Unknown command")
                    .with_hint("Send 'help' for the command list."))
            }
        };
        let outcome = self.interactive.submit_response(&id, value)?;
        if outcome.status != SessionStatus::AwaitingInput {
            self.pending
                .remove_if(operator, |_, pending| pending == &outcome.session_id);
        }
        if outcome.status == SessionStatus::AwaitingInput {
            let prompt = self
                .interactive
                .requirement_prompt(&outcome.session_id)?
                .unwrap_or_default();
            return Ok(reply::block("session", &prompt));
        }
        let message = outcome.message.unwrap_or_default();
        if outcome.status == SessionStatus::Complete {
            return Ok(reply::success(&format!(
                "{}\nexec {}",
                message, outcome.session_id
            )));
        }
        Ok(reply::block("session", &message))
    }

    fn prompt(&self, id: &str) -> Result<String, ToolError> {
        match self.interactive.requirement_prompt(id)? {
            Some(prompt) => Ok(reply::block("session", &prompt)),
            None => Ok(reply::block("session", &format!("Session {} needs no more input", id))),
        }
    }

    async fn execute(&self, operator: &str, id: &str) -> Result<String, ToolError> {
        let result = self.interactive.execute_with_session(id).await?;
        self.pending.remove_if(operator, |_, pending| pending.as_str() == id);
        Ok(render_run(&result))
    }

    fn list(&self) -> String {
        let sessions = self.interactive.store().list_all();
        if sessions.is_empty() {
            return reply::block("sessions", "No sessions");
        }
        let lines: Vec<String> = sessions
            .values()
            .map(|s| {
                format!(
                    "{} {} {} {}/{} runs={} errors={}",
                    s.id,
                    s.filename,
                    s.status.as_str(),
                    s.responses.len(),
                    s.requirements.len(),
                    s.execution_count,
                    s.error_count
                )
            })
            .collect();
        reply::block("sessions", &lines.join("\n"))
    }

    fn delete(&self, id: &str) -> Result<String, ToolError> {
        if !self.interactive.store().delete(id)? {
            return Err(ToolError::session_not_found(id));
        }
        self.pending.retain(|_, pending| pending.as_str() != id);
        Ok(reply::success(&format!("Session {} deleted", id)))
    }

    fn cleanup(&self, days: Option<i64>) -> Result<String, ToolError> {
        let days = days.unwrap_or(self.retention_days);
        let removed = self.interactive.store().cleanup_older_than(days)?;
        let store = self.interactive.store();
        self.pending.retain(|_, pending| store.get(pending.as_str()).is_some());
        self.logger.info(
            "Session cleanup",
            Some(&serde_json::json!({"removed": removed, "days": days})),
        );
        Ok(reply::success(&format!(
            "Removed {} session(s) older than {} day(s)",
            removed, days
        )))
    }

    pub async fn handle_command(&self, operator: &str, command: Command) -> Result<String, ToolError> {
        match command {
            Command::Session { name, requirements } => self.create(operator, &name, requirements),
            Command::Submit { id, value } => self.submit(operator, id, &value),
            Command::Prompt { id } => self.prompt(&id),
            Command::Exec { id } => self.execute(operator, &id).await,
            Command::Sessions => Ok(self.list()),
            Command::DelSession { id } => self.delete(&id),
            Command::Cleanup { days } => self.cleanup(days),
            other => Err(ToolError::internal(format!(
                "sessions handler cannot serve {:?}",
                other
            ))),
        }
    }
}

#[async_trait::async_trait]
impl crate::managers::commands::CommandHandler for SessionManager {
    async fn handle(&self, operator: &str, command: Command) -> Result<String, ToolError> {
        self.handle_command(operator, command).await
    }
}
