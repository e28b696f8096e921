use crate::constants::sessions as session_constants;
use crate::errors::ToolError;
use crate::services::execution::{interpreter_for, ExecutionEngine, RunResult};
use crate::services::logger::Logger;
use crate::services::security::SecurityValidator;
use crate::stores::session_store::{
    Session, SessionKind, SessionPatch, SessionStatus, SessionStore,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOutcome {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn prompt_template(kind: &str) -> &'static str {
    match kind {
        "phone_number" | "phone" => "Send the phone number in international format (e.g. +12025550123).",
        "code" | "verification_code" => "Send the verification code you received.",
        "password" => "Send the account password.",
        "username" => "Send the username.",
        "email" => "Send the email address.",
        "api_key" => "Send the API key.",
        "token" => "Send the access token.",
        _ => "Send the value for this step.",
    }
}

/// Collects the values a script needs before it may run, one requirement at a
/// time, then launches it with those values as positional arguments.
#[derive(Clone)]
pub struct InteractiveSessionEngine {
    logger: Logger,
    security: Arc<SecurityValidator>,
    store: Arc<SessionStore>,
    engine: Arc<ExecutionEngine>,
}

impl InteractiveSessionEngine {
    pub fn new(
        logger: Logger,
        security: Arc<SecurityValidator>,
        store: Arc<SessionStore>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self {
            logger: logger.child("interactive"),
            security,
            store,
            engine,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn create_with_requirements(
        &self,
        filename: &str,
        requirements: Vec<String>,
    ) -> Result<String, ToolError> {
        self.security.validate_filename(filename)?;
        if interpreter_for(filename).is_none() {
            return Err(ToolError::validation(format!(
                "{} is not an executable script (.py, .sh, .js)",
                filename
            )));
        }
        let requirements: Vec<String> = requirements
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if let Some(dup) = requirements
            .iter()
            .enumerate()
            .find(|&(i, r)| requirements[..i].contains(r))
            .map(|(_, r)| r)
        {
            return Err(ToolError::validation(format!(
                "Requirement '{}' is listed more than once",
                dup
            ))
            .with_hint("Each requirement kind may appear once per session."));
        }
        let next = if requirements.is_empty() {
            SessionStatus::Complete
        } else {
            SessionStatus::AwaitingInput
        };
        let id = self
            .store
            .create(filename, SessionKind::Interactive, requirements)?;
        self.store.update(&id, SessionPatch::status(next))?;
        self.logger.info(
            "Interactive session created",
            Some(&serde_json::json!({"session_id": id, "filename": filename, "status": next})),
        );
        Ok(id)
    }

    pub fn requirement_prompt(&self, id: &str) -> Result<Option<String>, ToolError> {
        let session = self.load(id)?;
        Ok(render_prompt(&session))
    }

    pub fn submit_response(&self, id: &str, value: &str) -> Result<SubmitOutcome, ToolError> {
        let session = self.load(id)?;
        let index = session.current_index();
        if session.status.is_terminal()
            || session.status == SessionStatus::Complete
            || index >= session.requirements.len()
        {
            return Ok(SubmitOutcome {
                session_id: session.id,
                status: session.status,
                message: Some("All parameters already submitted".to_string()),
            });
        }

        let kind = &session.requirements[index];
        let mut responses = session.responses.clone();
        responses.insert(kind, value);
        let finished = index + 1 >= session.requirements.len();
        let status = if finished {
            SessionStatus::Complete
        } else {
            SessionStatus::AwaitingInput
        };
        let updated = self.store.update(
            id,
            SessionPatch {
                status: Some(status),
                responses: Some(responses),
                ..SessionPatch::default()
            },
        )?;
        self.logger.debug(
            "Session response stored",
            Some(&serde_json::json!({"session_id": id, "kind": kind, "status": status})),
        );
        Ok(SubmitOutcome {
            session_id: updated.id,
            status: updated.status,
            message: finished.then(|| "All parameters collected, ready to execute".to_string()),
        })
    }

    pub async fn execute_with_session(&self, id: &str) -> Result<RunResult, ToolError> {
        let session = self.load(id)?;
        if session.status != SessionStatus::Complete {
            return Err(ToolError::session_not_ready(format!(
                "Session {} is {}, not complete",
                id,
                session.status.as_str()
            )));
        }
        let args: Vec<String> = session.responses.values().map(str::to_string).collect();
        let result = self
            .engine
            .run_file(&session.filename, &args, Some(&session.id))
            .await;

        if result.is_success() {
            self.store.update(
                id,
                SessionPatch {
                    status: Some(SessionStatus::Executed),
                    execution_count: Some(session.execution_count + 1),
                    last_execution: Some(Utc::now()),
                    ..SessionPatch::default()
                },
            )?;
        } else {
            let errors = session.error_count + 1;
            let status = (errors >= session_constants::MAX_EXECUTION_ERRORS)
                .then_some(SessionStatus::Failed);
            self.store.update(
                id,
                SessionPatch {
                    status,
                    error_count: Some(errors),
                    ..SessionPatch::default()
                },
            )?;
            self.logger.warn(
                "Session execution failed",
                Some(&serde_json::json!({"session_id": id, "error_count": errors})),
            );
        }
        Ok(result)
    }

    fn load(&self, id: &str) -> Result<Session, ToolError> {
        self.store
            .get(id)
            .ok_or_else(|| ToolError::session_not_found(id))
    }
}

pub fn render_prompt(session: &Session) -> Option<String> {
    let index = session.current_index();
    let kind = session.requirements.get(index)?;
    Some(format!(
        "{}\nStep {}/{} ({})\nSession: {}",
        prompt_template(kind),
        index + 1,
        session.requirements.len(),
        kind,
        session.id
    ))
}

#[cfg(test)]
mod tests {
    use super::prompt_template;

    #[test]
    fn unknown_kinds_fall_back_to_generic_prompt() {
        assert_eq!(prompt_template("shoe_size"), "Send the value for this step.");
        assert!(prompt_template("phone_number").contains("phone number"));
        assert_eq!(prompt_template("code"), prompt_template("verification_code"));
    }
}
