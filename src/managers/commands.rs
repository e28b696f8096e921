use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::constants::limits;
use crate::constants::sessions as session_constants;
use crate::errors::{ToolError, ToolErrorKind};
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::utils::reply;

/// One message from the chat front-end.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Inbound {
    pub operator: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: String,
}

impl Inbound {
    pub fn new(operator: &str, command: &str, args: &str) -> Self {
        Self {
            operator: operator.to_string(),
            command: command.to_string(),
            args: args.to_string(),
        }
    }

    /// Splits raw chat text into command word and the rest.
    pub fn from_text(operator: &str, text: &str) -> Self {
        let trimmed = text.trim_start();
        let split = trimmed
            .find(char::is_whitespace)
            .unwrap_or(trimmed.len());
        Self::new(operator, &trimmed[..split], trimmed[split..].trim_start_matches(' '))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Files,
    Running,
    LastLog,
    Logs { key: String, lines: usize },
    AddFile { name: String },
    Save { name: String, content: String },
    DelFile { name: String },
    Check { name: String },
    Run { name: String, args: Vec<String> },
    Status { name: String },
    Kill { pattern: String },
    KillAll,
    Shell { command: String },
    Python { code: String },
    Ping,
    Stats,
    History { limit: usize },
    Session { name: String, requirements: Vec<String> },
    Submit { id: Option<String>, value: String },
    Prompt { id: String },
    Exec { id: String },
    Sessions,
    DelSession { id: String },
    Cleanup { days: Option<i64> },
}

fn required(args: &str, usage: &str) -> Result<String, ToolError> {
    let value = args.trim();
    if value.is_empty() {
        return Err(ToolError::validation(format!("Usage: {}", usage)));
    }
    Ok(value.to_string())
}

fn first_word(args: &str, usage: &str) -> Result<(String, String), ToolError> {
    let value = required(args, usage)?;
    let mut parts = value.splitn(2, char::is_whitespace);
    let head = parts.next().unwrap_or_default().to_string();
    let rest = parts.next().unwrap_or_default().trim().to_string();
    Ok((head, rest))
}

fn parse_count<T: std::str::FromStr>(raw: &str, what: &str) -> Result<Option<T>, ToolError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| ToolError::validation(format!("{} must be a positive number, got '{}'", what, raw)))
}

fn parse_days(raw: &str) -> Result<Option<i64>, ToolError> {
    let Some(days) = parse_count::<u32>(raw, "days")? else {
        return Ok(None);
    };
    let days = i64::from(days);
    if !(session_constants::MIN_RETENTION_DAYS..=session_constants::MAX_RETENTION_DAYS).contains(&days) {
        return Err(ToolError::validation(format!(
            "days must be between {} and {}, got {}",
            session_constants::MIN_RETENTION_DAYS,
            session_constants::MAX_RETENTION_DAYS,
            days
        )));
    }
    Ok(Some(days))
}

impl Command {
    /// Resolves the command word (aliases included). Unknown words are free
    /// text meant for the operator's pending session.
    pub fn parse(name: &str, args: &str) -> Result<Command, ToolError> {
        let command = match name.trim().to_lowercase().as_str() {
            "help" | "start" => Command::Help,
            "files" | "filelist" => Command::Files,
            "running" | "runlist" => Command::Running,
            "lastlog" | "lastlag" => Command::LastLog,
            "logs" | "log" => {
                let (key, rest) = first_word(args, "logs <key> [lines]")?;
                let lines = parse_count::<usize>(&rest, "lines")?
                    .unwrap_or(limits::DEFAULT_TAIL_LINES);
                Command::Logs { key, lines }
            }
            "addfile" => Command::AddFile {
                name: required(args, "addfile <name>")?,
            },
            "save" | "adsor" => {
                let (head, content) = match args.split_once('\n') {
                    Some((head, content)) => (head.trim().to_string(), content.to_string()),
                    None => (args.trim().to_string(), String::new()),
                };
                if head.is_empty() || content.is_empty() {
                    return Err(ToolError::validation("Usage: save <name>\\n<content>")
                        .with_hint("Put the file content on the lines after the file name."));
                }
                Command::Save { name: head, content }
            }
            "delfile" | "rmfile" => Command::DelFile {
                name: required(args, "delfile <name>")?,
            },
            "check" | "cat" => Command::Check {
                name: required(args, "check <name>")?,
            },
            "run" => {
                let (name, rest) = first_word(args, "run <name> [args...]")?;
                let args = rest.split_whitespace().map(str::to_string).collect();
                Command::Run { name, args }
            }
            "status" => Command::Status {
                name: required(args, "status <name>")?,
            },
            "kill" => {
                let pattern = required(args, "kill <pattern> | kill all")?;
                if pattern.eq_ignore_ascii_case("all") {
                    Command::KillAll
                } else {
                    Command::Kill { pattern }
                }
            }
            "sh" | "trpy" => Command::Shell {
                command: required(args, "sh <command>")?,
            },
            "py" => Command::Python {
                code: required(args, "py <code>")?,
            },
            "ping" | "pingserver" => Command::Ping,
            "stats" => Command::Stats,
            "history" => Command::History {
                limit: parse_count::<usize>(args, "limit")?
                    .unwrap_or(crate::constants::history::DEFAULT_RECENT),
            },
            "session" | "newsession" => {
                let (name, rest) = first_word(args, "session <name> <kind,kind,...>")?;
                let requirements = rest
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .map(str::trim)
                    .filter(|kind| !kind.is_empty())
                    .map(str::to_string)
                    .collect();
                Command::Session { name, requirements }
            }
            "submit" => {
                let (id, value) = first_word(args, "submit <id> <value>")?;
                if value.is_empty() {
                    return Err(ToolError::validation("Usage: submit <id> <value>"));
                }
                Command::Submit { id: Some(id), value }
            }
            "prompt" => Command::Prompt {
                id: required(args, "prompt <id>")?,
            },
            "exec" | "execute" => Command::Exec {
                id: required(args, "exec <id>")?,
            },
            "sessions" => Command::Sessions,
            "delsession" => Command::DelSession {
                id: required(args, "delsession <id>")?,
            },
            "cleanup" => Command::Cleanup {
                days: parse_days(args)?,
            },
            _ => {
                let text = format!("{} {}", name.trim(), args.trim());
                let value = text.trim().to_string();
                if value.is_empty() {
                    return Err(ToolError::validation("Empty message"));
                }
                Command::Submit { id: None, value }
            }
        };
        Ok(command)
    }

    /// Name of the handler that owns this command.
    pub fn handler(&self) -> &'static str {
        match self {
            Command::Files
            | Command::AddFile { .. }
            | Command::Save { .. }
            | Command::DelFile { .. }
            | Command::Check { .. } => "files",
            Command::Running
            | Command::LastLog
            | Command::Logs { .. }
            | Command::Run { .. }
            | Command::Status { .. }
            | Command::Kill { .. }
            | Command::KillAll => "scripts",
            Command::Session { .. }
            | Command::Submit { .. }
            | Command::Prompt { .. }
            | Command::Exec { .. }
            | Command::Sessions
            | Command::DelSession { .. }
            | Command::Cleanup { .. } => "sessions",
            Command::Help
            | Command::Shell { .. }
            | Command::Python { .. }
            | Command::Ping
            | Command::Stats
            | Command::History { .. } => "system",
        }
    }
}

pub const HELP_TEXT: &str = "\
files | running | lastlog | logs <key> [lines]
addfile <name> | save <name>\\n<content> | delfile <name> | check <name>
run <name> [args...] | status <name> | kill <pattern> | kill all
sh <command> | py <code> | ping
stats | history [n]
session <name> <kind,...> | submit <id> <value> | prompt <id>
exec <id> | sessions | delsession <id> | cleanup [days]";

#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, operator: &str, command: Command) -> Result<String, ToolError>;
}

/// Admission, authorization and routing in front of the handlers.
///
/// A rate-limited or unauthorized message never reaches a handler, so it
/// costs no remote call and leaves no history record.
#[derive(Clone)]
pub struct CommandManager {
    logger: Logger,
    rate_limiter: RateLimiter,
    admin_ids: Arc<Vec<String>>,
    handlers: Arc<HashMap<String, Arc<dyn CommandHandler>>>,
    max_reply_chars: usize,
}

impl CommandManager {
    pub fn new(
        logger: Logger,
        rate_limiter: RateLimiter,
        admin_ids: Vec<String>,
        handlers: HashMap<String, Arc<dyn CommandHandler>>,
        max_reply_chars: usize,
    ) -> Self {
        Self {
            logger: logger.child("commands"),
            rate_limiter,
            admin_ids: Arc::new(admin_ids),
            handlers: Arc::new(handlers),
            max_reply_chars,
        }
    }

    pub fn is_authorized(&self, operator: &str) -> bool {
        self.admin_ids.is_empty() || self.admin_ids.iter().any(|id| id == operator)
    }

    pub async fn dispatch(&self, inbound: &Inbound) -> Result<String, ToolError> {
        if !self.rate_limiter.is_allowed(&inbound.operator) {
            let wait = self.rate_limiter.retry_after(&inbound.operator);
            return Err(ToolError::rate_limited(format!(
                "Too many requests, retry in {} s",
                wait.as_secs().max(1)
            )));
        }
        if !self.is_authorized(&inbound.operator) {
            self.logger.warn(
                "Unauthorized operator",
                Some(&serde_json::json!({"operator": inbound.operator, "command": inbound.command})),
            );
            return Err(ToolError::denied("Unauthorized"));
        }

        let command = Command::parse(&inbound.command, &inbound.args)?;
        if command == Command::Help {
            return Ok(reply::block("commands", HELP_TEXT));
        }
        let name = command.handler();
        let handler = self.handlers.get(name).ok_or_else(|| {
            ToolError::internal(format!("No handler registered for '{}'", name))
        })?;
        self.logger.debug(
            "Dispatching command",
            Some(&serde_json::json!({"operator": inbound.operator, "handler": name})),
        );
        handler.handle(&inbound.operator, command).await
    }

    /// Always produces a reply; failures are rendered, never propagated.
    pub async fn handle(&self, inbound: &Inbound) -> String {
        let text = match self.dispatch(inbound).await {
            Ok(text) => text,
            Err(err) => {
                if !matches!(err.kind, ToolErrorKind::Validation | ToolErrorKind::RateLimited) {
                    self.logger.warn(
                        "Command failed",
                        Some(&serde_json::json!({
                            "operator": inbound.operator,
                            "command": inbound.command,
                            "kind": err.kind,
                            "error": err.message,
                        })),
                    );
                }
                let mut message = err.message;
                if let Some(hint) = err.hint {
                    message = format!("{}\n{}", message, hint);
                }
                reply::error(&message)
            }
        };
        reply::truncate(&text, self.max_reply_chars)
    }
}
