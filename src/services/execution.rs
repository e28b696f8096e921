use crate::constants::{launch, limits};
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::services::remote::{RemoteConnectionManager, RemoteOutcome};
use crate::services::security::SecurityValidator;
use crate::stores::history_store::{ExecutionHistory, ExecutionStatus};
use crate::utils::shell::{is_safe_log_key, join_quoted, shell_quote};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

static PID_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*(\d+)\s*$").expect("pid regex"));

const ALL_METHODS_EXHAUSTED: &str = "All methods exhausted";

#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub files_dir: String,
    pub logs_dir: String,
    pub confirm_delay: Duration,
    pub stop_delay: Duration,
    pub launch_timeout: Duration,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            files_dir: launch::REMOTE_FILES_DIR.to_string(),
            logs_dir: launch::REMOTE_LOGS_DIR.to_string(),
            confirm_delay: Duration::from_millis(launch::CONFIRM_DELAY_MS),
            stop_delay: Duration::from_millis(launch::STOP_CONFIRM_DELAY_MS),
            launch_timeout: Duration::from_millis(crate::constants::network::TIMEOUT_SSH_LAUNCH_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMethod {
    Detached,
    Screen,
    Foreground,
}

impl LaunchMethod {
    pub const ORDER: [LaunchMethod; 3] = [
        LaunchMethod::Detached,
        LaunchMethod::Screen,
        LaunchMethod::Foreground,
    ];

    pub fn index(self) -> usize {
        match self {
            LaunchMethod::Detached => 1,
            LaunchMethod::Screen => 2,
            LaunchMethod::Foreground => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LaunchMethod::Detached => "nohup background",
            LaunchMethod::Screen => "screen session",
            LaunchMethod::Foreground => "foreground redirect",
        }
    }

    fn build(self, plan: &LaunchPlan) -> String {
        let program = plan.program();
        match self {
            LaunchMethod::Detached => format!(
                "mkdir -p {logs} && cd {files} && nohup sh -c {inner} {ident} > {log} 2>&1 & echo $!",
                logs = shell_quote(&plan.logs_dir),
                files = shell_quote(&plan.files_dir),
                inner = shell_quote(&format!("{}; :", program)),
                ident = shell_quote(&plan.identifier),
                log = shell_quote(&plan.log_file),
            ),
            LaunchMethod::Screen => format!(
                "cd {files} && screen -dmS {ident} {program}",
                files = shell_quote(&plan.files_dir),
                ident = shell_quote(&plan.identifier),
                program = program,
            ),
            LaunchMethod::Foreground => format!(
                "mkdir -p {logs} && cd {files} && {program} > {log} 2>&1",
                logs = shell_quote(&plan.logs_dir),
                files = shell_quote(&plan.files_dir),
                program = program,
                log = shell_quote(&plan.log_file),
            ),
        }
    }
}

struct LaunchPlan {
    interpreter: &'static str,
    script_path: String,
    args: Vec<String>,
    identifier: String,
    files_dir: String,
    logs_dir: String,
    log_file: String,
}

impl LaunchPlan {
    fn program(&self) -> String {
        let mut parts = vec![self.interpreter.to_string(), shell_quote(&self.script_path)];
        if !self.args.is_empty() {
            parts.push(join_quoted(self.args.iter().map(String::as_str)));
        }
        parts.join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    fn error(message: impl Into<String>, session_id: Option<&str>) -> Self {
        Self {
            status: RunStatus::Error,
            message: message.into(),
            session_id: session_id.map(str::to_string),
            log_file: None,
            method: None,
            pid: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessStatus {
    pub pattern: String,
    pub running: bool,
    pub processes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StopResult {
    pub pattern: String,
    pub stopped: bool,
    pub remaining: Vec<String>,
}

pub fn interpreter_for(filename: &str) -> Option<&'static str> {
    let lowered = filename.to_lowercase();
    if lowered.ends_with(".py") {
        Some("python3")
    } else if lowered.ends_with(".sh") {
        Some("bash")
    } else if lowered.ends_with(".js") {
        Some("node")
    } else {
        None
    }
}

/// Starts scripts on the remote host and confirms them by polling `ps`.
///
/// Confirmation is a substring match of the session id (or filename) in the
/// filtered process table, so an unrelated process carrying the same text
/// counts as a successful launch.
#[derive(Clone)]
pub struct ExecutionEngine {
    logger: Logger,
    security: Arc<SecurityValidator>,
    remote: Arc<RemoteConnectionManager>,
    history: Arc<ExecutionHistory>,
    settings: LaunchSettings,
}

impl ExecutionEngine {
    pub fn new(
        logger: Logger,
        security: Arc<SecurityValidator>,
        remote: Arc<RemoteConnectionManager>,
        history: Arc<ExecutionHistory>,
        settings: LaunchSettings,
    ) -> Self {
        Self {
            logger: logger.child("engine"),
            security,
            remote,
            history,
            settings,
        }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    pub fn log_path(&self, key: &str) -> String {
        format!("{}/{}.log", self.settings.logs_dir.trim_end_matches('/'), key)
    }

    pub async fn run_file(
        &self,
        filename: &str,
        args: &[String],
        session_id: Option<&str>,
    ) -> RunResult {
        if let Err(err) = self.security.validate_filename(filename) {
            return RunResult::error(err.message, session_id);
        }
        let Some(interpreter) = interpreter_for(filename) else {
            return RunResult::error(
                format!("{} is not an executable script (.py, .sh, .js)", filename),
                session_id,
            );
        };
        if let Some(sid) = session_id {
            if !is_safe_log_key(sid) {
                return RunResult::error(format!("Invalid session id: {}", sid), session_id);
            }
        }

        let identifier = session_id.unwrap_or(filename).to_string();
        let plan = LaunchPlan {
            interpreter,
            script_path: format!("{}/{}", self.settings.files_dir.trim_end_matches('/'), filename),
            args: args.to_vec(),
            log_file: self.log_path(&identifier),
            identifier,
            files_dir: self.settings.files_dir.clone(),
            logs_dir: self.settings.logs_dir.clone(),
        };

        let started = Instant::now();
        for method in LaunchMethod::ORDER {
            let command = method.build(&plan);
            let timeout = match method {
                LaunchMethod::Foreground => self.settings.launch_timeout,
                _ => self.remote.default_timeout(),
            };
            let launch = self.remote.execute(&command, timeout).await;
            tokio::time::sleep(self.settings.confirm_delay).await;

            if self.confirm_launch(method, &launch, &plan.identifier).await {
                let elapsed = started.elapsed().as_secs_f64();
                let pid = match method {
                    LaunchMethod::Detached => parse_pid(&launch.output),
                    _ => None,
                };
                if let Err(err) = self.history.record(
                    filename,
                    session_id,
                    ExecutionStatus::Running,
                    launch.output.len() as u64,
                    elapsed,
                    None,
                ) {
                    self.logger.warn("History record failed", Some(&serde_json::json!({"error": err.message})));
                }
                self.logger.info(
                    "Script started",
                    Some(&serde_json::json!({
                        "filename": filename,
                        "session_id": session_id,
                        "method": method.index(),
                        "pid": pid,
                    })),
                );
                return RunResult {
                    status: RunStatus::Success,
                    message: format!(
                        "{} started via method {} ({})",
                        filename,
                        method.index(),
                        method.label()
                    ),
                    session_id: session_id.map(str::to_string),
                    log_file: Some(plan.log_file.clone()),
                    method: Some(method.index()),
                    pid,
                };
            }
            self.logger.debug(
                "Launch method not confirmed",
                Some(&serde_json::json!({
                    "filename": filename,
                    "method": method.index(),
                    "status": launch.status,
                    "error": launch.error,
                })),
            );
        }

        let elapsed = started.elapsed().as_secs_f64();
        if let Err(err) = self.history.record(
            filename,
            session_id,
            ExecutionStatus::Failed,
            0,
            elapsed,
            Some(ALL_METHODS_EXHAUSTED),
        ) {
            self.logger.warn("History record failed", Some(&serde_json::json!({"error": err.message})));
        }
        self.logger.warn(
            "All launch methods failed",
            Some(&serde_json::json!({"filename": filename, "session_id": session_id})),
        );
        RunResult {
            log_file: Some(plan.log_file),
            ..RunResult::error(
                format!("{}: {}", filename, ALL_METHODS_EXHAUSTED),
                session_id,
            )
        }
    }

    async fn confirm_launch(
        &self,
        method: LaunchMethod,
        launch: &RemoteOutcome,
        identifier: &str,
    ) -> bool {
        if method == LaunchMethod::Foreground
            && launch.is_success()
            && launch.exit_code == Some(0)
        {
            return true;
        }
        match self.list_matching(identifier).await {
            Ok(lines) => !lines.is_empty(),
            Err(_) => false,
        }
    }

    async fn list_matching(&self, pattern: &str) -> Result<Vec<String>, ToolError> {
        let command = format!(
            "ps aux | grep -F -- {} | grep -v grep",
            shell_quote(pattern)
        );
        let output = self.remote.execute_default(&command).await.into_result()?;
        Ok(output
            .output
            .lines()
            .filter(|line| line.contains(pattern))
            .map(str::to_string)
            .collect())
    }

    pub async fn process_status(&self, filename: &str) -> Result<ProcessStatus, ToolError> {
        self.security.validate_filename(filename)?;
        let processes = self.list_matching(filename).await?;
        Ok(ProcessStatus {
            pattern: filename.to_string(),
            running: !processes.is_empty(),
            processes,
        })
    }

    /// Processes started from the remote files directory.
    pub async fn running_scripts(&self) -> Result<ProcessStatus, ToolError> {
        let pattern = format!("{}/", self.settings.files_dir.trim_end_matches('/'));
        let processes = self.list_matching(&pattern).await?;
        Ok(ProcessStatus {
            pattern,
            running: !processes.is_empty(),
            processes,
        })
    }

    pub async fn stop_process(&self, identifier: &str) -> Result<StopResult, ToolError> {
        self.security.validate_process_pattern(identifier)?;
        self.stop_matching(identifier).await
    }

    pub async fn stop_all(&self) -> Result<StopResult, ToolError> {
        let pattern = format!("{}/", self.settings.files_dir.trim_end_matches('/'));
        self.stop_matching(&pattern).await
    }

    async fn stop_matching(&self, pattern: &str) -> Result<StopResult, ToolError> {
        let command = format!("pkill -f -- {}", shell_quote(pattern));
        // pkill exits 1 when nothing matched; only transport failures matter here.
        self.remote.execute_default(&command).await.into_result()?;
        tokio::time::sleep(self.settings.stop_delay).await;
        let remaining = self.list_matching(pattern).await?;
        self.logger.info(
            "Stop requested",
            Some(&serde_json::json!({"pattern": pattern, "remaining": remaining.len()})),
        );
        Ok(StopResult {
            pattern: pattern.to_string(),
            stopped: remaining.is_empty(),
            remaining,
        })
    }

    pub async fn tail_log(&self, key: &str, lines: usize) -> Result<String, ToolError> {
        if !is_safe_log_key(key) {
            return Err(ToolError::validation(format!("Invalid log key: {}", key)));
        }
        let lines = lines.clamp(1, limits::MAX_TAIL_LINES);
        let command = format!(
            "tail -n {} {} 2>&1",
            lines,
            shell_quote(&self.log_path(key))
        );
        Ok(self.remote.execute_default(&command).await.into_result()?.output)
    }

    /// Tail of the most recently modified log file, if any.
    pub async fn last_log(&self, lines: usize) -> Result<Option<(String, String)>, ToolError> {
        let command = format!(
            "ls -t {} 2>/dev/null | head -1",
            shell_quote(&self.settings.logs_dir)
        );
        let newest = self
            .remote
            .execute_default(&command)
            .await
            .into_result()?
            .output
            .trim()
            .to_string();
        if newest.is_empty() {
            return Ok(None);
        }
        let key = newest.strip_suffix(".log").unwrap_or(&newest).to_string();
        let content = self.tail_log(&key, lines).await?;
        Ok(Some((newest, content)))
    }
}

fn parse_pid(output: &str) -> Option<u32> {
    PID_LINE
        .captures_iter(output)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .last()
}
