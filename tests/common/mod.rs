#![allow(dead_code)]

use once_cell::sync::Lazy;
use scriptops::errors::ToolError;
use scriptops::services::execution::LaunchSettings;
use scriptops::services::remote::{CommandOutput, Connection, Connector};
use scriptops::services::settings::Settings;
use scriptops::services::ssh_connector::SshProfile;
use scriptops::utils::retry::RetryPolicy;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

pub static ENV_LOCK: Lazy<AsyncMutex<()>> = Lazy::new(|| AsyncMutex::new(()));

pub fn tmp_dir(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, uuid::Uuid::new_v4()))
}

type Rule = Box<dyn Fn(&str, &[String]) -> Option<Result<CommandOutput, ToolError>> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    commands: Vec<String>,
    connects: usize,
    failing_connects: usize,
    connection_alive: bool,
    rules: Vec<Rule>,
}

/// Scripted remote host. Rules are tried in insertion order against each
/// command (plus everything run before it); unmatched commands succeed with
/// empty output.
#[derive(Clone, Default)]
pub struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    pub fn rule(
        &self,
        rule: impl Fn(&str, &[String]) -> Option<Result<CommandOutput, ToolError>> + Send + Sync + 'static,
    ) {
        self.state.lock().expect("fake state").rules.push(Box::new(rule));
    }

    pub fn respond(&self, needle: &'static str, output: &str, exit_code: i32) {
        let output = output.to_string();
        self.rule(move |command, _| {
            command.contains(needle).then(|| {
                Ok(CommandOutput {
                    output: output.clone(),
                    exit_code,
                })
            })
        });
    }

    /// `ps` lists a line carrying the grep pattern, so every launch confirms.
    pub fn ps_always_running(&self) {
        self.rule(|command, _| {
            command.starts_with("ps aux").then(|| {
                Ok(CommandOutput {
                    output: format!("root 4242 0.0 0.1 {}\n", command),
                    exit_code: 0,
                })
            })
        });
    }

    /// `ps` finds nothing.
    pub fn ps_never_running(&self) {
        self.respond("ps aux", "", 1);
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().expect("fake state").failing_connects = count;
    }

    pub fn drop_connection(&self) {
        self.state.lock().expect("fake state").connection_alive = false;
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().expect("fake state").commands.clone()
    }

    pub fn command_count(&self) -> usize {
        self.state.lock().expect("fake state").commands.len()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().expect("fake state").connects
    }
}

impl Connector for FakeRemote {
    fn host_key(&self) -> String {
        "fake@remote:22".to_string()
    }

    fn connect(&self) -> Result<Box<dyn Connection>, ToolError> {
        let mut state = self.state.lock().expect("fake state");
        state.connects += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(ToolError::connection("connection refused"));
        }
        state.connection_alive = true;
        Ok(Box::new(FakeConnection {
            state: self.state.clone(),
        }))
    }
}

struct FakeConnection {
    state: Arc<Mutex<FakeState>>,
}

impl Connection for FakeConnection {
    fn is_alive(&mut self) -> bool {
        self.state.lock().expect("fake state").connection_alive
    }

    fn run(&mut self, command: &str, _timeout: Duration) -> Result<CommandOutput, ToolError> {
        let mut state = self.state.lock().expect("fake state");
        let reply = state
            .rules
            .iter()
            .find_map(|rule| rule(command, &state.commands));
        state.commands.push(command.to_string());
        reply.unwrap_or_else(|| {
            Ok(CommandOutput {
                output: String::new(),
                exit_code: 0,
            })
        })
    }
}

pub fn instant_launch() -> LaunchSettings {
    LaunchSettings {
        confirm_delay: Duration::ZERO,
        stop_delay: Duration::ZERO,
        ..LaunchSettings::default()
    }
}

pub fn test_settings(state_dir: PathBuf) -> Settings {
    Settings {
        ssh: SshProfile {
            host: "remote".to_string(),
            port: 22,
            username: "fake".to_string(),
            password: Some("secret".to_string()),
            private_key_path: None,
            passphrase: None,
            ready_timeout_ms: 1_000,
            keepalive_interval_ms: 30_000,
            host_key_fingerprint: None,
        },
        exec_timeout: Duration::from_secs(5),
        retry: RetryPolicy::fixed(3, Duration::ZERO),
        rate_window: Duration::from_secs(60),
        rate_max_requests: 20,
        admin_ids: Vec::new(),
        sessions_path: state_dir.join("sessions.json"),
        history_path: state_dir.join("history.json"),
        state_dir,
        session_retention_days: 7,
        launch: instant_launch(),
        max_reply_chars: 3_500,
        allowed_extensions: vec![".py".to_string(), ".sh".to_string(), ".js".to_string(), ".txt".to_string()],
    }
}
