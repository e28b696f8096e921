use crate::constants::{
    launch as launch_constants, limits, network as network_constants,
    rate_limit as rate_constants, retry as retry_constants, security as security_constants,
    sessions as session_constants,
};
use crate::errors::ToolError;
use crate::services::execution::LaunchSettings;
use crate::services::ssh_connector::{normalize_fingerprint_sha256, SshProfile};
use crate::utils::paths::{expand_home_path, resolve_history_path, resolve_sessions_path, resolve_state_dir};
use crate::utils::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

fn read_env_string(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

fn read_env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Out-of-range retention falls back to the default instead of wiping or
/// overflowing the session table at startup.
fn read_env_retention_days() -> i64 {
    std::env::var("SCRIPTOPS_SESSION_RETENTION_DAYS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .and_then(|v| i64::try_from(v).ok())
        .filter(|days| {
            (session_constants::MIN_RETENTION_DAYS..=session_constants::MAX_RETENTION_DAYS)
                .contains(days)
        })
        .unwrap_or(session_constants::RETENTION_DAYS)
}

fn read_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn read_env_list(key: &str) -> Option<Vec<String>> {
    let raw = read_env_string(key)?;
    Some(
        raw.split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
    )
}

/// Everything the binary needs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub ssh: SshProfile,
    pub exec_timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_window: Duration,
    pub rate_max_requests: usize,
    pub admin_ids: Vec<String>,
    pub state_dir: PathBuf,
    pub sessions_path: PathBuf,
    pub history_path: PathBuf,
    pub session_retention_days: i64,
    pub launch: LaunchSettings,
    pub max_reply_chars: usize,
    pub allowed_extensions: Vec<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ToolError> {
        let host = read_env_string("SCRIPTOPS_SSH_HOST").ok_or_else(|| {
            ToolError::validation("SCRIPTOPS_SSH_HOST is not set")
                .with_hint("Set SCRIPTOPS_SSH_HOST (and SCRIPTOPS_SSH_USER) to the remote host.")
        })?;
        let port = match read_env_string("SCRIPTOPS_SSH_PORT") {
            Some(raw) => raw
                .parse::<u16>()
                .map_err(|_| ToolError::validation(format!("Invalid SCRIPTOPS_SSH_PORT: {}", raw)))?,
            None => network_constants::SSH_DEFAULT_PORT,
        };
        let password = read_env_string("SCRIPTOPS_SSH_PASSWORD");
        let private_key_path =
            read_env_string("SCRIPTOPS_SSH_PRIVATE_KEY_PATH").map(|p| expand_home_path(&p));
        if password.is_none() && private_key_path.is_none() {
            return Err(ToolError::validation("No SSH credential configured").with_hint(
                "Set SCRIPTOPS_SSH_PASSWORD or SCRIPTOPS_SSH_PRIVATE_KEY_PATH.",
            ));
        }
        let ssh = SshProfile {
            host,
            port,
            username: read_env_string("SCRIPTOPS_SSH_USER").unwrap_or_else(|| "root".to_string()),
            password,
            private_key_path,
            passphrase: read_env_string("SCRIPTOPS_SSH_PASSPHRASE"),
            ready_timeout_ms: read_env_u64(
                "SCRIPTOPS_SSH_READY_TIMEOUT_MS",
                network_constants::TIMEOUT_SSH_READY_MS,
            ),
            keepalive_interval_ms: read_env_u64(
                "SCRIPTOPS_SSH_KEEPALIVE_MS",
                network_constants::KEEPALIVE_INTERVAL_MS,
            ),
            host_key_fingerprint: read_env_string("SCRIPTOPS_SSH_HOST_KEY_SHA256")
                .and_then(|raw| normalize_fingerprint_sha256(&raw)),
        };

        let max_attempts = read_env_usize("SCRIPTOPS_SSH_MAX_ATTEMPTS", retry_constants::MAX_ATTEMPTS).max(1);
        let retry_delay = Duration::from_millis(read_env_u64(
            "SCRIPTOPS_SSH_RETRY_DELAY_MS",
            retry_constants::BASE_DELAY_MS,
        ));
        let backoff = read_env_string("SCRIPTOPS_SSH_BACKOFF").unwrap_or_else(|| "fixed".to_string());

        let state_dir = resolve_state_dir();
        let sessions_path = resolve_sessions_path(&state_dir);
        let history_path = resolve_history_path(&state_dir);

        let launch = LaunchSettings {
            files_dir: read_env_string("SCRIPTOPS_REMOTE_FILES_DIR")
                .unwrap_or_else(|| launch_constants::REMOTE_FILES_DIR.to_string()),
            logs_dir: read_env_string("SCRIPTOPS_REMOTE_LOGS_DIR")
                .unwrap_or_else(|| launch_constants::REMOTE_LOGS_DIR.to_string()),
            confirm_delay: Duration::from_millis(read_env_u64(
                "SCRIPTOPS_LAUNCH_CONFIRM_DELAY_MS",
                launch_constants::CONFIRM_DELAY_MS,
            )),
            stop_delay: Duration::from_millis(launch_constants::STOP_CONFIRM_DELAY_MS),
            launch_timeout: Duration::from_millis(read_env_u64(
                "SCRIPTOPS_LAUNCH_TIMEOUT_MS",
                network_constants::TIMEOUT_SSH_LAUNCH_MS,
            )),
        };

        Ok(Self {
            ssh,
            exec_timeout: Duration::from_millis(read_env_u64(
                "SCRIPTOPS_EXEC_TIMEOUT_MS",
                network_constants::TIMEOUT_SSH_EXEC_DEFAULT_MS,
            )),
            retry: RetryPolicy::from_name(&backoff, max_attempts, retry_delay),
            rate_window: Duration::from_millis(read_env_u64(
                "SCRIPTOPS_RATE_LIMIT_WINDOW_MS",
                rate_constants::WINDOW_MS,
            )),
            rate_max_requests: read_env_usize("SCRIPTOPS_RATE_LIMIT_MAX", rate_constants::MAX_REQUESTS),
            admin_ids: read_env_list("SCRIPTOPS_ADMIN_IDS").unwrap_or_default(),
            state_dir,
            sessions_path,
            history_path,
            session_retention_days: read_env_retention_days(),
            launch,
            max_reply_chars: read_env_usize("SCRIPTOPS_MAX_REPLY_CHARS", limits::MAX_REPLY_CHARS),
            allowed_extensions: read_env_list("SCRIPTOPS_ALLOWED_EXTENSIONS").unwrap_or_else(|| {
                security_constants::ALLOWED_EXTENSIONS
                    .iter()
                    .map(|ext| ext.to_string())
                    .collect()
            }),
        })
    }

    /// Overrides the state directory and re-derives the store paths under it.
    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.sessions_path = dir.join("sessions.json");
        self.history_path = dir.join("history.json");
        self.state_dir = dir;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::read_env_list;

    #[test]
    fn env_lists_drop_blank_items() {
        std::env::set_var("SCRIPTOPS_TEST_LIST_A", " 1, ,2 ,");
        assert_eq!(
            read_env_list("SCRIPTOPS_TEST_LIST_A"),
            Some(vec!["1".to_string(), "2".to_string()])
        );
        std::env::set_var("SCRIPTOPS_TEST_LIST_A", "   ");
        assert_eq!(read_env_list("SCRIPTOPS_TEST_LIST_A"), None);
        std::env::remove_var("SCRIPTOPS_TEST_LIST_A");
    }
}
