use std::env;
use std::path::PathBuf;

fn normalize_env_path(value: Option<String>) -> Option<PathBuf> {
    let raw = value?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if lowered == "undefined" || lowered == "null" {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn resolve_xdg_state_dir() -> Option<PathBuf> {
    if let Some(path) = normalize_env_path(env::var("XDG_STATE_HOME").ok()) {
        return Some(path);
    }
    env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("state"))
}

pub fn resolve_state_dir() -> PathBuf {
    if let Some(path) = normalize_env_path(env::var("SCRIPTOPS_STATE_DIR").ok()) {
        return path;
    }
    if let Some(path) = resolve_xdg_state_dir() {
        return path.join("scriptops");
    }
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn resolve_sessions_path(state_dir: &std::path::Path) -> PathBuf {
    normalize_env_path(env::var("SCRIPTOPS_SESSIONS_PATH").ok())
        .unwrap_or_else(|| state_dir.join("sessions.json"))
}

pub fn resolve_history_path(state_dir: &std::path::Path) -> PathBuf {
    normalize_env_path(env::var("SCRIPTOPS_HISTORY_PATH").ok())
        .unwrap_or_else(|| state_dir.join("history.json"))
}

/// `~/...` in configured key paths.
pub fn expand_home_path(raw: &str) -> String {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(rest).to_string_lossy().to_string();
        }
    }
    raw.to_string()
}
