use crate::constants::security::{ALLOWED_EXTENSIONS, DANGEROUS_PATTERNS};
use crate::errors::ToolError;

/// Allow/deny checks applied before anything is sent to the remote host.
///
/// `validate_command` is a substring deny-list over the lowercased command.
/// It catches the usual destructive one-liners and nothing more; it is not a
/// shell parser and passing it says nothing about the command being safe.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    allowed_extensions: Vec<String>,
    dangerous_patterns: Vec<String>,
}

impl SecurityValidator {
    pub fn new() -> Self {
        Self::with_rules(
            ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
            DANGEROUS_PATTERNS.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_rules(allowed_extensions: Vec<String>, dangerous_patterns: Vec<String>) -> Self {
        let allowed_extensions = allowed_extensions
            .into_iter()
            .map(|ext| ext.trim().to_lowercase())
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{}", ext)
                }
            })
            .collect();
        let dangerous_patterns = dangerous_patterns
            .into_iter()
            .map(|p| p.to_lowercase())
            .filter(|p| !p.trim().is_empty())
            .collect();
        Self {
            allowed_extensions,
            dangerous_patterns,
        }
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn validate_filename(&self, name: &str) -> Result<(), ToolError> {
        if name.trim().is_empty() {
            return Err(ToolError::validation("Filename must not be empty"));
        }
        if name.contains("..") {
            return Err(ToolError::validation(format!(
                "Filename '{}' must not contain '..'",
                name
            )));
        }
        if name.contains('/') || name.contains('\\') {
            return Err(ToolError::validation(format!(
                "Filename '{}' must not contain path separators",
                name
            )));
        }
        if name.contains('\0') {
            return Err(ToolError::validation("Filename contains null bytes"));
        }
        let lowered = name.to_lowercase();
        if !self
            .allowed_extensions
            .iter()
            .any(|ext| lowered.ends_with(ext.as_str()))
        {
            return Err(ToolError::validation(format!(
                "Filename '{}' has a disallowed extension",
                name
            ))
            .with_hint(format!("Allowed: {}", self.allowed_extensions.join(" "))));
        }
        Ok(())
    }

    pub fn validate_command(&self, raw: &str) -> Result<(), ToolError> {
        if raw.trim().is_empty() {
            return Err(ToolError::validation("Command must not be empty"));
        }
        if raw.contains('\0') {
            return Err(ToolError::validation("Command contains null bytes"));
        }
        let lowered = raw.to_lowercase();
        if let Some(pattern) = self
            .dangerous_patterns
            .iter()
            .find(|pattern| lowered.contains(pattern.as_str()))
        {
            return Err(ToolError::validation("Command rejected by the deny-list")
                .with_details(serde_json::json!({ "pattern": pattern })));
        }
        Ok(())
    }

    /// Kill targets end up inside a quoted `pkill -f` argument.
    pub fn validate_process_pattern(&self, pattern: &str) -> Result<(), ToolError> {
        self.validate_command(pattern)?;
        if pattern.contains('\'') || pattern.contains('"') || pattern.contains('`') {
            return Err(ToolError::validation(
                "Process pattern must not contain quote characters",
            ));
        }
        if pattern.trim().len() < 2 {
            return Err(ToolError::validation("Process pattern is too short"));
        }
        Ok(())
    }
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self::new()
    }
}
