use crate::errors::ToolError;
use crate::managers;
use crate::managers::commands::{CommandHandler, CommandManager};
use crate::services::execution::ExecutionEngine;
use crate::services::interactive::InteractiveSessionEngine;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::remote::{Connector, RemoteConnectionManager};
use crate::services::security::SecurityValidator;
use crate::services::settings::Settings;
use crate::services::ssh_connector::SshConnector;
use crate::stores::history_store::ExecutionHistory;
use crate::stores::session_store::SessionStore;
use std::collections::HashMap;
use std::sync::Arc;

pub struct App {
    pub logger: Logger,
    pub commands: Arc<CommandManager>,
    pub remote: Arc<RemoteConnectionManager>,
    pub sessions: Arc<SessionStore>,
    pub history: Arc<ExecutionHistory>,
}

impl App {
    pub fn initialize(logger: Logger, settings: Settings) -> Result<Self, ToolError> {
        let connector: Arc<dyn Connector> = Arc::new(SshConnector::new(settings.ssh.clone()));
        Self::build(logger, &settings, connector)
    }

    /// Wires every component around the given connector.
    pub fn build(
        logger: Logger,
        settings: &Settings,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ToolError> {
        let security = Arc::new(SecurityValidator::with_rules(
            settings.allowed_extensions.clone(),
            crate::constants::security::DANGEROUS_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        ));
        let remote = Arc::new(RemoteConnectionManager::new(
            logger.clone(),
            connector,
            settings.retry.clone(),
            settings.exec_timeout,
        ));
        let sessions = Arc::new(SessionStore::new(logger.clone(), settings.sessions_path.clone()));
        let history = Arc::new(ExecutionHistory::new(logger.clone(), settings.history_path.clone()));

        match sessions.cleanup_older_than(settings.session_retention_days) {
            Ok(removed) if removed > 0 => logger.info(
                "Startup session cleanup",
                Some(&serde_json::json!({"removed": removed})),
            ),
            Ok(_) => {}
            Err(err) => logger.warn(
                "Startup session cleanup failed",
                Some(&serde_json::json!({"error": err.message})),
            ),
        }

        let engine = Arc::new(ExecutionEngine::new(
            logger.clone(),
            security.clone(),
            remote.clone(),
            history.clone(),
            settings.launch.clone(),
        ));
        let interactive = Arc::new(InteractiveSessionEngine::new(
            logger.clone(),
            security.clone(),
            sessions.clone(),
            engine.clone(),
        ));

        let file_manager = Arc::new(managers::files::FileManager::new(
            logger.clone(),
            security.clone(),
            remote.clone(),
            settings.launch.files_dir.clone(),
        ));
        let script_manager = Arc::new(managers::scripts::ScriptManager::new(
            logger.clone(),
            engine.clone(),
        ));
        let session_manager = Arc::new(managers::sessions::SessionManager::new(
            logger.clone(),
            interactive,
            settings.session_retention_days,
        ));
        let system_manager = Arc::new(managers::system::SystemManager::new(
            logger.clone(),
            security,
            remote.clone(),
            history.clone(),
            settings.launch.files_dir.clone(),
        ));

        let mut handlers: HashMap<String, Arc<dyn CommandHandler>> = HashMap::new();
        handlers.insert("files".to_string(), file_manager);
        handlers.insert("scripts".to_string(), script_manager);
        handlers.insert("sessions".to_string(), session_manager);
        handlers.insert("system".to_string(), system_manager);

        let commands = Arc::new(CommandManager::new(
            logger.clone(),
            RateLimiter::new(settings.rate_window, settings.rate_max_requests),
            settings.admin_ids.clone(),
            handlers,
            settings.max_reply_chars,
        ));

        logger.info(
            "Application ready",
            Some(&serde_json::json!({
                "host": remote.host_key(),
                "state_dir": settings.state_dir,
                "admins": settings.admin_ids.len(),
            })),
        );

        Ok(Self {
            logger,
            commands,
            remote,
            sessions,
            history,
        })
    }
}
