use crate::errors::ToolError;
use crate::managers::commands::Command;
use crate::services::logger::Logger;
use crate::services::remote::RemoteConnectionManager;
use crate::services::security::SecurityValidator;
use crate::utils::reply;
use crate::utils::shell::shell_quote;
use std::sync::Arc;

/// Remote files directory: listing, create, write, delete, show.
#[derive(Clone)]
pub struct FileManager {
    logger: Logger,
    security: Arc<SecurityValidator>,
    remote: Arc<RemoteConnectionManager>,
    files_dir: String,
}

impl FileManager {
    pub fn new(
        logger: Logger,
        security: Arc<SecurityValidator>,
        remote: Arc<RemoteConnectionManager>,
        files_dir: String,
    ) -> Self {
        Self {
            logger: logger.child("files"),
            security,
            remote,
            files_dir,
        }
    }

    fn path_of(&self, name: &str) -> Result<String, ToolError> {
        self.security.validate_filename(name)?;
        Ok(format!("{}/{}", self.files_dir.trim_end_matches('/'), name))
    }

    async fn run(&self, command: &str) -> Result<String, ToolError> {
        Ok(self.remote.execute_default(command).await.into_result()?.output)
    }

    pub async fn list(&self) -> Result<String, ToolError> {
        let out = self
            .run(&format!("ls -la {} 2>&1", shell_quote(&self.files_dir)))
            .await?;
        Ok(reply::block("files", out.trim_end()))
    }

    pub async fn create(&self, name: &str) -> Result<String, ToolError> {
        let path = self.path_of(name)?;
        self.run(&format!(
            "mkdir -p {} && touch {}",
            shell_quote(&self.files_dir),
            shell_quote(&path)
        ))
        .await?;
        Ok(reply::success(&format!("{} created", name)))
    }

    pub async fn save(&self, name: &str, content: &str) -> Result<String, ToolError> {
        let path = self.path_of(name)?;
        self.run(&format!(
            "mkdir -p {} && printf '%s\\n' {} > {}",
            shell_quote(&self.files_dir),
            shell_quote(content),
            shell_quote(&path)
        ))
        .await?;
        self.logger.info(
            "File saved",
            Some(&serde_json::json!({"filename": name, "bytes": content.len()})),
        );
        Ok(reply::success(&format!("{} saved ({} bytes)", name, content.len())))
    }

    pub async fn delete(&self, name: &str) -> Result<String, ToolError> {
        let path = self.path_of(name)?;
        self.run(&format!("rm -f {}", shell_quote(&path))).await?;
        self.logger.info("File deleted", Some(&serde_json::json!({"filename": name})));
        Ok(reply::success(&format!("{} deleted", name)))
    }

    pub async fn show(&self, name: &str) -> Result<String, ToolError> {
        let path = self.path_of(name)?;
        let out = self.run(&format!("cat {} 2>&1", shell_quote(&path))).await?;
        Ok(reply::block(name, &out))
    }

    pub async fn handle_command(&self, command: Command) -> Result<String, ToolError> {
        match command {
            Command::Files => self.list().await,
            Command::AddFile { name } => self.create(&name).await,
            Command::Save { name, content } => self.save(&name, &content).await,
            Command::DelFile { name } => self.delete(&name).await,
            Command::Check { name } => self.show(&name).await,
            other => Err(ToolError::internal(format!(
                "files handler cannot serve {:?}",
                other
            ))),
        }
    }
}

#[async_trait::async_trait]
impl crate::managers::commands::CommandHandler for FileManager {
    async fn handle(&self, _operator: &str, command: Command) -> Result<String, ToolError> {
        self.handle_command(command).await
    }
}
