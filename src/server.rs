use crate::app::App;
use crate::errors::ToolError;
use crate::managers::commands::Inbound;
use crate::utils::reply;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

/// Decodes one stdin line. Either `{"operator","command","args"}` or
/// `{"operator","text"}` with the raw chat message.
pub fn parse_line(line: &str) -> Result<Inbound, ToolError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|err| ToolError::validation(format!("Malformed message: {}", err)))?;
    if let Some(text) = value.get("text").and_then(|v| v.as_str()) {
        let operator = value
            .get("operator")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default();
        return Ok(Inbound::from_text(&operator, text));
    }
    let mut inbound: Inbound = serde_json::from_value(value)
        .map_err(|err| ToolError::validation(format!("Malformed message: {}", err)))?;
    inbound.operator = inbound.operator.trim().to_string();
    Ok(inbound)
}

pub async fn run_stdio(app: &App) -> Result<(), ToolError> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin).lines();
    let mut writer = BufWriter::new(stdout);

    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|err| ToolError::internal(err.to_string()))?
    {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let text = match parse_line(trimmed) {
            Ok(inbound) => app.commands.handle(&inbound).await,
            Err(err) => reply::error(&err.message),
        };
        let payload = serde_json::to_string(&serde_json::json!({"reply": text}))?;
        writer.write_all(payload.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }

    app.remote.disconnect().await;
    app.logger.info("Input closed, shutting down", None);
    Ok(())
}
