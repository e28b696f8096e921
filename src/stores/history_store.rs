use crate::constants::history as history_constants;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::{read_json, write_json_atomic, JsonLoad};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub filename: String,
    pub session_id: String,
    pub status: ExecutionStatus,
    pub output_size_bytes: u64,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub total_executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: String,
    pub average_duration_seconds: f64,
}

/// Size-bounded execution log. Past `MAX_RECORDS` entries it keeps only the
/// latest `RETAIN_ON_TRIM`, dropping everything older.
#[derive(Clone)]
pub struct ExecutionHistory {
    logger: Logger,
    file_path: Option<PathBuf>,
    records: Arc<Mutex<Vec<ExecutionRecord>>>,
}

impl ExecutionHistory {
    pub fn new(logger: Logger, file_path: PathBuf) -> Self {
        let logger = logger.child("history");
        let records = match read_json::<Vec<ExecutionRecord>>(&file_path) {
            JsonLoad::Loaded(records) => records,
            JsonLoad::Missing => Vec::new(),
            JsonLoad::Malformed(reason) => {
                logger.warn(
                    "History file unreadable, starting empty",
                    Some(&serde_json::json!({"path": file_path, "error": reason})),
                );
                Vec::new()
            }
        };
        Self {
            logger,
            file_path: Some(file_path),
            records: Arc::new(Mutex::new(records)),
        }
    }

    pub fn in_memory(logger: Logger) -> Self {
        Self {
            logger: logger.child("history"),
            file_path: None,
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(
        &self,
        filename: &str,
        session_id: Option<&str>,
        status: ExecutionStatus,
        output_size_bytes: u64,
        duration_seconds: f64,
        error: Option<&str>,
    ) -> Result<ExecutionRecord, ToolError> {
        let record = ExecutionRecord {
            timestamp: Utc::now(),
            filename: filename.to_string(),
            session_id: session_id
                .unwrap_or(history_constants::DIRECT_SESSION_ID)
                .to_string(),
            status,
            output_size_bytes,
            duration_seconds: (duration_seconds * 100.0).round() / 100.0,
            error: error.map(|e| e.to_string()),
        };
        let mut records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        records.push(record.clone());
        if records.len() > history_constants::MAX_RECORDS {
            let keep_from = records.len() - 1 - history_constants::RETAIN_ON_TRIM;
            records.drain(..keep_from);
        }
        if let Some(path) = self.file_path.as_ref() {
            if let Err(err) = write_json_atomic(path, &*records) {
                self.logger.error(
                    "Failed to persist history",
                    Some(&serde_json::json!({"error": err.to_string()})),
                );
                return Err(ToolError::internal(format!(
                    "Failed to persist history: {}",
                    err
                )));
            }
        }
        Ok(record)
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|err| err.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<ExecutionRecord> {
        let records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn stats(&self) -> HistoryStats {
        let records = self.records.lock().unwrap_or_else(|err| err.into_inner());
        let total = records.len();
        let successful = records
            .iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Running | ExecutionStatus::Success))
            .count();
        let failed = records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Failed)
            .count();
        let (rate, average) = if total == 0 {
            (0.0, 0.0)
        } else {
            let sum: f64 = records.iter().map(|r| r.duration_seconds).sum();
            (
                successful as f64 / total as f64 * 100.0,
                sum / total as f64,
            )
        };
        HistoryStats {
            total_executions: total,
            successful,
            failed,
            success_rate: format!("{:.1}%", rate),
            average_duration_seconds: (average * 100.0).round() / 100.0,
        }
    }
}
