use crate::constants::sessions as session_constants;
use crate::errors::ToolError;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::{read_json, write_json_atomic, JsonLoad};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Execution,
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initialized,
    AwaitingInput,
    Complete,
    Executed,
    Failed,
}

impl SessionStatus {
    fn rank(self) -> u8 {
        match self {
            SessionStatus::Initialized => 0,
            SessionStatus::AwaitingInput => 1,
            SessionStatus::Complete => 2,
            SessionStatus::Executed => 3,
            SessionStatus::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Executed | SessionStatus::Failed)
    }

    /// Forward-only: `failed` from any non-terminal state, otherwise the
    /// status may only stay or advance along the main chain.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next == SessionStatus::Failed {
            return true;
        }
        next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Initialized => "initialized",
            SessionStatus::AwaitingInput => "awaiting_input",
            SessionStatus::Complete => "complete",
            SessionStatus::Executed => "executed",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Requirement kind to submitted value, kept in submission order.
///
/// Inserting an existing kind replaces its value in place, so two requirements
/// sharing a kind leave a single entry behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMap {
    entries: Vec<(String, String)>,
}

impl ResponseMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, kind: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == kind) {
            entry.1 = value.to_string();
            return;
        }
        self.entries.push((kind.to_string(), value.to_string()));
    }

    pub fn get(&self, kind: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == kind)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, v)| v.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }
}

impl Serialize for ResponseMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (kind, value) in &self.entries {
            map.serialize_entry(kind, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResponseMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = ResponseMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of requirement kind to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ResponseMap, A::Error> {
                let mut out = ResponseMap::new();
                while let Some((kind, value)) = access.next_entry::<String, String>()? {
                    out.insert(&kind, &value);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: SessionKind,
    pub status: SessionStatus,
    pub requirements: Vec<String>,
    #[serde(default)]
    pub responses: ResponseMap,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub last_execution: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
}

impl Session {
    pub fn current_index(&self) -> usize {
        self.responses.len()
    }
}

/// Partial update merged into a stored session. `requirements` is absent on
/// purpose: it is fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub responses: Option<ResponseMap>,
    pub execution_count: Option<u32>,
    pub error_count: Option<u32>,
    pub last_execution: Option<DateTime<Utc>>,
}

impl SessionPatch {
    pub fn status(status: SessionStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct SessionStore {
    logger: Logger,
    file_path: PathBuf,
    sessions: Arc<RwLock<BTreeMap<String, Session>>>,
}

impl SessionStore {
    pub fn new(logger: Logger, file_path: PathBuf) -> Self {
        let store = Self {
            logger: logger.child("sessions"),
            file_path,
            sessions: Arc::new(RwLock::new(BTreeMap::new())),
        };
        store.load();
        store
    }

    fn load(&self) {
        let loaded: BTreeMap<String, Session> = match read_json(&self.file_path) {
            JsonLoad::Loaded(map) => map,
            JsonLoad::Missing => BTreeMap::new(),
            JsonLoad::Malformed(reason) => {
                self.logger.warn(
                    "Session store unreadable, starting empty",
                    Some(&serde_json::json!({"path": self.file_path, "error": reason})),
                );
                BTreeMap::new()
            }
        };
        *self.sessions.write().unwrap_or_else(|err| err.into_inner()) = loaded;
    }

    fn persist(&self, sessions: &BTreeMap<String, Session>) -> Result<(), ToolError> {
        write_json_atomic(&self.file_path, sessions).map_err(|err| {
            ToolError::internal(format!("Failed to persist sessions: {}", err))
        })
    }

    pub fn generate_id() -> String {
        let mut rng = rand::thread_rng();
        let alphabet = session_constants::ID_ALPHABET;
        let random: String = (0..session_constants::ID_RANDOM_LEN)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect();
        let suffix = Utc::now().timestamp().rem_euclid(1_000_000);
        format!("{}{:06}", random, suffix)
    }

    pub fn create(
        &self,
        filename: &str,
        kind: SessionKind,
        requirements: Vec<String>,
    ) -> Result<String, ToolError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|err| err.into_inner());
        let id = (0..session_constants::ID_GENERATION_ATTEMPTS)
            .map(|_| Self::generate_id())
            .find(|candidate| !sessions.contains_key(candidate))
            .ok_or_else(|| ToolError::conflict("Could not allocate a unique session id"))?;
        let session = Session {
            id: id.clone(),
            filename: filename.to_string(),
            kind,
            status: SessionStatus::Initialized,
            requirements,
            responses: ResponseMap::new(),
            execution_count: 0,
            error_count: 0,
            last_execution: None,
            created: Utc::now(),
        };
        sessions.insert(id.clone(), session);
        if let Err(err) = self.persist(&sessions) {
            sessions.remove(&id);
            return Err(err);
        }
        self.logger.debug(
            "Session created",
            Some(&serde_json::json!({"session_id": id, "filename": filename})),
        );
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .get(id)
            .cloned()
    }

    pub fn update(&self, id: &str, patch: SessionPatch) -> Result<Session, ToolError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|err| err.into_inner());
        let current = sessions
            .get(id)
            .cloned()
            .ok_or_else(|| ToolError::session_not_found(id))?;
        let mut next = current.clone();
        if let Some(status) = patch.status {
            if !current.status.can_transition_to(status) {
                return Err(ToolError::conflict(format!(
                    "Session {} cannot move from {} to {}",
                    id,
                    current.status.as_str(),
                    status.as_str()
                )));
            }
            next.status = status;
        }
        if let Some(responses) = patch.responses {
            next.responses = responses;
        }
        if let Some(count) = patch.execution_count {
            next.execution_count = count;
        }
        if let Some(count) = patch.error_count {
            next.error_count = count;
        }
        if let Some(stamp) = patch.last_execution {
            next.last_execution = Some(stamp);
        }
        sessions.insert(id.to_string(), next.clone());
        if let Err(err) = self.persist(&sessions) {
            sessions.insert(id.to_string(), current);
            return Err(err);
        }
        Ok(next)
    }

    pub fn delete(&self, id: &str) -> Result<bool, ToolError> {
        let mut sessions = self.sessions.write().unwrap_or_else(|err| err.into_inner());
        let Some(removed) = sessions.remove(id) else {
            return Ok(false);
        };
        if let Err(err) = self.persist(&sessions) {
            sessions.insert(id.to_string(), removed);
            return Err(err);
        }
        Ok(true)
    }

    pub fn list_all(&self) -> BTreeMap<String, Session> {
        self.sessions
            .read()
            .unwrap_or_else(|err| err.into_inner())
            .clone()
    }

    pub fn cleanup_older_than(&self, days: i64) -> Result<usize, ToolError> {
        let cutoff = retention_cutoff(days)?;
        let mut sessions = self.sessions.write().unwrap_or_else(|err| err.into_inner());
        let before = sessions.clone();
        sessions.retain(|_, session| session.created >= cutoff);
        let removed = before.len() - sessions.len();
        if removed == 0 {
            return Ok(0);
        }
        if let Err(err) = self.persist(&sessions) {
            *sessions = before;
            return Err(err);
        }
        self.logger.info(
            "Stale sessions removed",
            Some(&serde_json::json!({"removed": removed, "days": days})),
        );
        Ok(removed)
    }
}

/// Oldest creation time kept by a `days`-long retention.
fn retention_cutoff(days: i64) -> Result<DateTime<Utc>, ToolError> {
    let range = session_constants::MIN_RETENTION_DAYS..=session_constants::MAX_RETENTION_DAYS;
    if !range.contains(&days) {
        return Err(ToolError::validation(format!(
            "days must be between {} and {}, got {}",
            range.start(),
            range.end(),
            days
        )));
    }
    chrono::Duration::try_days(days)
        .and_then(|span| Utc::now().checked_sub_signed(span))
        .ok_or_else(|| ToolError::validation(format!("Retention of {} days is out of range", days)))
}
