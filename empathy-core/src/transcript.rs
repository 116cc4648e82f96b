//! The append-only transcript log.
//!
//! One record per turn, written before the session's cursor moves. The log
//! is the only resource shared between sessions, so implementations must
//! accept concurrent appends.

use crate::persist::PersistError;
use crate::registry::SessionId;
use crate::turn::{Speaker, Turn};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// A single physical log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub role: Speaker,
    pub text: String,
    #[serde(rename = "turn")]
    pub turn_index: usize,
}

impl TranscriptRecord {
    pub fn from_turn(session_id: &SessionId, turn: &Turn) -> Self {
        Self {
            session_id: session_id.clone(),
            timestamp: turn.created_at,
            role: turn.speaker,
            text: turn.text.clone(),
            turn_index: turn.turn_index,
        }
    }

    /// Rebuild the turn this record was written for.
    pub fn to_turn(&self) -> Turn {
        Turn {
            speaker: self.role,
            text: self.text.clone(),
            created_at: self.timestamp,
            turn_index: self.turn_index,
        }
    }
}

#[async_trait]
pub trait TranscriptLog: Send + Sync {
    async fn append(&self, record: &TranscriptRecord) -> Result<(), PersistError>;

    /// All records written for one session, in append order.
    async fn replay(&self, session_id: &SessionId) -> Result<Vec<TranscriptRecord>, PersistError>;
}

/// Transcript log held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryTranscriptLog {
    records: Mutex<Vec<TranscriptRecord>>,
}

impl InMemoryTranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn records(&self) -> Vec<TranscriptRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl TranscriptLog for InMemoryTranscriptLog {
    async fn append(&self, record: &TranscriptRecord) -> Result<(), PersistError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn replay(&self, session_id: &SessionId) -> Result<Vec<TranscriptRecord>, PersistError> {
        Ok(self
            .records
            .lock()
            .await
            .iter()
            .filter(|r| &r.session_id == session_id)
            .cloned()
            .collect())
    }
}
