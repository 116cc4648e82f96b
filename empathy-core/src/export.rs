//! Archival exports of a finished session.
//!
//! Two redundant shapes of the same turns: a pair-oriented JSON document and
//! a flat table with one row per speaker per pair.

use crate::persist::PersistError;
use crate::registry::SessionId;
use crate::turn::{Speaker, Turn};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::{Terminator, WriterBuilder};
use serde::{Deserialize, Serialize};

/// Column order of the CSV export.
pub const CSV_HEADER: [&str; 8] = [
    "session_id",
    "user_id",
    "created_at",
    "chat_type",
    "turn",
    "role",
    "text",
    "timestamp",
];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Identifying fields repeated in both export formats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMeta {
    pub session_id: SessionId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub chat_type: String,
}

/// One side of a dialogue pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairBlock {
    pub role: Speaker,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Turn> for PairBlock {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.speaker,
            text: turn.text.clone(),
            timestamp: turn.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialoguePair {
    pub turn: usize,
    pub bot: Option<PairBlock>,
    pub user: Option<PairBlock>,
}

/// The pair-oriented transcript document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptDocument {
    #[serde(flatten)]
    pub meta: ExportMeta,
    pub dialogue: Vec<DialoguePair>,
}

/// A row of the flat table. `timestamp` is empty on placeholder rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatRow {
    pub turn: usize,
    pub role: Speaker,
    pub text: String,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Group turns positionally into (automated, human) pairs.
///
/// A trailing automated turn with no answer yields `user: None`.
pub fn to_transcript(meta: &ExportMeta, turns: &[Turn]) -> TranscriptDocument {
    let dialogue = turns
        .chunks(2)
        .enumerate()
        .map(|(i, pair)| DialoguePair {
            turn: i + 1,
            bot: pair.first().filter(|t| t.is_automated()).map(PairBlock::from),
            user: pair.get(1).filter(|t| !t.is_automated()).map(PairBlock::from),
        })
        .collect();

    TranscriptDocument {
        meta: meta.clone(),
        dialogue,
    }
}

/// One row per speaker per pair, with an empty human row where a pair has
/// no answer.
pub fn to_flat_rows(turns: &[Turn]) -> Vec<FlatRow> {
    let mut rows = Vec::with_capacity(turns.len() + 1);
    for (i, pair) in turns.chunks(2).enumerate() {
        let index = i + 1;
        let bot = pair.first().filter(|t| t.is_automated());
        let user = pair.get(1).filter(|t| !t.is_automated());

        if let Some(bot) = bot {
            rows.push(FlatRow {
                turn: index,
                role: Speaker::Automated,
                text: bot.text.clone(),
                timestamp: Some(bot.created_at),
            });
        }
        match user {
            Some(user) => rows.push(FlatRow {
                turn: index,
                role: Speaker::Human,
                text: user.text.clone(),
                timestamp: Some(user.created_at),
            }),
            None if bot.is_some() => rows.push(FlatRow {
                turn: index,
                role: Speaker::Human,
                text: String::new(),
                timestamp: None,
            }),
            None => {}
        }
    }
    rows
}

/// Pretty-printed JSON document. Non-ASCII text is written as-is.
pub fn to_json(meta: &ExportMeta, turns: &[Turn]) -> Result<String, PersistError> {
    Ok(serde_json::to_string_pretty(&to_transcript(meta, turns))?)
}

/// UTF-8 CSV with a byte order mark, CRLF line endings and RFC 4180 quoting.
pub fn to_csv(meta: &ExportMeta, turns: &[Turn]) -> Result<Vec<u8>, PersistError> {
    let mut writer = WriterBuilder::new()
        .terminator(Terminator::CRLF)
        .from_writer(UTF8_BOM.to_vec());
    writer.write_record(CSV_HEADER)?;

    let created_at = format_timestamp(&meta.created_at);
    for row in to_flat_rows(turns) {
        let turn = row.turn.to_string();
        let timestamp = row.timestamp.as_ref().map(format_timestamp).unwrap_or_default();
        writer.write_record([
            meta.session_id.as_str(),
            meta.user_id.as_str(),
            created_at.as_str(),
            meta.chat_type.as_str(),
            turn.as_str(),
            row.role.role(),
            row.text.as_str(),
            timestamp.as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| PersistError::Csv(e.into_error().into()))
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}
