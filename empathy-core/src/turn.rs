//! Turns: the immutable units of the transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a turn. Serialized with the archival role names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "bot")]
    Automated,
    #[serde(rename = "user")]
    Human,
}

impl Speaker {
    pub fn role(self) -> &'static str {
        match self {
            Speaker::Automated => "bot",
            Speaker::Human => "user",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.role())
    }
}

/// One utterance. Turn order is the sole ordering authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// 1-based index of the (automated, human) pair this turn belongs to.
    pub turn_index: usize,
}

impl Turn {
    /// Create the turn that will sit at `position` (zero-based) in the transcript.
    pub fn at_position(position: usize, speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
            created_at: Utc::now(),
            turn_index: turn_index_for(position),
        }
    }

    pub fn is_automated(&self) -> bool {
        self.speaker == Speaker::Automated
    }
}

/// Pair index for a zero-based transcript position.
pub fn turn_index_for(position: usize) -> usize {
    position / 2 + 1
}
