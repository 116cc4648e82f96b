//! The fixed script of a session: persona, anchor questions, stage labels.
//!
//! The built-in script is used unless a JSON file overrides it.

use crate::cursor::Stage;
use crate::persist::PersistError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

/// Scripted text that the orchestrator weaves into automated turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Script {
    /// Name the automated counterpart speaks as.
    pub persona: String,

    /// Opening question emitted verbatim at the start of stage 1.
    pub opening_question: String,

    /// Anchor question woven into the first turn of stage 2.
    pub recall_question: String,

    /// Anchor question woven into the first turn of stage 3.
    pub wrap_up_question: String,

    /// Human-readable labels used inside prompts, one per stage.
    pub stage_labels: [String; 3],

    /// Word the closing turn must end with.
    pub sign_off: String,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            persona: "Bongbong".to_string(),
            opening_question: "Hi friend, how was your day today?".to_string(),
            recall_question:
                "What was the moment you remember most from today's activity?".to_string(),
            wrap_up_question:
                "Lastly, as we finish today's activity, is there anything you'd like to say to Bongbong?"
                    .to_string(),
            stage_labels: [
                "S1 asking about the activity".to_string(),
                "S2 recalling memories".to_string(),
                "S3 wrapping up the activity".to_string(),
            ],
            sign_off: "Bye".to_string(),
        }
    }
}

impl Script {
    /// Load a script from a JSON file. Missing keys fall back to defaults.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| PersistError::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| PersistError::json(path, e))
    }

    /// The fixed question that anchors a stage's first automated turn.
    pub fn anchor_question(&self, stage: Stage) -> &str {
        match stage {
            Stage::S1 => &self.opening_question,
            Stage::S2 => &self.recall_question,
            Stage::S3 => &self.wrap_up_question,
        }
    }

    pub fn stage_label(&self, stage: Stage) -> &str {
        &self.stage_labels[stage.index()]
    }

    /// All fixed questions on one line, in stage order.
    pub fn fixed_questions_line(&self) -> String {
        Stage::ALL
            .iter()
            .map(|stage| self.anchor_question(*stage))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}
