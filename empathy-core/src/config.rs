//! Dialogue configuration.

use crate::context::DEFAULT_HISTORY_WINDOW;
use crate::persist::DataLayout;
use std::path::PathBuf;

/// Label written into every export's `chat_type` column.
pub const DEFAULT_CHAT_TYPE: &str = "fsm_empathy_2turn";

/// Non-whitespace characters kept from one human message.
pub const DEFAULT_INPUT_BUDGET: usize = 200;

/// Configuration for dialogue sessions.
#[derive(Debug, Clone)]
pub struct DialogueConfig {
    /// Model to use for generation. `None` keeps the client's default.
    pub model: Option<String>,

    /// Maximum tokens per generated turn.
    pub max_tokens: usize,

    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Root of the memory, log and export files.
    pub data_dir: PathBuf,

    /// Dynamic memory entries rendered into each prompt.
    pub history_window: usize,

    pub input_char_budget: usize,

    /// Participant identifier carried into exports.
    pub user_id: String,

    pub chat_type: String,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: 1024,
            temperature: Some(0.7),
            data_dir: PathBuf::from("data"),
            history_window: DEFAULT_HISTORY_WINDOW,
            input_char_budget: DEFAULT_INPUT_BUDGET,
            user_id: "anonymous".to_string(),
            chat_type: DEFAULT_CHAT_TYPE.to_string(),
        }
    }
}

impl DialogueConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `MODEL_NAME`, `EMPATHY_DATA_DIR` and
    /// `EMPATHY_USER_ID` when they are set and non-empty.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut config = Self::default();
        if let Some(model) = var("MODEL_NAME") {
            config.model = Some(model);
        }
        if let Some(dir) = var("EMPATHY_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(user_id) = var("EMPATHY_USER_ID") {
            config.user_id = user_id;
        }
        config
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window;
        self
    }

    pub fn with_input_char_budget(mut self, budget: usize) -> Self {
        self.input_char_budget = budget;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_chat_type(mut self, chat_type: impl Into<String>) -> Self {
        self.chat_type = chat_type.into();
        self
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DialogueConfig::default();
        assert_eq!(config.history_window, 10);
        assert_eq!(config.input_char_budget, 200);
        assert_eq!(config.chat_type, "fsm_empathy_2turn");
        assert!(config.model.is_none());
    }

    #[test]
    fn test_builder() {
        let config = DialogueConfig::new()
            .with_model("claude-haiku")
            .with_data_dir("/tmp/empathy")
            .with_user_id("kid-7")
            .with_history_window(4);

        assert_eq!(config.model.as_deref(), Some("claude-haiku"));
        assert_eq!(config.user_id, "kid-7");
        assert_eq!(config.history_window, 4);
        assert_eq!(
            config.layout().log_path(),
            PathBuf::from("/tmp/empathy/logs/chat_log.jsonl")
        );
    }
}
