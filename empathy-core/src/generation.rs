//! The text generation seam.
//!
//! The orchestrator only knows [`Generator`]. [`ClaudeGenerator`] talks to the
//! Claude API; tests use [`crate::testing::MockGenerator`].

use crate::config::DialogueConfig;
use async_trait::async_trait;
use claude::{Claude, Message, Request};
use thiserror::Error;
use tracing::debug;

/// Errors from a generation call.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("API error: {0}")]
    Api(#[from] claude::Error),

    #[error("Generation returned no text")]
    EmptyResponse,

    #[error("Scripted failure: {0}")]
    Scripted(String),
}

impl GenerationError {
    /// Whether retrying the same turn may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Api(e) => e.is_transient(),
            GenerationError::EmptyResponse => true,
            GenerationError::Scripted(_) => true,
        }
    }
}

/// Produces the text of one automated turn.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, system_role: &str, user_prompt: &str) -> Result<String, GenerationError>;
}

/// Generator backed by the Claude Messages API.
#[derive(Debug, Clone)]
pub struct ClaudeGenerator {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeGenerator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 1024,
            temperature: None,
        }
    }

    /// Apply the model and sampling settings from a dialogue configuration.
    pub fn from_config(client: Claude, config: &DialogueConfig) -> Self {
        let client = match &config.model {
            Some(model) => client.with_model(model.clone()),
            None => client,
        };
        Self {
            client,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }
}

#[async_trait]
impl Generator for ClaudeGenerator {
    async fn generate(&self, system_role: &str, user_prompt: &str) -> Result<String, GenerationError> {
        let mut request = Request::new(vec![Message::user(user_prompt)])
            .with_system(system_role)
            .with_max_tokens(self.max_tokens);
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }

        let response = self.client.complete(request).await?;
        debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "generation complete"
        );

        let text = response.text.trim();
        if text.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}
