//! Static and dynamic memory, and the store that holds them.
//!
//! Static memory is the participant's profile, read once when a session
//! starts. Dynamic memory mirrors every turn and is rewritten after each one.

use crate::persist::PersistError;
use crate::turn::Speaker;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

/// Profile facts gathered before the dialogue (self-description keywords,
/// the participant's drawing, strengths and weaknesses).
///
/// Values are kept as raw JSON so that both strings and lists render.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticMemory {
    pub user_self_keywords: Option<Value>,
    pub user_drawing_info: DrawingInfo,
    pub user_hero_info: HeroInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawingInfo {
    pub title: Option<Value>,
    pub age_in_picture: Option<Value>,
    pub current_action: Option<Value>,
    pub future_prediction: Option<Value>,
    pub message_to_self: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeroInfo {
    pub likes: Option<Value>,
    pub abilities: Option<Value>,
    pub strength_points: Option<Value>,
    pub weakness_points: Option<Value>,
    pub potentials: Option<Value>,
}

impl StaticMemory {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// One mirrored turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Speaker,
    pub text: String,
}

/// Append-only log of every turn's role and text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicMemory {
    #[serde(default)]
    pub turns: Vec<MemoryEntry>,
}

impl DynamicMemory {
    pub fn push(&mut self, role: Speaker, text: impl Into<String>) {
        self.turns.push(MemoryEntry {
            role,
            text: text.into(),
        });
    }

    /// The last `window` entries, oldest first.
    pub fn recent(&self, window: usize) -> &[MemoryEntry] {
        let start = self.turns.len().saturating_sub(window);
        &self.turns[start..]
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Durable holder of static and dynamic memory.
///
/// A store that has never been written returns empty defaults rather than
/// an error.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    async fn read_static(&self) -> Result<StaticMemory, PersistError>;

    async fn read_dynamic(&self) -> Result<DynamicMemory, PersistError>;

    async fn write_dynamic(&self, dynamic: &DynamicMemory) -> Result<(), PersistError>;
}

/// Memory store kept entirely in process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    static_memory: StaticMemory,
    dynamic: RwLock<DynamicMemory>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_static(static_memory: StaticMemory) -> Self {
        Self {
            static_memory,
            dynamic: RwLock::default(),
        }
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn read_static(&self) -> Result<StaticMemory, PersistError> {
        Ok(self.static_memory.clone())
    }

    async fn read_dynamic(&self) -> Result<DynamicMemory, PersistError> {
        Ok(self.dynamic.read().await.clone())
    }

    async fn write_dynamic(&self, dynamic: &DynamicMemory) -> Result<(), PersistError> {
        *self.dynamic.write().await = dynamic.clone();
        Ok(())
    }
}
