//! Staged empathetic dialogue engine.
//!
//! This crate provides:
//! - A three-stage, six-substep turn orchestrator with a fixed transition table
//! - Memory context assembly from a participant profile and recent turns
//! - Duplicate-question tracking for generated follow-ups
//! - An append-only transcript log and archival JSON/CSV exports
//!
//! # Quick Start
//!
//! ```ignore
//! use empathy_core::{ClaudeGenerator, DialogueConfig, Script, SessionRegistry};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DialogueConfig::from_env().with_user_id("kid-7");
//!     let generator = ClaudeGenerator::from_config(claude::Claude::from_env()?, &config);
//!     let registry = SessionRegistry::file_backed(config, Script::default(), Arc::new(generator));
//!
//!     let id = registry.create().await?;
//!     registry.process(&id, None).await?;
//!     registry.process(&id, Some("it was fun")).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod context;
pub mod cursor;
pub mod export;
pub mod generation;
pub mod ledger;
pub mod memory;
pub mod persist;
pub mod registry;
pub mod script;
pub mod session;
pub mod testing;
pub mod transcript;
pub mod turn;

// Primary public API
pub use config::DialogueConfig;
pub use cursor::{Cursor, Stage, Step, Substep};
pub use export::{ExportMeta, FlatRow, TranscriptDocument};
pub use generation::{ClaudeGenerator, GenerationError, Generator};
pub use ledger::QuestionLedger;
pub use memory::{DynamicMemory, InMemoryStore, MemoryStore, StaticMemory};
pub use persist::{DataLayout, FileMemoryStore, JsonlTranscriptLog, PersistError};
pub use registry::{SessionId, SessionRegistry};
pub use script::Script;
pub use session::{Collaborators, ProcessOutcome, Session, SessionError};
pub use testing::{MockGenerator, TestHarness};
pub use transcript::{InMemoryTranscriptLog, TranscriptLog, TranscriptRecord};
pub use turn::{Speaker, Turn};
