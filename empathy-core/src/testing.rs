//! Testing utilities for dialogue sessions.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic testing without API calls
//! - `FailingStore` and `FailingLog` for exercising persistence failures
//! - `TestHarness` for driving a session over in-memory collaborators
//! - Assertion helpers for verifying session state

use crate::config::DialogueConfig;
use crate::cursor::{Cursor, Stage};
use crate::generation::{GenerationError, Generator};
use crate::memory::{DynamicMemory, InMemoryStore, MemoryStore, StaticMemory};
use crate::persist::PersistError;
use crate::registry::SessionId;
use crate::script::Script;
use crate::session::{Collaborators, ProcessOutcome, Session, SessionError};
use crate::transcript::{InMemoryTranscriptLog, TranscriptLog, TranscriptRecord};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Reply used once the scripted queue runs dry.
pub const DEFAULT_REPLY: &str = "That sounds really special.\nWhat part did you enjoy the most?";

/// A prompt the mock generator received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationCall {
    pub system_role: String,
    pub user_prompt: String,
}

/// A generator that returns scripted replies.
///
/// Replies are consumed in order; `Err` entries fail that call. Every call
/// is recorded, including failed ones.
#[derive(Debug, Default)]
pub struct MockGenerator {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<GenerationCall>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with replies queued in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for reply in replies {
            mock.queue(reply);
        }
        mock
    }

    /// Queue a successful reply.
    pub fn queue(&self, reply: impl Into<String>) {
        lock(&self.replies).push_back(Ok(reply.into()));
    }

    /// Make the next queued call fail.
    pub fn fail_next(&self, message: impl Into<String>) {
        lock(&self.replies).push_front(Err(message.into()));
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn last_call(&self) -> Option<GenerationCall> {
        lock(&self.calls).last().cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, system_role: &str, user_prompt: &str) -> Result<String, GenerationError> {
        lock(&self.calls).push(GenerationCall {
            system_role: system_role.to_string(),
            user_prompt: user_prompt.to_string(),
        });

        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(GenerationError::Scripted(message)),
            None => Ok(DEFAULT_REPLY.to_string()),
        }
    }
}

/// Memory store whose dynamic writes fail while armed.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    failing: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MemoryStore for FailingStore {
    async fn read_static(&self) -> Result<StaticMemory, PersistError> {
        self.inner.read_static().await
    }

    async fn read_dynamic(&self) -> Result<DynamicMemory, PersistError> {
        self.inner.read_dynamic().await
    }

    async fn write_dynamic(&self, dynamic: &DynamicMemory) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Unavailable("memory store offline".to_string()));
        }
        self.inner.write_dynamic(dynamic).await
    }
}

/// Transcript log whose appends fail while armed.
#[derive(Debug, Default)]
pub struct FailingLog {
    inner: InMemoryTranscriptLog,
    failing: AtomicBool,
}

impl FailingLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[async_trait]
impl TranscriptLog for FailingLog {
    async fn append(&self, record: &TranscriptRecord) -> Result<(), PersistError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PersistError::Unavailable("transcript log offline".to_string()));
        }
        self.inner.append(record).await
    }

    async fn replay(&self, session_id: &SessionId) -> Result<Vec<TranscriptRecord>, PersistError> {
        self.inner.replay(session_id).await
    }
}

/// Test harness for running dialogue scenarios.
pub struct TestHarness {
    /// The session under test.
    pub session: Session,
    pub generator: Arc<MockGenerator>,
    pub store: Arc<InMemoryStore>,
    pub log: Arc<InMemoryTranscriptLog>,
}

impl TestHarness {
    /// A session with the built-in script and empty memory.
    pub async fn new() -> Self {
        Self::with_static(StaticMemory::default()).await
    }

    /// A session whose store holds the given profile.
    pub async fn with_static(static_memory: StaticMemory) -> Self {
        let generator = Arc::new(MockGenerator::new());
        let store = Arc::new(InMemoryStore::with_static(static_memory));
        let log = Arc::new(InMemoryTranscriptLog::new());

        let parts = Collaborators {
            generator: generator.clone(),
            store: store.clone(),
            log: log.clone(),
        };
        let session = Session::start(
            SessionId::from("sess_test"),
            &DialogueConfig::default().with_user_id("tester"),
            Script::default(),
            parts,
        )
        .await
        .expect("in-memory session always starts");

        Self {
            session,
            generator,
            store,
            log,
        }
    }

    /// Queue a generated reply.
    pub fn expect_reply(&mut self, text: impl Into<String>) -> &mut Self {
        self.generator.queue(text);
        self
    }

    /// Ask for the automated turn due now.
    pub async fn bot(&mut self) -> Result<ProcessOutcome, SessionError> {
        self.session.process(None).await
    }

    /// Send a human answer.
    pub async fn say(&mut self, text: &str) -> Result<ProcessOutcome, SessionError> {
        self.session.process(Some(text)).await
    }

    /// Alternate automated turns and the given answers until the answers
    /// run out or the session ends. Returns the number of turns appended.
    pub async fn run_script(&mut self, answers: &[&str]) -> Result<usize, SessionError> {
        let before = self.session.turns().len();
        let mut answers = answers.iter();
        while !self.session.is_terminal() {
            if self.session.accepts_input() {
                match answers.next() {
                    Some(answer) => self.say(answer).await?,
                    None => break,
                };
            } else {
                self.bot().await?;
            }
        }
        Ok(self.session.turns().len() - before)
    }

    pub fn cursor(&self) -> Cursor {
        self.session.cursor()
    }
}

/// Assert the session's cursor sits at `(stage, substep)`.
#[track_caller]
pub fn assert_cursor(session: &Session, stage: Stage, substep: u8) {
    let expected = Cursor::new(stage, substep).expect("substep in 1..=6");
    assert_eq!(
        session.cursor(),
        expected,
        "expected cursor {expected}, got {}",
        session.cursor()
    );
}

/// Assert the session holds exactly `count` turns.
#[track_caller]
pub fn assert_turn_count(session: &Session, count: usize) {
    assert_eq!(
        session.turns().len(),
        count,
        "expected {count} turns, got {}",
        session.turns().len()
    );
}

/// Assert the turns alternate automated, human, automated, ...
#[track_caller]
pub fn assert_alternating(session: &Session) {
    for (i, turn) in session.turns().iter().enumerate() {
        assert_eq!(turn.is_automated(), i % 2 == 0, "turn {i} has the wrong speaker");
    }
}
