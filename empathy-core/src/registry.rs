//! Arena of live sessions keyed by session id.

use crate::config::DialogueConfig;
use crate::generation::Generator;
use crate::memory::{InMemoryStore, MemoryStore};
use crate::persist::{FileMemoryStore, JsonlTranscriptLog};
use crate::script::Script;
use crate::session::{Collaborators, ProcessOutcome, Session, SessionError};
use crate::transcript::{InMemoryTranscriptLog, TranscriptLog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;
use uuid::Uuid;

/// Opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// A fresh random id of the form `sess_<hex>`.
    pub fn generate() -> Self {
        Self(format!("sess_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

type StoreFactory = Box<dyn Fn(&SessionId) -> Arc<dyn MemoryStore> + Send + Sync>;

/// Owns every live session. Each session sits behind its own lock, so
/// sessions progress independently; only the transcript log is shared.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    config: DialogueConfig,
    script: Script,
    generator: Arc<dyn Generator>,
    log: Arc<dyn TranscriptLog>,
    store_factory: StoreFactory,
}

impl SessionRegistry {
    pub fn new(
        config: DialogueConfig,
        script: Script,
        generator: Arc<dyn Generator>,
        log: Arc<dyn TranscriptLog>,
        store_factory: impl Fn(&SessionId) -> Arc<dyn MemoryStore> + Send + Sync + 'static,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
            script,
            generator,
            log,
            store_factory: Box::new(store_factory),
        }
    }

    /// Registry writing under the configured data directory.
    ///
    /// All sessions share the profile in `memory/static_memory.json`; each
    /// keeps its own dynamic memory file.
    pub fn file_backed(config: DialogueConfig, script: Script, generator: Arc<dyn Generator>) -> Self {
        let layout = config.layout();
        let log = Arc::new(JsonlTranscriptLog::new(layout.log_path()));
        let static_path = layout.memory_dir().join("static_memory.json");

        Self::new(config, script, generator, log, move |id: &SessionId| -> Arc<dyn MemoryStore> {
            let dynamic_path = layout.session_memory_dir(id).join("dynamic_memory.json");
            Arc::new(FileMemoryStore::new(static_path.clone(), dynamic_path))
        })
    }

    /// Registry that keeps everything in process memory.
    pub fn in_memory(config: DialogueConfig, script: Script, generator: Arc<dyn Generator>) -> Self {
        Self::new(
            config,
            script,
            generator,
            Arc::new(InMemoryTranscriptLog::new()),
            |_: &SessionId| -> Arc<dyn MemoryStore> { Arc::new(InMemoryStore::new()) },
        )
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    /// Start a session under a fresh id.
    pub async fn create(&self) -> Result<SessionId, SessionError> {
        self.create_with_id(SessionId::generate()).await
    }

    /// Start a session under `id`, replacing nothing: a live id is returned
    /// as is, and an id already in the transcript log resumes where its log
    /// ends.
    pub async fn create_with_id(&self, id: SessionId) -> Result<SessionId, SessionError> {
        if self.sessions.read().await.contains_key(&id) {
            return Ok(id);
        }

        let parts = Collaborators {
            generator: Arc::clone(&self.generator),
            store: (self.store_factory)(&id),
            log: Arc::clone(&self.log),
        };
        let session = Session::start(id.clone(), &self.config, self.script.clone(), parts).await?;

        self.sessions
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(session)));
        info!(session = %id, "session registered");
        Ok(id)
    }

    pub async fn get(&self, id: &SessionId) -> Result<Arc<Mutex<Session>>, SessionError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::UnknownSession(id.clone()))
    }

    /// Run one interaction cycle on the named session.
    pub async fn process(&self, id: &SessionId, input: Option<&str>) -> Result<ProcessOutcome, SessionError> {
        let session = self.get(id).await?;
        let mut session = session.lock().await;
        session.process(input).await
    }

    pub async fn remove(&self, id: &SessionId) -> Option<Arc<Mutex<Session>>> {
        self.sessions.write().await.remove(id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
