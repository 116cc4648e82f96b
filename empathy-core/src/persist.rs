//! File-backed persistence: memory files, the JSONL transcript log, and
//! archival exports.
//!
//! Layout under the data directory:
//!
//! ```text
//! <data>/memory/static_memory.json
//! <data>/memory/dynamic_memory.json
//! <data>/logs/chat_log.jsonl
//! <data>/exports/<session>_chat_history.json
//! <data>/exports/<session>_chat_turns.csv
//! ```

use crate::export::{to_csv, to_json, ExportMeta};
use crate::memory::{DynamicMemory, MemoryStore, StaticMemory};
use crate::registry::SessionId;
use crate::transcript::{TranscriptLog, TranscriptRecord};
use crate::turn::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Errors from persistence operations.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error at {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl PersistError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Paths derived from a data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.root.join("memory")
    }

    /// Memory directory for one of several concurrent sessions.
    pub fn session_memory_dir(&self, session_id: &SessionId) -> PathBuf {
        self.memory_dir()
            .join("sessions")
            .join(sanitize_file_stem(session_id.as_str()))
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("logs").join("chat_log.jsonl")
    }

    pub fn export_dir(&self) -> PathBuf {
        self.root.join("exports")
    }
}

/// Replace anything that is not alphanumeric, `-` or `_` with `_`.
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Deserialize, Default)]
struct StaticFile {
    #[serde(default)]
    static_memory: StaticMemory,
}

#[derive(Deserialize, Default)]
struct DynamicFile {
    #[serde(default)]
    dynamic_memory: DynamicMemory,
}

#[derive(Serialize)]
struct DynamicFileRef<'a> {
    dynamic_memory: &'a DynamicMemory,
}

/// Memory store backed by two JSON files in one directory.
///
/// The static file is never written by the engine; it is provisioned by
/// whatever collected the participant's profile.
#[derive(Debug, Clone)]
pub struct FileMemoryStore {
    static_path: PathBuf,
    dynamic_path: PathBuf,
}

impl FileMemoryStore {
    pub fn new(static_path: impl Into<PathBuf>, dynamic_path: impl Into<PathBuf>) -> Self {
        Self {
            static_path: static_path.into(),
            dynamic_path: dynamic_path.into(),
        }
    }

    /// `static_memory.json` and `dynamic_memory.json` inside `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self::new(
            dir.join("static_memory.json"),
            dir.join("dynamic_memory.json"),
        )
    }

    pub fn dynamic_path(&self) -> &Path {
        &self.dynamic_path
    }
}

/// Read and parse a JSON file, or `None` when it does not exist.
async fn read_json_if_exists<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, PersistError> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistError::json(path, e)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistError::io(path, e)),
    }
}

/// Write via a sibling temp file and rename, so readers never see a
/// half-written file.
async fn write_atomic(path: &Path, content: &[u8]) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PersistError::io(parent, e))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)
        .await
        .map_err(|e| PersistError::io(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| PersistError::io(path, e))
}

#[async_trait]
impl MemoryStore for FileMemoryStore {
    async fn read_static(&self) -> Result<StaticMemory, PersistError> {
        let file: Option<StaticFile> = read_json_if_exists(&self.static_path).await?;
        Ok(file.unwrap_or_default().static_memory)
    }

    async fn read_dynamic(&self) -> Result<DynamicMemory, PersistError> {
        let file: Option<DynamicFile> = read_json_if_exists(&self.dynamic_path).await?;
        Ok(file.unwrap_or_default().dynamic_memory)
    }

    async fn write_dynamic(&self, dynamic: &DynamicMemory) -> Result<(), PersistError> {
        let content = serde_json::to_vec_pretty(&DynamicFileRef {
            dynamic_memory: dynamic,
        })?;
        write_atomic(&self.dynamic_path, &content).await
    }
}

/// Transcript log appending one JSON object per line to a single file.
///
/// Appends from every session go through one lock, so lines never
/// interleave.
#[derive(Debug)]
pub struct JsonlTranscriptLog {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl JsonlTranscriptLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl TranscriptLog for JsonlTranscriptLog {
    async fn append(&self, record: &TranscriptRecord) -> Result<(), PersistError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.append_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistError::io(parent, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| PersistError::io(&self.path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| PersistError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| PersistError::io(&self.path, e))
    }

    async fn replay(&self, session_id: &SessionId) -> Result<Vec<TranscriptRecord>, PersistError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PersistError::io(&self.path, e)),
        };

        let mut records = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            let record: TranscriptRecord =
                serde_json::from_str(line).map_err(|e| PersistError::json(&self.path, e))?;
            if &record.session_id == session_id {
                records.push(record);
            }
        }
        Ok(records)
    }
}

/// Paths of the two archival files written by [`write_exports`].
#[derive(Debug, Clone)]
pub struct ExportPaths {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Write the pair-oriented JSON document and the flat CSV table into `dir`.
pub async fn write_exports(
    dir: impl AsRef<Path>,
    meta: &ExportMeta,
    turns: &[Turn],
) -> Result<ExportPaths, PersistError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)
        .await
        .map_err(|e| PersistError::io(dir, e))?;

    let stem = sanitize_file_stem(meta.session_id.as_str());
    let paths = ExportPaths {
        json: dir.join(format!("{stem}_chat_history.json")),
        csv: dir.join(format!("{stem}_chat_turns.csv")),
    };

    fs::write(&paths.json, to_json(meta, turns)?)
        .await
        .map_err(|e| PersistError::io(&paths.json, e))?;
    fs::write(&paths.csv, to_csv(meta, turns)?)
        .await
        .map_err(|e| PersistError::io(&paths.csv, e))?;

    Ok(paths)
}
