//! Session persistence
//!
//! Sessions are saved as JSON documents, one file per session, in the user's
//! Documents folder or a custom location from settings. The scheduler writes
//! through the `SessionStore` port so the pipeline core can be exercised
//! against an in-memory store in tests, and so embedders can bring their own
//! persistence.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

use crate::structure::{GraphStructure, TreeStructure};

/// Persisted snapshot of one session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SessionRecord {
    pub id: String,
    pub title: String,
    /// Present when the session ran in tree mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_structure: Option<TreeStructure>,
    /// Present when the session ran in graph mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_structure: Option<GraphStructure>,
    #[serde(default)]
    pub transcript: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generate a session id unique enough for filenames and service calls.
pub(crate) fn new_session_id() -> String {
    format!(
        "session-{}-{:04x}",
        Utc::now().format("%Y%m%d-%H%M%S"),
        rand::thread_rng().gen::<u16>()
    )
}

/// Storage port for session records
pub(crate) trait SessionStore: Send {
    fn save(&self, record: &SessionRecord) -> Result<(), StorageError>;
    fn load(&self, id: &str) -> Result<SessionRecord, StorageError>;
    /// Ids of every stored session, newest first.
    fn list(&self) -> Result<Vec<String>, StorageError>;
}

/// Session store writing one JSON file per session
pub(crate) struct DiskSessionStore {
    dir: PathBuf,
}

impl DiskSessionStore {
    pub(crate) fn new(dir: PathBuf) -> Self {
        DiskSessionStore { dir }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn ensure_dir(&self) -> Result<(), StorageError> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| StorageError::CreateDirectory {
                path: self.dir.clone(),
                source: e,
            })?;
            info!("Created sessions directory: {:?}", self.dir);
        }
        Ok(())
    }
}

impl SessionStore for DiskSessionStore {
    fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        self.ensure_dir()?;
        let filepath = self.path_for(&record.id);
        let json = serde_json::to_string_pretty(record)?;

        let mut file = fs::File::create(&filepath).map_err(|e| StorageError::CreateFile {
            path: filepath.clone(),
            source: e,
        })?;
        file.write_all(json.as_bytes())
            .map_err(|e| StorageError::WriteFile {
                path: filepath.clone(),
                source: e,
            })?;
        file.flush().map_err(|e| StorageError::WriteFile {
            path: filepath.clone(),
            source: e,
        })?;

        info!("Saved session to: {:?}", filepath);
        Ok(())
    }

    fn load(&self, id: &str) -> Result<SessionRecord, StorageError> {
        let filepath = self.path_for(id);
        if !filepath.exists() {
            return Err(StorageError::NotFound { id: id.to_string() });
        }
        let contents = fs::read_to_string(&filepath).map_err(|e| StorageError::ReadFile {
            path: filepath,
            source: e,
        })?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| StorageError::ReadDirectory {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut ids: Vec<String> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .filter_map(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
            .collect();
        // Session ids embed their creation timestamp, so lexical order is
        // chronological
        ids.sort_by(|a, b| b.cmp(a));
        Ok(ids)
    }
}

/// In-memory session store. Used in tests and as a fallback when no
/// writable storage directory can be resolved.
#[derive(Default)]
pub(crate) struct MemorySessionStore {
    saved: Mutex<Vec<SessionRecord>>,
}

impl MemorySessionStore {
    pub(crate) fn new() -> Self {
        MemorySessionStore::default()
    }

    /// Number of saves performed, including overwrites.
    pub(crate) fn save_count(&self) -> usize {
        self.saved.lock().map(|saved| saved.len()).unwrap_or(0)
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let mut saved = self.saved.lock().map_err(|_| StorageError::Poisoned)?;
        saved.push(record.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<SessionRecord, StorageError> {
        let saved = self.saved.lock().map_err(|_| StorageError::Poisoned)?;
        saved
            .iter()
            .rev()
            .find(|record| record.id == id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })
    }

    fn list(&self) -> Result<Vec<String>, StorageError> {
        let saved = self.saved.lock().map_err(|_| StorageError::Poisoned)?;
        let mut ids: Vec<String> = Vec::new();
        for record in saved.iter().rev() {
            if !ids.contains(&record.id) {
                ids.push(record.id.clone());
            }
        }
        Ok(ids)
    }
}

/// Storage errors with contextual information
#[derive(Debug, thiserror::Error)]
pub(crate) enum StorageError {
    #[error("Session {id} not found")]
    NotFound { id: String },

    #[error("Failed to create directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create file {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write to file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session store lock poisoned")]
    Poisoned,
}
