//! Session persistence in a single JSON document.
//!
//! Every mutation is a full read-modify-write of the document, serialized by
//! an in-process lock, so handles on the same session see each other's writes
//! on their next read. There is no cross-process locking.

use crate::conversation::{ConversationItem, Role};
use crate::session::backend::{FileBackend, MemoryBackend, StoreBackend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

const STORE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("Failed to read session store {location}: {source}")]
    Read {
        location: String,
        source: std::io::Error,
    },

    #[error("Failed to write session store {location}: {source}")]
    Write {
        location: String,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Summary of a session for listing purposes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub item_count: usize,
    /// The id was generated rather than supplied by the caller.
    pub generated_id: bool,
    pub first_user_message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default = "store_version")]
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, SessionRecord>,
}

impl Default for StoreDocument {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            sessions: BTreeMap::new(),
        }
    }
}

fn store_version() -> u32 {
    STORE_VERSION
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionRecord {
    items: Vec<ConversationItem>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    generated_id: bool,
}

impl SessionRecord {
    fn new(generated_id: bool) -> Self {
        let now = Utc::now();
        Self {
            items: Vec::new(),
            created_at: now,
            updated_at: now,
            generated_id,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub struct SessionStore {
    backend: Arc<dyn StoreBackend>,
    write_lock: Mutex<()>,
}

impl SessionStore {
    pub fn with_backend(backend: Arc<dyn StoreBackend>) -> Self {
        Self {
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Store backed by a JSON file. Nothing is read until first use.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(Arc::new(FileBackend::new(path)))
    }

    /// Store that lives only as long as the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::new()))
    }

    #[must_use]
    pub fn location(&self) -> String {
        self.backend.location()
    }

    /// All items of a session, oldest first. Unknown ids yield no items.
    pub async fn items(&self, id: &str) -> Result<Vec<ConversationItem>, SessionStoreError> {
        let mut doc = self.read_document().await?;
        Ok(doc
            .sessions
            .remove(id)
            .map(|record| record.items)
            .unwrap_or_default())
    }

    pub async fn contains(&self, id: &str) -> Result<bool, SessionStoreError> {
        Ok(self.read_document().await?.sessions.contains_key(id))
    }

    /// Append items, creating the session if needed.
    pub async fn append(
        &self,
        id: &str,
        items: Vec<ConversationItem>,
    ) -> Result<(), SessionStoreError> {
        self.append_as(id, items, false).await
    }

    pub(crate) async fn append_as(
        &self,
        id: &str,
        items: Vec<ConversationItem>,
        generated_id: bool,
    ) -> Result<(), SessionStoreError> {
        if items.is_empty() {
            return Ok(());
        }
        self.mutate(|doc| {
            let record = doc
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| SessionRecord::new(generated_id));
            record.items.extend(items);
            record.touch();
            true
        })
        .await
        .map(|_| ())
    }

    /// Create the session with `initial_items` unless it already exists.
    pub(crate) async fn seed(
        &self,
        id: &str,
        initial_items: Vec<ConversationItem>,
        generated_id: bool,
    ) -> Result<(), SessionStoreError> {
        self.mutate(|doc| {
            if doc.sessions.contains_key(id) {
                return false;
            }
            let mut record = SessionRecord::new(generated_id);
            record.items = initial_items;
            doc.sessions.insert(id.to_string(), record);
            true
        })
        .await
        .map(|_| ())
    }

    /// Remove and return the last item of a session.
    pub async fn pop_last(&self, id: &str) -> Result<Option<ConversationItem>, SessionStoreError> {
        let mut popped = None;
        self.mutate(|doc| {
            let Some(record) = doc.sessions.get_mut(id) else {
                return false;
            };
            popped = record.items.pop();
            if popped.is_some() {
                record.touch();
            }
            popped.is_some()
        })
        .await?;
        Ok(popped)
    }

    /// Replace a session's items in one write.
    pub async fn replace(
        &self,
        id: &str,
        items: Vec<ConversationItem>,
    ) -> Result<(), SessionStoreError> {
        self.replace_as(id, items, false).await
    }

    pub(crate) async fn replace_as(
        &self,
        id: &str,
        items: Vec<ConversationItem>,
        generated_id: bool,
    ) -> Result<(), SessionStoreError> {
        self.mutate(|doc| {
            let record = doc
                .sessions
                .entry(id.to_string())
                .or_insert_with(|| SessionRecord::new(generated_id));
            record.items = items;
            record.touch();
            true
        })
        .await
        .map(|_| ())
    }

    /// Replace the leading `expected` items with `items`, keeping anything
    /// appended after them.
    ///
    /// Returns `false` without writing when the stored log no longer starts
    /// with `expected`.
    pub async fn replace_prefix(
        &self,
        id: &str,
        expected: &[ConversationItem],
        items: Vec<ConversationItem>,
    ) -> Result<bool, SessionStoreError> {
        self.mutate(|doc| {
            let Some(record) = doc.sessions.get_mut(id) else {
                return false;
            };
            if !record.items.starts_with(expected) {
                return false;
            }
            let mut replaced = items;
            replaced.extend(record.items.drain(expected.len()..));
            record.items = replaced;
            record.touch();
            true
        })
        .await
    }

    /// Remove a session entirely. Returns whether it existed.
    pub async fn clear(&self, id: &str) -> Result<bool, SessionStoreError> {
        self.mutate(|doc| doc.sessions.remove(id).is_some()).await
    }

    /// Sessions ordered by most recently updated.
    pub async fn list(&self) -> Result<Vec<SessionSummary>, SessionStoreError> {
        let doc = self.read_document().await?;
        let mut summaries: Vec<SessionSummary> = doc
            .sessions
            .into_iter()
            .map(|(id, record)| SessionSummary {
                first_user_message: first_user_message(&record.items),
                item_count: record.items.len(),
                id,
                created_at: record.created_at,
                updated_at: record.updated_at,
                generated_id: record.generated_id,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Id of the earliest-created session, if any.
    pub async fn first_session_id(&self) -> Result<Option<String>, SessionStoreError> {
        let doc = self.read_document().await?;
        Ok(doc
            .sessions
            .into_iter()
            .min_by(|(a_id, a), (b_id, b)| a.created_at.cmp(&b.created_at).then_with(|| a_id.cmp(b_id)))
            .map(|(id, _)| id))
    }

    /// Read, apply `f`, and write back if it reports a change.
    async fn mutate(
        &self,
        f: impl FnOnce(&mut StoreDocument) -> bool,
    ) -> Result<bool, SessionStoreError> {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.read_document().await?;
        let changed = f(&mut doc);
        if changed {
            self.write_document(&doc).await?;
        }
        Ok(changed)
    }

    /// Missing or unparseable storage reads as an empty store.
    async fn read_document(&self) -> Result<StoreDocument, SessionStoreError> {
        if !self.backend.exists().await {
            return Ok(StoreDocument::default());
        }

        let bytes = match self.backend.read_all().await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default());
            }
            Err(source) => {
                return Err(SessionStoreError::Read {
                    location: self.backend.location(),
                    source,
                });
            }
        };

        match serde_json::from_slice::<StoreDocument>(&bytes) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                tracing::warn!(
                    location = %self.backend.location(),
                    "Session store is corrupt, starting empty: {e}"
                );
                Ok(StoreDocument::default())
            }
        }
    }

    async fn write_document(&self, doc: &StoreDocument) -> Result<(), SessionStoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let write_err = |source: std::io::Error| SessionStoreError::Write {
            location: self.backend.location(),
            source,
        };
        self.backend
            .create_parent_dirs()
            .await
            .map_err(write_err)?;
        self.backend.write_all(&bytes).await.map_err(write_err)
    }
}

/// First user text in a session, truncated for display.
fn first_user_message(items: &[ConversationItem]) -> Option<String> {
    items.iter().find_map(|item| match item {
        ConversationItem::Message {
            role: Role::User,
            content,
        } => {
            let text = content.as_text();
            let truncated = if text.chars().count() > 100 {
                format!("{}...", text.chars().take(100).collect::<String>())
            } else {
                text.into_owned()
            };
            Some(truncated)
        }
        _ => None,
    })
}
