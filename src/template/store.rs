//! Persistence backends for fingerprint templates.
//!
//! A store deals in raw JSON documents keyed by template id. Parsing and
//! validation live in [`TemplateManager`](super::TemplateManager), so a store
//! can hand back whatever bytes it has, corrupt or not.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

/// Errors raised by a template store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem access failed.
    #[error("Template store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The id cannot be used as a storage key.
    #[error("Invalid template id for storage: {0}")]
    InvalidId(String),

    /// No document is stored under the id.
    #[error("No stored template with id {0}")]
    Missing(String),
}

/// Raw document storage for templates.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// Ids of every stored document, in no particular order.
    async fn list_ids(&self) -> Result<Vec<String>, StoreError>;

    async fn read(&self, id: &str) -> Result<String, StoreError>;

    /// Creates or replaces the document for `id`.
    async fn write(&self, id: &str, document: &str) -> Result<(), StoreError>;

    /// Removes the document. Removing a missing id is not an error.
    async fn remove(&self, id: &str) -> Result<(), StoreError>;
}

/// Volatile store for tests and hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a document as-is, bypassing the manager.
    pub fn insert_raw(&self, id: impl Into<String>, document: impl Into<String>) {
        self.documents.write().insert(id.into(), document.into());
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }
}

#[async_trait]
impl TemplateStore for MemoryStore {
    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.documents.read().keys().cloned().collect())
    }

    async fn read(&self, id: &str) -> Result<String, StoreError> {
        self.documents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::Missing(id.to_string()))
    }

    async fn write(&self, id: &str, document: &str) -> Result<(), StoreError> {
        self.documents
            .write()
            .insert(id.to_string(), document.to_string());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.documents.write().remove(id);
        Ok(())
    }
}

/// Directory of `<id>.json` documents.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Uses `dir` as the template directory; it is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, StoreError> {
        let safe = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", id)))
    }
}

#[async_trait]
impl TemplateStore for FileStore {
    async fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    async fn read(&self, id: &str) -> Result<String, StoreError> {
        let path = self.path_for(id)?;
        match fs::read_to_string(&path).await {
            Ok(document) => Ok(document),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::Missing(id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, id: &str, document: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        fs::create_dir_all(&self.dir).await?;

        // Write to a sibling file first so readers never see a partial document.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, document).await?;
        fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Template written");
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<(), StoreError> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
