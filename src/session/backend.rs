//! Physical storage behind the session store.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Byte-oriented storage for the whole session store document.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn exists(&self) -> bool;

    async fn read_all(&self) -> io::Result<Vec<u8>>;

    /// Replace the stored bytes. Readers never observe a partial write.
    async fn write_all(&self, bytes: &[u8]) -> io::Result<()>;

    /// Create missing parent directories.
    async fn create_parent_dirs(&self) -> io::Result<()>;

    /// Human-readable location for logs and errors.
    fn location(&self) -> String;
}

/// Single JSON file on disk.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "sessions.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl StoreBackend for FileBackend {
    async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn read_all(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }

    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        // Write beside the target and rename over it
        let temp = self.temp_path();
        tokio::fs::write(&temp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn create_parent_dirs(&self) -> io::Result<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                tokio::fs::create_dir_all(parent).await
            }
            _ => Ok(()),
        }
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-process storage for sessions that should not outlive the process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    bytes: Mutex<Option<Vec<u8>>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.bytes
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn exists(&self) -> bool {
        self.lock().is_some()
    }

    async fn read_all(&self) -> io::Result<Vec<u8>> {
        self.lock()
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "empty memory store"))
    }

    async fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        *self.lock() = Some(bytes.to_vec());
        Ok(())
    }

    async fn create_parent_dirs(&self) -> io::Result<()> {
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".to_string()
    }
}
