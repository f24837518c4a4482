//! Content stores
//!
//! A [`ContentStore`] hands out the files of a book by their path inside the
//! container (`OEBPS/text/ch01.xhtml`). Books can be read from an unpacked
//! directory, straight from the `.epub` archive, or from memory.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use parking_lot::Mutex;
use tracing::{debug, warn};
use zip::result::ZipError;
use zip::ZipArchive;

use crate::dom::Document;
use crate::error::{Result, StoreError};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Strip fragments and leading separators, decode percent escapes
fn normalize_path(path: &str) -> String {
    let path = path.split('#').next().unwrap_or(path);
    let decoded = urlencoding::decode(path).unwrap_or_else(|_| path.into());
    decoded.replace('\\', "/").trim_start_matches("./").trim_start_matches('/').to_string()
}

/// Source of book files
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Raw bytes of a file
    async fn get_bytes(&self, path: &str) -> StoreResult<Vec<u8>>;

    /// A file decoded as UTF-8
    async fn get_text(&self, path: &str) -> StoreResult<String> {
        let bytes = self.get_bytes(path).await?;
        String::from_utf8(bytes).map_err(|_| StoreError::Utf8(path.to_string()))
    }

    /// A file parsed as XML/XHTML
    async fn get_xml(&self, path: &str) -> Result<Document> {
        let text = self.get_text(path).await?;
        Document::parse(&text)
    }

    /// A `data:` URL for a resource
    async fn get_url(&self, path: &str) -> StoreResult<String> {
        let bytes = self.get_bytes(path).await?;
        let mime_type = mime_guess::from_path(normalize_path(path))
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        Ok(format!("data:{};base64,{}", mime_type, BASE64.encode(bytes)))
    }
}

/// Files held in memory
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    files: HashMap<String, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(normalize_path(path), contents.into());
    }

    /// Builder form of [`MemoryStore::insert`]
    pub fn with(mut self, path: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn get_bytes(&self, path: &str) -> StoreResult<Vec<u8>> {
        self.files
            .get(&normalize_path(path))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

/// An unpacked book on disk
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ContentStore for DirectoryStore {
    async fn get_bytes(&self, path: &str) -> StoreResult<Vec<u8>> {
        let full = self.root.join(normalize_path(path));
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if tokio::fs::metadata(&self.root).await.is_err() {
                    return Err(StoreError::Offline(self.root.display().to_string()));
                }
                Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// A packed `.epub` archive
pub struct ZipStore {
    archive: Mutex<ZipArchive<Cursor<Vec<u8>>>>,
}

impl ZipStore {
    pub fn from_bytes(bytes: Vec<u8>) -> StoreResult<Self> {
        let archive = ZipArchive::new(Cursor::new(bytes))?;
        debug!(entries = archive.len(), "opened archive");
        Ok(Self {
            archive: Mutex::new(archive),
        })
    }

    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        Self::from_bytes(bytes)
    }

    pub fn file_names(&self) -> Vec<String> {
        self.archive.lock().file_names().map(str::to_string).collect()
    }
}

impl std::fmt::Debug for ZipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipStore")
            .field("entries", &self.archive.lock().len())
            .finish()
    }
}

#[async_trait]
impl ContentStore for ZipStore {
    async fn get_bytes(&self, path: &str) -> StoreResult<Vec<u8>> {
        let name = normalize_path(path);
        let mut archive = self.archive.lock();
        let mut file = match archive.by_name(&name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Err(StoreError::NotFound(path.to_string())),
            Err(e) => return Err(StoreError::Archive(e)),
        };
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }
}

/// Open a directory or `.epub` file as a store
pub async fn open_store(path: impl AsRef<Path>) -> StoreResult<Arc<dyn ContentStore>> {
    let path = path.as_ref();
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        warn!(path = %path.display(), error = %e, "book not reachable");
        StoreError::Offline(path.display().to_string())
    })?;
    if metadata.is_dir() {
        Ok(Arc::new(DirectoryStore::new(path)))
    } else {
        Ok(Arc::new(ZipStore::open(path).await?))
    }
}
