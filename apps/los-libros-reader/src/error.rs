//! Error types for the Los Libros reader core

use thiserror::Error;

/// Reader-wide result type
pub type Result<T> = std::result::Result<T, ReaderError>;

/// Reader error type
#[derive(Error, Debug)]
pub enum ReaderError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML deserialization error: {0}")]
    XmlDeserialize(#[from] quick_xml::de::DeError),

    #[error("Invalid package: {0}")]
    Package(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A chapter load or move is already in flight
    #[error("Renderer busy: {0}")]
    Busy(&'static str),

    #[error("Book is not open")]
    NotOpen,

    #[error("Book is not rendered")]
    NotRendered,

    #[error("Reader task stopped")]
    Closed,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content store errors
///
/// `NotFound` and `Offline` are kept apart so callers can tell a missing
/// resource from a store that cannot be reached at all.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("File not found in the storage: {0}")]
    NotFound(String),

    #[error("Store offline: {0}")]
    Offline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Invalid UTF-8 in {0}")]
    Utf8(String),
}

impl ReaderError {
    /// True when the error means a resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ReaderError::NotFound(_) | ReaderError::Store(StoreError::NotFound(_))
        )
    }
}
