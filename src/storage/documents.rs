//! Uploaded certificate documents on the local filesystem.

use crate::crypto::hashing::sha256;
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is empty")]
    Empty,
    #[error("document exceeds {max} bytes")]
    TooLarge { max: usize },
    #[error("unsupported document type; expected PDF, PNG or JPEG")]
    UnsupportedType,
    #[error("document storage failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Png,
    Jpeg,
}

impl DocumentKind {
    /// Identifies the file type from its leading bytes; the client-supplied name is not trusted.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentKind::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(DocumentKind::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentKind::Jpeg)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "pdf",
            DocumentKind::Png => "png",
            DocumentKind::Jpeg => "jpg",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            DocumentKind::Pdf => "application/pdf",
            DocumentKind::Png => "image/png",
            DocumentKind::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StoredDocument {
    /// Path to pass as `document_path` when issuing.
    pub file_path: String,
    /// Hex SHA-256 of the stored bytes.
    pub digest: String,
    pub size: usize,
    pub content_type: String,
    pub original_name: Option<String>,
}

/// Paths under this prefix were produced by [`DocumentStore::save`].
pub const LOCAL_PREFIX: &str = "documents/";

/// What the store knows about a `document_path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalDigest {
    /// Not a path this store produces, e.g. an external URL.
    External,
    /// A local path whose file is gone or was never written.
    Missing,
    /// Hex SHA-256 of the file as it is now.
    Present(String),
}

#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
    max_bytes: usize,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn save(&self, bytes: &[u8], original_name: Option<&str>) -> Result<StoredDocument, DocumentError> {
        if bytes.is_empty() {
            return Err(DocumentError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(DocumentError::TooLarge { max: self.max_bytes });
        }
        let kind = DocumentKind::sniff(bytes).ok_or(DocumentError::UnsupportedType)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("{}.{}", Uuid::new_v4(), kind.extension());
        let path = self.dir.join(&file_name);
        tokio::fs::write(&path, bytes).await?;

        tracing::info!(file = %file_name, size = bytes.len(), "stored uploaded document");

        Ok(StoredDocument {
            file_path: format!("{}{}", LOCAL_PREFIX, file_name),
            digest: hex::encode(sha256(bytes)),
            size: bytes.len(),
            content_type: kind.content_type().to_string(),
            original_name: original_name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty()),
        })
    }

    /// Digest of a document previously returned by [`DocumentStore::save`].
    pub async fn digest_of(&self, file_path: &str) -> Result<LocalDigest, DocumentError> {
        let name = match file_path.strip_prefix(LOCAL_PREFIX) {
            Some(n) => n,
            None => return Ok(LocalDigest::External),
        };
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return Ok(LocalDigest::Missing);
        }
        match tokio::fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(LocalDigest::Present(hex::encode(sha256(&bytes)))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LocalDigest::Missing),
            Err(e) => Err(e.into()),
        }
    }
}
