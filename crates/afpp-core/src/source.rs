//! Document sources and their normalization.

use std::any::Any;
use std::path::{Path, PathBuf};

use afpp_engine::{DocumentData, Url};
use tracing::debug;

use crate::error::{AfppError, Result};

/// Where a PDF document comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// A file on the local filesystem.
    Path(PathBuf),
    /// Document bytes already in memory.
    Bytes(Vec<u8>),
    /// A URL the engine fetches.
    Remote(Url),
}

impl DocumentSource {
    /// Accept an untyped value, checking its shape at runtime.
    ///
    /// Paths (`String`, `&'static str`, `PathBuf`), byte buffers (`Vec<u8>`,
    /// `&'static [u8]`, `Box<[u8]>`), URLs and `DocumentSource` itself are
    /// accepted. Anything else fails with [`AfppError::InvalidInputType`]
    /// naming the received type.
    pub fn from_dynamic<T: Any>(value: T) -> Result<Self> {
        let value: Box<dyn Any> = Box::new(value);

        let value = match value.downcast::<DocumentSource>() {
            Ok(source) => return Ok(*source),
            Err(value) => value,
        };
        let value = match value.downcast::<String>() {
            Ok(path) => return Ok(DocumentSource::Path(PathBuf::from(*path))),
            Err(value) => value,
        };
        let value = match value.downcast::<&'static str>() {
            Ok(path) => return Ok(DocumentSource::Path(PathBuf::from(*path))),
            Err(value) => value,
        };
        let value = match value.downcast::<PathBuf>() {
            Ok(path) => return Ok(DocumentSource::Path(*path)),
            Err(value) => value,
        };
        let value = match value.downcast::<Vec<u8>>() {
            Ok(bytes) => return Ok(DocumentSource::Bytes(*bytes)),
            Err(value) => value,
        };
        let value = match value.downcast::<&'static [u8]>() {
            Ok(bytes) => return Ok(DocumentSource::Bytes(bytes.to_vec())),
            Err(value) => value,
        };
        let value = match value.downcast::<Box<[u8]>>() {
            Ok(bytes) => return Ok(DocumentSource::Bytes(bytes.into_vec())),
            Err(value) => value,
        };
        if let Ok(url) = value.downcast::<Url>() {
            return Ok(DocumentSource::Remote(*url));
        }

        Err(AfppError::InvalidInputType(
            std::any::type_name::<T>().to_string(),
        ))
    }

    /// Resolve the source into data the engine can open.
    ///
    /// Paths are read here; URLs are passed through untouched.
    pub async fn normalize(self) -> Result<DocumentData> {
        match self {
            DocumentSource::Path(path) => {
                debug!("reading document from {}", path.display());
                let bytes = tokio::fs::read(&path).await?;
                Ok(DocumentData::Bytes(bytes))
            }
            DocumentSource::Bytes(bytes) => Ok(DocumentData::Bytes(bytes)),
            DocumentSource::Remote(url) => Ok(DocumentData::Remote(url)),
        }
    }
}

impl From<&str> for DocumentSource {
    fn from(path: &str) -> Self {
        DocumentSource::Path(PathBuf::from(path))
    }
}

impl From<String> for DocumentSource {
    fn from(path: String) -> Self {
        DocumentSource::Path(PathBuf::from(path))
    }
}

impl From<&Path> for DocumentSource {
    fn from(path: &Path) -> Self {
        DocumentSource::Path(path.to_path_buf())
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(path: PathBuf) -> Self {
        DocumentSource::Path(path)
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(bytes: Vec<u8>) -> Self {
        DocumentSource::Bytes(bytes)
    }
}

impl From<&[u8]> for DocumentSource {
    fn from(bytes: &[u8]) -> Self {
        DocumentSource::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for DocumentSource {
    fn from(bytes: [u8; N]) -> Self {
        DocumentSource::Bytes(bytes.to_vec())
    }
}

impl From<Url> for DocumentSource {
    fn from(url: Url) -> Self {
        DocumentSource::Remote(url)
    }
}
