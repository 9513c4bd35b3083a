//! Error types for the engine layer.

use thiserror::Error;

/// Errors that can occur while opening, reading or rendering a document.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The document is encrypted and no password was supplied.
    #[error("no password given")]
    PasswordRequired,

    /// The supplied password does not decrypt the document.
    #[error("incorrect password")]
    IncorrectPassword,

    /// The document structure could not be parsed.
    #[error("invalid PDF structure: {0}")]
    Parse(String),

    /// A page outside `1..=page_count` was requested.
    #[error("invalid page number: {0}")]
    InvalidPage(u32),

    /// A remote document could not be fetched.
    #[error("failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Rendering a page onto a surface failed.
    #[error("failed to render page: {0}")]
    Render(String),

    /// Encoding a rendered surface failed.
    #[error("failed to encode surface: {0}")]
    Encode(#[from] image::ImageError),

    /// I/O error while reading document data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable name of the error kind, independent of the message.
    pub fn name(&self) -> &'static str {
        match self {
            EngineError::PasswordRequired => "PasswordException",
            EngineError::IncorrectPassword => "PasswordException",
            EngineError::Parse(_) => "InvalidPDFException",
            EngineError::InvalidPage(_) => "InvalidPageException",
            EngineError::Fetch { .. } => "FetchException",
            EngineError::Render(_) => "RenderException",
            EngineError::Encode(_) => "EncodeException",
            EngineError::Io(_) => "IoException",
        }
    }
}
