//! Error types for the afpp-core library.

use std::time::Duration;

use afpp_engine::EngineError;
use thiserror::Error;

/// Boxed error returned by a caller-supplied page transform.
pub type TransformFailure = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for the afpp library.
#[derive(Error, Debug)]
pub enum AfppError {
    /// The input is none of the accepted source shapes.
    #[error("Invalid source type: {0}")]
    InvalidInputType(String),

    /// The document file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The document is encrypted and no password was supplied.
    #[error("No password given")]
    PasswordRequired,

    /// The supplied password does not decrypt the document.
    #[error("Incorrect Password")]
    IncorrectPassword,

    /// Any other failure reported by the PDF engine.
    #[error("{name}: {message}")]
    Engine { name: String, message: String },

    /// The caller's transform failed on a page.
    #[error("transform failed on page {page}: {source}")]
    Transform {
        page: u32,
        #[source]
        source: TransformFailure,
    },

    /// A page task panicked or was cancelled.
    #[error("page task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The whole extraction exceeded its deadline.
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    /// Options could not be loaded or are invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl AfppError {
    /// Map an engine error raised while processing `page`.
    pub fn on_page(error: EngineError, page: u32) -> Self {
        match AfppError::from(error) {
            AfppError::Engine { name, message } => AfppError::Engine {
                name,
                message: format!("page {}: {}", page, message),
            },
            other => other,
        }
    }
}

impl From<EngineError> for AfppError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::PasswordRequired => AfppError::PasswordRequired,
            EngineError::IncorrectPassword => AfppError::IncorrectPassword,
            EngineError::Io(e) => AfppError::Io(e),
            other => AfppError::Engine {
                name: other.name().to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Result type for the afpp library.
pub type Result<T> = std::result::Result<T, AfppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_password_errors_map_to_dedicated_kinds() {
        assert!(matches!(
            AfppError::from(EngineError::PasswordRequired),
            AfppError::PasswordRequired
        ));
        assert!(matches!(
            AfppError::from(EngineError::IncorrectPassword),
            AfppError::IncorrectPassword
        ));
    }

    #[test]
    fn test_engine_error_keeps_name_and_message() {
        let err = AfppError::from(EngineError::Parse("missing xref".into()));
        match &err {
            AfppError::Engine { name, message } => {
                assert_eq!(name, "InvalidPDFException");
                assert_eq!(message, "invalid PDF structure: missing xref");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(
            err.to_string(),
            "InvalidPDFException: invalid PDF structure: missing xref"
        );
    }

    #[test]
    fn test_on_page_prefixes_message() {
        let err = AfppError::on_page(EngineError::Render("surface too large".into()), 7);
        assert_eq!(
            err.to_string(),
            "RenderException: page 7: failed to render page: surface too large"
        );

        let err = AfppError::on_page(EngineError::IncorrectPassword, 2);
        assert!(matches!(err, AfppError::IncorrectPassword));
    }

    #[test]
    fn test_io_passes_through() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = AfppError::from(EngineError::Io(io));
        assert!(matches!(err, AfppError::Io(_)));
    }

    #[test]
    fn test_messages_match_engine_conventions() {
        assert_eq!(AfppError::PasswordRequired.to_string(), "No password given");
        assert_eq!(AfppError::IncorrectPassword.to_string(), "Incorrect Password");
        assert_eq!(
            AfppError::InvalidInputType("undefined".into()).to_string(),
            "Invalid source type: undefined"
        );
    }
}
