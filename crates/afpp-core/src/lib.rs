//! Per-page PDF text and image extraction.
//!
//! This crate opens a PDF through an [`afpp_engine::PdfEngine`], processes every
//! page concurrently and returns one value per page in page order:
//! - [`extract_text`]: joined text runs
//! - [`extract_images`]: a PNG rendering of each page
//! - [`extract_generic`]: text, or a rendering for pages without text
//! - [`extract_with`]: like `extract_generic`, through a caller transform
//!
//! The free functions use the bundled lopdf engine. Use [`PageExtractor`] to
//! plug in another engine or surface provider.

pub mod content;
pub mod error;
pub mod extractor;
pub mod options;
pub mod source;

pub use content::{PageContent, PageSlots};
pub use error::{AfppError, Result, TransformFailure};
pub use extractor::PageExtractor;
pub use options::ParseOptions;
pub use source::DocumentSource;

/// Re-export of the URL type accepted as a remote source.
pub use afpp_engine::Url;

/// Text of every page, in page order.
pub async fn extract_text(
    input: impl Into<DocumentSource>,
    options: &ParseOptions,
) -> Result<Vec<String>> {
    PageExtractor::new().extract_text(input, options).await
}

/// PNG rendering of every page, in page order.
pub async fn extract_images(
    input: impl Into<DocumentSource>,
    options: &ParseOptions,
) -> Result<Vec<Vec<u8>>> {
    PageExtractor::new().extract_images(input, options).await
}

/// Text of every page, or a PNG rendering for pages without text.
pub async fn extract_generic(
    input: impl Into<DocumentSource>,
    options: &ParseOptions,
) -> Result<Vec<PageContent>> {
    PageExtractor::new().extract_generic(input, options).await
}

/// [`extract_generic`] with each page passed through `transform`.
pub async fn extract_with<T, F, Er>(
    input: impl Into<DocumentSource>,
    options: &ParseOptions,
    transform: F,
) -> Result<Vec<T>>
where
    T: Send + 'static,
    F: Fn(PageContent) -> std::result::Result<T, Er> + Send + Sync + 'static,
    Er: Into<TransformFailure>,
{
    PageExtractor::new()
        .extract_with(input, options, transform)
        .await
}
