//! PDF engine abstraction layer for afpp.
//!
//! This crate provides a unified interface over a PDF engine:
//! - opening documents from bytes or URLs, with password support
//! - per-page text runs, with optional marked-content items
//! - page viewports and rendering onto raster surfaces
//!
//! The bundled backend uses `lopdf` for document access and the `image`
//! crate for surfaces.

mod backend;
mod error;
mod fetch;
mod surface;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use backend::lopdf_backend::{LopdfDocument, LopdfEngine, LopdfPage};
pub use backend::{
    DocumentData, OpenRequest, PdfDocument, PdfEngine, PdfPage, TextContent, TextContentOptions,
    TextItem, Viewport,
};
pub use error::EngineError;
pub use fetch::Fetcher;
pub use surface::{
    ImageSurface, ImageSurfaceProvider, MAX_SURFACE_EDGE, Matrix, RasterSurface, SurfaceProvider,
};

/// Re-export of the URL type used for remote documents.
pub use reqwest::Url;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
