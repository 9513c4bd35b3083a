//! PDF engine backends.

pub mod lopdf_backend;

use std::future::Future;

use reqwest::Url;

use crate::surface::{Matrix, RasterSurface};
use crate::Result;

/// Document data in the form the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentData {
    /// Raw document bytes.
    Bytes(Vec<u8>),
    /// A document the engine fetches itself.
    Remote(Url),
}

impl DocumentData {
    /// Short description used in log lines.
    pub fn describe(&self) -> String {
        match self {
            DocumentData::Bytes(bytes) => format!("{} bytes", bytes.len()),
            DocumentData::Remote(url) => url.to_string(),
        }
    }
}

/// Parameters for opening a document.
#[derive(Clone)]
pub struct OpenRequest {
    /// The document data or reference.
    pub data: DocumentData,
    /// Password for encrypted documents.
    pub password: Option<String>,
}

impl OpenRequest {
    pub fn new(data: DocumentData) -> Self {
        Self {
            data,
            password: None,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("data", &self.data.describe())
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Options for [`PdfPage::text_content`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextContentOptions {
    /// Emit marked-content boundaries as items alongside the text runs.
    pub include_marked_content: bool,
}

/// A single item of a page's text content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextItem {
    /// A run of text produced by one text-showing operator.
    ///
    /// `text` is `None` when the operator carried no string payload.
    Run { text: Option<String> },
    /// Start of a marked-content sequence.
    BeginMarkedContent { tag: String },
    /// End of a marked-content sequence.
    EndMarkedContent,
    /// A marked-content point (`MP` or `DP`), with no enclosed content.
    MarkedContentPoint { tag: String },
}

/// Text content of a page, in content-stream order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextContent {
    pub items: Vec<TextItem>,
}

impl TextContent {
    /// Iterate the text runs, skipping marked-content items.
    pub fn runs(&self) -> impl Iterator<Item = Option<&str>> {
        self.items.iter().filter_map(|item| match item {
            TextItem::Run { text } => Some(text.as_deref()),
            _ => None,
        })
    }
}

/// Device-space geometry of a page at a given scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Width in device pixels (unrounded).
    pub width: f32,
    /// Height in device pixels (unrounded).
    pub height: f32,
    /// Scale factor relative to PDF user space.
    pub scale: f32,
    /// Page rotation in degrees (0, 90, 180 or 270).
    pub rotation: i64,
    /// Maps PDF user space to device space.
    pub transform: Matrix,
}

impl Viewport {
    /// Build a viewport for a media box `[llx, lly, urx, ury]`.
    pub fn new(media_box: [f32; 4], scale: f32, rotation: i64) -> Self {
        let [llx, lly, urx, ury] = media_box;
        let (page_width, page_height) = ((urx - llx).abs(), (ury - lly).abs());
        let s = scale;
        let rotation = rotation.rem_euclid(360) / 90 * 90;

        let (width, height, transform) = match rotation {
            90 => (
                page_height * s,
                page_width * s,
                Matrix::new(0.0, s, s, 0.0, -lly * s, -llx * s),
            ),
            180 => (
                page_width * s,
                page_height * s,
                Matrix::new(-s, 0.0, 0.0, s, urx * s, -lly * s),
            ),
            270 => (
                page_height * s,
                page_width * s,
                Matrix::new(0.0, -s, -s, 0.0, ury * s, urx * s),
            ),
            _ => (
                page_width * s,
                page_height * s,
                Matrix::new(s, 0.0, 0.0, -s, -llx * s, ury * s),
            ),
        };

        Self {
            width,
            height,
            scale,
            rotation,
            transform,
        }
    }

    /// Surface size in whole pixels, never zero.
    pub fn pixel_size(&self) -> (u32, u32) {
        let round = |v: f32| (v.ceil() as u32).max(1);
        (round(self.width), round(self.height))
    }
}

/// Trait for PDF engine implementations.
///
/// An engine turns document data into an opened [`PdfDocument`]. Opening may
/// involve network I/O (remote documents) so it is asynchronous; everything
/// after that is synchronous and runs on the caller's worker threads.
pub trait PdfEngine: Send + Sync + 'static {
    type Document: PdfDocument;

    /// Open a document, decrypting it with the request's password if needed.
    fn open(&self, request: OpenRequest) -> impl Future<Output = Result<Self::Document>> + Send;
}

/// An opened document.
pub trait PdfDocument: Send + Sync + 'static {
    type Page: PdfPage;

    /// Number of pages in the document.
    fn page_count(&self) -> u32;

    /// Get a page by its 1-based number.
    fn page(&self, number: u32) -> Result<Self::Page>;
}

/// A single page of an opened document.
pub trait PdfPage {
    /// 1-based page number.
    fn number(&self) -> u32;

    /// Extract the page's text runs.
    fn text_content(&self, options: TextContentOptions) -> Result<TextContent>;

    /// Geometry of the page at `scale`.
    fn viewport(&self, scale: f32) -> Result<Viewport>;

    /// Paint the page onto `surface` using `viewport`.
    fn render(&self, viewport: &Viewport, surface: &mut dyn RasterSurface) -> Result<()>;
}
