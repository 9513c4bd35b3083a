//! Concurrent per-page extraction.

use std::sync::Arc;

use afpp_engine::{
    ImageSurfaceProvider, LopdfEngine, OpenRequest, PdfDocument, PdfEngine, PdfPage,
    RasterSurface, SurfaceProvider, TextContentOptions,
};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::content::{PageContent, PageSlots};
use crate::error::{AfppError, Result, TransformFailure};
use crate::options::ParseOptions;
use crate::source::DocumentSource;

/// What each page task produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Joined text runs; pages without text yield an empty string.
    Text,
    /// Always render the page.
    Images,
    /// Joined text runs, or a rendering when the page has none.
    Generic,
}

/// Extracts per-page content through a PDF engine and a surface provider.
#[derive(Debug, Clone)]
pub struct PageExtractor<E = LopdfEngine, S = ImageSurfaceProvider> {
    engine: E,
    surfaces: Arc<S>,
}

impl PageExtractor {
    /// Extractor using the lopdf engine and PNG surfaces.
    pub fn new() -> Self {
        Self::with_backend(LopdfEngine::new(), ImageSurfaceProvider::new())
    }
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: PdfEngine, S: SurfaceProvider> PageExtractor<E, S> {
    pub fn with_backend(engine: E, surfaces: S) -> Self {
        Self {
            engine,
            surfaces: Arc::new(surfaces),
        }
    }

    /// Text of every page, in page order.
    ///
    /// Pages without text yield an empty string; nothing is rendered.
    pub async fn extract_text(
        &self,
        input: impl Into<DocumentSource>,
        options: &ParseOptions,
    ) -> Result<Vec<String>> {
        self.run(input.into(), options, Mode::Text, |_, content| {
            Ok(match content {
                PageContent::Text(text) => text,
                PageContent::Image(_) => String::new(),
            })
        })
        .await
    }

    /// Encoded rendering of every page, in page order.
    pub async fn extract_images(
        &self,
        input: impl Into<DocumentSource>,
        options: &ParseOptions,
    ) -> Result<Vec<Vec<u8>>> {
        self.run(input.into(), options, Mode::Images, |_, content| {
            Ok(match content {
                PageContent::Image(bytes) => bytes,
                PageContent::Text(_) => Vec::new(),
            })
        })
        .await
    }

    /// Text of every page, falling back to a rendering for pages without text.
    pub async fn extract_generic(
        &self,
        input: impl Into<DocumentSource>,
        options: &ParseOptions,
    ) -> Result<Vec<PageContent>> {
        self.run(input.into(), options, Mode::Generic, |_, content| Ok(content))
            .await
    }

    /// Like [`extract_generic`](Self::extract_generic), with each page passed
    /// through `transform` before it is stored.
    ///
    /// A transform failure fails the whole call with [`AfppError::Transform`].
    pub async fn extract_with<T, F, Er>(
        &self,
        input: impl Into<DocumentSource>,
        options: &ParseOptions,
        transform: F,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(PageContent) -> std::result::Result<T, Er> + Send + Sync + 'static,
        Er: Into<TransformFailure>,
    {
        self.run(input.into(), options, Mode::Generic, move |page, content| {
            transform(content).map_err(|e| AfppError::Transform {
                page,
                source: e.into(),
            })
        })
        .await
    }

    async fn run<T, F>(
        &self,
        input: DocumentSource,
        options: &ParseOptions,
        mode: Mode,
        finish: F,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(u32, PageContent) -> Result<T> + Send + Sync + 'static,
    {
        options.validate()?;
        let work = self.run_pages(input, options, mode, Arc::new(finish));
        match options.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| AfppError::Timeout(limit))?,
            None => work.await,
        }
    }

    async fn run_pages<T, F>(
        &self,
        input: DocumentSource,
        options: &ParseOptions,
        mode: Mode,
        finish: Arc<F>,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(u32, PageContent) -> Result<T> + Send + Sync + 'static,
    {
        let data = input.normalize().await?;
        debug!(source = %data.describe(), ?mode, "opening document");

        let request = OpenRequest::new(data).with_password(options.password.clone());
        let document = Arc::new(self.engine.open(request).await?);
        let page_count = document.page_count();
        debug!(page_count, "document opened");

        let limiter = options
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.get())));
        let scale = options.scale;
        let mut tasks = JoinSet::new();

        for number in 1..=page_count {
            let document = Arc::clone(&document);
            let surfaces = Arc::clone(&self.surfaces);
            let finish = Arc::clone(&finish);
            let limiter = limiter.clone();

            tasks.spawn(async move {
                // The semaphore is never closed, so acquiring only waits.
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                tokio::task::spawn_blocking(move || {
                    let content = extract_page(&*document, number, mode, scale, &*surfaces)?;
                    let value = finish(number, content)?;
                    Ok::<_, AfppError>((number, value))
                })
                .await
                .unwrap_or_else(|e| Err(AfppError::Join(e)))
            });
        }

        let mut slots = PageSlots::new(page_count);
        while let Some(joined) = tasks.join_next().await {
            let (number, value) = joined??;
            trace!(page = number, "page finished");
            slots.fill(number, value)?;
        }
        slots.finish()
    }
}

fn extract_page<D: PdfDocument, S: SurfaceProvider>(
    document: &D,
    number: u32,
    mode: Mode,
    scale: f32,
    surfaces: &S,
) -> Result<PageContent> {
    let content = document
        .page(number)
        .and_then(|page| page_content(&page, mode, scale, surfaces));
    content.map_err(|e| AfppError::on_page(e, number))
}

fn page_content<P: PdfPage, S: SurfaceProvider>(
    page: &P,
    mode: Mode,
    scale: f32,
    surfaces: &S,
) -> afpp_engine::Result<PageContent> {
    if mode == Mode::Images {
        return render_page(page, scale, surfaces).map(PageContent::Image);
    }

    let text = page.text_content(TextContentOptions {
        include_marked_content: false,
    })?;
    let runs: Vec<&str> = text.runs().map(|run| run.unwrap_or("")).collect();

    if runs.is_empty() && mode == Mode::Generic {
        trace!(page = page.number(), "no text runs, rendering page");
        return render_page(page, scale, surfaces).map(PageContent::Image);
    }
    Ok(PageContent::Text(runs.join(" ")))
}

fn render_page<P: PdfPage, S: SurfaceProvider>(
    page: &P,
    scale: f32,
    surfaces: &S,
) -> afpp_engine::Result<Vec<u8>> {
    let viewport = page.viewport(scale)?;
    let (width, height) = viewport.pixel_size();
    let mut surface = surfaces.create(width, height)?;
    page.render(&viewport, &mut surface)?;
    surface.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use afpp_engine::fixtures::{FixtureBuilder, FixtureEncryption, serve_once, text_document};
    use afpp_engine::{EngineError, TextContent, TextItem, Url, Viewport};
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gauge {
        fn enter(&self) {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
        }

        fn leave(&self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Engine serving synthetic pages; an empty run list means "no text".
    #[derive(Clone, Default)]
    struct MockEngine {
        pages: Vec<Vec<Option<&'static str>>>,
        password: Option<&'static str>,
        slow_page: Option<(u32, Duration)>,
        page_delay: Duration,
        failing_page: Option<u32>,
        gauge: Arc<Gauge>,
    }

    impl MockEngine {
        fn with_pages(pages: Vec<Vec<Option<&'static str>>>) -> Self {
            Self {
                pages,
                ..Default::default()
            }
        }
    }

    struct MockDocument {
        engine: MockEngine,
    }

    struct MockPage {
        number: u32,
        engine: MockEngine,
    }

    impl PdfEngine for MockEngine {
        type Document = MockDocument;

        async fn open(&self, request: OpenRequest) -> afpp_engine::Result<MockDocument> {
            match (self.password, request.password.as_deref()) {
                (Some(_), None) => return Err(EngineError::PasswordRequired),
                (Some(expected), Some(given)) if expected != given => {
                    return Err(EngineError::IncorrectPassword);
                }
                _ => {}
            }
            Ok(MockDocument {
                engine: self.clone(),
            })
        }
    }

    impl PdfDocument for MockDocument {
        type Page = MockPage;

        fn page_count(&self) -> u32 {
            self.engine.pages.len() as u32
        }

        fn page(&self, number: u32) -> afpp_engine::Result<MockPage> {
            if number == 0 || number > self.page_count() {
                return Err(EngineError::InvalidPage(number));
            }
            Ok(MockPage {
                number,
                engine: self.engine.clone(),
            })
        }
    }

    impl PdfPage for MockPage {
        fn number(&self) -> u32 {
            self.number
        }

        fn text_content(&self, options: TextContentOptions) -> afpp_engine::Result<TextContent> {
            assert!(!options.include_marked_content);
            self.engine.gauge.enter();
            let mut delay = self.engine.page_delay;
            if let Some((page, slow)) = self.engine.slow_page {
                if page == self.number {
                    delay = slow;
                }
            }
            std::thread::sleep(delay);
            self.engine.gauge.leave();

            if self.engine.failing_page == Some(self.number) {
                return Err(EngineError::Render("broken content stream".into()));
            }
            let runs = &self.engine.pages[self.number as usize - 1];
            Ok(TextContent {
                items: runs
                    .iter()
                    .map(|run| TextItem::Run {
                        text: run.map(str::to_string),
                    })
                    .collect(),
            })
        }

        fn viewport(&self, scale: f32) -> afpp_engine::Result<Viewport> {
            Ok(Viewport::new([0.0, 0.0, 10.0, 20.0], scale, 0))
        }

        fn render(
            &self,
            _viewport: &Viewport,
            surface: &mut dyn RasterSurface,
        ) -> afpp_engine::Result<()> {
            surface.fill([0, 0, 0, 255]);
            Ok(())
        }
    }

    fn mock_extractor(engine: MockEngine) -> PageExtractor<MockEngine, ImageSurfaceProvider> {
        PageExtractor::with_backend(engine, ImageSurfaceProvider::new())
    }

    fn bytes() -> DocumentSource {
        DocumentSource::Bytes(b"%PDF-mock".to_vec())
    }

    #[tokio::test]
    async fn test_runs_joined_with_single_space() {
        let engine = MockEngine::with_pages(vec![
            vec![Some("Hello"), Some("world")],
            vec![Some("a"), None, Some("b")],
        ]);
        let pages = mock_extractor(engine)
            .extract_text(bytes(), &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages, vec!["Hello world".to_string(), "a  b".to_string()]);
    }

    #[tokio::test]
    async fn test_generic_renders_pages_without_text() {
        let engine = MockEngine::with_pages(vec![vec![Some("text")], vec![]]);
        let pages = mock_extractor(engine)
            .extract_generic(bytes(), &ParseOptions::default())
            .await
            .unwrap();

        assert_eq!(pages[0], PageContent::Text("text".into()));
        let image = pages[1].as_image().unwrap();
        assert!(image.starts_with(PNG_MAGIC));
    }

    #[tokio::test]
    async fn test_text_mode_never_renders() {
        let engine = MockEngine::with_pages(vec![vec![], vec![Some("x")]]);
        let pages = mock_extractor(engine)
            .extract_text(bytes(), &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages, vec![String::new(), "x".to_string()]);
    }

    #[tokio::test]
    async fn test_render_uses_configured_scale() {
        let engine = MockEngine::with_pages(vec![vec![Some("ignored")]]);
        let options = ParseOptions::new().with_scale(3.0);
        let images = mock_extractor(engine)
            .extract_images(bytes(), &options)
            .await
            .unwrap();

        let decoded = image::load_from_memory(&images[0]).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 60));
    }

    #[tokio::test]
    async fn test_password_errors() {
        let engine = MockEngine {
            password: Some("secret"),
            ..MockEngine::with_pages(vec![vec![Some("a")], vec![Some("b")]])
        };
        let extractor = mock_extractor(engine);

        let err = extractor
            .extract_text(bytes(), &ParseOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::PasswordRequired));

        let err = extractor
            .extract_text(bytes(), &ParseOptions::new().with_password("wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::IncorrectPassword));

        let pages = extractor
            .extract_text(bytes(), &ParseOptions::new().with_password("secret"))
            .await
            .unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[tokio::test]
    async fn test_slow_page_keeps_its_position() {
        let engine = MockEngine {
            slow_page: Some((1, Duration::from_millis(150))),
            ..MockEngine::with_pages(vec![
                vec![Some("one")],
                vec![Some("two")],
                vec![Some("three")],
            ])
        };
        let pages = mock_extractor(engine)
            .extract_text(bytes(), &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_max_concurrency_caps_in_flight_pages() {
        let engine = MockEngine {
            page_delay: Duration::from_millis(40),
            ..MockEngine::with_pages(vec![vec![Some("p")]; 6])
        };
        let gauge = Arc::clone(&engine.gauge);
        let options = ParseOptions::new().with_max_concurrency(NonZeroUsize::new(2).unwrap());

        let pages = mock_extractor(engine)
            .extract_text(bytes(), &options)
            .await
            .unwrap();
        assert_eq!(pages.len(), 6);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
    }

    #[tokio::test]
    async fn test_page_failure_fails_whole_call() {
        let engine = MockEngine {
            failing_page: Some(3),
            ..MockEngine::with_pages(vec![vec![Some("p")]; 4])
        };
        let err = mock_extractor(engine)
            .extract_generic(bytes(), &ParseOptions::default())
            .await
            .unwrap_err();
        match err {
            AfppError::Engine { name, message } => {
                assert_eq!(name, "RenderException");
                assert!(message.starts_with("page 3:"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transform_applied_and_failure_reported() {
        let engine = MockEngine::with_pages(vec![vec![Some("one")], vec![Some("two")]]);
        let extractor = mock_extractor(engine);

        let lengths = extractor
            .extract_with(bytes(), &ParseOptions::default(), |content| {
                Ok::<_, String>(content.as_text().map(str::len).unwrap_or(0))
            })
            .await
            .unwrap();
        assert_eq!(lengths, vec![3, 3]);

        let err = extractor
            .extract_with(bytes(), &ParseOptions::default(), |content| {
                match content.as_text() {
                    Some("two") => Err("rejected"),
                    _ => Ok(()),
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::Transform { page: 2, .. }));
        assert_eq!(err.to_string(), "transform failed on page 2: rejected");
    }

    #[tokio::test]
    async fn test_timeout() {
        let engine = MockEngine {
            slow_page: Some((1, Duration::from_millis(300))),
            ..MockEngine::with_pages(vec![vec![Some("a")]])
        };
        let options = ParseOptions::new().with_timeout(Duration::from_millis(20));
        let err = mock_extractor(engine)
            .extract_text(bytes(), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::Timeout(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_open() {
        let engine = MockEngine::with_pages(vec![vec![Some("a")]]);
        let err = mock_extractor(engine)
            .extract_text(bytes(), &ParseOptions::new().with_scale(-1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::Config(_)));
    }

    #[tokio::test]
    async fn test_lopdf_nine_page_text_document() {
        let texts = ["one", "two", "three", "four", "five", "six", "seven", "eight", "nine"];
        let pdf = text_document(&texts);

        let pages = PageExtractor::new()
            .extract_text(pdf, &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages.len(), 9);
        assert!(pages.iter().all(|page| !page.is_empty()));
        assert_eq!(pages[8], "nine");
    }

    #[tokio::test]
    async fn test_lopdf_generic_mixes_text_and_images() {
        let pdf = FixtureBuilder::new()
            .text_page(&["Hello", "world"])
            .image_page()
            .marked_text_page("Tagged")
            .build();

        let pages = PageExtractor::new()
            .extract_generic(pdf.clone(), &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], PageContent::Text("Hello world".into()));
        assert!(pages[1].as_image().unwrap().starts_with(PNG_MAGIC));
        assert_eq!(pages[2], PageContent::Text("Tagged".into()));

        let again = PageExtractor::new()
            .extract_generic(pdf, &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(again, pages);
    }

    #[tokio::test]
    async fn test_lopdf_images_for_every_page() {
        let pdf = FixtureBuilder::new().text_page(&["text"]).blank_page().build();
        let images = PageExtractor::new()
            .extract_images(&pdf[..], &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(images.len(), 2);
        for image in &images {
            assert!(image.starts_with(PNG_MAGIC));
        }
    }

    #[tokio::test]
    async fn test_lopdf_reads_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&text_document(&["first", "second"])).unwrap();

        let pages = PageExtractor::new()
            .extract_text(file.path(), &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_missing_path_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = PageExtractor::new()
            .extract_text(dir.path().join("nope.pdf"), &ParseOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::Io(_)));
    }

    #[tokio::test]
    async fn test_garbage_bytes_are_invalid_pdf() {
        let err = PageExtractor::new()
            .extract_text(b"not a pdf".to_vec(), &ParseOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::Engine { ref name, .. } if name == "InvalidPDFException"));
    }

    #[tokio::test]
    async fn test_lopdf_encrypted_document_passwords() {
        let plain = text_document(&["first", "second"]);
        let expected = PageExtractor::new()
            .extract_text(plain, &ParseOptions::default())
            .await
            .unwrap();

        for scheme in [FixtureEncryption::Rc4, FixtureEncryption::Aes256] {
            let pdf = FixtureBuilder::new()
                .text_page(&["first"])
                .text_page(&["second"])
                .build_encrypted("example", scheme);
            let extractor = PageExtractor::new();

            let err = extractor
                .extract_text(pdf.clone(), &ParseOptions::default())
                .await
                .unwrap_err();
            assert!(matches!(err, AfppError::PasswordRequired), "{scheme:?}: {err:?}");

            let err = extractor
                .extract_text(pdf.clone(), &ParseOptions::new().with_password("invalid"))
                .await
                .unwrap_err();
            assert!(matches!(err, AfppError::IncorrectPassword), "{scheme:?}: {err:?}");

            let pages = extractor
                .extract_text(pdf, &ParseOptions::new().with_password("example"))
                .await
                .unwrap();
            assert_eq!(pages, expected);
        }
    }

    #[tokio::test]
    async fn test_lopdf_reads_from_url() {
        let url = serve_once("200 OK", text_document(&["remote", "pages", "here"])).await;
        let pages = PageExtractor::new()
            .extract_text(url, &ParseOptions::default())
            .await
            .unwrap();
        assert_eq!(pages, vec!["remote", "pages", "here"]);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_fetch_error() {
        let url = Url::parse("http://127.0.0.1:9/doc.pdf").unwrap();
        let err = PageExtractor::new()
            .extract_text(url, &ParseOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AfppError::Engine { ref name, .. } if name == "FetchException"));
    }
}
