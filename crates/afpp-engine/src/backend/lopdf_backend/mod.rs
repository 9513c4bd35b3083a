//! lopdf-based engine backend.

mod cmap;
mod render;
mod text;

use std::sync::Arc;

use lopdf::encryption::DecryptionError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, trace};

use super::{
    DocumentData, OpenRequest, PdfDocument, PdfEngine, PdfPage, TextContent, TextContentOptions,
    Viewport,
};
use crate::error::EngineError;
use crate::fetch::Fetcher;
use crate::surface::{Matrix, RasterSurface};
use crate::Result;

/// US Letter, used when a page has no usable `/MediaBox`.
const DEFAULT_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// Engine backed by [`lopdf`].
#[derive(Debug, Clone, Default)]
pub struct LopdfEngine {
    fetcher: Fetcher,
}

impl LopdfEngine {
    /// Create a new engine with a default HTTP client for remote documents.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine that fetches remote documents with `fetcher`.
    pub fn with_fetcher(fetcher: Fetcher) -> Self {
        Self { fetcher }
    }
}

impl PdfEngine for LopdfEngine {
    type Document = LopdfDocument;

    async fn open(&self, request: OpenRequest) -> Result<LopdfDocument> {
        trace!("opening document from {}", request.data.describe());

        let bytes = match request.data {
            DocumentData::Bytes(bytes) => bytes,
            DocumentData::Remote(url) => self.fetcher.fetch(&url).await?,
        };
        let password = request.password;

        tokio::task::spawn_blocking(move || LopdfDocument::load(&bytes, password.as_deref()))
            .await
            .map_err(|e| EngineError::Parse(format!("document loader failed: {}", e)))?
    }
}

/// A document opened with lopdf.
pub struct LopdfDocument {
    inner: Arc<Document>,
    /// Page object ids in page order.
    page_ids: Vec<ObjectId>,
}

impl LopdfDocument {
    /// Load a document from memory, decrypting it if needed.
    ///
    /// Documents whose user password is empty are already decrypted by the
    /// reader. Any other encrypted document needs `password`, which may be
    /// either the user or the owner password.
    pub fn load(data: &[u8], password: Option<&str>) -> Result<Self> {
        let mut doc = Document::load_mem(data).map_err(|e| classify_error(e, password))?;

        if doc.is_encrypted() {
            doc.decrypt(password.unwrap_or(""))
                .map_err(|e| classify_error(e, password))?;
            debug!("decrypted encrypted document");
        }

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        debug!("loaded PDF with {} pages", page_ids.len());

        Ok(Self {
            inner: Arc::new(doc),
            page_ids,
        })
    }
}

impl std::fmt::Debug for LopdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LopdfDocument")
            .field("page_count", &self.page_ids.len())
            .finish_non_exhaustive()
    }
}

impl PdfDocument for LopdfDocument {
    type Page = LopdfPage;

    fn page_count(&self) -> u32 {
        self.page_ids.len() as u32
    }

    fn page(&self, number: u32) -> Result<LopdfPage> {
        let index = number
            .checked_sub(1)
            .filter(|&i| (i as usize) < self.page_ids.len())
            .ok_or(EngineError::InvalidPage(number))?;

        Ok(LopdfPage {
            doc: Arc::clone(&self.inner),
            id: self.page_ids[index as usize],
            number,
        })
    }
}

/// A page of a [`LopdfDocument`].
#[derive(Clone)]
pub struct LopdfPage {
    doc: Arc<Document>,
    id: ObjectId,
    number: u32,
}

impl LopdfPage {
    fn dictionary(&self) -> Result<&Dictionary> {
        self.doc
            .get_dictionary(self.id)
            .map_err(|e| EngineError::Parse(format!("page {} dictionary: {}", self.number, e)))
    }

    /// Resources of the page, following inheritance through the page tree.
    fn resources(&self) -> Option<&Dictionary> {
        let resources = inherited(&self.doc, self.id, b"Resources")?;
        self.doc.dereference(resources).ok()?.1.as_dict().ok()
    }

    /// Decoded content stream bytes of the page.
    fn content(&self) -> Result<Vec<u8>> {
        let dict = self.dictionary()?;
        let contents = match dict.get(b"Contents") {
            Ok(contents) => contents,
            Err(_) => return Ok(Vec::new()),
        };

        let mut data = Vec::new();
        match self.doc.dereference(contents) {
            Ok((_, Object::Array(parts))) => {
                for part in parts {
                    let (_, object) = self
                        .doc
                        .dereference(part)
                        .map_err(|e| EngineError::Parse(format!("/Contents entry: {}", e)))?;
                    if let Ok(stream) = object.as_stream() {
                        data.extend(stream_bytes(stream));
                        data.push(b'\n');
                    }
                }
            }
            Ok((_, Object::Stream(stream))) => data.extend(stream_bytes(stream)),
            Ok(_) => {
                return Err(EngineError::Parse(format!(
                    "page {}: /Contents is neither a stream nor an array",
                    self.number
                )));
            }
            Err(e) => return Err(EngineError::Parse(format!("/Contents: {}", e))),
        }
        Ok(data)
    }

    fn media_box(&self) -> [f32; 4] {
        let media_box = inherited(&self.doc, self.id, b"MediaBox")
            .and_then(|obj| self.doc.dereference(obj).ok())
            .and_then(|(_, obj)| obj.as_array().ok())
            .and_then(|values| {
                let numbers: Vec<f32> = values
                    .iter()
                    .filter_map(|v| self.doc.dereference(v).ok()?.1.as_float().ok())
                    .collect();
                <[f32; 4]>::try_from(numbers.as_slice()).ok()
            });

        match media_box {
            Some([x0, y0, x1, y1]) => [x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)],
            None => {
                trace!("page {} has no usable /MediaBox, using US Letter", self.number);
                DEFAULT_MEDIA_BOX
            }
        }
    }

    fn rotation(&self) -> i64 {
        inherited(&self.doc, self.id, b"Rotate")
            .and_then(|obj| self.doc.dereference(obj).ok())
            .and_then(|(_, obj)| obj.as_i64().ok())
            .unwrap_or(0)
    }
}

impl PdfPage for LopdfPage {
    fn number(&self) -> u32 {
        self.number
    }

    fn text_content(&self, options: TextContentOptions) -> Result<TextContent> {
        let content = self.content()?;
        let items = text::collect_items(&self.doc, self.resources(), &content, options)?;
        trace!("page {}: {} text items", self.number, items.len());
        Ok(TextContent { items })
    }

    fn viewport(&self, scale: f32) -> Result<Viewport> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(EngineError::Render(format!("invalid scale {}", scale)));
        }
        Ok(Viewport::new(self.media_box(), scale, self.rotation()))
    }

    fn render(&self, viewport: &Viewport, surface: &mut dyn RasterSurface) -> Result<()> {
        let content = self.content()?;
        surface.fill([255, 255, 255, 255]);
        render::paint(&self.doc, self.resources(), &content, viewport, surface)
    }
}

/// Look up `key` on a page or its ancestors in the page tree.
fn inherited<'a>(doc: &'a Document, node_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = node_id;
    // Bounded walk; a malformed tree can contain /Parent cycles.
    for _ in 0..32 {
        let dict = doc.get_dictionary(current).ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        current = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

/// Resolve `/<category>/<name>` in a resource dictionary.
fn resource<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    category: &[u8],
    name: &[u8],
) -> Option<&'a Object> {
    let entries = doc.dereference(resources?.get(category).ok()?).ok()?.1.as_dict().ok()?;
    let (_, object) = doc.dereference(entries.get(name).ok()?).ok()?;
    Some(object)
}

/// A form XObject: a reusable content stream with its own resources.
struct FormXObject<'a> {
    stream: &'a lopdf::Stream,
    resources: Option<&'a Dictionary>,
    matrix: Matrix,
}

enum XObject<'a> {
    Image(&'a lopdf::Stream),
    Form(FormXObject<'a>),
}

fn xobject<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &[u8],
) -> Option<XObject<'a>> {
    let stream = resource(doc, resources, b"XObject", name)?.as_stream().ok()?;
    let subtype = stream.dict.get(b"Subtype").ok()?.as_name().ok()?;

    match subtype {
        b"Image" => Some(XObject::Image(stream)),
        b"Form" => {
            let resources = stream
                .dict
                .get(b"Resources")
                .ok()
                .and_then(|o| doc.dereference(o).ok())
                .and_then(|(_, o)| o.as_dict().ok());
            let matrix = stream
                .dict
                .get(b"Matrix")
                .and_then(|o| o.as_array())
                .ok()
                .and_then(|values| {
                    let values: Vec<f32> = values.iter().filter_map(|v| v.as_float().ok()).collect();
                    Matrix::from_slice(&values)
                })
                .unwrap_or(Matrix::IDENTITY);
            Some(XObject::Form(FormXObject {
                stream,
                resources,
                matrix,
            }))
        }
        _ => None,
    }
}

fn form_xobject<'a>(
    doc: &'a Document,
    resources: Option<&'a Dictionary>,
    name: &[u8],
) -> Option<FormXObject<'a>> {
    match xobject(doc, resources, name)? {
        XObject::Form(form) => Some(form),
        XObject::Image(_) => None,
    }
}

/// Stream payload, decompressed when a filter applies.
fn stream_bytes(stream: &lopdf::Stream) -> Vec<u8> {
    match stream.decompressed_content() {
        Ok(data) => data,
        Err(_) => stream.content.clone(),
    }
}

/// Map a lopdf error onto the engine taxonomy.
fn classify_error(error: lopdf::Error, password: Option<&str>) -> EngineError {
    match error {
        lopdf::Error::Decryption(DecryptionError::IncorrectPassword) => match password {
            Some(_) => EngineError::IncorrectPassword,
            None => EngineError::PasswordRequired,
        },
        other => EngineError::Parse(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureBuilder, FixtureEncryption, text_document};
    use crate::surface::{ImageSurfaceProvider, SurfaceProvider};
    use crate::TextItem;
    use pretty_assertions::assert_eq;

    fn load(bytes: &[u8]) -> LopdfDocument {
        LopdfDocument::load(bytes, None).unwrap()
    }

    fn page_text(doc: &LopdfDocument, number: u32) -> Vec<Option<String>> {
        doc.page(number)
            .unwrap()
            .text_content(TextContentOptions::default())
            .unwrap()
            .runs()
            .map(|run| run.map(str::to_string))
            .collect()
    }

    #[test]
    fn test_page_count_and_invalid_pages() {
        let doc = load(&text_document(&["one", "two", "three"]));
        assert_eq!(doc.page_count(), 3);
        assert!(matches!(doc.page(0), Err(EngineError::InvalidPage(0))));
        assert!(matches!(doc.page(4), Err(EngineError::InvalidPage(4))));
        assert_eq!(doc.page(3).unwrap().number(), 3);
    }

    #[test]
    fn test_text_runs_in_order() {
        let bytes = FixtureBuilder::new()
            .text_page(&["Hello", "world"])
            .text_page(&["second"])
            .build();
        let doc = load(&bytes);

        assert_eq!(
            page_text(&doc, 1),
            vec![Some("Hello".to_string()), Some("world".to_string())]
        );
        assert_eq!(page_text(&doc, 2), vec![Some("second".to_string())]);
    }

    #[test]
    fn test_blank_page_has_no_runs() {
        let doc = load(&FixtureBuilder::new().blank_page().build());
        assert!(page_text(&doc, 1).is_empty());
    }

    #[test]
    fn test_marked_content_only_when_requested() {
        let doc = load(&FixtureBuilder::new().marked_text_page("Tagged").build());
        let page = doc.page(1).unwrap();

        let plain = page.text_content(TextContentOptions::default()).unwrap();
        assert_eq!(
            plain.items,
            vec![TextItem::Run {
                text: Some("Tagged".into())
            }]
        );

        let marked = page
            .text_content(TextContentOptions {
                include_marked_content: true,
            })
            .unwrap();
        assert_eq!(
            marked.items,
            vec![
                TextItem::BeginMarkedContent { tag: "Span".into() },
                TextItem::Run {
                    text: Some("Tagged".into())
                },
                TextItem::EndMarkedContent,
            ]
        );
    }

    #[test]
    fn test_to_unicode_font() {
        let doc = load(&FixtureBuilder::new().cid_text_page().build());
        assert_eq!(page_text(&doc, 1), vec![Some("Hi".to_string())]);
    }

    #[test]
    fn test_render_paints_image_xobject() {
        let doc = load(&FixtureBuilder::new().image_page().build());
        let page = doc.page(1).unwrap();
        let viewport = page.viewport(1.0).unwrap();
        assert_eq!(viewport.pixel_size(), (300, 300));

        let mut surface = ImageSurfaceProvider::new().create(300, 300).unwrap();
        page.render(&viewport, &mut surface).unwrap();

        // The fixture places a black square over (100..200, 100..200) in user space.
        let canvas = surface.canvas();
        assert_eq!(canvas.get_pixel(150, 150).0, [0, 0, 0, 255]);
        assert_eq!(canvas.get_pixel(20, 20).0, [255, 255, 255, 255]);
        assert_eq!(canvas.get_pixel(250, 150).0, [255, 255, 255, 255]);
    }

    #[test]
    fn test_viewport_rejects_bad_scale() {
        let doc = load(&text_document(&["x"]));
        let page = doc.page(1).unwrap();
        assert!(page.viewport(0.0).is_err());
        assert!(page.viewport(f32::NAN).is_err());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let result = LopdfDocument::load(b"definitely not a pdf", None);
        assert!(matches!(result, Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_encrypted_documents_need_the_user_password() {
        for scheme in [FixtureEncryption::Rc4, FixtureEncryption::Aes256] {
            let bytes = FixtureBuilder::new()
                .text_page(&["classified"])
                .text_page(&["second"])
                .build_encrypted("example", scheme);

            let missing = LopdfDocument::load(&bytes, None);
            assert!(
                matches!(missing, Err(EngineError::PasswordRequired)),
                "{scheme:?}: {:?}",
                missing.err()
            );

            let wrong = LopdfDocument::load(&bytes, Some("invalid"));
            assert!(
                matches!(wrong, Err(EngineError::IncorrectPassword)),
                "{scheme:?}: {:?}",
                wrong.err()
            );

            let doc = LopdfDocument::load(&bytes, Some("example")).unwrap();
            assert_eq!(doc.page_count(), 2);
            assert_eq!(page_text(&doc, 1), vec![Some("classified".to_string())]);
        }
    }

    #[test]
    fn test_empty_user_password_opens_without_password() {
        let bytes = FixtureBuilder::new()
            .text_page(&["open"])
            .build_encrypted("", FixtureEncryption::Rc4);
        let doc = LopdfDocument::load(&bytes, None).unwrap();
        assert_eq!(page_text(&doc, 1), vec![Some("open".to_string())]);
    }

    #[test]
    fn test_classify_decryption_errors() {
        let missing = classify_error(
            lopdf::Error::Decryption(DecryptionError::IncorrectPassword),
            None,
        );
        assert!(matches!(missing, EngineError::PasswordRequired));

        let wrong = classify_error(
            lopdf::Error::Decryption(DecryptionError::IncorrectPassword),
            Some("invalid"),
        );
        assert!(matches!(wrong, EngineError::IncorrectPassword));
    }

    #[tokio::test]
    async fn test_engine_opens_bytes() {
        let engine = LopdfEngine::new();
        let request = OpenRequest::new(DocumentData::Bytes(text_document(&["a", "b"])));
        let doc = engine.open(request).await.unwrap();
        assert_eq!(doc.page_count(), 2);
    }
}
