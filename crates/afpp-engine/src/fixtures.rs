//! In-memory PDF documents for tests.
//!
//! Builds small but structurally complete PDFs with lopdf so test suites do
//! not depend on binary files.

use std::collections::BTreeMap;
use std::sync::Arc;

use lopdf::content::{Content, Operation};
use lopdf::encryption::crypt_filters::{Aes256CryptFilter, CryptFilter};
use lopdf::{
    Dictionary, Document, EncryptionState, EncryptionVersion, Object, ObjectId, Permissions,
    Stream, StringFormat, dictionary,
};
use reqwest::Url;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Owner password of every encrypted fixture.
pub const OWNER_PASSWORD: &str = "fixture-owner";

/// Security handler used by [`FixtureBuilder::build_encrypted`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureEncryption {
    /// RC4, 128-bit key, no crypt filters (V2 / R3).
    Rc4,
    /// AES-256 with a `/StdCF` crypt filter (V5 / R6).
    Aes256,
}

enum FixturePage {
    Text(Vec<String>),
    MarkedText(String),
    CidText,
    Image,
    Blank,
}

/// Builder for multi-page fixture documents.
#[derive(Default)]
pub struct FixtureBuilder {
    pages: Vec<FixturePage>,
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page showing each fragment with its own `Tj` operator.
    pub fn text_page(mut self, fragments: &[&str]) -> Self {
        self.pages.push(FixturePage::Text(
            fragments.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// A page whose only text sits inside a `/Span` marked-content sequence.
    pub fn marked_text_page(mut self, text: &str) -> Self {
        self.pages.push(FixturePage::MarkedText(text.to_string()));
        self
    }

    /// A page using a Type0 font with a `/ToUnicode` CMap; reads "Hi".
    pub fn cid_text_page(mut self) -> Self {
        self.pages.push(FixturePage::CidText);
        self
    }

    /// A page without text showing a black 2x2 image scaled over
    /// `(100..200, 100..200)` of a 300x300 media box.
    pub fn image_page(mut self) -> Self {
        self.pages.push(FixturePage::Image);
        self
    }

    /// A page with no content stream.
    pub fn blank_page(mut self) -> Self {
        self.pages.push(FixturePage::Blank);
        self
    }

    /// Serialize the document.
    pub fn build(self) -> Vec<u8> {
        save(self.assemble())
    }

    /// Serialize the document encrypted with `user_password`.
    pub fn build_encrypted(self, user_password: &str, scheme: FixtureEncryption) -> Vec<u8> {
        let mut doc = self.assemble();
        let permissions = Permissions::PRINTABLE | Permissions::COPYABLE;
        let file_key = [0x5Au8; 32];

        let version = match scheme {
            FixtureEncryption::Rc4 => EncryptionVersion::V2 {
                document: &doc,
                owner_password: OWNER_PASSWORD,
                user_password,
                key_length: 128,
                permissions,
            },
            FixtureEncryption::Aes256 => {
                let filter: Arc<dyn CryptFilter> = Arc::new(Aes256CryptFilter);
                EncryptionVersion::V5 {
                    encrypt_metadata: true,
                    crypt_filters: BTreeMap::from([(b"StdCF".to_vec(), filter)]),
                    file_encryption_key: &file_key,
                    stream_filter: b"StdCF".to_vec(),
                    string_filter: b"StdCF".to_vec(),
                    owner_password: OWNER_PASSWORD,
                    user_password,
                    permissions,
                }
            }
        };

        let state = EncryptionState::try_from(version).expect("failed to derive fixture keys");
        doc.encrypt(&state).expect("failed to encrypt fixture PDF");
        save(doc)
    }

    fn assemble(self) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids: Vec<Object> = Vec::new();
        for page in &self.pages {
            let page_id = add_page(&mut doc, pages_id, font_id, page);
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        // RC4 key derivation hashes the first file identifier.
        let file_id = Object::String(b"afpp-fixture-id0".to_vec(), StringFormat::Literal);
        doc.trailer.set("ID", vec![file_id.clone(), file_id]);
        doc
    }
}

fn save(mut doc: Document) -> Vec<u8> {
    let mut buf = Vec::new();
    doc.save_to(&mut buf).expect("failed to save fixture PDF");
    buf
}

fn add_page(doc: &mut Document, pages_id: ObjectId, font_id: ObjectId, page: &FixturePage) -> ObjectId {
    let mut dict = dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
    };

    match page {
        FixturePage::Text(fragments) => {
            let mut operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
            ];
            for fragment in fragments {
                operations.push(Operation::new("Tj", vec![Object::string_literal(fragment.as_str())]));
                operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
            }
            operations.push(Operation::new("ET", vec![]));

            dict.set("Resources", font_resources("F1", font_id));
            dict.set("Contents", add_content(doc, operations));
        }
        FixturePage::MarkedText(text) => {
            let operations = vec![
                Operation::new(
                    "BDC",
                    vec!["Span".into(), Object::Dictionary(dictionary! { "MCID" => 0 })],
                ),
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Tj", vec![Object::string_literal(text.as_str())]),
                Operation::new("ET", vec![]),
                Operation::new("EMC", vec![]),
            ];
            dict.set("Resources", font_resources("F1", font_id));
            dict.set("Contents", add_content(doc, operations));
        }
        FixturePage::CidText => {
            let cmap = b"/CIDInit /ProcSet findresource begin\n\
                begincmap\n\
                1 begincodespacerange <0000> <FFFF> endcodespacerange\n\
                2 beginbfchar\n<0001> <0048>\n<0002> <0069>\nendbfchar\n\
                endcmap\nend\n"
                .to_vec();
            let cmap_id = doc.add_object(Stream::new(Dictionary::new(), cmap));
            let cid_font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => "FixtureCID",
                "Encoding" => "Identity-H",
                "ToUnicode" => cmap_id,
            });
            let operations = vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F2".into(), 12.into()]),
                Operation::new(
                    "Tj",
                    vec![Object::String(vec![0x00, 0x01, 0x00, 0x02], StringFormat::Hexadecimal)],
                ),
                Operation::new("ET", vec![]),
            ];
            dict.set("Resources", font_resources("F2", cid_font_id));
            dict.set("Contents", add_content(doc, operations));
        }
        FixturePage::Image => {
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 2,
                    "Height" => 2,
                    "ColorSpace" => "DeviceGray",
                    "BitsPerComponent" => 8,
                },
                vec![0, 0, 0, 0],
            ));
            let operations = vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![100.into(), 0.into(), 0.into(), 100.into(), 100.into(), 100.into()],
                ),
                Operation::new("Do", vec!["Im1".into()]),
                Operation::new("Q", vec![]),
            ];
            dict.set("MediaBox", vec![0.into(), 0.into(), 300.into(), 300.into()]);
            dict.set(
                "Resources",
                dictionary! { "XObject" => dictionary! { "Im1" => image_id } },
            );
            dict.set("Contents", add_content(doc, operations));
        }
        FixturePage::Blank => {}
    }

    doc.add_object(dict)
}

fn font_resources(name: &str, font_id: ObjectId) -> Dictionary {
    let mut fonts = Dictionary::new();
    fonts.set(name, font_id);
    dictionary! { "Font" => fonts }
}

fn add_content(doc: &mut Document, operations: Vec<Operation>) -> ObjectId {
    let content = Content { operations };
    let data = content.encode().expect("failed to encode fixture content");
    doc.add_object(Stream::new(Dictionary::new(), data))
}

/// A document with one single-fragment text page per entry.
pub fn text_document(pages: &[&str]) -> Vec<u8> {
    pages
        .iter()
        .fold(FixtureBuilder::new(), |builder, text| builder.text_page(&[*text]))
        .build()
}

/// Answer a single HTTP GET on a loopback port with `status` and `body`.
///
/// Returns the URL to request. The server task ends after one response.
pub async fn serve_once(status: &'static str, body: Vec<u8>) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind fixture server");
    let addr = listener.local_addr().expect("fixture server has no address");

    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => request.extend_from_slice(&buf[..n]),
            }
        }

        let head = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/pdf\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            status,
            body.len()
        );
        let _ = socket.write_all(head.as_bytes()).await;
        let _ = socket.write_all(&body).await;
        let _ = socket.shutdown().await;
    });

    Url::parse(&format!("http://{}/document.pdf", addr)).expect("fixture URL is valid")
}
