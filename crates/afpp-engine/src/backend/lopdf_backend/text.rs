//! Text runs from page content streams.

use std::collections::HashMap;

use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object};
use tracing::trace;

use super::cmap::{ToUnicodeMap, decode_utf16be};
use super::{form_xobject, resource, stream_bytes};
use crate::backend::{TextContentOptions, TextItem};
use crate::error::EngineError;
use crate::Result;

/// Form XObjects nested deeper than this are not entered.
pub(super) const MAX_FORM_DEPTH: usize = 8;

/// Collect the text items of a content stream.
pub(super) fn collect_items(
    doc: &Document,
    resources: Option<&Dictionary>,
    content: &[u8],
    options: TextContentOptions,
) -> Result<Vec<TextItem>> {
    let mut collector = Collector {
        doc,
        options,
        items: Vec::new(),
    };
    collector.walk(resources, content, 0)?;
    Ok(collector.items)
}

struct Collector<'a> {
    doc: &'a Document,
    options: TextContentOptions,
    items: Vec<TextItem>,
}

impl<'a> Collector<'a> {
    fn walk(&mut self, resources: Option<&'a Dictionary>, data: &[u8], depth: usize) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let content = Content::decode(data)
            .map_err(|e| EngineError::Parse(format!("content stream: {}", e)))?;

        let mut fonts: HashMap<Vec<u8>, FontDecoder> = HashMap::new();
        let mut current_font: Option<Vec<u8>> = None;

        for op in &content.operations {
            match op.operator.as_str() {
                "Tf" => {
                    current_font = op
                        .operands
                        .first()
                        .and_then(|o| o.as_name().ok())
                        .map(<[u8]>::to_vec);
                    if let Some(name) = &current_font {
                        if !fonts.contains_key(name) {
                            let decoder = FontDecoder::lookup(self.doc, resources, name);
                            fonts.insert(name.clone(), decoder);
                        }
                    }
                }
                "Tj" | "'" | "\"" => {
                    let decoder = current_font.as_ref().and_then(|name| fonts.get(name));
                    let text = op
                        .operands
                        .last()
                        .and_then(string_bytes)
                        .map(|bytes| decode(decoder, bytes));
                    self.items.push(TextItem::Run { text });
                }
                "TJ" => {
                    let decoder = current_font.as_ref().and_then(|name| fonts.get(name));
                    let parts: Vec<String> = op
                        .operands
                        .first()
                        .and_then(|o| o.as_array().ok())
                        .map(|array| {
                            array
                                .iter()
                                .filter_map(string_bytes)
                                .map(|bytes| decode(decoder, bytes))
                                .collect()
                        })
                        .unwrap_or_default();
                    let text = (!parts.is_empty()).then(|| parts.concat());
                    self.items.push(TextItem::Run { text });
                }
                "BMC" | "BDC" if self.options.include_marked_content => {
                    let tag = marked_content_tag(&op.operands);
                    self.items.push(TextItem::BeginMarkedContent { tag });
                }
                "MP" | "DP" if self.options.include_marked_content => {
                    let tag = marked_content_tag(&op.operands);
                    self.items.push(TextItem::MarkedContentPoint { tag });
                }
                "EMC" if self.options.include_marked_content => {
                    self.items.push(TextItem::EndMarkedContent);
                }
                "Do" => {
                    let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                        continue;
                    };
                    if depth >= MAX_FORM_DEPTH {
                        trace!("form nesting too deep, skipping {:?}", String::from_utf8_lossy(name));
                        continue;
                    }
                    if let Some(form) = form_xobject(self.doc, resources, name) {
                        let data = stream_bytes(form.stream);
                        self.walk(form.resources.or(resources), &data, depth + 1)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn marked_content_tag(operands: &[Object]) -> String {
    operands
        .first()
        .and_then(|o| o.as_name().ok())
        .map(|name| String::from_utf8_lossy(name).into_owned())
        .unwrap_or_default()
}

fn string_bytes(object: &Object) -> Option<&[u8]> {
    match object {
        Object::String(bytes, _) => Some(bytes.as_slice()),
        _ => None,
    }
}

fn decode(decoder: Option<&FontDecoder>, bytes: &[u8]) -> String {
    match decoder {
        Some(decoder) => decoder.decode(bytes),
        None => FontDecoder::default().decode(bytes),
    }
}

/// Turns string operands into Unicode for one font.
#[derive(Debug, Default)]
struct FontDecoder {
    to_unicode: Option<ToUnicodeMap>,
    /// Composite (Type0) fonts use multi-byte codes.
    composite: bool,
}

impl FontDecoder {
    fn lookup(doc: &Document, resources: Option<&Dictionary>, name: &[u8]) -> Self {
        let Some(font) = resource(doc, resources, b"Font", name).and_then(|o| o.as_dict().ok())
        else {
            trace!("font {:?} not found in resources", String::from_utf8_lossy(name));
            return Self::default();
        };

        let composite = font
            .get(b"Subtype")
            .and_then(|o| o.as_name())
            .map(|subtype| subtype == b"Type0")
            .unwrap_or(false);

        let to_unicode = font
            .get(b"ToUnicode")
            .ok()
            .and_then(|o| doc.dereference(o).ok())
            .and_then(|(_, o)| o.as_stream().ok())
            .map(|stream| ToUnicodeMap::parse(&stream_bytes(stream)))
            .filter(|map| !map.is_empty());

        Self {
            to_unicode,
            composite,
        }
    }

    fn decode(&self, bytes: &[u8]) -> String {
        if let Some(map) = &self.to_unicode {
            let width = map.code_width().unwrap_or(if self.composite { 2 } else { 1 });
            return bytes
                .chunks(width)
                .map(|chunk| {
                    let code = chunk.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
                    match map.get(code) {
                        Some(text) => text.to_string(),
                        None => fallback_char(code, width).map(String::from).unwrap_or_default(),
                    }
                })
                .collect();
        }

        if bytes.starts_with(&[0xFE, 0xFF]) {
            return decode_utf16be(&bytes[2..]);
        }

        if self.composite {
            return bytes
                .chunks(2)
                .filter_map(|chunk| {
                    let code = chunk.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
                    fallback_char(code, 2)
                })
                .collect();
        }

        bytes
            .iter()
            .filter_map(|&b| fallback_char(b as u32, 1))
            .collect()
    }
}

/// Best-effort character for a code with no explicit mapping.
fn fallback_char(code: u32, width: usize) -> Option<char> {
    if width == 1 {
        let byte = code as u8;
        return match byte {
            0x80 => Some('€'),
            0x85 => Some('…'),
            0x91 => Some('‘'),
            0x92 => Some('’'),
            0x93 => Some('“'),
            0x94 => Some('”'),
            0x95 => Some('•'),
            0x96 => Some('–'),
            0x97 => Some('—'),
            0x99 => Some('™'),
            b'\t' | b'\n' | b'\r' => Some(' '),
            b if b < 0x20 || (0x7F..0xA0).contains(&b) => None,
            b => Some(b as char),
        };
    }
    char::from_u32(code).filter(|c| !c.is_control())
}
