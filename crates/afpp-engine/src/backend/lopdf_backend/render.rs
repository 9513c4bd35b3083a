//! Painting page content onto a raster surface.
//!
//! Only image XObjects (directly or inside form XObjects) are painted; paths
//! and glyphs are left to a full rasterizer.

use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, Stream};
use tracing::trace;

use super::text::MAX_FORM_DEPTH;
use super::{XObject, stream_bytes, xobject};
use crate::backend::Viewport;
use crate::error::EngineError;
use crate::surface::{Matrix, RasterSurface};
use crate::Result;

/// Paint `content` onto `surface` through `viewport`.
pub(super) fn paint(
    doc: &Document,
    resources: Option<&Dictionary>,
    content: &[u8],
    viewport: &Viewport,
    surface: &mut dyn RasterSurface,
) -> Result<()> {
    let mut painter = Painter {
        doc,
        surface,
        device: viewport.transform,
        painted: 0,
    };
    painter.walk(resources, content, Matrix::IDENTITY, 0)?;
    trace!("painted {} images", painter.painted);
    Ok(())
}

struct Painter<'a, 's> {
    doc: &'a Document,
    surface: &'s mut dyn RasterSurface,
    device: Matrix,
    painted: usize,
}

impl<'a> Painter<'a, '_> {
    fn walk(
        &mut self,
        resources: Option<&'a Dictionary>,
        data: &[u8],
        base: Matrix,
        depth: usize,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let content = Content::decode(data)
            .map_err(|e| EngineError::Parse(format!("content stream: {}", e)))?;

        let mut ctm = base;
        let mut saved: Vec<Matrix> = Vec::new();

        for op in &content.operations {
            match op.operator.as_str() {
                "q" => saved.push(ctm),
                "Q" => {
                    if let Some(previous) = saved.pop() {
                        ctm = previous;
                    }
                }
                "cm" => {
                    let values: Vec<f32> = op
                        .operands
                        .iter()
                        .filter_map(|o| o.as_float().ok())
                        .collect();
                    if let Some(matrix) = Matrix::from_slice(&values) {
                        ctm = matrix.then(&ctm);
                    }
                }
                "Do" => {
                    let Some(name) = op.operands.first().and_then(|o| o.as_name().ok()) else {
                        continue;
                    };
                    match xobject(self.doc, resources, name) {
                        Some(XObject::Image(stream)) => {
                            match decode_image(self.doc, stream) {
                                Some(image) => {
                                    self.surface.draw_image(&image, &ctm.then(&self.device));
                                    self.painted += 1;
                                }
                                None => trace!(
                                    "skipping undecodable image {:?}",
                                    String::from_utf8_lossy(name)
                                ),
                            }
                        }
                        Some(XObject::Form(form)) if depth < MAX_FORM_DEPTH => {
                            let data = stream_bytes(form.stream);
                            let base = form.matrix.then(&ctm);
                            self.walk(form.resources.or(resources), &data, base, depth + 1)?;
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Decode an image XObject into pixels.
fn decode_image(doc: &Document, stream: &Stream) -> Option<DynamicImage> {
    let dict = &stream.dict;
    let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
    let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;
    if width == 0 || height == 0 {
        return None;
    }

    if dict
        .get(b"ImageMask")
        .and_then(|o| o.as_bool())
        .unwrap_or(false)
    {
        trace!("stencil masks are not painted");
        return None;
    }

    if let Ok(filter) = dict.get(b"Filter") {
        let filter_name = match filter {
            Object::Name(name) => Some(name.as_slice()),
            Object::Array(filters) => filters.last().and_then(|o| o.as_name().ok()),
            _ => None,
        };

        match filter_name {
            Some(b"DCTDecode") => {
                return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
                    .ok();
            }
            Some(b"JPXDecode") | Some(b"CCITTFaxDecode") | Some(b"JBIG2Decode") => {
                trace!("unsupported image filter {:?}", filter_name.map(String::from_utf8_lossy));
                return None;
            }
            _ => {}
        }
    }

    let components = color_components(doc, dict.get(b"ColorSpace").ok())?;
    let bits = dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);

    let data = stream_bytes(stream);
    create_image_from_raw(&data, width, height, components, bits)
}

/// Number of color components for the image's color space.
fn color_components(doc: &Document, color_space: Option<&Object>) -> Option<u32> {
    let Some(color_space) = color_space else {
        return Some(1);
    };
    let (_, color_space) = doc.dereference(color_space).ok()?;

    let (family, params) = match color_space {
        Object::Name(name) => (name.as_slice(), None),
        Object::Array(items) => (items.first()?.as_name().ok()?, items.get(1)),
        _ => return None,
    };

    match family {
        b"DeviceGray" | b"G" | b"CalGray" => Some(1),
        b"DeviceRGB" | b"RGB" | b"CalRGB" => Some(3),
        b"DeviceCMYK" | b"CMYK" => Some(4),
        b"ICCBased" => {
            let (_, profile) = doc.dereference(params?).ok()?;
            let n = profile.as_stream().ok()?.dict.get(b"N").ok()?.as_i64().ok()?;
            matches!(n, 1 | 3 | 4).then_some(n as u32)
        }
        _ => {
            trace!("unsupported color space {:?}", String::from_utf8_lossy(family));
            None
        }
    }
}

fn create_image_from_raw(
    data: &[u8],
    width: u32,
    height: u32,
    components: u32,
    bits_per_component: i64,
) -> Option<DynamicImage> {
    let pixels = (width as usize) * (height as usize);

    match (components, bits_per_component) {
        (1, 1) => {
            // Rows are padded to whole bytes.
            let row_bytes = (width as usize).div_ceil(8);
            if data.len() < row_bytes * height as usize {
                return None;
            }
            let image = GrayImage::from_fn(width, height, |x, y| {
                let byte = data[y as usize * row_bytes + x as usize / 8];
                let bit = (byte >> (7 - (x % 8))) & 1;
                Luma([if bit == 1 { 255 } else { 0 }])
            });
            Some(DynamicImage::ImageLuma8(image))
        }
        (1, 8) if data.len() >= pixels => {
            GrayImage::from_raw(width, height, data[..pixels].to_vec()).map(DynamicImage::ImageLuma8)
        }
        (3, 8) if data.len() >= pixels * 3 => {
            RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
                .map(DynamicImage::ImageRgb8)
        }
        (4, 8) if data.len() >= pixels * 4 => {
            let rgb: Vec<u8> = data[..pixels * 4]
                .chunks_exact(4)
                .flat_map(|cmyk| {
                    let k = 255 - cmyk[3] as u32;
                    let channel = |v: u8| ((255 - v as u32) * k / 255) as u8;
                    [channel(cmyk[0]), channel(cmyk[1]), channel(cmyk[2])]
                })
                .collect();
            ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, rgb).map(DynamicImage::ImageRgb8)
        }
        _ => {
            trace!(
                "cannot decode image: {}x{}, {} components, {} bits, {} bytes",
                width,
                height,
                components,
                bits_per_component,
                data.len()
            );
            None
        }
    }
}
