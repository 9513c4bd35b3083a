//! Raster surfaces that pages are rendered onto.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use tracing::trace;

use crate::error::EngineError;
use crate::Result;

/// Largest surface edge, in pixels, a provider will allocate.
pub const MAX_SURFACE_EDGE: u32 = 16_384;

/// A 2D affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);

    pub const fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// Build a matrix from six operands, as found in `cm` or `/Matrix`.
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [a, b, c, d, e, f] => Some(Self::new(*a, *b, *c, *d, *e, *f)),
            _ => None,
        }
    }

    /// `self × other`: apply `self` first, then `other`.
    pub fn then(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// Transform a point.
    pub fn apply(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Inverse transform, or `None` for a degenerate matrix.
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        Some(Matrix {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A drawable in-memory canvas.
pub trait RasterSurface {
    /// Width in pixels.
    fn width(&self) -> u32;

    /// Height in pixels.
    fn height(&self) -> u32;

    /// Fill the whole surface with one color.
    fn fill(&mut self, color: [u8; 4]);

    /// Paint `image` so that its unit square maps through `transform`.
    ///
    /// The unit square's `(0, 1)` corner is the image's top-left pixel.
    fn draw_image(&mut self, image: &DynamicImage, transform: &Matrix);

    /// Encode the surface to its byte representation.
    fn encode(&self) -> Result<Vec<u8>>;
}

/// Allocates raster surfaces.
pub trait SurfaceProvider: Send + Sync + 'static {
    type Surface: RasterSurface;

    /// Allocate a surface of `width` × `height` pixels.
    fn create(&self, width: u32, height: u32) -> Result<Self::Surface>;
}

/// Surface backed by an RGBA image buffer.
pub struct ImageSurface {
    canvas: RgbaImage,
    format: ImageFormat,
}

impl ImageSurface {
    /// Access the underlying pixels.
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }
}

impl RasterSurface for ImageSurface {
    fn width(&self) -> u32 {
        self.canvas.width()
    }

    fn height(&self) -> u32 {
        self.canvas.height()
    }

    fn fill(&mut self, color: [u8; 4]) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba(color);
        }
    }

    fn draw_image(&mut self, image: &DynamicImage, transform: &Matrix) {
        let Some(inverse) = transform.invert() else {
            trace!("skipping image with degenerate transform");
            return;
        };

        let source = image.to_rgba8();
        let (src_w, src_h) = source.dimensions();
        if src_w == 0 || src_h == 0 {
            return;
        }

        // Device-space bounds of the unit square, clipped to the surface.
        let corners = [
            transform.apply(0.0, 0.0),
            transform.apply(1.0, 0.0),
            transform.apply(0.0, 1.0),
            transform.apply(1.0, 1.0),
        ];
        let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
        let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
        let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
        let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);

        let x0 = min_x.floor().max(0.0) as u32;
        let y0 = min_y.floor().max(0.0) as u32;
        let x1 = (max_x.ceil().max(0.0) as u32).min(self.canvas.width());
        let y1 = (max_y.ceil().max(0.0) as u32).min(self.canvas.height());

        trace!(
            "drawing {}x{} image into [{}, {}) x [{}, {})",
            src_w, src_h, x0, x1, y0, y1
        );

        for py in y0..y1 {
            for px in x0..x1 {
                let (u, v) = inverse.apply(px as f32 + 0.5, py as f32 + 0.5);
                if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
                    continue;
                }
                let sx = ((u * src_w as f32) as u32).min(src_w - 1);
                let sy = (((1.0 - v) * src_h as f32) as u32).min(src_h - 1);
                let src = source.get_pixel(sx, sy);
                blend(self.canvas.get_pixel_mut(px, py), src);
            }
        }
    }

    fn encode(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.canvas
            .write_to(&mut Cursor::new(&mut data), self.format)?;
        Ok(data)
    }
}

/// Source-over compositing of one pixel.
fn blend(dst: &mut Rgba<u8>, src: &Rgba<u8>) {
    let alpha = src[3] as u32;
    if alpha == 255 {
        *dst = *src;
        return;
    }
    if alpha == 0 {
        return;
    }
    for i in 0..3 {
        dst[i] = ((src[i] as u32 * alpha + dst[i] as u32 * (255 - alpha)) / 255) as u8;
    }
    dst[3] = (alpha + dst[3] as u32 * (255 - alpha) / 255).min(255) as u8;
}

/// Provider of [`ImageSurface`]s encoding to PNG (or another `image` format).
#[derive(Debug, Clone, Copy)]
pub struct ImageSurfaceProvider {
    format: ImageFormat,
}

impl ImageSurfaceProvider {
    pub fn new() -> Self {
        Self {
            format: ImageFormat::Png,
        }
    }

    /// Encode surfaces with `format` instead of PNG.
    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = format;
        self
    }
}

impl Default for ImageSurfaceProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfaceProvider for ImageSurfaceProvider {
    type Surface = ImageSurface;

    fn create(&self, width: u32, height: u32) -> Result<ImageSurface> {
        if width == 0 || height == 0 || width > MAX_SURFACE_EDGE || height > MAX_SURFACE_EDGE {
            return Err(EngineError::Render(format!(
                "surface size {}x{} out of range (1..={})",
                width, height, MAX_SURFACE_EDGE
            )));
        }
        Ok(ImageSurface {
            canvas: RgbaImage::new(width, height),
            format: self.format,
        })
    }
}
