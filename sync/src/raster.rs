//! Raster — the drawing surface the stroke engine paints on.
//!
//! DESIGN
//! ======
//! The engine only needs a few operations: stroke a polyline with a round
//! brush, clear, resize without losing the top-left region, and move the
//! whole raster in and out of a `data:image/jpeg;base64,...` URI. [`Surface`]
//! names exactly those. [`PixelCanvas`] is a software RGBA implementation on
//! top of the `image` crate; it backs headless sessions and every test.
//!
//! Snapshots are JPEG, so they carry no alpha: export flattens the raster
//! onto white, and an imported snapshot is opaque.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, Rgba, RgbaImage};

pub const DEFAULT_JPEG_QUALITY: u8 = 70;
pub const JPEG_DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Flattening steps for the quadratic half of a smoothed segment.
const SMOOTHING_STEPS: u32 = 8;
/// Thinnest brush radius that still covers the pixel under the pointer.
const MIN_RADIUS: f64 = 0.75;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("invalid color: {0}")]
    Color(String),
    #[error("invalid data URI: {0}")]
    DataUri(String),
    #[error("snapshot encode failed: {0}")]
    Encode(String),
    #[error("snapshot decode failed: {0}")]
    Decode(String),
}

impl frames::ErrorCode for RasterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Color(_) => "E_RASTER_COLOR",
            Self::DataUri(_) => "E_RASTER_DATA_URI",
            Self::Encode(_) => "E_RASTER_ENCODE",
            Self::Decode(_) => "E_RASTER_DECODE",
        }
    }
}

// =============================================================================
// GEOMETRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn midpoint(self, other: Self) -> Self {
        Self::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Pixel dimensions of a surface. Zero in either axis means "not yet sized".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Path for one segment: a quadratic from `from` toward the midpoint (with
/// `from` as the control point), then a straight run to `to`.
#[must_use]
pub fn smooth_path(from: Point, to: Point) -> Vec<Point> {
    let mid = from.midpoint(to);
    let mut path = Vec::with_capacity(SMOOTHING_STEPS as usize + 2);
    path.push(from);
    for step in 1..=SMOOTHING_STEPS {
        let t = f64::from(step) / f64::from(SMOOTHING_STEPS);
        let inv = 1.0 - t;
        // Control point equals the start, so B(t) = (1 - t²)·from + t²·mid.
        let a = inv * inv + 2.0 * inv * t;
        let c = t * t;
        path.push(Point::new(a * from.x + c * mid.x, a * from.y + c * mid.y));
    }
    path.push(to);
    path
}

// =============================================================================
// COLOR AND BRUSH
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color(pub [u8; 4]);

impl Color {
    /// Parse `#rgb`, `#rrggbb`, or `#rrggbbaa`.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Color`] for anything else.
    pub fn parse_hex(raw: &str) -> Result<Self, RasterError> {
        let invalid = || RasterError::Color(raw.to_owned());
        let hex = raw.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
        match hex.len() {
            3 => {
                let mut rgba = [255; 4];
                for (slot, c) in rgba.iter_mut().zip(hex.chars()) {
                    *slot = channel(&format!("{c}{c}"))?;
                }
                Ok(Self(rgba))
            }
            6 | 8 => {
                let mut rgba = [255; 4];
                for (i, slot) in rgba.iter_mut().take(hex.len() / 2).enumerate() {
                    *slot = channel(&hex[i * 2..i * 2 + 2])?;
                }
                Ok(Self(rgba))
            }
            _ => Err(invalid()),
        }
    }
}

/// Stroke color (CSS hex) and width in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub color: String,
    pub width: f64,
}

// =============================================================================
// SURFACE
// =============================================================================

pub trait Surface: Send {
    fn size(&self) -> Size;

    /// Paint a polyline with round caps and joins.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Color`] when the brush color does not parse.
    fn stroke_path(&mut self, path: &[Point], brush: &Brush) -> Result<(), RasterError>;

    fn clear(&mut self);

    /// Change pixel dimensions, keeping the overlapping top-left region.
    fn resize(&mut self, size: Size);

    /// Encode the whole raster as a JPEG data URI.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Encode`] when the surface is empty or encoding fails.
    fn export_snapshot(&self) -> Result<String, RasterError>;

    /// Paint a snapshot, scaled to the current size, beneath whatever is
    /// already on the surface.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::DataUri`] or [`RasterError::Decode`] for bad input.
    fn restore_snapshot(&mut self, data_uri: &str) -> Result<(), RasterError>;
}

// =============================================================================
// PIXEL CANVAS
// =============================================================================

/// Software RGBA raster. Starts unsized and fully transparent.
pub struct PixelCanvas {
    image: RgbaImage,
    quality: u8,
}

impl Default for PixelCanvas {
    fn default() -> Self {
        Self { image: RgbaImage::new(0, 0), quality: DEFAULT_JPEG_QUALITY }
    }
}

impl PixelCanvas {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_size(size: Size) -> Self {
        Self { image: RgbaImage::new(size.width, size.height), ..Self::default() }
    }

    /// JPEG quality for exports, clamped to 1..=100.
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.clamp(1, 100);
        self
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x < self.image.width() && y < self.image.height() {
            Some(self.image.get_pixel(x, y).0)
        } else {
            None
        }
    }

    /// Count of pixels with any opacity.
    #[must_use]
    pub fn painted_pixels(&self) -> usize {
        self.image.pixels().filter(|p| p.0[3] > 0).count()
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.painted_pixels() == 0
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn stamp(&mut self, center: Point, radius: f64, color: Color) {
        let (width, height) = self.image.dimensions();
        if width == 0 || height == 0 {
            return;
        }
        let max_x = f64::from(width - 1);
        let max_y = f64::from(height - 1);
        let x0 = (center.x - radius).floor().clamp(0.0, max_x) as u32;
        let x1 = (center.x + radius).ceil().clamp(0.0, max_x) as u32;
        let y0 = (center.y - radius).floor().clamp(0.0, max_y) as u32;
        let y1 = (center.y + radius).ceil().clamp(0.0, max_y) as u32;
        let r2 = radius * radius;

        for y in y0..=y1 {
            let dy = f64::from(y) + 0.5 - center.y;
            for x in x0..=x1 {
                let dx = f64::from(x) + 0.5 - center.x;
                if dx * dx + dy * dy <= r2 {
                    self.image.put_pixel(x, y, Rgba(color.0));
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn stroke_segment(&mut self, from: Point, to: Point, radius: f64, color: Color) {
        let spacing = (radius * 0.5).max(0.5);
        let steps = (from.distance(to) / spacing).ceil().max(1.0) as u32;
        for step in 0..=steps {
            let t = f64::from(step) / f64::from(steps);
            let at = Point::new(from.x + (to.x - from.x) * t, from.y + (to.y - from.y) * t);
            self.stamp(at, radius, color);
        }
    }
}

impl Surface for PixelCanvas {
    fn size(&self) -> Size {
        Size::new(self.image.width(), self.image.height())
    }

    fn stroke_path(&mut self, path: &[Point], brush: &Brush) -> Result<(), RasterError> {
        let color = Color::parse_hex(&brush.color)?;
        let radius = (brush.width / 2.0).max(MIN_RADIUS);
        match path {
            [] => {}
            [only] => self.stamp(*only, radius, color),
            _ => {
                for pair in path.windows(2) {
                    self.stroke_segment(pair[0], pair[1], radius, color);
                }
            }
        }
        Ok(())
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn resize(&mut self, size: Size) {
        if size == self.size() {
            return;
        }
        let mut next = RgbaImage::new(size.width, size.height);
        imageops::replace(&mut next, &self.image, 0, 0);
        self.image = next;
    }

    fn export_snapshot(&self) -> Result<String, RasterError> {
        if self.size().is_empty() {
            return Err(RasterError::Encode("surface has no pixels".into()));
        }
        let flat = flatten_on_white(&self.image);
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode_image(&flat)
            .map_err(|e| RasterError::Encode(e.to_string()))?;
        Ok(format!("{JPEG_DATA_URI_PREFIX}{}", STANDARD.encode(bytes)))
    }

    fn restore_snapshot(&mut self, data_uri: &str) -> Result<(), RasterError> {
        let bytes = decode_data_uri(data_uri)?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| RasterError::Decode(e.to_string()))?;
        let size = self.size();
        if size.is_empty() {
            return Ok(());
        }
        let mut snapshot = decoded.to_rgba8();
        if snapshot.dimensions() != (size.width, size.height) {
            snapshot = imageops::resize(&snapshot, size.width, size.height, FilterType::Triangle);
        }
        for (x, y, under) in snapshot.enumerate_pixels() {
            let current = self.image.get_pixel_mut(x, y);
            if current.0[3] == 0 {
                *current = *under;
            }
        }
        Ok(())
    }
}

// =============================================================================
// DATA URI CODEC
// =============================================================================

#[allow(clippy::cast_possible_truncation)]
fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    let mut flat = RgbImage::new(image.width(), image.height());
    for (x, y, pixel) in image.enumerate_pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = u32::from(a);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha)) / 255) as u8;
        flat.put_pixel(x, y, Rgb([blend(r), blend(g), blend(b)]));
    }
    flat
}

/// Decode the payload bytes of a base64 `data:` URI.
///
/// # Errors
///
/// Returns [`RasterError::DataUri`] when the URI is not a base64 data URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, RasterError> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| RasterError::DataUri("missing data: scheme".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| RasterError::DataUri("missing payload separator".into()))?;
    if !header.ends_with(";base64") {
        return Err(RasterError::DataUri(format!("unsupported encoding: {header}")));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| RasterError::DataUri(e.to_string()))
}

#[cfg(test)]
#[path = "raster_test.rs"]
mod tests;
