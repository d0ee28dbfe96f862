//! Signature capture
//!
//! Three input modes converge on one [`SignatureImage`]: freehand strokes
//! rasterized to PNG, a typed name typeset onto a fixed PNG canvas, or an
//! uploaded PNG/JPEG passed through untouched. Placement code never needs to know how
//! a signature was produced.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CaptureConfig;
use crate::error::{Result, SigningError};
use crate::geometry::Point;
use crate::typeset::{render_name, TypedLayout};

// ============================================================
// Signature images
// ============================================================

/// Encoding of a signature payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    fn from_mime_type(mime: &str) -> Option<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }
}

/// Font families offered for typed signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureFont {
    Script,
    Handwritten,
    Formal,
    Professional,
    Elegant,
}

/// Ink color, parsed from `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0x00, 0x00, 0x00);
    pub const BLUE: Rgb = Rgb::new(0x00, 0x00, 0xFF);
    pub const GREEN: Rgb = Rgb::new(0x00, 0x80, 0x00);
    pub const RED: Rgb = Rgb::new(0xFF, 0x00, 0x00);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn parse_hex(color: &str) -> Result<Self> {
        let hex = color.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(SigningError::validation(
                "color",
                format!("expected #rrggbb, got {:?}", color),
            ));
        }
        let channel = |i: usize| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| SigningError::validation("color", e.to_string()))
        };
        Ok(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// How a signature was produced, with only the fields relevant to that mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SignatureSource {
    Drawn {
        strokes: usize,
        width: u32,
        height: u32,
    },
    Typed {
        name: String,
        font: SignatureFont,
        color: Rgb,
    },
    Uploaded {
        mime_type: String,
    },
}

impl SignatureSource {
    pub fn label(&self) -> &'static str {
        match self {
            SignatureSource::Drawn { .. } => "drawn",
            SignatureSource::Typed { .. } => "typed",
            SignatureSource::Uploaded { .. } => "uploaded",
        }
    }
}

/// A captured signature; immutable once created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureImage {
    #[serde(with = "payload_base64")]
    payload: Vec<u8>,
    format: ImageFormat,
    source: SignatureSource,
    created_at: DateTime<Utc>,
}

impl SignatureImage {
    pub(crate) fn new(payload: Vec<u8>, format: ImageFormat, source: SignatureSource) -> Self {
        Self {
            payload,
            format,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn source(&self) -> &SignatureSource {
        &self.source
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Self-contained `data:` URL for the payload
    pub fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.format.mime_type(),
            BASE64.encode(&self.payload)
        )
    }

    /// Rebuild an image from a `data:` URL, e.g. one read back from storage
    pub fn from_data_url(
        url: &str,
        source: Option<SignatureSource>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self> {
        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| SigningError::UnsupportedFormat("not a data URL".to_string()))?;
        let (mime, data) = rest
            .split_once(";base64,")
            .ok_or_else(|| SigningError::UnsupportedFormat("data URL is not base64".to_string()))?;
        let format = ImageFormat::from_mime_type(mime)
            .ok_or_else(|| SigningError::UnsupportedFormat(mime.to_string()))?;
        let payload = BASE64
            .decode(data.trim())
            .map_err(|e| SigningError::Image(e.to_string()))?;

        Ok(Self {
            payload,
            format,
            source: source.unwrap_or(SignatureSource::Uploaded {
                mime_type: mime.to_string(),
            }),
            created_at: created_at.unwrap_or_else(Utc::now),
        })
    }
}

/// Serde adapter storing byte payloads as standard base64 strings
pub(crate) mod payload_base64 {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// Scratch drawing surface
// ============================================================

/// One continuous pen-down movement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stroke {
    pub points: Vec<Point>,
}

/// The canvas freehand signatures are drawn on.
///
/// Owned by the capture UI; only one [`DrawingSession`] can borrow it at a time.
#[derive(Debug, Clone)]
pub struct DrawingSurface {
    width: f64,
    height: f64,
    pixel_ratio: f64,
    ink: Rgb,
    line_width: f64,
    strokes: Vec<Stroke>,
    pen_down: bool,
}

impl DrawingSurface {
    /// Logical size in CSS pixels
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            pixel_ratio: 1.0,
            ink: Rgb::BLACK,
            line_width: 2.0,
            strokes: Vec::new(),
            pen_down: false,
        }
    }

    /// Backing store scale, i.e. the device pixel ratio
    pub fn with_pixel_ratio(mut self, pixel_ratio: f64) -> Self {
        if pixel_ratio.is_finite() && pixel_ratio > 0.0 {
            self.pixel_ratio = pixel_ratio;
        }
        self
    }

    pub fn with_ink(mut self, ink: Rgb) -> Self {
        self.ink = ink;
        self
    }

    pub fn with_line_width(mut self, line_width: f64) -> Self {
        if line_width.is_finite() && line_width > 0.0 {
            self.line_width = line_width;
        }
        self
    }

    /// Start a capture session on a freshly cleared surface
    pub fn begin_session(&mut self) -> DrawingSession<'_> {
        self.clear();
        DrawingSession { surface: self }
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn is_blank(&self) -> bool {
        self.strokes.iter().all(|s| s.points.is_empty())
    }

    pub fn clear(&mut self) {
        self.strokes.clear();
        self.pen_down = false;
    }

    /// Backing store size in device pixels, bounded by `max_pixels`
    fn raster_size(&self, max_pixels: u64) -> Result<(u32, u32)> {
        let w = (self.width * self.pixel_ratio).ceil();
        let h = (self.height * self.pixel_ratio).ceil();
        if !(w.is_finite() && h.is_finite()) || w * h > max_pixels as f64 {
            return Err(SigningError::validation(
                "canvas",
                format!(
                    "{}x{} at ratio {} exceeds {} pixels",
                    self.width, self.height, self.pixel_ratio, max_pixels
                ),
            ));
        }
        Ok((w.max(1.0) as u32, h.max(1.0) as u32))
    }
}

/// Exclusive use of a [`DrawingSurface`] for one capture.
///
/// The surface is cleared when the session starts and again when it is
/// dropped, whether or not a signature was captured.
pub struct DrawingSession<'a> {
    surface: &'a mut DrawingSurface,
}

impl DrawingSession<'_> {
    pub fn begin_stroke(&mut self, point: Point) {
        self.surface.strokes.push(Stroke {
            points: vec![point],
        });
        self.surface.pen_down = true;
    }

    /// Ignored unless a stroke is in progress
    pub fn extend_stroke(&mut self, point: Point) {
        if !self.surface.pen_down {
            return;
        }
        if let Some(stroke) = self.surface.strokes.last_mut() {
            stroke.points.push(point);
        }
    }

    pub fn end_stroke(&mut self) {
        self.surface.pen_down = false;
    }

    pub fn set_ink(&mut self, ink: Rgb) {
        self.surface.ink = ink;
    }

    /// Discard everything drawn so far in this session
    pub fn clear(&mut self) {
        self.surface.clear();
    }

    pub fn is_blank(&self) -> bool {
        self.surface.is_blank()
    }

    pub fn surface(&self) -> &DrawingSurface {
        self.surface
    }

    pub fn capture(&self, capture: &SignatureCapture) -> Result<SignatureImage> {
        capture.capture_drawn(self.surface)
    }
}

impl Drop for DrawingSession<'_> {
    fn drop(&mut self) {
        self.surface.clear();
    }
}

// ============================================================
// Capture
// ============================================================

/// Produces exactly one [`SignatureImage`] per call
#[derive(Debug, Clone, Default)]
pub struct SignatureCapture {
    config: CaptureConfig,
}

impl SignatureCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    /// Rasterize the strokes on `surface` into a transparent PNG
    pub fn capture_drawn(&self, surface: &DrawingSurface) -> Result<SignatureImage> {
        if surface.is_blank() {
            return Err(SigningError::EmptyCapture);
        }

        let (width, height) = surface.raster_size(self.config.max_canvas_pixels)?;
        let pixels = rasterize_strokes(surface, width, height);
        let payload = encode_png(width, height, &pixels)?;
        let strokes = surface
            .strokes
            .iter()
            .filter(|s| !s.points.is_empty())
            .count();

        debug!(strokes, width, height, "captured drawn signature");
        Ok(SignatureImage::new(
            payload,
            ImageFormat::Png,
            SignatureSource::Drawn {
                strokes,
                width,
                height,
            },
        ))
    }

    /// Typeset `name` centered on the typed-signature canvas as a transparent PNG
    pub fn capture_typed(
        &self,
        name: &str,
        font: SignatureFont,
        color: &str,
    ) -> Result<SignatureImage> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SigningError::validation(
                "name",
                "typed signature must not be empty",
            ));
        }
        let color = Rgb::parse_hex(color)?;

        let rendered = render_name(&TypedLayout {
            name,
            font,
            color,
            width: self.config.typed_width,
            height: self.config.typed_height,
            font_size: self.config.typed_font_size,
        })?;

        debug!(font = ?font, width = rendered.width, height = rendered.height, "captured typed signature");
        Ok(SignatureImage::new(
            rendered.png,
            ImageFormat::Png,
            SignatureSource::Typed {
                name: name.to_string(),
                font,
                color,
            },
        ))
    }

    /// Accept an uploaded image whose declared type is on the allow-list
    pub fn capture_uploaded(&self, bytes: Vec<u8>, declared_mime_type: &str) -> Result<SignatureImage> {
        let mime = declared_mime_type.trim().to_ascii_lowercase();
        let allowed = self
            .config
            .allowed_upload_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&mime));
        let format = match ImageFormat::from_mime_type(&mime) {
            Some(format) if allowed => format,
            _ => return Err(SigningError::UnsupportedFormat(declared_mime_type.to_string())),
        };
        if bytes.is_empty() {
            return Err(SigningError::UnsupportedFormat("empty file".to_string()));
        }

        debug!(mime = %mime, bytes = bytes.len(), "captured uploaded signature");
        Ok(SignatureImage::new(
            bytes,
            format,
            SignatureSource::Uploaded { mime_type: mime },
        ))
    }
}

/// Round-capped strokes on a transparent RGBA buffer
fn rasterize_strokes(surface: &DrawingSurface, width: u32, height: u32) -> Vec<u8> {
    let mut pixels = vec![0u8; width as usize * height as usize * 4];
    let scale = surface.pixel_ratio;
    let radius = (surface.line_width * scale / 2.0).max(0.5);

    for stroke in &surface.strokes {
        let points: Vec<Point> = stroke
            .points
            .iter()
            .map(|p| Point::new(p.x * scale, p.y * scale))
            .collect();
        match points.as_slice() {
            [] => {}
            [single] => stamp_segment(&mut pixels, width, height, *single, *single, radius, surface.ink),
            _ => {
                for pair in points.windows(2) {
                    stamp_segment(&mut pixels, width, height, pair[0], pair[1], radius, surface.ink);
                }
            }
        }
    }
    pixels
}

#[allow(clippy::too_many_arguments)]
fn stamp_segment(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    a: Point,
    b: Point,
    radius: f64,
    ink: Rgb,
) {
    let min_x = (a.x.min(b.x) - radius - 1.0).floor().max(0.0) as u32;
    let min_y = (a.y.min(b.y) - radius - 1.0).floor().max(0.0) as u32;
    let max_x = ((a.x.max(b.x) + radius + 1.0).ceil().max(0.0) as u32).min(width);
    let max_y = ((a.y.max(b.y) + radius + 1.0).ceil().max(0.0) as u32).min(height);

    for py in min_y..max_y {
        for px in min_x..max_x {
            let center = Point::new(px as f64 + 0.5, py as f64 + 0.5);
            let coverage = (radius + 0.5 - distance_to_segment(center, a, b)).clamp(0.0, 1.0);
            if coverage <= 0.0 {
                continue;
            }
            let i = (py as usize * width as usize + px as usize) * 4;
            let alpha = (coverage * 255.0).round() as u8;
            pixels[i] = ink.r;
            pixels[i + 1] = ink.g;
            pixels[i + 2] = ink.b;
            pixels[i + 3] = pixels[i + 3].max(alpha);
        }
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.x + t * dx, a.y + t * dy);
    ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt()
}

fn encode_png(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut out, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder
            .write_header()
            .map_err(|e| SigningError::Image(e.to_string()))?;
        writer
            .write_image_data(rgba)
            .map_err(|e| SigningError::Image(e.to_string()))?;
        writer
            .finish()
            .map_err(|e| SigningError::Image(e.to_string()))?;
    }
    Ok(out)
}
