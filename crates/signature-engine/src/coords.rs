//! Coordinate transformation between rendered pixels, page percentages and PDF points
//!
//! Pixel geometry is only valid against the render size that produced it.
//! Percentages of the page render size are portable across zoom levels and
//! viewports, so they are the only form that is persisted or transmitted.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::FallbackPlacement;
use crate::error::{Result, SigningError};
use crate::geometry::{Geometry, Point, RenderSize};

/// Page-relative geometry, each component in percent of the page render size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedGeometry {
    pub x_percent: f64,
    pub y_percent: f64,
    pub width_percent: f64,
    /// Pixel width over pixel height; zoom scales both axes alike
    pub aspect_ratio: f64,
}

/// Bidirectional pixel/percentage mapping
#[derive(Debug, Clone, Default)]
pub struct CoordinateNormalizer {
    fallback: FallbackPlacement,
}

impl CoordinateNormalizer {
    pub fn new(fallback: FallbackPlacement) -> Self {
        Self { fallback }
    }

    /// Strict conversion; fails when the page has no usable render size
    pub fn try_to_percent(
        &self,
        geometry: &Geometry,
        page: u32,
        render_size: Option<RenderSize>,
    ) -> Result<NormalizedGeometry> {
        let size = render_size
            .filter(RenderSize::is_usable)
            .ok_or(SigningError::RenderUnavailable { page })?;

        Ok(NormalizedGeometry {
            x_percent: geometry.x / size.width * 100.0,
            y_percent: geometry.y / size.height * 100.0,
            width_percent: geometry.width / size.width * 100.0,
            aspect_ratio: geometry.aspect_ratio(),
        })
    }

    /// Convert to percentages, falling back to the configured placement when
    /// the page is not rendered. Percentages are left unclamped.
    pub fn to_percent(
        &self,
        geometry: &Geometry,
        page: u32,
        render_size: Option<RenderSize>,
    ) -> NormalizedGeometry {
        match self.try_to_percent(geometry, page, render_size) {
            Ok(normalized) => normalized,
            Err(err) => {
                debug!("{}; using fallback placement", err);
                NormalizedGeometry {
                    x_percent: self.fallback.x_percent,
                    y_percent: self.fallback.y_percent,
                    width_percent: self.fallback.width_percent,
                    aspect_ratio: geometry.aspect_ratio(),
                }
            }
        }
    }

    /// Inverse of [`Self::to_percent`] against a (possibly different) render size
    pub fn to_pixels(&self, normalized: &NormalizedGeometry, render_size: RenderSize) -> Geometry {
        let width = normalized.width_percent / 100.0 * render_size.width;
        Geometry {
            x: normalized.x_percent / 100.0 * render_size.width,
            y: normalized.y_percent / 100.0 * render_size.height,
            width,
            height: width / effective_aspect(normalized.aspect_ratio),
        }
    }

    /// Pixel geometry safe to start an interaction with: percentages are
    /// clamped to [0, 100] and the box is kept on the page.
    pub fn to_overlay_geometry(
        &self,
        normalized: &NormalizedGeometry,
        render_size: RenderSize,
    ) -> Geometry {
        let clamped = NormalizedGeometry {
            x_percent: normalized.x_percent.clamp(0.0, 100.0),
            y_percent: normalized.y_percent.clamp(0.0, 100.0),
            width_percent: normalized.width_percent.clamp(0.0, 100.0),
            aspect_ratio: normalized.aspect_ratio,
        };
        self.to_pixels(&clamped, render_size)
            .clamp_within(render_size)
    }
}

fn effective_aspect(aspect_ratio: f64) -> f64 {
    if aspect_ratio.is_finite() && aspect_ratio > 0.0 {
        aspect_ratio
    } else {
        1.0
    }
}

/// A page's MediaBox in PDF points, bottom-left origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl PageBox {
    pub const LETTER: PageBox = PageBox {
        x: 0.0,
        y: 0.0,
        width: 612.0,
        height: 792.0,
    };

    /// From a `[x, y, width, height]` box; degenerate boxes become Letter
    pub fn from_rect([x, y, width, height]: [f64; 4]) -> Self {
        let usable = [x, y, width, height].iter().all(|v| v.is_finite()) && width > 0.0 && height > 0.0;
        if usable {
            Self { x, y, width, height }
        } else {
            Self::LETTER
        }
    }

    /// Size of the page rendered at `scale` pixels per point
    pub fn render_size(&self, scale: f64) -> RenderSize {
        RenderSize::new(self.width * scale, self.height * scale)
    }

    /// Page percentages (top-left origin) to PDF points
    pub fn percent_to_points(&self, x_percent: f64, y_percent: f64) -> (f64, f64) {
        (
            self.x + x_percent / 100.0 * self.width,
            self.y + self.height - y_percent / 100.0 * self.height,
        )
    }

    /// PDF points to a top-left origin position on the page rendered at `render_size`
    pub fn points_to_render(&self, x: f64, y: f64, render_size: RenderSize) -> Point {
        let x_fraction = (x - self.x) / self.width;
        let y_fraction = 1.0 - (y - self.y) / self.height;
        Point::new(x_fraction * render_size.width, y_fraction * render_size.height)
    }
}
