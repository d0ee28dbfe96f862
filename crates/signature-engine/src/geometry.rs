//! Pixel geometry shared by placement, interaction and normalization
//!
//! All values are CSS pixels relative to the top-left corner of one rendered
//! page element. They are only meaningful together with the [`RenderSize`]
//! of that element at the time they were produced.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A pointer position in page pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in page pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Geometry {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Width over height; 1.0 for degenerate boxes
    pub fn aspect_ratio(&self) -> f64 {
        if self.height > 0.0 && self.width > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    /// Sizes must be strictly positive and every component finite
    pub fn is_valid(&self) -> bool {
        self.x.is_finite()
            && self.y.is_finite()
            && self.width.is_finite()
            && self.height.is_finite()
            && self.width > 0.0
            && self.height > 0.0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x && point.x <= self.right() && point.y >= self.y && point.y <= self.bottom()
    }

    /// Snap the box inside `bounds`, shrinking it first if it is larger than the page.
    pub fn clamp_within(&self, bounds: RenderSize) -> Geometry {
        let width = self.width.min(bounds.width).max(0.0);
        let height = self.height.min(bounds.height).max(0.0);
        let x = self.x.clamp(0.0, (bounds.width - width).max(0.0));
        let y = self.y.clamp(0.0, (bounds.height - height).max(0.0));
        Geometry::new(x, y, width, height)
    }

    pub fn fits_within(&self, bounds: RenderSize) -> bool {
        const TOLERANCE: f64 = 1e-9;
        self.x >= 0.0
            && self.y >= 0.0
            && self.right() <= bounds.width + TOLERANCE
            && self.bottom() <= bounds.height + TOLERANCE
    }
}

/// Pixel dimensions of a page as currently displayed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderSize {
    pub width: f64,
    pub height: f64,
}

impl RenderSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    /// US Letter at 1.0 scale (PDF points)
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }
}

/// Source of the current render size of each page.
///
/// Implemented by the host's PDF viewer; sizes change with zoom and layout.
pub trait RenderSurface {
    /// `None` when the page is not currently rendered
    fn render_size(&self, page: u32) -> Option<RenderSize>;
}

/// Map-backed render surface, registered page by page
#[derive(Debug, Clone, Default)]
pub struct PageLayout {
    pages: HashMap<u32, RenderSize>,
}

impl PageLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every page rendered at the same size
    pub fn uniform(page_count: u32, size: RenderSize) -> Self {
        let mut layout = Self::new();
        for page in 1..=page_count {
            layout.register_page(page, size);
        }
        layout
    }

    pub fn register_page(&mut self, page: u32, size: RenderSize) {
        self.pages.insert(page, size);
    }
}

impl RenderSurface for PageLayout {
    fn render_size(&self, page: u32) -> Option<RenderSize> {
        self.pages.get(&page).copied().filter(RenderSize::is_usable)
    }
}
