//! Engine configuration
//!
//! Every value has a default matching the signing view's behaviour, so an
//! empty TOML document is a valid configuration. Hosts override individual
//! sections:
//!
//! ```toml
//! [placement]
//! default_width = 240.0
//!
//! [detection]
//! keywords = ["signature", "sign here"]
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::geometry::Geometry;

/// Top-level configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub placement: PlacementConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub fallback: FallbackPlacement,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the TOML is malformed
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: EngineConfig =
            toml::from_str(s).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.placement.default_geometry().is_valid() {
            anyhow::bail!("placement: default size must be positive");
        }
        let overlay = &self.overlay;
        if !(overlay.min_width > 0.0 && overlay.min_height > 0.0) {
            anyhow::bail!("overlay: minimum size must be positive");
        }
        if !(overlay.handle_size > 0.0 && overlay.handle_size.is_finite()) {
            anyhow::bail!("overlay: handle size must be positive");
        }
        if self.capture.typed_width == 0 || self.capture.typed_height == 0 {
            anyhow::bail!("capture: typed canvas must not be empty");
        }
        if !(self.capture.typed_font_size > 0.0 && self.capture.typed_font_size.is_finite()) {
            anyhow::bail!("capture: typed font size must be positive");
        }
        if self.capture.max_canvas_pixels == 0 {
            anyhow::bail!("capture: canvas pixel limit must be positive");
        }
        if self.detection.keywords.iter().all(|k| k.trim().is_empty()) {
            anyhow::bail!("detection: at least one keyword is required");
        }
        Ok(())
    }
}

/// Where a freshly placed signature lands on the visible page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default = "default_placement_x")]
    pub default_x: f64,
    #[serde(default = "default_placement_y")]
    pub default_y: f64,
    #[serde(default = "default_placement_width")]
    pub default_width: f64,
    #[serde(default = "default_placement_height")]
    pub default_height: f64,
}

impl PlacementConfig {
    pub fn default_geometry(&self) -> Geometry {
        Geometry::new(
            self.default_x,
            self.default_y,
            self.default_width,
            self.default_height,
        )
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            default_x: default_placement_x(),
            default_y: default_placement_y(),
            default_width: default_placement_width(),
            default_height: default_placement_height(),
        }
    }
}

fn default_placement_x() -> f64 {
    100.0
}

fn default_placement_y() -> f64 {
    100.0
}

fn default_placement_width() -> f64 {
    200.0
}

fn default_placement_height() -> f64 {
    75.0
}

/// Drag and resize constraints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default = "default_min_width")]
    pub min_width: f64,
    #[serde(default = "default_min_height")]
    pub min_height: f64,
    /// Side of the square resize handle anchored at the bottom-right corner
    #[serde(default = "default_handle_size")]
    pub handle_size: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_width: default_min_width(),
            min_height: default_min_height(),
            handle_size: default_handle_size(),
        }
    }
}

fn default_min_width() -> f64 {
    50.0
}

fn default_min_height() -> f64 {
    20.0
}

fn default_handle_size() -> f64 {
    16.0
}

/// Signature capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Typed signature canvas, in logical pixels
    #[serde(default = "default_typed_width")]
    pub typed_width: u32,
    #[serde(default = "default_typed_height")]
    pub typed_height: u32,
    #[serde(default = "default_typed_font_size")]
    pub typed_font_size: f64,
    #[serde(default = "default_allowed_upload_types")]
    pub allowed_upload_types: Vec<String>,
    /// Upper bound on a drawn signature's backing store, in device pixels
    #[serde(default = "default_max_canvas_pixels")]
    pub max_canvas_pixels: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            typed_width: default_typed_width(),
            typed_height: default_typed_height(),
            typed_font_size: default_typed_font_size(),
            allowed_upload_types: default_allowed_upload_types(),
            max_canvas_pixels: default_max_canvas_pixels(),
        }
    }
}

fn default_typed_width() -> u32 {
    400
}

fn default_typed_height() -> u32 {
    150
}

fn default_typed_font_size() -> f64 {
    48.0
}

fn default_allowed_upload_types() -> Vec<String> {
    vec![
        "image/png".to_string(),
        "image/jpeg".to_string(),
        "image/jpg".to_string(),
    ]
}

fn default_max_canvas_pixels() -> u64 {
    4096 * 4096
}

/// Lexical signature field detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionConfig {
    /// Matched case-insensitively as substrings of each text run
    #[serde(default = "default_keywords")]
    pub keywords: Vec<String>,
    #[serde(default = "default_fallback_width")]
    pub fallback_width: f64,
    #[serde(default = "default_fallback_height")]
    pub fallback_height: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            fallback_width: default_fallback_width(),
            fallback_height: default_fallback_height(),
        }
    }
}

fn default_keywords() -> Vec<String> {
    vec!["signature".to_string()]
}

fn default_fallback_width() -> f64 {
    100.0
}

fn default_fallback_height() -> f64 {
    30.0
}

/// Percentages used when a page's render size is unknown at submission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FallbackPlacement {
    #[serde(default = "default_fallback_x_percent")]
    pub x_percent: f64,
    #[serde(default = "default_fallback_y_percent")]
    pub y_percent: f64,
    #[serde(default = "default_fallback_width_percent")]
    pub width_percent: f64,
}

impl Default for FallbackPlacement {
    fn default() -> Self {
        Self {
            x_percent: default_fallback_x_percent(),
            y_percent: default_fallback_y_percent(),
            width_percent: default_fallback_width_percent(),
        }
    }
}

fn default_fallback_x_percent() -> f64 {
    20.0
}

fn default_fallback_y_percent() -> f64 {
    70.0
}

fn default_fallback_width_percent() -> f64 {
    25.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(
            config.placement.default_geometry(),
            Geometry::new(100.0, 100.0, 200.0, 75.0)
        );
        assert_eq!(config.detection.keywords, vec!["signature".to_string()]);
        assert_eq!(config.fallback.x_percent, 20.0);
        assert_eq!(config.fallback.y_percent, 70.0);
        assert_eq!(config.fallback.width_percent, 25.0);
    }

    #[test]
    fn test_partial_override() {
        let toml = r#"
            [placement]
            default_width = 240.0

            [detection]
            keywords = ["signature", "sign here"]
        "#;
        let config = EngineConfig::from_str(toml).unwrap();
        assert_eq!(config.placement.default_width, 240.0);
        assert_eq!(config.placement.default_height, 75.0);
        assert_eq!(config.detection.keywords.len(), 2);
        assert_eq!(config.overlay, OverlayConfig::default());
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(EngineConfig::from_str("[placement]\ndefault_width = 0.0").is_err());
        assert!(EngineConfig::from_str("[detection]\nkeywords = []").is_err());
        assert!(EngineConfig::from_str("[overlay]\nmin_height = -1.0").is_err());
        assert!(EngineConfig::from_str("not toml at all [").is_err());
    }

    #[test]
    fn test_rejects_nan_and_bad_handle() {
        assert!(EngineConfig::from_str("[overlay]\nmin_width = nan").is_err());
        assert!(EngineConfig::from_str("[overlay]\nmin_height = nan").is_err());
        assert!(EngineConfig::from_str("[overlay]\nhandle_size = 0.0").is_err());
        assert!(EngineConfig::from_str("[overlay]\nhandle_size = nan").is_err());
        assert!(EngineConfig::from_str("[overlay]\nhandle_size = inf").is_err());
        assert!(EngineConfig::from_str("[capture]\ntyped_font_size = nan").is_err());
        assert!(EngineConfig::from_str("[capture]\nmax_canvas_pixels = 0").is_err());

        let config = EngineConfig::from_str("[overlay]\nhandle_size = 24.0").unwrap();
        assert_eq!(config.overlay.handle_size, 24.0);
        assert_eq!(config.capture.max_canvas_pixels, 4096 * 4096);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        fs::write(&path, "[capture]\ntyped_font_size = 36.0\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.capture.typed_font_size, 36.0);

        let missing = EngineConfig::from_file(dir.path().join("missing.toml"));
        assert!(missing.is_err());
    }
}
