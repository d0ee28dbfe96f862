//! Lexical signature field detection
//!
//! Scans each page's positioned text runs for keywords such as "signature".
//! Results are hints for the user, never placement targets.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DetectionConfig;
use crate::error::Result;
use crate::geometry::Geometry;

/// A positioned piece of text, top-left origin in page pixels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRun {
    pub text: String,
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl TextRun {
    pub fn new(text: impl Into<String>, origin_x: f64, origin_y: f64) -> Self {
        Self {
            text: text.into(),
            origin_x,
            origin_y,
            width: None,
            height: None,
        }
    }

    pub fn with_size(mut self, width: f64, height: f64) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }
}

/// Per-page text extraction provided by the rendering collaborator
#[async_trait]
pub trait TextLayer: Send + Sync {
    async fn page_count(&self) -> Result<u32>;

    /// Runs for a 1-based page, in content order
    async fn text_runs(&self, page: u32) -> Result<Vec<TextRun>>;
}

/// A candidate signature location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedField {
    pub page: u32,
    pub bounds: Geometry,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct FieldDetector {
    keywords: Vec<String>,
    fallback_width: f64,
    fallback_height: f64,
}

impl Default for FieldDetector {
    fn default() -> Self {
        Self::new(&DetectionConfig::default())
    }
}

impl FieldDetector {
    pub fn new(config: &DetectionConfig) -> Self {
        Self {
            keywords: config
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
            fallback_width: config.fallback_width,
            fallback_height: config.fallback_height,
        }
    }

    fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    /// Match one page's runs, preserving run order
    pub fn detect_page(&self, page: u32, runs: &[TextRun]) -> Vec<DetectedField> {
        runs.iter()
            .filter(|run| self.matches(&run.text))
            .map(|run| DetectedField {
                page,
                bounds: Geometry::new(
                    run.origin_x,
                    run.origin_y,
                    run.width.filter(|w| *w > 0.0).unwrap_or(self.fallback_width),
                    run.height.filter(|h| *h > 0.0).unwrap_or(self.fallback_height),
                ),
                text: run.text.clone(),
            })
            .collect()
    }

    /// Scan every page. Pages that fail to extract contribute nothing.
    pub async fn detect(&self, layer: &dyn TextLayer) -> Vec<DetectedField> {
        let page_count = match layer.page_count().await {
            Ok(count) => count,
            Err(err) => {
                warn!("Field detection skipped, page count unavailable: {}", err);
                return Vec::new();
            }
        };

        let mut fields = Vec::new();
        for page in 1..=page_count {
            match layer.text_runs(page).await {
                Ok(runs) => fields.extend(self.detect_page(page, &runs)),
                Err(err) => warn!(page, "Text extraction failed: {}", err),
            }
        }

        debug!(pages = page_count, fields = fields.len(), "field detection finished");
        fields
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: every detected field comes from a matching run, in run order
        #[test]
        fn prop_detected_fields_follow_run_order(
            texts in prop::collection::vec("[a-zA-Z ]{0,20}", 0..20)
        ) {
            let runs: Vec<TextRun> = texts
                .iter()
                .enumerate()
                .map(|(i, t)| TextRun::new(t.clone(), 0.0, i as f64))
                .collect();
            let fields = FieldDetector::default().detect_page(1, &runs);

            let expected: Vec<f64> = runs
                .iter()
                .filter(|r| r.text.to_lowercase().contains("signature"))
                .map(|r| r.origin_y)
                .collect();
            let actual: Vec<f64> = fields.iter().map(|f| f.bounds.y).collect();
            prop_assert_eq!(actual, expected);
            prop_assert!(fields.iter().all(|f| f.bounds.is_valid()));
        }
    }
}
