//! Text layer read directly from PDF bytes using lopdf
//!
//! Only text positioning is interpreted. Glyph widths are not available
//! without font metrics, so run widths are estimated from the font size.

use std::sync::Arc;

use async_trait::async_trait;
use lopdf::content::Content;
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, warn};

use crate::coords::PageBox;
use crate::detect::{TextLayer, TextRun};
use crate::error::{Result, SigningError};

/// Average glyph advance as a fraction of the font size
const AVERAGE_GLYPH_WIDTH: f64 = 0.5;

/// One page's geometry and its concatenated content streams
struct PageContent {
    page_box: PageBox,
    /// Unreadable content is kept as the error so only that page fails
    content: std::result::Result<Vec<u8>, String>,
}

/// PDF-backed [`TextLayer`].
///
/// The document is parsed once; page content is shared so extraction can
/// run on the blocking pool.
#[derive(Clone)]
pub struct PdfTextLayer {
    pages: Arc<[PageContent]>,
    /// Rendered pixels per PDF point
    scale: f64,
}

impl PdfTextLayer {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes).map_err(|e| SigningError::Pdf(e.to_string()))?;
        let pages: Vec<PageContent> = doc
            .get_pages()
            .into_iter()
            .map(|(page, page_id)| PageContent {
                page_box: media_box(&doc, page_id),
                content: doc.get_page_content(page_id).map_err(|e| {
                    warn!(page, "Unreadable page content: {}", e);
                    e.to_string()
                }),
            })
            .collect();
        debug!(pages = pages.len(), "loaded PDF text layer");
        Ok(Self {
            pages: pages.into(),
            scale: 1.0,
        })
    }

    /// Report run positions for pages rendered at `scale` pixels per point
    pub fn with_scale(mut self, scale: f64) -> Self {
        if scale.is_finite() && scale > 0.0 {
            self.scale = scale;
        }
        self
    }

    pub fn page_total(&self) -> u32 {
        self.pages.len() as u32
    }

    /// Runs for one page, top-left origin in rendered pixels
    pub fn extract_runs(&self, page: u32) -> Result<Vec<TextRun>> {
        let entry = page
            .checked_sub(1)
            .and_then(|index| self.pages.get(index as usize))
            .ok_or_else(|| SigningError::Pdf(format!("Page {} not found", page)))?;
        let data = entry.content.as_ref().map_err(|e| SigningError::Pdf(e.clone()))?;
        let content = Content::decode(data).map_err(|e| SigningError::Pdf(e.to_string()))?;

        let mut state = TextState::default();
        let mut runs = Vec::new();
        for op in &content.operations {
            if let Some(placed) = state.apply(&op.operator, &op.operands) {
                runs.push(self.to_run(placed, &entry.page_box));
            }
        }
        debug!(page, runs = runs.len(), "extracted text runs");
        Ok(runs)
    }

    fn to_run(&self, placed: PlacedText, page_box: &PageBox) -> TextRun {
        let baseline = page_box.points_to_render(placed.x, placed.y, page_box.render_size(self.scale));

        let size = placed.font_size * self.scale;
        if size > 0.0 {
            let chars = placed.text.chars().count() as f64;
            TextRun {
                text: placed.text,
                origin_x: baseline.x,
                origin_y: baseline.y - size,
                width: Some(chars * size * AVERAGE_GLYPH_WIDTH),
                height: Some(size),
            }
        } else {
            TextRun::new(placed.text, baseline.x, baseline.y)
        }
    }
}

#[async_trait]
impl TextLayer for PdfTextLayer {
    async fn page_count(&self) -> Result<u32> {
        Ok(self.page_total())
    }

    async fn text_runs(&self, page: u32) -> Result<Vec<TextRun>> {
        let layer = self.clone();
        tokio::task::spawn_blocking(move || layer.extract_runs(page))
            .await
            .map_err(|e| SigningError::Pdf(format!("text extraction task failed: {}", e)))?
    }
}

/// MediaBox of a page, inherited from the page tree when absent
pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_object(id).and_then(Object::as_dict) else {
            break;
        };
        if let Ok(rect) = dict.get(b"MediaBox") {
            return parse_rect(doc, rect).map_or(PageBox::LETTER, PageBox::from_rect);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    PageBox::LETTER
}

fn parse_rect(doc: &Document, obj: &Object) -> Option<[f64; 4]> {
    let arr = match obj {
        Object::Array(a) => a,
        Object::Reference(id) => doc.get_object(*id).ok()?.as_array().ok()?,
        _ => return None,
    };
    if arr.len() != 4 {
        return None;
    }
    let values: Vec<f64> = arr.iter().filter_map(number).collect();
    match values.as_slice() {
        [x1, y1, x2, y2] if x2 > x1 && y2 > y1 => Some([*x1, *y1, x2 - x1, y2 - y1]),
        _ => None,
    }
}

fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

fn string_text(obj: &Object) -> Option<String> {
    match obj {
        Object::String(bytes, _) => Some(bytes.iter().map(|&b| b as char).collect()),
        _ => None,
    }
}

/// 2D affine matrix [a b c d e f]
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Default for Matrix {
    fn default() -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0])
    }
}

impl Matrix {
    fn from_operands(operands: &[Object]) -> Option<Self> {
        let values: Vec<f64> = operands.iter().filter_map(number).collect();
        let m: [f64; 6] = values.try_into().ok()?;
        Some(Matrix(m))
    }

    fn translation(tx: f64, ty: f64) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    /// self × other
    fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a * a2 + b * c2,
            a * b2 + b * d2,
            c * a2 + d * c2,
            c * b2 + d * d2,
            e * a2 + f * c2 + e2,
            e * b2 + f * d2 + f2,
        ])
    }

    fn vertical_scale(&self) -> f64 {
        let [_, _, c, d, _, _] = self.0;
        (c * c + d * d).sqrt()
    }
}

struct PlacedText {
    text: String,
    x: f64,
    y: f64,
    font_size: f64,
}

/// Graphics and text state needed to position text-showing operators
#[derive(Default)]
struct TextState {
    ctm: Matrix,
    saved: Vec<Matrix>,
    text_matrix: Matrix,
    line_matrix: Matrix,
    font_size: f64,
    leading: f64,
}

impl TextState {
    fn apply(&mut self, operator: &str, operands: &[Object]) -> Option<PlacedText> {
        let num = |i: usize| operands.get(i).and_then(number);
        match operator {
            "q" => self.saved.push(self.ctm),
            "Q" => self.ctm = self.saved.pop().unwrap_or_default(),
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.ctm = m.then(&self.ctm);
                }
            }
            "BT" => {
                self.text_matrix = Matrix::default();
                self.line_matrix = Matrix::default();
            }
            "Tf" => self.font_size = num(1).unwrap_or(self.font_size),
            "TL" => self.leading = num(0).unwrap_or(self.leading),
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.text_matrix = m;
                    self.line_matrix = m;
                }
            }
            "Td" => self.next_line(num(0).unwrap_or(0.0), num(1).unwrap_or(0.0)),
            "TD" => {
                let ty = num(1).unwrap_or(0.0);
                self.leading = -ty;
                self.next_line(num(0).unwrap_or(0.0), ty);
            }
            "T*" => self.next_line(0.0, -self.leading),
            "Tj" => return self.show(operands.first().and_then(string_text)),
            "'" => {
                self.next_line(0.0, -self.leading);
                return self.show(operands.first().and_then(string_text));
            }
            "\"" => {
                self.next_line(0.0, -self.leading);
                return self.show(operands.get(2).and_then(string_text));
            }
            "TJ" => {
                let text = operands.first().and_then(|o| o.as_array().ok()).map(|items| {
                    items
                        .iter()
                        .filter_map(|item| match item {
                            // large negative kerning is a word gap
                            other if number(other).is_some_and(|n| n < -200.0) => {
                                Some(" ".to_string())
                            }
                            other => string_text(other),
                        })
                        .collect::<String>()
                });
                return self.show(text);
            }
            _ => {}
        }
        None
    }

    fn next_line(&mut self, tx: f64, ty: f64) {
        self.line_matrix = Matrix::translation(tx, ty).then(&self.line_matrix);
        self.text_matrix = self.line_matrix;
    }

    fn show(&self, text: Option<String>) -> Option<PlacedText> {
        let text = text?;
        if text.trim().is_empty() {
            return None;
        }
        let rendering = self.text_matrix.then(&self.ctm);
        let [_, _, _, _, x, y] = rendering.0;
        Some(PlacedText {
            text,
            x,
            y,
            font_size: self.font_size * rendering.vertical_scale(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Operation;
    use lopdf::{dictionary, Stream};

    fn pdf_with_pages(pages: &[Vec<Operation>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut kids = Vec::new();
        for operations in pages {
            let content = Content {
                operations: operations.clone(),
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => font_id },
                },
            });
            kids.push(Object::Reference(page_id));
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

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }

    fn text_at(x: i64, y: i64, text: &str) -> Vec<Operation> {
        vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![x.into(), y.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ]
    }

    #[test]
    fn test_extracts_positioned_runs() {
        let pdf = pdf_with_pages(&[text_at(72, 100, "Signature: ________")]);
        let layer = PdfTextLayer::from_bytes(&pdf).unwrap();
        assert_eq!(layer.page_total(), 1);

        let runs = layer.extract_runs(1).unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.text, "Signature: ________");
        assert!((run.origin_x - 72.0).abs() < 1e-6);
        // baseline at 792 - 100 = 692 from the top, minus the font size
        assert!((run.origin_y - 680.0).abs() < 1e-6);
        assert_eq!(run.height, Some(12.0));
    }

    #[test]
    fn test_scale_applies_to_positions() {
        let pdf = pdf_with_pages(&[text_at(100, 392, "Sign")]);
        let layer = PdfTextLayer::from_bytes(&pdf).unwrap().with_scale(2.0);
        let runs = layer.extract_runs(1).unwrap();
        assert!((runs[0].origin_x - 200.0).abs() < 1e-6);
        assert!((runs[0].origin_y - (800.0 - 24.0)).abs() < 1e-6);
    }

    #[test]
    fn test_line_operators_advance() {
        let ops = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("TL", vec![14.into()]),
            Operation::new("Tm", vec![1.into(), 0.into(), 0.into(), 1.into(), 50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal("First")]),
            Operation::new("T*", vec![]),
            Operation::new("Tj", vec![Object::string_literal("Second")]),
            Operation::new("'", vec![Object::string_literal("Third")]),
            Operation::new(
                "TJ",
                vec![Object::Array(vec![
                    Object::string_literal("Owner"),
                    Object::Integer(-300),
                    Object::string_literal("Signature"),
                ])],
            ),
            Operation::new("ET", vec![]),
        ];
        let pdf = pdf_with_pages(&[ops]);
        let runs = PdfTextLayer::from_bytes(&pdf)
            .unwrap()
            .extract_runs(1)
            .unwrap();

        let texts: Vec<&str> = runs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["First", "Second", "Third", "Owner Signature"]);
        let baselines: Vec<f64> = runs.iter().map(|r| r.origin_y + 10.0).collect();
        assert!((baselines[0] - 92.0).abs() < 1e-6);
        assert!((baselines[1] - 106.0).abs() < 1e-6);
        assert!((baselines[2] - 120.0).abs() < 1e-6);
        assert!((baselines[3] - 120.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_page_is_an_error() {
        let pdf = pdf_with_pages(&[text_at(72, 100, "Signature")]);
        let layer = PdfTextLayer::from_bytes(&pdf).unwrap();
        assert!(matches!(layer.extract_runs(2), Err(SigningError::Pdf(_))));
    }

    #[tokio::test]
    async fn test_layer_outlives_source_bytes() {
        let pdf = pdf_with_pages(&[text_at(72, 100, "Terms"), text_at(72, 100, "Signature")]);
        let layer = PdfTextLayer::from_bytes(&pdf).unwrap();
        drop(pdf);

        let shared = layer.clone();
        let runs = shared.text_runs(2).await.unwrap();
        assert_eq!(runs[0].text, "Signature");
        assert!(layer.text_runs(3).await.is_err());
        assert!(layer.text_runs(0).await.is_err());
    }

    #[test]
    fn test_rejects_non_pdf() {
        assert!(PdfTextLayer::from_bytes(b"not a pdf").is_err());
    }

    #[tokio::test]
    async fn test_detects_fields_in_pdf() {
        use crate::detect::FieldDetector;

        let pdf = pdf_with_pages(&[
            text_at(72, 100, "Contractor Signature"),
            text_at(72, 500, "Scope of work"),
            text_at(300, 120, "Owner signature"),
        ]);
        let layer = PdfTextLayer::from_bytes(&pdf).unwrap();
        let fields = FieldDetector::default().detect(&layer).await;

        let pages: Vec<u32> = fields.iter().map(|f| f.page).collect();
        assert_eq!(pages, vec![1, 3]);
        assert!((fields[1].bounds.x - 300.0).abs() < 1e-6);
    }
}
