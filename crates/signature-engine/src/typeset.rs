//! Typed signature rendering
//!
//! A typed name is typeset by Typst on a transparent page the size of the
//! typed-signature canvas and rasterized to PNG, so typed signatures reach
//! the stamper as ordinary raster images. Only the fonts bundled with
//! `typst-assets` are used, which keeps output identical across hosts.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{debug, info, warn};
use typst::diag::{FileError, FileResult, SourceDiagnostic};
use typst::foundations::{Bytes, Datetime, Dict, Value};
use typst::syntax::{FileId, Source, VirtualPath};
use typst::text::{Font, FontBook};
use typst::utils::LazyHash;
use typst::{Library, World};

use crate::capture::{Rgb, SignatureFont};
use crate::error::{Result, SigningError};

static FONT_CACHE: OnceLock<FontCache> = OnceLock::new();

fn font_cache() -> &'static FontCache {
    FONT_CACHE.get_or_init(FontCache::embedded)
}

/// Fonts bundled with `typst-assets`, loaded once per process
struct FontCache {
    book: LazyHash<FontBook>,
    fonts: Vec<Font>,
}

impl FontCache {
    fn embedded() -> Self {
        let mut book = FontBook::new();
        let mut fonts = Vec::new();
        for data in typst_assets::fonts() {
            for font in Font::iter(Bytes::from_static(data)) {
                book.push(font.info().clone());
                fonts.push(font);
            }
        }
        info!("Font cache initialized with {} fonts", fonts.len());
        Self {
            book: LazyHash::new(book),
            fonts,
        }
    }
}

/// The bundled face a [`SignatureFont`] is set in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Typeface {
    pub family: &'static str,
    pub italic: bool,
    pub weight: &'static str,
}

impl SignatureFont {
    pub fn typeface(&self) -> Typeface {
        let (family, italic, weight) = match self {
            SignatureFont::Script => ("Libertinus Serif", true, "regular"),
            SignatureFont::Handwritten => ("New Computer Modern", true, "regular"),
            SignatureFont::Formal => ("Libertinus Serif", false, "semibold"),
            SignatureFont::Professional => ("New Computer Modern", false, "regular"),
            SignatureFont::Elegant => ("Libertinus Serif", true, "semibold"),
        };
        Typeface {
            family,
            italic,
            weight,
        }
    }
}

/// What to typeset and on how large a canvas
pub(crate) struct TypedLayout<'a> {
    pub name: &'a str,
    pub font: SignatureFont,
    pub color: Rgb,
    pub width: u32,
    pub height: u32,
    pub font_size: f64,
}

/// Rendered PNG plus its pixel dimensions
pub(crate) struct RenderedName {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Single-file world; the name travels through `sys.inputs` and is never
/// spliced into markup.
struct SignatureWorld {
    main: Source,
    library: LazyHash<Library>,
    fonts: &'static FontCache,
    time: DateTime<Utc>,
}

impl SignatureWorld {
    fn new(layout: &TypedLayout<'_>) -> Self {
        let mut inputs = Dict::new();
        inputs.insert("name".into(), Value::Str(layout.name.into()));
        let library = Library::builder().with_inputs(inputs).build();

        let id = FileId::new(None, VirtualPath::new("/signature.typ"));
        Self {
            main: Source::new(id, markup(layout)),
            library: LazyHash::new(library),
            fonts: font_cache(),
            time: Utc::now(),
        }
    }
}

impl World for SignatureWorld {
    fn library(&self) -> &LazyHash<Library> {
        &self.library
    }

    fn book(&self) -> &LazyHash<FontBook> {
        &self.fonts.book
    }

    fn main(&self) -> FileId {
        self.main.id()
    }

    fn source(&self, id: FileId) -> FileResult<Source> {
        if id == self.main.id() {
            Ok(self.main.clone())
        } else {
            Err(FileError::NotFound(id.vpath().as_rootless_path().into()))
        }
    }

    fn file(&self, id: FileId) -> FileResult<Bytes> {
        Err(FileError::NotFound(id.vpath().as_rootless_path().into()))
    }

    fn font(&self, index: usize) -> Option<Font> {
        self.fonts.fonts.get(index).cloned()
    }

    fn today(&self, offset: Option<i64>) -> Option<Datetime> {
        let adjusted = self.time + chrono::Duration::hours(offset.unwrap_or(0));
        Datetime::from_ymd_hms(
            adjusted.year(),
            adjusted.month() as u8,
            adjusted.day() as u8,
            adjusted.hour() as u8,
            adjusted.minute() as u8,
            adjusted.second() as u8,
        )
    }
}

fn markup(layout: &TypedLayout<'_>) -> String {
    let face = layout.font.typeface();
    format!(
        concat!(
            "#set page(width: {w}pt, height: {h}pt, margin: 0pt, fill: none)\n",
            "#set text(font: \"{family}\", style: \"{style}\", weight: \"{weight}\", ",
            "size: {size}pt, fill: rgb(\"{fill}\"))\n",
            "#align(center + horizon, text(sys.inputs.name))\n",
        ),
        w = layout.width,
        h = layout.height,
        family = face.family,
        style = if face.italic { "italic" } else { "normal" },
        weight = face.weight,
        size = layout.font_size,
        fill = layout.color.to_hex(),
    )
}

fn diagnostics(diags: &[SourceDiagnostic]) -> String {
    diags
        .iter()
        .map(|d| d.message.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Typeset `layout.name` and rasterize the first page at one pixel per point
pub(crate) fn render_name(layout: &TypedLayout<'_>) -> Result<RenderedName> {
    let world = SignatureWorld::new(layout);
    let warned = typst::compile(&world);
    if !warned.warnings.is_empty() {
        warn!(warnings = %diagnostics(&warned.warnings), "typed signature compiled with warnings");
    }
    let document = warned
        .output
        .map_err(|errors| SigningError::Image(format!("typeset failed: {}", diagnostics(&errors))))?;
    let page = document
        .pages
        .first()
        .ok_or_else(|| SigningError::Image("typeset produced no pages".to_string()))?;

    let pixmap = typst_render::render(page, 1.0);
    let png = pixmap
        .encode_png()
        .map_err(|e| SigningError::Image(format!("PNG encoding failed: {}", e)))?;

    debug!(width = pixmap.width(), height = pixmap.height(), "rendered typed signature");
    Ok(RenderedName {
        png,
        width: pixmap.width(),
        height: pixmap.height(),
    })
}
