//! Burn normalized signatures into PDF pages
//!
//! Each annotation is drawn into its page's content: the image scaled to its
//! width percentage, a timestamp caption below it and, when known, the signer
//! name. A completion certificate can be added to the last page.

use std::io::{Cursor, Write};

use chrono::{DateTime, SecondsFormat, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegDecoder;
use image::{DynamicImage, ExtendedColorType, ImageDecoder};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use tracing::{debug, warn};

use crate::capture::{ImageFormat, SignatureImage};
use crate::coords::PageBox;
use crate::error::{Result, SigningError};
use crate::pdf_text::media_box;
use crate::submission::NormalizedAnnotation;

const CAPTION_SIZE: f64 = 8.0;
const CAPTION_GREY: f64 = 0.4;
const FONT_REGULAR: &str = "SigHelv";
const FONT_BOLD: &str = "SigHelvB";

#[derive(Debug, Clone, Default)]
pub struct StampOptions {
    /// Sets the document title and, with `certificate`, names the document
    pub document_name: Option<String>,
    /// Draw a certificate of completion on the last page
    pub certificate: bool,
}

/// Stamp every annotation with default options
pub fn stamp_signatures(pdf_bytes: &[u8], annotations: &[NormalizedAnnotation]) -> Result<Vec<u8>> {
    stamp_signatures_with(pdf_bytes, annotations, &StampOptions::default())
}

pub fn stamp_signatures_with(
    pdf_bytes: &[u8],
    annotations: &[NormalizedAnnotation],
    options: &StampOptions,
) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(pdf_bytes).map_err(|e| SigningError::Pdf(e.to_string()))?;
    let pages = doc.get_pages();
    let fonts = Fonts::add_to(&mut doc);

    let mut stamped = 0;
    for (index, annotation) in annotations.iter().enumerate() {
        let Some(&page_id) = pages.get(&annotation.page) else {
            warn!(page = annotation.page, "Skipping signature for missing page");
            continue;
        };
        let signature = SignatureImage::from_data_url(&annotation.image_url, None, None)?;
        let page_box = media_box(&doc, page_id);
        let embedded = embed_image(&mut doc, &signature)?;
        let placement = Placement::resolve(annotation, &page_box, embedded.pixel_size);

        let name = format!("SigImg{}", index);
        let mut xobjects = Dictionary::new();
        xobjects.set(name.as_bytes().to_vec(), Object::Reference(embedded.id));
        let mut ops = draw_image_ops(&name, &placement);
        ops.extend(caption_ops(annotation, &placement));

        append_to_page(&mut doc, page_id, ops, &fonts, xobjects)?;
        stamped += 1;
    }

    if options.certificate {
        if let Some((_, &last_page)) = pages.iter().next_back() {
            let ops = certificate_ops(
                &media_box(&doc, last_page),
                options.document_name.as_deref().unwrap_or("Document"),
                annotations,
            );
            append_to_page(&mut doc, last_page, ops, &fonts, Dictionary::new())?;
        }
    }

    if let Some(name) = &options.document_name {
        set_title(&mut doc, &format!("Signed: {}", name));
    }

    debug!(stamped, total = annotations.len(), "stamped signatures");
    let mut output = Vec::new();
    doc.save_to(&mut output)
        .map_err(|e| SigningError::Pdf(e.to_string()))?;
    Ok(output)
}

/// Signature box in PDF points, bottom-left origin
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    x: f64,
    /// Bottom edge of the signature
    y: f64,
    width: f64,
    height: f64,
}

impl Placement {
    /// Height comes from the recorded `aspectRatio`, else the image's pixel aspect
    fn resolve(annotation: &NormalizedAnnotation, page_box: &PageBox, (px_width, px_height): (u32, u32)) -> Self {
        let geometry = &annotation.geometry;
        let (x, top) = page_box.percent_to_points(geometry.x_percent, geometry.y_percent);
        let width = geometry.width_percent / 100.0 * page_box.width;
        let aspect = if geometry.aspect_ratio.is_finite() && geometry.aspect_ratio > 0.0 {
            geometry.aspect_ratio
        } else if px_width > 0 && px_height > 0 {
            px_width as f64 / px_height as f64
        } else {
            1.0
        };
        let height = width / aspect;

        Self {
            x,
            y: top - height,
            width,
            height,
        }
    }
}

struct Fonts {
    regular: ObjectId,
    bold: ObjectId,
}

impl Fonts {
    fn add_to(doc: &mut Document) -> Self {
        let mut font = |base: &str| {
            doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => base,
                "Encoding" => "WinAnsiEncoding",
            })
        };
        Self {
            regular: font("Helvetica"),
            bold: font("Helvetica-Bold"),
        }
    }

    fn entries(&self) -> [(&'static str, ObjectId); 2] {
        [(FONT_REGULAR, self.regular), (FONT_BOLD, self.bold)]
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

fn text_bytes(text: &str) -> Object {
    let bytes = text
        .chars()
        .map(|c| if (c as u32) < 256 { c as u8 } else { b'?' })
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

fn text_ops(font: &str, size: f64, (r, g, b): (f64, f64, f64), x: f64, y: f64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec![Object::Name(font.as_bytes().to_vec()), real(size)]),
        Operation::new("rg", vec![real(r), real(g), real(b)]),
        Operation::new("Td", vec![real(x), real(y)]),
        Operation::new("Tj", vec![text_bytes(text)]),
        Operation::new("ET", vec![]),
    ]
}

fn draw_image_ops(name: &str, placement: &Placement) -> Vec<Operation> {
    vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                real(placement.width),
                real(0.0),
                real(0.0),
                real(placement.height),
                real(placement.x),
                real(placement.y),
            ],
        ),
        Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
        Operation::new("Q", vec![]),
    ]
}

fn caption_ops(annotation: &NormalizedAnnotation, placement: &Placement) -> Vec<Operation> {
    let grey = (CAPTION_GREY, CAPTION_GREY, CAPTION_GREY);
    let mut ops = text_ops(
        FONT_REGULAR,
        CAPTION_SIZE,
        grey,
        placement.x,
        placement.y - 15.0,
        &format!("Signed: {}", format_timestamp(&annotation.signed_at)),
    );
    if let Some(name) = annotation.name.as_deref().filter(|n| !n.is_empty()) {
        ops.extend(text_ops(
            FONT_REGULAR,
            CAPTION_SIZE,
            grey,
            placement.x,
            placement.y - 25.0,
            &format!("By: {}", name),
        ));
    }
    ops
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn certificate_ops(page_box: &PageBox, document_name: &str, annotations: &[NormalizedAnnotation]) -> Vec<Operation> {
    let (box_x, box_y) = (page_box.x + 50.0, page_box.y + 50.0);
    let (box_width, box_height) = ((page_box.width - 100.0).max(0.0), 120.0);
    let ink = (0.3, 0.3, 0.3);

    let mut signers: Vec<&str> = Vec::new();
    for name in annotations.iter().filter_map(|a| a.name.as_deref()) {
        if !name.is_empty() && !signers.contains(&name) {
            signers.push(name);
        }
    }
    let signers = if signers.is_empty() {
        "Document signed".to_string()
    } else {
        signers.join(", ")
    };

    let mut ops = vec![
        Operation::new("q", vec![]),
        Operation::new("rg", vec![real(0.97), real(0.97), real(0.97)]),
        Operation::new("RG", vec![real(0.9), real(0.9), real(0.9)]),
        Operation::new("w", vec![real(1.0)]),
        Operation::new("re", vec![real(box_x), real(box_y), real(box_width), real(box_height)]),
        Operation::new("B", vec![]),
        Operation::new("Q", vec![]),
    ];
    let left = box_x + 20.0;
    let top = box_y + box_height;
    ops.extend(text_ops(FONT_BOLD, 14.0, ink, left, top - 25.0, "Certificate of Completion"));
    ops.extend(text_ops(FONT_REGULAR, 10.0, ink, left, top - 45.0, &format!("Document: {}", document_name)));
    ops.extend(text_ops(FONT_REGULAR, 10.0, ink, left, top - 65.0, &format!("Signers: {}", signers)));
    ops.extend(text_ops(
        FONT_REGULAR,
        10.0,
        ink,
        left,
        top - 85.0,
        &format!("Timestamp: {}", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    ));
    ops
}

/// An image XObject and the pixel size it was embedded at
struct EmbeddedImage {
    id: ObjectId,
    pixel_size: (u32, u32),
}

fn image_error(e: image::ImageError) -> SigningError {
    SigningError::Image(e.to_string())
}

fn embed_image(doc: &mut Document, signature: &SignatureImage) -> Result<EmbeddedImage> {
    match signature.format() {
        ImageFormat::Png => {
            let decoded = image::load_from_memory_with_format(signature.payload(), image::ImageFormat::Png)
                .map_err(image_error)?;
            embed_pixels(doc, &decoded)
        }
        ImageFormat::Jpeg => embed_jpeg(doc, signature.payload()),
    }
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| SigningError::Image(e.to_string()))
}

/// Split interleaved samples into color and alpha planes
fn split_alpha(samples: &[u8], channels: usize) -> (Vec<u8>, Vec<u8>) {
    let mut color = Vec::with_capacity(samples.len());
    let mut alpha = Vec::with_capacity(samples.len() / channels);
    for pixel in samples.chunks_exact(channels) {
        color.extend_from_slice(&pixel[..channels - 1]);
        alpha.push(pixel[channels - 1]);
    }
    (color, alpha)
}

/// Decoded pixels as Flate RGB (or gray), with any alpha channel as soft mask
fn embed_pixels(doc: &mut Document, decoded: &DynamicImage) -> Result<EmbeddedImage> {
    let color_type = decoded.color();
    let (color, alpha, color_space) = if color_type.channel_count() <= 2 {
        let (color, alpha) = split_alpha(decoded.to_luma_alpha8().as_raw(), 2);
        (color, alpha, "DeviceGray")
    } else {
        let (color, alpha) = split_alpha(decoded.to_rgba8().as_raw(), 4);
        (color, alpha, "DeviceRGB")
    };

    let (width, height) = (decoded.width(), decoded.height());
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => color_space,
        "BitsPerComponent" => 8,
        "Filter" => "FlateDecode",
    };
    if color_type.has_alpha() {
        let mask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
                "Filter" => "FlateDecode",
            },
            deflate(&alpha)?,
        );
        let mask_id = doc.add_object(mask);
        dict.set("SMask", Object::Reference(mask_id));
    }
    Ok(EmbeddedImage {
        id: doc.add_object(Stream::new(dict, deflate(&color)?)),
        pixel_size: (width, height),
    })
}

/// Gray and RGB JPEGs pass through untouched as a DCT stream; other color
/// models are decoded and re-embedded as RGB.
fn embed_jpeg(doc: &mut Document, bytes: &[u8]) -> Result<EmbeddedImage> {
    let decoder = JpegDecoder::new(Cursor::new(bytes)).map_err(image_error)?;
    let (width, height) = decoder.dimensions();
    let color_space = match decoder.original_color_type() {
        ExtendedColorType::L8 => "DeviceGray",
        ExtendedColorType::Rgb8 => "DeviceRGB",
        other => {
            debug!(color = ?other, "Re-encoding JPEG signature as RGB");
            let decoded = DynamicImage::from_decoder(decoder).map_err(image_error)?;
            return embed_pixels(doc, &decoded);
        }
    };
    let mut stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        },
        bytes.to_vec(),
    );
    stream.allows_compression = false;
    Ok(EmbeddedImage {
        id: doc.add_object(stream),
        pixel_size: (width, height),
    })
}

fn resolve_dict(doc: &Document, obj: &Object) -> Option<Dictionary> {
    match obj {
        Object::Dictionary(d) => Some(d.clone()),
        Object::Reference(id) => doc.get_dictionary(*id).ok().cloned(),
        _ => None,
    }
}

/// Effective resources of a page, following inheritance from the page tree
fn page_resources(doc: &Document, page_id: ObjectId) -> Dictionary {
    let mut current = Some(page_id);
    while let Some(id) = current {
        let Ok(dict) = doc.get_dictionary(id) else {
            break;
        };
        if let Some(resources) = dict.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r)) {
            return resources;
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Dictionary::new()
}

/// Append drawing operations to a page, isolating them from the existing
/// content's graphics state.
fn append_to_page(
    doc: &mut Document,
    page_id: ObjectId,
    ops: Vec<Operation>,
    fonts: &Fonts,
    xobjects: Dictionary,
) -> Result<()> {
    let mut resources = page_resources(doc, page_id);

    let mut font_dict = resources
        .get(b"Font")
        .ok()
        .and_then(|f| resolve_dict(doc, f))
        .unwrap_or_default();
    for (name, id) in fonts.entries() {
        font_dict.set(name, Object::Reference(id));
    }
    resources.set("Font", Object::Dictionary(font_dict));

    if !xobjects.is_empty() {
        let mut xobject_dict = resources
            .get(b"XObject")
            .ok()
            .and_then(|x| resolve_dict(doc, x))
            .unwrap_or_default();
        for (name, value) in xobjects.iter() {
            xobject_dict.set(name.clone(), value.clone());
        }
        resources.set("XObject", Object::Dictionary(xobject_dict));
    }

    let encode = |operations: Vec<Operation>| {
        Content { operations }
            .encode()
            .map_err(|e| SigningError::Pdf(e.to_string()))
    };
    let save_id = doc.add_object(Stream::new(dictionary! {}, encode(vec![Operation::new("q", vec![])])?));
    let mut drawing = vec![Operation::new("Q", vec![])];
    drawing.extend(ops);
    // Existing streams may end without trailing whitespace
    let mut drawing_bytes = b"\n".to_vec();
    drawing_bytes.extend(encode(drawing)?);
    let draw_id = doc.add_object(Stream::new(dictionary! {}, drawing_bytes));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| SigningError::Pdf(e.to_string()))?;
    let mut contents = vec![Object::Reference(save_id)];
    match page.get(b"Contents") {
        Ok(Object::Array(existing)) => contents.extend(existing.iter().cloned()),
        Ok(existing @ Object::Reference(_)) => contents.push(existing.clone()),
        _ => {}
    }
    contents.push(Object::Reference(draw_id));
    page.set("Contents", Object::Array(contents));
    page.set("Resources", Object::Dictionary(resources));
    Ok(())
}

fn set_title(doc: &mut Document, title: &str) {
    let info_id = match doc.trailer.get(b"Info").and_then(Object::as_reference) {
        Ok(id) => id,
        Err(_) => {
            let id = doc.add_object(Dictionary::new());
            doc.trailer.set("Info", Object::Reference(id));
            id
        }
    };
    if let Ok(info) = doc.get_dictionary_mut(info_id) {
        info.set("Title", Object::string_literal(title));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{DrawingSurface, SignatureCapture, SignatureFont};
    use crate::coords::NormalizedGeometry;
    use crate::geometry::Point;

    fn create_test_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.7");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for _ in 0..pages {
            let content_id = doc.add_object(Stream::new(dictionary! {}, b"BT ET".to_vec()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => content_id,
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

    fn drawn_image() -> SignatureImage {
        let mut surface = DrawingSurface::new(100.0, 50.0);
        let mut session = surface.begin_session();
        session.begin_stroke(Point::new(5.0, 25.0));
        session.extend_stroke(Point::new(95.0, 25.0));
        session.end_stroke();
        session.capture(&SignatureCapture::default()).unwrap()
    }

    fn annotation(page: u32, image: &SignatureImage, name: Option<&str>) -> NormalizedAnnotation {
        NormalizedAnnotation {
            page,
            geometry: NormalizedGeometry {
                x_percent: 10.0,
                y_percent: 50.0,
                width_percent: 25.0,
                aspect_ratio: 3.0,
            },
            image_url: image.data_url(),
            name: name.map(String::from),
            email: None,
            signed_at: Utc::now(),
        }
    }

    fn page_content(pdf: &[u8], page: u32) -> String {
        let doc = Document::load_mem(pdf).unwrap();
        let page_id = doc.get_pages()[&page];
        String::from_utf8_lossy(&doc.get_page_content(page_id).unwrap()).into_owned()
    }

    #[test]
    fn test_png_signature_with_soft_mask() {
        let pdf = create_test_pdf(1);
        let image = drawn_image();
        let result = stamp_signatures(&pdf, &[annotation(1, &image, Some("Jane Doe"))]).unwrap();
        assert!(result.starts_with(b"%PDF-"));

        let doc = Document::load_mem(&result).unwrap();
        let has_smask = doc.objects.values().any(|obj| {
            obj.as_stream()
                .map(|s| s.dict.get(b"SMask").is_ok())
                .unwrap_or(false)
        });
        assert!(has_smask);

        let content = page_content(&result, 1);
        assert!(content.contains("/SigImg0 Do"));
        assert!(content.contains("(Signed: "));
        assert!(content.contains("(By: Jane Doe)"));
    }

    fn jpeg(pixels: DynamicImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        pixels.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn dct_stream(pdf: &[u8]) -> Stream {
        let doc = Document::load_mem(pdf).unwrap();
        doc.objects
            .values()
            .find_map(|obj| {
                let stream = obj.as_stream().ok()?;
                let filter = stream.dict.get(b"Filter").ok()?.as_name().ok()?;
                (filter == b"DCTDecode").then(|| stream.clone())
            })
            .unwrap()
    }

    #[test]
    fn test_height_follows_recorded_aspect() {
        // 100x50 canvas, recorded aspect 3.0
        let placement = Placement::resolve(&annotation(1, &drawn_image(), None), &PageBox::LETTER, (100, 50));
        assert!((placement.x - 61.2).abs() < 1e-9);
        assert!((placement.width - 153.0).abs() < 1e-9);
        assert!((placement.height - 51.0).abs() < 1e-9);
        assert!((placement.y + placement.height - 396.0).abs() < 1e-9);
    }

    #[test]
    fn test_height_falls_back_to_pixel_aspect() {
        let image = drawn_image();
        for recorded in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let mut stamped = annotation(1, &image, None);
            stamped.geometry.aspect_ratio = recorded;
            let placement = Placement::resolve(&stamped, &PageBox::LETTER, (100, 50));
            assert!((placement.height - 76.5).abs() < 1e-9);

            let square = Placement::resolve(&stamped, &PageBox::LETTER, (0, 0));
            assert!((square.height - 153.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_placement_in_offset_media_box() {
        let page_box = PageBox::from_rect([100.0, 200.0, 400.0, 600.0]);
        let placement = Placement::resolve(&annotation(1, &drawn_image(), None), &page_box, (100, 50));
        assert!((placement.x - 140.0).abs() < 1e-9);
        assert!((placement.width - 100.0).abs() < 1e-9);
        assert!((placement.y + placement.height - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_typed_signature_embedded_as_image() {
        let pdf = create_test_pdf(1);
        let image = SignatureCapture::default()
            .capture_typed("Jane & Co", SignatureFont::Script, "#0000FF")
            .unwrap();
        let result = stamp_signatures(&pdf, &[annotation(1, &image, None)]).unwrap();

        let content = page_content(&result, 1);
        assert!(content.contains("/SigImg0 Do"));
        assert!(!content.contains("Jane & Co"));

        let doc = Document::load_mem(&result).unwrap();
        let image_stream = doc
            .objects
            .values()
            .filter_map(|obj| obj.as_stream().ok())
            .find(|s| s.dict.get(b"SMask").is_ok())
            .unwrap();
        assert_eq!(image_stream.dict.get(b"Width").unwrap().as_i64().unwrap(), 400);
        assert_eq!(image_stream.dict.get(b"Height").unwrap().as_i64().unwrap(), 150);
    }

    #[test]
    fn test_missing_page_is_skipped() {
        let pdf = create_test_pdf(1);
        let image = drawn_image();
        let result = stamp_signatures(&pdf, &[annotation(5, &image, None)]).unwrap();
        let content = page_content(&result, 1);
        assert!(!content.contains("Do"));
    }

    #[test]
    fn test_jpeg_passes_through() {
        let bytes = jpeg(DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            40,
            20,
            image::Rgb([200, 30, 30]),
        )));
        let image = SignatureCapture::default()
            .capture_uploaded(bytes.clone(), "image/jpeg")
            .unwrap();
        let pdf = create_test_pdf(1);
        let result = stamp_signatures(&pdf, &[annotation(1, &image, None)]).unwrap();

        let stream = dct_stream(&result);
        assert_eq!(stream.content, bytes);
        assert_eq!(stream.dict.get(b"Width").unwrap().as_i64().unwrap(), 40);
        assert_eq!(stream.dict.get(b"Height").unwrap().as_i64().unwrap(), 20);
        assert_eq!(stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceRGB");
    }

    #[test]
    fn test_grayscale_jpeg_keeps_gray_color_space() {
        let bytes = jpeg(DynamicImage::ImageLuma8(image::GrayImage::from_pixel(
            16,
            16,
            image::Luma([90]),
        )));
        let image = SignatureCapture::default()
            .capture_uploaded(bytes, "image/jpg")
            .unwrap();
        let result = stamp_signatures(&create_test_pdf(1), &[annotation(1, &image, None)]).unwrap();
        let stream = dct_stream(&result);
        assert_eq!(stream.dict.get(b"ColorSpace").unwrap().as_name().unwrap(), b"DeviceGray");
    }

    #[test]
    fn test_truncated_jpeg_fails() {
        let image = SignatureCapture::default()
            .capture_uploaded(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00], "image/jpeg")
            .unwrap();
        let result = stamp_signatures(&create_test_pdf(1), &[annotation(1, &image, None)]);
        assert!(matches!(result, Err(SigningError::Image(_))));
    }

    #[test]
    fn test_certificate_and_title() {
        let pdf = create_test_pdf(2);
        let image = drawn_image();
        let options = StampOptions {
            document_name: Some("Change Order 14".to_string()),
            certificate: true,
        };
        let result = stamp_signatures_with(
            &pdf,
            &[annotation(1, &image, Some("Owner")), annotation(2, &image, Some("Owner"))],
            &options,
        )
        .unwrap();

        let last = page_content(&result, 2);
        assert!(last.contains("(Certificate of Completion)"));
        assert!(last.contains("(Signers: Owner)"));
        assert!(!page_content(&result, 1).contains("Certificate"));

        let doc = Document::load_mem(&result).unwrap();
        let info_id = doc.trailer.get(b"Info").unwrap().as_reference().unwrap();
        let title = doc.get_dictionary(info_id).unwrap().get(b"Title").unwrap();
        assert_eq!(title.as_str().unwrap(), b"Signed: Change Order 14");
    }

    #[test]
    fn test_corrupt_image_fails() {
        let pdf = create_test_pdf(1);
        let image = drawn_image();
        let mut broken = annotation(1, &image, None);
        broken.image_url = "data:image/png;base64,AAAA".to_string();
        assert!(stamp_signatures(&pdf, &[broken]).is_err());
    }
}
