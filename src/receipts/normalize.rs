//! Turns uploaded bytes into extraction-ready raster pages.
//!
//! Rasters are sniffed by content: PNG, JPEG and WEBP pass through untouched,
//! GIF becomes PNG, anything else decodable is re-encoded. PDF pages are
//! rasterized by the configured [`PageRenderer`]. A page it cannot render,
//! or every page when no renderer is configured, falls back to the largest
//! embedded image of that page.

use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat, ImageOutputFormat};
use lopdf::{Dictionary, Document, Object, ObjectId};
use thiserror::Error;
use tracing::{debug, warn};

use super::render::PageRenderer;

pub const MIME_PDF: &str = "application/pdf";

/// Content-addressed id of an uploaded document (blake3 hex).
pub type DocumentId = String;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("document is {size} bytes, limit is {limit}")]
    SizeLimitExceeded { size: usize, limit: usize },

    #[error("document has {pages} pages, limit is {limit}")]
    PageLimitExceeded { pages: usize, limit: usize },

    #[error("no page of the document could be converted")]
    NoUsablePages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Png,
    Jpeg,
    Webp,
}

impl ImageEncoding {
    pub fn mime(self) -> &'static str {
        match self {
            ImageEncoding::Png => "image/png",
            ImageEncoding::Jpeg => "image/jpeg",
            ImageEncoding::Webp => "image/webp",
        }
    }
}

/// Raw upload as delivered by the chat front end.
#[derive(Debug, Clone)]
pub struct DocumentPayload {
    pub declared_mime: Option<String>,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

impl DocumentPayload {
    pub fn document_id(&self) -> DocumentId {
        blake3::hash(&self.bytes).to_hex().to_string()
    }

    fn looks_like_pdf(&self) -> bool {
        self.bytes.starts_with(b"%PDF")
            || self.declared_mime.as_deref() == Some(MIME_PDF)
            || self
                .filename
                .as_deref()
                .is_some_and(|f| f.to_ascii_lowercase().ends_with(".pdf"))
    }
}

#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    /// Zero-based page index within the source document.
    pub page_index: usize,
    pub source: DocumentId,
}

/// A page that could not be converted. The remaining pages are still used.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWarning {
    pub page_index: usize,
    pub reason: String,
}

/// Non-empty, ordered pages of one source document.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    pages: Vec<NormalizedPage>,
    pub source: DocumentId,
    /// Set when pages beyond the ceiling were dropped.
    pub truncated_from: Option<usize>,
    pub warnings: Vec<PageWarning>,
}

impl NormalizedDocument {
    fn new(
        pages: Vec<NormalizedPage>,
        source: DocumentId,
        truncated_from: Option<usize>,
        warnings: Vec<PageWarning>,
    ) -> Result<Self, NormalizeError> {
        if pages.is_empty() {
            return Err(NormalizeError::NoUsablePages);
        }
        Ok(Self {
            pages,
            source,
            truncated_from,
            warnings,
        })
    }

    pub fn pages(&self) -> &[NormalizedPage] {
        &self.pages
    }

    pub fn is_multi_page(&self) -> bool {
        self.pages.len() > 1
    }

    #[cfg(test)]
    pub(crate) fn from_pages(pages: Vec<NormalizedPage>) -> Option<Self> {
        Self::new(pages, "test".into(), None, Vec::new()).ok()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeLimits {
    pub max_bytes: usize,
    pub max_pages: usize,
    /// Reject over-long PDFs instead of dropping the excess pages.
    pub strict_page_limit: bool,
}

impl Default for NormalizeLimits {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            max_pages: 5,
            strict_page_limit: false,
        }
    }
}

#[derive(Clone, Default)]
pub struct Normalizer {
    limits: NormalizeLimits,
    renderer: Option<Arc<dyn PageRenderer>>,
}

impl Normalizer {
    pub fn new(limits: NormalizeLimits) -> Self {
        Self { limits, renderer: None }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn PageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn limits(&self) -> NormalizeLimits {
        self.limits
    }

    pub fn normalize(&self, payload: &DocumentPayload) -> Result<NormalizedDocument, NormalizeError> {
        let size = payload.bytes.len();
        if size > self.limits.max_bytes {
            return Err(NormalizeError::SizeLimitExceeded {
                size,
                limit: self.limits.max_bytes,
            });
        }
        if size == 0 {
            return Err(NormalizeError::UnsupportedFormat("empty file".into()));
        }

        let source = payload.document_id();
        if payload.looks_like_pdf() {
            return self.normalize_pdf(&payload.bytes, source);
        }

        let (bytes, encoding) = normalize_raster(&payload.bytes, payload.declared_mime.as_deref())?;
        debug!(
            source = %source,
            in_size = size,
            out_size = bytes.len(),
            encoding = encoding.mime(),
            "Raster normalized"
        );
        NormalizedDocument::new(
            vec![NormalizedPage {
                bytes,
                encoding,
                page_index: 0,
                source: source.clone(),
            }],
            source,
            None,
            Vec::new(),
        )
    }

    fn normalize_pdf(&self, bytes: &[u8], source: DocumentId) -> Result<NormalizedDocument, NormalizeError> {
        let unreadable = |e: String| NormalizeError::UnsupportedFormat(format!("unreadable PDF: {e}"));

        // lopdf only drives the embedded image fallback; PDFium opens more files.
        let parsed = Document::load_mem(bytes);
        // get_pages is keyed by page number, so iteration preserves page order.
        let page_ids: Vec<ObjectId> = match &parsed {
            Ok(doc) => doc.get_pages().into_values().collect(),
            Err(_) => Vec::new(),
        };
        let page_count = match (&parsed, &self.renderer) {
            (Ok(_), _) => page_ids.len(),
            (Err(_), Some(renderer)) => renderer.page_count(bytes).map_err(|e| unreadable(e.to_string()))?,
            (Err(e), None) => return Err(unreadable(e.to_string())),
        };
        if page_count == 0 {
            return Err(NormalizeError::NoUsablePages);
        }

        let limit = self.limits.max_pages.max(1);
        let truncated_from = if page_count > limit {
            if self.limits.strict_page_limit {
                return Err(NormalizeError::PageLimitExceeded {
                    pages: page_count,
                    limit,
                });
            }
            warn!(source = %source, page_count, limit, "PDF truncated to page ceiling");
            Some(page_count)
        } else {
            None
        };

        let mut pages = Vec::new();
        let mut warnings = Vec::new();
        let doc = parsed.as_ref().ok();
        for page_index in 0..page_count.min(limit) {
            match self.convert_page(bytes, doc, page_ids.get(page_index).copied(), page_index) {
                Ok((bytes, encoding)) => pages.push(NormalizedPage {
                    bytes,
                    encoding,
                    page_index,
                    source: source.clone(),
                }),
                Err(reason) => {
                    warn!(source = %source, page_index, %reason, "PDF page skipped");
                    warnings.push(PageWarning { page_index, reason });
                }
            }
        }

        debug!(
            source = %source,
            page_count,
            usable = pages.len(),
            skipped = warnings.len(),
            "PDF normalized"
        );
        NormalizedDocument::new(pages, source, truncated_from, warnings)
    }

    fn convert_page(
        &self,
        pdf: &[u8],
        doc: Option<&Document>,
        page_id: Option<ObjectId>,
        page_index: usize,
    ) -> Result<(Vec<u8>, ImageEncoding), String> {
        let render_failure = match &self.renderer {
            Some(renderer) => match renderer.render_page(pdf, page_index) {
                Ok(png) => return Ok((png, ImageEncoding::Png)),
                Err(e) => {
                    debug!(page_index, error = %e, "Render failed, trying embedded images");
                    Some(e.to_string())
                }
            },
            None => None,
        };

        let (Some(doc), Some(page_id)) = (doc, page_id) else {
            return Err(render_failure.unwrap_or_else(|| "page not found".to_string()));
        };
        embedded_page_image(doc, page_id).map_err(|reason| match render_failure {
            Some(rendered) => format!("{rendered}; {reason}"),
            None => reason,
        })
    }
}

fn normalize_raster(bytes: &[u8], declared: Option<&str>) -> Result<(Vec<u8>, ImageEncoding), NormalizeError> {
    let format = image::guess_format(bytes).map_err(|_| {
        NormalizeError::UnsupportedFormat(declared.unwrap_or("unknown").to_string())
    })?;

    match format {
        ImageFormat::Png => Ok((bytes.to_vec(), ImageEncoding::Png)),
        ImageFormat::Jpeg => Ok((bytes.to_vec(), ImageEncoding::Jpeg)),
        ImageFormat::WebP => Ok((bytes.to_vec(), ImageEncoding::Webp)),
        ImageFormat::Gif => {
            // First frame only; animated receipts are not a thing.
            let img = decode(bytes, format)?;
            Ok((encode(&img, ImageEncoding::Png)?, ImageEncoding::Png))
        }
        other => {
            let img = decode(bytes, other)?;
            let target = if img.color().has_alpha() {
                ImageEncoding::Png
            } else {
                ImageEncoding::Jpeg
            };
            Ok((encode(&img, target)?, target))
        }
    }
}

fn decode(bytes: &[u8], format: ImageFormat) -> Result<DynamicImage, NormalizeError> {
    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| NormalizeError::UnsupportedFormat(format!("{format:?} could not be decoded: {e}")))
}

fn encode(img: &DynamicImage, encoding: ImageEncoding) -> Result<Vec<u8>, NormalizeError> {
    let mut buf = Cursor::new(Vec::new());
    let result = match encoding {
        ImageEncoding::Jpeg => {
            DynamicImage::ImageRgb8(img.to_rgb8()).write_to(&mut buf, ImageOutputFormat::Jpeg(95))
        }
        _ => img.write_to(&mut buf, ImageOutputFormat::Png),
    };
    result.map_err(|e| NormalizeError::UnsupportedFormat(format!("re-encoding failed: {e}")))?;
    Ok(buf.into_inner())
}

// ── PDF page images ─────────────────────────────────────────────────────

fn embedded_page_image(doc: &Document, page_id: ObjectId) -> Result<(Vec<u8>, ImageEncoding), String> {
    let raw = largest_page_image(doc, page_id)?;
    match image::guess_format(&raw) {
        Ok(ImageFormat::Jpeg) => Ok((raw, ImageEncoding::Jpeg)),
        Ok(ImageFormat::Png) => Ok((raw, ImageEncoding::Png)),
        _ => {
            let img = image::load_from_memory(&raw).map_err(|e| format!("embedded image unreadable: {e}"))?;
            let png = encode(&img, ImageEncoding::Png).map_err(|e| e.to_string())?;
            Ok((png, ImageEncoding::Png))
        }
    }
}

/// Largest image XObject on the page: the scan itself, not logos or stamps.
fn largest_page_image(doc: &Document, page_id: ObjectId) -> Result<Vec<u8>, String> {
    let page = doc
        .get_object(page_id)
        .and_then(Object::as_dict)
        .map_err(|e| format!("page object unreadable: {e}"))?;
    let resources = dict_entry(doc, page, b"Resources")?;
    let xobjects = dict_entry(doc, resources, b"XObject")?;

    let mut largest: Option<Vec<u8>> = None;
    for (_name, obj) in xobjects.iter() {
        let Object::Stream(stream) = resolve(doc, obj) else {
            continue;
        };
        let is_image = matches!(stream.dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image");
        if !is_image {
            continue;
        }

        let bytes = image_stream_bytes(doc, stream)?;
        if largest.as_ref().map_or(true, |prev| bytes.len() > prev.len()) {
            largest = Some(bytes);
        }
    }

    largest.ok_or_else(|| "page has no embedded image (text-only page)".to_string())
}

fn image_stream_bytes(doc: &Document, stream: &lopdf::Stream) -> Result<Vec<u8>, String> {
    let is_dct = match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == b"DCTDecode",
        Ok(Object::Array(filters)) => filters
            .iter()
            .any(|f| matches!(f, Object::Name(n) if n == b"DCTDecode")),
        _ => false,
    };
    if is_dct {
        // DCTDecode streams are complete JPEG files.
        return Ok(stream.content.clone());
    }

    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    if image::guess_format(&content).is_ok() {
        return Ok(content);
    }
    raw_pixels_to_png(doc, &stream.dict, content)
}

fn raw_pixels_to_png(doc: &Document, dict: &Dictionary, pixels: Vec<u8>) -> Result<Vec<u8>, String> {
    let width = int_entry(dict, b"Width")? as u32;
    let height = int_entry(dict, b"Height")? as u32;
    let bits = int_entry(dict, b"BitsPerComponent").unwrap_or(8);
    if bits != 8 {
        return Err(format!("{bits}-bit raw images are not supported"));
    }

    let img = match channel_count(doc, dict) {
        1 => image::GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        3 => image::RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
        4 => image::RgbaImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgba8),
        n => return Err(format!("unsupported channel count {n}")),
    }
    .ok_or_else(|| format!("pixel buffer does not match {width}x{height}"))?;

    encode(&img, ImageEncoding::Png).map_err(|e| e.to_string())
}

fn channel_count(doc: &Document, dict: &Dictionary) -> u32 {
    let Ok(space) = dict.get(b"ColorSpace") else {
        return 3;
    };
    match resolve(doc, space) {
        Object::Name(n) if n == b"DeviceGray" => 1,
        Object::Name(n) if n == b"DeviceCMYK" => 4,
        Object::Array(parts) => match parts.as_slice() {
            [Object::Name(n), ..] if n == b"Indexed" => 1,
            [Object::Name(n), Object::Reference(id), ..] if n == b"ICCBased" => match doc.get_object(*id) {
                Ok(Object::Stream(icc)) => int_entry(&icc.dict, b"N").unwrap_or(3) as u32,
                _ => 3,
            },
            _ => 3,
        },
        _ => 3,
    }
}

fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn dict_entry<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Result<&'a Dictionary, String> {
    let name = String::from_utf8_lossy(key);
    let obj = dict.get(key).map_err(|_| format!("missing /{name}"))?;
    resolve(doc, obj)
        .as_dict()
        .map_err(|_| format!("/{name} is not a dictionary"))
}

fn int_entry(dict: &Dictionary, key: &[u8]) -> Result<i64, String> {
    let name = String::from_utf8_lossy(key);
    dict.get(key)
        .map_err(|_| format!("missing /{name}"))?
        .as_i64()
        .map_err(|_| format!("/{name} is not an integer"))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::receipts::render::tests::StubRenderer;
    use image::GenericImageView;
    use lopdf::{dictionary, Stream};

    pub(crate) fn jpeg(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([200u8, 190, 180]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageOutputFormat::Jpeg(85))
            .unwrap();
        buf.into_inner()
    }

    fn raster(format: ImageOutputFormat, with_alpha: bool) -> Vec<u8> {
        let img = if with_alpha {
            DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(8, 8, image::Rgba([1, 2, 3, 128])))
        } else {
            DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3])))
        };
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    /// One page per entry: `Some(width)` embeds a JPEG of that width,
    /// `None` makes a text-only page.
    pub(crate) fn pdf(pages: &[Option<u32>]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();

        for page in pages {
            let xobjects = match page {
                Some(width) => {
                    let bytes = jpeg(*width, 20);
                    let mut img = Stream::new(
                        dictionary! {
                            "Type" => Object::Name(b"XObject".to_vec()),
                            "Subtype" => Object::Name(b"Image".to_vec()),
                            "Width" => Object::Integer(*width as i64),
                            "Height" => Object::Integer(20),
                            "ColorSpace" => Object::Name(b"DeviceRGB".to_vec()),
                            "BitsPerComponent" => Object::Integer(8),
                            "Filter" => Object::Name(b"DCTDecode".to_vec()),
                        },
                        bytes,
                    );
                    img.allows_compression = false;
                    let img_id = doc.add_object(Object::Stream(img));
                    dictionary! { "Scan" => Object::Reference(img_id) }
                }
                None => dictionary! {},
            };
            let content_id = doc.add_object(Object::Stream(Stream::new(
                dictionary! {},
                b"q 612 0 0 792 0 0 cm /Scan Do Q".to_vec(),
            )));
            let page_id = doc.add_object(dictionary! {
                "Type" => Object::Name(b"Page".to_vec()),
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => Object::Reference(content_id),
                "Resources" => dictionary! { "XObject" => xobjects },
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => Object::Name(b"Pages".to_vec()),
                "Count" => Object::Integer(kids.len() as i64),
                "Kids" => kids,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => Object::Name(b"Catalog".to_vec()),
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// Text-only pages with a standard font and no images.
    pub(crate) fn text_pdf(lines: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => Object::Name(b"Font".to_vec()),
            "Subtype" => Object::Name(b"Type1".to_vec()),
            "BaseFont" => Object::Name(b"Helvetica".to_vec()),
        });

        let mut kids = Vec::new();
        for line in lines {
            let content = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", line);
            let content_id = doc.add_object(Object::Stream(Stream::new(dictionary! {}, content.into_bytes())));
            let page_id = doc.add_object(dictionary! {
                "Type" => Object::Name(b"Page".to_vec()),
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Contents" => Object::Reference(content_id),
                "Resources" => dictionary! {
                    "Font" => dictionary! { "F1" => Object::Reference(font_id) },
                },
            });
            kids.push(Object::Reference(page_id));
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => Object::Name(b"Pages".to_vec()),
                "Count" => Object::Integer(kids.len() as i64),
                "Kids" => kids,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => Object::Name(b"Catalog".to_vec()),
            "Pages" => Object::Reference(pages_id),
        });
        doc.trailer.set("Root", Object::Reference(catalog_id));

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn rendering(pages: usize, failing: Vec<usize>) -> Normalizer {
        Normalizer::default().with_renderer(Arc::new(StubRenderer { pages, failing }))
    }

    fn payload(bytes: Vec<u8>, mime: &str) -> DocumentPayload {
        DocumentPayload {
            declared_mime: Some(mime.to_string()),
            filename: None,
            bytes,
        }
    }

    fn widths(doc: &NormalizedDocument) -> Vec<u32> {
        doc.pages()
            .iter()
            .map(|p| image::load_from_memory(&p.bytes).unwrap().width())
            .collect()
    }

    #[test]
    fn compatible_raster_passes_through_unchanged() {
        let bytes = jpeg(30, 40);
        let doc = Normalizer::default().normalize(&payload(bytes.clone(), "image/jpeg")).unwrap();

        assert_eq!(doc.pages().len(), 1);
        assert_eq!(doc.pages()[0].bytes, bytes);
        assert_eq!(doc.pages()[0].encoding, ImageEncoding::Jpeg);
        assert_eq!(doc.pages()[0].page_index, 0);
    }

    #[test]
    fn declared_mime_is_not_trusted_for_rasters() {
        let bytes = raster(ImageOutputFormat::Png, false);
        let doc = Normalizer::default()
            .normalize(&payload(bytes, "application/octet-stream"))
            .unwrap();
        assert_eq!(doc.pages()[0].encoding, ImageEncoding::Png);
    }

    #[test]
    fn bmp_is_reencoded_to_jpeg() {
        let doc = Normalizer::default()
            .normalize(&payload(raster(ImageOutputFormat::Bmp, false), "image/bmp"))
            .unwrap();
        let page = &doc.pages()[0];
        assert_eq!(page.encoding, ImageEncoding::Jpeg);
        assert_eq!(image::guess_format(&page.bytes).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn gif_is_reencoded_to_png() {
        let doc = Normalizer::default()
            .normalize(&payload(raster(ImageOutputFormat::Gif, false), "image/gif"))
            .unwrap();
        assert_eq!(doc.pages()[0].encoding, ImageEncoding::Png);
        assert_eq!(image::guess_format(&doc.pages()[0].bytes).unwrap(), ImageFormat::Png);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let normalizer = Normalizer::new(NormalizeLimits {
            max_bytes: 100,
            ..NormalizeLimits::default()
        });
        let err = normalizer.normalize(&payload(vec![0u8; 101], "image/png")).unwrap_err();
        assert_eq!(err, NormalizeError::SizeLimitExceeded { size: 101, limit: 100 });
    }

    #[test]
    fn unknown_bytes_are_unsupported() {
        let err = Normalizer::default()
            .normalize(&payload(b"definitely not an image".to_vec(), "image/heic"))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedFormat(_)));
    }

    #[test]
    fn pdf_pages_keep_source_order() {
        let bytes = pdf(&[Some(10), Some(20), Some(30)]);
        let doc = Normalizer::default().normalize(&payload(bytes, MIME_PDF)).unwrap();

        assert_eq!(doc.pages().len(), 3);
        assert_eq!(widths(&doc), vec![10, 20, 30]);
        assert_eq!(
            doc.pages().iter().map(|p| p.page_index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(doc.truncated_from.is_none());
        assert!(doc.is_multi_page());
    }

    #[test]
    fn pdf_beyond_ceiling_is_truncated() {
        let bytes = pdf(&[Some(10), Some(20), Some(30), Some(40), Some(50), Some(60), Some(70)]);
        let doc = Normalizer::default().normalize(&payload(bytes, MIME_PDF)).unwrap();

        assert_eq!(doc.pages().len(), 5);
        assert_eq!(widths(&doc), vec![10, 20, 30, 40, 50]);
        assert_eq!(doc.truncated_from, Some(7));
    }

    #[test]
    fn strict_limit_rejects_long_pdf() {
        let normalizer = Normalizer::new(NormalizeLimits {
            max_pages: 2,
            strict_page_limit: true,
            ..NormalizeLimits::default()
        });
        let err = normalizer
            .normalize(&payload(pdf(&[Some(10), Some(20), Some(30)]), MIME_PDF))
            .unwrap_err();
        assert_eq!(err, NormalizeError::PageLimitExceeded { pages: 3, limit: 2 });
    }

    #[test]
    fn failed_page_is_recorded_and_skipped() {
        let bytes = pdf(&[Some(10), None, Some(30)]);
        let doc = Normalizer::default().normalize(&payload(bytes, MIME_PDF)).unwrap();

        assert_eq!(widths(&doc), vec![10, 30]);
        assert_eq!(doc.pages()[1].page_index, 2);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].page_index, 1);
    }

    #[test]
    fn pdf_without_usable_pages_fails() {
        let err = Normalizer::default()
            .normalize(&payload(pdf(&[None, None]), MIME_PDF))
            .unwrap_err();
        assert_eq!(err, NormalizeError::NoUsablePages);
    }

    #[test]
    fn corrupt_pdf_is_unsupported() {
        let err = Normalizer::default()
            .normalize(&payload(b"%PDF-1.4 garbage".to_vec(), MIME_PDF))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::UnsupportedFormat(_)));
    }

    #[test]
    fn text_only_pdf_is_rendered() {
        let doc = rendering(1, vec![])
            .normalize(&payload(text_pdf(&["TOTAL 42.50 USD"]), MIME_PDF))
            .unwrap();

        assert_eq!(doc.pages().len(), 1);
        assert_eq!(doc.pages()[0].encoding, ImageEncoding::Png);
        assert_eq!(widths(&doc), vec![8]);
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn text_only_pdf_needs_a_renderer() {
        let err = Normalizer::default()
            .normalize(&payload(text_pdf(&["TOTAL 42.50 USD"]), MIME_PDF))
            .unwrap_err();
        assert_eq!(err, NormalizeError::NoUsablePages);
    }

    #[test]
    fn render_failure_falls_back_to_embedded_image() {
        let doc = rendering(2, vec![1])
            .normalize(&payload(pdf(&[Some(10), Some(20)]), MIME_PDF))
            .unwrap();

        assert_eq!(widths(&doc), vec![8, 20]);
        assert_eq!(doc.pages()[0].encoding, ImageEncoding::Png);
        assert_eq!(doc.pages()[1].encoding, ImageEncoding::Jpeg);
        assert!(doc.warnings.is_empty());
    }

    #[test]
    fn page_failing_both_paths_is_a_warning() {
        let doc = rendering(2, vec![1])
            .normalize(&payload(text_pdf(&["page one", "page two"]), MIME_PDF))
            .unwrap();

        assert_eq!(doc.pages().len(), 1);
        assert_eq!(doc.warnings.len(), 1);
        assert_eq!(doc.warnings[0].page_index, 1);
        assert!(doc.warnings[0].reason.contains("stub failure"));
    }

    #[test]
    fn renderer_opens_pdfs_lopdf_cannot() {
        let doc = rendering(7, vec![])
            .normalize(&payload(b"%PDF-1.7 not parseable by lopdf".to_vec(), MIME_PDF))
            .unwrap();

        assert_eq!(widths(&doc), vec![8, 9, 10, 11, 12]);
        assert_eq!(doc.truncated_from, Some(7));
    }
}
