//! PDF page rasterization through PDFium.
//!
//! `PdfiumRenderer` holds no library handle: `Pdfium` is `!Send`, so every
//! call binds a fresh instance. The OS caches the `dlopen`, repeat binds
//! are cheap.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::ImageOutputFormat;
use pdfium_render::prelude::*;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RENDER_DPI: u32 = 200;

/// Cap on either side of a rendered page.
const MAX_DIMENSION_PX: u32 = 4096;

const POINTS_PER_INCH: f32 = 72.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("PDFium is not available: {0}")]
    Unavailable(String),

    #[error("PDF is password protected")]
    Encrypted,

    #[error("PDF could not be opened: {0}")]
    Unreadable(String),

    #[error("page {page} could not be rendered: {reason}")]
    Page { page: usize, reason: String },
}

/// Rasterizes whole PDF pages, text and vector content included.
pub trait PageRenderer: Send + Sync {
    fn page_count(&self, pdf: &[u8]) -> Result<usize, RenderError>;

    /// PNG bytes of the zero-based page `page_index`.
    fn render_page(&self, pdf: &[u8], page_index: usize) -> Result<Vec<u8>, RenderError>;
}

pub struct PdfiumRenderer {
    dpi: u32,
    library: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// Binds the library once up front so a missing install shows at startup.
    ///
    /// `library` is an explicit path to the PDFium shared library. Without
    /// it the directory of the executable is tried, then the system paths.
    pub fn new(dpi: u32, library: Option<PathBuf>) -> Result<Self, RenderError> {
        load_pdfium(library.as_deref())?;
        Ok(Self { dpi, library })
    }

    fn open(&self) -> Result<Pdfium, RenderError> {
        load_pdfium(self.library.as_deref())
    }
}

fn load_pdfium(library: Option<&Path>) -> Result<Pdfium, RenderError> {
    if let Some(path) = library {
        debug!(path = %path.display(), "Loading PDFium from configured path");
        let bindings = Pdfium::bind_to_library(path)
            .map_err(|e| RenderError::Unavailable(format!("{}: {e}", path.display())))?;
        return Ok(Pdfium::new(bindings));
    }

    if let Some(exe_dir) = std::env::current_exe().ok().and_then(|exe| exe.parent().map(Path::to_path_buf)) {
        let lib = Pdfium::pdfium_platform_library_name_at_path(exe_dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            debug!(dir = %exe_dir.display(), "Loaded PDFium next to the executable");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library()
        .map_err(|e| RenderError::Unavailable(format!("set PDFIUM_DYNAMIC_LIB_PATH or install PDFium: {e}")))?;
    Ok(Pdfium::new(bindings))
}

fn map_load_error(e: PdfiumError) -> RenderError {
    if matches!(e, PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError)) {
        return RenderError::Encrypted;
    }
    let text = e.to_string();
    let lower = text.to_lowercase();
    if lower.contains("password") || lower.contains("encrypt") {
        RenderError::Encrypted
    } else {
        RenderError::Unreadable(text)
    }
}

/// Pixel size of a page at `dpi`, aspect preserved and each side within
/// `1..=MAX_DIMENSION_PX`.
fn render_dimensions(width_points: f32, height_points: f32, dpi: u32) -> (u32, u32) {
    let scale = dpi as f32 / POINTS_PER_INCH;
    let raw_w = (width_points * scale).max(1.0);
    let raw_h = (height_points * scale).max(1.0);

    let longest = raw_w.max(raw_h);
    if longest > MAX_DIMENSION_PX as f32 {
        warn!(width = raw_w as u32, height = raw_h as u32, "Page render capped to {MAX_DIMENSION_PX}px");
        let ratio = MAX_DIMENSION_PX as f32 / longest;
        let w = ((raw_w * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        let h = ((raw_h * ratio) as u32).clamp(1, MAX_DIMENSION_PX);
        (w, h)
    } else {
        (raw_w as u32, raw_h as u32)
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf: &[u8]) -> Result<usize, RenderError> {
        let pdfium = self.open()?;
        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(map_load_error)?;
        Ok(document.pages().len() as usize)
    }

    fn render_page(&self, pdf: &[u8], page_index: usize) -> Result<Vec<u8>, RenderError> {
        let pdfium = self.open()?;
        let document = pdfium.load_pdf_from_byte_slice(pdf, None).map_err(map_load_error)?;
        let pages = document.pages();

        let index = u16::try_from(page_index).map_err(|_| RenderError::Page {
            page: page_index,
            reason: "page index out of range".into(),
        })?;
        let page = pages.get(index).map_err(|e| RenderError::Page {
            page: page_index,
            reason: e.to_string(),
        })?;

        let (width, height) = render_dimensions(page.width().value, page.height().value, self.dpi);
        let config = PdfRenderConfig::new()
            .set_target_width(width as i32)
            .set_maximum_height(height as i32);

        let bitmap = page.render_with_config(&config).map_err(|e| RenderError::Page {
            page: page_index,
            reason: e.to_string(),
        })?;

        let mut png = Cursor::new(Vec::new());
        bitmap
            .as_image()
            .write_to(&mut png, ImageOutputFormat::Png)
            .map_err(|e| RenderError::Page {
                page: page_index,
                reason: format!("PNG encoding failed: {e}"),
            })?;
        let png = png.into_inner();

        debug!(page = page_index, width, height, png_size = png.len(), "PDF page rendered");
        Ok(png)
    }
}
