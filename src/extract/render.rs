//! pdfium plumbing shared by the adapters: binding, loading, rasterising and
//! PNG/base64 encoding.
//!
//! ## Why blocking functions?
//!
//! pdfium is a C++ library with thread-local state and is not safe to drive
//! from async contexts. Everything here is synchronous; callers wrap it in
//! `tokio::task::spawn_blocking` so Tokio worker threads never stall on a
//! heavy page.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_pixels` caps the longest edge regardless
//! of physical size, keeping memory bounded when several pages are in
//! flight at once.

use crate::error::{EngineError, PageError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable pointing at a pdfium shared library (file or directory).
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
pub fn bind() -> Result<Pdfium, EngineError> {
    if let Ok(raw) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        if !raw.is_empty() {
            let mut path = PathBuf::from(&raw);
            if path.is_dir() {
                path = path.join(Pdfium::pdfium_platform_library_name());
            }
            return Pdfium::bind_to_library(&path)
                .map(Pdfium::new)
                .map_err(|e| {
                    EngineError::PdfiumBindingFailed(format!("{}: {e:?}", path.display()))
                });
        }
    }
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| EngineError::PdfiumBindingFailed(format!("{e:?}")))
}

/// Open a PDF held in memory, mapping pdfium's password errors.
pub fn load<'a>(
    pdfium: &'a Pdfium,
    document_id: &str,
    bytes: &'a [u8],
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, EngineError> {
    pdfium.load_pdf_from_byte_slice(bytes, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                EngineError::WrongPassword {
                    document: document_id.to_string(),
                }
            } else {
                EngineError::PasswordRequired {
                    document: document_id.to_string(),
                }
            }
        } else {
            EngineError::CorruptPdf {
                document: document_id.to_string(),
                detail: err_str,
            }
        }
    })
}

/// Number of pages in the PDF.
pub fn page_count(
    document_id: &str,
    bytes: &[u8],
    password: Option<&str>,
) -> Result<usize, EngineError> {
    let pdfium = bind()?;
    let document = load(&pdfium, document_id, bytes, password)?;
    Ok(document.pages().len() as usize)
}

/// Rasterise one page at `dpi`, longest edge capped at `max_pixels`.
///
/// Errors are page-level: a page that will not render must not sink the
/// document.
pub fn render_page(
    bytes: &[u8],
    password: Option<&str>,
    index: usize,
    dpi: u32,
    max_pixels: u32,
    method: &str,
) -> Result<DynamicImage, PageError> {
    let fail = |detail: String| PageError::ExtractionFailed {
        page: index + 1,
        method: method.to_string(),
        detail,
    };

    let pdfium = bind().map_err(|e| fail(e.to_string()))?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, password)
        .map_err(|e| fail(format!("{e:?}")))?;
    let page = document
        .pages()
        .get(index as u16)
        .map_err(|e| fail(format!("{e:?}")))?;

    let scale = dpi as f32 / 72.0;
    let target_width = ((page.width().value * scale) as i32).clamp(1, max_pixels as i32);
    let render_config = PdfRenderConfig::new()
        .set_target_width(target_width)
        .set_maximum_height(max_pixels as i32);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| fail(format!("{e:?}")))?;
    let image = bitmap.as_image();
    debug!(
        page = index + 1,
        width = image.width(),
        height = image.height(),
        "rendered page"
    );
    Ok(image)
}

/// Encode an image as PNG bytes.
///
/// PNG is lossless; JPEG artefacts on rendered text hurt OCR and vision
/// models far more than the extra bytes cost.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an image as base64 PNG, the form both vision APIs and the JSON
/// result carry.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let b64 = STANDARD.encode(encode_png(img)?);
    debug!("encoded image → {} bytes base64", b64.len());
    Ok(b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_png_base64(&img).expect("encode should succeed");
        let decoded = STANDARD.decode(&data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }
}
