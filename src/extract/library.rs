//! Deterministic extraction from the PDF's own text layer via pdfium.
//!
//! This is the cheap path every page takes first (outside `ai_priority`).
//! Besides the text it measures how much of the page is covered by text
//! boxes, which is the strongest single signal the confidence estimator has
//! for telling a real text page from a scan with a stray caption.

use super::{render, tables, ExtractOptions, ExtractedImage, ExtractionAttempt, ExtractionMethod, PagePayload, PageExtractor};
use crate::document::PageSource;
use crate::error::{EngineError, PageError};
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::time::Instant;
use tracing::{debug, warn};

/// pdfium text-layer adapter.
#[derive(Debug, Default)]
pub struct LibraryExtractor {
    _private: (),
}

impl LibraryExtractor {
    /// Fails if no pdfium library can be bound.
    pub fn new() -> Result<Self, EngineError> {
        render::bind().map_err(|e| EngineError::AdapterInit {
            adapter: "library".into(),
            reason: e.to_string(),
        })?;
        Ok(Self { _private: () })
    }
}

#[async_trait]
impl PageExtractor for LibraryExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Library
    }

    async fn extract(&self, page: &PageSource, _options: &ExtractOptions) -> ExtractionAttempt {
        let start = Instant::now();
        let source = page.clone();
        let index = page.index();

        let joined = tokio::task::spawn_blocking(move || extract_blocking(&source)).await;
        let latency = start.elapsed();

        let result = match joined {
            Ok(r) => r,
            Err(e) => Err(PageError::ExtractionFailed {
                page: index + 1,
                method: "library".into(),
                detail: format!("extraction task panicked: {e}"),
            }),
        };

        match result {
            Ok(payload) => {
                debug!(
                    page = index,
                    chars = payload.text.chars().count(),
                    coverage = ?payload.text_coverage,
                    tables = payload.tables.len(),
                    images = payload.images.len(),
                    "library extraction done"
                );
                ExtractionAttempt::succeeded(ExtractionMethod::Library, payload, latency)
            }
            Err(err) => {
                warn!(page = index, "library extraction failed: {err}");
                ExtractionAttempt::failed(ExtractionMethod::Library, err, latency)
            }
        }
    }
}

fn extract_blocking(source: &PageSource) -> Result<PagePayload, PageError> {
    let index = source.index();
    let fail = |detail: String| PageError::ExtractionFailed {
        page: index + 1,
        method: "library".into(),
        detail,
    };

    let pdfium = render::bind().map_err(|e| fail(e.to_string()))?;
    let document = pdfium
        .load_pdf_from_byte_slice(source.bytes(), source.password())
        .map_err(|e| fail(format!("{e:?}")))?;
    let page = document
        .pages()
        .get(index as u16)
        .map_err(|e| fail(format!("{e:?}")))?;

    let page_area = page.width().value * page.height().value;
    let text_page = page.text().map_err(|e| fail(format!("{e:?}")))?;
    let text = text_page.all();

    let mut covered = 0.0f32;
    for segment in text_page.segments().iter() {
        if segment.text().trim().is_empty() {
            continue;
        }
        let b = segment.bounds();
        let w = (b.right().value - b.left().value).abs();
        let h = (b.top().value - b.bottom().value).abs();
        covered += w * h;
    }
    let text_coverage = if page_area > 0.0 {
        Some((covered / page_area).clamp(0.0, 1.0))
    } else {
        None
    };

    let mut images = Vec::new();
    for object in page.objects().iter() {
        let Some(image_object) = object.as_image_object() else {
            continue;
        };
        match image_object.get_raw_image() {
            Ok(img) => match render::encode_png_base64(&img) {
                Ok(b64) => images.push(ExtractedImage {
                    image_number: images.len() + 1,
                    image_base64: b64,
                    description: None,
                }),
                Err(e) => debug!(page = index, "skipping embedded image: {e}"),
            },
            Err(e) => debug!(page = index, "skipping embedded image: {e:?}"),
        }
    }

    let has_text_layer = !text.trim().is_empty();
    Ok(PagePayload {
        tables: tables::detect_tables(&text),
        text,
        images,
        text_coverage,
        has_text_layer,
        engine_confidence: None,
    })
}
