//! OCR adapter: rasterise with pdfium, recognise with the `tesseract` binary.
//!
//! OCR is free but slow, so it only runs as a second deterministic pass on
//! pages the text layer could not carry (see [`crate::strategy`]). We shell
//! out to tesseract rather than link it: the binary is the capability, and
//! a missing install is detected once at construction.
//!
//! Tesseract's TSV output gives per-word confidence (0–100). Its mean, scaled
//! to 0–1, becomes the attempt's `engine_confidence`, which the confidence
//! estimator blends with its own text heuristics.

use super::{render, tables, ExtractOptions, ExtractionAttempt, ExtractionMethod, PagePayload, PageExtractor};
use crate::document::PageSource;
use crate::error::{EngineError, PageError};
use async_trait::async_trait;
use std::io::Write;
use std::time::Instant;
use tracing::{debug, warn};

/// Tesseract-backed adapter.
#[derive(Debug, Clone)]
pub struct OcrExtractor {
    binary: String,
}

impl OcrExtractor {
    /// Fails if `binary --version` cannot be run.
    pub fn new(binary: impl Into<String>) -> Result<Self, EngineError> {
        let binary = binary.into();
        let output = std::process::Command::new(&binary).arg("--version").output();
        match output {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout);
                debug!(
                    binary = %binary,
                    version = version.lines().next().unwrap_or_default(),
                    "OCR binary found"
                );
                Ok(Self { binary })
            }
            Ok(out) => Err(EngineError::AdapterInit {
                adapter: "ocr".into(),
                reason: format!("'{binary} --version' exited with {}", out.status),
            }),
            Err(e) => Err(EngineError::AdapterInit {
                adapter: "ocr".into(),
                reason: format!("cannot run '{binary}': {e}"),
            }),
        }
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    async fn run(&self, page: &PageSource, options: &ExtractOptions) -> Result<PagePayload, PageError> {
        let index = page.index();
        let fail = |detail: String| PageError::ExtractionFailed {
            page: index + 1,
            method: "ocr".into(),
            detail,
        };

        let source = page.clone();
        let dpi = options.dpi;
        let max_pixels = options.max_rendered_pixels;
        let (png, area) = tokio::task::spawn_blocking(move || {
            let img = render::render_page(
                source.bytes(),
                source.password(),
                source.index(),
                dpi,
                max_pixels,
                "ocr",
            )?;
            let area = img.width() as f32 * img.height() as f32;
            let png = render::encode_png(&img).map_err(|e| PageError::ExtractionFailed {
                page: source.page_number(),
                method: "ocr".into(),
                detail: format!("PNG encode failed: {e}"),
            })?;
            Ok::<_, PageError>((png, area))
        })
        .await
        .map_err(|e| fail(format!("render task panicked: {e}")))??;

        let mut file = tempfile::Builder::new()
            .prefix("pagewise-ocr-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| fail(format!("temp file: {e}")))?;
        file.write_all(&png)
            .map_err(|e| fail(format!("temp file: {e}")))?;

        let output = tokio::process::Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&options.language)
            .arg("tsv")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| fail(format!("failed to run {}: {e}", self.binary)))?;

        if !output.status.success() {
            return Err(fail(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let parsed = parse_tsv(&tsv);
        let text_coverage = if area > 0.0 {
            Some((parsed.word_area / area).clamp(0.0, 1.0))
        } else {
            None
        };
        Ok(PagePayload {
            tables: tables::detect_tables(&parsed.text),
            has_text_layer: !parsed.text.trim().is_empty(),
            text: parsed.text,
            images: Vec::new(),
            text_coverage,
            engine_confidence: parsed.mean_confidence,
        })
    }
}

#[async_trait]
impl PageExtractor for OcrExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Ocr
    }

    async fn extract(&self, page: &PageSource, options: &ExtractOptions) -> ExtractionAttempt {
        let start = Instant::now();
        match self.run(page, options).await {
            Ok(payload) => {
                debug!(
                    page = page.index(),
                    chars = payload.text.chars().count(),
                    engine_confidence = ?payload.engine_confidence,
                    "OCR done"
                );
                ExtractionAttempt::succeeded(ExtractionMethod::Ocr, payload, start.elapsed())
            }
            Err(err) => {
                warn!(page = page.index(), "OCR failed: {err}");
                ExtractionAttempt::failed(ExtractionMethod::Ocr, err, start.elapsed())
            }
        }
    }
}

#[derive(Debug, Default, PartialEq)]
struct TsvPage {
    text: String,
    /// Mean word confidence, 0–1. `None` when no word was recognised.
    mean_confidence: Option<f32>,
    /// Summed word box area, in pixels.
    word_area: f32,
}

/// Parse `tesseract … tsv` output.
///
/// Columns: level page_num block_num par_num line_num word_num left top width
/// height conf text. Level 5 rows are words; words are regrouped into lines
/// by (block, paragraph, line).
fn parse_tsv(tsv: &str) -> TsvPage {
    let mut lines: Vec<((u32, u32, u32), Vec<String>)> = Vec::new();
    let mut conf_sum = 0.0f32;
    let mut conf_n = 0usize;
    let mut word_area = 0.0f32;

    for row in tsv.lines().skip(1) {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let word = fields[11].trim();
        if word.is_empty() {
            continue;
        }
        let Ok(conf) = fields[10].parse::<f32>() else {
            continue;
        };
        if conf < 0.0 {
            continue;
        }

        let key: (u32, u32, u32) = (
            fields[2].parse().unwrap_or(0),
            fields[3].parse().unwrap_or(0),
            fields[4].parse().unwrap_or(0),
        );
        match lines.last_mut() {
            Some((k, words)) if *k == key => words.push(word.to_string()),
            _ => lines.push((key, vec![word.to_string()])),
        }

        conf_sum += conf;
        conf_n += 1;
        let w: f32 = fields[8].parse().unwrap_or(0.0);
        let h: f32 = fields[9].parse().unwrap_or(0.0);
        word_area += w * h;
    }

    TsvPage {
        text: lines
            .into_iter()
            .map(|(_, words)| words.join(" "))
            .collect::<Vec<_>>()
            .join("\n"),
        mean_confidence: (conf_n > 0).then(|| conf_sum / conf_n as f32 / 100.0),
        word_area,
    }
}
