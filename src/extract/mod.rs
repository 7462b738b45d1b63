//! Page extractor adapters.
//!
//! Every way of getting content out of a page (the pdfium text layer,
//! tesseract OCR, an AI vision model) implements one capability trait,
//! [`PageExtractor`]. Which implementations an engine runs is decided by
//! configuration through [`AdapterKind`], never by type hierarchies.
//!
//! ## Failure contract
//!
//! `extract` never returns `Err`. Recoverable problems (a page that will not
//! render, a provider timeout) come back as an [`ExtractionAttempt`] with an
//! empty payload and `error` set, so one bad page cannot take the document
//! down with it. Problems that make an adapter unusable for *every* page
//! (missing credential, no OCR binary) surface once, at construction, as
//! [`EngineError::AdapterInit`].

pub mod library;
pub mod ocr;
pub mod render;
pub mod tables;
pub mod vision;

use crate::collaborator::CredentialSource;
use crate::config::{EngineConfig, ProviderSpec};
use crate::document::PageSource;
use crate::error::{EngineError, PageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Which path produced an attempt.
///
/// Serialised as a bare string: `"library"`, `"ocr"` or the provider name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExtractionMethod {
    Library,
    Ocr,
    Provider(String),
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &str {
        match self {
            ExtractionMethod::Library => "library",
            ExtractionMethod::Ocr => "ocr",
            ExtractionMethod::Provider(name) => name,
        }
    }

    /// Whether this method is an AI provider (and therefore billable).
    pub fn is_ai(&self) -> bool {
        matches!(self, ExtractionMethod::Provider(_))
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ExtractionMethod {
    fn from(s: String) -> Self {
        match s.as_str() {
            "library" => ExtractionMethod::Library,
            "ocr" => ExtractionMethod::Ocr,
            _ => ExtractionMethod::Provider(s),
        }
    }
}

impl From<ExtractionMethod> for String {
    fn from(m: ExtractionMethod) -> Self {
        match m {
            ExtractionMethod::Provider(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// A table found on a page, as rows of cells (or whatever JSON the provider sent).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    pub data: serde_json::Value,
}

/// An image found on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedImage {
    /// 1-based position of the image on its page.
    pub image_number: usize,
    /// PNG, base64. Empty when the source only described the image.
    pub image_base64: String,
    pub description: Option<String>,
}

/// What an adapter pulled out of a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagePayload {
    pub text: String,
    pub tables: Vec<ExtractedTable>,
    pub images: Vec<ExtractedImage>,
    /// Fraction of the page area covered by text boxes, when the adapter can tell.
    pub text_coverage: Option<f32>,
    /// False for scanned pages with no extractable text at all.
    pub has_text_layer: bool,
    /// The adapter's own 0–1 belief in its output (tesseract word confidence).
    pub engine_confidence: Option<f32>,
}

/// The outcome of running one adapter on one page.
#[derive(Debug, Clone)]
pub struct ExtractionAttempt {
    pub method: ExtractionMethod,
    pub payload: PagePayload,
    /// Set by adapters that know their quality up front (AI = 1.0). Left
    /// `None` for deterministic adapters; the confidence estimator fills it.
    pub confidence: Option<f32>,
    pub latency: Duration,
    pub error: Option<PageError>,
}

impl ExtractionAttempt {
    pub fn succeeded(method: ExtractionMethod, payload: PagePayload, latency: Duration) -> Self {
        Self {
            method,
            payload,
            confidence: None,
            latency,
            error: None,
        }
    }

    pub fn failed(method: ExtractionMethod, error: PageError, latency: Duration) -> Self {
        Self {
            method,
            payload: PagePayload::default(),
            confidence: None,
            latency,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-call knobs shared by every adapter.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Tesseract language code, also passed to vision prompts as a hint.
    pub language: String,
    pub dpi: u32,
    pub max_rendered_pixels: u32,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for ExtractOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            language: config.language.clone(),
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }
}

/// One way of extracting a page.
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// The method recorded on every attempt this adapter produces.
    fn method(&self) -> ExtractionMethod;

    /// Extract one page. Failures are reported in the attempt, not as `Err`.
    async fn extract(&self, page: &PageSource, options: &ExtractOptions) -> ExtractionAttempt;
}

/// Configuration-level choice of adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterKind {
    Library,
    Ocr { binary: String },
    Vision(ProviderSpec),
}

impl AdapterKind {
    pub fn name(&self) -> &str {
        match self {
            AdapterKind::Library => "library",
            AdapterKind::Ocr { .. } => "ocr",
            AdapterKind::Vision(spec) => &spec.name,
        }
    }
}

/// Construct the adapter for `kind`.
///
/// Credentials are looked up here and handed straight to the provider
/// factory; no adapter keeps them.
pub fn build_adapter(
    kind: &AdapterKind,
    config: &EngineConfig,
    credentials: &dyn CredentialSource,
) -> Result<Arc<dyn PageExtractor>, EngineError> {
    match kind {
        AdapterKind::Library => Ok(Arc::new(library::LibraryExtractor::new()?)),
        AdapterKind::Ocr { binary } => Ok(Arc::new(ocr::OcrExtractor::new(binary.clone())?)),
        AdapterKind::Vision(spec) => Ok(Arc::new(vision::VisionExtractor::from_spec(
            spec,
            config,
            credentials,
        )?)),
    }
}
