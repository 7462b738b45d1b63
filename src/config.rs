//! Configuration types for the extraction engine.
//!
//! Everything the operator controls lives in [`EngineConfig`], built via its
//! [`EngineConfigBuilder`]. Per-request choices (strategy mode, cost ceiling)
//! travel on the [`crate::document::Document`] instead, so one engine can
//! serve many concurrent requests with different plans.

use crate::confidence::{ConfidenceWeights, DEFAULT_THRESHOLD};
use crate::error::EngineError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Configuration for an [`crate::engine::Engine`].
///
/// # Example
/// ```rust
/// use pagewise::{EngineConfig, ProviderSpec};
///
/// let config = EngineConfig::builder()
///     .confidence_threshold(0.65)
///     .concurrency(8)
///     .provider(ProviderSpec::new("openai", "gpt-4.1-nano").rate_per_page(0.01))
///     .build()
///     .unwrap();
/// assert_eq!(config.providers.len(), 1);
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// Pages scoring below this are escalated (when the mode and budget allow).
    /// Range: 0.0–1.0. Default: 0.6.
    pub confidence_threshold: f32,

    /// Component weights of the confidence heuristic.
    pub confidence_weights: ConfidenceWeights,

    /// Maximum pages of one document processed at the same time. Default: 4.
    ///
    /// Bounds both provider pressure (rate-limit storms) and memory, since
    /// every in-flight AI or OCR page holds a rasterised bitmap.
    pub concurrency: usize,

    /// Rendering DPI used when rasterising a page for OCR or a vision model.
    /// Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Language hint handed to OCR and vision adapters (tesseract code). Default: "eng".
    pub language: String,

    /// Run the pdfium text-layer adapter. Default: true.
    pub enable_library: bool,

    /// Run OCR as a second deterministic pass on weak pages. Default: false.
    pub enable_ocr: bool,

    /// OCR executable. Default: "tesseract".
    pub ocr_binary: String,

    /// AI providers in priority order (first healthy one wins).
    pub providers: Vec<ProviderSpec>,

    /// Timeout applied to a provider call when its spec sets none. Default: 60.
    pub provider_timeout_secs: u64,

    /// Extra attempts against the same provider before falling through.
    /// Clamped to 0–1. Default: 1.
    pub retries_per_provider: u32,

    /// Fixed pause before the retry, in milliseconds. Default: 250.
    pub retry_backoff_ms: u64,

    /// Sampling temperature for vision calls. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens a vision model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Custom system prompt for vision calls. If None, uses the built-in one.
    pub system_prompt: Option<String>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_THRESHOLD,
            confidence_weights: ConfidenceWeights::default(),
            concurrency: 4,
            dpi: 150,
            max_rendered_pixels: 2000,
            language: "eng".to_string(),
            enable_library: true,
            enable_ocr: false,
            ocr_binary: "tesseract".to_string(),
            providers: Vec::new(),
            provider_timeout_secs: 60,
            retries_per_provider: 1,
            retry_backoff_ms: 250,
            temperature: 0.1,
            max_tokens: 4096,
            system_prompt: None,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("confidence_threshold", &self.confidence_threshold)
            .field("confidence_weights", &self.confidence_weights)
            .field("concurrency", &self.concurrency)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("language", &self.language)
            .field("enable_library", &self.enable_library)
            .field("enable_ocr", &self.enable_ocr)
            .field("providers", &self.providers)
            .field("provider_timeout_secs", &self.provider_timeout_secs)
            .field("retries_per_provider", &self.retries_per_provider)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ProgressObserver>"),
            )
            .finish()
    }
}

impl EngineConfig {
    /// Create a new builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Timeout for one call to the given provider.
    pub fn timeout_for(&self, spec: &ProviderSpec) -> Duration {
        Duration::from_secs(spec.timeout_secs.unwrap_or(self.provider_timeout_secs))
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t;
        self
    }

    pub fn confidence_weights(mut self, w: ConfidenceWeights) -> Self {
        self.config.confidence_weights = w;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.config.language = lang.into();
        self
    }

    pub fn enable_library(mut self, v: bool) -> Self {
        self.config.enable_library = v;
        self
    }

    pub fn enable_ocr(mut self, v: bool) -> Self {
        self.config.enable_ocr = v;
        self
    }

    pub fn ocr_binary(mut self, bin: impl Into<String>) -> Self {
        self.config.ocr_binary = bin.into();
        self
    }

    /// Append a provider; call order is priority order.
    pub fn provider(mut self, spec: ProviderSpec) -> Self {
        self.config.providers.push(spec);
        self
    }

    pub fn providers(mut self, specs: Vec<ProviderSpec>) -> Self {
        self.config.providers = specs;
        self
    }

    pub fn provider_timeout_secs(mut self, secs: u64) -> Self {
        self.config.provider_timeout_secs = secs;
        self
    }

    pub fn retries_per_provider(mut self, n: u32) -> Self {
        self.config.retries_per_provider = n.min(1);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, EngineError> {
        let c = &self.config;
        if !(0.0..=1.0).contains(&c.confidence_threshold) {
            return Err(EngineError::InvalidConfig(format!(
                "confidence threshold must be 0.0–1.0, got {}",
                c.confidence_threshold
            )));
        }
        if c.provider_timeout_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "provider timeout must be at least 1 second".into(),
            ));
        }
        if c.concurrency == 0 {
            return Err(EngineError::InvalidConfig("concurrency must be ≥ 1".into()));
        }
        if !c.enable_library && c.providers.is_empty() {
            return Err(EngineError::InvalidConfig(
                "the library adapter is disabled and no AI provider is configured".into(),
            ));
        }
        for spec in &c.providers {
            if spec.rate_per_page < 0.0 || !spec.rate_per_page.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "provider '{}' has an invalid per-page rate {}",
                    spec.name, spec.rate_per_page
                )));
            }
            if spec.timeout_secs == Some(0) {
                return Err(EngineError::InvalidConfig(format!(
                    "provider '{}' has a zero timeout",
                    spec.name
                )));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for spec in &c.providers {
            if !seen.insert(spec.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "provider '{}' is listed twice",
                    spec.name
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Per-document policy ──────────────────────────────────────────────────

/// How aggressively a document may use AI extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyMode {
    /// Deterministic extraction only; AI is never called, whatever the score.
    LibraryOnly,
    /// Deterministic first, escalate pages that score below the threshold. (default)
    #[default]
    Auto,
    /// Every page goes to AI first (within the cost ceiling).
    AiPriority,
}

impl StrategyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::LibraryOnly => "library_only",
            StrategyMode::Auto => "auto",
            StrategyMode::AiPriority => "ai_priority",
        }
    }

    /// Whether this mode may ever call an AI provider.
    pub fn permits_ai(&self) -> bool {
        !matches!(self, StrategyMode::LibraryOnly)
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "library_only" | "library" => Ok(StrategyMode::LibraryOnly),
            "auto" => Ok(StrategyMode::Auto),
            "ai_priority" | "ai" => Ok(StrategyMode::AiPriority),
            other => Err(EngineError::InvalidConfig(format!(
                "unknown strategy mode '{other}' (expected library_only, auto or ai_priority)"
            ))),
        }
    }
}

/// Maximum number of pages of one document that may be sent to AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCeiling {
    /// No limit. (default)
    #[default]
    Unlimited,
    /// At most this many AI pages.
    Pages(u32),
}

impl CostCeiling {
    /// The numeric limit, if any.
    pub fn limit(&self) -> Option<u32> {
        match self {
            CostCeiling::Unlimited => None,
            CostCeiling::Pages(n) => Some(*n),
        }
    }

    /// The stricter of two ceilings.
    pub fn min(self, other: CostCeiling) -> CostCeiling {
        match (self.limit(), other.limit()) {
            (None, None) => CostCeiling::Unlimited,
            (Some(a), None) => CostCeiling::Pages(a),
            (None, Some(b)) => CostCeiling::Pages(b),
            (Some(a), Some(b)) => CostCeiling::Pages(a.min(b)),
        }
    }
}

impl From<Option<u32>> for CostCeiling {
    fn from(v: Option<u32>) -> Self {
        match v {
            Some(n) => CostCeiling::Pages(n),
            None => CostCeiling::Unlimited,
        }
    }
}

// ── Providers ────────────────────────────────────────────────────────────

/// One AI vision provider in the routing chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider name understood by the LLM provider factory
    /// (`openai`, `anthropic`, `gemini`, `mistral`, `ollama`, …).
    pub name: String,
    /// Model identifier, e.g. `gpt-4.1-nano`.
    pub model: String,
    /// Billing rate per AI page, in the caller's currency. Default: 0.0.
    pub rate_per_page: f64,
    /// Per-call timeout; falls back to [`EngineConfig::provider_timeout_secs`].
    pub timeout_secs: Option<u64>,
}

impl ProviderSpec {
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            rate_per_page: 0.0,
            timeout_secs: None,
        }
    }

    pub fn rate_per_page(mut self, rate: f64) -> Self {
        self.rate_per_page = rate;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

impl FromStr for ProviderSpec {
    type Err = EngineError;

    /// Parse `name:model[:rate[:timeout_secs]]`.
    ///
    /// The model may itself contain `:` (`ollama:llama3.2-vision:11b`): only
    /// trailing fields that parse as numbers are taken as rate and timeout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').map(str::trim).collect();
        let (name, rest) = match parts.split_first() {
            Some((name, rest)) if !name.is_empty() && !rest.is_empty() => (*name, rest),
            _ => {
                return Err(EngineError::InvalidConfig(format!(
                    "provider '{s}' must look like name:model[:rate[:timeout_secs]]"
                )))
            }
        };

        let n = rest.len();
        let (model, rate, timeout) = if n >= 3 {
            match (rest[n - 2].parse::<f64>(), rest[n - 1].parse::<u64>()) {
                (Ok(rate), Ok(secs)) => (&rest[..n - 2], Some(rate), Some(secs)),
                _ => match rest[n - 1].parse::<f64>() {
                    Ok(rate) => (&rest[..n - 1], Some(rate), None),
                    Err(_) => (rest, None, None),
                },
            }
        } else if n == 2 {
            match rest[1].parse::<f64>() {
                Ok(rate) => (&rest[..1], Some(rate), None),
                Err(_) => (rest, None, None),
            }
        } else {
            (rest, None, None)
        };

        let model = model.join(":");
        if model.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "provider '{s}' has an empty model name"
            )));
        }
        let mut spec = ProviderSpec::new(name, model);
        if let Some(rate) = rate {
            spec.rate_per_page = rate;
        }
        spec.timeout_secs = timeout;
        Ok(spec)
    }
}
