//! AI vision adapter: one page image in, structured JSON out.
//!
//! The page is rasterised and PNG-encoded on a blocking thread, sent to an
//! `edgequake-llm` provider with the JSON-extraction prompt from
//! [`crate::prompts`], and the reply parsed into a [`PagePayload`].
//!
//! Models do not always honour the JSON contract. A reply that is not JSON
//! (or is JSON wrapped in a code fence) is still usable text, so it is kept
//! as plain text rather than thrown away. Only an empty reply is treated as
//! a malformed response.
//!
//! This adapter makes exactly one provider call per `extract`. Timeouts,
//! retries and fallback across providers belong to [`crate::router`].

use super::{render, ExtractOptions, ExtractedImage, ExtractedTable, ExtractionAttempt, ExtractionMethod, PagePayload, PageExtractor};
use crate::collaborator::CredentialSource;
use crate::config::{EngineConfig, ProviderSpec};
use crate::document::PageSource;
use crate::error::{EngineError, PageError};
use crate::prompts::{page_instruction, DEFAULT_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One configured vision provider.
pub struct VisionExtractor {
    name: String,
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    system_prompt: String,
}

impl std::fmt::Debug for VisionExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VisionExtractor")
            .field("name", &self.name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

impl VisionExtractor {
    /// Wrap an already-built provider.
    pub fn new(name: impl Into<String>, provider: Arc<dyn LLMProvider>, config: &EngineConfig) -> Self {
        Self {
            name: name.into(),
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }

    /// Build the provider named by `spec` through the `edgequake-llm` factory.
    ///
    /// The credential source only gates construction: the factory reads the
    /// key from the provider's own environment variable, and nothing here
    /// keeps a copy.
    pub fn from_spec(
        spec: &ProviderSpec,
        config: &EngineConfig,
        credentials: &dyn CredentialSource,
    ) -> Result<Self, EngineError> {
        if !credentials.has_credential(&spec.name) {
            return Err(EngineError::AdapterInit {
                adapter: spec.name.clone(),
                reason: format!("no credential available for provider '{}'", spec.name),
            });
        }
        let provider = ProviderFactory::create_llm_provider(&spec.name, &spec.model).map_err(|e| {
            EngineError::AdapterInit {
                adapter: spec.name.clone(),
                reason: format!("{e}"),
            }
        })?;
        debug!(provider = %spec.name, model = %spec.model, "vision provider ready");
        Ok(Self::new(spec.name.clone(), provider, config))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            ..Default::default()
        }
    }

    async fn run(&self, page: &PageSource, options: &ExtractOptions) -> Result<PagePayload, PageError> {
        let index = page.index();
        let source = page.clone();
        let dpi = options.dpi;
        let max_pixels = options.max_rendered_pixels;
        let name = self.name.clone();

        let b64 = tokio::task::spawn_blocking(move || {
            let img = render::render_page(
                source.bytes(),
                source.password(),
                source.index(),
                dpi,
                max_pixels,
                &name,
            )?;
            render::encode_png_base64(&img).map_err(|e| PageError::ExtractionFailed {
                page: source.page_number(),
                method: name.clone(),
                detail: format!("PNG encode failed: {e}"),
            })
        })
        .await
        .map_err(|e| PageError::ExtractionFailed {
            page: index + 1,
            method: self.name.clone(),
            detail: format!("render task panicked: {e}"),
        })??;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(
                &page_instruction(&options.language),
                vec![ImageData::new(b64, "image/png").with_detail("high")],
            ),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.build_options()))
            .await
            .map_err(|e| classify_error(index + 1, &self.name, &e.to_string()))?;

        debug!(
            page = index,
            provider = %self.name,
            input_tokens = response.prompt_tokens,
            output_tokens = response.completion_tokens,
            "vision call returned"
        );
        parse_response(&response.content).ok_or_else(|| PageError::MalformedResponse {
            page: index + 1,
            provider: self.name.clone(),
            detail: "empty response".into(),
        })
    }
}

#[async_trait]
impl PageExtractor for VisionExtractor {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::Provider(self.name.clone())
    }

    async fn extract(&self, page: &PageSource, options: &ExtractOptions) -> ExtractionAttempt {
        let start = Instant::now();
        match self.run(page, options).await {
            Ok(payload) => {
                let mut attempt =
                    ExtractionAttempt::succeeded(self.method(), payload, start.elapsed());
                attempt.confidence = Some(1.0);
                attempt
            }
            Err(err) => {
                warn!(page = page.index(), provider = %self.name, "vision call failed: {err}");
                ExtractionAttempt::failed(self.method(), err, start.elapsed())
            }
        }
    }
}

/// Map a provider error message onto the retry-relevant error kinds.
pub(crate) fn classify_error(page: usize, provider: &str, message: &str) -> PageError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests") {
        PageError::RateLimited {
            page,
            provider: provider.to_string(),
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        PageError::Timeout {
            page,
            provider: provider.to_string(),
            secs: 0,
        }
    } else {
        PageError::Transport {
            page,
            provider: provider.to_string(),
            detail: message.to_string(),
        }
    }
}

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json|JSON)?\s*\n(.*?)\n?```\s*$").unwrap());

#[derive(Debug, Deserialize)]
struct RawPage {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tables: Vec<serde_json::Value>,
    #[serde(default)]
    images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawImage {
    Described { description: String },
    Bare(serde_json::Value),
}

/// Parse a model reply into a payload; `None` when the reply is empty.
fn parse_response(content: &str) -> Option<PagePayload> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return None;
    }
    let body = RE_JSON_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str().trim());

    let payload = match serde_json::from_str::<RawPage>(body) {
        Ok(raw) => PagePayload {
            has_text_layer: !raw.text.trim().is_empty(),
            text: raw.text,
            tables: raw
                .tables
                .into_iter()
                .map(|data| ExtractedTable { data })
                .collect(),
            images: raw
                .images
                .into_iter()
                .enumerate()
                .map(|(i, img)| ExtractedImage {
                    image_number: i + 1,
                    image_base64: String::new(),
                    description: match img {
                        RawImage::Described { description } => Some(description),
                        RawImage::Bare(v) => v.as_str().map(str::to_string),
                    },
                })
                .collect(),
            text_coverage: None,
            engine_confidence: None,
        },
        Err(_) => {
            debug!("vision reply is not JSON; keeping it as plain text");
            PagePayload {
                text: trimmed.to_string(),
                has_text_layer: true,
                ..Default::default()
            }
        }
    };
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_json_reply() {
        let reply = r#"{"text": "Hello", "tables": [[["a","b"],["1","2"]]], "images": [{"description": "a chart"}]}"#;
        let p = parse_response(reply).unwrap();
        assert_eq!(p.text, "Hello");
        assert_eq!(p.tables.len(), 1);
        assert_eq!(p.tables[0].data[1][1], "2");
        assert_eq!(p.images[0].image_number, 1);
        assert_eq!(p.images[0].description.as_deref(), Some("a chart"));
    }

    #[test]
    fn strips_json_fence() {
        let reply = "```json\n{\"text\": \"fenced\"}\n```";
        let p = parse_response(reply).unwrap();
        assert_eq!(p.text, "fenced");
        assert!(p.tables.is_empty());
    }

    #[test]
    fn non_json_reply_becomes_text() {
        let p = parse_response("Just the words on the page.").unwrap();
        assert_eq!(p.text, "Just the words on the page.");
        assert!(p.has_text_layer);
    }

    #[test]
    fn empty_reply_is_malformed() {
        assert!(parse_response("   \n").is_none());
    }

    #[test]
    fn errors_are_classified() {
        assert!(classify_error(1, "openai", "HTTP 429 Too Many Requests").is_rate_limit());
        assert!(matches!(
            classify_error(1, "openai", "request timed out"),
            PageError::Timeout { .. }
        ));
        assert!(matches!(
            classify_error(1, "openai", "connection reset"),
            PageError::Transport { .. }
        ));
    }
}
