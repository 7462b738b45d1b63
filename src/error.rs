//! Error types for the pagewise engine.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`EngineError`] — **Fatal**: the document cannot be processed at all
//!   (not a PDF, adapter could not be initialised, no usable extraction
//!   path). Returned as `Err(EngineError)` from the [`crate::engine::Engine`]
//!   entry points before or instead of a result.
//!
//! * [`PageError`] — **Non-fatal**: one extraction attempt on one page
//!   failed (render glitch, provider timeout, rate limit). Stored inside
//!   [`crate::extract::ExtractionAttempt`] and surfaced in the page's
//!   provenance so callers can tell degraded and failed pages apart without
//!   losing the rest of the document.
//!
//! Running out of AI budget is neither: it is a policy branch of the
//! strategy selector and shows up only as `degraded = true` on a page.

use crate::usage::UsageRecord;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All fatal errors returned by the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The bytes handed over by the caller do not start with `%PDF`.
    #[error("Input is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{document}' is corrupt: {detail}")]
    CorruptPdf { document: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{document}' is encrypted and requires a password")]
    PasswordRequired { document: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{document}'")]
    WrongPassword { document: String },

    /// The PDF parsed but contains zero pages.
    #[error("PDF '{document}' has no pages")]
    EmptyDocument { document: String },

    // ── Adapter errors ────────────────────────────────────────────────────
    /// An extraction adapter could not be constructed (missing credential,
    /// missing OCR binary, provider factory rejected the model, …).
    #[error("Failed to initialise the '{adapter}' adapter: {reason}")]
    AdapterInit { adapter: String, reason: String },

    /// Neither a deterministic adapter nor any AI provider is available for
    /// the requested strategy mode.
    #[error("No usable extraction path: {0}")]
    NoExtractionPath(String),

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The account/usage collaborator refused or failed a request.
    #[error("Usage collaborator failed during {operation}: {detail}")]
    Collaborator { operation: String, detail: String },

    // ── Lifecycle ─────────────────────────────────────────────────────────
    /// The caller cancelled the request before every page resolved.
    ///
    /// `partial` only counts pages that reached `Resolved`; pages abandoned
    /// mid-flight are never billed.
    #[error("Processing cancelled after {} of {total} pages resolved", partial.pages_total)]
    Cancelled { partial: UsageRecord, total: usize },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single extraction attempt.
///
/// `page` is the 1-indexed page number, matching what users see in a PDF
/// viewer; the engine itself indexes pages from zero.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageError {
    /// The adapter could not extract anything (malformed page, render failure).
    #[error("Page {page}: {method} extraction failed: {detail}")]
    ExtractionFailed {
        page: usize,
        method: String,
        detail: String,
    },

    /// The provider did not answer within its timeout.
    #[error("Page {page}: provider '{provider}' timed out after {secs}s")]
    Timeout {
        page: usize,
        provider: String,
        secs: u64,
    },

    /// The provider signalled a rate limit (HTTP 429 or equivalent).
    #[error("Page {page}: provider '{provider}' is rate limited")]
    RateLimited { page: usize, provider: String },

    /// Network or API error talking to the provider.
    #[error("Page {page}: provider '{provider}' transport error: {detail}")]
    Transport {
        page: usize,
        provider: String,
        detail: String,
    },

    /// The provider answered but the answer held no usable content.
    #[error("Page {page}: provider '{provider}' returned an unusable response: {detail}")]
    MalformedResponse {
        page: usize,
        provider: String,
        detail: String,
    },

    /// Every configured provider failed for this page.
    #[error("Page {page}: all providers exhausted ({}); last error: {last_error}", tried.join(", "))]
    AllProvidersExhausted {
        page: usize,
        tried: Vec<String>,
        last_error: String,
    },
}

impl PageError {
    /// Whether a second call to the same provider could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PageError::Timeout { .. } | PageError::RateLimited { .. } | PageError::Transport { .. }
        )
    }

    /// Whether the provider told us to back off.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, PageError::RateLimited { .. })
    }

    /// Short machine-readable tag, identical to the serde `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            PageError::ExtractionFailed { .. } => "extraction_failed",
            PageError::Timeout { .. } => "timeout",
            PageError::RateLimited { .. } => "rate_limited",
            PageError::Transport { .. } => "transport",
            PageError::MalformedResponse { .. } => "malformed_response",
            PageError::AllProvidersExhausted { .. } => "all_providers_exhausted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adapter_init_display() {
        let e = EngineError::AdapterInit {
            adapter: "anthropic".into(),
            reason: "ANTHROPIC_API_KEY is not set".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("anthropic"), "got: {msg}");
        assert!(msg.contains("ANTHROPIC_API_KEY"), "got: {msg}");
    }

    #[test]
    fn cancelled_display_counts_resolved_pages() {
        let e = EngineError::Cancelled {
            partial: UsageRecord {
                pages_total: 2,
                pages_library: 2,
                pages_ai: 0,
                cost_estimate: 0.0,
            },
            total: 7,
        };
        assert!(e.to_string().contains("2 of 7"), "got: {e}");
    }

    #[test]
    fn exhausted_lists_every_provider() {
        let e = PageError::AllProvidersExhausted {
            page: 3,
            tried: vec!["openai".into(), "gemini".into()],
            last_error: "timeout".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("openai, gemini"), "got: {msg}");
        assert!(msg.contains("Page 3"), "got: {msg}");
        assert!(!e.is_retryable());
    }

    #[test]
    fn retryable_kinds() {
        let timeout = PageError::Timeout {
            page: 1,
            provider: "openai".into(),
            secs: 30,
        };
        let limited = PageError::RateLimited {
            page: 1,
            provider: "openai".into(),
        };
        let malformed = PageError::MalformedResponse {
            page: 1,
            provider: "openai".into(),
            detail: "empty".into(),
        };
        assert!(timeout.is_retryable());
        assert!(limited.is_retryable());
        assert!(limited.is_rate_limit());
        assert!(!malformed.is_retryable());
    }

    #[test]
    fn page_error_serialises_with_kind_tag() {
        let e = PageError::RateLimited {
            page: 2,
            provider: "gemini".into(),
        };
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["kind"], "rate_limited");
        assert_eq!(json["kind"], e.kind());
        assert_eq!(json["provider"], "gemini");
    }
}
