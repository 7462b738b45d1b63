//! # pagewise
//!
//! Page-level PDF extraction that only pays for AI where it has to.
//!
//! ## Why this crate?
//!
//! Sending every page of every PDF to a vision model gives the best text and
//! the worst bill. Most pages of most documents carry a perfectly good text
//! layer; the ones that don't (scans, broken font encodings, photographed
//! receipts) are usually a minority. This crate extracts each page the cheap
//! way first, scores how trustworthy the result looks, and escalates only
//! the weak pages to an AI provider, within a per-document page budget.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Load       %PDF check, page count via pdfium
//!  ├─ 2. Library    text layer, coverage, embedded images, tables (spawn_blocking)
//!  ├─ 3. OCR        optional tesseract pass on weak pages
//!  ├─ 4. Score      confidence heuristic in [0, 1]
//!  ├─ 5. Escalate   low scorers → provider chain (timeout, retry, fallback)
//!  ├─ 6. Aggregate  ordered text, tables, images, per-page provenance
//!  └─ 7. Usage      pages_library / pages_ai / cost_estimate
//! ```
//!
//! Pages run concurrently (bounded by [`EngineConfig::concurrency`]); the AI
//! budget is still handed out in page order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pagewise::{CostCeiling, Engine, EngineConfig, EnvCredentials, ProviderHealth, ProviderSpec, StrategyMode};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder()
//!         .provider(ProviderSpec::new("openai", "gpt-4.1-nano").rate_per_page(0.01))
//!         .build()?;
//!     let health = Arc::new(ProviderHealth::default());
//!     let engine = Engine::from_config(config, &EnvCredentials, health)?;
//!
//!     let bytes = std::fs::read("document.pdf")?;
//!     let mut doc = engine
//!         .load_document("document.pdf", bytes, StrategyMode::Auto, CostCeiling::Pages(10))
//!         .await?;
//!     let result = engine.process(&mut doc).await?;
//!     println!("{}", result.text);
//!     eprintln!("{} of {} pages used AI", result.usage.pages_ai, result.usage.pages_total);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagewise` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! pagewise = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod collaborator;
pub mod confidence;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod extract;
pub mod health;
pub mod progress;
pub mod prompts;
pub mod router;
pub mod strategy;
pub mod usage;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{
    aggregate, DocumentResult, ImageRecord, MethodTiming, PageProvenance, PageSpan, TableRecord,
};
pub use collaborator::{CredentialSource, EnvCredentials, PlanCeiling, UsageAuthority};
pub use confidence::{ConfidenceEstimator, ConfidenceWeights, ScoreBreakdown};
pub use config::{CostCeiling, EngineConfig, EngineConfigBuilder, ProviderSpec, StrategyMode};
pub use document::{Document, Page, PageSource, PageStatus};
pub use engine::{Adapters, Engine};
pub use error::{EngineError, PageError};
pub use extract::{
    AdapterKind, ExtractOptions, ExtractedImage, ExtractedTable, ExtractionAttempt, ExtractionMethod,
    PageExtractor, PagePayload,
};
pub use health::{CircuitState, HealthPolicy, ProviderHealth};
pub use progress::{NoopProgress, ProgressCallback, ProgressObserver};
pub use router::{ProviderRouter, RetryPolicy, RoutedProvider};
pub use strategy::{CostBudget, ResolvedPage, StrategySelector};
pub use usage::{RateTable, UsageRecord, UsageReporter};
