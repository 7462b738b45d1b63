//! The engine: fan a document's pages out, resolve each one, fan back in.
//!
//! ```text
//!   Document ─▶ pages ─▶ buffer_unordered(concurrency) ─▶ StrategySelector::resolve
//!                                                              │
//!                               UsageReporter::record ◀────────┤
//!                               ProgressObserver      ◀────────┘
//!   join ─▶ aggregate(pages, usage) ─▶ DocumentResult
//! ```
//!
//! One engine serves any number of documents. It owns the adapters and the
//! router; the only thing documents share through it is the injected
//! [`ProviderHealth`].

use crate::aggregate::{aggregate, DocumentResult, PageProvenance};
use crate::collaborator::{CredentialSource, UsageAuthority};
use crate::config::{CostCeiling, EngineConfig, StrategyMode};
use crate::confidence::ConfidenceEstimator;
use crate::document::Document;
use crate::error::EngineError;
use crate::extract::{build_adapter, AdapterKind, ExtractOptions, PageExtractor};
use crate::health::ProviderHealth;
use crate::router::{ProviderRouter, RetryPolicy, RoutedProvider};
use crate::strategy::{CostBudget, ResolvedPage, StrategySelector};
use crate::usage::{RateTable, UsageReporter};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info};

/// The adapters an engine runs.
#[derive(Default)]
pub struct Adapters {
    pub library: Option<Arc<dyn PageExtractor>>,
    pub ocr: Option<Arc<dyn PageExtractor>>,
    /// AI providers in priority order.
    pub providers: Vec<RoutedProvider>,
}

impl Adapters {
    /// Build every adapter `config` asks for.
    ///
    /// Any adapter that cannot be built (no pdfium, no tesseract, missing
    /// credential) fails the whole call with [`EngineError::AdapterInit`].
    pub fn from_config(
        config: &EngineConfig,
        credentials: &dyn CredentialSource,
    ) -> Result<Self, EngineError> {
        let mut adapters = Self::deterministic_only(config, credentials)?;
        adapters.providers = config
            .providers
            .iter()
            .map(|spec| {
                let extractor = build_adapter(&AdapterKind::Vision(spec.clone()), config, credentials)?;
                Ok(RoutedProvider::new(spec.name.clone(), extractor, config.timeout_for(spec))
                    .rate_per_page(spec.rate_per_page))
            })
            .collect::<Result<Vec<_>, EngineError>>()?;
        Ok(adapters)
    }

    /// Build the library and OCR adapters only.
    ///
    /// For engines that will only ever serve `library_only` documents:
    /// configured providers are ignored, so a missing provider credential is
    /// not an error.
    pub fn deterministic_only(
        config: &EngineConfig,
        credentials: &dyn CredentialSource,
    ) -> Result<Self, EngineError> {
        let library = if config.enable_library {
            Some(build_adapter(&AdapterKind::Library, config, credentials)?)
        } else {
            None
        };
        let ocr = if config.enable_ocr {
            Some(build_adapter(
                &AdapterKind::Ocr {
                    binary: config.ocr_binary.clone(),
                },
                config,
                credentials,
            )?)
        } else {
            None
        };
        Ok(Self {
            library,
            ocr,
            providers: Vec::new(),
        })
    }

    /// The adapters a document in `mode` needs: providers are skipped for
    /// `library_only`.
    pub fn for_mode(
        config: &EngineConfig,
        credentials: &dyn CredentialSource,
        mode: StrategyMode,
    ) -> Result<Self, EngineError> {
        if mode.permits_ai() {
            Self::from_config(config, credentials)
        } else {
            Self::deterministic_only(config, credentials)
        }
    }
}

impl std::fmt::Debug for Adapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapters")
            .field("library", &self.library.as_ref().map(|a| a.method()))
            .field("ocr", &self.ocr.as_ref().map(|a| a.method()))
            .field("providers", &self.providers)
            .finish()
    }
}

/// Page-level extraction engine.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    selector: StrategySelector,
    rates: RateTable,
}

impl Engine {
    pub fn new(config: EngineConfig, adapters: Adapters, health: Arc<ProviderHealth>) -> Self {
        let rates = adapters
            .providers
            .iter()
            .fold(RateTable::new(), |t, p| t.with_rate(p.name.clone(), p.rate_per_page));
        let router = ProviderRouter::new(adapters.providers, health, RetryPolicy::from(&config));
        let selector = StrategySelector::new(
            adapters.library,
            adapters.ocr,
            router,
            ConfidenceEstimator::new(config.confidence_threshold, config.confidence_weights),
            ExtractOptions::from(&config),
        );
        Self {
            config,
            selector,
            rates,
        }
    }

    /// Build the adapters from `config`, then the engine.
    ///
    /// Every configured provider must be constructible. Use
    /// [`Engine::for_mode`] when the engine serves a single strategy mode.
    pub fn from_config(
        config: EngineConfig,
        credentials: &dyn CredentialSource,
        health: Arc<ProviderHealth>,
    ) -> Result<Self, EngineError> {
        let adapters = Adapters::from_config(&config, credentials)?;
        debug!(?adapters, "adapters ready");
        Ok(Self::new(config, adapters, health))
    }

    /// Build an engine for documents in one strategy mode only.
    ///
    /// In `library_only` mode provider adapters are not built, so their
    /// credentials are not required.
    pub fn for_mode(
        config: EngineConfig,
        credentials: &dyn CredentialSource,
        health: Arc<ProviderHealth>,
        mode: StrategyMode,
    ) -> Result<Self, EngineError> {
        let adapters = Adapters::for_mode(&config, credentials, mode)?;
        debug!(?adapters, mode = %mode, "adapters ready");
        Ok(Self::new(config, adapters, health))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<ProviderHealth> {
        self.selector.router().health()
    }

    /// Validate and open a PDF with the configured password.
    pub async fn load_document(
        &self,
        id: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        mode: StrategyMode,
        ceiling: CostCeiling,
    ) -> Result<Document, EngineError> {
        Document::load(id, bytes, self.config.password.as_deref(), mode, ceiling).await
    }

    /// Whether a document in `mode` has any way to be extracted.
    fn check_paths(&self, mode: StrategyMode) -> Result<(), EngineError> {
        let has_ai = !self.selector.router().is_empty();
        if !self.selector.has_library() && !has_ai {
            return Err(EngineError::NoExtractionPath(
                "the library adapter is disabled and no AI provider is configured".into(),
            ));
        }
        match mode {
            StrategyMode::LibraryOnly if !self.selector.has_library() => Err(
                EngineError::NoExtractionPath("library_only requested but the library adapter is disabled".into()),
            ),
            StrategyMode::AiPriority if !has_ai => Err(EngineError::AdapterInit {
                adapter: "ai_priority".into(),
                reason: "no AI provider is configured".into(),
            }),
            _ => Ok(()),
        }
    }

    /// Process every page of `doc` and aggregate the result.
    pub async fn process(&self, doc: &mut Document) -> Result<DocumentResult, EngineError> {
        self.process_until(doc, std::future::pending::<()>()).await
    }

    /// Like [`process`](Self::process), but gives up when `cancel` completes.
    ///
    /// On cancellation in-flight pages are dropped and
    /// [`EngineError::Cancelled`] carries the usage of the pages that had
    /// already resolved; nothing else is billed.
    pub async fn process_until<F>(&self, doc: &mut Document, cancel: F) -> Result<DocumentResult, EngineError>
    where
        F: Future<Output = ()>,
    {
        let mode = doc.mode();
        self.check_paths(mode)?;

        let start = Instant::now();
        let total = doc.page_count();
        let sources = doc.sources();
        let budget = CostBudget::new(doc.ceiling());
        let reporter = Mutex::new(UsageReporter::new(self.rates.clone()));
        let callback = self.config.progress_callback.as_ref();

        info!(
            document = doc.id(),
            pages = total,
            mode = %mode,
            ceiling = ?doc.ceiling().limit(),
            concurrency = self.config.concurrency,
            "processing document"
        );
        if let Some(cb) = callback {
            cb.on_document_start(doc.id(), total);
        }

        let work = stream::iter(sources.iter().map(|source| {
            let budget = &budget;
            let reporter = &reporter;
            async move {
                let page = self.selector.resolve(source, mode, budget).await;
                reporter
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .record(page.index, &page.attempt.method);
                if let Some(cb) = callback {
                    cb.on_page_resolved(page.index, total, &PageProvenance::from_resolved(&page));
                }
                page
            }
        }))
        .buffer_unordered(self.config.concurrency.max(1))
        .collect::<Vec<ResolvedPage>>();

        tokio::pin!(cancel);
        let pages = tokio::select! {
            biased;
            _ = &mut cancel => {
                let partial = reporter.lock().unwrap_or_else(|e| e.into_inner()).snapshot();
                info!(
                    document = doc.id(),
                    resolved = partial.pages_total,
                    total,
                    "processing cancelled"
                );
                return Err(EngineError::Cancelled { partial, total });
            }
            pages = work => pages,
        };

        for page in &pages {
            doc.set_status(page.index, page.status);
        }
        let usage = reporter.into_inner().unwrap_or_else(|e| e.into_inner()).finalize();
        if usage.pages_total != total || !usage.is_consistent() {
            return Err(EngineError::Internal(format!(
                "usage accounting mismatch: {usage:?} for {total} pages"
            )));
        }

        let result = aggregate(&pages, usage);
        info!(
            document = doc.id(),
            pages = total,
            pages_ai = result.usage.pages_ai,
            degraded = result.degraded_pages().count(),
            cost = result.usage.cost_estimate,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "document complete"
        );
        if let Some(cb) = callback {
            cb.on_document_complete(doc.id(), &result.usage);
        }
        Ok(result)
    }

    /// Full round trip for one account: fetch the plan ceiling, open and
    /// process the document under it, report the usage.
    pub async fn parse_for_account(
        &self,
        authority: &dyn UsageAuthority,
        account: &str,
        document_id: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        mode: StrategyMode,
    ) -> Result<DocumentResult, EngineError> {
        let mut doc = self
            .load_document(document_id, bytes, mode, CostCeiling::Unlimited)
            .await?;
        self.process_for_account(authority, account, &mut doc).await
    }

    /// Process an already loaded document on behalf of `account`.
    ///
    /// The document's own ceiling is tightened to what the plan still allows.
    /// Usage is reported only when processing completes.
    pub async fn process_for_account(
        &self,
        authority: &dyn UsageAuthority,
        account: &str,
        doc: &mut Document,
    ) -> Result<DocumentResult, EngineError> {
        let plan = authority.get_plan_ceiling(account).await?;
        doc.restrict_ceiling(CostCeiling::from(plan.max_ai_pages_remaining));
        debug!(account, ceiling = ?doc.ceiling().limit(), "plan ceiling applied");

        let result = self.process(doc).await?;
        authority.report_usage(account, &result.usage).await?;
        Ok(result)
    }
}
