//! Strategy selector: the per-page state machine.
//!
//! ```text
//!   Pending ──▶ LibraryAttempted ──▶ Accepted  ──▶ Resolved
//!      │                 │                            ▲
//!      │ (ai_priority)   └──────▶ Escalated ──────────┘
//!      └──────────────────────────────▲
//! ```
//!
//! * `library_only` never calls AI, whatever the score.
//! * `auto` escalates pages scoring below the threshold, while the
//!   document's AI budget lasts.
//! * `ai_priority` escalates every page while the budget lasts.
//!
//! A page that wanted AI but did not get it (budget spent, or every provider
//! failed) keeps its deterministic result. It is marked `degraded` when that
//! result scores below the threshold; a strong library page that simply
//! missed out on AI in `ai_priority` is not.
//!
//! ## Budget order
//!
//! Pages run concurrently, but the budget is handed out in page order:
//! [`CostBudget::decide`] for page *i* waits until pages `0..i` have all
//! decided. With a ceiling of N, exactly the first N pages that want AI get
//! it, whichever page happens to finish its library pass first. The wait is
//! short in practice because the fan-out starts pages in index order.

use crate::config::{CostCeiling, StrategyMode};
use crate::confidence::ConfidenceEstimator;
use crate::document::{PageSource, PageStatus};
use crate::error::PageError;
use crate::extract::{ExtractOptions, ExtractionAttempt, ExtractionMethod, PageExtractor};
use crate::router::ProviderRouter;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Per-document AI budget, handed out in page-index order.
///
/// Every page of a document that may use AI must call [`decide`](Self::decide)
/// exactly once, or later pages wait forever.
#[derive(Debug)]
pub struct CostBudget {
    remaining: Mutex<Option<u32>>,
    next: watch::Sender<usize>,
}

impl CostBudget {
    pub fn new(ceiling: CostCeiling) -> Self {
        let (next, _) = watch::channel(0);
        Self {
            remaining: Mutex::new(ceiling.limit()),
            next,
        }
    }

    /// Wait for page `index`'s turn, then take one unit if `wants_ai` and
    /// any is left. Returns whether the page may escalate.
    pub async fn decide(&self, index: usize, wants_ai: bool) -> bool {
        let mut turn = self.next.subscribe();
        // The sender lives in `self`, so this only returns once it is our turn.
        let _ = turn.wait_for(|next| *next >= index).await;

        let granted = if wants_ai {
            let mut remaining = self.remaining.lock().unwrap_or_else(|e| e.into_inner());
            match remaining.as_mut() {
                None => true,
                Some(0) => false,
                Some(n) => {
                    *n -= 1;
                    true
                }
            }
        } else {
            false
        };

        self.next.send_modify(|next| *next = (*next).max(index + 1));
        granted
    }

    /// Units left; `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        *self.remaining.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// A page that reached `Resolved`.
#[derive(Debug, Clone)]
pub struct ResolvedPage {
    pub index: usize,
    /// The retained attempt; its `confidence` is always set.
    pub attempt: ExtractionAttempt,
    pub status: PageStatus,
    pub degraded: bool,
    /// Why an escalation that was granted did not produce the result.
    pub escalation_error: Option<PageError>,
}

impl ResolvedPage {
    pub fn confidence(&self) -> f32 {
        self.attempt.confidence.unwrap_or(0.0)
    }
}

/// Runs the state machine for one page at a time; shared by all page tasks.
pub struct StrategySelector {
    library: Option<Arc<dyn PageExtractor>>,
    ocr: Option<Arc<dyn PageExtractor>>,
    router: ProviderRouter,
    estimator: ConfidenceEstimator,
    options: ExtractOptions,
}

impl std::fmt::Debug for StrategySelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategySelector")
            .field("library", &self.library.is_some())
            .field("ocr", &self.ocr.is_some())
            .field("router", &self.router)
            .field("estimator", &self.estimator)
            .finish()
    }
}

impl StrategySelector {
    pub fn new(
        library: Option<Arc<dyn PageExtractor>>,
        ocr: Option<Arc<dyn PageExtractor>>,
        router: ProviderRouter,
        estimator: ConfidenceEstimator,
        options: ExtractOptions,
    ) -> Self {
        Self {
            library,
            ocr,
            router,
            estimator,
            options,
        }
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn has_library(&self) -> bool {
        self.library.is_some()
    }

    /// Whether pages of a document in `mode` can reach the budget at all.
    pub fn uses_budget(&self, mode: StrategyMode) -> bool {
        mode.permits_ai() && !self.router.is_empty()
    }

    /// Drive one page from `Pending` to `Resolved`.
    pub async fn resolve(&self, page: &PageSource, mode: StrategyMode, budget: &CostBudget) -> ResolvedPage {
        let index = page.index();
        let ai_possible = self.uses_budget(mode);

        if mode == StrategyMode::AiPriority && ai_possible {
            if budget.decide(index, true).await {
                return self.escalate(page, None).await;
            }
            let det = self.deterministic(page).await;
            let degraded = self.is_weak(&det);
            info!(page = index, degraded, "AI budget spent; keeping deterministic result");
            return self.finish(index, det, degraded, None);
        }

        let det = self.deterministic(page).await;
        let score = det.confidence.unwrap_or(0.0);
        let low = self.estimator.needs_escalation(score);

        if !ai_possible {
            debug!(page = index, score, mode = %mode, "accepted without AI");
            return self.finish(index, det, false, None);
        }

        let granted = budget.decide(index, low).await;
        if !low {
            debug!(page = index, score, "accepted");
            return self.finish(index, det, false, None);
        }
        if !granted {
            info!(page = index, score, "below threshold but AI budget spent; degraded");
            return self.finish(index, det, true, None);
        }
        info!(page = index, score, threshold = self.estimator.threshold(), "escalating");
        self.escalate(page, Some(det)).await
    }

    /// One escalation; falls back to the deterministic result on failure.
    async fn escalate(&self, page: &PageSource, det: Option<ExtractionAttempt>) -> ResolvedPage {
        let index = page.index();
        let ai = self.router.escalate(page, &self.options).await;
        if ai.is_success() {
            return self.finish(index, ai, false, None);
        }
        let det = match det {
            Some(d) => d,
            None => self.deterministic(page).await,
        };
        let degraded = self.is_weak(&det);
        info!(page = index, degraded, "escalation failed; falling back to deterministic result");
        self.finish(index, det, degraded, ai.error)
    }

    /// A deterministic result the estimator would not accept on its own.
    fn is_weak(&self, det: &ExtractionAttempt) -> bool {
        self.estimator.needs_escalation(det.confidence.unwrap_or(0.0))
    }

    /// Library pass, plus the OCR pass when it is enabled and the library
    /// result is weak. The better-scoring attempt wins; its score is stored
    /// in `confidence`.
    async fn deterministic(&self, page: &PageSource) -> ExtractionAttempt {
        let mut best = match &self.library {
            Some(library) => library.extract(page, &self.options).await,
            None => ExtractionAttempt::failed(
                ExtractionMethod::Library,
                PageError::ExtractionFailed {
                    page: page.page_number(),
                    method: "library".into(),
                    detail: "library adapter disabled".into(),
                },
                Duration::ZERO,
            ),
        };
        let mut best_score = self.estimator.score(&best);
        let parts = self.estimator.breakdown(&best);
        debug!(
            page = page.index(),
            coverage = parts.coverage,
            cleanliness = parts.cleanliness,
            word_ratio = parts.word_ratio,
            length = parts.length,
            total = parts.total,
            "library score"
        );

        if let Some(ocr) = &self.ocr {
            let weak = !best.payload.has_text_layer || self.estimator.needs_escalation(best_score);
            if weak {
                let candidate = ocr.extract(page, &self.options).await;
                let score = self.estimator.score(&candidate);
                let parts = self.estimator.breakdown(&candidate);
                debug!(
                    page = page.index(),
                    library = best_score,
                    ocr = score,
                    ocr_engine = ?parts.engine,
                    ocr_word_ratio = parts.word_ratio,
                    ocr_cleanliness = parts.cleanliness,
                    "OCR pass"
                );
                if score > best_score {
                    best = candidate;
                    best_score = score;
                }
            }
        }

        best.confidence = Some(best_score);
        best
    }

    fn finish(
        &self,
        index: usize,
        mut attempt: ExtractionAttempt,
        degraded: bool,
        escalation_error: Option<PageError>,
    ) -> ResolvedPage {
        if attempt.confidence.is_none() {
            attempt.confidence = Some(self.estimator.score(&attempt));
        }
        let status = if attempt.error.is_some() {
            PageStatus::Failed
        } else if attempt.method.is_ai() {
            PageStatus::Escalated
        } else {
            PageStatus::LibraryOk
        };
        ResolvedPage {
            index,
            attempt,
            status,
            degraded,
            escalation_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn budget_is_granted_in_index_order() {
        let budget = Arc::new(CostBudget::new(CostCeiling::Pages(1)));

        // Page 2 asks first but must wait for pages 0 and 1.
        let b = budget.clone();
        let late = tokio::spawn(async move { b.decide(2, true).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!late.is_finished());

        assert!(!budget.decide(0, false).await);
        assert!(budget.decide(1, true).await);
        assert!(!late.await.unwrap());
        assert_eq!(budget.remaining(), Some(0));
    }

    #[tokio::test]
    async fn unlimited_budget_always_grants() {
        let budget = CostBudget::new(CostCeiling::Unlimited);
        for i in 0..5 {
            assert!(budget.decide(i, true).await);
        }
        assert_eq!(budget.remaining(), None);
    }

    #[tokio::test]
    async fn zero_ceiling_grants_nothing() {
        let budget = CostBudget::new(CostCeiling::Pages(0));
        assert!(!budget.decide(0, true).await);
        assert!(!budget.decide(1, true).await);
    }
}
