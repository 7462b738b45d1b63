//! Progress-callback trait for per-page engine events.
//!
//! Inject an [`Arc<dyn ProgressObserver>`] via
//! [`crate::config::EngineConfigBuilder::progress_callback`] to be told as
//! each page resolves and which path produced it.
//!
//! # Example
//!
//! ```rust
//! use pagewise::{EngineConfig, PageProvenance, ProgressObserver};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Escalations(AtomicUsize);
//!
//! impl ProgressObserver for Escalations {
//!     fn on_page_resolved(&self, _index: usize, _total: usize, provenance: &PageProvenance) {
//!         if provenance.provider.is_some() {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = EngineConfig::builder()
//!     .progress_callback(Arc::new(Escalations(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::aggregate::PageProvenance;
use crate::usage::UsageRecord;
use std::sync::Arc;

/// Called by the engine as it processes a document.
///
/// Pages resolve concurrently and out of order, so implementations must be
/// `Send + Sync` and guard shared state themselves. All methods default to
/// no-ops.
pub trait ProgressObserver: Send + Sync {
    /// Called once before any page is extracted.
    fn on_document_start(&self, document_id: &str, total_pages: usize) {
        let _ = (document_id, total_pages);
    }

    /// Called when a page reaches `Resolved`.
    ///
    /// # Arguments
    /// * `index`      — 0-based page index
    /// * `total`      — pages in the document
    /// * `provenance` — which method produced the page and whether it is degraded
    fn on_page_resolved(&self, index: usize, total: usize, provenance: &PageProvenance) {
        let _ = (index, total, provenance);
    }

    /// Called once after every page resolved, with the final usage.
    fn on_document_complete(&self, document_id: &str, usage: &UsageRecord) {
        let _ = (document_id, usage);
    }
}

/// A no-op observer; the default when none is configured.
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

/// Convenience alias matching the type stored in [`crate::config::EngineConfig`].
pub type ProgressCallback = Arc<dyn ProgressObserver>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::PageStatus;
    use crate::extract::ExtractionMethod;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracking {
        resolved: AtomicUsize,
        degraded: AtomicUsize,
    }

    impl ProgressObserver for Tracking {
        fn on_page_resolved(&self, _index: usize, _total: usize, p: &PageProvenance) {
            self.resolved.fetch_add(1, Ordering::SeqCst);
            if p.degraded {
                self.degraded.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn provenance(degraded: bool) -> PageProvenance {
        PageProvenance {
            page: 0,
            method: ExtractionMethod::Library,
            provider: None,
            confidence: Some(0.3),
            degraded,
            status: PageStatus::LibraryOk,
            error: None,
            latency_ms: 0,
        }
    }

    #[test]
    fn noop_does_not_panic() {
        let cb = NoopProgress;
        cb.on_document_start("doc", 2);
        cb.on_page_resolved(0, 2, &provenance(false));
        cb.on_document_complete("doc", &UsageRecord::default());
    }

    #[test]
    fn tracking_counts_degraded() {
        let t = Tracking {
            resolved: AtomicUsize::new(0),
            degraded: AtomicUsize::new(0),
        };
        t.on_page_resolved(0, 2, &provenance(false));
        t.on_page_resolved(1, 2, &provenance(true));
        assert_eq!(t.resolved.load(Ordering::SeqCst), 2);
        assert_eq!(t.degraded.load(Ordering::SeqCst), 1);
    }
}
