//! The per-request document model.
//!
//! A [`Document`] owns the raw PDF bytes and one [`Page`] per PDF page for
//! the lifetime of a single request. Pages hand adapters a cheap
//! [`PageSource`] (a shared handle to the bytes plus the page index) so that
//! concurrent page tasks never copy the file and never outlive the request.

use crate::config::{CostCeiling, StrategyMode};
use crate::error::EngineError;
use crate::extract::render;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Lifecycle of a page as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// Not yet resolved.
    #[default]
    Pending,
    /// Final result came from a deterministic adapter (library or OCR).
    LibraryOk,
    /// Final result came from an AI provider.
    Escalated,
    /// No attempt produced content; the page carries an error.
    Failed,
}

/// Handle to one page's raw content.
///
/// Cloning is cheap: the PDF bytes are shared, not copied.
#[derive(Clone)]
pub struct PageSource {
    bytes: Arc<[u8]>,
    index: usize,
    password: Option<Arc<str>>,
}

impl PageSource {
    /// 0-based page index.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number, as shown in viewers and error messages.
    pub fn page_number(&self) -> usize {
        self.index + 1
    }

    /// The whole PDF the page belongs to.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }
}

impl std::fmt::Debug for PageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageSource")
            .field("index", &self.index)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

/// One page of the source document.
#[derive(Debug, Clone)]
pub struct Page {
    pub index: usize,
    pub source: PageSource,
    pub status: PageStatus,
}

/// One incoming PDF and the policy it is processed under.
#[derive(Debug)]
pub struct Document {
    id: String,
    pages: Vec<Page>,
    mode: StrategyMode,
    ceiling: CostCeiling,
}

impl Document {
    /// Validate `bytes` as a PDF, count its pages with pdfium and build the
    /// document.
    pub async fn load(
        id: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        password: Option<&str>,
        mode: StrategyMode,
        ceiling: CostCeiling,
    ) -> Result<Self, EngineError> {
        let id = id.into();
        let bytes: Arc<[u8]> = bytes.into();
        check_magic(&bytes)?;

        let page_count = {
            let bytes = Arc::clone(&bytes);
            let pwd = password.map(str::to_string);
            let doc_id = id.clone();
            tokio::task::spawn_blocking(move || render::page_count(&doc_id, &bytes, pwd.as_deref()))
                .await
                .map_err(|e| EngineError::Internal(format!("page count task panicked: {e}")))??
        };

        if page_count == 0 {
            return Err(EngineError::EmptyDocument { document: id });
        }
        info!(document = %id, pages = page_count, mode = %mode, "document loaded");

        Ok(Self::with_page_count(id, bytes, password, page_count, mode, ceiling))
    }

    /// Build a document whose page count is already known.
    ///
    /// Skips pdfium entirely; useful when the caller has parsed the file
    /// already, and for exercising the engine with stub adapters.
    pub fn with_page_count(
        id: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
        password: Option<&str>,
        page_count: usize,
        mode: StrategyMode,
        ceiling: CostCeiling,
    ) -> Self {
        let bytes: Arc<[u8]> = bytes.into();
        let password: Option<Arc<str>> = password.map(Arc::from);
        let pages = (0..page_count)
            .map(|index| Page {
                index,
                source: PageSource {
                    bytes: Arc::clone(&bytes),
                    index,
                    password: password.clone(),
                },
                status: PageStatus::Pending,
            })
            .collect();
        let id = id.into();
        debug!(document = %id, pages = page_count, "document built");
        Self {
            id,
            pages,
            mode,
            ceiling,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn mode(&self) -> StrategyMode {
        self.mode
    }

    pub fn ceiling(&self) -> CostCeiling {
        self.ceiling
    }

    /// Tighten the ceiling, e.g. with the caller's remaining plan allowance.
    pub fn restrict_ceiling(&mut self, other: CostCeiling) {
        self.ceiling = self.ceiling.min(other);
    }

    /// Page handles in index order.
    pub fn sources(&self) -> Vec<PageSource> {
        self.pages.iter().map(|p| p.source.clone()).collect()
    }

    pub(crate) fn set_status(&mut self, index: usize, status: PageStatus) {
        if let Some(page) = self.pages.get_mut(index) {
            page.status = status;
        }
    }
}

/// Reject input that does not start with the `%PDF` magic bytes.
pub fn check_magic(bytes: &[u8]) -> Result<(), EngineError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(EngineError::NotAPdf {
            magic: bytes.iter().take(4).copied().collect(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_accepts_pdf() {
        assert!(check_magic(b"%PDF-1.7\n...").is_ok());
    }

    #[test]
    fn magic_rejects_other_files() {
        let err = check_magic(b"PK\x03\x04zip").unwrap_err();
        match err {
            EngineError::NotAPdf { magic } => assert_eq!(magic, b"PK\x03\x04".to_vec()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(check_magic(b"%P").is_err());
    }

    #[test]
    fn pages_share_bytes_and_keep_order() {
        let doc = Document::with_page_count(
            "doc-1",
            b"%PDF-1.4".to_vec(),
            Some("secret"),
            3,
            StrategyMode::Auto,
            CostCeiling::Pages(1),
        );
        assert_eq!(doc.page_count(), 3);
        let sources = doc.sources();
        assert_eq!(
            sources.iter().map(PageSource::index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(sources[2].page_number(), 3);
        assert_eq!(sources[1].password(), Some("secret"));
        assert!(doc.pages().iter().all(|p| p.status == PageStatus::Pending));
    }

    #[test]
    fn ceiling_only_tightens() {
        let mut doc = Document::with_page_count(
            "doc",
            b"%PDF".to_vec(),
            None,
            1,
            StrategyMode::Auto,
            CostCeiling::Pages(4),
        );
        doc.restrict_ceiling(CostCeiling::Unlimited);
        assert_eq!(doc.ceiling(), CostCeiling::Pages(4));
        doc.restrict_ceiling(CostCeiling::Pages(2));
        assert_eq!(doc.ceiling(), CostCeiling::Pages(2));
    }
}
