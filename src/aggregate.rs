//! Result aggregation: resolved pages in, one [`DocumentResult`] out.
//!
//! [`aggregate`] is a pure function of its inputs. Pages are ordered by
//! index whatever order they finished in, texts are joined with a blank line,
//! and page boundaries are kept as byte offsets in `page_spans` instead of
//! markers inside the text. Tables and images keep the page they came from;
//! content that continues across a page break is not stitched together.

use crate::document::PageStatus;
use crate::error::PageError;
use crate::extract::ExtractionMethod;
use crate::strategy::ResolvedPage;
use crate::usage::UsageRecord;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Separator between page texts.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// How one page's final result was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageProvenance {
    /// 0-based page index.
    pub page: usize,
    pub method: ExtractionMethod,
    /// Provider name when `method` is an AI provider.
    pub provider: Option<String>,
    pub confidence: Option<f32>,
    /// Wanted AI but did not get it (budget spent or providers exhausted),
    /// and the deterministic result kept instead scores below the threshold.
    pub degraded: bool,
    pub status: PageStatus,
    pub error: Option<PageError>,
    /// Wall-clock time of the attempt that produced the result.
    #[serde(default)]
    pub latency_ms: u64,
}

impl PageProvenance {
    pub fn from_resolved(page: &ResolvedPage) -> Self {
        let method = page.attempt.method.clone();
        let provider = match &method {
            ExtractionMethod::Provider(name) => Some(name.clone()),
            _ => None,
        };
        Self {
            page: page.index,
            method,
            provider,
            confidence: page.attempt.confidence,
            degraded: page.degraded,
            status: page.status,
            error: page
                .attempt
                .error
                .clone()
                .or_else(|| page.escalation_error.clone()),
            latency_ms: page.attempt.latency.as_millis() as u64,
        }
    }
}

/// A table and the page it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub page: usize,
    pub data: serde_json::Value,
}

/// An image and the page it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub page: usize,
    pub image_number: usize,
    pub image_base64: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Byte range of one page inside [`DocumentResult::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub page: usize,
    pub start: usize,
    pub end: usize,
}

/// The whole-document result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentResult {
    pub text: String,
    pub tables: Vec<TableRecord>,
    pub images: Vec<ImageRecord>,
    pub usage: UsageRecord,
    /// Provenance of every page, in index order.
    pub pages: Vec<PageProvenance>,
    pub page_spans: Vec<PageSpan>,
}

impl DocumentResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Text of one page, sliced through its span.
    pub fn page_text(&self, page: usize) -> Option<&str> {
        self.page_spans
            .iter()
            .find(|s| s.page == page)
            .and_then(|s| self.text.get(s.start..s.end))
    }

    pub fn degraded_pages(&self) -> impl Iterator<Item = &PageProvenance> {
        self.pages.iter().filter(|p| p.degraded)
    }

    /// Pages and summed latency per extraction method, sorted by method name.
    pub fn timing_by_method(&self) -> Vec<MethodTiming> {
        let mut by_method: BTreeMap<String, MethodTiming> = BTreeMap::new();
        for p in &self.pages {
            let entry = by_method
                .entry(p.method.to_string())
                .or_insert_with(|| MethodTiming {
                    method: p.method.clone(),
                    pages: 0,
                    failed: 0,
                    total_ms: 0,
                });
            entry.pages += 1;
            entry.total_ms += p.latency_ms;
            if p.status == PageStatus::Failed {
                entry.failed += 1;
            }
        }
        by_method.into_values().collect()
    }
}

/// How long one extraction method took across a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTiming {
    pub method: ExtractionMethod,
    pub pages: usize,
    pub failed: usize,
    pub total_ms: u64,
}

impl MethodTiming {
    pub fn mean_ms(&self) -> u64 {
        if self.pages == 0 {
            0
        } else {
            self.total_ms / self.pages as u64
        }
    }
}

/// Combine resolved pages into a document result.
pub fn aggregate(pages: &[ResolvedPage], usage: UsageRecord) -> DocumentResult {
    let mut ordered: Vec<&ResolvedPage> = pages.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let mut text = String::new();
    let mut page_spans = Vec::new();
    let mut tables = Vec::new();
    let mut images = Vec::new();
    let mut provenance = Vec::with_capacity(ordered.len());

    for page in ordered {
        let payload = &page.attempt.payload;
        let page_text = payload.text.trim();
        if !page_text.is_empty() {
            if !text.is_empty() {
                text.push_str(PAGE_SEPARATOR);
            }
            let start = text.len();
            text.push_str(page_text);
            page_spans.push(PageSpan {
                page: page.index,
                start,
                end: text.len(),
            });
        }

        tables.extend(payload.tables.iter().map(|t| TableRecord {
            page: page.index,
            data: t.data.clone(),
        }));
        images.extend(payload.images.iter().map(|img| ImageRecord {
            page: page.index,
            image_number: img.image_number,
            image_base64: img.image_base64.clone(),
            description: img.description.clone(),
        }));
        provenance.push(PageProvenance::from_resolved(page));
    }

    DocumentResult {
        text,
        tables,
        images,
        usage,
        pages: provenance,
        page_spans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractedImage, ExtractedTable, ExtractionAttempt, PagePayload};
    use std::time::Duration;

    fn resolved(index: usize, text: &str, method: ExtractionMethod) -> ResolvedPage {
        let mut attempt = ExtractionAttempt::succeeded(
            method.clone(),
            PagePayload {
                text: text.into(),
                has_text_layer: true,
                ..Default::default()
            },
            Duration::from_millis(index as u64),
        );
        attempt.confidence = Some(0.9);
        ResolvedPage {
            index,
            attempt,
            status: if method.is_ai() {
                PageStatus::Escalated
            } else {
                PageStatus::LibraryOk
            },
            degraded: false,
            escalation_error: None,
        }
    }

    fn usage() -> UsageRecord {
        UsageRecord {
            pages_total: 3,
            pages_library: 2,
            pages_ai: 1,
            cost_estimate: 0.05,
        }
    }

    #[test]
    fn pages_are_joined_in_index_order() {
        let pages = vec![
            resolved(2, "third", ExtractionMethod::Library),
            resolved(0, "first", ExtractionMethod::Library),
            resolved(1, "second", ExtractionMethod::Provider("openai".into())),
        ];
        let result = aggregate(&pages, usage());
        assert_eq!(result.text, "first\n\nsecond\n\nthird");
        assert_eq!(result.page_text(1), Some("second"));
        assert_eq!(result.pages[1].provider.as_deref(), Some("openai"));
        assert_eq!(
            result.pages.iter().map(|p| p.page).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn empty_pages_leave_no_gap() {
        let pages = vec![
            resolved(0, "a", ExtractionMethod::Library),
            resolved(1, "   ", ExtractionMethod::Library),
            resolved(2, "c", ExtractionMethod::Library),
        ];
        let result = aggregate(&pages, usage());
        assert_eq!(result.text, "a\n\nc");
        assert_eq!(result.page_spans.len(), 2);
        assert_eq!(result.page_text(1), None);
        assert_eq!(result.pages.len(), 3);
    }

    #[test]
    fn tables_and_images_keep_their_page() {
        let mut p0 = resolved(0, "t", ExtractionMethod::Library);
        p0.attempt.payload.tables.push(ExtractedTable {
            data: serde_json::json!([["a", "b"]]),
        });
        let mut p1 = resolved(1, "i", ExtractionMethod::Library);
        p1.attempt.payload.tables.push(ExtractedTable {
            data: serde_json::json!([["c", "d"]]),
        });
        p1.attempt.payload.images.push(ExtractedImage {
            image_number: 1,
            image_base64: "iVBOR".into(),
            description: None,
        });
        let result = aggregate(&[p1, p0], usage());
        assert_eq!(result.tables.len(), 2);
        assert_eq!(result.tables[0].page, 0);
        assert_eq!(result.tables[1].page, 1);
        assert_eq!(result.images[0].page, 1);

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert!(json["images"][0].get("description").is_none());
        assert_eq!(json["images"][0]["image_base64"], "iVBOR");
    }

    #[test]
    fn latency_is_reported_per_page_and_per_method() {
        let pages = vec![
            resolved(0, "a", ExtractionMethod::Library),
            resolved(1, "b", ExtractionMethod::Provider("openai".into())),
            resolved(2, "c", ExtractionMethod::Library),
        ];
        let result = aggregate(&pages, usage());
        assert_eq!(
            result.pages.iter().map(|p| p.latency_ms).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        let timing = result.timing_by_method();
        assert_eq!(timing.len(), 2);
        assert_eq!(timing[0].method, ExtractionMethod::Library);
        assert_eq!(timing[0].pages, 2);
        assert_eq!(timing[0].total_ms, 2);
        assert_eq!(timing[0].mean_ms(), 1);
        assert_eq!(timing[1].method, ExtractionMethod::Provider("openai".into()));
        assert_eq!(timing[1].failed, 0);

        let json: serde_json::Value = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(json["pages"][2]["latency_ms"], 2);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let pages = vec![
            resolved(1, "b", ExtractionMethod::Provider("gemini".into())),
            resolved(0, "a", ExtractionMethod::Library),
        ];
        let first = aggregate(&pages, usage()).to_json().unwrap();
        let second = aggregate(&pages, usage()).to_json().unwrap();
        assert_eq!(first, second);
    }
}
