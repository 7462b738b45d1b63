//! Usage accounting: which pages went to AI, and what that costs.
//!
//! A [`UsageReporter`] lives for one document. Each resolved page is recorded
//! exactly once; a second record for the same page is ignored, so a retried
//! task can never double-bill. [`UsageReporter::finalize`] consumes the
//! reporter and freezes the [`UsageRecord`] that billing receives.

use crate::config::ProviderSpec;
use crate::extract::ExtractionMethod;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Final per-document usage.
///
/// Invariant: `pages_library + pages_ai == pages_total`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub pages_total: usize,
    pub pages_library: usize,
    pub pages_ai: usize,
    pub cost_estimate: f64,
}

impl UsageRecord {
    pub fn is_consistent(&self) -> bool {
        self.pages_library + self.pages_ai == self.pages_total
    }
}

/// Per-page price of each AI provider. Library and OCR pages are free.
#[derive(Debug, Clone, Default)]
pub struct RateTable {
    rates: HashMap<String, f64>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &[ProviderSpec]) -> Self {
        Self {
            rates: specs
                .iter()
                .map(|s| (s.name.clone(), s.rate_per_page))
                .collect(),
        }
    }

    pub fn with_rate(mut self, provider: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(provider.into(), rate);
        self
    }

    pub fn rate(&self, method: &ExtractionMethod) -> f64 {
        match method {
            ExtractionMethod::Library | ExtractionMethod::Ocr => 0.0,
            ExtractionMethod::Provider(name) => self.rates.get(name).copied().unwrap_or(0.0),
        }
    }
}

/// Accumulates usage for one document.
#[derive(Debug)]
pub struct UsageReporter {
    rates: RateTable,
    seen: HashSet<usize>,
    pages_library: usize,
    /// Ordered so the summed cost is identical run to run.
    ai_pages: BTreeMap<String, usize>,
}

impl UsageReporter {
    pub fn new(rates: RateTable) -> Self {
        Self {
            rates,
            seen: HashSet::new(),
            pages_library: 0,
            ai_pages: BTreeMap::new(),
        }
    }

    /// Record the method that produced page `index`'s final result.
    ///
    /// Returns `false` (and changes nothing) if the page was already recorded.
    pub fn record(&mut self, index: usize, method: &ExtractionMethod) -> bool {
        if !self.seen.insert(index) {
            warn!(page = index, "duplicate usage record ignored");
            return false;
        }
        match method {
            ExtractionMethod::Provider(name) => {
                *self.ai_pages.entry(name.clone()).or_insert(0) += 1;
            }
            ExtractionMethod::Library | ExtractionMethod::Ocr => self.pages_library += 1,
        }
        debug!(page = index, method = %method, "usage recorded");
        true
    }

    /// The record as it stands, without freezing it.
    pub fn snapshot(&self) -> UsageRecord {
        let pages_ai: usize = self.ai_pages.values().sum();
        let cost_estimate = self
            .ai_pages
            .iter()
            .map(|(name, n)| {
                self.rates.rate(&ExtractionMethod::Provider(name.clone())) * *n as f64
            })
            .sum();
        UsageRecord {
            pages_total: self.pages_library + pages_ai,
            pages_library: self.pages_library,
            pages_ai,
            cost_estimate,
        }
    }

    pub fn finalize(self) -> UsageRecord {
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ai(name: &str) -> ExtractionMethod {
        ExtractionMethod::Provider(name.into())
    }

    #[test]
    fn counts_and_costs() {
        let rates = RateTable::new().with_rate("openai", 0.05).with_rate("gemini", 0.03);
        let mut r = UsageReporter::new(rates);
        assert!(r.record(0, &ExtractionMethod::Library));
        assert!(r.record(1, &ai("openai")));
        assert!(r.record(2, &ai("gemini")));
        assert!(r.record(3, &ExtractionMethod::Ocr));
        let usage = r.finalize();
        assert_eq!(usage.pages_total, 4);
        assert_eq!(usage.pages_library, 2);
        assert_eq!(usage.pages_ai, 2);
        assert!((usage.cost_estimate - 0.08).abs() < 1e-9);
        assert!(usage.is_consistent());
    }

    #[test]
    fn duplicate_page_is_ignored() {
        let mut r = UsageReporter::new(RateTable::new().with_rate("openai", 1.0));
        assert!(r.record(0, &ai("openai")));
        assert!(!r.record(0, &ai("openai")));
        assert!(!r.record(0, &ExtractionMethod::Library));
        let usage = r.finalize();
        assert_eq!(usage.pages_total, 1);
        assert_eq!(usage.cost_estimate, 1.0);
    }

    #[test]
    fn unknown_provider_is_free() {
        let rates = RateTable::from_specs(&[ProviderSpec::new("openai", "m").rate_per_page(0.02)]);
        assert_eq!(rates.rate(&ai("mistral")), 0.0);
        assert_eq!(rates.rate(&ai("openai")), 0.02);
        assert_eq!(rates.rate(&ExtractionMethod::Library), 0.0);
    }

    #[test]
    fn record_serialises_with_wire_names() {
        let json = serde_json::to_value(UsageRecord {
            pages_total: 3,
            pages_library: 2,
            pages_ai: 1,
            cost_estimate: 0.05,
        })
        .unwrap();
        assert_eq!(json["pages_total"], 3);
        assert_eq!(json["pages_ai"], 1);
        assert_eq!(json["cost_estimate"], 0.05);
    }
}
