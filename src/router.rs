//! Provider router: one escalation, tried against an ordered provider chain.
//!
//! For each provider in operator order the router makes a call bounded by an
//! explicit timeout, retries once after a short fixed pause when the failure
//! is transient (timeout, rate limit, transport), and otherwise falls through
//! to the next provider. Every outcome is written to the shared
//! [`ProviderHealth`].
//!
//! Providers whose circuit is open are skipped while at least one other
//! provider is available. When every circuit is open the router still tries
//! them all in order: health decides priority, not whether a page may be
//! extracted.

use crate::config::EngineConfig;
use crate::document::PageSource;
use crate::error::PageError;
use crate::extract::{ExtractOptions, ExtractionAttempt, ExtractionMethod, PageExtractor};
use crate::health::ProviderHealth;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// One provider in the chain.
#[derive(Clone)]
pub struct RoutedProvider {
    pub name: String,
    pub extractor: Arc<dyn PageExtractor>,
    pub timeout: Duration,
    pub rate_per_page: f64,
}

impl RoutedProvider {
    pub fn new(name: impl Into<String>, extractor: Arc<dyn PageExtractor>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            extractor,
            timeout,
            rate_per_page: 0.0,
        }
    }

    pub fn rate_per_page(mut self, rate: f64) -> Self {
        self.rate_per_page = rate;
        self
    }
}

impl std::fmt::Debug for RoutedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedProvider")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("rate_per_page", &self.rate_per_page)
            .finish()
    }
}

/// Same-provider retry behaviour.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// 0 or 1.
    pub retries_per_provider: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries_per_provider: 1,
            backoff: Duration::from_millis(250),
        }
    }
}

impl From<&EngineConfig> for RetryPolicy {
    fn from(config: &EngineConfig) -> Self {
        Self {
            retries_per_provider: config.retries_per_provider.min(1),
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

#[derive(Debug)]
pub struct ProviderRouter {
    providers: Vec<RoutedProvider>,
    health: Arc<ProviderHealth>,
    retry: RetryPolicy,
}

impl ProviderRouter {
    pub fn new(providers: Vec<RoutedProvider>, health: Arc<ProviderHealth>, retry: RetryPolicy) -> Self {
        Self {
            providers,
            health,
            retry,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn providers(&self) -> &[RoutedProvider] {
        &self.providers
    }

    pub fn health(&self) -> &Arc<ProviderHealth> {
        &self.health
    }

    /// Providers to try, in order.
    fn candidates(&self) -> Vec<&RoutedProvider> {
        let available: Vec<&RoutedProvider> = self
            .providers
            .iter()
            .filter(|p| self.health.is_available(&p.name))
            .collect();
        if available.is_empty() {
            if !self.providers.is_empty() {
                warn!("every provider circuit is open; trying them anyway");
            }
            self.providers.iter().collect()
        } else {
            available
        }
    }

    /// Escalate one page.
    ///
    /// Returns the first successful provider attempt (confidence 1.0), or a
    /// failed attempt carrying [`PageError::AllProvidersExhausted`].
    pub async fn escalate(&self, page: &PageSource, options: &ExtractOptions) -> ExtractionAttempt {
        let start = Instant::now();
        let mut tried: Vec<String> = Vec::new();
        let mut last_error = String::from("no provider configured");

        for provider in self.candidates() {
            tried.push(provider.name.clone());
            for call in 0..=self.retry.retries_per_provider {
                if call > 0 {
                    debug!(
                        page = page.index(),
                        provider = %provider.name,
                        backoff_ms = self.retry.backoff.as_millis() as u64,
                        "retrying provider"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }

                let mut attempt = self.call(provider, page, options).await;
                match attempt.error.take() {
                    None => {
                        self.health.record_success(&provider.name);
                        attempt.confidence = Some(1.0);
                        info!(
                            page = page.index(),
                            provider = %provider.name,
                            latency_ms = attempt.latency.as_millis() as u64,
                            "page escalated"
                        );
                        return attempt;
                    }
                    Some(err) => {
                        if blames_provider(&err) {
                            self.health.record_failure(&provider.name, err.is_rate_limit());
                        }
                        warn!(
                            page = page.index(),
                            provider = %provider.name,
                            kind = err.kind(),
                            "provider call failed: {err}"
                        );
                        let retry = err.is_retryable();
                        last_error = err.to_string();
                        if !retry {
                            break;
                        }
                    }
                }
            }
        }

        let method = ExtractionMethod::Provider(tried.last().cloned().unwrap_or_default());
        ExtractionAttempt::failed(
            method,
            PageError::AllProvidersExhausted {
                page: page.page_number(),
                tried,
                last_error,
            },
            start.elapsed(),
        )
    }

    async fn call(
        &self,
        provider: &RoutedProvider,
        page: &PageSource,
        options: &ExtractOptions,
    ) -> ExtractionAttempt {
        let start = Instant::now();
        match tokio::time::timeout(provider.timeout, provider.extractor.extract(page, options)).await {
            Ok(attempt) => attempt,
            Err(_) => ExtractionAttempt::failed(
                ExtractionMethod::Provider(provider.name.clone()),
                PageError::Timeout {
                    page: page.page_number(),
                    provider: provider.name.clone(),
                    secs: provider.timeout.as_secs(),
                },
                start.elapsed(),
            ),
        }
    }
}

/// Render failures are the page's fault, not the provider's.
fn blames_provider(err: &PageError) -> bool {
    !matches!(err, PageError::ExtractionFailed { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PagePayload;
    use crate::health::{CircuitState, HealthPolicy};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Ok(&'static str),
        Hang,
        RateLimited,
        Malformed,
    }

    struct Stub {
        name: &'static str,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl Stub {
        fn new(name: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                name,
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PageExtractor for Stub {
        fn method(&self) -> ExtractionMethod {
            ExtractionMethod::Provider(self.name.into())
        }

        async fn extract(&self, page: &PageSource, _o: &ExtractOptions) -> ExtractionAttempt {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let err = match self.behaviour {
                Behaviour::Ok(text) => {
                    return ExtractionAttempt::succeeded(
                        self.method(),
                        PagePayload {
                            text: text.into(),
                            has_text_layer: true,
                            ..Default::default()
                        },
                        Duration::ZERO,
                    )
                }
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
                Behaviour::RateLimited => PageError::RateLimited {
                    page: page.page_number(),
                    provider: self.name.into(),
                },
                Behaviour::Malformed => PageError::MalformedResponse {
                    page: page.page_number(),
                    provider: self.name.into(),
                    detail: "empty".into(),
                },
            };
            ExtractionAttempt::failed(self.method(), err, Duration::ZERO)
        }
    }

    fn page() -> PageSource {
        crate::document::Document::with_page_count(
            "doc",
            b"%PDF".to_vec(),
            None,
            1,
            Default::default(),
            Default::default(),
        )
        .sources()
        .remove(0)
    }

    fn routed(stub: &Arc<Stub>) -> RoutedProvider {
        RoutedProvider::new(stub.name, stub.clone(), Duration::from_millis(50))
    }

    fn retry() -> RetryPolicy {
        RetryPolicy {
            retries_per_provider: 1,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn first_healthy_provider_wins() {
        let a = Stub::new("a", Behaviour::Ok("from a"));
        let b = Stub::new("b", Behaviour::Ok("from b"));
        let router = ProviderRouter::new(
            vec![routed(&a), routed(&b)],
            Arc::new(ProviderHealth::default()),
            retry(),
        );
        let attempt = router.escalate(&page(), &ExtractOptions::default()).await;
        assert!(attempt.is_success());
        assert_eq!(attempt.payload.text, "from a");
        assert_eq!(attempt.confidence, Some(1.0));
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeout_retries_once_then_falls_through() {
        let slow = Stub::new("slow", Behaviour::Hang);
        let fast = Stub::new("fast", Behaviour::Ok("ok"));
        let health = Arc::new(ProviderHealth::default());
        let router = ProviderRouter::new(vec![routed(&slow), routed(&fast)], health.clone(), retry());
        let attempt = router.escalate(&page(), &ExtractOptions::default()).await;
        assert_eq!(attempt.payload.text, "ok");
        assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
        assert_eq!(fast.calls.load(Ordering::SeqCst), 1);
        assert_eq!(health.snapshot()[1].name, "slow");
        assert_eq!(health.snapshot()[1].total_failures, 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_not_retried() {
        let bad = Stub::new("bad", Behaviour::Malformed);
        let router = ProviderRouter::new(vec![routed(&bad)], Arc::new(ProviderHealth::default()), retry());
        let attempt = router.escalate(&page(), &ExtractOptions::default()).await;
        assert_eq!(bad.calls.load(Ordering::SeqCst), 1);
        match attempt.error {
            Some(PageError::AllProvidersExhausted { tried, page, .. }) => {
                assert_eq!(tried, vec!["bad".to_string()]);
                assert_eq!(page, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn open_circuit_is_skipped_while_others_are_available() {
        let a = Stub::new("a", Behaviour::RateLimited);
        let b = Stub::new("b", Behaviour::Ok("b"));
        let health = Arc::new(ProviderHealth::default());
        let router = ProviderRouter::new(vec![routed(&a), routed(&b)], health.clone(), retry());

        router.escalate(&page(), &ExtractOptions::default()).await;
        assert_eq!(health.state("a"), CircuitState::Open);
        let calls_before = a.calls.load(Ordering::SeqCst);

        let attempt = router.escalate(&page(), &ExtractOptions::default()).await;
        assert_eq!(attempt.payload.text, "b");
        assert_eq!(a.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn all_open_still_tries_in_order() {
        let a = Stub::new("a", Behaviour::Ok("a"));
        let health = Arc::new(ProviderHealth::new(HealthPolicy {
            failure_threshold: 1,
            cooldown: Duration::from_secs(60),
        }));
        health.record_failure("a", false);
        let router = ProviderRouter::new(vec![routed(&a)], health.clone(), retry());
        let attempt = router.escalate(&page(), &ExtractOptions::default()).await;
        assert!(attempt.is_success());
        assert_eq!(health.state("a"), CircuitState::Closed);
    }
}
