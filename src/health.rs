//! Process-wide provider health: a small circuit breaker per AI provider.
//!
//! One [`ProviderHealth`] is created by the host process and handed (as an
//! `Arc`) to every engine, so a provider that starts failing for one request
//! is deprioritised for all of them. It is the only state documents share.
//!
//! ```text
//!   Closed ──(N consecutive failures | rate limit)──▶ Open
//!     ▲                                                │
//!     │                                         cooldown elapses
//!   success                                            ▼
//!     └─────────────────────────────────────────── HalfOpen
//! ```
//!
//! Health informs routing order; it never refuses a call. See
//! [`crate::router`].

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// When to open a provider's circuit and for how long.
#[derive(Debug, Clone, Copy)]
pub struct HealthPolicy {
    /// Consecutive failures that open the circuit. Default: 5.
    pub failure_threshold: u32,
    /// How long an open circuit stays open. Default: 30 s.
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    /// Cooldown elapsed; the next call decides.
    HalfOpen,
}

/// Counters for one provider, as reported by [`ProviderHealth::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub total_successes: u64,
    pub total_failures: u64,
}

#[derive(Debug, Default)]
struct ProviderState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    total_successes: u64,
    total_failures: u64,
}

impl ProviderState {
    fn circuit(&self, now: Instant) -> CircuitState {
        match self.open_until {
            Some(until) if now < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
            None => CircuitState::Closed,
        }
    }
}

/// Shared, mutex-guarded health registry.
#[derive(Debug, Default)]
pub struct ProviderHealth {
    policy: HealthPolicy,
    states: Mutex<HashMap<String, ProviderState>>,
}

impl ProviderHealth {
    pub fn new(policy: HealthPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> HealthPolicy {
        self.policy
    }

    fn with_states<R>(&self, f: impl FnOnce(&mut HashMap<String, ProviderState>) -> R) -> R {
        // A panic while holding the lock leaves counters, not invariants, behind.
        let mut guard = self.states.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }

    pub fn state(&self, provider: &str) -> CircuitState {
        let now = Instant::now();
        self.with_states(|states| {
            states
                .get(provider)
                .map_or(CircuitState::Closed, |s| s.circuit(now))
        })
    }

    /// Closed or half-open.
    pub fn is_available(&self, provider: &str) -> bool {
        self.state(provider) != CircuitState::Open
    }

    pub fn record_success(&self, provider: &str) {
        self.with_states(|states| {
            let s = states.entry(provider.to_string()).or_default();
            if s.open_until.is_some() {
                info!(provider, "circuit closed");
            }
            s.consecutive_failures = 0;
            s.open_until = None;
            s.total_successes += 1;
        });
    }

    /// Record a failed call. A rate-limit signal opens the circuit at once.
    pub fn record_failure(&self, provider: &str, rate_limited: bool) {
        let policy = self.policy;
        let now = Instant::now();
        self.with_states(|states| {
            let s = states.entry(provider.to_string()).or_default();
            s.consecutive_failures += 1;
            s.total_failures += 1;
            let half_open = s.circuit(now) == CircuitState::HalfOpen;
            if rate_limited || half_open || s.consecutive_failures >= policy.failure_threshold {
                s.open_until = Some(now + policy.cooldown);
                warn!(
                    provider,
                    consecutive_failures = s.consecutive_failures,
                    rate_limited,
                    cooldown_secs = policy.cooldown.as_secs(),
                    "circuit opened"
                );
            }
        });
    }

    /// Per-provider counters, sorted by name.
    pub fn snapshot(&self) -> Vec<ProviderStats> {
        let now = Instant::now();
        let mut stats = self.with_states(|states| {
            states
                .iter()
                .map(|(name, s)| ProviderStats {
                    name: name.clone(),
                    state: s.circuit(now),
                    consecutive_failures: s.consecutive_failures,
                    total_successes: s.total_successes,
                    total_failures: s.total_failures,
                })
                .collect::<Vec<_>>()
        });
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: u32, cooldown_ms: u64) -> HealthPolicy {
        HealthPolicy {
            failure_threshold: threshold,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    #[test]
    fn unknown_provider_is_closed() {
        let h = ProviderHealth::default();
        assert_eq!(h.state("openai"), CircuitState::Closed);
        assert!(h.is_available("openai"));
    }

    #[test]
    fn opens_after_threshold() {
        let h = ProviderHealth::new(policy(3, 60_000));
        h.record_failure("openai", false);
        h.record_failure("openai", false);
        assert!(h.is_available("openai"));
        h.record_failure("openai", false);
        assert_eq!(h.state("openai"), CircuitState::Open);
        assert!(h.is_available("gemini"));
    }

    #[test]
    fn success_resets_the_count() {
        let h = ProviderHealth::new(policy(2, 60_000));
        h.record_failure("openai", false);
        h.record_success("openai");
        h.record_failure("openai", false);
        assert!(h.is_available("openai"));
    }

    #[test]
    fn rate_limit_opens_immediately() {
        let h = ProviderHealth::new(policy(5, 60_000));
        h.record_failure("anthropic", true);
        assert_eq!(h.state("anthropic"), CircuitState::Open);
    }

    #[test]
    fn half_open_after_cooldown() {
        let h = ProviderHealth::new(policy(1, 10));
        h.record_failure("openai", false);
        assert_eq!(h.state("openai"), CircuitState::Open);
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(h.state("openai"), CircuitState::HalfOpen);
        assert!(h.is_available("openai"));
        h.record_success("openai");
        assert_eq!(h.state("openai"), CircuitState::Closed);
    }

    #[test]
    fn snapshot_is_sorted() {
        let h = ProviderHealth::default();
        h.record_success("openai");
        h.record_failure("gemini", false);
        let snap = h.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].name, "gemini");
        assert_eq!(snap[0].total_failures, 1);
        assert_eq!(snap[1].total_successes, 1);
    }
}
