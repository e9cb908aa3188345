//! Linear retry-delay policy with one independent state per retry domain.
//!
//! A [`Backoff`] never inspects responses: callers report outcomes through
//! [`Backoff::record_failure`] and [`Backoff::record_success`] and ask for the
//! delay to apply before the next attempt. The delay grows linearly with the
//! number of consecutive failures, `ceiling * attempt / step_budget`, and the
//! domain is exhausted once `attempt` exceeds `step_budget`.
//!
//! [`BackoffRegistry`] maps retry-domain keys (a feed name, a concrete route)
//! to their own [`Backoff`], so a struggling route never inflates the delay of
//! an unrelated one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::{ModCrawlError, Result};

/// Retry-delay state for a single retry domain.
#[derive(Debug)]
pub struct Backoff {
    domain: String,
    ceiling: Duration,
    step_budget: u32,
    attempt: Mutex<u32>,
}

impl Backoff {
    /// Create a backoff reaching `ceiling` after `step_budget` failures.
    ///
    /// A zero step budget is treated as one.
    pub fn new(domain: impl Into<String>, ceiling: Duration, step_budget: u32) -> Self {
        Self {
            domain: domain.into(),
            ceiling,
            step_budget: step_budget.max(1),
            attempt: Mutex::new(0),
        }
    }

    /// Name of the retry domain this state belongs to.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Maximum delay, reached when `attempt == step_budget`.
    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Number of failures tolerated before the domain is exhausted.
    pub fn step_budget(&self) -> u32 {
        self.step_budget
    }

    /// Consecutive failures recorded since the last success.
    pub fn attempt(&self) -> u32 {
        *self.lock()
    }

    /// Record a capacity failure (e.g. a rate-limit response).
    pub fn record_failure(&self) {
        let mut attempt = self.lock();
        *attempt = attempt.saturating_add(1);
    }

    /// Record a success, resetting the attempt counter.
    pub fn record_success(&self) {
        *self.lock() = 0;
    }

    /// Delay to wait before the next attempt.
    ///
    /// Fails with [`ModCrawlError::BackoffExhausted`] once the attempt
    /// counter exceeds the step budget.
    pub fn next_delay(&self) -> Result<Duration> {
        let attempt = self.attempt();
        if attempt > self.step_budget {
            return Err(ModCrawlError::BackoffExhausted {
                domain: self.domain.clone(),
                attempts: attempt,
            });
        }

        let nanos = self.ceiling.as_nanos() * u128::from(attempt) / u128::from(self.step_budget);
        Ok(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u32> {
        // A poisoned counter is still a valid counter.
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Explicit map from retry-domain key to its owned [`Backoff`].
///
/// Domains are created lazily with the registry's ceiling and step budget.
#[derive(Debug)]
pub struct BackoffRegistry {
    ceiling: Duration,
    step_budget: u32,
    domains: Mutex<HashMap<String, Arc<Backoff>>>,
}

impl BackoffRegistry {
    /// Create an empty registry whose domains share the given policy.
    pub fn new(ceiling: Duration, step_budget: u32) -> Self {
        Self {
            ceiling,
            step_budget,
            domains: Mutex::new(HashMap::new()),
        }
    }

    /// Get the backoff for `key`, creating it on first use.
    pub fn domain(&self, key: &str) -> Arc<Backoff> {
        let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(domains.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Backoff::new(key, self.ceiling, self.step_budget))
        }))
    }

    /// Forget `key` if its domain has settled (no outstanding failures).
    ///
    /// Returns `true` when the entry was removed.
    pub fn release(&self, key: &str) -> bool {
        let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);
        match domains.get(key) {
            Some(backoff) if backoff.attempt() == 0 => {
                domains.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Number of domains currently tracked.
    pub fn len(&self) -> usize {
        self.domains
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no domain is currently tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
