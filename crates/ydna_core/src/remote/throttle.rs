//! Request spacing and retry for remote family fetches.
//!
//! # Responsibility
//! - Keep a minimum delay between consecutive remote requests.
//! - Retry rate-limit and network failures with exponential backoff.
//!
//! # Invariants
//! - Non-retryable errors are returned after a single attempt.
//! - Attempts per fetch never exceed `RetryPolicy::max_attempts`.

use super::{FamilyListing, RemoteError, RemoteGraph};
use log::{info, warn};
use std::time::{Duration, Instant};

/// Clock and sleep source for the throttle.
///
/// Tests substitute a virtual clock so retries run instantly.
pub trait Pacer {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

/// Wall-clock pacer backed by `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPacer;

impl Pacer for SystemPacer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Spacing and retry limits applied to each remote fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(3),
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based): base * 2^(retry-1), capped.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        delay.min(self.backoff_max)
    }

    fn delay_after(&self, error: &RemoteError, retry: u32) -> Duration {
        let backoff = self.backoff_for(retry);
        match error {
            RemoteError::RateLimited {
                retry_after: Some(hint),
            } => backoff.max(*hint),
            _ => backoff,
        }
    }
}

/// Counters for one throttled client.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    /// Requests actually sent, retries included.
    pub requests: u64,
    pub retries: u64,
    /// Fetches that ended in an error after all attempts.
    pub failures: u64,
}

/// Wraps a `RemoteGraph` with minimum spacing and retry.
pub struct ThrottledGraph<G, P = SystemPacer> {
    inner: G,
    pacer: P,
    policy: RetryPolicy,
    last_request: Option<Instant>,
    stats: FetchStats,
}

impl<G: RemoteGraph> ThrottledGraph<G, SystemPacer> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self::with_pacer(inner, policy, SystemPacer)
    }
}

impl<G: RemoteGraph, P: Pacer> ThrottledGraph<G, P> {
    pub fn with_pacer(inner: G, policy: RetryPolicy, pacer: P) -> Self {
        Self {
            inner,
            pacer,
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            last_request: None,
            stats: FetchStats::default(),
        }
    }

    pub fn stats(&self) -> FetchStats {
        self.stats
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    fn wait_turn(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = self.pacer.now().saturating_duration_since(last);
            if elapsed < self.policy.min_interval {
                self.pacer.sleep(self.policy.min_interval - elapsed);
            }
        }
        self.last_request = Some(self.pacer.now());
    }
}

impl<G: RemoteGraph, P: Pacer> RemoteGraph for ThrottledGraph<G, P> {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        let mut attempt = 1;
        loop {
            self.wait_turn();
            self.stats.requests += 1;

            match self.inner.get_family(profile_id) {
                Ok(listing) => {
                    if attempt > 1 {
                        info!(
                            "event=remote_fetch module=remote status=recovered profile_id={} attempts={}",
                            profile_id, attempt
                        );
                    }
                    return Ok(listing);
                }
                Err(err) if err.is_retryable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(&err, attempt);
                    warn!(
                        "event=remote_fetch module=remote status=retry profile_id={} kind={} attempt={} delay_ms={}",
                        profile_id,
                        err.kind(),
                        attempt,
                        delay.as_millis()
                    );
                    self.pacer.sleep(delay);
                    self.stats.retries += 1;
                    attempt += 1;
                }
                Err(err) => {
                    self.stats.failures += 1;
                    warn!(
                        "event=remote_fetch module=remote status=error profile_id={} kind={} attempts={}",
                        profile_id,
                        err.kind(),
                        attempt
                    );
                    return Err(err);
                }
            }
        }
    }
}
