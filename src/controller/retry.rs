//! Retry and metrics decorator for reconcilers
//!
//! [`Instrumented`] wraps any [`Reconciler`] and re-runs the whole pass on
//! retriable errors with capped exponential backoff. Non-retriable errors
//! and cancellation surface immediately. With the `metrics` feature every
//! pass is timed and its errors, retries and actions are counted.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{error, warn};

#[cfg(feature = "metrics")]
use super::metrics;
use super::pass::PassContext;
use super::reconciler::{ReconcileOutcome, Reconciler};
use crate::error::Result;

/// Upper bound of the random jitter, as a fraction of the delay
const JITTER_RATIO: f64 = 0.2;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Attempts per pass, the first one included
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 200,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt.min(32)));
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// [`Self::backoff`] stretched by up to 20% at random
    pub fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        let factor = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
        delay + delay.mul_f64(factor)
    }
}

pub struct Instrumented<R> {
    inner: R,
    policy: RetryPolicy,
}

impl<R: Reconciler> Instrumented<R> {
    pub fn new(inner: R, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    #[cfg(feature = "metrics")]
    fn record(&self, started: Instant, result: &Result<ReconcileOutcome>) {
        let name = self.inner.name();
        metrics::observe_reconcile_duration_seconds(name, started.elapsed().as_secs_f64());
        if let Ok(outcome) = result {
            metrics::add_reconcile_actions(name, "create", outcome.created);
            metrics::add_reconcile_actions(name, "update", outcome.updated);
            metrics::add_reconcile_actions(name, "delete", outcome.deleted);
            metrics::set_desired_components(name, outcome.desired);
        }
    }

    #[cfg(not(feature = "metrics"))]
    fn record(&self, _started: Instant, _result: &Result<ReconcileOutcome>) {}
}

#[async_trait]
impl<R: Reconciler> Reconciler for Instrumented<R> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn ensure_state(&self, pass: &PassContext) -> Result<ReconcileOutcome> {
        let name = self.inner.name();
        let started = Instant::now();
        let mut attempt: u32 = 0;

        let result = loop {
            let err = match self.inner.ensure_state(pass).await {
                Ok(outcome) => break Ok(outcome),
                Err(e) => e,
            };
            #[cfg(feature = "metrics")]
            metrics::inc_reconcile_error(name, err.metric_kind());

            attempt += 1;
            if !err.is_retriable() || attempt >= self.policy.max_attempts {
                break Err(err);
            }

            let delay = self.policy.backoff_with_jitter(attempt - 1);
            warn!(
                "{} pass failed (attempt {}/{}), retrying in {:?}: {}",
                name, attempt, self.policy.max_attempts, delay, err
            );
            #[cfg(feature = "metrics")]
            metrics::inc_reconcile_retry(name);

            if let Err(cancelled) = pass.sleep(delay).await {
                break Err(cancelled);
            }
        };

        if let Err(e) = &result {
            error!("{} pass failed after {} attempt(s): {}", name, attempt, e);
        }
        self.record(started, &result);
        result
    }
}
