//! Bounded retry with exponential backoff.
//!
//! [`RetryPolicy::run`] wraps any fallible async operation. The policy is
//! stateless once built, so one instance can drive many concurrent calls.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time;

use super::backoff;
use crate::config::duration_ms;
use crate::context::CallContext;
use crate::error::RpcError;

/// Decides whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&RpcError) -> bool + Send + Sync>;

/// Observes each retry before its backoff sleep: `(retry_number, error)`.
pub type RetryHook = Arc<dyn Fn(u32, &RpcError) + Send + Sync>;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_ms", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    /// Maximum delay (caps exponential growth).
    #[serde(with = "duration_ms", rename = "max_delay_ms")]
    pub max_delay: Duration,
    /// Multiplier applied to the delay on each retry; values below 1 act as 1.
    pub multiplier: f64,
    /// Random `±jitter_fraction × delay` spread; 0 keeps the schedule exact.
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter_fraction: 0.0,
        }
    }
}

/// The default retryability rule, see [`RpcError::is_retryable`].
pub fn default_retryable(err: &RpcError) -> bool {
    err.is_retryable()
}

/// Retry executor: config plus retryability predicate and retry hook.
#[derive(Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
    retryable: RetryPredicate,
    on_retry: Option<RetryHook>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retryable: Arc::new(default_retryable),
            on_retry: None,
        }
    }

    /// Replace the retryability predicate.
    pub fn with_retryable<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&RpcError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Arc::new(predicate);
        self
    }

    /// Install a hook called before every retry. It must not block.
    pub fn with_on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &RpcError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn is_retryable(&self, err: &RpcError) -> bool {
        (self.retryable)(err)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or `max_retries` retries have been spent.
    ///
    /// A non-retryable error is returned as is. Exhausting the retries yields
    /// [`RpcError::RetriesExhausted`] wrapping the last error. If `ctx`
    /// finishes during a backoff sleep, the context's error is returned.
    pub async fn run<T, F, Fut>(&self, ctx: &CallContext, mut operation: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !self.is_retryable(&err) {
                return Err(err);
            }

            if attempt >= self.config.max_retries {
                if attempt == 0 {
                    return Err(err);
                }
                tracing::error!(attempts = attempt + 1, error = %err, "max retries exceeded");
                return Err(RpcError::RetriesExhausted {
                    attempts: attempt + 1,
                    last: Box::new(err),
                });
            }

            if let Some(hook) = &self.on_retry {
                hook(attempt + 1, &err);
            }

            let delay = backoff::jittered(attempt, &self.config);
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying request"
            );

            tokio::select! {
                biased;
                done = ctx.done() => return Err(done),
                _ = time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}
