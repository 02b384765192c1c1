// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Errors surfaced by a plan request.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Socket/transport failure — always retryable.
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Non-2xx HTTP response.  Retryable only for 429 and 5xx.
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },
    /// Malformed stream or response shape — never retryable.
    #[error("{0}")]
    Protocol(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ModelError::Network(_) => true,
            ModelError::Api { status, .. } => *status == 429 || *status >= 500,
            ModelError::Protocol(_) => false,
        }
    }
}

/// Exponential backoff policy for transient request failures.
///
/// A call is attempted `max_retries + 1` times in total; the nth retry sleeps
/// `initial × multiplier^n`, capped at `max`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max: Duration::from_secs(8),
            max_retries: 3,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay before retry number `retry` (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry as i32);
        let delay = self.initial.mul_f64(factor);
        delay.min(self.max)
    }

    /// Run `op`, retrying retryable failures up to `max_retries` times.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, ModelError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ModelError>>,
    {
        let mut retry = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && retry < self.max_retries => {
                    let delay = self.delay_for(retry);
                    warn!(
                        retry = retry + 1,
                        max = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient model request failure; backing off"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    fn api(status: u16) -> ModelError {
        ModelError::Api {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn retryable_statuses_are_429_and_5xx() {
        assert!(api(429).is_retryable());
        assert!(api(500).is_retryable());
        assert!(api(503).is_retryable());
        assert!(!api(400).is_retryable());
        assert!(!api(401).is_retryable());
        assert!(!api(404).is_retryable());
        assert!(!ModelError::Protocol("x".into()).is_retryable());
    }

    #[test]
    fn delay_sequence_doubles_and_caps() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2000));
        assert_eq!(p.delay_for(3), Duration::from_millis(4000));
        assert_eq!(p.delay_for(4), Duration::from_millis(8000));
        assert_eq!(p.delay_for(10), Duration::from_millis(8000));
    }

    /// Default intervals shrunk to keep the tests fast; the retry logic is
    /// interval-agnostic.
    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            initial: Duration::from_millis(1),
            multiplier: 2.0,
            max: Duration::from_millis(4),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn retryable_failure_is_attempted_max_retries_plus_one_times() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counted = attempts.clone();
        let policy = fast_policy();
        let result: Result<(), _> = policy
            .run(|| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(api(503))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_attempted_once() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counted = attempts.clone();
        let policy = RetryPolicy::default();
        let result: Result<(), _> = policy
            .run(|| {
                let counted = counted.clone();
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Err(api(400))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failures_returns_value() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counted = attempts.clone();
        let policy = fast_policy();
        let result = policy
            .run(|| {
                let counted = counted.clone();
                async move {
                    if counted.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(api(500))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
