//! Retry wrapper for stores with transient failures.

use async_trait::async_trait;
use codecast_proto::{EventStore, StoreEntry, StoreError, StorePath, ValueStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff policy for transient store errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first. Zero is treated as one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(20);
        let ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.delay_for(attempt);
                    debug!(op = op_name, attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying store operation");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!(op = op_name, attempts, error = %e, "Store operation failed after retries");
                    }
                    return Err(e);
                }
            }
        }
    }
}

/// Wraps a store and retries transient failures of point operations.
///
/// Subscriptions are passed through untouched.
pub struct RetryingStore<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S: EventStore> RetryingStore<S> {
    pub fn new(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: EventStore> EventStore for RetryingStore<S> {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let inner = &self.inner;
        self.policy
            .run("set", move || inner.set(path, value.clone()))
            .await
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        let inner = &self.inner;
        self.policy.run("get", move || inner.get(path)).await
    }

    async fn children(&self, path: &StorePath) -> Result<Vec<StoreEntry>, StoreError> {
        let inner = &self.inner;
        self.policy
            .run("children", move || inner.children(path))
            .await
    }

    fn subscribe(&self, path: &StorePath) -> ValueStream {
        self.inner.subscribe(path)
    }
}
