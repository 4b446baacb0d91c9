//! Retry strategies wrapping a single call attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use keel_common::config::RetryConfig;
use keel_common::protocol::error::Result;
use keel_common::protocol::{CallResponse, KeelError};

/// Policy re-invoking a failing call before giving up.
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    /// Invoke once and propagate whatever happens.
    No,
    /// Invoke up to `max_attempts` times total, sleeping `interval` between
    /// attempts; the last error propagates.
    FixedInterval {
        interval: Duration,
        max_attempts: u32,
    },
}

impl RetryPolicy {
    /// Resolves a configured strategy name.
    pub fn by_name(name: &str, config: &RetryConfig) -> Result<Self> {
        match name {
            "no" => Ok(RetryPolicy::No),
            "fixed_interval" => Ok(RetryPolicy::FixedInterval {
                interval: Duration::from_millis(config.interval_ms),
                max_attempts: config.max_attempts.max(1),
            }),
            other => Err(KeelError::UnknownStrategy(format!("retry: {}", other))),
        }
    }

    /// Drives the attempt closure under this policy.
    pub async fn execute<F, Fut>(&self, mut op: F) -> Result<CallResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<CallResponse>>,
    {
        match self {
            RetryPolicy::No => op().await,
            RetryPolicy::FixedInterval {
                interval,
                max_attempts,
            } => {
                let mut attempt = 1;
                loop {
                    match op().await {
                        Ok(response) => return Ok(response),
                        Err(e) if attempt < *max_attempts => {
                            warn!(
                                "call attempt {}/{} failed: {}, retrying in {:?}",
                                attempt, max_attempts, e, interval
                            );
                            tokio::time::sleep(*interval).await;
                            attempt += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}
