//! Bounded retry for authoritative fetches

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{FetchError, FetchFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    /// Bound on each attempt
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based): base * 2^retry
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(retry))
    }
}

impl From<&AgentConfig> for RetryPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_attempts: config.fetch_max_attempts.max(1),
            base_backoff: config.backoff_duration(0),
            attempt_timeout: config.fetch_timeout(),
        }
    }
}

/// Run `op` until it succeeds, a non-transient error occurs, or the attempt
/// budget is spent. Each attempt is bounded by the policy timeout.
///
/// The failure keeps the last [`FetchError`] so callers can tell a bad
/// payload or bad credentials apart from an unreachable authority.
pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
) -> Result<T, FetchFailure>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                elapsed_ms: policy.attempt_timeout.as_millis() as u64,
            }),
        };

        let err = match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Fetched {} on attempt {}", what, attempt);
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !err.is_transient() || attempt >= policy.max_attempts {
            return Err(FetchFailure {
                what: what.to_string(),
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.backoff(attempt - 1);
        warn!(
            "Fetching {} failed (attempt {}/{}), retrying in {:?}: {}",
            what, attempt, policy.max_attempts, delay, err
        );
        tokio::time::sleep(delay).await;
    }
}
