//! Typed entity client over any invocation transport.

use crate::entity::{StepContext, StepValue, STEP_OPERATION};
use dicesim_env::{EntityAddress, EnvError, InvocationTransport};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Bounded retry budget for transient transport failures.
///
/// Routing errors are never retried. The default budget is zero: a failed
/// step has an unknown outcome and replaying it could draw twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    pub max_retries: u32,

    /// Pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// No retries.
    pub fn none() -> Self {
        Self::default()
    }

    /// Retries up to `max_retries` times with a fixed backoff.
    pub fn bounded(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Client stub for stepping entities by address.
pub struct EntityClient<T: InvocationTransport> {
    transport: Arc<T>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl<T: InvocationTransport> EntityClient<T> {
    /// Creates a client with a 5s deadline and no retries.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }

    /// Sets the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Steps the entity at `address` once.
    ///
    /// A call that outlives the deadline fails with `EnvError::Timeout`,
    /// which is classified with `InvocationFailed` as a transport error.
    pub async fn step(
        &self,
        address: &EntityAddress,
        ctx: &StepContext,
    ) -> Result<StepValue, EnvError> {
        let payload = serde_json::to_vec(ctx)?;
        let mut attempt = 0u32;

        loop {
            let call = self
                .transport
                .invoke(address, STEP_OPERATION, payload.clone());
            let result = match tokio::time::timeout(self.timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(EnvError::Timeout(self.timeout.as_millis() as u64)),
            };

            match result {
                Ok(bytes) => return Ok(serde_json::from_slice(&bytes)?),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        address = %address,
                        round = ctx.round,
                        attempt,
                        error = %err,
                        "Retrying entity step"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
