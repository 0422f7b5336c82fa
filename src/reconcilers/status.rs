//! Optimistic-concurrency update helpers
//!
//! Every write that mutates an existing object goes through a read, mutate,
//! conditional-write cycle. A conflict means someone else wrote the object
//! after our read, so the cycle is repeated against a fresh read, up to the
//! [`RetryPolicy`] budget.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::crd::{CommandRequest, CommandRequestStatus};
use crate::error::Result;
use crate::metrics;
use crate::store::{ObjectKey, ObjectStore};

/// Bounded backoff for conflict retries
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub steps: u32,
    /// Delay before the first retry
    pub delay: Duration,
    /// Multiplier applied to the delay after each retry
    pub factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            steps: 5,
            delay: Duration::from_millis(10),
            factor: 1.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(steps: u32, delay: Duration) -> Self {
        Self {
            steps,
            delay,
            ..Self::default()
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        current.mul_f64(self.factor.max(1.0))
    }
}

/// Run `attempt` until it succeeds, fails with a non-conflict error, or the
/// retry budget is spent; in the last case the final conflict is returned
pub async fn retry_on_conflict<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let steps = policy.steps.max(1);
    let mut delay = policy.delay;
    let mut step = 1;

    loop {
        match attempt().await {
            Err(e) if e.is_conflict() => {
                metrics::STATUS_UPDATE_CONFLICTS.inc();
                if step >= steps {
                    warn!(steps, error = %e, "Conflict retries exhausted");
                    return Err(e);
                }
                debug!(step, error = %e, "Write conflicted, retrying with a fresh read");
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
                step += 1;
            }
            result => return result,
        }
    }
}

/// Re-read the object and apply `mutate` to its status before each write
///
/// Returns `Ok(None)` if the object no longer exists.
pub async fn update_status_with_retry<F>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    policy: &RetryPolicy,
    mutate: F,
) -> Result<Option<CommandRequest>>
where
    F: Fn(&mut CommandRequestStatus) + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(policy, || async move {
        let Some(mut obj) = store.get(key).await? else {
            return Ok(None);
        };
        mutate(obj.status_mut());
        store.update_status(&obj).await.map(Some)
    })
    .await
}

/// Re-read the object and apply `mutate` to it before each metadata/spec write
///
/// `mutate` returns false when the fresh object needs no write.
pub async fn update_with_retry<F>(
    store: &dyn ObjectStore,
    key: &ObjectKey,
    policy: &RetryPolicy,
    mutate: F,
) -> Result<Option<CommandRequest>>
where
    F: Fn(&mut CommandRequest) -> bool + Send + Sync,
{
    let mutate = &mutate;
    retry_on_conflict(policy, || async move {
        let Some(mut obj) = store.get(key).await? else {
            return Ok(None);
        };
        if !mutate(&mut obj) {
            return Ok(Some(obj));
        }
        store.update(&obj).await.map(Some)
    })
    .await
}
