//! Polling until an asynchronously created resource becomes usable.

use std::{future::Future, time::Duration};

use anyhow::Result;
use backon::{ConstantBuilder, Retryable};

use crate::cloud::ResourceState;

/// Default interval between two state checks.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of state checks, about five minutes at the default interval.
const DEFAULT_MAX_ATTEMPTS: usize = 60;

/// Marker error for a resource that is still pending.
#[derive(Debug, thiserror::Error)]
#[error("{0} is not ready yet")]
struct NotReady(String);

/// Bounded constant-interval poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub interval: Duration,
    pub max_attempts: usize,
}

impl Default for Waiter {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl Waiter {
    /// A waiter that polls without pausing, for tests.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts,
        }
    }

    /// Poll `check` until it reports [`ResourceState::Ready`].
    ///
    /// A [`ResourceState::Failed`] state or a failing check aborts at once;
    /// only pending states are retried.
    pub async fn until_ready<F, Fut>(&self, name: &str, mut check: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ResourceState>>,
    {
        let poll = || {
            let state = check();
            async move {
                match state.await? {
                    ResourceState::Ready => Ok(()),
                    ResourceState::Pending => Err(NotReady(name.to_string()).into()),
                    ResourceState::Failed => {
                        anyhow::bail!("{} entered a failed state", name)
                    }
                }
            }
        };

        let backoff = ConstantBuilder::default()
            .with_delay(self.interval)
            .with_max_times(self.max_attempts.saturating_sub(1));

        poll.retry(backoff)
            .when(|err: &anyhow::Error| err.is::<NotReady>())
            .notify(|_, delay| {
                tracing::debug!(resource = %name, ?delay, "Resource not ready, polling again");
            })
            .await
            .map_err(|err| {
                if err.is::<NotReady>() {
                    anyhow::anyhow!(
                        "Timeout waiting for {} to be ready after {} checks",
                        name,
                        self.max_attempts
                    )
                } else {
                    err
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_ready_after_pending_polls() {
        let polls = Cell::new(0);
        Waiter::immediate(5)
            .until_ready("table", || {
                polls.set(polls.get() + 1);
                let state = if polls.get() < 3 {
                    ResourceState::Pending
                } else {
                    ResourceState::Ready
                };
                async move { Ok(state) }
            })
            .await
            .unwrap();
        assert_eq!(polls.get(), 3);
    }

    #[tokio::test]
    async fn test_times_out_after_max_attempts() {
        let polls = Cell::new(0);
        let err = Waiter::immediate(4)
            .until_ready("function", || {
                polls.set(polls.get() + 1);
                async { Ok(ResourceState::Pending) }
            })
            .await
            .unwrap_err();
        assert_eq!(polls.get(), 4);
        assert!(err.to_string().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_failed_state_is_not_retried() {
        let polls = Cell::new(0);
        let err = Waiter::immediate(10)
            .until_ready("function", || {
                polls.set(polls.get() + 1);
                async { Ok(ResourceState::Failed) }
            })
            .await
            .unwrap_err();
        assert_eq!(polls.get(), 1);
        assert!(err.to_string().contains("failed state"));
    }
}
