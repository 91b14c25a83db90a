use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, warn};

use crate::error::{AcmeError, AcmeResult};
use crate::resource::ResourceState;
use crate::status::Status;

/// Clock and sleeper used by the `wait_for_*` helpers.
///
/// The timer is injected so callers pick their runtime (and tests run on
/// virtual time). `sleep_until` must return [`AcmeError::Cancelled`] when
/// the caller cancels the wait; the poll loop then stops without further
/// network I/O.
#[async_trait]
pub trait PollTimer: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep_until(&self, instant: DateTime<Utc>) -> AcmeResult<()>;
}

/// Polls a resource until its status is one of `targets`.
///
/// The next poll instant is the later of now plus the session backoff and
/// the server's Retry-After, but never past the deadline. Reaching the
/// deadline on a non-target status raises [`AcmeError::RetryAfter`] with
/// that status.
pub(crate) async fn wait_for_status(
    state: &ResourceState,
    targets: &[Status],
    timeout: Duration,
    timer: &dyn PollTimer,
) -> AcmeResult<Status> {
    let backoff = ChronoDuration::from_std(state.login().session().settings().poll_backoff)
        .unwrap_or_else(|_| ChronoDuration::seconds(3));
    let timeout = ChronoDuration::from_std(timeout)
        .map_err(|_| AcmeError::InvalidState("timeout out of range".to_string()))?;
    let deadline = timer.now() + timeout;
    loop {
        let status = state.status().await?;
        if targets.contains(&status) {
            return Ok(status);
        }
        let now = timer.now();
        if now >= deadline {
            warn!("{} still {} at the polling deadline", state.kind(), status);
            return Err(AcmeError::RetryAfter {
                status,
                retry_after: state.retry_after(),
            });
        }
        let mut next = now + backoff;
        if let Some(retry_after) = state.retry_after() {
            if retry_after > next {
                next = retry_after;
            }
        }
        if next > deadline {
            next = deadline;
        }
        debug!("{} is {}, polling again at {}", state.kind(), status, next);
        timer.sleep_until(next).await?;
        state.fetch().await?;
    }
}
