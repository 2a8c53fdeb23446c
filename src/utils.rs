use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use ethers::types::U256;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::logging::Phase;
use crate::types::DispatchAttempt;

/// Fixed-interval retry bound for one settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_secs(5) }
    }
}

/// What one attempt of a classified operation produced.
#[derive(Debug)]
pub enum Attempt<T, E> {
    /// Finished, successfully or terminally; do not retry.
    Done(T),
    /// Worth another try after the backoff.
    Retry(E),
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Done { value: T, attempts: u32 },
    Exhausted { last_error: E, attempts: u32 },
    /// Shutdown was requested before the next attempt could start.
    /// `last_error` is `None` when no attempt ran at all.
    Cancelled { last_error: Option<E>, attempts: u32 },
}

/// Runs `operation` for `event_id` until it returns `Attempt::Done` or
/// `policy.max_attempts` is reached. Attempts are strictly sequential. Once
/// `shutdown` fires no new attempt starts, and a backoff wait in progress ends
/// early; an attempt already running is left to finish.
pub async fn retry_classified<F, Fut, T, E>(
    policy: RetryPolicy,
    event_id: U256,
    shutdown: &CancellationToken,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
    E: Display,
{
    let mut attempt = DispatchAttempt::new(event_id, policy.max_attempts.max(1));
    let mut last_error = None;
    loop {
        if shutdown.is_cancelled() {
            return RetryResult::Cancelled { last_error, attempts: attempt.attempt_number };
        }
        attempt.advance();
        let error = match operation(attempt.attempt_number).await {
            Attempt::Done(value) => return RetryResult::Done { value, attempts: attempt.attempt_number },
            Attempt::Retry(error) => error,
        };
        attempt.record_error(&error);
        if attempt.is_last() {
            return RetryResult::Exhausted { last_error: error, attempts: attempt.attempt_number };
        }
        warn!(
            phase = %Phase::Wait,
            "bountyId={} attempt {}/{} failed ({}), retrying in {}s",
            attempt.event_id,
            attempt.attempt_number,
            attempt.max_attempts,
            attempt.last_error.as_deref().unwrap_or_default(),
            policy.backoff.as_secs()
        );
        last_error = Some(error);
        // a cancelled wait is caught by the check at the top of the loop
        sleep_or_cancel(policy.backoff, shutdown).await;
    }
}

/// Sleeps for `duration`. Returns false if `shutdown` fired first.
pub async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = sleep(duration) => true,
    }
}
