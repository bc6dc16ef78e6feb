//! Polling primitives for waiting on remote state.
//!
//! Two deliberately distinct shapes:
//!
//! - [`poll_bounded`] gives up after a fixed number of attempts and is
//!   used where the caller must convert exhaustion into a failure
//!   (agent readiness).
//! - [`poll_until`] waits forever and is used where an outer execution
//!   ceiling already bounds total time (remote command completion).
//!   Callers choosing it are opting into the unbounded wait on purpose.

use std::time::Duration;

/// Probe at a fixed interval, at most `max_attempts` times.
///
/// The probe reports `Ok(Some(value))` when the awaited condition holds,
/// `Ok(None)` to keep waiting, or `Err` to abort immediately. Returns
/// `Ok(None)` when every attempt was exhausted without the condition
/// holding; the caller decides what exhaustion means.
pub async fn poll_bounded<T, E, F>(
    interval: Duration,
    max_attempts: u32,
    mut probe: F,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    for attempt in 1..=max_attempts {
        if let Some(value) = probe()? {
            tracing::debug!(attempt, "Bounded poll condition met");
            return Ok(Some(value));
        }
        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }
    tracing::debug!(max_attempts, "Bounded poll exhausted");
    Ok(None)
}

/// Probe at a fixed interval until the condition holds. Unbounded by
/// design; pair with an outer deadline.
pub async fn poll_until<T, E, F>(interval: Duration, mut probe: F) -> Result<T, E>
where
    F: FnMut() -> Result<Option<T>, E>,
{
    loop {
        if let Some(value) = probe()? {
            return Ok(value);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    #[tokio::test(start_paused = true)]
    async fn bounded_poll_returns_value_on_success() {
        let mut calls = 0u32;
        let result: Result<Option<u32>, Infallible> =
            poll_bounded(Duration::from_secs(12), 10, || {
                calls += 1;
                Ok(if calls == 3 { Some(calls) } else { None })
            })
            .await;
        assert_eq!(result.unwrap(), Some(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_poll_exhausts_after_max_attempts() {
        let start = tokio::time::Instant::now();
        let mut calls = 0u32;
        let result: Result<Option<()>, Infallible> =
            poll_bounded(Duration::from_secs(12), 10, || {
                calls += 1;
                Ok(None)
            })
            .await;
        assert_eq!(result.unwrap(), None);
        assert_eq!(calls, 10);
        // 10 probes with 9 intervening sleeps of 12s, a ~120s ceiling.
        assert_eq!(start.elapsed(), Duration::from_secs(108));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_poll_propagates_probe_error() {
        let result: Result<Option<()>, &str> =
            poll_bounded(Duration::from_secs(1), 5, || Err("registry down")).await;
        assert_eq!(result.unwrap_err(), "registry down");
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_poll_waits_past_bounded_limits() {
        let mut calls = 0u32;
        let result: Result<u32, Infallible> = poll_until(Duration::from_secs(10), || {
            calls += 1;
            Ok(if calls == 50 { Some(calls) } else { None })
        })
        .await;
        assert_eq!(result.unwrap(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_poll_propagates_probe_error() {
        let result: Result<(), &str> =
            poll_until(Duration::from_secs(10), || Err("channel gone")).await;
        assert_eq!(result.unwrap_err(), "channel gone");
    }
}
