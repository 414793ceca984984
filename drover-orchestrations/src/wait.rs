//! Readiness waiting over a stream of observed resource states
//!
//! Callers supply the observations (a watch stream for live resources, a
//! plain iterator in tests) and a readiness predicate. The predicate runs on
//! each observed change rather than on a timer.

use std::fmt;
use std::time::Duration;

use futures::{Stream, StreamExt};
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::context::ExecContext;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("timed out after {waited:?} waiting for {target}")]
    Timeout { target: String, waited: Duration },

    #[error("cancelled while waiting for {target}")]
    Cancelled { target: String },

    #[error("watch for {target} failed: {message}")]
    Watch { target: String, message: String },

    #[error("watch for {target} closed before it became ready")]
    Closed { target: String },
}

/// Wait until `is_ready` accepts an observed state of `target`
///
/// `Ok(None)` observations mean the resource is absent and are skipped. The
/// wait ends at `max_wait` or the scope deadline, whichever comes first.
pub async fn wait_for_ready<T, E, S, P>(
    ctx: &ExecContext,
    target: &str,
    max_wait: Duration,
    observations: S,
    is_ready: P,
) -> Result<T, WaitError>
where
    S: Stream<Item = Result<Option<T>, E>>,
    E: fmt::Display,
    P: Fn(&T) -> bool,
{
    let started = Instant::now();
    let deadline = effective_deadline(ctx, started + max_wait);
    tokio::pin!(observations);

    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(WaitError::Cancelled { target: target.to_string() });
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(WaitError::Timeout {
                    target: target.to_string(),
                    waited: started.elapsed(),
                });
            }
            next = observations.next() => match next {
                Some(Ok(Some(state))) => {
                    if is_ready(&state) {
                        debug!(resource = %target, elapsed_ms = started.elapsed().as_millis(), "Resource ready");
                        return Ok(state);
                    }
                    debug!(resource = %target, "Resource observed, not ready yet");
                }
                Some(Ok(None)) => {
                    debug!(resource = %target, "Resource absent, waiting");
                }
                Some(Err(e)) => {
                    return Err(WaitError::Watch {
                        target: target.to_string(),
                        message: e.to_string(),
                    });
                }
                None => {
                    return Err(WaitError::Closed { target: target.to_string() });
                }
            }
        }
    }
}

fn effective_deadline(ctx: &ExecContext, candidate: Instant) -> Instant {
    match ctx.deadline() {
        Some(scope_deadline) if scope_deadline < candidate => scope_deadline,
        _ => candidate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[derive(Debug, Clone, PartialEq)]
    struct Observed {
        ready: bool,
        generation: u32,
    }

    fn observed(ready: bool, generation: u32) -> Result<Option<Observed>, String> {
        Ok(Some(Observed { ready, generation }))
    }

    #[tokio::test]
    async fn test_returns_first_ready_state() {
        let ctx = ExecContext::root("test");
        let states = stream::iter(vec![
            Ok(None),
            observed(false, 1),
            observed(true, 2),
            observed(true, 3),
        ]);

        let ready = wait_for_ready(&ctx, "pg1", Duration::from_secs(5), states, |s| s.ready)
            .await
            .unwrap();
        assert_eq!(ready.generation, 2);
    }

    #[tokio::test]
    async fn test_times_out_on_max_wait() {
        let ctx = ExecContext::root("test");
        let states = stream::iter(vec![observed(false, 1)]).chain(stream::pending());

        let err = wait_for_ready(&ctx, "pg1", Duration::from_millis(20), states, |s| s.ready)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_scope_deadline_wins_over_max_wait() {
        let ctx = ExecContext::root("test").with_timeout("short", Duration::from_millis(20));
        let states = stream::pending::<Result<Option<Observed>, String>>();

        let started = Instant::now();
        let err = wait_for_ready(&ctx, "pg1", Duration::from_secs(60), states, |s| s.ready)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled_scope() {
        let ctx = ExecContext::root("test");
        ctx.cancel();
        let states = stream::pending::<Result<Option<Observed>, String>>();

        let err = wait_for_ready(&ctx, "pg1", Duration::from_secs(60), states, |s| s.ready)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_watch_error_and_closed_stream() {
        let ctx = ExecContext::root("test");

        let failing = stream::iter(vec![Err::<Option<Observed>, _>("410 Gone".to_string())]);
        let err = wait_for_ready(&ctx, "pg1", Duration::from_secs(5), failing, |s| s.ready)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "watch for pg1 failed: 410 Gone");

        let closed = stream::iter(vec![observed(false, 1)]);
        let err = wait_for_ready(&ctx, "pg1", Duration::from_secs(5), closed, |s| s.ready)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitError::Closed { .. }));
    }
}
