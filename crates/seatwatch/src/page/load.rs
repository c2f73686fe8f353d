//! Waiting for a page load with a fallback timer.

use std::future::Future;
use std::time::Duration;

/// Which side of the race finished first.
#[derive(Debug, PartialEq)]
pub enum LoadOutcome<T> {
    /// The load-complete event was observed.
    Loaded(T),
    /// The fallback timer fired before the event.
    FallbackElapsed,
}

/// Waits for `load` to finish, giving up after `fallback`.
///
/// A load that never reports completion must not stall a check cycle, so
/// the caller always gets control back once `fallback` has elapsed.
pub async fn wait_for_load<F, T>(load: F, fallback: Duration) -> LoadOutcome<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        value = load => LoadOutcome::Loaded(value),
        _ = tokio::time::sleep(fallback) => LoadOutcome::FallbackElapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn test_event_before_fallback() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.send("complete");
        });

        let outcome = wait_for_load(rx, Duration::from_secs(5)).await;
        assert_eq!(outcome, LoadOutcome::Loaded(Ok("complete")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_when_event_never_fires() {
        let (_tx, rx) = oneshot::channel::<()>();
        let started = tokio::time::Instant::now();

        let outcome = wait_for_load(rx, Duration::from_secs(5)).await;

        assert_eq!(outcome, LoadOutcome::FallbackElapsed);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
