//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap traffic backend calls with a deadline
//! - Keep timeout errors distinct from the call's own errors
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - An expired call is dropped; the caller decides whether to retry

use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Failure of a deadline-bounded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadlineError<E> {
    /// The call did not finish within the limit.
    Elapsed(Duration),
    /// The call finished with its own error.
    Inner(E),
}

/// Run `fut`, giving up after `limit`.
pub async fn with_deadline<T, E, F>(limit: Duration, fut: F) -> Result<T, DeadlineError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::Inner(e)),
        Err(_) => Err(DeadlineError::Elapsed(limit)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_passes_through() {
        let ok: Result<u8, DeadlineError<&str>> =
            with_deadline(Duration::from_secs(1), async { Ok::<_, &str>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err: Result<u8, DeadlineError<&str>> =
            with_deadline(Duration::from_secs(1), async { Err::<u8, _>("boom") }).await;
        assert_eq!(err, Err(DeadlineError::Inner("boom")));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let limit = Duration::from_millis(20);
        let result: Result<(), DeadlineError<()>> = with_deadline(limit, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(DeadlineError::Elapsed(limit)));
    }
}
