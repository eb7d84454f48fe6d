//! Fail-open utilities for graceful degradation
//!
//! Use these for infrastructure side paths (activity logs, transcripts) that must
//! never take a run down with them.
//!
//! DO NOT use fail-open for:
//! - Worker calls (their failures are recorded on the round)
//! - State transitions
//! - Final-result synthesis

use std::future::Future;
use tracing::warn;

use crate::Result;

/// Execute an operation that should fail open
///
/// Logs the error via `tracing::warn!` on failure and returns `None`.
///
/// ```no_run
/// use ensemble_core::fail_open::fail_open;
/// use ensemble_core::Result;
///
/// async fn append_transcript() -> Result<()> {
///     Ok(())
/// }
///
/// async fn example() {
///     let written = fail_open("activity_logger", || append_transcript()).await;
///     assert!(written.is_some());
/// }
/// ```
pub async fn fail_open<F, Fut, T>(operation_name: &str, f: F) -> Option<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match f().await {
        Ok(val) => Some(val),
        Err(e) => {
            warn!("{} failed (fail-open): {}", operation_name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EnsembleError;

    #[tokio::test]
    async fn test_fail_open_success() {
        let result = fail_open("test_op", || async { Ok::<_, EnsembleError>(42) }).await;
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn test_fail_open_failure() {
        let result = fail_open("test_op", || async {
            Err::<i32, _>(EnsembleError::Other("disk full".to_string()))
        })
        .await;
        assert_eq!(result, None);
    }
}
