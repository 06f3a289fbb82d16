//! Bounded timeouts for store calls.
//!
//! Every store call the engine issues from a background pass is wrapped in
//! a bounded timeout; a timed-out item is logged and retried on the next
//! tick, never treated as fatal to the pass.

use eventline_core::store::RecordStoreError;
use std::future::Future;
use std::time::Duration;

/// Run a store-backed future with a deadline.
///
/// # Errors
///
/// Returns [`RecordStoreError::Timeout`] when `limit` elapses first;
/// otherwise passes the inner result through.
pub async fn with_timeout<T, Fut>(limit: Duration, future: Fut) -> Result<T, RecordStoreError>
where
    Fut: Future<Output = Result<T, RecordStoreError>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_elapsed) => Err(RecordStoreError::Timeout(limit)),
    }
}
