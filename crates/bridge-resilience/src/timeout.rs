//! Timeout guard for a single adapter attempt.

use bridge_core::BridgeError;
use std::future::Future;
use std::time::Duration;

/// Run `future` with a deadline.
///
/// On expiry the future is dropped, which tears down the in-flight adapter
/// call (HTTP request, SDK call or child process).
///
/// # Errors
/// Returns `BridgeError::Timeout` on expiry, or the future's own error
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, BridgeError>
where
    F: Future<Output = Result<T, BridgeError>>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| BridgeError::timeout(duration))?
}
