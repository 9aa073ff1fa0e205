//! Retry loop for transient upstream failures.

use std::future::Future;

use partsync_core::retry::RetryPolicy;

use crate::error::ClientError;

/// Run `op`, retrying transient failures with exponential backoff.
///
/// Non-transient errors return immediately. After the retry cap the last
/// transient error is returned and the caller handles it like any other
/// failed batch.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut retries = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && policy.should_retry(retries) => {
                let delay = policy.delay_for(retries);
                retries += 1;
                tracing::warn!(
                    label,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient inventory API failure, retrying",
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
