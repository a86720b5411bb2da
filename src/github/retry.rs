//! Exponential backoff retry for GitHub API requests.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;

use crate::error::GitHubError;

/// Configuration: 3 total attempts, base 1s, max 30s.
pub const MAX_ATTEMPTS: u32 = 3;
const INITIAL_INTERVAL_SECS: u64 = 1;
const MAX_INTERVAL_SECS: u64 = 30;

/// Whether retrying could change the outcome of a failed GitHub request.
///
/// Rate limits, missing repositories and auth failures are final.
pub fn is_transient(error: &GitHubError) -> bool {
    matches!(error, GitHubError::Api { .. })
}

/// Retry an async operation with exponential backoff.
///
/// `attempt` is called up to `MAX_ATTEMPTS` times while `should_retry`
/// accepts the error. A rejected error is returned as-is; when attempts run
/// out, `wrap_exhausted` converts the last error into the caller's
/// `RetriesExhausted` variant.
pub async fn retry_with_backoff<T, E, Fut, F, P, W>(
    mut attempt: F,
    should_retry: P,
    wrap_exhausted: W,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    W: FnOnce(E) -> E,
{
    let mut backoff = ExponentialBackoff {
        initial_interval: Duration::from_secs(INITIAL_INTERVAL_SECS),
        max_interval: Duration::from_secs(MAX_INTERVAL_SECS),
        max_elapsed_time: None,
        ..Default::default()
    };

    let mut attempts = 0;
    loop {
        attempts += 1;

        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) if attempts >= MAX_ATTEMPTS => return Err(wrap_exhausted(e)),
            Err(_) => {
                if let Some(wait_duration) = backoff.next_backoff() {
                    tokio::time::sleep(wait_duration).await;
                }
            }
        }
    }
}
