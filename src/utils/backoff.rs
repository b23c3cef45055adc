//! Retry helper with exponential backoff
//!
//! Shared by the producer (log appends), the transcription workers (ASR
//! reconnects) and the post-conversation jobs.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;

/// Run `operation` up to `attempts` times, sleeping between attempts with
/// exponential backoff starting at `initial` and capped at `cap`. The
/// attempt number (1-based) is passed to the operation.
pub async fn retry_with_backoff<T, F, Fut>(
    attempts: u32,
    initial: Duration,
    cap: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = initial;
    let mut attempt = 1;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                log::warn!(
                    "Attempt {}/{} failed, retrying in {:?}: {}",
                    attempt,
                    attempts,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, cap);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
