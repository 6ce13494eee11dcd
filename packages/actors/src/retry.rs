//! Bounded exponential backoff around bus calls.

use std::future::Future;
use std::time::Duration;

use batchalier_core::{BusError, PublishError, RetryPolicy};

/// Run `call` until it succeeds or the policy's attempt budget is spent.
///
/// `on_retry` sees every failure that will be retried, with the attempt
/// number that failed and the delay before the next one. On success returns
/// the value and the number of attempts it took.
pub(crate) async fn with_retry<T, F, Fut, R>(
    policy: &RetryPolicy,
    mut call: F,
    mut on_retry: R,
) -> Result<(T, u32), PublishError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BusError>>,
    R: FnMut(u32, &BusError, Duration),
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match call().await {
            Ok(value) => return Ok((value, attempts)),
            Err(error) if policy.should_retry(attempts) => {
                let delay = policy.backoff(attempts);
                on_retry(attempts, &error, delay);
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                return Err(PublishError {
                    attempts,
                    last_error: error,
                });
            }
        }
    }
}
