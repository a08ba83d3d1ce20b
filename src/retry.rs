//! Transient-error retry with exponential backoff and full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::SalvoError;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Outcome of a retried operation: the value plus how many retries it took
/// and the kinds of transient errors swallowed along the way.
pub struct RetryOutcome<T> {
    pub value: T,
    pub retries_used: u32,
    pub transient_kinds: Vec<&'static str>,
}

/// Run `make_attempt` until it succeeds, retrying only transient errors with
/// exponential backoff (base 500 ms, cap 30 s) and full jitter. Non-transient
/// errors and exhaustion propagate the last error.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    mut make_attempt: F,
) -> Result<RetryOutcome<T>, SalvoError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SalvoError>>,
{
    let mut retries_used = 0;
    let mut transient_kinds = Vec::new();

    for attempt in 0..=max_retries {
        match make_attempt().await {
            Ok(value) => {
                return Ok(RetryOutcome {
                    value,
                    retries_used,
                    transient_kinds,
                })
            }
            Err(err) => {
                let last = attempt == max_retries;
                if !err.is_transient() || last {
                    return Err(err);
                }
                retries_used += 1;
                transient_kinds.push(err.kind());

                let ceiling = BASE_DELAY_MS.saturating_mul(1 << attempt).min(MAX_DELAY_MS);
                let jittered = rand::thread_rng().gen_range(0..=ceiling);
                tracing::debug!(
                    attempt = attempt + 1,
                    delay_ms = jittered,
                    error = %err,
                    "transient error, backing off"
                );
                tokio::time::sleep(Duration::from_millis(jittered)).await;
            }
        }
    }

    unreachable!("retry loop always returns")
}
