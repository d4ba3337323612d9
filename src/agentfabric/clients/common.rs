//! Shared utilities used across provider client implementations.
//!
//! The helpers in this module wrap a [`ClientWrapper`] call with the crate's
//! standard resilience policy: a per-call deadline, bounded retries for
//! retryable error kinds, and exponential backoff with jitter.
//!
//! # Retry policy
//!
//! Up to [`MAX_RETRY_ATTEMPTS`] attempts.  After a retryable failure the
//! caller sleeps `2^k` seconds (attempt `k`, zero-based), capped at
//! [`BACKOFF_CAP`], with a deterministic ±30 % jitter derived from a
//! splitmix64 hash of the attempt counter and wall clock.  Non-retryable
//! kinds (`authentication`, `invalid_request`, `model_not_found`, `unknown`)
//! fail immediately.

use crate::agentfabric::client_wrapper::{
    ClientWrapper, CompletionRequest, CompletionResponse, LLMError, LLMErrorKind,
    StructuredResponse,
};
use std::time::Duration;

/// Per-call deadline applied around every provider round-trip.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum number of attempts (first call + retries).
pub const MAX_RETRY_ATTEMPTS: usize = 5;

/// Ceiling for a single backoff sleep.
pub const BACKOFF_CAP: Duration = Duration::from_secs(32);

// splitmix64; good enough entropy for jitter without pulling in a RNG crate.
pub(crate) fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Backoff for zero-based attempt `k`: `2^k` seconds capped at
/// [`BACKOFF_CAP`], jittered into `[0.7x, 1.3x]` by `seed`.
pub fn backoff_delay(attempt: usize, seed: u64) -> Duration {
    let base = Duration::from_secs(1 << attempt.min(5));
    let base = base.min(BACKOFF_CAP);
    // Map the hash onto [0.7, 1.3).
    let unit = (splitmix64(seed ^ attempt as u64) >> 11) as f64 / (1u64 << 53) as f64;
    let factor = 0.7 + 0.6 * unit;
    base.mul_f64(factor)
}

fn jitter_seed() -> u64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_nanos() as u64,
        Err(_) => 0,
    }
}

async fn with_deadline<T, F>(future: F) -> Result<T, LLMError>
where
    F: std::future::Future<Output = Result<T, LLMError>>,
{
    match tokio::time::timeout(DEFAULT_CALL_TIMEOUT, future).await {
        Ok(result) => result,
        Err(_) => Err(LLMError::new(
            LLMErrorKind::Timeout,
            format!("provider call exceeded {:?} deadline", DEFAULT_CALL_TIMEOUT),
        )),
    }
}

/// [`ClientWrapper::create_completion`] wrapped in the standard deadline and
/// retry policy.
pub async fn send_with_retry(
    client: &dyn ClientWrapper,
    request: CompletionRequest,
) -> Result<CompletionResponse, LLMError> {
    let mut last_error = None;
    for attempt in 0..MAX_RETRY_ATTEMPTS {
        match with_deadline(client.create_completion(request.clone())).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                if !err.is_retryable() || attempt + 1 == MAX_RETRY_ATTEMPTS {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, jitter_seed());
                log::warn!(
                    "retryable llm error on attempt {}/{} ({}), backing off {:?}",
                    attempt + 1,
                    MAX_RETRY_ATTEMPTS,
                    err,
                    delay
                );
                last_error = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| LLMError::new(LLMErrorKind::Unknown, "retry loop exhausted")))
}

/// [`ClientWrapper::create_structured`] wrapped in the standard deadline and
/// retry policy.
pub async fn send_structured_with_retry(
    client: &dyn ClientWrapper,
    request: CompletionRequest,
    response_schema: serde_json::Value,
    strict_schema: bool,
) -> Result<StructuredResponse, LLMError> {
    let mut last_error = None;
    for attempt in 0..MAX_RETRY_ATTEMPTS {
        let call = client.create_structured(
            request.clone(),
            response_schema.clone(),
            strict_schema,
        );
        match with_deadline(call).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                if !err.is_retryable() || attempt + 1 == MAX_RETRY_ATTEMPTS {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, jitter_seed());
                log::warn!(
                    "retryable llm error on attempt {}/{} ({}), backing off {:?}",
                    attempt + 1,
                    MAX_RETRY_ATTEMPTS,
                    err,
                    delay
                );
                last_error = Some(err);
                tokio::time::sleep(delay).await;
            }
        }
    }
    Err(last_error.unwrap_or_else(|| LLMError::new(LLMErrorKind::Unknown, "retry loop exhausted")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        for seed in 0..16u64 {
            let d0 = backoff_delay(0, seed);
            let d3 = backoff_delay(3, seed);
            let d9 = backoff_delay(9, seed);
            assert!(d0 >= Duration::from_millis(700) && d0 <= Duration::from_millis(1300));
            assert!(d3 >= Duration::from_millis(5600) && d3 <= Duration::from_millis(10_400));
            // Past the cap every delay stays within 32s +/- 30%.
            assert!(d9 <= Duration::from_secs(42));
        }
    }

    #[test]
    fn test_backoff_is_deterministic_for_a_seed() {
        assert_eq!(backoff_delay(2, 1234), backoff_delay(2, 1234));
    }

    #[test]
    fn test_splitmix_spreads_bits() {
        assert_ne!(splitmix64(1), splitmix64(2));
        assert_ne!(splitmix64(0), 0);
    }
}
