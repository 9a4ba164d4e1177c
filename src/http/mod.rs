// Shared HTTP plumbing for the Ollama clients

#[cfg(test)]
mod tests;

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Build a ureq agent with a global timeout covering connect, send and read
#[inline]
pub fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Whether an error from ureq is worth another attempt
#[inline]
pub fn is_retryable(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

/// Backoff before the attempt following `attempt` (1-based)
#[inline]
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(EXPONENTIAL_BACKOFF_BASE.pow(attempt.saturating_sub(1)) as u32)
}

/// Build a ureq agent whose per-request timeout never exceeds `budget`
#[inline]
pub fn build_budgeted_agent(timeout: Duration, budget: Option<Duration>) -> ureq::Agent {
    build_agent(budget.map_or(timeout, |budget| timeout.min(budget)))
}

/// Run `request_fn` until it succeeds, a non-retryable error occurs,
/// `attempts` is exhausted or `deadline` would pass before the next
/// attempt. Client errors (4xx) are never retried.
#[inline]
pub fn request_with_retry<F>(
    target: &str,
    attempts: u32,
    backoff_base: Duration,
    deadline: Option<Instant>,
    mut request_fn: F,
) -> Result<String>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, attempts, target);

        match request_fn() {
            Ok(response_text) => {
                debug!("Request succeeded on attempt {}", attempt);
                return Ok(response_text);
            }
            Err(error) => {
                if let ureq::Error::StatusCode(status) = &error {
                    if *status < 500 {
                        warn!("Client error (status {}), not retrying", status);
                        return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                    }
                }

                if !is_retryable(&error) {
                    warn!("Non-retryable error: {}", error);
                    return Err(anyhow::anyhow!("Non-retryable error: {}", error));
                }

                warn!(
                    "Retryable error: {}, attempt {}/{}",
                    error, attempt, attempts
                );
                last_error = Some(anyhow::anyhow!("Request error: {}", error));

                if attempt < attempts {
                    let delay = backoff_delay(attempt, backoff_base);
                    if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
                        warn!("No time left to retry {} before the deadline", target);
                        break;
                    }
                    debug!("Waiting {:?} before retry", delay);
                    std::thread::sleep(delay);
                }
            }
        }
    }

    error!("All retry attempts failed for request to {}", target);

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}
