//! Retry with exponential backoff and jitter.
//!
//! Only errors the caller classifies as transient are retried; anything
//! else is returned on the first occurrence.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use tierform_core::config::ProvisioningConfig;

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (0 = unlimited).
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn from_config(config: &ProvisioningConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_backoff(),
            max_delay: config.max_backoff(),
            ..Default::default()
        }
    }

    /// Delays small enough for tests.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
        }
    }
}

/// Run `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or `max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    is_transient: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !is_transient(&e) => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt,
                        error = %e,
                        "operation still failing after max attempts"
                    );
                    return Err(e);
                }

                // 0.5x to 1.5x of the nominal delay.
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = jittered.as_millis() as u64,
                    "transient failure, retrying"
                );

                tokio::time::sleep(jittered).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
