use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use thiserror::Error;

use mail::SaveError;
use services::config;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_DELAY_MS: u64 = 2000;

/// How often and how patiently a transient failure is retried.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. At least 1.
    pub attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            delay: Duration::from_millis(DEFAULT_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Reads `SAVE_RETRY_ATTEMPTS` and `SAVE_RETRY_DELAY_MS`, falling back to 3 attempts 2 s apart.
    ///
    pub fn from_config() -> Self {
        Self {
            attempts: config().get_parsed_or("SAVE_RETRY_ATTEMPTS", DEFAULT_ATTEMPTS).max(1),
            delay: Duration::from_millis(config().get_parsed_or("SAVE_RETRY_DELAY_MS", DEFAULT_DELAY_MS)),
        }
    }

    /// Runs `operation` until it succeeds, fails permanently, or the attempts run out.
    ///
    /// `operation` receives the 1-based attempt number. Only [`SaveError::Transient`] failures are retried;
    /// the wait between attempts is awaited inline, so the caller is held up for the whole sequence.
    ///
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, RetryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SaveError>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", what, attempt);
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_transient() => return Err(RetryError::Permanent(err)),
                Err(err) if attempt >= attempts => {
                    warn!("{} failed after {} attempts: {}", what, attempts, err);
                    return Err(RetryError::Exhausted { attempts, last: err });
                }
                Err(err) => {
                    warn!("{} failed (attempt {}/{}), retrying in {:?}: {}", what, attempt, attempts, self.delay, err);
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Why a retried operation gave up.
///
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed transiently.
    ///
    #[error("failed after {attempts} attempts: {last}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The failure of the final attempt.
        last: SaveError,
    },

    /// An attempt failed in a way retrying cannot fix.
    ///
    #[error(transparent)]
    Permanent(SaveError),
}
