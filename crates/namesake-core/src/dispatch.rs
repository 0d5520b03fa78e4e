use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EngineError, Result};
use crate::planner::Batch;

/// Multimodal analysis service: ordered images plus a prompt in, raw text out.
pub trait AnalysisClient: Send + Sync {
    fn analyze(&self, images: &[PathBuf], prompt: &str) -> Result<String>;
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Linear backoff: failed attempt `n` waits `base_delay * n` before the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total calls made before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }
}

/// Sends batches to the analysis client, retrying failed calls.
pub struct Dispatcher<'a> {
    client: &'a dyn AnalysisClient,
    prompt: &'a str,
    retry: RetryPolicy,
}

impl<'a> Dispatcher<'a> {
    pub fn new(client: &'a dyn AnalysisClient, prompt: &'a str, retry: RetryPolicy) -> Self {
        Self { client, prompt, retry }
    }

    /// Raw response text for the batch, untouched.
    ///
    /// Returns the last error once every attempt has failed; the caller
    /// decides what that means for the batch's files.
    pub fn dispatch(&self, batch: &Batch) -> Result<String> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.client.analyze(batch.frames(), self.prompt) {
                Ok(text) => {
                    debug!(attempt, frames = batch.len(), bytes = text.len(), "analysis succeeded");
                    return Ok(text);
                }
                Err(err) if attempt >= attempts => {
                    warn!(attempt, error = %err, "analysis failed, retries exhausted");
                    return Err(match err {
                        e @ EngineError::Analysis(_) => e,
                        other => EngineError::Analysis(other.to_string()),
                    });
                }
                Err(err) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(attempt, wait = ?delay, error = %err, "analysis failed, retrying");
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                    attempt += 1;
                }
            }
        }
    }
}
