use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use crate::error::IngestError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("client error {status}: {message}")]
    Client { status: u16, message: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("{0}")]
    Other(String),
}

impl CallError {
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            429 => CallError::RateLimited(message),
            500..=599 => CallError::Server { status, message },
            400..=499 => CallError::Client { status, message },
            _ => CallError::Other(format!("unexpected status {status}: {message}")),
        }
    }

    pub fn retry_class(&self) -> RetryClass {
        match self {
            CallError::Timeout(_) | CallError::Server { .. } | CallError::InvalidPayload(_) => {
                RetryClass::Backoff
            }
            CallError::RateLimited(_) => RetryClass::Cooldown,
            CallError::Client { .. } | CallError::Other(_) => RetryClass::Abort,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Server { status, .. } | CallError::Client { status, .. } => Some(*status),
            CallError::RateLimited(_) => Some(429),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Backoff,
    Cooldown,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{label} failed after {attempts} attempt(s): {cause}")]
pub struct RetryFailure {
    pub label: String,
    pub attempts: u32,
    pub cause: CallError,
}

impl From<RetryFailure> for IngestError {
    fn from(value: RetryFailure) -> Self {
        IngestError::RetryExhausted {
            label: value.label,
            attempts: value.attempts,
            cause: value.cause.to_string(),
        }
    }
}

pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut guard) = self.delays.lock() {
            guard.push(duration);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: f64,
    pub rate_limit_cooldown: Duration,
    pub persistent: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff: 2.0,
            rate_limit_cooldown: Duration::from_secs(30),
            persistent: false,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, backoff: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            backoff,
            ..Self::default()
        }
    }

    pub fn with_rate_limit_cooldown(mut self, cooldown: Duration) -> Self {
        self.rate_limit_cooldown = cooldown;
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, label: &str, mut op: F) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Result<T, CallError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut delay = self.initial_delay;
        let mut attempt = 1u32;
        loop {
            let err = match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let class = match err.retry_class() {
                RetryClass::Abort if self.persistent => RetryClass::Backoff,
                class => class,
            };
            if class == RetryClass::Abort || attempt >= max_attempts {
                if class == RetryClass::Abort {
                    debug!(label, attempt, error = %err, "non-retryable failure");
                } else {
                    warn!(label, attempt, error = %err, "retries exhausted");
                }
                return Err(RetryFailure {
                    label: label.to_string(),
                    attempts: attempt,
                    cause: err,
                });
            }

            let wait = match class {
                RetryClass::Cooldown => self.rate_limit_cooldown,
                _ => {
                    let current = delay;
                    delay = delay.mul_f64(self.backoff);
                    current
                }
            };
            warn!(
                label,
                attempt,
                delay_ms = wait.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            sleeper.sleep(wait);
            attempt += 1;
        }
    }
}
