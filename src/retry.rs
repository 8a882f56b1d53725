// src/retry.rs

//! Bounded retry for transient failures
//!
//! File operations on desktop systems fail intermittently (virus scanners,
//! indexers and half-closed handles all hold files briefly), and network
//! transfers drop. Callers wrap such operations in a [`RetryPolicy`] rather
//! than hand-rolling sleep loops.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Default number of retries after the first attempt
pub const DEFAULT_RETRIES: u32 = 4;

/// Default delay between attempts in milliseconds
pub const DEFAULT_DELAY_MS: u64 = 250;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Same delay before every retry
    #[default]
    Fixed,
    /// Delay doubles after each failed attempt
    Exponential,
}

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once)
    pub retries: u32,
    pub delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            delay_ms: DEFAULT_DELAY_MS,
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once
    pub const fn none() -> Self {
        Self {
            retries: 0,
            delay_ms: 0,
            backoff: Backoff::Fixed,
        }
    }

    /// Policy with custom attempts and delay
    pub const fn new(retries: u32, delay_ms: u64) -> Self {
        Self {
            retries,
            delay_ms,
            backoff: Backoff::Fixed,
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let ms = match self.backoff {
            Backoff::Fixed => self.delay_ms,
            Backoff::Exponential => self
                .delay_ms
                .saturating_mul(1u64 << retry.saturating_sub(1).min(16)),
        };
        Duration::from_millis(ms)
    }

    /// Run `op`, retrying transient errors (see [`Error::is_transient`])
    pub fn run<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.run_if(what, Error::is_transient, op)
    }

    /// Run `op`, retrying every error except cancellation
    pub fn run_any<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
    {
        self.run_if(what, |e| !matches!(e, Error::Cancelled), op)
    }

    /// Run `op`, retrying errors for which `should_retry` returns true
    pub fn run_if<T, F, P>(&self, what: &str, should_retry: P, mut op: F) -> Result<T>
    where
        F: FnMut() -> Result<T>,
        P: Fn(&Error) -> bool,
    {
        let mut retry = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if retry < self.retries && should_retry(&e) => {
                    retry += 1;
                    warn!(
                        "{} failed (attempt {}/{}): {}, retrying...",
                        what,
                        retry,
                        self.retries + 1,
                        e
                    );
                    std::thread::sleep(self.delay_for(retry));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
