/*!
Reader configuration.

Everything the sampling loop needs is passed in explicitly through
[`ReaderConfig`]; defaults reproduce the stock device setup.
*/

use crate::error::{Result, SharedError};
use crate::protocol;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete configuration for one encoder reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ReaderConfig {
    pub serial: SerialConfig,
    pub sampling: SamplingConfig,
    pub retry: RetryPolicy,
}

impl ReaderConfig {
    /// Check the configuration for values the reader cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.serial.port.trim().is_empty() {
            return Err(SharedError::config("serial port must not be empty"));
        }
        if self.serial.baud_rate == 0 {
            return Err(SharedError::config("baud rate must be greater than zero"));
        }
        if self.sampling.averages == 0 {
            return Err(SharedError::config("averages must be at least 1"));
        }
        if self.sampling.max_counts == 0 {
            return Err(SharedError::config("max_counts must be greater than zero"));
        }
        if self.retry.max_attempts == Some(0) {
            return Err(SharedError::config("max_attempts must be at least 1 when set"));
        }
        self.sampling.command_bytes()?;
        Ok(())
    }
}

/// Serial link settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port identifier, e.g. `/dev/ttyUSB0` or `COM6`
    pub port: String,

    /// Baud rate
    pub baud_rate: u32,

    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,

    /// Bytes read and discarded right after opening
    pub drain_bytes: usize,
}

impl SerialConfig {
    /// Per-read timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: protocol::DEFAULT_BAUD_RATE,
            timeout_ms: protocol::DEFAULT_TIMEOUT_MS,
            drain_bytes: protocol::DRAIN_LEN,
        }
    }
}

/// Sampling and averaging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Valid samples averaged into one reading
    pub averages: usize,

    /// Counts per full revolution
    pub max_counts: u32,

    /// Command frame as a hex string (whitespace allowed)
    pub command: String,

    /// Reject responses whose leading signature does not match
    pub strict_header: bool,
}

impl SamplingConfig {
    /// Decode the configured command hex string
    pub fn command_bytes(&self) -> Result<Vec<u8>> {
        let compact: String = self.command.split_whitespace().collect();
        let bytes = hex::decode(&compact)
            .map_err(|e| SharedError::config(format!("invalid command hex '{}': {}", self.command, e)))?;
        if bytes.is_empty() {
            return Err(SharedError::config("command must not be empty"));
        }
        Ok(bytes)
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            averages: protocol::DEFAULT_AVERAGES,
            max_counts: protocol::MAX_COUNTS,
            command: "50 03 00 04 00 20 08 52".to_string(),
            strict_header: false,
        }
    }
}

/// What to do when a response is rejected.
///
/// The default retries immediately and forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RetryPolicy {
    /// Give up on a sample after this many exchanges (`None` = never)
    pub max_attempts: Option<u32>,

    /// Pause between a rejected exchange and the next one, in milliseconds
    pub backoff_ms: u64,
}

impl RetryPolicy {
    /// Unbounded immediate retry
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Bounded retry with a fixed pause
    pub fn bounded(max_attempts: u32, backoff_ms: u64) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff_ms,
        }
    }

    /// Pause between attempts
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// True once `attempts` exchanges have been used up
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}
