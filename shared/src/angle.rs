/*!
Wrap correction, windowed averaging and degree conversion.

The encoder count wraps at 0/360 degrees. Counts above three quarters of full
scale are shifted down by one revolution so the seam sits at -90/270 degrees
instead, keeping the usual working range free of discontinuities. Correction
is applied to every sample before it is summed.
*/

use crate::error::{Result, SharedError};
use crate::frame::RawCount;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Threshold above which a raw count is treated as a negative angle
pub fn wrap_threshold(max_counts: u32) -> u32 {
    ((3 * max_counts as u64) / 4) as u32
}

/// Relocate the count seam from 0/360 to -90/270 degrees
pub fn correct_wrap(raw: u16, max_counts: u32) -> i64 {
    let raw = i64::from(raw);
    if raw > i64::from(wrap_threshold(max_counts)) {
        raw - i64::from(max_counts)
    } else {
        raw
    }
}

/// Angular size of one count in degrees
pub fn degrees_per_count(max_counts: u32) -> f64 {
    360.0 / f64::from(max_counts)
}

/// Convert a (possibly fractional) count to degrees
pub fn counts_to_degrees(counts: f64, max_counts: u32) -> f64 {
    degrees_per_count(max_counts) * counts
}

/// Fixed-size accumulator of wrap-corrected counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    sum: i64,
    count: usize,
    size: usize,
    max_counts: u32,
}

impl Window {
    /// Create an empty window closing after `size` samples
    pub fn new(size: usize, max_counts: u32) -> Result<Self> {
        if size == 0 {
            return Err(SharedError::config("window size must be at least 1"));
        }
        if max_counts == 0 {
            return Err(SharedError::config("max_counts must be greater than zero"));
        }

        Ok(Self {
            sum: 0,
            count: 0,
            size,
            max_counts,
        })
    }

    /// Add one raw sample, applying wrap correction first
    pub fn absorb_raw(&mut self, raw: RawCount) -> Option<f64> {
        self.absorb(raw.corrected(self.max_counts))
    }

    /// Add one corrected sample.
    ///
    /// Returns the averaged angle in degrees once the window holds exactly
    /// `size` samples, and resets the accumulator for the next window.
    pub fn absorb(&mut self, corrected: i64) -> Option<f64> {
        self.sum += corrected;
        self.count += 1;

        if self.count < self.size {
            return None;
        }

        let mean = self.sum as f64 / self.count as f64;
        self.reset();
        Some(counts_to_degrees(mean, self.max_counts))
    }

    /// Discard any partially accumulated samples
    pub fn reset(&mut self) {
        self.sum = 0;
        self.count = 0;
    }

    /// Number of samples absorbed so far
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if no samples have been absorbed
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Running sum of corrected counts
    pub fn sum(&self) -> i64 {
        self.sum
    }

    /// Samples required to close the window
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Timestamped averaged angle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Wall-clock seconds since the Unix epoch
    pub timestamp: f64,
    /// Averaged angle in degrees
    pub degrees: f64,
}

impl Reading {
    /// Create a reading for the given angle stamped with the current time
    pub fn now(degrees: f64) -> Self {
        let now = Utc::now();
        let timestamp = now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0;
        Self { timestamp, degrees }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}, {:.3}", self.timestamp, self.degrees)
    }
}
