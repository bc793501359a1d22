/*!
Command/response sampling loop.

Each sample is one strictly ordered exchange: send the command, read one
response, decode it. Rejected responses are discarded and the exchange is
repeated according to the [`RetryPolicy`]; accepted counts are wrap-corrected
and folded into the [`Window`] until it closes and yields a [`Reading`].
*/

use crate::angle::{Reading, Window};
use crate::config::{ReaderConfig, RetryPolicy};
use crate::error::{Result, SharedError};
use crate::frame::{FrameDecoder, FrameRejection, RawCount};
use crate::protocol::RESPONSE_LEN;
use crate::transport::Transport;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Counters describing the sampling loop's progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    /// Commands sent
    pub exchanges: u64,
    /// Responses accepted into a window
    pub accepted: u64,
    /// Responses with the wrong byte count
    pub length_rejections: u64,
    /// Responses with an unexpected signature (strict mode only)
    pub signature_rejections: u64,
    /// Windows completed
    pub windows: u64,
}

impl FilterStats {
    /// Total rejected responses
    pub fn rejected(&self) -> u64 {
        self.length_rejections + self.signature_rejections
    }
}

/// Produces one averaged reading per window from repeated exchanges
pub struct AngleFilter<T: Transport> {
    transport: T,
    decoder: FrameDecoder,
    window: Window,
    command: Vec<u8>,
    retry: RetryPolicy,
    running: Option<Arc<AtomicBool>>,
    stats: FilterStats,
}

impl<T: Transport> AngleFilter<T> {
    /// Create a filter over an already opened transport
    pub fn new(transport: T, config: &ReaderConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            decoder: FrameDecoder::with_strict_header(config.sampling.strict_header),
            window: Window::new(config.sampling.averages, config.sampling.max_counts)?,
            command: config.sampling.command_bytes()?,
            retry: config.retry,
            running: None,
            stats: FilterStats::default(),
        })
    }

    /// Stop retrying once `running` is cleared
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = Some(running);
        self
    }

    /// Perform one command/response exchange and decode the reply
    pub fn exchange(&mut self) -> Result<std::result::Result<RawCount, FrameRejection>> {
        self.transport.write_frame(&self.command)?;
        self.stats.exchanges += 1;

        let buffer = self.transport.read_frame(RESPONSE_LEN)?;
        let decoded = self.decoder.decode(&buffer);

        match &decoded {
            Err(rejection @ FrameRejection::Length { .. }) => {
                self.stats.length_rejections += 1;
                debug!("⏭️ {}", rejection);
            }
            Err(rejection @ FrameRejection::Signature { .. }) => {
                self.stats.signature_rejections += 1;
                debug!("⏭️ {}", rejection);
            }
            Ok(_) => {}
        }

        Ok(decoded)
    }

    /// Exchange until one response is accepted or the retry policy gives up
    pub fn sample(&mut self) -> Result<RawCount> {
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);

            if let Ok(raw) = self.exchange()? {
                return Ok(raw);
            }

            if self.retry.exhausted(attempts) {
                warn!("⚠️ No valid frame after {} attempts, link degraded", attempts);
                return Err(SharedError::LinkDegraded { attempts });
            }
            if self.is_cancelled() {
                return Err(SharedError::Cancelled);
            }
            if self.retry.backoff_ms > 0 {
                thread::sleep(self.retry.backoff());
            }
        }
    }

    /// Sample until the window closes and return the averaged reading.
    ///
    /// The reading is stamped at the moment the window closes.
    pub fn next_reading(&mut self) -> Result<Reading> {
        loop {
            let raw = self.sample()?;
            self.stats.accepted += 1;

            if let Some(degrees) = self.window.absorb_raw(raw) {
                self.stats.windows += 1;
                return Ok(Reading::now(degrees));
            }
        }
    }

    /// Current partially filled window
    pub fn window(&self) -> &Window {
        &self.window
    }

    /// Progress counters
    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Access the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Release the underlying transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    fn is_cancelled(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.load(Ordering::SeqCst))
    }
}
