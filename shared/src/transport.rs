/*!
Serial transport abstraction.

A [`Transport`] sends a command verbatim and reads back whatever arrives
within the configured timeout. Short reads are a normal outcome and are
returned as-is; only link failures are errors.
*/

use crate::config::SerialConfig;
use crate::error::Result;
use crate::frame::synthetic_response;
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Byte-exact timed request/response link to the encoder
pub trait Transport {
    /// Send a command frame verbatim
    fn write_frame(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read up to `len` bytes, returning early when the timeout expires
    fn read_frame(&mut self, len: usize) -> Result<Vec<u8>>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_frame(bytes)
    }

    fn read_frame(&mut self, len: usize) -> Result<Vec<u8>> {
        (**self).read_frame(len)
    }
}

/// Transport backed by a real serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

impl SerialTransport {
    /// Open the port and discard anything buffered from before this session
    pub fn open(config: &SerialConfig) -> Result<Self> {
        info!("🔌 Opening serial port {} at {} baud", config.port, config.baud_rate);

        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.timeout())
            .open()?;

        let mut transport = Self {
            port,
            name: config.port.clone(),
            timeout: config.timeout(),
        };

        if config.drain_bytes > 0 {
            let stale = transport.read_frame(config.drain_bytes)?;
            info!("🧹 Discarded {} stale bytes from {}", stale.len(), transport.name);
        }

        Ok(transport)
    }

    /// Port identifier this transport was opened on
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Transport for SerialTransport {
    fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    fn read_frame(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        let mut filled = 0;
        let deadline = Instant::now() + self.timeout;

        while filled < len {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            self.port.set_timeout(deadline - now)?;

            match self.port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }
}

/// Synthetic encoder for running without hardware.
///
/// Answers each command with a well-formed response whose angle sweeps slowly
/// with a little jitter, truncating every `drop_every`-th response so the
/// rejection path gets exercised too.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    exchanges: u64,
    pending: bool,
    start_count: f64,
    counts_per_exchange: f64,
    drop_every: u64,
    max_counts: u32,
    delay: Duration,
}

impl SimulatedTransport {
    /// Create a simulator starting at `start_count` and sweeping by `counts_per_exchange`
    pub fn new(start_count: f64, counts_per_exchange: f64, max_counts: u32) -> Self {
        Self {
            exchanges: 0,
            pending: false,
            start_count,
            counts_per_exchange,
            drop_every: 0,
            max_counts: max_counts.max(1),
            delay: Duration::ZERO,
        }
    }

    /// Truncate every `n`-th response (0 disables)
    pub fn with_drop_every(mut self, n: u64) -> Self {
        self.drop_every = n;
        self
    }

    /// Pause before answering, approximating the serial transfer time
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Commands answered so far
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    fn current_count(&self) -> u16 {
        let n = self.exchanges as f64;
        let jitter = (n * 0.789).sin() * 3.0;
        let count = self.start_count + self.counts_per_exchange * n + jitter;
        count.round().rem_euclid(f64::from(self.max_counts)) as u16
    }
}

impl Transport for SimulatedTransport {
    fn write_frame(&mut self, _bytes: &[u8]) -> Result<()> {
        self.pending = true;
        Ok(())
    }

    fn read_frame(&mut self, len: usize) -> Result<Vec<u8>> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if !self.pending {
            return Ok(Vec::new());
        }
        self.pending = false;
        self.exchanges += 1;

        let mut frame = synthetic_response(self.current_count());
        if self.drop_every > 0 && self.exchanges % self.drop_every == 0 {
            debug!("🧪 Simulating short response on exchange {}", self.exchanges);
            frame.truncate(frame.len() / 2);
        }
        frame.truncate(len);
        Ok(frame)
    }
}

/// Scripted in-memory transport for tests
#[cfg(any(test, feature = "mock"))]
pub mod mock {
    use super::Transport;
    use crate::error::{Result, SharedError};
    use std::collections::VecDeque;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Replays queued responses, one per read, and records every write
    #[derive(Debug, Default)]
    pub struct MockTransport {
        responses: VecDeque<Vec<u8>>,
        writes: Vec<Vec<u8>>,
        stop_when_empty: Option<Arc<AtomicBool>>,
        fail_writes: bool,
    }

    impl MockTransport {
        /// Create a transport that replays the given responses in order
        pub fn new(responses: impl IntoIterator<Item = Vec<u8>>) -> Self {
            Self {
                responses: responses.into_iter().collect(),
                ..Self::default()
            }
        }

        /// Clear `running` once the script is used up
        pub fn stop_when_empty(mut self, running: Arc<AtomicBool>) -> Self {
            self.stop_when_empty = Some(running);
            self
        }

        /// Make every write fail with a broken pipe
        pub fn failing_writes(mut self) -> Self {
            self.fail_writes = true;
            self
        }

        /// Queue another response
        pub fn push_response(&mut self, response: Vec<u8>) {
            self.responses.push_back(response);
        }

        /// All frames written so far
        pub fn writes(&self) -> &[Vec<u8>] {
            &self.writes
        }

        /// Responses not yet consumed
        pub fn remaining(&self) -> usize {
            self.responses.len()
        }
    }

    impl Transport for MockTransport {
        fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
            if self.fail_writes {
                return Err(SharedError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "link down")));
            }
            self.writes.push(bytes.to_vec());
            Ok(())
        }

        fn read_frame(&mut self, len: usize) -> Result<Vec<u8>> {
            match self.responses.pop_front() {
                Some(mut response) => {
                    response.truncate(len);
                    Ok(response)
                }
                None => {
                    if let Some(running) = &self.stop_when_empty {
                        running.store(false, Ordering::SeqCst);
                    }
                    Ok(Vec::new())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;
    use crate::protocol::{MAX_COUNTS, RESPONSE_LEN};

    #[test]
    fn test_simulator_answers_only_after_command() {
        let mut sim = SimulatedTransport::new(1000.0, 0.0, MAX_COUNTS);

        assert!(sim.read_frame(RESPONSE_LEN).unwrap().is_empty());

        sim.write_frame(&[0x50]).unwrap();
        let frame = sim.read_frame(RESPONSE_LEN).unwrap();
        assert_eq!(frame.len(), RESPONSE_LEN);
        assert_eq!(sim.exchanges(), 1);

        let count = FrameDecoder::with_strict_header(true).decode(&frame).unwrap();
        assert!((i32::from(count.value()) - 1000).abs() <= 3);
    }

    #[test]
    fn test_simulator_drops_responses() {
        let mut sim = SimulatedTransport::new(0.0, 1.0, MAX_COUNTS).with_drop_every(2);

        sim.write_frame(&[0x50]).unwrap();
        assert_eq!(sim.read_frame(RESPONSE_LEN).unwrap().len(), RESPONSE_LEN);

        sim.write_frame(&[0x50]).unwrap();
        assert!(sim.read_frame(RESPONSE_LEN).unwrap().len() < RESPONSE_LEN);
    }

    #[test]
    fn test_simulator_wraps_counts() {
        let mut sim = SimulatedTransport::new(32766.0, 10.0, MAX_COUNTS);
        for _ in 0..5 {
            sim.write_frame(&[0x50]).unwrap();
            let frame = sim.read_frame(RESPONSE_LEN).unwrap();
            let count = FrameDecoder::new().decode(&frame).unwrap();
            assert!(u32::from(count.value()) < MAX_COUNTS);
        }
    }

    #[test]
    fn test_mock_replays_and_records() {
        let mut mock = mock::MockTransport::new(vec![vec![1, 2, 3], vec![4; 100]]);

        mock.write_frame(&[9, 9]).unwrap();
        assert_eq!(mock.read_frame(10).unwrap(), vec![1, 2, 3]);
        assert_eq!(mock.read_frame(10).unwrap().len(), 10);
        assert!(mock.read_frame(10).unwrap().is_empty());
        assert_eq!(mock.writes(), &[vec![9, 9]]);
    }
}
