/*!
# Shared Types and Utilities

This crate contains the protocol, decoding and averaging core used by the
angle grabber application to read an absolute rotary encoder over a serial link.

## Core Types

- [`FrameDecoder`] - Response frame validation and angle field extraction
- [`RawCount`] - 15-bit encoder position decoded from a frame
- [`Window`] - Fixed-size accumulator of wrap-corrected counts
- [`Reading`] - Timestamped averaged angle
- [`AngleFilter`] - Command/response sampling loop producing one reading per window

## Modules

- [`frame`] - Response frame decoding
- [`angle`] - Wrap correction, windowing and degree conversion
- [`transport`] - Serial transport abstraction
- [`filter`] - Sampling loop and retry policy enforcement
- [`config`] - Reader configuration
- [`error`] - Common error types
*/

pub mod angle;
pub mod config;
pub mod error;
pub mod filter;
pub mod frame;
pub mod transport;

// Re-export commonly used types
pub use angle::{Reading, Window};
pub use config::{ReaderConfig, RetryPolicy, SamplingConfig, SerialConfig};
pub use error::{SharedError, Result};
pub use filter::{AngleFilter, FilterStats};
pub use frame::{FrameDecoder, FrameRejection, RawCount};
pub use transport::{SerialTransport, Transport};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Command frame requesting angle, angular rate and temperature
    pub const COMMAND_FRAME: [u8; 8] = [0x50, 0x03, 0x00, 0x04, 0x00, 0x20, 0x08, 0x52];

    /// Number of bytes in a complete response frame
    pub const RESPONSE_LEN: usize = 69;

    /// Fixed signature at the start of every response
    pub const RESPONSE_SIGNATURE: [u8; 6] = [0x50, 0x03, 0x40, 0x00, 0x02, 0x00];

    /// Offset of the big-endian 16-bit angle count within a response
    pub const ANGLE_OFFSET: usize = 29;

    /// Counts per full revolution (15-bit sensor)
    pub const MAX_COUNTS: u32 = 32768;

    /// Samples averaged into one reading
    pub const DEFAULT_AVERAGES: usize = 94;

    /// Default serial baud rate
    pub const DEFAULT_BAUD_RATE: u32 = 9600;

    /// Default per-read timeout in milliseconds
    pub const DEFAULT_TIMEOUT_MS: u64 = 300;

    /// Bytes read and discarded right after the port opens
    pub const DRAIN_LEN: usize = 200;
}
