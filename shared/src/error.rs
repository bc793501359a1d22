/*!
Common error types for the encoder reader components.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Comprehensive error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// I/O errors on the serial link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Too many consecutive rejected frames for a single sample
    #[error("Link degraded: no valid frame after {attempts} attempts")]
    LinkDegraded { attempts: u32 },

    /// The running flag was cleared before the window completed
    #[error("Sampling cancelled")]
    Cancelled,
}

impl SharedError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True for the clean-stop condition rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
