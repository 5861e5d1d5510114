//! Error types for the HPI localization library.

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input parameters provided
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sensor geometry or digitization data is inconsistent
    #[error("Geometry error: {0}")]
    GeometryError(String),

    /// A data block does not match the shape the stream buffer was sized for
    #[error("Block shape mismatch: expected {expected:?} (channels, samples), got {actual:?}")]
    BlockShape {
        /// Shape the buffer was created with
        expected: (usize, usize),
        /// Shape of the rejected block
        actual: (usize, usize),
    },

    /// The stream buffer was shut down while a caller was waiting on it
    #[error("Stream buffer has been shut down")]
    BufferShutdown,

    /// Controller lifecycle misuse such as a second start
    #[error("Controller error: {0}")]
    ControllerError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
