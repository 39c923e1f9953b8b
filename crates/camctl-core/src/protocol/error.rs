//! Protocol errors

use thiserror::Error;

/// Errors that can occur while talking to a camera
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The device could not be opened or its line settings applied
    #[error("Device error on {device}: {reason}")]
    Device { device: String, reason: String },

    #[error("Reply timeout")]
    Timeout,

    #[error("Not connected to camera")]
    NotConnected,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Partial write: {written} of {expected} bytes")]
    PartialWrite { written: usize, expected: usize },

    /// The reply buffer filled up before the terminator was seen
    #[error("Buffer overflow: no terminator within {max_len} bytes")]
    BufferOverflow { max_len: usize },

    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// The camera answered with an error reply
    #[error("Camera error: {0}")]
    CameraError(String),

    #[error("Unknown protocol '{0}'")]
    UnknownProtocol(String),

    #[error("Operation not supported by the {0} dialect")]
    Unsupported(&'static str),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn device(device: &str, reason: impl ToString) -> Self {
        ProtocolError::Device {
            device: device.to_string(),
            reason: reason.to_string(),
        }
    }
}
