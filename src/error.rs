//! Error types for encoder operations.

use thiserror::Error;

use crate::types::PixelFormat;

/// Errors surfaced by the encoder session and its device backend.
///
/// A produced-nothing `encode` call is *not* an error; the session reports it
/// as `Ok(None)`. Every variant here is a failed call, and the configure,
/// open, and encode classes are all fatal to the session.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// The requested codec could not be located on this device.
    #[error("codec unavailable: {0}")]
    CodecUnavailable(String),

    /// The device-side parameter context could not be allocated.
    #[error("failed to allocate device context: {0}")]
    ContextAllocation(String),

    /// Device initialization failed.
    #[error("failed to open device: {0}")]
    DeviceOpen(String),

    /// The staging picture or device frame buffers could not be allocated.
    #[error("failed to allocate picture buffers: {0}")]
    PictureAllocation(String),

    /// The device reported a hard failure during submission or polling.
    #[error("encode failed: {0}")]
    Encode(String),

    /// An operation was invoked in a session state that does not permit it.
    #[error("cannot {op} while session is {state}")]
    InvalidState {
        state: &'static str,
        op: &'static str,
    },

    /// Input frame resolution does not match the opened resolution.
    #[error("frame is {width}x{height}, session opened at {expected_width}x{expected_height}")]
    InvalidDimensions {
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    /// The negotiated pixel format cannot be staged.
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
}

impl EncoderError {
    /// Create a `CodecUnavailable` error with a message.
    pub fn codec_unavailable(msg: impl Into<String>) -> Self {
        Self::CodecUnavailable(msg.into())
    }

    /// Create a `DeviceOpen` error with a message.
    pub fn device_open(msg: impl Into<String>) -> Self {
        Self::DeviceOpen(msg.into())
    }

    /// Create an `Encode` error with a message.
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }
}
