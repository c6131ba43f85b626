//! NVIDIA NVENC hardware backend.
//!
//! Implements [`EncodeDevice`](crate::device::EncodeDevice) on top of the
//! raw NVENC API, available on GeForce, Quadro, and Tesla GPUs.
//!
//! # Requirements
//!
//! - NVIDIA GPU with NVENC support (Maxwell or newer architecture)
//! - NVIDIA driver installed
//!
//! # Example
//!
//! ```ignore
//! use avcenc::{EncoderSession, EncoderSettings, StreamInfo};
//! use avcenc::nvidia::NvencDevice;
//!
//! let mut session = EncoderSession::new(Box::new(NvencDevice::new()));
//! session.configure(&EncoderSettings::default(), &StreamInfo::new(1920, 1080, 30, 1))?;
//! session.open()?;
//! ```

mod api;
mod encoder;

pub use encoder::NvencDevice;
