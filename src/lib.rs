//! Hardware-accelerated H.264 encoder adapter.
//!
//! This crate drives a GPU H.264 encoder and produces a well-formed Annex-B
//! elementary stream split into the three artifacts a muxer or transport
//! needs: a reusable codec configuration record (SPS/PPS), a one-shot SEI
//! payload, and a running sequence of compressed packets with timing and
//! keyframe metadata.
//!
//! # Quick start
//!
//! ```ignore
//! use avcenc::{EncoderSession, EncoderSettings, RawFrame, StreamInfo};
//! use avcenc::nvidia::NvencDevice;
//!
//! let mut session = EncoderSession::new(Box::new(NvencDevice::new()));
//! session.configure(&EncoderSettings::default(), &StreamInfo::new(1920, 1080, 30, 1))?;
//! session.open()?;
//!
//! // Feed frames; the first produced packet also populates the one-time
//! // codec header and SEI buffers.
//! if let Some(packet) = session.encode(&frame)? {
//!     // packet.data borrows the session and must be copied before the
//!     // next encode call.
//!     mux.write(packet.pts, packet.dts, packet.data, packet.keyframe);
//! }
//! let header = session.codec_header(); // SPS/PPS, empty before first packet
//!
//! session.close()?; // drains and discards buffered frames
//! ```
//!
//! # Architecture
//!
//! The crate is built around the [`EncoderSession`] state machine
//! (`configure -> open -> encode* -> close`) and the [`device::EncodeDevice`]
//! trait, the seam to the hardware engine. Rate-control translation
//! ([`policy`]), frame staging ([`frame`]), and bitstream splitting
//! ([`annexb`]) are pure and independently testable.
//!
//! # Feature flags
//!
//! - `nvidia` - NVENC hardware backend (requires the NVIDIA driver)

pub mod annexb;
pub mod device;
mod error;
pub mod frame;
pub mod policy;
pub mod properties;
mod session;
mod settings;
mod types;

pub use error::EncoderError;
pub use frame::{FramePlane, MAX_PLANES, RawFrame};
pub use session::{EncoderSession, Packet, PacketKind};
pub use settings::{EncoderSettings, Preset, Profile, RateControl};
pub use types::{ColorRange, Colorspace, PixelFormat, StreamInfo, preferred_format};

// NVIDIA backend
#[cfg(feature = "nvidia")]
pub mod nvidia;

#[cfg(feature = "nvidia")]
pub use nvidia::NvencDevice;
