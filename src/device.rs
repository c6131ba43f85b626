//! The seam between the encoder session and a hardware encoder engine.
//!
//! A backend implements [`EncodeDevice`]; the session drives it and never
//! sees device handles directly. The NVIDIA backend lives behind the
//! `nvidia` cargo feature; tests drive the session with a scripted device.

use crate::error::EncoderError;
use crate::frame::{PictureLayout, StagingPicture};
use crate::policy::DeviceConfig;

/// One finished access unit handed back by the device.
#[derive(Debug, Clone)]
pub struct DevicePacket {
    /// Annex-B bitstream bytes.
    pub data: Vec<u8>,
    /// Presentation timestamp, in the units the frames were submitted with.
    pub pts: i64,
    /// Decode timestamp; differs from `pts` when frames are reordered.
    pub dts: i64,
}

/// A hardware encoder engine.
///
/// The session guarantees single-threaded use and the call order
/// `prepare* -> open -> encode* -> close`. Implementations must release
/// their device resources on `close` and on drop.
pub trait EncodeDevice: Send {
    /// Locate the codec and allocate the device-side parameter context.
    ///
    /// Called from session configuration; may be called again with updated
    /// parameters any number of times before `open`.
    fn prepare(&mut self, config: &DeviceConfig) -> Result<(), EncoderError>;

    /// Initialize the device for encoding.
    ///
    /// Returns the plane layout the session must allocate its staging
    /// picture with.
    fn open(&mut self, config: &DeviceConfig) -> Result<PictureLayout, EncoderError>;

    /// Submit a staged picture and poll for at most one finished packet.
    ///
    /// `None` input flushes: the device returns buffered output until it
    /// reports `Ok(None)`. `Ok(None)` with picture input means the frame was
    /// accepted but buffered (lookahead or B-frame latency) and is not an
    /// error.
    fn encode(
        &mut self,
        picture: Option<&StagingPicture>,
        pts: i64,
    ) -> Result<Option<DevicePacket>, EncoderError>;

    /// Release device resources. Idempotent.
    fn close(&mut self);
}
