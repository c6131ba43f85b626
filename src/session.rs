//! Encoder session lifecycle.
//!
//! A session owns the device backend, the translated parameter record, the
//! staging picture, and the packet accumulation buffer. It is single
//! threaded: callers must serialize `configure`, `open`, `encode`, and
//! `close` on one thread.

use bytes::Bytes;

use crate::annexb;
use crate::device::EncodeDevice;
use crate::error::EncoderError;
use crate::frame::{RawFrame, StagingPicture, stage_frame};
use crate::policy::{self, DeviceConfig};
use crate::settings::EncoderSettings;
use crate::types::{PixelFormat, StreamInfo};

/// Payload type tag of an encoded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    Video,
}

/// One encoded packet.
///
/// `data` borrows the session's accumulation buffer and is overwritten by
/// the next `encode` call; a caller that needs the payload longer must copy
/// it first. The borrow checker enforces this: the packet cannot outlive the
/// next mutable use of the session.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    /// Presentation timestamp, in the units frames were submitted with.
    pub pts: i64,
    /// Decode timestamp; differs from `pts` when frames are reordered.
    pub dts: i64,
    /// Annex-B payload, borrowed from the session.
    pub data: &'a [u8],
    /// True when the payload's first slice is an IDR slice.
    pub keyframe: bool,
    pub kind: PacketKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Created,
    Configured,
    Opened,
    Encoding,
    Draining,
    Closed,
}

impl SessionState {
    fn name(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configured => "configured",
            Self::Opened => "opened",
            Self::Encoding => "encoding",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

/// A hardware encoding session.
///
/// Lifecycle: `new -> configure (any number of times) -> open -> encode* ->
/// close`. Configuration is rejected once the device is open; a session is
/// reconfigured by recreating it.
pub struct EncoderSession {
    device: Box<dyn EncodeDevice>,
    preferred_format: Option<PixelFormat>,
    config: Option<DeviceConfig>,
    staging: Option<StagingPicture>,
    /// Accumulation buffer backing returned packet payloads; reused across
    /// calls.
    buffer: Vec<u8>,
    header: Bytes,
    sei_payload: Bytes,
    first_packet: bool,
    failed: bool,
    state: SessionState,
}

impl EncoderSession {
    /// Create a session around a device backend.
    #[must_use]
    pub fn new(device: Box<dyn EncodeDevice>) -> Self {
        Self {
            device,
            preferred_format: None,
            config: None,
            staging: None,
            buffer: Vec::new(),
            header: Bytes::new(),
            sei_payload: Bytes::new(),
            first_packet: true,
            failed: false,
            state: SessionState::Created,
        }
    }

    /// Human-readable encoder name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        "NVENC H.264"
    }

    /// Set the downstream consumer's pixel-format preference.
    ///
    /// Participates in format negotiation at the next `configure`.
    pub fn set_preferred_format(&mut self, format: Option<PixelFormat>) {
        self.preferred_format = format;
    }

    /// Translate `settings` against the stream properties and hand the
    /// result to the device.
    ///
    /// May be called repeatedly while the device is not yet open, e.g. when
    /// the caller updates settings live. Fails if the codec cannot be
    /// located or the device context cannot be allocated; the session is
    /// then unusable.
    pub fn configure(
        &mut self,
        settings: &EncoderSettings,
        stream: &StreamInfo,
    ) -> Result<(), EncoderError> {
        match self.state {
            SessionState::Created | SessionState::Configured => {}
            state => {
                return Err(EncoderError::InvalidState {
                    state: state.name(),
                    op: "configure",
                })
            }
        }

        let config = policy::translate(settings, stream, self.preferred_format);
        self.device.prepare(&config)?;

        tracing::info!(
            rate_control = settings.rate_control.as_str(),
            bitrate = settings.bitrate,
            cqp = settings.cqp,
            keyint = config.gop_size,
            preset = config.preset.as_str(),
            profile = config.profile.as_str(),
            level = %config.level,
            width = config.width,
            height = config.height,
            two_pass = settings.two_pass,
            gpu = settings.gpu,
            bf = settings.b_frames,
            "settings"
        );

        self.config = Some(config);
        self.state = SessionState::Configured;
        Ok(())
    }

    /// Open the device and allocate the staging picture.
    ///
    /// Fatal on device or allocation failure. A second `open` is rejected;
    /// reconfiguration after open requires a new session.
    pub fn open(&mut self) -> Result<(), EncoderError> {
        if self.state != SessionState::Configured {
            return Err(EncoderError::InvalidState {
                state: self.state.name(),
                op: "open",
            });
        }
        let Some(config) = self.config.as_ref() else {
            return Err(EncoderError::InvalidState {
                state: self.state.name(),
                op: "open",
            });
        };

        // The stager is a 4:2:0 contract; refuse formats it would corrupt.
        if !config.format.is_chroma_subsampled() {
            return Err(EncoderError::UnsupportedFormat(config.format));
        }

        let layout = self.device.open(config)?;
        self.staging = Some(StagingPicture::alloc(&layout)?);
        self.state = SessionState::Opened;
        tracing::debug!(
            width = config.width,
            height = config.height,
            format = ?config.format,
            "encoder opened"
        );
        Ok(())
    }

    /// Encode one frame.
    ///
    /// Returns `Ok(None)` when the device accepted the frame but has not
    /// produced output yet (lookahead or B-frame latency); keep calling
    /// `encode` with new frames to drain output in steady state. A device
    /// error is fatal: the session rejects further `encode` calls and the
    /// caller should `close` it.
    pub fn encode(&mut self, frame: &RawFrame<'_>) -> Result<Option<Packet<'_>>, EncoderError> {
        if self.failed {
            return Err(EncoderError::InvalidState {
                state: "failed",
                op: "encode",
            });
        }
        match self.state {
            SessionState::Opened | SessionState::Encoding => {}
            state => {
                return Err(EncoderError::InvalidState {
                    state: state.name(),
                    op: "encode",
                })
            }
        }
        self.state = SessionState::Encoding;

        let Some(staging) = self.staging.as_mut() else {
            return Err(EncoderError::InvalidState {
                state: "opened",
                op: "encode",
            });
        };
        stage_frame(staging, frame)?;

        let produced = match self.device.encode(Some(&*staging), frame.pts) {
            Ok(produced) => produced,
            Err(err) => {
                self.failed = true;
                return Err(err);
            }
        };
        let Some(packet) = produced else {
            return Ok(None);
        };

        if self.first_packet {
            // Parameter sets and SEI appear only in the first access unit;
            // pull them out once, everything later passes through verbatim.
            self.first_packet = false;
            let split = annexb::split_access_unit(&packet.data);
            self.header = Bytes::from(split.header);
            self.sei_payload = Bytes::from(split.sei);
            self.buffer.clear();
            self.buffer.extend_from_slice(&split.payload);
            tracing::debug!(
                header_len = self.header.len(),
                sei_len = self.sei_payload.len(),
                "extracted codec header from first packet"
            );
        } else {
            self.buffer.clear();
            self.buffer.extend_from_slice(&packet.data);
        }

        let keyframe = annexb::is_keyframe(&self.buffer);
        Ok(Some(Packet {
            pts: packet.pts,
            dts: packet.dts,
            data: &self.buffer,
            keyframe,
            kind: PacketKind::Video,
        }))
    }

    /// The codec configuration record (SPS/PPS) extracted from the first
    /// packet. Empty until the first successful encode, immutable after.
    #[must_use]
    pub fn codec_header(&self) -> &[u8] {
        &self.header
    }

    /// The SEI payload extracted from the first packet. Empty until the
    /// first successful encode, immutable after.
    #[must_use]
    pub fn sei(&self) -> &[u8] {
        &self.sei_payload
    }

    /// Drain the device and release all resources.
    ///
    /// Buffered frames still inside the device are collected and discarded;
    /// they are not delivered. After `close` the session only accepts
    /// another `close`.
    pub fn close(&mut self) -> Result<(), EncoderError> {
        match self.state {
            SessionState::Closed => return Ok(()),
            SessionState::Opened | SessionState::Encoding if !self.failed => {
                self.state = SessionState::Draining;
                let mut drained = 0usize;
                loop {
                    match self.device.encode(None, 0) {
                        Ok(Some(_)) => drained += 1,
                        Ok(None) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "drain aborted");
                            break;
                        }
                    }
                }
                tracing::debug!(drained, "encoder drained on close");
            }
            _ => {}
        }

        self.device.close();
        self.staging = None;
        self.buffer = Vec::new();
        self.state = SessionState::Closed;
        Ok(())
    }
}

impl Drop for EncoderSession {
    fn drop(&mut self) {
        // No drain on the drop path; the device handle still gets released.
        if self.state != SessionState::Closed {
            self.device.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::DevicePacket;
    use crate::frame::PictureLayout;
    use crate::settings::RateControl;
    use crate::types::Colorspace;

    const SPS: &[u8] = &[0, 0, 0, 1, 0x67, 0x64, 0x00, 0x1F];
    const PPS: &[u8] = &[0, 0, 0, 1, 0x68, 0xEE, 0x3C, 0x80];
    const SEI: &[u8] = &[0, 0, 1, 0x06, 0x05, 0x04, 0xB1, 0x80];

    fn idr_slice(index: u64) -> Vec<u8> {
        vec![0, 0, 0, 1, 0x65, 0x88, index as u8, 0xFF]
    }

    fn non_idr_slice(index: u64) -> Vec<u8> {
        vec![0, 0, 0, 1, 0x41, 0x9A, index as u8]
    }

    #[derive(Default)]
    struct Stats {
        prepared: usize,
        opened: bool,
        closed: bool,
        submitted: usize,
        drained: usize,
    }

    /// Scripted device: emits synthetic Annex-B access units with a
    /// configurable lookahead delay and an IDR cadence taken from the
    /// configured gop size. The first access unit carries SPS/PPS/SEI,
    /// later keyframes repeat SPS/PPS the way real encoders do.
    struct ScriptedDevice {
        stats: Arc<Mutex<Stats>>,
        delay: usize,
        align: usize,
        fail_prepare: bool,
        fail_open: bool,
        fail_submit_at: Option<u64>,
        gop: u64,
        queue: VecDeque<(i64, u64)>,
        next_index: u64,
    }

    impl ScriptedDevice {
        fn new(delay: usize) -> (Box<Self>, Arc<Mutex<Stats>>) {
            let stats = Arc::new(Mutex::new(Stats::default()));
            let device = Box::new(Self {
                stats: stats.clone(),
                delay,
                align: 1,
                fail_prepare: false,
                fail_open: false,
                fail_submit_at: None,
                gop: 250,
                queue: VecDeque::new(),
                next_index: 0,
            });
            (device, stats)
        }

        fn packet_for(&self, pts: i64, index: u64) -> DevicePacket {
            let mut data = Vec::new();
            if index == 0 {
                data.extend_from_slice(SPS);
                data.extend_from_slice(PPS);
                data.extend_from_slice(SEI);
                data.extend(idr_slice(index));
            } else if index % self.gop == 0 {
                data.extend_from_slice(SPS);
                data.extend_from_slice(PPS);
                data.extend(idr_slice(index));
            } else {
                data.extend(non_idr_slice(index));
            }
            DevicePacket {
                data,
                pts,
                dts: pts - self.delay as i64,
            }
        }
    }

    impl EncodeDevice for ScriptedDevice {
        fn prepare(&mut self, _config: &DeviceConfig) -> Result<(), EncoderError> {
            self.stats.lock().unwrap().prepared += 1;
            if self.fail_prepare {
                return Err(EncoderError::codec_unavailable("no such codec"));
            }
            Ok(())
        }

        fn open(&mut self, config: &DeviceConfig) -> Result<PictureLayout, EncoderError> {
            if self.fail_open {
                return Err(EncoderError::device_open("device rejected init"));
            }
            self.gop = u64::from(config.gop_size);
            self.stats.lock().unwrap().opened = true;
            Ok(PictureLayout::with_alignment(
                config.format,
                config.width,
                config.height,
                self.align,
            ))
        }

        fn encode(
            &mut self,
            picture: Option<&StagingPicture>,
            pts: i64,
        ) -> Result<Option<DevicePacket>, EncoderError> {
            if let Some(picture) = picture {
                if self.fail_submit_at == Some(self.next_index) {
                    return Err(EncoderError::encode("device failure"));
                }
                assert!(!picture.plane(0).is_empty());
                self.queue.push_back((pts, self.next_index));
                self.next_index += 1;
                self.stats.lock().unwrap().submitted += 1;
                if self.queue.len() > self.delay {
                    let (pts, index) = self.queue.pop_front().unwrap();
                    return Ok(Some(self.packet_for(pts, index)));
                }
                Ok(None)
            } else {
                match self.queue.pop_front() {
                    Some((pts, index)) => {
                        self.stats.lock().unwrap().drained += 1;
                        Ok(Some(self.packet_for(pts, index)))
                    }
                    None => Ok(None),
                }
            }
        }

        fn close(&mut self) {
            self.stats.lock().unwrap().closed = true;
        }
    }

    fn stream() -> StreamInfo {
        StreamInfo::new(64, 32, 30, 1).format(PixelFormat::Nv12)
    }

    fn frame_data() -> Vec<u8> {
        vec![0x80; 64 * 32]
    }

    fn frame(data: &[u8], pts: i64) -> RawFrame<'_> {
        RawFrame::new(64, 32, pts)
            .with_plane(0, data, 64)
            .with_plane(1, data, 64)
    }

    fn opened_session(delay: usize) -> (EncoderSession, Arc<Mutex<Stats>>) {
        opened_session_with(delay, &EncoderSettings::default())
    }

    fn opened_session_with(
        delay: usize,
        settings: &EncoderSettings,
    ) -> (EncoderSession, Arc<Mutex<Stats>>) {
        let (device, stats) = ScriptedDevice::new(delay);
        let mut session = EncoderSession::new(device);
        session.configure(settings, &stream()).unwrap();
        session.open().unwrap();
        (session, stats)
    }

    #[test]
    fn test_encode_rejected_before_open() {
        let (device, _) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        let data = frame_data();
        assert!(matches!(
            session.encode(&frame(&data, 0)),
            Err(EncoderError::InvalidState { state: "created", .. })
        ));

        session
            .configure(&EncoderSettings::default(), &stream())
            .unwrap();
        assert!(matches!(
            session.encode(&frame(&data, 0)),
            Err(EncoderError::InvalidState { state: "configured", .. })
        ));
    }

    #[test]
    fn test_configure_repeatable_before_open_only() {
        let (device, stats) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        let settings = EncoderSettings::default();
        session.configure(&settings, &stream()).unwrap();
        session.configure(&settings, &stream()).unwrap();
        assert_eq!(stats.lock().unwrap().prepared, 2);

        session.open().unwrap();
        assert!(matches!(
            session.configure(&settings, &stream()),
            Err(EncoderError::InvalidState { state: "opened", .. })
        ));
    }

    #[test]
    fn test_open_requires_configuration_and_rejects_reopen() {
        let (device, _) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        assert!(matches!(
            session.open(),
            Err(EncoderError::InvalidState { state: "created", .. })
        ));

        session
            .configure(&EncoderSettings::default(), &stream())
            .unwrap();
        session.open().unwrap();
        assert!(matches!(
            session.open(),
            Err(EncoderError::InvalidState { state: "opened", .. })
        ));
    }

    #[test]
    fn test_configure_surfaces_codec_lookup_failure() {
        let (mut device, _) = ScriptedDevice::new(0);
        device.fail_prepare = true;
        let mut session = EncoderSession::new(device);
        assert!(matches!(
            session.configure(&EncoderSettings::default(), &stream()),
            Err(EncoderError::CodecUnavailable(_))
        ));
    }

    #[test]
    fn test_open_surfaces_device_failure() {
        let (mut device, _) = ScriptedDevice::new(0);
        device.fail_open = true;
        let mut session = EncoderSession::new(device);
        session
            .configure(&EncoderSettings::default(), &stream())
            .unwrap();
        assert!(matches!(session.open(), Err(EncoderError::DeviceOpen(_))));
    }

    #[test]
    fn test_first_packet_is_split_once() {
        let (mut session, _) = opened_session(0);
        assert!(session.codec_header().is_empty());
        assert!(session.sei().is_empty());

        let data = frame_data();
        let packet = session.encode(&frame(&data, 0)).unwrap().unwrap();
        assert!(packet.keyframe);
        assert_eq!(packet.kind, PacketKind::Video);
        assert_eq!(packet.data, &idr_slice(0)[..]);

        let mut expected_header = SPS.to_vec();
        expected_header.extend_from_slice(PPS);
        assert_eq!(session.codec_header(), &expected_header[..]);
        assert_eq!(session.sei(), SEI);

        // Second packet passes through verbatim; header and SEI unchanged.
        let packet = session.encode(&frame(&data, 1)).unwrap().unwrap();
        assert!(!packet.keyframe);
        assert_eq!(packet.data, &non_idr_slice(1)[..]);
        assert_eq!(session.codec_header(), &expected_header[..]);
        assert_eq!(session.sei(), SEI);
    }

    #[test]
    fn test_buffered_frames_are_not_errors() {
        let (mut session, _) = opened_session(2);
        let data = frame_data();
        assert!(session.encode(&frame(&data, 0)).unwrap().is_none());
        assert!(session.encode(&frame(&data, 1)).unwrap().is_none());

        let packet = session.encode(&frame(&data, 2)).unwrap().unwrap();
        assert_eq!(packet.pts, 0);
        assert_eq!(packet.dts, -2);
    }

    #[test]
    fn test_close_drains_and_discards() {
        let (mut session, stats) = opened_session(2);
        let data = frame_data();
        for pts in 0..3 {
            let _ = session.encode(&frame(&data, pts)).unwrap();
        }
        // One packet came out; two frames are still buffered in the device.
        session.close().unwrap();

        let stats = stats.lock().unwrap();
        assert_eq!(stats.drained, 2);
        assert!(stats.closed);
        drop(stats);

        assert!(matches!(
            session.encode(&frame(&data, 3)),
            Err(EncoderError::InvalidState { state: "closed", .. })
        ));
        // close is idempotent.
        session.close().unwrap();
    }

    #[test]
    fn test_close_before_open_releases_device() {
        let (device, stats) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        session.close().unwrap();
        assert!(stats.lock().unwrap().closed);
    }

    #[test]
    fn test_drop_releases_device() {
        let (device, stats) = ScriptedDevice::new(0);
        let session = EncoderSession::new(device);
        drop(session);
        assert!(stats.lock().unwrap().closed);
    }

    #[test]
    fn test_device_error_is_fatal_to_session() {
        let (mut device, _) = ScriptedDevice::new(0);
        device.fail_submit_at = Some(1);
        let mut session = EncoderSession::new(device);
        session
            .configure(&EncoderSettings::default(), &stream())
            .unwrap();
        session.open().unwrap();

        let data = frame_data();
        assert!(session.encode(&frame(&data, 0)).unwrap().is_some());
        assert!(matches!(
            session.encode(&frame(&data, 1)),
            Err(EncoderError::Encode(_))
        ));
        assert!(matches!(
            session.encode(&frame(&data, 2)),
            Err(EncoderError::InvalidState { state: "failed", .. })
        ));
        session.close().unwrap();
    }

    #[test]
    fn test_open_rejects_non_subsampled_format() {
        let (device, _) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        let info = stream().format(PixelFormat::I444);
        session
            .configure(&EncoderSettings::default(), &info)
            .unwrap();
        assert!(matches!(
            session.open(),
            Err(EncoderError::UnsupportedFormat(PixelFormat::I444))
        ));
    }

    #[test]
    fn test_resolution_mismatch_rejected() {
        let (mut session, _) = opened_session(0);
        let data = vec![0u8; 32 * 16];
        let bad = RawFrame::new(32, 16, 0).with_plane(0, &data, 32);
        assert!(matches!(
            session.encode(&bad),
            Err(EncoderError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_preferred_format_feeds_negotiation() {
        let (device, _) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        session.set_preferred_format(Some(PixelFormat::I420));
        session
            .configure(&EncoderSettings::default(), &stream())
            .unwrap();
        session.open().unwrap();

        // The staging picture follows the negotiated I420 layout: a frame
        // with three planes stages without touching plane index 3.
        let y = vec![0x10u8; 64 * 32];
        let u = vec![0x20u8; 32 * 16];
        let v = vec![0x30u8; 32 * 16];
        let frame = RawFrame::new(64, 32, 0)
            .with_plane(0, &y, 64)
            .with_plane(1, &u, 32)
            .with_plane(2, &v, 32);
        assert!(session.encode(&frame).unwrap().is_some());
    }

    #[test]
    fn test_device_dictated_stride_padding() {
        // The device reports padded strides; tightly packed source frames
        // still stage and encode.
        let (mut device, _) = ScriptedDevice::new(0);
        device.align = 128;
        let mut session = EncoderSession::new(device);
        session
            .configure(&EncoderSettings::default(), &stream())
            .unwrap();
        session.open().unwrap();

        let data = frame_data();
        assert!(session.encode(&frame(&data, 0)).unwrap().is_some());
    }

    #[test]
    fn test_end_to_end_keyframe_cadence() {
        // CBR 850 kbps, 30 fps, keyint 2 s -> gop 60.
        let settings = EncoderSettings {
            rate_control: RateControl::Cbr,
            keyint_sec: 2,
            ..EncoderSettings::default()
        };
        let (mut session, _) = opened_session_with(1, &settings);

        let data = frame_data();
        let mut keyframe_pts = Vec::new();
        let mut header = Vec::new();
        let mut sei = Vec::new();
        let mut packets = 0usize;

        for pts in 0..90 {
            let delivered = session
                .encode(&frame(&data, pts))
                .unwrap()
                .map(|packet| (packet.pts, packet.keyframe));
            if let Some((packet_pts, keyframe)) = delivered {
                packets += 1;
                if keyframe {
                    keyframe_pts.push(packet_pts);
                }
                if header.is_empty() {
                    // First delivery: the one-time extraction just happened.
                    header = session.codec_header().to_vec();
                    sei = session.sei().to_vec();
                    assert!(!header.is_empty());
                    assert!(!sei.is_empty());
                }
            }
        }

        // One frame of lookahead latency: 89 packets for 90 frames.
        assert_eq!(packets, 89);
        assert_eq!(keyframe_pts, [0, 60]);

        // Exactly one extraction event: the buffers never changed, and the
        // repeated parameter sets on the second keyframe stayed in-band.
        assert_eq!(session.codec_header(), &header[..]);
        assert_eq!(session.sei(), &sei[..]);
        session.close().unwrap();
    }

    #[test]
    fn test_session_name() {
        let (device, _) = ScriptedDevice::new(0);
        let session = EncoderSession::new(device);
        assert_eq!(session.name(), "NVENC H.264");
    }

    #[test]
    fn test_colorspace_passthrough_to_device_config() {
        let (device, _) = ScriptedDevice::new(0);
        let mut session = EncoderSession::new(device);
        let info = stream().colorspace(Colorspace::Rec601);
        session
            .configure(&EncoderSettings::default(), &info)
            .unwrap();
        let config = session.config.as_ref().unwrap();
        assert_eq!(config.colorspace, Colorspace::Rec601);
    }
}
