//! Translation from the settings vocabulary to device rate-control parameters.
//!
//! This is a pure function of the settings plus the negotiated stream
//! properties; it performs no I/O and never touches the device.

use crate::settings::{EncoderSettings, Preset, Profile, RateControl};
use crate::types::{ColorRange, Colorspace, PixelFormat, StreamInfo, preferred_format};

/// Keyframe interval used when the caller asks for zero seconds.
pub const FALLBACK_GOP: u32 = 250;

/// The device parameter record a session hands to its backend.
///
/// Bitrates are in bits per second (the settings vocabulary carries kbps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub colorspace: Colorspace,
    pub range: ColorRange,
    pub fps_num: u32,
    pub fps_den: u32,
    /// Target bitrate in bits per second; 0 for quality-driven modes.
    pub bit_rate: u64,
    /// Maximum rate clamp; equal to `bit_rate` under true CBR, otherwise 0.
    pub rc_max_rate: u64,
    /// Minimum rate clamp; equal to `bit_rate` under true CBR, otherwise 0.
    pub rc_min_rate: u64,
    /// Rate-control buffer size in bits.
    pub rc_buffer_size: u64,
    /// True when the device should run its strict CBR mode.
    pub cbr: bool,
    /// Constant quantizer; 0 outside CQP mode.
    pub quantizer: u32,
    /// Keyframe interval in frames.
    pub gop_size: u32,
    /// Number of B-frames between reference frames.
    pub b_frames: u32,
    pub preset: Preset,
    pub profile: Profile,
    pub level: String,
    pub two_pass: bool,
    pub gpu: u32,
}

/// Translate settings into device parameters.
///
/// `requested` is an optional format preference from the downstream consumer;
/// it participates in format negotiation but nothing else.
#[must_use]
pub fn translate(
    settings: &EncoderSettings,
    stream: &StreamInfo,
    requested: Option<PixelFormat>,
) -> DeviceConfig {
    let mut rate_control = settings.rate_control;
    if settings.cbr {
        tracing::warn!(
            "the \"cbr\" setting has been deprecated; set rate_control to \"CBR\" instead - forcing CBR mode"
        );
        rate_control = RateControl::Cbr;
    }

    let mut bitrate = u64::from(settings.bitrate);
    // The quantizer is irrelevant outside CQP and stays zeroed.
    let mut quantizer = 0;
    let mut preset = settings.preset;
    let mut cbr = false;
    let mut rc_max_rate = 0;
    let mut rc_min_rate = 0;

    match rate_control {
        RateControl::Cqp => {
            bitrate = 0;
            quantizer = settings.cqp;
        }
        RateControl::Lossless => {
            bitrate = 0;
            preset = if preset.is_high_performance() {
                Preset::LosslessHp
            } else {
                Preset::Lossless
            };
        }
        RateControl::Vbr => {}
        RateControl::Cbr => {
            cbr = true;
            rc_max_rate = bitrate * 1000;
            rc_min_rate = bitrate * 1000;
        }
    }

    let gop_size = if settings.keyint_sec > 0 {
        settings.keyint_sec * stream.fps_num / stream.fps_den
    } else {
        FALLBACK_GOP
    };

    DeviceConfig {
        width: stream.width,
        height: stream.height,
        format: preferred_format(requested, stream.format),
        colorspace: stream.colorspace,
        range: stream.range,
        fps_num: stream.fps_num,
        fps_den: stream.fps_den,
        bit_rate: bitrate * 1000,
        rc_max_rate,
        rc_min_rate,
        rc_buffer_size: bitrate * 1000,
        cbr,
        quantizer,
        gop_size,
        b_frames: settings.b_frames,
        preset,
        profile: settings.profile,
        level: settings.level.clone(),
        two_pass: settings.two_pass,
        gpu: settings.gpu,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamInfo {
        StreamInfo::new(1280, 720, 30, 1).format(PixelFormat::Nv12)
    }

    fn settings(rc: RateControl) -> EncoderSettings {
        EncoderSettings {
            rate_control: rc,
            ..EncoderSettings::default()
        }
    }

    #[test]
    fn test_cbr_pins_min_and_max_rate() {
        for bitrate in [50u32, 850, 300_000] {
            let mut s = settings(RateControl::Cbr);
            s.bitrate = bitrate;
            s.cqp = 37;
            let c = translate(&s, &stream(), None);
            assert!(c.cbr);
            assert_eq!(c.bit_rate, u64::from(bitrate) * 1000);
            assert_eq!(c.rc_max_rate, u64::from(bitrate) * 1000);
            assert_eq!(c.rc_min_rate, u64::from(bitrate) * 1000);
            assert_eq!(c.rc_buffer_size, u64::from(bitrate) * 1000);
            assert_eq!(c.quantizer, 0);
            assert_eq!(c.preset, Preset::Default);
        }
    }

    #[test]
    fn test_vbr_passes_bitrate_unclamped() {
        let mut s = settings(RateControl::Vbr);
        s.bitrate = 6000;
        let c = translate(&s, &stream(), None);
        assert!(!c.cbr);
        assert_eq!(c.bit_rate, 6_000_000);
        assert_eq!(c.rc_max_rate, 0);
        assert_eq!(c.rc_min_rate, 0);
        assert_eq!(c.quantizer, 0);
    }

    #[test]
    fn test_cqp_zeroes_bitrate() {
        for cqp in [0u32, 23, 50] {
            let mut s = settings(RateControl::Cqp);
            s.cqp = cqp;
            let c = translate(&s, &stream(), None);
            assert_eq!(c.bit_rate, 0);
            assert_eq!(c.rc_buffer_size, 0);
            assert_eq!(c.quantizer, cqp);
            assert!(!c.cbr);
        }
    }

    #[test]
    fn test_lossless_zeroes_bitrate_and_quantizer() {
        let s = settings(RateControl::Lossless);
        let c = translate(&s, &stream(), None);
        assert_eq!(c.bit_rate, 0);
        assert_eq!(c.quantizer, 0);
        assert_eq!(c.preset, Preset::Lossless);
    }

    #[test]
    fn test_lossless_preset_substitution() {
        for (requested, expected) in [
            (Preset::Default, Preset::Lossless),
            (Preset::Hq, Preset::Lossless),
            (Preset::Bd, Preset::Lossless),
            (Preset::Ll, Preset::Lossless),
            (Preset::Llhq, Preset::Lossless),
            (Preset::Hp, Preset::LosslessHp),
            (Preset::Llhp, Preset::LosslessHp),
        ] {
            let mut s = settings(RateControl::Lossless);
            s.preset = requested;
            let c = translate(&s, &stream(), None);
            assert_eq!(c.preset, expected, "requested {requested:?}");
        }
    }

    #[test]
    fn test_keyframe_interval_from_seconds() {
        let mut s = settings(RateControl::Cbr);
        s.keyint_sec = 2;
        let c = translate(&s, &stream(), None);
        assert_eq!(c.gop_size, 60);

        // 60000/1001 NTSC-style rate truncates the same way the device does.
        s.keyint_sec = 1;
        let ntsc = StreamInfo::new(1280, 720, 60000, 1001);
        let c = translate(&s, &ntsc, None);
        assert_eq!(c.gop_size, 59);
    }

    #[test]
    fn test_keyframe_interval_fallback() {
        let s = settings(RateControl::Cbr);
        assert_eq!(s.keyint_sec, 0);
        let c = translate(&s, &stream(), None);
        assert_eq!(c.gop_size, FALLBACK_GOP);
    }

    #[test]
    fn test_passthrough_fields() {
        let mut s = settings(RateControl::Vbr);
        s.b_frames = 3;
        s.gpu = 2;
        s.two_pass = false;
        s.profile = Profile::High;
        s.level = "4.1".to_owned();
        let c = translate(&s, &stream(), None);
        assert_eq!(c.b_frames, 3);
        assert_eq!(c.gpu, 2);
        assert!(!c.two_pass);
        assert_eq!(c.profile, Profile::High);
        assert_eq!(c.level, "4.1");
    }

    #[test]
    fn test_deprecated_cbr_flag_wins() {
        let mut s = settings(RateControl::Vbr);
        s.cbr = true;
        s.bitrate = 4000;
        let c = translate(&s, &stream(), None);
        assert!(c.cbr);
        assert_eq!(c.rc_max_rate, 4_000_000);
        assert_eq!(c.rc_min_rate, 4_000_000);
        assert_eq!(c.quantizer, 0);
    }

    #[test]
    fn test_stream_properties_carried_over() {
        let s = settings(RateControl::Cbr);
        let info = StreamInfo::new(1920, 1080, 25, 1)
            .format(PixelFormat::I420)
            .colorspace(Colorspace::Rec601)
            .range(ColorRange::Full);
        let c = translate(&s, &info, None);
        assert_eq!((c.width, c.height), (1920, 1080));
        assert_eq!(c.format, PixelFormat::I420);
        assert_eq!(c.colorspace, Colorspace::Rec601);
        assert_eq!(c.range, ColorRange::Full);
        assert_eq!((c.fps_num, c.fps_den), (25, 1));
    }

    #[test]
    fn test_unsupported_source_format_falls_back() {
        let s = settings(RateControl::Cbr);
        let info = StreamInfo::new(1280, 720, 30, 1).format(PixelFormat::Bgra);
        let c = translate(&s, &info, None);
        assert_eq!(c.format, PixelFormat::Nv12);
    }
}
