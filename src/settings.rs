//! The flat settings vocabulary accepted by the encoder.
//!
//! Field names and defaults follow the wire keys a host application stores
//! (`rate_control`, `bitrate`, `cqp`, `keyint_sec`, `preset`, `profile`,
//! `level`, `2pass`, `gpu`, `bf`), so a settings object round-trips through
//! serde unchanged.

use serde::{Deserialize, Serialize};

/// Rate-control mode. Exactly one mode is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateControl {
    /// Constant bitrate: min and max rate pinned to the target.
    #[serde(rename = "CBR")]
    Cbr,
    /// Variable bitrate: target average only, no clamp.
    #[serde(rename = "VBR")]
    Vbr,
    /// Constant quantizer: fixed quality, bitrate unconstrained.
    #[serde(rename = "CQP")]
    Cqp,
    /// Lossless encoding.
    #[serde(rename = "lossless")]
    Lossless,
}

impl Default for RateControl {
    fn default() -> Self {
        Self::Cbr
    }
}

impl RateControl {
    /// The wire name of the mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cbr => "CBR",
            Self::Vbr => "VBR",
            Self::Cqp => "CQP",
            Self::Lossless => "lossless",
        }
    }
}

/// Encoder preset controlling the speed/quality tradeoff.
///
/// The first seven variants are user-selectable; the two lossless variants
/// are substituted by the rate-control translator and never offered directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Default,
    Hq,
    Hp,
    Bd,
    Ll,
    Llhq,
    Llhp,
    Lossless,
    #[serde(rename = "losslesshp")]
    LosslessHp,
}

impl Default for Preset {
    fn default() -> Self {
        Self::Default
    }
}

impl Preset {
    /// The wire name of the preset.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Hq => "hq",
            Self::Hp => "hp",
            Self::Bd => "bd",
            Self::Ll => "ll",
            Self::Llhq => "llhq",
            Self::Llhp => "llhp",
            Self::Lossless => "lossless",
            Self::LosslessHp => "losslesshp",
        }
    }

    /// Returns true for the two high-performance presets.
    #[must_use]
    pub fn is_high_performance(&self) -> bool {
        matches!(self, Self::Hp | Self::Llhp)
    }
}

/// H.264 profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    High,
    Main,
    Baseline,
    High444p,
}

impl Default for Profile {
    fn default() -> Self {
        Self::Main
    }
}

impl Profile {
    /// The wire name of the profile.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Main => "main",
            Self::Baseline => "baseline",
            Self::High444p => "high444p",
        }
    }
}

/// Flat settings object supplied by the configuration collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    /// Active rate-control mode.
    pub rate_control: RateControl,
    /// Target bitrate in kbps.
    pub bitrate: u32,
    /// Quantizer value for CQP mode (0-50).
    pub cqp: u32,
    /// Keyframe interval in seconds; 0 selects the fixed fallback interval.
    pub keyint_sec: u32,
    /// Encoder preset.
    pub preset: Preset,
    /// H.264 profile.
    pub profile: Profile,
    /// H.264 level name ("auto" or a numbered level).
    pub level: String,
    /// Two-pass rate control.
    #[serde(rename = "2pass")]
    pub two_pass: bool,
    /// GPU device index.
    pub gpu: u32,
    /// Number of B-frames between reference frames.
    #[serde(rename = "bf")]
    pub b_frames: u32,
    /// Deprecated: forces CBR regardless of `rate_control`. Kept so old
    /// stored settings keep their meaning.
    pub cbr: bool,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            rate_control: RateControl::Cbr,
            bitrate: 850,
            cqp: 23,
            keyint_sec: 0,
            preset: Preset::Default,
            profile: Profile::Main,
            level: "auto".to_owned(),
            two_pass: true,
            gpu: 0,
            b_frames: 2,
            cbr: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = EncoderSettings::default();
        assert_eq!(s.rate_control, RateControl::Cbr);
        assert_eq!(s.bitrate, 850);
        assert_eq!(s.cqp, 23);
        assert_eq!(s.keyint_sec, 0);
        assert_eq!(s.preset, Preset::Default);
        assert_eq!(s.profile, Profile::Main);
        assert_eq!(s.level, "auto");
        assert!(s.two_pass);
        assert_eq!(s.gpu, 0);
        assert_eq!(s.b_frames, 2);
        assert!(!s.cbr);
    }

    #[test]
    fn test_wire_keys_round_trip() {
        let json = r#"{
            "rate_control": "CQP",
            "bitrate": 2500,
            "cqp": 30,
            "keyint_sec": 2,
            "preset": "llhq",
            "profile": "high",
            "level": "4.1",
            "2pass": false,
            "gpu": 1,
            "bf": 0
        }"#;
        let s: EncoderSettings = serde_json::from_str(json).unwrap();
        assert_eq!(s.rate_control, RateControl::Cqp);
        assert_eq!(s.preset, Preset::Llhq);
        assert_eq!(s.profile, Profile::High);
        assert!(!s.two_pass);
        assert_eq!(s.b_frames, 0);
        // Deprecated flag absent from the stored object defaults to off.
        assert!(!s.cbr);

        let back = serde_json::to_value(&s).unwrap();
        assert_eq!(back["rate_control"], "CQP");
        assert_eq!(back["preset"], "llhq");
        assert_eq!(back["2pass"], false);
        assert_eq!(back["bf"], 0);
    }

    #[test]
    fn test_high_performance_presets() {
        assert!(Preset::Hp.is_high_performance());
        assert!(Preset::Llhp.is_high_performance());
        assert!(!Preset::Default.is_high_performance());
        assert!(!Preset::Llhq.is_high_performance());
    }
}
