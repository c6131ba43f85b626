//! Core types shared by the encoder session and its collaborators.

/// Pixel format of a raw video frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// RGB with 8 bits per channel (24 bits per pixel).
    Rgb,
    /// RGBA with 8 bits per channel (32 bits per pixel).
    Rgba,
    /// BGR with 8 bits per channel (24 bits per pixel).
    Bgr,
    /// BGRA with 8 bits per channel (32 bits per pixel).
    Bgra,
    /// NV12 (YUV 4:2:0, planar Y + interleaved UV).
    Nv12,
    /// I420/YUV420P (YUV 4:2:0, planar Y + U + V).
    I420,
    /// I444/YUV444P (YUV 4:4:4, planar Y + U + V, no subsampling).
    I444,
}

impl PixelFormat {
    /// Returns true if the hardware encoder accepts this format directly.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::I420 | Self::Nv12 | Self::I444)
    }

    /// Returns true if this is a planar format (luma and chroma in separate planes).
    #[must_use]
    pub fn is_planar(&self) -> bool {
        matches!(self, Self::Nv12 | Self::I420 | Self::I444)
    }

    /// Returns true for 4:2:0 formats whose chroma planes are half height.
    #[must_use]
    pub fn is_chroma_subsampled(&self) -> bool {
        matches!(self, Self::Nv12 | Self::I420)
    }

    /// Number of planes the format carries.
    #[must_use]
    pub fn plane_count(&self) -> usize {
        match self {
            Self::Rgb | Self::Rgba | Self::Bgr | Self::Bgra => 1,
            Self::Nv12 => 2,
            Self::I420 | Self::I444 => 3,
        }
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::Nv12
    }
}

/// Colorspace of a raw video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Colorspace {
    /// ITU-R BT.601 / BT.470BG.
    Rec601,
    /// ITU-R BT.709.
    Rec709,
}

impl Default for Colorspace {
    fn default() -> Self {
        Self::Rec709
    }
}

/// Quantization range of a raw video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorRange {
    /// Limited/MPEG range (16-235 for 8-bit luma).
    Limited,
    /// Full/JPEG range (0-255).
    Full,
}

impl Default for ColorRange {
    fn default() -> Self {
        Self::Limited
    }
}

/// Properties of the negotiated video stream feeding the encoder.
///
/// Supplied by the video-source collaborator; the session treats it as
/// read-only input to configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format the source proposes.
    pub format: PixelFormat,
    /// Colorspace of the source.
    pub colorspace: Colorspace,
    /// Quantization range of the source.
    pub range: ColorRange,
    /// Frame rate numerator.
    pub fps_num: u32,
    /// Frame rate denominator.
    pub fps_den: u32,
}

impl StreamInfo {
    /// Create stream properties with the given dimensions and frame rate,
    /// defaulting to NV12 / BT.709 / limited range.
    #[must_use]
    pub fn new(width: u32, height: u32, fps_num: u32, fps_den: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::default(),
            colorspace: Colorspace::default(),
            range: ColorRange::default(),
            fps_num,
            fps_den,
        }
    }

    /// Set the source pixel format.
    #[must_use]
    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the source colorspace.
    #[must_use]
    pub fn colorspace(mut self, colorspace: Colorspace) -> Self {
        self.colorspace = colorspace;
        self
    }

    /// Set the source quantization range.
    #[must_use]
    pub fn range(mut self, range: ColorRange) -> Self {
        self.range = range;
        self
    }
}

/// Pick the pixel format the encoder will run in.
///
/// A caller-requested format wins if the encoder supports it. Otherwise the
/// source's own format is kept when supported, and anything else falls back
/// to NV12 rather than passing an arbitrary raw format to the device.
#[must_use]
pub fn preferred_format(requested: Option<PixelFormat>, source: PixelFormat) -> PixelFormat {
    match requested {
        Some(format) if format.is_supported() => format,
        _ => {
            if source.is_supported() {
                source
            } else {
                PixelFormat::Nv12
            }
        }
    }
}
