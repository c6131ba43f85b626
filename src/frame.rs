//! Raw frame views and the device-format staging picture.
//!
//! The session owns one [`StagingPicture`] sized at open time; every encode
//! call copies the caller's [`RawFrame`] into it row by row. Source and
//! destination row strides are independent, so a copy never assumes equal
//! row sizes.

use crate::error::EncoderError;
use crate::types::PixelFormat;

/// Maximum number of color planes a frame may carry.
pub const MAX_PLANES: usize = 4;

/// One borrowed plane of a raw frame: a byte slice plus its row stride.
///
/// The slice must cover `stride * rows` bytes for every row the stager
/// reads (full height for luma, half height for chroma).
#[derive(Debug, Clone, Copy)]
pub struct FramePlane<'a> {
    pub data: &'a [u8],
    pub stride: usize,
}

/// A caller-owned, read-only view of a raw video frame.
///
/// Planes may be absent (an unused alpha plane, for instance); absent planes
/// are skipped during staging. The frame is consumed synchronously; no
/// ownership transfer takes place.
#[derive(Debug, Clone, Copy)]
pub struct RawFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub planes: [Option<FramePlane<'a>>; MAX_PLANES],
    /// Presentation timestamp in stream time-base units.
    pub pts: i64,
}

impl<'a> RawFrame<'a> {
    /// Create an empty frame view with the given dimensions and timestamp.
    #[must_use]
    pub fn new(width: u32, height: u32, pts: i64) -> Self {
        Self {
            width,
            height,
            planes: [None; MAX_PLANES],
            pts,
        }
    }

    /// Attach a plane.
    #[must_use]
    pub fn with_plane(mut self, index: usize, data: &'a [u8], stride: usize) -> Self {
        self.planes[index] = Some(FramePlane { data, stride });
        self
    }
}

/// Row stride and row count of one staging-picture plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub stride: usize,
    pub rows: usize,
}

/// Plane layout of a device-format picture, as reported by the device at
/// open time. Strides are the device's choice and generally differ from any
/// source frame's strides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureLayout {
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
    pub planes: Vec<PlaneLayout>,
}

impl PictureLayout {
    /// Compute a layout for `format` with every stride rounded up to
    /// `align` bytes. `align` must be a power of two; 1 gives tight packing.
    #[must_use]
    pub fn with_alignment(format: PixelFormat, width: u32, height: u32, align: usize) -> Self {
        let w = width as usize;
        let h = height as usize;
        let pad = |n: usize| (n + align - 1) & !(align - 1);

        let planes = match format {
            PixelFormat::Nv12 => vec![
                PlaneLayout { stride: pad(w), rows: h },
                PlaneLayout { stride: pad(w), rows: h / 2 },
            ],
            PixelFormat::I420 => vec![
                PlaneLayout { stride: pad(w), rows: h },
                PlaneLayout { stride: pad(w / 2), rows: h / 2 },
                PlaneLayout { stride: pad(w / 2), rows: h / 2 },
            ],
            PixelFormat::I444 => vec![
                PlaneLayout { stride: pad(w), rows: h },
                PlaneLayout { stride: pad(w), rows: h },
                PlaneLayout { stride: pad(w), rows: h },
            ],
            PixelFormat::Rgb | PixelFormat::Bgr => {
                vec![PlaneLayout { stride: pad(w * 3), rows: h }]
            }
            PixelFormat::Rgba | PixelFormat::Bgra => {
                vec![PlaneLayout { stride: pad(w * 4), rows: h }]
            }
        };

        Self {
            format,
            width,
            height,
            planes,
        }
    }
}

/// The device-format picture the session stages frames into.
///
/// Allocated once at open time and reused for every encode call.
#[derive(Debug)]
pub struct StagingPicture {
    layout: PictureLayout,
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl StagingPicture {
    /// Allocate a picture for the given layout.
    pub fn alloc(layout: &PictureLayout) -> Result<Self, EncoderError> {
        if layout.width == 0 || layout.height == 0 {
            return Err(EncoderError::PictureAllocation(format!(
                "zero-sized picture {}x{}",
                layout.width, layout.height
            )));
        }
        if layout.planes.len() != layout.format.plane_count() {
            return Err(EncoderError::PictureAllocation(format!(
                "layout has {} planes, {:?} needs {}",
                layout.planes.len(),
                layout.format,
                layout.format.plane_count()
            )));
        }

        let mut offsets = Vec::with_capacity(layout.planes.len());
        let mut total = 0usize;
        for plane in &layout.planes {
            offsets.push(total);
            total += plane.stride * plane.rows;
        }

        Ok(Self {
            layout: layout.clone(),
            offsets,
            data: vec![0; total],
        })
    }

    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.layout.format
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.layout.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.layout.height
    }

    #[must_use]
    pub fn plane_count(&self) -> usize {
        self.layout.planes.len()
    }

    /// Row stride of plane `index`.
    #[must_use]
    pub fn stride(&self, index: usize) -> usize {
        self.layout.planes[index].stride
    }

    /// Read access to plane `index`.
    #[must_use]
    pub fn plane(&self, index: usize) -> &[u8] {
        let start = self.offsets[index];
        let len = self.layout.planes[index].stride * self.layout.planes[index].rows;
        &self.data[start..start + len]
    }

    fn plane_mut(&mut self, index: usize) -> &mut [u8] {
        let start = self.offsets[index];
        let len = self.layout.planes[index].stride * self.layout.planes[index].rows;
        &mut self.data[start..start + len]
    }
}

/// Copy a raw frame into the staging picture.
///
/// Each present source plane is copied row by row; every row transfers
/// `min(src_stride, dst_stride)` bytes. Plane 0 is copied at full height,
/// every subsequent plane at half height: the stager is a 4:2:0 contract,
/// and pictures in a non-subsampled format are rejected rather than
/// corrupted. The frame's resolution must match the picture's.
pub fn stage_frame(picture: &mut StagingPicture, frame: &RawFrame<'_>) -> Result<(), EncoderError> {
    if frame.width != picture.width() || frame.height != picture.height() {
        return Err(EncoderError::InvalidDimensions {
            width: frame.width,
            height: frame.height,
            expected_width: picture.width(),
            expected_height: picture.height(),
        });
    }
    if !picture.format().is_chroma_subsampled() {
        return Err(EncoderError::UnsupportedFormat(picture.format()));
    }

    let height = picture.height() as usize;
    for index in 0..MAX_PLANES {
        let Some(src) = frame.planes[index] else {
            continue;
        };
        if index >= picture.plane_count() {
            continue;
        }

        let dst_stride = picture.stride(index);
        let bytes = src.stride.min(dst_stride);
        let plane_height = if index == 0 { height } else { height / 2 };

        let dst = picture.plane_mut(index);
        for y in 0..plane_height {
            let src_pos = y * src.stride;
            let dst_pos = y * dst_stride;
            dst[dst_pos..dst_pos + bytes].copy_from_slice(&src.data[src_pos..src_pos + bytes]);
        }
    }

    Ok(())
}
