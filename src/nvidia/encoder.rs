//! NVENC-backed implementation of the device seam.

use std::collections::VecDeque;
use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use cudarc::driver::CudaContext;

use nvidia_video_codec_sdk::sys::nvEncodeAPI::{
    GUID, NVENCAPI_VERSION, NVENCSTATUS, NV_ENC_BUFFER_FORMAT, NV_ENC_CODEC_H264_GUID,
    NV_ENC_CONFIG, NV_ENC_CONFIG_VER, NV_ENC_CREATE_BITSTREAM_BUFFER,
    NV_ENC_CREATE_BITSTREAM_BUFFER_VER, NV_ENC_CREATE_INPUT_BUFFER, NV_ENC_CREATE_INPUT_BUFFER_VER,
    NV_ENC_DEVICE_TYPE, NV_ENC_H264_PROFILE_BASELINE_GUID, NV_ENC_H264_PROFILE_HIGH_444_GUID,
    NV_ENC_H264_PROFILE_HIGH_GUID, NV_ENC_H264_PROFILE_MAIN_GUID, NV_ENC_INITIALIZE_PARAMS,
    NV_ENC_INITIALIZE_PARAMS_VER, NV_ENC_LOCK_BITSTREAM, NV_ENC_LOCK_BITSTREAM_VER,
    NV_ENC_LOCK_INPUT_BUFFER, NV_ENC_LOCK_INPUT_BUFFER_VER, NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS,
    NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS_VER, NV_ENC_PARAMS_RC_MODE, NV_ENC_PIC_FLAGS,
    NV_ENC_PIC_PARAMS, NV_ENC_PIC_PARAMS_VER, NV_ENC_PIC_STRUCT, NV_ENC_PRESET_CONFIG,
    NV_ENC_PRESET_CONFIG_VER, NV_ENC_PRESET_P1_GUID, NV_ENC_PRESET_P2_GUID, NV_ENC_PRESET_P3_GUID,
    NV_ENC_PRESET_P4_GUID, NV_ENC_PRESET_P5_GUID, NV_ENC_QP, NV_ENC_TUNING_INFO,
};

use super::api::{ENCODE_API, NvencStatusExt};
use crate::device::{DevicePacket, EncodeDevice};
use crate::error::EncoderError;
use crate::frame::{PictureLayout, StagingPicture};
use crate::policy::DeviceConfig;
use crate::settings::{Preset, Profile};
use crate::types::PixelFormat;

/// NVENC hardware device.
///
/// `prepare` creates the CUDA context and the NVENC session and checks that
/// the device can encode H.264; `open` initializes the encoder with the
/// translated parameters and allocates the input and bitstream buffers.
pub struct NvencDevice {
    encoder: *mut c_void,
    cuda: Option<Arc<CudaContext>>,
    input_buffer: *mut c_void,
    output_bitstream: *mut c_void,
    buffer_format: NV_ENC_BUFFER_FORMAT,
    width: u32,
    height: u32,
    /// Submission-order timestamps; the oldest pending one is the dts of
    /// the next finished packet.
    pending_pts: VecDeque<i64>,
    eos_sent: bool,
    opened: bool,
}

// SAFETY: all operations take &mut self, and the CUDA context serializes
// driver access underneath.
unsafe impl Send for NvencDevice {}

impl Default for NvencDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl NvencDevice {
    /// Create an unprepared device.
    #[must_use]
    pub fn new() -> Self {
        Self {
            encoder: ptr::null_mut(),
            cuda: None,
            input_buffer: ptr::null_mut(),
            output_bitstream: ptr::null_mut(),
            buffer_format: NV_ENC_BUFFER_FORMAT::NV_ENC_BUFFER_FORMAT_NV12,
            width: 0,
            height: 0,
            pending_pts: VecDeque::new(),
            eos_sent: false,
            opened: false,
        }
    }

    fn upload_picture(&mut self, picture: &StagingPicture) -> Result<(), EncoderError> {
        let mut lock = NV_ENC_LOCK_INPUT_BUFFER {
            version: NV_ENC_LOCK_INPUT_BUFFER_VER,
            inputBuffer: self.input_buffer,
            ..Default::default()
        };
        unsafe { (ENCODE_API.lock_input_buffer)(self.encoder, &mut lock) }
            .ok(self.encoder)
            .map_err(EncoderError::Encode)?;

        let pitch = lock.pitch as usize;
        let base = lock.bufferDataPtr as *mut u8;
        let height = self.height as usize;

        copy_plane(picture.plane(0), picture.stride(0), base, pitch, height);
        match picture.format() {
            PixelFormat::Nv12 => {
                let uv = unsafe { base.add(pitch * height) };
                copy_plane(picture.plane(1), picture.stride(1), uv, pitch, height / 2);
            }
            PixelFormat::I420 => {
                let chroma_pitch = pitch / 2;
                let u = unsafe { base.add(pitch * height) };
                copy_plane(picture.plane(1), picture.stride(1), u, chroma_pitch, height / 2);
                let v = unsafe { u.add(chroma_pitch * (height / 2)) };
                copy_plane(picture.plane(2), picture.stride(2), v, chroma_pitch, height / 2);
            }
            format => {
                unsafe { (ENCODE_API.unlock_input_buffer)(self.encoder, self.input_buffer) }
                    .ok_quiet()
                    .ok();
                return Err(EncoderError::UnsupportedFormat(format));
            }
        }

        unsafe { (ENCODE_API.unlock_input_buffer)(self.encoder, self.input_buffer) }
            .ok(self.encoder)
            .map_err(EncoderError::Encode)
    }

    fn read_bitstream(&mut self) -> Result<DevicePacket, EncoderError> {
        let mut lock = NV_ENC_LOCK_BITSTREAM {
            version: NV_ENC_LOCK_BITSTREAM_VER,
            outputBitstream: self.output_bitstream,
            ..Default::default()
        };
        unsafe { (ENCODE_API.lock_bitstream)(self.encoder, &mut lock) }
            .ok(self.encoder)
            .map_err(EncoderError::Encode)?;

        let size = lock.bitstreamSizeInBytes as usize;
        let data =
            unsafe { std::slice::from_raw_parts(lock.bitstreamBufferPtr as *const u8, size) }
                .to_vec();
        let pts = lock.outputTimeStamp as i64;

        unsafe { (ENCODE_API.unlock_bitstream)(self.encoder, self.output_bitstream) }
            .ok(self.encoder)
            .map_err(EncoderError::Encode)?;

        let dts = self.pending_pts.pop_front().unwrap_or(pts);
        Ok(DevicePacket { data, pts, dts })
    }

    fn send_eos(&mut self) -> Result<(), String> {
        let mut pic_params = NV_ENC_PIC_PARAMS {
            version: NV_ENC_PIC_PARAMS_VER,
            encodePicFlags: NV_ENC_PIC_FLAGS::NV_ENC_PIC_FLAG_EOS as u32,
            ..Default::default()
        };
        unsafe { (ENCODE_API.encode_picture)(self.encoder, &mut pic_params) }.ok(self.encoder)
    }

    fn release(&mut self) {
        if self.opened && !self.eos_sent {
            self.send_eos().ok();
            self.eos_sent = true;
        }
        if !self.input_buffer.is_null() {
            unsafe { (ENCODE_API.destroy_input_buffer)(self.encoder, self.input_buffer) }
                .ok_quiet()
                .ok();
            self.input_buffer = ptr::null_mut();
        }
        if !self.output_bitstream.is_null() {
            unsafe { (ENCODE_API.destroy_bitstream_buffer)(self.encoder, self.output_bitstream) }
                .ok_quiet()
                .ok();
            self.output_bitstream = ptr::null_mut();
        }
        if !self.encoder.is_null() {
            unsafe { (ENCODE_API.destroy_encoder)(self.encoder) }
                .ok_quiet()
                .ok();
            self.encoder = ptr::null_mut();
        }
        self.cuda = None;
        self.opened = false;
        self.pending_pts.clear();
    }
}

impl Drop for NvencDevice {
    fn drop(&mut self) {
        self.release();
    }
}

impl EncodeDevice for NvencDevice {
    fn prepare(&mut self, config: &DeviceConfig) -> Result<(), EncoderError> {
        if self.encoder.is_null() {
            let cuda = CudaContext::new(config.gpu as usize)
                .map_err(|e| EncoderError::ContextAllocation(e.to_string()))?;

            let mut session_params = NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS {
                version: NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS_VER,
                deviceType: NV_ENC_DEVICE_TYPE::NV_ENC_DEVICE_TYPE_CUDA,
                apiVersion: NVENCAPI_VERSION,
                device: cuda.cu_ctx() as *mut c_void,
                ..Default::default()
            };

            let mut encoder = ptr::null_mut();
            let status =
                unsafe { (ENCODE_API.open_encode_session_ex)(&mut session_params, &mut encoder) };
            if let Err(msg) = status.ok_quiet() {
                if !encoder.is_null() {
                    unsafe { (ENCODE_API.destroy_encoder)(encoder) }.ok_quiet().ok();
                }
                return Err(EncoderError::ContextAllocation(msg));
            }
            self.encoder = encoder;
            self.cuda = Some(cuda);
        }

        let mut count = 0u32;
        unsafe { (ENCODE_API.get_encode_guid_count)(self.encoder, &mut count) }
            .ok(self.encoder)
            .map_err(EncoderError::CodecUnavailable)?;

        let mut guids = vec![GUID::default(); count as usize];
        let mut returned = 0u32;
        unsafe {
            (ENCODE_API.get_encode_guids)(self.encoder, guids.as_mut_ptr(), count, &mut returned)
        }
        .ok(self.encoder)
        .map_err(EncoderError::CodecUnavailable)?;
        guids.truncate(returned as usize);

        if !guids.iter().any(|g| guid_eq(g, &NV_ENC_CODEC_H264_GUID)) {
            return Err(EncoderError::codec_unavailable(
                "H.264 encoding not supported by this device",
            ));
        }
        Ok(())
    }

    fn open(&mut self, config: &DeviceConfig) -> Result<PictureLayout, EncoderError> {
        if self.encoder.is_null() {
            return Err(EncoderError::device_open("device context not prepared"));
        }

        let (preset_guid, tuning) = preset_to_device(config.preset);

        let mut preset_config = NV_ENC_PRESET_CONFIG {
            version: NV_ENC_PRESET_CONFIG_VER,
            presetCfg: NV_ENC_CONFIG {
                version: NV_ENC_CONFIG_VER,
                ..Default::default()
            },
            ..Default::default()
        };
        unsafe {
            (ENCODE_API.get_encode_preset_config_ex)(
                self.encoder,
                NV_ENC_CODEC_H264_GUID,
                preset_guid,
                tuning,
                &mut preset_config,
            )
        }
        .ok(self.encoder)
        .map_err(EncoderError::DeviceOpen)?;

        let mut encode_config = preset_config.presetCfg;
        encode_config.gopLength = config.gop_size;
        encode_config.frameIntervalP = config.b_frames as i32 + 1;
        encode_config.profileGUID = profile_to_guid(config.profile);

        let rc = &mut encode_config.rcParams;
        if config.cbr {
            rc.rateControlMode = NV_ENC_PARAMS_RC_MODE::NV_ENC_PARAMS_RC_CBR;
            rc.averageBitRate = config.bit_rate as u32;
            rc.maxBitRate = config.rc_max_rate as u32;
            rc.vbvBufferSize = config.rc_buffer_size as u32;
        } else if config.bit_rate > 0 {
            rc.rateControlMode = NV_ENC_PARAMS_RC_MODE::NV_ENC_PARAMS_RC_VBR;
            rc.averageBitRate = config.bit_rate as u32;
        } else {
            rc.rateControlMode = NV_ENC_PARAMS_RC_MODE::NV_ENC_PARAMS_RC_CONSTQP;
            rc.constQP = NV_ENC_QP {
                qpInterP: config.quantizer,
                qpInterB: config.quantizer,
                qpIntra: config.quantizer,
            };
        }

        let mut init_params = NV_ENC_INITIALIZE_PARAMS {
            version: NV_ENC_INITIALIZE_PARAMS_VER,
            encodeGUID: NV_ENC_CODEC_H264_GUID,
            presetGUID: preset_guid,
            encodeWidth: config.width,
            encodeHeight: config.height,
            darWidth: config.width,
            darHeight: config.height,
            frameRateNum: config.fps_num,
            frameRateDen: config.fps_den,
            enablePTD: 1,
            tuningInfo: tuning,
            encodeConfig: &mut encode_config,
            ..Default::default()
        };
        unsafe { (ENCODE_API.initialize_encoder)(self.encoder, &mut init_params) }
            .ok(self.encoder)
            .map_err(EncoderError::DeviceOpen)?;

        let buffer_format = buffer_format_for(config.format)?;
        let mut create_input = NV_ENC_CREATE_INPUT_BUFFER {
            version: NV_ENC_CREATE_INPUT_BUFFER_VER,
            width: config.width,
            height: config.height,
            bufferFmt: buffer_format,
            ..Default::default()
        };
        unsafe { (ENCODE_API.create_input_buffer)(self.encoder, &mut create_input) }
            .ok(self.encoder)
            .map_err(EncoderError::PictureAllocation)?;
        self.input_buffer = create_input.inputBuffer;

        let mut create_bitstream = NV_ENC_CREATE_BITSTREAM_BUFFER {
            version: NV_ENC_CREATE_BITSTREAM_BUFFER_VER,
            ..Default::default()
        };
        unsafe { (ENCODE_API.create_bitstream_buffer)(self.encoder, &mut create_bitstream) }
            .ok(self.encoder)
            .map_err(EncoderError::PictureAllocation)?;
        self.output_bitstream = create_bitstream.bitstreamBuffer;

        self.buffer_format = buffer_format;
        self.width = config.width;
        self.height = config.height;
        self.eos_sent = false;
        self.opened = true;

        // The session stages into tightly packed planes; pitch padding is
        // applied when the locked input buffer is filled.
        Ok(PictureLayout::with_alignment(
            config.format,
            config.width,
            config.height,
            1,
        ))
    }

    fn encode(
        &mut self,
        picture: Option<&StagingPicture>,
        pts: i64,
    ) -> Result<Option<DevicePacket>, EncoderError> {
        if !self.opened {
            return Err(EncoderError::encode("device not opened"));
        }

        let Some(picture) = picture else {
            if self.eos_sent {
                return Ok(None);
            }
            self.eos_sent = true;
            self.send_eos().map_err(EncoderError::Encode)?;
            self.pending_pts.clear();
            return Ok(None);
        };

        self.upload_picture(picture)?;

        let mut pic_params = NV_ENC_PIC_PARAMS {
            version: NV_ENC_PIC_PARAMS_VER,
            inputWidth: self.width,
            inputHeight: self.height,
            inputPitch: self.width,
            inputBuffer: self.input_buffer,
            outputBitstream: self.output_bitstream,
            bufferFmt: self.buffer_format,
            pictureStruct: NV_ENC_PIC_STRUCT::NV_ENC_PIC_STRUCT_FRAME,
            inputTimeStamp: pts as u64,
            ..Default::default()
        };

        let status = unsafe { (ENCODE_API.encode_picture)(self.encoder, &mut pic_params) };
        self.pending_pts.push_back(pts);
        if status == NVENCSTATUS::NV_ENC_ERR_NEED_MORE_INPUT {
            return Ok(None);
        }
        status.ok(self.encoder).map_err(EncoderError::Encode)?;

        self.read_bitstream().map(Some)
    }

    fn close(&mut self) {
        self.release();
    }
}

fn guid_eq(a: &GUID, b: &GUID) -> bool {
    a.Data1 == b.Data1 && a.Data2 == b.Data2 && a.Data3 == b.Data3 && a.Data4 == b.Data4
}

fn copy_plane(src: &[u8], src_stride: usize, dst: *mut u8, dst_stride: usize, rows: usize) {
    let bytes = src_stride.min(dst_stride);
    for y in 0..rows {
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr().add(y * src_stride), dst.add(y * dst_stride), bytes);
        }
    }
}

fn buffer_format_for(format: PixelFormat) -> Result<NV_ENC_BUFFER_FORMAT, EncoderError> {
    match format {
        PixelFormat::Nv12 => Ok(NV_ENC_BUFFER_FORMAT::NV_ENC_BUFFER_FORMAT_NV12),
        PixelFormat::I420 => Ok(NV_ENC_BUFFER_FORMAT::NV_ENC_BUFFER_FORMAT_IYUV),
        PixelFormat::I444 => Ok(NV_ENC_BUFFER_FORMAT::NV_ENC_BUFFER_FORMAT_YUV444),
        format => Err(EncoderError::UnsupportedFormat(format)),
    }
}

fn preset_to_device(preset: Preset) -> (GUID, NV_ENC_TUNING_INFO) {
    use NV_ENC_TUNING_INFO::{
        NV_ENC_TUNING_INFO_HIGH_QUALITY, NV_ENC_TUNING_INFO_LOSSLESS,
        NV_ENC_TUNING_INFO_LOW_LATENCY,
    };
    match preset {
        Preset::Default => (NV_ENC_PRESET_P4_GUID, NV_ENC_TUNING_INFO_HIGH_QUALITY),
        Preset::Hq | Preset::Bd => (NV_ENC_PRESET_P5_GUID, NV_ENC_TUNING_INFO_HIGH_QUALITY),
        Preset::Hp => (NV_ENC_PRESET_P2_GUID, NV_ENC_TUNING_INFO_HIGH_QUALITY),
        Preset::Ll => (NV_ENC_PRESET_P3_GUID, NV_ENC_TUNING_INFO_LOW_LATENCY),
        Preset::Llhq => (NV_ENC_PRESET_P4_GUID, NV_ENC_TUNING_INFO_LOW_LATENCY),
        Preset::Llhp => (NV_ENC_PRESET_P2_GUID, NV_ENC_TUNING_INFO_LOW_LATENCY),
        Preset::Lossless => (NV_ENC_PRESET_P4_GUID, NV_ENC_TUNING_INFO_LOSSLESS),
        Preset::LosslessHp => (NV_ENC_PRESET_P1_GUID, NV_ENC_TUNING_INFO_LOSSLESS),
    }
}

fn profile_to_guid(profile: Profile) -> GUID {
    match profile {
        Profile::Baseline => NV_ENC_H264_PROFILE_BASELINE_GUID,
        Profile::Main => NV_ENC_H264_PROFILE_MAIN_GUID,
        Profile::High => NV_ENC_H264_PROFILE_HIGH_GUID,
        Profile::High444p => NV_ENC_H264_PROFILE_HIGH_444_GUID,
    }
}
