//! NVENC API function pointer loading.
//!
//! The function list is loaded lazily, once per process; sessions never
//! perform the registration themselves.

use std::ffi::c_void;

use lazy_static::lazy_static;

use nvidia_video_codec_sdk::sys::nvEncodeAPI::{
    NvEncodeAPICreateInstance, NvEncodeAPIGetMaxSupportedVersion, GUID, NVENCAPI_MAJOR_VERSION,
    NVENCAPI_MINOR_VERSION, NVENCSTATUS, NV_ENCODE_API_FUNCTION_LIST,
    NV_ENCODE_API_FUNCTION_LIST_VER, NV_ENC_CREATE_BITSTREAM_BUFFER, NV_ENC_CREATE_INPUT_BUFFER,
    NV_ENC_INITIALIZE_PARAMS, NV_ENC_INPUT_PTR, NV_ENC_LOCK_BITSTREAM, NV_ENC_LOCK_INPUT_BUFFER,
    NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS, NV_ENC_OUTPUT_PTR, NV_ENC_PIC_PARAMS,
    NV_ENC_PRESET_CONFIG, NV_ENC_TUNING_INFO,
};

lazy_static! {
    /// Process-wide NVENC function list, loaded on first use.
    pub static ref ENCODE_API: EncodeAPI = EncodeAPI::new();
}

// Function type aliases
type OpenEncodeSessionEx = unsafe extern "C" fn(
    *mut NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS,
    *mut *mut c_void,
) -> NVENCSTATUS;
type InitializeEncoder =
    unsafe extern "C" fn(*mut c_void, *mut NV_ENC_INITIALIZE_PARAMS) -> NVENCSTATUS;
type DestroyEncoder = unsafe extern "C" fn(*mut c_void) -> NVENCSTATUS;
type GetEncodeGUIDCount = unsafe extern "C" fn(*mut c_void, *mut u32) -> NVENCSTATUS;
type GetEncodeGUIDs = unsafe extern "C" fn(*mut c_void, *mut GUID, u32, *mut u32) -> NVENCSTATUS;
type GetEncodePresetConfigEx = unsafe extern "C" fn(
    *mut c_void,
    GUID,
    GUID,
    NV_ENC_TUNING_INFO,
    *mut NV_ENC_PRESET_CONFIG,
) -> NVENCSTATUS;
type CreateInputBuffer =
    unsafe extern "C" fn(*mut c_void, *mut NV_ENC_CREATE_INPUT_BUFFER) -> NVENCSTATUS;
type DestroyInputBuffer = unsafe extern "C" fn(*mut c_void, NV_ENC_INPUT_PTR) -> NVENCSTATUS;
type CreateBitstreamBuffer =
    unsafe extern "C" fn(*mut c_void, *mut NV_ENC_CREATE_BITSTREAM_BUFFER) -> NVENCSTATUS;
type DestroyBitstreamBuffer = unsafe extern "C" fn(*mut c_void, NV_ENC_OUTPUT_PTR) -> NVENCSTATUS;
type EncodePicture = unsafe extern "C" fn(*mut c_void, *mut NV_ENC_PIC_PARAMS) -> NVENCSTATUS;
type LockBitstream = unsafe extern "C" fn(*mut c_void, *mut NV_ENC_LOCK_BITSTREAM) -> NVENCSTATUS;
type UnlockBitstream = unsafe extern "C" fn(*mut c_void, NV_ENC_OUTPUT_PTR) -> NVENCSTATUS;
type LockInputBuffer =
    unsafe extern "C" fn(*mut c_void, *mut NV_ENC_LOCK_INPUT_BUFFER) -> NVENCSTATUS;
type UnlockInputBuffer = unsafe extern "C" fn(*mut c_void, NV_ENC_INPUT_PTR) -> NVENCSTATUS;
type GetLastErrorString = unsafe extern "C" fn(*mut c_void) -> *const ::core::ffi::c_char;

/// NVENC API function pointers used by the encoder backend.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct EncodeAPI {
    pub open_encode_session_ex: OpenEncodeSessionEx,
    pub initialize_encoder: InitializeEncoder,
    pub destroy_encoder: DestroyEncoder,
    pub get_encode_guid_count: GetEncodeGUIDCount,
    pub get_encode_guids: GetEncodeGUIDs,
    pub get_encode_preset_config_ex: GetEncodePresetConfigEx,
    pub create_input_buffer: CreateInputBuffer,
    pub destroy_input_buffer: DestroyInputBuffer,
    pub create_bitstream_buffer: CreateBitstreamBuffer,
    pub destroy_bitstream_buffer: DestroyBitstreamBuffer,
    pub encode_picture: EncodePicture,
    pub lock_bitstream: LockBitstream,
    pub unlock_bitstream: UnlockBitstream,
    pub lock_input_buffer: LockInputBuffer,
    pub unlock_input_buffer: UnlockInputBuffer,
    pub get_last_error_string: GetLastErrorString,
}

impl EncodeAPI {
    fn new() -> Self {
        const MSG: &str = "The API instance should populate the whole function list.";

        // The driver must support at least the version these bindings target.
        let mut version = 0u32;
        unsafe { NvEncodeAPIGetMaxSupportedVersion(&mut version) }
            .ok_quiet()
            .expect("Failed to get max supported NVENC version");

        let major_version = version >> 4;
        let minor_version = version & 0b1111;
        assert!(
            (major_version, minor_version) >= (NVENCAPI_MAJOR_VERSION, NVENCAPI_MINOR_VERSION),
            "NVENC driver version {}.{} is older than required {}.{}",
            major_version,
            minor_version,
            NVENCAPI_MAJOR_VERSION,
            NVENCAPI_MINOR_VERSION
        );

        let mut function_list = NV_ENCODE_API_FUNCTION_LIST {
            version: NV_ENCODE_API_FUNCTION_LIST_VER,
            ..Default::default()
        };

        unsafe { NvEncodeAPICreateInstance(&mut function_list) }
            .ok_quiet()
            .expect("Failed to create NVENC API instance");

        Self {
            open_encode_session_ex: function_list.nvEncOpenEncodeSessionEx.expect(MSG),
            initialize_encoder: function_list.nvEncInitializeEncoder.expect(MSG),
            destroy_encoder: function_list.nvEncDestroyEncoder.expect(MSG),
            get_encode_guid_count: function_list.nvEncGetEncodeGUIDCount.expect(MSG),
            get_encode_guids: function_list.nvEncGetEncodeGUIDs.expect(MSG),
            get_encode_preset_config_ex: function_list.nvEncGetEncodePresetConfigEx.expect(MSG),
            create_input_buffer: function_list.nvEncCreateInputBuffer.expect(MSG),
            destroy_input_buffer: function_list.nvEncDestroyInputBuffer.expect(MSG),
            create_bitstream_buffer: function_list.nvEncCreateBitstreamBuffer.expect(MSG),
            destroy_bitstream_buffer: function_list.nvEncDestroyBitstreamBuffer.expect(MSG),
            encode_picture: function_list.nvEncEncodePicture.expect(MSG),
            lock_bitstream: function_list.nvEncLockBitstream.expect(MSG),
            unlock_bitstream: function_list.nvEncUnlockBitstream.expect(MSG),
            lock_input_buffer: function_list.nvEncLockInputBuffer.expect(MSG),
            unlock_input_buffer: function_list.nvEncUnlockInputBuffer.expect(MSG),
            get_last_error_string: function_list.nvEncGetLastErrorString.expect(MSG),
        }
    }
}

/// Convert an `NVENCSTATUS` into a `Result` with a diagnostic message.
///
/// The caller wraps the message into the error class appropriate for its
/// call site (open vs. per-frame encode), so this layer stays class
/// agnostic.
pub trait NvencStatusExt {
    /// Check the status, appending the device's last error string.
    fn ok(self, encoder: *mut c_void) -> Result<(), String>;
    /// Check the status without querying the device.
    fn ok_quiet(self) -> Result<(), String>;
}

impl NvencStatusExt for NVENCSTATUS {
    fn ok(self, encoder: *mut c_void) -> Result<(), String> {
        self.ok_quiet().map_err(|mut msg| {
            if !encoder.is_null() {
                let detail = unsafe { (ENCODE_API.get_last_error_string)(encoder) };
                if !detail.is_null() {
                    let detail = unsafe { std::ffi::CStr::from_ptr(detail) };
                    if let Ok(detail) = detail.to_str() {
                        if !detail.is_empty() {
                            msg = format!("{msg}: {detail}");
                        }
                    }
                }
            }
            msg
        })
    }

    fn ok_quiet(self) -> Result<(), String> {
        if self == NVENCSTATUS::NV_ENC_SUCCESS {
            Ok(())
        } else {
            Err(format!("{self:?}"))
        }
    }
}
