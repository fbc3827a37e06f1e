//! Remote camera control packets.

use bytes::Bytes;
use uuid::Uuid;

use crate::codec::{Decoder, Encoder};
use crate::error::{WireError, WireResult};

/// Camera control request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMode {
    /// Ask whether control is granted (starts the grant handshake)
    Check = 0,
    /// Unmute / enable the remote camera
    On = 1,
    /// Mute / disable the remote camera
    Off = 2,
    /// Select a specific camera (facing switch)
    Select = 3,
    /// Apply a zoom scale
    Zoom = 4,
    /// Revoke the grant, from whichever side holds it
    Stop = 5,
}

impl CameraMode {
    fn from_tag(tag: i32) -> WireResult<Self> {
        match tag {
            0 => Ok(CameraMode::Check),
            1 => Ok(CameraMode::On),
            2 => Ok(CameraMode::Off),
            3 => Ok(CameraMode::Select),
            4 => Ok(CameraMode::Zoom),
            5 => Ok(CameraMode::Stop),
            value => Err(WireError::InvalidEnumValue {
                name: "CameraMode",
                value,
            }),
        }
    }
}

/// Camera control response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraError {
    /// The request was applied
    Success = 0,
    /// The local policy denies remote control
    NoPermission = 1,
    /// The requested camera does not exist
    NoCamera = 2,
    /// Platform/camera failure while applying the request
    Failure = 3,
}

impl CameraError {
    fn from_tag(tag: i32) -> WireResult<Self> {
        match tag {
            0 => Ok(CameraError::Success),
            1 => Ok(CameraError::NoPermission),
            2 => Ok(CameraError::NoCamera),
            3 => Ok(CameraError::Failure),
            value => Err(WireError::InvalidEnumValue {
                name: "CameraError",
                value,
            }),
        }
    }
}

/// Remote camera control request.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraControlIq {
    /// Envelope request id
    pub request_id: i64,
    /// Requested operation
    pub mode: CameraMode,
    /// Camera index for Select (ignored otherwise)
    pub camera: i32,
    /// Zoom scale for Zoom (ignored otherwise)
    pub scale: f64,
}

impl CameraControlIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0x23944227_0609_48de_85c6_e03143c1dc5e);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_enum(self.mode as i32);
        enc.put_i32(self.camera);
        enc.put_f64(self.scale);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            mode: CameraMode::from_tag(dec.get_enum()?)?,
            camera: dec.get_i32()?,
            scale: dec.get_f64()?,
        })
    }
}

/// Response/ack to a [`CameraControlIq`].
#[derive(Debug, Clone, PartialEq)]
pub struct CameraResponseIq {
    /// Envelope request id
    pub request_id: i64,
    /// Outcome of the request
    pub error: CameraError,
    /// Bitmap of available cameras (bit N set = camera N exists)
    pub camera_bitmap: i32,
    /// Index of the currently active camera
    pub active_camera: i32,
    /// Minimum allowed zoom scale
    pub min_zoom: f64,
    /// Maximum allowed zoom scale
    pub max_zoom: f64,
}

impl CameraResponseIq {
    pub const SCHEMA_ID: Uuid = Uuid::from_u128(0xcd34f4a1_9b82_4226_bc9c_4c71667f7b76);
    pub const SCHEMA_VERSION: i32 = 1;

    /// Encode into one data-channel frame.
    pub fn encode(&self) -> Bytes {
        let mut enc = Encoder::new(Self::SCHEMA_ID, Self::SCHEMA_VERSION, self.request_id);
        enc.put_enum(self.error as i32);
        enc.put_i32(self.camera_bitmap);
        enc.put_i32(self.active_camera);
        enc.put_f64(self.min_zoom);
        enc.put_f64(self.max_zoom);
        enc.finish()
    }

    pub(crate) fn decode_payload(dec: &mut Decoder, request_id: i64) -> WireResult<Self> {
        Ok(Self {
            request_id,
            error: CameraError::from_tag(dec.get_enum()?)?,
            camera_bitmap: dec.get_i32()?,
            active_camera: dec.get_i32()?,
            min_zoom: dec.get_f64()?,
            max_zoom: dec.get_f64()?,
        })
    }
}
