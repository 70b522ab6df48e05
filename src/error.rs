//! Error types shared by the device-facing layers.
//!
//! Every failure that reaches the command executor is terminal for the
//! invocation and is reported as `FAIL`/`NG`; the variants exist so the
//! log line says which step broke.

use thiserror::Error;

use crate::bus::BusError;
use crate::firmware::FirmwareError;
use crate::geometry::GeometryError;

pub type DeviceResult<T> = Result<T, DeviceError>;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("unexpected test mode acknowledgement 0x{got:02X} (expected 0x{expected:02X})")]
    UnexpectedAck { expected: u8, got: u8 },

    #[error("ready line did not assert after {polls} polls")]
    ReadyTimeout { polls: u32 },

    #[error("reply of {size} bytes exceeds the {limit} byte ceiling")]
    ReplyTooLarge { size: usize, limit: usize },

    #[error("reply of {size} bytes is shorter than the {needed} bytes the row needs")]
    ShortReply { size: usize, needed: usize },

    #[error("node geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("firmware error: {0}")]
    Firmware(#[from] FirmwareError),

    #[error("device is disabled")]
    Disabled,
}
