//! Firmware image sources for `fw_update`.
//!
//! How the image is written to the controller is behind
//! [`FirmwareFlasher`]; this module only decides where the bytes come from.

use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::bus::RegisterBus;
use crate::config::FactoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareSource {
    /// Image shipped with the driver.
    BuiltIn,
    /// Image placed on user mass storage.
    Ums,
}

impl FirmwareSource {
    pub fn from_param(param: i32) -> Result<Self, FirmwareError> {
        match param {
            0 => Ok(FirmwareSource::BuiltIn),
            1 => Ok(FirmwareSource::Ums),
            other => Err(FirmwareError::InvalidSource(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("invalid update type ({0})")]
    InvalidSource(i32),
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("read {got} of {expected} bytes from {path}")]
    ShortRead {
        path: PathBuf,
        expected: u64,
        got: u64,
    },
    #[error("firmware image {0} is empty")]
    Empty(PathBuf),
    #[error("flash failed: {0}")]
    Flash(String),
}

pub trait FirmwareProvider {
    fn load(&mut self, source: FirmwareSource) -> Result<Vec<u8>, FirmwareError>;
}

/// Writes an image to the controller. Runs with interrupts suspended and
/// the input lock held.
pub trait FirmwareFlasher {
    fn flash(&mut self, bus: &mut dyn RegisterBus, image: &[u8]) -> Result<(), FirmwareError>;
}

/// Loads images from the filesystem paths in [`FactoryConfig`].
#[derive(Debug, Clone)]
pub struct FileFirmwareProvider {
    builtin: PathBuf,
    ums: PathBuf,
}

impl FileFirmwareProvider {
    pub fn new(builtin: PathBuf, ums: PathBuf) -> Self {
        Self { builtin, ums }
    }

    pub fn from_config(config: &FactoryConfig) -> Self {
        Self::new(config.builtin_fw_path(), config.ums_fw_path.clone())
    }

    pub fn path(&self, source: FirmwareSource) -> &PathBuf {
        match source {
            FirmwareSource::BuiltIn => &self.builtin,
            FirmwareSource::Ums => &self.ums,
        }
    }
}

impl FirmwareProvider for FileFirmwareProvider {
    fn load(&mut self, source: FirmwareSource) -> Result<Vec<u8>, FirmwareError> {
        let path = self.path(source).clone();
        info!("firmware load {}", path.display());

        let open_err = |source| FirmwareError::Open {
            path: path.clone(),
            source,
        };
        let mut file = File::open(&path).map_err(open_err)?;
        let expected = file.metadata().map_err(open_err)?.len();
        if expected == 0 {
            return Err(FirmwareError::Empty(path));
        }

        let mut image = Vec::with_capacity(usize::try_from(expected).unwrap_or_default());
        let got = file.read_to_end(&mut image).map_err(open_err)? as u64;
        if got != expected {
            return Err(FirmwareError::ShortRead { path, expected, got });
        }

        Ok(image)
    }
}
