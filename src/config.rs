use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::bus::ReadyPolicy;
use crate::regs;

const DEFAULT_FIRMWARE_DIR: &str = "/lib/firmware";
const DEFAULT_BUILTIN_FW: &str = "melfas/mms134s.fw";
const DEFAULT_UMS_FW: &str = "/sdcard/mms134s.fw";
const DEFAULT_SIM_PORT: u16 = 8080;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Board-level settings for the factory engine. Every field has a default
/// so a config file only needs to name what differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactoryConfig {
    pub i2c_addr: u8,
    /// Directory the built-in image name is resolved against.
    pub firmware_dir: PathBuf,
    pub builtin_fw_name: String,
    /// Image dropped on user storage for `fw_update,1`.
    pub ums_fw_path: PathBuf,
    pub ready_policy: ReadyPolicy,
    /// Panel has dedicated key sensors next to the grid.
    pub touch_keys: bool,
    pub sim_port: u16,
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            i2c_addr: regs::I2C_ADDR,
            firmware_dir: PathBuf::from(DEFAULT_FIRMWARE_DIR),
            builtin_fw_name: DEFAULT_BUILTIN_FW.to_string(),
            ums_fw_path: PathBuf::from(DEFAULT_UMS_FW),
            ready_policy: ReadyPolicy::Unbounded,
            touch_keys: true,
            sim_port: DEFAULT_SIM_PORT,
        }
    }
}

impl FactoryConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn builtin_fw_path(&self) -> PathBuf {
        self.firmware_dir.join(&self.builtin_fw_name)
    }
}
