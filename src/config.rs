//! Everything about the target device and the tools used to reach it.
//!
//! Defaults are compiled in; a TOML file can override any subset of them, and the binary applies
//! its command-line flags on top of that.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use crate::process::ToolCommand;

/// Where the second-stage bootloader lives on ESP32 flash
pub const BOOTLOADER_OFFSET: u32 = 0x1000;
/// Where the ESP-IDF partition table lives
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;
/// Where the first app partition starts, with the default partition table
pub const APPLICATION_OFFSET: u32 = 0x10000;

pub const DEFAULT_OTA_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// The path the device's update handler listens on
pub const OTA_UPDATE_PATH: &str = "/update";
/// The multipart form field the update handler expects the image in
pub const OTA_FORM_FIELD: &str = "update";

/// Looked for in the working directory when no config file is named explicitly
pub const DEFAULT_CONFIG_FILE: &str = "fw-deploy.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeployConfig {
    pub ota: OtaConfig,
    pub serial: SerialConfig,
}

/// Settings for the network channel
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OtaConfig {
    /// `host` or `host:port` of the device
    pub address: String,

    /// The HTTP transfer tool (must accept curl's arguments)
    pub tool: ToolCommand,

    /// How long the whole transfer may take before we give up on the network
    pub timeout_secs: u64,
}

/// Settings for the serial channel
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    /// The flashing tool (must accept esptool's arguments)
    pub tool: ToolCommand,

    /// Serial device the board is attached to
    pub port: String,

    pub flash: FlashParams,
}

/// Parameters handed to the flashing tool
#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashParams {
    pub chip: String,
    pub baud: u32,

    /// Reset behavior before flashing
    pub before: String,
    /// Reset behavior after flashing
    pub after: String,

    /// Compress data in transfer (`-z`)
    pub compress: bool,

    pub flash_mode: String,
    pub flash_freq: String,
    pub flash_size: String,

    pub offsets: FlashLayout,
}

/// Flash memory map: where each artifact is written
#[derive(Debug, Copy, Clone, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlashLayout {
    pub bootloader: u32,
    pub partition_table: u32,
    pub application: u32,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            // ESP32 soft-AP address; anything on a real network needs configuring
            address: "192.168.4.1".into(),
            tool: ToolCommand::new("curl"),
            timeout_secs: DEFAULT_OTA_TIMEOUT.as_secs(),
        }
    }
}

impl OtaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            tool: ToolCommand::new("esptool.py"),
            port: "/dev/ttyUSB0".into(),
            flash: FlashParams::default(),
        }
    }
}

impl Default for FlashParams {
    fn default() -> Self {
        Self {
            chip: "esp32".into(),
            baud: DEFAULT_BAUD_RATE,
            before: "default_reset".into(),
            after: "hard_reset".into(),
            compress: true,
            flash_mode: "qio".into(),
            flash_freq: "80m".into(),
            flash_size: "4MB".into(),
            offsets: FlashLayout::default(),
        }
    }
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            bootloader: BOOTLOADER_OFFSET,
            partition_table: PARTITION_TABLE_OFFSET,
            application: APPLICATION_OFFSET,
        }
    }
}

impl DeployConfig {
    /// Load configuration from a specific TOML file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Load `path` if given, else `fw-deploy.toml` if it exists, else the defaults
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
            }
            None => Ok(Self::default()),
        }
    }
}
