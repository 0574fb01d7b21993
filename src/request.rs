//! The description of one upload: which files go to which device, and how.

use std::path::{Path, PathBuf};

use crate::config::{DeployConfig, FlashParams};

/// File name of the bootloader image in the build directory
pub const BOOTLOADER_FILE: &str = "bootloader.bin";
/// File name of the partition table image in the build directory
pub const PARTITION_TABLE_FILE: &str = "partitions.bin";

/// Everything an uploader needs to know about one deployment.
///
/// Built once per invocation and then only ever shared by reference; both channels see exactly
/// the same request.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UploadRequest {
    /// The application image; the only artifact sent over OTA
    pub firmware: PathBuf,

    pub bootloader: PathBuf,
    pub partition_table: PathBuf,

    /// `host` or `host:port` of the device's update endpoint
    pub address: String,

    /// Serial device the board is attached to
    pub serial_port: String,

    pub flash: FlashParams,
}

impl UploadRequest {
    /// Describe an upload of `firmware` to the device in `config`.
    ///
    /// The bootloader and partition table are expected next to the firmware image, the way the
    /// build leaves them; use `build_dir` or the individual setters if they live elsewhere.
    pub fn new(firmware: impl Into<PathBuf>, config: &DeployConfig) -> Self {
        let firmware = firmware.into();
        let build_dir = firmware.parent().unwrap_or(Path::new("")).to_owned();

        Self {
            bootloader: build_dir.join(BOOTLOADER_FILE),
            partition_table: build_dir.join(PARTITION_TABLE_FILE),
            firmware,
            address: config.ota.address.clone(),
            serial_port: config.serial.port.clone(),
            flash: config.serial.flash.clone(),
        }
    }

    /// Look for the bootloader and partition table in `dir`
    pub fn build_dir(self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            bootloader: dir.join(BOOTLOADER_FILE),
            partition_table: dir.join(PARTITION_TABLE_FILE),
            ..self
        }
    }

    pub fn bootloader(self, path: impl Into<PathBuf>) -> Self {
        Self {
            bootloader: path.into(),
            ..self
        }
    }

    pub fn partition_table(self, path: impl Into<PathBuf>) -> Self {
        Self {
            partition_table: path.into(),
            ..self
        }
    }

    /// The (offset, file) pairs written by the serial channel, in write order
    pub fn flash_map(&self) -> [(u32, &Path); 3] {
        let offsets = self.flash.offsets;
        [
            (offsets.bootloader, &self.bootloader),
            (offsets.partition_table, &self.partition_table),
            (offsets.application, &self.firmware),
        ]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_artifacts_next_to_firmware() {
        let config = DeployConfig::default();
        let request = UploadRequest::new(".pio/build/m5echo/firmware.bin", &config);

        assert_eq!(
            request.bootloader,
            Path::new(".pio/build/m5echo/bootloader.bin")
        );
        assert_eq!(
            request.partition_table,
            Path::new(".pio/build/m5echo/partitions.bin")
        );
        assert_eq!(request.address, config.ota.address);
        assert_eq!(request.serial_port, config.serial.port);
    }

    #[test]
    fn test_bare_file_name() {
        let request = UploadRequest::new("firmware.bin", &DeployConfig::default());
        assert_eq!(request.bootloader, Path::new("bootloader.bin"));
    }

    #[test]
    fn test_overrides() {
        let request = UploadRequest::new("out/firmware.bin", &DeployConfig::default())
            .build_dir("build")
            .partition_table("custom/parts.bin");

        assert_eq!(request.firmware, Path::new("out/firmware.bin"));
        assert_eq!(request.bootloader, Path::new("build/bootloader.bin"));
        assert_eq!(request.partition_table, Path::new("custom/parts.bin"));
    }

    #[test]
    fn test_flash_map_order() {
        let request = UploadRequest::new("b/firmware.bin", &DeployConfig::default());
        let map = request.flash_map();

        assert_eq!(map[0], (0x1000, Path::new("b/bootloader.bin")));
        assert_eq!(map[1], (0x8000, Path::new("b/partitions.bin")));
        assert_eq!(map[2], (0x10000, Path::new("b/firmware.bin")));
    }
}
