//! Serial upload through `esptool`.
//!
//! This is the fallback channel, and it writes the whole flash memory map (bootloader, partition
//! table and application) rather than only the application. There is no timeout: the tool gets as
//! long as it takes, and it talks straight to the console so its own progress output is visible.

use std::ffi::OsString;

use super::{describe, Uploader};
use crate::config::SerialConfig;
use crate::outcome::{FailureReason, UploadOutcome};
use crate::process::{self, OutputMode, ToolCommand, ToolError};
use crate::request::UploadRequest;

#[derive(Debug, Clone)]
pub struct SerialUploader {
    tool: ToolCommand,
}

impl SerialUploader {
    pub fn new(tool: ToolCommand) -> Self {
        Self { tool }
    }

    pub fn from_config(config: &SerialConfig) -> Self {
        Self::new(config.tool.clone())
    }

    /// esptool arguments: connection options, then `write_flash` and its (offset, file) pairs.
    fn args(request: &UploadRequest) -> Vec<OsString> {
        let flash = &request.flash;

        let mut args: Vec<OsString> = vec![
            "--chip".into(),
            (&flash.chip).into(),
            "--port".into(),
            (&request.serial_port).into(),
            "--baud".into(),
            flash.baud.to_string().into(),
            "--before".into(),
            (&flash.before).into(),
            "--after".into(),
            (&flash.after).into(),
            "write_flash".into(),
        ];
        if flash.compress {
            args.push("-z".into());
        }
        args.extend([
            "--flash_mode".into(),
            (&flash.flash_mode).into(),
            "--flash_freq".into(),
            (&flash.flash_freq).into(),
            "--flash_size".into(),
            (&flash.flash_size).into(),
        ]);

        for (offset, path) in request.flash_map() {
            args.push(format!("{offset:#x}").into());
            args.push(path.into());
        }

        args
    }
}

impl Uploader for SerialUploader {
    fn upload(&self, request: &UploadRequest) -> UploadOutcome {
        eprintln!("[*] Flashing over serial port {}", request.serial_port);

        let args = Self::args(request);
        let outcome = match process::run(&self.tool, &args, OutputMode::Inherit, None) {
            Ok(finished) if finished.status.success() => UploadOutcome::Success,
            Ok(finished) => UploadOutcome::Failure(FailureReason::ProcessError(format!(
                "`{}` failed ({})",
                self.tool, finished.status
            ))),
            Err(ToolError::NotFound(program)) => {
                UploadOutcome::Failure(FailureReason::ToolNotFound(program))
            }
            Err(error) => UploadOutcome::Failure(FailureReason::ProcessError(describe(error))),
        };

        match &outcome {
            UploadOutcome::Success => eprintln!("[+] Serial upload succeeded"),
            UploadOutcome::Failure(reason) => eprintln!("[-] Serial upload failed: {reason}"),
            // Only the OTA channel has a deadline
            UploadOutcome::Timeout => eprintln!("[-] Serial upload timed out"),
        }

        outcome
    }
}

#[test]
fn test_args() {
    use crate::config::DeployConfig;

    let mut config = DeployConfig::default();
    config.serial.port = "/dev/cu.usbserial-61525036F0".into();
    let request = UploadRequest::new("build/firmware.bin", &config);

    assert_eq!(
        SerialUploader::args(&request),
        [
            "--chip",
            "esp32",
            "--port",
            "/dev/cu.usbserial-61525036F0",
            "--baud",
            "115200",
            "--before",
            "default_reset",
            "--after",
            "hard_reset",
            "write_flash",
            "-z",
            "--flash_mode",
            "qio",
            "--flash_freq",
            "80m",
            "--flash_size",
            "4MB",
            "0x1000",
            "build/bootloader.bin",
            "0x8000",
            "build/partitions.bin",
            "0x10000",
            "build/firmware.bin",
        ]
    );
}

#[test]
fn test_args_uncompressed() {
    use crate::config::DeployConfig;

    let mut config = DeployConfig::default();
    config.serial.flash.compress = false;
    config.serial.flash.baud = 921_600;
    let request = UploadRequest::new("firmware.bin", &config);
    let args = SerialUploader::args(&request);

    assert!(!args.iter().any(|arg| arg == "-z"));
    assert!(args.iter().any(|arg| arg == "921600"));
}
