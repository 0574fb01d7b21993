//! The upload step of the firmware build.
//!
//! The build calls this with the freshly built image. It tries OTA first, then serial, and exits
//! non-zero if neither worked so that nothing downstream runs against a stale device.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use env_logger::{Builder, Env};

use fw_deploy::{image, process::ToolCommand, DeployConfig, UploadOrchestrator, UploadRequest};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// The firmware image to deploy
    firmware: PathBuf,

    /// Configuration file (default: ./fw-deploy.toml, if it exists)
    #[clap(short, long, env = "FW_DEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Network address of the device, as `host` or `host:port`
    #[clap(long, env = "FW_DEPLOY_ADDRESS")]
    address: Option<String>,

    /// Serial device to fall back to
    #[clap(long, env = "FW_DEPLOY_PORT")]
    port: Option<String>,

    /// Serial baud rate
    #[clap(long)]
    baud: Option<u32>,

    /// Seconds to wait for the OTA upload before falling back
    #[clap(long)]
    timeout: Option<u64>,

    /// Directory containing bootloader.bin and partitions.bin (default: next to the firmware)
    #[clap(long)]
    build_dir: Option<PathBuf>,

    /// Path to the bootloader image
    #[clap(long)]
    bootloader: Option<PathBuf>,

    /// Path to the partition table image
    #[clap(long)]
    partitions: Option<PathBuf>,

    /// HTTP transfer tool, e.g. "curl"
    #[clap(long)]
    ota_tool: Option<ToolCommand>,

    /// Serial flashing tool, e.g. "python3 -m esptool"
    #[clap(long)]
    flash_tool: Option<ToolCommand>,

    /// Log the exact tool invocations
    #[clap(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut DeployConfig) {
        if let Some(address) = &self.address {
            config.ota.address.clone_from(address);
        }
        if let Some(timeout) = self.timeout {
            config.ota.timeout_secs = timeout;
        }
        if let Some(tool) = &self.ota_tool {
            config.ota.tool = tool.clone();
        }
        if let Some(port) = &self.port {
            config.serial.port.clone_from(port);
        }
        if let Some(baud) = self.baud {
            config.serial.flash.baud = baud;
        }
        if let Some(tool) = &self.flash_tool {
            config.serial.tool = tool.clone();
        }
    }

    fn request(&self, config: &DeployConfig) -> UploadRequest {
        let mut request = UploadRequest::new(&self.firmware, config);
        if let Some(dir) = &self.build_dir {
            request = request.build_dir(dir);
        }
        if let Some(path) = &self.bootloader {
            request = request.bootloader(path);
        }
        if let Some(path) = &self.partitions {
            request = request.partition_table(path);
        }
        request
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_filter = if args.verbose { "debug" } else { "warn" };
    Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    let mut config = DeployConfig::load(args.config.as_deref())?;
    args.apply(&mut config);
    let request = args.request(&config);
    log::debug!("{request:#?}");

    image::print_artifacts(&request);

    howudoin::init(howudoin::consumers::TermLine::default());
    let result = UploadOrchestrator::from_config(&config).deploy(&request);
    howudoin::disable();
    thread::sleep(Duration::from_millis(10)); // Give howudoin time to shut down

    result?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::Path;

    use super::*;

    const CONFIG: &str = r#"
        [ota]
        address = "10.0.4.107"
        timeout_secs = 30

        [serial]
        port = "/dev/ttyACM0"

        [serial.flash]
        baud = 921600
        flash_size = "8MB"
    "#;

    #[test]
    fn test_flags_override_config_file() -> Result<()> {
        let args = Cli::try_parse_from([
            "fw-deploy",
            "build/firmware.bin",
            "--address",
            "192.168.1.50:8080",
            "--port",
            "/dev/ttyUSB1",
            "--baud",
            "460800",
            "--timeout",
            "3",
            "--flash-tool",
            "python3 -m esptool",
        ])?;

        let mut config: DeployConfig = toml::from_str(CONFIG)?;
        args.apply(&mut config);

        assert_eq!(config.ota.address, "192.168.1.50:8080");
        assert_eq!(config.ota.timeout(), Duration::from_secs(3));
        assert_eq!(config.serial.port, "/dev/ttyUSB1");
        assert_eq!(config.serial.flash.baud, 460_800);
        assert_eq!(config.serial.tool.to_string(), "python3 -m esptool");

        // Untouched by flags
        assert_eq!(config.ota.tool.program(), "curl");
        assert_eq!(config.serial.flash.flash_size, "8MB");
        Ok(())
    }

    #[test]
    fn test_config_file_kept_without_flags() -> Result<()> {
        let args = Cli::try_parse_from(["fw-deploy", "firmware.bin"])?;

        let mut config: DeployConfig = toml::from_str(CONFIG)?;
        args.apply(&mut config);

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.flash.baud, 921_600);
        assert_eq!(config.ota.timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_request_paths() -> Result<()> {
        let args = Cli::try_parse_from([
            "fw-deploy",
            "out/firmware.bin",
            "--build-dir",
            "build",
            "--partitions",
            "custom/parts.bin",
        ])?;

        let config: DeployConfig = toml::from_str(CONFIG)?;
        let request = args.request(&config);

        assert_eq!(request.firmware, Path::new("out/firmware.bin"));
        assert_eq!(request.bootloader, Path::new("build/bootloader.bin"));
        assert_eq!(request.partition_table, Path::new("custom/parts.bin"));
        assert_eq!(request.address, "10.0.4.107");
        assert_eq!(request.flash.flash_size, "8MB");
        Ok(())
    }

    #[test]
    fn test_rejects_empty_tool() {
        assert!(Cli::try_parse_from(["fw-deploy", "firmware.bin", "--ota-tool", " "]).is_err());
    }
}
