//! Runs the installed binary the way the build does, with scripts standing in for curl and
//! esptool.
#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::{Command, ExitStatus};

fn deploy(dir: &Path, ota_exit: i32, flash_exit: i32) -> anyhow::Result<ExitStatus> {
    let ota = dir.join("ota.sh");
    let flash = dir.join("flash.sh");
    fs::write(&ota, format!("exit {ota_exit}\n"))?;
    fs::write(&flash, format!("exit {flash_exit}\n"))?;
    fs::write(dir.join("firmware.bin"), b"\xe9firmware")?;

    let status = Command::new(env!("CARGO_BIN_EXE_fw_deploy"))
        .current_dir(dir)
        .env_remove("FW_DEPLOY_CONFIG")
        .env_remove("FW_DEPLOY_ADDRESS")
        .env_remove("FW_DEPLOY_PORT")
        .arg(dir.join("firmware.bin"))
        .arg("--ota-tool")
        .arg(format!("sh {}", ota.display()))
        .arg("--flash-tool")
        .arg(format!("sh {}", flash.display()))
        .args(["--timeout", "5"])
        .status()?;
    Ok(status)
}

#[test]
fn test_exit_status_when_every_channel_fails() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let status = deploy(dir.path(), 7, 2)?;
    assert!(!status.success());
    Ok(())
}

#[test]
fn test_exit_status_after_serial_fallback() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let status = deploy(dir.path(), 7, 0)?;
    assert!(status.success());
    Ok(())
}

#[test]
fn test_exit_status_over_ota() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let status = deploy(dir.path(), 0, 2)?;
    assert!(status.success());
    Ok(())
}
