//! Over-the-air upload: POST the image to the device's HTTP update handler.
//!
//! The transfer itself is done by `curl`. This is the channel we try first, so it is bounded by a
//! timeout: a device that is switched off or off the network should cost us seconds, not minutes.

use std::ffi::OsString;
use std::time::Duration;

use log::debug;

use super::{describe, Uploader};
use crate::config::{OtaConfig, OTA_FORM_FIELD, OTA_UPDATE_PATH};
use crate::outcome::{FailureReason, UploadOutcome};
use crate::process::{self, OutputMode, ToolCommand, ToolError};
use crate::request::UploadRequest;

// curl exit codes that get special treatment; see curl(1), "EXIT CODES"
const CURL_COULDNT_RESOLVE_HOST: i32 = 6;
const CURL_COULDNT_CONNECT: i32 = 7;
const CURL_OPERATION_TIMEDOUT: i32 = 28;

#[derive(Debug, Clone)]
pub struct OtaUploader {
    tool: ToolCommand,
    timeout: Duration,
}

impl OtaUploader {
    pub fn new(tool: ToolCommand, timeout: Duration) -> Self {
        Self { tool, timeout }
    }

    pub fn from_config(config: &OtaConfig) -> Self {
        Self::new(config.tool.clone(), config.timeout())
    }

    /// curl arguments for one upload.
    ///
    /// `--fail` makes an HTTP error status from the device a non-zero exit, rather than a
    /// "successful" download of an error page.
    fn args(request: &UploadRequest) -> Vec<OsString> {
        let mut form = OsString::from(format!("{OTA_FORM_FIELD}=@"));
        form.push(&request.firmware);

        vec![
            "-v".into(),
            "--fail".into(),
            "-F".into(),
            form,
            update_url(&request.address).into(),
        ]
    }
}

/// The URL of the update handler on the device at `address`
pub fn update_url(address: &str) -> String {
    format!("http://{address}{OTA_UPDATE_PATH}")
}

/// Sort a finished curl run by its exit code.
fn classify(code: Option<i32>, diagnostic: String) -> UploadOutcome {
    match code {
        Some(0) => UploadOutcome::Success,
        Some(CURL_COULDNT_RESOLVE_HOST | CURL_COULDNT_CONNECT) => {
            UploadOutcome::Failure(FailureReason::Unreachable(diagnostic))
        }
        Some(CURL_OPERATION_TIMEDOUT) => UploadOutcome::Timeout,
        _ => UploadOutcome::Failure(FailureReason::ProcessError(diagnostic)),
    }
}

impl Uploader for OtaUploader {
    fn upload(&self, request: &UploadRequest) -> UploadOutcome {
        eprintln!("[*] Attempting OTA upload to {}", request.address);

        let args = Self::args(request);
        let result = process::run(&self.tool, &args, OutputMode::Capture, Some(self.timeout));

        let outcome = match result {
            Ok(finished) => {
                let stderr = finished.stderr.trim();
                let diagnostic = if stderr.is_empty() {
                    format!("`{}` failed ({})", self.tool.program(), finished.status)
                } else {
                    stderr.to_owned()
                };
                let outcome = classify(finished.status.code(), diagnostic);

                if outcome.is_success() {
                    debug!("curl: {stderr}");
                    if !finished.stdout.trim().is_empty() {
                        eprintln!("{}", finished.stdout.trim_end());
                    }
                }
                outcome
            }
            Err(ToolError::TimedOut { .. }) => UploadOutcome::Timeout,
            Err(ToolError::NotFound(program)) => {
                UploadOutcome::Failure(FailureReason::ToolNotFound(program))
            }
            Err(error) => UploadOutcome::Failure(FailureReason::ProcessError(describe(error))),
        };

        match &outcome {
            UploadOutcome::Success => eprintln!("[+] OTA upload succeeded"),
            UploadOutcome::Timeout => eprintln!(
                "[-] OTA upload timed out after {}s (is the device on the network?)",
                self.timeout.as_secs_f32()
            ),
            UploadOutcome::Failure(reason @ FailureReason::ToolNotFound(_)) => {
                eprintln!("[-] OTA upload not possible: {reason}")
            }
            UploadOutcome::Failure(
                FailureReason::ProcessError(details) | FailureReason::Unreachable(details),
            ) => eprintln!("[-] OTA upload failed:\n{details}"),
        }

        outcome
    }
}

#[test]
fn test_args() {
    use crate::config::DeployConfig;

    let mut config = DeployConfig::default();
    config.ota.address = "10.0.4.107".into();
    let request = UploadRequest::new("build/firmware.bin", &config);

    assert_eq!(
        OtaUploader::args(&request),
        [
            "-v",
            "--fail",
            "-F",
            "update=@build/firmware.bin",
            "http://10.0.4.107/update",
        ]
    );
}

#[test]
fn test_classify() {
    let diag = || String::from("curl: (x) details");

    assert_eq!(classify(Some(0), diag()), UploadOutcome::Success);
    assert_eq!(classify(Some(28), diag()), UploadOutcome::Timeout);
    assert_eq!(
        classify(Some(7), diag()),
        UploadOutcome::Failure(FailureReason::Unreachable(diag()))
    );
    assert_eq!(
        classify(Some(6), diag()),
        UploadOutcome::Failure(FailureReason::Unreachable(diag()))
    );
    assert_eq!(
        classify(Some(22), diag()),
        UploadOutcome::Failure(FailureReason::ProcessError(diag()))
    );
    // Killed by a signal
    assert_eq!(
        classify(None, diag()),
        UploadOutcome::Failure(FailureReason::ProcessError(diag()))
    );
}

#[cfg(all(test, unix))]
mod test {
    use super::*;
    use crate::config::DeployConfig;
    use std::time::Instant;

    fn fake_curl(script: &str, timeout: Duration) -> OtaUploader {
        let tool = vec!["sh".to_owned(), "-c".to_owned(), script.to_owned()];
        OtaUploader::new(tool.try_into().unwrap(), timeout)
    }

    fn request() -> UploadRequest {
        UploadRequest::new("build/firmware.bin", &DeployConfig::default())
    }

    #[test]
    fn test_upload_success() {
        let uploader = fake_curl("echo OK", Duration::from_secs(10));
        assert_eq!(uploader.upload(&request()), UploadOutcome::Success);
    }

    #[test]
    fn test_upload_timeout() {
        let uploader = fake_curl("exec sleep 30", Duration::from_millis(200));

        let started = Instant::now();
        assert_eq!(uploader.upload(&request()), UploadOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_upload_partial_progress_is_timeout() {
        // Output before the deadline doesn't count as delivery
        let uploader = fake_curl("echo uploading >&2; exec sleep 30", Duration::from_millis(300));
        assert_eq!(uploader.upload(&request()), UploadOutcome::Timeout);
    }

    #[test]
    fn test_upload_http_error() {
        let uploader = fake_curl(
            "echo 'curl: (22) The requested URL returned error: 500' >&2; exit 22",
            Duration::from_secs(10),
        );
        assert_eq!(
            uploader.upload(&request()),
            UploadOutcome::Failure(FailureReason::ProcessError(
                "curl: (22) The requested URL returned error: 500".into()
            ))
        );
    }

    #[test]
    fn test_upload_unreachable() {
        let uploader = fake_curl("exit 7", Duration::from_secs(10));
        assert!(matches!(
            uploader.upload(&request()),
            UploadOutcome::Failure(FailureReason::Unreachable(_))
        ));
    }

    #[test]
    fn test_upload_tool_missing() {
        let uploader = OtaUploader::new(
            ToolCommand::new("fw-deploy-test-no-such-curl"),
            Duration::from_secs(10),
        );
        assert_eq!(
            uploader.upload(&request()),
            UploadOutcome::Failure(FailureReason::ToolNotFound(
                "fw-deploy-test-no-such-curl".into()
            ))
        );
    }
}
