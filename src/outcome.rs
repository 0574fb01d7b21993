//! Results reported by the uploaders, and the final verdict of a deployment.

use std::fmt;

use thiserror::Error;

/// The two ways firmware can reach the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Channel {
    /// HTTP upload to the device's update endpoint
    Ota,

    /// Flashing tool over the serial port
    Serial,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Ota => f.write_str("OTA"),
            Channel::Serial => f.write_str("serial"),
        }
    }
}

/// Why an upload attempt did not succeed.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum FailureReason {
    /// The external tool could not be found on this system
    #[error("`{0}` was not found; is it installed and in PATH?")]
    ToolNotFound(String),

    /// The tool ran, but reported failure; holds its diagnostic output
    #[error("{0}")]
    ProcessError(String),

    /// The device could not be reached over the network
    #[error("device unreachable: {0}")]
    Unreachable(String),
}

/// The result of a single upload attempt over one channel.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UploadOutcome {
    Success,
    Failure(FailureReason),
    Timeout,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Success)
    }

    /// How the attempt ended, without the diagnostic details
    pub fn summary(&self) -> &'static str {
        match self {
            UploadOutcome::Success => "succeeded",
            UploadOutcome::Failure(_) => "failed",
            UploadOutcome::Timeout => "timed out",
        }
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Success => f.write_str("success"),
            UploadOutcome::Failure(reason) => write!(f, "failed ({reason})"),
            UploadOutcome::Timeout => f.write_str("timed out"),
        }
    }
}

/// A successful deployment, and the channel that carried it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Delivery {
    pub channel: Channel,
}

/// Every channel was tried, and none of them delivered the firmware.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
#[error("firmware upload failed over every channel (OTA: {ota}, serial: {serial})")]
pub struct DeployError {
    pub ota: UploadOutcome,
    pub serial: UploadOutcome,
}

#[test]
fn test_outcome_display() {
    assert_eq!(UploadOutcome::Success.to_string(), "success");
    assert_eq!(UploadOutcome::Timeout.to_string(), "timed out");
    assert_eq!(
        UploadOutcome::Failure(FailureReason::ToolNotFound("curl".into())).to_string(),
        "failed (`curl` was not found; is it installed and in PATH?)"
    );

    let error = DeployError {
        ota: UploadOutcome::Timeout,
        serial: UploadOutcome::Failure(FailureReason::ProcessError("exit status: 2".into())),
    };
    assert_eq!(
        error.to_string(),
        "firmware upload failed over every channel (OTA: timed out, serial: failed (exit status: 2))"
    );
}

#[test]
fn test_summary_leaves_out_details() {
    let trace = "* Trying 10.0.4.107:80...\ncurl: (7) Failed to connect";
    let unreachable = UploadOutcome::Failure(FailureReason::Unreachable(trace.into()));

    assert_eq!(unreachable.summary(), "failed");
    assert_eq!(UploadOutcome::Timeout.summary(), "timed out");
    assert_eq!(UploadOutcome::Success.summary(), "succeeded");
}

#[test]
fn test_is_success() {
    assert!(UploadOutcome::Success.is_success());
    assert!(!UploadOutcome::Timeout.is_success());
    assert!(!UploadOutcome::Failure(FailureReason::Unreachable(String::new())).is_success());
}
