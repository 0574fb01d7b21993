//! The two ways of getting firmware onto the device.
//!
//! Each channel is an `Uploader`: given a request, it makes exactly one attempt and reports how it
//! went. Uploaders never fail in the `Result` sense; every problem is folded into the outcome so
//! the orchestrator can decide what to do next.

pub mod ota;
pub mod serial;

use crate::outcome::UploadOutcome;
use crate::process::ToolError;
use crate::request::UploadRequest;

pub use ota::OtaUploader;
pub use serial::SerialUploader;

/// Represents one channel to the device
pub trait Uploader {
    /// Make a single attempt at delivering the request's firmware.
    ///
    /// Progress and diagnostics are printed for the operator before returning.
    fn upload(&self, request: &UploadRequest) -> UploadOutcome;
}

impl<U: Uploader + ?Sized> Uploader for &U {
    fn upload(&self, request: &UploadRequest) -> UploadOutcome {
        (**self).upload(request)
    }
}

/// Render a tool error along with its cause, e.g. "could not start `curl`: Permission denied"
fn describe(error: ToolError) -> String {
    format!("{:#}", anyhow::Error::new(error))
}
