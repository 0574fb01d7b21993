//! Deploy ESP32 firmware over the air, falling back to the serial port when the device can't be
//! reached on the network.

pub mod config;
pub mod image;
pub mod orchestrator;
pub mod outcome;
pub mod process;
pub mod request;
pub mod upload;

pub use config::DeployConfig;
pub use orchestrator::UploadOrchestrator;
pub use outcome::{Channel, Delivery, DeployError, FailureReason, UploadOutcome};
pub use request::UploadRequest;
