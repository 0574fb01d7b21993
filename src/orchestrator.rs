//! The deployment procedure: OTA first, serial if that didn't work.
//!
//! ```text
//! AttemptingOta --Success--------------------------------> Done(delivered over OTA)
//!       |
//!       +--Failure/Timeout--> AttemptingSerial --Success--> Done(delivered over serial)
//!                                   |
//!                                   +--Failure-----------> Done(DeployError)
//! ```
//!
//! Each channel is tried at most once, and never concurrently: whether the serial attempt happens
//! at all depends on how the OTA attempt finished.

use crate::config::DeployConfig;
use crate::outcome::{Channel, Delivery, DeployError, UploadOutcome};
use crate::request::UploadRequest;
use crate::upload::{OtaUploader, SerialUploader, Uploader};

/// Runs one deployment over the OTA uploader `O`, falling back to the serial uploader `S`.
#[derive(Debug, Clone)]
pub struct UploadOrchestrator<O, S> {
    ota: O,
    serial: S,
}

#[derive(Debug)]
enum Stage {
    AttemptingOta,
    AttemptingSerial { ota: UploadOutcome },
    Done(Result<Delivery, DeployError>),
}

impl UploadOrchestrator<OtaUploader, SerialUploader> {
    /// Set up both channels with the tools and timeout from `config`
    pub fn from_config(config: &DeployConfig) -> Self {
        Self::new(
            OtaUploader::from_config(&config.ota),
            SerialUploader::from_config(&config.serial),
        )
    }
}

impl<O: Uploader, S: Uploader> UploadOrchestrator<O, S> {
    pub fn new(ota: O, serial: S) -> Self {
        Self { ota, serial }
    }

    /// Deliver the request's firmware over whichever channel works first.
    ///
    /// An `Err` means the device was not updated; the caller must not carry on as if it was.
    pub fn deploy(&self, request: &UploadRequest) -> Result<Delivery, DeployError> {
        eprintln!("[*] Deploying {}", request.firmware.display());

        let rpt = howudoin::new().label("Deploying firmware").set_len(2u64);

        let mut stage = Stage::AttemptingOta;
        let result = loop {
            stage = match stage {
                Stage::AttemptingOta => {
                    rpt.desc("OTA upload");
                    rpt.inc();

                    match self.ota.upload(request) {
                        UploadOutcome::Success => Stage::Done(Ok(Delivery {
                            channel: Channel::Ota,
                        })),
                        ota => {
                            eprintln!(
                                "[!] OTA upload {}, falling back to serial upload",
                                ota.summary()
                            );
                            Stage::AttemptingSerial { ota }
                        }
                    }
                }

                Stage::AttemptingSerial { ota } => {
                    rpt.desc("Serial upload");
                    rpt.inc();

                    match self.serial.upload(request) {
                        UploadOutcome::Success => Stage::Done(Ok(Delivery {
                            channel: Channel::Serial,
                        })),
                        serial => Stage::Done(Err(DeployError { ota, serial })),
                    }
                }

                Stage::Done(result) => break result,
            };
        };

        match &result {
            Ok(delivery) => {
                rpt.finish();
                eprintln!("[+] Firmware delivered over {}", delivery.channel);
            }
            Err(error) => {
                rpt.close();
                eprintln!("[-] UPLOAD FAILED: {error}");
            }
        }

        result
    }
}
