//! Utilities for working with images.
//!
//! Currently just a size/checksum summary, so the operator can tell which build is being sent.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crc::{Crc, CRC_32_ISO_HDLC};

use crate::request::UploadRequest;

const IMAGE_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ImageSummary {
    pub size: u64,
    pub crc32: u32,
}

impl fmt::Display for ImageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes, crc32 {:08x}", self.size, self.crc32)
    }
}

/// Read an image from start to end, computing its size and CRC-32.
pub fn summarize<R: Read>(mut input: R) -> io::Result<ImageSummary> {
    const CHUNK_SIZE: usize = 65536;

    let mut digest = IMAGE_CRC.digest();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut size = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        digest.update(&buf[..n]);
        size += n as u64;
    }

    Ok(ImageSummary {
        size,
        crc32: digest.finalize(),
    })
}

pub fn summarize_file(path: &Path) -> io::Result<ImageSummary> {
    summarize(File::open(path)?)
}

/// Print a line for each artifact of the request.
///
/// An unreadable artifact is only a warning here: the channels report their own failures, and the
/// OTA channel doesn't need the bootloader or partition table at all.
pub fn print_artifacts(request: &UploadRequest) {
    let artifacts = [
        ("firmware", &request.firmware),
        ("bootloader", &request.bootloader),
        ("partition table", &request.partition_table),
    ];

    for (name, path) in artifacts {
        match summarize_file(path) {
            Ok(summary) => eprintln!("[*] {name}: {} ({summary})", path.display()),
            Err(error) => eprintln!("[!] {name}: {}: {error}", path.display()),
        }
    }
}

#[test]
fn test_summarize() -> io::Result<()> {
    let summary = summarize(&b"123456789"[..])?;
    assert_eq!(summary.size, 9);
    assert_eq!(summary.crc32, 0xCBF43926);
    assert_eq!(summary.to_string(), "9 bytes, crc32 cbf43926");

    let empty = summarize(io::empty())?;
    assert_eq!(empty, ImageSummary { size: 0, crc32: 0 });
    Ok(())
}

#[test]
fn test_summarize_large() -> io::Result<()> {
    // Crosses several read chunks
    let summary = summarize(io::repeat(0xAA).take(200_000))?;
    assert_eq!(summary.size, 200_000);
    assert_eq!(
        summary.crc32,
        IMAGE_CRC.checksum(&vec![0xAA; 200_000])
    );
    Ok(())
}
