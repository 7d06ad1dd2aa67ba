//! Offline CRC computation

use std::fs;
use std::path::Path;

use flashmon_core::crc::{self, CrcDescriptor, CrcVerdict};
use flashmon_core::hexfile::{self, BlockStream};
use flashmon_core::protocol::PAD_BYTE;
use flashmon_serial::SessionError;

use super::program::load_crc_config;

/// Flash contents of `start..=end` after programming `stream` into an
/// erased part
pub fn flash_image(stream: &BlockStream, start: u32, end: u32) -> Vec<u8> {
    let len = (end - start) as usize + 1;
    let mut image = vec![PAD_BYTE; len];

    for block in &stream.blocks {
        for (i, &byte) in block.data.iter().enumerate() {
            let addr = block.address + i as u32;
            if (start..=end).contains(&addr) {
                image[(addr - start) as usize] = byte;
            }
        }
    }
    image
}

/// Compute what the monitor would report for `desc` after programming
pub fn image_crc(
    stream: &BlockStream,
    desc: &CrcDescriptor,
) -> Result<crc::CrcSession, flashmon_core::Error> {
    if desc.flash_start > desc.flash_end {
        return Err(flashmon_core::Error::InvalidCrcRange);
    }
    let image = flash_image(stream, desc.flash_start, desc.flash_end);
    crc::scan(desc, |addr| image[(addr - desc.flash_start) as usize])
}

/// Print the CRC of an image over the configured range
pub fn run_crc(
    config: &Path,
    input: &Path,
    start: Option<u32>,
    end: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut desc = load_crc_config(config)?;
    desc.flash_start = start.unwrap_or(desc.flash_start);
    desc.flash_end = end.unwrap_or(desc.flash_end);

    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
    let stream = hexfile::parse(&text).map_err(SessionError::from)?;

    let session = image_crc(&stream, &desc)?;
    let digits = session.digits()?;
    let digits = String::from_utf8_lossy(&digits);

    println!(
        "CRC-{} (polynomial 0x{:X}) over 0x{:08X}..=0x{:08X}",
        desc.width.bits(),
        desc.polynomial,
        desc.flash_start,
        desc.flash_end
    );
    if desc.is_informational() {
        println!("CRC to store in the last {} byte(s): {}", desc.width.bytes(), digits);
    } else {
        let verdict = match desc.verdict(&session) {
            CrcVerdict::Pass => "pass",
            CrcVerdict::Fail => "FAIL",
        };
        println!(
            "Stored CRC at 0x{:08X}: {} (remainder {})",
            desc.stored_crc_address, verdict, digits
        );
    }
    Ok(())
}
