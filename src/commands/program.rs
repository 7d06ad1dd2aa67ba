//! Program command implementation

use std::fs;
use std::path::Path;
use std::time::Duration;

use flashmon_core::crc::CrcDescriptor;
use flashmon_core::hexfile;
use flashmon_serial::{Connection, Host, HostOptions, SessionError};

use super::progress::IndicatifProgress;
use crate::cli::TimeoutArgs;

/// Load the CRC configuration file
pub fn load_crc_config(path: &Path) -> Result<CrcDescriptor, Box<dyn std::error::Error>> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read CRC configuration {}: {}", path.display(), e))?;
    let desc = CrcDescriptor::parse_config(&text)
        .map_err(|e| format!("{}: {}", path.display(), e))?;
    log::debug!("CRC configuration: {:?}", desc);
    Ok(desc)
}

/// Run a complete flash session
pub fn run_program(
    connection: &str,
    input: &Path,
    crc_config: Option<&Path>,
    expected_crc: Option<u32>,
    reset: bool,
    timeouts: &TimeoutArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
    let stream = hexfile::parse(&text).map_err(SessionError::from)?;
    println!(
        "Image: {} bytes in {} block(s)",
        stream.data_len(),
        stream.blocks.len()
    );

    let crc = crc_config.map(load_crc_config).transpose()?;
    let options = HostOptions {
        echo_timeout: Duration::from_secs(timeouts.echo_timeout),
        command_timeout: Duration::from_secs(timeouts.command_timeout),
        reset,
        crc,
        expected_crc,
    };

    let connection = Connection::parse(connection)?;
    log::info!("Opening {}", connection);
    let link = connection.open()?;

    let mut host = Host::new(link, options);
    let mut progress = IndicatifProgress::new();
    let report = host.run(&stream, &mut progress)?;
    drop(progress);

    println!(
        "Programmed {} bytes in {} block(s) into {} {}",
        report.bytes, report.blocks, report.family.vendor, report.family.name
    );
    if let Some(digits) = &report.crc {
        match expected_crc {
            Some(_) => println!("CRC {} matches", digits),
            None => println!("CRC check passed, stored CRC {}", digits),
        }
    }
    if report.reset {
        println!("Target reset");
    }
    Ok(())
}
