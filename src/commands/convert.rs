//! Block-stream file commands

use std::fs;
use std::path::Path;

use flashmon_core::hexfile;
use flashmon_serial::SessionError;

/// Convert Intel-HEX to a block-stream text file
pub fn cmd_convert(
    input: &Path,
    output: &Path,
    no_header: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
    let stream = hexfile::parse(&text).map_err(SessionError::from)?;

    fs::write(output, stream.to_text(!no_header))?;

    println!(
        "Wrote {} block(s), {} data bytes to {}",
        stream.blocks.len(),
        stream.data_len(),
        output.display()
    );
    if !no_header {
        println!("Transfer total: {} bytes", stream.total_len());
    }
    Ok(())
}

/// Print the blocks of a block-stream text file
pub fn cmd_decode(input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = fs::read_to_string(input)
        .map_err(|e| format!("Failed to read {}: {}", input.display(), e))?;
    let stream = hexfile::decode_text(&text).map_err(SessionError::from)?;

    println!("Block stream: {}", input.display());
    println!();
    println!("{:<12} {:<12} {:>10}", "Start", "End", "Length");
    println!("{}", "-".repeat(36));

    for block in &stream.blocks {
        let end = block.address + block.data.len().saturating_sub(1) as u32;
        println!(
            "0x{:08X}   0x{:08X}   {:>10}",
            block.address,
            end,
            block.len()
        );
    }

    println!();
    println!(
        "{} block(s), {} data bytes, transfer total {} bytes",
        stream.blocks.len(),
        stream.data_len(),
        stream.total_len()
    );
    Ok(())
}
