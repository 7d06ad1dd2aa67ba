//! Boot-strap command implementation

use std::fs;
use std::path::Path;
use std::time::Duration;

use flashmon_serial::{bootstrap, BootstrapImages, BootstrapOptions, Connection};

use super::progress::IndicatifProgress;

fn read(path: &Path) -> Result<String, Box<dyn std::error::Error>> {
    fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e).into())
}

/// Download the monitor through the ROM boot-strap loader
pub fn run_bootstrap(
    connection: &str,
    stages: [&Path; 3],
    byte_delay_us: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let [stage1, stage2, stage3] = stages;
    let images = BootstrapImages::from_hex(&read(stage1)?, &read(stage2)?, &read(stage3)?)?;
    let options = BootstrapOptions {
        byte_delay: Duration::from_micros(byte_delay_us),
        ..Default::default()
    };

    let connection = Connection::parse(connection)?;
    log::info!("Opening {}", connection);
    let mut link = connection.open()?;

    println!("Connecting to the boot-strap loader...");
    let mut progress = IndicatifProgress::new();
    let id = bootstrap(&mut link, &images, &options, &mut progress)?;
    drop(progress);

    println!(
        "Monitor loaded ({} + {} + {} bytes), CPU code {:02X}h",
        images.stage1.len(),
        images.stage2.len(),
        images.stage3.len(),
        id
    );
    Ok(())
}
