//! Emulated target served over TCP
//!
//! The simulated flash survives across connections, so a `program` session
//! followed by another one sees the contents the first left behind.

use std::net::TcpListener;

use flashmon_core::chip::family::{find_by_name, from_digit};
use flashmon_core::chip::ChipFamily;
use flashmon_core::monitor::{Flow, Monitor};
use flashmon_dummy::{SimConfig, SimulatedFlash};
use flashmon_serial::TcpTransport;

/// Resolve a chip given by identify digit or part name
pub fn resolve_chip(chip: &str) -> Result<&'static ChipFamily, String> {
    let by_digit = match chip.as_bytes() {
        [digit] => from_digit(*digit),
        _ => None,
    };
    by_digit
        .or_else(|| find_by_name(chip))
        .ok_or_else(|| format!("Unknown chip: {} (see list-chips)", chip))
}

/// Serve monitor sessions on `listen`
pub fn run_emulate(
    listen: &str,
    chip: &str,
    resettable: bool,
    once: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let family = resolve_chip(chip)?;
    let mut config = SimConfig::new(family);
    config.resettable = resettable;
    let mut flash = SimulatedFlash::with_config(config);

    let listener = TcpListener::bind(listen)?;
    println!(
        "Emulating {} {} on {} (connect with ip={})",
        family.vendor,
        family.name,
        listener.local_addr()?,
        listener.local_addr()?
    );

    loop {
        let (stream, peer) = listener.accept()?;
        log::info!("emulate: session from {}", peer);

        let link = TcpTransport::from_stream(stream)?;
        let mut monitor = Monitor::new(link, flash);
        let flow = monitor.serve();
        let (_, bus) = monitor.into_parts();
        flash = bus;

        match flow {
            Ok(Flow::Reset) => log::info!("emulate: target reset ({} so far)", flash.resets()),
            Ok(Flow::Continue) => log::info!("emulate: {} disconnected", peer),
            Err(e) => log::warn!("emulate: session with {} ended: {}", peer, e),
        }

        if once {
            return Ok(());
        }
    }
}
