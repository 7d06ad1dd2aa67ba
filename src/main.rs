//! flashmon - C167 flash monitor programmer
//!
//! Programs the parallel NOR flash of a C167 board through a small monitor
//! running on the target. The monitor is first downloaded through the CPU's
//! boot-strap loader, then the host drives it one command at a time over a
//! serial line.
//!
//! # Architecture
//!
//! - `flashmon-core` holds the protocol, chip drivers, CRC engine and the
//!   Intel-HEX codec, and the monitor itself
//! - `flashmon-serial` is the host side: transports, the session driver and
//!   the boot-strap download
//! - `flashmon-dummy` simulates a target, for tests and `emulate`

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Program {
            connection,
            input,
            crc_config,
            crc,
            reset,
            timeouts,
        } => commands::program::run_program(
            &connection,
            &input,
            crc_config.as_deref(),
            crc,
            reset,
            &timeouts,
        ),
        Commands::Bootstrap {
            connection,
            stage1,
            stage2,
            stage3,
            byte_delay,
        } => commands::bootstrap::run_bootstrap(
            &connection,
            [stage1.as_path(), stage2.as_path(), stage3.as_path()],
            byte_delay,
        ),
        Commands::Convert {
            input,
            output,
            no_header,
        } => commands::convert::cmd_convert(&input, &output, no_header),
        Commands::Decode { input } => commands::convert::cmd_decode(&input),
        Commands::Crc {
            config,
            input,
            start,
            end,
        } => commands::crc::run_crc(&config, &input, start, end),
        Commands::ListChips { vendor } => {
            commands::list_chips(vendor.as_deref());
            Ok(())
        }
        Commands::Emulate {
            listen,
            chip,
            resettable,
            once,
        } => commands::emulate::run_emulate(&listen, &chip, resettable, once),
    };

    // Session failures exit with the code shown to the operator
    if let Err(e) = &result {
        if let Some(code) = commands::exit_code(e.as_ref()) {
            eprintln!("Error: {}", e);
            std::process::exit(code);
        }
    }

    result
}
