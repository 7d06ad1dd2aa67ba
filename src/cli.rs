//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a CRC value, which is always hex
fn parse_crc(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|e| format!("Invalid CRC: {}", e))
}

const CONNECTION_HELP: &str =
    "Connection to the target: dev=<port>[:<baud>] or ip=<host>:<port> (default baud 38400)";

#[derive(Parser)]
#[command(name = "flashmon")]
#[command(author, version, about = "C167 flash monitor programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Session timing shared by commands that talk to a monitor
#[derive(clap::Args, Debug, Clone)]
pub struct TimeoutArgs {
    /// Seconds to wait for each command echo
    #[arg(long, default_value_t = 3)]
    pub echo_timeout: u64,

    /// Seconds to wait for a command to complete
    #[arg(long, default_value_t = 20)]
    pub command_timeout: u64,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Erase the flash and program an Intel-HEX image through the monitor
    Program {
        /// Target connection
        #[arg(short, long, help = CONNECTION_HELP)]
        connection: String,

        /// Intel-HEX application image
        #[arg(short, long)]
        input: PathBuf,

        /// CRC configuration file; runs a CRC check after programming
        #[arg(long)]
        crc_config: Option<PathBuf>,

        /// Expected CRC over the configured range (hex); the stored CRC
        /// address in the configuration is ignored
        #[arg(long, value_parser = parse_crc, requires = "crc_config")]
        crc: Option<u32>,

        /// Reset the target instead of terminating the session
        #[arg(long)]
        reset: bool,

        #[command(flatten)]
        timeouts: TimeoutArgs,
    },

    /// Download the flash monitor through the boot-strap loader
    Bootstrap {
        /// Target connection
        #[arg(short, long, help = CONNECTION_HELP)]
        connection: String,

        /// Stage one image (Intel-HEX)
        #[arg(long)]
        stage1: PathBuf,

        /// Stage two image (Intel-HEX)
        #[arg(long)]
        stage2: PathBuf,

        /// Stage three image, the monitor itself (Intel-HEX)
        #[arg(long)]
        stage3: PathBuf,

        /// Pause after each stage one and two byte, in microseconds
        #[arg(long, default_value_t = 500)]
        byte_delay: u64,
    },

    /// Convert an Intel-HEX image to a block-stream text file
    Convert {
        /// Intel-HEX input
        #[arg(short, long)]
        input: PathBuf,

        /// Block-stream text output
        #[arg(short, long)]
        output: PathBuf,

        /// Write the data digits only, without the total and block headers
        #[arg(long)]
        no_header: bool,
    },

    /// Show the blocks of a block-stream text file
    Decode {
        /// Block-stream text file written by `convert`
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Compute the CRC of an Intel-HEX image over a configured range
    Crc {
        /// CRC configuration file
        #[arg(long)]
        config: PathBuf,

        /// Intel-HEX image
        #[arg(short, long)]
        input: PathBuf,

        /// Override the first address scanned (hex, e.g., 0x100000)
        #[arg(long, value_parser = parse_hex_u32)]
        start: Option<u32>,

        /// Override the last address scanned
        #[arg(long, value_parser = parse_hex_u32)]
        end: Option<u32>,
    },

    /// List supported flash chips
    ListChips {
        /// Filter by vendor
        #[arg(long)]
        vendor: Option<String>,
    },

    /// Serve a simulated target over TCP
    Emulate {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:4000")]
        listen: String,

        /// Chip to emulate, by name or identify digit
        #[arg(long, default_value = "SST39SF040")]
        chip: String,

        /// Let the target honor the reset command
        #[arg(long)]
        resettable: bool,

        /// Serve a single session, then exit
        #[arg(long)]
        once: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_hex_u32("0x100000"), Ok(0x10_0000));
        assert_eq!(parse_hex_u32("4096"), Ok(4096));
        assert!(parse_hex_u32("0xZZ").is_err());
        assert_eq!(parse_crc("1d0f"), Ok(0x1D0F));
        assert_eq!(parse_crc("0x31C3"), Ok(0x31C3));
    }

    #[test]
    fn test_crc_requires_config() {
        let result = Cli::try_parse_from([
            "flashmon", "program", "-c", "dev=/dev/null", "-i", "a.hex", "--crc", "1234",
        ]);
        assert!(result.is_err());
    }
}
