//! flashmon-core - Core library for C167 flash monitor programming
//!
//! This crate holds everything both ends of a flash monitor session share:
//! the CRC engine, the Intel-HEX block-stream codec, the parallel NOR chip
//! drivers and the command protocol. The target side of the protocol (the
//! resident monitor) also lives here so it can run on a real board or
//! against a simulated flash bus. It is `no_std` compatible.
//!
//! # Features
//!
//! - `std` - Enable standard library support (includes `alloc`)
//! - `alloc` - Enable the hex codec and the monitor, which buffer blocks
//!
//! # Example
//!
//! ```ignore
//! use flashmon_core::chip::{probe, ChipDriver, CommandAddresses, FlashBus};
//!
//! fn erase<B: FlashBus>(bus: &mut B) -> flashmon_core::Result<()> {
//!     let mut driver = probe(bus, &CommandAddresses::default())?;
//!     println!("Found: {}", driver.family().name);
//!     driver.erase_chip(bus)
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod chip;
pub mod crc;
pub mod error;
#[cfg(feature = "alloc")]
pub mod hexfile;
pub mod link;
#[cfg(feature = "alloc")]
pub mod monitor;
pub mod protocol;

pub use error::{Error, HexError, Result};
