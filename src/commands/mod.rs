//! CLI command implementations
//!
//! Commands that talk to a target go through `flashmon-serial`; the rest
//! work on files only. Session and boot-strap failures are mapped to the
//! process exit code here so scripts see the same numbers the operator does.

pub mod bootstrap;
pub mod convert;
pub mod crc;
pub mod emulate;
mod list;
pub mod program;
mod progress;

use flashmon_serial::error::{BOOTSTRAP_CODE_OFFSET, SESSION_CODE_OFFSET};
use flashmon_serial::{BootstrapError, SessionError};

pub use list::list_chips;

/// Exit code for a failed command, if it carries one
pub fn exit_code(err: &(dyn std::error::Error + 'static)) -> Option<i32> {
    if let Some(e) = err.downcast_ref::<SessionError>() {
        return Some((SESSION_CODE_OFFSET + e.code() as u16) as i32);
    }
    if let Some(e) = err.downcast_ref::<BootstrapError>() {
        return Some((BOOTSTRAP_CODE_OFFSET + e.code() as u16) as i32);
    }
    None
}
