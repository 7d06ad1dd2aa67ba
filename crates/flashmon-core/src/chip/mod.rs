//! Parallel NOR flash chip support
//!
//! The board carries one of a handful of 16-bit wide flash arrangements at
//! 0x100000. This module identifies which one is fitted and drives its
//! erase and program algorithms through a [`FlashBus`].

mod bus;
mod driver;
pub mod family;
mod status;

pub use bus::{with_interrupts_disabled, CommandAddresses, FlashBus};
pub use driver::{identify, probe, AmdCompatible, ChipDriver, FlashDriver, IntelFlash, M29W800};
pub use family::{ChipFamily, ChipIdentity, FamilyKind, IdSequence, FAMILIES, UNKNOWN_DIGIT};
pub use status::{wait_for, PollBudget, StatusBits, StatusOutcome, StatusProtocol};
