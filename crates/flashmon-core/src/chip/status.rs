//! Status register polling
//!
//! After a program or erase command the chip answers reads with status
//! instead of array data. Each family encodes progress and errors in those
//! bits differently; [`StatusProtocol`] turns one status read into a
//! [`StatusOutcome`] and [`wait_for`] repeats that until the outcome is
//! final or the poll budget runs out.

use bitflags::bitflags;

use super::bus::FlashBus;

bitflags! {
    /// Status bits as they appear on the 16-bit data bus
    ///
    /// Packed AMD parts report one status byte per lane, so the `_HI`
    /// flags mirror the low lane for the chip on the upper data lines.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusBits: u16 {
        /// DQ7: data polling / ready
        const DQ7 = 0x0080;
        /// DQ5: timing limit exceeded (AMD), erase error (Intel)
        const DQ5 = 0x0020;
        /// DQ4: program error (Intel)
        const DQ4 = 0x0010;
        /// DQ3: Vpp low (Intel)
        const DQ3 = 0x0008;
        /// DQ7 of the upper lane
        const DQ7_HI = 0x8000;
        /// DQ5 of the upper lane
        const DQ5_HI = 0x2000;
    }
}

/// Result of one status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Operation still running
    Pending,
    /// Operation finished without error
    Success,
    /// Chip reported an error, or never finished
    Fault,
}

/// (DQ7, DQ5) masks per byte lane
const LANES: [(StatusBits, StatusBits); 2] = [
    (StatusBits::DQ7, StatusBits::DQ5),
    (StatusBits::DQ7_HI, StatusBits::DQ5_HI),
];

/// Both lanes' DQ7
const DQ7_BOTH: StatusBits = StatusBits::DQ7.union(StatusBits::DQ7_HI);

/// How a family reports program and erase progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusProtocol {
    /// AMD/SST data polling, two parts in parallel
    AmdPacked,
    /// Atmel inverted data polling
    Atmel,
    /// Intel status register (after 0x70)
    Intel,
    /// ST M29W800 data polling
    M29W800,
}

impl StatusProtocol {
    /// Judge one status read taken after programming `written`
    ///
    /// `reread` fetches the status again; it is only called to confirm a
    /// suspected error.
    pub fn program(
        self,
        written: u16,
        status: u16,
        reread: &mut dyn FnMut() -> u16,
    ) -> StatusOutcome {
        let bits = StatusBits::from_bits_retain(status);
        let data = StatusBits::from_bits_retain(written);

        match self {
            Self::AmdPacked => {
                if bits & DQ7_BOTH == data & DQ7_BOTH {
                    return StatusOutcome::Success;
                }
                for (dq7, dq5) in LANES {
                    if bits & dq7 != data & dq7 && bits.contains(dq5) {
                        let again = StatusBits::from_bits_retain(reread());
                        if again & dq7 != data & dq7 {
                            return StatusOutcome::Fault;
                        }
                    }
                }
                StatusOutcome::Pending
            }
            Self::Atmel => {
                if bits & StatusBits::DQ7 != data & StatusBits::DQ7 {
                    StatusOutcome::Success
                } else {
                    StatusOutcome::Pending
                }
            }
            Self::Intel => {
                if !bits.contains(StatusBits::DQ7) {
                    StatusOutcome::Pending
                } else if bits.intersects(StatusBits::DQ3 | StatusBits::DQ4) {
                    StatusOutcome::Fault
                } else {
                    StatusOutcome::Success
                }
            }
            Self::M29W800 => {
                if bits & StatusBits::DQ7 == data & StatusBits::DQ7 {
                    StatusOutcome::Success
                } else if bits.contains(StatusBits::DQ5) {
                    let again = StatusBits::from_bits_retain(reread());
                    if again & StatusBits::DQ7 != data & StatusBits::DQ7 {
                        StatusOutcome::Fault
                    } else {
                        StatusOutcome::Success
                    }
                } else {
                    StatusOutcome::Pending
                }
            }
        }
    }

    /// Judge one status read taken during an erase
    pub fn erase(self, status: u16, reread: &mut dyn FnMut() -> u16) -> StatusOutcome {
        let bits = StatusBits::from_bits_retain(status);

        match self {
            Self::AmdPacked => {
                if bits.contains(DQ7_BOTH) {
                    StatusOutcome::Success
                } else if bits.intersects(StatusBits::DQ5 | StatusBits::DQ5_HI) {
                    let again = StatusBits::from_bits_retain(reread());
                    if again.contains(DQ7_BOTH) {
                        StatusOutcome::Success
                    } else {
                        StatusOutcome::Fault
                    }
                } else {
                    StatusOutcome::Pending
                }
            }
            Self::Atmel => {
                if bits.contains(StatusBits::DQ7) {
                    StatusOutcome::Success
                } else {
                    StatusOutcome::Pending
                }
            }
            Self::Intel => {
                if !bits.contains(StatusBits::DQ7) {
                    StatusOutcome::Pending
                } else if bits.intersects(StatusBits::DQ5 | StatusBits::DQ3) {
                    StatusOutcome::Fault
                } else {
                    StatusOutcome::Success
                }
            }
            Self::M29W800 => {
                if bits.contains(StatusBits::DQ7) {
                    StatusOutcome::Success
                } else if bits.contains(StatusBits::DQ5) {
                    let again = StatusBits::from_bits_retain(reread());
                    if again.contains(StatusBits::DQ7) {
                        StatusOutcome::Success
                    } else {
                        StatusOutcome::Fault
                    }
                } else {
                    StatusOutcome::Pending
                }
            }
        }
    }
}

/// Upper bound on status polls for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    /// Reads before giving up
    pub max_polls: u32,
    /// Delay between reads
    pub delay_us: u32,
}

impl PollBudget {
    /// Word program: typically 10-20us
    pub const PROGRAM: Self = Self {
        max_polls: 100_000,
        delay_us: 0,
    };

    /// Chip or sector erase: up to about a minute for packed AMD parts
    pub const ERASE: Self = Self {
        max_polls: 1_000_000,
        delay_us: 100,
    };
}

/// Poll the status at `addr` until `check` reports a final outcome
///
/// Running out of budget counts as a fault, so a wedged chip cannot hang
/// the monitor.
pub fn wait_for<B, F>(bus: &mut B, addr: u32, budget: PollBudget, mut check: F) -> StatusOutcome
where
    B: FlashBus + ?Sized,
    F: FnMut(u16, &mut dyn FnMut() -> u16) -> StatusOutcome,
{
    for _ in 0..budget.max_polls {
        let status = bus.read_word(addr);
        let outcome = check(status, &mut || bus.read_word(addr));
        if outcome != StatusOutcome::Pending {
            return outcome;
        }
        if budget.delay_us > 0 {
            bus.delay_us(budget.delay_us);
        }
    }

    log::warn!(
        "chip: no final status at 0x{:08X} after {} polls",
        addr,
        budget.max_polls
    );
    StatusOutcome::Fault
}
