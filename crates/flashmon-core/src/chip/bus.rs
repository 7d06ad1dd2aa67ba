//! Access to the external flash bus
//!
//! Drivers never touch memory directly. Everything they do to a chip goes
//! through a [`FlashBus`], which on the board maps onto the external bus and
//! in tests onto a simulated chip.

use crate::error::{Error, Result};

/// 16-bit external bus the flash sits on
pub trait FlashBus {
    /// Read the word at byte address `addr` (even)
    fn read_word(&mut self, addr: u32) -> u16;

    /// Write `value` to byte address `addr` (even)
    fn write_word(&mut self, addr: u32, value: u16);

    /// Read one byte; the bus is little-endian
    fn read_byte(&mut self, addr: u32) -> u8 {
        let word = self.read_word(addr & !1);
        if addr & 1 == 0 {
            word as u8
        } else {
            (word >> 8) as u8
        }
    }

    /// Enable or disable interrupts, returning the previous state
    fn set_interrupts(&mut self, enabled: bool) -> bool;

    /// Busy-wait for `us` microseconds
    fn delay_us(&mut self, us: u32) {
        let _ = us;
    }

    /// Whether [`FlashBus::system_reset`] does anything
    fn can_reset(&self) -> bool {
        false
    }

    /// Restart the board
    fn system_reset(&mut self) -> Result<()> {
        Err(Error::ResetNotSupported)
    }
}

impl<B: FlashBus + ?Sized> FlashBus for &mut B {
    fn read_word(&mut self, addr: u32) -> u16 {
        (**self).read_word(addr)
    }

    fn write_word(&mut self, addr: u32, value: u16) {
        (**self).write_word(addr, value)
    }

    fn read_byte(&mut self, addr: u32) -> u8 {
        (**self).read_byte(addr)
    }

    fn set_interrupts(&mut self, enabled: bool) -> bool {
        (**self).set_interrupts(enabled)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }

    fn can_reset(&self) -> bool {
        (**self).can_reset()
    }

    fn system_reset(&mut self) -> Result<()> {
        (**self).system_reset()
    }
}

/// Run `f` with interrupts masked, restoring the previous state afterwards
///
/// Flash command sequences must not be split by an interrupt handler that
/// itself touches the bus.
pub fn with_interrupts_disabled<B, T, F>(bus: &mut B, f: F) -> T
where
    B: FlashBus + ?Sized,
    F: FnOnce(&mut B) -> T,
{
    let previous = bus.set_interrupts(false);
    let result = f(bus);
    bus.set_interrupts(previous);
    result
}

/// Bus addresses the command sequences are written to
///
/// These describe how the chips are wired, not the chips themselves, and
/// are read-only for the life of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAddresses {
    /// First flash address; IDs are read here and at `base + 2`
    pub base: u32,
    /// AMD first unlock cycle (word 0x5555)
    pub amd_unlock1: u32,
    /// AMD second unlock cycle (word 0x2AAA)
    pub amd_unlock2: u32,
    /// M29W800 first unlock cycle (word 0x555)
    pub m29_unlock1: u32,
    /// M29W800 second unlock cycle (word 0x2AA)
    pub m29_unlock2: u32,
}

impl Default for CommandAddresses {
    fn default() -> Self {
        Self {
            base: 0x10_0000,
            amd_unlock1: 0x10_AAAA,
            amd_unlock2: 0x10_5554,
            m29_unlock1: 0x10_0AAA,
            m29_unlock2: 0x10_0554,
        }
    }
}
