//! Per-family identify/erase/program algorithms

use super::bus::{with_interrupts_disabled, CommandAddresses, FlashBus};
use super::family::{self, ChipFamily, ChipIdentity, FamilyKind, IdSequence};
use super::status::{wait_for, PollBudget, StatusOutcome, StatusProtocol};
use crate::error::{Error, Result};
use crate::protocol::block_words;

/// AMD-style command words (both byte lanes)
mod amd {
    pub const UNLOCK1: u16 = 0xAAAA;
    pub const UNLOCK2: u16 = 0x5555;
    pub const AUTOSELECT: u16 = 0x9090;
    pub const PROGRAM: u16 = 0xA0A0;
    pub const ERASE: u16 = 0x8080;
    pub const ERASE_CHIP: u16 = 0x1010;
    pub const ERASE_SECTOR: u16 = 0x3030;
    pub const READ_RESET: u16 = 0xF0F0;
    pub const ERASED: u16 = 0xFFFF;
}

/// Intel command words
mod intel {
    pub const CLEAR_STATUS: u16 = 0x50;
    pub const ERASE: u16 = 0x20;
    pub const ERASE_CONFIRM: u16 = 0xD0;
    pub const READ_STATUS: u16 = 0x70;
    pub const READ_ARRAY: u16 = 0xFF;
    pub const PROGRAM: u16 = 0x40;
    pub const READ_ID: u16 = 0x90;
}

/// M29W800 command bytes
mod m29 {
    pub const UNLOCK1: u16 = 0xAA;
    pub const UNLOCK2: u16 = 0x55;
    pub const AUTOSELECT: u16 = 0x90;
    pub const CFI_QUERY: u16 = 0x98;
    pub const PROGRAM: u16 = 0xA0;
    pub const ERASE: u16 = 0x80;
    pub const ERASE_CHIP: u16 = 0x10;
    pub const ERASE_SECTOR: u16 = 0x30;
    pub const READ_RESET: u16 = 0xF0;
}

/// Operations every chip family supports
pub trait ChipDriver {
    /// Family this driver was built for
    fn family(&self) -> &'static ChipFamily;

    /// Enter identification mode, read both ID words, return to read mode
    fn identify<B: FlashBus + ?Sized>(&self, bus: &mut B) -> ChipIdentity;

    /// Erase the whole chip
    fn erase_chip<B: FlashBus + ?Sized>(&mut self, bus: &mut B) -> Result<()>;

    /// Erase one sector of the family's sector map
    fn erase_sector<B: FlashBus + ?Sized>(&mut self, bus: &mut B, index: usize) -> Result<()>;

    /// Program one word and wait for the chip to finish
    fn program_word<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
        word: u16,
    ) -> StatusOutcome;

    /// Return the chip to array-read mode
    fn reset_to_read_mode<B: FlashBus + ?Sized>(&self, bus: &mut B);

    /// Program a block word by word, stopping at the first fault
    fn program_block<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
        payload: &[u8],
    ) -> Result<()> {
        for (offset, word) in block_words(payload) {
            let addr = address.wrapping_add(offset);
            if self.program_word(bus, addr, word) != StatusOutcome::Success {
                self.reset_to_read_mode(bus);
                log::error!("chip: program fault at 0x{:08X}", addr);
                return Err(Error::ChipFault { addr });
            }
        }
        self.reset_to_read_mode(bus);
        Ok(())
    }
}

fn sector_address(family: &ChipFamily, base: u32, index: usize) -> Result<u32> {
    family
        .sector(index)
        .map(|(offset, _)| base + offset)
        .ok_or(Error::InvalidSector(index))
}

fn outcome_to_result(outcome: StatusOutcome, addr: u32) -> Result<()> {
    match outcome {
        StatusOutcome::Success => Ok(()),
        _ => Err(Error::ChipFault { addr }),
    }
}

/// AMD command set: Am29F040 and SST39SF040 pairs, Atmel AT49F8192A(T)
#[derive(Debug, Clone, Copy)]
pub struct AmdCompatible {
    family: &'static ChipFamily,
    addrs: CommandAddresses,
    status: StatusProtocol,
}

impl AmdCompatible {
    /// Create a driver for `family`
    pub fn new(family: &'static ChipFamily, addrs: CommandAddresses) -> Self {
        let status = match family.kind {
            FamilyKind::Atmel => StatusProtocol::Atmel,
            _ => StatusProtocol::AmdPacked,
        };
        Self {
            family,
            addrs,
            status,
        }
    }

    /// Run the autoselect sequence and read the IDs
    ///
    /// Leaves the chip in autoselect mode.
    pub fn read_id<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) -> ChipIdentity {
        bus.write_word(addrs.amd_unlock1, amd::UNLOCK1);
        bus.write_word(addrs.amd_unlock2, amd::UNLOCK2);
        bus.write_word(addrs.amd_unlock1, amd::AUTOSELECT);
        ChipIdentity {
            manufacturer_id: bus.read_word(addrs.base),
            device_id: bus.read_word(addrs.base + 2),
        }
    }

    /// Issue read/reset
    pub fn read_reset<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) {
        bus.write_word(addrs.amd_unlock1, amd::READ_RESET);
    }

    fn unlock<B: FlashBus + ?Sized>(&self, bus: &mut B) {
        bus.write_word(self.addrs.amd_unlock1, amd::UNLOCK1);
        bus.write_word(self.addrs.amd_unlock2, amd::UNLOCK2);
    }

    fn erase_with<B: FlashBus + ?Sized>(&self, bus: &mut B, target: u32, command: u16) -> Result<()> {
        self.unlock(bus);
        bus.write_word(self.addrs.amd_unlock1, amd::ERASE);
        self.unlock(bus);
        bus.write_word(target, command);

        let status = self.status;
        let mut outcome = wait_for(bus, target, PollBudget::ERASE, |s, reread| {
            status.erase(s, reread)
        });

        if outcome == StatusOutcome::Success && bus.read_word(target) != amd::ERASED {
            log::error!("chip: erase did not leave 0x{:08X} blank", target);
            outcome = StatusOutcome::Fault;
        }

        self.reset_to_read_mode(bus);
        outcome_to_result(outcome, target)
    }
}

impl ChipDriver for AmdCompatible {
    fn family(&self) -> &'static ChipFamily {
        self.family
    }

    fn identify<B: FlashBus + ?Sized>(&self, bus: &mut B) -> ChipIdentity {
        let id = Self::read_id(bus, &self.addrs);
        self.reset_to_read_mode(bus);
        id
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        log::debug!("chip: {} chip erase", self.family.name);
        self.erase_with(bus, self.addrs.amd_unlock1, amd::ERASE_CHIP)
    }

    fn erase_sector<B: FlashBus + ?Sized>(&mut self, bus: &mut B, index: usize) -> Result<()> {
        let addr = sector_address(self.family, self.addrs.base, index)?;
        log::debug!("chip: {} sector {} erase at 0x{:08X}", self.family.name, index, addr);
        self.erase_with(bus, addr, amd::ERASE_SECTOR)
    }

    fn program_word<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
        word: u16,
    ) -> StatusOutcome {
        self.unlock(bus);
        bus.write_word(self.addrs.amd_unlock1, amd::PROGRAM);
        bus.write_word(address, word);

        let status = self.status;
        let outcome = wait_for(bus, address, PollBudget::PROGRAM, |s, reread| {
            status.program(word, s, reread)
        });
        self.reset_to_read_mode(bus);
        outcome
    }

    fn reset_to_read_mode<B: FlashBus + ?Sized>(&self, bus: &mut B) {
        Self::read_reset(bus, &self.addrs);
    }
}

/// Intel 28F800 boot block parts, erased sector by sector
#[derive(Debug, Clone, Copy)]
pub struct IntelFlash {
    family: &'static ChipFamily,
    addrs: CommandAddresses,
}

impl IntelFlash {
    /// Create a driver for `family`
    pub fn new(family: &'static ChipFamily, addrs: CommandAddresses) -> Self {
        Self { family, addrs }
    }

    /// Read the IDs through the intelligent identifier command
    ///
    /// Leaves the chip in identifier mode.
    pub fn read_id<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) -> ChipIdentity {
        bus.write_word(addrs.base, intel::CLEAR_STATUS);
        bus.write_word(addrs.base, intel::READ_ID);
        let manufacturer_id = bus.read_word(addrs.base);

        bus.write_word(addrs.base, intel::CLEAR_STATUS);
        bus.write_word(addrs.base, intel::READ_ID);
        let device_id = bus.read_word(addrs.base + 2);

        ChipIdentity {
            manufacturer_id,
            device_id,
        }
    }

    /// Issue read array
    pub fn read_array<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) {
        bus.write_word(addrs.base, intel::READ_ARRAY);
    }
}

impl ChipDriver for IntelFlash {
    fn family(&self) -> &'static ChipFamily {
        self.family
    }

    fn identify<B: FlashBus + ?Sized>(&self, bus: &mut B) -> ChipIdentity {
        let id = Self::read_id(bus, &self.addrs);
        self.reset_to_read_mode(bus);
        id
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        log::debug!(
            "chip: {} erasing {} sectors",
            self.family.name,
            self.family.sectors.len()
        );
        for index in 0..self.family.sectors.len() {
            self.erase_sector(bus, index)?;
        }
        Ok(())
    }

    fn erase_sector<B: FlashBus + ?Sized>(&mut self, bus: &mut B, index: usize) -> Result<()> {
        let addr = sector_address(self.family, self.addrs.base, index)?;
        log::trace!("chip: {} sector {} erase at 0x{:08X}", self.family.name, index, addr);

        bus.write_word(addr, intel::CLEAR_STATUS);
        bus.write_word(addr, intel::ERASE);
        bus.write_word(addr, intel::ERASE_CONFIRM);
        bus.write_word(addr, intel::READ_STATUS);

        let outcome = wait_for(bus, addr, PollBudget::ERASE, |s, reread| {
            StatusProtocol::Intel.erase(s, reread)
        });
        self.reset_to_read_mode(bus);
        if outcome != StatusOutcome::Success {
            log::error!("chip: sector {} erase fault at 0x{:08X}", index, addr);
        }
        outcome_to_result(outcome, addr)
    }

    fn program_word<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
        word: u16,
    ) -> StatusOutcome {
        bus.write_word(address, intel::CLEAR_STATUS);
        bus.write_word(address, intel::PROGRAM);
        bus.write_word(address, word);

        wait_for(bus, address, PollBudget::PROGRAM, |s, reread| {
            StatusProtocol::Intel.program(word, s, reread)
        })
    }

    fn reset_to_read_mode<B: FlashBus + ?Sized>(&self, bus: &mut B) {
        Self::read_array(bus, &self.addrs);
    }
}

/// ST M29W800, byte-wide command cycles
#[derive(Debug, Clone, Copy)]
pub struct M29W800 {
    family: &'static ChipFamily,
    addrs: CommandAddresses,
}

impl M29W800 {
    /// Create a driver for `family`
    pub fn new(family: &'static ChipFamily, addrs: CommandAddresses) -> Self {
        Self { family, addrs }
    }

    fn unlock<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) {
        bus.write_word(addrs.m29_unlock1, m29::UNLOCK1);
        bus.write_word(addrs.m29_unlock2, m29::UNLOCK2);
    }

    /// Run autoselect plus CFI entry and read the IDs
    pub fn read_id<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) -> ChipIdentity {
        Self::unlock(bus, addrs);
        bus.write_word(addrs.m29_unlock1, m29::AUTOSELECT);
        bus.write_word(addrs.m29_unlock1, m29::CFI_QUERY);
        ChipIdentity {
            manufacturer_id: bus.read_word(addrs.base),
            device_id: bus.read_word(addrs.base + 2),
        }
    }

    /// Issue the unlocked read/reset
    pub fn read_reset<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) {
        Self::unlock(bus, addrs);
        bus.write_word(addrs.m29_unlock1, m29::READ_RESET);
    }

    fn erase_with<B: FlashBus + ?Sized>(&self, bus: &mut B, target: u32, command: u16) -> Result<()> {
        Self::unlock(bus, &self.addrs);
        bus.write_word(self.addrs.m29_unlock1, m29::ERASE);
        Self::unlock(bus, &self.addrs);
        let (write_at, poll_at) = if command == m29::ERASE_CHIP {
            (self.addrs.m29_unlock1, self.addrs.base)
        } else {
            (target, target)
        };
        bus.write_word(write_at, command);

        let outcome = wait_for(bus, poll_at, PollBudget::ERASE, |s, reread| {
            StatusProtocol::M29W800.erase(s, reread)
        });
        self.reset_to_read_mode(bus);
        outcome_to_result(outcome, poll_at)
    }
}

impl ChipDriver for M29W800 {
    fn family(&self) -> &'static ChipFamily {
        self.family
    }

    fn identify<B: FlashBus + ?Sized>(&self, bus: &mut B) -> ChipIdentity {
        let id = Self::read_id(bus, &self.addrs);
        self.reset_to_read_mode(bus);
        id
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        log::debug!("chip: {} chip erase", self.family.name);
        self.erase_with(bus, self.addrs.base, m29::ERASE_CHIP)
    }

    fn erase_sector<B: FlashBus + ?Sized>(&mut self, bus: &mut B, index: usize) -> Result<()> {
        let addr = sector_address(self.family, self.addrs.base, index)?;
        self.erase_with(bus, addr, m29::ERASE_SECTOR)
    }

    fn program_word<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
        word: u16,
    ) -> StatusOutcome {
        Self::unlock(bus, &self.addrs);
        bus.write_word(self.addrs.m29_unlock1, m29::PROGRAM);
        bus.write_word(address, word);

        wait_for(bus, address, PollBudget::PROGRAM, |s, reread| {
            StatusProtocol::M29W800.program(word, s, reread)
        })
    }

    fn reset_to_read_mode<B: FlashBus + ?Sized>(&self, bus: &mut B) {
        Self::read_reset(bus, &self.addrs);
    }
}

/// Driver for whichever family was detected
#[derive(Debug, Clone, Copy)]
pub enum FlashDriver {
    /// AMD/SST/Atmel
    AmdCompatible(AmdCompatible),
    /// Intel, boot block at the top
    IntelTopBoot(IntelFlash),
    /// Intel, boot block at the bottom
    IntelBottomBoot(IntelFlash),
    /// ST M29W800
    M29W800(M29W800),
}

impl FlashDriver {
    /// Build the driver for `family`
    pub fn new(family: &'static ChipFamily, addrs: CommandAddresses) -> Self {
        match family.kind {
            FamilyKind::AmdPacked | FamilyKind::Atmel => {
                Self::AmdCompatible(AmdCompatible::new(family, addrs))
            }
            FamilyKind::IntelTopBoot => Self::IntelTopBoot(IntelFlash::new(family, addrs)),
            FamilyKind::IntelBottomBoot => Self::IntelBottomBoot(IntelFlash::new(family, addrs)),
            FamilyKind::M29W800 => Self::M29W800(M29W800::new(family, addrs)),
        }
    }
}

macro_rules! dispatch {
    ($self:expr, $d:ident => $body:expr) => {
        match $self {
            FlashDriver::AmdCompatible($d) => $body,
            FlashDriver::IntelTopBoot($d) => $body,
            FlashDriver::IntelBottomBoot($d) => $body,
            FlashDriver::M29W800($d) => $body,
        }
    };
}

impl ChipDriver for FlashDriver {
    fn family(&self) -> &'static ChipFamily {
        dispatch!(self, d => d.family())
    }

    fn identify<B: FlashBus + ?Sized>(&self, bus: &mut B) -> ChipIdentity {
        with_interrupts_disabled(bus, |bus| dispatch!(self, d => d.identify(bus)))
    }

    fn erase_chip<B: FlashBus + ?Sized>(&mut self, bus: &mut B) -> Result<()> {
        with_interrupts_disabled(bus, |bus| dispatch!(self, d => d.erase_chip(bus)))
    }

    fn erase_sector<B: FlashBus + ?Sized>(&mut self, bus: &mut B, index: usize) -> Result<()> {
        with_interrupts_disabled(bus, |bus| dispatch!(self, d => d.erase_sector(bus, index)))
    }

    fn program_word<B: FlashBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
        word: u16,
    ) -> StatusOutcome {
        dispatch!(self, d => d.program_word(bus, address, word))
    }

    fn reset_to_read_mode<B: FlashBus + ?Sized>(&self, bus: &mut B) {
        dispatch!(self, d => d.reset_to_read_mode(bus))
    }
}

/// Identify the chip on `bus`
///
/// Tries the AMD, M29W800 and Intel identification sequences in that
/// order, returning the first ID that matches a known family. Returns the
/// last ID read when nothing matched. The chip is back in read mode either
/// way.
pub fn identify<B: FlashBus + ?Sized>(
    bus: &mut B,
    addrs: &CommandAddresses,
) -> (ChipIdentity, Option<&'static ChipFamily>) {
    with_interrupts_disabled(bus, |bus| {
        let id = AmdCompatible::read_id(bus, addrs);
        AmdCompatible::read_reset(bus, addrs);
        if let Some(family) = family::lookup(IdSequence::Amd, id) {
            return (id, Some(family));
        }
        log::trace!("chip: AMD autoselect read {}", id);

        let id = M29W800::read_id(bus, addrs);
        M29W800::read_reset(bus, addrs);
        if let Some(family) = family::lookup(IdSequence::M29W800, id) {
            return (id, Some(family));
        }
        log::trace!("chip: M29W800 autoselect read {}", id);

        let id = IntelFlash::read_id(bus, addrs);
        IntelFlash::read_array(bus, addrs);
        if let Some(family) = family::lookup(IdSequence::Intel, id) {
            return (id, Some(family));
        }
        log::trace!("chip: Intel identifier read {}", id);

        (id, None)
    })
}

/// Identify the chip and build its driver
pub fn probe<B: FlashBus + ?Sized>(bus: &mut B, addrs: &CommandAddresses) -> Result<FlashDriver> {
    match identify(bus, addrs) {
        (id, Some(family)) => {
            log::info!("chip: found {} {} ({})", family.vendor, family.name, id);
            Ok(FlashDriver::new(family, *addrs))
        }
        (id, None) => {
            log::warn!("chip: no known flash answered (last {})", id);
            Err(Error::ChipNotFound)
        }
    }
}
