//! In-memory model of the supported flash families
//!
//! The model follows each family's command state machine closely enough for
//! the drivers to run unmodified: unlock cycles, autoselect and intelligent
//! identifier modes, data polling and Intel status reads. Program and erase
//! report busy for a configurable number of status reads before finishing.

use flashmon_core::chip::{ChipFamily, ChipIdentity, CommandAddresses, FamilyKind, FlashBus};
use flashmon_core::{Error, Result};

const ERASED: u16 = 0xFFFF;

/// Errors to report instead of completing an operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Programming this address fails
    pub program_at: Option<u32>,
    /// Every erase fails
    pub erase: bool,
}

/// Configuration for the simulated flash
#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    /// Family to model
    pub family: &'static ChipFamily,
    /// ID words reported in identification mode
    pub identity: ChipIdentity,
    /// Bus wiring
    pub addrs: CommandAddresses,
    /// Status reads that report busy before an operation completes
    pub busy_polls: u32,
    /// Injected errors
    pub faults: FaultPlan,
    /// Whether the board can be reset
    pub resettable: bool,
}

impl SimConfig {
    /// Model a healthy part of `family`
    pub fn new(family: &'static ChipFamily) -> Self {
        Self {
            family,
            identity: ChipIdentity {
                manufacturer_id: family.manufacturer_id,
                device_id: family.device_id,
            },
            addrs: CommandAddresses::default(),
            busy_polls: 2,
            faults: FaultPlan::default(),
            resettable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Program { addr: u32, word: u16 },
    Erase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Busy {
    op: Operation,
    remaining: u32,
    fault: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Busy,
    Done,
    Fault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Array,
    Identify,
    IntelStatus,
    Busy(Busy),
}

/// Progress through an AMD-style unlock sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unlock {
    Idle,
    First,
    Second,
    ProgramArmed,
    EraseSetup,
    EraseFirst,
    EraseSecond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IntelPending {
    None,
    Erase,
    Program,
}

/// Simulated flash chip behind the 16-bit bus
pub struct SimulatedFlash {
    config: SimConfig,
    data: Vec<u8>,
    mode: Mode,
    unlock: Unlock,
    intel: IntelPending,
    interrupts: bool,
    unmasked_erases: u32,
    chip_erases: u32,
    erased_sectors: Vec<u32>,
    resets: u32,
}

impl SimulatedFlash {
    /// Create an erased chip of `family`
    pub fn new(family: &'static ChipFamily) -> Self {
        Self::with_config(SimConfig::new(family))
    }

    /// Create an erased chip from a full configuration
    pub fn with_config(config: SimConfig) -> Self {
        log::debug!(
            "sim: {} {} at 0x{:08X}",
            config.family.vendor,
            config.family.name,
            config.addrs.base
        );
        Self {
            data: vec![0xFF; config.family.size as usize],
            config,
            mode: Mode::Array,
            unlock: Unlock::Idle,
            intel: IntelPending::None,
            interrupts: true,
            unmasked_erases: 0,
            chip_erases: 0,
            erased_sectors: Vec::new(),
            resets: 0,
        }
    }

    /// Configuration in use
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Replace the injected faults
    pub fn set_faults(&mut self, faults: FaultPlan) {
        self.config.faults = faults;
    }

    /// Whole array contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Copy of `len` bytes starting at bus address `addr`
    pub fn read_image(&self, addr: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                self.offset(addr + i as u32)
                    .map(|off| self.data[off])
                    .unwrap_or(0xFF)
            })
            .collect()
    }

    /// Store bytes directly, bypassing the command interface
    pub fn load(&mut self, addr: u32, bytes: &[u8]) {
        for (i, &byte) in bytes.iter().enumerate() {
            if let Some(off) = self.offset(addr + i as u32) {
                self.data[off] = byte;
            }
        }
    }

    /// Whole-chip erases completed
    pub fn chip_erases(&self) -> u32 {
        self.chip_erases
    }

    /// Bus addresses of completed sector erases, in order
    pub fn erased_sectors(&self) -> &[u32] {
        &self.erased_sectors
    }

    /// Erases started while interrupts were enabled
    pub fn unmasked_erases(&self) -> u32 {
        self.unmasked_erases
    }

    /// Current interrupt enable state
    pub fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    /// Whether the chip answers reads with array data
    pub fn in_read_mode(&self) -> bool {
        self.mode == Mode::Array
    }

    /// Number of board resets
    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn kind(&self) -> FamilyKind {
        self.config.family.kind
    }

    fn offset(&self, addr: u32) -> Option<usize> {
        let off = addr.checked_sub(self.config.addrs.base)? as usize;
        (off < self.data.len()).then_some(off)
    }

    fn array_word(&self, addr: u32) -> u16 {
        match self.offset(addr & !1) {
            Some(off) if off + 1 < self.data.len() => {
                u16::from_le_bytes([self.data[off], self.data[off + 1]])
            }
            _ => ERASED,
        }
    }

    fn program_array(&mut self, addr: u32, word: u16) {
        if let Some(off) = self.offset(addr & !1) {
            let [lo, hi] = word.to_le_bytes();
            // Programming only clears bits
            self.data[off] &= lo;
            if off + 1 < self.data.len() {
                self.data[off + 1] &= hi;
            }
        }
    }

    fn sector_containing(&self, addr: u32) -> Option<(usize, usize)> {
        let off = self.offset(addr)?;
        let mut start = 0usize;
        for &size in self.config.family.sectors {
            let size = size as usize;
            if off < start + size {
                return Some((start, size));
            }
            start += size;
        }
        None
    }

    fn start_program(&mut self, addr: u32, word: u16) {
        let fault = self.config.faults.program_at == Some(addr);
        if !fault {
            self.program_array(addr, word);
        }
        self.mode = Mode::Busy(Busy {
            op: Operation::Program { addr, word },
            remaining: self.config.busy_polls,
            fault,
        });
    }

    fn start_erase(&mut self, sector: Option<u32>) {
        if self.interrupts {
            self.unmasked_erases += 1;
        }
        let fault = self.config.faults.erase;
        if !fault {
            match sector {
                None => {
                    self.data.fill(0xFF);
                    self.chip_erases += 1;
                }
                Some(addr) => {
                    if let Some((start, size)) = self.sector_containing(addr) {
                        self.data[start..start + size].fill(0xFF);
                        self.erased_sectors.push(addr);
                    }
                }
            }
        }
        self.mode = Mode::Busy(Busy {
            op: Operation::Erase,
            remaining: self.config.busy_polls,
            fault,
        });
    }

    fn unlock_addresses(&self) -> (u32, u32) {
        let addrs = &self.config.addrs;
        match self.kind() {
            FamilyKind::M29W800 => (addrs.m29_unlock1, addrs.m29_unlock2),
            _ => (addrs.amd_unlock1, addrs.amd_unlock2),
        }
    }

    /// Command byte carried by a bus write, if the family would decode one
    fn command_byte(&self, value: u16) -> Option<u8> {
        let [lo, hi] = value.to_le_bytes();
        match self.kind() {
            // Both parts must see the same command
            FamilyKind::AmdPacked => (lo == hi).then_some(lo),
            _ => Some(lo),
        }
    }

    fn amd_write(&mut self, addr: u32, value: u16) {
        if self.unlock == Unlock::ProgramArmed {
            self.unlock = Unlock::Idle;
            self.start_program(addr, value);
            return;
        }
        let Some(cmd) = self.command_byte(value) else {
            self.unlock = Unlock::Idle;
            return;
        };
        if cmd == 0xF0 {
            self.mode = Mode::Array;
            self.unlock = Unlock::Idle;
            return;
        }

        let (u1, u2) = self.unlock_addresses();
        self.unlock = match (self.unlock, cmd) {
            (Unlock::Idle, 0xAA) if addr == u1 => Unlock::First,
            (Unlock::First, 0x55) if addr == u2 => Unlock::Second,
            (Unlock::Second, 0x90) if addr == u1 => {
                self.mode = Mode::Identify;
                Unlock::Idle
            }
            (Unlock::Second, 0xA0) if addr == u1 => Unlock::ProgramArmed,
            (Unlock::Second, 0x80) if addr == u1 => Unlock::EraseSetup,
            (Unlock::EraseSetup, 0xAA) if addr == u1 => Unlock::EraseFirst,
            (Unlock::EraseFirst, 0x55) if addr == u2 => Unlock::EraseSecond,
            (Unlock::EraseSecond, 0x10) if addr == u1 => {
                self.start_erase(None);
                Unlock::Idle
            }
            (Unlock::EraseSecond, 0x30) => {
                self.start_erase(Some(addr));
                Unlock::Idle
            }
            _ => Unlock::Idle,
        };
    }

    fn intel_write(&mut self, addr: u32, value: u16) {
        if self.intel == IntelPending::Program {
            self.intel = IntelPending::None;
            self.start_program(addr, value);
            return;
        }
        let pending = core::mem::replace(&mut self.intel, IntelPending::None);
        match value {
            0x0050 => {}
            0x0090 => self.mode = Mode::Identify,
            0x00FF => self.mode = Mode::Array,
            0x0020 => self.intel = IntelPending::Erase,
            0x00D0 if pending == IntelPending::Erase => self.start_erase(Some(addr)),
            0x0070 => {
                if !matches!(self.mode, Mode::Busy(_)) {
                    self.mode = Mode::IntelStatus;
                }
            }
            0x0040 | 0x0010 => self.intel = IntelPending::Program,
            _ => {}
        }
    }

    fn status_word(&self, op: Operation, phase: Phase) -> u16 {
        use FamilyKind::*;
        match (self.kind(), op, phase) {
            (AmdPacked, Operation::Program { word, .. }, Phase::Busy) => !word & 0x8080,
            (AmdPacked, Operation::Program { word, .. }, Phase::Fault) => {
                (!word & 0x8080) | 0x2020
            }
            (M29W800, Operation::Program { word, .. }, Phase::Busy) => !word & 0x0080,
            (M29W800, Operation::Program { word, .. }, Phase::Fault) => {
                (!word & 0x0080) | 0x0020
            }
            // Atmel flips DQ7 once the write has finished
            (Atmel, Operation::Program { word, .. }, Phase::Done) => word ^ 0x0080,
            (Atmel, Operation::Program { word, .. }, _) => word,
            (IntelTopBoot | IntelBottomBoot, _, Phase::Busy) => 0x0000,
            (IntelTopBoot | IntelBottomBoot, Operation::Program { .. }, Phase::Fault) => 0x0090,
            (IntelTopBoot | IntelBottomBoot, Operation::Erase, Phase::Fault) => 0x00A0,
            (IntelTopBoot | IntelBottomBoot, _, Phase::Done) => 0x0080,
            (AmdPacked, Operation::Erase, Phase::Fault) => 0x2020,
            (M29W800, Operation::Erase, Phase::Fault) => 0x0020,
            (_, Operation::Erase, Phase::Done) => ERASED,
            (_, Operation::Erase, _) => 0x0000,
            (_, Operation::Program { addr, .. }, Phase::Done) => self.array_word(addr),
        }
    }

    fn poll(&mut self, addr: u32, mut busy: Busy) -> u16 {
        let phase = if busy.fault {
            Phase::Fault
        } else if busy.remaining > 0 {
            busy.remaining -= 1;
            self.mode = Mode::Busy(busy);
            Phase::Busy
        } else {
            Phase::Done
        };

        // AMD and ST parts drop back to array reads by themselves
        if phase == Phase::Done && matches!(self.kind(), FamilyKind::AmdPacked | FamilyKind::M29W800)
        {
            self.mode = Mode::Array;
            return self.array_word(addr);
        }
        self.status_word(busy.op, phase)
    }
}

impl FlashBus for SimulatedFlash {
    fn read_word(&mut self, addr: u32) -> u16 {
        match self.mode {
            Mode::Busy(busy) => self.poll(addr, busy),
            Mode::Identify if addr == self.config.addrs.base => self.config.identity.manufacturer_id,
            Mode::Identify if addr == self.config.addrs.base + 2 => self.config.identity.device_id,
            Mode::IntelStatus => 0x0080,
            Mode::Identify | Mode::Array => self.array_word(addr),
        }
    }

    fn write_word(&mut self, addr: u32, value: u16) {
        log::trace!("sim: write 0x{:04X} at 0x{:08X}", value, addr);
        match self.kind() {
            FamilyKind::IntelTopBoot | FamilyKind::IntelBottomBoot => self.intel_write(addr, value),
            _ => self.amd_write(addr, value),
        }
    }

    fn set_interrupts(&mut self, enabled: bool) -> bool {
        core::mem::replace(&mut self.interrupts, enabled)
    }

    fn can_reset(&self) -> bool {
        self.config.resettable
    }

    fn system_reset(&mut self) -> Result<()> {
        if !self.config.resettable {
            return Err(Error::ResetNotSupported);
        }
        self.resets += 1;
        self.mode = Mode::Array;
        self.unlock = Unlock::Idle;
        self.intel = IntelPending::None;
        Ok(())
    }
}
