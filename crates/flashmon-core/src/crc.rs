//! Table-driven CRC engine used to confirm programmed flash
//!
//! The engine is parameterized by register width (8, 16 or 32 bits) and an
//! MSB-first polynomial. It runs the augmented form of the algorithm: the
//! register starts at zero and every input byte is shifted in at the bottom
//! while the byte falling out of the top indexes the table. Feeding a message
//! followed by `width / 8` zero bytes leaves the conventional zero-init CRC
//! in the register; feeding a message followed by its big-endian CRC leaves
//! zero.
//!
//! A scan is only accepted when the register ends at zero *and* was nonzero
//! at some point, so an erased or blank range cannot pass by accident.

use crate::error::{Error, Result};

/// Width of the CRC register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrcWidth {
    /// CRC-8
    Bits8,
    /// CRC-16
    Bits16,
    /// CRC-32
    Bits32,
}

impl CrcWidth {
    /// Convert a bit count into a width
    pub fn from_bits(bits: u8) -> Result<Self> {
        match bits {
            8 => Ok(Self::Bits8),
            16 => Ok(Self::Bits16),
            32 => Ok(Self::Bits32),
            other => Err(Error::InvalidCrcWidth(other)),
        }
    }

    /// Register width in bits
    pub const fn bits(self) -> u8 {
        match self {
            Self::Bits8 => 8,
            Self::Bits16 => 16,
            Self::Bits32 => 32,
        }
    }

    /// Register width in bytes
    pub const fn bytes(self) -> usize {
        self.bits() as usize / 8
    }

    /// Number of ASCII hex digits in a readback
    pub const fn digits(self) -> usize {
        self.bits() as usize / 4
    }

    /// Mask selecting the register bits
    pub const fn mask(self) -> u32 {
        match self {
            Self::Bits8 => 0xFF,
            Self::Bits16 => 0xFFFF,
            Self::Bits32 => 0xFFFF_FFFF,
        }
    }

    const fn top_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    const fn top_byte_shift(self) -> u32 {
        self.bits() as u32 - 8
    }
}

/// 256-entry lookup table for one width/polynomial pair
#[derive(Clone, PartialEq, Eq)]
pub struct CrcTable {
    width: CrcWidth,
    entries: [u32; 256],
}

impl CrcTable {
    /// Width the table was built for
    pub fn width(&self) -> CrcWidth {
        self.width
    }

    /// Table entry for `index`
    pub fn entry(&self, index: u8) -> u32 {
        self.entries[index as usize]
    }
}

impl core::fmt::Debug for CrcTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CrcTable")
            .field("width", &self.width)
            .field("entry[1]", &self.entries[1])
            .finish()
    }
}

/// Build the lookup table for `width` and `polynomial`
///
/// Each entry starts from its own index and is shifted left `width` times,
/// XORing in the polynomial whenever the top bit falls out. The index bits
/// only reach the top after `width - 8` plain shifts, so this is the usual
/// "top byte through 8 rounds" table.
pub fn build_table(width: CrcWidth, polynomial: u32) -> CrcTable {
    let mask = width.mask();
    let poly = polynomial & mask;
    let mut entries = [0u32; 256];

    for (i, entry) in entries.iter_mut().enumerate() {
        let mut reg = i as u32;
        for _ in 0..width.bits() {
            reg = if reg & width.top_bit() != 0 {
                ((reg << 1) ^ poly) & mask
            } else {
                (reg << 1) & mask
            };
        }
        *entry = reg;
    }

    CrcTable { width, entries }
}

/// Shift one byte into the running register
pub fn fold(table: &CrcTable, running: u32, byte: u8) -> u32 {
    let width = table.width;
    let index = ((running >> width.top_byte_shift()) & 0xFF) as u8;
    let shifted = ((running << 8) | byte as u32) & width.mask();
    shifted ^ table.entry(index)
}

/// Outcome of a CRC scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcVerdict {
    /// Range checksums to zero and was not blank
    Pass,
    /// Nonzero remainder, or the register never left zero
    Fail,
}

/// Judge a finished scan
pub fn finalize(width: CrcWidth, running: u32, saw_nonzero: bool) -> CrcVerdict {
    if running & width.mask() == 0 && saw_nonzero {
        CrcVerdict::Pass
    } else {
        CrcVerdict::Fail
    }
}

/// Running CRC state for one scan
#[derive(Debug, Clone)]
pub struct CrcSession {
    table: CrcTable,
    running: u32,
    saw_nonzero: bool,
}

impl CrcSession {
    /// Start a scan with a zeroed register
    pub fn new(width: CrcWidth, polynomial: u32) -> Self {
        Self {
            table: build_table(width, polynomial),
            running: 0,
            saw_nonzero: false,
        }
    }

    /// Register width
    pub fn width(&self) -> CrcWidth {
        self.table.width
    }

    /// Shift one byte in
    pub fn update(&mut self, byte: u8) {
        self.running = fold(&self.table, self.running, byte);
        if self.running != 0 {
            self.saw_nonzero = true;
        }
    }

    /// Shift a run of bytes in
    pub fn update_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Current register value
    pub fn running(&self) -> u32 {
        self.running
    }

    /// Whether the register has held a nonzero value
    pub fn saw_nonzero(&self) -> bool {
        self.saw_nonzero
    }

    /// Judge the scan so far
    pub fn finalize(&self) -> CrcVerdict {
        finalize(self.width(), self.running, self.saw_nonzero)
    }

    /// Register contents as ASCII hex, most significant digit first
    pub fn digits(&self) -> Result<CrcDigits> {
        let width = self.width();
        let mut bytes = [0u8; 4];
        let be = self.running.to_be_bytes();
        bytes[..width.bytes()].copy_from_slice(&be[4 - width.bytes()..]);
        ascii_digits(&bytes[..width.bytes()])
    }
}

/// Parameters of a verification run, as carried by the `r` command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcDescriptor {
    /// Register width
    pub width: CrcWidth,
    /// MSB-first polynomial, width-sized
    pub polynomial: u32,
    /// First flash address scanned
    pub flash_start: u32,
    /// Last flash address scanned (inclusive)
    pub flash_end: u32,
    /// Address of the CRC stored in flash, 0 when the operator supplies it
    pub stored_crc_address: u32,
    /// Read the last `width / 8` bytes of the range as zero
    ///
    /// Set when the CRC lives at the end of the range but is not part of the
    /// image, so the scan leaves the CRC itself in the register.
    pub exclude_trailing: bool,
}

/// Size of the CRC parameter block on the wire
pub const CRC_PARAMS_LEN: usize = 17;

impl CrcDescriptor {
    /// Create a descriptor; trailing bytes are excluded when no stored CRC
    /// address is given
    pub fn new(
        width: CrcWidth,
        polynomial: u32,
        flash_start: u32,
        flash_end: u32,
        stored_crc_address: u32,
    ) -> Self {
        Self {
            width,
            polynomial,
            flash_start,
            flash_end,
            stored_crc_address,
            exclude_trailing: stored_crc_address == 0,
        }
    }

    /// Same range, different stored CRC address
    pub fn with_stored_address(self, stored_crc_address: u32) -> Self {
        Self::new(
            self.width,
            self.polynomial,
            self.flash_start,
            self.flash_end,
            stored_crc_address,
        )
    }

    /// Whether a result is informational only (no stored CRC to compare)
    pub fn is_informational(&self) -> bool {
        self.stored_crc_address == 0
    }

    /// Encode as the 17-byte parameter block (all fields big-endian)
    pub fn to_wire(&self) -> [u8; CRC_PARAMS_LEN] {
        let mut out = [0u8; CRC_PARAMS_LEN];
        out[0] = self.width.bits();
        out[1..5].copy_from_slice(&self.polynomial.to_be_bytes());
        out[5..9].copy_from_slice(&self.flash_start.to_be_bytes());
        out[9..13].copy_from_slice(&self.flash_end.to_be_bytes());
        out[13..17].copy_from_slice(&self.stored_crc_address.to_be_bytes());
        out
    }

    /// Decode the 17-byte parameter block
    pub fn from_wire(raw: &[u8; CRC_PARAMS_LEN]) -> Result<Self> {
        let width = CrcWidth::from_bits(raw[0])?;
        let word = |at: usize| u32::from_be_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Ok(Self::new(width, word(1), word(5), word(9), word(13)))
    }

    /// Parse a CRC generator configuration file
    ///
    /// Layout, one value per line: three free-form header lines, the width
    /// in decimal, the polynomial in hex, one free-form line, then the start
    /// address, end address and stored CRC address in hex.
    pub fn parse_config(text: &str) -> Result<Self> {
        let mut lines = text.lines();
        let mut next = |line: usize| lines.next().ok_or(Error::CrcConfig { line });

        for line in 1..=3 {
            next(line)?;
        }
        let width_line = next(4)?;
        let width = width_line
            .split_whitespace()
            .next()
            .and_then(|w| w.parse::<u8>().ok())
            .ok_or(Error::CrcConfig { line: 4 })?;
        let width = CrcWidth::from_bits(width)?;
        let polynomial = parse_config_hex(next(5)?, 5)?;
        next(6)?;
        let flash_start = parse_config_hex(next(7)?, 7)?;
        let flash_end = parse_config_hex(next(8)?, 8)?;
        let stored = parse_config_hex(next(9)?, 9)?;

        Ok(Self::new(width, polynomial, flash_start, flash_end, stored))
    }

    /// Judge a finished scan against this descriptor
    pub fn verdict(&self, session: &CrcSession) -> CrcVerdict {
        if self.is_informational() {
            CrcVerdict::Pass
        } else {
            session.finalize()
        }
    }
}

fn parse_config_hex(line: &str, line_no: usize) -> Result<u32> {
    let token = line
        .split_whitespace()
        .next()
        .ok_or(Error::CrcConfig { line: line_no })?;
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u32::from_str_radix(digits, 16).map_err(|_| Error::CrcConfig { line: line_no })
}

/// Scan a flash range described by `desc`
///
/// `read` returns the byte at an absolute address.
pub fn scan<F>(desc: &CrcDescriptor, mut read: F) -> Result<CrcSession>
where
    F: FnMut(u32) -> u8,
{
    if desc.flash_start > desc.flash_end {
        return Err(Error::InvalidCrcRange);
    }

    let trailing_from = desc
        .flash_end
        .saturating_sub(desc.width.bytes() as u32);
    let mut session = CrcSession::new(desc.width, desc.polynomial);

    let mut addr = desc.flash_start;
    loop {
        let byte = if desc.exclude_trailing && addr > trailing_from {
            0
        } else {
            read(addr)
        };
        session.update(byte);
        if addr == desc.flash_end {
            break;
        }
        addr += 1;
    }

    log::debug!(
        "crc: scanned 0x{:08X}..=0x{:08X}, register 0x{:X}",
        desc.flash_start,
        desc.flash_end,
        session.running()
    );
    Ok(session)
}

/// ASCII rendering of a CRC, at most 8 digits
pub type CrcDigits = heapless::Vec<u8, 8>;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Convert a nibble to its upper-case ASCII hex digit
///
/// Values above 15 are rejected rather than mapped to a placeholder.
pub fn nibble_to_ascii(nibble: u8) -> Result<u8> {
    HEX_DIGITS
        .get(nibble as usize)
        .copied()
        .ok_or(Error::InvalidNibble(nibble))
}

/// Render up to four bytes as ASCII hex, high nibble first
pub fn ascii_digits(bytes: &[u8]) -> Result<CrcDigits> {
    let mut out = CrcDigits::new();
    for &byte in bytes {
        let hi = nibble_to_ascii(byte >> 4)?;
        let lo = nibble_to_ascii(byte & 0x0F)?;
        out.push(hi)
            .and_then(|_| out.push(lo))
            .map_err(|_| Error::InvalidCrcWidth((bytes.len() * 8) as u8))?;
    }
    Ok(out)
}

/// Parse ASCII hex digits as sent in a readback
pub fn parse_digits(digits: &[u8]) -> Option<u32> {
    let text = core::str::from_utf8(digits).ok()?;
    u32::from_str_radix(text, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK: &[u8] = b"123456789";

    fn crc_of(width: CrcWidth, poly: u32, data: &[u8]) -> u32 {
        let mut session = CrcSession::new(width, poly);
        session.update_slice(data);
        for _ in 0..width.bytes() {
            session.update(0);
        }
        session.running()
    }

    #[test]
    fn test_zero_polynomial_table_is_pure_shift() {
        for width in [CrcWidth::Bits8, CrcWidth::Bits16, CrcWidth::Bits32] {
            let table = build_table(width, 0);
            for i in 0..=255u8 {
                assert_eq!(table.entry(i), 0);
            }

            let mut running = 0;
            for byte in [0x12, 0x34, 0x56, 0x78, 0x9A] {
                let expected = ((running << 8) | byte as u32) & width.mask();
                running = fold(&table, running, byte);
                assert_eq!(running, expected);
            }
        }
    }

    #[test]
    fn test_table_entries_crc16() {
        let table = build_table(CrcWidth::Bits16, 0x1021);
        assert_eq!(table.entry(0), 0);
        assert_eq!(table.entry(1), 0x1021);
        assert_eq!(table.entry(0xFF), 0x1EF0);
    }

    #[test]
    fn test_reference_vectors() {
        assert_eq!(crc_of(CrcWidth::Bits8, 0x07, CHECK), 0xF4);
        assert_eq!(crc_of(CrcWidth::Bits16, 0x1021, CHECK), 0x31C3);
        assert_eq!(crc_of(CrcWidth::Bits32, 0x04C1_1DB7, CHECK), 0x89A1_897F);
    }

    #[test]
    fn test_appended_crc_checks_to_zero() {
        let mut session = CrcSession::new(CrcWidth::Bits16, 0x1021);
        session.update_slice(CHECK);
        session.update_slice(&[0x31, 0xC3]);
        assert_eq!(session.running(), 0);
        assert_eq!(session.finalize(), CrcVerdict::Pass);
    }

    #[test]
    fn test_all_zero_range_fails() {
        let mut session = CrcSession::new(CrcWidth::Bits16, 0x1021);
        session.update_slice(&[0u8; 64]);
        assert_eq!(session.running(), 0);
        assert!(!session.saw_nonzero());
        assert_eq!(session.finalize(), CrcVerdict::Fail);
    }

    #[test]
    fn test_finalize_nonzero_remainder_fails() {
        assert_eq!(finalize(CrcWidth::Bits8, 0x01, true), CrcVerdict::Fail);
        assert_eq!(finalize(CrcWidth::Bits8, 0x00, true), CrcVerdict::Pass);
    }

    #[test]
    fn test_scan_with_stored_crc() {
        let mut image = [0u8; 11];
        image[..9].copy_from_slice(CHECK);
        image[9..].copy_from_slice(&[0x31, 0xC3]);
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x1000, 0x100A, 0x1009);
        assert!(!desc.exclude_trailing);

        let session = scan(&desc, |addr| image[(addr - 0x1000) as usize]).unwrap();
        assert_eq!(desc.verdict(&session), CrcVerdict::Pass);
    }

    #[test]
    fn test_scan_excludes_trailing_bytes() {
        // Trailing bytes hold garbage that must be read as zero
        let mut image = [0xEEu8; 11];
        image[..9].copy_from_slice(CHECK);
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0, 10, 0);
        assert!(desc.exclude_trailing);

        let session = scan(&desc, |addr| image[addr as usize]).unwrap();
        assert_eq!(session.running(), 0x31C3);
        assert_eq!(desc.verdict(&session), CrcVerdict::Pass);
        assert_eq!(session.digits().unwrap().as_slice(), b"31C3");
    }

    #[test]
    fn test_informational_mode_always_passes() {
        let desc = CrcDescriptor::new(CrcWidth::Bits8, 0x07, 0, 15, 0);
        let session = scan(&desc, |_| 0).unwrap();
        assert_eq!(session.finalize(), CrcVerdict::Fail);
        assert_eq!(desc.verdict(&session), CrcVerdict::Pass);
    }

    #[test]
    fn test_scan_rejects_inverted_range() {
        let desc = CrcDescriptor::new(CrcWidth::Bits8, 0x07, 10, 5, 0);
        assert_eq!(scan(&desc, |_| 0).unwrap_err(), Error::InvalidCrcRange);
    }

    #[test]
    fn test_nibble_to_ascii() {
        assert_eq!(nibble_to_ascii(0).unwrap(), b'0');
        assert_eq!(nibble_to_ascii(9).unwrap(), b'9');
        assert_eq!(nibble_to_ascii(10).unwrap(), b'A');
        assert_eq!(nibble_to_ascii(15).unwrap(), b'F');
        assert_eq!(nibble_to_ascii(16), Err(Error::InvalidNibble(16)));
    }

    #[test]
    fn test_ascii_digits_and_parse() {
        let digits = ascii_digits(&[0x89, 0xA1, 0x89, 0x7F]).unwrap();
        assert_eq!(digits.as_slice(), b"89A1897F");
        assert_eq!(parse_digits(&digits), Some(0x89A1_897F));
        assert_eq!(parse_digits(b"ZZ"), None);
    }

    #[test]
    fn test_wire_block() {
        let desc = CrcDescriptor::new(CrcWidth::Bits32, 0x04C1_1DB7, 0x10_0000, 0x1F_FFFF, 0x1F_FFFC);
        let wire = desc.to_wire();
        assert_eq!(wire[0], 32);
        assert_eq!(&wire[1..5], &[0x04, 0xC1, 0x1D, 0xB7]);
        assert_eq!(&wire[13..17], &[0x00, 0x1F, 0xFF, 0xFC]);
        assert_eq!(CrcDescriptor::from_wire(&wire).unwrap(), desc);

        let mut bad = wire;
        bad[0] = 12;
        assert_eq!(CrcDescriptor::from_wire(&bad), Err(Error::InvalidCrcWidth(12)));
    }

    #[test]
    fn test_parse_config() {
        let text = "CRC configuration\ngenerated\n---\n16\n1021\nrange\n100000\n0x17FFFF\n17FFFE\n";
        let desc = CrcDescriptor::parse_config(text).unwrap();
        assert_eq!(desc.width, CrcWidth::Bits16);
        assert_eq!(desc.polynomial, 0x1021);
        assert_eq!(desc.flash_start, 0x10_0000);
        assert_eq!(desc.flash_end, 0x17_FFFF);
        assert_eq!(desc.stored_crc_address, 0x17_FFFE);
        assert!(!desc.exclude_trailing);

        let forced = desc.with_stored_address(0);
        assert!(forced.exclude_trailing);
    }

    #[test]
    fn test_parse_config_errors() {
        assert_eq!(
            CrcDescriptor::parse_config("a\nb\nc\n12\n"),
            Err(Error::InvalidCrcWidth(12))
        );
        assert_eq!(
            CrcDescriptor::parse_config("a\nb\nc\n16\nxyz\n"),
            Err(Error::CrcConfig { line: 5 })
        );
        assert_eq!(
            CrcDescriptor::parse_config("a\nb\n"),
            Err(Error::CrcConfig { line: 3 })
        );
    }
}
