//! Error types for flashmon-core
//!
//! This module provides a no_std compatible error type that can be used
//! throughout the crate.

use core::fmt;

/// Details about a malformed Intel-HEX input
///
/// Line numbers are 1-based and refer to the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexError {
    /// Record does not begin with ':'
    MissingStartCode {
        /// Offending line
        line: usize,
    },
    /// A character that is not a hex digit where one was expected
    InvalidDigit {
        /// Offending line
        line: usize,
    },
    /// Record is shorter than its byte count says
    Truncated {
        /// Offending line
        line: usize,
    },
    /// Record checksum does not match its contents
    ChecksumMismatch {
        /// Offending line
        line: usize,
        /// Checksum computed from the record
        expected: u8,
        /// Checksum found in the record
        found: u8,
    },
    /// Data record carries more bytes than a record may hold
    RecordTooLong {
        /// Offending line
        line: usize,
        /// Byte count found in the record
        len: usize,
    },
    /// Extended linear address record with a bad count or offset
    BadExtendedAddress {
        /// Offending line
        line: usize,
    },
    /// Record type that cannot be expressed as a block stream (ESA/SSA/SLA)
    UnsupportedRecord {
        /// Offending line
        line: usize,
        /// Record type byte
        kind: u8,
    },
    /// Input ended without an end-of-file record
    MissingEndOfFile,
    /// Block-stream text file is malformed
    BadBlockText {
        /// Offending line
        line: usize,
    },
}

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // CRC errors
    /// CRC width is not 8, 16 or 32
    InvalidCrcWidth(u8),
    /// Value passed for ASCII conversion is not a nibble
    InvalidNibble(u8),
    /// CRC configuration file is malformed
    CrcConfig {
        /// Line that could not be parsed (1-based)
        line: usize,
    },
    /// CRC range is empty or inverted
    InvalidCrcRange,

    // Hex codec errors
    /// Intel-HEX parse failure
    Hex(HexError),

    // Chip errors
    /// Flash chip did not answer any known identification sequence
    ChipNotFound,
    /// Status register reported an error during program or erase
    ChipFault {
        /// Address of the failing operation
        addr: u32,
    },
    /// Sector index beyond the chip's sector map
    InvalidSector(usize),
    /// The bus cannot perform a system reset
    ResetNotSupported,
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStartCode { line } => {
                write!(f, "line {}: record does not start with ':'", line)
            }
            Self::InvalidDigit { line } => write!(f, "line {}: invalid hex digit", line),
            Self::Truncated { line } => write!(f, "line {}: record is truncated", line),
            Self::ChecksumMismatch {
                line,
                expected,
                found,
            } => write!(
                f,
                "line {}: checksum mismatch: expected 0x{:02X}, found 0x{:02X}",
                line, expected, found
            ),
            Self::RecordTooLong { line, len } => {
                write!(f, "line {}: record holds {} bytes (max 40)", line, len)
            }
            Self::BadExtendedAddress { line } => {
                write!(f, "line {}: malformed extended linear address record", line)
            }
            Self::UnsupportedRecord { line, kind } => {
                write!(f, "line {}: unsupported record type {:02X}", line, kind)
            }
            Self::MissingEndOfFile => write!(f, "missing end-of-file record"),
            Self::BadBlockText { line } => write!(f, "line {}: malformed block stream", line),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCrcWidth(w) => write!(f, "invalid CRC width {}", w),
            Self::InvalidNibble(v) => write!(f, "value 0x{:02X} is not a nibble", v),
            Self::CrcConfig { line } => write!(f, "CRC configuration line {} is invalid", line),
            Self::InvalidCrcRange => write!(f, "CRC range is empty"),
            Self::Hex(e) => write!(f, "hex format error: {}", e),
            Self::ChipNotFound => write!(f, "flash chip not found"),
            Self::ChipFault { addr } => write!(f, "flash chip fault at address 0x{:08X}", addr),
            Self::InvalidSector(i) => write!(f, "sector {} does not exist", i),
            Self::ResetNotSupported => write!(f, "system reset not supported"),
        }
    }
}

impl From<HexError> for Error {
    fn from(e: HexError) -> Self {
        Error::Hex(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for HexError {}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
