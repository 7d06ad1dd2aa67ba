//! Monitor command protocol definitions
//!
//! Every exchange starts with a single ASCII command byte from the host,
//! which the monitor echoes back unchanged. Most commands then finish with a
//! two byte status frame: `*` followed by a code on success, `$` followed by
//! the same code on failure.
//!
//! Multi-byte wire fields are big-endian.

use core::time::Duration;

/// Command bytes (lower case; the monitor accepts either case)
pub mod cmd {
    /// Link check, echo only
    pub const CONNECT: u8 = b'c';
    /// Identify the flash chip
    pub const IDENTIFY: u8 = b'f';
    /// Erase the flash chip
    pub const ERASE: u8 = b'e';
    /// Declare the total transfer length
    pub const TOTAL: u8 = b't';
    /// Transfer one block
    pub const BLOCK: u8 = b'b';
    /// Program the last block
    pub const PROGRAM: u8 = b'p';
    /// Run a CRC over flash
    pub const CRC: u8 = b'r';
    /// Arm a delayed reset
    pub const RESET: u8 = b's';
    /// Read back the CRC digits
    pub const GET_CRC: u8 = b'g';
    /// Finish the session
    pub const TERMINATE: u8 = b'z';
}

/// Lead byte of a success frame
pub const FRAME_OK: u8 = b'*';
/// Lead byte of a failure frame
pub const FRAME_FAIL: u8 = b'$';

/// Second frame byte for unrecognised commands
pub const CODE_UNKNOWN: u8 = b'U';

/// Length of the total-length header sent after `t`
pub const TOTAL_HEADER_LEN: usize = 4;
/// Length of the block header sent after `b`
pub const BLOCK_HEADER_LEN: usize = 6;

/// Host wait for a command echo
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(3);
/// Host wait for a command to complete (erase dominates)
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(20);
/// Monitor wait for each byte of a header or payload
pub const DATA_TIMEOUT: Duration = Duration::from_secs(3);

/// Decoded command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `c`
    Connect,
    /// `f`
    Identify,
    /// `e`
    Erase,
    /// `t`
    Total,
    /// `b`
    Block,
    /// `p`
    Program,
    /// `r`
    Crc,
    /// `s`
    Reset,
    /// `g`
    GetCrc,
    /// `z`
    Terminate,
    /// Anything else
    Unknown(u8),
}

impl Command {
    /// Decode a received command byte, ignoring case
    pub fn from_byte(byte: u8) -> Self {
        match byte.to_ascii_lowercase() {
            cmd::CONNECT => Self::Connect,
            cmd::IDENTIFY => Self::Identify,
            cmd::ERASE => Self::Erase,
            cmd::TOTAL => Self::Total,
            cmd::BLOCK => Self::Block,
            cmd::PROGRAM => Self::Program,
            cmd::CRC => Self::Crc,
            cmd::RESET => Self::Reset,
            cmd::GET_CRC => Self::GetCrc,
            cmd::TERMINATE => Self::Terminate,
            _ => Self::Unknown(byte),
        }
    }

    /// Byte the host sends for this command
    pub fn byte(self) -> u8 {
        match self {
            Self::Connect => cmd::CONNECT,
            Self::Identify => cmd::IDENTIFY,
            Self::Erase => cmd::ERASE,
            Self::Total => cmd::TOTAL,
            Self::Block => cmd::BLOCK,
            Self::Program => cmd::PROGRAM,
            Self::Crc => cmd::CRC,
            Self::Reset => cmd::RESET,
            Self::GetCrc => cmd::GET_CRC,
            Self::Terminate => cmd::TERMINATE,
            Self::Unknown(b) => b,
        }
    }

    /// Second byte of this command's status frame
    ///
    /// `Identify` answers with a family digit instead, and `Connect` and
    /// `GetCrc` send no frame at all.
    pub fn frame_code(self) -> u8 {
        match self {
            Self::Unknown(_) => CODE_UNKNOWN,
            other => other.byte().to_ascii_uppercase(),
        }
    }
}

/// Two byte status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// `*` for success, `$` for failure
    pub lead: u8,
    /// Command code or family digit
    pub code: u8,
}

impl Frame {
    /// Success frame
    pub const fn ok(code: u8) -> Self {
        Self {
            lead: FRAME_OK,
            code,
        }
    }

    /// Failure frame
    pub const fn fail(code: u8) -> Self {
        Self {
            lead: FRAME_FAIL,
            code,
        }
    }

    /// Whether this frame reports success
    pub fn is_ok(&self) -> bool {
        self.lead == FRAME_OK
    }

    /// Wire bytes
    pub fn to_bytes(self) -> [u8; 2] {
        [self.lead, self.code]
    }
}

/// Decode the 4-byte total-length header into the number of bytes still to
/// come (the header counts itself)
pub fn decode_total(raw: [u8; TOTAL_HEADER_LEN]) -> Option<u32> {
    u32::from_be_bytes(raw).checked_sub(TOTAL_HEADER_LEN as u32)
}

/// Encode the total-length header for `remaining` bytes of block traffic
pub fn encode_total(remaining: u32) -> [u8; TOTAL_HEADER_LEN] {
    remaining
        .wrapping_add(TOTAL_HEADER_LEN as u32)
        .to_be_bytes()
}

/// Address and length that precede each block payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Absolute target address
    pub address: u32,
    /// Payload length in bytes
    pub length: u16,
}

impl BlockHeader {
    /// Decode from the wire
    pub fn from_wire(raw: [u8; BLOCK_HEADER_LEN]) -> Self {
        Self {
            address: u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]),
            length: u16::from_be_bytes([raw[4], raw[5]]),
        }
    }

    /// Encode for the wire
    pub fn to_wire(self) -> [u8; BLOCK_HEADER_LEN] {
        let mut out = [0u8; BLOCK_HEADER_LEN];
        out[..4].copy_from_slice(&self.address.to_be_bytes());
        out[4..].copy_from_slice(&self.length.to_be_bytes());
        out
    }
}

/// Pad byte that completes an odd-length block
pub const PAD_BYTE: u8 = 0xFF;

/// Iterate over a block payload as `(byte offset, word)` pairs
///
/// The bus is little-endian: the first byte of each pair is the low half of
/// the word. An odd trailing byte is paired with [`PAD_BYTE`] in the high
/// half, so `[0x42]` becomes `0xFF42`.
pub fn block_words(payload: &[u8]) -> impl Iterator<Item = (u32, u16)> + '_ {
    payload.chunks(2).enumerate().map(|(i, pair)| {
        let lo = pair[0];
        let hi = pair.get(1).copied().unwrap_or(PAD_BYTE);
        ((i * 2) as u32, u16::from_le_bytes([lo, hi]))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_case_insensitive() {
        assert_eq!(Command::from_byte(b'c'), Command::Connect);
        assert_eq!(Command::from_byte(b'Z'), Command::Terminate);
        assert_eq!(Command::from_byte(b'G'), Command::GetCrc);
        assert_eq!(Command::from_byte(b'q'), Command::Unknown(b'q'));
    }

    #[test]
    fn test_frame_codes() {
        assert_eq!(Command::Erase.frame_code(), b'E');
        assert_eq!(Command::Terminate.frame_code(), b'Z');
        assert_eq!(Command::Unknown(b'x').frame_code(), b'U');
        assert_eq!(Frame::ok(b'B').to_bytes(), *b"*B");
        assert_eq!(Frame::fail(b'P').to_bytes(), *b"$P");
        assert!(!Frame::fail(b'P').is_ok());
    }

    #[test]
    fn test_total_header_counts_itself() {
        assert_eq!(encode_total(12), [0, 0, 0, 16]);
        assert_eq!(decode_total([0, 0, 0, 16]), Some(12));
        assert_eq!(decode_total([0, 0, 0, 3]), None);
    }

    #[test]
    fn test_block_header() {
        let raw = [0x00, 0x10, 0x20, 0x00, 0x01, 0x02];
        let header = BlockHeader::from_wire(raw);
        assert_eq!(header.address, 0x0010_2000);
        assert_eq!(header.length, 0x0102);
        assert_eq!(header.to_wire(), raw);
    }

    #[test]
    fn test_block_words_odd_length_pads_high_byte() {
        let words: heapless::Vec<(u32, u16), 4> = block_words(&[0x42]).collect();
        assert_eq!(words.as_slice(), &[(0, 0xFF42)]);

        let words: heapless::Vec<(u32, u16), 4> = block_words(&[0x34, 0x12, 0x78]).collect();
        assert_eq!(words.as_slice(), &[(0, 0x1234), (2, 0xFF78)]);
    }
}
