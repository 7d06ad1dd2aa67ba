//! Intel-HEX to block-stream codec
//!
//! An application image arrives as Intel-HEX text. Before anything is sent
//! to the monitor it is normalized into a [`BlockStream`]: a list of blocks,
//! each with a 32-bit absolute address and up to 64 KiB of contiguous data.
//! The stream can be rendered three ways:
//!
//! - the binary wire form sent after `t`/`b` ([`BlockStream::to_wire`])
//! - the intermediate ASCII block file ([`BlockStream::to_text`]), which
//!   [`decode_text`] reads back
//! - a flat byte image with no framing ([`parse_flat`]), used for the
//!   boot-strap loader stages
//!
//! Only data, end-of-file and extended linear address records are
//! understood. Segment addressing and start address records abort the
//! parse.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use crate::error::HexError;
use crate::protocol::{encode_total, BlockHeader, BLOCK_HEADER_LEN, TOTAL_HEADER_LEN};

/// Most data bytes a single record may carry
pub const MAX_RECORD_DATA: usize = 40;

/// Intel-HEX record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// 00
    Data,
    /// 01
    EndOfFile,
    /// 04
    ExtendedLinearAddress,
    /// 02, 03, 05 or anything undefined
    Unsupported(u8),
}

impl RecordKind {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x04 => Self::ExtendedLinearAddress,
            other => Self::Unsupported(other),
        }
    }
}

/// One parsed record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Record type
    pub kind: RecordKind,
    /// 16-bit load offset
    pub offset: u16,
    /// Payload bytes
    pub data: heapless::Vec<u8, MAX_RECORD_DATA>,
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

fn hex_byte(pair: &[u8], line: usize) -> Result<u8, HexError> {
    match (hex_value(pair[0]), hex_value(pair[1])) {
        (Some(hi), Some(lo)) => Ok((hi << 4) | lo),
        _ => Err(HexError::InvalidDigit { line }),
    }
}

impl HexRecord {
    /// Parse one `:`-prefixed record; `line` is used for error reporting
    pub fn parse(text: &str, line: usize) -> Result<Self, HexError> {
        let digits = text
            .trim_end()
            .strip_prefix(':')
            .ok_or(HexError::MissingStartCode { line })?
            .as_bytes();

        if digits.len() < 10 {
            return Err(HexError::Truncated { line });
        }
        let count = hex_byte(&digits[0..2], line)? as usize;
        if count > MAX_RECORD_DATA {
            return Err(HexError::RecordTooLong { line, len: count });
        }
        if digits.len() != (count + 5) * 2 {
            return Err(HexError::Truncated { line });
        }

        let mut bytes = [0u8; MAX_RECORD_DATA + 5];
        for (i, pair) in digits.chunks(2).enumerate() {
            bytes[i] = hex_byte(pair, line)?;
        }
        let bytes = &bytes[..count + 5];

        let (body, checksum) = bytes.split_at(count + 4);
        let sum = body.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let expected = sum.wrapping_neg();
        if expected != checksum[0] {
            return Err(HexError::ChecksumMismatch {
                line,
                expected,
                found: checksum[0],
            });
        }

        let offset = u16::from_be_bytes([body[1], body[2]]);
        let kind = RecordKind::from_byte(body[3]);
        if kind == RecordKind::ExtendedLinearAddress && (count != 2 || offset != 0) {
            return Err(HexError::BadExtendedAddress { line });
        }

        let mut data = heapless::Vec::new();
        data.extend_from_slice(&body[4..])
            .map_err(|_| HexError::RecordTooLong { line, len: count })?;

        Ok(Self { kind, offset, data })
    }

    /// Upper address half carried by an extended linear address record
    pub fn segment(&self) -> Option<u16> {
        match self.kind {
            RecordKind::ExtendedLinearAddress => {
                Some(u16::from_be_bytes([self.data[0], self.data[1]]))
            }
            _ => None,
        }
    }
}

/// Contiguous run of data destined for one address range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Absolute start address
    pub address: u32,
    /// Block contents
    pub data: Vec<u8>,
    /// Byte count of each source record, for the text rendering
    pub record_lens: Vec<u8>,
}

impl Block {
    fn new(address: u32) -> Self {
        Self {
            address,
            data: Vec::new(),
            record_lens: Vec::new(),
        }
    }

    /// Block length in bytes
    pub fn len(&self) -> u16 {
        self.data.len() as u16
    }

    /// Whether the block holds no data
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Wire header for this block
    pub fn header(&self) -> BlockHeader {
        BlockHeader {
            address: self.address,
            length: self.len(),
        }
    }

    /// Address just past the last byte
    fn end(&self) -> u32 {
        self.address.wrapping_add(self.data.len() as u32)
    }

    fn push_record(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
        self.record_lens.push(data.len() as u8);
    }
}

/// Normalized image: an ordered list of blocks
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStream {
    /// Blocks in source order
    pub blocks: Vec<Block>,
}

impl BlockStream {
    /// Payload bytes across all blocks
    pub fn data_len(&self) -> usize {
        self.blocks.iter().map(|b| b.data.len()).sum()
    }

    /// Block traffic following the total header: headers plus payloads
    pub fn transfer_len(&self) -> u32 {
        self.blocks
            .iter()
            .map(|b| (BLOCK_HEADER_LEN + b.data.len()) as u32)
            .sum()
    }

    /// Value of the total header, which counts its own four bytes
    pub fn total_len(&self) -> u32 {
        self.transfer_len() + TOTAL_HEADER_LEN as u32
    }

    /// Binary wire image: total header, then header and payload per block
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_len() as usize);
        out.extend_from_slice(&encode_total(self.transfer_len()));
        for block in &self.blocks {
            out.extend_from_slice(&block.header().to_wire());
            out.extend_from_slice(&block.data);
        }
        out
    }

    /// Intermediate ASCII block file
    ///
    /// With `header` the file starts with the 8-digit total and every block
    /// with its `SSSSOOOOLLLL` line; data follows one line per source
    /// record. Without it only the data digits are written.
    pub fn to_text(&self, header: bool) -> String {
        let mut out = String::new();

        if !header {
            for block in &self.blocks {
                push_hex(&mut out, &block.data);
            }
            return out;
        }

        let _ = write!(out, "{:08X}", self.total_len());
        for block in &self.blocks {
            let _ = write!(
                out,
                "\n{:04X}{:04X}{:04X}",
                block.address >> 16,
                block.address & 0xFFFF,
                block.len()
            );
            let mut at = 0;
            for &len in &block.record_lens {
                out.push('\n');
                push_hex(&mut out, &block.data[at..at + len as usize]);
                at += len as usize;
            }
        }
        out.push('\n');
        out
    }
}

fn push_hex(out: &mut String, data: &[u8]) {
    for byte in data {
        let _ = write!(out, "{:02X}", byte);
    }
}

/// Parse Intel-HEX text into a block stream
///
/// A new block opens on the first data record after an extended linear
/// address record, whenever data is not contiguous with the open block,
/// and when the open block would outgrow its 16-bit length field.
/// Back-to-back address records never produce an empty block.
pub fn parse(text: &str) -> Result<BlockStream, HexError> {
    let mut stream = BlockStream::default();
    let mut segment: u16 = 0;
    let mut open = false;

    for (idx, line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = HexRecord::parse(line.trim(), line_no)?;

        match record.kind {
            RecordKind::Data => {
                if record.data.is_empty() {
                    continue;
                }
                let address = ((segment as u32) << 16) | record.offset as u32;
                let extends = open
                    && stream.blocks.last().is_some_and(|b| {
                        b.end() == address && b.data.len() + record.data.len() <= u16::MAX as usize
                    });
                if !extends {
                    log::trace!("hex: line {} opens block at 0x{:08X}", line_no, address);
                    stream.blocks.push(Block::new(address));
                }
                if let Some(block) = stream.blocks.last_mut() {
                    block.push_record(&record.data);
                }
                open = true;
            }
            RecordKind::ExtendedLinearAddress => {
                let next = record.segment().unwrap_or(segment);
                if !open && next == segment {
                    log::debug!("hex: line {} repeats segment {:04X}", line_no, next);
                }
                segment = next;
                open = false;
            }
            RecordKind::EndOfFile => {
                log::debug!(
                    "hex: {} blocks, {} data bytes",
                    stream.blocks.len(),
                    stream.data_len()
                );
                return Ok(stream);
            }
            RecordKind::Unsupported(kind) => {
                return Err(HexError::UnsupportedRecord {
                    line: line_no,
                    kind,
                });
            }
        }
    }

    Err(HexError::MissingEndOfFile)
}

/// Parse Intel-HEX text into a flat byte image, ignoring addresses
pub fn parse_flat(text: &str) -> Result<Vec<u8>, HexError> {
    let stream = parse(text)?;
    let mut out = Vec::with_capacity(stream.data_len());
    for block in &stream.blocks {
        out.extend_from_slice(&block.data);
    }
    Ok(out)
}

fn decode_hex_line(line: &str, line_no: usize) -> Result<Vec<u8>, HexError> {
    let digits = line.as_bytes();
    if digits.len() % 2 != 0 {
        return Err(HexError::BadBlockText { line: line_no });
    }
    digits
        .chunks(2)
        .map(|pair| hex_byte(pair, line_no).map_err(|_| HexError::BadBlockText { line: line_no }))
        .collect()
}

/// Read back an intermediate block file written with a header
pub fn decode_text(text: &str) -> Result<BlockStream, HexError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (first_no, first) = lines.next().ok_or(HexError::BadBlockText { line: 1 })?;
    let total = decode_hex_line(first, first_no)?;
    if total.len() != TOTAL_HEADER_LEN {
        return Err(HexError::BadBlockText { line: first_no });
    }
    let total = u32::from_be_bytes([total[0], total[1], total[2], total[3]]);

    let mut stream = BlockStream::default();
    let mut remaining = 0usize;
    let mut last_line = first_no;

    for (line_no, line) in lines {
        last_line = line_no;
        let bytes = decode_hex_line(line, line_no)?;
        if remaining == 0 {
            if bytes.len() != BLOCK_HEADER_LEN {
                return Err(HexError::BadBlockText { line: line_no });
            }
            let mut raw = [0u8; BLOCK_HEADER_LEN];
            raw.copy_from_slice(&bytes);
            let header = BlockHeader::from_wire(raw);
            if header.length == 0 {
                return Err(HexError::BadBlockText { line: line_no });
            }
            stream.blocks.push(Block::new(header.address));
            remaining = header.length as usize;
        } else {
            if bytes.len() > remaining || bytes.len() > u8::MAX as usize {
                return Err(HexError::BadBlockText { line: line_no });
            }
            remaining -= bytes.len();
            if let Some(block) = stream.blocks.last_mut() {
                block.push_record(&bytes);
            }
        }
    }

    if remaining != 0 || stream.total_len() != total {
        return Err(HexError::BadBlockText { line: last_line });
    }
    Ok(stream)
}
