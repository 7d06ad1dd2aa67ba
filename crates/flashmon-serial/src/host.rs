//! Host side of a flash session
//!
//! [`Host`] drives the monitor through the fixed command sequence: connect,
//! identify, erase, declare the total, send and program every block,
//! optionally verify a CRC, then terminate or reset. Every command byte must
//! come back as an echo before anything else is sent, and every step that
//! ends in a status frame must end in `*` with the expected code. The first
//! failure ends the session; nothing is retried.

use std::time::{Duration, Instant};

use flashmon_core::chip::family::from_digit;
use flashmon_core::chip::ChipFamily;
use flashmon_core::crc::{parse_digits, CrcDescriptor, CrcWidth};
use flashmon_core::hexfile::{Block, BlockStream};
use flashmon_core::link::Link;
use flashmon_core::protocol::{
    cmd, encode_total, Command, Frame, COMMAND_TIMEOUT, ECHO_TIMEOUT, FRAME_FAIL, FRAME_OK,
};

use crate::error::{Result, SessionError, Step};

/// Session configuration
#[derive(Debug, Clone)]
pub struct HostOptions {
    /// Wait for each command echo
    pub echo_timeout: Duration,
    /// Wait for a status frame (bounds the erase)
    pub command_timeout: Duration,
    /// Finish with `s` instead of `z`
    pub reset: bool,
    /// Verify a CRC after programming
    pub crc: Option<CrcDescriptor>,
    /// CRC the operator expects over the range; forces the stored CRC
    /// address to 0 and compares the digits the monitor sends back
    pub expected_crc: Option<u32>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            echo_timeout: ECHO_TIMEOUT,
            command_timeout: COMMAND_TIMEOUT,
            reset: false,
            crc: None,
            expected_crc: None,
        }
    }
}

/// Observer for session progress
///
/// All methods default to doing nothing.
pub trait SessionProgress {
    /// A step is about to start
    fn step(&mut self, _step: Step) {}

    /// The monitor identified its flash
    fn chip_identified(&mut self, _family: &'static ChipFamily) {}

    /// Block transfer starts; `total` data bytes will be sent
    fn transfer_started(&mut self, _total: u64) {}

    /// `sent` data bytes have been programmed so far
    fn transfer_progress(&mut self, _sent: u64) {}

    /// All blocks are programmed
    fn transfer_finished(&mut self) {}

    /// CRC digits read back from the monitor
    fn crc_read(&mut self, _digits: &str) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl SessionProgress for NoProgress {}

/// Summary of a finished session
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Flash the monitor found
    pub family: &'static ChipFamily,
    /// Blocks programmed
    pub blocks: usize,
    /// Data bytes programmed
    pub bytes: usize,
    /// CRC digits read back, if a CRC was run
    pub crc: Option<String>,
    /// Whether the target was told to reset
    pub reset: bool,
}

/// Flash session initiator
pub struct Host<L: Link> {
    link: L,
    options: HostOptions,
}

impl<L: Link> Host<L> {
    /// Create a host on `link`
    pub fn new(link: L, options: HostOptions) -> Self {
        Self { link, options }
    }

    /// Session configuration
    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Give the link back
    pub fn into_inner(self) -> L {
        self.link
    }

    /// Send a command byte and wait for its echo
    fn command(&mut self, byte: u8, step: Step) -> Result<()> {
        log::trace!("host: sending '{}'", char::from(byte));
        self.link
            .transmit(byte)
            .and_then(|_| self.link.flush())
            .map_err(|e| SessionError::link(step, e))?;

        let echo = self
            .link
            .receive(self.options.echo_timeout)
            .map_err(|e| SessionError::link(step, e))?;
        if echo != byte {
            return Err(SessionError::EchoMismatch {
                step,
                sent: byte,
                received: echo,
            });
        }
        Ok(())
    }

    fn send(&mut self, data: &[u8], step: Step) -> Result<()> {
        self.link
            .transmit_all(data)
            .and_then(|_| self.link.flush())
            .map_err(|e| SessionError::link(step, e))
    }

    /// Wait for a status frame, skipping bytes until a lead byte
    fn wait_frame(&mut self, step: Step) -> Result<Frame> {
        let deadline = Instant::now() + self.options.command_timeout;

        let lead = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::TransportTimeout { step });
            }
            let byte = self
                .link
                .receive(remaining)
                .map_err(|e| SessionError::link(step, e))?;
            if byte == FRAME_OK || byte == FRAME_FAIL {
                break byte;
            }
            log::trace!("host: skipping 0x{:02X} while waiting for {}", byte, step);
        };

        let code = self
            .link
            .receive(self.options.echo_timeout)
            .map_err(|e| SessionError::link(step, e))?;
        Ok(Frame { lead, code })
    }

    /// Wait for `*` followed by `code`
    fn expect_ok(&mut self, step: Step, code: u8) -> Result<()> {
        let frame = self.wait_frame(step)?;
        if !frame.is_ok() {
            return Err(SessionError::CommandFailed {
                step,
                code: frame.code,
            });
        }
        if frame.code != code {
            return Err(SessionError::UnexpectedResponse {
                step,
                lead: frame.lead,
                code: frame.code,
            });
        }
        Ok(())
    }

    /// Check the link with `c`
    pub fn connect(&mut self) -> Result<()> {
        self.command(cmd::CONNECT, Step::Connect)?;
        log::info!("host: connected to monitor");
        Ok(())
    }

    /// Ask the monitor which flash it found
    pub fn identify(&mut self) -> Result<&'static ChipFamily> {
        self.command(cmd::IDENTIFY, Step::Identify)?;
        let frame = self.wait_frame(Step::Identify)?;
        if !frame.is_ok() {
            return Err(SessionError::CommandFailed {
                step: Step::Identify,
                code: frame.code,
            });
        }

        let family = from_digit(frame.code).ok_or(SessionError::UnknownChip { digit: frame.code })?;
        log::info!("host: found {} {}", family.vendor, family.name);
        Ok(family)
    }

    /// Erase the whole flash
    pub fn erase(&mut self) -> Result<()> {
        log::info!("host: erasing");
        self.command(cmd::ERASE, Step::Erase)?;
        self.expect_ok(Step::Erase, Command::Erase.frame_code())
    }

    /// Declare the number of block bytes that will follow
    ///
    /// `transfer_len` counts every block header and payload byte, not the
    /// total header itself.
    pub fn declare_total(&mut self, transfer_len: u32) -> Result<()> {
        self.command(cmd::TOTAL, Step::TotalEcho)?;
        self.send(&encode_total(transfer_len), Step::TotalAck)?;
        self.expect_ok(Step::TotalAck, Command::Total.frame_code())
    }

    /// Transfer one block
    pub fn send_block(&mut self, block: &Block, first: bool) -> Result<()> {
        let echo_step = if first {
            Step::BlockEcho
        } else {
            Step::NextBlockEcho
        };
        log::debug!(
            "host: block 0x{:08X}, {} bytes",
            block.address,
            block.data.len()
        );
        self.command(cmd::BLOCK, echo_step)?;
        self.send(&block.header().to_wire(), Step::BlockAck)?;
        self.send(&block.data, Step::BlockAck)?;
        self.expect_ok(Step::BlockAck, Command::Block.frame_code())
    }

    /// Program the block last transferred
    pub fn program(&mut self) -> Result<()> {
        self.command(cmd::PROGRAM, Step::ProgramEcho)?;
        self.expect_ok(Step::ProgramAck, Command::Program.frame_code())
    }

    /// Run a CRC over flash on the monitor
    pub fn verify_crc(&mut self, desc: &CrcDescriptor) -> Result<()> {
        log::info!(
            "host: CRC-{} over 0x{:06X}..=0x{:06X}",
            desc.width.bits(),
            desc.flash_start,
            desc.flash_end
        );
        self.command(cmd::CRC, Step::CrcEcho)?;
        self.send(&desc.to_wire(), Step::CrcAck)?;
        self.expect_ok(Step::CrcAck, Command::Crc.frame_code())
    }

    /// Read back the digits of the last CRC run
    pub fn read_crc(&mut self, width: CrcWidth) -> Result<String> {
        self.command(cmd::GET_CRC, Step::GetCrc)?;
        let mut digits = String::with_capacity(width.digits());
        for _ in 0..width.digits() {
            let byte = self
                .link
                .receive(self.options.echo_timeout)
                .map_err(|e| SessionError::link(Step::GetCrc, e))?;
            digits.push(char::from(byte));
        }
        log::info!("host: CRC {}", digits);
        Ok(digits)
    }

    /// Finish the session with `z`
    pub fn terminate(&mut self) -> Result<()> {
        self.command(cmd::TERMINATE, Step::TerminateEcho)?;
        self.expect_ok(Step::TerminateAck, Command::Terminate.frame_code())
    }

    /// Finish the session by resetting the target
    pub fn reset(&mut self) -> Result<()> {
        self.command(cmd::RESET, Step::ResetEcho)?;
        self.expect_ok(Step::ResetAck, Command::Reset.frame_code())
    }

    fn check_crc(&mut self, desc: CrcDescriptor, progress: &mut dyn SessionProgress) -> Result<String> {
        let expected = self.options.expected_crc;
        let desc = if expected.is_some() {
            desc.with_stored_address(0)
        } else {
            desc
        };

        progress.step(Step::CrcAck);
        self.verify_crc(&desc)?;
        progress.step(Step::GetCrc);
        let digits = self.read_crc(desc.width)?;
        progress.crc_read(&digits);

        if let Some(expected) = expected {
            let expected = expected & desc.width.mask();
            if parse_digits(digits.as_bytes()) != Some(expected) {
                return Err(SessionError::VerificationFailed {
                    expected: format!("{:0width$X}", expected, width = desc.width.digits()),
                    reported: digits,
                });
            }
        }
        Ok(digits)
    }

    /// Run a complete session for `stream`
    pub fn run(
        &mut self,
        stream: &BlockStream,
        progress: &mut dyn SessionProgress,
    ) -> Result<SessionReport> {
        progress.step(Step::Connect);
        self.connect()?;

        progress.step(Step::Identify);
        let family = self.identify()?;
        progress.chip_identified(family);

        progress.step(Step::Erase);
        self.erase()?;

        progress.step(Step::TotalAck);
        self.declare_total(stream.transfer_len())?;

        let total = stream.data_len() as u64;
        progress.transfer_started(total);
        let mut sent = 0u64;
        for (i, block) in stream.blocks.iter().enumerate() {
            progress.step(Step::BlockAck);
            self.send_block(block, i == 0)?;
            progress.step(Step::ProgramAck);
            self.program()?;
            sent += block.data.len() as u64;
            progress.transfer_progress(sent);
        }
        progress.transfer_finished();
        log::info!(
            "host: programmed {} bytes in {} blocks",
            sent,
            stream.blocks.len()
        );

        let crc = match self.options.crc {
            Some(desc) => Some(self.check_crc(desc, progress)?),
            None => None,
        };

        if self.options.reset {
            progress.step(Step::ResetAck);
            self.reset()?;
        } else {
            progress.step(Step::TerminateAck);
            self.terminate()?;
        }

        Ok(SessionReport {
            family,
            blocks: stream.blocks.len(),
            bytes: stream.data_len(),
            crc,
            reset: self.options.reset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashmon_core::link::LinkError;
    use std::collections::VecDeque;

    /// Replays canned target output and records what the host sent
    struct Script {
        input: VecDeque<u8>,
        sent: Vec<u8>,
    }

    impl Script {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.iter().copied().collect(),
                sent: Vec::new(),
            }
        }
    }

    impl Link for Script {
        fn transmit(&mut self, byte: u8) -> std::result::Result<(), LinkError> {
            self.sent.push(byte);
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> std::result::Result<u8, LinkError> {
            self.input.pop_front().ok_or(LinkError::Timeout)
        }
    }

    fn host(input: &[u8]) -> Host<Script> {
        Host::new(Script::new(input), HostOptions::default())
    }

    #[test]
    fn test_connect_echo() {
        let mut h = host(b"c");
        h.connect().unwrap();
        assert_eq!(h.into_inner().sent, b"c");
    }

    #[test]
    fn test_echo_mismatch_is_fatal() {
        let mut h = host(b"x");
        let err = h.connect().unwrap_err();
        assert!(matches!(
            err,
            SessionError::EchoMismatch {
                step: Step::Connect,
                sent: b'c',
                received: b'x'
            }
        ));
        assert_eq!(err.code(), 3);
    }

    #[test]
    fn test_echo_mismatch_sends_nothing_more() {
        let stream = flashmon_core::hexfile::parse(":0100000011EE\n:00000001FF\n").unwrap();
        let mut h = host(b"C");
        assert!(h.run(&stream, &mut NoProgress).is_err());
        assert_eq!(h.into_inner().sent, b"c");
    }

    #[test]
    fn test_echo_timeout() {
        let mut h = host(b"");
        assert!(matches!(
            h.erase(),
            Err(SessionError::TransportTimeout { step: Step::Erase })
        ));
    }

    #[test]
    fn test_frame_wait_skips_noise() {
        let mut h = host(b"e\x00\xFFE*E");
        h.erase().unwrap();
    }

    #[test]
    fn test_failure_frame() {
        let mut h = host(b"p$P");
        let err = h.program().unwrap_err();
        assert!(matches!(
            err,
            SessionError::CommandFailed {
                step: Step::ProgramAck,
                code: b'P'
            }
        ));
        assert_eq!(err.to_string(), "error 212: target reported failure at '*P' ('$P')");
    }

    #[test]
    fn test_unexpected_success_code() {
        let mut h = host(b"z*U");
        assert!(matches!(
            h.terminate(),
            Err(SessionError::UnexpectedResponse {
                step: Step::TerminateAck,
                lead: b'*',
                code: b'U'
            })
        ));
    }

    #[test]
    fn test_identify() {
        let mut h = host(b"f*7");
        let family = h.identify().unwrap();
        assert_eq!(family.digit, b'7');

        let mut h = host(b"f*0");
        let err = h.identify().unwrap_err();
        assert!(matches!(err, SessionError::UnknownChip { digit: b'0' }));
        assert_eq!(err.code(), 4);
    }

    #[test]
    fn test_total_and_block_wire_bytes() {
        let block = Block {
            address: 0x0010_0000,
            data: vec![1, 2, 3],
            record_lens: vec![3],
        };
        let mut h = host(b"t*Tb*B");
        h.declare_total(9).unwrap();
        h.send_block(&block, true).unwrap();
        assert_eq!(
            h.into_inner().sent,
            [
                b't', 0, 0, 0, 13, // total counts itself
                b'b', 0x00, 0x10, 0x00, 0x00, 0x00, 0x03, 1, 2, 3,
            ]
        );
    }

    #[test]
    fn test_second_block_echo_step() {
        let block = Block {
            address: 0,
            data: vec![0],
            record_lens: vec![1],
        };
        let mut h = host(b"q");
        assert!(matches!(
            h.send_block(&block, false),
            Err(SessionError::EchoMismatch {
                step: Step::NextBlockEcho,
                ..
            })
        ));
    }

    #[test]
    fn test_read_crc_digits() {
        let mut h = host(b"g1D0F");
        assert_eq!(h.read_crc(CrcWidth::Bits16).unwrap(), "1D0F");

        let mut h = host(b"g1D");
        assert!(matches!(
            h.read_crc(CrcWidth::Bits16),
            Err(SessionError::TransportTimeout { step: Step::GetCrc })
        ));
    }

    #[test]
    fn test_expected_crc_forces_informational_scan() {
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_00FF, 0x10_00FE);
        let options = HostOptions {
            crc: Some(desc),
            expected_crc: Some(0xBEEF),
            ..Default::default()
        };
        let mut h = Host::new(Script::new(b"r*Rgbeef"), options);
        let digits = h.check_crc(desc, &mut NoProgress).unwrap();
        assert_eq!(digits, "beef");

        let sent = h.into_inner().sent;
        assert_eq!(sent[0], b'r');
        assert_eq!(&sent[14..18], &[0, 0, 0, 0]);
        assert_eq!(sent[18], b'g');
    }

    #[test]
    fn test_expected_crc_mismatch() {
        let desc = CrcDescriptor::new(CrcWidth::Bits8, 0x07, 0, 0xFF, 0);
        let options = HostOptions {
            crc: Some(desc),
            expected_crc: Some(0x5A),
            ..Default::default()
        };
        let mut h = Host::new(Script::new(b"r*Rg5B"), options);
        let err = h.check_crc(desc, &mut NoProgress).unwrap_err();
        assert_eq!(err.code(), 16);
        assert!(matches!(
            err,
            SessionError::VerificationFailed { ref expected, ref reported }
                if expected == "5A" && reported == "5B"
        ));
    }

    #[test]
    fn test_expected_crc_rejects_non_hex_readback() {
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0, 0xFF, 0);
        let options = HostOptions {
            crc: Some(desc),
            expected_crc: Some(0x00AB),
            ..Default::default()
        };
        // "0xAB" would pass a lax prefix parse
        let mut h = Host::new(Script::new(b"r*Rg0xAB"), options);
        let err = h.check_crc(desc, &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            SessionError::VerificationFailed { ref expected, ref reported }
                if expected == "00AB" && reported == "0xAB"
        ));
    }
}
