//! Target side of the protocol
//!
//! [`Monitor`] is the resident responder: it owns the link to the host and
//! the flash bus, waits for command bytes, echoes each one and answers with
//! a status frame once the command has run. All state between commands
//! lives in a [`Session`].

use alloc::vec::Vec;
use core::time::Duration;

use crate::chip::{self, ChipDriver, CommandAddresses, FlashBus, FlashDriver, UNKNOWN_DIGIT};
use crate::crc::{self, CrcDescriptor, CrcDigits, CrcSession, CrcVerdict, CRC_PARAMS_LEN};
use crate::link::{Link, LinkError};
use crate::protocol::{
    decode_total, BlockHeader, Command, Frame, BLOCK_HEADER_LEN, DATA_TIMEOUT, TOTAL_HEADER_LEN,
};

/// How long the monitor waits for a command before polling again
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay between acknowledging `s` and resetting, so `*S` gets out
pub const RESET_DELAY_US: u32 = 100_000;

/// Block received with `b`, waiting for `p`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBlock {
    /// Header as received
    pub header: BlockHeader,
    /// Payload bytes
    pub payload: Vec<u8>,
}

/// Per-session monitor state
#[derive(Debug, Clone, Default)]
pub struct Session {
    /// Driver for the chip found by `f`
    pub chip: Option<FlashDriver>,
    /// Block bytes still expected, once `t` has declared them
    pub total_bytes: Option<u32>,
    /// More block bytes arrived than were declared
    pub overrun: bool,
    /// Last block received
    pub block: Option<PendingBlock>,
    /// `s` was acknowledged
    pub reset_requested: bool,
    /// Parameters and result of the last `r`
    pub crc: Option<(CrcDescriptor, CrcSession)>,
}

impl Session {
    /// Whether `z` would report success
    pub fn is_complete(&self) -> bool {
        self.total_bytes == Some(0) && !self.overrun
    }

    fn consume(&mut self, count: u32) {
        match self.total_bytes {
            Some(remaining) if remaining >= count => {
                self.total_bytes = Some(remaining - count);
            }
            _ => {
                if !self.overrun {
                    log::warn!("monitor: more block data than the declared total");
                }
                self.overrun = true;
                self.total_bytes = self.total_bytes.map(|_| 0);
            }
        }
    }
}

/// What the command loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Wait for the next command
    Continue,
    /// The board is resetting; stop serving
    Reset,
}

/// Resident flash monitor
pub struct Monitor<L: Link, B: FlashBus> {
    link: L,
    bus: B,
    addrs: CommandAddresses,
    session: Session,
}

impl<L: Link, B: FlashBus> Monitor<L, B> {
    /// Create a monitor with the default command addresses
    pub fn new(link: L, bus: B) -> Self {
        Self::with_addresses(link, bus, CommandAddresses::default())
    }

    /// Create a monitor for a board with different flash wiring
    pub fn with_addresses(link: L, bus: B, addrs: CommandAddresses) -> Self {
        Self {
            link,
            bus,
            addrs,
            session: Session::default(),
        }
    }

    /// Current session state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Give back the link and the bus
    pub fn into_parts(self) -> (L, B) {
        (self.link, self.bus)
    }

    /// Answer commands until the link closes or the board resets
    pub fn serve(&mut self) -> Result<Flow, LinkError> {
        log::info!("monitor: waiting for commands");
        loop {
            let byte = match self.link.receive(IDLE_TIMEOUT) {
                Ok(byte) => byte,
                Err(LinkError::Timeout) => continue,
                Err(LinkError::Closed) => {
                    log::info!("monitor: link closed");
                    return Ok(Flow::Continue);
                }
                Err(e) => return Err(e),
            };
            if self.handle(byte)? == Flow::Reset {
                return Ok(Flow::Reset);
            }
        }
    }

    /// Echo and execute one command byte
    pub fn handle(&mut self, byte: u8) -> Result<Flow, LinkError> {
        self.link.transmit(byte)?;
        let command = Command::from_byte(byte);
        log::debug!("monitor: command {:?}", command);

        let frame = match command {
            Command::Connect => None,
            Command::Identify => Some(self.identify()),
            Command::Erase => Some(self.erase()),
            Command::Total => Some(self.total()?),
            Command::Block => Some(self.block()?),
            Command::Program => Some(self.program()),
            Command::Crc => Some(self.crc()?),
            Command::Reset => return self.reset(),
            Command::GetCrc => {
                self.send_crc()?;
                None
            }
            Command::Terminate => Some(self.terminate()),
            Command::Unknown(b) => {
                log::debug!("monitor: unknown command 0x{:02X}", b);
                Some(Frame::ok(command.frame_code()))
            }
        };

        if let Some(frame) = frame {
            self.link.transmit_all(&frame.to_bytes())?;
        }
        self.link.flush()?;
        Ok(Flow::Continue)
    }

    /// Fill `buf` from the link; `Ok(false)` when the host stopped sending
    fn read_data(&mut self, buf: &mut [u8]) -> Result<bool, LinkError> {
        match self.link.receive_exact(buf, DATA_TIMEOUT) {
            Ok(()) => Ok(true),
            Err(LinkError::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn identify(&mut self) -> Frame {
        let (id, family) = chip::identify(&mut self.bus, &self.addrs);
        match family {
            Some(family) => {
                log::info!("monitor: {} {} ({})", family.vendor, family.name, id);
                self.session.chip = Some(FlashDriver::new(family, self.addrs));
                Frame::ok(family.digit)
            }
            None => {
                log::warn!("monitor: unknown flash {}", id);
                self.session.chip = None;
                Frame::ok(UNKNOWN_DIGIT)
            }
        }
    }

    fn erase(&mut self) -> Frame {
        let code = Command::Erase.frame_code();
        let Some(chip) = self.session.chip.as_mut() else {
            log::warn!("monitor: erase before identify");
            return Frame::fail(code);
        };
        match chip.erase_chip(&mut self.bus) {
            Ok(()) => Frame::ok(code),
            Err(e) => {
                log::error!("monitor: erase failed: {}", e);
                Frame::fail(code)
            }
        }
    }

    fn total(&mut self) -> Result<Frame, LinkError> {
        let code = Command::Total.frame_code();
        let mut raw = [0u8; TOTAL_HEADER_LEN];
        if !self.read_data(&mut raw)? {
            log::warn!("monitor: short total header");
            return Ok(Frame::fail(code));
        }
        if self.session.total_bytes.is_some() {
            log::warn!("monitor: total already declared");
            return Ok(Frame::fail(code));
        }
        match decode_total(raw) {
            Some(remaining) => {
                log::debug!("monitor: expecting {} block bytes", remaining);
                self.session.total_bytes = Some(remaining);
                Ok(Frame::ok(code))
            }
            None => Ok(Frame::fail(code)),
        }
    }

    fn block(&mut self) -> Result<Frame, LinkError> {
        let code = Command::Block.frame_code();
        self.session.block = None;

        let mut raw = [0u8; BLOCK_HEADER_LEN];
        if !self.read_data(&mut raw)? {
            log::warn!("monitor: truncated block header");
            return Ok(Frame::fail(code));
        }
        self.session.consume(BLOCK_HEADER_LEN as u32);
        let header = BlockHeader::from_wire(raw);

        let mut payload = Vec::with_capacity(header.length as usize);
        for _ in 0..header.length {
            match self.link.receive(DATA_TIMEOUT) {
                Ok(byte) => {
                    payload.push(byte);
                    self.session.consume(1);
                }
                Err(LinkError::Timeout) => {
                    log::warn!(
                        "monitor: block at 0x{:08X} truncated after {} of {} bytes",
                        header.address,
                        payload.len(),
                        header.length
                    );
                    return Ok(Frame::fail(code));
                }
                Err(e) => return Err(e),
            }
        }

        log::trace!(
            "monitor: block 0x{:08X} len {}",
            header.address,
            header.length
        );
        self.session.block = Some(PendingBlock { header, payload });
        Ok(Frame::ok(code))
    }

    fn program(&mut self) -> Frame {
        let code = Command::Program.frame_code();
        let Some(block) = self.session.block.take() else {
            log::warn!("monitor: program without a block");
            return Frame::fail(code);
        };
        let Some(chip) = self.session.chip.as_mut() else {
            log::warn!("monitor: program before identify");
            return Frame::fail(code);
        };
        match chip.program_block(&mut self.bus, block.header.address, &block.payload) {
            Ok(()) => Frame::ok(code),
            Err(e) => {
                log::error!("monitor: {}", e);
                Frame::fail(code)
            }
        }
    }

    fn crc(&mut self) -> Result<Frame, LinkError> {
        let code = Command::Crc.frame_code();
        let mut raw = [0u8; CRC_PARAMS_LEN];
        if !self.read_data(&mut raw)? {
            log::warn!("monitor: short CRC parameter block");
            return Ok(Frame::fail(code));
        }

        let desc = match CrcDescriptor::from_wire(&raw) {
            Ok(desc) => desc,
            Err(e) => {
                log::warn!("monitor: {}", e);
                return Ok(Frame::fail(code));
            }
        };
        let bus = &mut self.bus;
        let session = match crc::scan(&desc, |addr| bus.read_byte(addr)) {
            Ok(session) => session,
            Err(e) => {
                log::warn!("monitor: {}", e);
                return Ok(Frame::fail(code));
            }
        };

        let verdict = desc.verdict(&session);
        self.session.crc = Some((desc, session));
        Ok(match verdict {
            CrcVerdict::Pass => Frame::ok(code),
            CrcVerdict::Fail => {
                log::warn!("monitor: CRC check failed");
                Frame::fail(code)
            }
        })
    }

    fn crc_digits(&mut self) -> Option<CrcDigits> {
        let (desc, session) = self.session.crc.as_ref()?;
        let digits = if desc.stored_crc_address != 0 {
            let mut stored = [0u8; 4];
            let len = desc.width.bytes();
            for (i, slot) in stored[..len].iter_mut().enumerate() {
                *slot = self.bus.read_byte(desc.stored_crc_address + i as u32);
            }
            crc::ascii_digits(&stored[..len])
        } else {
            session.digits()
        };
        digits.ok()
    }

    fn send_crc(&mut self) -> Result<(), LinkError> {
        match self.crc_digits() {
            Some(digits) => self.link.transmit_all(&digits),
            None => {
                log::warn!("monitor: CRC readback before any CRC run");
                Ok(())
            }
        }
    }

    fn reset(&mut self) -> Result<Flow, LinkError> {
        let code = Command::Reset.frame_code();
        if !self.bus.can_reset() {
            self.link.transmit_all(&Frame::fail(code).to_bytes())?;
            self.link.flush()?;
            return Ok(Flow::Continue);
        }

        self.session.reset_requested = true;
        self.link.transmit_all(&Frame::ok(code).to_bytes())?;
        self.link.flush()?;
        self.bus.delay_us(RESET_DELAY_US);

        log::info!("monitor: resetting");
        match self.bus.system_reset() {
            Ok(()) => Ok(Flow::Reset),
            Err(e) => {
                log::error!("monitor: reset failed: {}", e);
                Ok(Flow::Continue)
            }
        }
    }

    fn terminate(&mut self) -> Frame {
        let code = Command::Terminate.frame_code();
        let frame = if self.session.is_complete() {
            log::info!("monitor: session complete");
            Frame::ok(code)
        } else {
            log::warn!(
                "monitor: session incomplete ({:?} bytes outstanding, overrun {})",
                self.session.total_bytes,
                self.session.overrun
            );
            Frame::fail(code)
        };
        self.session = Session::default();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::CrcWidth;
    use crate::protocol::encode_total;
    use alloc::collections::{BTreeMap, VecDeque};
    use alloc::vec;

    /// Link fed from a script; times out once when drained, then closes
    struct ScriptLink {
        input: VecDeque<u8>,
        output: Vec<u8>,
        timed_out: bool,
    }

    impl ScriptLink {
        fn new(input: &[u8]) -> Self {
            Self {
                input: input.iter().copied().collect(),
                output: Vec::new(),
                timed_out: false,
            }
        }
    }

    impl Link for ScriptLink {
        fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
            self.output.push(byte);
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> Result<u8, LinkError> {
            match self.input.pop_front() {
                Some(byte) => Ok(byte),
                None if !self.timed_out => {
                    self.timed_out = true;
                    Err(LinkError::Timeout)
                }
                None => Err(LinkError::Closed),
            }
        }
    }

    /// Just enough of an Am29F040 pair to run a session
    struct RamBus {
        mem: BTreeMap<u32, u16>,
        autoselect: bool,
        present: bool,
        resettable: bool,
        resets: u32,
    }

    impl RamBus {
        fn new() -> Self {
            Self {
                mem: BTreeMap::new(),
                autoselect: false,
                present: true,
                resettable: false,
                resets: 0,
            }
        }
    }

    impl FlashBus for RamBus {
        fn read_word(&mut self, addr: u32) -> u16 {
            match (self.autoselect, addr) {
                (true, 0x10_0000) => 0x0101,
                (true, 0x10_0002) => 0xA4A4,
                _ => self.mem.get(&addr).copied().unwrap_or(0xFFFF),
            }
        }

        fn write_word(&mut self, addr: u32, value: u16) {
            if addr == 0x10_AAAA || addr == 0x10_5554 {
                match value {
                    0x9090 => self.autoselect = self.present,
                    0xF0F0 => self.autoselect = false,
                    0x1010 => self.mem.clear(),
                    _ => {}
                }
            } else {
                self.mem.insert(addr, value);
            }
        }

        fn set_interrupts(&mut self, enabled: bool) -> bool {
            enabled
        }

        fn can_reset(&self) -> bool {
            self.resettable
        }

        fn system_reset(&mut self) -> crate::Result<()> {
            self.resets += 1;
            Ok(())
        }
    }

    fn session_bytes(blocks: &[(u32, &[u8])], total_adjust: i32) -> Vec<u8> {
        let transfer: u32 = blocks.iter().map(|(_, d)| 6 + d.len() as u32).sum();
        let mut out = vec![b'c', b'f', b'e', b't'];
        out.extend_from_slice(&encode_total((transfer as i32 + total_adjust) as u32));
        for (addr, data) in blocks {
            out.push(b'b');
            out.extend_from_slice(
                &BlockHeader {
                    address: *addr,
                    length: data.len() as u16,
                }
                .to_wire(),
            );
            out.extend_from_slice(data);
            out.push(b'p');
        }
        out
    }

    fn run(input: &[u8], bus: RamBus) -> (Vec<u8>, RamBus) {
        let mut monitor = Monitor::new(ScriptLink::new(input), bus);
        monitor.serve().unwrap();
        let (link, bus) = monitor.into_parts();
        (link.output, bus)
    }

    #[test]
    fn test_full_session_completes() {
        let mut input = session_bytes(&[(0x10_0000, &[0x34, 0x12, 0x42][..])], 0);
        input.push(b'z');
        let (out, bus) = run(&input, RamBus::new());

        let mut expected = b"cf*1e*Et*T".to_vec();
        expected.extend_from_slice(b"b*Bp*P");
        expected.extend_from_slice(b"z*Z");
        assert_eq!(out, expected);
        assert_eq!(bus.mem.get(&0x10_0000), Some(&0x1234));
        assert_eq!(bus.mem.get(&0x10_0002), Some(&0xFF42));
    }

    #[test]
    fn test_off_by_one_total_fails_terminate() {
        let mut input = session_bytes(&[(0x10_0000, &[1, 2, 3, 4][..])], 1);
        input.push(b'Z');
        let (out, _) = run(&input, RamBus::new());
        assert!(out.ends_with(b"Z$Z"));
    }

    #[test]
    fn test_overrun_fails_terminate() {
        let mut input = session_bytes(&[(0x10_0000, &[1, 2, 3, 4][..])], -1);
        input.push(b'z');
        let (out, _) = run(&input, RamBus::new());
        assert!(out.ends_with(b"z$Z"));
    }

    #[test]
    fn test_second_total_rejected() {
        let mut input = vec![b't'];
        input.extend_from_slice(&encode_total(6));
        input.push(b't');
        input.extend_from_slice(&encode_total(6));
        let (out, _) = run(&input, RamBus::new());
        assert_eq!(out, b"t*Tt$T");
    }

    #[test]
    fn test_truncated_block_rejected() {
        let mut input = vec![b't'];
        input.extend_from_slice(&encode_total(16));
        input.push(b'b');
        input.extend_from_slice(&[0x00, 0x10, 0x00, 0x00, 0x00, 0x0A]);
        input.extend_from_slice(&[1, 2, 3]);
        let (out, _) = run(&input, RamBus::new());
        assert_eq!(out, b"t*Tb$B");
    }

    #[test]
    fn test_program_without_block_or_chip() {
        let (out, _) = run(b"p", RamBus::new());
        assert_eq!(out, b"p$P");

        let mut input = vec![b't'];
        input.extend_from_slice(&encode_total(8));
        input.push(b'b');
        input.extend_from_slice(&[0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0xAA, 0xBB]);
        input.push(b'p');
        let (out, _) = run(&input, RamBus::new());
        assert_eq!(out, b"t*Tb*Bp$P");
    }

    #[test]
    fn test_unknown_chip_and_erase() {
        let mut bus = RamBus::new();
        bus.present = false;
        let (out, _) = run(b"fe", bus);
        assert_eq!(out, b"f*0e$E");
    }

    #[test]
    fn test_unknown_command() {
        let (out, _) = run(b"cq", RamBus::new());
        assert_eq!(out, b"cq*U");
    }

    fn crc_session(data: &[u8], desc: CrcDescriptor) -> Vec<u8> {
        let mut input = session_bytes(&[(0x10_0000, data)], 0);
        input.push(b'r');
        input.extend_from_slice(&desc.to_wire());
        input.push(b'g');
        let (out, _) = run(&input, RamBus::new());
        let start = out.iter().rposition(|&b| b == b'r').unwrap_or(0);
        out[start..].to_vec()
    }

    #[test]
    fn test_crc_informational_reads_register() {
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_000A, 0);
        let out = crc_session(b"123456789\xAA\xBB", desc);
        assert_eq!(out, b"r*Rg31C3");
    }

    #[test]
    fn test_crc_stored_pass_reads_flash() {
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_000A, 0x10_0009);
        let out = crc_session(b"123456789\x31\xC3", desc);
        assert_eq!(out, b"r*Rg31C3");
    }

    #[test]
    fn test_crc_stored_mismatch_fails() {
        let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_000A, 0x10_0009);
        let out = crc_session(b"123456789\x00\x00", desc);
        assert_eq!(out, b"r$Rg0000");
    }

    #[test]
    fn test_get_crc_without_run_sends_nothing() {
        let (out, _) = run(b"gc", RamBus::new());
        assert_eq!(out, b"gc");
    }

    #[test]
    fn test_reset() {
        let (out, bus) = run(b"s", RamBus::new());
        assert_eq!(out, b"s$S");
        assert_eq!(bus.resets, 0);

        let mut bus = RamBus::new();
        bus.resettable = true;
        let mut monitor = Monitor::new(ScriptLink::new(b"sz"), bus);
        assert_eq!(monitor.serve(), Ok(Flow::Reset));
        assert!(monitor.session().reset_requested);
        let (link, bus) = monitor.into_parts();
        assert_eq!(link.output, b"s*S");
        assert_eq!(bus.resets, 1);
    }
}
