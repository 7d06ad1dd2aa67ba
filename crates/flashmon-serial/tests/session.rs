//! Complete host sessions against a simulated target

use std::thread::JoinHandle;

use flashmon_core::chip::family::from_digit;
use flashmon_core::crc::{self, CrcDescriptor, CrcSession, CrcWidth};
use flashmon_core::hexfile::{self, Block, BlockStream};
use flashmon_core::monitor::Flow;
use flashmon_dummy::{spawn_monitor, ChannelLink, FaultPlan, MonitorResult, SimConfig, SimulatedFlash};
use flashmon_serial::{Host, HostOptions, NoProgress, SessionError, SessionProgress, Step};

const IMAGE: &str = "\
:020000040010EA
:0400000001020304F2
:03000400050607E7
:020000040012E8
:02800000AABB19
:00000001FF
";

fn start(flash: SimulatedFlash) -> (ChannelLink, JoinHandle<MonitorResult>) {
    let (host, target) = ChannelLink::pair();
    (host, spawn_monitor(target, flash))
}

fn flash(digit: u8) -> SimulatedFlash {
    SimulatedFlash::new(from_digit(digit).unwrap())
}

fn finish(host: Host<ChannelLink>, handle: JoinHandle<MonitorResult>) -> (Flow, SimulatedFlash) {
    drop(host.into_inner());
    let (result, flash) = handle.join().unwrap();
    (result.unwrap(), flash)
}

#[derive(Default)]
struct Recorder {
    steps: Vec<Step>,
    total: u64,
    progress: Vec<u64>,
    finished: bool,
    crc: Option<String>,
}

impl SessionProgress for Recorder {
    fn step(&mut self, step: Step) {
        self.steps.push(step);
    }

    fn transfer_started(&mut self, total: u64) {
        self.total = total;
    }

    fn transfer_progress(&mut self, sent: u64) {
        self.progress.push(sent);
    }

    fn transfer_finished(&mut self) {
        self.finished = true;
    }

    fn crc_read(&mut self, digits: &str) {
        self.crc = Some(digits.to_string());
    }
}

#[test]
fn test_program_image_on_every_family() {
    let stream = hexfile::parse(IMAGE).unwrap();

    for digit in b'1'..=b'7' {
        let (link, handle) = start(flash(digit));
        let mut host = Host::new(link, HostOptions::default());
        let mut recorder = Recorder::default();
        let report = host.run(&stream, &mut recorder).unwrap();

        assert_eq!(report.family.digit, digit);
        assert_eq!(report.blocks, 2);
        assert_eq!(report.bytes, 9);
        assert!(report.crc.is_none());
        assert_eq!(recorder.total, 9);
        assert_eq!(recorder.progress, [7, 9]);
        assert!(recorder.finished);
        assert_eq!(recorder.steps.first(), Some(&Step::Connect));
        assert_eq!(recorder.steps.last(), Some(&Step::TerminateAck));

        let (flow, flash) = finish(host, handle);
        assert_eq!(flow, Flow::Continue);
        assert_eq!(flash.read_image(0x10_0000, 8), [1, 2, 3, 4, 5, 6, 7, 0xFF]);
        assert_eq!(flash.read_image(0x12_8000, 2), [0xAA, 0xBB]);
        assert!(flash.in_read_mode());
    }
}

#[test]
fn test_odd_block_is_padded() {
    let stream = hexfile::parse(":020000040010EA\n:0300100011223387\n:00000001FF\n").unwrap();
    let (link, handle) = start(flash(b'1'));
    let mut host = Host::new(link, HostOptions::default());
    host.run(&stream, &mut NoProgress).unwrap();

    let (_, flash) = finish(host, handle);
    assert_eq!(flash.read_image(0x10_0010, 4), [0x11, 0x22, 0x33, 0xFF]);
}

#[test]
fn test_short_total_fails_terminate() {
    let stream = hexfile::parse(IMAGE).unwrap();
    let (link, handle) = start(flash(b'7'));
    let mut host = Host::new(link, HostOptions::default());

    host.connect().unwrap();
    host.identify().unwrap();
    host.erase().unwrap();
    host.declare_total(stream.transfer_len() - 1).unwrap();
    for (i, block) in stream.blocks.iter().enumerate() {
        host.send_block(block, i == 0).unwrap();
        host.program().unwrap();
    }
    let err = host.terminate().unwrap_err();
    assert!(matches!(
        err,
        SessionError::CommandFailed {
            step: Step::TerminateAck,
            code: b'Z'
        }
    ));
    assert_eq!(err.to_string(), "error 218: target reported failure at '*Z' ('$Z')");

    finish(host, handle);
}

#[test]
fn test_unknown_chip_aborts_before_erase() {
    let family = from_digit(b'1').unwrap();
    let mut config = SimConfig::new(family);
    config.identity.device_id = 0x1234;
    let (link, handle) = start(SimulatedFlash::with_config(config));

    let mut host = Host::new(link, HostOptions::default());
    let stream = hexfile::parse(IMAGE).unwrap();
    let err = host.run(&stream, &mut NoProgress).unwrap_err();
    assert!(matches!(err, SessionError::UnknownChip { digit: b'0' }));
    assert_eq!(err.code(), 4);

    let (_, flash) = finish(host, handle);
    assert_eq!(flash.chip_erases(), 0);
}

#[test]
fn test_program_fault_reports_step() {
    let family = from_digit(b'1').unwrap();
    let mut config = SimConfig::new(family);
    config.faults = FaultPlan {
        program_at: Some(0x10_0002),
        erase: false,
    };
    let (link, handle) = start(SimulatedFlash::with_config(config));

    let mut host = Host::new(link, HostOptions::default());
    let stream = hexfile::parse(IMAGE).unwrap();
    let err = host.run(&stream, &mut NoProgress).unwrap_err();
    assert!(matches!(
        err,
        SessionError::CommandFailed {
            step: Step::ProgramAck,
            code: b'P'
        }
    ));
    assert_eq!(err.code(), 12);

    let (_, flash) = finish(host, handle);
    assert!(flash.in_read_mode());
}

#[test]
fn test_erase_fault_reports_step() {
    let family = from_digit(b'2').unwrap();
    let mut config = SimConfig::new(family);
    config.faults.erase = true;
    let (link, handle) = start(SimulatedFlash::with_config(config));

    let mut host = Host::new(link, HostOptions::default());
    let stream = hexfile::parse(IMAGE).unwrap();
    let err = host.run(&stream, &mut NoProgress).unwrap_err();
    assert_eq!(err.code(), 5);

    finish(host, handle);
}

fn payload() -> Vec<u8> {
    (0u8..14).map(|i| i.wrapping_mul(37).wrapping_add(5)).collect()
}

fn crc16_of(data: &[u8]) -> u16 {
    let mut session = CrcSession::new(CrcWidth::Bits16, 0x1021);
    session.update_slice(data);
    session.update(0);
    session.update(0);
    session.running() as u16
}

fn single_block(address: u32, data: Vec<u8>) -> BlockStream {
    let record_lens = vec![data.len() as u8];
    BlockStream {
        blocks: vec![Block {
            address,
            data,
            record_lens,
        }],
    }
}

#[test]
fn test_stored_crc_passes() {
    let mut data = payload();
    data.extend_from_slice(&crc16_of(&data).to_be_bytes());
    let stream = single_block(0x10_0000, data.clone());

    let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_000F, 0x10_000E);
    let options = HostOptions {
        crc: Some(desc),
        ..Default::default()
    };
    let (link, handle) = start(flash(b'7'));
    let mut host = Host::new(link, options);
    let mut recorder = Recorder::default();
    let report = host.run(&stream, &mut recorder).unwrap();

    let expected = format!("{:04X}", crc16_of(&data[..14]));
    assert_eq!(report.crc.as_deref(), Some(expected.as_str()));
    assert_eq!(recorder.crc, report.crc);

    finish(host, handle);
}

#[test]
fn test_stored_crc_mismatch_fails_crc_step() {
    let mut data = payload();
    data.extend_from_slice(&(crc16_of(&data) ^ 1).to_be_bytes());
    let stream = single_block(0x10_0000, data);

    let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_000F, 0x10_000E);
    let options = HostOptions {
        crc: Some(desc),
        ..Default::default()
    };
    let (link, handle) = start(flash(b'1'));
    let mut host = Host::new(link, options);
    let err = host.run(&stream, &mut NoProgress).unwrap_err();
    assert!(matches!(
        err,
        SessionError::CommandFailed {
            step: Step::CrcAck,
            code: b'R'
        }
    ));
    assert_eq!(err.code(), 15);

    finish(host, handle);
}

#[test]
fn test_operator_crc_compared() {
    let data = payload();
    let stream = single_block(0x10_0000, data.clone());
    let desc = CrcDescriptor::new(CrcWidth::Bits16, 0x1021, 0x10_0000, 0x10_000F, 0x10_000E);

    // Bytes past the payload read as erased, and the last two are zeroed
    let mut range = data.clone();
    range.resize(16, 0xFF);
    let session = crc::scan(&desc.with_stored_address(0), |addr| range[(addr - 0x10_0000) as usize]).unwrap();
    let good = session.running();

    let options = HostOptions {
        crc: Some(desc),
        expected_crc: Some(good),
        ..Default::default()
    };
    let (link, handle) = start(flash(b'7'));
    let mut host = Host::new(link, options);
    let report = host.run(&stream, &mut NoProgress).unwrap();
    assert_eq!(report.crc, Some(format!("{:04X}", good)));
    finish(host, handle);

    let options = HostOptions {
        crc: Some(desc),
        expected_crc: Some(good ^ 0x0100),
        ..Default::default()
    };
    let (link, handle) = start(flash(b'7'));
    let mut host = Host::new(link, options);
    let err = host.run(&stream, &mut NoProgress).unwrap_err();
    assert!(matches!(err, SessionError::VerificationFailed { .. }));
    assert_eq!(err.code(), 16);
    finish(host, handle);
}

#[test]
fn test_reset_ends_monitor() {
    let family = from_digit(b'6').unwrap();
    let mut config = SimConfig::new(family);
    config.resettable = true;
    let (link, handle) = start(SimulatedFlash::with_config(config));

    let options = HostOptions {
        reset: true,
        ..Default::default()
    };
    let mut host = Host::new(link, options);
    let stream = hexfile::parse(IMAGE).unwrap();
    let report = host.run(&stream, &mut NoProgress).unwrap();
    assert!(report.reset);

    let (flow, flash) = finish(host, handle);
    assert_eq!(flow, Flow::Reset);
    assert_eq!(flash.resets(), 1);
}

#[test]
fn test_reset_refused_without_support() {
    let options = HostOptions {
        reset: true,
        ..Default::default()
    };
    let (link, handle) = start(flash(b'6'));
    let mut host = Host::new(link, options);
    let stream = hexfile::parse(IMAGE).unwrap();
    let err = host.run(&stream, &mut NoProgress).unwrap_err();
    assert!(matches!(
        err,
        SessionError::CommandFailed {
            step: Step::ResetAck,
            code: b'S'
        }
    ));
    assert_eq!(err.code(), 20);
    finish(host, handle);
}
