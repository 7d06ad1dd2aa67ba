//! Boot-strap download of the flash monitor
//!
//! A C167 held in boot-strap mode runs a ROM loader that answers a zero
//! byte with a CPU identification byte and then accepts 32 bytes of code.
//! That first stage loads a second, which in turn loads the flash monitor
//! itself. The third stage echoes every byte it receives, so only that
//! stage is checked byte by byte.

use std::thread;
use std::time::{Duration, Instant};

use flashmon_core::hexfile;
use flashmon_core::link::{Link, LinkError};

use crate::error::{BootstrapError, Stage};

/// Identification bytes the ROM loader may answer with
pub const LOADER_IDS: [u8; 3] = [0xA5, 0xC5, 0xD5];

/// Load address of the first stage three byte, for diagnostics
pub const STAGE3_BASE: u32 = 0x0020_0000;

/// Boot-strap timing
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Wait for the identification byte
    pub ident_timeout: Duration,
    /// Wait for each stage three echo
    pub echo_timeout: Duration,
    /// Pause after every stage one and stage two byte
    pub byte_delay: Duration,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            ident_timeout: Duration::from_secs(3),
            echo_timeout: Duration::from_secs(3),
            byte_delay: Duration::from_micros(500),
        }
    }
}

/// The three loader images as flat bytes
#[derive(Debug, Clone, Default)]
pub struct BootstrapImages {
    /// Loaded by the ROM loader
    pub stage1: Vec<u8>,
    /// Loaded by stage one
    pub stage2: Vec<u8>,
    /// The flash monitor
    pub stage3: Vec<u8>,
}

impl BootstrapImages {
    /// Decode three Intel-HEX images, ignoring their load addresses
    pub fn from_hex(stage1: &str, stage2: &str, stage3: &str) -> Result<Self, BootstrapError> {
        let decode = |stage: Stage, text: &str| {
            hexfile::parse_flat(text).map_err(|source| BootstrapError::StageHex { stage, source })
        };
        Ok(Self {
            stage1: decode(Stage::One, stage1)?,
            stage2: decode(Stage::Two, stage2)?,
            stage3: decode(Stage::Three, stage3)?,
        })
    }
}

/// Observer for boot-strap progress
pub trait BootstrapProgress {
    /// The ROM loader identified the CPU
    fn identified(&mut self, _id: u8) {}

    /// A stage starts; `len` bytes will be sent
    fn stage_started(&mut self, _stage: Stage, _len: usize) {}

    /// `sent` bytes of the current stage are out
    fn stage_progress(&mut self, _sent: usize) {}

    /// The current stage is complete
    fn stage_finished(&mut self, _stage: Stage) {}
}

impl BootstrapProgress for crate::host::NoProgress {}

/// Wait for the loader's identification byte, skipping 0x00 and 0xFF
fn wait_for_id<L: Link>(link: &mut L, timeout: Duration) -> Result<u8, BootstrapError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BootstrapError::NoIdentification);
        }
        match link.receive(remaining) {
            Ok(0x00) | Ok(0xFF) => continue,
            Ok(id) => return Ok(id),
            Err(LinkError::Timeout) => return Err(BootstrapError::NoIdentification),
            Err(e) => return Err(e.into()),
        }
    }
}

fn send_raw<L: Link>(
    link: &mut L,
    stage: Stage,
    data: &[u8],
    delay: Duration,
    progress: &mut dyn BootstrapProgress,
) -> Result<(), BootstrapError> {
    progress.stage_started(stage, data.len());
    for (i, &byte) in data.iter().enumerate() {
        link.transmit(byte)?;
        link.flush()?;
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        progress.stage_progress(i + 1);
    }
    progress.stage_finished(stage);
    log::debug!("bootstrap: {} sent ({} bytes)", stage, data.len());
    Ok(())
}

fn send_echoed<L: Link>(
    link: &mut L,
    data: &[u8],
    timeout: Duration,
    progress: &mut dyn BootstrapProgress,
) -> Result<(), BootstrapError> {
    progress.stage_started(Stage::Three, data.len());
    for (i, &byte) in data.iter().enumerate() {
        let address = STAGE3_BASE + i as u32;
        link.transmit(byte)?;
        link.flush()?;
        match link.receive(timeout) {
            Ok(echo) if echo == byte => {}
            Ok(echo) => {
                return Err(BootstrapError::Stage3Echo {
                    address,
                    sent: byte,
                    received: echo,
                })
            }
            Err(LinkError::Timeout) => return Err(BootstrapError::Stage3Timeout { address }),
            Err(e) => return Err(e.into()),
        }
        progress.stage_progress(i + 1);
    }
    progress.stage_finished(Stage::Three);
    Ok(())
}

/// Download the monitor through the ROM boot-strap loader
///
/// Returns the CPU identification byte.
pub fn bootstrap<L: Link>(
    link: &mut L,
    images: &BootstrapImages,
    options: &BootstrapOptions,
    progress: &mut dyn BootstrapProgress,
) -> Result<u8, BootstrapError> {
    log::info!("bootstrap: connecting to the boot-strap loader");
    link.transmit(0x00)?;
    link.flush()?;

    let id = wait_for_id(link, options.ident_timeout)?;
    if !LOADER_IDS.contains(&id) {
        return Err(BootstrapError::BadIdentification(id));
    }
    log::info!("bootstrap: CPU code {:02X}h", id);
    progress.identified(id);

    send_raw(link, Stage::One, &images.stage1, options.byte_delay, progress)?;
    send_raw(link, Stage::Two, &images.stage2, options.byte_delay, progress)?;
    send_echoed(link, &images.stage3, options.echo_timeout, progress)?;

    log::info!("bootstrap: monitor loaded ({} bytes)", images.stage3.len());
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::NoProgress;
    use std::collections::VecDeque;

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
        fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
            self.sent.push(byte);
            Ok(())
        }

        fn receive(&mut self, _timeout: Duration) -> Result<u8, LinkError> {
            self.input.pop_front().ok_or(LinkError::Timeout)
        }
    }

    fn images() -> BootstrapImages {
        BootstrapImages {
            stage1: vec![0xE6, 0x00],
            stage2: vec![0x11],
            stage3: vec![0x21, 0x22, 0x23],
        }
    }

    fn fast() -> BootstrapOptions {
        BootstrapOptions {
            byte_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_bootstrap_success() {
        let mut link = Script::new(&[0x00, 0xFF, 0xC5, 0x21, 0x22, 0x23]);
        let id = bootstrap(&mut link, &images(), &fast(), &mut NoProgress).unwrap();
        assert_eq!(id, 0xC5);
        assert_eq!(link.sent, [0x00, 0xE6, 0x00, 0x11, 0x21, 0x22, 0x23]);
    }

    #[test]
    fn test_bad_identification() {
        let mut link = Script::new(&[0x00, 0x12]);
        let err = bootstrap(&mut link, &images(), &fast(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, BootstrapError::BadIdentification(0x12)));
        assert_eq!(err.code(), 10);
        assert_eq!(link.sent, [0x00]);
    }

    #[test]
    fn test_no_identification() {
        let mut link = Script::new(&[0xFF, 0xFF]);
        let err = bootstrap(&mut link, &images(), &fast(), &mut NoProgress).unwrap_err();
        assert!(matches!(err, BootstrapError::NoIdentification));
    }

    #[test]
    fn test_stage3_echo_mismatch_reports_address() {
        let mut link = Script::new(&[0xA5, 0x21, 0x99]);
        let err = bootstrap(&mut link, &images(), &fast(), &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Stage3Echo {
                address: 0x20_0001,
                sent: 0x22,
                received: 0x99
            }
        ));
        assert_eq!(err.code(), 11);
    }

    #[test]
    fn test_stage3_timeout() {
        let mut link = Script::new(&[0xD5, 0x21, 0x22]);
        let err = bootstrap(&mut link, &images(), &fast(), &mut NoProgress).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Stage3Timeout { address: 0x20_0002 }
        ));
    }

    #[test]
    fn test_images_from_hex() {
        let stage = ":02000000E60018\n:00000001FF\n";
        let images = BootstrapImages::from_hex(stage, stage, stage).unwrap();
        assert_eq!(images.stage1, [0xE6, 0x00]);

        let err = BootstrapImages::from_hex(stage, stage, ":0100").unwrap_err();
        assert_eq!(err.code(), 6);
    }
}
