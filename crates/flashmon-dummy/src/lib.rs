//! flashmon-dummy - Simulated target for testing
//!
//! This crate provides a [`SimulatedFlash`] that models every supported
//! flash family behind a [`FlashBus`](flashmon_core::chip::FlashBus), and a
//! [`ChannelLink`] pair that connects a host to a monitor inside one
//! process. Together they let a complete session run without a board.

mod flash;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flashmon_core::link::{Link, LinkError};
use flashmon_core::monitor::{Flow, Monitor};

pub use flash::{FaultPlan, SimConfig, SimulatedFlash};

/// One end of an in-process byte channel
pub struct ChannelLink {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

impl ChannelLink {
    /// Create two connected ends
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel();
        let (b_tx, a_rx) = mpsc::channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

impl Link for ChannelLink {
    fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
        self.tx.send(byte).map_err(|_| LinkError::Closed)
    }

    fn receive(&mut self, timeout: Duration) -> Result<u8, LinkError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => LinkError::Timeout,
            RecvTimeoutError::Disconnected => LinkError::Closed,
        })
    }
}

/// Outcome of a monitor thread: how serving ended, and the flash it left
pub type MonitorResult = (Result<Flow, LinkError>, SimulatedFlash);

/// Run a monitor on its own thread until `link` closes or the board resets
pub fn spawn_monitor<L>(link: L, flash: SimulatedFlash) -> JoinHandle<MonitorResult>
where
    L: Link + Send + 'static,
{
    thread::spawn(move || {
        let mut monitor = Monitor::new(link, flash);
        let result = monitor.serve();
        let (_, flash) = monitor.into_parts();
        (result, flash)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashmon_core::chip::family::from_digit;

    #[test]
    fn test_channel_pair() {
        let (mut a, mut b) = ChannelLink::pair();
        a.transmit_all(b"hi").unwrap();
        assert_eq!(b.receive(Duration::from_millis(10)), Ok(b'h'));
        assert_eq!(b.receive(Duration::from_millis(10)), Ok(b'i'));
        assert_eq!(b.receive(Duration::from_millis(10)), Err(LinkError::Timeout));
        drop(a);
        assert_eq!(b.receive(Duration::from_millis(10)), Err(LinkError::Closed));
        assert_eq!(b.transmit(0), Err(LinkError::Closed));
    }

    #[test]
    fn test_spawned_monitor_answers() {
        let (mut host, target) = ChannelLink::pair();
        let flash = SimulatedFlash::new(from_digit(b'7').unwrap());
        let handle = spawn_monitor(target, flash);

        host.transmit(b'f').unwrap();
        let mut reply = [0u8; 3];
        host.receive_exact(&mut reply, Duration::from_secs(2)).unwrap();
        assert_eq!(&reply, b"f*7");

        drop(host);
        let (result, flash) = handle.join().unwrap();
        assert_eq!(result, Ok(Flow::Continue));
        assert!(flash.in_read_mode());
    }
}
