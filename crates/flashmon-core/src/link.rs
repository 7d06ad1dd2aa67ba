//! Byte link between host and monitor
//!
//! Both ends of a session only ever need to send one byte and wait, with a
//! deadline, for one byte. Serial ports, TCP sockets and in-process channels
//! all implement [`Link`].

use core::fmt;
use core::time::Duration;

/// Link-level failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// No byte arrived before the deadline
    Timeout,
    /// The other end went away
    Closed,
    /// The underlying device reported an error
    Io,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out waiting for data"),
            Self::Closed => write!(f, "link closed"),
            Self::Io => write!(f, "link I/O error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for LinkError {}

/// Half-duplex byte channel
pub trait Link {
    /// Send one byte
    fn transmit(&mut self, byte: u8) -> Result<(), LinkError>;

    /// Wait up to `timeout` for one byte
    fn receive(&mut self, timeout: Duration) -> Result<u8, LinkError>;

    /// Send a run of bytes
    fn transmit_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        for &byte in data {
            self.transmit(byte)?;
        }
        Ok(())
    }

    /// Fill `buf`, allowing `timeout` for each byte
    fn receive_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<(), LinkError> {
        for slot in buf.iter_mut() {
            *slot = self.receive(timeout)?;
        }
        Ok(())
    }

    /// Push out anything buffered
    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

impl<L: Link + ?Sized> Link for &mut L {
    fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
        (**self).transmit(byte)
    }

    fn receive(&mut self, timeout: Duration) -> Result<u8, LinkError> {
        (**self).receive(timeout)
    }

    fn transmit_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        (**self).transmit_all(data)
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        (**self).flush()
    }
}

#[cfg(feature = "alloc")]
impl<L: Link + ?Sized> Link for alloc::boxed::Box<L> {
    fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
        (**self).transmit(byte)
    }

    fn receive(&mut self, timeout: Duration) -> Result<u8, LinkError> {
        (**self).receive(timeout)
    }

    fn transmit_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        (**self).transmit_all(data)
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        (**self).flush()
    }
}
