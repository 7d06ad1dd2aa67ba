//! Serial and TCP links to a flash monitor
//!
//! Both transports implement [`Link`]. The read timeout of the underlying
//! port is only changed when a caller asks for a different one, so the
//! common case of many receives with the same deadline costs no syscalls.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use flashmon_core::link::{Link, LinkError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::error::TransportError;

/// Default per-operation timeout while the port is idle
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

fn map_io(e: io::Error) -> LinkError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => LinkError::Timeout,
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => LinkError::Closed,
        _ => {
            log::debug!("link I/O error: {}", e);
            LinkError::Io
        }
    }
}

/// Serial port link
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialTransport {
    /// Open `device` at `baud`, 8N1 without flow control
    pub fn open(device: &str, baud: u32) -> Result<Self, TransportError> {
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()?;

        log::info!("Opened serial port {} at {} baud", device, baud);

        Ok(Self {
            port,
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Discard anything already received
    pub fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

impl Link for SerialTransport {
    fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
        self.port.write_all(&[byte]).map_err(map_io)
    }

    fn transmit_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.port.write_all(data).map_err(map_io)
    }

    fn receive(&mut self, timeout: Duration) -> Result<u8, LinkError> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout).map_err(|e| {
                log::debug!("failed to set serial timeout: {}", e);
                LinkError::Io
            })?;
            self.timeout = timeout;
        }

        let mut buf = [0u8; 1];
        match self.port.read(&mut buf) {
            Ok(1) => Ok(buf[0]),
            Ok(_) => Err(LinkError::Timeout),
            Err(e) => Err(map_io(e)),
        }
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.port.flush().map_err(map_io)
    }
}

/// TCP socket link, for serial servers and the emulator
pub struct TcpTransport {
    stream: TcpStream,
    timeout: Duration,
}

impl TcpTransport {
    /// Connect to `host:port`
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let addr = format!("{}:{}", host, port);
        log::info!("Connecting to {}", addr);

        let stream = TcpStream::connect(&addr)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let transport = Self::from_stream(stream)?;

        log::info!("Connected to {}", addr);
        Ok(transport)
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream) -> Result<Self, TransportError> {
        stream.set_nodelay(true).map_err(|e| {
            TransportError::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e))
        })?;
        stream
            .set_read_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to set read timeout: {}", e))
            })?;
        stream
            .set_write_timeout(Some(DEFAULT_TIMEOUT))
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to set write timeout: {}", e))
            })?;

        Ok(Self {
            stream,
            timeout: DEFAULT_TIMEOUT,
        })
    }
}

impl Link for TcpTransport {
    fn transmit(&mut self, byte: u8) -> Result<(), LinkError> {
        self.stream.write_all(&[byte]).map_err(map_io)
    }

    fn transmit_all(&mut self, data: &[u8]) -> Result<(), LinkError> {
        self.stream.write_all(data).map_err(map_io)
    }

    fn receive(&mut self, timeout: Duration) -> Result<u8, LinkError> {
        if timeout != self.timeout {
            // A zero duration is rejected by set_read_timeout
            let effective = timeout.max(Duration::from_millis(1));
            self.stream.set_read_timeout(Some(effective)).map_err(map_io)?;
            self.timeout = timeout;
        }

        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(LinkError::Closed),
            Ok(_) => Ok(buf[0]),
            Err(e) => Err(map_io(e)),
        }
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.stream.flush().map_err(map_io)
    }
}
