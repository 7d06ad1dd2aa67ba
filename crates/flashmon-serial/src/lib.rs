//! flashmon-serial - Host side of the C167 flash monitor protocol
//!
//! This crate drives a flash monitor running on the target over a serial
//! port or a TCP socket (a serial server, or the built-in emulator).
//!
//! # Supported Transports
//!
//! - Serial port: `dev=/dev/ttyUSB0`, `dev=COM1:19200`, etc.
//! - TCP socket: `ip=host:port`
//!
//! # Example
//!
//! ```no_run
//! use flashmon_core::hexfile;
//! use flashmon_serial::{Connection, Host, HostOptions, NoProgress};
//!
//! let image = std::fs::read_to_string("app.hex")?;
//! let stream = hexfile::parse(&image)?;
//!
//! let link = Connection::parse("dev=/dev/ttyUSB0")?.open()?;
//! let mut host = Host::new(link, HostOptions::default());
//! let report = host.run(&stream, &mut NoProgress)?;
//! println!("Programmed {} bytes into {}", report.bytes, report.family.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod bootstrap;
pub mod error;
pub mod host;
pub mod transport;

use flashmon_core::link::Link;

// Re-exports
pub use bootstrap::{bootstrap, BootstrapImages, BootstrapOptions, BootstrapProgress};
pub use error::{BootstrapError, SessionError, Stage, Step, TransportError};
pub use host::{Host, HostOptions, NoProgress, SessionProgress, SessionReport};
pub use transport::{SerialTransport, TcpTransport};

/// Baud rate used when the connection string names none
pub const DEFAULT_BAUD: u32 = 38400;

/// Where the monitor is reachable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Serial port connection
    Serial {
        /// Device path (e.g., "/dev/ttyUSB0" or "COM1")
        device: String,
        /// Baud rate
        baud: u32,
    },
    /// TCP socket connection
    Tcp {
        /// Hostname or IP address
        host: String,
        /// Port number
        port: u16,
    },
}

impl Connection {
    /// Parse a connection string
    ///
    /// Formats:
    /// - `dev=/dev/ttyUSB0` - Serial at [`DEFAULT_BAUD`]
    /// - `dev=/dev/ttyUSB0:115200` - Serial with specified baud
    /// - `ip=host:port` - TCP connection
    pub fn parse(s: &str) -> Result<Self, TransportError> {
        if let Some(dev) = s.strip_prefix("dev=") {
            let (device, baud) = match dev.rsplit_once(':') {
                Some((device, baud_str)) => {
                    let baud = baud_str.parse().map_err(|_| {
                        TransportError::InvalidConnection(format!("Invalid baud rate: {}", baud_str))
                    })?;
                    (device, baud)
                }
                None => (dev, DEFAULT_BAUD),
            };
            if device.is_empty() {
                return Err(TransportError::InvalidConnection(
                    "Missing device in dev= parameter".to_string(),
                ));
            }
            Ok(Connection::Serial {
                device: device.to_string(),
                baud,
            })
        } else if let Some(ip) = s.strip_prefix("ip=") {
            let (host, port_str) = ip.rsplit_once(':').ok_or_else(|| {
                TransportError::InvalidConnection("Missing port in ip= parameter".to_string())
            })?;
            let port = port_str.parse().map_err(|_| {
                TransportError::InvalidConnection(format!("Invalid port: {}", port_str))
            })?;
            Ok(Connection::Tcp {
                host: host.to_string(),
                port,
            })
        } else {
            Err(TransportError::InvalidConnection(format!(
                "{}. Use dev=... or ip=...",
                s
            )))
        }
    }

    /// Open the link
    pub fn open(&self) -> Result<Box<dyn Link + Send>, TransportError> {
        match self {
            Connection::Serial { device, baud } => {
                let mut transport = SerialTransport::open(device, *baud)?;
                transport.clear_input()?;
                Ok(Box::new(transport))
            }
            Connection::Tcp { host, port } => Ok(Box::new(TcpTransport::connect(host, *port)?)),
        }
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Connection::Serial { device, baud } => write!(f, "{} at {} baud", device, baud),
            Connection::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serial() {
        assert_eq!(
            Connection::parse("dev=/dev/ttyUSB0").unwrap(),
            Connection::Serial {
                device: "/dev/ttyUSB0".into(),
                baud: DEFAULT_BAUD
            }
        );
        assert_eq!(
            Connection::parse("dev=COM3:19200").unwrap(),
            Connection::Serial {
                device: "COM3".into(),
                baud: 19200
            }
        );
        assert!(Connection::parse("dev=/dev/ttyS0:fast").is_err());
        assert!(Connection::parse("dev=").is_err());
    }

    #[test]
    fn test_parse_tcp() {
        assert_eq!(
            Connection::parse("ip=localhost:4000").unwrap(),
            Connection::Tcp {
                host: "localhost".into(),
                port: 4000
            }
        );
        assert!(Connection::parse("ip=localhost").is_err());
        assert!(Connection::parse("ip=localhost:99999").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_scheme() {
        let err = Connection::parse("/dev/ttyUSB0").unwrap_err();
        assert!(matches!(err, TransportError::InvalidConnection(_)));
    }
}
