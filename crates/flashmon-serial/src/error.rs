//! Error types for host-side operations
//!
//! Session and boot-strap failures carry the numeric code operators know
//! from the status display. Session codes are shown offset by 200,
//! boot-strap codes by 100.

use std::fmt;

use flashmon_core::link::LinkError;
use flashmon_core::HexError;
use thiserror::Error;

/// Session step a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// `c` echo
    Connect,
    /// `f` echo and family digit
    Identify,
    /// `e` echo and `*E`
    Erase,
    /// `t` echo
    TotalEcho,
    /// `*T`
    TotalAck,
    /// First `b` echo
    BlockEcho,
    /// `*B`
    BlockAck,
    /// `p` echo
    ProgramEcho,
    /// `*P`
    ProgramAck,
    /// Echo of every `b` after the first
    NextBlockEcho,
    /// `r` echo
    CrcEcho,
    /// `*R`
    CrcAck,
    /// `g` echo and digits
    GetCrc,
    /// `z` echo
    TerminateEcho,
    /// `*Z`
    TerminateAck,
    /// `s` echo
    ResetEcho,
    /// `*S`
    ResetAck,
}

impl Step {
    /// Every step, in code order
    pub const ALL: [Step; 17] = [
        Self::Connect,
        Self::Identify,
        Self::Erase,
        Self::TotalEcho,
        Self::BlockEcho,
        Self::TotalAck,
        Self::BlockAck,
        Self::ProgramEcho,
        Self::ProgramAck,
        Self::NextBlockEcho,
        Self::CrcEcho,
        Self::CrcAck,
        Self::GetCrc,
        Self::TerminateEcho,
        Self::TerminateAck,
        Self::ResetEcho,
        Self::ResetAck,
    ];

    /// Numeric code of this step
    pub fn code(self) -> u8 {
        match self {
            Self::Connect => 3,
            Self::Identify => 4,
            Self::Erase => 5,
            Self::TotalEcho => 6,
            Self::BlockEcho => 8,
            Self::TotalAck => 9,
            Self::BlockAck => 10,
            Self::ProgramEcho => 11,
            Self::ProgramAck => 12,
            Self::NextBlockEcho => 13,
            Self::CrcEcho => 14,
            Self::CrcAck => 15,
            Self::GetCrc => 16,
            Self::TerminateEcho => 17,
            Self::TerminateAck => 18,
            Self::ResetEcho => 19,
            Self::ResetAck => 20,
        }
    }

    /// Code as shown to the operator
    pub fn display_code(self) -> u16 {
        SESSION_CODE_OFFSET + self.code() as u16
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connect => "connect",
            Self::Identify => "identify",
            Self::Erase => "erase",
            Self::TotalEcho => "'t' echo",
            Self::TotalAck => "'*T'",
            Self::BlockEcho | Self::NextBlockEcho => "'b' echo",
            Self::BlockAck => "'*B'",
            Self::ProgramEcho => "'p' echo",
            Self::ProgramAck => "'*P'",
            Self::CrcEcho => "'r' echo",
            Self::CrcAck => "'*R'",
            Self::GetCrc => "CRC readback",
            Self::TerminateEcho => "'z' echo",
            Self::TerminateAck => "'*Z'",
            Self::ResetEcho => "'s' echo",
            Self::ResetAck => "'*S'",
        };
        f.write_str(name)
    }
}

/// Offset added to session codes for display
pub const SESSION_CODE_OFFSET: u16 = 200;
/// Offset added to boot-strap codes for display
pub const BOOTSTRAP_CODE_OFFSET: u16 = 100;

/// Code for an application image that does not parse
pub const HEX_PARSE_CODE: u8 = 2;

/// Flash session failure
#[derive(Debug, Error)]
pub enum SessionError {
    /// Nothing arrived in time
    #[error("error {}: timed out waiting for {step}", .step.display_code())]
    TransportTimeout {
        /// Where it happened
        step: Step,
    },

    /// The target echoed a different byte
    #[error(
        "error {}: {step} mismatch (sent 0x{sent:02X}, received 0x{received:02X})",
        .step.display_code()
    )]
    EchoMismatch {
        /// Where it happened
        step: Step,
        /// Command byte sent
        sent: u8,
        /// Byte echoed back
        received: u8,
    },

    /// The target answered with a `$` frame
    #[error("error {}: target reported failure at {step} ('${}')", .step.display_code(), char::from(*.code))]
    CommandFailed {
        /// Where it happened
        step: Step,
        /// Second frame byte
        code: u8,
    },

    /// A success frame for some other command
    #[error(
        "error {}: unexpected response 0x{lead:02X} 0x{code:02X} at {step}",
        .step.display_code()
    )]
    UnexpectedResponse {
        /// Where it happened
        step: Step,
        /// Frame lead byte
        lead: u8,
        /// Second frame byte
        code: u8,
    },

    /// The target found no flash it can drive
    #[error("error 204: unknown flash chip (digit '{}')", char::from(*.digit))]
    UnknownChip {
        /// Digit the target reported
        digit: u8,
    },

    /// The application image is not valid Intel-HEX
    #[error("error 202: {0}")]
    Hex(#[from] HexError),

    /// The CRC read back differs from the one given by the operator
    #[error("error 216: CRC mismatch (expected {expected}, target reported {reported})")]
    VerificationFailed {
        /// Digits the operator expected
        expected: String,
        /// Digits the target sent
        reported: String,
    },

    /// The link failed outright
    #[error("error {}: {step}: {source}", .step.display_code())]
    Link {
        /// Where it happened
        step: Step,
        /// Underlying failure
        source: LinkError,
    },
}

impl SessionError {
    /// Map a link failure during `step`
    pub fn link(step: Step, err: LinkError) -> Self {
        match err {
            LinkError::Timeout => Self::TransportTimeout { step },
            other => Self::Link {
                step,
                source: other,
            },
        }
    }

    /// Step the failure belongs to
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::TransportTimeout { step }
            | Self::EchoMismatch { step, .. }
            | Self::CommandFailed { step, .. }
            | Self::UnexpectedResponse { step, .. }
            | Self::Link { step, .. } => Some(*step),
            Self::UnknownChip { .. } => Some(Step::Identify),
            Self::VerificationFailed { .. } => Some(Step::GetCrc),
            Self::Hex(_) => None,
        }
    }

    /// Numeric code, without the display offset
    pub fn code(&self) -> u8 {
        self.step().map(Step::code).unwrap_or(HEX_PARSE_CODE)
    }
}

/// Result type for sessions
pub type Result<T> = std::result::Result<T, SessionError>;

/// Which boot-strap stage image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Loaded by the ROM loader
    One,
    /// Loaded by stage one
    Two,
    /// The flash monitor, echoed byte by byte
    Three,
}

impl Stage {
    /// Code reported when this stage's image does not parse
    pub fn hex_code(self) -> u8 {
        match self {
            Self::One => 4,
            Self::Two => 5,
            Self::Three => 6,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let n = match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Three => 3,
        };
        write!(f, "stage {}", n)
    }
}

/// Boot-strap download failure
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// A stage image is not valid Intel-HEX
    #[error("error {}: {stage} image: {source}", BOOTSTRAP_CODE_OFFSET + .stage.hex_code() as u16)]
    StageHex {
        /// Which image
        stage: Stage,
        /// Parse failure
        source: HexError,
    },

    /// The ROM loader never answered the zero byte
    #[error("error 110: boot-strap loader did not respond; check the connection and BSL mode")]
    NoIdentification,

    /// The ROM loader answered with an unknown CPU code
    #[error("error 110: boot-strap loader sent invalid chip ID 0x{0:02X}")]
    BadIdentification(u8),

    /// No echo for a stage three byte
    #[error("error 111: lost communication with target at 0x{address:06X}")]
    Stage3Timeout {
        /// Load address of the byte
        address: u32,
    },

    /// Wrong echo for a stage three byte
    #[error("error 111: invalid echo at 0x{address:06X} (sent 0x{sent:02X}, received 0x{received:02X})")]
    Stage3Echo {
        /// Load address of the byte
        address: u32,
        /// Byte sent
        sent: u8,
        /// Byte echoed
        received: u8,
    },

    /// The link failed outright
    #[error("error 110: {0}")]
    Link(#[from] LinkError),
}

impl BootstrapError {
    /// Numeric code, without the display offset
    pub fn code(&self) -> u8 {
        match self {
            Self::StageHex { stage, .. } => stage.hex_code(),
            Self::NoIdentification | Self::BadIdentification(_) | Self::Link(_) => 10,
            Self::Stage3Timeout { .. } | Self::Stage3Echo { .. } => 11,
        }
    }
}

/// Failure opening a transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection string did not parse
    #[error("Invalid connection string: {0}")]
    InvalidConnection(String),

    /// TCP connect or socket setup failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Serial port error
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_codes() {
        assert_eq!(Step::Connect.code(), 3);
        assert_eq!(Step::TotalAck.code(), 9);
        assert_eq!(Step::BlockEcho.code(), 8);
        assert_eq!(Step::ResetAck.display_code(), 220);
    }

    #[test]
    fn test_all_steps_in_code_order() {
        assert!(Step::ALL.windows(2).all(|w| w[0].code() < w[1].code()));
        assert_eq!(Step::ALL.first().map(|s| s.display_code()), Some(203));
        assert_eq!(Step::ALL.last().map(|s| s.display_code()), Some(220));
    }

    #[test]
    fn test_session_error_display_offsets_code() {
        let err = SessionError::CommandFailed {
            step: Step::ProgramAck,
            code: b'P',
        };
        assert_eq!(err.code(), 12);
        assert_eq!(
            err.to_string(),
            "error 212: target reported failure at '*P' ('$P')"
        );

        let err = SessionError::link(Step::Erase, LinkError::Timeout);
        assert!(matches!(err, SessionError::TransportTimeout { step: Step::Erase }));
        assert_eq!(err.to_string(), "error 205: timed out waiting for erase");

        let err = SessionError::from(HexError::MissingEndOfFile);
        assert_eq!(err.code(), HEX_PARSE_CODE);
    }

    #[test]
    fn test_bootstrap_codes() {
        assert_eq!(BootstrapError::BadIdentification(0x12).code(), 10);
        assert_eq!(
            BootstrapError::StageHex {
                stage: Stage::Three,
                source: HexError::MissingEndOfFile
            }
            .code(),
            6
        );
        assert!(BootstrapError::Stage3Echo {
            address: 0x20_0004,
            sent: 1,
            received: 2
        }
        .to_string()
        .starts_with("error 111"));
    }
}
