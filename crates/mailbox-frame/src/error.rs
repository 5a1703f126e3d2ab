use std::net::Ipv4Addr;

use crate::codec::FRAME_SIZE;

/// Errors that can occur while decoding a single telemetry frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not exactly one frame long.
    #[error("wrong frame length ({actual} bytes, expected {expected})")]
    WrongLength { expected: usize, actual: usize },

    /// The state byte does not map to a known mailbox state.
    #[error("invalid mailbox state {value} from device {device_ip}")]
    InvalidState { value: u8, device_ip: Ipv4Addr },
}

impl DecodeError {
    pub(crate) fn wrong_length(actual: usize) -> Self {
        Self::WrongLength {
            expected: FRAME_SIZE,
            actual,
        }
    }

    /// Device address carried by the rejected frame, when it could be recovered.
    pub fn device_ip(&self) -> Option<Ipv4Addr> {
        match self {
            Self::InvalidState { device_ip, .. } => Some(*device_ip),
            Self::WrongLength { .. } => None,
        }
    }
}

/// Errors that can occur while encoding a human-authored telemetry record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// An integer field does not fit its wire width.
    #[error("{field} out of range: {value} (expected 0..={max})")]
    FieldOutOfRange {
        field: &'static str,
        value: i64,
        max: u64,
    },

    /// The device address is not a dotted quad of four octets.
    #[error("invalid device ip: {0:?}")]
    InvalidIp(String),

    /// The state name is not one of the four mailbox states.
    #[error("unknown mailbox state: {0:?} (expected empty, has_mail, full or emptied)")]
    UnknownState(String),
}

/// Errors that can occur while reading frames from a byte stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A complete chunk was read but could not be decoded.
    #[error("frame decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The stream closed with a partial frame still buffered.
    #[error("stream closed mid-frame ({residual} residual bytes discarded)")]
    Truncated { residual: usize },

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
