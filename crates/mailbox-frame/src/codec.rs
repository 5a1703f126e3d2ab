use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};

/// Wire size of one telemetry frame. The fixed length is the only delimiter.
pub const FRAME_SIZE: usize = 15;

/// Mailbox fill state as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailboxState {
    Empty,
    HasMail,
    Full,
    Emptied,
}

impl MailboxState {
    /// All states in wire-code order.
    pub const ALL: [MailboxState; 4] = [
        MailboxState::Empty,
        MailboxState::HasMail,
        MailboxState::Full,
        MailboxState::Emptied,
    ];

    /// Map a wire code to a state. Only 0..=3 are defined.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Empty),
            1 => Some(Self::HasMail),
            2 => Some(Self::Full),
            3 => Some(Self::Emptied),
            _ => None,
        }
    }

    /// Wire code for this state.
    pub fn code(self) -> u8 {
        match self {
            Self::Empty => 0,
            Self::HasMail => 1,
            Self::Full => 2,
            Self::Emptied => 3,
        }
    }

    /// Stable lowercase name shared with the observer layer.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::HasMail => "has_mail",
            Self::Full => "full",
            Self::Emptied => "emptied",
        }
    }
}

impl fmt::Display for MailboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MailboxState {
    type Err = EncodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| EncodeError::UnknownState(s.to_string()))
    }
}

/// One decoded telemetry frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryFrame {
    /// Address of the originating device.
    pub device_ip: Ipv4Addr,
    /// Seconds since the Unix epoch (device or gateway clock).
    pub timestamp: u32,
    /// Sensed distance in millimetres.
    pub distance: u16,
    /// Device-reported mailbox state.
    pub state: MailboxState,
    /// Measurement confidence, 0-255 scaled to 0-100%.
    pub success_rate: u8,
    /// Calibrated empty-mailbox distance in millimetres.
    pub baseline: u16,
    /// Detection confidence for events; 0 on routine status frames.
    pub confidence: u8,
}

impl TelemetryFrame {
    /// Append the wire form of this frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_SIZE);
        put_frame(self, dst);
    }

    /// Wire form of this frame.
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        encode_frame(self)
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (all fields big-endian, no padding):
/// ```text
/// ┌──────────┬───────────┬──────────┬───────┬─────────┬──────────┬────────────┐
/// │ ip (4B)  │ time (4B) │ dist(2B) │ state │ success │ baseline │ confidence │
/// │          │           │          │ (1B)  │ (1B)    │ (2B)     │ (1B)       │
/// └──────────┴───────────┴──────────┴───────┴─────────┴──────────┴────────────┘
/// ```
pub fn encode_frame(frame: &TelemetryFrame) -> [u8; FRAME_SIZE] {
    let mut out = [0u8; FRAME_SIZE];
    let mut dst = &mut out[..];
    put_frame(frame, &mut dst);
    out
}

fn put_frame<B: BufMut>(frame: &TelemetryFrame, dst: &mut B) {
    dst.put_u32(u32::from(frame.device_ip));
    dst.put_u32(frame.timestamp);
    dst.put_u16(frame.distance);
    dst.put_u8(frame.state.code());
    dst.put_u8(frame.success_rate);
    dst.put_u16(frame.baseline);
    dst.put_u8(frame.confidence);
}

/// Decode exactly one frame.
///
/// Any length other than [`FRAME_SIZE`] is rejected rather than read as a
/// partial record.
pub fn decode_frame(src: &[u8]) -> Result<TelemetryFrame, DecodeError> {
    if src.len() != FRAME_SIZE {
        return Err(DecodeError::wrong_length(src.len()));
    }

    let mut buf = src;
    let device_ip = Ipv4Addr::from(buf.get_u32());
    let timestamp = buf.get_u32();
    let distance = buf.get_u16();
    let state_code = buf.get_u8();
    let success_rate = buf.get_u8();
    let baseline = buf.get_u16();
    let confidence = buf.get_u8();

    let state = MailboxState::from_code(state_code).ok_or(DecodeError::InvalidState {
        value: state_code,
        device_ip,
    })?;

    Ok(TelemetryFrame {
        device_ip,
        timestamp,
        distance,
        state,
        success_rate,
        baseline,
        confidence,
    })
}
