//! Human-authored telemetry records.
//!
//! Test tooling and producers write records as loose JSON objects. This module
//! validates them against the wire widths before anything is packed.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::codec::{encode_frame, MailboxState, TelemetryFrame, FRAME_SIZE};
use crate::error::EncodeError;

/// Loosely typed telemetry record as written by a human or a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub device_ip: String,
    pub timestamp: i64,
    pub distance: i64,
    pub state: String,
    pub success_rate: i64,
    pub baseline: i64,
    pub confidence: i64,
}

impl TryFrom<&TelemetryRecord> for TelemetryFrame {
    type Error = EncodeError;

    fn try_from(record: &TelemetryRecord) -> Result<Self, Self::Error> {
        Ok(TelemetryFrame {
            device_ip: parse_ip(&record.device_ip)?,
            timestamp: narrow("timestamp", record.timestamp)?,
            distance: narrow("distance", record.distance)?,
            state: record.state.parse()?,
            success_rate: narrow("success_rate", record.success_rate)?,
            baseline: narrow("baseline", record.baseline)?,
            confidence: narrow("confidence", record.confidence)?,
        })
    }
}

impl From<&TelemetryFrame> for TelemetryRecord {
    fn from(frame: &TelemetryFrame) -> Self {
        Self {
            device_ip: frame.device_ip.to_string(),
            timestamp: i64::from(frame.timestamp),
            distance: i64::from(frame.distance),
            state: frame.state.as_str().to_string(),
            success_rate: i64::from(frame.success_rate),
            baseline: i64::from(frame.baseline),
            confidence: i64::from(frame.confidence),
        }
    }
}

/// Validate a record and pack it into the wire format.
pub fn encode_record(record: &TelemetryRecord) -> Result<[u8; FRAME_SIZE], EncodeError> {
    let frame = TelemetryFrame::try_from(record)?;
    Ok(encode_frame(&frame))
}

fn parse_ip(raw: &str) -> Result<Ipv4Addr, EncodeError> {
    let octets: Vec<&str> = raw.trim().split('.').collect();
    if octets.len() != 4 {
        return Err(EncodeError::InvalidIp(raw.to_string()));
    }

    let mut parsed = [0u8; 4];
    for (slot, octet) in parsed.iter_mut().zip(&octets) {
        *slot = octet
            .parse::<u8>()
            .map_err(|_| EncodeError::InvalidIp(raw.to_string()))?;
    }
    Ok(Ipv4Addr::from(parsed))
}

fn narrow<T>(field: &'static str, value: i64) -> Result<T, EncodeError>
where
    T: TryFrom<i64> + Into<u64> + Bounded,
{
    T::try_from(value).map_err(|_| EncodeError::FieldOutOfRange {
        field,
        value,
        max: T::MAX_VALUE.into(),
    })
}

trait Bounded: Sized {
    const MAX_VALUE: Self;
}

impl Bounded for u8 {
    const MAX_VALUE: Self = u8::MAX;
}

impl Bounded for u16 {
    const MAX_VALUE: Self = u16::MAX;
}

impl Bounded for u32 {
    const MAX_VALUE: Self = u32::MAX;
}
