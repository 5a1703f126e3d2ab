use std::net::Ipv4Addr;

use mailbox_frame::{MailboxState, TelemetryFrame};
use serde::{Deserialize, Serialize};

use crate::topic::TopicClass;

/// Event delivered to observers.
///
/// Serialized as a flat JSON object tagged with `event_type`. The key names
/// are shared with the rendering layer and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TelemetryEvent {
    /// Routine status frame.
    #[serde(rename = "status")]
    StatusUpdate {
        device_ip: Ipv4Addr,
        timestamp: u32,
        state: MailboxState,
        distance: u16,
        baseline: u16,
        success_rate: u8,
    },
    /// Mail was detected in the box.
    MailDropped {
        device_ip: Ipv4Addr,
        timestamp: u32,
        state: MailboxState,
        distance: u16,
        baseline: u16,
        success_rate: u8,
        confidence: u8,
    },
    /// The box was emptied.
    MailCollected {
        device_ip: Ipv4Addr,
        timestamp: u32,
        state: MailboxState,
        distance: u16,
        baseline: u16,
        success_rate: u8,
    },
}

impl TelemetryEvent {
    /// Build the event for a frame that arrived on a topic of class `class`.
    pub fn from_frame(class: TopicClass, frame: &TelemetryFrame) -> Self {
        let TelemetryFrame {
            device_ip,
            timestamp,
            distance,
            state,
            success_rate,
            baseline,
            confidence,
        } = *frame;

        match class {
            TopicClass::Status => Self::StatusUpdate {
                device_ip,
                timestamp,
                state,
                distance,
                baseline,
                success_rate,
            },
            TopicClass::MailDropped => Self::MailDropped {
                device_ip,
                timestamp,
                state,
                distance,
                baseline,
                success_rate,
                confidence,
            },
            TopicClass::MailCollected => Self::MailCollected {
                device_ip,
                timestamp,
                state,
                distance,
                baseline,
                success_rate,
            },
        }
    }

    pub fn kind(&self) -> TopicClass {
        match self {
            Self::StatusUpdate { .. } => TopicClass::Status,
            Self::MailDropped { .. } => TopicClass::MailDropped,
            Self::MailCollected { .. } => TopicClass::MailCollected,
        }
    }

    pub fn device_ip(&self) -> Ipv4Addr {
        match self {
            Self::StatusUpdate { device_ip, .. }
            | Self::MailDropped { device_ip, .. }
            | Self::MailCollected { device_ip, .. } => *device_ip,
        }
    }

    pub fn timestamp(&self) -> u32 {
        match self {
            Self::StatusUpdate { timestamp, .. }
            | Self::MailDropped { timestamp, .. }
            | Self::MailCollected { timestamp, .. } => *timestamp,
        }
    }

    pub fn state(&self) -> MailboxState {
        match self {
            Self::StatusUpdate { state, .. }
            | Self::MailDropped { state, .. }
            | Self::MailCollected { state, .. } => *state,
        }
    }

    pub fn distance(&self) -> u16 {
        match self {
            Self::StatusUpdate { distance, .. }
            | Self::MailDropped { distance, .. }
            | Self::MailCollected { distance, .. } => *distance,
        }
    }

    pub fn baseline(&self) -> u16 {
        match self {
            Self::StatusUpdate { baseline, .. }
            | Self::MailDropped { baseline, .. }
            | Self::MailCollected { baseline, .. } => *baseline,
        }
    }

    pub fn success_rate(&self) -> u8 {
        match self {
            Self::StatusUpdate { success_rate, .. }
            | Self::MailDropped { success_rate, .. }
            | Self::MailCollected { success_rate, .. } => *success_rate,
        }
    }

    /// Detection confidence; only drop events carry one.
    pub fn confidence(&self) -> Option<u8> {
        match self {
            Self::MailDropped { confidence, .. } => Some(*confidence),
            Self::StatusUpdate { .. } | Self::MailCollected { .. } => None,
        }
    }
}
