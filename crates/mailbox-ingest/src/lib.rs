//! Device state tracking and observer fan-out for mailbox telemetry.
//!
//! Bus messages flow through one pipeline:
//!
//! - [`topic`] classifies the topic and applies the subscription filter
//! - `mailbox_frame::decode_frame` turns the payload into a frame
//! - [`state`] records the device's latest reading and builds the event
//! - [`hub`] fans the event out to every registered observer
//!
//! [`ingest::IngestCoordinator`] owns that pipeline and is the only writer of
//! device state.

pub mod error;
pub mod event;
pub mod hub;
pub mod ingest;
pub mod state;
pub mod topic;

pub use error::{IngestError, Result};
pub use event::TelemetryEvent;
pub use hub::{
    BroadcastHub, BroadcastReport, HubConfig, Observer, ObserverId, OverflowPolicy,
    DEFAULT_OBSERVER_CAPACITY,
};
pub use ingest::{BusMessage, Dispatch, IngestConfig, IngestCoordinator, IngestStats};
pub use state::{DeviceState, DeviceStateMachine, DeviceStateView};
pub use topic::{TopicClass, TopicFilter, BASE_TOPIC, DEFAULT_SUBSCRIPTION};
