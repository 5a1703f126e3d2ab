//! Per-device state tracking.
//!
//! The machine trusts the state each device reports. There is no transition
//! table: any reported state replaces the stored one, including transitions
//! that skip `emptied`.

use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use mailbox_frame::{MailboxState, TelemetryFrame};
use serde::Serialize;

use crate::event::TelemetryEvent;
use crate::topic::TopicClass;

/// Last observed reading for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    pub state: MailboxState,
    pub distance: u16,
    pub baseline: u16,
    pub success_rate: u8,
    pub timestamp: u32,
}

impl From<&TelemetryFrame> for DeviceState {
    fn from(frame: &TelemetryFrame) -> Self {
        Self {
            state: frame.state,
            distance: frame.distance,
            baseline: frame.baseline,
            success_rate: frame.success_rate,
            timestamp: frame.timestamp,
        }
    }
}

type DeviceMap = HashMap<Ipv4Addr, DeviceState>;

/// Owns the device table. The only writer of device state.
#[derive(Debug, Default)]
pub struct DeviceStateMachine {
    devices: Arc<RwLock<DeviceMap>>,
}

impl DeviceStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `frame` as the device's current state and build its event.
    ///
    /// The stored entry is overwritten before the event is returned, so the
    /// two always agree.
    pub fn apply(&mut self, class: TopicClass, frame: &TelemetryFrame) -> TelemetryEvent {
        let next = DeviceState::from(frame);
        let previous = self
            .devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(frame.device_ip, next);

        match previous {
            None => tracing::info!(
                device_ip = %frame.device_ip,
                state = %next.state,
                "first frame from device"
            ),
            Some(prev) if prev.state != next.state => tracing::info!(
                device_ip = %frame.device_ip,
                from = %prev.state,
                to = %next.state,
                "mailbox state changed"
            ),
            Some(_) => {}
        }

        TelemetryEvent::from_frame(class, frame)
    }

    /// Current state of one device; `None` until its first frame.
    pub fn get(&self, device_ip: Ipv4Addr) -> Option<DeviceState> {
        read(&self.devices).get(&device_ip).copied()
    }

    /// Read-only handle for other components.
    pub fn view(&self) -> DeviceStateView {
        DeviceStateView {
            devices: Arc::clone(&self.devices),
        }
    }
}

/// Cloneable read-only handle to the device table.
#[derive(Debug, Clone)]
pub struct DeviceStateView {
    devices: Arc<RwLock<DeviceMap>>,
}

impl DeviceStateView {
    pub fn get(&self, device_ip: Ipv4Addr) -> Option<DeviceState> {
        read(&self.devices).get(&device_ip).copied()
    }

    /// Copy of every known device, ordered by address.
    pub fn snapshot(&self) -> BTreeMap<Ipv4Addr, DeviceState> {
        read(&self.devices)
            .iter()
            .map(|(ip, state)| (*ip, *state))
            .collect()
    }

    pub fn len(&self) -> usize {
        read(&self.devices).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.devices).is_empty()
    }
}

fn read(devices: &RwLock<DeviceMap>) -> RwLockReadGuard<'_, DeviceMap> {
    devices.read().unwrap_or_else(PoisonError::into_inner)
}
