//! Glue between the bus, the state machine and the hub.
//!
//! Every message goes through the same pipeline: subscription filter,
//! frame decode, topic classification, state update, broadcast. A message
//! that fails any step is logged and counted; it never mutates state and
//! never reaches an observer.

use std::future::Future;
use std::io::Read;

use bytes::Bytes;
use mailbox_frame::{
    decode_frame, DecodeError, FrameError, FrameReader, ReaderConfig, TelemetryFrame,
};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{IngestError, Result};
use crate::event::TelemetryEvent;
use crate::hub::{BroadcastHub, BroadcastReport};
use crate::state::{DeviceStateMachine, DeviceStateView};
use crate::topic::{TopicClass, TopicFilter, DEFAULT_SUBSCRIPTION};

/// One message delivered by the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Subscription filter applied before classification. `None` accepts
    /// every topic.
    pub subscription: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            subscription: Some(DEFAULT_SUBSCRIPTION.to_string()),
        }
    }
}

/// Running counters kept by the coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Messages or stream frames handed to the coordinator.
    pub received: u64,
    /// Events produced and broadcast.
    pub broadcast: u64,
    pub decode_failures: u64,
    pub unclassified: u64,
    pub filtered: u64,
    /// Streams that closed with a partial frame buffered.
    pub truncated: u64,
    pub io_errors: u64,
    /// Deliveries skipped because an observer queue was full.
    pub observer_drops: u64,
}

/// Result of a successfully ingested message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub event: TelemetryEvent,
    pub report: BroadcastReport,
}

/// Single consumer of bus messages.
///
/// Processes one message at a time, so state updates and broadcasts happen
/// in arrival order.
#[derive(Debug)]
pub struct IngestCoordinator {
    machine: DeviceStateMachine,
    hub: BroadcastHub,
    filter: Option<TopicFilter>,
    stats: IngestStats,
}

impl IngestCoordinator {
    /// Coordinator with the default `home/mailbox/#` subscription.
    pub fn new(hub: BroadcastHub) -> Self {
        Self {
            machine: DeviceStateMachine::new(),
            hub,
            filter: Some(TopicFilter::default()),
            stats: IngestStats::default(),
        }
    }

    pub fn with_config(hub: BroadcastHub, config: IngestConfig) -> Result<Self> {
        let filter = config.subscription.map(TopicFilter::new).transpose()?;
        Ok(Self {
            filter,
            ..Self::new(hub)
        })
    }

    /// Read-only view of the device table.
    pub fn devices(&self) -> DeviceStateView {
        self.machine.view()
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Run one bus message through the pipeline.
    pub fn handle_message(&mut self, message: &BusMessage) -> Result<Dispatch> {
        let decoded = decode_frame(&message.payload);
        self.handle_decoded(&message.topic, decoded)
    }

    /// Run an already decoded (or failed) frame through the pipeline.
    ///
    /// Stream transports cut and decode frames themselves and hand the
    /// outcome over here.
    pub fn handle_decoded(
        &mut self,
        topic: &str,
        decoded: std::result::Result<TelemetryFrame, DecodeError>,
    ) -> Result<Dispatch> {
        self.stats.received += 1;

        if let Some(filter) = &self.filter {
            if !filter.matches(topic) {
                self.stats.filtered += 1;
                tracing::debug!(topic, filter = %filter, "topic outside subscription; ignoring");
                return Err(IngestError::Filtered {
                    topic: topic.to_string(),
                    filter: filter.to_string(),
                });
            }
        }

        let frame = match decoded {
            Ok(frame) => frame,
            Err(source) => {
                self.stats.decode_failures += 1;
                match source.device_ip() {
                    Some(device_ip) => tracing::warn!(
                        topic,
                        device_ip = %device_ip,
                        error = %source,
                        "dropping malformed frame"
                    ),
                    None => tracing::warn!(topic, error = %source, "dropping malformed frame"),
                }
                return Err(IngestError::Decode {
                    topic: topic.to_string(),
                    source,
                });
            }
        };

        let Some(class) = TopicClass::classify(topic) else {
            self.stats.unclassified += 1;
            tracing::warn!(
                topic,
                device_ip = %frame.device_ip,
                "unclassified topic; ignoring message"
            );
            return Err(IngestError::UnclassifiedTopic {
                topic: topic.to_string(),
            });
        };

        let event = self.machine.apply(class, &frame);
        let report = self.hub.broadcast(&event);
        self.stats.broadcast += 1;
        self.stats.observer_drops += report.dropped as u64;

        tracing::info!(
            event_type = %class,
            device_ip = %frame.device_ip,
            state = %frame.state,
            distance = frame.distance,
            delivered = report.delivered,
            "telemetry event"
        );

        Ok(Dispatch { event, report })
    }

    /// Count a stream-level failure that ended a frame stream.
    pub fn record_stream_error(&mut self, err: &FrameError) {
        match err {
            FrameError::Decode(_) => self.stats.decode_failures += 1,
            FrameError::Truncated { .. } => self.stats.truncated += 1,
            FrameError::Io(_) => {
                self.stats.io_errors += 1;
                tracing::error!(error = %err, "frame stream failed");
            }
        }
    }

    /// Consume a raw frame stream in which every frame belongs to `topic`.
    ///
    /// Returns the coordinator's counters once the stream ends.
    pub fn ingest_stream<R: Read>(
        &mut self,
        topic: &str,
        reader: R,
        config: ReaderConfig,
    ) -> IngestStats {
        for item in FrameReader::with_config(reader, config) {
            let decoded = match item {
                Ok(frame) => Ok(frame),
                Err(FrameError::Decode(err)) => Err(err),
                Err(err) => {
                    self.record_stream_error(&err);
                    break;
                }
            };
            // Failures are already logged and counted.
            let _ = self.handle_decoded(topic, decoded);
        }
        self.stats
    }

    /// Drain `messages` until every sender is gone or `shutdown` completes.
    ///
    /// Messages still queued when `shutdown` fires are not processed.
    pub async fn run<F>(
        &mut self,
        mut messages: mpsc::Receiver<BusMessage>,
        shutdown: F,
    ) -> IngestStats
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            subscription = self.filter.as_ref().map(TopicFilter::as_str).unwrap_or("*"),
            "ingest loop started"
        );
        let mut shutdown = std::pin::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("ingest loop interrupted");
                    break;
                }
                message = messages.recv() => match message {
                    Some(message) => {
                        let _ = self.handle_message(&message);
                    }
                    None => break,
                },
            }
        }
        tracing::info!(
            received = self.stats.received,
            broadcast = self.stats.broadcast,
            "ingest loop stopped"
        );
        self.stats
    }
}
