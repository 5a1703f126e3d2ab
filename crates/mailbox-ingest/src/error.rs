use mailbox_frame::DecodeError;

/// Reasons a bus message did not produce an event.
///
/// None of these are fatal to the ingest loop; the coordinator logs and
/// counts them and moves on to the next message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestError {
    /// The topic does not map to a known event kind.
    #[error("unclassified topic {topic:?}")]
    UnclassifiedTopic { topic: String },

    /// The topic is outside the configured subscription filter.
    #[error("topic {topic:?} does not match subscription {filter:?}")]
    Filtered { topic: String, filter: String },

    /// The payload could not be decoded as a telemetry frame.
    #[error("malformed frame on {topic:?}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: DecodeError,
    },

    /// A subscription filter is not a valid topic filter.
    #[error("invalid topic filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, IngestError>;
