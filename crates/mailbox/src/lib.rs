//! Mailbox telemetry ingest.
//!
//! Battery-powered mailbox sensors publish fixed-width binary frames on a
//! topic bus. This crate decodes them, tracks each device's state and fans
//! typed events out to live observers.
//!
//! # Crate Structure
//!
//! - [`frame`]: 15-byte wire codec, stream reader/writer and the async codec
//!   (behind the `async` feature)
//! - [`ingest`]: topic classification, device state machine, broadcast hub
//!   and ingest coordinator

/// Re-export frame types.
pub mod frame {
    pub use mailbox_frame::*;
}

/// Re-export ingest types.
pub mod ingest {
    pub use mailbox_ingest::*;
}
