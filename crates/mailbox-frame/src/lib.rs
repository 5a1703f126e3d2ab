//! Fixed-width binary framing for mailbox telemetry.
//!
//! Every frame is exactly 15 bytes, big-endian, with no magic, length prefix
//! or checksum:
//! - device IPv4 address (4 bytes)
//! - Unix timestamp in seconds (4 bytes)
//! - distance in millimetres (2 bytes)
//! - mailbox state code (1 byte)
//! - success rate (1 byte)
//! - baseline distance in millimetres (2 bytes)
//! - event confidence (1 byte)
//!
//! The fixed length is the only delimiter, so stream readers cut the input
//! into 15-byte chunks and decode each one independently.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod error;
pub mod reader;
pub mod record;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::TelemetryCodec;
pub use codec::{decode_frame, encode_frame, MailboxState, TelemetryFrame, FRAME_SIZE};
pub use error::{DecodeError, EncodeError, FrameError, Result};
pub use reader::{FrameReader, ReaderConfig, NEWLINE_DELIMITER};
pub use record::{encode_record, TelemetryRecord};
pub use writer::FrameWriter;
