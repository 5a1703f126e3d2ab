//! `tokio_util::codec` adapter for telemetry streams.
//!
//! Decode failures are returned as items, not codec errors, so a single bad
//! frame does not terminate a `FramedRead`. Only I/O errors and a mid-frame
//! close surface as [`FrameError`].

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{TelemetryFrame, FRAME_SIZE};
use crate::error::{DecodeError, FrameError};
use crate::reader::{ReaderConfig, Segmenter};

/// Fixed-width telemetry codec for `FramedRead` / `FramedWrite`.
#[derive(Debug)]
pub struct TelemetryCodec {
    segmenter: Segmenter,
}

impl TelemetryCodec {
    pub fn new() -> Self {
        Self::with_config(ReaderConfig::default())
    }

    pub fn with_config(config: ReaderConfig) -> Self {
        Self {
            segmenter: Segmenter::new(config),
        }
    }

    pub fn config(&self) -> &ReaderConfig {
        self.segmenter.config()
    }
}

impl Default for TelemetryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TelemetryCodec {
    type Item = Result<TelemetryFrame, DecodeError>;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let next = self.segmenter.next_frame(src);
        if next.is_none() {
            src.reserve(FRAME_SIZE.saturating_sub(src.len()));
        }
        Ok(next)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(item) = self.segmenter.next_frame(src) {
            return Ok(Some(item));
        }
        match self.segmenter.finish(src) {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }
}

impl Encoder<TelemetryFrame> for TelemetryCodec {
    type Error = FrameError;

    fn encode(&mut self, item: TelemetryFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        if let Some(delimiter) = self.segmenter.config().delimiter {
            dst.put_u8(delimiter);
        }
        Ok(())
    }
}
