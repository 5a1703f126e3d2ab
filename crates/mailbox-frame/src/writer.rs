use std::io::{ErrorKind, Write};

use bytes::{BufMut, BytesMut};

use crate::codec::{TelemetryFrame, FRAME_SIZE};
use crate::error::{FrameError, Result};
use crate::reader::ReaderConfig;

/// Writes frames to any `Write` stream, optionally delimited.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: ReaderConfig,
}

impl<T: Write> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, ReaderConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: ReaderConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(FRAME_SIZE + 1),
            config,
        }
    }

    /// Write one frame and its delimiter, if configured (blocking).
    pub fn write_frame(&mut self, frame: &TelemetryFrame) -> Result<()> {
        self.buf.clear();
        frame.encode_into(&mut self.buf);
        if let Some(delimiter) = self.config.delimiter {
            self.buf.put_u8(delimiter);
        }

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::Io(ErrorKind::WriteZero.into())),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
        Ok(())
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
