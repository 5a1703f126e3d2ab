use std::io::{ErrorKind, Read};

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{decode_frame, TelemetryFrame, FRAME_SIZE};
use crate::error::{DecodeError, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 4 * FRAME_SIZE;
const READ_CHUNK_SIZE: usize = 1024;

/// Delimiter appended by `mosquitto_sub` after each binary payload.
pub const NEWLINE_DELIMITER: u8 = b'\n';

/// Configuration shared by the sync reader, the writer and the async codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Byte expected directly after each frame, if the transport adds one.
    pub delimiter: Option<u8>,
}

impl ReaderConfig {
    /// Frames separated by a single newline byte.
    pub fn newline_delimited() -> Self {
        Self {
            delimiter: Some(NEWLINE_DELIMITER),
        }
    }
}

/// Cuts frames out of a buffered byte sequence.
///
/// Shared by [`FrameReader`] and the async codec so both treat delimiters and
/// residual bytes the same way.
#[derive(Debug)]
pub(crate) struct Segmenter {
    config: ReaderConfig,
    delimiter_pending: bool,
    frames_seen: u64,
}

impl Segmenter {
    pub(crate) fn new(config: ReaderConfig) -> Self {
        Self {
            config,
            delimiter_pending: false,
            frames_seen: 0,
        }
    }

    pub(crate) fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// Take the next frame-sized chunk off `buf` without decoding it.
    ///
    /// Returns `None` until a full frame is buffered.
    pub(crate) fn next_payload(&mut self, buf: &mut BytesMut) -> Option<Bytes> {
        self.skip_delimiter(buf);
        if self.delimiter_pending || buf.len() < FRAME_SIZE {
            return None;
        }

        let chunk = buf.split_to(FRAME_SIZE).freeze();
        self.frames_seen += 1;
        self.delimiter_pending = self.config.delimiter.is_some();
        Some(chunk)
    }

    pub(crate) fn next_frame(
        &mut self,
        buf: &mut BytesMut,
    ) -> Option<std::result::Result<TelemetryFrame, DecodeError>> {
        self.next_payload(buf).map(|chunk| decode_frame(&chunk))
    }

    /// Called once the upstream is closed: report anything still buffered.
    pub(crate) fn finish(&mut self, buf: &mut BytesMut) -> Option<FrameError> {
        self.skip_delimiter(buf);
        self.delimiter_pending = false;
        if buf.is_empty() {
            return None;
        }

        let residual = buf.len();
        tracing::warn!(
            residual,
            frames = self.frames_seen,
            "stream closed mid-frame; discarding residual bytes"
        );
        buf.clear();
        Some(FrameError::Truncated { residual })
    }

    fn skip_delimiter(&mut self, buf: &mut BytesMut) {
        if !self.delimiter_pending || buf.is_empty() {
            return;
        }
        self.delimiter_pending = false;

        let Some(delimiter) = self.config.delimiter else {
            return;
        };
        if buf[0] == delimiter {
            buf.advance(1);
        } else {
            tracing::warn!(
                frame = self.frames_seen,
                expected = delimiter,
                found = buf[0],
                "missing delimiter after frame; treating byte as start of next frame"
            );
        }
    }
}

/// Reads consecutive fixed-width frames from any `Read` stream.
///
/// The reader is a lazy, single-pass iterator. Decode failures are yielded
/// and iteration continues with the next chunk. A close with a partial frame
/// buffered yields [`FrameError::Truncated`] once; I/O errors are yielded
/// once. Both end the iteration.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    segmenter: Segmenter,
    done: bool,
}

impl<T: Read> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, ReaderConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: ReaderConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            segmenter: Segmenter::new(config),
            done: false,
        }
    }

    /// Read the next frame (blocking).
    ///
    /// Returns `Ok(None)` on a clean end of stream.
    pub fn read_frame(&mut self) -> Result<Option<TelemetryFrame>> {
        match self.next() {
            Some(result) => result.map(Some),
            None => Ok(None),
        }
    }

    /// Read the next frame-sized payload without decoding it (blocking).
    ///
    /// Follows the same delimiter and end-of-stream rules as iteration:
    /// `None` after a clean close, and a truncation or I/O error is returned
    /// once before the reader is exhausted.
    pub fn next_payload(&mut self) -> Option<Result<Bytes>> {
        if self.done {
            return None;
        }

        loop {
            if let Some(payload) = self.segmenter.next_payload(&mut self.buf) {
                return Some(Ok(payload));
            }

            match self.fill() {
                Ok(0) => {
                    self.done = true;
                    return self.segmenter.finish(&mut self.buf).map(Err);
                }
                Ok(_) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(FrameError::Io(err)));
                }
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current reader configuration.
    pub fn config(&self) -> &ReaderConfig {
        self.segmenter.config()
    }

    fn fill(&mut self) -> std::io::Result<usize> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            match self.inner.read(&mut chunk) {
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(n);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

impl<T: Read> Iterator for FrameReader<T> {
    type Item = Result<TelemetryFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        let payload = self.next_payload()?;
        Some(payload.and_then(|chunk| decode_frame(&chunk).map_err(FrameError::from)))
    }
}

impl<T: Read> std::iter::FusedIterator for FrameReader<T> {}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::net::Ipv4Addr;

    use super::*;
    use crate::codec::{encode_frame, MailboxState};

    fn frame(n: u8) -> TelemetryFrame {
        TelemetryFrame {
            device_ip: Ipv4Addr::new(10, 0, 0, n),
            timestamp: 1_704_067_200 + u32::from(n),
            distance: 200 + u16::from(n),
            state: MailboxState::ALL[usize::from(n % 4)],
            success_rate: 90,
            baseline: 300,
            confidence: n,
        }
    }

    fn wire(frames: &[TelemetryFrame]) -> Vec<u8> {
        frames.iter().flat_map(encode_frame).collect()
    }

    #[test]
    fn segments_concatenated_frames_in_order() {
        let frames: Vec<_> = (0..8).map(frame).collect();
        let bytes = wire(&frames);

        let decoded: Vec<_> = FrameReader::new(Cursor::new(bytes.clone()))
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(decoded, frames);

        let standalone: Vec<_> = bytes
            .chunks(FRAME_SIZE)
            .map(|chunk| decode_frame(chunk).unwrap())
            .collect();
        assert_eq!(decoded, standalone);
    }

    #[test]
    fn partial_read_handling() {
        let frames = [frame(1), frame(2)];
        let byte_reader = ByteByByteReader {
            bytes: wire(&frames),
            pos: 0,
        };

        let decoded: Vec<_> = FrameReader::new(byte_reader).map(|r| r.unwrap()).collect();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn clean_close_ends_iteration() {
        let mut reader = FrameReader::new(Cursor::new(Vec::<u8>::new()));
        assert!(reader.next().is_none());
        assert!(reader.read_frame().unwrap().is_none());
    }

    #[test]
    fn residual_bytes_report_truncation_once() {
        let mut bytes = wire(&[frame(1)]);
        bytes.extend_from_slice(&[0xc0, 0xa8, 0x01]);

        let mut reader = FrameReader::new(Cursor::new(bytes));
        assert_eq!(reader.next().unwrap().unwrap(), frame(1));
        assert!(matches!(
            reader.next(),
            Some(Err(FrameError::Truncated { residual: 3 }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn decode_failure_does_not_stop_the_stream() {
        let mut bytes = wire(&[frame(1), frame(2), frame(3)]);
        bytes[FRAME_SIZE + 10] = 9;

        let results: Vec<_> = FrameReader::new(Cursor::new(bytes)).collect();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &frame(1));
        assert!(matches!(
            &results[1],
            Err(FrameError::Decode(DecodeError::InvalidState { value: 9, .. }))
        ));
        assert_eq!(results[2].as_ref().unwrap(), &frame(3));
    }

    #[test]
    fn payloads_are_cut_without_decoding() {
        let mut bytes = Vec::new();
        for n in 1..=2 {
            bytes.extend_from_slice(&encode_frame(&frame(n)));
            bytes.push(b'\n');
        }
        bytes[10] = 9;
        bytes.extend_from_slice(&[0x0a, 0x00]);

        let mut reader =
            FrameReader::with_config(Cursor::new(bytes), ReaderConfig::newline_delimited());
        let first = reader.next_payload().unwrap().unwrap();
        assert_eq!(first.len(), FRAME_SIZE);
        assert_eq!(first[10], 9);
        assert_eq!(
            reader.next_payload().unwrap().unwrap().as_ref(),
            &encode_frame(&frame(2))[..]
        );
        assert!(matches!(
            reader.next_payload(),
            Some(Err(FrameError::Truncated { residual: 2 }))
        ));
        assert!(reader.next_payload().is_none());
    }

    #[test]
    fn newline_delimiters_are_skipped() {
        let mut bytes = Vec::new();
        for n in 1..=3 {
            bytes.extend_from_slice(&encode_frame(&frame(n)));
            bytes.push(b'\n');
        }

        let decoded: Vec<_> =
            FrameReader::with_config(Cursor::new(bytes), ReaderConfig::newline_delimited())
                .map(|r| r.unwrap())
                .collect();
        assert_eq!(decoded, vec![frame(1), frame(2), frame(3)]);
    }

    #[test]
    fn delimited_frame_starting_with_delimiter_byte() {
        // 10.x.x.x devices start with 0x0a, the newline byte.
        let first = frame(1);
        let mut bytes = encode_frame(&first).to_vec();
        bytes.push(b'\n');
        bytes.extend_from_slice(&encode_frame(&first));

        let decoded: Vec<_> =
            FrameReader::with_config(Cursor::new(bytes), ReaderConfig::newline_delimited())
                .map(|r| r.unwrap())
                .collect();
        assert_eq!(decoded, vec![first, first]);
    }

    #[test]
    fn missing_delimiter_keeps_alignment() {
        let mut bytes = encode_frame(&frame(1)).to_vec();
        bytes.extend_from_slice(&encode_frame(&frame(2)));
        bytes[FRAME_SIZE] = 192;
        let second = TelemetryFrame {
            device_ip: Ipv4Addr::new(192, 0, 0, 2),
            ..frame(2)
        };

        let decoded: Vec<_> =
            FrameReader::with_config(Cursor::new(bytes), ReaderConfig::newline_delimited())
                .map(|r| r.unwrap())
                .collect();
        assert_eq!(decoded, vec![frame(1), second]);
    }

    #[test]
    fn io_error_is_yielded_once() {
        let mut reader = FrameReader::new(FailingReader);
        assert!(matches!(reader.next(), Some(Err(FrameError::Io(_)))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn interrupted_read_retries() {
        let reader = InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[frame(7)])),
        };
        let mut framed = FrameReader::new(reader);
        assert_eq!(framed.read_frame().unwrap(), Some(frame(7)));
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }

            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(ErrorKind::BrokenPipe))
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
